//! Process-wide claims on stores that live at a path.
//!
//! Each executor owns its own store handle, so its mutex only serializes
//! callers of that executor. A claim is keyed by the store's canonical path
//! and excludes every other handle on the same file for as long as it lives.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

static CLAIMED: Mutex<BTreeSet<PathBuf>> = Mutex::new(BTreeSet::new());

fn claimed() -> MutexGuard<'static, BTreeSet<PathBuf>> {
    match CLAIMED.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Released on drop.
#[derive(Debug)]
pub struct StoreClaim {
    key: PathBuf,
}

impl StoreClaim {
    /// `None` while another claim on `key` is alive.
    pub fn try_claim(key: &Path) -> Option<StoreClaim> {
        if !claimed().insert(key.to_path_buf()) {
            debug!(store = %key.display(), "store already claimed");
            return None;
        }
        Some(StoreClaim {
            key: key.to_path_buf(),
        })
    }

    pub fn key(&self) -> &Path {
        &self.key
    }
}

impl Drop for StoreClaim {
    fn drop(&mut self) {
        claimed().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_waits_for_the_first_to_drop() {
        let key = std::env::temp_dir().join("rosterd-claim-test").join("roster.sqlite3");
        let first = StoreClaim::try_claim(&key).expect("first claim");
        assert_eq!(first.key(), key.as_path());
        assert!(StoreClaim::try_claim(&key).is_none());

        let other = key.with_file_name("other.sqlite3");
        let unrelated = StoreClaim::try_claim(&other).expect("different key");

        drop(first);
        assert!(StoreClaim::try_claim(&key).is_some());
        drop(unrelated);
    }
}
