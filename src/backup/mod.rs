//! Checksummed snapshots of the store, taken before any destructive write.

mod dir;

pub use dir::{DirBackupStorage, BUNDLE_FORMAT_V1, BUNDLE_SUFFIX};

use crate::checksum;
use crate::model::{Counts, Dataset};
use crate::store::{replace_contents, Store, StoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{info, warn};

/// Sortable UTC timestamp; lexical order is chronological order.
const ID_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("backup not found: {0}")]
    NotFound(String),
    #[error("backup already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid backup id: {0:?}")]
    InvalidId(String),
    /// The stored bundle cannot be read back as written.
    #[error("backup {id} is corrupt: {message}")]
    Corrupt { id: String, message: String },
    #[error("backup {id} failed integrity check: stored checksum {expected}, computed {actual}")]
    Integrity {
        id: String,
        expected: String,
        actual: String,
    },
    #[error("backup storage unavailable: {0}")]
    Unavailable(String),
}

impl BackupError {
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            BackupError::Integrity { .. } | BackupError::Corrupt { .. }
        )
    }
}

/// What a backup medium persists per backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBackup {
    pub created_at: DateTime<Utc>,
    pub snapshot: Vec<u8>,
    pub checksum: String,
}

/// Key-value medium for backups, keyed by backup id.
pub trait BackupStorage {
    /// Must refuse to overwrite an existing id.
    fn put(&self, id: &str, backup: &StoredBackup) -> Result<(), BackupError>;
    fn get(&self, id: &str) -> Result<Option<StoredBackup>, BackupError>;
    /// Ids in no particular order.
    fn list(&self) -> Result<Vec<String>, BackupError>;
}

/// Descriptor of a backup that was just written.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationBackup {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub checksum: String,
    pub size_bytes: usize,
    pub counts: Counts,
    #[serde(skip)]
    pub snapshot: Vec<u8>,
}

pub struct BackupManager<B> {
    storage: B,
}

impl<B: BackupStorage> BackupManager<B> {
    pub fn new(storage: B) -> Self {
        BackupManager { storage }
    }

    pub fn storage(&self) -> &B {
        &self.storage
    }

    /// Snapshot the committed state of `store` and persist it.
    pub fn create_backup<S: Store + ?Sized>(&self, store: &S) -> Result<MigrationBackup, BackupError> {
        let state = store.read_all()?;
        let snapshot = serde_json::to_vec(&state)?;
        let digest = checksum::checksum(&snapshot);
        let created_at = Utc::now();
        let id = self.next_id(created_at)?;

        self.storage.put(
            &id,
            &StoredBackup {
                created_at,
                snapshot: snapshot.clone(),
                checksum: digest.clone(),
            },
        )?;
        info!(backup_id = %id, bytes = snapshot.len(), checksum = %digest, "backup created");

        Ok(MigrationBackup {
            id,
            created_at,
            checksum: digest,
            size_bytes: snapshot.len(),
            counts: state.counts(),
            snapshot,
        })
    }

    /// Load a backup and check it against its stored checksum.
    pub fn verify_backup(&self, id: &str) -> Result<Dataset, BackupError> {
        let stored = self
            .storage
            .get(id)?
            .ok_or_else(|| BackupError::NotFound(id.to_string()))?;
        if !checksum::matches(&stored.snapshot, &stored.checksum) {
            return Err(BackupError::Integrity {
                id: id.to_string(),
                expected: stored.checksum,
                actual: checksum::checksum(&stored.snapshot),
            });
        }
        Ok(serde_json::from_slice(&stored.snapshot)?)
    }

    /// Replace the store's contents with a verified backup, in one
    /// transaction. The store is not touched if verification fails.
    pub fn restore<S: Store + ?Sized>(&self, store: &mut S, id: &str) -> Result<Counts, BackupError> {
        let snapshot = self.verify_backup(id)?;
        store.begin()?;
        let counts = match replace_contents(store, &snapshot, None) {
            Ok(c) => c,
            Err(e) => {
                if let Err(rb) = store.rollback() {
                    warn!(backup_id = %id, error = %rb, "rollback after failed restore also failed");
                }
                return Err(e.into());
            }
        };
        if let Err(e) = store.commit() {
            if let Err(rb) = store.rollback() {
                warn!(backup_id = %id, error = %rb, "rollback after failed commit also failed");
            }
            return Err(e.into());
        }
        info!(backup_id = %id, "backup restored");
        Ok(counts)
    }

    /// Newest first. Collision suffixes compare numerically.
    pub fn list_backups(&self) -> Result<Vec<String>, BackupError> {
        let mut ids = self.storage.list()?;
        ids.sort_by(|a, b| id_order_key(b).cmp(&id_order_key(a)));
        Ok(ids)
    }

    fn next_id(&self, at: DateTime<Utc>) -> Result<String, BackupError> {
        let base = at.format(ID_FORMAT).to_string();
        let taken: HashSet<String> = self.storage.list()?.into_iter().collect();
        if !taken.contains(&base) {
            return Ok(base);
        }
        let mut n = 1usize;
        loop {
            let candidate = format!("{}-{}", base, n);
            if !taken.contains(&candidate) {
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

/// Splits `<timestamp>-<n>` so that `-10` sorts after `-9`. An unsuffixed id
/// is the first of its timestamp.
fn id_order_key(id: &str) -> (&str, u64) {
    match id.rsplit_once('-') {
        Some((base, n))
            if base.ends_with('Z') && !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) =>
        {
            (base, n.parse().unwrap_or(u64::MAX))
        }
        _ => (id, 0),
    }
}

/// Backups held in process memory.
#[derive(Debug, Default)]
pub struct MemoryBackupStorage {
    backups: Mutex<BTreeMap<String, StoredBackup>>,
    unavailable: AtomicBool,
}

impl MemoryBackupStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every operation fails with [`BackupError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Mutate a stored backup in place. Returns false if `id` is unknown.
    pub fn tamper(&self, id: &str, f: impl FnOnce(&mut StoredBackup)) -> bool {
        let mut guard = match self.backups.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.get_mut(id) {
            Some(b) => {
                f(b);
                true
            }
            None => false,
        }
    }

    fn check_available(&self) -> Result<(), BackupError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackupError::Unavailable("memory backup storage offline".into()));
        }
        Ok(())
    }

    fn with_backups<T>(&self, f: impl FnOnce(&mut BTreeMap<String, StoredBackup>) -> T) -> T {
        let mut guard = match self.backups.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl BackupStorage for MemoryBackupStorage {
    fn put(&self, id: &str, backup: &StoredBackup) -> Result<(), BackupError> {
        self.check_available()?;
        self.with_backups(|m| {
            if m.contains_key(id) {
                return Err(BackupError::AlreadyExists(id.to_string()));
            }
            m.insert(id.to_string(), backup.clone());
            Ok(())
        })
    }

    fn get(&self, id: &str) -> Result<Option<StoredBackup>, BackupError> {
        self.check_available()?;
        Ok(self.with_backups(|m| m.get(id).cloned()))
    }

    fn list(&self) -> Result<Vec<String>, BackupError> {
        self.check_available()?;
        Ok(self.with_backups(|m| m.keys().cloned().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Batch, Class, EntityKind};
    use crate::store::MemoryStore;

    fn seeded_store() -> MemoryStore {
        let mut store = MemoryStore::new();
        let c = Class {
            id: "c1".into(),
            name: "Algebra".into(),
            capacity: 30,
            ..Default::default()
        };
        store
            .insert(Batch::Classes(std::slice::from_ref(&c)))
            .expect("seed");
        store
    }

    #[test]
    fn backup_then_restore_round_trips_state() {
        let manager = BackupManager::new(MemoryBackupStorage::new());
        let mut store = seeded_store();
        let before = store.read_all().expect("read");
        let backup = manager.create_backup(&store).expect("backup");
        assert_eq!(backup.counts[&EntityKind::Class], 1);

        store.clear(EntityKind::Class).expect("clear");
        let counts = manager.restore(&mut store, &backup.id).expect("restore");
        assert_eq!(counts[&EntityKind::Class], 1);
        assert_eq!(store.read_all().expect("read"), before);
    }

    #[test]
    fn tampered_checksum_refuses_restore() {
        let manager = BackupManager::new(MemoryBackupStorage::new());
        let mut store = seeded_store();
        let backup = manager.create_backup(&store).expect("backup");
        assert!(manager
            .storage()
            .tamper(&backup.id, |b| b.checksum = checksum::checksum(b"other")));

        store.clear(EntityKind::Class).expect("clear");
        let err = manager
            .restore(&mut store, &backup.id)
            .expect_err("tampered backup must not restore");
        assert!(err.is_integrity(), "{err}");
        assert!(store.contents().classes.is_empty());
    }

    #[test]
    fn tampered_snapshot_refuses_restore() {
        let manager = BackupManager::new(MemoryBackupStorage::new());
        let mut store = seeded_store();
        let backup = manager.create_backup(&store).expect("backup");
        manager.storage().tamper(&backup.id, |b| {
            b.snapshot = br#"{"classes":[]}"#.to_vec();
        });
        let before = store.read_all().expect("read");
        let err = manager
            .restore(&mut store, &backup.id)
            .expect_err("tampered backup must not restore");
        assert!(err.is_integrity());
        assert_eq!(store.read_all().expect("read"), before);
    }

    #[test]
    fn ids_are_unique_and_listed_newest_first() {
        let manager = BackupManager::new(MemoryBackupStorage::new());
        let store = seeded_store();
        let ids: Vec<String> = (0..3)
            .map(|_| manager.create_backup(&store).expect("backup").id)
            .collect();
        let listed = manager.list_backups().expect("list");
        assert_eq!(listed.len(), 3);
        let mut expected = ids.clone();
        expected.sort();
        expected.reverse();
        assert_eq!(listed, expected);
    }

    #[test]
    fn collision_suffixes_list_in_numeric_order() {
        let manager = BackupManager::new(MemoryBackupStorage::new());
        let store = seeded_store();
        let template = manager.create_backup(&store).expect("backup");
        let stored = manager
            .storage()
            .get(&template.id)
            .expect("get")
            .expect("stored");

        let at = DateTime::parse_from_rfc3339("2024-03-01T08:00:00Z")
            .expect("ts")
            .with_timezone(&Utc);
        let mut written = Vec::new();
        for _ in 0..12 {
            let id = manager.next_id(at).expect("id");
            manager.storage().put(&id, &stored).expect("put");
            written.push(id);
        }
        assert_eq!(written[0], "20240301T080000.000000Z");
        assert_eq!(written[11], "20240301T080000.000000Z-11");

        let listed = manager.list_backups().expect("list");
        assert_eq!(listed.len(), 13);
        assert_eq!(listed[0], template.id);
        let mut newest_first = written.clone();
        newest_first.reverse();
        assert_eq!(&listed[1..], &newest_first[..]);
        assert_eq!(listed[2], "20240301T080000.000000Z-10");
        assert_eq!(listed[3], "20240301T080000.000000Z-9");
    }

    #[test]
    fn unknown_backup_is_not_found() {
        let manager = BackupManager::new(MemoryBackupStorage::new());
        let mut store = MemoryStore::new();
        assert!(matches!(
            manager.restore(&mut store, "19700101T000000.000000Z"),
            Err(BackupError::NotFound(_))
        ));
    }
}
