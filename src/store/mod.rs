//! Destination store contract.
//!
//! The engine depends only on [`Store`]. [`SqliteStore`] is the workspace
//! database; [`MemoryStore`] is an in-process store with the same foreign-key
//! behavior, used by tests and dry runs.

mod claim;
mod memory;
mod sqlite;

pub use claim::StoreClaim;
pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, DB_FILE};

use crate::model::{zero_counts, Batch, Counts, Dataset, EntityKind, User, FORWARD_ORDER, REVERSE_ORDER};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("constraint violation on {kind}: {message}")]
    Constraint { kind: EntityKind, message: String },
    #[error("corrupt row in {table}: {message}")]
    CorruptRow { table: &'static str, message: String },
    #[error("no transaction in progress")]
    NoTransaction,
    #[error("a transaction is already in progress")]
    TransactionInProgress,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result of clearing one entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    Cleared(usize),
    /// The kind's table was never created; there was nothing to remove.
    NotInitialized,
}

pub trait Store {
    fn begin(&mut self) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
    fn rollback(&mut self) -> Result<(), StoreError>;

    /// Delete every row of `kind`.
    fn clear(&mut self, kind: EntityKind) -> Result<ClearOutcome, StoreError>;

    /// Insert all rows of one kind. Returns the number of rows written.
    fn insert(&mut self, batch: Batch<'_>) -> Result<usize, StoreError>;

    /// Committed state of every kind, sorted by id.
    fn read_all(&self) -> Result<Dataset, StoreError>;

    fn counts(&self) -> Result<Counts, StoreError> {
        Ok(self.read_all()?.counts())
    }

    /// Canonical location of the backing file, shared by every handle opened
    /// on it. `None` for stores that only exist in this handle.
    fn lock_key(&self) -> Option<PathBuf> {
        None
    }
}

/// Clears every kind in reverse dependency order, writes `bootstrap` (if any),
/// then inserts `dataset` in forward dependency order.
///
/// Transaction handling is the caller's job. The returned counts cover the
/// dataset only, not the bootstrap user.
pub fn replace_contents<S: Store + ?Sized>(
    store: &mut S,
    dataset: &Dataset,
    bootstrap: Option<&User>,
) -> Result<Counts, StoreError> {
    for kind in REVERSE_ORDER {
        match store.clear(kind)? {
            ClearOutcome::Cleared(rows) => debug!(kind = %kind, rows, "cleared"),
            ClearOutcome::NotInitialized => debug!(kind = %kind, "not initialized, nothing to clear"),
        }
    }

    if let Some(user) = bootstrap {
        store.insert(Batch::Users(std::slice::from_ref(user)))?;
    }

    let mut counts = zero_counts();
    for kind in FORWARD_ORDER {
        let batch = dataset.batch(kind);
        if batch.is_empty() {
            continue;
        }
        let rows = store.insert(batch)?;
        debug!(kind = %kind, rows, "inserted");
        counts.insert(kind, rows);
    }
    Ok(counts)
}
