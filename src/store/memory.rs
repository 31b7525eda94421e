use super::{ClearOutcome, Store, StoreError};
use crate::model::{Batch, Dataset, EntityKind};
use std::collections::{BTreeSet, HashSet};

/// In-process store. Enforces primary keys and foreign keys the way the
/// SQLite schema does, and supports one level of transaction.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Dataset,
    initialized: BTreeSet<EntityKind>,
    saved: Option<(Dataset, BTreeSet<EntityKind>)>,
}

impl MemoryStore {
    /// Empty store with every table created.
    pub fn new() -> Self {
        MemoryStore {
            initialized: EntityKind::ALL.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Empty store with no tables; they are created on first insert.
    pub fn uninitialized() -> Self {
        MemoryStore::default()
    }

    pub fn contents(&self) -> &Dataset {
        &self.tables
    }

    /// Direct access that bypasses constraints, for seeding fixtures or
    /// simulating an external writer.
    pub fn contents_mut(&mut self) -> &mut Dataset {
        &mut self.tables
    }

    pub fn in_transaction(&self) -> bool {
        self.saved.is_some()
    }

    fn referencing_rows(&self, kind: EntityKind) -> Option<String> {
        let ids = self.tables.ids(kind);
        for child in kind.children() {
            for rec in self.tables.batch(child).records() {
                if let Some(r) = rec
                    .references()
                    .into_iter()
                    .find(|r| r.target == kind && ids.contains(r.id))
                {
                    return Some(format!(
                        "{} {:?} still references {} {:?}",
                        child,
                        rec.id(),
                        kind,
                        r.id
                    ));
                }
            }
        }
        None
    }

    fn check_insert(&self, batch: &Batch<'_>) -> Result<(), StoreError> {
        let kind = batch.kind();
        let mut seen: HashSet<&str> = self.tables.ids(kind);
        for rec in batch.records() {
            if !seen.insert(rec.id()) {
                return Err(StoreError::Constraint {
                    kind,
                    message: format!("duplicate primary key {:?}", rec.id()),
                });
            }
            for r in rec.references() {
                if !self.tables.contains(r.target, r.id) {
                    return Err(StoreError::Constraint {
                        kind,
                        message: format!(
                            "{} references missing {} {:?}",
                            r.field, r.target, r.id
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Store for MemoryStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        if self.saved.is_some() {
            return Err(StoreError::TransactionInProgress);
        }
        self.saved = Some((self.tables.clone(), self.initialized.clone()));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.saved.take().ok_or(StoreError::NoTransaction)?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        let (tables, initialized) = self.saved.take().ok_or(StoreError::NoTransaction)?;
        self.tables = tables;
        self.initialized = initialized;
        Ok(())
    }

    fn clear(&mut self, kind: EntityKind) -> Result<ClearOutcome, StoreError> {
        if !self.initialized.contains(&kind) {
            return Ok(ClearOutcome::NotInitialized);
        }
        if let Some(message) = self.referencing_rows(kind) {
            return Err(StoreError::Constraint { kind, message });
        }
        Ok(ClearOutcome::Cleared(self.tables.clear_kind(kind)))
    }

    fn insert(&mut self, batch: Batch<'_>) -> Result<usize, StoreError> {
        self.check_insert(&batch)?;
        self.initialized.insert(batch.kind());
        self.tables.extend(batch);
        Ok(batch.len())
    }

    fn read_all(&self) -> Result<Dataset, StoreError> {
        let mut snapshot = self.tables.clone();
        snapshot.sort_canonical();
        Ok(snapshot)
    }
}
