//! Migration executor.
//!
//! One call to [`MigrationExecutor::migrate_all_data`] walks
//! `Idle -> Validating -> BackingUp -> Applying -> PostVerifying -> Committed`,
//! stopping in `Aborted(reason)` at the first failing phase:
//!
//! - validation and backup failures leave the store untouched;
//! - apply failures are rolled back by the store transaction;
//! - post-verification failures happen after commit, so the backup taken in
//!   `BackingUp` is restored explicitly.

use crate::audit::AuditLogger;
use crate::backup::{BackupError, BackupManager, BackupStorage};
use crate::model::{zero_counts, Counts, Dataset, EntityKind, User, SYSTEM_USER_ID};
use crate::store::{replace_contents, Store, StoreClaim, StoreError};
use crate::validate::{check_references, validate, ValidationError};
use serde::{Serialize, Serializer};
use serde_json::json;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration already in progress")]
    Busy,
    #[error("backup error: {0}")]
    Backup(#[from] BackupError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AbortReason {
    Validation,
    BackupFailed,
    ApplyFailed,
    PostVerifyFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Idle,
    Validating,
    BackingUp,
    Applying,
    PostVerifying,
    Committed,
    Aborted(AbortReason),
}

/// Which recovery action ran after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Recovery {
    None,
    AutoRollback,
    RestoredFromBackup,
    /// Post-verification failed and the restore failed too. The store holds
    /// the migrated data; the backup id in the result is the recovery point.
    RestoreFailed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    pub success: bool,
    pub run_id: String,
    /// Terminal phase: `Committed` or `Aborted(reason)`.
    pub phase: Phase,
    pub recovery: Recovery,
    pub counts: Counts,
    pub errors: Vec<ValidationError>,
    #[serde(rename = "elapsedMs", serialize_with = "as_millis")]
    pub elapsed: Duration,
    pub backup_id: Option<String>,
    pub message: Option<String>,
    pub phases: Vec<Phase>,
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl MigrationResult {
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self.phase {
            Phase::Aborted(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Phase bookkeeping for one invocation.
struct Run<'a> {
    audit: &'a AuditLogger,
    run_id: String,
    started: Instant,
    phase: Phase,
    phases: Vec<Phase>,
}

impl<'a> Run<'a> {
    fn start(audit: &'a AuditLogger, dataset: &Dataset) -> Self {
        let run_id = Uuid::new_v4().to_string();
        audit.log(
            "migration started",
            json!({ "runId": run_id, "input": dataset.counts() }),
        );
        Run {
            audit,
            run_id,
            started: Instant::now(),
            phase: Phase::Idle,
            phases: vec![Phase::Idle],
        }
    }

    fn enter(&mut self, next: Phase, detail: serde_json::Value) {
        info!(run_id = %self.run_id, from = ?self.phase, to = ?next, "migration phase");
        self.audit.log(
            "phase transition",
            json!({
                "runId": self.run_id,
                "from": self.phase,
                "to": next,
                "elapsedMs": self.started.elapsed().as_millis() as u64,
                "detail": detail,
            }),
        );
        self.phase = next;
        self.phases.push(next);
    }

    fn finish(
        mut self,
        terminal: Phase,
        recovery: Recovery,
        counts: Counts,
        errors: Vec<ValidationError>,
        backup_id: Option<String>,
        message: Option<String>,
    ) -> MigrationResult {
        self.enter(
            terminal,
            json!({ "recovery": recovery, "message": message }),
        );
        let result = MigrationResult {
            success: terminal == Phase::Committed,
            run_id: self.run_id,
            phase: terminal,
            recovery,
            counts,
            errors,
            elapsed: self.started.elapsed(),
            backup_id,
            message,
            phases: self.phases,
        };
        self.audit.log(
            "migration finished",
            json!({
                "runId": result.run_id,
                "success": result.success,
                "phase": result.phase,
                "recovery": result.recovery,
                "counts": result.counts,
                "errorCount": result.errors.len(),
                "elapsedMs": result.elapsed.as_millis() as u64,
                "backupId": result.backup_id,
                "message": result.message,
            }),
        );
        result
    }

    fn abort(
        self,
        reason: AbortReason,
        recovery: Recovery,
        backup_id: Option<String>,
        message: String,
    ) -> MigrationResult {
        self.finish(
            Phase::Aborted(reason),
            recovery,
            zero_counts(),
            Vec::new(),
            backup_id,
            Some(message),
        )
    }
}

struct ApplyFailure {
    error: StoreError,
    rolled_back: bool,
}

struct VerifyFailure {
    message: String,
    errors: Vec<ValidationError>,
}

/// Exclusive use of the store: this executor's mutex plus, for stores backed
/// by a file, the process-wide claim on that file.
struct StoreLease<'a, S> {
    store: MutexGuard<'a, S>,
    _claim: Option<StoreClaim>,
}

impl<S> Deref for StoreLease<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.store
    }
}

impl<S> DerefMut for StoreLease<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.store
    }
}

pub struct MigrationExecutor<S, B> {
    store: Mutex<S>,
    lock_key: Option<PathBuf>,
    backups: BackupManager<B>,
    audit: AuditLogger,
}

impl<S: Store, B: BackupStorage> MigrationExecutor<S, B> {
    pub fn new(store: S, backups: BackupManager<B>, audit: AuditLogger) -> Self {
        let lock_key = store.lock_key();
        MigrationExecutor {
            store: Mutex::new(store),
            lock_key,
            backups,
            audit,
        }
    }

    /// Exclude every executor that uses the same key, whatever its store
    /// reports.
    pub fn with_lock_key(mut self, key: impl Into<PathBuf>) -> Self {
        self.lock_key = Some(key.into());
        self
    }

    pub fn lock_key(&self) -> Option<&Path> {
        self.lock_key.as_deref()
    }

    pub fn backups(&self) -> &BackupManager<B> {
        &self.backups
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Exclusive access to the store. Fails with `Busy` while a migration or
    /// restore holds it, through this executor or any other on the same key.
    fn acquire(&self) -> Result<StoreLease<'_, S>, MigrationError> {
        let store = match self.store.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(MigrationError::Busy),
            Err(TryLockError::Poisoned(poisoned)) => {
                warn!("previous migration panicked; discarding any open transaction");
                let mut guard = poisoned.into_inner();
                let _ = guard.rollback();
                guard
            }
        };
        let claim = match &self.lock_key {
            Some(key) => Some(StoreClaim::try_claim(key).ok_or(MigrationError::Busy)?),
            None => None,
        };
        Ok(StoreLease {
            store,
            _claim: claim,
        })
    }

    pub fn with_store<T>(&self, f: impl FnOnce(&mut S) -> T) -> Result<T, MigrationError> {
        let mut guard = self.acquire()?;
        Ok(f(&mut *guard))
    }

    pub fn counts(&self) -> Result<Counts, MigrationError> {
        let guard = self.acquire()?;
        Ok(guard.counts()?)
    }

    pub fn into_store(self) -> S {
        match self.store.into_inner() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Replace the store's contents with `dataset`.
    ///
    /// `Err` only when another migration or restore is in flight; every other
    /// outcome is described by the returned [`MigrationResult`].
    pub fn migrate_all_data(&self, dataset: &Dataset) -> Result<MigrationResult, MigrationError> {
        let mut store = self.acquire()?;
        let mut run = Run::start(&self.audit, dataset);

        run.enter(Phase::Validating, json!({}));
        let errors = validate(dataset);
        if !errors.is_empty() {
            warn!(run_id = %run.run_id, errors = errors.len(), "dataset rejected");
            let message = format!("dataset has {} validation error(s)", errors.len());
            return Ok(run.finish(
                Phase::Aborted(AbortReason::Validation),
                Recovery::None,
                zero_counts(),
                errors,
                None,
                Some(message),
            ));
        }

        run.enter(Phase::BackingUp, json!({}));
        let backup = match self.backups.create_backup(&*store) {
            Ok(b) => b,
            Err(e) => {
                error!(run_id = %run.run_id, error = %e, "backup failed; store untouched");
                return Ok(run.abort(
                    AbortReason::BackupFailed,
                    Recovery::None,
                    None,
                    format!("backup failed: {}", e),
                ));
            }
        };

        run.enter(
            Phase::Applying,
            json!({ "backupId": backup.id, "checksum": backup.checksum }),
        );
        let counts = match apply(&mut *store, dataset) {
            Ok(c) => c,
            Err(failure) => {
                error!(run_id = %run.run_id, error = %failure.error, "apply failed");
                let recovery = if failure.rolled_back {
                    Recovery::AutoRollback
                } else {
                    Recovery::None
                };
                return Ok(run.abort(
                    AbortReason::ApplyFailed,
                    recovery,
                    Some(backup.id),
                    format!("apply failed: {}", failure.error),
                ));
            }
        };

        run.enter(Phase::PostVerifying, json!({ "written": counts }));
        if let Err(failure) = post_verify(&*store, &counts) {
            error!(run_id = %run.run_id, problem = %failure.message, "post-verification failed; restoring backup");
            let (recovery, message) = match self.backups.restore(&mut *store, &backup.id) {
                Ok(_) => (
                    Recovery::RestoredFromBackup,
                    format!("post-verification failed: {}; restored backup {}", failure.message, backup.id),
                ),
                Err(e) => {
                    error!(run_id = %run.run_id, backup_id = %backup.id, error = %e, "restore failed");
                    (
                        Recovery::RestoreFailed,
                        format!(
                            "post-verification failed: {}; restore of backup {} failed: {}",
                            failure.message, backup.id, e
                        ),
                    )
                }
            };
            return Ok(run.finish(
                Phase::Aborted(AbortReason::PostVerifyFailed),
                recovery,
                zero_counts(),
                failure.errors,
                Some(backup.id),
                Some(message),
            ));
        }

        info!(run_id = %run.run_id, backup_id = %backup.id, "migration committed");
        Ok(run.finish(
            Phase::Committed,
            Recovery::None,
            counts,
            Vec::new(),
            Some(backup.id),
            None,
        ))
    }

    /// Explicit restore, serialized with migrations.
    pub fn restore(&self, backup_id: &str) -> Result<Counts, MigrationError> {
        let mut store = self.acquire()?;
        self.audit.log("restore started", json!({ "backupId": backup_id }));
        match self.backups.restore(&mut *store, backup_id) {
            Ok(counts) => {
                self.audit.log(
                    "restore finished",
                    json!({ "backupId": backup_id, "success": true, "counts": counts }),
                );
                Ok(counts)
            }
            Err(e) => {
                self.audit.log(
                    "restore finished",
                    json!({
                        "backupId": backup_id,
                        "success": false,
                        "integrityFailure": e.is_integrity(),
                        "error": e.to_string(),
                    }),
                );
                Err(e.into())
            }
        }
    }

    pub fn list_backups(&self) -> Result<Vec<String>, MigrationError> {
        let _store = self.acquire()?;
        Ok(self.backups.list_backups()?)
    }
}

fn apply<S: Store + ?Sized>(store: &mut S, dataset: &Dataset) -> Result<Counts, ApplyFailure> {
    store.begin().map_err(|error| ApplyFailure {
        error,
        rolled_back: false,
    })?;

    let system = User::system();
    let written = replace_contents(store, dataset, Some(&system)).and_then(|counts| {
        store.commit()?;
        Ok(counts)
    });
    match written {
        Ok(counts) => Ok(counts),
        Err(error) => {
            if let Err(rb) = store.rollback() {
                warn!(error = %rb, "explicit rollback failed; store discards the open transaction");
            }
            Err(ApplyFailure {
                error,
                rolled_back: true,
            })
        }
    }
}

/// Re-check the committed state: references must resolve, the system user
/// must exist, and row counts must match what was written.
fn post_verify<S: Store + ?Sized>(store: &S, written: &Counts) -> Result<(), VerifyFailure> {
    let committed = store.read_all().map_err(|e| VerifyFailure {
        message: format!("could not read committed state: {}", e),
        errors: Vec::new(),
    })?;

    let errors = check_references(&committed);
    if !errors.is_empty() {
        return Err(VerifyFailure {
            message: format!("{} dangling reference(s) in committed state", errors.len()),
            errors,
        });
    }

    if !committed.users.iter().any(|u| u.id == SYSTEM_USER_ID) {
        return Err(VerifyFailure {
            message: "system user missing after commit".to_string(),
            errors: Vec::new(),
        });
    }

    let found = committed.counts();
    let mut mismatches = Vec::new();
    for kind in EntityKind::ALL {
        let mut expected = written.get(&kind).copied().unwrap_or(0);
        if kind == EntityKind::User {
            expected += 1;
        }
        let actual = found.get(&kind).copied().unwrap_or(0);
        if expected != actual {
            mismatches.push(format!("{}: wrote {}, found {}", kind, expected, actual));
        }
    }
    if !mismatches.is_empty() {
        return Err(VerifyFailure {
            message: format!("row counts changed after commit ({})", mismatches.join("; ")),
            errors: Vec::new(),
        });
    }
    Ok(())
}
