pub mod backups;
pub mod core;
pub mod migration;

use crate::ipc::error::HandlerErr;
use crate::migrate::MigrationError;
use crate::backup::BackupError;
use serde_json::json;

pub(crate) fn migration_err(e: MigrationError) -> HandlerErr {
    match e {
        MigrationError::Busy => HandlerErr::new("busy", e.to_string()),
        MigrationError::Backup(b) => backup_err(b),
        MigrationError::Store(s) => HandlerErr::new("store_failed", s.to_string()),
    }
}

pub(crate) fn backup_err(e: BackupError) -> HandlerErr {
    match &e {
        BackupError::Integrity {
            id,
            expected,
            actual,
        } => HandlerErr::new("backup_integrity_failed", e.to_string()).with_details(json!({
            "backupId": id,
            "expected": expected,
            "actual": actual,
        })),
        BackupError::Corrupt { id, message } => {
            HandlerErr::new("backup_integrity_failed", e.to_string()).with_details(json!({
                "backupId": id,
                "reason": message,
            }))
        }
        BackupError::NotFound(id) => HandlerErr::new("not_found", e.to_string())
            .with_details(json!({ "backupId": id })),
        BackupError::InvalidId(_) => HandlerErr::new("bad_params", e.to_string()),
        _ => HandlerErr::new("backup_failed", e.to_string()),
    }
}
