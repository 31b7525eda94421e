use crate::audit::{AuditLogger, JsonlAuditSink};
use crate::backup::{BackupManager, DirBackupStorage};
use crate::config::EngineConfig;
use crate::migrate::MigrationExecutor;
use crate::store::SqliteStore;
use anyhow::Context;
use std::path::Path;
use tracing::info;

/// The engine as the sidecar runs it: SQLite in the workspace, zip bundles
/// on disk.
pub type WorkspaceEngine = MigrationExecutor<SqliteStore, DirBackupStorage>;

pub fn open_workspace(path: &Path, config: &EngineConfig) -> anyhow::Result<WorkspaceEngine> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("create workspace dir {}", path.to_string_lossy()))?;
    let store = SqliteStore::open(path)
        .with_context(|| format!("open store in {}", path.to_string_lossy()))?;

    let backup_dir = config.backup_dir_for(path);
    let backups = BackupManager::new(DirBackupStorage::new(backup_dir.clone()));

    let mut audit = AuditLogger::tracing();
    if let Some(log_path) = config.audit_log_for(path) {
        let sink = JsonlAuditSink::open(&log_path)
            .with_context(|| format!("open audit log {}", log_path.to_string_lossy()))?;
        audit = audit.with_sink(sink);
    }

    info!(
        workspace = %path.display(),
        backups = %backup_dir.display(),
        "workspace opened"
    );
    Ok(MigrationExecutor::new(store, backups, audit))
}
