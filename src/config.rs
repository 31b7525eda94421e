//! Runtime configuration from environment variables.

use std::path::{Path, PathBuf};

pub const ENV_WORKSPACE: &str = "ROSTERD_WORKSPACE";
pub const ENV_BACKUP_DIR: &str = "ROSTERD_BACKUP_DIR";
pub const ENV_AUDIT_LOG: &str = "ROSTERD_AUDIT_LOG";
pub const ENV_LOG: &str = "RUST_LOG";

const BACKUP_DIR_NAME: &str = "backups";
const AUDIT_LOG_NAME: &str = "audit.jsonl";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuditLogSetting {
    /// `<workspace>/audit.jsonl`
    #[default]
    Default,
    Disabled,
    Path(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineConfig {
    /// Workspace opened at startup, if any.
    pub workspace: Option<PathBuf>,
    /// Overrides `<workspace>/backups`.
    pub backup_dir: Option<PathBuf>,
    pub audit_log: AuditLogSetting,
    pub log_filter: Option<String>,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Empty values are treated as unset, except `ROSTERD_AUDIT_LOG` where
    /// an empty value disables the file log.
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| get(name).filter(|v| !v.trim().is_empty());

        let audit_log = match get(ENV_AUDIT_LOG) {
            None => AuditLogSetting::Default,
            Some(v) if v.trim().is_empty() => AuditLogSetting::Disabled,
            Some(v) => AuditLogSetting::Path(PathBuf::from(v)),
        };

        EngineConfig {
            workspace: non_empty(ENV_WORKSPACE).map(PathBuf::from),
            backup_dir: non_empty(ENV_BACKUP_DIR).map(PathBuf::from),
            audit_log,
            log_filter: non_empty(ENV_LOG),
        }
    }

    pub fn backup_dir_for(&self, workspace: &Path) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| workspace.join(BACKUP_DIR_NAME))
    }

    pub fn audit_log_for(&self, workspace: &Path) -> Option<PathBuf> {
        match &self.audit_log {
            AuditLogSetting::Default => Some(workspace.join(AUDIT_LOG_NAME)),
            AuditLogSetting::Disabled => None,
            AuditLogSetting::Path(p) => Some(p.clone()),
        }
    }
}
