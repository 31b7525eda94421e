use crate::config::EngineConfig;
use crate::workspace::{open_workspace, WorkspaceEngine};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: EngineConfig,
    pub workspace: Option<PathBuf>,
    pub engine: Option<WorkspaceEngine>,
}

impl AppState {
    pub fn new(config: EngineConfig) -> Self {
        AppState {
            config,
            workspace: None,
            engine: None,
        }
    }

    /// Open the workspace and make it current.
    pub fn select_workspace(&mut self, path: &Path) -> anyhow::Result<()> {
        let engine = open_workspace(path, &self.config)?;
        self.workspace = Some(path.to_path_buf());
        self.engine = Some(engine);
        Ok(())
    }
}
