pub mod audit;
pub mod backup;
pub mod checksum;
pub mod config;
pub mod ipc;
pub mod migrate;
pub mod model;
pub mod store;
pub mod validate;
pub mod workspace;

pub use migrate::{AbortReason, MigrationError, MigrationExecutor, MigrationResult, Phase, Recovery};
pub use model::Dataset;
pub use workspace::{open_workspace, WorkspaceEngine};
