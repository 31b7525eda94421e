use super::migration_err;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::Dataset;
use crate::validate::validate;
use anyhow::Context;
use serde_json::json;
use std::path::Path;
use tracing::info;

fn load_dataset_file(path: &Path) -> anyhow::Result<Dataset> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read {}", path.to_string_lossy()))?;
    Dataset::from_json(&bytes).with_context(|| format!("parse {}", path.to_string_lossy()))
}

/// `params.dataset` (inline object) or `params.datasetPath` (JSON file).
fn dataset_param(req: &Request) -> Result<Dataset, HandlerErr> {
    if let Some(v) = req.params.get("dataset") {
        return serde_json::from_value(v.clone())
            .map_err(|e| HandlerErr::new("bad_params", format!("invalid dataset: {}", e)));
    }
    if let Some(p) = req.params.get("datasetPath").and_then(|v| v.as_str()) {
        return load_dataset_file(Path::new(p)).map_err(|e| {
            HandlerErr::new("bad_params", format!("{e:#}")).with_details(json!({ "path": p }))
        });
    }
    Err(HandlerErr::new(
        "bad_params",
        "missing params.dataset or params.datasetPath",
    ))
}

fn handle_validate(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let dataset = match dataset_param(req) {
        Ok(d) => d,
        Err(e) => return e.response(&req.id),
    };
    let errors = validate(&dataset);
    ok(
        &req.id,
        json!({
            "valid": errors.is_empty(),
            "errors": errors,
            "counts": dataset.counts(),
        }),
    )
}

fn handle_run(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(engine) = state.engine.as_ref() else {
        return HandlerErr::new("no_workspace", "select a workspace first").response(&req.id);
    };
    let dataset = match dataset_param(req) {
        Ok(d) => d,
        Err(e) => return e.response(&req.id),
    };
    match engine.migrate_all_data(&dataset) {
        Ok(result) => {
            info!(run_id = %result.run_id, success = result.success, "migration.run");
            match serde_json::to_value(&result) {
                Ok(v) => ok(&req.id, v),
                Err(e) => HandlerErr::new("internal", e.to_string()).response(&req.id),
            }
        }
        Err(e) => migration_err(e).response(&req.id),
    }
}

fn handle_counts(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(engine) = state.engine.as_ref() else {
        return HandlerErr::new("no_workspace", "select a workspace first").response(&req.id);
    };
    match engine.counts() {
        Ok(counts) => ok(&req.id, json!({ "counts": counts })),
        Err(e) => migration_err(e).response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "migration.validate" => Some(handle_validate(state, req)),
        "migration.run" => Some(handle_run(state, req)),
        "store.counts" => Some(handle_counts(state, req)),
        _ => None,
    }
}
