use super::{backup_err, migration_err};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::workspace::WorkspaceEngine;
use serde_json::json;

fn engine(state: &AppState) -> Result<&WorkspaceEngine, HandlerErr> {
    state
        .engine
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn backup_id_param(req: &Request) -> Result<String, HandlerErr> {
    match req.params.get("backupId").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(HandlerErr::new("bad_params", "missing params.backupId")),
    }
}

fn handle_list(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let engine = engine(state)?;
    let ids = engine.list_backups().map_err(migration_err)?;
    Ok(json!({ "backups": ids }))
}

fn handle_verify(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let engine = engine(state)?;
    let id = backup_id_param(req)?;
    let snapshot = engine.backups().verify_backup(&id).map_err(backup_err)?;
    Ok(json!({ "backupId": id, "valid": true, "counts": snapshot.counts() }))
}

fn handle_restore(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let engine = engine(state)?;
    let id = backup_id_param(req)?;
    let counts = engine.restore(&id).map_err(migration_err)?;
    Ok(json!({ "backupId": id, "counts": counts }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backups.list" => handle_list(state, req),
        "backups.verify" => handle_verify(state, req),
        "backups.restore" => handle_restore(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
