use crate::backup;
use crate::ipc::error::{HandlerErr, HandlerResult};
use crate::ipc::handlers::core::open_workspace;
use crate::ipc::helpers::{db_conn, require_admin, required_str, respond};
use crate::ipc::types::{AppState, Request};
use crate::roles::Role;
use rusqlite::OptionalExtension;
use serde_json::json;
use std::path::PathBuf;

fn current_workspace(state: &AppState) -> Result<PathBuf, HandlerErr> {
    state
        .workspace
        .clone()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn handle_backup_export(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let admin = require_admin(state)?;
    let out_path = required_str(req, "outPath")?;
    let workspace = current_workspace(state)?;

    let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");

    let summary = backup::export_workspace_bundle(&workspace, &PathBuf::from(&out_path))
        .map_err(|e| {
            log::error!("backup export to {} failed: {e:?}", out_path);
            HandlerErr::new("backup_failed", format!("{e:#}"))
                .with_details(json!({ "path": out_path }))
        })?;
    log::info!("{} exported workspace to {}", admin.email, out_path);
    Ok(json!({
        "path": out_path,
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "dbSha256": summary.db_sha256,
    }))
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> HandlerResult {
    db_conn(state)?;
    let previous = require_admin(state)?.clone();
    let in_path = required_str(req, "inPath")?;
    let workspace = current_workspace(state)?;

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(HandlerErr::not_found("backup file").with_details(json!({ "path": in_path })));
    }

    // The connection must be closed before its file is replaced.
    state.db = None;
    let imported = backup::import_workspace_bundle(&src, &workspace);
    if let Err(e) = open_workspace(state, &workspace) {
        log::error!("reopening {} failed: {e:?}", workspace.to_string_lossy());
        state.workspace = None;
        state.session = None;
        return Err(HandlerErr::new("db_open_failed", format!("{e:#}")));
    }

    // Keep the admin signed in only if the data now on disk still knows them as one.
    let conn = db_conn(state)?;
    let still_admin: Option<String> = conn
        .query_row(
            "SELECT role FROM users WHERE id = ?",
            [&previous.user_id],
            |r| r.get(0),
        )
        .optional()?;
    if still_admin.as_deref().and_then(Role::parse) == Some(Role::Admin) {
        state.session = Some(previous.clone());
    }

    let summary = imported.map_err(|e| {
        log::error!("backup import from {} failed: {e:?}", in_path);
        HandlerErr::new("backup_failed", format!("{e:#}"))
            .with_details(json!({ "path": in_path }))
    })?;
    log::info!(
        "{} restored workspace from {} ({})",
        previous.email,
        in_path,
        summary.bundle_format_detected
    );
    Ok(json!({
        "bundleFormatDetected": summary.bundle_format_detected,
        "signedIn": state.session.is_some(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.export" => handle_backup_export(state, req),
        "backup.import" => handle_backup_import(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
