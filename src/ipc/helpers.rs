use crate::ipc::error::{ok, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request, Session};
use crate::roles::Role;
use crate::validation::FieldError;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};

/// Renders a handler outcome as a protocol response.
pub fn respond(req: &Request, result: HandlerResult) -> JsonValue {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => {
            log::debug!("{} failed: {} ({})", req.method, e.code, e.message);
            e.response(&req.id)
        }
    }
}

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn require_session(state: &AppState) -> Result<&Session, HandlerErr> {
    state
        .session
        .as_ref()
        .ok_or_else(|| HandlerErr::new("not_signed_in", "sign in first"))
}

pub fn require_role<'a>(
    state: &'a AppState,
    allowed: &[Role],
) -> Result<&'a Session, HandlerErr> {
    let session = require_session(state)?;
    if allowed.contains(&session.role) {
        Ok(session)
    } else {
        Err(HandlerErr::new(
            "forbidden",
            format!("{} may not perform this action", session.role.key()),
        ))
    }
}

pub fn require_admin(state: &AppState) -> Result<&Session, HandlerErr> {
    require_role(state, &[Role::Admin])
}

pub fn required_str(req: &Request, key: &str) -> Result<String, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn opt_str(obj: &JsonValue, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Form fields may arrive as text or as numbers; both are read as text.
pub fn field_text(v: Option<&JsonValue>) -> Option<String> {
    match v {
        Some(JsonValue::String(s)) => Some(s.clone()),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

pub fn patch_obj(req: &Request) -> Result<&serde_json::Map<String, JsonValue>, HandlerErr> {
    req.params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("missing patch"))
}

pub fn parse_id_list(v: Option<&JsonValue>, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(raw) = v else {
        return Ok(Vec::new());
    };
    if raw.is_null() {
        return Ok(Vec::new());
    }
    let arr = raw
        .as_array()
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be array of strings", key)))?;
    let mut out: Vec<String> = Vec::with_capacity(arr.len());
    for item in arr {
        let s = item
            .as_str()
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be array of strings", key)))?
            .trim()
            .to_string();
        if !s.is_empty() && !out.contains(&s) {
            out.push(s);
        }
    }
    Ok(out)
}

pub fn validation_failed(errors: Vec<FieldError>) -> HandlerErr {
    let message = errors
        .first()
        .map(|e| e.message.clone())
        .unwrap_or_else(|| "invalid input".to_string());
    HandlerErr::new("validation_failed", message).with_details(json!({ "errors": errors }))
}

pub fn row_exists(conn: &Connection, table: &'static str, id: &str) -> Result<bool, HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ? LIMIT 1", table);
    let found: Option<i64> = conn.query_row(&sql, [id], |r| r.get(0)).optional()?;
    Ok(found.is_some())
}

pub fn ensure_exists(
    conn: &Connection,
    table: &'static str,
    id: &str,
    what: &str,
) -> Result<(), HandlerErr> {
    if row_exists(conn, table, id)? {
        Ok(())
    } else {
        Err(HandlerErr::not_found(what))
    }
}

pub fn count_where(conn: &Connection, sql: &str, id: &str) -> Result<i64, HandlerErr> {
    Ok(conn.query_row(sql, [id], |r| r.get(0))?)
}

pub fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Maps a SQLite UNIQUE violation to `duplicate`, anything else to `code`.
pub fn write_err(e: rusqlite::Error, code: &'static str, table: &str) -> HandlerErr {
    let unique = matches!(
        &e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    );
    if unique {
        HandlerErr::new("duplicate", e.to_string()).with_details(json!({ "table": table }))
    } else {
        HandlerErr::new(code, e.to_string()).with_details(json!({ "table": table }))
    }
}
