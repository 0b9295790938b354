use crate::ipc::error::{HandlerErr, HandlerResult};
use crate::ipc::helpers::{db_conn, required_str, respond};
use crate::ipc::types::{AppState, Request, Session};
use crate::roles::Role;
use rusqlite::OptionalExtension;
use serde_json::json;

fn session_json(s: &Session) -> serde_json::Value {
    json!({
        "userId": s.user_id,
        "role": s.role,
        "roleLabel": s.role.label(),
        "permission": s.role.permission(),
        "name": s.name,
        "email": s.email,
    })
}

fn handle_sign_in(state: &mut AppState, req: &Request) -> HandlerResult {
    let email = required_str(req, "email")?.to_lowercase();
    let row: Option<(String, String, String, String)> = {
        let conn = db_conn(state)?;
        conn.query_row(
            "SELECT id, role, name, email FROM users WHERE email = ? COLLATE NOCASE",
            [&email],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?
    };
    let Some((user_id, role_raw, name, email)) = row else {
        log::warn!("sign-in rejected for unknown email {}", email);
        return Err(HandlerErr::not_found("user"));
    };
    let role = Role::parse(&role_raw).ok_or_else(|| {
        HandlerErr::new("db_query_failed", format!("user has unknown role {}", role_raw))
    })?;

    let session = Session {
        user_id,
        role,
        name,
        email,
    };
    log::info!("signed in {} as {}", session.email, role.key());
    let out = session_json(&session);
    state.session = Some(session);
    Ok(json!({ "user": out }))
}

fn handle_sign_out(state: &mut AppState, _req: &Request) -> HandlerResult {
    if let Some(s) = state.session.take() {
        log::info!("signed out {}", s.email);
    }
    Ok(json!({ "ok": true }))
}

fn handle_current(state: &mut AppState, _req: &Request) -> HandlerResult {
    Ok(json!({ "user": state.session.as_ref().map(session_json) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "session.signIn" => handle_sign_in(state, req),
        "session.signOut" => handle_sign_out(state, req),
        "session.current" => handle_current(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
