use crate::ipc::error::{HandlerErr, HandlerResult};
use crate::ipc::handlers::schedules::{
    load_schedule_rows, schedule_json, sessions_on, student_class_id, ScheduleRow,
};
use crate::ipc::helpers::{db_conn, opt_str, require_session, respond};
use crate::ipc::types::{AppState, Request, Session};
use crate::roles::Role;
use crate::schedule::{format_time_left, session_status, DATE_FORMAT, TIME_FORMAT};
use chrono::{Datelike, Duration, NaiveDateTime};
use rusqlite::Connection;
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeSet;

fn parse_now(req: &Request) -> Result<NaiveDateTime, HandlerErr> {
    let Some(raw) = opt_str(&req.params, "now") else {
        return Ok(chrono::Local::now().naive_local());
    };
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|_| HandlerErr::bad_params("now must be YYYY-MM-DDTHH:MM"))
}

fn today_json(rows: &[&ScheduleRow], now: NaiveDateTime) -> Vec<JsonValue> {
    rows.iter()
        .map(|row| {
            let mut item = schedule_json(row);
            item["status"] = json!(session_status(
                row.booking.start_time,
                row.booking.end_time,
                now.time()
            ));
            item
        })
        .collect()
}

fn count(conn: &Connection, sql: &str) -> Result<i64, HandlerErr> {
    Ok(conn.query_row(sql, [], |r| r.get(0))?)
}

fn admin_summary(conn: &Connection, now: NaiveDateTime) -> Result<JsonValue, HandlerErr> {
    let mut by_role = serde_json::Map::new();
    let mut total = 0;
    for role in Role::ALL {
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE role = ?",
            [role.key()],
            |r| r.get(0),
        )?;
        total += n;
        by_role.insert(role.key().to_string(), json!(n));
    }
    by_role.insert("total".to_string(), json!(total));

    let rows = load_schedule_rows(conn)?;
    let today = sessions_on(&rows, now.date());
    Ok(json!({
        "users": by_role,
        "rooms": count(conn, "SELECT COUNT(*) FROM rooms")?,
        "resources": count(conn, "SELECT COUNT(*) FROM resources")?,
        "subjects": count(conn, "SELECT COUNT(*) FROM subjects")?,
        "classes": count(conn, "SELECT COUNT(*) FROM classes")?,
        "schedules": rows.len(),
        "today": today_json(&today, now),
    }))
}

fn teacher_summary(
    conn: &Connection,
    session: &Session,
    now: NaiveDateTime,
) -> Result<JsonValue, HandlerErr> {
    let own: Vec<ScheduleRow> = load_schedule_rows(conn)?
        .into_iter()
        .filter(|r| r.booking.teacher_id == session.user_id)
        .collect();

    // Monday through Saturday of the current week.
    let date = now.date();
    let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
    let weekly_minutes: i64 = (0..6)
        .map(|offset| monday + Duration::days(offset))
        .flat_map(|day| own.iter().filter(move |r| r.booking.occurs_on(day)))
        .map(|r| r.booking.minutes_per_session())
        .sum();

    let class_ids: BTreeSet<&str> = own.iter().map(|r| r.booking.class_id.as_str()).collect();
    let mut student_count = 0;
    for class_id in &class_ids {
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE class_id = ? AND role = 'student'",
            [*class_id],
            |r| r.get(0),
        )?;
        student_count += n;
    }

    let today = sessions_on(&own, date);
    Ok(json!({
        "today": today_json(&today, now),
        "weeklyMinutes": weekly_minutes,
        "weeklyHours": weekly_minutes as f64 / 60.0,
        "classCount": class_ids.len(),
        "studentCount": student_count,
    }))
}

fn student_summary(
    conn: &Connection,
    session: &Session,
    now: NaiveDateTime,
) -> Result<JsonValue, HandlerErr> {
    let own: Vec<ScheduleRow> = match student_class_id(conn, &session.user_id)? {
        Some(class_id) => load_schedule_rows(conn)?
            .into_iter()
            .filter(|r| r.booking.class_id == class_id)
            .collect(),
        None => Vec::new(),
    };
    let today = sessions_on(&own, now.date());
    let next_class = today
        .iter()
        .find(|r| r.booking.start_time > now.time())
        .map(|r| {
            let minutes_left = (r.booking.start_time - now.time()).num_minutes();
            json!({
                "schedule": schedule_json(r),
                "minutesLeft": minutes_left,
                "timeLeft": format_time_left(minutes_left),
            })
        });
    Ok(json!({
        "today": today_json(&today, now),
        "nextClass": next_class,
    }))
}

fn handle_dashboard_summary(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let now = parse_now(req)?;
    let summary = match session.role {
        Role::Admin => admin_summary(conn, now)?,
        Role::Teacher => teacher_summary(conn, session, now)?,
        Role::Student => student_summary(conn, session, now)?,
    };
    Ok(json!({
        "role": session.role,
        "date": now.date().format(DATE_FORMAT).to_string(),
        "time": now.time().format(TIME_FORMAT).to_string(),
        "summary": summary,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "dashboard.summary" => handle_dashboard_summary(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
