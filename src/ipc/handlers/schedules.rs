use crate::ipc::error::{HandlerErr, HandlerResult};
use crate::ipc::handlers::setup::{load_default_recurrence, load_school_hours};
use crate::ipc::helpers::{
    db_conn, ensure_exists, now_ts, opt_str, require_admin, require_role, require_session,
    required_str, respond, validation_failed, write_err,
};
use crate::ipc::types::{AppState, Request};
use crate::roles::Role;
use crate::schedule::{
    find_conflicts, parse_date, parse_time, Booking, Conflict, ConflictKind, Recurrence,
    ScheduleDraft, SchoolDay, DATE_FORMAT, TIME_FORMAT,
};
use crate::validation::FieldError;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Transaction};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use uuid::Uuid;

/// A stored booking with the display names of everything it references.
pub struct ScheduleRow {
    pub booking: Booking,
    pub subject_name: String,
    pub teacher_name: String,
    pub room_name: String,
    pub class_label: String,
}

struct RawRow {
    id: String,
    subject_id: String,
    teacher_id: String,
    room_id: String,
    class_id: String,
    start_time: String,
    end_time: String,
    start_date: String,
    end_date: String,
    recurrence: String,
    subject_name: String,
    teacher_name: String,
    room_name: String,
    class_label: String,
}

fn load_days(conn: &Connection) -> Result<HashMap<String, Vec<SchoolDay>>, HandlerErr> {
    let mut stmt = conn.prepare("SELECT schedule_id, day FROM schedule_days")?;
    let pairs = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out: HashMap<String, Vec<SchoolDay>> = HashMap::new();
    for (schedule_id, raw) in pairs {
        match SchoolDay::parse(&raw) {
            Some(day) => out.entry(schedule_id).or_default().push(day),
            None => log::warn!("schedule {} has unknown weekday {}", schedule_id, raw),
        }
    }
    for days in out.values_mut() {
        days.sort();
        days.dedup();
    }
    Ok(out)
}

fn stored_booking(raw: &RawRow, days: Vec<SchoolDay>) -> Result<Booking, HandlerErr> {
    let corrupt = |field: &str| {
        HandlerErr::new(
            "db_query_failed",
            format!("schedule {} has invalid {}", raw.id, field),
        )
    };
    Ok(Booking {
        id: raw.id.clone(),
        subject_id: raw.subject_id.clone(),
        teacher_id: raw.teacher_id.clone(),
        room_id: raw.room_id.clone(),
        class_id: raw.class_id.clone(),
        days,
        start_time: parse_time(&raw.start_time).ok_or_else(|| corrupt("start_time"))?,
        end_time: parse_time(&raw.end_time).ok_or_else(|| corrupt("end_time"))?,
        start_date: parse_date(&raw.start_date).ok_or_else(|| corrupt("start_date"))?,
        end_date: parse_date(&raw.end_date).ok_or_else(|| corrupt("end_date"))?,
        recurrence: Recurrence::parse(&raw.recurrence).unwrap_or_default(),
    })
}

/// All stored schedules ordered by start date then start time.
pub fn load_schedule_rows(conn: &Connection) -> Result<Vec<ScheduleRow>, HandlerErr> {
    let mut days = load_days(conn)?;
    let mut stmt = conn.prepare(
        "SELECT s.id, s.subject_id, s.teacher_id, s.room_id, s.class_id,
                s.start_time, s.end_time, s.start_date, s.end_date, s.recurrence,
                COALESCE(sub.name, ''),
                COALESCE(u.name, ''),
                COALESCE(r.name, ''),
                COALESCE(c.year || ' ' || c.grouping_name, '')
         FROM schedules s
         LEFT JOIN subjects sub ON sub.id = s.subject_id
         LEFT JOIN users u ON u.id = s.teacher_id
         LEFT JOIN rooms r ON r.id = s.room_id
         LEFT JOIN classes c ON c.id = s.class_id
         ORDER BY s.start_date, s.start_time",
    )?;
    let raws = stmt
        .query_map([], |r| {
            Ok(RawRow {
                id: r.get(0)?,
                subject_id: r.get(1)?,
                teacher_id: r.get(2)?,
                room_id: r.get(3)?,
                class_id: r.get(4)?,
                start_time: r.get(5)?,
                end_time: r.get(6)?,
                start_date: r.get(7)?,
                end_date: r.get(8)?,
                recurrence: r.get(9)?,
                subject_name: r.get(10)?,
                teacher_name: r.get(11)?,
                room_name: r.get(12)?,
                class_label: r.get(13)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raws.into_iter()
        .map(|raw| {
            let booking = stored_booking(&raw, days.remove(&raw.id).unwrap_or_default())?;
            Ok(ScheduleRow {
                booking,
                subject_name: raw.subject_name,
                teacher_name: raw.teacher_name,
                room_name: raw.room_name,
                class_label: raw.class_label,
            })
        })
        .collect()
}

pub fn schedule_json(row: &ScheduleRow) -> JsonValue {
    let b = &row.booking;
    json!({
        "id": b.id,
        "subjectId": b.subject_id,
        "subjectName": row.subject_name,
        "teacherId": b.teacher_id,
        "teacherName": row.teacher_name,
        "roomId": b.room_id,
        "roomName": row.room_name,
        "classId": b.class_id,
        "className": row.class_label,
        "days": b.days,
        "startTime": b.start_time.format(TIME_FORMAT).to_string(),
        "endTime": b.end_time.format(TIME_FORMAT).to_string(),
        "startDate": b.start_date.format(DATE_FORMAT).to_string(),
        "endDate": b.end_date.format(DATE_FORMAT).to_string(),
        "recurrence": b.recurrence,
        "timeRange": b.time_range(),
    })
}

/// Sessions taking place on `date`, earliest first.
pub fn sessions_on(rows: &[ScheduleRow], date: NaiveDate) -> Vec<&ScheduleRow> {
    let mut out: Vec<&ScheduleRow> = rows.iter().filter(|r| r.booking.occurs_on(date)).collect();
    out.sort_by_key(|r| (r.booking.start_time, r.booking.end_time));
    out
}

pub fn student_class_id(conn: &Connection, user_id: &str) -> Result<Option<String>, HandlerErr> {
    let class_id = conn
        .query_row(
            "SELECT class_id FROM users WHERE id = ?",
            [user_id],
            |r| r.get::<_, Option<String>>(0),
        )
        .optional()?
        .flatten();
    Ok(class_id)
}

fn parse_draft(req: &Request) -> Result<ScheduleDraft, HandlerErr> {
    let raw = req
        .params
        .get("draft")
        .filter(|v| v.is_object())
        .cloned()
        .ok_or_else(|| HandlerErr::bad_params("draft must be an object"))?;
    serde_json::from_value(raw).map_err(|e| HandlerErr::bad_params(format!("invalid draft: {}", e)))
}

fn validate_draft(
    conn: &Connection,
    mut draft: ScheduleDraft,
    id: &str,
) -> Result<Booking, Vec<FieldError>> {
    if draft
        .recurrence
        .as_deref()
        .map_or(true, |r| r.trim().is_empty())
    {
        draft.recurrence = Some(load_default_recurrence(conn).key().to_string());
    }
    draft.validate(id, &load_school_hours(conn))
}

fn reference_errors(conn: &Connection, b: &Booking) -> Result<Vec<FieldError>, HandlerErr> {
    let mut errors = Vec::new();
    let found = |sql: &str, id: &str| -> Result<bool, HandlerErr> {
        let hit: Option<i64> = conn.query_row(sql, [id], |r| r.get(0)).optional()?;
        Ok(hit.is_some())
    };
    if !found("SELECT 1 FROM subjects WHERE id = ?", &b.subject_id)? {
        errors.push(FieldError::new("subjectId", "subject not found"));
    }
    let teacher_role: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [&b.teacher_id], |r| {
            r.get(0)
        })
        .optional()?;
    match teacher_role.as_deref().and_then(Role::parse) {
        Some(Role::Teacher) => {}
        Some(_) => errors.push(FieldError::new("teacherId", "user is not a teacher")),
        None => errors.push(FieldError::new("teacherId", "teacher not found")),
    }
    if !found("SELECT 1 FROM rooms WHERE id = ?", &b.room_id)? {
        errors.push(FieldError::new("roomId", "room not found"));
    }
    if !found("SELECT 1 FROM classes WHERE id = ?", &b.class_id)? {
        errors.push(FieldError::new("classId", "class not found"));
    }
    Ok(errors)
}

fn conflicts_for(conn: &Connection, b: &Booking) -> Result<Vec<Conflict>, HandlerErr> {
    let existing: Vec<Booking> = load_schedule_rows(conn)?
        .into_iter()
        .map(|r| r.booking)
        .collect();
    Ok(find_conflicts(b, &existing))
}

fn conflict_err(conflicts: &[Conflict]) -> HandlerErr {
    let message = conflicts
        .first()
        .map(|c| {
            let who = match c.kind {
                ConflictKind::Teacher => "teacher",
                ConflictKind::Room => "room",
            };
            format!(
                "{} already booked on {} ({})",
                who,
                c.day.key(),
                c.time_range
            )
        })
        .unwrap_or_else(|| "schedule conflict".to_string());
    HandlerErr::new("schedule_conflict", message).with_details(json!({ "conflicts": conflicts }))
}

/// Full write-path check: fields, references, then double bookings.
fn checked_booking(conn: &Connection, draft: ScheduleDraft, id: &str) -> Result<Booking, HandlerErr> {
    let booking = validate_draft(conn, draft, id).map_err(validation_failed)?;
    let missing = reference_errors(conn, &booking)?;
    if !missing.is_empty() {
        return Err(validation_failed(missing));
    }
    let conflicts = conflicts_for(conn, &booking)?;
    if !conflicts.is_empty() {
        log::warn!(
            "rejected booking {} with {} conflict(s)",
            booking.id,
            conflicts.len()
        );
        return Err(conflict_err(&conflicts));
    }
    Ok(booking)
}

fn insert_days(tx: &Transaction<'_>, b: &Booking) -> Result<(), HandlerErr> {
    for day in &b.days {
        tx.execute(
            "INSERT INTO schedule_days(schedule_id, day) VALUES(?, ?)",
            (&b.id, day.key()),
        )
        .map_err(|e| write_err(e, "db_insert_failed", "schedule_days"))?;
    }
    Ok(())
}

fn begin(conn: &Connection) -> Result<Transaction<'_>, HandlerErr> {
    conn.unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))
}

fn commit(tx: Transaction<'_>) -> Result<(), HandlerErr> {
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))
}

fn load_one(conn: &Connection, schedule_id: &str) -> Result<JsonValue, HandlerErr> {
    load_schedule_rows(conn)?
        .iter()
        .find(|r| r.booking.id == schedule_id)
        .map(schedule_json)
        .ok_or_else(|| HandlerErr::not_found("schedule"))
}

fn handle_schedules_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let admin = require_admin(state)?;
    let draft = parse_draft(req)?;
    let id = Uuid::new_v4().to_string();
    let b = checked_booking(conn, draft, &id)?;

    let now = now_ts();
    let tx = begin(conn)?;
    tx.execute(
        "INSERT INTO schedules(
            id, subject_id, teacher_id, room_id, class_id,
            start_time, end_time, start_date, end_date, recurrence,
            created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            b.id,
            b.subject_id,
            b.teacher_id,
            b.room_id,
            b.class_id,
            b.start_time.format(TIME_FORMAT).to_string(),
            b.end_time.format(TIME_FORMAT).to_string(),
            b.start_date.format(DATE_FORMAT).to_string(),
            b.end_date.format(DATE_FORMAT).to_string(),
            b.recurrence.key(),
            now,
            now
        ],
    )
    .map_err(|e| write_err(e, "db_insert_failed", "schedules"))?;
    insert_days(&tx, &b)?;
    commit(tx)?;

    log::info!("{} booked schedule {} ({})", admin.email, b.id, b.time_range());
    Ok(json!({ "scheduleId": b.id, "schedule": load_one(conn, &b.id)? }))
}

fn handle_schedules_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let admin = require_admin(state)?;
    let schedule_id = required_str(req, "scheduleId")?;
    ensure_exists(conn, "schedules", &schedule_id, "schedule")?;
    let draft = parse_draft(req)?;
    let b = checked_booking(conn, draft, &schedule_id)?;

    let tx = begin(conn)?;
    tx.execute(
        "UPDATE schedules SET
            subject_id = ?, teacher_id = ?, room_id = ?, class_id = ?,
            start_time = ?, end_time = ?, start_date = ?, end_date = ?,
            recurrence = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            b.subject_id,
            b.teacher_id,
            b.room_id,
            b.class_id,
            b.start_time.format(TIME_FORMAT).to_string(),
            b.end_time.format(TIME_FORMAT).to_string(),
            b.start_date.format(DATE_FORMAT).to_string(),
            b.end_date.format(DATE_FORMAT).to_string(),
            b.recurrence.key(),
            now_ts(),
            b.id
        ],
    )
    .map_err(|e| write_err(e, "db_update_failed", "schedules"))?;
    tx.execute(
        "DELETE FROM schedule_days WHERE schedule_id = ?",
        [&b.id],
    )
    .map_err(|e| write_err(e, "db_delete_failed", "schedule_days"))?;
    insert_days(&tx, &b)?;
    commit(tx)?;

    log::info!("{} updated schedule {}", admin.email, b.id);
    Ok(json!({ "schedule": load_one(conn, &b.id)? }))
}

fn handle_schedules_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let admin = require_admin(state)?;
    let schedule_id = required_str(req, "scheduleId")?;
    ensure_exists(conn, "schedules", &schedule_id, "schedule")?;

    let tx = begin(conn)?;
    tx.execute(
        "DELETE FROM schedule_days WHERE schedule_id = ?",
        [&schedule_id],
    )
    .map_err(|e| write_err(e, "db_delete_failed", "schedule_days"))?;
    tx.execute("DELETE FROM schedules WHERE id = ?", [&schedule_id])
        .map_err(|e| write_err(e, "db_delete_failed", "schedules"))?;
    commit(tx)?;

    log::info!("{} deleted schedule {}", admin.email, schedule_id);
    Ok(json!({ "ok": true }))
}

fn handle_schedules_validate(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    require_admin(state)?;
    let draft = parse_draft(req)?;
    let id = opt_str(&req.params, "scheduleId").unwrap_or_default();

    let (errors, conflicts) = match validate_draft(conn, draft, &id) {
        Err(errors) => (errors, Vec::new()),
        Ok(b) => {
            let errors = reference_errors(conn, &b)?;
            (errors, conflicts_for(conn, &b)?)
        }
    };
    Ok(json!({
        "valid": errors.is_empty() && conflicts.is_empty(),
        "errors": errors,
        "conflicts": conflicts,
    }))
}

#[derive(Clone, Copy)]
enum GroupBy {
    Teacher,
    Room,
    Class,
    Subject,
}

impl GroupBy {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "teacher" => Some(Self::Teacher),
            "room" => Some(Self::Room),
            "class" => Some(Self::Class),
            "subject" => Some(Self::Subject),
            _ => None,
        }
    }

    fn key_label(self, row: &ScheduleRow) -> (String, String) {
        let b = &row.booking;
        match self {
            Self::Teacher => (b.teacher_id.clone(), row.teacher_name.clone()),
            Self::Room => (b.room_id.clone(), row.room_name.clone()),
            Self::Class => (b.class_id.clone(), row.class_label.clone()),
            Self::Subject => (b.subject_id.clone(), row.subject_name.clone()),
        }
    }
}

fn handle_schedules_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    require_session(state)?;
    let group_by = match opt_str(&req.params, "groupBy") {
        None => None,
        Some(raw) => Some(
            GroupBy::parse(&raw)
                .ok_or_else(|| HandlerErr::bad_params(format!("unknown groupBy: {}", raw)))?,
        ),
    };
    let teacher_id = opt_str(&req.params, "teacherId");
    let room_id = opt_str(&req.params, "roomId");
    let class_id = opt_str(&req.params, "classId");
    let subject_id = opt_str(&req.params, "subjectId");
    let matches = |want: &Option<String>, have: &str| want.as_deref().map_or(true, |w| w == have);

    let rows: Vec<ScheduleRow> = load_schedule_rows(conn)?
        .into_iter()
        .filter(|r| {
            let b = &r.booking;
            matches(&teacher_id, &b.teacher_id)
                && matches(&room_id, &b.room_id)
                && matches(&class_id, &b.class_id)
                && matches(&subject_id, &b.subject_id)
        })
        .collect();

    let Some(group_by) = group_by else {
        let schedules: Vec<JsonValue> = rows.iter().map(schedule_json).collect();
        return Ok(json!({ "schedules": schedules }));
    };

    let mut groups: Vec<(String, String, Vec<JsonValue>)> = Vec::new();
    for row in &rows {
        let (key, label) = group_by.key_label(row);
        match groups.iter_mut().find(|(k, _, _)| *k == key) {
            Some((_, _, items)) => items.push(schedule_json(row)),
            None => groups.push((key, label, vec![schedule_json(row)])),
        }
    }
    groups.sort_by(|a, b| a.1.to_lowercase().cmp(&b.1.to_lowercase()));
    let groups: Vec<JsonValue> = groups
        .into_iter()
        .map(|(key, label, schedules)| json!({ "key": key, "label": label, "schedules": schedules }))
        .collect();
    Ok(json!({ "groups": groups }))
}

fn handle_schedules_mine(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_role(state, &[Role::Teacher, Role::Student])?;
    let date = match opt_str(&req.params, "date") {
        Some(raw) => parse_date(&raw)
            .ok_or_else(|| HandlerErr::bad_params("date must be YYYY-MM-DD"))?,
        None => chrono::Local::now().date_naive(),
    };

    let rows = load_schedule_rows(conn)?;
    let own: Vec<ScheduleRow> = match session.role {
        Role::Teacher => rows
            .into_iter()
            .filter(|r| r.booking.teacher_id == session.user_id)
            .collect(),
        _ => match student_class_id(conn, &session.user_id)? {
            Some(class_id) => rows
                .into_iter()
                .filter(|r| r.booking.class_id == class_id)
                .collect(),
            None => Vec::new(),
        },
    };
    let schedules: Vec<JsonValue> = sessions_on(&own, date)
        .into_iter()
        .map(schedule_json)
        .collect();
    Ok(json!({
        "date": date.format(DATE_FORMAT).to_string(),
        "schedules": schedules,
    }))
}

fn handle_time_slots(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let hours = load_school_hours(conn);
    Ok(json!({
        "slotMinutes": hours.slot_minutes,
        "slots": hours.time_slots(),
        "days": SchoolDay::ALL,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "schedules.list" => handle_schedules_list(state, req),
        "schedules.validate" => handle_schedules_validate(state, req),
        "schedules.create" => handle_schedules_create(state, req),
        "schedules.update" => handle_schedules_update(state, req),
        "schedules.delete" => handle_schedules_delete(state, req),
        "schedules.mine" => handle_schedules_mine(state, req),
        "schedules.timeSlots" => handle_time_slots(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
