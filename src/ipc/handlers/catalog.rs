use crate::ipc::error::{HandlerErr, HandlerResult};
use crate::ipc::helpers::{
    count_where, db_conn, ensure_exists, field_text, now_ts, patch_obj, require_admin,
    required_str, respond, validation_failed, write_err,
};
use crate::ipc::types::{AppState, Request};
use crate::validation::FieldError;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn scheduled_count(conn: &Connection, column: &str, id: &str) -> Result<i64, HandlerErr> {
    let sql = format!("SELECT COUNT(*) FROM schedules WHERE {} = ?", column);
    count_where(conn, &sql, id)
}

fn refuse_if_scheduled(
    conn: &Connection,
    column: &str,
    id: &str,
    what: &str,
) -> Result<(), HandlerErr> {
    let n = scheduled_count(conn, column, id)?;
    if n > 0 {
        return Err(
            HandlerErr::new("in_use", format!("{} still has scheduled classes", what))
                .with_details(json!({ "schedules": n })),
        );
    }
    Ok(())
}

fn required_text(raw: Option<String>, field: &str, label: &str) -> Result<String, FieldError> {
    raw.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| FieldError::new(field, format!("{} is required", label)))
}

// --- resources ---

fn handle_resources_list(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    require_admin(state)?;
    let mut stmt = conn.prepare(
        "SELECT res.id, res.resource_type,
                (SELECT COUNT(*) FROM room_resources rr WHERE rr.resource_id = res.id)
         FROM resources res
         ORDER BY res.resource_type COLLATE NOCASE",
    )?;
    let resources = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "resourceType": r.get::<_, String>(1)?,
                "roomCount": r.get::<_, i64>(2)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "resources": resources }))
}

fn handle_resources_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let admin = require_admin(state)?;
    let resource_type =
        required_text(field_text(req.params.get("resourceType")), "resourceType", "resource type")
            .map_err(|e| validation_failed(vec![e]))?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO resources(id, resource_type, created_at) VALUES(?, ?, ?)",
        (&id, &resource_type, now_ts()),
    )
    .map_err(|e| write_err(e, "db_insert_failed", "resources"))?;
    log::info!("{} created resource {}", admin.email, resource_type);
    Ok(json!({ "resourceId": id, "resourceType": resource_type }))
}

fn handle_resources_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let admin = require_admin(state)?;
    let resource_id = required_str(req, "resourceId")?;
    ensure_exists(conn, "resources", &resource_id, "resource")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let detached = tx
        .execute(
            "DELETE FROM room_resources WHERE resource_id = ?",
            [&resource_id],
        )
        .map_err(|e| write_err(e, "db_delete_failed", "room_resources"))?;
    tx.execute("DELETE FROM resources WHERE id = ?", [&resource_id])
        .map_err(|e| write_err(e, "db_delete_failed", "resources"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    log::info!(
        "{} deleted resource {} ({} room links)",
        admin.email,
        resource_id,
        detached
    );
    Ok(json!({ "ok": true, "roomsDetached": detached }))
}

// --- subjects ---

fn handle_subjects_list(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    require_admin(state)?;
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name,
                (SELECT COUNT(*) FROM schedules sc WHERE sc.subject_id = s.id)
         FROM subjects s
         ORDER BY s.name COLLATE NOCASE",
    )?;
    let subjects = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "scheduleCount": r.get::<_, i64>(2)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "subjects": subjects }))
}

fn subject_name(req: &Request) -> Result<String, HandlerErr> {
    required_text(field_text(req.params.get("name")), "name", "subject name")
        .map_err(|e| validation_failed(vec![e]))
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let admin = require_admin(state)?;
    let name = subject_name(req)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name, created_at) VALUES(?, ?, ?)",
        (&id, &name, now_ts()),
    )
    .map_err(|e| write_err(e, "db_insert_failed", "subjects"))?;
    log::info!("{} created subject {}", admin.email, name);
    Ok(json!({ "subjectId": id, "name": name }))
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    require_admin(state)?;
    let subject_id = required_str(req, "subjectId")?;
    let name = subject_name(req)?;
    ensure_exists(conn, "subjects", &subject_id, "subject")?;
    conn.execute(
        "UPDATE subjects SET name = ? WHERE id = ?",
        (&name, &subject_id),
    )
    .map_err(|e| write_err(e, "db_update_failed", "subjects"))?;
    Ok(json!({ "subjectId": subject_id, "name": name }))
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let admin = require_admin(state)?;
    let subject_id = required_str(req, "subjectId")?;
    ensure_exists(conn, "subjects", &subject_id, "subject")?;
    refuse_if_scheduled(conn, "subject_id", &subject_id, "subject")?;
    conn.execute("DELETE FROM subjects WHERE id = ?", [&subject_id])
        .map_err(|e| write_err(e, "db_delete_failed", "subjects"))?;
    log::info!("{} deleted subject {}", admin.email, subject_id);
    Ok(json!({ "ok": true }))
}

// --- classes ---

struct ClassFields {
    year: String,
    grouping: String,
}

fn validate_class(year: Option<String>, grouping: Option<String>) -> Result<ClassFields, HandlerErr> {
    let mut errors = Vec::new();
    let year = required_text(year, "year", "year").map_err(|e| errors.push(e)).ok();
    let grouping = required_text(grouping, "grouping", "grouping")
        .map_err(|e| errors.push(e))
        .ok();
    match (year, grouping) {
        (Some(year), Some(grouping)) => Ok(ClassFields { year, grouping }),
        _ => Err(validation_failed(errors)),
    }
}

fn check_class_free(
    conn: &Connection,
    fields: &ClassFields,
    exclude_id: Option<&str>,
) -> Result<(), HandlerErr> {
    let taken: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM classes
             WHERE year = ? AND grouping_name = ? COLLATE NOCASE AND id <> ?
             LIMIT 1",
            (&fields.year, &fields.grouping, exclude_id.unwrap_or("")),
            |r| r.get(0),
        )
        .optional()?;
    if taken.is_some() {
        return Err(HandlerErr::new(
            "duplicate",
            format!("class {} {} already exists", fields.year, fields.grouping),
        ));
    }
    Ok(())
}

fn handle_classes_list(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    require_admin(state)?;
    let mut stmt = conn.prepare(
        "SELECT c.id, c.year, c.grouping_name, c.created_at,
                (SELECT COUNT(*) FROM users u WHERE u.class_id = c.id AND u.role = 'student')
         FROM classes c
         ORDER BY c.grouping_name COLLATE NOCASE, c.year",
    )?;
    let classes = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "year": r.get::<_, String>(1)?,
                "grouping": r.get::<_, String>(2)?,
                "createdAt": r.get::<_, String>(3)?,
                "studentCount": r.get::<_, i64>(4)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "classes": classes }))
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let admin = require_admin(state)?;
    let fields = validate_class(
        field_text(req.params.get("year")),
        field_text(req.params.get("grouping")),
    )?;
    check_class_free(conn, &fields, None)?;

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, year, grouping_name, created_at) VALUES(?, ?, ?, ?)",
        (&class_id, &fields.year, &fields.grouping, now_ts()),
    )
    .map_err(|e| write_err(e, "db_insert_failed", "classes"))?;
    log::info!(
        "{} created class {} {}",
        admin.email,
        fields.year,
        fields.grouping
    );
    Ok(json!({ "classId": class_id }))
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    require_admin(state)?;
    let class_id = required_str(req, "classId")?;
    let patch = patch_obj(req)?;

    let (year, grouping): (String, String) = conn
        .query_row(
            "SELECT year, grouping_name FROM classes WHERE id = ?",
            [&class_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("class"))?;

    let year = if patch.contains_key("year") {
        field_text(patch.get("year"))
    } else {
        Some(year)
    };
    let grouping = if patch.contains_key("grouping") {
        field_text(patch.get("grouping"))
    } else {
        Some(grouping)
    };
    let fields = validate_class(year, grouping)?;
    check_class_free(conn, &fields, Some(&class_id))?;

    conn.execute(
        "UPDATE classes SET year = ?, grouping_name = ? WHERE id = ?",
        (&fields.year, &fields.grouping, &class_id),
    )
    .map_err(|e| write_err(e, "db_update_failed", "classes"))?;
    Ok(json!({ "ok": true }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let admin = require_admin(state)?;
    let class_id = required_str(req, "classId")?;
    ensure_exists(conn, "classes", &class_id, "class")?;
    refuse_if_scheduled(conn, "class_id", &class_id, "class")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    // No ON DELETE SET NULL on users.class_id; detach members first.
    let detached = tx
        .execute(
            "UPDATE users SET class_id = NULL, updated_at = ? WHERE class_id = ?",
            (now_ts(), &class_id),
        )
        .map_err(|e| write_err(e, "db_update_failed", "users"))?;
    tx.execute("DELETE FROM classes WHERE id = ?", [&class_id])
        .map_err(|e| write_err(e, "db_delete_failed", "classes"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    log::info!(
        "{} deleted class {} ({} students detached)",
        admin.email,
        class_id,
        detached
    );
    Ok(json!({ "ok": true, "studentsDetached": detached }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "resources.list" => handle_resources_list(state, req),
        "resources.create" => handle_resources_create(state, req),
        "resources.delete" => handle_resources_delete(state, req),
        "subjects.list" => handle_subjects_list(state, req),
        "subjects.create" => handle_subjects_create(state, req),
        "subjects.update" => handle_subjects_update(state, req),
        "subjects.delete" => handle_subjects_delete(state, req),
        "classes.list" => handle_classes_list(state, req),
        "classes.create" => handle_classes_create(state, req),
        "classes.update" => handle_classes_update(state, req),
        "classes.delete" => handle_classes_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
