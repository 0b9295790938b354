use crate::ipc::error::{HandlerErr, HandlerResult};
use crate::ipc::helpers::{
    count_where, db_conn, field_text, now_ts, opt_str, patch_obj, require_admin, required_str,
    respond, row_exists, validation_failed, write_err,
};
use crate::ipc::types::{AppState, Request, Session};
use crate::roles::Role;
use crate::validation::{
    format_cpf, format_phone, validate_user_form, FieldError, UserFields, UserForm,
};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Map, Value as JsonValue};
use uuid::Uuid;

const USER_COLUMNS: &str = "u.id, u.role, u.name, u.email, u.cpf, u.registration, u.phone,
     u.teacher_training, u.class_id, c.grouping_name, u.permission, u.created_at, u.updated_at";

fn user_json(r: &Row<'_>) -> rusqlite::Result<JsonValue> {
    let cpf: String = r.get(4)?;
    let phone: Option<String> = r.get(6)?;
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "role": r.get::<_, String>(1)?,
        "name": r.get::<_, String>(2)?,
        "email": r.get::<_, String>(3)?,
        "cpf": cpf,
        "cpfFormatted": format_cpf(&cpf),
        "registration": r.get::<_, i64>(5)?,
        "phone": phone,
        "phoneFormatted": phone.as_deref().map(format_phone),
        "teacherTraining": r.get::<_, Option<String>>(7)?,
        "classId": r.get::<_, Option<String>>(8)?,
        "className": r.get::<_, Option<String>>(9)?,
        "permission": r.get::<_, i64>(10)?,
        "createdAt": r.get::<_, String>(11)?,
        "updatedAt": r.get::<_, String>(12)?,
    }))
}

fn load_user_json(conn: &Connection, user_id: &str) -> Result<JsonValue, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM users u LEFT JOIN classes c ON c.id = u.class_id WHERE u.id = ?",
        USER_COLUMNS
    );
    conn.query_row(&sql, [user_id], user_json)
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("user"))
}

fn form_from_obj(obj: &Map<String, JsonValue>) -> UserForm {
    UserForm {
        role: field_text(obj.get("role")),
        name: field_text(obj.get("name")),
        email: field_text(obj.get("email")),
        cpf: field_text(obj.get("cpf")),
        registration: field_text(obj.get("registration")),
        phone: field_text(obj.get("phone")),
        teacher_training: field_text(obj.get("teacherTraining")),
        class_id: field_text(obj.get("classId")),
    }
}

fn admin_count(conn: &Connection) -> Result<i64, HandlerErr> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM users WHERE role = 'admin'",
        [],
        |r| r.get(0),
    )?)
}

fn form_role(form: &UserForm) -> Option<Role> {
    form.role.as_deref().map(str::trim).and_then(Role::parse)
}

/// Validates the form and the student's class reference as one error list.
fn validated_fields(conn: &Connection, form: &UserForm) -> Result<UserFields, HandlerErr> {
    let mut errors = Vec::new();
    let class_id = form
        .class_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if let (Some(Role::Student), Some(class_id)) = (form_role(form), class_id) {
        if !row_exists(conn, "classes", class_id)? {
            errors.push(FieldError::new("classId", "class not found"));
        }
    }
    match validate_user_form(form) {
        Ok(fields) if errors.is_empty() => Ok(fields),
        Ok(_) => Err(validation_failed(errors)),
        Err(mut form_errors) => {
            form_errors.append(&mut errors);
            Err(validation_failed(form_errors))
        }
    }
}

/// Checks the unique keys that validation alone cannot see.
fn check_user_constraints(
    conn: &Connection,
    fields: &UserFields,
    exclude_id: Option<&str>,
) -> Result<(), HandlerErr> {
    let exclude = exclude_id.unwrap_or("");
    let email_taken: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE email = ? COLLATE NOCASE AND id <> ? LIMIT 1",
            (&fields.email, exclude),
            |r| r.get(0),
        )
        .optional()?;
    if email_taken.is_some() {
        return Err(HandlerErr::new("duplicate", "email already registered")
            .with_details(json!({ "field": "email" })));
    }
    let registration_taken: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE registration = ? AND id <> ? LIMIT 1",
            (fields.registration, exclude),
            |r| r.get(0),
        )
        .optional()?;
    if registration_taken.is_some() {
        return Err(HandlerErr::new("duplicate", "registration already in use")
            .with_details(json!({ "field": "registration" })));
    }
    Ok(())
}

fn insert_user(conn: &Connection, fields: &UserFields) -> Result<String, HandlerErr> {
    check_user_constraints(conn, fields, None)?;
    let user_id = Uuid::new_v4().to_string();
    let now = now_ts();
    conn.execute(
        "INSERT INTO users(id, role, name, email, cpf, registration, phone, teacher_training,
                           class_id, permission, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            user_id,
            fields.role.key(),
            fields.name,
            fields.email,
            fields.cpf,
            fields.registration,
            fields.phone,
            fields.teacher_training,
            fields.class_id,
            fields.role.permission(),
            now,
            now
        ],
    )
    .map_err(|e| write_err(e, "db_insert_failed", "users"))?;
    Ok(user_id)
}

fn handle_users_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    require_admin(state)?;

    let search = opt_str(&req.params, "search").map(|s| s.to_lowercase());
    let role = match opt_str(&req.params, "role") {
        None => None,
        Some(r) if r == "all" => None,
        Some(r) => Some(
            Role::parse(&r).ok_or_else(|| HandlerErr::bad_params(format!("unknown role: {}", r)))?,
        ),
    };

    let sql = format!(
        "SELECT {} FROM users u LEFT JOIN classes c ON c.id = u.class_id
         ORDER BY u.name COLLATE NOCASE, u.id",
        USER_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let all = stmt
        .query_map([], user_json)?
        .collect::<Result<Vec<_>, _>>()?;

    let users: Vec<JsonValue> = all
        .into_iter()
        .filter(|u| match role {
            Some(r) => u["role"].as_str() == Some(r.key()),
            None => true,
        })
        .filter(|u| match search.as_deref() {
            Some(term) => {
                let name = u["name"].as_str().unwrap_or("").to_lowercase();
                let email = u["email"].as_str().unwrap_or("").to_lowercase();
                let registration = u["registration"].to_string();
                name.contains(term) || email.contains(term) || registration.contains(term)
            }
            None => true,
        })
        .collect();

    Ok(json!({ "users": users }))
}

fn handle_users_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let params = req
        .params
        .as_object()
        .ok_or_else(|| HandlerErr::bad_params("params must be an object"))?;
    let form = form_from_obj(params);

    let bootstrap = form_role(&form) == Some(Role::Admin) && admin_count(conn)? == 0;
    if !bootstrap {
        require_admin(state)?;
    }
    let fields = validated_fields(conn, &form)?;

    let user_id = insert_user(conn, &fields)?;
    log::info!("created {} user {}", fields.role.key(), fields.email);
    Ok(json!({ "userId": user_id, "user": load_user_json(conn, &user_id)? }))
}

fn handle_users_sign_up(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let params = req
        .params
        .as_object()
        .ok_or_else(|| HandlerErr::bad_params("params must be an object"))?;
    let fields = validated_fields(conn, &form_from_obj(params))?;
    if fields.role == Role::Admin && admin_count(conn)? > 0 {
        return Err(HandlerErr::new(
            "forbidden",
            "administrators are created by an administrator",
        ));
    }
    let user_id = insert_user(conn, &fields)?;
    log::info!("self-registered {} user {}", fields.role.key(), fields.email);
    Ok(json!({ "userId": user_id, "user": load_user_json(conn, &user_id)? }))
}

fn existing_form(conn: &Connection, user_id: &str) -> Result<UserForm, HandlerErr> {
    conn.query_row(
        "SELECT role, name, email, cpf, registration, phone, teacher_training, class_id
         FROM users WHERE id = ?",
        [user_id],
        |r| {
            Ok(UserForm {
                role: Some(r.get(0)?),
                name: Some(r.get(1)?),
                email: Some(r.get(2)?),
                cpf: Some(r.get(3)?),
                registration: Some(r.get::<_, i64>(4)?.to_string()),
                phone: r.get(5)?,
                teacher_training: r.get(6)?,
                class_id: r.get(7)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| HandlerErr::not_found("user"))
}

fn apply_user_patch(form: &mut UserForm, patch: &Map<String, JsonValue>) {
    let patched = form_from_obj(patch);
    let set = |key: &str, target: &mut Option<String>, value: Option<String>| {
        if let Some(v) = patch.get(key) {
            *target = if v.is_null() { None } else { value };
        }
    };
    set("role", &mut form.role, patched.role);
    set("name", &mut form.name, patched.name);
    set("email", &mut form.email, patched.email);
    set("cpf", &mut form.cpf, patched.cpf);
    set("registration", &mut form.registration, patched.registration);
    set("phone", &mut form.phone, patched.phone);
    set("teacherTraining", &mut form.teacher_training, patched.teacher_training);
    set("classId", &mut form.class_id, patched.class_id);
}

fn handle_users_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let user_id = required_str(req, "userId")?;
    let refreshed = {
        let conn = db_conn(state)?;
        require_admin(state)?;
        let patch = patch_obj(req)?;

        let mut form = existing_form(conn, &user_id)?;
        let previous_role = form.role.as_deref().and_then(Role::parse);
        apply_user_patch(&mut form, patch);
        let fields = validated_fields(conn, &form)?;
        check_user_constraints(conn, &fields, Some(&user_id))?;

        if previous_role == Some(Role::Admin)
            && fields.role != Role::Admin
            && admin_count(conn)? <= 1
        {
            return Err(HandlerErr::new(
                "forbidden",
                "the last administrator cannot change role",
            ));
        }

        if previous_role == Some(Role::Teacher) && fields.role != Role::Teacher {
            let booked = count_where(
                conn,
                "SELECT COUNT(*) FROM schedules WHERE teacher_id = ?",
                &user_id,
            )?;
            if booked > 0 {
                return Err(HandlerErr::new(
                    "in_use",
                    "teacher still has scheduled classes",
                )
                .with_details(json!({ "schedules": booked })));
            }
        }

        conn.execute(
            "UPDATE users SET role = ?, name = ?, email = ?, cpf = ?, registration = ?, phone = ?,
                    teacher_training = ?, class_id = ?, permission = ?, updated_at = ?
             WHERE id = ?",
            rusqlite::params![
                fields.role.key(),
                fields.name,
                fields.email,
                fields.cpf,
                fields.registration,
                fields.phone,
                fields.teacher_training,
                fields.class_id,
                fields.role.permission(),
                now_ts(),
                user_id
            ],
        )
        .map_err(|e| write_err(e, "db_update_failed", "users"))?;
        log::info!("updated user {}", fields.email);
        fields
    };

    if let Some(s) = state.session.as_mut().filter(|s| s.user_id == user_id) {
        *s = Session {
            user_id: user_id.clone(),
            role: refreshed.role,
            name: refreshed.name.clone(),
            email: refreshed.email.clone(),
        };
    }

    let conn = db_conn(state)?;
    Ok(json!({ "user": load_user_json(conn, &user_id)? }))
}

fn handle_users_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let admin = require_admin(state)?;
    let user_id = required_str(req, "userId")?;
    if admin.user_id == user_id {
        return Err(HandlerErr::new(
            "forbidden",
            "cannot delete the signed-in user",
        ));
    }
    if !row_exists(conn, "users", &user_id)? {
        return Err(HandlerErr::not_found("user"));
    }
    let booked = count_where(
        conn,
        "SELECT COUNT(*) FROM schedules WHERE teacher_id = ?",
        &user_id,
    )?;
    if booked > 0 {
        return Err(
            HandlerErr::new("in_use", "teacher still has scheduled classes")
                .with_details(json!({ "schedules": booked })),
        );
    }
    conn.execute("DELETE FROM users WHERE id = ?", [&user_id])
        .map_err(|e| write_err(e, "db_delete_failed", "users"))?;
    log::info!("{} deleted user {}", admin.email, user_id);
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "users.list" => handle_users_list(state, req),
        "users.create" => handle_users_create(state, req),
        "users.signUp" => handle_users_sign_up(state, req),
        "users.update" => handle_users_update(state, req),
        "users.delete" => handle_users_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
