use crate::ipc::error::{HandlerErr, HandlerResult};
use crate::ipc::helpers::{
    count_where, db_conn, ensure_exists, field_text, now_ts, opt_str, parse_id_list, patch_obj,
    require_admin, required_str, respond, row_exists, validation_failed, write_err,
};
use crate::ipc::types::{AppState, Request};
use crate::validation::{validate_room_form, FieldError, RoomFields, RoomForm};
use rusqlite::{Connection, OptionalExtension, Transaction};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashMap;
use uuid::Uuid;

fn form_from_obj(obj: &Map<String, JsonValue>) -> RoomForm {
    RoomForm {
        name: field_text(obj.get("name")),
        room_type: field_text(obj.get("roomType")),
        block: field_text(obj.get("block")),
        floor: field_text(obj.get("floor")),
        capacity: field_text(obj.get("capacity")),
    }
}

fn room_resource_ids(conn: &Connection, room_id: &str) -> Result<Vec<String>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT rr.resource_id
         FROM room_resources rr
         JOIN resources res ON res.id = rr.resource_id
         WHERE rr.room_id = ? AND rr.available = 1
         ORDER BY res.resource_type COLLATE NOCASE",
    )?;
    let ids = stmt
        .query_map([room_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn load_room_json(conn: &Connection, room_id: &str) -> Result<JsonValue, HandlerErr> {
    let room = conn
        .query_row(
            "SELECT id, name, room_type, block, floor, capacity, created_at FROM rooms WHERE id = ?",
            [room_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "roomType": r.get::<_, String>(2)?,
                    "block": r.get::<_, String>(3)?,
                    "floor": r.get::<_, i64>(4)?,
                    "capacity": r.get::<_, i64>(5)?,
                    "createdAt": r.get::<_, String>(6)?,
                }))
            },
        )
        .optional()?;
    let mut room = room.ok_or_else(|| HandlerErr::not_found("room"))?;
    room["resourceIds"] = json!(room_resource_ids(conn, room_id)?);
    Ok(room)
}

fn check_resources_exist(conn: &Connection, ids: &[String]) -> Result<(), HandlerErr> {
    let missing: Vec<&String> = ids
        .iter()
        .map(|id| row_exists(conn, "resources", id).map(|found| (id, found)))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|(_, found)| !found)
        .map(|(id, _)| id)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        let errors = missing
            .iter()
            .map(|id| FieldError::new("resourceIds", format!("unknown resource: {}", id)))
            .collect();
        Err(validation_failed(errors))
    }
}

fn check_room_name_free(
    conn: &Connection,
    name: &str,
    exclude_id: Option<&str>,
) -> Result<(), HandlerErr> {
    let taken: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM rooms WHERE name = ? AND id <> ? LIMIT 1",
            (name, exclude_id.unwrap_or("")),
            |r| r.get(0),
        )
        .optional()?;
    if taken.is_some() {
        return Err(HandlerErr::new("duplicate", format!("room {} already exists", name))
            .with_details(json!({ "field": "name" })));
    }
    Ok(())
}

/// Replaces the room's resource set: delete everything, insert the selection.
fn replace_room_resources(
    tx: &Transaction<'_>,
    room_id: &str,
    resource_ids: &[String],
) -> Result<(), HandlerErr> {
    tx.execute("DELETE FROM room_resources WHERE room_id = ?", [room_id])
        .map_err(|e| write_err(e, "db_delete_failed", "room_resources"))?;
    for resource_id in resource_ids {
        tx.execute(
            "INSERT INTO room_resources(room_id, resource_id, available) VALUES(?, ?, 1)",
            (room_id, resource_id),
        )
        .map_err(|e| write_err(e, "db_insert_failed", "room_resources"))?;
    }
    Ok(())
}

fn write_room(
    conn: &Connection,
    room_id: &str,
    fields: &RoomFields,
    resource_ids: Option<&[String]>,
    is_new: bool,
) -> Result<(), HandlerErr> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    if is_new {
        tx.execute(
            "INSERT INTO rooms(id, name, room_type, block, floor, capacity, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                room_id,
                fields.name,
                fields.room_type,
                fields.block,
                fields.floor,
                fields.capacity,
                now_ts()
            ],
        )
        .map_err(|e| write_err(e, "db_insert_failed", "rooms"))?;
    } else {
        tx.execute(
            "UPDATE rooms SET name = ?, room_type = ?, block = ?, floor = ?, capacity = ?
             WHERE id = ?",
            rusqlite::params![
                fields.name,
                fields.room_type,
                fields.block,
                fields.floor,
                fields.capacity,
                room_id
            ],
        )
        .map_err(|e| write_err(e, "db_update_failed", "rooms"))?;
    }
    if let Some(ids) = resource_ids {
        replace_room_resources(&tx, room_id, ids)?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))
}

fn handle_rooms_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    require_admin(state)?;

    let search = opt_str(&req.params, "search").map(|s| s.to_lowercase());
    let room_type = opt_str(&req.params, "roomType").filter(|v| v != "all");
    let block = opt_str(&req.params, "block")
        .filter(|v| v != "all")
        .map(|v| v.to_uppercase());

    let mut by_room: HashMap<String, Vec<String>> = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT rr.room_id, rr.resource_id
             FROM room_resources rr
             JOIN resources res ON res.id = rr.resource_id
             WHERE rr.available = 1
             ORDER BY res.resource_type COLLATE NOCASE",
        )?;
        let pairs = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (room_id, resource_id) in pairs {
            by_room.entry(room_id).or_default().push(resource_id);
        }
    }

    let mut stmt = conn.prepare(
        "SELECT id, name, room_type, block, floor, capacity, created_at
         FROM rooms
         ORDER BY name",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, i64>(5)?,
                r.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let rooms: Vec<JsonValue> = rows
        .into_iter()
        .filter(|(_, name, rtype, rblock, ..)| {
            let matches_search = search.as_deref().map_or(true, |term| {
                name.to_lowercase().contains(term) || rtype.to_lowercase().contains(term)
            });
            let matches_type = room_type.as_deref().map_or(true, |t| rtype == t);
            let matches_block = block.as_deref().map_or(true, |b| rblock == b);
            matches_search && matches_type && matches_block
        })
        .map(|(id, name, rtype, rblock, floor, capacity, created_at)| {
            let resource_ids = by_room.remove(&id).unwrap_or_default();
            json!({
                "id": id,
                "name": name,
                "roomType": rtype,
                "block": rblock,
                "floor": floor,
                "capacity": capacity,
                "createdAt": created_at,
                "resourceIds": resource_ids,
            })
        })
        .collect();

    Ok(json!({ "rooms": rooms }))
}

fn handle_rooms_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let admin = require_admin(state)?;
    let params = req
        .params
        .as_object()
        .ok_or_else(|| HandlerErr::bad_params("params must be an object"))?;
    let fields = validate_room_form(&form_from_obj(params)).map_err(validation_failed)?;
    let resource_ids = parse_id_list(params.get("resourceIds"), "resourceIds")?;
    check_room_name_free(conn, &fields.name, None)?;
    check_resources_exist(conn, &resource_ids)?;

    let room_id = Uuid::new_v4().to_string();
    write_room(conn, &room_id, &fields, Some(resource_ids.as_slice()), true)?;
    log::info!("{} created room {}", admin.email, fields.name);
    Ok(json!({ "roomId": room_id, "room": load_room_json(conn, &room_id)? }))
}

fn handle_rooms_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let admin = require_admin(state)?;
    let room_id = required_str(req, "roomId")?;
    let patch = patch_obj(req)?;

    let mut form = conn
        .query_row(
            "SELECT name, room_type, block, floor, capacity FROM rooms WHERE id = ?",
            [&room_id],
            |r| {
                Ok(RoomForm {
                    name: Some(r.get(0)?),
                    room_type: Some(r.get(1)?),
                    block: Some(r.get(2)?),
                    floor: Some(r.get::<_, i64>(3)?.to_string()),
                    capacity: Some(r.get::<_, i64>(4)?.to_string()),
                })
            },
        )
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("room"))?;

    let patched = form_from_obj(patch);
    if patch.contains_key("name") {
        form.name = patched.name;
    }
    if patch.contains_key("roomType") {
        form.room_type = patched.room_type;
    }
    if patch.contains_key("block") {
        form.block = patched.block;
    }
    if patch.contains_key("floor") {
        form.floor = patched.floor;
    }
    if patch.contains_key("capacity") {
        form.capacity = patched.capacity;
    }
    let fields = validate_room_form(&form).map_err(validation_failed)?;
    check_room_name_free(conn, &fields.name, Some(&room_id))?;

    let resource_ids = if patch.contains_key("resourceIds") {
        let ids = parse_id_list(patch.get("resourceIds"), "resourceIds")?;
        check_resources_exist(conn, &ids)?;
        Some(ids)
    } else {
        None
    };

    write_room(conn, &room_id, &fields, resource_ids.as_deref(), false)?;
    log::info!("{} updated room {}", admin.email, fields.name);
    Ok(json!({ "room": load_room_json(conn, &room_id)? }))
}

fn handle_rooms_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let admin = require_admin(state)?;
    let room_id = required_str(req, "roomId")?;
    ensure_exists(conn, "rooms", &room_id, "room")?;

    let booked = count_where(
        conn,
        "SELECT COUNT(*) FROM schedules WHERE room_id = ?",
        &room_id,
    )?;
    if booked > 0 {
        return Err(HandlerErr::new("in_use", "room still has scheduled classes")
            .with_details(json!({ "schedules": booked })));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute("DELETE FROM room_resources WHERE room_id = ?", [&room_id])
        .map_err(|e| write_err(e, "db_delete_failed", "room_resources"))?;
    tx.execute("DELETE FROM rooms WHERE id = ?", [&room_id])
        .map_err(|e| write_err(e, "db_delete_failed", "rooms"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    log::info!("{} deleted room {}", admin.email, room_id);
    Ok(json!({ "ok": true }))
}

fn handle_room_resources_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    require_admin(state)?;
    let room_id = required_str(req, "roomId")?;
    ensure_exists(conn, "rooms", &room_id, "room")?;
    Ok(json!({ "roomId": room_id, "resourceIds": room_resource_ids(conn, &room_id)? }))
}

fn handle_room_resources_set(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    require_admin(state)?;
    let room_id = required_str(req, "roomId")?;
    ensure_exists(conn, "rooms", &room_id, "room")?;
    if req.params.get("resourceIds").is_none() {
        return Err(HandlerErr::bad_params("missing resourceIds"));
    }
    let ids = parse_id_list(req.params.get("resourceIds"), "resourceIds")?;
    check_resources_exist(conn, &ids)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    replace_room_resources(&tx, &room_id, &ids)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    Ok(json!({ "roomId": room_id, "resourceIds": room_resource_ids(conn, &room_id)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "rooms.list" => handle_rooms_list(state, req),
        "rooms.create" => handle_rooms_create(state, req),
        "rooms.update" => handle_rooms_update(state, req),
        "rooms.delete" => handle_rooms_delete(state, req),
        "rooms.resources.get" => handle_room_resources_get(state, req),
        "rooms.resources.set" => handle_room_resources_set(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
