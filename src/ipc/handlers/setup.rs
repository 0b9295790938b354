use crate::db;
use crate::ipc::error::{HandlerErr, HandlerResult};
use crate::ipc::helpers::{db_conn, require_admin, respond};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{parse_time, Recurrence, SchoolHours, TIME_FORMAT};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Schedule,
    School,
}

impl SetupSection {
    const ALL: [SetupSection; 2] = [SetupSection::Schedule, SetupSection::School];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "schedule" => Some(Self::Schedule),
            "school" => Some(Self::School),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::School => "school",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Schedule => "setup.schedule",
            Self::School => "setup.school",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Schedule => json!({
            "dayStart": "07:00",
            "dayEnd": "23:00",
            "slotMinutes": 30
        }),
        SetupSection::School => json!({
            "schoolName": "",
            "defaultRecurrence": "weekly"
        }),
    }
}

fn parse_hhmm(v: &Value, key: &str) -> Result<String, String> {
    let raw = v
        .as_str()
        .ok_or_else(|| format!("{} must be a HH:MM string", key))?;
    parse_time(raw)
        .map(|t| t.format(TIME_FORMAT).to_string())
        .ok_or_else(|| format!("{} must be a HH:MM string", key))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Schedule => match k.as_str() {
                "dayStart" | "dayEnd" => {
                    obj.insert(k.clone(), Value::String(parse_hhmm(v, k)?));
                }
                "slotMinutes" => {
                    let n = v
                        .as_i64()
                        .filter(|n| (5..=240).contains(n))
                        .ok_or_else(|| "slotMinutes must be an integer in 5..=240".to_string())?;
                    obj.insert(k.clone(), json!(n));
                }
                _ => return Err(format!("unknown schedule field: {}", k)),
            },
            SetupSection::School => match k.as_str() {
                "schoolName" => {
                    let s = v
                        .as_str()
                        .ok_or_else(|| "schoolName must be a string".to_string())?
                        .trim();
                    if s.chars().count() > 120 {
                        return Err("schoolName must be at most 120 characters".to_string());
                    }
                    obj.insert(k.clone(), Value::String(s.to_string()));
                }
                "defaultRecurrence" => {
                    let r = v
                        .as_str()
                        .and_then(Recurrence::parse)
                        .ok_or_else(|| {
                            "defaultRecurrence must be one of: weekly, biweekly, monthly"
                                .to_string()
                        })?;
                    obj.insert(k.clone(), Value::String(r.key().to_string()));
                }
                _ => return Err(format!("unknown school field: {}", k)),
            },
        }
    }
    if let SetupSection::Schedule = section {
        let start = obj.get("dayStart").and_then(|v| v.as_str()).and_then(parse_time);
        let end = obj.get("dayEnd").and_then(|v| v.as_str()).and_then(parse_time);
        if let (Some(s), Some(e)) = (start, end) {
            if s >= e {
                return Err("dayStart must be earlier than dayEnd".to_string());
            }
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults.
            let mut candidate = current.clone();
            if merge_section_patch(section, &mut candidate, saved_obj).is_ok() {
                current = candidate;
            }
        }
    }
    Ok(current)
}

/// School-hours window configured for this workspace.
pub fn load_school_hours(conn: &Connection) -> SchoolHours {
    let defaults = SchoolHours::default();
    let Ok(obj) = load_section(conn, SetupSection::Schedule) else {
        return defaults;
    };
    let time = |key: &str| obj.get(key).and_then(|v| v.as_str()).and_then(parse_time);
    SchoolHours {
        day_start: time("dayStart").unwrap_or(defaults.day_start),
        day_end: time("dayEnd").unwrap_or(defaults.day_end),
        slot_minutes: obj
            .get("slotMinutes")
            .and_then(|v| v.as_i64())
            .unwrap_or(defaults.slot_minutes),
    }
}

pub fn load_default_recurrence(conn: &Connection) -> Recurrence {
    load_section(conn, SetupSection::School)
        .ok()
        .and_then(|obj| {
            obj.get("defaultRecurrence")
                .and_then(|v| v.as_str())
                .and_then(Recurrence::parse)
        })
        .unwrap_or_default()
}

fn handle_setup_get(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let mut out = Map::new();
    for section in SetupSection::ALL {
        let v = load_section(conn, section)
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        out.insert(section.name().to_string(), v);
    }
    Ok(Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let admin = require_admin(state)?;
    let section_raw = req
        .params
        .get("section")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing section"))?;
    let section = SetupSection::parse(section_raw)
        .ok_or_else(|| HandlerErr::bad_params("unknown section"))?;
    let patch = req
        .params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))?;

    let mut current = load_section(conn, section)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    merge_section_patch(section, &mut current, patch).map_err(HandlerErr::bad_params)?;
    db::settings_set_json(conn, section.key(), &current)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    log::info!("{} updated setup section {}", admin.email, section.name());
    Ok(json!({ "section": section.name(), "value": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "setup.get" => handle_setup_get(state, req),
        "setup.update" => handle_setup_update(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
