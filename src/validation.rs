use crate::roles::Role;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

pub const ROOM_TYPES: [&str; 3] = ["Sala de aula", "Laboratório", "Auditório"];
pub const ROOM_NAME_MAX_CHARS: usize = 6;

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

pub fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

pub fn is_valid_email(email: &str) -> bool {
    static EMAIL_RE: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL_RE
        .get_or_init(|| Regex::new(EMAIL_PATTERN).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(email))
}

pub fn is_valid_cpf(raw: &str) -> bool {
    digits_only(raw).len() == 11
}

/// `12345678900` -> `123.456.789-00`. Anything that is not 11 digits is returned as-is.
pub fn format_cpf(raw: &str) -> String {
    let d = digits_only(raw);
    if d.len() != 11 {
        return raw.to_string();
    }
    format!("{}.{}.{}-{}", &d[0..3], &d[3..6], &d[6..9], &d[9..11])
}

pub fn format_phone(raw: &str) -> String {
    let d = digits_only(raw);
    match d.len() {
        11 => format!("({}) {}-{}", &d[0..2], &d[2..7], &d[7..11]),
        10 => format!("({}) {}-{}", &d[0..2], &d[2..6], &d[6..10]),
        _ => raw.to_string(),
    }
}

fn blank(v: &Option<String>) -> bool {
    v.as_deref().map(str::trim).unwrap_or("").is_empty()
}

fn trimmed(v: &Option<String>) -> String {
    v.as_deref().map(str::trim).unwrap_or("").to_string()
}

fn non_empty(v: &Option<String>) -> Option<String> {
    let s = trimmed(v);
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Raw user form as submitted. Every field is optional text so that all
/// problems can be reported together.
#[derive(Debug, Clone, Default)]
pub struct UserForm {
    pub role: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub cpf: Option<String>,
    pub registration: Option<String>,
    pub phone: Option<String>,
    pub teacher_training: Option<String>,
    pub class_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserFields {
    pub role: Role,
    pub name: String,
    pub email: String,
    pub cpf: String,
    pub registration: i64,
    pub phone: Option<String>,
    pub teacher_training: Option<String>,
    pub class_id: Option<String>,
}

pub fn validate_user_form(form: &UserForm) -> Result<UserFields, Vec<FieldError>> {
    let mut errors = Vec::new();

    let role = if blank(&form.role) {
        errors.push(FieldError::new("role", "role is required"));
        None
    } else {
        let r = Role::parse(&trimmed(&form.role));
        if r.is_none() {
            errors.push(FieldError::new(
                "role",
                "role must be one of: admin, teacher, student",
            ));
        }
        r
    };

    let name = trimmed(&form.name);
    if name.is_empty() {
        errors.push(FieldError::new("name", "name is required"));
    }

    let email = trimmed(&form.email).to_lowercase();
    if email.is_empty() {
        errors.push(FieldError::new("email", "email is required"));
    } else if !is_valid_email(&email) {
        errors.push(FieldError::new("email", "email is not valid"));
    }

    let cpf = digits_only(&trimmed(&form.cpf));
    if blank(&form.cpf) {
        errors.push(FieldError::new("cpf", "cpf is required"));
    } else if !is_valid_cpf(&cpf) {
        errors.push(FieldError::new("cpf", "cpf must have 11 digits"));
    }

    let registration = if blank(&form.registration) {
        errors.push(FieldError::new("registration", "registration is required"));
        None
    } else {
        match trimmed(&form.registration).parse::<i64>() {
            Ok(v) if v > 0 => Some(v),
            _ => {
                errors.push(FieldError::new(
                    "registration",
                    "registration must be a positive integer",
                ));
                None
            }
        }
    };

    let phone = non_empty(&form.phone).map(|p| digits_only(&p));
    if let Some(p) = phone.as_deref() {
        if p.len() != 10 && p.len() != 11 {
            errors.push(FieldError::new("phone", "phone must have 10 or 11 digits"));
        }
    }

    match (errors.is_empty(), role, registration) {
        (true, Some(role), Some(registration)) => Ok(UserFields {
            role,
            name,
            email,
            cpf,
            registration,
            phone,
            teacher_training: if role == Role::Teacher {
                non_empty(&form.teacher_training)
            } else {
                None
            },
            class_id: if role == Role::Student {
                non_empty(&form.class_id)
            } else {
                None
            },
        }),
        _ => Err(errors),
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoomForm {
    pub name: Option<String>,
    pub room_type: Option<String>,
    pub block: Option<String>,
    pub floor: Option<String>,
    pub capacity: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomFields {
    pub name: String,
    pub room_type: String,
    pub block: String,
    pub floor: i64,
    pub capacity: i64,
}

pub fn validate_room_form(form: &RoomForm) -> Result<RoomFields, Vec<FieldError>> {
    let mut errors = Vec::new();

    let name = trimmed(&form.name).to_uppercase();
    if name.is_empty() {
        errors.push(FieldError::new("name", "room name is required"));
    } else if name.chars().count() > ROOM_NAME_MAX_CHARS {
        errors.push(FieldError::new(
            "name",
            format!("room name must have at most {} characters", ROOM_NAME_MAX_CHARS),
        ));
    }

    let room_type = trimmed(&form.room_type);
    if room_type.is_empty() {
        errors.push(FieldError::new("roomType", "room type is required"));
    } else if !ROOM_TYPES.contains(&room_type.as_str()) {
        errors.push(FieldError::new(
            "roomType",
            format!("room type must be one of: {}", ROOM_TYPES.join(", ")),
        ));
    }

    let block = trimmed(&form.block).to_uppercase();
    if block.is_empty() {
        errors.push(FieldError::new("block", "block is required"));
    } else if block.chars().count() != 1 {
        errors.push(FieldError::new("block", "block must be exactly 1 character"));
    }

    let floor = if blank(&form.floor) {
        errors.push(FieldError::new("floor", "floor is required"));
        None
    } else {
        match trimmed(&form.floor).parse::<i64>() {
            Ok(v) if v >= 0 => Some(v),
            _ => {
                errors.push(FieldError::new("floor", "floor must be zero or a positive integer"));
                None
            }
        }
    };

    let capacity = if blank(&form.capacity) {
        errors.push(FieldError::new("capacity", "capacity is required"));
        None
    } else {
        match trimmed(&form.capacity).parse::<i64>() {
            Ok(v) if v >= 1 => Some(v),
            _ => {
                errors.push(FieldError::new("capacity", "capacity must be greater than zero"));
                None
            }
        }
    };

    match (errors.is_empty(), floor, capacity) {
        (true, Some(floor), Some(capacity)) => Ok(RoomFields {
            name,
            room_type,
            block,
            floor,
            capacity,
        }),
        _ => Err(errors),
    }
}
