#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_educad");
    let mut child = Command::new(exe)
        .env_remove("EDUCAD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn educad");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Sends a request expected to fail and returns its `error` object.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error object")
}

pub fn error_code(error: &serde_json::Value) -> &str {
    error.get("code").and_then(|v| v.as_str()).unwrap_or("")
}

pub fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

pub struct Seed {
    pub admin_id: String,
    pub teacher_id: String,
    pub student_id: String,
    pub class_id: String,
    pub room_id: String,
    pub subject_id: String,
}

pub const ADMIN_EMAIL: &str = "diretora@escola.test";
pub const TEACHER_EMAIL: &str = "prof.ana@escola.test";
pub const STUDENT_EMAIL: &str = "bruno@escola.test";

/// Opens `workspace`, bootstraps an admin and signs in as them, then creates
/// one teacher, class, student, room and subject.
pub fn seed_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> Seed {
    let _ = request_ok(
        stdin,
        reader,
        "seed-1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let admin = request_ok(
        stdin,
        reader,
        "seed-2",
        "users.create",
        json!({
            "role": "admin",
            "name": "Marta Diretora",
            "email": ADMIN_EMAIL,
            "cpf": "111.222.333-44",
            "registration": "1"
        }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "seed-3",
        "session.signIn",
        json!({ "email": ADMIN_EMAIL }),
    );
    let teacher = request_ok(
        stdin,
        reader,
        "seed-4",
        "users.create",
        json!({
            "role": "teacher",
            "name": "Ana Souza",
            "email": TEACHER_EMAIL,
            "cpf": "22233344455",
            "registration": 100,
            "phone": "(11) 98765-4321",
            "teacherTraining": "Licenciatura em Matemática"
        }),
    );
    let class = request_ok(
        stdin,
        reader,
        "seed-5",
        "classes.create",
        json!({ "year": "2024", "grouping": "3A" }),
    );
    let class_id = str_field(&class, "classId");
    let student = request_ok(
        stdin,
        reader,
        "seed-6",
        "users.create",
        json!({
            "role": "student",
            "name": "Bruno Lima",
            "email": STUDENT_EMAIL,
            "cpf": "33344455566",
            "registration": 2001,
            "classId": class_id
        }),
    );
    let room = request_ok(
        stdin,
        reader,
        "seed-7",
        "rooms.create",
        json!({
            "name": "a101",
            "roomType": "Sala de aula",
            "block": "a",
            "floor": "1",
            "capacity": 40
        }),
    );
    let subject = request_ok(
        stdin,
        reader,
        "seed-8",
        "subjects.create",
        json!({ "name": "Matemática" }),
    );

    Seed {
        admin_id: str_field(&admin, "userId"),
        teacher_id: str_field(&teacher, "userId"),
        student_id: str_field(&student, "userId"),
        class_id,
        room_id: str_field(&room, "roomId"),
        subject_id: str_field(&subject, "subjectId"),
    }
}

/// A Monday/Wednesday 08:00-09:40 booking for the seeded entities during 2024.
pub fn draft(seed: &Seed) -> serde_json::Value {
    json!({
        "days": ["segunda", "wednesday"],
        "startTime": "08:00",
        "endTime": "09:40",
        "subjectId": seed.subject_id,
        "teacherId": seed.teacher_id,
        "roomId": seed.room_id,
        "classId": seed.class_id,
        "startDate": "2024-02-01",
        "endDate": "2024-12-15"
    })
}
