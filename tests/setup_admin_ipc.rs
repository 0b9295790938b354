mod test_support;

use serde_json::json;
use test_support::{
    draft, error_code, request_err, request_ok, seed_workspace, spawn_sidecar, temp_dir,
    TEACHER_EMAIL,
};

#[test]
fn setup_get_update_roundtrip_and_validation() {
    let workspace = temp_dir("educa-setup-admin");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_workspace(&mut stdin, &mut reader, &workspace);

    let defaults = request_ok(&mut stdin, &mut reader, "1", "setup.get", json!({}));
    assert_eq!(
        defaults["schedule"],
        json!({ "dayStart": "07:00", "dayEnd": "23:00", "slotMinutes": 30 })
    );
    assert_eq!(defaults["school"]["defaultRecurrence"], json!("weekly"));

    let slots = request_ok(&mut stdin, &mut reader, "2", "schedules.timeSlots", json!({}));
    let slots = slots["slots"].as_array().expect("slots");
    assert_eq!(slots.len(), 33);
    assert_eq!(slots[0], json!("07:00"));
    assert_eq!(slots[32], json!("23:00"));

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "schedule", "patch": { "dayStart": "08:00", "slotMinutes": 60 } }),
    );
    assert_eq!(updated["value"]["dayStart"], json!("08:00"));

    let slots = request_ok(&mut stdin, &mut reader, "4", "schedules.timeSlots", json!({}));
    let slots = slots["slots"].as_array().expect("slots");
    assert_eq!(slots.len(), 16);
    assert_eq!(slots[0], json!("08:00"));
    assert_eq!(slots[15], json!("23:00"));

    let mut early = draft(&seed);
    early["startTime"] = json!("07:00");
    let error = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "schedules.create",
        json!({ "draft": early }),
    );
    assert_eq!(error_code(&error), "validation_failed");
    assert_eq!(
        error["message"],
        json!("times must be between 08:00 and 23:00")
    );

    for (i, (section, patch)) in [
        ("schedule", json!({ "dayStart": "24:99" })),
        ("schedule", json!({ "dayStart": "23:30" })),
        ("schedule", json!({ "slotMinutes": 1 })),
        ("schedule", json!({ "lunch": "12:00" })),
        ("school", json!({ "defaultRecurrence": "daily" })),
        ("calendar", json!({})),
    ]
    .into_iter()
    .enumerate()
    {
        let error = request_err(
            &mut stdin,
            &mut reader,
            &format!("bad-{}", i),
            "setup.update",
            json!({ "section": section, "patch": patch }),
        );
        assert_eq!(error_code(&error), "bad_params", "{} {}", section, i);
    }

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "setup.update",
        json!({ "section": "school", "patch": { "schoolName": "Escola Modelo", "defaultRecurrence": "mensal" } }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "schedules.create",
        json!({ "draft": draft(&seed) }),
    );
    assert_eq!(created["schedule"]["recurrence"], json!("monthly"));

    let reread = request_ok(&mut stdin, &mut reader, "8", "setup.get", json!({}));
    assert_eq!(reread["school"]["schoolName"], json!("Escola Modelo"));
    assert_eq!(reread["schedule"]["slotMinutes"], json!(60));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "session.signIn",
        json!({ "email": TEACHER_EMAIL }),
    );
    let error = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "setup.update",
        json!({ "section": "school", "patch": { "schoolName": "Hack" } }),
    );
    assert_eq!(error_code(&error), "forbidden");

    let _ = std::fs::remove_dir_all(workspace);
}
