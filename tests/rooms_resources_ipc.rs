mod test_support;

use serde_json::json;
use test_support::{
    draft, error_code, request_err, request_ok, seed_workspace, spawn_sidecar, str_field,
    temp_dir, TEACHER_EMAIL,
};

fn room_names(list: &serde_json::Value) -> Vec<String> {
    list["rooms"]
        .as_array()
        .expect("rooms")
        .iter()
        .map(|r| str_field(r, "name"))
        .collect()
}

#[test]
fn rooms_validate_normalize_and_track_resources() {
    let workspace = temp_dir("educa-rooms");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_workspace(&mut stdin, &mut reader, &workspace);

    let projector = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "resources.create",
            json!({ "resourceType": "Projetor" }),
        ),
        "resourceId",
    );
    let tv = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "resources.create",
            json!({ "resourceType": "TV" }),
        ),
        "resourceId",
    );
    let error = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "resources.create",
        json!({ "resourceType": "projetor" }),
    );
    assert_eq!(error_code(&error), "duplicate");

    let error = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "rooms.create",
        json!({
            "name": "TOOLONG1",
            "roomType": "Ginásio",
            "block": "AB",
            "floor": -1,
            "capacity": 0
        }),
    );
    assert_eq!(error_code(&error), "validation_failed");
    let fields: Vec<&str> = error["details"]["errors"]
        .as_array()
        .expect("errors")
        .iter()
        .map(|e| e["field"].as_str().expect("field"))
        .collect();
    assert_eq!(fields, vec!["name", "roomType", "block", "floor", "capacity"]);

    let error = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "rooms.create",
        json!({ "name": "a101", "roomType": "Auditório", "block": "C", "floor": 0, "capacity": 100 }),
    );
    assert_eq!(error_code(&error), "duplicate");

    let error = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "rooms.create",
        json!({
            "name": "lab1",
            "roomType": "Laboratório",
            "block": "b",
            "floor": 0,
            "capacity": 30,
            "resourceIds": ["missing-resource"]
        }),
    );
    assert_eq!(error_code(&error), "validation_failed");
    assert_eq!(error["details"]["errors"][0]["field"], json!("resourceIds"));

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "rooms.create",
        json!({
            "name": "lab1",
            "roomType": "Laboratório",
            "block": "b",
            "floor": "0",
            "capacity": "30",
            "resourceIds": [tv, projector]
        }),
    );
    let lab_id = str_field(&created, "roomId");
    let room = &created["room"];
    assert_eq!(room["name"], json!("LAB1"));
    assert_eq!(room["block"], json!("B"));
    assert_eq!(room["floor"], json!(0));
    assert_eq!(room["capacity"], json!(30));
    assert_eq!(room["resourceIds"], json!([projector, tv]));

    let set = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "rooms.resources.set",
        json!({ "roomId": lab_id, "resourceIds": [tv] }),
    );
    assert_eq!(set["resourceIds"], json!([tv]));

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "rooms.update",
        json!({ "roomId": lab_id, "patch": { "capacity": 35, "resourceIds": [projector] } }),
    );
    assert_eq!(updated["room"]["capacity"], json!(35));
    assert_eq!(updated["room"]["resourceIds"], json!([projector]));

    let labs = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "rooms.list",
        json!({ "roomType": "Laboratório" }),
    );
    assert_eq!(room_names(&labs), vec!["LAB1"]);
    let searched = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "rooms.list",
        json!({ "search": "a10" }),
    );
    assert_eq!(room_names(&searched), vec!["A101"]);
    let block_b = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "rooms.list",
        json!({ "block": "b", "roomType": "all" }),
    );
    assert_eq!(room_names(&block_b), vec!["LAB1"]);

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "resources.delete",
        json!({ "resourceId": projector }),
    );
    assert_eq!(deleted["roomsDetached"], json!(1));
    let remaining = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "rooms.resources.get",
        json!({ "roomId": lab_id }),
    );
    assert_eq!(remaining["resourceIds"], json!([]));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "schedules.create",
        json!({ "draft": draft(&seed) }),
    );
    let error = request_err(
        &mut stdin,
        &mut reader,
        "16",
        "rooms.delete",
        json!({ "roomId": seed.room_id }),
    );
    assert_eq!(error_code(&error), "in_use");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "rooms.delete",
        json!({ "roomId": lab_id }),
    );
    let all = request_ok(&mut stdin, &mut reader, "18", "rooms.list", json!({}));
    assert_eq!(room_names(&all), vec!["A101"]);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn room_management_requires_an_admin_session() {
    let workspace = temp_dir("educa-rooms-access");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = seed_workspace(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "session.signIn",
        json!({ "email": TEACHER_EMAIL }),
    );
    let error = request_err(&mut stdin, &mut reader, "2", "rooms.list", json!({}));
    assert_eq!(error_code(&error), "forbidden");

    let _ = request_ok(&mut stdin, &mut reader, "3", "session.signOut", json!({}));
    let error = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "rooms.create",
        json!({ "name": "X1", "roomType": "Sala de aula", "block": "X", "floor": 0, "capacity": 10 }),
    );
    assert_eq!(error_code(&error), "not_signed_in");

    let _ = std::fs::remove_dir_all(workspace);
}
