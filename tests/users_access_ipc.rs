mod test_support;

use serde_json::json;
use test_support::{
    draft, error_code, request_err, request_ok, seed_workspace, spawn_sidecar, str_field,
    temp_dir, ADMIN_EMAIL, TEACHER_EMAIL,
};

#[test]
fn first_admin_bootstraps_and_sign_up_is_restricted() {
    let workspace = temp_dir("educa-users-bootstrap");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let teacher = json!({
        "role": "professor",
        "name": "Carlos Pereira",
        "email": "carlos@escola.test",
        "cpf": "44455566677",
        "registration": 300
    });
    let error = request_err(&mut stdin, &mut reader, "2", "users.create", teacher.clone());
    assert_eq!(error_code(&error), "not_signed_in");

    let admin = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "users.create",
        json!({
            "role": "administrador",
            "name": "Marta Diretora",
            "email": "Marta@Escola.test",
            "cpf": "111.222.333-44",
            "registration": 1
        }),
    );
    assert_eq!(admin["user"]["role"], json!("admin"));
    assert_eq!(admin["user"]["permission"], json!(1));
    assert_eq!(admin["user"]["email"], json!("marta@escola.test"));
    assert_eq!(admin["user"]["cpf"], json!("11122233344"));

    let second_admin = json!({
        "role": "admin",
        "name": "Outra Pessoa",
        "email": "outra@escola.test",
        "cpf": "99988877766",
        "registration": 2
    });
    let error = request_err(&mut stdin, &mut reader, "4", "users.create", second_admin.clone());
    assert_eq!(error_code(&error), "not_signed_in");
    let error = request_err(&mut stdin, &mut reader, "5", "users.signUp", second_admin);
    assert_eq!(error_code(&error), "forbidden");

    let signed_up = request_ok(&mut stdin, &mut reader, "6", "users.signUp", teacher);
    assert_eq!(signed_up["user"]["permission"], json!(2));

    let error = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "users.signUp",
        json!({
            "role": "aluno",
            "name": "Aluno Teste",
            "email": "not an email",
            "cpf": "123",
            "registration": "abc",
            "phone": "123"
        }),
    );
    assert_eq!(error_code(&error), "validation_failed");
    let fields: Vec<&str> = error["details"]["errors"]
        .as_array()
        .expect("errors")
        .iter()
        .map(|e| e["field"].as_str().expect("field"))
        .collect();
    assert_eq!(fields, vec!["email", "cpf", "registration", "phone"]);

    let error = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "users.signUp",
        json!({
            "role": "student",
            "name": "Repetido",
            "email": "CARLOS@escola.test",
            "cpf": "55566677788",
            "registration": 301
        }),
    );
    assert_eq!(error_code(&error), "duplicate");
    assert_eq!(error["details"]["field"], json!("email"));

    let error = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "users.signUp",
        json!({
            "role": "student",
            "name": "Repetido",
            "email": "repetido@escola.test",
            "cpf": "55566677788",
            "registration": 300
        }),
    );
    assert_eq!(error_code(&error), "duplicate");
    assert_eq!(error["details"]["field"], json!("registration"));

    let error = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "session.signIn",
        json!({ "email": "ninguem@escola.test" }),
    );
    assert_eq!(error_code(&error), "not_found");

    let signed_in = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "session.signIn",
        json!({ "email": "MARTA@escola.test" }),
    );
    assert_eq!(signed_in["user"]["role"], json!("admin"));
    assert_eq!(signed_in["user"]["roleLabel"], json!("Administrador"));

    let health = request_ok(&mut stdin, &mut reader, "12", "health", json!({}));
    assert_eq!(health["signedIn"], json!(true));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn admins_list_update_and_delete_users() {
    let workspace = temp_dir("educa-users-admin");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_workspace(&mut stdin, &mut reader, &workspace);

    let students = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "users.list",
        json!({ "role": "student" }),
    );
    let students = students["users"].as_array().expect("users").clone();
    assert_eq!(students.len(), 1);
    assert_eq!(students[0]["className"], json!("3A"));

    let by_registration = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.list",
        json!({ "search": "100" }),
    );
    let found = by_registration["users"].as_array().expect("users");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["id"], json!(seed.teacher_id));
    assert_eq!(found[0]["cpfFormatted"], json!("222.333.444-55"));
    assert_eq!(found[0]["phoneFormatted"], json!("(11) 98765-4321"));
    assert_eq!(found[0]["phone"], json!("11987654321"));

    let by_name = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "users.list",
        json!({ "search": "ANA", "role": "all" }),
    );
    assert_eq!(by_name["users"].as_array().map(|a| a.len()), Some(1));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedules.create",
        json!({ "draft": draft(&seed) }),
    );
    let error = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "users.delete",
        json!({ "userId": seed.teacher_id }),
    );
    assert_eq!(error_code(&error), "in_use");
    let error = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "users.update",
        json!({ "userId": seed.teacher_id, "patch": { "role": "student" } }),
    );
    assert_eq!(error_code(&error), "in_use");

    let error = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "users.delete",
        json!({ "userId": seed.admin_id }),
    );
    assert_eq!(error_code(&error), "forbidden");

    // A student moved to teacher loses the class link.
    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "users.update",
        json!({
            "userId": seed.student_id,
            "patch": { "role": "teacher", "teacherTraining": "Pedagogia" }
        }),
    );
    assert_eq!(moved["user"]["role"], json!("teacher"));
    assert_eq!(moved["user"]["permission"], json!(2));
    assert_eq!(moved["user"]["classId"], json!(null));
    assert_eq!(moved["user"]["teacherTraining"], json!("Pedagogia"));

    let error = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "users.update",
        json!({ "userId": seed.student_id, "patch": { "email": TEACHER_EMAIL } }),
    );
    assert_eq!(error_code(&error), "duplicate");

    let renamed = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "users.update",
        json!({ "userId": seed.admin_id, "patch": { "name": "Marta Souza" } }),
    );
    assert_eq!(renamed["user"]["email"], json!(ADMIN_EMAIL));
    let current = request_ok(&mut stdin, &mut reader, "11", "session.current", json!({}));
    assert_eq!(current["user"]["name"], json!("Marta Souza"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "users.delete",
        json!({ "userId": seed.student_id }),
    );
    let all = request_ok(&mut stdin, &mut reader, "13", "users.list", json!({}));
    let names: Vec<String> = all["users"]
        .as_array()
        .expect("users")
        .iter()
        .map(|u| str_field(u, "name"))
        .collect();
    assert_eq!(names, vec!["Ana Souza", "Marta Souza"]);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn the_last_admin_keeps_the_role_and_bootstrap_stays_closed() {
    let workspace = temp_dir("educa-users-last-admin");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_workspace(&mut stdin, &mut reader, &workspace);

    let error = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "users.update",
        json!({ "userId": seed.admin_id, "patch": { "role": "student" } }),
    );
    assert_eq!(error_code(&error), "forbidden");

    let _ = request_ok(&mut stdin, &mut reader, "2", "session.signOut", json!({}));
    let error = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "users.signUp",
        json!({
            "role": "admin",
            "name": "Intrusa",
            "email": "intrusa@escola.test",
            "cpf": "77788899900",
            "registration": 900
        }),
    );
    assert_eq!(error_code(&error), "forbidden");

    // With a second admin in place, the first one may step down.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "session.signIn",
        json!({ "email": ADMIN_EMAIL }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "users.create",
        json!({
            "role": "admin",
            "name": "Vice Diretor",
            "email": "vice@escola.test",
            "cpf": "88899900011",
            "registration": 2
        }),
    );
    let stepped_down = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "users.update",
        json!({ "userId": seed.admin_id, "patch": { "role": "teacher" } }),
    );
    assert_eq!(stepped_down["user"]["role"], json!("teacher"));
    let current = request_ok(&mut stdin, &mut reader, "7", "session.current", json!({}));
    assert_eq!(current["user"]["role"], json!("teacher"));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn anonymous_create_is_refused_before_validation_and_class_errors_join_the_list() {
    let workspace = temp_dir("educa-users-create-order");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = seed_workspace(&mut stdin, &mut reader, &workspace);

    let bad_student = json!({
        "role": "student",
        "name": "Aluna Sem Turma",
        "email": "sem-arroba",
        "cpf": "44455566677",
        "registration": 3001,
        "classId": "no-such-class"
    });

    let _ = request_ok(&mut stdin, &mut reader, "1", "session.signOut", json!({}));
    let error = request_err(&mut stdin, &mut reader, "2", "users.create", bad_student.clone());
    assert_eq!(error_code(&error), "not_signed_in");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "session.signIn",
        json!({ "email": ADMIN_EMAIL }),
    );
    let error = request_err(&mut stdin, &mut reader, "4", "users.create", bad_student);
    assert_eq!(error_code(&error), "validation_failed");
    let fields: Vec<&str> = error["details"]["errors"]
        .as_array()
        .expect("errors")
        .iter()
        .map(|e| e["field"].as_str().expect("field"))
        .collect();
    assert_eq!(fields, vec!["email", "classId"]);

    let _ = std::fs::remove_dir_all(workspace);
}
