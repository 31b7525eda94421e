use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rosterd");
    let mut child = Command::new(exe)
        .env_remove("ROSTERD_WORKSPACE")
        .env_remove("ROSTERD_BACKUP_DIR")
        .env_remove("ROSTERD_AUDIT_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rosterd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
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

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value["result"].clone()
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn scenario() -> serde_json::Value {
    json!({
        "students": [{ "id": "s1", "name": "Ada", "email": "ada@school.test" }],
        "classes": [{ "id": "c1", "name": "Physics", "capacity": 20, "enrolledStudents": ["s1"] }],
        "schedules": [{ "id": "sch1", "classId": "c1", "dayOfWeek": 1 }]
    })
}

#[test]
fn router_dispatch_smoke_covers_migration_surface() {
    let workspace = temp_dir("rosterd-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["workspacePath"].is_null());

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "migration.run",
        json!({ "dataset": scenario() }),
    );
    assert_eq!(error_code(&resp), "no_workspace");

    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(selected["backupDir"].as_str().unwrap_or("").ends_with("backups"));

    let mut bad = scenario();
    bad["schedules"][0]["classId"] = json!("missing");
    let checked = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "migration.validate",
        json!({ "dataset": bad.clone() }),
    );
    assert_eq!(checked["valid"], false);
    assert_eq!(checked["errors"][0]["entity"], "schedule");
    assert_eq!(checked["errors"][0]["field"], "classId");

    let run = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "migration.run",
        json!({ "dataset": scenario() }),
    );
    assert_eq!(run["success"], true);
    assert_eq!(run["phase"], "committed");
    assert_eq!(run["counts"]["students"], 1);
    assert_eq!(run["counts"]["classes"], 1);
    assert_eq!(run["counts"]["schedules"], 1);
    let backup_id = run["backupId"].as_str().expect("backup id").to_string();

    let rejected = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "migration.run",
        json!({ "dataset": bad }),
    );
    assert_eq!(rejected["success"], false);
    assert_eq!(rejected["phase"]["aborted"], "validation");
    assert_eq!(rejected["recovery"], "none");

    let counts = request_ok(&mut stdin, &mut reader, "7", "store.counts", json!({}));
    assert_eq!(counts["counts"]["users"], 1);
    assert_eq!(counts["counts"]["students"], 1);

    let listed = request_ok(&mut stdin, &mut reader, "8", "backups.list", json!({}));
    assert_eq!(listed["backups"], json!([backup_id]));

    let verified = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "backups.verify",
        json!({ "backupId": backup_id }),
    );
    assert_eq!(verified["valid"], true);
    assert_eq!(verified["counts"]["students"], 0);

    let restored = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "backups.restore",
        json!({ "backupId": backup_id }),
    );
    assert_eq!(restored["counts"]["students"], 0);
    let counts = request_ok(&mut stdin, &mut reader, "11", "store.counts", json!({}));
    assert_eq!(counts["counts"]["students"], 0);

    let missing = request(
        &mut stdin,
        &mut reader,
        "12",
        "backups.restore",
        json!({ "backupId": "19700101T000000.000000Z" }),
    );
    assert_eq!(error_code(&missing), "not_found");

    let unknown = request(&mut stdin, &mut reader, "13", "roster.dance", json!({}));
    assert_eq!(error_code(&unknown), "not_implemented");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn dataset_can_be_loaded_from_a_file() {
    let workspace = temp_dir("rosterd-dataset-file");
    let dataset_path = workspace.join("legacy-mock.json");
    std::fs::write(&dataset_path, scenario().to_string()).expect("write dataset");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let run = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "migration.run",
        json!({ "datasetPath": dataset_path.to_string_lossy() }),
    );
    assert_eq!(run["success"], true);

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "migration.validate",
        json!({ "datasetPath": workspace.join("nope.json").to_string_lossy() }),
    );
    assert_eq!(error_code(&resp), "bad_params");

    let resp = request(&mut stdin, &mut reader, "4", "migration.validate", json!({}));
    assert_eq!(error_code(&resp), "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn malformed_line_gets_bad_json_reply() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    writeln!(stdin, "{{not json").expect("write");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse");
    assert_eq!(value["ok"], false);
    assert_eq!(error_code(&value), "bad_json");

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["version"].is_string());

    drop(stdin);
    let _ = child.wait();
}
