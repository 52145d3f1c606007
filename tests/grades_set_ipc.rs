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
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
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
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> String {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    value
        .pointer("/error/code")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn create_sheet(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        "create",
        "sheets.create",
        json!({
            "courseId": "c1",
            "courseName": "Algebra",
            "title": "Quarter 1",
            "gradingPeriod": "quarter1",
            "weightPercentage": 40.0,
            "activities": [
                {"id": "a1", "name": "Exam 1", "type": "exam", "maxScore": 5.0},
                {"id": "a2", "name": "Quiz 1", "type": "quiz", "maxScore": 10.0}
            ],
            "students": [
                {"studentId": "s1", "name": "One, Student"},
                {"studentId": "s2", "name": "Two, Student"}
            ]
        }),
    );
    created
        .get("sheetId")
        .and_then(|v| v.as_str())
        .expect("sheetId")
        .to_string()
}

#[test]
fn cached_total_matches_recomputed_mean_after_every_write() {
    let workspace = temp_dir("gradebook-grades-total");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let sheet_id = create_sheet(&mut stdin, &mut reader);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.set",
        json!({
            "sheetId": sheet_id, "studentId": "s1", "activityId": "a1",
            "value": 4.0, "comment": "solid"
        }),
    );
    assert_eq!(first.get("total").and_then(|v| v.as_f64()), Some(4.0));
    assert_eq!(
        first.get("recordStatus").and_then(|v| v.as_str()),
        Some("completed")
    );

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.set",
        json!({ "sheetId": sheet_id, "studentId": "s1", "activityId": "a2", "value": 7.0 }),
    );
    // Raw mean of entry values: (4.0 + 7.0) / 2.
    assert_eq!(second.get("total").and_then(|v| v.as_f64()), Some(5.5));

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "sheets.get",
        json!({ "sheetId": sheet_id }),
    );
    let record = fetched
        .pointer("/sheet/students")
        .and_then(|v| v.as_array())
        .expect("students")
        .iter()
        .find(|s| s.pointer("/studentId").and_then(|v| v.as_str()) == Some("s1"))
        .expect("s1 record")
        .clone();
    assert_eq!(record.get("total").and_then(|v| v.as_f64()), Some(5.5));
    assert_eq!(
        record.pointer("/grades/a1/value").and_then(|v| v.as_f64()),
        Some(4.0)
    );
    assert_eq!(
        record.pointer("/grades/a1/comment").and_then(|v| v.as_str()),
        Some("solid")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn out_of_domain_and_missing_targets_are_rejected() {
    let workspace = temp_dir("gradebook-grades-domain");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let sheet_id = create_sheet(&mut stdin, &mut reader);

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "grades.set",
        json!({ "sheetId": sheet_id, "studentId": "s1", "activityId": "a1", "value": 5.5 }),
    );
    assert_eq!(error_code(&resp), "invalid_grade");

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "grades.set",
        json!({ "sheetId": sheet_id, "studentId": "s1", "activityId": "a1", "value": -1.0 }),
    );
    assert_eq!(error_code(&resp), "invalid_grade");

    // 5.5 is inside a2's 0..=10 domain even though it exceeds a1's.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.set",
        json!({ "sheetId": sheet_id, "studentId": "s1", "activityId": "a2", "value": 5.5 }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "5",
        "grades.set",
        json!({ "sheetId": sheet_id, "studentId": "s1", "activityId": "missing", "value": 1.0 }),
    );
    assert_eq!(error_code(&resp), "not_found");

    let resp = request(
        &mut stdin,
        &mut reader,
        "6",
        "grades.set",
        json!({ "sheetId": "nope", "studentId": "s1", "activityId": "a1", "value": 1.0 }),
    );
    assert_eq!(error_code(&resp), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unrostered_student_is_synthesized_not_rejected() {
    let workspace = temp_dir("gradebook-grades-unrostered");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let sheet_id = create_sheet(&mut stdin, &mut reader);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.set",
        json!({ "sheetId": sheet_id, "studentId": "ghost", "activityId": "a1", "value": 2.0 }),
    );
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "sheets.get",
        json!({ "sheetId": sheet_id }),
    );
    let ghost = fetched
        .pointer("/sheet/students")
        .and_then(|v| v.as_array())
        .expect("students")
        .iter()
        .find(|s| s.pointer("/studentId").and_then(|v| v.as_str()) == Some("ghost"))
        .expect("synthesized record")
        .clone();
    assert_eq!(
        ghost.get("name").and_then(|v| v.as_str()),
        Some("(unrostered)")
    );
    assert_eq!(
        ghost.get("status").and_then(|v| v.as_str()),
        Some("completed")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn publishing_is_an_explicit_caller_choice() {
    let workspace = temp_dir("gradebook-grades-publish");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let sheet_id = create_sheet(&mut stdin, &mut reader);

    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.set",
        json!({ "sheetId": sheet_id, "studentId": "s1", "activityId": "a1", "value": 4.0 }),
    );
    assert_eq!(graded.get("published").and_then(|v| v.as_bool()), Some(false));

    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.set",
        json!({
            "sheetId": sheet_id, "studentId": "s2", "activityId": "a1",
            "value": 3.0, "publishSheet": true
        }),
    );
    assert_eq!(graded.get("published").and_then(|v| v.as_bool()), Some(true));

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "sheets.get",
        json!({ "sheetId": sheet_id }),
    );
    assert_eq!(
        fetched.pointer("/sheet/isPublished").and_then(|v| v.as_bool()),
        Some(true)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
