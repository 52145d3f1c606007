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

fn request_ok(
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn listed_titles(result: &serde_json::Value) -> Vec<String> {
    result
        .get("sheets")
        .and_then(|v| v.as_array())
        .expect("sheets")
        .iter()
        .map(|s| {
            s.get("title")
                .and_then(|v| v.as_str())
                .expect("title")
                .to_string()
        })
        .collect()
}

#[test]
fn drafts_stay_invisible_until_published() {
    let workspace = temp_dir("gradebook-visibility");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "sheets.create",
        json!({
            "courseId": "c1",
            "courseName": "Algebra",
            "title": "Q1",
            "gradingPeriod": "quarter1",
            "weightPercentage": 50.0,
            "isPublished": true,
            "activities": [{"id": "a1", "name": "Exam", "type": "exam", "maxScore": 5.0}],
            "students": [{"studentId": "s1", "name": "One, Student"}]
        }),
    );
    let draft = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "sheets.create",
        json!({
            "courseId": "c1",
            "courseName": "Algebra",
            "title": "Q2 draft",
            "gradingPeriod": "quarter2",
            "weightPercentage": 50.0,
            "activities": [{"id": "b1", "name": "Exam", "type": "exam", "maxScore": 5.0}],
            "students": [{"studentId": "s1", "name": "One, Student"}]
        }),
    );
    let draft_id = draft
        .get("sheetId")
        .and_then(|v| v.as_str())
        .expect("sheetId")
        .to_string();

    // The draft carries a grade, but stays out of student-facing reads.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.set",
        json!({ "sheetId": draft_id, "studentId": "s1", "activityId": "b1", "value": 1.0 }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "sheets.listByCourse",
        json!({ "courseId": "c1" }),
    );
    assert_eq!(listed_titles(&listed), vec!["Q1".to_string()]);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "sheets.listByCourse",
        json!({ "courseId": "c1", "includeDrafts": true }),
    );
    assert_eq!(
        listed_titles(&listed),
        vec!["Q1".to_string(), "Q2 draft".to_string()]
    );

    let snap = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "course.studentSnapshot",
        json!({ "courseId": "c1", "studentId": "s1" }),
    );
    assert_eq!(
        snap.get("sheets").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1),
        "draft must not reach the student view"
    );

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "course.summary",
        json!({ "courseId": "c1", "includeDrafts": true }),
    );
    assert_eq!(
        summary.get("sheets").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(2)
    );

    // Publishing flips visibility without touching grades.
    let published = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "sheets.setPublished",
        json!({ "sheetId": draft_id, "published": true }),
    );
    let v1 = published
        .get("version")
        .and_then(|v| v.as_i64())
        .expect("version");
    let snap = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "course.studentSnapshot",
        json!({ "courseId": "c1", "studentId": "s1" }),
    );
    assert_eq!(
        snap.get("sheets").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(2)
    );

    // Publishing an already-published sheet changes nothing and skips the
    // store write.
    let published = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "sheets.setPublished",
        json!({ "sheetId": draft_id, "published": true }),
    );
    assert_eq!(published.get("version").and_then(|v| v.as_i64()), Some(v1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
