#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_id() -> String {
    NEXT_ID.fetch_add(1, Ordering::Relaxed).to_string()
}

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
    let exe = env!("CARGO_BIN_EXE_acadrecd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn acadrecd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn raw_request(
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
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let id = next_id();
    let value = raw_request(stdin, reader, &id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let id = next_id();
    let value = raw_request(stdin, reader, &id, method, params);
    assert!(
        !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error object")
}

pub fn str_field(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing string field {} in {}", key, value))
        .to_string()
}

pub fn f64_field(value: &serde_json::Value, key: &str) -> f64 {
    value
        .get(key)
        .and_then(|v| v.as_f64())
        .unwrap_or_else(|| panic!("missing numeric field {} in {}", key, value))
}

pub fn select_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) {
    let _ = request_ok(
        stdin,
        reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
}

/// The scale used across the integration tests: F below 50, then four
/// passing letter bands up to A+.
pub fn install_default_scale(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) {
    let result = request_ok(
        stdin,
        reader,
        "scale.replace",
        json!({
            "bands": [
                { "minMark": 0.0, "maxMark": 49.0, "grade": "F", "score": 0.0 },
                { "minMark": 50.0, "maxMark": 59.0, "grade": "C", "score": 2.0 },
                { "minMark": 60.0, "maxMark": 69.0, "grade": "B", "score": 2.67 },
                { "minMark": 70.0, "maxMark": 79.0, "grade": "B+", "score": 3.0 },
                { "minMark": 80.0, "maxMark": 89.0, "grade": "A", "score": 3.8 },
                { "minMark": 90.0, "maxMark": 100.0, "grade": "A+", "score": 4.0 }
            ]
        }),
    );
    assert_eq!(result.get("bandCount").and_then(|v| v.as_i64()), Some(6));
}

pub fn create_semester_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    year_id: &str,
    semester_name: &str,
    sort_order: i64,
    class_name: &str,
    class_code: &str,
) -> (String, String) {
    let semester = request_ok(
        stdin,
        reader,
        "semesters.create",
        json!({ "academicYearId": year_id, "name": semester_name, "sortOrder": sort_order }),
    );
    let semester_id = str_field(&semester, "semesterId");
    let class = request_ok(
        stdin,
        reader,
        "classes.create",
        json!({ "semesterId": semester_id, "name": class_name, "code": class_code }),
    );
    (semester_id, str_field(&class, "classId"))
}

pub fn attach_subject(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    class_id: &str,
    code: &str,
    name: &str,
    credit_hours: f64,
    exam_weight: f64,
    assign_weight: f64,
) -> String {
    let subject = request_ok(
        stdin,
        reader,
        "subjects.create",
        json!({ "code": code, "name": name }),
    );
    let subject_id = str_field(&subject, "subjectId");
    let attached = request_ok(
        stdin,
        reader,
        "classes.attachSubject",
        json!({
            "classId": class_id,
            "subjectId": subject_id,
            "creditHours": credit_hours,
            "examWeight": exam_weight,
            "assignWeight": assign_weight
        }),
    );
    str_field(&attached, "classSubjectId")
}

pub fn enroll_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    class_id: &str,
    admission_id: &str,
    name: &str,
    roll: Option<(&str, &str)>,
) -> (String, String) {
    let mut params = json!({ "admissionId": admission_id, "name": name });
    if let Some((prefix, suffix)) = roll {
        params["rollPrefix"] = json!(prefix);
        params["rollSuffix"] = json!(suffix);
    }
    let student = request_ok(stdin, reader, "students.create", params);
    let student_id = str_field(&student, "studentId");
    let enrollment = request_ok(
        stdin,
        reader,
        "enrollments.create",
        json!({ "studentId": student_id, "classId": class_id }),
    );
    (student_id, str_field(&enrollment, "enrollmentId"))
}
