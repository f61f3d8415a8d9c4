mod test_support;

use serde_json::json;
use test_support::{
    attach_subject, create_semester_class, enroll_student, f64_field, install_default_scale,
    request_ok, select_workspace, spawn_sidecar, str_field, temp_dir,
};

fn year_result(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    student_id: &str,
    year_id: &str,
) -> serde_json::Value {
    let fetched = request_ok(
        stdin,
        reader,
        "results.year",
        json!({ "studentId": student_id, "academicYearId": year_id }),
    );
    fetched.get("yearResult").cloned().expect("yearResult")
}

#[test]
fn year_completes_only_when_every_enrolled_semester_has_a_result() {
    let workspace = temp_dir("acadrec-year-completion");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    install_default_scale(&mut stdin, &mut reader);

    let year = request_ok(
        &mut stdin,
        &mut reader,
        "years.create",
        json!({ "name": "2025-2026" }),
    );
    let year_id = str_field(&year, "academicYearId");

    let (_sem1, class1) = create_semester_class(
        &mut stdin,
        &mut reader,
        &year_id,
        "Semester 1",
        1,
        "Second Year CS",
        "2CS",
    );
    let (_sem2, class2) = create_semester_class(
        &mut stdin,
        &mut reader,
        &year_id,
        "Semester 2",
        2,
        "Second Year CS",
        "2CS",
    );

    let subject1 = attach_subject(
        &mut stdin,
        &mut reader,
        &class1,
        "P-201",
        "Programming I",
        3.0,
        0.6,
        0.4,
    );
    let subject2 = attach_subject(
        &mut stdin,
        &mut reader,
        &class2,
        "P-202",
        "Programming II",
        3.0,
        0.6,
        0.4,
    );

    let (student_id, enrollment1) = enroll_student(
        &mut stdin,
        &mut reader,
        &class1,
        "S-010",
        "Mya Mya",
        Some(("2CS", "01")),
    );
    let enrollment2 = request_ok(
        &mut stdin,
        &mut reader,
        "enrollments.create",
        json!({ "studentId": student_id, "classId": class2 }),
    );
    let enrollment2 = str_field(&enrollment2, "enrollmentId");

    // First semester: 54 + 32 = 86 -> A 3.8.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "grades.submit",
        json!({
            "enrollmentId": enrollment1,
            "marks": [{ "classSubjectId": subject1, "examMark": 54.0, "assignMark": 32.0 }]
        }),
    );

    let partial = year_result(&mut stdin, &mut reader, &student_id, &year_id);
    assert_eq!(partial.get("semesterCount").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(partial.get("isComplete").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(partial.get("status").and_then(|v| v.as_str()), Some("PASS"));
    assert_eq!(f64_field(&partial, "overallGpa"), 3.8);

    // Second semester fails: 10 + 10 = 20 -> F 0.0. The year is now
    // complete and the failure propagates to the year status.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "grades.submit",
        json!({
            "enrollmentId": enrollment2,
            "marks": [{ "classSubjectId": subject2, "examMark": 10.0, "assignMark": 10.0 }]
        }),
    );

    let complete = year_result(&mut stdin, &mut reader, &student_id, &year_id);
    assert_eq!(complete.get("semesterCount").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(complete.get("isComplete").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(complete.get("status").and_then(|v| v.as_str()), Some("FAIL"));
    // (3.8*3 + 0.0*3) / 6
    assert_eq!(f64_field(&complete, "overallGpa"), 1.9);

    // Withdrawing the failed enrollment removes its result and shrinks the
    // expected semester set, so the year is complete and passing again.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "enrollments.delete",
        json!({ "enrollmentId": enrollment2 }),
    );

    let after = year_result(&mut stdin, &mut reader, &student_id, &year_id);
    assert_eq!(after.get("semesterCount").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(after.get("isComplete").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(after.get("status").and_then(|v| v.as_str()), Some("PASS"));
    assert_eq!(f64_field(&after, "overallGpa"), 3.8);
}
