mod test_support;

use serde_json::json;
use test_support::{
    attach_subject, create_semester_class, enroll_student, f64_field, install_default_scale,
    request_ok, select_workspace, spawn_sidecar, str_field, temp_dir,
};

#[test]
fn submit_computes_result_and_year_rollup() {
    let workspace = temp_dir("acadrec-grade-pipeline");
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
    let (_semester_id, class_id) = create_semester_class(
        &mut stdin,
        &mut reader,
        &year_id,
        "Semester 1",
        1,
        "First Year CST",
        "1CST",
    );

    let myanmar = attach_subject(
        &mut stdin,
        &mut reader,
        &class_id,
        "M-101",
        "Myanmar",
        3.0,
        0.6,
        0.4,
    );
    let english = attach_subject(
        &mut stdin,
        &mut reader,
        &class_id,
        "E-101",
        "English",
        2.0,
        0.5,
        0.5,
    );

    let (student_id, enrollment_id) = enroll_student(
        &mut stdin,
        &mut reader,
        &class_id,
        "S-001",
        "Aung Aung",
        Some(("1cst", "07")),
    );

    // 54/60 + 32/40 -> 86 -> A 3.8; 36/50 + 36/50 -> 72 -> B+ 3.0.
    // Credit-weighted: (3.8*3 + 3.0*2) / 5 = 3.48.
    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "grades.submit",
        json!({
            "enrollmentId": enrollment_id,
            "marks": [
                { "classSubjectId": myanmar, "examMark": 54.0, "assignMark": 32.0 },
                { "classSubjectId": english, "examMark": 36.0, "assignMark": 36.0 }
            ]
        }),
    );
    let result = submitted.get("result").expect("result");
    assert_eq!(f64_field(result, "gpa"), 3.48);
    assert_eq!(f64_field(result, "totalCredits"), 5.0);
    assert_eq!(f64_field(result, "totalGp"), 17.4);
    assert_eq!(result.get("status").and_then(|v| v.as_str()), Some("PASS"));

    let year_result = submitted.get("yearResult").expect("yearResult");
    assert_eq!(f64_field(year_result, "overallGpa"), 3.48);
    assert_eq!(
        year_result.get("semesterCount").and_then(|v| v.as_i64()),
        Some(1)
    );
    // The student's only enrollment is in this semester, so one result
    // already completes the year.
    assert_eq!(
        year_result.get("isComplete").and_then(|v| v.as_bool()),
        Some(true)
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "grades.list",
        json!({ "enrollmentId": enrollment_id }),
    );
    let grades = listed.get("grades").and_then(|v| v.as_array()).expect("grades");
    assert_eq!(grades.len(), 2);
    assert_eq!(
        grades[0].get("subjectCode").and_then(|v| v.as_str()),
        Some("E-101")
    );
    assert_eq!(f64_field(&grades[1], "finalMark"), 86.0);
    assert_eq!(grades[1].get("grade").and_then(|v| v.as_str()), Some("A"));

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "results.get",
        json!({ "enrollmentId": enrollment_id }),
    );
    let stored = fetched.get("result").expect("stored result");
    assert_eq!(f64_field(stored, "gpa"), 3.48);
    assert_eq!(stored.get("rank").and_then(|v| v.as_i64()), Some(1));

    // Resubmitting replaces the stored marks and recomputes everything.
    // English drops to 40 -> F 0.0, so the semester fails and the GPA
    // becomes (3.8*3 + 0) / 5 = 2.28.
    let resubmitted = request_ok(
        &mut stdin,
        &mut reader,
        "grades.submit",
        json!({
            "enrollmentId": enrollment_id,
            "marks": [
                { "classSubjectId": english, "examMark": 20.0, "assignMark": 20.0 }
            ]
        }),
    );
    let result = resubmitted.get("result").expect("result");
    assert_eq!(f64_field(result, "gpa"), 2.28);
    assert_eq!(result.get("status").and_then(|v| v.as_str()), Some("FAIL"));
    let year_result = resubmitted.get("yearResult").expect("yearResult");
    assert_eq!(year_result.get("status").and_then(|v| v.as_str()), Some("FAIL"));

    let by_year = request_ok(
        &mut stdin,
        &mut reader,
        "results.year",
        json!({ "studentId": student_id, "academicYearId": year_id }),
    );
    assert_eq!(
        f64_field(by_year.get("yearResult").expect("yearResult"), "overallGpa"),
        2.28
    );
}

#[test]
fn ungraded_enrollment_displays_as_incomplete() {
    let workspace = temp_dir("acadrec-ungraded");
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
    let (_semester_id, class_id) = create_semester_class(
        &mut stdin,
        &mut reader,
        &year_id,
        "Semester 1",
        1,
        "Second Year CS",
        "2CS",
    );
    attach_subject(
        &mut stdin,
        &mut reader,
        &class_id,
        "M-201",
        "Myanmar II",
        3.0,
        0.6,
        0.4,
    );
    let (_student_id, enrollment_id) = enroll_student(
        &mut stdin,
        &mut reader,
        &class_id,
        "S-002",
        "Su Su",
        None,
    );

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "results.get",
        json!({ "enrollmentId": enrollment_id }),
    );
    assert!(fetched.get("result").map(|v| v.is_null()).unwrap_or(false));
    assert_eq!(
        fetched.get("displayStatus").and_then(|v| v.as_str()),
        Some("INCOMPLETE")
    );
}
