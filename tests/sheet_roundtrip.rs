mod test_support;

use calamine::{open_workbook, Data, Reader, Xlsx};
use serde_json::json;
use test_support::{
    attach_subject, create_semester_class, enroll_student, f64_field, install_default_scale,
    request_ok, select_workspace, spawn_sidecar, str_field, temp_dir,
};

#[test]
fn exported_sheet_reimports_without_changing_results() {
    let workspace = temp_dir("acadrec-sheet-roundtrip");
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

    let roster = [
        ("S-001", "Aung Aung", "01", (54.0, 32.0), (36.0, 36.0)), // 86 A, 72 B+ -> 3.48
        ("S-002", "Su Su", "02", (48.0, 40.0), (45.0, 45.0)),     // 88 A, 90 A+ -> 3.88
    ];
    let mut enrollments = Vec::new();
    for (admission, name, suffix, (m_exam, m_assign), (e_exam, e_assign)) in roster {
        let (_student_id, enrollment_id) = enroll_student(
            &mut stdin,
            &mut reader,
            &class_id,
            admission,
            name,
            Some(("1CST", suffix)),
        );
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "grades.submit",
            json!({
                "enrollmentId": enrollment_id,
                "marks": [
                    { "classSubjectId": myanmar, "examMark": m_exam, "assignMark": m_assign },
                    { "classSubjectId": english, "examMark": e_exam, "assignMark": e_assign }
                ]
            }),
        );
        enrollments.push(enrollment_id);
    }

    let sheet_path = workspace.join("first-year-cst.xlsx");
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "results.exportSheet",
        json!({ "classId": class_id, "path": sheet_path.to_string_lossy() }),
    );
    assert_eq!(exported.get("rowCount").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(exported.get("subjectCount").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(exported.get("schemaVersion").and_then(|v| v.as_i64()), Some(1));

    // The file follows the fixed column contract.
    let mut workbook: Xlsx<_> = open_workbook(&sheet_path).expect("open exported sheet");
    let range = workbook
        .worksheet_range_at(0)
        .expect("first sheet")
        .expect("readable sheet");
    let rows: Vec<_> = range.rows().collect();
    assert_eq!(rows.len(), 3);

    let header: Vec<String> = rows[0].iter().map(|c| c.to_string()).collect();
    assert_eq!(
        &header[..4],
        &["Admission ID", "Roll Number", "", "Student Name"]
    );
    assert_eq!(
        &header[4..11],
        &[
            "English", "E-101 50%", "E-101 50%", "E-101 100%", "E-101 Grade", "E-101 Score",
            "E-101 GP"
        ]
    );
    assert_eq!(&header[18..21], &["Total GP", "GPA", "Status"]);

    // First data row: roll 1CST-01, Myanmar block is columns 11..18.
    assert_eq!(rows[1][0], Data::String("S-001".into()));
    assert_eq!(rows[1][1], Data::String("1CST".into()));
    assert_eq!(rows[1][2], Data::String("01".into()));
    assert_eq!(rows[1][12], Data::Float(54.0));
    assert_eq!(rows[1][14], Data::Float(86.0));
    assert_eq!(rows[1][15], Data::String("A".into()));
    assert_eq!(rows[1][19], Data::Float(3.48));
    assert_eq!(rows[1][20], Data::String("PASS".into()));
    assert_eq!(rows[2][19], Data::Float(3.88));

    // Re-importing the unmodified sheet processes every row and leaves the
    // recomputed results where they were.
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "results.importSheet",
        json!({ "classId": class_id, "path": sheet_path.to_string_lossy() }),
    );
    assert_eq!(imported.get("processedCount").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(imported.get("totalRows").and_then(|v| v.as_i64()), Some(2));

    for (enrollment_id, want_gpa) in enrollments.iter().zip([3.48, 3.88]) {
        let fetched = request_ok(
            &mut stdin,
            &mut reader,
            "results.get",
            json!({ "enrollmentId": enrollment_id }),
        );
        let result = fetched.get("result").expect("result");
        assert_eq!(f64_field(result, "gpa"), want_gpa);
    }
}
