use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::roll;
use rusqlite::OptionalExtension;
use serde_json::json;

/// Transcript data binding for the document renderer: which template to use
/// (by department code), the student header, the year rollup, and the
/// per-semester grade lists in semester order. Actual document rendering
/// lives with the UI layer.
fn handle_reports_transcript(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let academic_year_id = match required_str(req, "academicYearId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let student: Option<(String, Option<String>, String)> = match conn
        .query_row(
            "SELECT admission_id, roll_number, name FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((admission_id, roll_number, name)) = student else {
        return err(&req.id, "not_found", "student not found", None);
    };

    let year_name: Option<String> = match conn
        .query_row(
            "SELECT name FROM academic_years WHERE id = ?",
            [&academic_year_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(year_name) = year_name else {
        return err(&req.id, "not_found", "academic year not found", None);
    };

    let overall = match super::grades::year_result_json(conn, &student_id, &academic_year_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // One section per semester result, ordered by the name-derived semester
    // number (falling back to the configured sort order).
    let mut sem_stmt = match conn.prepare(
        "SELECT r.enrollment_id, s.name, c.name, c.code, s.sort_order,
                r.gpa, r.total_credits, r.total_gp, r.status, r.rank
         FROM results r
         JOIN enrollments e ON e.id = r.enrollment_id
         JOIN classes c ON c.id = e.class_id
         JOIN semesters s ON s.id = c.semester_id
         WHERE e.student_id = ? AND s.academic_year_id = ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    type SemRow = (
        String,
        String,
        String,
        String,
        i64,
        f64,
        f64,
        f64,
        String,
        Option<i64>,
    );
    let sem_rows: Vec<SemRow> = match sem_stmt
        .query_map((&student_id, &academic_year_id), |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
                r.get(6)?,
                r.get(7)?,
                r.get(8)?,
                r.get(9)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut class_code = String::new();
    let mut sections: Vec<(i64, serde_json::Value)> = Vec::with_capacity(sem_rows.len());
    for (enrollment_id, sem_name, cls_name, cls_code, sort_order, gpa, credits, gp, status, rank) in
        sem_rows
    {
        if class_code.is_empty() {
            class_code = cls_code.clone();
        }

        let grades: Vec<serde_json::Value> = match conn
            .prepare(
                "SELECT s.code, s.name, cs.credit_hours, g.final_mark, g.grade, g.gp
                 FROM grades g
                 JOIN class_subjects cs ON cs.id = g.class_subject_id
                 JOIN subjects s ON s.id = cs.subject_id
                 WHERE g.enrollment_id = ?
                 ORDER BY s.code",
            )
            .and_then(|mut stmt| {
                stmt.query_map([&enrollment_id], |r| {
                    let code: String = r.get(0)?;
                    let name: String = r.get(1)?;
                    let credit_hours: f64 = r.get(2)?;
                    let final_mark: f64 = r.get(3)?;
                    let grade: String = r.get(4)?;
                    let gp: f64 = r.get(5)?;
                    Ok(json!({
                        "subjectCode": code,
                        "subjectName": name,
                        "creditHours": credit_hours,
                        "finalMark": final_mark,
                        "grade": grade,
                        "gp": gp
                    }))
                })
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            }) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };

        let number = grading::semester_number_hint(&sem_name, &cls_name).unwrap_or(sort_order);
        sections.push((
            number,
            json!({
                "semesterName": sem_name,
                "className": cls_name,
                "semesterNumber": number,
                "gpa": gpa,
                "totalCredits": credits,
                "totalGp": gp,
                "status": status,
                "rank": rank,
                "grades": grades
            }),
        ));
    }
    sections.sort_by_key(|(number, _)| *number);
    let semesters: Vec<serde_json::Value> = sections.into_iter().map(|(_, v)| v).collect();

    // Template selection prefers the roll prefix, then the class code.
    let department_source = roll_number
        .as_deref()
        .and_then(roll::split)
        .map(|(prefix, _)| prefix)
        .unwrap_or(class_code);
    let template = roll::department_code(&department_source);

    ok(
        &req.id,
        json!({
            "template": template,
            "student": {
                "studentId": student_id,
                "admissionId": admission_id,
                "rollNumber": roll_number,
                "name": name
            },
            "academicYear": { "id": academic_year_id, "name": year_name },
            "overall": overall,
            "semesters": semesters
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.transcript" => Some(handle_reports_transcript(state, req)),
        _ => None,
    }
}
