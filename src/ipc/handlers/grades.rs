use crate::cache::topics;
use crate::grading::{self, compute_grade, SubjectWeighting};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, grading_err, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkEntry {
    class_subject_id: String,
    exam_mark: f64,
    assign_mark: f64,
}

#[derive(Debug, Clone)]
struct EnrollmentScope {
    student_id: String,
    class_id: String,
    semester_id: String,
    academic_year_id: String,
}

fn enrollment_scope(
    conn: &Connection,
    enrollment_id: &str,
) -> Result<Option<EnrollmentScope>, rusqlite::Error> {
    conn.query_row(
        "SELECT e.student_id, e.class_id, c.semester_id, s.academic_year_id
         FROM enrollments e
         JOIN classes c ON c.id = e.class_id
         JOIN semesters s ON s.id = c.semester_id
         WHERE e.id = ?",
        [enrollment_id],
        |r| {
            Ok(EnrollmentScope {
                student_id: r.get(0)?,
                class_id: r.get(1)?,
                semester_id: r.get(2)?,
                academic_year_id: r.get(3)?,
            })
        },
    )
    .optional()
}

/// Upsert one enrollment's marks, recompute its grades and result, roll the
/// academic year up — one transaction, then a best-effort rank refresh.
fn handle_grades_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let enrollment_id = match required_str(req, "enrollmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let marks: Vec<MarkEntry> = match req
        .params
        .get("marks")
        .map(|v| serde_json::from_value(v.clone()))
    {
        Some(Ok(v)) => v,
        Some(Err(e)) => {
            return err(
                &req.id,
                "bad_params",
                format!("marks must be an array of mark entries: {e}"),
                None,
            )
        }
        None => return err(&req.id, "bad_params", "missing marks", None),
    };
    if marks.is_empty() {
        return err(&req.id, "bad_params", "marks must not be empty", None);
    }

    let scale = match grading::load_scale(conn) {
        Ok(s) => s,
        Err(e) => return grading_err(req, e),
    };

    let scope = match enrollment_scope(conn, &enrollment_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "enrollment not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Resolve each mark's weighting and range-check before writing anything.
    let mut prepared: Vec<(MarkEntry, SubjectWeighting)> = Vec::with_capacity(marks.len());
    for m in marks {
        let weighting: Option<SubjectWeighting> = match conn
            .query_row(
                "SELECT credit_hours, exam_weight, assign_weight
                 FROM class_subjects
                 WHERE id = ? AND class_id = ?",
                (&m.class_subject_id, &scope.class_id),
                |r| {
                    Ok(SubjectWeighting {
                        credit_hours: r.get(0)?,
                        exam_weight: r.get(1)?,
                        assign_weight: r.get(2)?,
                    })
                },
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let Some(weighting) = weighting else {
            return err(
                &req.id,
                "not_found",
                "class subject not found for this enrollment's class",
                Some(json!({ "classSubjectId": m.class_subject_id })),
            );
        };

        if !m.exam_mark.is_finite() || m.exam_mark < 0.0 || m.exam_mark > weighting.max_exam_mark()
        {
            return err(
                &req.id,
                "bad_marks",
                format!("exam mark must be between 0 and {}", weighting.max_exam_mark()),
                Some(json!({ "classSubjectId": m.class_subject_id, "examMark": m.exam_mark })),
            );
        }
        if !m.assign_mark.is_finite()
            || m.assign_mark < 0.0
            || m.assign_mark > weighting.max_assign_mark()
        {
            return err(
                &req.id,
                "bad_marks",
                format!(
                    "assignment mark must be between 0 and {}",
                    weighting.max_assign_mark()
                ),
                Some(json!({ "classSubjectId": m.class_subject_id, "assignMark": m.assign_mark })),
            );
        }
        prepared.push((m, weighting));
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let stamp = chrono::Utc::now().to_rfc3339();
    for (m, weighting) in &prepared {
        let computed = compute_grade(m.exam_mark, m.assign_mark, weighting, &scale);
        let res = tx.execute(
            "INSERT INTO grades(id, enrollment_id, class_subject_id, exam_mark, assign_mark, final_mark, grade, score, gp, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(enrollment_id, class_subject_id) DO UPDATE SET
               exam_mark = excluded.exam_mark,
               assign_mark = excluded.assign_mark,
               final_mark = excluded.final_mark,
               grade = excluded.grade,
               score = excluded.score,
               gp = excluded.gp,
               updated_at = excluded.updated_at",
            (
                Uuid::new_v4().to_string(),
                &enrollment_id,
                &m.class_subject_id,
                m.exam_mark,
                m.assign_mark,
                computed.final_mark,
                &computed.grade,
                computed.score,
                computed.gp,
                &stamp,
            ),
        );
        if let Err(e) = res {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "grades" })),
            );
        }
    }

    let result = match grading::recompute_result(&tx, &enrollment_id) {
        Ok(r) => r,
        Err(e) => {
            let _ = tx.rollback();
            return grading_err(req, e);
        }
    };

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    // Ranks are refreshed outside the transaction; failures never undo the
    // submission.
    grading::refresh_ranks_best_effort(conn, &scope.semester_id, &scope.academic_year_id);

    let year = match year_result_json(conn, &scope.student_id, &scope.academic_year_id) {
        Ok(Some(v)) => v,
        Ok(None) => serde_json::Value::Null,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    state.cache.invalidate(topics::GRADES);
    state.cache.invalidate(topics::RESULTS);
    ok(
        &req.id,
        json!({ "result": result, "yearResult": year }),
    )
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let enrollment_id = match required_str(req, "enrollmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT g.class_subject_id, s.code, s.name, cs.credit_hours,
                g.exam_mark, g.assign_mark, g.final_mark, g.grade, g.score, g.gp
         FROM grades g
         JOIN class_subjects cs ON cs.id = g.class_subject_id
         JOIN subjects s ON s.id = cs.subject_id
         WHERE g.enrollment_id = ?
         ORDER BY s.code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&enrollment_id], |row| {
            let class_subject_id: String = row.get(0)?;
            let code: String = row.get(1)?;
            let name: String = row.get(2)?;
            let credit_hours: f64 = row.get(3)?;
            let exam_mark: f64 = row.get(4)?;
            let assign_mark: f64 = row.get(5)?;
            let final_mark: f64 = row.get(6)?;
            let grade: String = row.get(7)?;
            let score: f64 = row.get(8)?;
            let gp: f64 = row.get(9)?;
            Ok(json!({
                "classSubjectId": class_subject_id,
                "subjectCode": code,
                "subjectName": name,
                "creditHours": credit_hours,
                "examMark": exam_mark,
                "assignMark": assign_mark,
                "finalMark": final_mark,
                "grade": grade,
                "score": score,
                "gp": gp
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(grades) => ok(&req.id, json!({ "grades": grades })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_results_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let enrollment_id = match required_str(req, "enrollmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let row = conn
        .query_row(
            "SELECT id, gpa, total_credits, total_gp, status, rank, academic_year_result_id
             FROM results
             WHERE enrollment_id = ?",
            [&enrollment_id],
            |r| {
                let id: String = r.get(0)?;
                let gpa: f64 = r.get(1)?;
                let total_credits: f64 = r.get(2)?;
                let total_gp: f64 = r.get(3)?;
                let status: String = r.get(4)?;
                let rank: Option<i64> = r.get(5)?;
                let year_result_id: Option<String> = r.get(6)?;
                Ok(json!({
                    "resultId": id,
                    "enrollmentId": enrollment_id,
                    "gpa": gpa,
                    "totalCredits": total_credits,
                    "totalGp": total_gp,
                    "status": status,
                    "rank": rank,
                    "academicYearResultId": year_result_id
                }))
            },
        )
        .optional();

    match row {
        // No result yet renders as INCOMPLETE; that state is never stored.
        Ok(None) => ok(&req.id, json!({ "result": null, "displayStatus": "INCOMPLETE" })),
        Ok(Some(result)) => ok(&req.id, json!({ "result": result })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub(super) fn year_result_json(
    conn: &Connection,
    student_id: &str,
    academic_year_id: &str,
) -> Result<Option<serde_json::Value>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, overall_gpa, total_credits, total_gp, semester_count, is_complete, status, year_rank
         FROM academic_year_results
         WHERE student_id = ? AND academic_year_id = ?",
        (student_id, academic_year_id),
        |r| {
            let id: String = r.get(0)?;
            let overall_gpa: f64 = r.get(1)?;
            let total_credits: f64 = r.get(2)?;
            let total_gp: f64 = r.get(3)?;
            let semester_count: i64 = r.get(4)?;
            let is_complete: i64 = r.get(5)?;
            let status: String = r.get(6)?;
            let year_rank: Option<i64> = r.get(7)?;
            Ok(json!({
                "yearResultId": id,
                "studentId": student_id,
                "academicYearId": academic_year_id,
                "overallGpa": overall_gpa,
                "totalCredits": total_credits,
                "totalGp": total_gp,
                "semesterCount": semester_count,
                "isComplete": is_complete != 0,
                "status": status,
                "yearRank": year_rank
            }))
        },
    )
    .optional()
}

fn handle_results_year(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    match year_result_json(conn, &student_id, &academic_year_id) {
        Ok(Some(year)) => ok(&req.id, json!({ "yearResult": year })),
        Ok(None) => ok(&req.id, json!({ "yearResult": null })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.submit" => Some(handle_grades_submit(state, req)),
        "grades.list" => Some(handle_grades_list(state, req)),
        "results.get" => Some(handle_results_get(state, req)),
        "results.year" => Some(handle_results_year(state, req)),
        _ => None,
    }
}
