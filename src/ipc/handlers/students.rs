use crate::cache::topics;
use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, grading_err, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::roll;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, admission_id, roll_number, name
         FROM students
         ORDER BY roll_number, admission_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let admission_id: String = row.get(1)?;
            let roll_number: Option<String> = row.get(2)?;
            let name: String = row.get(3)?;
            Ok(json!({
                "id": id,
                "admissionId": admission_id,
                "rollNumber": roll_number,
                "name": name
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let admission_id = match required_str(req, "admissionId") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    if admission_id.is_empty() || name.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "admissionId and name must not be empty",
            None,
        );
    }

    // Roll number arrives as prefix + suffix and is stored recombined.
    let roll_number = match (optional_str(req, "rollPrefix"), optional_str(req, "rollSuffix")) {
        (Some(prefix), Some(suffix)) => match roll::combine(&prefix, &suffix) {
            Ok(v) => Some(v),
            Err(msg) => return err(&req.id, "bad_roll_number", msg, None),
        },
        (None, None) => None,
        _ => {
            return err(
                &req.id,
                "bad_params",
                "rollPrefix and rollSuffix must be supplied together",
                None,
            )
        }
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, admission_id, roll_number, name, updated_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &student_id,
            &admission_id,
            &roll_number,
            &name,
            chrono::Utc::now().to_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    state.cache.invalidate(topics::STUDENTS);
    ok(
        &req.id,
        json!({ "studentId": student_id, "admissionId": admission_id, "rollNumber": roll_number }),
    )
}

fn handle_enrollments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    for (table, id) in [("students", &student_id), ("classes", &class_id)] {
        let exists: Option<i64> = match conn
            .query_row(&format!("SELECT 1 FROM {} WHERE id = ?", table), [id], |r| {
                r.get(0)
            })
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists.is_none() {
            return err(&req.id, "not_found", format!("{} row not found", table), None);
        }
    }

    let enrollment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO enrollments(id, student_id, class_id) VALUES(?, ?, ?)
         ON CONFLICT(student_id, class_id) DO NOTHING",
        (&enrollment_id, &student_id, &class_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        );
    }

    let enrollment_id: String = match conn.query_row(
        "SELECT id FROM enrollments WHERE student_id = ? AND class_id = ?",
        (&student_id, &class_id),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    state.cache.invalidate(topics::STUDENTS);
    ok(&req.id, json!({ "enrollmentId": enrollment_id }))
}

fn handle_enrollments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT e.id, st.id, st.admission_id, st.roll_number, st.name
         FROM enrollments e
         JOIN students st ON st.id = e.student_id
         WHERE e.class_id = ?
         ORDER BY st.roll_number, st.admission_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&class_id], |row| {
            let enrollment_id: String = row.get(0)?;
            let student_id: String = row.get(1)?;
            let admission_id: String = row.get(2)?;
            let roll_number: Option<String> = row.get(3)?;
            let name: String = row.get(4)?;
            Ok(json!({
                "enrollmentId": enrollment_id,
                "studentId": student_id,
                "admissionId": admission_id,
                "rollNumber": roll_number,
                "name": name
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(enrollments) => ok(&req.id, json!({ "enrollments": enrollments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Withdraw an enrollment: cascade its grades and result, then recompute the
/// student's year rollup without it.
fn handle_enrollments_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let enrollment_id = match required_str(req, "enrollmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let scope: Option<(String, String)> = match conn
        .query_row(
            "SELECT e.student_id, s.academic_year_id
             FROM enrollments e
             JOIN classes c ON c.id = e.class_id
             JOIN semesters s ON s.id = c.semester_id
             WHERE e.id = ?",
            [&enrollment_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((student_id, academic_year_id)) = scope else {
        return err(&req.id, "not_found", "enrollment not found", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    for (sql, table) in [
        ("DELETE FROM grades WHERE enrollment_id = ?", "grades"),
        ("DELETE FROM results WHERE enrollment_id = ?", "results"),
        ("DELETE FROM enrollments WHERE id = ?", "enrollments"),
    ] {
        if let Err(e) = tx.execute(sql, [&enrollment_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = grading::recompute_year_result(&tx, &student_id, &academic_year_id) {
        let _ = tx.rollback();
        return grading_err(req, e);
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    state.cache.invalidate(topics::STUDENTS);
    state.cache.invalidate(topics::RESULTS);
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "enrollments.create" => Some(handle_enrollments_create(state, req)),
        "enrollments.list" => Some(handle_enrollments_list(state, req)),
        "enrollments.delete" => Some(handle_enrollments_delete(state, req)),
        _ => None,
    }
}
