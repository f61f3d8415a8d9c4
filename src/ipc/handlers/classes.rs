use crate::cache::topics;
use crate::grading::{self, SubjectWeighting};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, grading_err, optional_str, required_f64, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    let semester_filter = optional_str(req, "semesterId");
    let sql = "SELECT
                 c.id,
                 c.semester_id,
                 c.name,
                 c.code,
                 (SELECT COUNT(*) FROM enrollments e WHERE e.class_id = c.id) AS student_count,
                 (SELECT COUNT(*) FROM class_subjects cs WHERE cs.class_id = c.id) AS subject_count
               FROM classes c
               WHERE (?1 IS NULL OR c.semester_id = ?1)
               ORDER BY c.name";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&semester_filter], |row| {
            let id: String = row.get(0)?;
            let semester_id: String = row.get(1)?;
            let name: String = row.get(2)?;
            let code: String = row.get(3)?;
            let student_count: i64 = row.get(4)?;
            let subject_count: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "semesterId": semester_id,
                "name": name,
                "code": code,
                "studentCount": student_count,
                "subjectCount": subject_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v.trim().to_ascii_uppercase(),
        Err(resp) => return resp,
    };
    if name.is_empty() || code.is_empty() {
        return err(&req.id, "bad_params", "name and code must not be empty", None);
    }

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM semesters WHERE id = ?", [&semester_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "semester not found", None);
    }

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, semester_id, name, code) VALUES(?, ?, ?, ?)",
        (&class_id, &semester_id, &name, &code),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    state.cache.invalidate(topics::CLASSES);
    ok(&req.id, json!({ "classId": class_id, "name": name, "code": code }))
}

/// Attach a subject to a class with its weighting. Weights are validated
/// here, once, so every downstream mark cap agrees with them.
fn handle_classes_attach_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let weighting = SubjectWeighting {
        credit_hours: match required_f64(req, "creditHours") {
            Ok(v) => v,
            Err(resp) => return resp,
        },
        exam_weight: match required_f64(req, "examWeight") {
            Ok(v) => v,
            Err(resp) => return resp,
        },
        assign_weight: match required_f64(req, "assignWeight") {
            Ok(v) => v,
            Err(resp) => return resp,
        },
    };
    if let Err(e) = weighting.validate() {
        return grading_err(req, e);
    }

    // Weighting is immutable once grades reference it; refuse re-attach when
    // any grade exists for this pair.
    let graded: Option<i64> = match conn
        .query_row(
            "SELECT 1
             FROM grades g
             JOIN class_subjects cs ON cs.id = g.class_subject_id
             WHERE cs.class_id = ? AND cs.subject_id = ?
             LIMIT 1",
            (&class_id, &subject_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if graded.is_some() {
        return err(
            &req.id,
            "weighting_locked",
            "subject already has grades; weighting cannot change",
            None,
        );
    }

    let class_subject_id = Uuid::new_v4().to_string();
    let res = conn.execute(
        "INSERT INTO class_subjects(id, class_id, subject_id, credit_hours, exam_weight, assign_weight)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(class_id, subject_id) DO UPDATE SET
           credit_hours = excluded.credit_hours,
           exam_weight = excluded.exam_weight,
           assign_weight = excluded.assign_weight",
        (
            &class_subject_id,
            &class_id,
            &subject_id,
            weighting.credit_hours,
            weighting.exam_weight,
            weighting.assign_weight,
        ),
    );
    if let Err(e) = res {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "class_subjects" })),
        );
    }

    let class_subject_id: String = match conn.query_row(
        "SELECT id FROM class_subjects WHERE class_id = ? AND subject_id = ?",
        (&class_id, &subject_id),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    state.cache.invalidate(topics::CLASSES);
    ok(&req.id, json!({ "classSubjectId": class_subject_id }))
}

fn handle_classes_subjects(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT cs.id, s.code, s.name, cs.credit_hours, cs.exam_weight, cs.assign_weight
         FROM class_subjects cs
         JOIN subjects s ON s.id = cs.subject_id
         WHERE cs.class_id = ?
         ORDER BY s.code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&class_id], |row| {
            let id: String = row.get(0)?;
            let code: String = row.get(1)?;
            let name: String = row.get(2)?;
            let credit_hours: f64 = row.get(3)?;
            let exam_weight: f64 = row.get(4)?;
            let assign_weight: f64 = row.get(5)?;
            Ok(json!({
                "classSubjectId": id,
                "code": code,
                "name": name,
                "creditHours": credit_hours,
                "examWeight": exam_weight,
                "assignWeight": assign_weight
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    // Year rollups of every enrolled student must be recomputed once the
    // class's results are gone.
    let affected: Vec<(String, String)> = match conn
        .prepare(
            "SELECT DISTINCT e.student_id, s.academic_year_id
             FROM enrollments e
             JOIN classes c ON c.id = e.class_id
             JOIN semesters s ON s.id = c.semester_id
             WHERE e.class_id = ?",
        )
        .and_then(|mut stmt| {
            stmt.query_map([&class_id], |r| Ok((r.get(0)?, r.get(1)?)))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        }) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute(
        "DELETE FROM grades
         WHERE enrollment_id IN (SELECT id FROM enrollments WHERE class_id = ?)",
        [&class_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "grades" })),
        );
    }

    if let Err(e) = tx.execute(
        "DELETE FROM results
         WHERE enrollment_id IN (SELECT id FROM enrollments WHERE class_id = ?)",
        [&class_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "results" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM enrollments WHERE class_id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM class_subjects WHERE class_id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "class_subjects" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM classes WHERE id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    for (student_id, year_id) in &affected {
        if let Err(e) = grading::recompute_year_result(&tx, student_id, year_id) {
            let _ = tx.rollback();
            return grading_err(req, e);
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    state.cache.invalidate(topics::CLASSES);
    state.cache.invalidate(topics::RESULTS);
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.attachSubject" => Some(handle_classes_attach_subject(state, req)),
        "classes.subjects" => Some(handle_classes_subjects(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
