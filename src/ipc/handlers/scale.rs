use crate::cache::topics;
use crate::grading::{GradeScale, ScaleBand};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, grading_err};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_scale_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT min_mark, max_mark, grade, score FROM grade_scale ORDER BY min_mark DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(ScaleBand {
                min_mark: row.get(0)?,
                max_mark: row.get(1)?,
                grade: row.get(2)?,
                score: row.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(bands) => ok(&req.id, json!({ "bands": bands })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Replace the whole scale at once. The band set is validated as a unit
/// (cover [0,100], no gaps, no overlaps) before anything is written.
fn handle_scale_replace(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let bands: Vec<ScaleBand> = match req
        .params
        .get("bands")
        .map(|v| serde_json::from_value(v.clone()))
    {
        Some(Ok(v)) => v,
        Some(Err(e)) => {
            return err(
                &req.id,
                "bad_params",
                format!("bands must be an array of scale bands: {e}"),
                None,
            )
        }
        None => return err(&req.id, "bad_params", "missing bands", None),
    };

    let scale = match GradeScale::new(bands) {
        Ok(s) => s,
        Err(e) => return grading_err(req, e),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute("DELETE FROM grade_scale", []) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    for band in scale.bands() {
        if let Err(e) = tx.execute(
            "INSERT INTO grade_scale(id, min_mark, max_mark, grade, score) VALUES(?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                band.min_mark,
                band.max_mark,
                &band.grade,
                band.score,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "grade_scale" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    state.cache.invalidate(topics::SCALE);
    ok(&req.id, json!({ "bandCount": scale.bands().len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scale.get" => Some(handle_scale_get(state, req)),
        "scale.replace" => Some(handle_scale_replace(state, req)),
        _ => None,
    }
}
