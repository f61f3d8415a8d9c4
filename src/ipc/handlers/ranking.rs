use crate::cache::topics;
use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, grading_err, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

/// Explicit batch rank recompute. Unlike the post-submit refresh this one
/// reports failures to the caller.
fn handle_ranking_recompute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let scope = match required_str(req, "scope") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let ranked = match scope.as_str() {
        "semester" => grading::refresh_semester_ranks(conn, &id),
        "year" => grading::refresh_year_ranks(conn, &id),
        other => {
            return err(
                &req.id,
                "bad_params",
                "scope must be one of: semester, year",
                Some(json!({ "scope": other })),
            )
        }
    };

    match ranked {
        Ok(count) => {
            state.cache.invalidate(topics::RESULTS);
            ok(&req.id, json!({ "rankedCount": count }))
        }
        Err(e) => grading_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "ranking.recompute" => Some(handle_ranking_recompute(state, req)),
        _ => None,
    }
}
