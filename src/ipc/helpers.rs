use rusqlite::Connection;
use serde_json::json;

use super::error::err;
use super::types::{AppState, Request};
use crate::grading::GradingError;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

pub fn required_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing numeric {}", key), None))
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn grading_err(req: &Request, e: GradingError) -> serde_json::Value {
    err(&req.id, &e.code, e.message, e.details)
}

/// Per-cell import validation error, collected exhaustively before any write.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellError {
    pub row: usize,
    pub column: usize,
    pub field: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

pub fn validation_failed(req: &Request, errors: &[CellError]) -> serde_json::Value {
    err(
        &req.id,
        "validation_failed",
        format!("import rejected: {} validation error(s)", errors.len()),
        Some(json!({ "errors": errors })),
    )
}
