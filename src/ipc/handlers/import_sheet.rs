use crate::cache::topics;
use crate::grading::{self, compute_grade, SubjectWeighting};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, grading_err, required_str, validation_failed, CellError};
use crate::ipc::types::{AppState, Request};
use crate::roll;
use crate::sheet::{SheetLayout, SHEET_SCHEMA_VERSION};
use calamine::{open_workbook, Data, Range, Reader, Xlsx};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

/// Rows are written in batches of this size, one transaction per row. A bad
/// row poisons the rest of its batch but later batches still run.
const IMPORT_BATCH_SIZE: usize = 10;

fn cell_text(row: &[Data], col: usize) -> Option<String> {
    match row.get(col)? {
        Data::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        }
        Data::Float(f) => Some(f.to_string()),
        Data::Int(i) => Some(i.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn cell_number(row: &[Data], col: usize) -> Option<f64> {
    match row.get(col)? {
        Data::Float(f) => Some(*f),
        Data::Int(i) => Some(*i as f64),
        Data::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

struct PreparedRow {
    sheet_row: usize,
    enrollment_id: String,
    admission_id: String,
    marks: Vec<(String, f64, f64, SubjectWeighting)>,
    sheet_gpa: f64,
}

/// Validate every cell of every data row before touching the database. Any
/// error rejects the whole import so a half-checked sheet never lands.
fn validate_rows(
    conn: &Connection,
    class_id: &str,
    layout: &SheetLayout,
    range: &Range<Data>,
) -> Result<(Vec<PreparedRow>, Vec<CellError>), rusqlite::Error> {
    let mut errors = Vec::new();
    let mut prepared = Vec::new();

    let weightings: Vec<SubjectWeighting> = layout
        .subjects
        .iter()
        .map(|s| SubjectWeighting {
            credit_hours: s.credit_hours,
            exam_weight: s.exam_weight,
            assign_weight: s.assign_weight,
        })
        .collect();

    for (i, row) in range.rows().enumerate().skip(1) {
        let sheet_row = i + 1;
        // A fully blank row terminates nothing; it is just skipped.
        if row.iter().all(|c| matches!(c, Data::Empty)) {
            continue;
        }
        let mut row_errors = Vec::new();

        let enrollment: Option<(String, String)> = match cell_text(row, 0) {
            Some(admission_id) => {
                let found: Option<(String, String)> = conn
                    .query_row(
                        "SELECT e.id, st.admission_id
                         FROM students st
                         JOIN enrollments e ON e.student_id = st.id AND e.class_id = ?
                         WHERE st.admission_id = ?",
                        (class_id, &admission_id),
                        |r| Ok((r.get(0)?, r.get(1)?)),
                    )
                    .optional()?;
                if found.is_none() {
                    let student_exists: Option<String> = conn
                        .query_row(
                            "SELECT id FROM students WHERE admission_id = ?",
                            [&admission_id],
                            |r| r.get(0),
                        )
                        .optional()?;
                    row_errors.push(CellError {
                        row: sheet_row,
                        column: 1,
                        field: "admissionId".to_string(),
                        message: if student_exists.is_some() {
                            "student is not enrolled in this class".to_string()
                        } else {
                            "no student with this admission ID".to_string()
                        },
                        value: Some(admission_id),
                    });
                }
                found
            }
            None => {
                row_errors.push(CellError {
                    row: sheet_row,
                    column: 1,
                    field: "admissionId".to_string(),
                    message: "Admission ID is required".to_string(),
                    value: None,
                });
                None
            }
        };

        let prefix = cell_text(row, 1);
        let suffix = cell_text(row, 2);
        match (prefix, suffix) {
            (Some(p), Some(s)) => {
                if let Err(msg) = roll::combine(&p, &s) {
                    row_errors.push(CellError {
                        row: sheet_row,
                        column: 2,
                        field: "rollNumber".to_string(),
                        message: msg,
                        value: Some(format!("{p}-{s}")),
                    });
                }
            }
            (None, None) => {}
            (p, s) => {
                row_errors.push(CellError {
                    row: sheet_row,
                    column: if p.is_none() { 2 } else { 3 },
                    field: "rollNumber".to_string(),
                    message: "roll number needs both a prefix and a suffix".to_string(),
                    value: p.or(s),
                });
            }
        }

        if cell_text(row, 3).is_none() {
            row_errors.push(CellError {
                row: sheet_row,
                column: 4,
                field: "studentName".to_string(),
                message: "Student Name is required".to_string(),
                value: None,
            });
        }

        let mut marks = Vec::with_capacity(layout.subjects.len());
        for (si, subject) in layout.subjects.iter().enumerate() {
            let base = layout.subject_block_start(si);
            let weighting = &weightings[si];

            let exam = cell_number(row, base + 1);
            match exam {
                Some(v) if v.is_finite() && v >= 0.0 && v <= weighting.max_exam_mark() => {}
                Some(v) => row_errors.push(CellError {
                    row: sheet_row,
                    column: base + 2,
                    field: "examMark".to_string(),
                    message: format!(
                        "{} exam mark must be between 0 and {}",
                        subject.code,
                        weighting.max_exam_mark()
                    ),
                    value: Some(v.to_string()),
                }),
                None => row_errors.push(CellError {
                    row: sheet_row,
                    column: base + 2,
                    field: "examMark".to_string(),
                    message: format!("{} exam mark is required", subject.code),
                    value: cell_text(row, base + 1),
                }),
            }

            let assign = cell_number(row, base + 2);
            match assign {
                Some(v) if v.is_finite() && v >= 0.0 && v <= weighting.max_assign_mark() => {}
                Some(v) => row_errors.push(CellError {
                    row: sheet_row,
                    column: base + 3,
                    field: "assignMark".to_string(),
                    message: format!(
                        "{} assignment mark must be between 0 and {}",
                        subject.code,
                        weighting.max_assign_mark()
                    ),
                    value: Some(v.to_string()),
                }),
                None => row_errors.push(CellError {
                    row: sheet_row,
                    column: base + 3,
                    field: "assignMark".to_string(),
                    message: format!("{} assignment mark is required", subject.code),
                    value: cell_text(row, base + 2),
                }),
            }

            // Derived cells must be present so a truncated sheet is caught,
            // but their values are recomputed on this side regardless.
            let derived = [
                (base + 3, "finalMark", "final mark"),
                (base + 4, "grade", "grade"),
                (base + 5, "score", "score"),
                (base + 6, "gp", "GP"),
            ];
            for (col, field, label) in derived {
                if cell_text(row, col).is_none() {
                    row_errors.push(CellError {
                        row: sheet_row,
                        column: col + 1,
                        field: field.to_string(),
                        message: format!("{} {} is required", subject.code, label),
                        value: None,
                    });
                }
            }

            if let (Some(exam), Some(assign)) = (exam, assign) {
                marks.push((
                    subject.class_subject_id.clone(),
                    exam,
                    assign,
                    weighting.clone(),
                ));
            }
        }

        if cell_text(row, layout.total_gp_col()).is_none() {
            row_errors.push(CellError {
                row: sheet_row,
                column: layout.total_gp_col() + 1,
                field: "totalGp".to_string(),
                message: "Total GP is required".to_string(),
                value: None,
            });
        }
        let sheet_gpa = cell_number(row, layout.gpa_col());
        if sheet_gpa.is_none() {
            row_errors.push(CellError {
                row: sheet_row,
                column: layout.gpa_col() + 1,
                field: "gpa".to_string(),
                message: "GPA is required".to_string(),
                value: cell_text(row, layout.gpa_col()),
            });
        }

        if row_errors.is_empty() {
            // enrollment and sheet_gpa are both Some when no errors were
            // recorded for this row.
            if let (Some((enrollment_id, admission_id)), Some(sheet_gpa)) = (enrollment, sheet_gpa)
            {
                prepared.push(PreparedRow {
                    sheet_row,
                    enrollment_id,
                    admission_id,
                    marks,
                    sheet_gpa,
                });
            }
        } else {
            errors.extend(row_errors);
        }
    }

    Ok((prepared, errors))
}

fn apply_row(
    conn: &Connection,
    scale: &grading::GradeScale,
    row: &PreparedRow,
) -> Result<f64, grading::GradingError> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| grading::GradingError::new("db_tx_failed", e.to_string()))?;

    let stamp = chrono::Utc::now().to_rfc3339();
    for (class_subject_id, exam, assign, weighting) in &row.marks {
        let computed = compute_grade(*exam, *assign, weighting, scale);
        tx.execute(
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
                &row.enrollment_id,
                class_subject_id,
                exam,
                assign,
                computed.final_mark,
                &computed.grade,
                computed.score,
                computed.gp,
                &stamp,
            ),
        )
        .map_err(|e| grading::GradingError::new("db_insert_failed", e.to_string()))?;
    }

    let result = grading::recompute_result(&tx, &row.enrollment_id)?;

    tx.commit()
        .map_err(|e| grading::GradingError::new("db_commit_failed", e.to_string()))?;
    Ok(result.gpa)
}

/// Read a class mark sheet back in. Validation is exhaustive and rejects the
/// whole file; the write phase is per-row and partial failures are reported
/// through the processed count.
fn handle_results_import_sheet(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let path = match required_str(req, "path") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let scope: Option<(String, String)> = match conn
        .query_row(
            "SELECT c.semester_id, s.academic_year_id
             FROM classes c
             JOIN semesters s ON s.id = c.semester_id
             WHERE c.id = ?",
            [&class_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((semester_id, academic_year_id)) = scope else {
        return err(&req.id, "not_found", "class not found", None);
    };

    let layout = match super::export_sheet::class_layout(conn, &class_id) {
        Ok(l) => l,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if layout.subjects.is_empty() {
        return err(&req.id, "no_subjects", "class has no subjects attached", None);
    }

    let scale = match grading::load_scale(conn) {
        Ok(s) => s,
        Err(e) => return grading_err(req, e),
    };

    let mut workbook: Xlsx<_> = match open_workbook(&path) {
        Ok(wb) => wb,
        Err(e) => {
            return err(
                &req.id,
                "sheet_read_failed",
                e.to_string(),
                Some(json!({ "path": path })),
            )
        }
    };
    let range = match workbook.worksheet_range_at(0) {
        Some(Ok(r)) => r,
        Some(Err(e)) => {
            return err(
                &req.id,
                "sheet_read_failed",
                e.to_string(),
                Some(json!({ "path": path })),
            )
        }
        None => return err(&req.id, "sheet_read_failed", "workbook has no sheets", None),
    };

    let header_row: Vec<String> = match range.rows().next() {
        Some(cells) => cells
            .iter()
            .map(|c| match c {
                Data::String(s) => s.clone(),
                Data::Empty => String::new(),
                other => other.to_string(),
            })
            .collect(),
        None => return err(&req.id, "sheet_read_failed", "sheet is empty", None),
    };
    let header_errors: Vec<CellError> = layout
        .verify_headers(&header_row)
        .into_iter()
        .map(|(col, message)| CellError {
            row: 1,
            column: col + 1,
            field: "header".to_string(),
            message,
            value: header_row.get(col).cloned(),
        })
        .collect();
    if !header_errors.is_empty() {
        return validation_failed(req, &header_errors);
    }

    let (prepared, errors) = match validate_rows(conn, &class_id, &layout, &range) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !errors.is_empty() {
        return validation_failed(req, &errors);
    }

    let total_rows = prepared.len();
    let mut processed = 0usize;
    for batch in prepared.chunks(IMPORT_BATCH_SIZE) {
        for row in batch {
            match apply_row(conn, &scale, row) {
                Ok(server_gpa) => {
                    if (server_gpa - row.sheet_gpa).abs() > 0.005 {
                        warn!(
                            admission_id = %row.admission_id,
                            sheet_row = row.sheet_row,
                            sheet_gpa = row.sheet_gpa,
                            server_gpa,
                            "imported GPA diverges from recomputed GPA; stored the recomputed value"
                        );
                    }
                    processed += 1;
                }
                Err(e) => {
                    warn!(
                        admission_id = %row.admission_id,
                        sheet_row = row.sheet_row,
                        error = %e.message,
                        "import row failed; skipping the rest of its batch"
                    );
                    break;
                }
            }
        }
    }

    grading::refresh_ranks_best_effort(conn, &semester_id, &academic_year_id);

    state.cache.invalidate(topics::GRADES);
    state.cache.invalidate(topics::RESULTS);
    ok(
        &req.id,
        json!({
            "processedCount": processed,
            "totalRows": total_rows,
            "schemaVersion": SHEET_SCHEMA_VERSION
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.importSheet" => Some(handle_results_import_sheet(state, req)),
        _ => None,
    }
}
