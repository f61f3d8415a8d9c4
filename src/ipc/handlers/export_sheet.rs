use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::roll;
use crate::sheet::{SheetLayout, SubjectColumn, SHEET_SCHEMA_VERSION};
use rusqlite::{Connection, OptionalExtension};
use rust_xlsxwriter::Workbook;
use serde_json::json;
use std::collections::HashMap;

/// Build the sheet layout for a class from its attached subjects, in the
/// same subject order the exporter and importer both rely on.
pub(super) fn class_layout(
    conn: &Connection,
    class_id: &str,
) -> Result<SheetLayout, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT cs.id, s.code, s.name, cs.credit_hours, cs.exam_weight, cs.assign_weight
         FROM class_subjects cs
         JOIN subjects s ON s.id = cs.subject_id
         WHERE cs.class_id = ?
         ORDER BY s.code",
    )?;
    let subjects = stmt
        .query_map([class_id], |r| {
            Ok(SubjectColumn {
                class_subject_id: r.get(0)?,
                code: r.get(1)?,
                name: r.get(2)?,
                credit_hours: r.get(3)?,
                exam_weight: r.get(4)?,
                assign_weight: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SheetLayout::new(subjects))
}

struct GradeCells {
    exam_mark: f64,
    assign_mark: f64,
    final_mark: f64,
    grade: String,
    score: f64,
    gp: f64,
}

struct ExportRow {
    admission_id: String,
    roll_number: Option<String>,
    name: String,
    grades: HashMap<String, GradeCells>,
    total_gp: Option<f64>,
    gpa: Option<f64>,
    status: Option<String>,
}

fn collect_rows(
    conn: &Connection,
    class_id: &str,
) -> Result<Vec<ExportRow>, rusqlite::Error> {
    let mut enr_stmt = conn.prepare(
        "SELECT e.id, st.admission_id, st.roll_number, st.name
         FROM enrollments e
         JOIN students st ON st.id = e.student_id
         WHERE e.class_id = ?
         ORDER BY st.roll_number, st.admission_id",
    )?;
    let enrollments: Vec<(String, String, Option<String>, String)> = enr_stmt
        .query_map([class_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut grade_stmt = conn.prepare(
        "SELECT class_subject_id, exam_mark, assign_mark, final_mark, grade, score, gp
         FROM grades
         WHERE enrollment_id = ?",
    )?;
    let mut result_stmt = conn.prepare(
        "SELECT total_gp, gpa, status FROM results WHERE enrollment_id = ?",
    )?;

    let mut rows = Vec::with_capacity(enrollments.len());
    for (enrollment_id, admission_id, roll_number, name) in enrollments {
        let grades: HashMap<String, GradeCells> = grade_stmt
            .query_map([&enrollment_id], |r| {
                let class_subject_id: String = r.get(0)?;
                Ok((
                    class_subject_id,
                    GradeCells {
                        exam_mark: r.get(1)?,
                        assign_mark: r.get(2)?,
                        final_mark: r.get(3)?,
                        grade: r.get(4)?,
                        score: r.get(5)?,
                        gp: r.get(6)?,
                    },
                ))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;

        let summary: Option<(f64, f64, String)> = result_stmt
            .query_row([&enrollment_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .optional()?;
        let (total_gp, gpa, status) = match summary {
            Some((t, g, s)) => (Some(t), Some(g), Some(s)),
            None => (None, None, None),
        };

        rows.push(ExportRow {
            admission_id,
            roll_number,
            name,
            grades,
            total_gp,
            gpa,
            status,
        });
    }
    Ok(rows)
}

fn write_sheet(
    path: &str,
    layout: &SheetLayout,
    rows: &[ExportRow],
) -> Result<(), rust_xlsxwriter::XlsxError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();

    for (col, text) in layout.headers().iter().enumerate() {
        sheet.write_string(0, col as u16, text)?;
    }

    for (i, row) in rows.iter().enumerate() {
        let r = (i + 1) as u32;
        sheet.write_string(r, 0, &row.admission_id)?;
        if let Some((prefix, suffix)) = row.roll_number.as_deref().and_then(roll::split) {
            sheet.write_string(r, 1, &prefix)?;
            sheet.write_string(r, 2, &suffix)?;
        }
        sheet.write_string(r, 3, &row.name)?;

        for (si, subject) in layout.subjects.iter().enumerate() {
            let Some(cells) = row.grades.get(&subject.class_subject_id) else {
                continue;
            };
            let base = layout.subject_block_start(si) as u16;
            sheet.write_string(r, base, &subject.name)?;
            sheet.write_number(r, base + 1, cells.exam_mark)?;
            sheet.write_number(r, base + 2, cells.assign_mark)?;
            sheet.write_number(r, base + 3, cells.final_mark)?;
            sheet.write_string(r, base + 4, &cells.grade)?;
            sheet.write_number(r, base + 5, cells.score)?;
            sheet.write_number(r, base + 6, cells.gp)?;
        }

        if let Some(total_gp) = row.total_gp {
            sheet.write_number(r, layout.total_gp_col() as u16, total_gp)?;
        }
        if let Some(gpa) = row.gpa {
            sheet.write_number(r, layout.gpa_col() as u16, gpa)?;
        }
        if let Some(status) = &row.status {
            sheet.write_string(r, layout.status_col() as u16, status)?;
        }
    }

    workbook.save(path)?;
    Ok(())
}

/// Write a class's mark sheet to an xlsx file. Plain cells only; the file is
/// meant to round-trip through results.importSheet, not to be pretty.
fn handle_results_export_sheet(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let class_exists: Option<String> = match conn
        .query_row("SELECT id FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if class_exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let layout = match class_layout(conn, &class_id) {
        Ok(l) => l,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if layout.subjects.is_empty() {
        return err(&req.id, "no_subjects", "class has no subjects attached", None);
    }

    let rows = match collect_rows(conn, &class_id) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if let Err(e) = write_sheet(&path, &layout, &rows) {
        return err(
            &req.id,
            "sheet_write_failed",
            e.to_string(),
            Some(json!({ "path": path })),
        );
    }

    ok(
        &req.id,
        json!({
            "path": path,
            "rowCount": rows.len(),
            "subjectCount": layout.subjects.len(),
            "schemaVersion": SHEET_SCHEMA_VERSION
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.exportSheet" => Some(handle_results_export_sheet(state, req)),
        _ => None,
    }
}
