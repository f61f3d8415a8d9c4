use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::roll;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// Backend of the public result-search page: one roll number in, the
/// student's year rollups and semester results out.
fn handle_results_search(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let roll_number = match required_str(req, "rollNumber") {
        Ok(v) => roll::normalize(&v),
        Err(resp) => return resp,
    };
    if roll_number.is_empty() {
        return err(&req.id, "bad_params", "rollNumber must not be empty", None);
    }

    let student: Option<(String, String, String)> = match conn
        .query_row(
            "SELECT id, admission_id, name FROM students WHERE roll_number = ?",
            [&roll_number],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((student_id, admission_id, name)) = student else {
        return err(
            &req.id,
            "not_found",
            "no student with that roll number",
            Some(json!({ "rollNumber": roll_number })),
        );
    };

    let years = match collect_years(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "student": {
                "studentId": student_id,
                "admissionId": admission_id,
                "rollNumber": roll_number,
                "name": name
            },
            "years": years
        }),
    )
}

fn collect_years(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<serde_json::Value>, rusqlite::Error> {
    let mut year_stmt = conn.prepare(
        "SELECT ayr.academic_year_id, y.name, ayr.overall_gpa, ayr.total_credits, ayr.total_gp,
                ayr.semester_count, ayr.is_complete, ayr.status, ayr.year_rank
         FROM academic_year_results ayr
         JOIN academic_years y ON y.id = ayr.academic_year_id
         WHERE ayr.student_id = ?
         ORDER BY y.name",
    )?;
    let year_rows: Vec<(String, String, f64, f64, f64, i64, i64, String, Option<i64>)> = year_stmt
        .query_map([student_id], |r| {
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
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut sem_stmt = conn.prepare(
        "SELECT s.name, c.name, r.gpa, r.total_credits, r.total_gp, r.status, r.rank
         FROM results r
         JOIN enrollments e ON e.id = r.enrollment_id
         JOIN classes c ON c.id = e.class_id
         JOIN semesters s ON s.id = c.semester_id
         WHERE e.student_id = ? AND s.academic_year_id = ?
         ORDER BY s.sort_order, s.name",
    )?;

    let mut years = Vec::with_capacity(year_rows.len());
    for (year_id, year_name, gpa, credits, gp, sem_count, complete, status, year_rank) in year_rows
    {
        let semesters: Vec<serde_json::Value> = sem_stmt
            .query_map((student_id, &year_id), |r| {
                let semester_name: String = r.get(0)?;
                let class_name: String = r.get(1)?;
                let gpa: f64 = r.get(2)?;
                let total_credits: f64 = r.get(3)?;
                let total_gp: f64 = r.get(4)?;
                let status: String = r.get(5)?;
                let rank: Option<i64> = r.get(6)?;
                Ok(json!({
                    "semesterName": semester_name,
                    "className": class_name,
                    "gpa": gpa,
                    "totalCredits": total_credits,
                    "totalGp": total_gp,
                    "status": status,
                    "rank": rank
                }))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        years.push(json!({
            "academicYearId": year_id,
            "academicYearName": year_name,
            "overallGpa": gpa,
            "totalCredits": credits,
            "totalGp": gp,
            "semesterCount": sem_count,
            "isComplete": complete != 0,
            "status": status,
            "yearRank": year_rank,
            "semesters": semesters
        }));
    }
    Ok(years)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.search" => Some(handle_results_search(state, req)),
        _ => None,
    }
}
