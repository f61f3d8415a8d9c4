use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Pass threshold on the final-mark scale. A semester result is PASS only if
/// every subject's final mark reaches this.
pub const PASS_MARK: f64 = 50.0;

/// 2-decimal half-up rounding used wherever a mark, GP or GPA is stored:
/// `Int(100*x + 0.5) / 100`.
pub fn round2(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

#[derive(Debug, Clone, Serialize)]
pub struct GradingError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl GradingError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn db(e: impl ToString) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaleBand {
    pub min_mark: f64,
    pub max_mark: f64,
    pub grade: String,
    pub score: f64,
}

/// A validated grade scale: bands cover [0,100] with no gaps or overlaps,
/// held sorted descending by `min_mark` for lookup.
#[derive(Debug, Clone)]
pub struct GradeScale {
    bands: Vec<ScaleBand>,
}

impl GradeScale {
    pub fn new(mut bands: Vec<ScaleBand>) -> Result<Self, GradingError> {
        if bands.is_empty() {
            return Err(GradingError::new("scale_empty", "grade scale has no bands"));
        }
        for b in &bands {
            if !b.min_mark.is_finite() || !b.max_mark.is_finite() {
                return Err(GradingError::new("scale_invalid", "band bounds must be finite"));
            }
            if b.min_mark > b.max_mark {
                return Err(GradingError::new(
                    "scale_invalid",
                    format!("band {} has minMark > maxMark", b.grade),
                ));
            }
            if !(0.0..=4.0).contains(&b.score) {
                return Err(GradingError::new(
                    "scale_invalid",
                    format!("band {} score must be within 0.0-4.0", b.grade),
                ));
            }
        }

        bands.sort_by(|a, b| a.min_mark.partial_cmp(&b.min_mark).unwrap_or(Ordering::Equal));
        if bands[0].min_mark != 0.0 {
            return Err(GradingError::new(
                "scale_gap",
                "lowest band must start at 0",
            ));
        }
        if bands[bands.len() - 1].max_mark != 100.0 {
            return Err(GradingError::new(
                "scale_gap",
                "highest band must end at 100",
            ));
        }
        for pair in bands.windows(2) {
            let step = pair[1].min_mark - pair[0].max_mark;
            if step < 1.0 - 1e-9 {
                return Err(GradingError::new(
                    "scale_overlap",
                    format!(
                        "bands {} and {} overlap or touch",
                        pair[0].grade, pair[1].grade
                    ),
                ));
            }
            if step > 1.0 + 1e-9 {
                return Err(GradingError::new(
                    "scale_gap",
                    format!("gap between bands {} and {}", pair[0].grade, pair[1].grade),
                ));
            }
        }

        // Lookup order: highest minMark first.
        bands.reverse();
        Ok(Self { bands })
    }

    /// Bands sorted descending by minMark.
    pub fn bands(&self) -> &[ScaleBand] {
        &self.bands
    }

    /// First band with minMark <= mark <= maxMark. Marks that fall outside
    /// every band (out-of-range input, or a fractional mark on an integer
    /// boundary) take the lowest-scoring band.
    pub fn lookup(&self, final_mark: f64) -> &ScaleBand {
        self.bands
            .iter()
            .find(|b| b.min_mark <= final_mark && final_mark <= b.max_mark)
            .unwrap_or_else(|| self.fallback_band())
    }

    fn fallback_band(&self) -> &ScaleBand {
        // Non-empty by construction.
        self.bands
            .iter()
            .min_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal))
            .expect("validated scale has at least one band")
    }
}

pub fn load_scale(conn: &Connection) -> Result<GradeScale, GradingError> {
    let mut stmt = conn
        .prepare("SELECT min_mark, max_mark, grade, score FROM grade_scale")
        .map_err(GradingError::db)?;
    let bands = stmt
        .query_map([], |r| {
            Ok(ScaleBand {
                min_mark: r.get(0)?,
                max_mark: r.get(1)?,
                grade: r.get(2)?,
                score: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(GradingError::db)?;
    if bands.is_empty() {
        return Err(GradingError::new(
            "scale_not_configured",
            "grade scale has not been configured",
        ));
    }
    GradeScale::new(bands)
}

/// Per-class-subject weighting. Marks are raw points already on the final-mark
/// scale, so the weights fix the component caps: exam out of 100*examWeight,
/// assignment out of 100*assignWeight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectWeighting {
    pub credit_hours: f64,
    pub exam_weight: f64,
    pub assign_weight: f64,
}

impl SubjectWeighting {
    pub fn validate(&self) -> Result<(), GradingError> {
        if !(self.credit_hours > 0.0) {
            return Err(GradingError::new(
                "bad_weighting",
                "creditHours must be greater than 0",
            ));
        }
        if !(0.0..=1.0).contains(&self.exam_weight) || !(0.0..=1.0).contains(&self.assign_weight) {
            return Err(GradingError::new(
                "bad_weighting",
                "examWeight and assignWeight must be within 0.0-1.0",
            ));
        }
        if (self.exam_weight + self.assign_weight - 1.0).abs() > 1e-9 {
            return Err(GradingError::new(
                "bad_weighting",
                "examWeight + assignWeight must equal 1.0",
            ));
        }
        Ok(())
    }

    pub fn max_exam_mark(&self) -> f64 {
        round2(100.0 * self.exam_weight)
    }

    pub fn max_assign_mark(&self) -> f64 {
        round2(100.0 * self.assign_weight)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComputedGrade {
    pub final_mark: f64,
    pub grade: String,
    pub score: f64,
    pub gp: f64,
}

/// Pure grade computation: raw exam + assignment points become the final mark,
/// the scale gives the letter grade, and per-subject GP equals the band score.
/// Range validation happens upstream; given in-range inputs this cannot fail.
pub fn compute_grade(
    exam_mark: f64,
    assign_mark: f64,
    _weighting: &SubjectWeighting,
    scale: &GradeScale,
) -> ComputedGrade {
    let final_mark = round2(exam_mark + assign_mark);
    let band = scale.lookup(final_mark);
    ComputedGrade {
        final_mark,
        grade: band.grade.clone(),
        score: band.score,
        gp: band.score,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Pass => "PASS",
            ResultStatus::Fail => "FAIL",
        }
    }

    pub fn parse(s: &str) -> Result<Self, GradingError> {
        match s {
            "PASS" => Ok(ResultStatus::Pass),
            "FAIL" => Ok(ResultStatus::Fail),
            other => Err(GradingError::new(
                "bad_status",
                format!("unknown result status: {other}"),
            )),
        }
    }
}

/// One graded subject as seen by the semester aggregator.
#[derive(Debug, Clone, Copy)]
pub struct GradeLine {
    pub final_mark: f64,
    pub gp: f64,
    pub credit_hours: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SemesterSummary {
    pub total_credits: f64,
    pub total_gp: f64,
    pub gpa: f64,
    pub status: ResultStatus,
}

/// Credit-weighted semester aggregation:
/// gpa = round2(sum(gp*credits) / sum(credits)). Order of lines is irrelevant.
pub fn aggregate_semester(lines: &[GradeLine]) -> SemesterSummary {
    let mut total_credits = 0.0;
    let mut weighted_gp = 0.0;
    let mut all_passed = true;
    for l in lines {
        total_credits += l.credit_hours;
        weighted_gp += l.gp * l.credit_hours;
        if l.final_mark < PASS_MARK {
            all_passed = false;
        }
    }
    let gpa = if total_credits > 0.0 {
        round2(weighted_gp / total_credits)
    } else {
        0.0
    };
    SemesterSummary {
        total_credits,
        total_gp: round2(weighted_gp),
        gpa,
        status: if all_passed {
            ResultStatus::Pass
        } else {
            ResultStatus::Fail
        },
    }
}

/// One semester result as seen by the academic-year aggregator.
#[derive(Debug, Clone, Copy)]
pub struct YearLine {
    pub gpa: f64,
    pub total_credits: f64,
    pub total_gp: f64,
    pub status: ResultStatus,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YearSummary {
    pub overall_gpa: f64,
    pub total_credits: f64,
    pub total_gp: f64,
    pub semester_count: i64,
    pub status: ResultStatus,
}

/// Same credit-weighted formula one level up: semester GPAs weighted by the
/// semester's credit totals.
pub fn aggregate_year(lines: &[YearLine]) -> YearSummary {
    let mut total_credits = 0.0;
    let mut total_gp = 0.0;
    let mut weighted = 0.0;
    let mut all_passed = true;
    for l in lines {
        total_credits += l.total_credits;
        total_gp += l.total_gp;
        weighted += l.gpa * l.total_credits;
        if l.status != ResultStatus::Pass {
            all_passed = false;
        }
    }
    let overall_gpa = if total_credits > 0.0 {
        round2(weighted / total_credits)
    } else {
        0.0
    };
    YearSummary {
        overall_gpa,
        total_credits,
        total_gp: round2(total_gp),
        semester_count: lines.len() as i64,
        status: if all_passed {
            ResultStatus::Pass
        } else {
            ResultStatus::Fail
        },
    }
}

/// Strict positional ranking: sort descending by GPA, rank = position + 1.
/// Ties are not deduplicated (inherited behavior; a tie at the top yields
/// ranks 1 and 2, not 1 and 1). Input order breaks ties, so callers pass rows
/// in a deterministic order.
pub fn assign_positions<T>(items: &mut [(T, f64)]) -> Vec<i64> {
    items.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    (1..=items.len() as i64).collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRow {
    pub result_id: String,
    pub enrollment_id: String,
    pub gpa: f64,
    pub total_credits: f64,
    pub total_gp: f64,
    pub status: ResultStatus,
    pub academic_year_result_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearResultRow {
    pub year_result_id: String,
    pub student_id: String,
    pub academic_year_id: String,
    pub overall_gpa: f64,
    pub total_credits: f64,
    pub total_gp: f64,
    pub semester_count: i64,
    pub is_complete: bool,
    pub status: ResultStatus,
}

fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Recompute and upsert the semester result for one enrollment from its
/// stored grades, then roll the student's academic year up and patch the
/// back-reference. Caller wraps this in a transaction; the three writes are
/// ordered (result, year result, back-reference) and land together.
pub fn recompute_result(conn: &Connection, enrollment_id: &str) -> Result<ResultRow, GradingError> {
    let scope: Option<(String, String)> = conn
        .query_row(
            "SELECT e.student_id, s.academic_year_id
             FROM enrollments e
             JOIN classes c ON c.id = e.class_id
             JOIN semesters s ON s.id = c.semester_id
             WHERE e.id = ?",
            [enrollment_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(GradingError::db)?;
    let Some((student_id, academic_year_id)) = scope else {
        return Err(GradingError::new("not_found", "enrollment not found"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT g.final_mark, g.gp, cs.credit_hours
             FROM grades g
             JOIN class_subjects cs ON cs.id = g.class_subject_id
             WHERE g.enrollment_id = ?",
        )
        .map_err(GradingError::db)?;
    let lines: Vec<GradeLine> = stmt
        .query_map([enrollment_id], |r| {
            Ok(GradeLine {
                final_mark: r.get(0)?,
                gp: r.get(1)?,
                credit_hours: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(GradingError::db)?;
    if lines.is_empty() {
        return Err(GradingError::new(
            "no_grades",
            "enrollment has no grades to aggregate",
        ));
    }

    let summary = aggregate_semester(&lines);
    let result_id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO results(id, enrollment_id, gpa, total_credits, total_gp, status, rank, academic_year_result_id, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, NULL, NULL, ?)
         ON CONFLICT(enrollment_id) DO UPDATE SET
           gpa = excluded.gpa,
           total_credits = excluded.total_credits,
           total_gp = excluded.total_gp,
           status = excluded.status,
           updated_at = excluded.updated_at",
        (
            &result_id,
            enrollment_id,
            summary.gpa,
            summary.total_credits,
            summary.total_gp,
            summary.status.as_str(),
            now_stamp(),
        ),
    )
    .map_err(GradingError::db)?;

    let year = recompute_year_result(conn, &student_id, &academic_year_id)?
        .ok_or_else(|| GradingError::new("rollup_failed", "year rollup produced no row"))?;

    conn.execute(
        "UPDATE results SET academic_year_result_id = ? WHERE enrollment_id = ?",
        (&year.year_result_id, enrollment_id),
    )
    .map_err(GradingError::db)?;

    let result_id: String = conn
        .query_row(
            "SELECT id FROM results WHERE enrollment_id = ?",
            [enrollment_id],
            |r| r.get(0),
        )
        .map_err(GradingError::db)?;

    Ok(ResultRow {
        result_id,
        enrollment_id: enrollment_id.to_string(),
        gpa: summary.gpa,
        total_credits: summary.total_credits,
        total_gp: summary.total_gp,
        status: summary.status,
        academic_year_result_id: year.year_result_id,
    })
}

/// Recompute the (student, academic year) rollup from stored semester results.
/// Returns None (and removes any stale row) when the student has no semester
/// results left in that year.
pub fn recompute_year_result(
    conn: &Connection,
    student_id: &str,
    academic_year_id: &str,
) -> Result<Option<YearResultRow>, GradingError> {
    let mut stmt = conn
        .prepare(
            "SELECT r.gpa, r.total_credits, r.total_gp, r.status
             FROM results r
             JOIN enrollments e ON e.id = r.enrollment_id
             JOIN classes c ON c.id = e.class_id
             JOIN semesters s ON s.id = c.semester_id
             WHERE e.student_id = ? AND s.academic_year_id = ?",
        )
        .map_err(GradingError::db)?;
    let lines: Vec<YearLine> = stmt
        .query_map((student_id, academic_year_id), |r| {
            Ok((
                r.get::<_, f64>(0)?,
                r.get::<_, f64>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(GradingError::db)?
        .into_iter()
        .map(|(gpa, total_credits, total_gp, status)| {
            Ok(YearLine {
                gpa,
                total_credits,
                total_gp,
                status: ResultStatus::parse(&status)?,
            })
        })
        .collect::<Result<Vec<_>, GradingError>>()?;

    if lines.is_empty() {
        conn.execute(
            "DELETE FROM academic_year_results WHERE student_id = ? AND academic_year_id = ?",
            (student_id, academic_year_id),
        )
        .map_err(GradingError::db)?;
        return Ok(None);
    }

    // Completion compares against the distinct semesters, within this year,
    // that hold classes the student is enrolled in.
    let expected_semesters: i64 = conn
        .query_row(
            "SELECT COUNT(DISTINCT c.semester_id)
             FROM enrollments e
             JOIN classes c ON c.id = e.class_id
             JOIN semesters s ON s.id = c.semester_id
             WHERE e.student_id = ? AND s.academic_year_id = ?",
            (student_id, academic_year_id),
            |r| r.get(0),
        )
        .map_err(GradingError::db)?;

    let summary = aggregate_year(&lines);
    let is_complete = expected_semesters > 0 && summary.semester_count == expected_semesters;

    let new_id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO academic_year_results(id, student_id, academic_year_id, overall_gpa, total_credits, total_gp, semester_count, is_complete, status, year_rank, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?)
         ON CONFLICT(student_id, academic_year_id) DO UPDATE SET
           overall_gpa = excluded.overall_gpa,
           total_credits = excluded.total_credits,
           total_gp = excluded.total_gp,
           semester_count = excluded.semester_count,
           is_complete = excluded.is_complete,
           status = excluded.status,
           updated_at = excluded.updated_at",
        (
            &new_id,
            student_id,
            academic_year_id,
            summary.overall_gpa,
            summary.total_credits,
            summary.total_gp,
            summary.semester_count,
            is_complete as i64,
            summary.status.as_str(),
            now_stamp(),
        ),
    )
    .map_err(GradingError::db)?;

    let year_result_id: String = conn
        .query_row(
            "SELECT id FROM academic_year_results WHERE student_id = ? AND academic_year_id = ?",
            (student_id, academic_year_id),
            |r| r.get(0),
        )
        .map_err(GradingError::db)?;

    Ok(Some(YearResultRow {
        year_result_id,
        student_id: student_id.to_string(),
        academic_year_id: academic_year_id.to_string(),
        overall_gpa: summary.overall_gpa,
        total_credits: summary.total_credits,
        total_gp: summary.total_gp,
        semester_count: summary.semester_count,
        is_complete,
        status: summary.status,
    }))
}

/// Reassign semester ranks for every result in one semester's cohort.
pub fn refresh_semester_ranks(conn: &Connection, semester_id: &str) -> Result<usize, GradingError> {
    let mut stmt = conn
        .prepare(
            "SELECT r.id, r.gpa
             FROM results r
             JOIN enrollments e ON e.id = r.enrollment_id
             JOIN classes c ON c.id = e.class_id
             JOIN students st ON st.id = e.student_id
             WHERE c.semester_id = ?
             ORDER BY st.roll_number",
        )
        .map_err(GradingError::db)?;
    let mut rows: Vec<(String, f64)> = stmt
        .query_map([semester_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(GradingError::db)?;

    let positions = assign_positions(&mut rows);
    for ((id, _), rank) in rows.iter().zip(positions) {
        conn.execute("UPDATE results SET rank = ? WHERE id = ?", (rank, id))
            .map_err(GradingError::db)?;
    }
    Ok(rows.len())
}

/// Reassign year ranks for every rollup in one academic year's cohort.
pub fn refresh_year_ranks(conn: &Connection, academic_year_id: &str) -> Result<usize, GradingError> {
    let mut stmt = conn
        .prepare(
            "SELECT ayr.id, ayr.overall_gpa
             FROM academic_year_results ayr
             JOIN students st ON st.id = ayr.student_id
             WHERE ayr.academic_year_id = ?
             ORDER BY st.roll_number",
        )
        .map_err(GradingError::db)?;
    let mut rows: Vec<(String, f64)> = stmt
        .query_map([academic_year_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(GradingError::db)?;

    let positions = assign_positions(&mut rows);
    for ((id, _), rank) in rows.iter().zip(positions) {
        conn.execute(
            "UPDATE academic_year_results SET year_rank = ? WHERE id = ?",
            (rank, id),
        )
        .map_err(GradingError::db)?;
    }
    Ok(rows.len())
}

/// Best-effort rank refresh after a grade write. Failures here must never
/// fail the surrounding submission; they are logged and swallowed.
pub fn refresh_ranks_best_effort(conn: &Connection, semester_id: &str, academic_year_id: &str) {
    if let Err(e) = refresh_semester_ranks(conn, semester_id) {
        tracing::warn!(semester_id, code = %e.code, "semester rank refresh failed: {}", e.message);
    }
    if let Err(e) = refresh_year_ranks(conn, academic_year_id) {
        tracing::warn!(academic_year_id, code = %e.code, "year rank refresh failed: {}", e.message);
    }
}

/// Best guess at a semester's ordinal from its display names, used to order
/// transcript sections. A number next to a "sem"/"semester" token wins;
/// otherwise any digit, roman numeral or ordinal word counts. The semester
/// name is consulted before the class name.
pub fn semester_number_hint(semester_name: &str, class_name: &str) -> Option<i64> {
    number_in_text(semester_name).or_else(|| number_in_text(class_name))
}

fn token_number(token: &str) -> Option<i64> {
    if let Ok(n) = token.parse::<i64>() {
        return (n > 0).then_some(n);
    }
    match token {
        "i" | "first" => Some(1),
        "ii" | "second" => Some(2),
        "iii" | "third" => Some(3),
        "iv" | "fourth" => Some(4),
        "v" | "fifth" => Some(5),
        "vi" | "sixth" => Some(6),
        _ => None,
    }
}

fn number_in_text(text: &str) -> Option<i64> {
    let lower = text.to_ascii_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    // Numbers attached to a "sem" token ("Sem 1", "Semester II", "First
    // Semester", "sem2") take priority over stray ordinals like "Second Year".
    for (i, token) in tokens.iter().enumerate() {
        if !token.starts_with("sem") {
            continue;
        }
        let tail = token.trim_start_matches(|c: char| c.is_ascii_alphabetic());
        if let Some(n) = token_number(tail) {
            return Some(n);
        }
        if let Some(n) = tokens.get(i + 1).and_then(|t| token_number(t)) {
            return Some(n);
        }
        if i > 0 {
            if let Some(n) = token_number(tokens[i - 1]) {
                return Some(n);
            }
        }
    }

    tokens.iter().find_map(|t| token_number(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_scale() -> GradeScale {
        GradeScale::new(vec![
            ScaleBand { min_mark: 0.0, max_mark: 49.0, grade: "F".into(), score: 0.0 },
            ScaleBand { min_mark: 50.0, max_mark: 59.0, grade: "C".into(), score: 2.0 },
            ScaleBand { min_mark: 60.0, max_mark: 69.0, grade: "B".into(), score: 2.67 },
            ScaleBand { min_mark: 70.0, max_mark: 79.0, grade: "B+".into(), score: 3.0 },
            ScaleBand { min_mark: 80.0, max_mark: 89.0, grade: "A".into(), score: 3.8 },
            ScaleBand { min_mark: 90.0, max_mark: 100.0, grade: "A+".into(), score: 4.0 },
        ])
        .expect("valid scale")
    }

    #[test]
    fn round2_is_half_up() {
        assert_eq!(round2(0.0), 0.0);
        assert_eq!(round2(3.475), 3.48);
        assert_eq!(round2(3.474), 3.47);
        assert_eq!(round2(86.0), 86.0);
    }

    #[test]
    fn scale_rejects_gaps_and_overlaps() {
        let gap = GradeScale::new(vec![
            ScaleBand { min_mark: 0.0, max_mark: 49.0, grade: "F".into(), score: 0.0 },
            ScaleBand { min_mark: 60.0, max_mark: 100.0, grade: "P".into(), score: 2.0 },
        ]);
        assert_eq!(gap.unwrap_err().code, "scale_gap");

        let overlap = GradeScale::new(vec![
            ScaleBand { min_mark: 0.0, max_mark: 60.0, grade: "F".into(), score: 0.0 },
            ScaleBand { min_mark: 60.0, max_mark: 100.0, grade: "P".into(), score: 2.0 },
        ]);
        assert_eq!(overlap.unwrap_err().code, "scale_overlap");

        let short = GradeScale::new(vec![
            ScaleBand { min_mark: 0.0, max_mark: 90.0, grade: "F".into(), score: 0.0 },
        ]);
        assert_eq!(short.unwrap_err().code, "scale_gap");
    }

    #[test]
    fn scale_lookup_matches_exactly_one_band_per_mark() {
        let scale = default_scale();
        for mark in 0..=100 {
            let m = mark as f64;
            let matching: Vec<_> = scale
                .bands()
                .iter()
                .filter(|b| b.min_mark <= m && m <= b.max_mark)
                .collect();
            assert_eq!(matching.len(), 1, "mark {m} matched {} bands", matching.len());
            assert_eq!(scale.lookup(m).grade, matching[0].grade);
        }
    }

    #[test]
    fn scale_lookup_falls_back_to_lowest_score() {
        let scale = default_scale();
        assert_eq!(scale.lookup(-3.0).grade, "F");
        assert_eq!(scale.lookup(130.0).grade, "F");
    }

    #[test]
    fn compute_grade_matches_hand_worked_marks() {
        // Weights .6/.4; exam 54/60 and assignment 32/40 land on 86 -> A/3.80.
        let scale = default_scale();
        let weighting = SubjectWeighting {
            credit_hours: 3.0,
            exam_weight: 0.6,
            assign_weight: 0.4,
        };
        let g = compute_grade(54.0, 32.0, &weighting, &scale);
        assert_eq!(g.final_mark, 86.0);
        assert_eq!(g.grade, "A");
        assert_eq!(g.score, 3.8);
        assert_eq!(g.gp, 3.8);

        // Pure and idempotent.
        assert_eq!(g, compute_grade(54.0, 32.0, &weighting, &scale));
    }

    #[test]
    fn weighting_caps_follow_weights() {
        let w = SubjectWeighting {
            credit_hours: 3.0,
            exam_weight: 0.6,
            assign_weight: 0.4,
        };
        w.validate().expect("valid weighting");
        assert_eq!(w.max_exam_mark(), 60.0);
        assert_eq!(w.max_assign_mark(), 40.0);

        let bad = SubjectWeighting {
            credit_hours: 3.0,
            exam_weight: 0.7,
            assign_weight: 0.4,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn semester_gpa_is_credit_weighted_and_order_invariant() {
        let mut lines = vec![
            GradeLine { final_mark: 86.0, gp: 3.8, credit_hours: 3.0 },
            GradeLine { final_mark: 72.0, gp: 3.0, credit_hours: 2.0 },
        ];
        let s = aggregate_semester(&lines);
        assert_eq!(s.total_credits, 5.0);
        assert_eq!(s.total_gp, 17.4);
        assert_eq!(s.gpa, 3.48);
        assert_eq!(s.status, ResultStatus::Pass);

        lines.reverse();
        assert_eq!(aggregate_semester(&lines), s);
    }

    #[test]
    fn semester_fails_when_any_final_mark_below_threshold() {
        let lines = vec![
            GradeLine { final_mark: 92.0, gp: 4.0, credit_hours: 3.0 },
            GradeLine { final_mark: 49.0, gp: 0.0, credit_hours: 2.0 },
        ];
        assert_eq!(aggregate_semester(&lines).status, ResultStatus::Fail);
    }

    #[test]
    fn year_rollup_weights_by_semester_credits() {
        let lines = vec![
            YearLine { gpa: 3.48, total_credits: 5.0, total_gp: 17.4, status: ResultStatus::Pass },
            YearLine { gpa: 4.0, total_credits: 3.0, total_gp: 12.0, status: ResultStatus::Pass },
        ];
        let y = aggregate_year(&lines);
        assert_eq!(y.semester_count, 2);
        assert_eq!(y.total_credits, 8.0);
        assert_eq!(y.total_gp, 29.4);
        // (3.48*5 + 4.0*3) / 8 = 29.4 / 8
        assert_eq!(y.overall_gpa, 3.68);
        assert_eq!(y.status, ResultStatus::Pass);
    }

    #[test]
    fn positional_ranks_do_not_share_ties() {
        let mut rows = vec![
            ("b".to_string(), 3.5),
            ("a".to_string(), 4.0),
            ("c".to_string(), 4.0),
        ];
        let ranks = assign_positions(&mut rows);
        assert_eq!(ranks, vec![1, 2, 3]);
        // Descending by GPA; the two 4.0s keep their input order.
        assert_eq!(rows[0].0, "a");
        assert_eq!(rows[1].0, "c");
        assert_eq!(rows[2].0, "b");
    }

    #[test]
    fn semester_hint_reads_names() {
        assert_eq!(semester_number_hint("Semester 2", "whatever"), Some(2));
        assert_eq!(semester_number_hint("Semester II", "x"), Some(2));
        assert_eq!(semester_number_hint("First Semester", "x"), Some(1));
        assert_eq!(semester_number_hint("Term", "Second Year CS - Sem 1"), Some(1));
        assert_eq!(semester_number_hint("Term", "no ordinal here"), None);
    }
}
