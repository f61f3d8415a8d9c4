//! Mark-sheet column contract shared by the exporter and the importer.
//!
//! The layout is built once from a class's subject list and both sides read
//! from it, so the header text is never derived in two places. Layout:
//! fixed student columns, then one 7-column block per subject, then the
//! summary columns. A trailing Status column is written on export but is not
//! required on import.

use serde::Serialize;

pub const SHEET_SCHEMA_VERSION: i64 = 1;

pub const FIXED_HEADERS: [&str; 4] = ["Admission ID", "Roll Number", "", "Student Name"];
pub const SUBJECT_BLOCK_WIDTH: usize = 7;
pub const SUMMARY_HEADERS: [&str; 2] = ["Total GP", "GPA"];
pub const STATUS_HEADER: &str = "Status";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectColumn {
    pub class_subject_id: String,
    pub code: String,
    pub name: String,
    pub credit_hours: f64,
    pub exam_weight: f64,
    pub assign_weight: f64,
}

impl SubjectColumn {
    pub fn exam_pct(&self) -> i64 {
        (self.exam_weight * 100.0).round() as i64
    }

    pub fn assign_pct(&self) -> i64 {
        (self.assign_weight * 100.0).round() as i64
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetLayout {
    pub schema_version: i64,
    pub subjects: Vec<SubjectColumn>,
}

impl SheetLayout {
    pub fn new(subjects: Vec<SubjectColumn>) -> Self {
        Self {
            schema_version: SHEET_SCHEMA_VERSION,
            subjects,
        }
    }

    /// Header row, Status column included.
    pub fn headers(&self) -> Vec<String> {
        let mut out: Vec<String> = FIXED_HEADERS.iter().map(|s| s.to_string()).collect();
        for s in &self.subjects {
            out.push(s.name.clone());
            out.push(format!("{} {}%", s.code, s.exam_pct()));
            out.push(format!("{} {}%", s.code, s.assign_pct()));
            out.push(format!("{} 100%", s.code));
            out.push(format!("{} Grade", s.code));
            out.push(format!("{} Score", s.code));
            out.push(format!("{} GP", s.code));
        }
        out.extend(SUMMARY_HEADERS.iter().map(|s| s.to_string()));
        out.push(STATUS_HEADER.to_string());
        out
    }

    /// Count of columns an import row must provide (Status excluded).
    pub fn required_width(&self) -> usize {
        FIXED_HEADERS.len() + self.subjects.len() * SUBJECT_BLOCK_WIDTH + SUMMARY_HEADERS.len()
    }

    /// First column of the i-th subject block.
    pub fn subject_block_start(&self, i: usize) -> usize {
        FIXED_HEADERS.len() + i * SUBJECT_BLOCK_WIDTH
    }

    pub fn total_gp_col(&self) -> usize {
        FIXED_HEADERS.len() + self.subjects.len() * SUBJECT_BLOCK_WIDTH
    }

    pub fn gpa_col(&self) -> usize {
        self.total_gp_col() + 1
    }

    pub fn status_col(&self) -> usize {
        self.gpa_col() + 1
    }

    /// Compare a found header row against the required headers. Returns one
    /// message per mismatched or missing column; extra columns past GPA are
    /// ignored.
    pub fn verify_headers(&self, found: &[String]) -> Vec<(usize, String)> {
        let required: Vec<String> = {
            let mut h = self.headers();
            h.truncate(self.required_width());
            h
        };
        let mut mismatches = Vec::new();
        for (i, want) in required.iter().enumerate() {
            match found.get(i) {
                Some(got) if got.trim() == want => {}
                Some(got) => mismatches.push((
                    i,
                    format!("expected header '{}', found '{}'", want, got.trim()),
                )),
                None => mismatches.push((i, format!("missing header column '{}'", want))),
            }
        }
        mismatches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> SheetLayout {
        SheetLayout::new(vec![
            SubjectColumn {
                class_subject_id: "cs1".into(),
                code: "M-101".into(),
                name: "Myanmar".into(),
                credit_hours: 3.0,
                exam_weight: 0.6,
                assign_weight: 0.4,
            },
            SubjectColumn {
                class_subject_id: "cs2".into(),
                code: "E-101".into(),
                name: "English".into(),
                credit_hours: 2.0,
                exam_weight: 0.5,
                assign_weight: 0.5,
            },
        ])
    }

    #[test]
    fn headers_follow_the_contract() {
        let h = layout().headers();
        assert_eq!(
            &h[..4],
            &["Admission ID", "Roll Number", "", "Student Name"]
        );
        assert_eq!(
            &h[4..11],
            &[
                "Myanmar",
                "M-101 60%",
                "M-101 40%",
                "M-101 100%",
                "M-101 Grade",
                "M-101 Score",
                "M-101 GP"
            ]
        );
        assert_eq!(&h[18..], &["Total GP", "GPA", "Status"]);
    }

    #[test]
    fn column_indexes_line_up() {
        let l = layout();
        assert_eq!(l.subject_block_start(0), 4);
        assert_eq!(l.subject_block_start(1), 11);
        assert_eq!(l.total_gp_col(), 18);
        assert_eq!(l.gpa_col(), 19);
        assert_eq!(l.status_col(), 20);
        assert_eq!(l.required_width(), 20);
    }

    #[test]
    fn verify_headers_reports_each_mismatch() {
        let l = layout();
        let mut found = l.headers();
        found.truncate(l.required_width());
        assert!(l.verify_headers(&found).is_empty());

        found[5] = "M-101 50%".to_string();
        found.pop();
        let mismatches = l.verify_headers(&found);
        assert_eq!(mismatches.len(), 2);
        assert_eq!(mismatches[0].0, 5);
        assert!(mismatches[1].1.contains("missing header"));
    }

    #[test]
    fn status_column_is_not_required() {
        let l = layout();
        let mut with_status = l.headers();
        assert_eq!(with_status.len(), l.required_width() + 1);
        with_status[l.status_col()] = "anything".to_string();
        assert!(l.verify_headers(&with_status).is_empty());
    }
}
