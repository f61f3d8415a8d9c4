pub mod classes;
pub mod core;
pub mod export_sheet;
pub mod grades;
pub mod import_sheet;
pub mod ranking;
pub mod reports;
pub mod scale;
pub mod search;
pub mod students;
pub mod subjects;
pub mod years;
