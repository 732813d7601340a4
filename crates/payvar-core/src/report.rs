use serde::Serialize;

use crate::Record;
use crate::normalize::ColumnMapping;

/// Everything a renderer needs; rows keep the order they were handed in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub title: String,
    pub summary: String,
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
    pub detected_columns: ColumnMapping,
}

pub fn assemble_report(
    title: impl Into<String>,
    summary: impl Into<String>,
    rows: Vec<Record>,
    detected_columns: ColumnMapping,
) -> Report {
    let mut columns: Vec<String> = Vec::new();
    for row in &rows {
        for name in row.column_names() {
            if !columns.iter().any(|column| column == name) {
                columns.push(name.to_owned());
            }
        }
    }

    Report {
        title: title.into(),
        summary: summary.into(),
        columns,
        rows,
        detected_columns,
    }
}
