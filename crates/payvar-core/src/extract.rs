use payvar_config::{ColumnsConfig, DEFAULT_GROUP_FIELD};
use tracing::{debug, warn};

use crate::normalize::ColumnMapping;
use crate::{CoreError, EMPLOYEE_ID_FIELD, FieldValue, NAME_FIELD, NUMERIC_FIELDS, Record};

const CURRENCY_SYMBOLS: [char; 5] = ['\u{20b9}', '$', '\u{20ac}', '\u{a3}', '\u{a5}'];

/// A decoded spreadsheet: one header row and string cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub group_field: String,
    pub required: Vec<String>,
}

impl Schema {
    pub fn from_config(config: &ColumnsConfig) -> Self {
        Self {
            group_field: config.group_field.clone(),
            required: config.required.clone(),
        }
    }

    fn is_numeric(&self, field: &str) -> bool {
        NUMERIC_FIELDS.contains(&field)
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            group_field: DEFAULT_GROUP_FIELD.to_owned(),
            required: vec![EMPLOYEE_ID_FIELD.to_owned()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub records: Vec<Record>,
    /// 1-based data row numbers dropped for a missing employee id.
    pub skipped_rows: Vec<usize>,
}

pub fn extract_records(
    table: &Table,
    mapping: &ColumnMapping,
    schema: &Schema,
) -> Result<Extraction, CoreError> {
    for field in &schema.required {
        if !mapping.contains_canonical(field) {
            return Err(CoreError::MissingColumn {
                field: field.clone(),
                available: mapping.raw_labels().join(", "),
            });
        }
    }

    let mut extraction = Extraction::default();
    for (index, row) in table.rows.iter().enumerate() {
        let row_number = index + 1;
        match extract_row(row, mapping, schema, row_number) {
            Some(record) => extraction.records.push(record),
            None => {
                warn!(row = row_number, "skipping row without an employee id");
                extraction.skipped_rows.push(row_number);
            }
        }
    }

    Ok(extraction)
}

fn extract_row(
    row: &[String],
    mapping: &ColumnMapping,
    schema: &Schema,
    row_number: usize,
) -> Option<Record> {
    let mut entity_id = None;
    let mut entity_name = None;
    let mut group_value = None;
    let mut fields: Vec<(String, FieldValue)> = Vec::new();
    let mut seen: Vec<&str> = Vec::new();

    for (column, (raw_label, canonical)) in mapping.iter().enumerate() {
        // The leftmost column claiming a canonical field wins.
        if seen.contains(&canonical) {
            debug!(
                row = row_number,
                column = raw_label,
                field = canonical,
                "ignoring duplicate column for canonical field"
            );
            continue;
        }
        seen.push(canonical);

        let cell = row.get(column).map(String::as_str).unwrap_or("");
        if canonical == EMPLOYEE_ID_FIELD {
            entity_id = normalize_entity_id(cell);
        } else if canonical == NAME_FIELD {
            entity_name = Some(cell.to_owned());
        } else if canonical == schema.group_field {
            group_value = Some(cell.to_owned());
        } else if schema.is_numeric(canonical) {
            let value = coerce_amount(cell).unwrap_or_else(|| {
                if !cell.trim().is_empty() {
                    debug!(
                        row = row_number,
                        field = canonical,
                        value = cell,
                        "non-numeric amount coerced to zero"
                    );
                }
                0.0
            });
            fields.push((canonical.to_owned(), FieldValue::Number(value)));
        } else {
            let value = match coerce_amount(cell) {
                Some(number) => FieldValue::Number(number),
                None => FieldValue::Text(cell.trim().to_owned()),
            };
            fields.push((canonical.to_owned(), value));
        }
    }

    let mut record = Record::new(entity_id?);
    if let Some(name) = entity_name {
        record = record.with_name(name);
    }
    if let Some(group) = group_value {
        record = record.with_group(&schema.group_field, group);
    }
    for (field, value) in fields {
        record = match value {
            FieldValue::Number(number) => record.with_amount(&field, number),
            FieldValue::Text(text) => record.with_text(&field, text),
        };
    }

    Some(record)
}

/// Parses a spreadsheet amount. Accepts currency symbols, thousands
/// separators and accounting-style parentheses; returns `None` for
/// anything else, including non-finite values.
pub fn coerce_amount(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (negative, body) = match trimmed
        .strip_prefix('(')
        .and_then(|inner| inner.strip_suffix(')'))
    {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };

    let cleaned: String = body
        .chars()
        .filter(|ch| !matches!(*ch, ',' | '_' | ' ' | '\u{a0}') && !CURRENCY_SYMBOLS.contains(ch))
        .collect();

    let value = cleaned.parse::<f64>().ok().filter(|value| value.is_finite())?;
    Some(if negative { -value } else { value })
}

/// Stable string key for an employee id: integral numbers lose float
/// artifacts (`1001.0` becomes `1001`), everything else is trimmed text.
pub fn normalize_entity_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return None;
    }

    if trimmed.chars().all(|ch| ch.is_ascii_digit()) {
        return Some(trimmed.to_owned());
    }

    let looks_numeric = trimmed
        .chars()
        .all(|ch| ch.is_ascii_digit() || matches!(ch, '.' | 'e' | 'E' | '+' | '-'));
    if looks_numeric
        && let Ok(number) = trimmed.parse::<f64>()
        && number.is_finite()
        && number.fract() == 0.0
        && number.abs() < 1e15
    {
        return Some(format!("{}", number as i64));
    }

    Some(trimmed.to_owned())
}
