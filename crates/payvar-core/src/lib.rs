use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod aggregate;
pub mod extract;
pub mod format;
pub mod normalize;
pub mod report;
pub mod summary;
pub mod variance;

pub use aggregate::{GroupAggregate, GroupVariance, UNKNOWN_GROUP, aggregate_by_group, group_variance};
pub use extract::{Extraction, Schema, Table, coerce_amount, extract_records, normalize_entity_id};
pub use format::AmountFormat;
pub use normalize::{ColumnMapping, ColumnRules, canonical_for_label, detect_columns};
pub use report::{Report, assemble_report};
pub use summary::{
    NO_VARIANCE_MESSAGE, SummaryRow, SummaryTable, display_field_name, generate_group_summary,
    generate_summary,
};
pub use variance::{FieldSource, FieldVariance, TOTAL_VARIANCE_KEY, VarianceSet, compute_variance};

pub const EMPLOYEE_ID_FIELD: &str = "employee_id";
pub const NAME_FIELD: &str = "name";

/// Canonical fields that always carry currency amounts.
pub const NUMERIC_FIELDS: [&str; 6] = [
    "basic",
    "salary",
    "hra",
    "bonus",
    "net_salary",
    "previous_salary",
];

pub fn is_identity_field(field: &str) -> bool {
    field == EMPLOYEE_ID_FIELD || field == NAME_FIELD
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("missing required column '{field}' (detected columns: {available})")]
    MissingColumn { field: String, available: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Number(_) => None,
            Self::Text(value) => Some(value),
        }
    }
}

/// One employee row for one period. Identity lives outside `fields`; the
/// group column, when present, stays in `fields` as text and is mirrored in
/// `group_key`.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    entity_id: String,
    entity_name: Option<String>,
    group_key: Option<String>,
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_name: None,
            group_key: None,
            fields: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let trimmed = name.trim();
        self.entity_name = (!trimmed.is_empty()).then(|| trimmed.to_owned());
        self
    }

    pub fn with_group(mut self, group_field: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        let trimmed = value.trim().to_owned();
        self.group_key = (!trimmed.is_empty()).then(|| trimmed.clone());
        self.set_field(group_field, FieldValue::Text(trimmed));
        self
    }

    pub fn with_amount(mut self, field: &str, value: f64) -> Self {
        self.set_field(field, FieldValue::Number(value));
        self
    }

    pub fn with_text(mut self, field: &str, value: impl Into<String>) -> Self {
        self.set_field(field, FieldValue::Text(value.into()));
        self
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn entity_name(&self) -> Option<&str> {
        self.entity_name.as_deref()
    }

    pub fn group_key(&self) -> Option<&str> {
        self.group_key.as_deref()
    }

    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn amount(&self, name: &str) -> Option<f64> {
        self.field(name).and_then(FieldValue::as_number)
    }

    /// Column names in row order: identity first, then fields.
    pub fn column_names(&self) -> Vec<&str> {
        let mut names = vec![EMPLOYEE_ID_FIELD];
        if self.entity_name.is_some() {
            names.push(NAME_FIELD);
        }
        names.extend(self.fields.iter().map(|(field, _)| field.as_str()));
        names
    }

    fn set_field(&mut self, field: &str, value: FieldValue) {
        match self.fields.iter_mut().find(|(name, _)| name == field) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((field.to_owned(), value)),
        }
    }
}

impl Serialize for Record {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let name_len = usize::from(self.entity_name.is_some());
        let mut map = serializer.serialize_map(Some(1 + name_len + self.fields.len()))?;
        map.serialize_entry(EMPLOYEE_ID_FIELD, &self.entity_id)?;
        if let Some(name) = &self.entity_name {
            map.serialize_entry(NAME_FIELD, name)?;
        }
        for (field, value) in &self.fields {
            map.serialize_entry(field, value)?;
        }
        map.end()
    }
}
