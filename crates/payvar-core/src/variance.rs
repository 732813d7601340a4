use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::{FieldValue, Record, is_identity_field};

pub const TOTAL_VARIANCE_KEY: &str = "total_variance";

/// Anything that exposes named amounts in a stable order. Text values
/// report `None` and are treated as absent.
pub trait FieldSource {
    fn field_amounts(&self) -> Vec<(&str, Option<f64>)>;
}

impl FieldSource for Record {
    fn field_amounts(&self) -> Vec<(&str, Option<f64>)> {
        self.fields()
            .iter()
            .map(|(field, value)| (field.as_str(), value.as_number()))
            .collect()
    }
}

impl FieldSource for [(String, FieldValue)] {
    fn field_amounts(&self) -> Vec<(&str, Option<f64>)> {
        self.iter()
            .map(|(field, value)| (field.as_str(), value.as_number()))
            .collect()
    }
}

impl FieldSource for [(&str, f64)] {
    fn field_amounts(&self) -> Vec<(&str, Option<f64>)> {
        self.iter().map(|(field, value)| (*field, Some(*value))).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldVariance {
    #[serde(skip)]
    pub field: String,
    pub current: f64,
    pub previous: f64,
    pub difference: f64,
    pub percent_change: Option<f64>,
}

impl FieldVariance {
    pub fn new(field: impl Into<String>, current: f64, previous: f64) -> Self {
        let difference = current - previous;
        Self {
            field: field.into(),
            current,
            previous,
            difference,
            percent_change: percent_change(difference, previous),
        }
    }
}

/// Per-field variances in stable order plus the `total_variance` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct VarianceSet {
    pub entries: Vec<FieldVariance>,
    pub total: FieldVariance,
}

impl VarianceSet {
    pub fn get(&self, field: &str) -> Option<&FieldVariance> {
        if field == TOTAL_VARIANCE_KEY {
            return Some(&self.total);
        }
        self.entries.iter().find(|entry| entry.field == field)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for VarianceSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len() + 1))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.field, entry)?;
        }
        map.serialize_entry(TOTAL_VARIANCE_KEY, &self.total)?;
        map.end()
    }
}

/// `None` exactly when the baseline is zero. Scaling before dividing keeps
/// whole-number ratios exact (7000 over 50000 is 14.0, not 14.000000000000002).
pub fn percent_change(difference: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 {
        None
    } else {
        Some(difference * 100.0 / previous)
    }
}

fn lookup(amounts: &[(&str, Option<f64>)], field: &str) -> Option<f64> {
    amounts
        .iter()
        .find(|(name, _)| *name == field)
        .and_then(|(_, value)| *value)
}

/// Union-of-keys variance of `current` against `previous`. Keys follow
/// `current`'s order, then keys only `previous` has. A field missing on one
/// side counts as zero there; fields that are text on both sides and
/// identity fields are skipped. Never fails.
pub fn compute_variance<C, P>(current: &C, previous: &P) -> VarianceSet
where
    C: FieldSource + ?Sized,
    P: FieldSource + ?Sized,
{
    let current_amounts = current.field_amounts();
    let previous_amounts = previous.field_amounts();

    let mut keys: Vec<&str> = Vec::new();
    for (field, _) in current_amounts.iter().chain(previous_amounts.iter()) {
        if !is_identity_field(field) && !keys.contains(field) {
            keys.push(*field);
        }
    }

    let mut entries = Vec::with_capacity(keys.len());
    let mut total_current = 0.0;
    let mut total_previous = 0.0;
    for field in keys {
        let current_value = lookup(&current_amounts, field);
        let previous_value = lookup(&previous_amounts, field);
        if current_value.is_none() && previous_value.is_none() {
            continue;
        }

        let current_value = current_value.unwrap_or(0.0);
        let previous_value = previous_value.unwrap_or(0.0);
        total_current += current_value;
        total_previous += previous_value;
        entries.push(FieldVariance::new(field, current_value, previous_value));
    }

    VarianceSet {
        entries,
        total: FieldVariance::new(TOTAL_VARIANCE_KEY, total_current, total_previous),
    }
}
