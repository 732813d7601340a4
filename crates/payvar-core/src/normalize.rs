use payvar_config::{ColumnAlias, ColumnsConfig, SalaryAnchor, default_aliases};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::EMPLOYEE_ID_FIELD;

/// Alias table plus the salary anchor profile active for a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRules {
    salary_anchor: SalaryAnchor,
    aliases: Vec<ColumnAlias>,
}

impl ColumnRules {
    pub fn new(salary_anchor: SalaryAnchor, aliases: Vec<ColumnAlias>) -> Self {
        Self {
            salary_anchor,
            aliases,
        }
    }

    pub fn from_config(config: &ColumnsConfig) -> Self {
        Self::new(config.salary_anchor, config.aliases.clone())
    }

    /// Substring anchors only, no aliases.
    pub fn anchors_only(salary_anchor: SalaryAnchor) -> Self {
        Self::new(salary_anchor, Vec::new())
    }

    fn alias_for(&self, normalized_label: &str) -> Option<&str> {
        // First registration wins when a label appears more than once.
        self.aliases
            .iter()
            .find(|alias| alias.label.trim().to_lowercase() == normalized_label)
            .map(|alias| alias.field.as_str())
    }
}

impl Default for ColumnRules {
    fn default() -> Self {
        Self::new(SalaryAnchor::Basic, default_aliases())
    }
}

/// Raw header label to canonical field name, in input column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    entries: Vec<(String, String)>,
}

impl ColumnMapping {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(raw, canonical)| (raw.as_str(), canonical.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn canonical_at(&self, index: usize) -> Option<&str> {
        self.entries
            .get(index)
            .map(|(_, canonical)| canonical.as_str())
    }

    pub fn canonical_for(&self, raw: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(label, _)| label == raw)
            .map(|(_, canonical)| canonical.as_str())
    }

    pub fn contains_canonical(&self, field: &str) -> bool {
        self.entries.iter().any(|(_, canonical)| canonical == field)
    }

    pub fn raw_labels(&self) -> Vec<&str> {
        self.entries.iter().map(|(raw, _)| raw.as_str()).collect()
    }
}

impl Serialize for ColumnMapping {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (raw, canonical) in &self.entries {
            map.serialize_entry(raw, canonical)?;
        }
        map.end()
    }
}

pub fn detect_columns<S: AsRef<str>>(labels: &[S], rules: &ColumnRules) -> ColumnMapping {
    let entries = labels
        .iter()
        .map(|label| {
            let raw = label.as_ref().to_owned();
            let canonical = canonical_for_label(&raw, rules);
            (raw, canonical)
        })
        .collect();

    ColumnMapping { entries }
}

/// Aliases first, then substring anchors in priority order, then the
/// trimmed label itself.
pub fn canonical_for_label(label: &str, rules: &ColumnRules) -> String {
    let normalized = label.trim().to_lowercase();

    if let Some(field) = rules.alias_for(&normalized) {
        return field.to_owned();
    }

    if normalized.contains("id") {
        EMPLOYEE_ID_FIELD.to_owned()
    } else if normalized.contains("name") {
        "name".to_owned()
    } else if normalized.contains("basic") || normalized.contains("salary") {
        rules.salary_anchor.canonical_field().to_owned()
    } else if normalized.contains("hra") {
        "hra".to_owned()
    } else if normalized.contains("bonus") {
        "bonus".to_owned()
    } else if normalized.contains("net") {
        "net_salary".to_owned()
    } else if normalized.contains("dept") || normalized.contains("department") {
        "department".to_owned()
    } else {
        label.trim().to_owned()
    }
}
