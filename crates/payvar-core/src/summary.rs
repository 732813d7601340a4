use serde::Serialize;

use crate::aggregate::GroupVariance;
use crate::format::AmountFormat;
use crate::variance::{FieldVariance, VarianceSet};

pub const NO_VARIANCE_MESSAGE: &str = "No variance data found.";

/// `net_salary` reads as `Net salary`.
pub fn display_field_name(field: &str) -> String {
    let spaced = field.trim().replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

fn describe_entry(entry: &FieldVariance, format: &AmountFormat) -> String {
    let label = display_field_name(&entry.field);
    match entry.percent_change {
        Some(pct) => format!(
            "{label} {} by {}% ({})",
            if pct > 0.0 { "increased" } else { "decreased" },
            format.percent(pct.abs()),
            format.currency(entry.difference.abs())
        ),
        None if entry.previous == 0.0 && entry.current != 0.0 => format!(
            "{label} changed from {} to {}",
            format.currency(0.0),
            format.currency(entry.current)
        ),
        None => format!("{label} changed by {}", format.currency(entry.difference)),
    }
}

fn sentences(variance: &VarianceSet, format: &AmountFormat) -> Vec<String> {
    variance
        .entries
        .iter()
        .map(|entry| describe_entry(entry, format))
        .collect()
}

/// Deterministic narrative for one variance set. Pure and infallible.
pub fn generate_summary(variance: &VarianceSet, format: &AmountFormat) -> String {
    let parts = sentences(variance, format);
    if parts.is_empty() {
        return NO_VARIANCE_MESSAGE.to_owned();
    }
    format!("{}.", parts.join(". "))
}

/// Same phrasing per group, each prefixed with the group name.
pub fn generate_group_summary(groups: &[GroupVariance], format: &AmountFormat) -> String {
    let paragraphs: Vec<String> = groups
        .iter()
        .filter(|group| !group.variance.is_empty())
        .map(|group| {
            format!(
                "{}: {}.",
                group.group,
                sentences(&group.variance, format).join(". ")
            )
        })
        .collect();

    if paragraphs.is_empty() {
        NO_VARIANCE_MESSAGE.to_owned()
    } else {
        paragraphs.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub subject: String,
    pub field: String,
    pub previous: f64,
    pub current: f64,
    pub difference: f64,
    pub percent_change: Option<f64>,
}

/// Aggregated numbers handed to a narrative provider. Never holds raw
/// per-employee rows, only variance figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryTable {
    pub rows: Vec<SummaryRow>,
}

impl SummaryTable {
    pub fn from_variance(subject: &str, variance: &VarianceSet) -> Self {
        let mut table = Self::default();
        table.push_variance(subject, variance);
        table
    }

    pub fn from_groups(groups: &[GroupVariance]) -> Self {
        let mut table = Self::default();
        for group in groups {
            table.push_variance(&group.group, &group.variance);
        }
        table
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn push_variance(&mut self, subject: &str, variance: &VarianceSet) {
        if variance.is_empty() {
            return;
        }
        for entry in variance.entries.iter().chain(std::iter::once(&variance.total)) {
            self.rows.push(SummaryRow {
                subject: subject.to_owned(),
                field: entry.field.clone(),
                previous: entry.previous,
                current: entry.current,
                difference: entry.difference,
                percent_change: entry.percent_change,
            });
        }
    }

    /// Pipe-separated text, at most `max_rows` data rows.
    pub fn to_text(&self, format: &AmountFormat, max_rows: usize) -> String {
        let mut lines = vec!["subject | field | previous | current | difference | percent_change".to_owned()];
        for row in self.rows.iter().take(max_rows) {
            let pct = row
                .percent_change
                .map(|pct| format!("{}%", format.percent(pct)))
                .unwrap_or_else(|| "n/a".to_owned());
            lines.push(format!(
                "{} | {} | {} | {} | {} | {}",
                row.subject,
                row.field,
                format.amount(row.previous),
                format.amount(row.current),
                format.amount(row.difference),
                pct
            ));
        }
        if self.rows.len() > max_rows {
            lines.push(format!("({} more rows omitted)", self.rows.len() - max_rows));
        }
        lines.join("\n")
    }
}
