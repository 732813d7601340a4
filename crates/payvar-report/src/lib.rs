use std::fmt;
use std::str::FromStr;

use payvar_core::{AmountFormat, Report};
use thiserror::Error;

mod pdf;

pub use pdf::PdfRenderer;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to encode report as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to build PDF report: {0}")]
    Pdf(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Json,
    Pdf,
}

impl ReportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Pdf => "pdf",
        }
    }

    pub fn renderer(self, format: &AmountFormat) -> Box<dyn ReportRenderer> {
        match self {
            Self::Json => Box::new(JsonRenderer),
            Self::Pdf => Box::new(PdfRenderer::new(format.clone())),
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pdf" => Ok(Self::Pdf),
            other => Err(format!(
                "invalid report format '{other}', expected one of: json, pdf"
            )),
        }
    }
}

pub trait ReportRenderer: Send + Sync {
    fn content_type(&self) -> &'static str;

    fn file_extension(&self) -> &'static str;

    fn render(&self, report: &Report) -> Result<Vec<u8>, RenderError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRenderer;

impl ReportRenderer for JsonRenderer {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn file_extension(&self) -> &'static str {
        "json"
    }

    fn render(&self, report: &Report) -> Result<Vec<u8>, RenderError> {
        let mut bytes = serde_json::to_vec_pretty(report)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// `payroll_variance_<previous>_<current>.<extension>`, with anything
/// outside `[A-Za-z0-9._-]` in the period labels replaced by `-`.
pub fn report_filename(previous: &str, current: &str, extension: &str) -> String {
    format!(
        "payroll_variance_{}_{}.{extension}",
        filename_safe(previous),
        filename_safe(current)
    )
}

fn filename_safe(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '-'
            }
        })
        .collect()
}
