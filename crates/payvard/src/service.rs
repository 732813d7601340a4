use std::sync::Arc;

use payvar_config::PayvarConfig;
use payvar_core::{
    AmountFormat, ColumnMapping, ColumnRules, CoreError, GroupVariance, Record, Schema,
    SummaryTable, VarianceSet, aggregate_by_group, assemble_report, compute_variance,
    detect_columns, extract_records, generate_group_summary, generate_summary, group_variance,
    normalize_entity_id,
};
use payvar_infer::{
    Enricher, InferError, ProviderOverrides, SummarySource, load_narrative_provider,
    summarize_with_fallback,
};
use payvar_report::{RenderError, ReportFormat, report_filename};
use payvar_store::{PayrollStore, PeriodSnapshot, StoreError};
use serde::Serialize;
use thiserror::Error;

use crate::ingest::{IngestError, decode_upload};

pub const PREVIOUS_TOTAL_FIELD: &str = "previous_total";
pub const CURRENT_TOTAL_FIELD: &str = "current_total";
pub const TOTAL_DIFFERENCE_FIELD: &str = "total_difference";
pub const TOTAL_PERCENT_FIELD: &str = "total_percent_change";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Input(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    ZeroBaseline(String),
    #[error("{0}")]
    TooLarge(String),
    #[error("payroll store error: {0}")]
    Store(#[from] StoreError),
    #[error("report rendering failed: {0}")]
    Render(#[from] RenderError),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Input(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
            Self::ZeroBaseline(_) => "zero_baseline",
            Self::TooLarge(_) => "payload_too_large",
            Self::Store(_) | Self::Render(_) => "internal_error",
        }
    }
}

impl From<IngestError> for ServiceError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::TooLarge => Self::TooLarge(err.to_string()),
            other => Self::Input(other.to_string()),
        }
    }
}

impl From<CoreError> for ServiceError {
    fn from(err: CoreError) -> Self {
        Self::Input(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadSummary {
    pub period: String,
    pub uploaded_records: usize,
    pub replaced_records: usize,
    pub skipped_rows: Vec<usize>,
    pub columns_detected: ColumnMapping,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub periods: Vec<String>,
    pub narrative_provider: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmployeeVariance {
    pub employee_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub previous_period: String,
    pub current_period: String,
    pub variance: VarianceSet,
    pub summary: String,
    pub summary_source: SummarySource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepartmentVariance {
    pub previous_period: String,
    pub current_period: String,
    pub group_field: String,
    pub departments: Vec<GroupVariance>,
    pub summary: String,
    pub summary_source: SummarySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReport {
    pub content_type: &'static str,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Upload, variance and report operations over an injected store.
pub struct PayrollService {
    store: Arc<dyn PayrollStore>,
    rules: ColumnRules,
    schema: Schema,
    format: AmountFormat,
    enricher: Option<Enricher>,
}

impl PayrollService {
    pub fn new(
        store: Arc<dyn PayrollStore>,
        config: &PayvarConfig,
        enricher: Option<Enricher>,
    ) -> Self {
        Self {
            store,
            rules: ColumnRules::from_config(&config.columns),
            schema: Schema::from_config(&config.columns),
            format: AmountFormat::from_config(&config.format),
            enricher,
        }
    }

    /// Builds the narrative provider from `[inference]` plus overrides; an
    /// unconfigured provider leaves summaries deterministic.
    pub fn from_config(
        store: Arc<dyn PayrollStore>,
        config: &PayvarConfig,
        overrides: ProviderOverrides,
    ) -> Result<Self, InferError> {
        let enricher = load_narrative_provider(&config.inference, overrides)?
            .map(|loaded| Enricher::from_loaded(loaded, &config.inference));
        match &enricher {
            Some(enricher) => tracing::info!(
                provider = enricher.provider_name(),
                model = enricher.model_name(),
                "narrative enrichment enabled"
            ),
            None => tracing::info!("narrative enrichment disabled, using deterministic summaries"),
        }
        Ok(Self::new(store, config, enricher))
    }

    pub fn format(&self) -> &AmountFormat {
        &self.format
    }

    pub fn health(&self) -> Result<HealthStatus, ServiceError> {
        Ok(HealthStatus {
            status: "ok",
            periods: self.store.periods()?,
            narrative_provider: self
                .enricher
                .as_ref()
                .map(|enricher| enricher.provider_name().to_owned()),
        })
    }

    pub fn upload(&self, period: &str, body: &[u8]) -> Result<UploadSummary, ServiceError> {
        let period = validate_period(period)?;
        let table = decode_upload(body)?;
        let mapping = detect_columns(&table.headers, &self.rules);
        let extraction = extract_records(&table, &mapping, &self.schema)?;
        if extraction.records.is_empty() {
            return Err(ServiceError::Input(format!(
                "no rows with an employee id in upload for period '{period}'"
            )));
        }

        let stats = self
            .store
            .put_snapshot(period, extraction.records, mapping.clone())?;
        tracing::info!(
            period,
            stored = stats.stored,
            replaced = stats.replaced,
            skipped = extraction.skipped_rows.len(),
            "ingested payroll upload"
        );

        Ok(UploadSummary {
            period: period.to_owned(),
            uploaded_records: stats.stored,
            replaced_records: stats.replaced,
            skipped_rows: extraction.skipped_rows,
            columns_detected: mapping,
        })
    }

    /// Per-employee figures with a deterministic summary.
    pub async fn employee_variance(
        &self,
        employee_id: &str,
        previous_period: &str,
        current_period: &str,
        strict_baseline: bool,
    ) -> Result<EmployeeVariance, ServiceError> {
        let previous_period = validate_period(previous_period)?;
        let current_period = validate_period(current_period)?;
        let employee_id = normalize_entity_id(employee_id)
            .ok_or_else(|| ServiceError::Input("employee id must not be empty".to_owned()))?;
        let employee_id = employee_id.as_str();
        self.ensure_period(previous_period)?;
        self.ensure_period(current_period)?;

        let previous = self.employee_record(employee_id, previous_period)?;
        let current = self.employee_record(employee_id, current_period)?;
        let variance = compute_variance(&*current, &*previous);

        if strict_baseline && variance.total.previous == 0.0 {
            return Err(ServiceError::ZeroBaseline(format!(
                "employee '{employee_id}' has a zero total in period '{previous_period}'; \
percent change needs a positive baseline"
            )));
        }

        // Per-employee rows never reach the narrative provider.
        let summary = generate_summary(&variance, &self.format);

        Ok(EmployeeVariance {
            employee_id: employee_id.to_owned(),
            name: current
                .entity_name()
                .or_else(|| previous.entity_name())
                .map(str::to_owned),
            previous_period: previous_period.to_owned(),
            current_period: current_period.to_owned(),
            variance,
            summary,
            summary_source: SummarySource::Deterministic,
        })
    }

    pub async fn department_variance(
        &self,
        previous_period: &str,
        current_period: &str,
    ) -> Result<DepartmentVariance, ServiceError> {
        let (previous, current) = self.snapshots(previous_period, current_period)?;
        let departments = self.department_groups(&previous, &current);

        let deterministic = generate_group_summary(&departments, &self.format);
        let table = SummaryTable::from_groups(&departments);
        let outcome =
            summarize_with_fallback(deterministic, &table, &self.format, self.enricher.as_ref())
                .await;

        Ok(DepartmentVariance {
            previous_period: previous.period,
            current_period: current.period,
            group_field: self.schema.group_field.clone(),
            departments,
            summary: outcome.text,
            summary_source: outcome.source,
            fallback_reason: outcome.fallback_reason,
        })
    }

    /// Department narrative on page one, one row per employee with period
    /// totals after that.
    pub async fn report(
        &self,
        previous_period: &str,
        current_period: &str,
        format: ReportFormat,
    ) -> Result<RenderedReport, ServiceError> {
        let (previous, current) = self.snapshots(previous_period, current_period)?;
        let departments = self.department_groups(&previous, &current);

        let deterministic = generate_group_summary(&departments, &self.format);
        let table = SummaryTable::from_groups(&departments);
        let outcome =
            summarize_with_fallback(deterministic, &table, &self.format, self.enricher.as_ref())
                .await;

        let report = assemble_report(
            format!(
                "Payroll variance: {} to {}",
                previous.period, current.period
            ),
            outcome.text,
            self.report_rows(&previous, &current),
            current.detected_columns.clone(),
        );

        let renderer = format.renderer(&self.format);
        let bytes = renderer.render(&report)?;
        tracing::info!(
            previous = %previous.period,
            current = %current.period,
            format = %format,
            bytes = bytes.len(),
            "rendered payroll report"
        );

        Ok(RenderedReport {
            content_type: renderer.content_type(),
            filename: report_filename(&previous.period, &current.period, renderer.file_extension()),
            bytes,
        })
    }

    fn ensure_period(&self, period: &str) -> Result<(), ServiceError> {
        if self.store.periods()?.iter().any(|known| known == period) {
            Ok(())
        } else {
            Err(period_not_found(period))
        }
    }

    fn employee_record(
        &self,
        employee_id: &str,
        period: &str,
    ) -> Result<Arc<Record>, ServiceError> {
        self.store.record(employee_id, period)?.ok_or_else(|| {
            ServiceError::NotFound(format!(
                "employee '{employee_id}' not found in period '{period}'"
            ))
        })
    }

    fn snapshots(
        &self,
        previous_period: &str,
        current_period: &str,
    ) -> Result<(PeriodSnapshot, PeriodSnapshot), ServiceError> {
        let previous_period = validate_period(previous_period)?;
        let current_period = validate_period(current_period)?;
        let previous = self
            .store
            .snapshot(previous_period)?
            .ok_or_else(|| period_not_found(previous_period))?;
        let current = self
            .store
            .snapshot(current_period)?
            .ok_or_else(|| period_not_found(current_period))?;
        Ok((previous, current))
    }

    fn department_groups(
        &self,
        previous: &PeriodSnapshot,
        current: &PeriodSnapshot,
    ) -> Vec<GroupVariance> {
        let current_groups = aggregate_by_group(current.records.iter().map(Arc::as_ref));
        let previous_groups = aggregate_by_group(previous.records.iter().map(Arc::as_ref));
        group_variance(&current_groups, &previous_groups)
    }

    fn report_rows(&self, previous: &PeriodSnapshot, current: &PeriodSnapshot) -> Vec<Record> {
        let mut rows = Vec::with_capacity(current.records.len());
        for record in current.records.iter().map(|record| &**record) {
            let variance = match previous.get(record.entity_id()) {
                Some(previous_record) => compute_variance(record, previous_record),
                None => compute_variance(record, &Record::new(record.entity_id())),
            };
            rows.push(with_totals(record.clone(), &variance));
        }

        // Employees that left after the previous period.
        for record in previous.records.iter().map(|record| &**record) {
            if current.get(record.entity_id()).is_some() {
                continue;
            }
            let mut row = Record::new(record.entity_id());
            if let Some(name) = record.entity_name() {
                row = row.with_name(name);
            }
            if let Some(group) = record.group_key() {
                row = row.with_group(&self.schema.group_field, group);
            }
            let variance = compute_variance(&Record::new(record.entity_id()), record);
            rows.push(with_totals(row, &variance));
        }
        rows
    }
}

fn with_totals(record: Record, variance: &VarianceSet) -> Record {
    let total = &variance.total;
    let record = record
        .with_amount(PREVIOUS_TOTAL_FIELD, total.previous)
        .with_amount(CURRENT_TOTAL_FIELD, total.current)
        .with_amount(TOTAL_DIFFERENCE_FIELD, total.difference);
    match total.percent_change {
        Some(pct) => record.with_amount(TOTAL_PERCENT_FIELD, pct),
        None => record.with_text(TOTAL_PERCENT_FIELD, "n/a"),
    }
}

fn validate_period(period: &str) -> Result<&str, ServiceError> {
    let period = period.trim();
    if period.is_empty() {
        return Err(ServiceError::Input("period label must not be empty".to_owned()));
    }
    Ok(period)
}

fn period_not_found(period: &str) -> ServiceError {
    ServiceError::NotFound(format!("no payroll data uploaded for period '{period}'"))
}
