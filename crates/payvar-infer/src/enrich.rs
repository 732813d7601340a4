use std::sync::Arc;
use std::time::Duration;

use payvar_config::InferenceConfig;
use payvar_core::{AmountFormat, SummaryTable};
use serde::Serialize;
use thiserror::Error;
use tokio::time::timeout;

use crate::{LoadedProvider, NarrativePrompt, NarrativeProvider};

/// Why an enriched narrative was not used. Every variant falls back to the
/// deterministic summary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnrichFailure {
    #[error("no variance figures to narrate")]
    NothingToNarrate,
    #[error("narrative provider timed out after {0}ms")]
    TimedOut(u64),
    #[error("narrative provider failed: {0}")]
    Provider(String),
    #[error("narrative provider returned an empty response")]
    EmptyResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarySource {
    Deterministic,
    Enriched,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryOutcome {
    pub text: String,
    pub source: SummarySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

impl SummaryOutcome {
    fn deterministic(text: String, fallback_reason: Option<String>) -> Self {
        Self {
            text,
            source: SummarySource::Deterministic,
            provider: None,
            fallback_reason,
        }
    }
}

#[derive(Clone)]
pub struct Enricher {
    provider: Arc<dyn NarrativeProvider>,
    provider_name: String,
    model_name: String,
    timeout: Duration,
    max_words: u32,
}

impl std::fmt::Debug for Enricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enricher")
            .field("provider_name", &self.provider_name)
            .field("model_name", &self.model_name)
            .field("timeout", &self.timeout)
            .field("max_words", &self.max_words)
            .finish_non_exhaustive()
    }
}

impl Enricher {
    pub fn new(
        provider: Arc<dyn NarrativeProvider>,
        provider_name: impl Into<String>,
        config: &InferenceConfig,
    ) -> Self {
        Self {
            provider,
            provider_name: provider_name.into(),
            model_name: String::new(),
            timeout: Duration::from_millis(config.timeout_ms.max(1)),
            max_words: config.max_words.max(1),
        }
    }

    pub fn from_loaded(loaded: LoadedProvider, config: &InferenceConfig) -> Self {
        let mut enricher = Self::new(Arc::from(loaded.provider), loaded.provider_name, config);
        enricher.model_name = loaded.model_name;
        enricher
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub async fn try_enrich(
        &self,
        table: &SummaryTable,
        format: &AmountFormat,
    ) -> Result<String, EnrichFailure> {
        if table.is_empty() {
            return Err(EnrichFailure::NothingToNarrate);
        }

        let prompt = NarrativePrompt::from_table(table, format, self.max_words);
        let text = match timeout(self.timeout, self.provider.narrate(&prompt)).await {
            Ok(Ok(text)) => text,
            Ok(Err(err)) => return Err(EnrichFailure::Provider(err.to_string())),
            Err(_) => {
                let millis = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                return Err(EnrichFailure::TimedOut(millis));
            }
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(EnrichFailure::EmptyResponse);
        }
        Ok(text.to_owned())
    }
}

/// Returns the enriched narrative when available, otherwise exactly
/// `deterministic`. Never fails.
pub async fn summarize_with_fallback(
    deterministic: String,
    table: &SummaryTable,
    format: &AmountFormat,
    enricher: Option<&Enricher>,
) -> SummaryOutcome {
    let Some(enricher) = enricher else {
        return SummaryOutcome::deterministic(deterministic, None);
    };

    match enricher.try_enrich(table, format).await {
        Ok(text) => SummaryOutcome {
            text,
            source: SummarySource::Enriched,
            provider: Some(enricher.provider_name.clone()),
            fallback_reason: None,
        },
        Err(EnrichFailure::NothingToNarrate) => SummaryOutcome::deterministic(deterministic, None),
        Err(failure) => {
            tracing::warn!(
                provider = %enricher.provider_name,
                error = %failure,
                "narrative enrichment failed, using deterministic summary"
            );
            SummaryOutcome::deterministic(deterministic, Some(failure.to_string()))
        }
    }
}
