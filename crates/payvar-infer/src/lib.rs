use std::env;

use async_trait::async_trait;
use payvar_config::{
    DEFAULT_GEMINI_API_KEY_ENV, DEFAULT_LOCAL_ENDPOINT, DEFAULT_LOCAL_MODEL, InferenceConfig,
    NarrativeProviderKind,
};
use payvar_core::{AmountFormat, SummaryTable};
use serde_json::{Value, json};
use thiserror::Error;

mod enrich;

pub use enrich::{
    EnrichFailure, Enricher, SummaryOutcome, SummarySource, summarize_with_fallback,
};

pub const GEMINI_API_KEY_ENV: &str = DEFAULT_GEMINI_API_KEY_ENV;
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const MAX_PROMPT_ROWS: usize = 200;
const TOKENS_PER_WORD: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProviderOverrides {
    pub provider: Option<NarrativeProviderKind>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub api_key_env: Option<String>,
}

pub struct LoadedProvider {
    pub provider: Box<dyn NarrativeProvider>,
    pub provider_name: String,
    pub model_name: String,
}

#[derive(Debug, Error)]
pub enum InferError {
    #[error("missing Gemini API key in {0}")]
    MissingApiKey(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("response decoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

/// Bounded instruction plus aggregated table sent to a narrative provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrativePrompt {
    pub text: String,
    pub row_count: usize,
    pub max_words: u32,
}

impl NarrativePrompt {
    pub fn from_table(table: &SummaryTable, format: &AmountFormat, max_words: u32) -> Self {
        let max_words = max_words.max(1);
        let row_count = table.rows.len().min(MAX_PROMPT_ROWS);
        let text = format!(
            "You are summarizing payroll variance between a previous and a current pay period. \
Use only the figures in the table below. Do not invent employees, departments, causes or numbers that are not in the table. \
Write plain prose (no markdown, no lists) in under {max_words} words. \
Amounts are in {currency}. A percent_change of n/a means the previous value was zero. \
Rows whose field is total_variance are totals across all fields for that subject.\n\nTable:\n{table}",
            currency = format.currency_symbol,
            table = table.to_text(format, MAX_PROMPT_ROWS),
        );

        Self {
            text,
            row_count,
            max_words,
        }
    }

    fn max_output_tokens(&self) -> u32 {
        self.max_words.saturating_mul(TOKENS_PER_WORD).max(64)
    }
}

#[async_trait]
pub trait NarrativeProvider: Send + Sync {
    async fn narrate(&self, prompt: &NarrativePrompt) -> Result<String, InferError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MockNarrativeProvider;

#[async_trait]
impl NarrativeProvider for MockNarrativeProvider {
    async fn narrate(&self, prompt: &NarrativePrompt) -> Result<String, InferError> {
        Ok(format!(
            "Mock narrative covering {} variance rows.",
            prompt.row_count
        ))
    }
}

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    api_base: String,
}

impl GeminiProvider {
    pub fn from_env_key(api_key_env: &str, model: Option<String>) -> Result<Self, InferError> {
        let api_key = read_env_non_empty(api_key_env)
            .ok_or_else(|| InferError::MissingApiKey(api_key_env.to_owned()))?;

        Ok(Self::new(api_key, resolve_gemini_model(model)))
    }

    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            api_base: GEMINI_API_BASE.to_owned(),
        }
    }

    fn endpoint_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.api_base, self.model, self.api_key
        )
    }
}

#[async_trait]
impl NarrativeProvider for GeminiProvider {
    async fn narrate(&self, prompt: &NarrativePrompt) -> Result<String, InferError> {
        let body = json!({
            "contents": [
                {
                    "parts": [
                        {
                            "text": prompt.text
                        }
                    ]
                }
            ],
            "generationConfig": {
                "temperature": 0.2,
                "maxOutputTokens": prompt.max_output_tokens()
            }
        });

        let response_value: Value = self
            .client
            .post(self.endpoint_url())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        extract_gemini_text_part(&response_value).map(|text| text.trim().to_owned())
    }
}

/// Ollama-compatible `/api/generate` endpoint on the local machine.
#[derive(Debug, Clone)]
pub struct LocalModelProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl LocalModelProvider {
    pub fn new(endpoint: Option<String>, model: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: normalize_optional(endpoint)
                .unwrap_or_else(|| DEFAULT_LOCAL_ENDPOINT.to_owned()),
            model: normalize_optional(model).unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_owned()),
        }
    }
}

#[async_trait]
impl NarrativeProvider for LocalModelProvider {
    async fn narrate(&self, prompt: &NarrativePrompt) -> Result<String, InferError> {
        let body = json!({
            "model": self.model,
            "prompt": prompt.text,
            "stream": false,
            "options": {
                "temperature": 0.2,
                "num_predict": prompt.max_output_tokens()
            }
        });

        let response_value: Value = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        extract_local_text_part(&response_value)
    }
}

/// `Ok(None)` means enrichment is off and the deterministic summary is
/// used as is.
pub fn load_narrative_provider(
    config: &InferenceConfig,
    overrides: ProviderOverrides,
) -> Result<Option<LoadedProvider>, InferError> {
    let selected_provider = overrides.provider.unwrap_or(config.provider);
    let selected_model = first_non_empty(overrides.model, config.model.clone());
    let selected_endpoint = first_non_empty(overrides.endpoint, config.endpoint.clone());
    let selected_api_key_env =
        first_non_empty(overrides.api_key_env, Some(config.api_key_env.clone()))
            .unwrap_or_else(|| DEFAULT_GEMINI_API_KEY_ENV.to_owned());

    let loaded = match selected_provider {
        NarrativeProviderKind::Disabled => return Ok(None),
        NarrativeProviderKind::Auto => {
            let Some(api_key) = read_env_non_empty(&selected_api_key_env) else {
                return Ok(None);
            };
            let model = resolve_gemini_model(selected_model);
            LoadedProvider {
                provider: Box::new(GeminiProvider::new(api_key, model.clone())),
                provider_name: NarrativeProviderKind::Gemini.as_str().to_owned(),
                model_name: model,
            }
        }
        NarrativeProviderKind::Mock => LoadedProvider {
            provider: Box::new(MockNarrativeProvider),
            provider_name: NarrativeProviderKind::Mock.as_str().to_owned(),
            model_name: "mock".to_owned(),
        },
        NarrativeProviderKind::Gemini => {
            let provider = GeminiProvider::from_env_key(&selected_api_key_env, selected_model)?;
            LoadedProvider {
                model_name: provider.model.clone(),
                provider: Box::new(provider),
                provider_name: NarrativeProviderKind::Gemini.as_str().to_owned(),
            }
        }
        NarrativeProviderKind::Local => {
            let provider = LocalModelProvider::new(selected_endpoint, selected_model);
            LoadedProvider {
                model_name: provider.model.clone(),
                provider: Box::new(provider),
                provider_name: NarrativeProviderKind::Local.as_str().to_owned(),
            }
        }
    };

    Ok(Some(loaded))
}

fn extract_gemini_text_part(response: &Value) -> Result<&str, InferError> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .and_then(|parts| parts.first())
        .and_then(|part| part.get("text"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            InferError::InvalidResponse("missing candidates[0].content.parts[0].text".to_owned())
        })
}

fn extract_local_text_part(response: &Value) -> Result<String, InferError> {
    if let Some(text) = response.as_str() {
        return Ok(text.trim().to_owned());
    }

    let candidate_paths = [
        "/response",
        "/text",
        "/output",
        "/message/content",
        "/choices/0/text",
        "/choices/0/message/content",
    ];

    for path in candidate_paths {
        if let Some(text) = response.pointer(path).and_then(Value::as_str) {
            return Ok(text.trim().to_owned());
        }
    }

    Err(InferError::InvalidResponse(
        "missing local model text response body".to_owned(),
    ))
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn resolve_gemini_model(model: Option<String>) -> String {
    normalize_optional(model).unwrap_or_else(|| GEMINI_DEFAULT_MODEL.to_owned())
}

fn first_non_empty(left: Option<String>, right: Option<String>) -> Option<String> {
    normalize_optional(left).or_else(|| normalize_optional(right))
}

fn read_env_non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use payvar_core::{Record, compute_variance};

    use super::*;

    fn unique_env_name(prefix: &str) -> String {
        format!(
            "{prefix}_{}_{}",
            std::process::id(),
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("time")
                .as_nanos()
        )
    }

    fn sample_table() -> SummaryTable {
        let previous = Record::new("Engineering").with_amount("salary", 120000.0);
        let current = Record::new("Engineering").with_amount("salary", 130000.0);
        SummaryTable::from_variance("Engineering", &compute_variance(&current, &previous))
    }

    #[tokio::test]
    async fn mock_provider_is_deterministic() {
        let prompt = NarrativePrompt::from_table(&sample_table(), &AmountFormat::default(), 120);

        let first = MockNarrativeProvider.narrate(&prompt).await.expect("narrate");
        let second = MockNarrativeProvider.narrate(&prompt).await.expect("narrate");

        assert_eq!(first, "Mock narrative covering 2 variance rows.");
        assert_eq!(first, second);
    }

    #[test]
    fn prompt_contains_only_the_aggregated_table_and_limits() {
        let prompt = NarrativePrompt::from_table(&sample_table(), &AmountFormat::default(), 100);

        assert!(prompt.text.contains("under 100 words"));
        assert!(prompt.text.contains("Do not invent"));
        assert!(prompt.text.contains("Engineering | salary | 120,000 | 130,000 | 10,000 | 8.3%"));
        assert_eq!(prompt.row_count, 2);
        assert_eq!(prompt.max_output_tokens(), 200);
    }

    #[test]
    fn load_provider_disabled_returns_none() {
        let config = InferenceConfig {
            provider: NarrativeProviderKind::Disabled,
            ..InferenceConfig::default()
        };

        let loaded = load_narrative_provider(&config, ProviderOverrides::default())
            .expect("load provider");

        assert!(loaded.is_none());
    }

    #[test]
    fn load_provider_auto_skips_enrichment_when_key_missing() {
        let env_name = unique_env_name("PAYVAR_TEST_MISSING_KEY");
        let loaded = load_narrative_provider(
            &InferenceConfig::default(),
            ProviderOverrides {
                api_key_env: Some(env_name),
                ..ProviderOverrides::default()
            },
        )
        .expect("load provider");

        assert!(loaded.is_none());
    }

    #[test]
    fn load_provider_auto_chooses_gemini_when_key_present() {
        let env_name = unique_env_name("PAYVAR_TEST_GEMINI_KEY");

        // SAFETY: test-scoped environment variable with unique name.
        unsafe {
            env::set_var(&env_name, "test-key");
        }

        let loaded = load_narrative_provider(
            &InferenceConfig::default(),
            ProviderOverrides {
                provider: Some(NarrativeProviderKind::Auto),
                api_key_env: Some(env_name.clone()),
                ..ProviderOverrides::default()
            },
        )
        .expect("load provider")
        .expect("provider should be configured");

        assert_eq!(loaded.provider_name, NarrativeProviderKind::Gemini.as_str());
        assert_eq!(loaded.model_name, GEMINI_DEFAULT_MODEL);

        // SAFETY: cleanup of test-scoped environment variable.
        unsafe {
            env::remove_var(env_name);
        }
    }

    #[test]
    fn explicit_gemini_requires_api_key() {
        let env_name = unique_env_name("PAYVAR_TEST_GEMINI_ABSENT");
        let config = InferenceConfig {
            provider: NarrativeProviderKind::Gemini,
            api_key_env: env_name.clone(),
            ..InferenceConfig::default()
        };

        match load_narrative_provider(&config, ProviderOverrides::default()) {
            Err(InferError::MissingApiKey(var)) => assert_eq!(var, env_name),
            _ => panic!("expected missing api key error"),
        }
    }

    #[test]
    fn load_provider_reads_local_settings_with_overrides() {
        let config = InferenceConfig {
            provider: NarrativeProviderKind::Local,
            model: Some("llama3".to_owned()),
            ..InferenceConfig::default()
        };

        let loaded = load_narrative_provider(
            &config,
            ProviderOverrides {
                model: Some("  qwen3:8b ".to_owned()),
                ..ProviderOverrides::default()
            },
        )
        .expect("load provider")
        .expect("provider should be configured");

        assert_eq!(loaded.provider_name, "local");
        assert_eq!(loaded.model_name, "qwen3:8b");
    }

    #[test]
    fn extracts_text_from_known_response_shapes() {
        let gemini = json!({
            "candidates": [{"content": {"parts": [{"text": "Salaries rose."}]}}]
        });
        assert_eq!(extract_gemini_text_part(&gemini).expect("text"), "Salaries rose.");
        assert!(extract_gemini_text_part(&json!({"candidates": []})).is_err());

        let ollama = json!({"model": "qwen3:4b", "response": " Costs grew. ", "done": true});
        assert_eq!(extract_local_text_part(&ollama).expect("text"), "Costs grew.");

        let openai = json!({"choices": [{"message": {"content": "Flat."}}]});
        assert_eq!(extract_local_text_part(&openai).expect("text"), "Flat.");

        assert!(extract_local_text_part(&json!({"unexpected": 1})).is_err());
    }
}
