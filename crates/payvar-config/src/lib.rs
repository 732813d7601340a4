use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PAYVAR_DIR_NAME: &str = ".payvar";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const DEFAULT_LOCAL_ENDPOINT: &str = "http://127.0.0.1:11434/api/generate";
pub const DEFAULT_LOCAL_MODEL: &str = "qwen3:4b";
pub const DEFAULT_ENRICH_TIMEOUT_MS: u64 = 8_000;
pub const DEFAULT_SUMMARY_MAX_WORDS: u32 = 120;
pub const DEFAULT_GROUP_FIELD: &str = "department";
pub const DEFAULT_CURRENCY_SYMBOL: &str = "\u{20b9}";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
const MAX_DECIMALS: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeProviderKind {
    #[default]
    Auto,
    Disabled,
    Mock,
    Gemini,
    Local,
}

impl NarrativeProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Disabled => "disabled",
            Self::Mock => "mock",
            Self::Gemini => "gemini",
            Self::Local => "local",
        }
    }
}

impl std::str::FromStr for NarrativeProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "auto" => Ok(Self::Auto),
            "disabled" => Ok(Self::Disabled),
            "mock" => Ok(Self::Mock),
            "gemini" => Ok(Self::Gemini),
            "local" => Ok(Self::Local),
            other => Err(format!(
                "invalid provider '{other}', expected one of: auto, disabled, mock, gemini, local"
            )),
        }
    }
}

/// Which canonical name the `basic`/`salary` substring anchors resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SalaryAnchor {
    #[default]
    Basic,
    Salary,
}

impl SalaryAnchor {
    pub fn canonical_field(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Salary => "salary",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PayvarConfig {
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub columns: ColumnsConfig,
    #[serde(default)]
    pub format: FormatConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default)]
    pub provider: NarrativeProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_words")]
    pub max_words: u32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            provider: NarrativeProviderKind::Auto,
            model: None,
            endpoint: None,
            api_key_env: default_api_key_env(),
            timeout_ms: default_timeout_ms(),
            max_words: default_max_words(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnAlias {
    pub label: String,
    pub field: String,
}

impl ColumnAlias {
    pub fn new(label: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            field: field.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnsConfig {
    #[serde(default)]
    pub salary_anchor: SalaryAnchor,
    #[serde(default = "default_group_field")]
    pub group_field: String,
    #[serde(default = "default_required_columns")]
    pub required: Vec<String>,
    #[serde(default = "default_aliases")]
    pub aliases: Vec<ColumnAlias>,
}

impl Default for ColumnsConfig {
    fn default() -> Self {
        Self {
            salary_anchor: SalaryAnchor::Basic,
            group_field: default_group_field(),
            required: default_required_columns(),
            aliases: default_aliases(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatConfig {
    #[serde(default = "default_currency_symbol")]
    pub currency_symbol: String,
    #[serde(default)]
    pub amount_decimals: u8,
    #[serde(default = "default_percent_decimals")]
    pub percent_decimals: u8,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            currency_symbol: default_currency_symbol(),
            amount_decimals: 0,
            percent_decimals: default_percent_decimals(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub fn payvar_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(PAYVAR_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    payvar_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn load_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<PayvarConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(PayvarConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: PayvarConfig = toml::from_str(&raw)?;
    Ok(normalize_config(parsed))
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<PayvarConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(payvar_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = PayvarConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

/// Reports settings that load fine but will not behave as the operator
/// probably intended.
pub fn validate_config(config: &PayvarConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    let mut claimed: HashMap<String, &str> = HashMap::new();
    for alias in &config.columns.aliases {
        let key = alias.label.trim().to_lowercase();
        match claimed.get(&key) {
            Some(existing) if *existing != alias.field => warnings.push(ConfigWarning {
                code: "alias_conflict",
                message: format!(
                    "alias '{}' maps to '{}' but was already registered for '{}'; the first registration wins",
                    alias.label.trim(),
                    alias.field,
                    existing
                ),
            }),
            Some(_) => {}
            None => {
                claimed.insert(key, alias.field.as_str());
            }
        }
    }

    if config.inference.timeout_ms == 0 {
        warnings.push(ConfigWarning {
            code: "enrich_timeout_zero",
            message: "inference.timeout_ms is 0; every enrichment attempt will time out and fall back"
                .to_owned(),
        });
    }

    if config.format.amount_decimals > MAX_DECIMALS || config.format.percent_decimals > MAX_DECIMALS
    {
        warnings.push(ConfigWarning {
            code: "format_decimals",
            message: format!("format decimals are clamped to at most {MAX_DECIMALS}"),
        });
    }

    if !config
        .columns
        .required
        .iter()
        .any(|field| field == "employee_id")
    {
        warnings.push(ConfigWarning {
            code: "employee_id_optional",
            message: "columns.required does not include employee_id; rows without ids are skipped"
                .to_owned(),
        });
    }

    warnings
}

fn default_api_key_env() -> String {
    DEFAULT_GEMINI_API_KEY_ENV.to_owned()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_ENRICH_TIMEOUT_MS
}

fn default_max_words() -> u32 {
    DEFAULT_SUMMARY_MAX_WORDS
}

fn default_group_field() -> String {
    DEFAULT_GROUP_FIELD.to_owned()
}

fn default_required_columns() -> Vec<String> {
    vec!["employee_id".to_owned()]
}

fn default_currency_symbol() -> String {
    DEFAULT_CURRENCY_SYMBOL.to_owned()
}

fn default_percent_decimals() -> u8 {
    1
}

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_owned()
}

pub fn default_aliases() -> Vec<ColumnAlias> {
    [
        ("Emp ID", "employee_id"),
        ("Employee ID", "employee_id"),
        ("Employee Code", "employee_id"),
        ("Employee Name", "name"),
        ("Emp Name", "name"),
        ("Dept", "department"),
        ("Department", "department"),
        ("Department Name", "department"),
        ("Basic Pay", "basic"),
        ("House Rent Allowance", "hra"),
        ("Net Salary", "net_salary"),
        ("Net Pay", "net_salary"),
        ("Old Salary", "previous_salary"),
        ("New Salary", "salary"),
    ]
    .into_iter()
    .map(|(label, field)| ColumnAlias::new(label, field))
    .collect()
}

fn normalize_optional(input: Option<String>) -> Option<String> {
    input
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn normalize_config(mut config: PayvarConfig) -> PayvarConfig {
    config.inference.model = normalize_optional(config.inference.model.take());
    config.inference.endpoint = normalize_optional(config.inference.endpoint.take());

    let api_key_env = config.inference.api_key_env.trim();
    if api_key_env.is_empty() {
        config.inference.api_key_env = default_api_key_env();
    } else {
        config.inference.api_key_env = api_key_env.to_owned();
    }

    let group_field = config.columns.group_field.trim();
    if group_field.is_empty() {
        config.columns.group_field = default_group_field();
    } else {
        config.columns.group_field = group_field.to_owned();
    }

    config.columns.aliases.retain(|alias| {
        !alias.label.trim().is_empty() && !alias.field.trim().is_empty()
    });
    for alias in &mut config.columns.aliases {
        alias.label = alias.label.trim().to_owned();
        alias.field = alias.field.trim().to_owned();
    }

    config.format.amount_decimals = config.format.amount_decimals.min(MAX_DECIMALS);
    config.format.percent_decimals = config.format.percent_decimals.min(MAX_DECIMALS);

    if config.server.bind.trim().is_empty() {
        config.server.bind = default_bind_addr();
    }

    config
}
