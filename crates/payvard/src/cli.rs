use std::ffi::OsStr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use payvar_config::NarrativeProviderKind;
use payvar_infer::ProviderOverrides;
use payvar_report::ReportFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid log format '{other}', expected one of: human, json"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ServeArgs {
    #[arg(long, help = "Address to listen on; overrides [server].bind")]
    pub bind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct CompareArgs {
    #[arg(long, help = "Payroll export (.xlsx, .xls, .ods or .csv) for the previous pay period")]
    pub previous: PathBuf,

    #[arg(long, help = "Payroll export (.xlsx, .xls, .ods or .csv) for the current pay period")]
    pub current: PathBuf,

    #[arg(long, help = "Label for the previous period (defaults to the file stem)")]
    pub previous_label: Option<String>,

    #[arg(long, help = "Label for the current period (defaults to the file stem)")]
    pub current_label: Option<String>,

    #[arg(
        long,
        default_value = "pdf",
        value_parser = parse_report_format,
        help = "Report format: json or pdf"
    )]
    pub format: ReportFormat,

    #[arg(
        long,
        help = "Output file; defaults to payroll_variance_<previous>_<current>.<ext> in the current directory"
    )]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Serve the payroll variance HTTP API
    Serve(ServeArgs),
    /// Compare two payroll exports and write a variance report
    Compare(CompareArgs),
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "Payroll variance service")]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = ".",
        help = "Workspace root holding .payvar/config.toml"
    )]
    pub workspace: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(
        long,
        global = true,
        default_value = "human",
        value_parser = parse_log_format,
        help = "Log format: human or json"
    )]
    pub log_format: LogFormat,

    #[arg(long, global = true, value_parser = parse_inference_provider)]
    pub inference_provider: Option<NarrativeProviderKind>,

    #[arg(long, global = true)]
    pub inference_model: Option<String>,

    #[arg(long, global = true)]
    pub inference_endpoint: Option<String>,

    #[arg(long, global = true)]
    pub inference_api_key_env: Option<String>,
}

impl Cli {
    pub fn provider_overrides(&self) -> ProviderOverrides {
        ProviderOverrides {
            provider: self.inference_provider,
            model: self.inference_model.clone(),
            endpoint: self.inference_endpoint.clone(),
            api_key_env: self.inference_api_key_env.clone(),
        }
    }
}

pub fn parse_cli() -> Cli {
    let mut args: Vec<_> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == OsStr::new("--")) {
        args.remove(1);
    }

    Cli::parse_from(args)
}

fn parse_inference_provider(value: &str) -> Result<NarrativeProviderKind, String> {
    value.parse()
}

fn parse_report_format(value: &str) -> Result<ReportFormat, String> {
    value.parse()
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse()
}
