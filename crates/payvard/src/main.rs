use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use payvar_config::{PayvarConfig, config_path, ensure_workspace_config, validate_config};
use payvar_store::MemoryStore;
use payvard::cli::{Cli, Commands, CompareArgs, LogFormat, ServeArgs, parse_cli};
use payvard::{PayrollService, router};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = parse_cli();
    init_tracing(cli.log_format);
    run(cli).await
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Human => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let workspace = cli.workspace.canonicalize().with_context(|| {
        format!(
            "failed to resolve workspace path {}",
            cli.workspace.display()
        )
    })?;
    tracing::info!(
        workspace = %workspace.display(),
        log_format = cli.log_format.as_str(),
        "starting payvard"
    );

    let config = ensure_workspace_config(&workspace).with_context(|| {
        format!(
            "failed to load or create workspace config at {}",
            config_path(&workspace).display()
        )
    })?;
    for warning in validate_config(&config) {
        tracing::warn!(code = warning.code, "config warning: {}", warning.message);
    }

    let service = PayrollService::from_config(
        Arc::new(MemoryStore::new()),
        &config,
        cli.provider_overrides(),
    )
    .context("failed to configure narrative provider")?;

    match cli.command {
        Some(Commands::Compare(args)) => run_compare(&service, args).await,
        Some(Commands::Serve(args)) => run_serve(service, &config, args).await,
        None => run_serve(service, &config, ServeArgs { bind: None }).await,
    }
}

async fn run_serve(service: PayrollService, config: &PayvarConfig, args: ServeArgs) -> Result<()> {
    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let app = router(Arc::new(service));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    let local_addr = listener.local_addr().context("failed to read bound address")?;
    tracing::info!(address = %local_addr, "payroll variance API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server exited with error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

async fn run_compare(service: &PayrollService, args: CompareArgs) -> Result<()> {
    let (previous_label, current_label) = period_labels(&args);

    for (label, path) in [(&previous_label, &args.previous), (&current_label, &args.current)] {
        let body = std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let summary = service
            .upload(label, &body)
            .with_context(|| format!("failed to ingest {}", path.display()))?;
        if !summary.skipped_rows.is_empty() {
            tracing::warn!(
                period = %label,
                rows = ?summary.skipped_rows,
                "rows without an employee id were skipped"
            );
        }
    }

    let rendered = service
        .report(&previous_label, &current_label, args.format)
        .await
        .context("failed to build variance report")?;
    let out = args
        .out
        .unwrap_or_else(|| PathBuf::from(&rendered.filename));
    std::fs::write(&out, &rendered.bytes)
        .with_context(|| format!("failed to write report to {}", out.display()))?;

    println!("{}", out.display());
    Ok(())
}

fn period_labels(args: &CompareArgs) -> (String, String) {
    let previous = args
        .previous_label
        .clone()
        .unwrap_or_else(|| file_stem_label(&args.previous, "previous"));
    let current = args
        .current_label
        .clone()
        .unwrap_or_else(|| file_stem_label(&args.current, "current"));

    if previous == current {
        ("previous".to_owned(), "current".to_owned())
    } else {
        (previous, current)
    }
}

fn file_stem_label(path: &Path, fallback: &str) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().trim().to_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| fallback.to_owned())
}
