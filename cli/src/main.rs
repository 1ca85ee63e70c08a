//! Evidentia server and operator CLI.
//!
//! Usage:
//!   evidentia serve --config evidentia.toml
//!   evidentia --log-format json serve --config evidentia.toml
//!   evidentia check-config --config evidentia.toml
//!   evidentia demo

mod demo;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use evidentia_api::AppState;
use evidentia_contracts::{EvidentiaError, EvidentiaResult};
use evidentia_core::{traits::Clock, InMemoryBackend, SystemClock};
use evidentia_policy::EvidentiaConfig;
use evidentia_webhook::HmacProviderVerifier;

// ── CLI definition ────────────────────────────────────────────────────────────

/// Evidentia: evidence-grade digital delivery.
#[derive(Parser)]
#[command(
    name = "evidentia",
    about = "Evidence-grade digital delivery service",
    long_about = "Serves token-gated downloads, ingests payment-provider notifications\n\
                  and keeps a hash-chained ledger of every delivery event."
)]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service.
    Serve {
        #[arg(long, short, default_value = "evidentia.toml")]
        config: PathBuf,
    },
    /// Load and validate a configuration file, then print its non-secret settings.
    CheckConfig {
        #[arg(long, short, default_value = "evidentia.toml")]
        config: PathBuf,
    },
    /// Walk one order through checkout, download, dispute and evidence in memory.
    Demo,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let result = match cli.command {
        Command::Serve { config } => serve(&config),
        Command::CheckConfig { config } => check_config(&config),
        Command::Demo => demo::run(),
    };

    if let Err(e) = result {
        eprintln!("evidentia: {e}");
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins; otherwise `info`.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn serve(path: &Path) -> EvidentiaResult<()> {
    let config = EvidentiaConfig::from_file(path)?;
    let addr: SocketAddr = config.server.bind.parse().map_err(|e| EvidentiaError::ConfigError {
        reason: format!("server.bind '{}' is not a socket address: {e}", config.server.bind),
    })?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let backend = InMemoryBackend::new(
        &config.key_material()?,
        config.delivery_settings(),
        config.store_identity(),
        clock.clone(),
    );
    let verifier = HmacProviderVerifier::new(
        config.secrets.webhook_secret.as_bytes().to_vec(),
        chrono::Duration::seconds(config.webhook.signature_tolerance_secs),
        clock,
    );
    let state = AppState::new(
        backend.context(),
        Arc::new(verifier),
        config.server.admin_token.as_str(),
    )?;

    let runtime = tokio::runtime::Runtime::new().map_err(|e| EvidentiaError::ConfigError {
        reason: format!("failed to start async runtime: {e}"),
    })?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            EvidentiaError::ConfigError {
                reason: format!("cannot bind {addr}: {e}"),
            }
        })?;
        info!(%addr, "evidentia listening");
        axum::serve(
            listener,
            evidentia_api::app(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| EvidentiaError::External {
            service: "http",
            reason: e.to_string(),
        })
    })?;

    info!("evidentia stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler; run until killed.
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn check_config(path: &Path) -> EvidentiaResult<()> {
    let config = EvidentiaConfig::from_file(path)?;
    let settings = config.delivery_settings();
    let summary = serde_json::json!({
        "bind": config.server.bind,
        "publicBaseUrl": settings.public_base_url,
        "tokenTtlMinutes": settings.token_ttl_minutes,
        "downloadLimit": settings.download_limit,
        "downloadWindowDays": settings.download_window_days,
        "stageDownloadLimit": settings.stage_download_limit,
        "redeemLinkTtlHours": settings.redeem_link_ttl_hours,
        "mailAttempts": settings.mail_attempts,
        "retentionDays": settings.retention_days,
        "termsVersion": settings.terms_version,
        "signatureToleranceSecs": config.webhook.signature_tolerance_secs,
        "store": config.store.name,
    });
    println!("{path}: ok", path = path.display());
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).unwrap_or_else(|_| summary.to_string())
    );
    Ok(())
}
