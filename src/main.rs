//! `service-host` binary: load configuration, run services until a
//! shutdown signal arrives, exit with the shutdown outcome.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use service_host::{Application, ServiceRegistry};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum LogFormat {
    /// Compact human-readable lines
    #[default]
    Text,
    /// JSON lines for log aggregators
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "service-host")]
#[command(version)]
#[command(about = "Host pluggable services behind one control surface", long_about = None)]
struct Cli {
    /// Configuration file (YAML or JSON)
    #[arg(short, long, env = "SERVICE_HOST_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .compact()
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let registry = ServiceRegistry::with_builtin_services()
        .context("Failed to register built-in services")?;

    let mut app = match &cli.config {
        Some(path) => Application::from_config_file(path, registry)
            .await
            .with_context(|| format!("Failed to start from {}", path.display()))?,
        None => {
            tracing::warn!("No configuration file given, using defaults");
            let mut config = service_host::Config::default();
            config
                .apply_env_overrides()
                .context("Invalid environment override")?;
            Application::new(config, registry)
                .await
                .context("Failed to build application")?
        }
    };

    let snapshot = app.start().await;
    for (name, service) in &snapshot.services {
        tracing::info!(service = %name, state = %service.state, "Service status after start");
    }

    let addrs = app.serve().context("Failed to start control API")?;
    if !addrs.is_empty() {
        tracing::info!(addrs = ?addrs, "Control API available");
    }

    shutdown_signal().await;

    let report = app.shutdown().await;
    for failure in &report.failed {
        tracing::warn!(service = %failure.service, error = %failure.message, "Service failed to stop");
    }
    for name in &report.timed_out {
        tracing::warn!(service = %name, "Service did not stop in time");
    }
    Ok(app.exit_code(&report))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = ?e, "Fatal startup error");
            ExitCode::from(1)
        }
    }
}
