//! termbridge-server
//!
//! Hosts durable shell sessions behind a WebSocket gateway.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use termbridge_server::{Gateway, RegistryConfig, ServerConfig, SessionRegistry};

#[derive(Parser)]
#[command(name = "termbridge-server")]
#[command(author, version, about = "Terminal session bridge - durable PTY sessions over WebSocket", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "TERMBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Shell to spawn for new sessions
    #[arg(long)]
    shell: Option<String>,

    /// Minimum terminal width applied to every resize
    #[arg(long)]
    min_cols: Option<u16>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "termbridge_server=debug"
        } else {
            "termbridge_server=info"
        })
    })
}

/// Install the subscriber. The returned guard flushes the file writer on drop.
fn init_logging(
    verbose: bool,
    log_file: Option<&PathBuf>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(std::path::Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {:?}", dir))?;
            let file_appender = tracing_appender::rolling::never(
                dir,
                path.file_name()
                    .unwrap_or(std::ffi::OsStr::new("termbridge-server.log")),
            );
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::fmt()
                .with_env_filter(default_filter(verbose))
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(default_filter(verbose))
                .with_target(false)
                .init();
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        ServerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(shell) = cli.shell {
        config.shell = shell;
    }
    if let Some(min_cols) = cli.min_cols {
        config.min_cols = min_cols;
    }
    if cli.log_file.is_some() {
        config.log_file = cli.log_file;
    }

    let _log_guard = init_logging(cli.verbose, config.log_file.as_ref())?;

    info!(
        "Starting termbridge-server on {} (shell {}, min cols {})",
        config.bind, config.shell, config.min_cols
    );
    println!(
        "{} listening on {}",
        "termbridge".green().bold(),
        format!("ws://{}", config.bind).cyan()
    );

    let registry = SessionRegistry::new(RegistryConfig::from(&config));
    let gateway = Gateway::new(registry.clone(), config.bind);
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        shutdown.cancel();
    });

    let result = gateway
        .run(cancel)
        .await
        .with_context(|| format!("Gateway on {} failed", config.bind));

    // No child outlives the server
    registry.shutdown().await;
    info!("All sessions terminated");
    result
}
