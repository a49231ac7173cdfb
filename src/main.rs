#![forbid(unsafe_code)]

//! `mcp-http-bridge`: serve a stdio MCP peer over HTTP.
//!
//! Reads configuration from the environment once, applies CLI overrides,
//! then hands control to the lifecycle controller and exits with its code.

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use mcp_http_bridge::lifecycle;
use mcp_http_bridge::mode::ServerMode;
use mcp_http_bridge::{AppError, BridgeConfig, Result};

/// Exit code used when the bridge cannot start at all.
const STARTUP_FAILURE: i32 = 1;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "mcp-http-bridge", about = "Stdio MCP to HTTP bridge", version, long_about = None)]
struct Cli {
    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override `MCP_PORT`.
    #[arg(long)]
    port: Option<u16>,

    /// Override `MCP_HOST`.
    #[arg(long)]
    host: Option<String>,

    /// Override `MCP_MODE`.
    #[arg(long, value_enum)]
    mode: Option<ServerMode>,
}

fn main() {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
        std::process::exit(STARTUP_FAILURE);
    }

    let code = match run(args) {
        Ok(code) => code,
        Err(err) => {
            error!(%err, "bridge failed");
            STARTUP_FAILURE
        }
    };
    std::process::exit(code);
}

fn run(args: Cli) -> Result<i32> {
    let mut config = BridgeConfig::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    config.validate()?;

    info!(
        mode = %config.mode,
        host = %config.host,
        port = config.port,
        peer = %config.peer.program,
        "mcp-http-bridge bootstrap"
    );

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(lifecycle::run(config, shutdown_signal()))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
