//! Bridge configuration, read once from the environment at startup.
//!
//! No other module reads the process environment; everything flows from the
//! [`BridgeConfig`] value built here.

use std::time::Duration;

use crate::mode::ServerMode;
use crate::{AppError, Result};

fn default_port() -> u16 {
    8931
}

fn default_host() -> String {
    "::".into()
}

fn default_command() -> String {
    "npx".into()
}

fn default_command_args() -> Vec<String> {
    vec!["--silent".into(), "@playwright/mcp".into()]
}

fn default_request_timeout() -> Duration {
    Duration::from_millis(30_000)
}

/// How the peer process is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCommand {
    /// Program to execute (e.g., `npx`).
    pub program: String,
    /// Arguments placed before the forwarded flags.
    pub base_args: Vec<String>,
    /// Forward `--headless`.
    pub headless: bool,
    /// Forward `--isolated`.
    pub isolated: bool,
    /// Forward `--no-sandbox`.
    pub no_sandbox: bool,
    /// Forward `--viewport-size <value>`.
    pub viewport_size: Option<String>,
}

impl PeerCommand {
    /// Flags forwarded verbatim to the peer, in a stable order.
    #[must_use]
    pub fn forwarded_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.headless {
            flags.push("--headless".to_owned());
        }
        if self.isolated {
            flags.push("--isolated".to_owned());
        }
        if self.no_sandbox {
            flags.push("--no-sandbox".to_owned());
        }
        if let Some(ref size) = self.viewport_size {
            flags.push("--viewport-size".to_owned());
            flags.push(size.clone());
        }
        flags
    }
}

impl Default for PeerCommand {
    fn default() -> Self {
        Self {
            program: default_command(),
            base_args: default_command_args(),
            headless: false,
            isolated: false,
            no_sandbox: false,
            viewport_size: None,
        }
    }
}

/// Immutable configuration shared by every component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Listen address (host name or IP literal).
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// HTTP bridge or native passthrough.
    pub mode: ServerMode,
    /// Deadline for a single peer round trip.
    pub request_timeout: Duration,
    /// Peer launch settings.
    pub peer: PeerCommand,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            mode: ServerMode::default(),
            request_timeout: default_request_timeout(),
            peer: PeerCommand::default(),
        }
    }
}

impl BridgeConfig {
    /// Build configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a recognised variable holds an invalid value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// Unset or empty variables fall back to their defaults. Boolean flags are
    /// enabled only by the exact value `true`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `MCP_PORT` or `MCP_REQUEST_TIMEOUT_MS` is
    /// not a valid number, the timeout is zero, `MCP_MODE` is unknown, or
    /// `MCP_COMMAND` is blank.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let flag = |key: &str| lookup(key).is_some_and(|value| value == "true");

        let port = match get("MCP_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|err| AppError::Config(format!("invalid MCP_PORT '{raw}': {err}")))?,
            None => default_port(),
        };

        let mode = match get("MCP_MODE") {
            Some(raw) => raw.parse::<ServerMode>()?,
            None => ServerMode::default(),
        };

        let request_timeout = match get("MCP_REQUEST_TIMEOUT_MS") {
            Some(raw) => {
                let millis = raw.trim().parse::<u64>().map_err(|err| {
                    AppError::Config(format!("invalid MCP_REQUEST_TIMEOUT_MS '{raw}': {err}"))
                })?;
                Duration::from_millis(millis)
            }
            None => default_request_timeout(),
        };

        let base_args = match get("MCP_COMMAND_ARGS") {
            Some(raw) => raw.split_whitespace().map(str::to_owned).collect(),
            None => default_command_args(),
        };

        let config = Self {
            host: get("MCP_HOST").unwrap_or_else(default_host),
            port,
            mode,
            request_timeout,
            peer: PeerCommand {
                program: get("MCP_COMMAND").unwrap_or_else(default_command),
                base_args,
                headless: flag("HEADLESS"),
                isolated: flag("ISOLATED"),
                no_sandbox: flag("NOSANDBOX"),
                viewport_size: get("VIEWPORT_SIZE"),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Full peer argument vector for the configured mode.
    ///
    /// Passthrough mode appends `--port` and `--host` so the peer serves the
    /// listen address itself.
    #[must_use]
    pub fn peer_args(&self) -> Vec<String> {
        let mut args = self.peer.base_args.clone();
        args.extend(self.peer.forwarded_flags());
        if self.mode == ServerMode::Sse {
            args.push("--port".to_owned());
            args.push(self.port.to_string());
            args.push("--host".to_owned());
            args.push(self.host.clone());
        }
        args
    }

    /// Host name suitable for printing a client-facing URL.
    #[must_use]
    pub fn display_host(&self) -> &str {
        match self.host.as_str() {
            "::" | "0.0.0.0" => "localhost",
            other => other,
        }
    }

    /// Validate cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when the timeout is zero or the program is blank.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(AppError::Config(
                "request timeout must be greater than zero".into(),
            ));
        }
        if self.peer.program.trim().is_empty() {
            return Err(AppError::Config("peer command must not be empty".into()));
        }
        Ok(())
    }
}
