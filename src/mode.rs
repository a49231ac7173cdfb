//! Server operating mode: which way the peer is exposed.
//!
//! `ServerMode` is read from `MCP_MODE` and may be overridden with the
//! `--mode` CLI flag.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use clap::ValueEnum;
use serde::Serialize;

use crate::AppError;

/// Top-level operating mode for the bridge.
///
/// Defaults to [`ServerMode::Http`].
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMode {
    /// Stateless JSON-RPC-over-HTTP bridge in front of a stdio peer. Default mode.
    #[default]
    Http,
    /// Direct passthrough: the peer serves its own SSE endpoint on the
    /// configured host and port with inherited stdio.
    Sse,
}

impl ServerMode {
    /// Wire name of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Sse => "sse",
        }
    }
}

impl Display for ServerMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerMode {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "sse" => Ok(Self::Sse),
            other => Err(AppError::Config(format!(
                "unknown mode '{other}' (expected http or sse)"
            ))),
        }
    }
}
