#![forbid(unsafe_code)]

//! Expose a stdio JSON-RPC peer (an MCP server) as a stateless HTTP endpoint.

pub mod bridge;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod mode;
pub mod peer;
pub mod protocol;

pub use config::BridgeConfig;
pub use errors::{AppError, Result};
