use std::collections::HashMap;
use std::time::Duration;

use mcp_http_bridge::mode::ServerMode;
use mcp_http_bridge::{AppError, BridgeConfig};

fn config_from(vars: &[(&str, &str)]) -> Result<BridgeConfig, AppError> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    BridgeConfig::from_lookup(|key| vars.get(key).cloned())
}

#[test]
fn empty_environment_yields_defaults() {
    let config = config_from(&[]).expect("defaults are valid");
    assert_eq!(config, BridgeConfig::default());
    assert_eq!(config.port, 8931);
    assert_eq!(config.host, "::");
    assert_eq!(config.mode, ServerMode::Http);
    assert_eq!(config.request_timeout, Duration::from_millis(30_000));
    assert_eq!(config.peer.program, "npx");
    assert_eq!(config.peer_args(), vec!["--silent", "@playwright/mcp"]);
}

#[test]
fn listen_address_and_mode_are_read() {
    let config = config_from(&[
        ("MCP_PORT", "9000"),
        ("MCP_HOST", "127.0.0.1"),
        ("MCP_MODE", "sse"),
    ])
    .expect("valid");
    assert_eq!(config.port, 9000);
    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.mode, ServerMode::Sse);
}

#[test]
fn flags_are_forwarded_only_for_exact_true() {
    let config = config_from(&[
        ("HEADLESS", "true"),
        ("ISOLATED", "1"),
        ("NOSANDBOX", "TRUE"),
        ("VIEWPORT_SIZE", "1280,720"),
    ])
    .expect("valid");
    assert!(config.peer.headless);
    assert!(!config.peer.isolated);
    assert!(!config.peer.no_sandbox);
    assert_eq!(
        config.peer.forwarded_flags(),
        vec!["--headless", "--viewport-size", "1280,720"]
    );
}

#[test]
fn all_flags_keep_a_stable_order() {
    let config = config_from(&[
        ("VIEWPORT_SIZE", "800,600"),
        ("NOSANDBOX", "true"),
        ("ISOLATED", "true"),
        ("HEADLESS", "true"),
    ])
    .expect("valid");
    assert_eq!(
        config.peer_args(),
        vec![
            "--silent",
            "@playwright/mcp",
            "--headless",
            "--isolated",
            "--no-sandbox",
            "--viewport-size",
            "800,600",
        ]
    );
}

#[test]
fn passthrough_mode_appends_listen_address() {
    let config = config_from(&[
        ("MCP_MODE", "sse"),
        ("MCP_PORT", "8080"),
        ("MCP_HOST", "0.0.0.0"),
        ("HEADLESS", "true"),
    ])
    .expect("valid");
    assert_eq!(
        config.peer_args(),
        vec![
            "--silent",
            "@playwright/mcp",
            "--headless",
            "--port",
            "8080",
            "--host",
            "0.0.0.0",
        ]
    );
    assert_eq!(config.display_host(), "localhost");
}

#[test]
fn custom_peer_command_is_split_on_whitespace() {
    let config = config_from(&[
        ("MCP_COMMAND", "node"),
        ("MCP_COMMAND_ARGS", "  server.js   --stdio "),
    ])
    .expect("valid");
    assert_eq!(config.peer.program, "node");
    assert_eq!(config.peer_args(), vec!["server.js", "--stdio"]);
}

#[test]
fn request_timeout_is_configurable() {
    let config = config_from(&[("MCP_REQUEST_TIMEOUT_MS", "1500")]).expect("valid");
    assert_eq!(config.request_timeout, Duration::from_millis(1500));
}

#[test]
fn empty_values_fall_back_to_defaults() {
    let config = config_from(&[("MCP_PORT", ""), ("MCP_HOST", " "), ("VIEWPORT_SIZE", "")])
        .expect("valid");
    assert_eq!(config.port, 8931);
    assert_eq!(config.host, "::");
    assert!(config.peer.viewport_size.is_none());
}

#[test]
fn invalid_port_is_a_config_error() {
    let err = config_from(&[("MCP_PORT", "eighty")]).expect_err("invalid");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("MCP_PORT")));

    let err = config_from(&[("MCP_PORT", "70000")]).expect_err("out of range");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn unknown_mode_is_a_config_error() {
    let err = config_from(&[("MCP_MODE", "websocket")]).expect_err("invalid");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("websocket")));
}

#[test]
fn zero_timeout_is_rejected() {
    let err = config_from(&[("MCP_REQUEST_TIMEOUT_MS", "0")]).expect_err("zero");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn display_host_keeps_explicit_hosts() {
    let config = config_from(&[("MCP_HOST", "bridge.internal")]).expect("valid");
    assert_eq!(config.display_host(), "bridge.internal");
}
