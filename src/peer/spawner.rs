//! Peer process spawner.
//!
//! Launches the peer with:
//! - `kill_on_drop(true)` so the process never outlives the bridge.
//! - The host environment plus `NPM_CONFIG_UPDATE_NOTIFIER=false`, which keeps
//!   `npx` from printing update banners into the protocol stream.
//! - `stderr` inherited, so the peer's diagnostics reach the host's error
//!   stream unmodified.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::{AppError, Result};

/// Grace period between the polite termination request and a hard kill.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Active stdio connection to a spawned peer.
///
/// The caller is responsible for keeping `child` alive (it has
/// `kill_on_drop(true)`).
#[derive(Debug)]
pub struct PeerProcess {
    /// Child process handle.
    pub child: Child,
    /// Peer's stdin, for requests.
    pub stdin: ChildStdin,
    /// Peer's stdout, for responses.
    pub stdout: ChildStdout,
}

fn base_command(config: &BridgeConfig) -> Command {
    let mut cmd = Command::new(&config.peer.program);
    cmd.args(config.peer_args())
        .env("NPM_CONFIG_UPDATE_NOTIFIER", "false")
        .kill_on_drop(true);
    cmd
}

/// Spawn the peer with piped stdin/stdout for the HTTP bridge.
///
/// # Errors
///
/// - `AppError::Spawn("failed to spawn peer: …")` on OS spawn failure.
/// - `AppError::Spawn("failed to capture peer …")` if stdio was not piped.
pub fn spawn_peer(config: &BridgeConfig) -> Result<PeerProcess> {
    let mut cmd = base_command(config);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    let mut child = cmd
        .spawn()
        .map_err(|err| spawn_error(&config.peer.program, &err))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture peer stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture peer stdout".into()))?;

    info!(
        program = %config.peer.program,
        args = ?config.peer_args(),
        pid = child.id(),
        "peer process spawned"
    );

    Ok(PeerProcess {
        child,
        stdin,
        stdout,
    })
}

/// Spawn the peer with fully inherited stdio for passthrough mode.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the OS refuses to start the process.
pub fn spawn_passthrough(config: &BridgeConfig) -> Result<Child> {
    let mut cmd = base_command(config);
    cmd.stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    let child = cmd
        .spawn()
        .map_err(|err| spawn_error(&config.peer.program, &err))?;

    info!(
        program = %config.peer.program,
        args = ?config.peer_args(),
        pid = child.id(),
        "passthrough peer spawned"
    );
    Ok(child)
}

fn spawn_error(program: &str, err: &std::io::Error) -> AppError {
    AppError::Spawn(format!("failed to spawn peer '{program}': {err}"))
}

/// Describe an exit status for logs.
#[must_use]
pub fn describe_exit(status: ExitStatus) -> String {
    status.code().map_or_else(
        || "terminated by signal".to_owned(),
        |code| format!("exited with code {code}"),
    )
}

/// Stop the peer: ask politely, wait up to `grace`, then kill.
///
/// Returns the exit status if one was observed.
pub async fn terminate_peer(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    if let Ok(Some(status)) = child.try_wait() {
        return Some(status);
    }

    request_termination(child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            info!(status = %describe_exit(status), "peer stopped");
            Some(status)
        }
        Ok(Err(err)) => {
            warn!(%err, "error waiting for peer to stop");
            None
        }
        Err(_elapsed) => {
            warn!(grace_ms = grace.as_millis(), "peer ignored termination request, killing");
            if let Err(err) = child.kill().await {
                warn!(%err, "failed to kill peer");
            }
            child.try_wait().ok().flatten()
        }
    }
}

#[cfg(unix)]
fn request_termination(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        warn!(pid, %err, "failed to send SIGTERM to peer");
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        warn!(%err, "failed to request peer termination");
    }
}
