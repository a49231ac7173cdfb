//! Lifecycle controller: start the peer, serve, drain, and report an exit code.
//!
//! ```text
//! starting ──spawned──▶ ready ──signal | peer exit──▶ draining ──released──▶ stopped
//! ```
//!
//! Readiness is structural: the bridge is ready as soon as the peer is
//! spawned and the listener is bound. No protocol handshake is performed.

use std::future::Future;
use std::process::ExitStatus;
use std::sync::Arc;

use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bridge::{self, BridgeState};
use crate::config::BridgeConfig;
use crate::mode::ServerMode;
use crate::peer::channel::PeerChannel;
use crate::peer::spawner::{
    describe_exit, spawn_passthrough, spawn_peer, terminate_peer, PeerProcess, TERMINATE_GRACE,
};
use crate::{AppError, Result};

/// Lifecycle state of the whole process.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    /// Spawning the peer and binding the listener.
    Starting,
    /// Serving requests.
    Ready,
    /// Tearing down after a signal or peer exit.
    Draining,
    /// Listener and peer handle released.
    Stopped,
}

/// Why the process is draining.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DrainCause {
    /// SIGINT / SIGTERM (or the caller's shutdown future) fired.
    Signal,
    /// The peer exited; carries its exit code if it had one.
    PeerExited(Option<i32>),
}

impl DrainCause {
    /// Process exit code implied by the drain cause.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Signal => 0,
            Self::PeerExited(code) => code.unwrap_or(0),
        }
    }
}

/// Input to the lifecycle state machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Peer spawned and streams wired.
    Spawned,
    /// Drain requested.
    Drain(DrainCause),
    /// Listener and peer released.
    Released,
}

impl LifecycleState {
    /// Pure transition function. Events that do not apply leave the state unchanged.
    #[must_use]
    pub fn on(self, event: LifecycleEvent) -> Self {
        match (self, event) {
            (Self::Starting, LifecycleEvent::Spawned) => Self::Ready,
            (Self::Starting | Self::Ready, LifecycleEvent::Drain(_)) => Self::Draining,
            (Self::Draining, LifecycleEvent::Released) => Self::Stopped,
            (state, _) => state,
        }
    }
}

/// Tracks the current state and logs every transition.
#[derive(Debug)]
struct Tracker {
    state: LifecycleState,
}

impl Tracker {
    fn new() -> Self {
        Self {
            state: LifecycleState::Starting,
        }
    }

    fn apply(&mut self, event: LifecycleEvent) {
        let next = self.state.on(event);
        if next == self.state {
            warn!(state = ?self.state, ?event, "lifecycle: event ignored");
        } else {
            info!(from = ?self.state, to = ?next, ?event, "lifecycle transition");
        }
        self.state = next;
    }
}

/// Run the bridge in the configured mode until `shutdown` fires or the peer exits.
///
/// Returns the process exit code: 0 for a signal-initiated shutdown, the
/// peer's exit code (0 if none) when the peer exited first.
///
/// # Errors
///
/// - `AppError::Spawn` if the peer could not be started.
/// - `AppError::Http` if the listener could not be bound or the server failed.
pub async fn run<S>(config: BridgeConfig, shutdown: S) -> Result<i32>
where
    S: Future<Output = ()> + Send,
{
    match config.mode {
        ServerMode::Http => run_bridge(&config, shutdown).await,
        ServerMode::Sse => run_passthrough(&config, shutdown).await,
    }
}

/// What woke the drain loop.
enum Wake {
    Shutdown,
    PeerExited(std::io::Result<ExitStatus>),
    OutputClosed,
    ServerStopped(Result<()>),
}

async fn run_bridge<S>(config: &BridgeConfig, shutdown: S) -> Result<i32>
where
    S: Future<Output = ()> + Send,
{
    let mut tracker = Tracker::new();

    let PeerProcess {
        mut child,
        stdin,
        stdout,
    } = spawn_peer(config)?;
    let (channel, tasks) = PeerChannel::start(stdin, stdout, config.request_timeout);

    let listener = match bridge::bind(config).await {
        Ok(listener) => listener,
        Err(err) => {
            channel.close("listener bind failed");
            terminate_peer(&mut child, TERMINATE_GRACE).await;
            tasks.join().await;
            return Err(err);
        }
    };

    tracker.apply(LifecycleEvent::Spawned);
    log_endpoints(config);

    let ct = CancellationToken::new();
    let state = Arc::new(BridgeState::new(channel.clone(), config.mode));
    let mut server = tokio::spawn(bridge::serve(listener, state, ct.clone()));
    info!("ready to accept MCP requests");

    tokio::pin!(shutdown);
    let wake = tokio::select! {
        () = &mut shutdown => Wake::Shutdown,
        status = child.wait() => Wake::PeerExited(status),
        () = channel.closed() => Wake::OutputClosed,
        result = &mut server => Wake::ServerStopped(flatten_join(result)),
    };

    let (cause, server_result) = match wake {
        Wake::Shutdown => {
            info!("shutdown signal received");
            (DrainCause::Signal, None)
        }
        Wake::PeerExited(status) => {
            let code = exit_code_of(status);
            // Responses written before exit may still sit in the pipe.
            if tokio::time::timeout(TERMINATE_GRACE, channel.closed())
                .await
                .is_err()
            {
                warn!("peer output still open after exit, closing channel");
            }
            (DrainCause::PeerExited(code), None)
        }
        Wake::OutputClosed => {
            warn!("peer closed its output, waiting for it to exit");
            let code = wait_for_exit(&mut child).await;
            (DrainCause::PeerExited(code), None)
        }
        Wake::ServerStopped(result) => {
            error!("HTTP bridge stopped unexpectedly");
            (DrainCause::Signal, Some(result))
        }
    };
    tracker.apply(LifecycleEvent::Drain(cause));

    match cause {
        DrainCause::Signal => channel.close("bridge shutting down"),
        DrainCause::PeerExited(code) => channel.close(&code.map_or_else(
            || "peer terminated by signal".to_owned(),
            |code| format!("peer exited with code {code}"),
        )),
    }
    ct.cancel();

    let server_result = match server_result {
        Some(result) => result,
        None => match tokio::time::timeout(TERMINATE_GRACE, &mut server).await {
            Ok(result) => flatten_join(result),
            Err(_elapsed) => {
                warn!("HTTP bridge did not drain in time, aborting open connections");
                server.abort();
                Ok(())
            }
        },
    };

    if cause == DrainCause::Signal {
        terminate_peer(&mut child, TERMINATE_GRACE).await;
    }
    tasks.join().await;
    drop(child);
    tracker.apply(LifecycleEvent::Released);

    server_result?;
    let code = cause.exit_code();
    info!(exit_code = code, "bridge stopped");
    Ok(code)
}

async fn run_passthrough<S>(config: &BridgeConfig, shutdown: S) -> Result<i32>
where
    S: Future<Output = ()> + Send,
{
    let mut tracker = Tracker::new();
    let mut child = spawn_passthrough(config)?;
    tracker.apply(LifecycleEvent::Spawned);
    info!(
        url = %format!("http://{}:{}/sse", config.display_host(), config.port),
        "passthrough mode, peer serves SSE natively"
    );

    tokio::pin!(shutdown);
    let wake = tokio::select! {
        () = &mut shutdown => Wake::Shutdown,
        status = child.wait() => Wake::PeerExited(status),
    };

    let cause = match wake {
        Wake::PeerExited(status) => DrainCause::PeerExited(exit_code_of(status)),
        _ => DrainCause::Signal,
    };
    tracker.apply(LifecycleEvent::Drain(cause));

    if cause == DrainCause::Signal {
        info!("shutdown signal received");
        terminate_peer(&mut child, TERMINATE_GRACE).await;
    }
    drop(child);
    tracker.apply(LifecycleEvent::Released);

    Ok(cause.exit_code())
}

/// Wait up to the grace period for the peer to exit on its own, then stop it.
async fn wait_for_exit(child: &mut Child) -> Option<i32> {
    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(status) => exit_code_of(status),
        Err(_elapsed) => terminate_peer(child, TERMINATE_GRACE)
            .await
            .and_then(|status| status.code()),
    }
}

fn exit_code_of(status: std::io::Result<ExitStatus>) -> Option<i32> {
    match status {
        Ok(status) => {
            info!(status = %describe_exit(status), "peer process exited");
            status.code()
        }
        Err(err) => {
            warn!(%err, "error waiting for peer process");
            None
        }
    }
}

fn flatten_join(result: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    result.map_err(|err| AppError::Http(format!("bridge task failed: {err}")))?
}

fn log_endpoints(config: &BridgeConfig) {
    info!(
        mode = %config.mode,
        host = %config.host,
        port = config.port,
        url = %format!("http://{}:{}/mcp", config.display_host(), config.port),
        "HTTP bridge listening"
    );
    if config.host == "::" {
        info!(url = %format!("http://[::1]:{}/mcp", config.port), "also reachable over IPv6 loopback");
    }
}
