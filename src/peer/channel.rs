//! Subprocess channel: the single point of interaction with the peer.
//!
//! A [`PeerChannel`] owns the [`CorrelationTable`] and the outbound write
//! queue. Requests go out through [`PeerChannel::send`]; lines coming back
//! from the peer are routed by [`PeerChannel::dispatch_line`]. Once closed,
//! every pending request is rejected and new sends fail immediately.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::peer::correlation::{CorrelationTable, PendingResponse};
use crate::peer::framer::parse_line;
use crate::peer::reader::run_reader;
use crate::peer::writer::run_writer;
use crate::protocol::{
    classify, error_envelope, InboundKind, RequestEnvelope, RequestId, ResponseEnvelope,
    METHOD_NOT_FOUND,
};
use crate::{AppError, Result};

/// Longest prefix of a peer line included in log events.
const LOG_PREVIEW_CHARS: usize = 256;

#[derive(Debug)]
struct Inner {
    table: CorrelationTable,
    outbound: mpsc::UnboundedSender<String>,
    closed: CancellationToken,
    timeout: Duration,
}

/// Cloneable handle to the peer's request/response channel.
#[derive(Debug, Clone)]
pub struct PeerChannel {
    inner: Arc<Inner>,
}

/// Background tasks driving a [`PeerChannel`].
#[derive(Debug)]
pub struct ChannelTasks {
    /// Task reading and dispatching the peer's stdout.
    pub reader: JoinHandle<()>,
    /// Task writing queued lines to the peer's stdin.
    pub writer: JoinHandle<()>,
}

impl ChannelTasks {
    /// Wait for both tasks to finish, logging panics.
    pub async fn join(self) {
        for (name, handle) in [("reader", self.reader), ("writer", self.writer)] {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    warn!(task = name, %err, "peer channel task panicked");
                }
            }
        }
    }
}

impl PeerChannel {
    /// Wire a channel to the peer's streams and spawn its reader and writer.
    ///
    /// `timeout` is the deadline applied to every request sent through the
    /// channel.
    #[must_use]
    pub fn start<W, R>(stdin: W, stdout: R, timeout: Duration) -> (Self, ChannelTasks)
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (outbound, line_rx) = mpsc::unbounded_channel();
        let channel = Self {
            inner: Arc::new(Inner {
                table: CorrelationTable::new(),
                outbound,
                closed: CancellationToken::new(),
                timeout,
            }),
        };

        let writer_channel = channel.clone();
        let writer = tokio::spawn(async move {
            let cancel = writer_channel.inner.closed.clone();
            if let Err(err) = run_writer(stdin, line_rx, cancel).await {
                writer_channel.close(&err.to_string());
            }
        });

        let reader = tokio::spawn(run_reader(stdout, channel.clone()));

        (channel, ChannelTasks { reader, writer })
    }

    /// Register `request` and queue it for the peer.
    ///
    /// Returns the handle to await the response on. The line is queued
    /// behind any earlier sends and written in order.
    ///
    /// # Errors
    ///
    /// - `AppError::DuplicateId` if the id is already pending.
    /// - `AppError::ChannelClosed` if the peer has gone away.
    /// - `AppError::Codec` if the request cannot be serialised.
    pub fn send(&self, request: &RequestEnvelope) -> Result<PendingResponse> {
        let line = request.to_line()?;
        let id = request.id();
        let pending = self.inner.table.register(id.clone(), self.inner.timeout)?;

        if self.inner.outbound.send(line).is_err() {
            let err = AppError::ChannelClosed("peer writer stopped".into());
            let _ = self.inner.table.reject(id, err.clone());
            return Err(err);
        }

        debug!(%id, "peer channel: request queued");
        Ok(pending)
    }

    /// Send `request` and wait for its response.
    ///
    /// # Errors
    ///
    /// Any error from [`PeerChannel::send`], plus `AppError::Timeout` and
    /// `AppError::ChannelClosed` raised while waiting.
    pub async fn call(&self, request: &RequestEnvelope) -> Result<ResponseEnvelope> {
        self.send(request)?.wait().await
    }

    /// Route one line received from the peer.
    ///
    /// Responses resolve their pending entry; peer-initiated requests are
    /// answered with method-not-found; everything else is logged and dropped.
    pub fn dispatch_line(&self, line: String) {
        let doc = match parse_line(&line) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(
                    error = %err,
                    raw_line = preview(&line),
                    "peer channel: dropping unparseable line"
                );
                return;
            }
        };

        match classify(&doc) {
            InboundKind::Response(id) => {
                let _ = self.inner.table.resolve(ResponseEnvelope { id, raw: line });
            }
            InboundKind::PeerRequest { id, method } => {
                debug!(%id, method, "peer channel: refusing peer-initiated request");
                self.reply_method_not_found(&id, &method);
            }
            InboundKind::Notification(method) => {
                debug!(method, "peer channel: dropping unsolicited notification");
            }
            InboundKind::Unaddressed => {
                warn!(
                    raw_line = preview(&line),
                    "peer channel: dropping document without id"
                );
            }
        }
    }

    fn reply_method_not_found(&self, id: &RequestId, method: &str) {
        if self.is_closed() {
            return;
        }
        let reply = error_envelope(
            Some(id),
            METHOD_NOT_FOUND,
            &format!("Method not found: {method}"),
        );
        if self.inner.outbound.send(reply.to_string()).is_err() {
            debug!(%id, "peer channel: writer gone, reply not sent");
        }
    }

    /// Close the channel: reject pending requests and refuse new ones.
    ///
    /// Idempotent; the first reason is the one reported to later callers.
    pub fn close(&self, reason: &str) {
        if !self.inner.closed.is_cancelled() {
            info!(reason, "peer channel closed");
        }
        let _ = self.inner.table.reject_all(reason);
        self.inner.closed.cancel();
    }

    /// Whether the channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolve once the channel is closed.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await;
    }

    /// Number of requests still awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.table.len()
    }

    /// Configured per-request deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }
}

fn preview(line: &str) -> &str {
    line.char_indices()
        .nth(LOG_PREVIEW_CHARS)
        .map_or(line, |(idx, _)| &line[..idx])
}
