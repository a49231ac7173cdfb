//! Peer writer task.
//!
//! Receives serialised request lines from a tokio [`mpsc`] queue and writes
//! each as one NDJSON line to the peer's `stdin`. A single task owns the
//! stream, so writes leave in submission order and never interleave.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Writer task. Drains `line_rx` into `stdin`, one `\n`-terminated line each.
///
/// The task exits cleanly when:
/// - `cancel` is triggered (channel closed or shutdown), or
/// - `line_rx` is closed (all senders dropped).
///
/// # Errors
///
/// Returns [`AppError::ChannelClosed`]`("write failed: …")` if writing to
/// `stdin` fails, e.g. because the peer has exited.
pub async fn run_writer<W>(
    mut stdin: W,
    mut line_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("peer writer: cancellation received, stopping");
                break;
            }

            line = line_rx.recv() => {
                let Some(line) = line else {
                    debug!("peer writer: queue closed, stopping");
                    break;
                };

                let mut bytes = line.into_bytes();
                bytes.push(b'\n');

                if let Err(err) = write_line(&mut stdin, &bytes).await {
                    warn!(error = %err, "peer writer: write to stdin failed");
                    return Err(AppError::ChannelClosed(format!("write failed: {err}")));
                }
            }
        }
    }

    Ok(())
}

async fn write_line<W>(stdin: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    stdin.write_all(bytes).await?;
    stdin.flush().await
}
