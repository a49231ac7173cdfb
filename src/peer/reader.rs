//! Peer reader task.
//!
//! Reads raw chunks from the peer's stdout, reassembles them into lines with
//! a [`LineFramer`], and hands each line to [`PeerChannel::dispatch_line`].
//!
//! Framing problems (oversized or non-UTF-8 lines) are logged and skipped;
//! they never stop the reader. End of stream and I/O errors close the
//! channel.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::peer::channel::PeerChannel;
use crate::peer::framer::{LineFramer, Lines};

/// Reader task. Drives `stdout` until EOF, error, or channel closure.
pub async fn run_reader<R>(stdout: R, channel: PeerChannel)
where
    R: AsyncRead + Unpin + Send,
{
    let mut chunks = ReaderStream::new(stdout);
    let mut framer = LineFramer::new();

    loop {
        tokio::select! {
            biased;

            () = channel.closed() => {
                debug!("peer reader: channel closed, stopping");
                break;
            }

            chunk = chunks.next() => {
                match chunk {
                    Some(Ok(bytes)) => dispatch_all(&channel, framer.feed(&bytes)),
                    Some(Err(err)) => {
                        warn!(error = %err, "peer reader: IO error, stopping");
                        channel.close(&format!("peer output error: {err}"));
                        break;
                    }
                    None => {
                        debug!("peer reader: EOF detected");
                        dispatch_all(&channel, framer.finish());
                        channel.close("peer output closed");
                        break;
                    }
                }
            }
        }
    }
}

fn dispatch_all(channel: &PeerChannel, lines: Lines<'_>) {
    for line in lines {
        match line {
            Ok(line) => channel.dispatch_line(line),
            Err(err) => warn!(error = %err, "peer reader: framing error, skipping line"),
        }
    }
}
