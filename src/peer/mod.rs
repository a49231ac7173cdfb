//! Stdio peer handling.
//!
//! Everything that touches the peer process lives here:
//! - `framer`: incremental NDJSON line splitting over raw output chunks.
//! - `correlation`: pending-request table keyed by JSON-RPC id.
//! - `channel`: [`PeerChannel`](channel::PeerChannel), owning the table and
//!   the write queue.
//! - `reader` / `writer`: the async tasks bound to the peer's stdout / stdin.
//! - `spawner`: process launch and termination.

pub mod channel;
pub mod correlation;
pub mod framer;
pub mod reader;
pub mod spawner;
pub mod writer;
