//! Shared helpers: an in-memory peer wired over `tokio::io::duplex` and a
//! bridge served on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mcp_http_bridge::bridge::{serve, BridgeState};
use mcp_http_bridge::mode::ServerMode;
use mcp_http_bridge::peer::channel::{ChannelTasks, PeerChannel};
use mcp_http_bridge::peer::framer::MAX_LINE_BYTES;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Upper bound on any single wait inside a test.
pub const TEST_DEADLINE: Duration = Duration::from_secs(5);

/// The peer's end of the stdio pipes.
pub struct PeerSide {
    input: Lines<BufReader<DuplexStream>>,
    output: DuplexStream,
}

impl PeerSide {
    /// Next raw line the bridge wrote to the peer's stdin.
    pub async fn next_raw(&mut self) -> String {
        tokio::time::timeout(TEST_DEADLINE, self.input.next_line())
            .await
            .expect("bridge wrote a line in time")
            .expect("read peer stdin")
            .expect("peer stdin still open")
    }

    /// Next request the bridge wrote, parsed.
    pub async fn next_request(&mut self) -> Value {
        let line = self.next_raw().await;
        serde_json::from_str(&line).expect("bridge writes valid json")
    }

    /// Write raw bytes to the bridge as the peer's stdout.
    pub async fn emit(&mut self, raw: &str) {
        self.output
            .write_all(raw.as_bytes())
            .await
            .expect("write peer stdout");
        self.output.flush().await.expect("flush peer stdout");
    }

    /// Answer `request` with an empty-object result.
    pub async fn reply_ok(&mut self, request: &Value) {
        let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": {}});
        self.emit(&format!("{reply}\n")).await;
    }

    /// Close the peer's stdout, as if the process exited.
    pub fn close_output(self) -> Lines<BufReader<DuplexStream>> {
        drop(self.output);
        self.input
    }
}

/// Start a channel backed by an in-memory peer.
pub fn start_channel(timeout: Duration) -> (PeerChannel, ChannelTasks, PeerSide) {
    let (bridge_stdin, peer_stdin) = tokio::io::duplex(PIPE_CAPACITY);
    let (peer_stdout, bridge_stdout) = tokio::io::duplex(PIPE_CAPACITY);
    let (channel, tasks) = PeerChannel::start(bridge_stdin, bridge_stdout, timeout);
    let side = PeerSide {
        input: BufReader::new(peer_stdin).lines(),
        output: peer_stdout,
    };
    (channel, tasks, side)
}

/// Spawn a peer that answers every request with `{"echo": <method>}`.
pub fn spawn_echo_peer(mut side: PeerSide) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(Some(line)) = side.input.next_line().await {
            let request: Value = serde_json::from_str(&line).expect("valid request");
            let reply = json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "result": { "echo": request["method"] },
            });
            side.emit(&format!("{reply}\n")).await;
        }
    })
}

/// A bridge served on an ephemeral port in front of an in-memory peer.
pub struct TestBridge {
    pub base_url: String,
    pub channel: PeerChannel,
    pub peer: Option<PeerSide>,
    pub ct: CancellationToken,
}

impl TestBridge {
    /// Take the peer side (for echo peers or manual scripting).
    pub fn take_peer(&mut self) -> PeerSide {
        self.peer.take().expect("peer side already taken")
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl Drop for TestBridge {
    fn drop(&mut self) {
        self.ct.cancel();
    }
}

/// Serve a bridge on `127.0.0.1:0` with the given request timeout.
pub async fn spawn_bridge(timeout: Duration) -> TestBridge {
    spawn_bridge_with_body_limit(timeout, MAX_LINE_BYTES).await
}

/// Like [`spawn_bridge`], but rejecting request bodies over `body_limit` bytes.
pub async fn spawn_bridge_with_body_limit(timeout: Duration, body_limit: usize) -> TestBridge {
    let (channel, _tasks, peer) = start_channel(timeout);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");

    let ct = CancellationToken::new();
    let state = Arc::new(
        BridgeState::new(channel.clone(), ServerMode::Http).with_body_limit(body_limit),
    );
    let server_ct = ct.clone();
    tokio::spawn(async move {
        let _ = serve(listener, state, server_ct).await;
    });

    TestBridge {
        base_url: format!("http://{addr}"),
        channel,
        peer: Some(peer),
        ct,
    }
}

/// POST `body` to `url` and return status plus raw body text.
pub async fn post_raw(url: &str, body: &str) -> (u16, String) {
    let resp = reqwest::Client::new()
        .post(url)
        .header("content-type", "application/json")
        .body(body.to_owned())
        .send()
        .await
        .expect("HTTP POST");
    let status = resp.status().as_u16();
    (status, resp.text().await.expect("body"))
}

/// POST a JSON body and parse the JSON response.
pub async fn post_json(url: &str, body: &Value) -> (u16, Value) {
    let (status, text) = post_raw(url, &body.to_string()).await;
    (status, serde_json::from_str(&text).expect("response is json"))
}

/// Pick a free local port by binding and releasing it.
pub async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    port
}

/// Poll `GET /health` until the server answers or the deadline passes.
pub async fn wait_until_healthy(base_url: &str) {
    let deadline = tokio::time::Instant::now() + TEST_DEADLINE;
    loop {
        if let Ok(resp) = reqwest::get(format!("{base_url}/health")).await {
            if resp.status().is_success() {
                return;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "bridge did not become healthy at {base_url}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
