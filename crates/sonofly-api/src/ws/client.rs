// Realtime channel client.
//
// Lifecycle: resolve (dispatch lookup + one-time DNS) -> connect (TCP,
// TLS, upgrade handshake) -> online (application handshake, seeds the
// heartbeat) -> send/receive -> close. The heartbeat is piggybacked on
// send and receive rather than run from a timer task, keeping the channel
// single-threaded and deterministic under test.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf as _, BytesMut};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{debug, trace, warn};

use crate::dispatch::{self, DispatchEndpoint};
use crate::error::Error;
use crate::region::Region;
use crate::tls::{self, TlsMode};
use crate::ws::frame::{Frame, Opcode};
use crate::ws::handshake;
use crate::ws::messages::OnlineMessage;

/// The only explicitly bounded wait: TCP connect.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Safety margin added to the server-required heartbeat interval.
const HEARTBEAT_MARGIN_SECS: u64 = 7;

const WS_PATH: &str = "/api/ws";

const READ_CHUNK: usize = 4096;

// ── HeartbeatState ───────────────────────────────────────────────────

/// Derived from the online handshake ack; absent until it completes.
/// Once set, every send/receive opportunity checks whether a ping is due.
#[derive(Debug, Clone)]
pub struct HeartbeatState {
    interval: Duration,
    next_due: Instant,
}

impl HeartbeatState {
    fn new(interval_secs: u64) -> Self {
        let interval = Duration::from_secs(interval_secs);
        Self {
            interval,
            next_due: Instant::now() + interval,
        }
    }

    /// The negotiated interval, margin included.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn due(&self) -> bool {
        Instant::now() >= self.next_due
    }

    fn mark_sent(&mut self) {
        self.next_due = Instant::now() + self.interval;
    }
}

/// Heartbeat interval from the online ack, if the server sent one.
fn heartbeat_interval(ack: &Value) -> Option<u64> {
    ack.pointer("/config/hbInterval").and_then(Value::as_u64)
}

// ── FrameChannel ─────────────────────────────────────────────────────

/// Frame-level send/receive over any byte stream.
///
/// Generic over the stream so the exchange logic runs against an
/// in-memory duplex in tests; production wraps a TLS socket.
pub(crate) struct FrameChannel<S> {
    stream: S,
    buf: BytesMut,
    heartbeat: Option<HeartbeatState>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FrameChannel<S> {
    fn new(stream: S, leftover: Vec<u8>) -> Self {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        buf.extend_from_slice(&leftover);
        Self {
            stream,
            buf,
            heartbeat: None,
        }
    }

    fn set_heartbeat(&mut self, interval_secs: u64) {
        self.heartbeat = Some(HeartbeatState::new(interval_secs));
    }

    fn heartbeat(&self) -> Option<&HeartbeatState> {
        self.heartbeat.as_ref()
    }

    /// Send a zero-length ping if one is due. Failures here are left for
    /// the surrounding real operation to surface.
    async fn maybe_ping(&mut self) {
        let due = self.heartbeat.as_ref().is_some_and(HeartbeatState::due);
        if !due {
            return;
        }

        trace!("heartbeat due, sending ping");
        match Frame::ping().encode(true) {
            Ok(bytes) => {
                if let Err(e) = self.stream.write_all(&bytes).await {
                    warn!(error = %e, "heartbeat ping failed");
                }
            }
            Err(e) => warn!(error = %e, "heartbeat ping could not be encoded"),
        }
        if let Some(hb) = self.heartbeat.as_mut() {
            hb.mark_sent();
        }
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<(), Error> {
        self.maybe_ping().await;
        let bytes = frame.encode(true)?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read exactly one frame off the wire, buffering partial reads.
    async fn next_frame(&mut self) -> Result<Frame, Error> {
        loop {
            if let Some((frame, used)) = Frame::parse(&self.buf)? {
                self.buf.advance(used);
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Receive the next text payload, transparently answering server
    /// pings and swallowing pongs.
    async fn receive_text(&mut self) -> Result<String, Error> {
        self.maybe_ping().await;
        loop {
            let frame = self.next_frame().await?;
            match frame.opcode {
                Opcode::Text => {
                    return String::from_utf8(frame.payload).map_err(|e| Error::MalformedFrame {
                        message: format!("non-UTF-8 text payload: {e}"),
                    });
                }
                Opcode::Ping => {
                    trace!("answering server ping");
                    self.send_frame(&Frame::pong()).await?;
                }
                Opcode::Pong => trace!("pong received"),
                Opcode::Close => return Err(Error::ConnectionClosed),
            }
        }
    }

    /// Best-effort close frame, then drop the stream.
    async fn close(&mut self) {
        if let Ok(bytes) = Frame::close().encode(true) {
            let _ = self.stream.write_all(&bytes).await;
        }
        let _ = self.stream.shutdown().await;
    }
}

// ── WsClient ─────────────────────────────────────────────────────────

/// The realtime wire-protocol client.
///
/// The dispatch endpoint and its DNS resolution are fixed at construction
/// (a point-in-time decision); a caller wanting fresh DNS after gateway
/// failover builds a new client.
pub struct WsClient {
    endpoint: DispatchEndpoint,
    addr: SocketAddr,
    url: String,
    tls_mode: TlsMode,
    channel: Option<FrameChannel<TlsStream<TcpStream>>>,
}

impl WsClient {
    /// Resolve the region's dispatch endpoint and build a client for it.
    pub async fn resolve(http: &reqwest::Client, region: Region) -> Result<Self, Error> {
        let endpoint = dispatch::resolve_endpoint(http, region).await?;
        Self::from_endpoint(endpoint).await
    }

    /// Resolve via an explicit dispatch URL (tests, proxies).
    pub async fn resolve_at(http: &reqwest::Client, dispatch_url: &str) -> Result<Self, Error> {
        let endpoint = dispatch::resolve_endpoint_at(http, dispatch_url).await?;
        Self::from_endpoint(endpoint).await
    }

    /// Build a client for a known endpoint, resolving its DNS once.
    pub async fn from_endpoint(endpoint: DispatchEndpoint) -> Result<Self, Error> {
        let addr = dispatch::resolve_addr(&endpoint).await?;
        let url = format!("wss://{}:{}{WS_PATH}", addr.ip(), addr.port());
        Ok(Self {
            endpoint,
            addr,
            url,
            tls_mode: TlsMode::default(),
            channel: None,
        })
    }

    /// Override the TLS verification mode (default accepts any cert,
    /// matching the bare-IP gateway endpoints).
    pub fn with_tls_mode(mut self, mode: TlsMode) -> Self {
        self.tls_mode = mode;
        self
    }

    /// The resolved channel URL, `wss://<ip>:<port>/api/ws`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The dispatch endpoint this client was built from.
    pub fn endpoint(&self) -> &DispatchEndpoint {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Heartbeat state, present once the online handshake completed.
    pub fn heartbeat(&self) -> Option<&HeartbeatState> {
        self.channel.as_ref().and_then(FrameChannel::heartbeat)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Open the TLS stream and perform the transport-level upgrade.
    ///
    /// A handshake whose accept key fails verification closes the socket
    /// and is fatal for this attempt; the caller may retry with backoff.
    pub async fn connect(&mut self) -> Result<(), Error> {
        let config = tls::client_config(&self.tls_mode)?;

        debug!(url = %self.url, "connecting realtime channel");

        let tcp = match timeout(CONNECT_TIMEOUT, TcpStream::connect(self.addr)).await {
            Ok(connected) => connected?,
            Err(_) => {
                return Err(Error::ConnectTimeout {
                    timeout_secs: CONNECT_TIMEOUT.as_secs(),
                });
            }
        };

        let connector = TlsConnector::from(config);
        let server_name = rustls_pki_types::ServerName::IpAddress(self.addr.ip().into());
        let mut stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::Tls(e.to_string()))?;

        let key = handshake::generate_key();
        let host = self.addr.ip().to_string();
        match handshake::upgrade(&mut stream, &host, WS_PATH, &key).await {
            Ok(leftover) => {
                debug!("upgrade complete");
                self.channel = Some(FrameChannel::new(stream, leftover));
                Ok(())
            }
            Err(e) => {
                let _ = stream.shutdown().await;
                Err(e)
            }
        }
    }

    /// Application-level handshake: announce the session and seed the
    /// heartbeat from the server's required interval plus a fixed margin.
    pub async fn online(&mut self, message: &OnlineMessage) -> Result<Value, Error> {
        let payload = serde_json::to_string(message).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: String::new(),
        })?;

        self.send(&payload).await?;
        let ack_text = self.receive().await?;
        let ack: Value = serde_json::from_str(&ack_text).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: ack_text.clone(),
        })?;

        if let Some(code) = ack.get("error").and_then(Value::as_i64).filter(|&c| c != 0) {
            let msg = ack.get("msg").and_then(Value::as_str).map(ToOwned::to_owned);
            return Err(Error::backend(code, msg));
        }

        if let Some(interval) = heartbeat_interval(&ack) {
            let with_margin = interval + HEARTBEAT_MARGIN_SECS;
            debug!(interval, with_margin, "heartbeat negotiated");
            self.channel_mut()?.set_heartbeat(with_margin);
        }

        Ok(ack)
    }

    /// Send a text payload, heartbeat check included.
    pub async fn send(&mut self, payload: &str) -> Result<(), Error> {
        self.channel_mut()?.send_frame(&Frame::text(payload)).await
    }

    /// Send an arbitrary frame.
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<(), Error> {
        self.channel_mut()?.send_frame(frame).await
    }

    /// Receive the next text payload, heartbeat check included.
    pub async fn receive(&mut self) -> Result<String, Error> {
        self.channel_mut()?.receive_text().await
    }

    /// Release the socket. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
            debug!("realtime channel closed");
        }
    }

    fn channel_mut(&mut self) -> Result<&mut FrameChannel<TlsStream<TcpStream>>, Error> {
        self.channel.as_mut().ok_or(Error::NotConnected)
    }
}
