// HTTP Upgrade handshake.
//
// Promotes a TLS stream to a frame channel: send the upgrade request with
// a random 16-byte base64 key, read the response headers, and verify the
// server's accept value byte-for-byte against base64(SHA-1(key + GUID)).
// Any bytes the server sends after the header terminator belong to the
// frame layer and are handed back to the caller.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::Error;

/// Fixed GUID every server concatenates to the key (RFC 6455).
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the upgrade response; a well-behaved server answers in
/// a few hundred bytes.
const MAX_RESPONSE_BYTES: usize = 8 * 1024;

/// Generate a random 16-byte key, base64-encoded.
pub fn generate_key() -> String {
    BASE64.encode(rand::random::<[u8; 16]>())
}

/// The accept value a compliant server must answer with for `key`.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Perform the upgrade exchange on `stream`.
///
/// Returns any bytes read past the end of the response headers; the frame
/// layer must prepend them to its read buffer.
pub(crate) async fn upgrade<S>(
    stream: &mut S,
    host: &str,
    path: &str,
    key: &str,
) -> Result<Vec<u8>, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Protocol: chat\r\n\
         Origin: null\r\n\r\n"
    );

    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    // Read until the header terminator; frame bytes may follow immediately.
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let header_end = loop {
        if let Some(pos) = find_terminator(&buf) {
            break pos;
        }
        if buf.len() > MAX_RESPONSE_BYTES {
            return Err(Error::HandshakeFailed {
                message: "oversized upgrade response".into(),
            });
        }

        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::HandshakeFailed {
                message: "connection closed during upgrade".into(),
            });
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]);
    debug!(response = %head.lines().next().unwrap_or(""), "upgrade response");

    if !head.starts_with("HTTP/1.1 101") {
        return Err(Error::HandshakeFailed {
            message: format!(
                "expected 101 Switching Protocols, got {:?}",
                head.lines().next().unwrap_or("")
            ),
        });
    }

    let accept = header_value(&head, "sec-websocket-accept").ok_or(Error::HandshakeFailed {
        message: "missing Sec-WebSocket-Accept header".into(),
    })?;

    if accept != accept_key(key) {
        return Err(Error::AcceptKeyMismatch);
    }

    Ok(buf.split_off(header_end + 4))
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn header_value(head: &str, name: &str) -> Option<String> {
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_owned())
    })
}
