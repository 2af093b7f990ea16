use thiserror::Error;

/// Top-level error type for the `sonofly-api` crate.
///
/// Covers every failure mode across the transport surfaces: configuration,
/// session lifecycle, HTTP transport, the realtime wire protocol, and
/// backend application errors. `sonofly-core` maps these into
/// domain-appropriate diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Configuration ───────────────────────────────────────────────
    /// A region string outside the fixed cn/us/eu/as table.
    #[error("Unknown region: {region:?} (expected one of cn, us, eu, as)")]
    UnknownRegion { region: String },

    /// Invalid or incomplete configuration.
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Session lifecycle ───────────────────────────────────────────
    /// The authorization-code exchange was rejected by the backend.
    #[error("Authorization exchange failed (code {code}): {message}")]
    AuthExchangeFailed { code: i64, message: String },

    /// `refresh()` called before any session was obtained.
    #[error("No refresh token available, authorize first")]
    NoRefreshToken,

    /// The backend rejected the refresh token.
    #[error("Token refresh rejected (code {code}): {message}")]
    RefreshRejected { code: i64, message: String },

    /// No live session: never authorized, or both tokens expired.
    #[error("Not authenticated, authorization required")]
    NotAuthenticated,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Socket-level I/O error on the realtime channel.
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS configuration or handshake error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// DNS lookup for the dispatch domain produced no address.
    #[error("Could not resolve host: {host}")]
    DnsResolve { host: String },

    /// The TCP connect did not complete within the bound.
    #[error("Connect timed out after {timeout_secs}s")]
    ConnectTimeout { timeout_secs: u64 },

    // ── Wire protocol ───────────────────────────────────────────────
    /// Dispatch response was missing a usable domain or port.
    #[error("Dispatch response carried no endpoint")]
    EmptyDispatchResponse,

    /// The HTTP Upgrade exchange failed before frame traffic started.
    #[error("WebSocket handshake failed: {message}")]
    HandshakeFailed { message: String },

    /// The server's Sec-WebSocket-Accept did not match the expected value.
    #[error("WebSocket accept key mismatch")]
    AcceptKeyMismatch,

    /// A frame violated the wire format (bad opcode, bad length encoding).
    #[error("Malformed frame: {message}")]
    MalformedFrame { message: String },

    /// Payload length cannot be encoded (64-bit length with the top bit set).
    #[error("Frame payload too large: {len} bytes")]
    FrameTooLarge { len: u64 },

    /// Operation attempted on a client that never connected or was closed.
    #[error("No realtime connection")]
    NotConnected,

    /// The peer closed the channel (close frame or end of stream).
    #[error("Realtime connection closed by peer")]
    ConnectionClosed,

    // ── Backend ─────────────────────────────────────────────────────
    /// Non-zero error code in the backend response envelope.
    #[error("Backend error {code}: {message}")]
    Backend { code: i64, message: String },

    /// Backend reported the access token invalid or expired (codes 401/402).
    /// The session has already been invalidated when this surfaces.
    #[error("Access token rejected (code {code}): {message}")]
    AuthInvalid { code: i64, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Persistence ─────────────────────────────────────────────────
    /// The injected key-value store failed.
    #[error("Store error: {message}")]
    Store { message: String },
}

impl Error {
    /// Build a backend error from an envelope code, using the fixed code
    /// table when the backend sent no message of its own.
    ///
    /// Codes 401 and 402 (token invalidated / expired) become
    /// [`Error::AuthInvalid`] so callers can pattern-match the one case
    /// that requires re-authorization.
    pub fn backend(code: i64, message: Option<String>) -> Self {
        let message = message
            .filter(|m| !m.is_empty())
            .or_else(|| describe_code(code).map(String::from))
            .unwrap_or_else(|| "Unknown error".into());

        if matches!(code, 401 | 402) {
            Self::AuthInvalid { code, message }
        } else {
            Self::Backend { code, message }
        }
    }

    /// Returns `true` if this error means the session is dead and
    /// re-authorization might resolve it.
    pub fn is_auth_invalid(&self) -> bool {
        matches!(
            self,
            Self::AuthInvalid { .. } | Self::NotAuthenticated | Self::RefreshRejected { .. }
        )
    }

    /// Returns `true` if this is a transient transport failure worth a
    /// caller-side retry. Protocol and configuration errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Io(_) | Self::ConnectTimeout { .. } | Self::DnsResolve { .. } => true,
            _ => false,
        }
    }
}

/// Human messages for the fixed backend error-code table.
///
/// Unmapped codes fall through to a generic message carrying the raw code.
pub fn describe_code(code: i64) -> Option<&'static str> {
    let msg = match code {
        400 => "Parameter error: a required parameter is missing or has the wrong type or value",
        401 => "Access token authentication error, the account was signed in elsewhere and the current access token is no longer valid",
        402 => "Access token expired",
        403 => "Interface not found, the request URL is wrong",
        405 => "Resource not found in the backend database",
        406 => "Operation rejected, the current user has no permission on the resource",
        407 => "Appid has no operation permission",
        412 => "Appid call limit exceeded",
        500 => "Server internal error",
        4002 => "Device control failure, check the parameters or the device online status",
        30003 => "Failed to notify the device to drop its temporary persistent connection",
        30007 => "GSM device already added by another user",
        30008 => "Shared user does not exist",
        30009 => "Group limit for the current subscription plan exceeded",
        30010 => "Device id format is wrong",
        30011 => "Factory data not found for the device being added",
        30012 => "Factory data is missing its extra field",
        30013 => "Factory data brand info not found",
        30014 => "Chipid error",
        30015 => "Digest error while adding a device",
        30016 => "Appid not found while adding a device",
        30017 => "Appid is not allowed to add devices of this brand",
        30018 => "No device found with this deviceid",
        30019 => "Factory data product model not found",
        30022 => "Device is offline and the operation failed",
        _ => return None,
    };
    Some(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_auth_codes_become_auth_invalid() {
        let err = Error::backend(401, None);
        assert!(matches!(err, Error::AuthInvalid { code: 401, .. }));
        assert!(err.is_auth_invalid());

        let err = Error::backend(402, Some("expired".into()));
        assert!(matches!(err, Error::AuthInvalid { code: 402, .. }));
    }

    #[test]
    fn backend_message_falls_back_to_table() {
        match Error::backend(30022, None) {
            Error::Backend { code, message } => {
                assert_eq!(code, 30022);
                assert!(message.contains("offline"));
            }
            other => panic!("expected Backend, got {other:?}"),
        }
    }

    #[test]
    fn unmapped_code_gets_generic_message() {
        match Error::backend(99999, None) {
            Error::Backend { code, message } => {
                assert_eq!(code, 99999);
                assert_eq!(message, "Unknown error");
            }
            other => panic!("expected Backend, got {other:?}"),
        }
    }

    #[test]
    fn backend_message_prefers_server_text() {
        match Error::backend(400, Some("bad id".into())) {
            Error::Backend { message, .. } => assert_eq!(message, "bad id"),
            other => panic!("expected Backend, got {other:?}"),
        }
    }
}
