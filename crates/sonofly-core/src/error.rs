// ── Core error types ──
//
// User-facing errors from sonofly-core. Consumers never see raw transport
// detail directly; the `From<sonofly_api::Error>` impl translates the
// transport taxonomy into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Session errors ───────────────────────────────────────────────
    #[error("Authentication required: no valid session")]
    AuthenticationRequired,

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    #[error("Device {device} reports no parameters to update")]
    NoParameters { device: String },

    #[error("Parameter {parameter:?} does not exist on device {device}")]
    UnknownParameter { device: String, parameter: String },

    #[error("Desired parameters have the wrong shape for device {device}")]
    ShapeMismatch { device: String },

    #[error("No current family id; the account has no family data")]
    NoFamily,

    // ── Transport errors (wrapped, not exposed raw) ──────────────────
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Backend error {code}: {message}")]
    Backend { code: i64, message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<sonofly_api::Error> for CoreError {
    fn from(err: sonofly_api::Error) -> Self {
        use sonofly_api::Error as Api;

        match err {
            Api::NotAuthenticated => CoreError::AuthenticationRequired,
            Api::AuthInvalid { code, message } => CoreError::AuthenticationFailed {
                message: format!("access token rejected (code {code}): {message}"),
            },
            Api::AuthExchangeFailed { code, message } => CoreError::AuthenticationFailed {
                message: format!("authorization exchange failed (code {code}): {message}"),
            },
            Api::RefreshRejected { code, message } => CoreError::AuthenticationFailed {
                message: format!("token refresh rejected (code {code}): {message}"),
            },
            Api::NoRefreshToken => CoreError::AuthenticationRequired,

            Api::UnknownRegion { region } => CoreError::Config {
                message: format!("unknown region {region:?}"),
            },
            Api::Config { message } => CoreError::Config { message },
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("invalid URL: {e}"),
            },

            Api::Backend { code, message } => CoreError::Backend { code, message },

            Api::Deserialization { message, .. } => {
                CoreError::Internal(format!("deserialization error: {message}"))
            }
            Api::Store { message } => CoreError::Internal(format!("store error: {message}")),

            // Everything transport- or protocol-shaped: the caller's only
            // recovery is reconnect/retry, so one variant carries them all.
            other => CoreError::ConnectionFailed {
                reason: other.to_string(),
            },
        }
    }
}
