// Cloud gateway HTTP client.
//
// Wraps `reqwest::Client` with region-aware URL construction, the vendor
// `{error, msg, data}` envelope, and the two authorization schemes:
// `Authorization: Bearer <access token>` for session-scoped calls and
// `Authorization: Sign <base64 hmac>` for unauthenticated signed calls.
// A 401-class backend code invalidates the session before the error is
// surfaced, so the next caller is forced through re-authorization instead
// of looping on a dead token.

use std::sync::Arc;

use reqwest::header;
use secrecy::ExposeSecret as _;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::AppCredentials;
use crate::error::Error;
use crate::region::Region;
use crate::session::SessionManager;
use crate::sign;

pub(crate) const HEADER_APPID: &str = "X-CK-Appid";
pub(crate) const HEADER_NONCE: &str = "X-CK-Nonce";

/// Response envelope every gateway endpoint wraps its payload in.
#[derive(Debug, serde::Deserialize)]
struct Envelope {
    #[serde(default)]
    error: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// Parse a gateway response body, returning `data` on `error == 0` or the
/// typed backend failure otherwise. Has no side effects; session
/// invalidation is the caller's job.
pub(crate) fn decode_envelope(body: &str) -> Result<Value, Error> {
    let envelope: Envelope = serde_json::from_str(body).map_err(|e| {
        let preview = &body[..body.len().min(200)];
        Error::Deserialization {
            message: format!("{e} (body preview: {preview:?})"),
            body: body.to_owned(),
        }
    })?;

    if envelope.error != 0 {
        return Err(Error::backend(envelope.error, envelope.msg));
    }

    Ok(envelope.data.unwrap_or(Value::Null))
}

/// One signed POST: body serialized once, signature over those exact bytes.
pub(crate) async fn signed_post(
    http: &reqwest::Client,
    base_url: &Url,
    creds: &AppCredentials,
    path: &str,
    body: &Value,
) -> Result<Value, Error> {
    let url = base_url.join(path)?;
    let payload = serde_json::to_string(body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: String::new(),
    })?;
    let signature = sign::hmac_sign(&payload, creds.app_secret.expose_secret());

    debug!("POST {} (signed)", url);

    let resp = http
        .post(url)
        .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
        .header(HEADER_APPID, creds.app_id.as_str())
        .header(HEADER_NONCE, sign::nonce())
        .header(header::AUTHORIZATION, format!("Sign {signature}"))
        .body(payload)
        .send()
        .await
        .map_err(Error::Transport)?;

    let status = resp.status();
    let text = resp.text().await.map_err(Error::Transport)?;
    if !status.is_success() {
        return Err(Error::Backend {
            code: i64::from(status.as_u16()),
            message: format!("HTTP {status}"),
        });
    }

    decode_envelope(&text)
}

/// Authenticated HTTP client for the region gateway.
///
/// Every bearer call goes through [`SessionManager::ensure_valid`] first,
/// so an expired access token is silently refreshed before the request and
/// never observed by the backend.
pub struct CloudClient {
    http: reqwest::Client,
    base_url: Url,
    session: Arc<SessionManager>,
}

impl CloudClient {
    /// Create a client against the session's region gateway.
    pub fn new(http: reqwest::Client, session: Arc<SessionManager>) -> Result<Self, Error> {
        let base_url = Url::parse(session.region().api_base())?;
        Ok(Self::with_base_url(http, base_url, session))
    }

    /// Create a client against an explicit gateway URL (tests, proxies).
    pub fn with_base_url(
        http: reqwest::Client,
        base_url: Url,
        session: Arc<SessionManager>,
    ) -> Self {
        Self {
            http,
            base_url,
            session,
        }
    }

    /// The underlying HTTP client (shared with dispatch resolution).
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// The gateway base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The account region.
    pub fn region(&self) -> Region {
        self.session.region()
    }

    /// The session manager backing this client.
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    // ── Request paths ────────────────────────────────────────────────

    /// Bearer-authenticated GET.
    pub async fn get_authed<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, Error> {
        let token = self.bearer_token().await?;
        let url = self.base_url.join(path)?;

        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(token)
            .send()
            .await
            .map_err(Error::Transport)?;

        self.unwrap_envelope(resp).await
    }

    /// Bearer-authenticated POST with a JSON body.
    pub async fn post_authed<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<T, Error> {
        let token = self.bearer_token().await?;
        let url = self.base_url.join(path)?;

        debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .header(HEADER_APPID, self.session.credentials().app_id.as_str())
            .header(HEADER_NONCE, sign::nonce())
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        self.unwrap_envelope(resp).await
    }

    /// Signed (unauthenticated) POST. No session required.
    pub async fn post_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<T, Error> {
        let data = signed_post(
            &self.http,
            &self.base_url,
            self.session.credentials(),
            path,
            body,
        )
        .await?;
        from_data(data)
    }

    // ── Internals ────────────────────────────────────────────────────

    /// A currently valid access token, refreshing silently if needed.
    async fn bearer_token(&self) -> Result<String, Error> {
        if !self.session.ensure_valid().await? {
            return Err(Error::NotAuthenticated);
        }
        self.session
            .access_token()
            .await
            .ok_or(Error::NotAuthenticated)
    }

    /// Unwrap the response envelope, invalidating the session on any
    /// 401-class outcome (HTTP status or backend code).
    async fn unwrap_envelope<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, Error> {
        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;

        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.session.invalidate().await;
            return Err(Error::backend(401, None));
        }

        if !status.is_success() {
            let preview = &body[..body.len().min(200)];
            return Err(Error::Backend {
                code: i64::from(status.as_u16()),
                message: format!("HTTP {status}: {preview}"),
            });
        }

        match decode_envelope(&body) {
            Ok(data) => from_data(data),
            Err(err) => {
                if matches!(err, Error::AuthInvalid { .. }) {
                    self.session.invalidate().await;
                }
                Err(err)
            }
        }
    }
}

/// Deserialize an envelope `data` payload into the caller's type.
fn from_data<T: DeserializeOwned>(data: Value) -> Result<T, Error> {
    serde_json::from_value(data.clone()).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: data.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_returns_data_on_success() {
        let data = decode_envelope(r#"{"error":0,"msg":"","data":{"port":8080}}"#).unwrap();
        assert_eq!(data["port"], 8080);
    }

    #[test]
    fn envelope_without_data_is_null() {
        let data = decode_envelope(r#"{"error":0}"#).unwrap();
        assert!(data.is_null());
    }

    #[test]
    fn envelope_error_maps_through_code_table() {
        let err = decode_envelope(r#"{"error":4002,"msg":""}"#).unwrap_err();
        match err {
            Error::Backend { code, message } => {
                assert_eq!(code, 4002);
                assert!(message.contains("Device control failure"));
            }
            other => panic!("expected Backend, got {other:?}"),
        }
    }

    #[test]
    fn envelope_auth_codes_are_typed() {
        let err = decode_envelope(r#"{"error":402,"msg":"token expired"}"#).unwrap_err();
        assert!(matches!(err, Error::AuthInvalid { code: 402, .. }));
    }

    #[test]
    fn non_json_body_is_deserialization_error() {
        let err = decode_envelope("<html>gateway error</html>").unwrap_err();
        assert!(matches!(err, Error::Deserialization { .. }));
    }
}
