// Session lifecycle.
//
// One OAuth-style token pair per authenticated actor: authorize mints it,
// refresh rotates it, expiry timers decide which of the two is still
// usable. The whole check-then-refresh path runs under one async mutex so
// concurrent callers observe exactly one refresh round-trip and the single
// resulting session, never a race of competing refreshes.

use std::sync::Arc;

use chrono::Utc;
use secrecy::ExposeSecret as _;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::client::signed_post;
use crate::config::AppCredentials;
use crate::error::Error;
use crate::region::Region;
use crate::sign;
use crate::store::{KvStore, SESSION_KEY};

/// Hosted OAuth login page. `authorization_url` points the user here;
/// the page redirects back with a one-time authorization code.
pub const OAUTH_PAGE_URL: &str = "https://c2ccdn.coolkit.cc/oauth/index.html";

/// The authenticated credential pair and its expiry timestamps.
///
/// Created by a successful authorization exchange, mutated only by
/// refresh, and torn down by invalidation. Serializes to the exact JSON
/// shape persisted through the injected [`KvStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry, epoch milliseconds.
    pub at_expired_time: i64,
    /// Refresh token expiry, epoch milliseconds.
    pub rt_expired_time: i64,
    pub region: Region,
}

impl Session {
    /// Whether the access token is still usable at `now_ms`.
    pub fn access_valid_at(&self, now_ms: i64) -> bool {
        now_ms < self.at_expired_time
    }

    /// Whether the refresh token is still usable at `now_ms`.
    pub fn refresh_valid_at(&self, now_ms: i64) -> bool {
        now_ms < self.rt_expired_time
    }
}

/// Payload of `POST /v2/user/oauth/token`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenGrant {
    access_token: String,
    refresh_token: String,
    at_expired_time: i64,
    rt_expired_time: i64,
}

/// Payload of `POST /v2/user/refresh`. The endpoint abbreviates field
/// names and does not always return new expiries.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshGrant {
    at: Option<String>,
    rt: Option<String>,
    at_expired_time: Option<i64>,
    rt_expired_time: Option<i64>,
}

/// Owns the session record and the refresh protocol.
///
/// The one piece of state plausibly touched by concurrent callers; all
/// access goes through an async mutex (see module docs).
pub struct SessionManager {
    http: reqwest::Client,
    base_url: Url,
    creds: AppCredentials,
    store: Arc<dyn KvStore>,
    state: Mutex<Option<Session>>,
}

impl SessionManager {
    /// Create a manager against the credentials' region gateway, loading
    /// any previously persisted session from the store.
    pub fn new(
        http: reqwest::Client,
        creds: AppCredentials,
        store: Arc<dyn KvStore>,
    ) -> Result<Self, Error> {
        creds.validate()?;
        let base_url = Url::parse(creds.region.api_base())?;
        Self::with_base_url(http, base_url, creds, store)
    }

    /// Create a manager against an explicit gateway URL (tests, proxies).
    pub fn with_base_url(
        http: reqwest::Client,
        base_url: Url,
        creds: AppCredentials,
        store: Arc<dyn KvStore>,
    ) -> Result<Self, Error> {
        let persisted = match store.get(SESSION_KEY)? {
            Some(raw) => match serde_json::from_str::<Session>(&raw) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!(error = %e, "ignoring unreadable persisted session");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            http,
            base_url,
            creds,
            store,
            state: Mutex::new(persisted),
        })
    }

    /// The application credentials this manager signs with.
    pub fn credentials(&self) -> &AppCredentials {
        &self.creds
    }

    /// The account region.
    pub fn region(&self) -> Region {
        self.creds.region
    }

    /// URL of the hosted login page for this application. The page
    /// redirects back to `redirect_url` with the one-time code that
    /// [`authorize`](Self::authorize) exchanges for a session.
    pub fn authorization_url(&self, state: &str) -> Result<Url, Error> {
        let seq = Utc::now().timestamp_millis();
        let authorization = sign::hmac_sign(
            &format!("{}_{seq}", self.creds.app_id),
            self.creds.app_secret.expose_secret(),
        );

        let mut url = Url::parse(OAUTH_PAGE_URL)?;
        url.query_pairs_mut()
            .append_pair("state", state)
            .append_pair("clientId", &self.creds.app_id)
            .append_pair("authorization", &authorization)
            .append_pair("seq", &seq.to_string())
            .append_pair("redirectUrl", &self.creds.redirect_url)
            .append_pair("nonce", &sign::nonce())
            .append_pair("grantType", "authorization_code");
        Ok(url)
    }

    // ── Lifecycle operations ─────────────────────────────────────────

    /// Exchange a one-time authorization code for a session.
    pub async fn authorize(&self, code: &str) -> Result<Session, Error> {
        let body = json!({
            "grantType": "authorization_code",
            "code": code,
            "redirectUrl": self.creds.redirect_url,
        });

        let data = signed_post(
            &self.http,
            &self.base_url,
            &self.creds,
            "/v2/user/oauth/token",
            &body,
        )
        .await
        .map_err(|err| match err {
            Error::Backend { code, message } | Error::AuthInvalid { code, message } => {
                Error::AuthExchangeFailed { code, message }
            }
            other => other,
        })?;

        let grant: TokenGrant =
            serde_json::from_value(data.clone()).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: data.to_string(),
            })?;

        let session = Session {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            at_expired_time: grant.at_expired_time,
            rt_expired_time: grant.rt_expired_time,
            region: self.creds.region,
        };

        debug!("authorization exchange succeeded");

        let mut guard = self.state.lock().await;
        self.persist_if_changed(&session)?;
        *guard = Some(session.clone());
        Ok(session)
    }

    /// Rotate the token pair using the refresh token.
    ///
    /// Expiry fields the backend omits are kept from the existing session
    /// (defensive merge, not blind replace).
    pub async fn refresh(&self) -> Result<Session, Error> {
        let mut guard = self.state.lock().await;
        self.refresh_locked(&mut guard).await
    }

    /// The core lifecycle check: is there a usable access token right now?
    ///
    /// - no session: `false`, no network I/O
    /// - access token valid: `true`, no network I/O
    /// - access expired, refresh token valid: exactly one refresh, `true`
    /// - refresh token expired: `false`, no network I/O
    pub async fn ensure_valid(&self) -> Result<bool, Error> {
        let mut guard = self.state.lock().await;
        let Some(session) = guard.as_ref() else {
            return Ok(false);
        };

        let now = Utc::now().timestamp_millis();
        if session.access_valid_at(now) {
            return Ok(true);
        }
        if session.refresh_valid_at(now) {
            debug!("access token stale, refreshing silently");
            self.refresh_locked(&mut guard).await?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Tear down the session, in memory and in the store.
    ///
    /// Called automatically when a downstream request reports the access
    /// token invalid; after this the caller must restart authorization.
    pub async fn invalidate(&self) {
        let mut guard = self.state.lock().await;
        *guard = None;
        if let Err(e) = self.store.remove(SESSION_KEY) {
            warn!(error = %e, "failed to clear persisted session");
        }
        debug!("session invalidated");
    }

    /// Install a session obtained elsewhere (external persistence,
    /// another process). Persists it like any freshly minted session.
    pub async fn restore(&self, session: Session) -> Result<(), Error> {
        let mut guard = self.state.lock().await;
        self.persist_if_changed(&session)?;
        *guard = Some(session);
        Ok(())
    }

    /// The current access token, if a session exists.
    pub async fn access_token(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    /// A copy of the current session record, if any.
    pub async fn session(&self) -> Option<Session> {
        self.state.lock().await.clone()
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn refresh_locked(&self, guard: &mut Option<Session>) -> Result<Session, Error> {
        let current = guard.as_ref().ok_or(Error::NoRefreshToken)?;
        if current.refresh_token.is_empty() {
            return Err(Error::NoRefreshToken);
        }

        let body = json!({
            "grantType": "refresh_token",
            "rt": current.refresh_token,
        });

        let data = signed_post(
            &self.http,
            &self.base_url,
            &self.creds,
            "/v2/user/refresh",
            &body,
        )
        .await
        .map_err(|err| match err {
            Error::Backend { code, message } | Error::AuthInvalid { code, message } => {
                Error::RefreshRejected { code, message }
            }
            other => other,
        })?;

        let grant: RefreshGrant =
            serde_json::from_value(data.clone()).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: data.to_string(),
            })?;

        let session = Session {
            access_token: grant.at.unwrap_or_else(|| current.access_token.clone()),
            refresh_token: grant.rt.unwrap_or_else(|| current.refresh_token.clone()),
            at_expired_time: grant.at_expired_time.unwrap_or(current.at_expired_time),
            rt_expired_time: grant.rt_expired_time.unwrap_or(current.rt_expired_time),
            region: current.region,
        };

        debug!("token refresh succeeded");

        self.persist_if_changed(&session)?;
        *guard = Some(session.clone());
        Ok(session)
    }

    /// Write the session through the store only when its serialized form
    /// actually changed, to avoid redundant writes on flash-backed stores.
    fn persist_if_changed(&self, session: &Session) -> Result<(), Error> {
        let serialized = serde_json::to_string(session).map_err(|e| Error::Store {
            message: format!("session serialization failed: {e}"),
        })?;

        if self.store.get(SESSION_KEY)?.as_deref() != Some(serialized.as_str()) {
            self.store.put(SESSION_KEY, &serialized)?;
        }
        Ok(())
    }
}
