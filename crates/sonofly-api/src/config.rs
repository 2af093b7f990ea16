// Application credentials for the device cloud.
//
// These are handed in by the caller; nothing here reads config files.
// The secret material stays in `SecretString` so it never leaks through
// Debug output or logs.

use secrecy::SecretString;

use crate::region::Region;

/// Developer-platform credentials plus the account's region.
///
/// Immutable once a session starts; used only to sign requests and to mint
/// a [`Session`](crate::Session) from an authorization code.
#[derive(Debug, Clone)]
pub struct AppCredentials {
    /// Application id from the developer platform.
    pub app_id: String,
    /// Application secret, used for HMAC request signing.
    pub app_secret: SecretString,
    /// OAuth redirect URL registered for the application.
    pub redirect_url: String,
    /// Account identifier (email or phone). Only needed for flows that
    /// present the hosted login page; requests never carry it.
    pub account: Option<String>,
    /// Account password. Same scope as `account`.
    pub password: Option<SecretString>,
    /// Region the account is registered in.
    pub region: Region,
}

impl AppCredentials {
    /// Create credentials for an application in the given region.
    pub fn new(
        app_id: impl Into<String>,
        app_secret: SecretString,
        redirect_url: impl Into<String>,
        region: Region,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret,
            redirect_url: redirect_url.into(),
            account: None,
            password: None,
            region,
        }
    }

    /// Attach the account identifier and password.
    pub fn with_account(mut self, account: impl Into<String>, password: SecretString) -> Self {
        self.account = Some(account.into());
        self.password = Some(password);
        self
    }

    /// Fail fast on credentials that cannot possibly work.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.app_id.is_empty() {
            return Err(crate::Error::Config {
                message: "app_id is empty".into(),
            });
        }
        if self.redirect_url.is_empty() {
            return Err(crate::Error::Config {
                message: "redirect_url is empty".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> AppCredentials {
        AppCredentials::new(
            "app-id-123",
            SecretString::from("shhh".to_string()),
            "https://example.invalid/callback",
            Region::Eu,
        )
    }

    #[test]
    fn debug_output_redacts_secret() {
        let c = creds().with_account("user@example.com", SecretString::from("pw".to_string()));
        let debug = format!("{c:?}");
        assert!(!debug.contains("shhh"));
        assert!(!debug.contains("\"pw\""));
        assert!(debug.contains("app-id-123"));
    }

    #[test]
    fn validate_rejects_empty_app_id() {
        let mut c = creds();
        c.app_id.clear();
        assert!(c.validate().is_err());
        assert!(creds().validate().is_ok());
    }
}
