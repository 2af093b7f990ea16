// Realtime dispatch endpoint resolution.
//
// Each region's dispatch service advertises the gateway host/port for
// WebSocket connections. The lookup is unauthenticated, and DNS resolution
// of the advertised domain is a point-in-time decision made once per wire
// client, never re-resolved per frame.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tokio::net::lookup_host;
use tracing::debug;

use crate::error::Error;
use crate::region::Region;

/// Host and port advertised by a region's dispatch service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchEndpoint {
    pub domain: String,
    pub port: u16,
}

/// Raw dispatch response. The service answers outside the usual
/// `{error, msg, data}` envelope.
#[derive(Debug, Deserialize)]
struct DispatchResponse {
    #[serde(default)]
    error: Option<i64>,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    port: Option<u16>,
}

/// Look up the dispatch endpoint for a region.
pub async fn resolve_endpoint(
    http: &reqwest::Client,
    region: Region,
) -> Result<DispatchEndpoint, Error> {
    resolve_endpoint_at(http, region.dispatch_url()).await
}

/// Look up the dispatch endpoint at an explicit URL (tests, proxies).
pub async fn resolve_endpoint_at(
    http: &reqwest::Client,
    url: &str,
) -> Result<DispatchEndpoint, Error> {
    debug!("GET {} (dispatch)", url);

    let resp = http.get(url).send().await.map_err(Error::Transport)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Backend {
            code: i64::from(status.as_u16()),
            message: format!("dispatch lookup failed: HTTP {status}"),
        });
    }

    let parsed: DispatchResponse = resp.json().await.map_err(Error::Transport)?;
    if let Some(code) = parsed.error.filter(|&c| c != 0) {
        return Err(Error::backend(code, None));
    }

    match (parsed.domain, parsed.port) {
        (Some(domain), Some(port)) if !domain.is_empty() && port != 0 => {
            debug!(%domain, port, "dispatch endpoint resolved");
            Ok(DispatchEndpoint { domain, port })
        }
        _ => Err(Error::EmptyDispatchResponse),
    }
}

/// Resolve the endpoint's domain to a socket address, once.
pub async fn resolve_addr(endpoint: &DispatchEndpoint) -> Result<SocketAddr, Error> {
    let mut addrs = lookup_host((endpoint.domain.as_str(), endpoint.port))
        .await
        .map_err(|_| Error::DnsResolve {
            host: endpoint.domain.clone(),
        })?;

    addrs.next().ok_or_else(|| Error::DnsResolve {
        host: endpoint.domain.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_addr_uses_a_record() {
        let endpoint = DispatchEndpoint {
            domain: "localhost".into(),
            port: 8080,
        };
        let addr = resolve_addr(&endpoint).await.unwrap();
        assert_eq!(addr.port(), 8080);
        assert!(addr.ip().is_loopback());
    }

    #[tokio::test]
    async fn unresolvable_domain_is_dns_error() {
        let endpoint = DispatchEndpoint {
            domain: "definitely-not-a-host.invalid".into(),
            port: 443,
        };
        let err = resolve_addr(&endpoint).await.unwrap_err();
        assert!(matches!(err, Error::DnsResolve { host } if host.contains("invalid")));
    }
}
