#![allow(clippy::unwrap_used)]
// Integration tests for dispatch endpoint resolution and the resolved
// realtime URL, using wiremock for the dispatch service.

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sonofly_api::dispatch::{resolve_addr, resolve_endpoint_at};
use sonofly_api::{DispatchEndpoint, Error, WsClient};

async fn dispatch_server(body: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dispatch/app"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_resolve_endpoint() {
    let server = dispatch_server(json!({
        "port": 8080,
        "domain": "eu-pconnect7.example.cc",
        "reason": "ok",
        "error": 0
    }))
    .await;

    let http = reqwest::Client::new();
    let endpoint = resolve_endpoint_at(&http, &format!("{}/dispatch/app", server.uri()))
        .await
        .unwrap();

    assert_eq!(
        endpoint,
        DispatchEndpoint {
            domain: "eu-pconnect7.example.cc".into(),
            port: 8080
        }
    );
}

#[tokio::test]
async fn test_empty_dispatch_response_is_rejected() {
    let server = dispatch_server(json!({ "reason": "ok" })).await;

    let http = reqwest::Client::new();
    let result = resolve_endpoint_at(&http, &format!("{}/dispatch/app", server.uri())).await;

    assert!(
        matches!(result, Err(Error::EmptyDispatchResponse)),
        "expected EmptyDispatchResponse, got: {result:?}"
    );
}

#[tokio::test]
async fn test_zero_port_counts_as_empty() {
    let server = dispatch_server(json!({ "domain": "gw.example.cc", "port": 0 })).await;

    let http = reqwest::Client::new();
    let result = resolve_endpoint_at(&http, &format!("{}/dispatch/app", server.uri())).await;
    assert!(matches!(result, Err(Error::EmptyDispatchResponse)));
}

#[tokio::test]
async fn test_dispatch_lookup_is_unauthenticated() {
    let server = dispatch_server(json!({ "domain": "gw.example.cc", "port": 443 })).await;

    let http = reqwest::Client::new();
    resolve_endpoint_at(&http, &format!("{}/dispatch/app", server.uri()))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].headers.contains_key("authorization"));
}

#[tokio::test]
async fn test_resolved_url_uses_a_record_ip() {
    // The dispatch service advertises a domain; the wire URL must carry
    // the resolved address, fixed once per client.
    let server = dispatch_server(json!({ "domain": "localhost", "port": 8080 })).await;

    let http = reqwest::Client::new();
    let ws = WsClient::resolve_at(&http, &format!("{}/dispatch/app", server.uri()))
        .await
        .unwrap();

    let url = ws.url();
    assert!(url.starts_with("wss://"), "unexpected scheme: {url}");
    assert!(url.ends_with(":8080/api/ws"), "unexpected suffix: {url}");

    let ip: std::net::IpAddr = url
        .strip_prefix("wss://")
        .and_then(|rest| rest.strip_suffix(":8080/api/ws"))
        .unwrap()
        .parse()
        .unwrap();
    assert!(ip.is_loopback());

    assert_eq!(ws.endpoint().domain, "localhost");
    assert!(!ws.is_connected());
}

#[tokio::test]
async fn test_resolve_addr_keeps_port() {
    let endpoint = DispatchEndpoint {
        domain: "localhost".into(),
        port: 9443,
    };
    let addr = resolve_addr(&endpoint).await.unwrap();
    assert_eq!(addr.port(), 9443);
}
