#![allow(clippy::unwrap_used)]
// Integration tests for `DeviceDirectory` using wiremock.

use std::sync::Arc;

use chrono::Utc;
use secrecy::SecretString;
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sonofly_api::store::DEVICES_KEY;
use sonofly_api::{
    AppCredentials, CloudClient, KvStore, MemoryStore, Region, Session, SessionManager,
};
use sonofly_core::{CoreError, DeviceDirectory};

// ── Helpers ─────────────────────────────────────────────────────────

fn live_session() -> Session {
    let now = Utc::now().timestamp_millis();
    Session {
        access_token: "live-token".into(),
        refresh_token: "live-rt".into(),
        at_expired_time: now + 3_600_000,
        rt_expired_time: now + 7_200_000,
        region: Region::Eu,
    }
}

async fn setup() -> (MockServer, Arc<MemoryStore>, DeviceDirectory) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();

    let creds = AppCredentials::new(
        "test-app",
        SecretString::from("test-secret".to_string()),
        "https://example.invalid/callback",
        Region::Eu,
    );
    let manager = Arc::new(
        SessionManager::with_base_url(
            reqwest::Client::new(),
            base_url.clone(),
            creds,
            Arc::new(MemoryStore::new()),
        )
        .unwrap(),
    );
    manager.restore(live_session()).await.unwrap();

    let client = Arc::new(CloudClient::with_base_url(
        reqwest::Client::new(),
        base_url,
        manager,
    ));
    let store = Arc::new(MemoryStore::new());
    let directory = DeviceDirectory::new(client, store.clone());

    (server, store, directory)
}

async fn mount_family(server: &MockServer, current_family_id: Option<&str>) {
    let mut data = json!({ "familyList": [{ "id": "fam-1", "name": "Home" }] });
    if let Some(id) = current_family_id {
        data["currentFamilyId"] = json!(id);
    }

    Mock::given(method("GET"))
        .and(path("/v2/family"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "error": 0, "data": data })),
        )
        .mount(server)
        .await;
}

async fn mount_thing_list(server: &MockServer, devices: Vec<Value>) {
    let things: Vec<Value> = devices
        .into_iter()
        .map(|d| json!({ "itemType": 1, "itemData": d }))
        .collect();

    Mock::given(method("GET"))
        .and(path("/v2/device/thing"))
        .and(query_param("familyId", "fam-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": 0,
            "data": { "thingList": things }
        })))
        .mount(server)
        .await;
}

fn lamp(online: bool) -> Value {
    json!({
        "name": "Desk lamp",
        "deviceid": "10004d4e6b",
        "apikey": "apikey-owner",
        "productModel": "S26",
        "online": if online { 1 } else { 0 },
        "params": { "switch": "off" }
    })
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_refresh_parses_and_caches_devices() {
    let (server, _store, directory) = setup().await;
    mount_family(&server, Some("fam-1")).await;
    mount_thing_list(&server, vec![lamp(true)]).await;

    let devices = directory.refresh().await.unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].device_id, "10004d4e6b");
    assert_eq!(devices[0].name.as_deref(), Some("Desk lamp"));

    let cached = directory.cached("10004d4e6b").unwrap();
    assert!(cached.online);
}

#[tokio::test]
async fn test_get_is_read_through() {
    let (server, _store, directory) = setup().await;
    mount_family(&server, Some("fam-1")).await;
    mount_thing_list(&server, vec![lamp(true)]).await;

    assert!(directory.cached("10004d4e6b").is_none());

    let device = directory.get("10004d4e6b").await.unwrap();
    assert_eq!(device.apikey, "apikey-owner");

    // Second lookup answers from cache: still exactly one thing-list GET.
    directory.get("10004d4e6b").await.unwrap();
    let thing_fetches = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/v2/device/thing")
        .count();
    assert_eq!(thing_fetches, 1);
}

#[tokio::test]
async fn test_find_matches_name_and_id() {
    let (server, _store, directory) = setup().await;
    mount_family(&server, Some("fam-1")).await;
    mount_thing_list(&server, vec![lamp(true)]).await;

    assert_eq!(
        directory.find("Desk lamp").await.unwrap().device_id,
        "10004d4e6b"
    );
    assert_eq!(
        directory.find("10004d4e6b").await.unwrap().device_id,
        "10004d4e6b"
    );

    let missing = directory.find("Garage door").await;
    assert!(matches!(missing, Err(CoreError::DeviceNotFound { .. })));
}

#[tokio::test]
async fn test_is_online_rereads_the_thing_list() {
    let (server, _store, directory) = setup().await;
    mount_family(&server, Some("fam-1")).await;
    mount_thing_list(&server, vec![lamp(false)]).await;

    assert!(!directory.is_online("Desk lamp").await.unwrap());
}

#[tokio::test]
async fn test_raw_thing_list_is_persisted_once_per_change() {
    let (server, store, directory) = setup().await;
    mount_family(&server, Some("fam-1")).await;
    mount_thing_list(&server, vec![lamp(true)]).await;

    directory.refresh().await.unwrap();

    let persisted = store.get(DEVICES_KEY).unwrap().unwrap();
    assert!(persisted.contains("10004d4e6b"));

    // Identical refresh leaves the stored value byte-for-byte identical.
    directory.refresh().await.unwrap();
    assert_eq!(store.get(DEVICES_KEY).unwrap().unwrap(), persisted);
}

#[tokio::test]
async fn test_missing_family_id_is_surfaced() {
    let (server, _store, directory) = setup().await;
    mount_family(&server, None).await;

    let result = directory.refresh().await;
    assert!(matches!(result, Err(CoreError::NoFamily)));
}
