// Application-level wire messages.
//
// Every realtime exchange is a JSON text frame with an `action`
// discriminator. The `userOnline` announcement opens the session; `query`
// and `update` carry device reads and writes.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::sign;

/// Protocol version announced in the online handshake.
const PROTOCOL_VERSION: u8 = 8;

/// `userOnline`: announce the session after the transport upgrade. The
/// server's acknowledgement carries the required heartbeat interval.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineMessage {
    pub action: &'static str,
    pub version: u8,
    pub ts: i64,
    /// Current access token.
    pub at: String,
    pub user_agent: &'static str,
    pub apikey: String,
    pub appid: String,
    pub nonce: String,
    pub sequence: String,
}

impl OnlineMessage {
    pub fn new(access_token: String, apikey: String, app_id: String) -> Self {
        Self {
            action: "userOnline",
            version: PROTOCOL_VERSION,
            ts: chrono::Utc::now().timestamp(),
            at: access_token,
            user_agent: "app",
            apikey,
            appid: app_id,
            nonce: sign::nonce(),
            sequence: sign::sequence_ms(),
        }
    }
}

/// `query`: read named parameters from a device.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMessage {
    pub action: &'static str,
    pub deviceid: String,
    pub apikey: String,
    pub sequence: String,
    pub params: Vec<String>,
    pub user_agent: &'static str,
}

impl QueryMessage {
    pub fn new(deviceid: String, apikey: String, params: Vec<String>) -> Self {
        Self {
            action: "query",
            deviceid,
            apikey,
            sequence: sign::sequence_ms(),
            params,
            user_agent: "app",
        }
    }
}

/// `update`: push a parameter delta to a device.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMessage {
    pub action: &'static str,
    pub apikey: String,
    /// The sender's own apikey (differs from `apikey` for shared devices).
    pub self_apikey: String,
    pub deviceid: String,
    pub params: Map<String, Value>,
    pub user_agent: &'static str,
    pub sequence: String,
}

impl UpdateMessage {
    pub fn new(
        deviceid: String,
        apikey: String,
        self_apikey: String,
        params: Map<String, Value>,
    ) -> Self {
        Self {
            action: "update",
            apikey,
            self_apikey,
            deviceid,
            params,
            user_agent: "app",
            sequence: sign::sequence_ms(),
        }
    }
}
