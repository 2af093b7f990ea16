// ── Device domain types ──
//
// The thing list reports loosely typed parameter maps, with multi-channel
// devices nesting per-outlet state under `switches`. The parameter shape
// is selected once per device from its channel-split flag, so call sites
// match on the variant instead of probing map shapes.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Parameters of one outlet on a multi-channel device.
///
/// Serializes back to the wire shape: `{"outlet": 0, "switch": "on"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutletParams {
    pub outlet: u32,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl OutletParams {
    pub fn new(outlet: u32, params: Map<String, Value>) -> Self {
        Self { outlet, params }
    }
}

/// Tagged parameter shape: a flat map for single-channel devices, an
/// ordered per-outlet list for multi-channel ones.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceParams {
    Single(Map<String, Value>),
    Multi(Vec<OutletParams>),
}

impl DeviceParams {
    /// Select the shape from a raw parameter map and the channel-split flag.
    pub(crate) fn from_raw(params: Map<String, Value>, channel_split: bool) -> Self {
        if channel_split {
            if let Some(switches) = params.get("switches") {
                if let Ok(outlets) = serde_json::from_value::<Vec<OutletParams>>(switches.clone()) {
                    return Self::Multi(outlets);
                }
            }
        }
        Self::Single(params)
    }

    /// Look up a top-level parameter (single-channel shape only).
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Single(map) => map.get(key),
            Self::Multi(_) => None,
        }
    }

    /// Look up a parameter on a specific outlet (multi-channel shape only).
    pub fn get_outlet(&self, outlet: u32, key: &str) -> Option<&Value> {
        match self {
            Self::Multi(outlets) => outlets
                .iter()
                .find(|o| o.outlet == outlet)
                .and_then(|o| o.params.get(key)),
            Self::Single(_) => None,
        }
    }
}

/// Accepts the backend's mixed `1`/`true` boolean encoding.
fn truthy<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().is_some_and(|i| i != 0),
        _ => false,
    })
}

/// Raw `itemData` entry of the thing list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDevice {
    deviceid: String,
    #[serde(default)]
    name: Option<String>,
    apikey: String,
    #[serde(default)]
    product_model: Option<String>,
    #[serde(default, deserialize_with = "truthy")]
    online: bool,
    #[serde(default, deserialize_with = "truthy")]
    is_support_channel_split: bool,
    #[serde(default)]
    params: Map<String, Value>,
}

/// Cached view of one device, refreshed from the backend.
///
/// Never partially trusted: reconciliation always re-reads live values
/// before diffing, so the snapshot only answers identity questions
/// (apikey, channel shape, online flag).
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub device_id: String,
    pub name: Option<String>,
    pub apikey: String,
    pub product_model: Option<String>,
    pub online: bool,
    pub supports_channel_split: bool,
    pub params: DeviceParams,
}

impl DeviceSnapshot {
    /// Parse one `itemData` object from the thing list.
    pub(crate) fn from_item_data(value: &Value) -> Result<Self, CoreError> {
        let raw: RawDevice = serde_json::from_value(value.clone())
            .map_err(|e| CoreError::Internal(format!("malformed device entry: {e}")))?;

        let params = DeviceParams::from_raw(raw.params, raw.is_support_channel_split);
        Ok(Self {
            device_id: raw.deviceid,
            name: raw.name,
            apikey: raw.apikey,
            product_model: raw.product_model,
            online: raw.online,
            supports_channel_split: raw.is_support_channel_split,
            params,
        })
    }

    /// Whether parameters are addressed per outlet.
    pub fn is_multi_channel(&self) -> bool {
        self.supports_channel_split
    }
}

// ── Thing list wire shape ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ThingList {
    #[serde(default)]
    pub thing_list: Vec<ThingItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ThingItem {
    pub item_data: Value,
}
