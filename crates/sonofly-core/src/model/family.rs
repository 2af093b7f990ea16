// ── Family (home) domain types ──
//
// Devices hang off a family; the thing-list fetch needs the account's
// current family id.

use serde::{Deserialize, Serialize};

/// One family (home) on the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Family {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub index: Option<i64>,
    #[serde(default)]
    pub family_type: Option<i64>,
    #[serde(default)]
    pub apikey: Option<String>,
}

/// Payload of `GET /v2/family`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyInfo {
    #[serde(default)]
    pub family_list: Vec<Family>,
    #[serde(default)]
    pub current_family_id: Option<String>,
    #[serde(default)]
    pub has_changed_current_family: Option<bool>,
}
