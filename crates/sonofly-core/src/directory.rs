// ── Device directory ──
//
// The account's thing list as a read-through cache. A refresh fetches
// family data (for the current family id) and the thing list, repopulates
// the in-memory map, and persists the raw list through the injected store
// when it changed. Cached snapshots answer identity questions only;
// reconciliation never trusts cached parameter values.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};

use sonofly_api::CloudClient;
use sonofly_api::store::{DEVICES_KEY, KvStore};

use crate::error::CoreError;
use crate::model::device::ThingList;
use crate::model::{DeviceSnapshot, FamilyInfo};

pub struct DeviceDirectory {
    client: Arc<CloudClient>,
    store: Arc<dyn KvStore>,
    devices: DashMap<String, DeviceSnapshot>,
    family: RwLock<Option<FamilyInfo>>,
}

impl DeviceDirectory {
    pub fn new(client: Arc<CloudClient>, store: Arc<dyn KvStore>) -> Self {
        Self {
            client,
            store,
            devices: DashMap::new(),
            family: RwLock::new(None),
        }
    }

    // ── Family ───────────────────────────────────────────────────────

    /// Fetch family data from the backend and remember it.
    pub async fn fetch_family(&self) -> Result<FamilyInfo, CoreError> {
        let info: FamilyInfo = self.client.get_authed("/v2/family", &[("lang", "en")]).await?;
        debug!(
            families = info.family_list.len(),
            current = info.current_family_id.as_deref().unwrap_or("<none>"),
            "family data fetched"
        );
        *self.family.write().expect("family lock poisoned") = Some(info.clone());
        Ok(info)
    }

    /// The current family id, fetching family data on first use.
    pub async fn current_family_id(&self) -> Result<String, CoreError> {
        let cached = self
            .family
            .read()
            .expect("family lock poisoned")
            .as_ref()
            .and_then(|f| f.current_family_id.clone());
        if let Some(id) = cached {
            return Ok(id);
        }

        self.fetch_family()
            .await?
            .current_family_id
            .ok_or(CoreError::NoFamily)
    }

    // ── Devices ──────────────────────────────────────────────────────

    /// Fetch the thing list, repopulate the cache, and return the parsed
    /// snapshots. Malformed entries are skipped, not fatal.
    pub async fn refresh(&self) -> Result<Vec<DeviceSnapshot>, CoreError> {
        let family_id = self.current_family_id().await?;
        let raw: Value = self
            .client
            .get_authed(
                "/v2/device/thing",
                &[("lang", "en"), ("familyId", family_id.as_str())],
            )
            .await?;

        self.persist_if_changed(&raw)?;

        let list: ThingList = serde_json::from_value(raw)
            .map_err(|e| CoreError::Internal(format!("malformed thing list: {e}")))?;

        self.devices.clear();
        let mut snapshots = Vec::with_capacity(list.thing_list.len());
        for item in &list.thing_list {
            match DeviceSnapshot::from_item_data(&item.item_data) {
                Ok(snapshot) => {
                    self.devices
                        .insert(snapshot.device_id.clone(), snapshot.clone());
                    snapshots.push(snapshot);
                }
                Err(e) => warn!(error = %e, "skipping malformed thing-list entry"),
            }
        }

        debug!(devices = snapshots.len(), "device directory refreshed");
        Ok(snapshots)
    }

    /// A cached snapshot without touching the network.
    pub fn cached(&self, device_id: &str) -> Option<DeviceSnapshot> {
        self.devices.get(device_id).map(|entry| entry.value().clone())
    }

    /// A snapshot by device id, fetching the thing list on a cache miss.
    pub async fn get(&self, device_id: &str) -> Result<DeviceSnapshot, CoreError> {
        if let Some(device) = self.cached(device_id) {
            return Ok(device);
        }

        self.refresh().await?;
        self.cached(device_id).ok_or_else(|| CoreError::DeviceNotFound {
            identifier: device_id.to_owned(),
        })
    }

    /// A snapshot by device id or display name.
    pub async fn find(&self, id_or_name: &str) -> Result<DeviceSnapshot, CoreError> {
        if self.devices.is_empty() {
            self.refresh().await?;
        }

        self.devices
            .iter()
            .find(|entry| {
                let device = entry.value();
                device.device_id == id_or_name || device.name.as_deref() == Some(id_or_name)
            })
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoreError::DeviceNotFound {
                identifier: id_or_name.to_owned(),
            })
    }

    /// Whether a device is currently online, from a fresh thing list.
    pub async fn is_online(&self, id_or_name: &str) -> Result<bool, CoreError> {
        self.refresh().await?;
        Ok(self.find(id_or_name).await?.online)
    }

    /// Persist the raw thing list only when its serialized form changed.
    fn persist_if_changed(&self, raw: &Value) -> Result<(), CoreError> {
        let serialized = raw.to_string();
        let unchanged = self
            .store
            .get(DEVICES_KEY)
            .map_err(CoreError::from)?
            .as_deref()
            == Some(serialized.as_str());
        if !unchanged {
            self.store
                .put(DEVICES_KEY, &serialized)
                .map_err(CoreError::from)?;
        }
        Ok(())
    }
}
