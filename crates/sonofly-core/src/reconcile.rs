// ── Parameter reconciliation ──
//
// Turns a desired device state into a minimal, verified wire update:
// re-read live values, diff per key, issue at most one write carrying
// only the changed keys, then read back each changed key to confirm
// convergence. Outcomes are per key; one bad outlet does not roll back
// its siblings. The realtime path runs the same exchange over the wire
// protocol channel for devices that answer faster there.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use sonofly_api::ws::{OnlineMessage, QueryMessage, UpdateMessage};
use sonofly_api::{CloudClient, WsClient};

use crate::directory::DeviceDirectory;
use crate::error::CoreError;
use crate::model::{DeviceParams, DeviceSnapshot, OutletParams};

// ── Outcome types ────────────────────────────────────────────────────

/// What happened to one desired parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyStatus {
    /// Live value already matched; nothing was written for this key.
    AlreadySet,
    /// Written and confirmed by read-back.
    Updated { from: Value, to: Value },
    /// Written, but the read-back value did not match.
    Diverged { desired: Value, observed: Value },
    /// The referenced outlet does not exist on the device.
    UnknownOutlet,
    /// The parameter does not exist on the referenced outlet.
    UnknownParameter,
}

/// Non-fatal signal preserved in the outcome rather than coerced away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueWarning {
    /// Desired value is a numeric-looking string against a numeric
    /// backend value; device firmware tolerates it, but the caller may
    /// want an integer.
    NumericString,
}

/// Per-key result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyOutcome {
    pub parameter: String,
    /// Outlet index for multi-channel devices.
    pub outlet: Option<u32>,
    pub status: KeyStatus,
    pub warning: Option<ValueWarning>,
}

impl KeyOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(
            self.status,
            KeyStatus::AlreadySet | KeyStatus::Updated { .. }
        )
    }
}

/// Result of [`DeviceReconciler::apply_desired`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub device_id: String,
    /// Whether a write request was issued at all.
    pub wrote: bool,
    pub entries: Vec<KeyOutcome>,
}

impl ReconcileOutcome {
    /// Every desired value already matched; zero writes went out.
    pub fn is_noop(&self) -> bool {
        !self.wrote
    }

    /// Every key either matched already or converged after the write.
    pub fn fully_converged(&self) -> bool {
        self.entries.iter().all(KeyOutcome::succeeded)
    }
}

// ── Value comparison ─────────────────────────────────────────────────

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Loose equality mirroring device firmware tolerance: `"1"` equals `1`.
fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => false,
    }
}

/// Flag a numeric-looking string desired value against a numeric backend
/// value. Preserved as a first-class signal, never silently coerced.
fn numeric_string_warning(desired: &Value, current: &Value) -> Option<ValueWarning> {
    match desired {
        Value::String(s) if s.parse::<f64>().is_ok() && current.is_number() => {
            Some(ValueWarning::NumericString)
        }
        _ => None,
    }
}

/// Serialize a wire message to its text-frame payload.
fn serialize_message<T: serde::Serialize>(message: &T) -> Result<String, CoreError> {
    serde_json::to_string(message)
        .map_err(|e| CoreError::Internal(format!("message serialization failed: {e}")))
}

// ── DeviceReconciler ─────────────────────────────────────────────────

pub struct DeviceReconciler {
    client: Arc<CloudClient>,
    directory: Arc<DeviceDirectory>,
}

impl DeviceReconciler {
    pub fn new(client: Arc<CloudClient>, directory: Arc<DeviceDirectory>) -> Self {
        Self { client, directory }
    }

    // ── REST path ────────────────────────────────────────────────────

    /// Fetch live parameter values: the named ones, or the full set.
    pub async fn read_live(
        &self,
        device_id: &str,
        params: Option<&[&str]>,
    ) -> Result<Map<String, Value>, CoreError> {
        let joined;
        let mut query = vec![("id", device_id), ("type", "1")];
        if let Some(names) = params {
            joined = names.join("|");
            query.push(("params", joined.as_str()));
        }

        let data: Value = self
            .client
            .get_authed("/v2/device/thing/status", &query)
            .await?;

        Ok(data
            .get("params")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default())
    }

    /// Diff the desired parameters against freshly read live values and
    /// converge the device onto them.
    ///
    /// An unknown parameter name on a single-channel device aborts before
    /// any write; an unknown outlet on a multi-channel device is a
    /// per-key failure and the remaining outlets still proceed.
    pub async fn apply_desired(
        &self,
        device_id: &str,
        desired: &DeviceParams,
    ) -> Result<ReconcileOutcome, CoreError> {
        let snapshot = self.directory.get(device_id).await?;
        let current = self.read_live(device_id, None).await?;
        if current.is_empty() {
            return Err(CoreError::NoParameters {
                device: device_id.to_owned(),
            });
        }

        match (snapshot.is_multi_channel(), desired) {
            (false, DeviceParams::Single(map)) => self.apply_single(device_id, map, &current).await,
            (true, DeviceParams::Multi(outlets)) => {
                self.apply_multi(device_id, outlets, &current).await
            }
            _ => Err(CoreError::ShapeMismatch {
                device: device_id.to_owned(),
            }),
        }
    }

    async fn apply_single(
        &self,
        device_id: &str,
        desired: &Map<String, Value>,
        current: &Map<String, Value>,
    ) -> Result<ReconcileOutcome, CoreError> {
        let mut entries = Vec::with_capacity(desired.len());
        let mut delta = Map::new();

        for (key, want) in desired {
            let Some(have) = current.get(key) else {
                // Never silently create parameters the device does not have.
                return Err(CoreError::UnknownParameter {
                    device: device_id.to_owned(),
                    parameter: key.clone(),
                });
            };

            let warning = numeric_string_warning(want, have);
            if values_equal(have, want) {
                entries.push(KeyOutcome {
                    parameter: key.clone(),
                    outlet: None,
                    status: KeyStatus::AlreadySet,
                    warning,
                });
            } else {
                delta.insert(key.clone(), want.clone());
                entries.push(KeyOutcome {
                    parameter: key.clone(),
                    outlet: None,
                    status: KeyStatus::Updated {
                        from: have.clone(),
                        to: want.clone(),
                    },
                    warning,
                });
            }
        }

        if delta.is_empty() {
            debug!(device_id, "all parameters already set, no write issued");
            return Ok(ReconcileOutcome {
                device_id: device_id.to_owned(),
                wrote: false,
                entries,
            });
        }

        self.write_params(device_id, Value::Object(delta.clone()))
            .await?;

        // One read-back per changed key to confirm convergence.
        for entry in &mut entries {
            if !matches!(entry.status, KeyStatus::Updated { .. }) {
                continue;
            }
            let observed_map = self
                .read_live(device_id, Some(&[entry.parameter.as_str()]))
                .await?;
            let observed = observed_map
                .get(&entry.parameter)
                .cloned()
                .unwrap_or(Value::Null);
            let desired_value = delta
                .get(&entry.parameter)
                .cloned()
                .unwrap_or(Value::Null);

            if !values_equal(&observed, &desired_value) {
                warn!(
                    device_id,
                    parameter = %entry.parameter,
                    "post-write verification mismatch"
                );
                entry.status = KeyStatus::Diverged {
                    desired: desired_value,
                    observed,
                };
            }
        }

        Ok(ReconcileOutcome {
            device_id: device_id.to_owned(),
            wrote: true,
            entries,
        })
    }

    async fn apply_multi(
        &self,
        device_id: &str,
        desired_outlets: &[OutletParams],
        current: &Map<String, Value>,
    ) -> Result<ReconcileOutcome, CoreError> {
        let switches: Vec<OutletParams> = current
            .get("switches")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .ok_or_else(|| CoreError::NoParameters {
                device: device_id.to_owned(),
            })?;

        let mut entries = Vec::new();
        let mut delta: Vec<OutletParams> = Vec::new();

        for wanted in desired_outlets {
            let Some(state) = switches.iter().find(|s| s.outlet == wanted.outlet) else {
                // Per-key failure; sibling outlets still proceed.
                for key in wanted.params.keys() {
                    entries.push(KeyOutcome {
                        parameter: key.clone(),
                        outlet: Some(wanted.outlet),
                        status: KeyStatus::UnknownOutlet,
                        warning: None,
                    });
                }
                continue;
            };

            let mut changed = Map::new();
            for (key, want) in &wanted.params {
                let Some(have) = state.params.get(key) else {
                    entries.push(KeyOutcome {
                        parameter: key.clone(),
                        outlet: Some(wanted.outlet),
                        status: KeyStatus::UnknownParameter,
                        warning: None,
                    });
                    continue;
                };

                let warning = numeric_string_warning(want, have);
                if values_equal(have, want) {
                    entries.push(KeyOutcome {
                        parameter: key.clone(),
                        outlet: Some(wanted.outlet),
                        status: KeyStatus::AlreadySet,
                        warning,
                    });
                } else {
                    changed.insert(key.clone(), want.clone());
                    entries.push(KeyOutcome {
                        parameter: key.clone(),
                        outlet: Some(wanted.outlet),
                        status: KeyStatus::Updated {
                            from: have.clone(),
                            to: want.clone(),
                        },
                        warning,
                    });
                }
            }

            if !changed.is_empty() {
                delta.push(OutletParams::new(wanted.outlet, changed));
            }
        }

        if delta.is_empty() {
            debug!(device_id, "all outlets already set, no write issued");
            return Ok(ReconcileOutcome {
                device_id: device_id.to_owned(),
                wrote: false,
                entries,
            });
        }

        // One write carrying only the changed outlets' changed keys.
        let switches_value = serde_json::to_value(&delta)
            .map_err(|e| CoreError::Internal(format!("delta serialization failed: {e}")))?;
        let mut params = Map::new();
        params.insert("switches".into(), switches_value);
        self.write_params(device_id, Value::Object(params)).await?;

        // Read the switches back once and confirm each changed key.
        let observed_map = self.read_live(device_id, Some(&["switches"])).await?;
        let observed: Vec<OutletParams> = observed_map
            .get("switches")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        for entry in &mut entries {
            let (Some(outlet), KeyStatus::Updated { to, .. }) = (entry.outlet, &entry.status)
            else {
                continue;
            };
            let desired_value = to.clone();
            let observed_value = observed
                .iter()
                .find(|s| s.outlet == outlet)
                .and_then(|s| s.params.get(&entry.parameter))
                .cloned()
                .unwrap_or(Value::Null);

            if !values_equal(&observed_value, &desired_value) {
                warn!(
                    device_id,
                    outlet,
                    parameter = %entry.parameter,
                    "post-write verification mismatch"
                );
                entry.status = KeyStatus::Diverged {
                    desired: desired_value,
                    observed: observed_value,
                };
            }
        }

        Ok(ReconcileOutcome {
            device_id: device_id.to_owned(),
            wrote: true,
            entries,
        })
    }

    async fn write_params(&self, device_id: &str, params: Value) -> Result<(), CoreError> {
        let body = json!({ "type": 1, "id": device_id, "params": params });
        let _ack: Value = self
            .client
            .post_authed("/v2/device/thing/status", &body)
            .await?;
        Ok(())
    }

    // ── Realtime path ────────────────────────────────────────────────

    /// Read parameters over the realtime channel, forcing the gateway to
    /// ask the device instead of answering from its own cache.
    pub async fn query_realtime(
        &self,
        device_id: &str,
        params: &[&str],
    ) -> Result<Map<String, Value>, CoreError> {
        let device = self.directory.get(device_id).await?;
        let message = QueryMessage::new(
            device.device_id.clone(),
            device.apikey.clone(),
            params.iter().map(ToString::to_string).collect(),
        );
        let payload = serialize_message(&message)?;

        let mut ws = self.open_channel(&device).await?;
        let outcome = self.exchange(&mut ws, &payload).await;
        ws.close().await;

        let reply = outcome?;
        Ok(reply
            .get("params")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default())
    }

    /// Push a parameter delta over the realtime channel, wait `settle`,
    /// then verify through a fresh realtime query of the same keys.
    pub async fn update_realtime(
        &self,
        device_id: &str,
        params: Map<String, Value>,
        settle: Duration,
    ) -> Result<Map<String, Value>, CoreError> {
        let device = self.directory.get(device_id).await?;
        let message = UpdateMessage::new(
            device.device_id.clone(),
            device.apikey.clone(),
            device.apikey.clone(),
            params.clone(),
        );
        let payload = serialize_message(&message)?;

        let mut ws = self.open_channel(&device).await?;
        let outcome = self.exchange(&mut ws, &payload).await;
        ws.close().await;
        outcome?;

        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        let keys: Vec<&str> = params.keys().map(String::as_str).collect();
        self.query_realtime(device_id, &keys).await
    }

    /// Full channel bootstrap: dispatch, connect, application handshake.
    async fn open_channel(&self, device: &DeviceSnapshot) -> Result<WsClient, CoreError> {
        let session = self.client.session();
        if !session.ensure_valid().await? {
            return Err(CoreError::AuthenticationRequired);
        }
        let token = session
            .access_token()
            .await
            .ok_or(CoreError::AuthenticationRequired)?;

        let mut ws = WsClient::resolve(self.client.http(), self.client.region()).await?;
        ws.connect().await?;

        let online = OnlineMessage::new(
            token,
            device.apikey.clone(),
            session.credentials().app_id.clone(),
        );
        match ws.online(&online).await {
            Ok(_ack) => Ok(ws),
            Err(e) => {
                ws.close().await;
                Err(e.into())
            }
        }
    }

    /// One strict-order send/receive with envelope error checking.
    async fn exchange(&self, ws: &mut WsClient, payload: &str) -> Result<Value, CoreError> {
        ws.send(payload).await?;
        let reply_text = ws.receive().await?;
        let reply: Value = serde_json::from_str(&reply_text)
            .map_err(|e| CoreError::Internal(format!("malformed realtime reply: {e}")))?;

        if let Some(code) = reply.get("error").and_then(Value::as_i64).filter(|&c| c != 0) {
            let message = reply
                .get("msg")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned);
            return Err(sonofly_api::Error::backend(code, message).into());
        }

        Ok(reply)
    }
}
