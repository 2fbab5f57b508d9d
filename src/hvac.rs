//! HVAC/AC driver.
//!
//! Translates a gateway-level AC command into a call against a vendor
//! controller's REST API. Commands are debounced per zone: a burst of rule
//! firings within the debounce window collapses to a single vendor call, so
//! a noisy sensor near a threshold doesn't hammer the compressor relay.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::defaults;
use crate::config::HvacConfig;
use crate::types::AcMode;

#[derive(Error, Debug)]
pub enum HvacError {
    #[error("hvac driver not configured")]
    NotConfigured,
    #[error("vendor request failed: {0}")]
    Request(String),
    #[error("vendor request timed out")]
    Timeout,
}

fn mode_as_vendor_action(mode: AcMode) -> &'static str {
    match mode {
        AcMode::Cool => "cool.on",
        AcMode::Heat => "heat.on",
        AcMode::Off => "system.off",
    }
}

struct LastCall {
    mode: AcMode,
    target_temp: Option<f64>,
    at: Instant,
}

pub struct HvacDriver {
    client: reqwest::Client,
    base_url: Option<String>,
    api_key: Option<String>,
    last_call: DashMap<String, LastCall>,
    debounce: Duration,
    call_timeout: Duration,
}

impl HvacDriver {
    pub fn from_config(config: &HvacConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            last_call: DashMap::new(),
            debounce: Duration::from_secs(defaults::HVAC_DEBOUNCE_SECS),
            call_timeout: Duration::from_secs(defaults::HVAC_CALL_TIMEOUT_SECS),
        }
    }

    /// Send a mode change for a zone, suppressing the call if an identical
    /// mode/target_temp was already sent for that zone within the debounce
    /// window.
    pub async fn send(&self, zone: &str, mode: AcMode, target_temp: Option<f64>) -> Result<(), HvacError> {
        if let Some(last) = self.last_call.get(zone) {
            let same = last.mode == mode && last.target_temp == target_temp;
            if same && last.at.elapsed() < self.debounce {
                return Ok(());
            }
        }

        let base_url = self.base_url.as_ref().ok_or(HvacError::NotConfigured)?;
        let mut req = self
            .client
            .post(format!("{}/zones/{}/command", base_url.trim_end_matches('/'), zone))
            .json(&serde_json::json!({
                "action": mode_as_vendor_action(mode),
                "target_temp": target_temp,
            }));
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }
        let resp = tokio::time::timeout(self.call_timeout, req.send())
            .await
            .map_err(|_| HvacError::Timeout)?
            .map_err(|e| HvacError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(HvacError::Request(format!("vendor responded {}", resp.status())));
        }

        self.last_call.insert(
            zone.to_string(),
            LastCall {
                mode,
                target_temp,
                at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Last known mode/target_temp per zone, for the read-only `/api/ac` endpoint.
    pub fn snapshot(&self) -> std::collections::HashMap<String, (AcMode, Option<f64>)> {
        self.last_call
            .iter()
            .map(|entry| (entry.key().clone(), (entry.value().mode, entry.value().target_temp)))
            .collect()
    }
}

pub type HvacDriverHandle = Arc<HvacDriver>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_driver_errors() {
        let driver = HvacDriver::from_config(&HvacConfig::default());
        let err = driver.send("zone-1", AcMode::Cool, Some(22.0)).await.unwrap_err();
        assert!(matches!(err, HvacError::NotConfigured));
    }

    #[test]
    fn vendor_action_mapping() {
        assert_eq!(mode_as_vendor_action(AcMode::Cool), "cool.on");
        assert_eq!(mode_as_vendor_action(AcMode::Off), "system.off");
    }

    #[test]
    fn snapshot_reflects_last_call() {
        let driver = HvacDriver::from_config(&HvacConfig::default());
        driver.last_call.insert(
            "zone-1".to_string(),
            LastCall {
                mode: AcMode::Cool,
                target_temp: Some(21.0),
                at: Instant::now(),
            },
        );
        let snap = driver.snapshot();
        assert_eq!(snap.get("zone-1"), Some(&(AcMode::Cool, Some(21.0))));
    }
}
