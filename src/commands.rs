//! Command queue.
//!
//! Actuator devices (an Arduino-class relay controller per zone) poll this
//! gateway rather than receiving pushed commands, since they're typically
//! on constrained networks behind NAT. The rule engine enqueues named
//! key/value settings per device; the device's next poll atomically
//! snapshots and clears whatever is pending for it.

use std::collections::HashMap;

use dashmap::DashMap;

/// Per-device pending settings, e.g. `{"led": "on", "fan": "high"}`.
type PendingSettings = HashMap<String, String>;

pub struct CommandQueue {
    pending: DashMap<String, PendingSettings>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Set (overwrite) one named setting for a device.
    pub fn enqueue(&self, device_id: &str, name: &str, value: String) {
        self.pending
            .entry(device_id.to_string())
            .or_default()
            .insert(name.to_string(), value);
    }

    /// Atomically take and clear everything pending for a device. A device
    /// that has never had anything enqueued still gets a response with its
    /// implicit default state rather than an empty map, so a freshly
    /// provisioned relay board has a sane idle state to poll into.
    pub fn acquire_pending(&self, device_id: &str) -> PendingSettings {
        let mut settings = self
            .pending
            .remove(device_id)
            .map(|(_, v)| v)
            .unwrap_or_default();
        settings.entry("led".to_string()).or_insert_with(|| "off".to_string());
        settings
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}
