//! Escalation manager.
//!
//! A background ticker wakes at least every 30 seconds and advances each
//! unacknowledged alert up a fixed severity ladder
//! (preventive -> warning -> critical -> urgent -> emergency) once its
//! current rung has been held past its dwell time. Once an alert reaches
//! emergency it doesn't stop: it repeats at the emergency cadence
//! indefinitely until acknowledged.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;

use crate::config::defaults;
use crate::notify::{ChannelRegistry, NotificationPayload};
use crate::types::{Alert, EscalationLevel, EscalationRecord, RuleId};

pub struct EscalationManager {
    dwell_ladder: [u64; 5],
    state: DashMap<RuleId, EscalationRecord>,
    channels: Arc<ChannelRegistry>,
}

impl EscalationManager {
    pub fn new(dwell_ladder: [u64; 5], channels: Arc<ChannelRegistry>) -> Self {
        Self {
            dwell_ladder,
            state: DashMap::new(),
            channels,
        }
    }

    fn dwell_for(&self, level: EscalationLevel) -> u64 {
        self.dwell_ladder[level as usize]
    }

    /// Begin tracking an alert for escalation at its rule's current level
    /// (derived from the alert's severity), if not already tracked.
    pub fn track(&self, alert: &Alert) {
        self.state.entry(alert.rule_id.clone()).or_insert_with(|| EscalationRecord {
            rule_id: alert.rule_id.clone(),
            level: EscalationLevel::from_severity(alert.severity),
            first_seen: alert.timestamp,
            next_due_at: alert.timestamp + chrono::Duration::seconds(self.dwell_for(EscalationLevel::from_severity(alert.severity)) as i64),
        });
    }

    pub fn acknowledge(&self, rule_id: &str) {
        self.state.remove(rule_id);
    }

    /// Step any alert whose `next_due_at` has passed, returning the rule ids
    /// that escalated (or repeated) this tick along with their new level.
    pub fn tick(&self, unacknowledged: &[Alert]) -> Vec<(RuleId, EscalationLevel)> {
        let now = Utc::now();
        let mut fired = Vec::new();
        for alert in unacknowledged {
            self.track(alert);
            let Some(mut record) = self.state.get_mut(&alert.rule_id) else {
                continue;
            };
            if now < record.next_due_at {
                continue;
            }
            let next_level = record.level.advance();
            record.level = next_level;
            record.next_due_at = now + chrono::Duration::seconds(self.dwell_for(next_level) as i64);
            fired.push((alert.rule_id.clone(), next_level));
        }
        fired
    }

    pub async fn dispatch(&self, alert: &Alert, level: EscalationLevel) {
        let payload = NotificationPayload {
            title: format!("ESCALATED [{:?}]: {}", level, alert.rule_id),
            body: alert.message.clone(),
            severity: level.to_severity(),
        };
        self.channels.dispatch_tier(level.to_severity(), &payload).await;
    }
}

/// Spawns the background ticker. Returns a handle the caller can abort on
/// shutdown. `fetch_unacknowledged` is async so it can query the relational
/// store directly.
pub fn spawn_ticker<F, Fut>(
    manager: Arc<EscalationManager>,
    fetch_unacknowledged: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Vec<Alert>> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(
            defaults::ESCALATION_CHECK_INTERVAL_SECS,
        ));
        loop {
            interval.tick().await;
            let unacknowledged = fetch_unacknowledged().await;
            let fired = manager.tick(&unacknowledged);
            for (rule_id, level) in fired {
                if let Some(alert) = unacknowledged.iter().find(|a| a.rule_id == rule_id) {
                    manager.dispatch(alert, level).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::types::Severity;
    use std::collections::HashMap;

    fn test_alert(rule_id: &str, severity: Severity, timestamp: chrono::DateTime<Utc>) -> Alert {
        Alert {
            timestamp,
            rule_id: rule_id.into(),
            severity,
            message: "too hot".into(),
            sensor_snapshot: HashMap::new(),
            recommended_action: None,
        }
    }

    fn manager() -> EscalationManager {
        let channels = Arc::new(ChannelRegistry::from_config(&GatewayConfig::default()));
        EscalationManager::new([60, 120, 180, 180, 180], channels)
    }

    #[test]
    fn escalates_after_dwell() {
        let manager = manager();
        let now = Utc::now();
        let alert = test_alert("r1", Severity::Preventive, now - chrono::Duration::seconds(61));
        let fired = manager.tick(&[alert]);
        assert_eq!(fired, vec![("r1".to_string(), EscalationLevel::Warning)]);
    }

    #[test]
    fn no_escalation_before_dwell_elapses() {
        let manager = manager();
        let now = Utc::now();
        let alert = test_alert("r1", Severity::Preventive, now);
        let fired = manager.tick(&[alert]);
        assert!(fired.is_empty());
    }

    #[test]
    fn repeats_indefinitely_once_at_emergency() {
        let manager = manager();
        let now = Utc::now();
        let alert = test_alert("r1", Severity::Emergency, now - chrono::Duration::seconds(181));
        let first = manager.tick(&[alert.clone()]);
        assert_eq!(first, vec![("r1".to_string(), EscalationLevel::Emergency)]);

        // Force the record's next_due_at back into the past, as if another
        // full dwell period had elapsed, and confirm it fires again rather
        // than staying silent now that it's capped at the top rung.
        if let Some(mut record) = manager.state.get_mut("r1") {
            record.next_due_at = Utc::now() - chrono::Duration::seconds(1);
        }
        let second = manager.tick(&[alert]);
        assert_eq!(second, vec![("r1".to_string(), EscalationLevel::Emergency)]);
    }

    #[test]
    fn acknowledging_stops_tracking() {
        let manager = manager();
        let alert = test_alert("r1", Severity::Warning, Utc::now());
        manager.track(&alert);
        manager.acknowledge("r1");
        assert!(manager.state.get("r1").is_none());
    }
}
