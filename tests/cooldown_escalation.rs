//! Cooldown gating combined with the escalation dwell ladder.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use hydro_gateway::config::GatewayConfig;
use hydro_gateway::cooldown::CooldownLedger;
use hydro_gateway::escalation::EscalationManager;
use hydro_gateway::notify::ChannelRegistry;
use hydro_gateway::types::{Alert, EscalationLevel, Severity};

fn alert(rule_id: &str, severity: Severity, timestamp: chrono::DateTime<Utc>) -> Alert {
    Alert {
        timestamp,
        rule_id: rule_id.to_string(),
        severity,
        message: "too hot".into(),
        sensor_snapshot: HashMap::new(),
        recommended_action: None,
    }
}

#[test]
fn cooldown_blocks_immediate_repeat_but_not_after_window() {
    let ledger = CooldownLedger::new();
    let now = Utc::now();
    ledger.record_fire("r1", now);
    assert!(ledger.in_cooldown("r1", 120, now + chrono::Duration::seconds(30)));
    assert!(!ledger.in_cooldown("r1", 120, now + chrono::Duration::seconds(121)));
}

#[test]
fn cooldown_is_global_across_sensors_sharing_a_rule() {
    let ledger = CooldownLedger::new();
    let now = Utc::now();
    ledger.record_fire("r1", now);
    // cooldown keys on rule_id alone; a different sensor tripping the same
    // rule still sees it.
    assert!(ledger.in_cooldown("r1", 60, now + chrono::Duration::seconds(1)));
}

#[tokio::test]
async fn escalation_advances_one_rung_once_dwell_elapses() {
    let channels = Arc::new(ChannelRegistry::from_config(&GatewayConfig::default()));
    let manager = EscalationManager::new([60, 120, 300, 300, 300], channels);
    let now = Utc::now();
    let a = alert("r1", Severity::Preventive, now - chrono::Duration::seconds(61));

    let fired = manager.tick(&[a.clone()]);
    assert_eq!(fired, vec![("r1".to_string(), EscalationLevel::Warning)]);

    // Warning's dwell (120s) hasn't elapsed since this tick's fire time yet.
    let fired_again = manager.tick(&[a]);
    assert!(fired_again.is_empty());
}

#[tokio::test]
async fn acknowledge_clears_tracking_so_a_fresh_alert_restarts_its_dwell() {
    let channels = Arc::new(ChannelRegistry::from_config(&GatewayConfig::default()));
    let manager = EscalationManager::new([60, 120, 300, 300, 300], channels);
    let now = Utc::now();
    let stale = alert("r1", Severity::Preventive, now - chrono::Duration::seconds(61));

    let fired = manager.tick(&[stale]);
    assert_eq!(fired.len(), 1);

    manager.acknowledge("r1");

    let fresh = alert("r1", Severity::Preventive, now);
    let fired_after_ack = manager.tick(&[fresh]);
    assert!(fired_after_ack.is_empty());
}
