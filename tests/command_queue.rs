//! End-to-end Arduino command dispatch: a fired rule's `Arduino{command}`
//! action lands in the command queue and is handed out exactly once on the
//! device's next poll, defaulting back to `led=off` afterward.

use std::sync::Arc;

use chrono::Utc;
use hydro_gateway::analytics::AnalyticEngine;
use hydro_gateway::cache::ReadingCache;
use hydro_gateway::commands::CommandQueue;
use hydro_gateway::config::{GatewayConfig, HvacConfig};
use hydro_gateway::cooldown::{AlertHistory, CooldownLedger};
use hydro_gateway::crops::CropStore;
use hydro_gateway::drift::DriftDetector;
use hydro_gateway::escalation::EscalationManager;
use hydro_gateway::harvesters::ContextStore;
use hydro_gateway::hvac::HvacDriver;
use hydro_gateway::notify::ChannelRegistry;
use hydro_gateway::rules::RuleEngine;
use hydro_gateway::storage::RelationalStore;
use hydro_gateway::tsdb::{NullSink, TsdbWriter};
use hydro_gateway::types::{Action, Reading, Rule, RuleCondition};
use hydro_gateway::IngestOrchestrator;

async fn build_orchestrator() -> (IngestOrchestrator, Arc<RuleEngine>, Arc<CommandQueue>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let rules = Arc::new(RuleEngine::load(dir.path().join("rules.json")).unwrap());
    let config = GatewayConfig::default();
    let channels = Arc::new(ChannelRegistry::from_config(&config));
    let store = Arc::new(RelationalStore::connect("sqlite::memory:").await.unwrap());
    let commands = Arc::new(CommandQueue::new());
    let orchestrator = IngestOrchestrator::new(
        Arc::new(ReadingCache::new()),
        Arc::new(AnalyticEngine::default()),
        Arc::new(DriftDetector::new(1.5, 3.0, 10)),
        rules.clone(),
        Arc::new(CropStore::new()),
        Arc::new(CooldownLedger::new()),
        Arc::new(AlertHistory::new()),
        Arc::new(EscalationManager::new([300, 600, 900, 900, 900], channels.clone())),
        channels,
        commands.clone(),
        Arc::new(HvacDriver::from_config(&config.hvac)),
        Arc::new(TsdbWriter::spawn(Arc::new(NullSink))),
        store,
        ContextStore::new(),
    );
    (orchestrator, rules, commands, dir)
}

fn led_rule(id: &str, command: &str) -> Rule {
    let now = Utc::now();
    Rule {
        id: id.into(),
        name: "low water triggers led".into(),
        enabled: true,
        sensor_field: "water_level".into(),
        condition: RuleCondition::Below,
        threshold: 20.0,
        warning_margin: None,
        duration: None,
        external_gate: None,
        action: Action::Arduino {
            command: command.to_string(),
        },
        cooldown_seconds: 0,
        created_at: now,
        updated_at: now,
    }
}

fn reading(sensor_id: &str, water_level: f64) -> Reading {
    Reading {
        sensor_id: sensor_id.to_string(),
        water_level: Some(water_level),
        timestamp: Some(Utc::now()),
        ..Default::default()
    }
}

#[tokio::test]
async fn led_command_is_delivered_once_then_defaults_to_off() {
    let (orchestrator, rules, commands, _dir) = build_orchestrator().await;
    rules.upsert(led_rule("low-water-led", "led_on")).unwrap();

    let outcome = orchestrator.ingest(reading("arduino-1", 5.0)).await.unwrap();
    assert_eq!(outcome.triggered_rules, vec!["low-water-led".to_string()]);

    let first = commands.acquire_pending("arduino-1");
    assert_eq!(first.get("led"), Some(&"on".to_string()));

    let second = commands.acquire_pending("arduino-1");
    assert_eq!(second.get("led"), Some(&"off".to_string()));
}

#[tokio::test]
async fn blink_command_splits_on_last_underscore() {
    let (orchestrator, rules, commands, _dir) = build_orchestrator().await;
    rules.upsert(led_rule("low-water-blink", "led_blink")).unwrap();

    orchestrator.ingest(reading("arduino-2", 5.0)).await.unwrap();
    let pending = commands.acquire_pending("arduino-2");
    assert_eq!(pending.get("led"), Some(&"blink".to_string()));
}

#[tokio::test]
async fn hvac_driver_without_base_url_errors() {
    let driver = HvacDriver::from_config(&HvacConfig::default());
    let err = driver.send("zone-1", hydro_gateway::types::AcMode::Cool, Some(22.0)).await;
    assert!(err.is_err());
}
