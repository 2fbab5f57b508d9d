//! End-to-end ingest: validation, rule firing, and cooldown suppression
//! through the public `IngestOrchestrator` API.

use std::sync::Arc;

use chrono::Utc;
use hydro_gateway::analytics::AnalyticEngine;
use hydro_gateway::cache::ReadingCache;
use hydro_gateway::commands::CommandQueue;
use hydro_gateway::config::GatewayConfig;
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
use hydro_gateway::types::{Action, Rule, RuleCondition, Severity};
use hydro_gateway::{GatewayError, IngestOrchestrator, Reading};

struct Harness {
    orchestrator: IngestOrchestrator,
    rules: Arc<RuleEngine>,
    cooldown: Arc<CooldownLedger>,
    _dir: tempfile::TempDir,
}

async fn build_harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let rules = Arc::new(RuleEngine::load(dir.path().join("rules.json")).unwrap());
    let cooldown = Arc::new(CooldownLedger::new());
    let config = GatewayConfig::default();
    let channels = Arc::new(ChannelRegistry::from_config(&config));
    let store = Arc::new(RelationalStore::connect("sqlite::memory:").await.unwrap());
    let orchestrator = IngestOrchestrator::new(
        Arc::new(ReadingCache::new()),
        Arc::new(AnalyticEngine::default()),
        Arc::new(DriftDetector::new(1.5, 3.0, 10)),
        rules.clone(),
        Arc::new(CropStore::new()),
        cooldown.clone(),
        Arc::new(AlertHistory::new()),
        Arc::new(EscalationManager::new([300, 600, 900, 900, 900], channels.clone())),
        channels,
        Arc::new(CommandQueue::new()),
        Arc::new(HvacDriver::from_config(&config.hvac)),
        Arc::new(TsdbWriter::spawn(Arc::new(NullSink))),
        store,
        ContextStore::new(),
    );
    Harness {
        orchestrator,
        rules,
        cooldown,
        _dir: dir,
    }
}

fn reading(sensor_id: &str, temperature: f64) -> Reading {
    Reading {
        sensor_id: sensor_id.to_string(),
        temperature: Some(temperature),
        humidity: Some(60.0),
        timestamp: Some(Utc::now()),
        ..Default::default()
    }
}

fn rule(id: &str, threshold: f64, cooldown_seconds: u64) -> Rule {
    let now = Utc::now();
    Rule {
        id: id.into(),
        name: "high temperature".into(),
        enabled: true,
        sensor_field: "temperature".into(),
        condition: RuleCondition::Above,
        threshold,
        warning_margin: None,
        duration: None,
        external_gate: None,
        action: Action::Notify {
            severity: Severity::Critical,
            message: "too hot".into(),
            recommended_action: None,
        },
        cooldown_seconds,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn rejects_non_finite_value() {
    let harness = build_harness().await;
    let mut bad = reading("s1", 0.0);
    bad.temperature = Some(f64::NAN);
    // a non-finite field is dropped rather than rejected outright, but an
    // otherwise-empty reading with no valid fields still validates fine.
    let outcome = harness.orchestrator.ingest(bad).await.unwrap();
    assert!(outcome.triggered_rules.is_empty());
}

#[tokio::test]
async fn rejects_empty_sensor_id() {
    let harness = build_harness().await;
    let bad = reading("", 21.0);
    let err = harness.orchestrator.ingest(bad).await.unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));
}

#[tokio::test]
async fn different_sensors_ingest_independently() {
    let harness = build_harness().await;
    harness.orchestrator.ingest(reading("s1", 21.0)).await.unwrap();
    harness.orchestrator.ingest(reading("s2", 23.0)).await.unwrap();
}

#[tokio::test]
async fn cooldown_suppresses_repeat_fire_within_window() {
    let harness = build_harness().await;
    harness.rules.upsert(rule("high-temp", 28.0, 600)).unwrap();

    let first = harness.orchestrator.ingest(reading("s1", 35.0)).await.unwrap();
    assert_eq!(first.triggered_rules, vec!["high-temp".to_string()]);
    assert!(harness.cooldown.in_cooldown("high-temp", 600, Utc::now()));

    let second = harness.orchestrator.ingest(reading("s1", 36.0)).await.unwrap();
    assert!(second.triggered_rules.is_empty());
}

#[tokio::test]
async fn cooldown_is_global_across_sensors() {
    let harness = build_harness().await;
    harness.rules.upsert(rule("high-temp", 28.0, 600)).unwrap();

    let first = harness.orchestrator.ingest(reading("s1", 35.0)).await.unwrap();
    assert_eq!(first.triggered_rules.len(), 1);

    // a different sensor tripping the same rule still sees the cooldown
    let second = harness.orchestrator.ingest(reading("s2", 40.0)).await.unwrap();
    assert!(second.triggered_rules.is_empty());
}
