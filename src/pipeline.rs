//! Ingest orchestrator.
//!
//! One reading moves through: stamp receive time, per-sensor
//! serialization, cache + TSDB update, analytic feature derivation, drift
//! check on any dual-sensor pair present, rule evaluation against static
//! rules plus the crop-stage overlay, and finally dispatch — notification
//! fan-out, Arduino command enqueue, HVAC call — for every rule that fired.
//! Anomalies flagged by the analytic engine and drift alarms are folded back
//! in as synthetic notify firings rather than just logged, closing the loop
//! the analytic and drift detectors can't close on their own.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::analytics::AnalyticEngine;
use crate::cache::ReadingCache;
use crate::commands::CommandQueue;
use crate::config::defaults;
use crate::cooldown::{AlertHistory, CooldownLedger};
use crate::crops::CropStore;
use crate::drift::{DriftDetector, DriftSeverity};
use crate::error::GatewayError;
use crate::escalation::EscalationManager;
use crate::harvesters::ContextStore;
use crate::hvac::HvacDriver;
use crate::notify::{ChannelRegistry, NotificationPayload};
use crate::rules::RuleEngine;
use crate::storage::RelationalStore;
use crate::tsdb::{TsPoint, TsdbWriter};
use crate::types::{Action, Alert, PredicateVerdict, Reading, RuleId, Severity, KNOWN_FIELDS};

/// Result of one `Ingest` call.
#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    pub triggered_rules: Vec<RuleId>,
}

pub struct IngestOrchestrator {
    sensor_locks: DashMap<String, Arc<Mutex<()>>>,
    cache: Arc<ReadingCache>,
    analytics: Arc<AnalyticEngine>,
    drift: Arc<DriftDetector>,
    rules: Arc<RuleEngine>,
    crops: Arc<CropStore>,
    cooldown: Arc<CooldownLedger>,
    alert_history: Arc<AlertHistory>,
    escalation: Arc<EscalationManager>,
    channels: Arc<ChannelRegistry>,
    commands: Arc<CommandQueue>,
    hvac: Arc<HvacDriver>,
    tsdb: Arc<TsdbWriter>,
    store: Arc<RelationalStore>,
    context: Arc<ContextStore>,
}

impl IngestOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<ReadingCache>,
        analytics: Arc<AnalyticEngine>,
        drift: Arc<DriftDetector>,
        rules: Arc<RuleEngine>,
        crops: Arc<CropStore>,
        cooldown: Arc<CooldownLedger>,
        alert_history: Arc<AlertHistory>,
        escalation: Arc<EscalationManager>,
        channels: Arc<ChannelRegistry>,
        commands: Arc<CommandQueue>,
        hvac: Arc<HvacDriver>,
        tsdb: Arc<TsdbWriter>,
        store: Arc<RelationalStore>,
        context: Arc<ContextStore>,
    ) -> Self {
        Self {
            sensor_locks: DashMap::new(),
            cache,
            analytics,
            drift,
            rules,
            crops,
            cooldown,
            alert_history,
            escalation,
            channels,
            commands,
            hvac,
            tsdb,
            store,
            context,
        }
    }

    fn lock_for(&self, sensor_id: &str) -> Arc<Mutex<()>> {
        self.sensor_locks
            .entry(sensor_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Validate, then process a reading under its sensor's serialization
    /// lock. Different sensors proceed concurrently.
    pub async fn ingest(&self, mut reading: Reading) -> Result<IngestOutcome, GatewayError> {
        if reading.sensor_id.trim().is_empty() {
            return Err(GatewayError::Validation("sensor_id is empty".to_string()));
        }
        if reading.timestamp.is_none() && reading.received_at.is_none() {
            reading.received_at = Some(Utc::now());
        }

        for field in KNOWN_FIELDS {
            if let Some(value) = reading.get(field) {
                if !value.is_finite() {
                    reading.drop_field(field);
                }
            }
        }

        let lock = self.lock_for(&reading.sensor_id);
        let _guard = lock.lock().await;
        self.process_locked(reading).await
    }

    async fn process_locked(&self, reading: Reading) -> Result<IngestOutcome, GatewayError> {
        let now = reading.effective_timestamp();
        self.cache.put(reading.clone());

        let present = reading.present_fields();
        self.tsdb.write(TsPoint::sensor_reading_multi(
            &reading.sensor_id,
            present.iter().map(|&(f, v)| (f.to_string(), v)).collect(),
            now,
        ));

        let features = self.analytics.ingest(&reading);
        let mut values: HashMap<String, f64> = present.iter().map(|&(f, v)| (f.to_string(), v)).collect();
        values.extend(features.as_value_map());

        let mut triggered: Vec<RuleId> = Vec::new();

        for field in KNOWN_FIELDS.iter().filter(|f| !f.ends_with("_secondary")) {
            let secondary_field = format!("{field}_secondary");
            let (Some(primary), Some(secondary)) = (reading.get(field), reading.get(&secondary_field)) else {
                continue;
            };
            let (severity, _health) = self.drift.observe(&reading.sensor_id, field, primary, secondary, now);
            let mapped = match severity {
                DriftSeverity::None => None,
                DriftSeverity::Warning => Some(Severity::Warning),
                DriftSeverity::Critical => Some(Severity::Critical),
            };
            if let Some(severity) = mapped {
                let rule_id = format!("drift_{field}");
                let fired = self
                    .fire_notification(
                        &rule_id,
                        severity,
                        format!("{field} primary/secondary probes have drifted apart on {}", reading.sensor_id),
                        Some("Recalibrate or replace the diverging probe".to_string()),
                        values.clone(),
                        defaults::DEFAULT_COOLDOWN_SECONDS,
                        now,
                    )
                    .await;
                if fired {
                    triggered.push(rule_id);
                }
            }
        }

        let overlay_rules = self.crops.rules_for(&reading.sensor_id);
        let context_snapshot = self.context.current();
        let fired = self.rules.evaluate(&values, &context_snapshot, &overlay_rules, now);

        for (rule, verdict) in &fired {
            triggered.push(rule.id.clone());
            self.dispatch(rule.id.clone(), &rule.action, *verdict, &reading.sensor_id, &values, rule.cooldown_seconds, now)
                .await;
        }

        for anomaly in features.anomalies() {
            let severity = if anomaly.critical { Severity::Critical } else { Severity::Warning };
            let rule_id = format!("anomaly_{:?}_{}", anomaly.kind, anomaly.field).to_lowercase();
            let fired = self
                .fire_notification(
                    &rule_id,
                    severity,
                    format!("{} anomaly on {} field {} (z={:.2})", reading.sensor_id, anomaly.field, anomaly.field, anomaly.z_score),
                    None,
                    values.clone(),
                    defaults::DEFAULT_COOLDOWN_SECONDS,
                    now,
                )
                .await;
            if fired {
                triggered.push(rule_id);
            }
        }

        Ok(IngestOutcome { triggered_rules: triggered })
    }

    /// Cooldown-gate, then dispatch a fired rule's action. Cooldown governs
    /// side effects only: the rule still counts as triggered in the
    /// response even when its dispatch is suppressed.
    async fn dispatch(
        &self,
        rule_id: RuleId,
        action: &Action,
        verdict: PredicateVerdict,
        sensor_id: &str,
        values: &HashMap<String, f64>,
        cooldown_seconds: u64,
        now: DateTime<Utc>,
    ) {
        if self.cooldown.in_cooldown(&rule_id, cooldown_seconds, now) {
            self.cooldown.record_suppressed(&rule_id);
            return;
        }
        self.cooldown.record_fire(&rule_id, now);

        match action {
            Action::Arduino { command } => {
                let (name, value) = parse_arduino_command(command);
                self.commands.enqueue(sensor_id, &name, value);
            }
            Action::Ac { command, target_temp } => {
                let hvac = self.hvac.clone();
                let zone = sensor_id.to_string();
                let command = *command;
                let target_temp = *target_temp;
                tokio::spawn(async move {
                    if let Err(e) = hvac.send(&zone, command, target_temp).await {
                        tracing::warn!(error = %e, zone = %zone, "hvac dispatch failed");
                    }
                });
            }
            Action::Notify { severity, message, recommended_action } => {
                let effective_severity = if verdict == PredicateVerdict::Preventive {
                    Severity::Preventive
                } else {
                    *severity
                };
                self.record_and_send(
                    &rule_id,
                    effective_severity,
                    message.clone(),
                    recommended_action.clone(),
                    values.clone(),
                    now,
                )
                .await;
            }
        }
    }

    /// Synthetic notify path for drift/anomaly firings (no backing `Rule`,
    /// so cooldown and dispatch are driven directly by caller-supplied
    /// parameters). Returns whether the notification actually fired (as
    /// opposed to being cooldown-suppressed).
    async fn fire_notification(
        &self,
        rule_id: &str,
        severity: Severity,
        message: String,
        recommended_action: Option<String>,
        sensor_snapshot: HashMap<String, f64>,
        cooldown_seconds: u64,
        now: DateTime<Utc>,
    ) -> bool {
        if self.cooldown.in_cooldown(rule_id, cooldown_seconds, now) {
            self.cooldown.record_suppressed(rule_id);
            return false;
        }
        self.cooldown.record_fire(rule_id, now);
        self.record_and_send(rule_id, severity, message, recommended_action, sensor_snapshot, now).await;
        true
    }

    /// Build and record an `Alert`, track it for escalation, and fan it out
    /// to the severity's notification tier. Cooldown has already been
    /// checked by the caller; this always sends.
    async fn record_and_send(
        &self,
        rule_id: &str,
        severity: Severity,
        message: String,
        recommended_action: Option<String>,
        sensor_snapshot: HashMap<String, f64>,
        now: DateTime<Utc>,
    ) {
        let alert = Alert {
            timestamp: now,
            rule_id: rule_id.to_string(),
            severity,
            message,
            sensor_snapshot,
            recommended_action,
        };

        self.alert_history.push(alert.clone());
        self.escalation.track(&alert);

        let store = self.store.clone();
        let alert_for_store = alert.clone();
        tokio::spawn(async move {
            if let Err(e) = store.record_alert(&alert_for_store).await {
                tracing::warn!(error = %e, "failed to persist alert (non-fatal)");
            }
        });

        let payload = NotificationPayload {
            title: format!("{} {}", severity.glyph(), rule_id),
            body: alert.message.clone(),
            severity,
        };
        let channels = self.channels.clone();
        tokio::spawn(async move {
            channels.dispatch_tier(severity, &payload).await;
        });
    }

    /// Force-send a notification bypassing cooldown, for the
    /// `/api/notifications/test` endpoint.
    pub async fn send_test_notification(&self, severity: Severity, message: String) {
        let now = Utc::now();
        self.record_and_send("notification_test", severity, message, None, HashMap::new(), now).await;
    }
}

/// Split an `arduino` action's command string into a `(name, value)` setting
/// pair for the command queue, e.g. `"led_on"` -> `("led", "on")`,
/// `"fan_high"` -> `("fan", "high")`.
fn parse_arduino_command(command: &str) -> (String, String) {
    match command.rsplit_once('_') {
        Some((name, value)) => (name.to_string(), value.to_string()),
        None => (command.to_string(), "on".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::tsdb::NullSink;
    use crate::types::{Action as ActionType, RuleCondition};

    async fn test_orchestrator() -> (IngestOrchestrator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let rules_path = dir.path().join("rules.json");
        let rules = Arc::new(RuleEngine::load(&rules_path).unwrap());
        let config = GatewayConfig::default();
        let channels = Arc::new(ChannelRegistry::from_config(&config));
        let store = Arc::new(RelationalStore::connect("sqlite::memory:").await.unwrap());
        let orchestrator = IngestOrchestrator::new(
            Arc::new(ReadingCache::new()),
            Arc::new(AnalyticEngine::default()),
            Arc::new(DriftDetector::new(1.5, 3.0, 10)),
            rules,
            Arc::new(CropStore::new()),
            Arc::new(CooldownLedger::new()),
            Arc::new(AlertHistory::new()),
            Arc::new(EscalationManager::new([300, 600, 900, 900, 900], channels.clone())),
            channels,
            Arc::new(CommandQueue::new()),
            Arc::new(HvacDriver::from_config(&config.hvac)),
            Arc::new(TsdbWriter::spawn(Arc::new(NullSink))),
            store,
            ContextStore::new(),
        );
        (orchestrator, dir)
    }

    fn reading(sensor: &str, temperature: f64, humidity: f64) -> Reading {
        Reading {
            sensor_id: sensor.into(),
            temperature: Some(temperature),
            humidity: Some(humidity),
            timestamp: Some(Utc::now()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn rejects_empty_sensor_id() {
        let (orchestrator, _dir) = test_orchestrator().await;
        let reading = reading("", 20.0, 60.0);
        let err = orchestrator.ingest(reading).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[tokio::test]
    async fn stamps_receive_time_when_timestamp_absent() {
        let (orchestrator, _dir) = test_orchestrator().await;
        let mut reading = reading("s1", 20.0, 60.0);
        reading.timestamp = None;
        orchestrator.ingest(reading).await.unwrap();
        let cached = orchestrator.cache.get("s1").unwrap();
        assert!(cached.received_at.is_some());
    }

    #[tokio::test]
    async fn normal_reading_triggers_nothing() {
        let (orchestrator, _dir) = test_orchestrator().await;
        let outcome = orchestrator.ingest(reading("s1", 22.5, 65.0)).await.unwrap();
        assert!(outcome.triggered_rules.is_empty());
    }

    #[tokio::test]
    async fn fires_rule_and_respects_cooldown() {
        let (orchestrator, _dir) = test_orchestrator().await;
        orchestrator
            .rules
            .upsert(crate::types::Rule {
                id: "notify_high_temp".into(),
                name: "too hot".into(),
                enabled: true,
                sensor_field: "temperature".into(),
                condition: RuleCondition::Above,
                threshold: 30.0,
                warning_margin: None,
                duration: None,
                external_gate: None,
                action: ActionType::Notify {
                    severity: Severity::Critical,
                    message: "too hot".into(),
                    recommended_action: None,
                },
                cooldown_seconds: 300,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .unwrap();

        let outcome = orchestrator.ingest(reading("s1", 32.5, 65.0)).await.unwrap();
        assert_eq!(outcome.triggered_rules, vec!["notify_high_temp".to_string()]);

        let second = orchestrator.ingest(reading("s1", 32.5, 65.0)).await.unwrap();
        assert_eq!(second.triggered_rules, vec!["notify_high_temp".to_string()]);
        assert_eq!(orchestrator.alert_history.recent().len(), 1, "second fire should be cooldown-suppressed");
    }

    #[tokio::test]
    async fn preventive_band_overrides_severity() {
        let (orchestrator, _dir) = test_orchestrator().await;
        orchestrator
            .rules
            .upsert(crate::types::Rule {
                id: "notify_high_temp".into(),
                name: "too hot".into(),
                enabled: true,
                sensor_field: "temperature".into(),
                condition: RuleCondition::Above,
                threshold: 30.0,
                warning_margin: Some(2.0),
                duration: None,
                external_gate: None,
                action: ActionType::Notify {
                    severity: Severity::Critical,
                    message: "too hot".into(),
                    recommended_action: None,
                },
                cooldown_seconds: 300,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .unwrap();

        orchestrator.ingest(reading("s1", 28.5, 65.0)).await.unwrap();
        let recent = orchestrator.alert_history.recent();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].severity, Severity::Preventive);
    }

    #[test]
    fn arduino_command_parses_name_and_value() {
        assert_eq!(parse_arduino_command("led_on"), ("led".to_string(), "on".to_string()));
        assert_eq!(parse_arduino_command("led_blink"), ("led".to_string(), "blink".to_string()));
    }
}
