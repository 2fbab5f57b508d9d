//! Rule engine.
//!
//! Rules are held in memory and persisted as a JSON array file, written
//! atomically (temp file + rename) so a crash mid-write never leaves a
//! truncated rules file behind. Crop-stage overlay rules are passed
//! in at evaluation time rather than stored alongside static rules, since
//! they're derived from crop state that can change every sweep.
//!
//! `evaluate` implements three predicate refinements beyond a bare
//! threshold crossing: a preventive margin band below/above the hard
//! threshold, a duration gate that requires the predicate to stay true for
//! a sustained window before firing, and an external gate that only arms
//! the rule when a named external-context field also satisfies its own
//! condition (e.g. don't alert on low humidity if it's raining outside).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;

use crate::types::{ExternalContextSnapshot, PredicateVerdict, Rule, RuleId};

#[derive(Error, Debug)]
pub enum RuleStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("rule not found: {0}")]
    NotFound(RuleId),
}

pub struct RuleEngine {
    path: PathBuf,
    rules: RwLock<HashMap<RuleId, Rule>>,
    armed_since: DashMap<RuleId, DateTime<Utc>>,
}

impl RuleEngine {
    /// Load rules from `path`, creating an empty store if the file is
    /// absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RuleStoreError> {
        let path = path.as_ref().to_path_buf();
        let rules = match std::fs::read_to_string(&path) {
            Ok(text) => {
                let list: Vec<Rule> = serde_json::from_str(&text)?;
                list.into_iter().map(|r| (r.id.clone(), r)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            rules: RwLock::new(rules),
            armed_since: DashMap::new(),
        })
    }

    pub fn upsert(&self, rule: Rule) -> Result<(), RuleStoreError> {
        {
            let mut rules = self.rules.write().unwrap_or_else(|p| p.into_inner());
            rules.insert(rule.id.clone(), rule);
        }
        self.persist()
    }

    pub fn remove(&self, id: &str) -> Result<(), RuleStoreError> {
        {
            let mut rules = self.rules.write().unwrap_or_else(|p| p.into_inner());
            if rules.remove(id).is_none() {
                return Err(RuleStoreError::NotFound(id.to_string()));
            }
        }
        self.armed_since.remove(id);
        self.persist()
    }

    pub fn get(&self, id: &str) -> Option<Rule> {
        self.rules
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .cloned()
    }

    pub fn all(&self) -> Vec<Rule> {
        self.rules
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Evaluate every enabled static rule plus the given overlay rules
    /// against the current per-field value snapshot, returning the fired
    /// rules along with the predicate verdict (critical or preventive) each
    /// one triggered at. When a static rule and an overlay rule would fire
    /// the same underlying action, the overlay wins (its stage-aware
    /// threshold is the more specific one).
    pub fn evaluate(
        &self,
        values: &HashMap<String, f64>,
        context: &ExternalContextSnapshot,
        overlay_rules: &[Rule],
        now: DateTime<Utc>,
    ) -> Vec<(Rule, PredicateVerdict)> {
        let static_rules = self.rules.read().unwrap_or_else(|p| p.into_inner());

        let mut winners: HashMap<(&'static str, String), (Rule, PredicateVerdict)> = HashMap::new();

        for rule in static_rules.values() {
            if let Some(verdict) = self.try_fire(rule, values, context, now) {
                winners.insert(rule.action.dedup_key(), (rule.clone(), verdict));
            }
        }
        for rule in overlay_rules {
            if let Some(verdict) = self.try_fire(rule, values, context, now) {
                winners.insert(rule.action.dedup_key(), (rule.clone(), verdict));
            }
        }

        winners.into_values().collect()
    }

    /// Evaluate one rule's predicate, duration gate, and external gate in
    /// sequence, updating (or clearing) its duration-armed state as a side
    /// effect.
    fn try_fire(
        &self,
        rule: &Rule,
        values: &HashMap<String, f64>,
        context: &ExternalContextSnapshot,
        now: DateTime<Utc>,
    ) -> Option<PredicateVerdict> {
        if !rule.enabled {
            return None;
        }
        let value = *values.get(&rule.sensor_field)?;
        let verdict = rule.predicate(value);

        let Some(verdict) = verdict else {
            self.armed_since.remove(&rule.id);
            return None;
        };

        if let Some(duration_secs) = rule.duration {
            let armed_since = *self
                .armed_since
                .entry(rule.id.clone())
                .or_insert(now);
            let held_for = now.signed_duration_since(armed_since).num_seconds();
            if held_for < duration_secs as i64 {
                return None;
            }
        }

        if let Some(gate) = &rule.external_gate {
            let satisfied = context
                .entries
                .get(&gate.context_field)
                .filter(|entry| entry.is_fresh(now))
                .is_some_and(|entry| gate.condition.eval(entry.value, gate.threshold));
            if !satisfied {
                return None;
            }
        }

        Some(verdict)
    }

    fn persist(&self) -> Result<(), RuleStoreError> {
        let rules = self.rules.read().unwrap_or_else(|p| p.into_inner());
        let list: Vec<&Rule> = rules.values().collect();
        let json = serde_json::to_string_pretty(&list)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// Collapse a set of fired (rule, verdict) pairs keeping just the rule ids,
/// for callers that only need to know which rules tripped.
pub fn fired_rule_ids(fired: &[(Rule, PredicateVerdict)]) -> HashSet<RuleId> {
    fired.iter().map(|(r, _)| r.id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, AcMode, ExternalGate, Operator, RuleCondition, Severity};

    fn test_rule(id: &str, threshold: f64) -> Rule {
        let now = Utc::now();
        Rule {
            id: id.to_string(),
            name: id.to_string(),
            enabled: true,
            sensor_field: "temperature".into(),
            condition: RuleCondition::Above,
            threshold,
            warning_margin: None,
            duration: None,
            external_gate: None,
            action: Action::Notify {
                severity: Severity::Warning,
                message: "too hot".into(),
                recommended_action: None,
            },
            cooldown_seconds: 60,
            created_at: now,
            updated_at: now,
        }
    }

    fn values(v: f64) -> HashMap<String, f64> {
        let mut m = HashMap::new();
        m.insert("temperature".to_string(), v);
        m
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        let engine = RuleEngine::load(&path).unwrap();
        engine.upsert(test_rule("r1", 28.0)).unwrap();

        let reloaded = RuleEngine::load(&path).unwrap();
        assert_eq!(reloaded.all().len(), 1);
        assert!(reloaded.get("r1").is_some());
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let engine = RuleEngine::load(&path).unwrap();
        assert!(engine.all().is_empty());
    }

    #[test]
    fn fires_on_threshold_crossing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RuleEngine::load(dir.path().join("rules.json")).unwrap();
        engine.upsert(test_rule("r1", 28.0)).unwrap();
        let fired = engine.evaluate(&values(30.0), &ExternalContextSnapshot::default(), &[], Utc::now());
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].1, PredicateVerdict::Critical);
    }

    #[test]
    fn overlay_rule_wins_dedup_against_static_rule_same_action() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RuleEngine::load(dir.path().join("rules.json")).unwrap();
        let mut static_rule = test_rule("static1", 28.0);
        static_rule.action = Action::Arduino { command: "fan_on".into() };
        engine.upsert(static_rule).unwrap();

        let mut overlay = test_rule("stage:c1:temperature:high", 25.0);
        overlay.action = Action::Arduino { command: "fan_on".into() };

        let fired = engine.evaluate(&values(30.0), &ExternalContextSnapshot::default(), &[overlay], Utc::now());
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0.id, "stage:c1:temperature:high");
    }

    #[test]
    fn duration_gate_suppresses_until_held_long_enough() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RuleEngine::load(dir.path().join("rules.json")).unwrap();
        let mut rule = test_rule("r1", 28.0);
        rule.duration = Some(60);
        engine.upsert(rule).unwrap();

        let t0 = Utc::now();
        let fired = engine.evaluate(&values(30.0), &ExternalContextSnapshot::default(), &[], t0);
        assert!(fired.is_empty(), "should not fire before duration elapses");

        let fired = engine.evaluate(&values(30.0), &ExternalContextSnapshot::default(), &[], t0 + chrono::Duration::seconds(61));
        assert_eq!(fired.len(), 1);
    }

    #[test]
    fn duration_gate_resets_when_predicate_stops_matching() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RuleEngine::load(dir.path().join("rules.json")).unwrap();
        let mut rule = test_rule("r1", 28.0);
        rule.duration = Some(60);
        engine.upsert(rule).unwrap();

        let t0 = Utc::now();
        engine.evaluate(&values(30.0), &ExternalContextSnapshot::default(), &[], t0);
        engine.evaluate(&values(20.0), &ExternalContextSnapshot::default(), &[], t0 + chrono::Duration::seconds(30));
        let fired = engine.evaluate(&values(30.0), &ExternalContextSnapshot::default(), &[], t0 + chrono::Duration::seconds(61));
        assert!(fired.is_empty(), "armed-since should have reset when predicate dropped out");
    }

    #[test]
    fn external_gate_blocks_when_context_missing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RuleEngine::load(dir.path().join("rules.json")).unwrap();
        let mut rule = test_rule("r1", 28.0);
        rule.external_gate = Some(ExternalGate {
            context_field: "weather.is_raining".into(),
            condition: Operator::Eq,
            threshold: 1.0,
        });
        engine.upsert(rule).unwrap();

        let fired = engine.evaluate(&values(30.0), &ExternalContextSnapshot::default(), &[], Utc::now());
        assert!(fired.is_empty());
    }

    #[test]
    fn disabled_rule_never_fires() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RuleEngine::load(dir.path().join("rules.json")).unwrap();
        let mut rule = test_rule("r1", 28.0);
        rule.enabled = false;
        engine.upsert(rule).unwrap();

        let fired = engine.evaluate(&values(30.0), &ExternalContextSnapshot::default(), &[], Utc::now());
        assert!(fired.is_empty());
    }

    #[test]
    fn preventive_band_reports_preventive_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RuleEngine::load(dir.path().join("rules.json")).unwrap();
        let mut rule = test_rule("r1", 30.0);
        rule.warning_margin = Some(2.0);
        engine.upsert(rule).unwrap();

        let fired = engine.evaluate(&values(29.0), &ExternalContextSnapshot::default(), &[], Utc::now());
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].1, PredicateVerdict::Preventive);
    }

    #[allow(dead_code)]
    fn ac_action_for_tests() -> Action {
        Action::Ac { command: AcMode::Cool, target_temp: Some(22.0) }
    }
}
