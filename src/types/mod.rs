//! Shared data structures for the telemetry gateway.
//!
//! These types cross every component boundary: a `Reading` flows
//! from ingest through analytics and the rule engine; a `Rule` is owned by
//! the rule engine but referenced by cooldown bookkeeping; a `Crop` overlays
//! rules with a growth-stage-specific variant.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Declared vocabulary of numeric fields a reading may carry. Unknown keys
/// arriving in a POST body are preserved in `Reading::extra` but ignored by
/// the analytic engine.
pub const KNOWN_FIELDS: &[&str] = &[
    "temperature",
    "humidity",
    "ph",
    "ec",
    "water_level",
    "water_temp",
    "light_level",
    "temperature_secondary",
    "humidity_secondary",
    "ph_secondary",
    "ec_secondary",
    "water_level_secondary",
    "water_temp_secondary",
    "light_level_secondary",
];

/// Given a field name, the primary field it mirrors if this is a `_secondary`
/// twin, for dual-sensor drift pairing and anomaly-config lookup.
pub fn primary_field_of(field: &str) -> &str {
    field.strip_suffix("_secondary").unwrap_or(field)
}

/// One telemetry sample: a timestamped numeric map keyed by a fixed
/// vocabulary of field names, plus a mandatory `sensor_id`. Unknown extra
/// fields in the wire payload are retained but ignored downstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    pub sensor_id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ph: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ec: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub water_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub water_temp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light_level: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_secondary: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity_secondary: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ph_secondary: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ec_secondary: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub water_level_secondary: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub water_temp_secondary: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light_level_secondary: Option<f64>,

    /// Unrecognized keys from the wire payload, retained but not analyzed.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Reading {
    pub fn effective_timestamp(&self) -> DateTime<Utc> {
        self.timestamp.or(self.received_at).unwrap_or_else(Utc::now)
    }

    /// Every known field present on this reading with a finite value, in
    /// `KNOWN_FIELDS` order. Non-finite values are dropped by the caller
    /// before this is built (ingest orchestrator step: "non-finite values on
    /// any field cause that field to be dropped with a warning").
    pub fn present_fields(&self) -> Vec<(&'static str, f64)> {
        KNOWN_FIELDS
            .iter()
            .filter_map(|&name| self.get(name).map(|v| (name, v)))
            .collect()
    }

    pub fn get(&self, field: &str) -> Option<f64> {
        match field {
            "temperature" => self.temperature,
            "humidity" => self.humidity,
            "ph" => self.ph,
            "ec" => self.ec,
            "water_level" => self.water_level,
            "water_temp" => self.water_temp,
            "light_level" => self.light_level,
            "temperature_secondary" => self.temperature_secondary,
            "humidity_secondary" => self.humidity_secondary,
            "ph_secondary" => self.ph_secondary,
            "ec_secondary" => self.ec_secondary,
            "water_level_secondary" => self.water_level_secondary,
            "water_temp_secondary" => self.water_temp_secondary,
            "light_level_secondary" => self.light_level_secondary,
            _ => None,
        }
    }

    /// Drop a field whose value failed the finite check, with a warning.
    /// Non-fatal: the rest of the reading is still processed.
    pub fn drop_field(&mut self, field: &str) {
        let slot = match field {
            "temperature" => &mut self.temperature,
            "humidity" => &mut self.humidity,
            "ph" => &mut self.ph,
            "ec" => &mut self.ec,
            "water_level" => &mut self.water_level,
            "water_temp" => &mut self.water_temp,
            "light_level" => &mut self.light_level,
            "temperature_secondary" => &mut self.temperature_secondary,
            "humidity_secondary" => &mut self.humidity_secondary,
            "ph_secondary" => &mut self.ph_secondary,
            "ec_secondary" => &mut self.ec_secondary,
            "water_level_secondary" => &mut self.water_level_secondary,
            "water_temp_secondary" => &mut self.water_temp_secondary,
            "light_level_secondary" => &mut self.light_level_secondary,
            _ => return,
        };
        tracing::warn!(field, "dropping non-finite field");
        *slot = None;
    }
}

/// Severity of a notification or an alert it produced. Ordinal order doubles
/// as the escalation/tier-routing rank (`Info` is never escalated to).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info = 0,
    Preventive = 1,
    Warning = 2,
    Critical = 3,
    Urgent = 4,
    Emergency = 5,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Preventive => "preventive",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
            Severity::Urgent => "urgent",
            Severity::Emergency => "emergency",
        };
        write!(f, "{s}")
    }
}

impl Severity {
    /// Emoji glyph used in notification subjects.
    pub fn glyph(self) -> &'static str {
        match self {
            Severity::Info => "\u{2139}\u{fe0f}",
            Severity::Preventive => "\u{26a0}\u{fe0f}",
            Severity::Warning => "\u{26a0}\u{fe0f}",
            Severity::Critical => "\u{1f6a8}",
            Severity::Urgent => "\u{1f6a8}",
            Severity::Emergency => "\u{1f525}",
        }
    }
}

/// Escalation ladder level. Distinct from `Severity`: every
/// level maps onto a notify severity of the same name for re-notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum EscalationLevel {
    Preventive = 0,
    Warning = 1,
    Critical = 2,
    Urgent = 3,
    Emergency = 4,
}

impl EscalationLevel {
    pub fn advance(self) -> Self {
        match self {
            EscalationLevel::Preventive => EscalationLevel::Warning,
            EscalationLevel::Warning => EscalationLevel::Critical,
            EscalationLevel::Critical => EscalationLevel::Urgent,
            EscalationLevel::Urgent | EscalationLevel::Emergency => EscalationLevel::Emergency,
        }
    }

    pub fn to_severity(self) -> Severity {
        match self {
            EscalationLevel::Preventive => Severity::Preventive,
            EscalationLevel::Warning => Severity::Warning,
            EscalationLevel::Critical => Severity::Critical,
            EscalationLevel::Urgent => Severity::Urgent,
            EscalationLevel::Emergency => Severity::Emergency,
        }
    }

    pub fn from_severity(severity: Severity) -> Self {
        match severity {
            Severity::Info | Severity::Preventive => EscalationLevel::Preventive,
            Severity::Warning => EscalationLevel::Warning,
            Severity::Critical => EscalationLevel::Critical,
            Severity::Urgent => EscalationLevel::Urgent,
            Severity::Emergency => EscalationLevel::Emergency,
        }
    }
}

/// `above`/`below` comparison a rule's predicate evaluates with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleCondition {
    Above,
    Below,
}

/// Comparison operator used by an external-context gate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Ne,
}

impl Operator {
    pub fn eval(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Operator::Gt => lhs > rhs,
            Operator::Gte => lhs >= rhs,
            Operator::Lt => lhs < rhs,
            Operator::Lte => lhs <= rhs,
            Operator::Eq => (lhs - rhs).abs() < f64::EPSILON,
            Operator::Ne => (lhs - rhs).abs() >= f64::EPSILON,
        }
    }
}

/// AND-gate on the external-context snapshot: `context_field` is a
/// `"<source>.<field>"` key. Missing or stale (`now >= valid_until`) entries
/// fail the gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalGate {
    pub context_field: String,
    pub condition: Operator,
    pub threshold: f64,
}

/// HVAC imperative: `cool`/`heat` may carry a target temperature;
/// `off` clears any active program.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AcMode {
    Cool,
    Heat,
    Off,
}

/// The action a rule fires when its predicate (and gate) are satisfied.
///
/// Tagged enum dispatch rather than a class hierarchy — see DESIGN.md.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Arduino {
        command: String,
    },
    Ac {
        command: AcMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_temp: Option<f64>,
    },
    Notify {
        severity: Severity,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recommended_action: Option<String>,
    },
}

impl Action {
    /// Dedup key for the stage-overlay-vs-static duplicate suppression
    /// used to dedup overlay rules against their static counterpart: `(action.kind, derived-key)`.
    pub fn dedup_key(&self) -> (&'static str, String) {
        match self {
            Action::Arduino { command } => ("arduino", command.clone()),
            Action::Ac { command, .. } => ("ac", format!("{command:?}")),
            Action::Notify { .. } => ("notify", String::new()),
        }
    }
}

pub type RuleId = String;

/// Prefix namespacing a crop-stage overlay rule's id: `stage:<crop>:<rule>`.
pub const STAGE_RULE_PREFIX: &str = "stage:";

/// A static rule, or a crop-stage overlay rule synthesized by the crop overlay with an
/// id of the form `stage:<crop>:<rule>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub enabled: bool,
    pub sensor_field: String,
    pub condition: RuleCondition,
    pub threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_margin: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_gate: Option<ExternalGate>,
    pub action: Action,
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_cooldown() -> u64 {
    crate::config::defaults::DEFAULT_COOLDOWN_SECONDS
}

/// Outcome of evaluating a rule's `above`/`below` predicate against one
/// value, before cooldown/duration gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateVerdict {
    Preventive,
    Critical,
}

impl Rule {
    pub fn is_stage_rule(&self) -> bool {
        self.id.starts_with(STAGE_RULE_PREFIX)
    }

    /// Evaluate the `above`/`below` predicate (with preventive band) against
    /// a value, at the boundary: at the threshold exactly,
    /// the predicate yields neither preventive nor critical.
    pub fn predicate(&self, value: f64) -> Option<PredicateVerdict> {
        let margin = self.warning_margin.unwrap_or(0.0);
        match self.condition {
            RuleCondition::Above => {
                if value > self.threshold {
                    Some(PredicateVerdict::Critical)
                } else if margin > 0.0 && value >= self.threshold - margin && value < self.threshold {
                    Some(PredicateVerdict::Preventive)
                } else {
                    None
                }
            }
            RuleCondition::Below => {
                if value < self.threshold {
                    Some(PredicateVerdict::Critical)
                } else if margin > 0.0 && value > self.threshold && value <= self.threshold + margin {
                    Some(PredicateVerdict::Preventive)
                } else {
                    None
                }
            }
        }
    }
}

/// Per-rule suppression clock: an alert fires only if
/// `now - last_fired_at >= cooldown_seconds`. Global across sensor ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownEntry {
    pub rule_id: RuleId,
    pub last_fired_at: DateTime<Utc>,
    pub suppressed_count: u64,
}

/// A materialized alert produced by a firing rule, appended to the bounded
/// history ring (default cap 50).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub timestamp: DateTime<Utc>,
    pub rule_id: RuleId,
    pub severity: Severity,
    pub message: String,
    pub sensor_snapshot: HashMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_action: Option<String>,
}

/// Escalation state for one open alert-key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub rule_id: RuleId,
    pub level: EscalationLevel,
    pub first_seen: DateTime<Utc>,
    pub next_due_at: DateTime<Utc>,
}

/// Rolling analytic state for one `(sensor_id, field)` pair: Welford
/// accumulators plus a bounded ring buffer for moving averages, trend, and
/// anomaly detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticState {
    pub sensor_id: String,
    pub field: String,
    pub count: u64,
    pub mean: f64,
    pub m2: f64,
    pub last_value: Option<f64>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub history: VecDeque<(DateTime<Utc>, f64)>,
}

impl AnalyticState {
    pub fn new(sensor_id: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            field: field.into(),
            count: 0,
            mean: 0.0,
            m2: 0.0,
            last_value: None,
            last_timestamp: None,
            history: VecDeque::new(),
        }
    }

    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count as f64 - 1.0)
        }
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Mean of the last `n` retained samples (most recent first).
    pub fn moving_average(&self, n: usize) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        let take = n.min(self.history.len());
        let sum: f64 = self.history.iter().rev().take(take).map(|(_, v)| v).sum();
        Some(sum / take as f64)
    }
}

/// Growth-stage trend classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

/// Per-variety, per-stage threshold bounds for one sensor-field.
pub type StageOverrides = HashMap<String, (f64, f64)>;

/// Ordered stage progression; `flowering`/`fruiting` may be skipped per
/// variety by simply omitting overrides for that stage.
pub const STAGE_ORDER: &[&str] = &[
    "germination",
    "seedling",
    "transplant",
    "vegetative",
    "flowering",
    "fruiting",
    "maturity",
    "harvest_ready",
];

pub fn next_stage(current: &str) -> Option<&'static str> {
    let idx = STAGE_ORDER.iter().position(|&s| s == current)?;
    STAGE_ORDER.get(idx + 1).copied()
}

/// Growth-stage crop record driving the crop-stage overlay. `zone` is
/// the sensor_id whose readings this crop's overlay rules apply to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Crop {
    pub id: String,
    pub variety: String,
    pub zone: String,
    pub plant_date: DateTime<Utc>,
    pub status: String,
    pub current_stage: String,
    pub stage_entered_at: DateTime<Utc>,
    pub stage_expected_duration_days: i64,
    /// Per-field `(min, max)` optimal range for the crop's current stage.
    pub stage_overrides: StageOverrides,
}

impl Crop {
    pub fn days_in_stage(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.stage_entered_at).num_days()
    }
}

/// A harvest record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Harvest {
    pub crop_id: String,
    pub harvested_at: DateTime<Utc>,
    pub yield_grams: Option<f64>,
    pub notes: Option<String>,
}

/// Drift-detector state for one sensor-field pair (primary vs `_secondary`),
/// tracking deviation via a running Welford mean/stddev of the delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftState {
    pub field: String,
    pub count: u64,
    pub mean_delta: f64,
    pub m2_delta: f64,
    pub last_alert_at: Option<DateTime<Utc>>,
}

impl DriftState {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            count: 0,
            mean_delta: 0.0,
            m2_delta: 0.0,
            last_alert_at: None,
        }
    }

    pub fn stddev_delta(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2_delta / (self.count as f64 - 1.0)).sqrt()
        }
    }

    /// `100 - k*|mean_delta| - k'*stddev(delta)`, 0-clipped.
    pub fn health_score(&self, k: f64, k_prime: f64) -> f64 {
        (100.0 - k * self.mean_delta.abs() - k_prime * self.stddev_delta()).max(0.0)
    }
}

/// One entry in the external-context store: a value with a freshness
/// deadline. `source` + `field` together form the `context_field` key
/// rules gate on, e.g. `"weather.forecast_max_temp"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalContextEntry {
    pub value: f64,
    pub fetched_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl ExternalContextEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.valid_until
    }
}

/// Keyed map of `"<source>.<field>" -> ExternalContextEntry`, published as an
/// immutable snapshot on each harvester completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalContextSnapshot {
    pub entries: HashMap<String, ExternalContextEntry>,
}
