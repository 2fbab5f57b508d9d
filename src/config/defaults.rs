//! Named default constants, grouped by concern rather than scattered as
//! magic numbers through the codebase.

/// Default cooldown between repeat notifications for the same rule.
/// Global across sensor ids: cooldown keys on `rule_id` alone.
pub const DEFAULT_COOLDOWN_SECONDS: u64 = 300;

/// Dwell time at each escalation level before advancing to the next, indexed
/// by `EscalationLevel as usize` (preventive, warning, critical, urgent,
/// emergency). The `emergency` entry also governs the infinite repeat period
/// once the ladder has been fully climbed.
pub const ESCALATION_DWELL_LADDER: [u64; 5] = [300, 600, 900, 900, 900];

/// Background ticker period for the escalation manager.
pub const ESCALATION_CHECK_INTERVAL_SECS: u64 = 30;

/// Background ticker period for the crop stage-advance sweep.
pub const CROP_SWEEP_INTERVAL_SECS: u64 = 3_600;

/// z-score threshold for a "warning" anomaly.
pub const ANOMALY_WARNING_SIGMA: f64 = 2.5;
/// z-score threshold for a "critical" anomaly.
pub const ANOMALY_CRITICAL_SIGMA: f64 = 4.0;
/// Minimum samples before anomaly/drift detection activates.
pub const MIN_SAMPLES_FOR_ANOMALY: u64 = 10;

/// Vapor pressure deficit optimal band (kPa).
pub const VPD_OPTIMAL_LOW_KPA: f64 = 0.8;
pub const VPD_OPTIMAL_HIGH_KPA: f64 = 1.2;

/// Default photoperiod assumed for daily light integral accumulation.
/// Leafy greens under supplemental lighting typically run 14h; growers with
/// a different photoperiod override this per zone.
pub const DLI_PHOTOPERIOD_HOURS: f64 = 14.0;

/// Drift detector deviation-from-baseline thresholds, and health-score
/// weighting coefficients (`100 - k*|mean_delta| - k'*stddev(delta)`).
pub const DRIFT_WARNING_DELTA: f64 = 1.5;
pub const DRIFT_CRITICAL_DELTA: f64 = 3.0;
pub const DRIFT_HEALTH_SCORE_K: f64 = 10.0;
pub const DRIFT_HEALTH_SCORE_K_PRIME: f64 = 5.0;

/// Time-series writer batching.
pub const TSDB_BATCH_MAX: usize = 200;
pub const TSDB_FLUSH_INTERVAL_MS: u64 = 2_000;
pub const TSDB_QUEUE_CAPACITY: usize = 10_000;

/// External-context harvester freshness windows, one per source.
pub const WEATHER_CURRENT_FRESHNESS_SECS: u64 = 900;
pub const WEATHER_FORECAST_FRESHNESS_SECS: u64 = 3_600;
pub const SOLAR_FRESHNESS_SECS: u64 = 21_600;
pub const ELECTRICITY_FRESHNESS_SECS: u64 = 3_600;
pub const MARKET_FRESHNESS_SECS: u64 = 86_400;
pub const TOURISM_FRESHNESS_SECS: u64 = 86_400;
/// Cap on exponential backoff after a harvester fetch failure.
pub const HARVESTER_BACKOFF_CAP_SECS: u64 = 3_600;

/// Cache TTL for the most-recent-reading lookup table.
pub const CACHE_TTL_SECS: u64 = 120;

/// Bounded history length retained per (sensor_id, field) for trend/anomaly
/// analysis.
pub const HISTORY_BUFFER_SIZE: usize = 900;

/// How long a RuleEvalError for the same rule is suppressed from the log
/// before being emitted again.
pub const RULE_EVAL_ERROR_LOG_INTERVAL_SECS: u64 = 3_600;

/// Bounded in-memory alert history ring retained for `GET /api/notifications`.
pub const ALERT_HISTORY_CAP: usize = 50;

/// HVAC driver debounce window: identical commands within this window are
/// not re-sent to the vendor API.
pub const HVAC_DEBOUNCE_SECS: u64 = 10;
/// HVAC vendor API call timeout.
pub const HVAC_CALL_TIMEOUT_SECS: u64 = 5;

/// Per-field anomaly-detection configuration: z-score threshold, minimum
/// flatline run length in samples, and max single-step jump as a fraction of
/// the running mean. Looked up by primary field name (a `_secondary` field
/// reuses its primary's config).
pub struct FieldAnomalyDefaults {
    pub field: &'static str,
    pub z_threshold: f64,
    pub flatline_samples: u64,
    pub jump_fraction: f64,
}

pub const FIELD_ANOMALY_DEFAULTS: &[FieldAnomalyDefaults] = &[
    FieldAnomalyDefaults { field: "temperature", z_threshold: 2.5, flatline_samples: 60, jump_fraction: 0.10 },
    FieldAnomalyDefaults { field: "humidity", z_threshold: 2.5, flatline_samples: 60, jump_fraction: 0.15 },
    FieldAnomalyDefaults { field: "ph", z_threshold: 2.0, flatline_samples: 120, jump_fraction: 0.03 },
    FieldAnomalyDefaults { field: "ec", z_threshold: 2.5, flatline_samples: 120, jump_fraction: 0.08 },
    FieldAnomalyDefaults { field: "water_level", z_threshold: 2.5, flatline_samples: 300, jump_fraction: 0.20 },
    FieldAnomalyDefaults { field: "light_level", z_threshold: 3.0, flatline_samples: 60, jump_fraction: 0.50 },
];

pub fn anomaly_defaults_for(field: &str) -> &'static FieldAnomalyDefaults {
    let base = crate::types::primary_field_of(field);
    FIELD_ANOMALY_DEFAULTS
        .iter()
        .find(|d| d.field == base)
        .unwrap_or(&FIELD_ANOMALY_DEFAULTS[0])
}
