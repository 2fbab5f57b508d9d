//! Analytic feature engine.
//!
//! Maintains rolling Welford mean/variance per (sensor_id, field) for O(1)
//! streaming anomaly detection, a bounded ring buffer for moving averages
//! and trend estimation, and derives VPD/DLI from co-occurring
//! temperature/humidity/light fields on the same reading. `ingest` is the
//! one entry point the orchestrator calls per reading; its returned
//! `FeatureSet` is folded into the rule-evaluation context so VPD/DLI and
//! anomaly flags are visible to the rule engine, not just logged.

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use dashmap::DashMap;

use crate::config::defaults;
use crate::types::{AnalyticState, Reading, Trend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyKind {
    Spike,
    Flatline,
    SuddenJump,
}

#[derive(Debug, Clone, Copy)]
pub struct AnomalyReport {
    pub field: &'static str,
    pub kind: AnomalyKind,
    pub z_score: f64,
    pub critical: bool,
}

/// Per-field derived features computed for one reading.
#[derive(Debug, Clone, Default)]
pub struct FieldFeatures {
    pub ma10: Option<f64>,
    pub ma30: Option<f64>,
    pub ma60: Option<f64>,
    pub trend: Option<Trend>,
    pub anomaly: Option<AnomalyReport>,
}

/// Everything the analytic engine derived from one reading, keyed by field
/// name, plus the whole-reading derived values (VPD, DLI).
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub per_field: HashMap<String, FieldFeatures>,
    pub vpd_kpa: Option<f64>,
    pub dli_mol_m2_day: Option<f64>,
}

impl FeatureSet {
    /// Flatten into a `field -> value` map so the rule engine's external
    /// context / predicate lookups can reference derived quantities by name
    /// (`"vpd_kpa"`, `"dli_mol_m2_day"`) alongside raw reading fields.
    pub fn as_value_map(&self) -> HashMap<String, f64> {
        let mut map = HashMap::new();
        if let Some(vpd) = self.vpd_kpa {
            map.insert("vpd_kpa".to_string(), vpd);
        }
        if let Some(dli) = self.dli_mol_m2_day {
            map.insert("dli_mol_m2_day".to_string(), dli);
        }
        map
    }

    pub fn anomalies(&self) -> Vec<AnomalyReport> {
        self.per_field.values().filter_map(|f| f.anomaly).collect()
    }
}

pub struct AnalyticEngine {
    states: DashMap<(String, String), AnalyticState>,
    dli_accumulators: DashMap<String, DliAccumulator>,
    warning_sigma: f64,
    critical_sigma: f64,
    min_samples: u64,
    dli_photoperiod_hours: f64,
}

impl AnalyticEngine {
    pub fn new(warning_sigma: f64, critical_sigma: f64, min_samples: u64, dli_photoperiod_hours: f64) -> Self {
        Self {
            states: DashMap::new(),
            dli_accumulators: DashMap::new(),
            warning_sigma,
            critical_sigma,
            min_samples,
            dli_photoperiod_hours,
        }
    }

    /// Feed one reading's every present field into its rolling state,
    /// compute VPD (if temperature+humidity are both present on this
    /// reading) and DLI (if light_level is present), and return the full
    /// per-field feature map for the rule engine.
    pub fn ingest(&self, reading: &Reading) -> FeatureSet {
        let ts = reading.effective_timestamp();
        let mut per_field = HashMap::new();

        for (field, value) in reading.present_fields() {
            per_field.insert(field.to_string(), self.observe_field(&reading.sensor_id, field, value, ts));
        }

        let vpd_kpa = match (reading.temperature, reading.humidity) {
            (Some(t), Some(h)) => Some(vapor_pressure_deficit_kpa(t, h)),
            _ => None,
        };

        let dli_mol_m2_day = reading.light_level.map(|ppfd| {
            let mut acc = self
                .dli_accumulators
                .entry(reading.sensor_id.clone())
                .or_insert_with(|| DliAccumulator::new(self.dli_photoperiod_hours));
            acc.add_sample(ppfd, ts);
            acc.mol_per_m2_day()
        });

        FeatureSet {
            per_field,
            vpd_kpa,
            dli_mol_m2_day,
        }
    }

    fn observe_field(&self, sensor_id: &str, field: &'static str, value: f64, ts: DateTime<Utc>) -> FieldFeatures {
        let key = (sensor_id.to_string(), field.to_string());
        let mut state = self
            .states
            .entry(key)
            .or_insert_with(|| AnalyticState::new(sensor_id, field));

        let anomaly_cfg = defaults::anomaly_defaults_for(field);

        state.count += 1;
        let delta = value - state.mean;
        state.mean += delta / state.count as f64;
        let delta2 = value - state.mean;
        state.m2 += delta * delta2;

        let flatline = state.last_value.is_some_and(|last| (last - value).abs() < f64::EPSILON)
            && state.history.len() as u64 >= anomaly_cfg.flatline_samples.min(defaults::HISTORY_BUFFER_SIZE as u64)
            && state
                .history
                .iter()
                .rev()
                .take(anomaly_cfg.flatline_samples as usize)
                .all(|(_, v)| (v - value).abs() < f64::EPSILON);

        let sudden_jump = state.last_value.is_some_and(|last| {
            last.abs() > f64::EPSILON && ((value - last).abs() / last.abs()) > anomaly_cfg.jump_fraction
        });

        let anomaly = if state.count >= self.min_samples {
            if flatline {
                Some(AnomalyReport {
                    field,
                    kind: AnomalyKind::Flatline,
                    z_score: 0.0,
                    critical: false,
                })
            } else if sudden_jump {
                Some(AnomalyReport {
                    field,
                    kind: AnomalyKind::SuddenJump,
                    z_score: 0.0,
                    critical: false,
                })
            } else if state.stddev() > 0.0 {
                let z = (value - state.mean).abs() / state.stddev();
                if z >= self.critical_sigma.max(anomaly_cfg.z_threshold) {
                    Some(AnomalyReport {
                        field,
                        kind: AnomalyKind::Spike,
                        z_score: z,
                        critical: true,
                    })
                } else if z >= self.warning_sigma.min(anomaly_cfg.z_threshold) {
                    Some(AnomalyReport {
                        field,
                        kind: AnomalyKind::Spike,
                        z_score: z,
                        critical: false,
                    })
                } else {
                    None
                }
            } else {
                None
            }
        } else {
            None
        };

        state.last_value = Some(value);
        state.last_timestamp = Some(ts);
        state.history.push_back((ts, value));
        if state.history.len() > defaults::HISTORY_BUFFER_SIZE {
            state.history.pop_front();
        }

        let ma10 = state.moving_average(10);
        let ma30 = state.moving_average(30);
        let ma60 = state.moving_average(60);
        let trend = trend_per_hour(&state).map(classify_trend);

        FieldFeatures {
            ma10,
            ma30,
            ma60,
            trend,
            anomaly,
        }
    }

    pub fn state_for(&self, sensor_id: &str, field: &str) -> Option<AnalyticState> {
        self.states.get(&(sensor_id.to_string(), field.to_string())).map(|e| e.clone())
    }
}

impl Default for AnalyticEngine {
    fn default() -> Self {
        Self::new(
            defaults::ANOMALY_WARNING_SIGMA,
            defaults::ANOMALY_CRITICAL_SIGMA,
            defaults::MIN_SAMPLES_FOR_ANOMALY,
            defaults::DLI_PHOTOPERIOD_HOURS,
        )
    }
}

/// Linear trend (units per hour) over the retained history, via a simple
/// least-squares slope against elapsed seconds.
fn trend_per_hour(state: &AnalyticState) -> Option<f64> {
    if state.history.len() < 2 {
        return None;
    }
    let t0 = state.history.front()?.0;
    let points: Vec<(f64, f64)> = state.history.iter().map(|(t, v)| ((*t - t0).num_seconds() as f64, *v)).collect();
    let n = points.len() as f64;
    let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
    let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
    let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();
    let sum_xx: f64 = points.iter().map(|(x, _)| x * x).sum();
    let denom = n * sum_xx - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return Some(0.0);
    }
    let slope_per_sec = (n * sum_xy - sum_x * sum_y) / denom;
    Some(slope_per_sec * 3600.0)
}

fn classify_trend(slope_per_hour: f64) -> Trend {
    if slope_per_hour > 0.05 {
        Trend::Rising
    } else if slope_per_hour < -0.05 {
        Trend::Falling
    } else {
        Trend::Stable
    }
}

/// Vapor pressure deficit in kPa from air temperature and relative
/// humidity, via the Tetens saturation-vapor-pressure approximation.
pub fn vapor_pressure_deficit_kpa(temp_c: f64, relative_humidity_pct: f64) -> f64 {
    let svp_kpa = 0.6108 * (17.27 * temp_c / (temp_c + 237.3)).exp();
    let avp_kpa = svp_kpa * (relative_humidity_pct / 100.0);
    svp_kpa - avp_kpa
}

/// Daily light integral accumulator: sums instantaneous PPFD (micromol/m^2/s)
/// readings into mol/m^2/day, resetting at UTC midnight, over an assumed
/// photoperiod used only to annotate capacity (the running sum itself is
/// sample-interval driven, not photoperiod driven).
pub struct DliAccumulator {
    accumulated_mol: f64,
    day_marker: u32,
    last_sample_at: Option<DateTime<Utc>>,
    #[allow(dead_code)]
    photoperiod_hours: f64,
}

impl DliAccumulator {
    pub fn new(photoperiod_hours: f64) -> Self {
        Self {
            accumulated_mol: 0.0,
            day_marker: 0,
            last_sample_at: None,
            photoperiod_hours,
        }
    }

    /// Add one PPFD sample, inferring the elapsed interval from the
    /// previous sample's timestamp (first sample of a run contributes
    /// nothing, since no interval can be derived yet).
    pub fn add_sample(&mut self, ppfd_umol_m2_s: f64, timestamp: DateTime<Utc>) {
        let day = timestamp.ordinal();
        if day != self.day_marker {
            self.accumulated_mol = 0.0;
            self.day_marker = day;
            self.last_sample_at = None;
        }
        if let Some(last) = self.last_sample_at {
            let interval_secs = (timestamp - last).num_milliseconds() as f64 / 1000.0;
            if interval_secs > 0.0 {
                // umol/m^2/s * s = umol/m^2; /1_000_000 -> mol/m^2
                self.accumulated_mol += ppfd_umol_m2_s * interval_secs / 1_000_000.0;
            }
        }
        self.last_sample_at = Some(timestamp);
    }

    pub fn mol_per_m2_day(&self) -> f64 {
        self.accumulated_mol
    }
}
