//! Drift detector.
//!
//! Flags a sensor pair whose readings have diverged by more than a
//! configured delta for a sustained period — a primary field and its
//! `_secondary` twin (two probes measuring the same thing) are expected to
//! track each other; a growing gap usually means one of them is losing
//! calibration, which the instantaneous anomaly check in the analytic
//! engine won't catch since neither probe is necessarily "spiking".

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::config::defaults;
use crate::types::DriftState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftSeverity {
    None,
    Warning,
    Critical,
}

pub struct DriftDetector {
    states: DashMap<(String, String), DriftState>,
    warning_delta: f64,
    critical_delta: f64,
    min_samples: u64,
}

impl DriftDetector {
    pub fn new(warning_delta: f64, critical_delta: f64, min_samples: u64) -> Self {
        Self {
            states: DashMap::new(),
            warning_delta,
            critical_delta,
            min_samples,
        }
    }

    /// Feed one (primary, secondary) reading pair for a sensor/field and
    /// return the resulting drift severity plus a 0-100 health score.
    pub fn observe(&self, sensor_id: &str, field: &str, primary: f64, secondary: f64, now: DateTime<Utc>) -> (DriftSeverity, f64) {
        let key = (sensor_id.to_string(), field.to_string());
        let mut state = self
            .states
            .entry(key)
            .or_insert_with(|| DriftState::new(field));

        let delta = primary - secondary;
        state.count += 1;
        let d = state.count as f64;
        let prev_mean = state.mean_delta;
        state.mean_delta += (delta - prev_mean) / d;
        state.m2_delta += (delta - prev_mean) * (delta - state.mean_delta);

        let health = state.health_score(defaults::DRIFT_HEALTH_SCORE_K, defaults::DRIFT_HEALTH_SCORE_K_PRIME);

        if state.count < self.min_samples {
            return (DriftSeverity::None, health);
        }

        let abs_delta = delta.abs();
        let severity = if abs_delta >= self.critical_delta {
            state.last_alert_at = Some(now);
            DriftSeverity::Critical
        } else if abs_delta >= self.warning_delta {
            state.last_alert_at = Some(now);
            DriftSeverity::Warning
        } else {
            DriftSeverity::None
        };

        (severity, health)
    }

    pub fn state_for(&self, sensor_id: &str, field: &str) -> Option<DriftState> {
        self.states
            .get(&(sensor_id.to_string(), field.to_string()))
            .map(|e| e.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_drift_within_tolerance() {
        let detector = DriftDetector::new(1.0, 3.0, 1);
        let (severity, _) = detector.observe("s1", "temperature", 20.2, 20.0, Utc::now());
        assert_eq!(severity, DriftSeverity::None);
    }

    #[test]
    fn warning_then_critical_drift() {
        let detector = DriftDetector::new(1.0, 3.0, 1);
        let (severity, _) = detector.observe("s1", "temperature", 21.5, 20.0, Utc::now());
        assert_eq!(severity, DriftSeverity::Warning);
        let (severity, _) = detector.observe("s1", "temperature", 24.0, 20.0, Utc::now());
        assert_eq!(severity, DriftSeverity::Critical);
    }

    #[test]
    fn requires_minimum_samples() {
        let detector = DriftDetector::new(1.0, 3.0, 3);
        let (severity, _) = detector.observe("s1", "temperature", 30.0, 20.0, Utc::now());
        assert_eq!(severity, DriftSeverity::None);
    }

    #[test]
    fn health_score_degrades_as_delta_grows() {
        let detector = DriftDetector::new(1.0, 3.0, 1);
        let (_, healthy) = detector.observe("s1", "ph", 6.0, 6.0, Utc::now());
        let (_, degraded) = detector.observe("s2", "ph", 6.0, 3.0, Utc::now());
        assert!(degraded < healthy);
    }
}
