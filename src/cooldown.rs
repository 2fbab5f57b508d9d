//! Cooldown & alert history ledger.
//!
//! Tracks the last time each rule fired so the rule engine can suppress
//! repeat notifications. Cooldown is keyed by rule id alone — a rule has no
//! sensor scope of its own, so its grace period applies globally across
//! whichever sensor happened to trip it. Cooldown stays flat regardless of
//! severity: a critical alert gets the same grace period as a warning.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::config::defaults;
use crate::types::{Alert, CooldownEntry};

pub struct CooldownLedger {
    entries: DashMap<String, CooldownEntry>,
}

impl CooldownLedger {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Returns true if the rule is still cooling down as of `now`, given
    /// `cooldown_seconds`.
    pub fn in_cooldown(&self, rule_id: &str, cooldown_seconds: u64, now: DateTime<Utc>) -> bool {
        match self.entries.get(rule_id) {
            Some(entry) => {
                let elapsed = now.signed_duration_since(entry.last_fired_at);
                elapsed.num_seconds() < cooldown_seconds as i64
            }
            None => false,
        }
    }

    /// Record a fire, resetting the cooldown window.
    pub fn record_fire(&self, rule_id: &str, now: DateTime<Utc>) {
        self.entries
            .entry(rule_id.to_string())
            .and_modify(|e| e.last_fired_at = now)
            .or_insert_with(|| CooldownEntry {
                rule_id: rule_id.to_string(),
                last_fired_at: now,
                suppressed_count: 0,
            });
    }

    /// Record a suppressed would-have-fired event, for observability.
    pub fn record_suppressed(&self, rule_id: &str) {
        if let Some(mut entry) = self.entries.get_mut(rule_id) {
            entry.suppressed_count += 1;
        }
    }

    pub fn snapshot(&self) -> Vec<CooldownEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }
}

impl Default for CooldownLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded ring of the most recently fired alerts, kept in memory only — not
/// the durable audit trail the relational store provides, just enough recent
/// history for `GET /api/notifications` to answer without a query.
pub struct AlertHistory {
    recent: Mutex<VecDeque<Alert>>,
    capacity: usize,
}

impl AlertHistory {
    pub fn new() -> Self {
        Self {
            recent: Mutex::new(VecDeque::with_capacity(defaults::ALERT_HISTORY_CAP)),
            capacity: defaults::ALERT_HISTORY_CAP,
        }
    }

    pub fn push(&self, alert: Alert) {
        let mut recent = self.recent.lock().expect("alert history lock poisoned");
        if recent.len() >= self.capacity {
            recent.pop_front();
        }
        recent.push_back(alert);
    }

    /// Most recent alerts first.
    pub fn recent(&self) -> Vec<Alert> {
        let recent = self.recent.lock().expect("alert history lock poisoned");
        recent.iter().rev().cloned().collect()
    }
}

impl Default for AlertHistory {
    fn default() -> Self {
        Self::new()
    }
}
