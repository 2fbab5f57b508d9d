//! Crop-stage overlay.
//!
//! Generates stage-specific rule variants from a crop's per-stage threshold
//! overrides and hands them to the rule engine as overlay rules, namespaced
//! `stage:<crop_id>:<field>:<low|high>` so the rule engine can recognize and
//! dedup them against any static rule covering the same field/action. Also
//! owns the nightly stage-advance sweep: a crop that has spent longer than
//! its expected stage duration in its current stage moves to the next one
//! automatically.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use crate::types::{next_stage, Action, Crop, Harvest, Rule, RuleCondition, STAGE_RULE_PREFIX};

/// Build overlay rules for a crop's current stage. For each
/// `(field, (min, max))` override, two rules are generated: a low-bound and
/// a high-bound warning, both namespaced under the crop so they coexist with
/// other crops' overlays for the same field without id collisions.
pub fn overlay_rules_for_crop(crop: &Crop) -> Vec<Rule> {
    let mut rules = Vec::with_capacity(crop.stage_overrides.len() * 2);
    let now = Utc::now();
    for (field, (min, max)) in &crop.stage_overrides {
        let base_id = format!("{STAGE_RULE_PREFIX}{}:{field}", crop.id);
        rules.push(Rule {
            id: format!("{base_id}:low"),
            name: format!("{field} below {} minimum", crop.current_stage),
            enabled: true,
            sensor_field: field.clone(),
            condition: RuleCondition::Below,
            threshold: *min,
            warning_margin: None,
            duration: None,
            external_gate: None,
            action: Action::Notify {
                severity: crate::types::Severity::Warning,
                message: format!("{field} below {min} for {} stage on crop {}", crop.current_stage, crop.id),
                recommended_action: None,
            },
            cooldown_seconds: crate::config::defaults::DEFAULT_COOLDOWN_SECONDS,
            created_at: now,
            updated_at: now,
        });
        rules.push(Rule {
            id: format!("{base_id}:high"),
            name: format!("{field} above {} maximum", crop.current_stage),
            enabled: true,
            sensor_field: field.clone(),
            condition: RuleCondition::Above,
            threshold: *max,
            warning_margin: None,
            duration: None,
            external_gate: None,
            action: Action::Notify {
                severity: crate::types::Severity::Warning,
                message: format!("{field} above {max} for {} stage on crop {}", crop.current_stage, crop.id),
                recommended_action: None,
            },
            cooldown_seconds: crate::config::defaults::DEFAULT_COOLDOWN_SECONDS,
            created_at: now,
            updated_at: now,
        });
    }
    rules
}

/// A stage advance that happened during a sweep, for event logging.
#[derive(Debug, Clone)]
pub struct StageAdvance {
    pub crop_id: String,
    pub from_stage: String,
    pub to_stage: String,
}

/// In-memory registry of active crops, keyed by id. A crop's `zone` is the
/// sensor id its stage overlay applies to.
pub struct CropStore {
    crops: RwLock<HashMap<String, Crop>>,
}

impl CropStore {
    pub fn new() -> Self {
        Self {
            crops: RwLock::new(HashMap::new()),
        }
    }

    pub fn upsert(&self, crop: Crop) {
        self.crops.write().expect("crop store lock poisoned").insert(crop.id.clone(), crop);
    }

    pub fn get(&self, crop_id: &str) -> Option<Crop> {
        self.crops.read().expect("crop store lock poisoned").get(crop_id).cloned()
    }

    pub fn all(&self) -> Vec<Crop> {
        self.crops.read().expect("crop store lock poisoned").values().cloned().collect()
    }

    /// Overlay rules for every crop whose zone matches `sensor_id`.
    pub fn rules_for(&self, sensor_id: &str) -> Vec<Rule> {
        self.crops
            .read()
            .expect("crop store lock poisoned")
            .values()
            .filter(|c| c.zone == sensor_id)
            .flat_map(overlay_rules_for_crop)
            .collect()
    }

    /// Advance any crop that has outgrown its expected stage duration.
    /// Crops already at the terminal stage (`next_stage` returns `None`) are
    /// left alone — reaching `harvest_ready` requires an explicit harvest,
    /// not an automatic advance.
    pub fn auto_advance(&self, now: chrono::DateTime<Utc>) -> Vec<StageAdvance> {
        let mut advances = Vec::new();
        let mut crops = self.crops.write().expect("crop store lock poisoned");
        for crop in crops.values_mut() {
            if crop.days_in_stage(now) < crop.stage_expected_duration_days {
                continue;
            }
            let Some(next) = next_stage(&crop.current_stage) else {
                continue;
            };
            advances.push(StageAdvance {
                crop_id: crop.id.clone(),
                from_stage: crop.current_stage.clone(),
                to_stage: next.to_string(),
            });
            crop.current_stage = next.to_string();
            crop.stage_entered_at = now;
        }
        advances
    }

    /// Force one crop to its next stage regardless of `days_in_stage`, for
    /// the manual `/api/crops/{id}/advance` endpoint. Returns `None` if the
    /// crop is unknown or already at the terminal stage.
    pub fn advance(&self, crop_id: &str, now: chrono::DateTime<Utc>) -> Option<StageAdvance> {
        let mut crops = self.crops.write().expect("crop store lock poisoned");
        let crop = crops.get_mut(crop_id)?;
        let next = next_stage(&crop.current_stage)?;
        let advance = StageAdvance {
            crop_id: crop.id.clone(),
            from_stage: crop.current_stage.clone(),
            to_stage: next.to_string(),
        };
        crop.current_stage = next.to_string();
        crop.stage_entered_at = now;
        Some(advance)
    }

    /// Record a harvest and mark the crop harvested.
    pub fn harvest(&self, crop_id: &str, yield_grams: Option<f64>, notes: Option<String>, now: chrono::DateTime<Utc>) -> Option<Harvest> {
        let mut crops = self.crops.write().expect("crop store lock poisoned");
        let crop = crops.get_mut(crop_id)?;
        crop.status = "harvested".to_string();
        Some(Harvest {
            crop_id: crop_id.to_string(),
            harvested_at: now,
            yield_grams,
            notes,
        })
    }
}

impl Default for CropStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_crop(id: &str, stage: &str, days_in_stage: i64, expected: i64) -> Crop {
        let now = Utc::now();
        let mut overrides = HashMap::new();
        overrides.insert("temperature".to_string(), (18.0, 26.0));
        Crop {
            id: id.into(),
            variety: "lettuce".into(),
            zone: "zone-a".into(),
            plant_date: now - chrono::Duration::days(30),
            status: "growing".into(),
            current_stage: stage.into(),
            stage_entered_at: now - chrono::Duration::days(days_in_stage),
            stage_expected_duration_days: expected,
            stage_overrides: overrides,
        }
    }

    #[test]
    fn generates_low_and_high_overlay_per_field() {
        let crop = test_crop("c1", "seedling", 2, 10);
        let rules = overlay_rules_for_crop(&crop);
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| r.id.starts_with(&format!("{STAGE_RULE_PREFIX}c1:"))));
    }

    #[test]
    fn rules_for_matches_by_zone() {
        let store = CropStore::new();
        store.upsert(test_crop("c1", "seedling", 2, 10));
        assert_eq!(store.rules_for("zone-a").len(), 2);
        assert_eq!(store.rules_for("zone-b").len(), 0);
    }

    #[test]
    fn auto_advance_moves_overdue_crop_to_next_stage() {
        let store = CropStore::new();
        store.upsert(test_crop("c1", "seedling", 15, 10));
        let advances = store.auto_advance(Utc::now());
        assert_eq!(advances.len(), 1);
        assert_eq!(advances[0].from_stage, "seedling");
        assert_eq!(advances[0].to_stage, "transplant");
        assert_eq!(store.get("c1").unwrap().current_stage, "transplant");
    }

    #[test]
    fn auto_advance_leaves_crop_not_yet_due() {
        let store = CropStore::new();
        store.upsert(test_crop("c1", "seedling", 2, 10));
        let advances = store.auto_advance(Utc::now());
        assert!(advances.is_empty());
    }

    #[test]
    fn auto_advance_never_leaves_harvest_ready() {
        let store = CropStore::new();
        store.upsert(test_crop("c1", "harvest_ready", 100, 10));
        let advances = store.auto_advance(Utc::now());
        assert!(advances.is_empty());
    }

    #[test]
    fn manual_advance_ignores_days_in_stage() {
        let store = CropStore::new();
        store.upsert(test_crop("c1", "seedling", 0, 10));
        let advance = store.advance("c1", Utc::now()).expect("expected advance");
        assert_eq!(advance.to_stage, "transplant");
        assert_eq!(store.get("c1").unwrap().current_stage, "transplant");
    }

    #[test]
    fn manual_advance_on_harvest_ready_returns_none() {
        let store = CropStore::new();
        store.upsert(test_crop("c1", "harvest_ready", 0, 10));
        assert!(store.advance("c1", Utc::now()).is_none());
    }
}
