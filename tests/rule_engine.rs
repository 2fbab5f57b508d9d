//! Rule persistence, static+overlay dedup, and crop-stage overlay generation
//! through the public API.

use std::collections::HashMap;

use chrono::Utc;
use hydro_gateway::crops::overlay_rules_for_crop;
use hydro_gateway::rules::RuleEngine;
use hydro_gateway::types::{Action, Crop, ExternalContextSnapshot, Rule, RuleCondition, Severity};

fn static_rule(id: &str, threshold: f64) -> Rule {
    let now = Utc::now();
    Rule {
        id: id.to_string(),
        name: "temp band".to_string(),
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
        cooldown_seconds: 300,
        created_at: now,
        updated_at: now,
    }
}

fn test_crop(id: &str, zone: &str) -> Crop {
    let now = Utc::now();
    let mut overrides = HashMap::new();
    overrides.insert("temperature".to_string(), (18.0, 26.0));
    Crop {
        id: id.into(),
        variety: "basil".into(),
        zone: zone.into(),
        plant_date: now - chrono::Duration::days(10),
        status: "growing".into(),
        current_stage: "seedling".into(),
        stage_entered_at: now - chrono::Duration::days(2),
        stage_expected_duration_days: 10,
        stage_overrides: overrides,
    }
}

#[test]
fn rules_survive_a_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.json");
    {
        let engine = RuleEngine::load(&path).unwrap();
        engine.upsert(static_rule("r1", 30.0)).unwrap();
        engine.upsert(static_rule("r2", 32.0)).unwrap();
    }
    let reloaded = RuleEngine::load(&path).unwrap();
    assert_eq!(reloaded.all().len(), 2);
    reloaded.remove("r1").unwrap();
    assert_eq!(reloaded.all().len(), 1);
}

#[test]
fn crop_overlay_rule_wins_dedup_against_static_rule() {
    let dir = tempfile::tempdir().unwrap();
    let engine = RuleEngine::load(dir.path().join("rules.json")).unwrap();
    engine.upsert(static_rule("band-temp", 30.0)).unwrap();

    let crop = test_crop("tray-1", "s1");
    let overlay = overlay_rules_for_crop(&crop);
    assert_eq!(overlay.len(), 2);

    let mut values = HashMap::new();
    values.insert("temperature".to_string(), 35.0);
    let context = ExternalContextSnapshot::default();

    // Both the static rule (threshold 30) and the overlay high-bound rule
    // (threshold 26) fire on their own, but both point at the same Notify
    // action signature, so only one survives dedup — the overlay, since it
    // is inserted last.
    let fired = engine.evaluate(&values, &context, &overlay, Utc::now());
    assert_eq!(fired.len(), 1);
    assert!(fired[0].0.id.starts_with("stage:tray-1:"));
}

#[test]
fn disabled_rule_never_fires() {
    let dir = tempfile::tempdir().unwrap();
    let engine = RuleEngine::load(dir.path().join("rules.json")).unwrap();
    let mut rule = static_rule("r1", 30.0);
    rule.enabled = false;
    engine.upsert(rule).unwrap();

    let mut values = HashMap::new();
    values.insert("temperature".to_string(), 99.0);
    let context = ExternalContextSnapshot::default();
    let fired = engine.evaluate(&values, &context, &[], Utc::now());
    assert!(fired.is_empty());
}
