use parcelo_core::{
    AutomationRule, CarrierId, CarrierRate, RuleAction, RuleConditions, RuleEngine,
    ShipmentProfile,
};

fn quote(carrier: CarrierId, price: f64, days: u32) -> CarrierRate {
    CarrierRate::new(carrier, "SVC", "Service", price, "MXN", days).expect("valid rate")
}

fn profile(weight_kg: f64) -> ShipmentProfile {
    ShipmentProfile::new(weight_kg, "JAL", "Guadalajara")
}

#[test]
fn highest_priority_matching_rule_wins() {
    // Three rules all match; priority 3 must win over 2 and 1.
    let rules = vec![
        AutomationRule::new("p1", 1, RuleAction::Carrier(CarrierId::Dhl)),
        AutomationRule::new("p3", 3, RuleAction::Carrier(CarrierId::Ups)),
        AutomationRule::new("p2", 2, RuleAction::Carrier(CarrierId::Fedex)),
    ];

    let selected = RuleEngine::new().select_carrier(&rules, &profile(10.0), &[]);
    assert_eq!(selected, Some(CarrierId::Ups));
}

#[test]
fn no_matching_rule_yields_none() {
    let conditions = RuleConditions {
        min_weight_kg: Some(50.0),
        ..RuleConditions::default()
    };
    let rules = vec![
        AutomationRule::new("heavy-only", 5, RuleAction::Carrier(CarrierId::Ups))
            .with_conditions(conditions),
    ];

    let selected = RuleEngine::new().select_carrier(&rules, &profile(10.0), &[]);
    assert_eq!(selected, None);
}

#[test]
fn empty_rule_set_yields_none() {
    let selected = RuleEngine::new().select_carrier(&[], &profile(10.0), &[]);
    assert_eq!(selected, None);
}

#[test]
fn cheapest_sentinel_picks_the_lowest_quote() {
    let quotes = vec![
        quote(CarrierId::Dhl, 100.0, 2),
        quote(CarrierId::Fedex, 80.0, 3),
        quote(CarrierId::Ups, 120.0, 1),
    ];
    let rules = vec![AutomationRule::new("default", 1, RuleAction::Cheapest)];

    let selected = RuleEngine::new().select_carrier(&rules, &profile(10.0), &quotes);
    assert_eq!(selected, Some(CarrierId::Fedex));
}

#[test]
fn fastest_sentinel_picks_the_fewest_days() {
    let quotes = vec![
        quote(CarrierId::Dhl, 100.0, 2),
        quote(CarrierId::Fedex, 80.0, 3),
        quote(CarrierId::Ups, 120.0, 1),
    ];
    let rules = vec![AutomationRule::new("default", 1, RuleAction::Fastest)];

    let selected = RuleEngine::new().select_carrier(&rules, &profile(10.0), &quotes);
    assert_eq!(selected, Some(CarrierId::Ups));
}

#[test]
fn weight_window_accepts_inside_and_rejects_outside() {
    let conditions = RuleConditions {
        min_weight_kg: Some(5.0),
        max_weight_kg: Some(20.0),
        ..RuleConditions::default()
    };
    let rules = vec![
        AutomationRule::new("mid-weight", 1, RuleAction::Carrier(CarrierId::Estafeta))
            .with_conditions(conditions),
    ];
    let engine = RuleEngine::new();

    assert_eq!(
        engine.select_carrier(&rules, &profile(10.0), &[]),
        Some(CarrierId::Estafeta)
    );
    assert_eq!(engine.select_carrier(&rules, &profile(3.0), &[]), None);
    assert_eq!(engine.select_carrier(&rules, &profile(25.0), &[]), None);
}

#[test]
fn destination_conditions_and_weight_must_all_hold() {
    let conditions = RuleConditions {
        min_weight_kg: Some(5.0),
        states: vec![String::from("JAL")],
        cities: vec![String::from("Guadalajara")],
        ..RuleConditions::default()
    };
    let rules = vec![
        AutomationRule::new("gdl-heavy", 1, RuleAction::Carrier(CarrierId::Ups))
            .with_conditions(conditions),
    ];
    let engine = RuleEngine::new();

    assert_eq!(
        engine.select_carrier(&rules, &profile(10.0), &[]),
        Some(CarrierId::Ups)
    );

    let wrong_state = ShipmentProfile::new(10.0, "NLE", "Guadalajara");
    assert_eq!(engine.select_carrier(&rules, &wrong_state, &[]), None);

    let wrong_city = ShipmentProfile::new(10.0, "JAL", "Zapopan");
    assert_eq!(engine.select_carrier(&rules, &wrong_city, &[]), None);
}

#[test]
fn inactive_high_priority_rule_falls_through_to_the_next() {
    let rules = vec![
        AutomationRule::new("disabled", 10, RuleAction::Carrier(CarrierId::Dhl)).inactive(),
        AutomationRule::new("fallback", 1, RuleAction::Carrier(CarrierId::Estafeta)),
    ];

    let selected = RuleEngine::new().select_carrier(&rules, &profile(10.0), &[]);
    assert_eq!(selected, Some(CarrierId::Estafeta));
}

#[test]
fn cost_conditions_never_match_without_quotes() {
    let conditions = RuleConditions {
        max_cost: Some(1_000.0),
        ..RuleConditions::default()
    };
    let rules = vec![
        AutomationRule::new("cheap-shipments", 1, RuleAction::Carrier(CarrierId::Dhl))
            .with_conditions(conditions),
    ];
    let engine = RuleEngine::new();

    assert_eq!(engine.select_carrier(&rules, &profile(10.0), &[]), None);

    let quotes = vec![quote(CarrierId::Dhl, 150.0, 2)];
    assert_eq!(
        engine.select_carrier(&rules, &profile(10.0), &quotes),
        Some(CarrierId::Dhl)
    );
}

#[test]
fn rules_deserialize_from_configuration_json() {
    let raw = r#"[
        {
            "name": "heavy to ups",
            "priority": 10,
            "conditions": { "min_weight_kg": 20.0 },
            "action": "ups"
        },
        {
            "name": "default cheapest",
            "priority": 1,
            "action": "cheapest"
        }
    ]"#;

    let rules: Vec<AutomationRule> = serde_json::from_str(raw).expect("valid rule config");
    assert_eq!(rules.len(), 2);
    assert!(rules[0].is_active);
    assert_eq!(rules[0].action, RuleAction::Carrier(CarrierId::Ups));
    assert_eq!(rules[1].action, RuleAction::Cheapest);

    let engine = RuleEngine::new();
    let quotes = vec![
        quote(CarrierId::Dhl, 90.0, 2),
        quote(CarrierId::Estafeta, 70.0, 4),
    ];

    // 25 kg hits the heavy rule; 5 kg falls through to the cheapest quote.
    assert_eq!(
        engine.select_carrier(&rules, &profile(25.0), &quotes),
        Some(CarrierId::Ups)
    );
    assert_eq!(
        engine.select_carrier(&rules, &profile(5.0), &quotes),
        Some(CarrierId::Estafeta)
    );
}
