use gpp_sim::cancel::CancelToken;
use gpp_sim::error::GppError;
use gpp_sim::field::{empirical_ownership, sample_field, FieldConfig};
use gpp_sim::ownership::OwnershipPrediction;
use gpp_sim::slate::{ArchetypeAttrs, Driver, RosterRules, Slate, TrackArchetype};

fn driver(id: &str, team: &str, salary: i32) -> Driver {
    Driver {
        driver_id: id.to_string(),
        salary,
        team_id: team.to_string(),
        attrs: ArchetypeAttrs {
            skill: 0.5,
            aggression: 0.5,
            shadow_risk: 0.3,
            realpolitik_pos: 0.5,
        },
        proj_points: 35.0,
        proj_stddev: 10.0,
    }
}

fn ownership(means: &[f64]) -> Vec<OwnershipPrediction> {
    means
        .iter()
        .enumerate()
        .map(|(i, &m)| OwnershipPrediction {
            driver_id: format!("D{:02}", i),
            mean: m,
            p05: (m - 0.02).max(0.0),
            p95: (m + 0.02).min(1.0),
        })
        .collect()
}

fn four_driver_slate() -> Slate {
    Slate {
        slate_id: "field-4".to_string(),
        drivers: (0..4)
            .map(|i| driver(&format!("D{:02}", i), "T0", 5000))
            .collect(),
        rules: RosterRules {
            roster_size: 2,
            salary_cap: 20_000,
            min_stack: 0,
            max_stack: 2,
        },
        track: TrackArchetype::Intermediate,
    }
}

#[test]
fn zero_ownership_drivers_never_enter_the_field() {
    let slate = four_driver_slate();
    let own = ownership(&[0.5, 0.5, 0.0, 0.0]);
    let config = FieldConfig {
        field_size: 2000,
        seed: 42,
        ..FieldConfig::default()
    };
    let field = sample_field(&own, &slate, &config, &CancelToken::new()).expect("field");
    assert_eq!(field.len(), 2000);

    // Renormalized ownership is [1, 1, 0, 0]: every lineup is {D00, D01}.
    let emp = empirical_ownership(&field, slate.len());
    assert_eq!(emp, vec![1.0, 1.0, 0.0, 0.0]);
}

#[test]
fn empirical_ownership_converges_to_the_marginals() {
    let slate = four_driver_slate();
    // Already sums to the roster size; no renormalization distortion.
    let own = ownership(&[0.5, 0.5, 0.5, 0.5]);
    let config = FieldConfig {
        field_size: 10_000,
        seed: 42,
        ..FieldConfig::default()
    };
    let field = sample_field(&own, &slate, &config, &CancelToken::new()).expect("field");
    assert_eq!(field.len(), 10_000);

    let emp = empirical_ownership(&field, slate.len());
    for (d, &e) in emp.iter().enumerate() {
        assert!(
            (e - 0.5).abs() < 0.02,
            "driver {} empirical ownership {:.4} off target 0.5",
            d,
            e
        );
    }
}

#[test]
fn skewed_ownership_preserves_the_ordering() {
    let slate = Slate {
        slate_id: "field-6".to_string(),
        drivers: (0..6)
            .map(|i| driver(&format!("D{:02}", i), "T0", 5000))
            .collect(),
        rules: RosterRules {
            roster_size: 2,
            salary_cap: 20_000,
            min_stack: 0,
            max_stack: 2,
        },
        track: TrackArchetype::Intermediate,
    };
    let own = ownership(&[0.45, 0.30, 0.15, 0.05, 0.03, 0.02]);
    let config = FieldConfig {
        field_size: 4000,
        seed: 7,
        ..FieldConfig::default()
    };
    let field = sample_field(&own, &slate, &config, &CancelToken::new()).expect("field");
    let emp = empirical_ownership(&field, slate.len());
    for w in emp.windows(2) {
        assert!(w[0] >= w[1] - 0.02, "ownership ordering inverted: {:?}", emp);
    }
}

#[test]
fn every_field_lineup_is_roster_feasible() {
    // Two teams of five with 2-3 stacking: lineups must come out 3+3.
    let slate = Slate {
        slate_id: "field-stack".to_string(),
        drivers: (0..10)
            .map(|i| {
                driver(
                    &format!("D{:02}", i),
                    if i < 5 { "RED" } else { "BLUE" },
                    4000 + 500 * (i as i32 % 5),
                )
            })
            .collect(),
        rules: RosterRules::default(),
        track: TrackArchetype::ShortTrack,
    };
    let own = ownership(&[0.6, 0.6, 0.6, 0.6, 0.6, 0.6, 0.6, 0.6, 0.6, 0.6]);
    let config = FieldConfig {
        field_size: 500,
        seed: 42,
        ..FieldConfig::default()
    };
    let field = sample_field(&own, &slate, &config, &CancelToken::new()).expect("field");
    assert_eq!(field.len(), 500);
    for lineup in &field {
        lineup.check_feasible(&slate).expect("feasible lineup");
    }
}

#[test]
fn sampling_is_deterministic_for_a_seed() {
    let slate = four_driver_slate();
    let own = ownership(&[0.6, 0.6, 0.5, 0.3]);
    let config = FieldConfig {
        field_size: 300,
        seed: 11,
        ..FieldConfig::default()
    };
    let a = sample_field(&own, &slate, &config, &CancelToken::new()).expect("field");
    let b = sample_field(&own, &slate, &config, &CancelToken::new()).expect("field");
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b.iter()) {
        assert_eq!(x.drivers, y.drivers);
    }
}

#[test]
fn impossible_salaries_exhaust_the_retry_budget() {
    let slate = Slate {
        slate_id: "field-broke".to_string(),
        drivers: (0..4)
            .map(|i| driver(&format!("D{:02}", i), "T0", 30_000))
            .collect(),
        rules: RosterRules {
            roster_size: 2,
            salary_cap: 50_000,
            min_stack: 0,
            max_stack: 2,
        },
        track: TrackArchetype::Intermediate,
    };
    let own = ownership(&[0.5, 0.5, 0.5, 0.5]);
    let config = FieldConfig {
        field_size: 50,
        seed: 42,
        ..FieldConfig::default()
    };
    match sample_field(&own, &slate, &config, &CancelToken::new()) {
        Err(GppError::FieldYieldInsufficient {
            produced,
            requested,
            attempts,
            ..
        }) => {
            assert_eq!(produced, 0);
            assert_eq!(requested, 50);
            assert_eq!(attempts, 5);
        }
        other => panic!("expected FieldYieldInsufficient, got {:?}", other.map(|f| f.len())),
    }
}

#[test]
fn mismatched_ownership_rows_are_invalid_input() {
    let slate = four_driver_slate();
    let own = ownership(&[0.5, 0.5]);
    match sample_field(&own, &slate, &FieldConfig::default(), &CancelToken::new()) {
        Err(GppError::InvalidInput { .. }) => {}
        other => panic!("expected InvalidInput, got {:?}", other.map(|f| f.len())),
    }
}
