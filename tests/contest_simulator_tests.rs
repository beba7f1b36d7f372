use approx::assert_relative_eq;
use gpp_sim::cancel::CancelToken;
use gpp_sim::contest::{simulate_contest, Contest, PayoutSource, SimulationConfig};
use gpp_sim::lineup::{Lineup, Portfolio};
use gpp_sim::ownership::OwnershipPrediction;
use gpp_sim::payout::CurveModel;
use gpp_sim::scenario::ScenarioMatrix;
use gpp_sim::slate::{ArchetypeAttrs, Driver, RosterRules, Slate, TrackArchetype};

fn driver(id: &str, salary: i32) -> Driver {
    Driver {
        driver_id: id.to_string(),
        salary,
        team_id: "T0".to_string(),
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

/// Six drivers, one team, roster of two, no stacking pressure.
fn test_slate() -> Slate {
    Slate {
        slate_id: "contest-test".to_string(),
        drivers: (0..6).map(|i| driver(&format!("D{:02}", i), 5000)).collect(),
        rules: RosterRules {
            roster_size: 2,
            salary_cap: 20_000,
            min_stack: 0,
            max_stack: 2,
        },
        track: TrackArchetype::Intermediate,
    }
}

fn uniform_ownership(slate: &Slate, mean: f64) -> Vec<OwnershipPrediction> {
    slate
        .drivers
        .iter()
        .map(|d| OwnershipPrediction {
            driver_id: d.driver_id.clone(),
            mean,
            p05: mean,
            p95: mean,
        })
        .collect()
}

/// Drivers 0 and 1 always outscore the rest by a mile.
fn dominant_matrix(n: usize) -> ScenarioMatrix {
    let mut points = Vec::with_capacity(n * 6);
    for s in 0..n {
        let wobble = (s % 7) as f64;
        points.extend_from_slice(&[
            200.0 + wobble,
            180.0,
            10.0,
            9.0,
            8.0,
            7.0,
        ]);
    }
    ScenarioMatrix::from_points(n, 6, points)
}

fn winner_take_most_contest() -> Contest {
    Contest {
        contest_id: "wtm".to_string(),
        entry_fee: 20.0,
        field_size: 4000,
        payout_source: PayoutSource::Explicit {
            model: CurveModel::PowerLaw,
            a: 100.0,
            b: 1.0,
            paid_cutoff: 3,
        },
    }
}

#[test]
fn an_unbeatable_lineup_wins_every_scenario() {
    let slate = test_slate();
    let matrix = dominant_matrix(400);
    let my = Portfolio {
        lineups: vec![Lineup::new("A-hero", vec![0, 1], &slate)],
        ..Portfolio::default()
    };
    let ownership = uniform_ownership(&slate, 2.0 / 6.0);
    let config = SimulationConfig {
        field_size: 100,
        seed: 42,
        ..SimulationConfig::default()
    };

    let result = simulate_contest(
        &my,
        &winner_take_most_contest(),
        &slate,
        &matrix,
        &ownership,
        &config,
        &CancelToken::new(),
    )
    .expect("simulate");

    assert_eq!(result.n_scenarios, 400);
    assert_eq!(result.field_size, 100);
    let entry = &result.entries[0];
    assert_relative_eq!(entry.mean_rank, 1.0, epsilon = 1e-12);
    // Rank 1 pays a = 100 against a $20 fee: ROI = 4 exactly, every scenario.
    assert_relative_eq!(entry.roi.value, 4.0, epsilon = 1e-9);
    assert_relative_eq!(entry.roi.ci_low, 4.0, epsilon = 1e-9);
    assert_relative_eq!(entry.cash_rate.value, 1.0, epsilon = 1e-12);
    assert_relative_eq!(result.top1_rate.value, 1.0, epsilon = 1e-12);
    assert_relative_eq!(entry.payout_p05, 100.0, epsilon = 1e-9);
    assert_relative_eq!(entry.payout_p95, 100.0, epsilon = 1e-9);
}

#[test]
fn ties_break_by_lineup_id_lexicographically() {
    let slate = test_slate();
    let matrix = dominant_matrix(100);
    // Identical rosters; only the ids differ. "A..." sorts before "B...",
    // and both sort before every field id "F...".
    let my = Portfolio {
        lineups: vec![
            Lineup::new("A-twin", vec![0, 1], &slate),
            Lineup::new("B-twin", vec![0, 1], &slate),
        ],
        ..Portfolio::default()
    };
    let ownership = uniform_ownership(&slate, 2.0 / 6.0);
    let config = SimulationConfig {
        field_size: 50,
        seed: 7,
        ..SimulationConfig::default()
    };

    let result = simulate_contest(
        &my,
        &winner_take_most_contest(),
        &slate,
        &matrix,
        &ownership,
        &config,
        &CancelToken::new(),
    )
    .expect("simulate");

    assert_relative_eq!(result.entries[0].mean_rank, 1.0, epsilon = 1e-12);
    assert_relative_eq!(result.entries[1].mean_rank, 2.0, epsilon = 1e-12);
    // Rank 2 pays 100 / 2 = 50 under the power-law curve.
    assert_relative_eq!(result.entries[1].mean_payout, 50.0, epsilon = 1e-9);
}

#[test]
fn hopeless_lineup_never_cashes() {
    let slate = test_slate();
    let matrix = dominant_matrix(300);
    // Bottom two drivers; the sampled field of top-heavy lineups buries it.
    let my = Portfolio {
        lineups: vec![Lineup::new("A-dud", vec![4, 5], &slate)],
        ..Portfolio::default()
    };
    // Field concentrates on the dominant pair.
    let mut ownership = uniform_ownership(&slate, 0.05);
    ownership[0].mean = 0.95;
    ownership[1].mean = 0.95;
    let config = SimulationConfig {
        field_size: 200,
        seed: 42,
        ..SimulationConfig::default()
    };

    let result = simulate_contest(
        &my,
        &winner_take_most_contest(),
        &slate,
        &matrix,
        &ownership,
        &config,
        &CancelToken::new(),
    )
    .expect("simulate");

    let entry = &result.entries[0];
    assert!(entry.mean_rank > 3.0, "mean rank {}", entry.mean_rank);
    assert_relative_eq!(entry.cash_rate.value, 0.0, epsilon = 1e-12);
    assert_relative_eq!(entry.roi.value, -1.0, epsilon = 1e-9);
}

#[test]
fn scenario_subsampling_is_stable_and_sized() {
    let slate = test_slate();
    let matrix = dominant_matrix(500);
    let my = Portfolio {
        lineups: vec![Lineup::new("A-hero", vec![0, 1], &slate)],
        ..Portfolio::default()
    };
    let ownership = uniform_ownership(&slate, 2.0 / 6.0);
    let config = SimulationConfig {
        field_size: 50,
        n_simulations: 120,
        seed: 42,
        ..SimulationConfig::default()
    };

    let a = simulate_contest(
        &my,
        &winner_take_most_contest(),
        &slate,
        &matrix,
        &ownership,
        &config,
        &CancelToken::new(),
    )
    .expect("simulate");
    let b = simulate_contest(
        &my,
        &winner_take_most_contest(),
        &slate,
        &matrix,
        &ownership,
        &config,
        &CancelToken::new(),
    )
    .expect("simulate");

    assert_eq!(a.n_scenarios, 120);
    assert_relative_eq!(a.portfolio_roi.value, b.portfolio_roi.value, epsilon = 1e-12);
    assert_relative_eq!(a.cash_rate.value, b.cash_rate.value, epsilon = 1e-12);
}

#[test]
fn historical_payouts_flow_through_the_fitted_curve() {
    let slate = test_slate();
    let matrix = dominant_matrix(200);
    let my = Portfolio {
        lineups: vec![Lineup::new("A-hero", vec![0, 1], &slate)],
        ..Portfolio::default()
    };
    let ownership = uniform_ownership(&slate, 2.0 / 6.0);
    let points: Vec<(i32, f64)> = (1..=20).map(|r| (r, 500.0 * (r as f64).powf(-0.8))).collect();
    let contest = Contest {
        contest_id: "hist".to_string(),
        entry_fee: 10.0,
        field_size: 1000,
        payout_source: PayoutSource::Historical(points),
    };
    let config = SimulationConfig {
        field_size: 100,
        seed: 42,
        ..SimulationConfig::default()
    };

    let result = simulate_contest(
        &my,
        &contest,
        &slate,
        &matrix,
        &ownership,
        &config,
        &CancelToken::new(),
    )
    .expect("simulate");

    // Permanent rank 1 on a power-law curve recovered from its own samples.
    assert_relative_eq!(result.entries[0].mean_payout, 500.0, epsilon = 0.5);
    assert_eq!(result.tier, gpp_sim::payout::PayoutTier::Small);
}

#[test]
fn empty_portfolio_is_invalid_input() {
    let slate = test_slate();
    let matrix = dominant_matrix(50);
    let ownership = uniform_ownership(&slate, 2.0 / 6.0);
    match simulate_contest(
        &Portfolio::default(),
        &winner_take_most_contest(),
        &slate,
        &matrix,
        &ownership,
        &SimulationConfig::default(),
        &CancelToken::new(),
    ) {
        Err(gpp_sim::error::GppError::InvalidInput { .. }) => {}
        other => panic!(
            "expected InvalidInput, got {:?}",
            other.map(|r| r.entries.len())
        ),
    }
}

#[test]
fn infeasible_my_lineup_is_rejected_up_front() {
    let slate = test_slate();
    let matrix = dominant_matrix(50);
    let ownership = uniform_ownership(&slate, 2.0 / 6.0);
    // Hand-built over-cap lineup.
    let my = Portfolio {
        lineups: vec![Lineup {
            id: "A-fat".to_string(),
            drivers: vec![0, 1, 2],
            salary: 15_000,
            regime: None,
        }],
        ..Portfolio::default()
    };
    match simulate_contest(
        &my,
        &winner_take_most_contest(),
        &slate,
        &matrix,
        &ownership,
        &SimulationConfig::default(),
        &CancelToken::new(),
    ) {
        Err(gpp_sim::error::GppError::InvalidInput { .. }) => {}
        other => panic!(
            "expected InvalidInput, got {:?}",
            other.map(|r| r.entries.len())
        ),
    }
}
