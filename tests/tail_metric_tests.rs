use approx::assert_relative_eq;
use gpp_sim::tail;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

#[test]
fn upper_cvar_matches_the_normal_analytic_value() {
    // L ~ Normal(100, 20); upper-tail CVaR at alpha = 0.05 is
    // mu + sigma * phi(z) / alpha with z = Phi^-1(0.95).
    let mut rng = StdRng::seed_from_u64(42);
    let normal = Normal::new(100.0, 20.0).unwrap();
    let scores: Vec<f64> = (0..10_000).map(|_| normal.sample(&mut rng)).collect();

    let z = 1.6448536269514722_f64;
    let phi = (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt();
    let analytic = 100.0 + 20.0 * phi / 0.05;

    let cvar = tail::upper_cvar(&scores, 0.05);
    assert!(
        ((cvar - analytic) / analytic).abs() < 0.02,
        "empirical {:.3} vs analytic {:.3}",
        cvar,
        analytic
    );
}

#[test]
fn cvar_at_alpha_one_is_the_mean() {
    let scores: Vec<f64> = (0..1000).map(|i| (i % 37) as f64 * 1.7).collect();
    assert_relative_eq!(
        tail::upper_cvar(&scores, 1.0),
        tail::mean(&scores),
        epsilon = 1e-9
    );
}

#[test]
fn cvar_shrinks_as_alpha_grows() {
    let mut rng = StdRng::seed_from_u64(7);
    let normal = Normal::new(50.0, 10.0).unwrap();
    let scores: Vec<f64> = (0..5000).map(|_| normal.sample(&mut rng)).collect();

    let tight = tail::upper_cvar(&scores, 0.01);
    let wide = tail::upper_cvar(&scores, 0.25);
    let mean = tail::mean(&scores);
    assert!(tight > wide && wide > mean);
}

#[test]
fn value_at_risk_bounds_the_tail() {
    let scores: Vec<f64> = (0..1000).map(|i| i as f64).collect();
    // Top 10% of 0..999 starts at 900.
    assert_relative_eq!(tail::value_at_risk(&scores, 0.1), 900.0, epsilon = 1e-9);
    assert_relative_eq!(tail::upper_cvar(&scores, 0.1), 949.5, epsilon = 1e-9);
}

#[test]
fn top_x_prob_counts_the_threshold_inclusive() {
    let scores = vec![1.0, 2.0, 3.0, 4.0];
    assert_relative_eq!(tail::top_x_prob(&scores, 3.0), 0.5, epsilon = 1e-12);
    assert_relative_eq!(tail::top_x_prob(&scores, 5.0), 0.0, epsilon = 1e-12);
    assert_relative_eq!(tail::top_x_prob(&scores, 0.0), 1.0, epsilon = 1e-12);
}

#[test]
fn conditional_upside_includes_every_scenario_at_the_quantile() {
    // Heavy ties at the quantile: conditional upside averages all of them.
    let scores = vec![10.0, 10.0, 10.0, 10.0, 20.0];
    let upside = tail::conditional_upside(&scores, 0.4);
    // q_{0.6} = 10, so the conditioning set is the whole vector.
    assert_relative_eq!(upside, 12.0, epsilon = 1e-9);
    assert!(upside <= tail::upper_cvar(&scores, 0.4) + 1e-9);
}

#[test]
fn tie_breaks_are_deterministic_by_scenario_index() {
    let scores = vec![5.0; 64];
    assert_relative_eq!(tail::upper_cvar(&scores, 0.25), 5.0, epsilon = 1e-12);
    assert_relative_eq!(tail::value_at_risk(&scores, 0.25), 5.0, epsilon = 1e-12);
}

#[test]
fn lineup_scores_reduce_across_the_roster_row() {
    use gpp_sim::scenario::ScenarioMatrix;
    // 3 scenarios × 4 drivers with distinct, easily summed points.
    let matrix = ScenarioMatrix::from_points(
        3,
        4,
        vec![
            1.0, 2.0, 3.0, 4.0, //
            10.0, 20.0, 30.0, 40.0, //
            5.0, 5.0, 5.0, 5.0,
        ],
    );
    let mut buf = Vec::new();
    tail::lineup_scores(&matrix, &[0, 3], &mut buf);
    assert_eq!(buf, vec![5.0, 50.0, 10.0]);

    tail::lineup_scores_subset(&matrix, &[0, 3], &[1, 2], &mut buf);
    assert_eq!(buf, vec![50.0, 10.0]);
    assert_relative_eq!(tail::upper_cvar(&buf, 0.5), 50.0, epsilon = 1e-12);
}

#[test]
fn chunked_sum_agrees_with_plain_sum() {
    let values: Vec<f64> = (0..5000).map(|i| (i as f64).sin()).collect();
    let plain: f64 = values.iter().sum();
    assert_relative_eq!(tail::chunked_sum(&values), plain, epsilon = 1e-9);
    assert_relative_eq!(
        tail::chunked_sum_by(values.len(), |i| values[i]),
        plain,
        epsilon = 1e-9
    );
}
