use crate::cancel::CancelToken;
use crate::error::{ErrorContext, GppError};
use crate::field::{sample_field, FieldConfig};
use crate::lineup::Portfolio;
use crate::ownership::OwnershipPrediction;
use crate::payout::{CurveModel, PayoutCurve, PayoutTier};
use crate::scenario::ScenarioMatrix;
use crate::tail;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Where the contest's payout curve comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PayoutSource {
    /// Historical (rank, payout) pairs to fit.
    Historical(Vec<(i32, f64)>),
    /// Explicit curve parameters, no fit.
    Explicit {
        model: CurveModel,
        a: f64,
        b: f64,
        paid_cutoff: i32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contest {
    pub contest_id: String,
    pub entry_fee: f64,
    /// Advertised total entries; selects the payout tier.
    pub field_size: usize,
    pub payout_source: PayoutSource,
}

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Opponent lineups actually sampled (may be below the advertised
    /// field for tractability; ranks are computed in-sample).
    pub field_size: usize,
    /// Scenario draws used; 0 or ≥ N means every scenario.
    pub n_simulations: usize,
    pub tier_override: Option<PayoutTier>,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            field_size: 1000,
            n_simulations: 0,
            tier_override: None,
            seed: 42,
        }
    }
}

/// A point estimate with its Monte-Carlo confidence interval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricCi {
    pub value: f64,
    pub ci_low: f64,
    pub ci_high: f64,
}

impl MetricCi {
    fn from_samples(samples: &[f64]) -> MetricCi {
        let m = tail::mean(samples);
        let half = 1.96 * tail::stddev(samples) / (samples.len().max(1) as f64).sqrt();
        MetricCi {
            value: m,
            ci_low: m - half,
            ci_high: m + half,
        }
    }

    fn from_rate(p: f64, n: usize) -> MetricCi {
        let half = 1.96 * (p * (1.0 - p) / n.max(1) as f64).sqrt();
        MetricCi {
            value: p,
            ci_low: (p - half).max(0.0),
            ci_high: (p + half).min(1.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryOutcome {
    pub lineup_id: String,
    pub mean_rank: f64,
    pub mean_payout: f64,
    pub roi: MetricCi,
    pub cash_rate: MetricCi,
    pub top1_rate: MetricCi,
    pub payout_p05: f64,
    pub payout_p95: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContestResult {
    pub entries: Vec<EntryOutcome>,
    /// ROI of the whole portfolio (total payout against total fees).
    pub portfolio_roi: MetricCi,
    /// Fraction of (scenario, entry) pairs that cashed.
    pub cash_rate: MetricCi,
    /// Probability at least one entry lands in the top 1% of entrants.
    pub top1_rate: MetricCi,
    pub n_scenarios: usize,
    pub field_size: usize,
    pub tier: PayoutTier,
}

/// Run the Monte-Carlo contest: score my portfolio against a sampled
/// field in every scenario, rank with (score desc, lineup-id lex asc)
/// tie-breaks, pay out via the curve, and aggregate ROI / Cash% / Top-1%
/// with confidence intervals.
pub fn simulate_contest(
    my: &Portfolio,
    contest: &Contest,
    slate: &crate::slate::Slate,
    scenarios: &ScenarioMatrix,
    ownership: &[OwnershipPrediction],
    config: &SimulationConfig,
    cancel: &CancelToken,
) -> Result<ContestResult, GppError> {
    let ctx = || ErrorContext::new(&slate.slate_id, "contest_simulator");
    if my.is_empty() {
        return Err(GppError::InvalidInput {
            message: "portfolio has no lineups".into(),
            context: ctx(),
        });
    }
    if contest.entry_fee <= 0.0 || !contest.entry_fee.is_finite() {
        return Err(GppError::InvalidInput {
            message: format!("entry fee {} must be positive", contest.entry_fee),
            context: ctx(),
        });
    }
    if scenarios.d != slate.len() {
        return Err(GppError::InvalidInput {
            message: format!(
                "scenario matrix has {} drivers, slate has {}",
                scenarios.d,
                slate.len()
            ),
            context: ctx(),
        });
    }
    for lineup in &my.lineups {
        if let Err(e) = lineup.check_feasible(slate) {
            return Err(GppError::InvalidInput {
                message: e,
                context: ctx(),
            });
        }
    }

    let tier = config
        .tier_override
        .unwrap_or_else(|| PayoutTier::from_field_size(contest.field_size));
    let curve = match &contest.payout_source {
        PayoutSource::Historical(points) => PayoutCurve::fit(points, tier)?,
        PayoutSource::Explicit {
            model,
            a,
            b,
            paid_cutoff,
        } => PayoutCurve::from_params(*model, *a, *b, tier, *paid_cutoff),
    };

    let field = sample_field(
        ownership,
        slate,
        &FieldConfig {
            field_size: config.field_size,
            seed: config.seed,
            ..FieldConfig::default()
        },
        cancel,
    )?;

    let subset = scenario_subset(scenarios.n, config.n_simulations, config.seed);
    let s_used = subset.len();
    let m = my.lineups.len();
    let total_entries = m + field.len();
    let top1_cut = ((total_entries as f64 * 0.01).ceil() as i32).max(1);

    // Entry order: mine first, then the field. Ids break score ties.
    let rosters: Vec<&[usize]> = my
        .lineups
        .iter()
        .chain(field.iter())
        .map(|l| l.drivers.as_slice())
        .collect();
    let ids: Vec<&str> = my
        .lineups
        .iter()
        .chain(field.iter())
        .map(|l| l.id.as_str())
        .collect();

    // Pre-allocated (S × entries) score buffer, filled scenario-major.
    let mut scores = vec![0.0f64; s_used * total_entries];
    scores
        .par_chunks_mut(total_entries)
        .zip(subset.par_iter())
        .for_each(|(row, &s)| {
            let points = scenarios.row(s);
            for (e, roster) in rosters.iter().enumerate() {
                row[e] = roster.iter().map(|&d| points[d]).sum();
            }
        });

    if cancel.is_cancelled() {
        return Err(GppError::Cancelled { context: ctx() });
    }

    // Per scenario: rank every entry, keep my entries' (rank, payout).
    let per_scenario: Vec<Vec<(i32, f64)>> = (0..s_used)
        .into_par_iter()
        .map(|si| {
            let row = &scores[si * total_entries..(si + 1) * total_entries];
            let mut order: Vec<usize> = (0..total_entries).collect();
            order.sort_by(|&a, &b| {
                row[b]
                    .partial_cmp(&row[a])
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(ids[a].cmp(ids[b]))
            });
            let mut rank_of = vec![0i32; total_entries];
            for (pos, &e) in order.iter().enumerate() {
                rank_of[e] = pos as i32 + 1;
            }
            (0..m)
                .map(|e| {
                    let rank = rank_of[e];
                    (rank, curve.predict(rank))
                })
                .collect()
        })
        .collect();

    // Aggregate per entry across scenarios, in index order.
    let fee = contest.entry_fee;
    let mut entries = Vec::with_capacity(m);
    for e in 0..m {
        let ranks: Vec<f64> = per_scenario.iter().map(|s| s[e].0 as f64).collect();
        let payouts: Vec<f64> = per_scenario.iter().map(|s| s[e].1).collect();
        let rois: Vec<f64> = payouts.iter().map(|p| (p - fee) / fee).collect();
        let cash = tail::top_x_prob(&payouts, f64::MIN_POSITIVE);
        let top1 = ranks.iter().filter(|&&r| r as i32 <= top1_cut).count() as f64 / s_used as f64;

        let mut sorted_payouts = payouts.clone();
        sorted_payouts.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let p05 = sorted_payouts[((0.05 * (s_used - 1) as f64).floor() as usize).min(s_used - 1)];
        let p95 = sorted_payouts[((0.95 * (s_used - 1) as f64).ceil() as usize).min(s_used - 1)];

        entries.push(EntryOutcome {
            lineup_id: my.lineups[e].id.clone(),
            mean_rank: tail::mean(&ranks),
            mean_payout: tail::mean(&payouts),
            roi: MetricCi::from_samples(&rois),
            cash_rate: MetricCi::from_rate(cash, s_used),
            top1_rate: MetricCi::from_rate(top1, s_used),
            payout_p05: p05,
            payout_p95: p95,
        });
    }

    let portfolio_rois: Vec<f64> = (0..s_used)
        .map(|si| {
            let total: f64 = per_scenario[si].iter().map(|&(_, p)| p).sum();
            (total - m as f64 * fee) / (m as f64 * fee)
        })
        .collect();
    let cashed_pairs: f64 = per_scenario
        .iter()
        .flat_map(|s| s.iter())
        .filter(|&&(_, p)| p > 0.0)
        .count() as f64;
    let any_top1 = per_scenario
        .iter()
        .filter(|s| s.iter().any(|&(r, _)| r <= top1_cut))
        .count() as f64
        / s_used as f64;

    Ok(ContestResult {
        entries,
        portfolio_roi: MetricCi::from_samples(&portfolio_rois),
        cash_rate: MetricCi::from_rate(cashed_pairs / (s_used * m) as f64, s_used * m),
        top1_rate: MetricCi::from_rate(any_top1, s_used),
        n_scenarios: s_used,
        field_size: field.len(),
        tier,
    })
}

/// Stable scenario subsample: all indices when n_simulations covers the
/// matrix, otherwise a seeded without-replacement draw, sorted so
/// downstream folds stay in index order.
fn scenario_subset(n: usize, n_simulations: usize, seed: u64) -> Vec<usize> {
    if n_simulations == 0 || n_simulations >= n {
        return (0..n).collect();
    }
    let mut rng = StdRng::seed_from_u64(seed ^ 0x5CE9_A810);
    let mut pool: Vec<usize> = (0..n).collect();
    for i in 0..n_simulations {
        let j = rng.gen_range(i..n);
        pool.swap(i, j);
    }
    let mut subset = pool[..n_simulations].to_vec();
    subset.sort_unstable();
    subset
}
