use crate::cancel::CancelToken;
use crate::constraint::ConstraintSpec;
use crate::error::{ErrorContext, GppError};
use crate::lineup::{Portfolio, RegimeShortfall};
use crate::optimizer::{solve_lineup, LineupRequest, Objective, SolverConfig};
use crate::ownership::OwnershipPrediction;
use crate::regime::RaceRegime;
use crate::scenario::ScenarioMatrix;
use crate::slate::Slate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LowOwnershipRule {
    pub count: usize,
    pub threshold: f64,
}

/// Portfolio request configuration (operation 3 of the public surface).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeConfig {
    pub n_lineups: usize,
    /// Upper-tail level. 1.0 degenerates to the mean objective.
    pub alpha: f64,
    /// Leverage penalty weight λ on Σ own² · x.
    pub lambda_ownership: f64,
    /// Minimum driver difference between any two portfolio lineups.
    pub min_diff: usize,
    /// Clip lineup scores at this value inside the tail objective.
    pub cvar_threshold: Option<f64>,
    pub max_total_ownership: Option<f64>,
    pub max_ownership_per_driver: Option<f64>,
    pub min_low_ownership_drivers: Option<LowOwnershipRule>,
    /// Overrides the slate's (min_stack, max_stack) when set.
    pub team_stack: Option<(i32, i32)>,
    /// Regime → utility weight. Slots go as P(regime) · utility; absent
    /// regimes default to utility 1, so omitting the map allocates by
    /// regime probability alone. None disables regime awareness.
    pub regime_allocation: Option<Vec<(RaceRegime, f64)>>,
    pub solver_timeout_sec: f64,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        OptimizeConfig {
            n_lineups: 20,
            alpha: 0.10,
            lambda_ownership: 0.0,
            min_diff: 2,
            cvar_threshold: None,
            max_total_ownership: None,
            max_ownership_per_driver: None,
            min_low_ownership_drivers: None,
            team_stack: None,
            regime_allocation: None,
            solver_timeout_sec: 30.0,
        }
    }
}

/// One allocation bucket: a regime (or the global bucket) with its
/// scenario subset and slot count.
struct Bucket {
    regime: Option<RaceRegime>,
    indices: Option<Vec<usize>>,
    slots: usize,
}

/// Generate a diversified, tail-optimal portfolio.
///
/// Repeatedly invokes the lineup MILP under a driver-difference constraint
/// against everything already accepted. With regime allocation, slots are
/// split k_r ∝ P(regime) · utility_r and each bucket's tail objective sees
/// only its regime's scenarios. A bucket that runs out of feasible novel
/// lineups records a shortfall and the run continues; cancellation returns
/// the partial portfolio marked cancelled.
pub fn optimize_with_leverage(
    slate: &Slate,
    spec: &ConstraintSpec,
    scenarios: &ScenarioMatrix,
    ownership: &[OwnershipPrediction],
    config: &OptimizeConfig,
    cancel: &CancelToken,
) -> Result<Portfolio, GppError> {
    slate.validate()?;
    let ctx = || ErrorContext::new(&slate.slate_id, "portfolio_generator");
    if config.n_lineups == 0 {
        return Err(GppError::InvalidInput {
            message: "n_lineups must be positive".into(),
            context: ctx(),
        });
    }
    if !(config.alpha > 0.0 && config.alpha <= 1.0) {
        return Err(GppError::InvalidInput {
            message: format!("alpha {} outside (0, 1]", config.alpha),
            context: ctx(),
        });
    }
    if config.lambda_ownership < 0.0 {
        return Err(GppError::InvalidInput {
            message: format!("lambda_ownership {} must be ≥ 0", config.lambda_ownership),
            context: ctx(),
        });
    }
    if !ownership.is_empty() && ownership.len() != slate.len() {
        return Err(GppError::InvalidInput {
            message: format!(
                "{} ownership rows for {} drivers",
                ownership.len(),
                slate.len()
            ),
            context: ctx(),
        });
    }

    // Team-stack override rides on a local copy of the slate rules.
    let mut slate_local = slate.clone();
    if let Some((min_stack, max_stack)) = config.team_stack {
        slate_local.rules.min_stack = min_stack;
        slate_local.rules.max_stack = max_stack;
        let n_teams = slate_local.team_index().len() as i32;
        let roster = slate_local.rules.roster_size;
        let ok = (1..=n_teams)
            .any(|k| k * min_stack.max(1) <= roster && roster <= k * max_stack);
        if min_stack > max_stack || !ok {
            return Err(GppError::SpecCompile {
                reason: format!(
                    "team_stack override [{}, {}] cannot partition roster {}",
                    min_stack, max_stack, roster
                ),
            });
        }
    }
    let slate = &slate_local;

    let means: Vec<f64> = ownership.iter().map(|o| o.mean).collect();
    let use_ownership = !means.is_empty();

    let buckets = build_buckets(scenarios, config);
    for b in &buckets {
        tracing::info!(
            regime = b.regime.map(|r| r.name()).unwrap_or("all"),
            scenarios = b.indices.as_ref().map(|i| i.len()).unwrap_or(scenarios.n),
            slots = b.slots,
            "portfolio allocation bucket"
        );
    }

    let solver = SolverConfig {
        timeout_sec: config.solver_timeout_sec,
    };
    let mut portfolio = Portfolio::default();

    'buckets: for bucket in &buckets {
        let mut produced = 0usize;
        for _ in 0..bucket.slots {
            let id = format!("L{:03}", portfolio.lineups.len());
            let req = LineupRequest {
                objective: Objective::UpperTailCvar {
                    alpha: config.alpha,
                    threshold: config.cvar_threshold,
                },
                scenario_subset: bucket.indices.as_deref(),
                ownership_means: if use_ownership { Some(&means) } else { None },
                lambda_ownership: if use_ownership {
                    config.lambda_ownership
                } else {
                    0.0
                },
                forced: &[],
                excluded: &[],
                prior_lineups: &portfolio.lineups,
                min_diff: config.min_diff,
                max_total_ownership: config.max_total_ownership,
                max_ownership_per_driver: config.max_ownership_per_driver,
                min_low_ownership: config
                    .min_low_ownership_drivers
                    .map(|r| (r.count, r.threshold)),
            };
            match solve_lineup(slate, spec, scenarios, &req, &solver, cancel, &id) {
                Ok(mut lineup) => {
                    lineup.regime = bucket.regime;
                    portfolio.lineups.push(lineup);
                    produced += 1;
                }
                Err(GppError::InfeasibleLineup { detail, .. }) => {
                    tracing::warn!(
                        regime = bucket.regime.map(|r| r.name()).unwrap_or("all"),
                        produced,
                        requested = bucket.slots,
                        detail = %detail,
                        "regime ran out of feasible novel lineups"
                    );
                    portfolio.shortfalls.push(RegimeShortfall {
                        regime: bucket.regime,
                        requested: bucket.slots,
                        produced,
                        reason: format!("infeasible: {}", detail),
                    });
                    continue 'buckets;
                }
                Err(GppError::Cancelled { .. }) => {
                    portfolio.cancelled = true;
                    if produced < bucket.slots {
                        portfolio.shortfalls.push(RegimeShortfall {
                            regime: bucket.regime,
                            requested: bucket.slots,
                            produced,
                            reason: "cancelled".into(),
                        });
                    }
                    return Ok(portfolio);
                }
                Err(GppError::SolverTimeout { budget_sec, .. }) => {
                    // Best incumbent: everything accepted so far.
                    portfolio.shortfalls.push(RegimeShortfall {
                        regime: bucket.regime,
                        requested: bucket.slots,
                        produced,
                        reason: format!("solver timeout after {:.1}s", budget_sec),
                    });
                    return Ok(portfolio);
                }
                Err(e) => return Err(e),
            }
        }
    }

    Ok(portfolio)
}

/// Slot allocation. Without regime awareness: one global bucket. With it:
/// k_r ∝ P(regime) · utility_r by largest remainder, regimes with no
/// scenarios recorded as shortfalls by the caller via empty buckets.
fn build_buckets(scenarios: &ScenarioMatrix, config: &OptimizeConfig) -> Vec<Bucket> {
    let allocation = match &config.regime_allocation {
        None => {
            return vec![Bucket {
                regime: None,
                indices: None,
                slots: config.n_lineups,
            }]
        }
        Some(a) => a,
    };

    let hist = scenarios.regime_histogram();
    let n = scenarios.n as f64;
    let utility = |r: RaceRegime| {
        allocation
            .iter()
            .find(|(ar, _)| *ar == r)
            .map(|(_, w)| *w)
            .unwrap_or(1.0)
    };

    let mut scores: Vec<(RaceRegime, f64)> = RaceRegime::all()
        .into_iter()
        .map(|r| (r, hist[r.index()] as f64 / n * utility(r)))
        .collect();
    let total: f64 = scores.iter().map(|(_, s)| s).sum();
    if total <= 0.0 {
        scores = vec![(RaceRegime::Parity, 1.0)];
    }
    let total: f64 = scores.iter().map(|(_, s)| s).sum();

    // Largest-remainder rounding to exactly n_lineups slots.
    let quotas: Vec<f64> = scores
        .iter()
        .map(|(_, s)| config.n_lineups as f64 * s / total)
        .collect();
    let mut slots: Vec<usize> = quotas.iter().map(|q| q.floor() as usize).collect();
    let mut leftover = config.n_lineups - slots.iter().sum::<usize>();
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        let fa = quotas[a] - quotas[a].floor();
        let fb = quotas[b] - quotas[b].floor();
        fb.partial_cmp(&fa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    for &i in &order {
        if leftover == 0 {
            break;
        }
        slots[i] += 1;
        leftover -= 1;
    }

    scores
        .iter()
        .zip(slots.iter())
        .filter(|(_, &k)| k > 0)
        .map(|((r, _), &k)| Bucket {
            regime: Some(*r),
            indices: Some(scenarios.regime_indices(*r)),
            slots: k,
        })
        .collect()
}
