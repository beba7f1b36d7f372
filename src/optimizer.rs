use crate::cancel::CancelToken;
use crate::constraint::{ConstraintOp, ConstraintSpec};
use crate::error::{ErrorContext, GppError};
use crate::lineup::Lineup;
use crate::scenario::ScenarioMatrix;
use crate::slate::Slate;

use good_lp::{
    constraint, default_solver, variable, variables, Expression, ResolutionError, Solution,
    SolverModel, Variable,
};
use std::time::Instant;

/// Per-solve solver settings.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Wall-clock budget per lineup, seconds. The backend has no mid-solve
    /// callbacks, so the budget is enforced at solve boundaries: a solve
    /// that returns late with a solution is kept (with a warning); a solve
    /// that fails late reports a timeout.
    pub timeout_sec: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig { timeout_sec: 30.0 }
    }
}

/// What the lineup should maximize.
#[derive(Debug, Clone, Copy)]
pub enum Objective {
    /// Rockafellar–Uryasev upper-tail CVaR at level α; an optional
    /// threshold clips scores so one runaway scenario cannot dominate.
    UpperTailCvar { alpha: f64, threshold: Option<f64> },
    /// Mean points across scenarios (reference baseline).
    MeanPoints,
}

/// One lineup request against a fixed scenario matrix.
#[derive(Debug, Clone)]
pub struct LineupRequest<'a> {
    pub objective: Objective,
    /// Restrict the objective to these stable scenario indices
    /// (regime-aware portfolios); None = all scenarios.
    pub scenario_subset: Option<&'a [usize]>,
    /// Mean ownership per driver, for the leverage penalty/constraints.
    pub ownership_means: Option<&'a [f64]>,
    /// Penalty weight λ on Σ own² · x.
    pub lambda_ownership: f64,
    pub forced: &'a [usize],
    pub excluded: &'a [usize],
    /// Accepted lineups the new one must differ from.
    pub prior_lineups: &'a [Lineup],
    /// Minimum driver difference against every prior lineup.
    pub min_diff: usize,
    pub max_total_ownership: Option<f64>,
    pub max_ownership_per_driver: Option<f64>,
    /// At least `count` drivers below `threshold` ownership.
    pub min_low_ownership: Option<(usize, f64)>,
}

impl<'a> LineupRequest<'a> {
    pub fn new(objective: Objective) -> Self {
        LineupRequest {
            objective,
            scenario_subset: None,
            ownership_means: None,
            lambda_ownership: 0.0,
            forced: &[],
            excluded: &[],
            prior_lineups: &[],
            min_diff: 0,
            max_total_ownership: None,
            max_ownership_per_driver: None,
            min_low_ownership: None,
        }
    }
}

/// Solve one lineup MILP.
///
/// Binary x_d per driver, binary y_t per team (stack indicators), and for
/// the CVaR objective a free VaR variable η plus one slack z_s ≥ 0 per
/// scenario:
///
///   maximize  η − (1/(α·n)) Σ z_s − λ Σ own_d² x_d
///   s.t.      z_s ≥ η − Σ_d points[s,d] x_d
///
/// plus the constraint spec's linear rows, stacking, forced/excluded sets,
/// diversity against prior lineups, and the leverage cardinality rules.
pub fn solve_lineup(
    slate: &Slate,
    spec: &ConstraintSpec,
    scenarios: &ScenarioMatrix,
    req: &LineupRequest,
    solver: &SolverConfig,
    cancel: &CancelToken,
    lineup_id: &str,
) -> Result<Lineup, GppError> {
    let ctx = || ErrorContext::new(&slate.slate_id, "tail_optimizer");
    if cancel.is_cancelled() {
        return Err(GppError::Cancelled { context: ctx() });
    }
    if let Objective::UpperTailCvar { alpha, .. } = req.objective {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(GppError::InvalidInput {
                message: format!("alpha {} outside (0, 1]", alpha),
                context: ctx(),
            });
        }
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
    if req.lambda_ownership > 0.0 && req.ownership_means.is_none() {
        return Err(GppError::InvalidInput {
            message: "ownership penalty requested without ownership means".into(),
            context: ctx(),
        });
    }

    let d = slate.len();
    let all_indices: Vec<usize>;
    let subset: &[usize] = match req.scenario_subset {
        Some(s) => s,
        None => {
            all_indices = (0..scenarios.n).collect();
            &all_indices
        }
    };
    if subset.is_empty() {
        return Err(GppError::InfeasibleLineup {
            detail: "empty scenario subset".into(),
            context: ctx(),
        });
    }

    let mut vars = variables!();
    let x: Vec<Variable> = (0..d).map(|_| vars.add(variable().binary())).collect();

    // Team stack indicators.
    let teams = slate.team_index();
    let mut team_list: Vec<(&str, &Vec<usize>)> = teams.iter().map(|(t, m)| (*t, m)).collect();
    team_list.sort_by_key(|(t, _)| *t);
    let y: Vec<Variable> = team_list
        .iter()
        .map(|_| vars.add(variable().binary()))
        .collect();

    // Objective.
    let mut objective = Expression::from(0.0);
    let mut cvar_aux: Option<(Variable, Vec<Variable>, Option<f64>)> = None;
    match req.objective {
        Objective::MeanPoints => {
            let n = subset.len() as f64;
            for (i, &xv) in x.iter().enumerate() {
                let mean_i =
                    crate::tail::chunked_sum_by(subset.len(), |k| scenarios.points(subset[k], i))
                        / n;
                objective += mean_i * xv;
            }
        }
        Objective::UpperTailCvar { alpha, threshold } => {
            let eta = vars.add(variable());
            let z: Vec<Variable> = subset
                .iter()
                .map(|_| vars.add(variable().min(0.0)))
                .collect();
            objective += eta;
            let scale = -1.0 / (alpha * subset.len() as f64);
            for &zv in &z {
                objective += scale * zv;
            }
            cvar_aux = Some((eta, z, threshold));
        }
    }
    if req.lambda_ownership > 0.0 {
        let own = req.ownership_means.unwrap();
        for (i, &xv) in x.iter().enumerate() {
            objective += -req.lambda_ownership * own[i] * own[i] * xv;
        }
    }

    let mut model = vars.maximise(objective).using(default_solver);

    // CVaR slack rows: z_s ≥ η − L_s(x), and z_s ≥ η − T when clipped.
    if let Some((eta, z, threshold)) = &cvar_aux {
        for (k, &s) in subset.iter().enumerate() {
            let points = scenarios.row(s);
            let mut lhs = Expression::from(z[k]);
            lhs += -1.0 * *eta;
            for (i, &xv) in x.iter().enumerate() {
                lhs += points[i] * xv;
            }
            model = model.with(constraint!(lhs >= 0.0));
            if let Some(t) = *threshold {
                model = model.with(constraint!(z[k] - *eta >= -t));
            }
        }
    }

    // Compiled linear membership rows (roster size, salary cap, extras).
    for lc in spec.linear_constraints() {
        let mut lhs = Expression::from(0.0);
        for (i, &coef) in lc.coeffs.iter().enumerate() {
            if coef != 0.0 {
                lhs += coef * x[i];
            }
        }
        model = match lc.op {
            ConstraintOp::Le => model.with(constraint!(lhs <= lc.rhs)),
            ConstraintOp::Ge => model.with(constraint!(lhs >= lc.rhs)),
            ConstraintOp::Eq => model.with(constraint!(lhs == lc.rhs)),
        };
    }

    // Stacking: a used team carries between min_stack and max_stack drivers.
    for ((_, members), &yv) in team_list.iter().zip(y.iter()) {
        let mut count = Expression::from(0.0);
        for &i in members.iter() {
            count += x[i];
        }
        model = model.with(constraint!(
            count.clone() <= slate.rules.max_stack as f64 * yv
        ));
        model = model.with(constraint!(count >= slate.rules.min_stack as f64 * yv));
    }

    // Forced / excluded sets.
    for &i in req.forced {
        model = model.with(constraint!(x[i] == 1.0));
    }
    for &i in req.excluded {
        model = model.with(constraint!(x[i] == 0.0));
    }

    // Diversity: overlap with each prior lineup at most roster − min_diff.
    if req.min_diff > 0 {
        let max_overlap = (slate.rules.roster_size as usize).saturating_sub(req.min_diff) as f64;
        for prior in req.prior_lineups {
            let mut overlap = Expression::from(0.0);
            for &i in &prior.drivers {
                overlap += x[i];
            }
            model = model.with(constraint!(overlap <= max_overlap));
        }
    }

    // Leverage cardinality rules.
    if let Some(own) = req.ownership_means {
        if let Some(cap) = req.max_total_ownership {
            let mut total = Expression::from(0.0);
            for (i, &xv) in x.iter().enumerate() {
                total += own[i] * xv;
            }
            model = model.with(constraint!(total <= cap));
        }
        if let Some(cap) = req.max_ownership_per_driver {
            for (i, &xv) in x.iter().enumerate() {
                if own[i] > cap {
                    model = model.with(constraint!(xv == 0.0));
                }
            }
        }
        if let Some((count, threshold)) = req.min_low_ownership {
            let mut low = Expression::from(0.0);
            for (i, &xv) in x.iter().enumerate() {
                if own[i] < threshold {
                    low += xv;
                }
            }
            model = model.with(constraint!(low >= count as f64));
        }
    }

    let started = Instant::now();
    let solved = model.solve();
    let elapsed = started.elapsed().as_secs_f64();

    let solution = match solved {
        Ok(s) => {
            if elapsed > solver.timeout_sec {
                tracing::warn!(
                    elapsed_sec = elapsed,
                    budget_sec = solver.timeout_sec,
                    lineup = lineup_id,
                    "solve exceeded budget but produced an incumbent; keeping it"
                );
            }
            s
        }
        Err(ResolutionError::Infeasible) => {
            return Err(GppError::InfeasibleLineup {
                detail: format!(
                    "{} priors at min_diff {}, {} forced, {} excluded",
                    req.prior_lineups.len(),
                    req.min_diff,
                    req.forced.len(),
                    req.excluded.len()
                ),
                context: ctx(),
            });
        }
        Err(e) => {
            if elapsed > solver.timeout_sec {
                return Err(GppError::SolverTimeout {
                    budget_sec: solver.timeout_sec,
                    context: ctx(),
                });
            }
            return Err(GppError::Internal {
                detail: format!("solver failure: {:?}", e),
                context: ctx(),
            });
        }
    };

    let drivers: Vec<usize> = (0..d).filter(|&i| solution.value(x[i]) > 0.5).collect();
    if drivers.len() != slate.rules.roster_size as usize {
        return Err(GppError::Internal {
            detail: format!(
                "solver returned {} drivers for roster {}",
                drivers.len(),
                slate.rules.roster_size
            ),
            context: ctx(),
        });
    }
    Ok(Lineup::new(lineup_id, drivers, slate))
}
