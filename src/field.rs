use crate::cancel::CancelToken;
use crate::error::{ErrorContext, GppError};
use crate::lineup::Lineup;
use crate::ownership::{renormalize_to_roster, OwnershipPrediction};
use crate::slate::Slate;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Dirichlet, Distribution};
use rayon::prelude::*;
use std::collections::HashMap;

/// Candidate batch size for parallel assembly; chunk c of attempt a uses
/// an RNG seeded from (seed, a, c), so the field is seed-reproducible.
const CANDIDATE_CHUNK: usize = 1024;

#[derive(Debug, Clone)]
pub struct FieldConfig {
    pub field_size: usize,
    /// Candidates generated per requested lineup.
    pub oversample: f64,
    /// Dirichlet concentration around the renormalized ownership; each
    /// retry multiplies it (shrinking the per-driver variance).
    pub concentration: f64,
    pub max_attempts: u32,
    pub seed: u64,
}

impl Default for FieldConfig {
    fn default() -> Self {
        FieldConfig {
            field_size: 1000,
            oversample: 3.0,
            concentration: 150.0,
            max_attempts: 5,
            seed: 42,
        }
    }
}

/// Sample `field_size` roster-feasible opponent lineups whose lineup-level
/// ownership converges to the input marginals.
///
/// Dirichlet–multinomial: each candidate draws driver weights from a
/// Dirichlet centered on the renormalized ownership, then fills the roster
/// by weighted sampling without replacement under salary and stacking
/// repair. Infeasible candidates are discarded; insufficient yield shrinks
/// the ownership variance and retries, up to `max_attempts`.
pub fn sample_field(
    ownership: &[OwnershipPrediction],
    slate: &Slate,
    config: &FieldConfig,
    cancel: &CancelToken,
) -> Result<Vec<Lineup>, GppError> {
    slate.validate()?;
    let ctx = || ErrorContext::new(&slate.slate_id, "field_sampler");
    if ownership.len() != slate.len() {
        return Err(GppError::InvalidInput {
            message: format!(
                "{} ownership rows for {} drivers",
                ownership.len(),
                slate.len()
            ),
            context: ctx(),
        });
    }
    for o in ownership {
        if !o.mean.is_finite() || !(0.0..=1.0).contains(&o.mean) {
            return Err(GppError::InvalidInput {
                message: format!("driver {} ownership mean {} outside [0,1]", o.driver_id, o.mean),
                context: ctx(),
            });
        }
    }
    if config.field_size == 0 {
        return Ok(Vec::new());
    }

    let means: Vec<f64> = ownership.iter().map(|o| o.mean).collect();
    let target = renormalize_to_roster(&means, slate.rules.roster_size);
    // Drivers with zero target ownership never enter the field.
    let support: Vec<usize> = (0..slate.len()).filter(|&d| target[d] > 0.0).collect();
    if support.len() < slate.rules.roster_size as usize {
        return Err(GppError::InvalidInput {
            message: format!(
                "{} drivers with positive ownership cannot fill a roster of {}",
                support.len(),
                slate.rules.roster_size
            ),
            context: ctx(),
        });
    }

    let mut produced_best = 0usize;
    for attempt in 0..config.max_attempts {
        if cancel.is_cancelled() {
            return Err(GppError::Cancelled { context: ctx() });
        }
        let concentration = config.concentration * 4f64.powi(attempt as i32);
        let n_candidates =
            ((config.field_size as f64 * config.oversample).ceil() as usize).max(config.field_size);
        let n_chunks = n_candidates.div_ceil(CANDIDATE_CHUNK);

        let chunks: Result<Vec<Vec<Vec<usize>>>, GppError> = (0..n_chunks)
            .into_par_iter()
            .map(|c| {
                if cancel.is_cancelled() {
                    return Err(GppError::Cancelled { context: ctx() });
                }
                let lo = c * CANDIDATE_CHUNK;
                let hi = ((c + 1) * CANDIDATE_CHUNK).min(n_candidates);
                let mut rng = StdRng::seed_from_u64(
                    config.seed
                        ^ (attempt as u64 + 1).wrapping_mul(0xA5A5_5A5A)
                        ^ (c as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15),
                );
                let mut kept = Vec::new();
                for _ in lo..hi {
                    if let Some(drivers) =
                        assemble_candidate(&mut rng, slate, &target, &support, concentration)
                    {
                        kept.push(drivers);
                    }
                }
                Ok(kept)
            })
            .collect();

        let mut lineups: Vec<Lineup> = Vec::with_capacity(config.field_size);
        for chunk in chunks? {
            for drivers in chunk {
                if lineups.len() >= config.field_size {
                    break;
                }
                let lineup = Lineup::new(format!("F{:06}", lineups.len()), drivers, slate);
                // Assembly already enforced feasibility; this guards bugs.
                debug_assert!(lineup.check_feasible(slate).is_ok());
                lineups.push(lineup);
            }
        }

        if lineups.len() >= config.field_size {
            return Ok(lineups);
        }
        produced_best = produced_best.max(lineups.len());
        tracing::warn!(
            attempt,
            produced = lineups.len(),
            requested = config.field_size,
            concentration,
            "field yield short, shrinking ownership variance and retrying"
        );
    }

    Err(GppError::FieldYieldInsufficient {
        produced: produced_best,
        requested: config.field_size,
        attempts: config.max_attempts,
        context: ctx(),
    })
}

/// Empirical per-driver ownership of a sampled field: fraction of lineups
/// containing each driver.
pub fn empirical_ownership(field: &[Lineup], n_drivers: usize) -> Vec<f64> {
    let mut counts = vec![0usize; n_drivers];
    for lineup in field {
        for &d in &lineup.drivers {
            counts[d] += 1;
        }
    }
    counts
        .into_iter()
        .map(|c| c as f64 / field.len().max(1) as f64)
        .collect()
}

/// Draw one candidate roster. Returns None when the draw dead-ends
/// (salary or stacking repair leaves no eligible driver).
fn assemble_candidate(
    rng: &mut StdRng,
    slate: &Slate,
    target: &[f64],
    support: &[usize],
    concentration: f64,
) -> Option<Vec<usize>> {
    let rules = &slate.rules;
    let roster = rules.roster_size as usize;

    // Per-candidate Dirichlet weights over the support.
    let weights: Vec<f64> = if support.len() == 1 {
        vec![1.0]
    } else {
        let alpha: Vec<f64> = support
            .iter()
            .map(|&d| (concentration * target[d]).max(1e-3))
            .collect();
        Dirichlet::new(&alpha).unwrap().sample(rng)
    };
    let mut weight_by_driver = vec![0.0f64; slate.len()];
    for (i, &d) in support.iter().enumerate() {
        weight_by_driver[d] = weights[i];
    }

    let min_salary = support
        .iter()
        .map(|&d| slate.drivers[d].salary)
        .min()
        .unwrap_or(0);

    let mut chosen: Vec<usize> = Vec::with_capacity(roster);
    let mut taken = vec![false; slate.len()];
    let mut team_counts: HashMap<&str, i32> = HashMap::new();
    let mut salary_used = 0i32;

    for slot in 0..roster {
        let slots_left = (roster - slot) as i32;
        // Stacking repair: slots owed to used teams still under min_stack.
        let deficit: i32 = team_counts
            .values()
            .map(|&c| (rules.min_stack - c).max(0))
            .sum();
        if deficit > slots_left {
            return None;
        }
        let must_repair = deficit == slots_left;

        let mut cum = Vec::with_capacity(support.len());
        let mut total = 0.0;
        for &d in support {
            if taken[d] {
                continue;
            }
            let team = slate.drivers[d].team_id.as_str();
            let count = team_counts.get(team).copied().unwrap_or(0);
            if count >= rules.max_stack {
                continue;
            }
            if must_repair && count >= rules.min_stack {
                // Only deficient teams may receive this slot. A team not
                // yet used has count 0 < min_stack but adds min_stack-1
                // of new debt, which must still fit.
                continue;
            }
            if count == 0 && deficit + rules.min_stack - 1 > slots_left - 1 {
                continue;
            }
            // Leave room for the cheapest fill of the remaining slots.
            if salary_used + slate.drivers[d].salary + (slots_left - 1) * min_salary
                > rules.salary_cap
            {
                continue;
            }
            total += weight_by_driver[d];
            cum.push((total, d));
        }
        if cum.is_empty() || total <= 0.0 {
            return None;
        }
        let u = rng.gen::<f64>() * total;
        let pick = cum
            .iter()
            .find(|&&(acc, _)| u <= acc)
            .map(|&(_, d)| d)
            .unwrap_or(cum[cum.len() - 1].1);

        taken[pick] = true;
        chosen.push(pick);
        salary_used += slate.drivers[pick].salary;
        *team_counts
            .entry(slate.drivers[pick].team_id.as_str())
            .or_insert(0) += 1;
    }

    // Final stacking sanity (min_stack may still be owed on bad paths).
    if team_counts
        .values()
        .any(|&c| c < rules.min_stack || c > rules.max_stack)
    {
        return None;
    }
    Some(chosen)
}
