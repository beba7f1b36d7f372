use crate::cancel::CancelToken;
use crate::constraint::ConstraintSpec;
use crate::error::{ErrorContext, GppError};
use crate::regime::{track_mixing_weights, RaceRegime, N_REGIMES};
use crate::slate::Slate;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Gamma, Normal};
use rayon::prelude::*;

/// Fixed chunk size for parallel generation and deterministic reductions.
/// Scenario s lives in chunk s / SCENARIO_CHUNK regardless of core count.
pub const SCENARIO_CHUNK: usize = 1024;

/// Resampling budget per scenario slot before giving up.
pub const MAX_RESAMPLE_ATTEMPTS: u32 = 16;

// ═══════════════════════════════════════════════════════════════════════
// DraftKings NASCAR scoring
// ═══════════════════════════════════════════════════════════════════════

pub const LAP_LED_POINTS: f64 = 0.25;
pub const FASTEST_LAP_POINTS: f64 = 0.45;
pub const PLACE_DIFF_POINTS: f64 = 1.0;

/// Finishing-position points: 45 for the win, then 42 down to 1 for 43rd.
pub fn finish_points(position: i32) -> f64 {
    if position <= 1 {
        45.0
    } else if position <= 43 {
        (44 - position) as f64
    } else {
        0.0
    }
}

pub fn driver_points(start: i32, finish: i32, laps_led: u32, fastest_laps: u32) -> f64 {
    finish_points(finish)
        + PLACE_DIFF_POINTS * (start - finish) as f64
        + LAP_LED_POINTS * laps_led as f64
        + FASTEST_LAP_POINTS * fastest_laps as f64
}

// ═══════════════════════════════════════════════════════════════════════
// Causal network parameters
// ═══════════════════════════════════════════════════════════════════════

/// Slate-level knobs of the causal Bayesian network. Regime-conditional
/// parameters live on [`RaceRegime::params`]; these scale them.
#[derive(Debug, Clone)]
pub struct CbnParams {
    /// Baseline per-driver incident probability before regime/attr scaling.
    pub base_incident_rate: f64,
    /// Noise stddev on the qualifying rating ([0,1] skill scale).
    pub qualifying_noise: f64,
    /// Multiplier on every regime's laps-led budget fraction. Values above
    /// ~1.1 make the proposal overdraw the race length often enough that
    /// the veto path does real work.
    pub lap_budget_scale: f64,
    /// Fastest-lap fraction of laps led is drawn uniformly from this range.
    pub fastest_lap_frac: (f64, f64),
}

impl Default for CbnParams {
    fn default() -> Self {
        CbnParams {
            base_incident_rate: 0.10,
            qualifying_noise: 0.10,
            lap_budget_scale: 1.0,
            fastest_lap_frac: (0.3, 0.9),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub n_scenarios: usize,
    pub seed: u64,
    pub cbn: CbnParams,
}

impl GeneratorConfig {
    pub fn new(n_scenarios: usize, seed: u64) -> Self {
        GeneratorConfig {
            n_scenarios,
            seed,
            cbn: CbnParams::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Scenario draw and matrix
// ═══════════════════════════════════════════════════════════════════════

/// One candidate race outcome, before scoring. This is what the constraint
/// spec's veto predicates inspect.
#[derive(Debug, Clone)]
pub struct ScenarioDraw {
    pub regime: RaceRegime,
    pub start: Vec<i32>,
    pub finish: Vec<i32>,
    pub laps_led: Vec<u32>,
    pub fastest_laps: Vec<u32>,
    pub incident: Vec<bool>,
    pub dominator: Vec<bool>,
}

/// Veto/rejection bookkeeping, summed deterministically across chunks.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectionCounters {
    pub laps_led_budget: u64,
    pub max_dominators: u64,
    pub fastest_laps_bound: u64,
}

impl RejectionCounters {
    pub fn total(&self) -> u64 {
        self.laps_led_budget + self.max_dominators + self.fastest_laps_bound
    }

    fn record(&mut self, predicate: &'static str) {
        match predicate {
            "laps_led_budget" => self.laps_led_budget += 1,
            "max_dominators" => self.max_dominators += 1,
            _ => self.fastest_laps_bound += 1,
        }
    }

    fn merge(&mut self, other: &RejectionCounters) {
        self.laps_led_budget += other.laps_led_budget;
        self.max_dominators += other.max_dominators;
        self.fastest_laps_bound += other.fastest_laps_bound;
    }
}

/// N coherent scenarios for D drivers, row-major (scenario-major): the hot
/// reductions walk a scenario row across drivers, then fold across
/// scenarios in index order.
#[derive(Debug, Clone)]
pub struct ScenarioMatrix {
    pub n: usize,
    pub d: usize,
    points: Vec<f64>,
    pub regimes: Vec<RaceRegime>,
    pub finish: Vec<i32>,
    pub laps_led: Vec<u32>,
    pub dominator: Vec<bool>,
    pub rejections: RejectionCounters,
}

impl ScenarioMatrix {
    pub fn row(&self, s: usize) -> &[f64] {
        &self.points[s * self.d..(s + 1) * self.d]
    }

    pub fn points(&self, s: usize, d: usize) -> f64 {
        self.points[s * self.d + d]
    }

    /// Score of a lineup (driver indices) in scenario s.
    pub fn lineup_score(&self, s: usize, drivers: &[usize]) -> f64 {
        let row = self.row(s);
        drivers.iter().map(|&d| row[d]).sum()
    }

    /// Marginal mean points of one driver across all scenarios.
    pub fn driver_mean_points(&self, d: usize) -> f64 {
        let sum = crate::tail::chunked_sum_by(self.n, |s| self.points(s, d));
        sum / self.n as f64
    }

    pub fn regime_histogram(&self) -> [usize; N_REGIMES] {
        let mut hist = [0usize; N_REGIMES];
        for r in &self.regimes {
            hist[r.index()] += 1;
        }
        hist
    }

    /// Stable scenario indices belonging to one regime.
    pub fn regime_indices(&self, regime: RaceRegime) -> Vec<usize> {
        (0..self.n).filter(|&s| self.regimes[s] == regime).collect()
    }

    /// Build a matrix directly from a points table. Regime labels default
    /// to Parity, outcome columns to zero. Intended for synthetic inputs
    /// (tests, analytic checks), not for production generation.
    pub fn from_points(n: usize, d: usize, points: Vec<f64>) -> ScenarioMatrix {
        assert_eq!(points.len(), n * d, "points table must be n*d");
        ScenarioMatrix {
            n,
            d,
            points,
            regimes: vec![RaceRegime::Parity; n],
            finish: vec![0; n * d],
            laps_led: vec![0; n * d],
            dominator: vec![false; n * d],
            rejections: RejectionCounters::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Generation
// ═══════════════════════════════════════════════════════════════════════

struct ChunkOutput {
    points: Vec<f64>,
    regimes: Vec<RaceRegime>,
    finish: Vec<i32>,
    laps_led: Vec<u32>,
    dominator: Vec<bool>,
    counters: RejectionCounters,
}

/// Generate N coherent scenarios honoring the constraint spec.
///
/// Parallel over fixed chunks; each chunk owns an RNG seeded from
/// (seed, chunk index), so results are bit-identical for any core count.
pub fn generate(
    slate: &Slate,
    spec: &ConstraintSpec,
    config: &GeneratorConfig,
    cancel: &CancelToken,
) -> Result<ScenarioMatrix, GppError> {
    slate.validate()?;
    spec.check_driver_bounds(slate)?;
    let ctx = || ErrorContext::new(&slate.slate_id, "scenario_generator");
    if config.n_scenarios == 0 {
        return Err(GppError::InvalidInput {
            message: "n_scenarios must be positive".into(),
            context: ctx(),
        });
    }

    let n = config.n_scenarios;
    let d = slate.len();
    let weights = track_mixing_weights(slate.track);
    let n_chunks = n.div_ceil(SCENARIO_CHUNK);

    let chunks: Result<Vec<ChunkOutput>, GppError> = (0..n_chunks)
        .into_par_iter()
        .map(|c| {
            if cancel.is_cancelled() {
                return Err(GppError::Cancelled { context: ctx() });
            }
            let lo = c * SCENARIO_CHUNK;
            let hi = ((c + 1) * SCENARIO_CHUNK).min(n);
            let mut rng = chunk_rng(config.seed, c as u64);
            let mut out = ChunkOutput {
                points: Vec::with_capacity((hi - lo) * d),
                regimes: Vec::with_capacity(hi - lo),
                finish: Vec::with_capacity((hi - lo) * d),
                laps_led: Vec::with_capacity((hi - lo) * d),
                dominator: Vec::with_capacity((hi - lo) * d),
                counters: RejectionCounters::default(),
            };
            for _s in lo..hi {
                if cancel.is_cancelled() {
                    return Err(GppError::Cancelled { context: ctx() });
                }
                let (draw, counters) =
                    draw_accepted(&mut rng, slate, spec, &config.cbn, &weights).map_err(
                        |(predicate, attempts)| GppError::InfeasibleScenarioBudget {
                            predicate,
                            attempts,
                            context: ctx(),
                        },
                    )?;
                out.counters.merge(&counters);
                out.regimes.push(draw.regime);
                for i in 0..d {
                    out.points.push(driver_points(
                        draw.start[i],
                        draw.finish[i],
                        draw.laps_led[i],
                        draw.fastest_laps[i],
                    ));
                }
                out.finish.extend_from_slice(&draw.finish);
                out.laps_led.extend_from_slice(&draw.laps_led);
                out.dominator.extend_from_slice(&draw.dominator);
            }
            Ok(out)
        })
        .collect();
    let chunks = chunks?;

    let mut matrix = ScenarioMatrix {
        n,
        d,
        points: Vec::with_capacity(n * d),
        regimes: Vec::with_capacity(n),
        finish: Vec::with_capacity(n * d),
        laps_led: Vec::with_capacity(n * d),
        dominator: Vec::with_capacity(n * d),
        rejections: RejectionCounters::default(),
    };
    for chunk in &chunks {
        matrix.points.extend_from_slice(&chunk.points);
        matrix.regimes.extend_from_slice(&chunk.regimes);
        matrix.finish.extend_from_slice(&chunk.finish);
        matrix.laps_led.extend_from_slice(&chunk.laps_led);
        matrix.dominator.extend_from_slice(&chunk.dominator);
        matrix.rejections.merge(&chunk.counters);
    }

    // Retained scenarios must respect conservation; a violation here is a
    // generator bug, not a user error.
    for s in 0..n {
        let total: u64 = matrix.laps_led[s * d..(s + 1) * d]
            .iter()
            .map(|&l| l as u64)
            .sum();
        if total > spec.race_length as u64 {
            return Err(GppError::Internal {
                detail: format!(
                    "scenario {} retained with {} laps led over budget {}",
                    s, total, spec.race_length
                ),
                context: ctx(),
            });
        }
    }

    let hist = matrix.regime_histogram();
    tracing::info!(
        slate = %slate.slate_id,
        n_scenarios = n,
        dominator = hist[0],
        chaos = hist[1],
        fuel_mileage = hist[2],
        parity = hist[3],
        rejected = matrix.rejections.total(),
        "scenario generation complete"
    );

    Ok(matrix)
}

fn chunk_rng(seed: u64, chunk: u64) -> StdRng {
    StdRng::seed_from_u64(seed ^ (chunk.wrapping_add(1)).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Draw one feasible scenario, resampling up to the budget. On success
/// returns the draw plus the rejections it burned.
fn draw_accepted(
    rng: &mut StdRng,
    slate: &Slate,
    spec: &ConstraintSpec,
    cbn: &CbnParams,
    weights: &[f64; N_REGIMES],
) -> Result<(ScenarioDraw, RejectionCounters), (&'static str, u32)> {
    let mut counters = RejectionCounters::default();
    let mut last_predicate = "laps_led_budget";
    for _attempt in 0..MAX_RESAMPLE_ATTEMPTS {
        let draw = draw_scenario(rng, slate, spec, cbn, weights);
        match spec.veto(&draw) {
            None => return Ok((draw, counters)),
            Some(predicate) => {
                counters.record(predicate);
                last_predicate = predicate;
            }
        }
    }
    Err((last_predicate, MAX_RESAMPLE_ATTEMPTS))
}

/// One pass through the causal network: regime, qualifying, incidents,
/// finish order, laps led, fastest laps.
fn draw_scenario(
    rng: &mut StdRng,
    slate: &Slate,
    spec: &ConstraintSpec,
    cbn: &CbnParams,
    weights: &[f64; N_REGIMES],
) -> ScenarioDraw {
    let d = slate.len();
    let regime = sample_regime(rng, weights);
    let rp = regime.params();

    // Qualifying: skill plus positional edge plus noise.
    let qual_noise = Normal::new(0.0, cbn.qualifying_noise).unwrap();
    let qual: Vec<f64> = slate
        .drivers
        .iter()
        .map(|drv| drv.attrs.skill + 0.5 * drv.attrs.realpolitik_pos + qual_noise.sample(rng))
        .collect();
    let start = rank_descending(&qual);

    // Incidents.
    let incident: Vec<bool> = slate
        .drivers
        .iter()
        .map(|drv| {
            let exposure = 0.7 * drv.attrs.shadow_risk + 0.3 * drv.attrs.aggression;
            let p = (cbn.base_incident_rate * rp.incident_mult * (0.4 + 0.6 * exposure))
                .clamp(0.0, 0.95);
            rng.gen::<f64>() < p
        })
        .collect();

    // Finish rating: an incident drops the car out of contention.
    let finish_noise = Normal::new(0.0, rp.finish_sigma).unwrap();
    let rating: Vec<f64> = slate
        .drivers
        .iter()
        .enumerate()
        .map(|(i, drv)| {
            let base = drv.attrs.skill + 0.3 * drv.attrs.realpolitik_pos;
            let crash_penalty = if incident[i] { 2.0 } else { 0.0 };
            base + finish_noise.sample(rng) - crash_penalty
        })
        .collect();
    let finish = rank_descending(&rating);

    // Laps led: Gamma allocation tilted toward skill, normalized against
    // the expected total. The proposal occasionally overdraws the race
    // length; the veto rejects those draws.
    let mut lead_weight = vec![0.0f64; d];
    let mut weight_sum = 0.0;
    for (i, drv) in slate.drivers.iter().enumerate() {
        let mut w = (rp.led_skill_sharpness * (drv.attrs.skill + 0.3 * drv.attrs.aggression)).exp();
        if start[i] <= 5 {
            w *= 1.5;
        }
        if incident[i] {
            w *= 0.2;
        }
        lead_weight[i] = w;
        weight_sum += w;
    }
    let shape_scale = rp.lap_concentration * d as f64 / weight_sum;
    let mut shapes = vec![0.0f64; d];
    let mut shape_sum = 0.0;
    for i in 0..d {
        shapes[i] = (lead_weight[i] * shape_scale).max(1e-3);
        shape_sum += shapes[i];
    }
    let budget = spec.race_length as f64 * rp.lap_budget_frac * cbn.lap_budget_scale;
    let mut laps_led = vec![0u32; d];
    for i in 0..d {
        let raw = Gamma::new(shapes[i], 1.0).unwrap().sample(rng);
        laps_led[i] = (budget * raw / shape_sum).floor() as u32;
    }

    // Fastest laps come out of a driver's own led laps.
    let (lo, hi) = cbn.fastest_lap_frac;
    let fastest_laps: Vec<u32> = laps_led
        .iter()
        .map(|&l| ((l as f64) * rng.gen_range(lo..hi)).floor() as u32)
        .collect();

    let dominator: Vec<bool> = laps_led
        .iter()
        .map(|&l| l >= spec.dominator_lap_threshold)
        .collect();

    ScenarioDraw {
        regime,
        start,
        finish,
        laps_led,
        fastest_laps,
        incident,
        dominator,
    }
}

fn sample_regime(rng: &mut StdRng, weights: &[f64; N_REGIMES]) -> RaceRegime {
    let total: f64 = weights.iter().sum();
    let mut u = rng.gen::<f64>() * total;
    for (i, w) in weights.iter().enumerate() {
        u -= w;
        if u <= 0.0 {
            return RaceRegime::from_index(i).unwrap();
        }
    }
    RaceRegime::Parity
}

/// 1-based ranks, highest value first; ties resolved by lower index.
fn rank_descending(values: &[f64]) -> Vec<i32> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        values[b]
            .partial_cmp(&values[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    let mut ranks = vec![0i32; values.len()];
    for (pos, &i) in order.iter().enumerate() {
        ranks[i] = pos as i32 + 1;
    }
    ranks
}

/// Archetype-prior mean points per driver: the deterministic rank-by-rating
/// finish plus the expected laps-led share, averaged over the track's
/// regime mix. Generated marginals track this within a wide band (the
/// finish table is convex in rank, so noise moves means by several
/// points); checks that lean on it should use well-separated skills.
pub fn prior_mean_points(slate: &Slate, spec: &ConstraintSpec) -> Vec<f64> {
    let d = slate.len();
    let weights = track_mixing_weights(slate.track);
    let rating: Vec<f64> = slate
        .drivers
        .iter()
        .map(|drv| drv.attrs.skill + 0.3 * drv.attrs.realpolitik_pos)
        .collect();
    let rank = rank_descending(&rating);

    let mut prior = vec![0.0f64; d];
    for (ri, regime) in RaceRegime::all().iter().enumerate() {
        let rp = regime.params();
        let mut lead_weight = vec![0.0f64; d];
        let mut weight_sum = 0.0;
        for (i, drv) in slate.drivers.iter().enumerate() {
            let mut w =
                (rp.led_skill_sharpness * (drv.attrs.skill + 0.3 * drv.attrs.aggression)).exp();
            if rank[i] <= 5 {
                w *= 1.5;
            }
            lead_weight[i] = w;
            weight_sum += w;
        }
        let budget = spec.race_length as f64 * rp.lap_budget_frac;
        for i in 0..d {
            let laps = budget * lead_weight[i] / weight_sum;
            let fastest = laps * 0.6;
            prior[i] += weights[ri]
                * (finish_points(rank[i]) + LAP_LED_POINTS * laps + FASTEST_LAP_POINTS * fastest);
        }
    }
    prior
}
