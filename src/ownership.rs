use crate::error::GppError;
use crate::slate::{Slate, TrackArchetype};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Point ownership plus bootstrap uncertainty band for one driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipPrediction {
    pub driver_id: String,
    pub mean: f64,
    pub p05: f64,
    pub p95: f64,
}

/// One historical observation: a driver's ownership in a past contest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceRecord {
    pub driver_id: String,
    pub track: TrackArchetype,
    /// Recency order; higher = more recent.
    pub race_index: u32,
    pub salary: i32,
    pub skill: f64,
    pub proj_points: f64,
    /// Observed ownership fraction in [0,1].
    pub ownership: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TrainingSet {
    pub records: Vec<RaceRecord>,
}

impl TrainingSet {
    pub fn validate(&self) -> Result<(), String> {
        for r in &self.records {
            if !(0.0..=1.0).contains(&r.ownership) || !r.ownership.is_finite() {
                return Err(format!(
                    "record for {} has ownership {} outside [0,1]",
                    r.driver_id, r.ownership
                ));
            }
            if r.salary <= 0 || !r.proj_points.is_finite() || !r.skill.is_finite() {
                return Err(format!("record for {} is malformed", r.driver_id));
            }
        }
        Ok(())
    }

    /// Load history from CSV with columns:
    /// driver_id,track,race_index,salary,skill,proj_points,ownership
    pub fn from_csv(path: &Path) -> Result<TrainingSet, Box<dyn std::error::Error>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for record in rdr.records() {
            let r = record?;
            let track = TrackArchetype::parse(r[1].trim())
                .ok_or_else(|| format!("unknown track archetype '{}'", &r[1]))?;
            records.push(RaceRecord {
                driver_id: r[0].to_string(),
                track,
                race_index: r[2].trim().parse()?,
                salary: r[3].trim().parse()?,
                skill: r[4].trim().parse()?,
                proj_points: r[5].trim().parse()?,
                ownership: r[6].trim().parse()?,
            });
        }
        Ok(TrainingSet { records })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecayKind {
    None,
    Linear,
    Exponential,
}

impl DecayKind {
    pub fn parse(s: &str) -> Option<DecayKind> {
        match s {
            "none" => Some(DecayKind::None),
            "linear" => Some(DecayKind::Linear),
            "exponential" => Some(DecayKind::Exponential),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombineMethod {
    Voting,
    Stacking,
}

pub const BASE_NAMES: [&str; 4] = ["historical", "value", "salary_skill", "recent_form"];

#[derive(Debug, Clone)]
pub struct EnsembleConfig {
    pub method: CombineMethod,
    /// Per-base voting weights by name; unnamed bases weigh 1.0.
    pub weights: HashMap<String, f64>,
    pub bootstrap_samples: usize,
    pub decay: DecayKind,
    /// Recent-form window K (races).
    pub recent_window: usize,
    pub seed: u64,
    /// Mean base spread above this triggers a disagreement warning.
    pub disagreement_warn_spread: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        EnsembleConfig {
            method: CombineMethod::Voting,
            weights: HashMap::new(),
            bootstrap_samples: 100,
            decay: DecayKind::Exponential,
            recent_window: 5,
            seed: 42,
            disagreement_warn_spread: 0.15,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Prediction input — one driver-context either from history or the slate
// ═══════════════════════════════════════════════════════════════════════

struct PredInput<'a> {
    driver_id: &'a str,
    track: TrackArchetype,
    salary: i32,
    skill: f64,
    value_score: f64,
}

impl<'a> PredInput<'a> {
    fn from_record(r: &'a RaceRecord) -> Self {
        PredInput {
            driver_id: &r.driver_id,
            track: r.track,
            salary: r.salary,
            skill: r.skill,
            value_score: value_score(r.proj_points, r.salary),
        }
    }
}

/// Projected points per $1k of salary.
fn value_score(proj_points: f64, salary: i32) -> f64 {
    proj_points / (salary as f64 / 1000.0)
}

// ═══════════════════════════════════════════════════════════════════════
// Base estimators — tagged variant over the four known kinds
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum FittedBase {
    /// Mean ownership per (driver, track archetype), falling back to the
    /// driver mean, then the overall mean.
    Historical {
        by_driver_track: HashMap<(String, TrackArchetype), f64>,
        by_driver: HashMap<String, f64>,
        global: f64,
    },
    /// Linear model on value_score = proj_points / salary.
    Value { intercept: f64, slope: f64 },
    /// Regression forest over (salary, skill).
    SalarySkill { forest: RegressionForest },
    /// Decay-weighted rolling mean over the last K races.
    RecentForm {
        by_driver: HashMap<String, f64>,
        global: f64,
    },
}

impl FittedBase {
    fn name(&self) -> &'static str {
        match self {
            FittedBase::Historical { .. } => "historical",
            FittedBase::Value { .. } => "value",
            FittedBase::SalarySkill { .. } => "salary_skill",
            FittedBase::RecentForm { .. } => "recent_form",
        }
    }

    fn predict(&self, input: &PredInput) -> f64 {
        let raw = match self {
            FittedBase::Historical {
                by_driver_track,
                by_driver,
                global,
            } => by_driver_track
                .get(&(input.driver_id.to_string(), input.track))
                .or_else(|| by_driver.get(input.driver_id))
                .copied()
                .unwrap_or(*global),
            FittedBase::Value { intercept, slope } => intercept + slope * input.value_score,
            FittedBase::SalarySkill { forest } => {
                forest.predict(input.salary as f64, input.skill)
            }
            FittedBase::RecentForm { by_driver, global } => by_driver
                .get(input.driver_id)
                .copied()
                .unwrap_or(*global),
        };
        raw.clamp(0.0, 1.0)
    }
}

/// Fit one base kind. None means the base's inputs are missing and its
/// weight is redistributed to the others.
fn fit_base(
    kind: usize,
    records: &[RaceRecord],
    config: &EnsembleConfig,
    rng: &mut StdRng,
) -> Option<FittedBase> {
    if records.is_empty() {
        return None;
    }
    match kind {
        0 => {
            let mut dt: HashMap<(String, TrackArchetype), (f64, u32)> = HashMap::new();
            let mut d: HashMap<String, (f64, u32)> = HashMap::new();
            let mut total = 0.0;
            for r in records {
                let e = dt.entry((r.driver_id.clone(), r.track)).or_insert((0.0, 0));
                e.0 += r.ownership;
                e.1 += 1;
                let e = d.entry(r.driver_id.clone()).or_insert((0.0, 0));
                e.0 += r.ownership;
                e.1 += 1;
                total += r.ownership;
            }
            Some(FittedBase::Historical {
                by_driver_track: dt
                    .into_iter()
                    .map(|(k, (s, n))| (k, s / n as f64))
                    .collect(),
                by_driver: d.into_iter().map(|(k, (s, n))| (k, s / n as f64)).collect(),
                global: total / records.len() as f64,
            })
        }
        1 => {
            // Least squares on (value_score, ownership); needs spread in x.
            let n = records.len() as f64;
            let xs: Vec<f64> = records
                .iter()
                .map(|r| value_score(r.proj_points, r.salary))
                .collect();
            let mean_x = xs.iter().sum::<f64>() / n;
            let mean_y = records.iter().map(|r| r.ownership).sum::<f64>() / n;
            let sxx: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
            if records.len() < 2 || sxx < 1e-12 {
                return None;
            }
            let sxy: f64 = xs
                .iter()
                .zip(records.iter())
                .map(|(x, r)| (x - mean_x) * (r.ownership - mean_y))
                .sum();
            let slope = sxy / sxx;
            Some(FittedBase::Value {
                intercept: mean_y - slope * mean_x,
                slope,
            })
        }
        2 => {
            if records.len() < 8 {
                return None;
            }
            Some(FittedBase::SalarySkill {
                forest: RegressionForest::fit(records, rng),
            })
        }
        3 => {
            let mut per_driver: HashMap<String, Vec<(u32, f64)>> = HashMap::new();
            let mut total = 0.0;
            for r in records {
                per_driver
                    .entry(r.driver_id.clone())
                    .or_default()
                    .push((r.race_index, r.ownership));
                total += r.ownership;
            }
            let k = config.recent_window.max(1);
            let by_driver = per_driver
                .into_iter()
                .map(|(id, mut races)| {
                    // Most recent first.
                    races.sort_by(|a, b| b.0.cmp(&a.0));
                    races.truncate(k);
                    let mut num = 0.0;
                    let mut den = 0.0;
                    for (age, (_, own)) in races.iter().enumerate() {
                        let w = match config.decay {
                            DecayKind::None => 1.0,
                            DecayKind::Linear => (k - age) as f64 / k as f64,
                            DecayKind::Exponential => 0.7f64.powi(age as i32),
                        };
                        num += w * own;
                        den += w;
                    }
                    (id, num / den)
                })
                .collect();
            Some(FittedBase::RecentForm {
                by_driver,
                global: total / records.len() as f64,
            })
        }
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Regression forest (salary, skill) -> ownership
// ═══════════════════════════════════════════════════════════════════════

const FOREST_TREES: usize = 25;
const TREE_MAX_DEPTH: u32 = 3;
const TREE_MIN_SAMPLES: usize = 4;

#[derive(Debug, Clone)]
struct TreeNode {
    /// 0 = salary, 1 = skill.
    feature: usize,
    threshold: f64,
    left: usize,
    right: usize,
    value: f64,
    is_leaf: bool,
}

#[derive(Debug, Clone)]
struct RegressionTree {
    nodes: Vec<TreeNode>,
}

impl RegressionTree {
    fn fit(samples: &[(f64, f64, f64)]) -> RegressionTree {
        let mut tree = RegressionTree { nodes: Vec::new() };
        let idx: Vec<usize> = (0..samples.len()).collect();
        tree.grow(samples, &idx, 0);
        tree
    }

    fn grow(&mut self, samples: &[(f64, f64, f64)], idx: &[usize], depth: u32) -> usize {
        let mean = idx.iter().map(|&i| samples[i].2).sum::<f64>() / idx.len() as f64;
        let node_id = self.nodes.len();
        self.nodes.push(TreeNode {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 0,
            value: mean,
            is_leaf: true,
        });
        if depth >= TREE_MAX_DEPTH || idx.len() < 2 * TREE_MIN_SAMPLES {
            return node_id;
        }

        let mut best: Option<(usize, f64, f64)> = None; // feature, threshold, sse
        for feature in 0..2 {
            let mut values: Vec<f64> = idx
                .iter()
                .map(|&i| if feature == 0 { samples[i].0 } else { samples[i].1 })
                .collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            values.dedup();
            if values.len() < 2 {
                continue;
            }
            let step = (values.len() / 16).max(1);
            for w in values.windows(2).step_by(step) {
                let threshold = 0.5 * (w[0] + w[1]);
                let (mut ls, mut lc, mut rs, mut rc) = (0.0, 0usize, 0.0, 0usize);
                for &i in idx {
                    let x = if feature == 0 { samples[i].0 } else { samples[i].1 };
                    if x <= threshold {
                        ls += samples[i].2;
                        lc += 1;
                    } else {
                        rs += samples[i].2;
                        rc += 1;
                    }
                }
                if lc < TREE_MIN_SAMPLES || rc < TREE_MIN_SAMPLES {
                    continue;
                }
                let (lm, rm) = (ls / lc as f64, rs / rc as f64);
                let sse: f64 = idx
                    .iter()
                    .map(|&i| {
                        let x = if feature == 0 { samples[i].0 } else { samples[i].1 };
                        let m = if x <= threshold { lm } else { rm };
                        (samples[i].2 - m).powi(2)
                    })
                    .sum();
                if best.map_or(true, |(_, _, b)| sse < b) {
                    best = Some((feature, threshold, sse));
                }
            }
        }

        if let Some((feature, threshold, _)) = best {
            let (left_idx, right_idx): (Vec<usize>, Vec<usize>) =
                idx.iter().copied().partition(|&i| {
                    let x = if feature == 0 { samples[i].0 } else { samples[i].1 };
                    x <= threshold
                });
            let left = self.grow(samples, &left_idx, depth + 1);
            let right = self.grow(samples, &right_idx, depth + 1);
            let node = &mut self.nodes[node_id];
            node.feature = feature;
            node.threshold = threshold;
            node.left = left;
            node.right = right;
            node.is_leaf = false;
        }
        node_id
    }

    fn predict(&self, salary: f64, skill: f64) -> f64 {
        let mut at = 0;
        loop {
            let node = &self.nodes[at];
            if node.is_leaf {
                return node.value;
            }
            let x = if node.feature == 0 { salary } else { skill };
            at = if x <= node.threshold { node.left } else { node.right };
        }
    }
}

#[derive(Debug, Clone)]
struct RegressionForest {
    trees: Vec<RegressionTree>,
}

impl RegressionForest {
    fn fit(records: &[RaceRecord], rng: &mut StdRng) -> RegressionForest {
        let samples: Vec<(f64, f64, f64)> = records
            .iter()
            .map(|r| (r.salary as f64, r.skill, r.ownership))
            .collect();
        let trees = (0..FOREST_TREES)
            .map(|_| {
                let boot: Vec<(f64, f64, f64)> = (0..samples.len())
                    .map(|_| samples[rng.gen_range(0..samples.len())])
                    .collect();
                RegressionTree::fit(&boot)
            })
            .collect();
        RegressionForest { trees }
    }

    fn predict(&self, salary: f64, skill: f64) -> f64 {
        let sum: f64 = self.trees.iter().map(|t| t.predict(salary, skill)).sum();
        sum / self.trees.len() as f64
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Combination
// ═══════════════════════════════════════════════════════════════════════

struct FittedEnsemble {
    bases: Vec<FittedBase>,
    /// Voting weights aligned to `bases`, normalized to sum 1.
    weights: Vec<f64>,
    /// Stacking coefficients [intercept, one per base], if stacking.
    stack_coeffs: Option<Vec<f64>>,
}

impl FittedEnsemble {
    fn base_predictions(&self, input: &PredInput) -> Vec<f64> {
        self.bases.iter().map(|b| b.predict(input)).collect()
    }

    fn combine(&self, preds: &[f64]) -> f64 {
        let combined = match &self.stack_coeffs {
            Some(coeffs) => {
                let mut y = coeffs[0];
                for (i, p) in preds.iter().enumerate() {
                    y += coeffs[i + 1] * p;
                }
                y
            }
            None => preds
                .iter()
                .zip(self.weights.iter())
                .map(|(p, w)| p * w)
                .sum(),
        };
        combined.clamp(0.0, 1.0)
    }

    fn predict(&self, input: &PredInput) -> f64 {
        self.combine(&self.base_predictions(input))
    }
}

fn fit_ensemble(
    records: &[RaceRecord],
    config: &EnsembleConfig,
    seed: u64,
) -> Option<FittedEnsemble> {
    let mut rng = StdRng::seed_from_u64(seed);
    let bases: Vec<FittedBase> = (0..BASE_NAMES.len())
        .filter_map(|kind| fit_base(kind, records, config, &mut rng))
        .collect();
    if bases.is_empty() {
        return None;
    }

    // Configured weights over the available bases; missing inputs
    // redistribute through normalization.
    let raw: Vec<f64> = bases
        .iter()
        .map(|b| config.weights.get(b.name()).copied().unwrap_or(1.0).max(0.0))
        .collect();
    let total: f64 = raw.iter().sum();
    if total <= 0.0 {
        return None;
    }
    let weights: Vec<f64> = raw.iter().map(|w| w / total).collect();

    let stack_coeffs = match config.method {
        CombineMethod::Voting => None,
        CombineMethod::Stacking => {
            let rows: Vec<Vec<f64>> = records
                .iter()
                .map(|r| {
                    bases
                        .iter()
                        .map(|b| b.predict(&PredInput::from_record(r)))
                        .collect()
                })
                .collect();
            let targets: Vec<f64> = records.iter().map(|r| r.ownership).collect();
            ridge_fit(&rows, &targets)
        }
    };

    Some(FittedEnsemble {
        bases,
        weights,
        stack_coeffs,
    })
}

/// Ridge-regularized least squares with intercept; None if the normal
/// equations cannot be solved.
fn ridge_fit(rows: &[Vec<f64>], targets: &[f64]) -> Option<Vec<f64>> {
    if rows.is_empty() {
        return None;
    }
    let k = rows[0].len() + 1;
    let mut xtx = vec![vec![0.0f64; k]; k];
    let mut xty = vec![0.0f64; k];
    for (row, &y) in rows.iter().zip(targets.iter()) {
        let mut feat = Vec::with_capacity(k);
        feat.push(1.0);
        feat.extend_from_slice(row);
        for i in 0..k {
            xty[i] += feat[i] * y;
            for j in 0..k {
                xtx[i][j] += feat[i] * feat[j];
            }
        }
    }
    for (i, row) in xtx.iter_mut().enumerate() {
        row[i] += 1e-6;
    }
    solve_linear(xtx, xty)
}

/// Gaussian elimination with partial pivoting.
fn solve_linear(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| {
            a[i][col]
                .abs()
                .partial_cmp(&a[j][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in (col + 1)..n {
            let f = a[row][col] / a[col][col];
            for c in col..n {
                a[row][c] -= f * a[col][c];
            }
            b[row] -= f * b[col];
        }
    }
    let mut x = vec![0.0f64; n];
    for row in (0..n).rev() {
        let mut acc = b[row];
        for c in (row + 1)..n {
            acc -= a[row][c] * x[c];
        }
        x[row] = acc / a[row][row];
    }
    Some(x)
}

// ═══════════════════════════════════════════════════════════════════════
// Public operation
// ═══════════════════════════════════════════════════════════════════════

/// Estimate per-driver ownership with uncertainty bands.
///
/// Point predictions come from the full training set; the 5th/95th
/// percentile band comes from `bootstrap_samples` seeded resample-and-refit
/// replicates run in parallel.
pub fn estimate_ownership(
    slate: &Slate,
    history: &TrainingSet,
    config: &EnsembleConfig,
) -> Result<Vec<OwnershipPrediction>, GppError> {
    slate.validate()?;
    if let Err(e) = history.validate() {
        return Err(GppError::InvalidInput {
            message: e,
            context: crate::error::ErrorContext::new(&slate.slate_id, "ownership_ensemble"),
        });
    }

    let full = fit_ensemble(&history.records, config, config.seed);
    let available = full.as_ref().map_or(0, |e| e.bases.len());
    if available < 2 {
        return Err(GppError::EstimatorUnderdetermined {
            available,
            total: BASE_NAMES.len(),
        });
    }
    let full = full.unwrap();

    let inputs: Vec<PredInput> = slate
        .drivers
        .iter()
        .map(|drv| PredInput {
            driver_id: &drv.driver_id,
            track: slate.track,
            salary: drv.salary,
            skill: drv.attrs.skill,
            value_score: value_score(drv.proj_points, drv.salary),
        })
        .collect();

    // Point predictions plus disagreement diagnostics.
    let mut means = Vec::with_capacity(inputs.len());
    let mut spread_sum = 0.0;
    for input in &inputs {
        let preds = full.base_predictions(input);
        let lo = preds.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = preds.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        spread_sum += hi - lo;
        means.push(full.combine(&preds));
    }
    let mean_spread = spread_sum / inputs.len() as f64;
    if mean_spread > config.disagreement_warn_spread {
        tracing::warn!(
            slate = %slate.slate_id,
            mean_spread = mean_spread,
            threshold = config.disagreement_warn_spread,
            "ownership base estimators disagree beyond threshold"
        );
    }

    // Bootstrap band.
    let b = config.bootstrap_samples;
    let (p05, p95) = if b == 0 {
        (means.clone(), means.clone())
    } else {
        let replicates: Vec<Vec<f64>> = (0..b)
            .into_par_iter()
            .map(|rep| {
                let mut rng =
                    StdRng::seed_from_u64(config.seed ^ (rep as u64 + 1).wrapping_mul(0x51_7C_C1));
                let resampled: Vec<RaceRecord> = (0..history.records.len())
                    .map(|_| history.records[rng.gen_range(0..history.records.len())].clone())
                    .collect();
                match fit_ensemble(&resampled, config, config.seed ^ (rep as u64 + 0xB00)) {
                    Some(ens) => inputs.iter().map(|i| ens.predict(i)).collect(),
                    // A degenerate resample keeps the point prediction.
                    None => means.clone(),
                }
            })
            .collect();

        let mut p05 = Vec::with_capacity(inputs.len());
        let mut p95 = Vec::with_capacity(inputs.len());
        for d in 0..inputs.len() {
            let mut column: Vec<f64> = replicates.iter().map(|r| r[d]).collect();
            column.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let lo_idx = ((0.05 * (b - 1) as f64).floor() as usize).min(b - 1);
            let hi_idx = ((0.95 * (b - 1) as f64).ceil() as usize).min(b - 1);
            p05.push(column[lo_idx]);
            p95.push(column[hi_idx]);
        }
        (p05, p95)
    };

    Ok(slate
        .drivers
        .iter()
        .enumerate()
        .map(|(d, drv)| OwnershipPrediction {
            driver_id: drv.driver_id.clone(),
            mean: means[d],
            // The band always brackets the point prediction.
            p05: p05[d].min(means[d]),
            p95: p95[d].max(means[d]),
        })
        .collect())
}

/// Scale means so they sum to roster_size (clamped to [0,1] per driver).
/// Applied at sampling time, per the ownership contract.
pub fn renormalize_to_roster(means: &[f64], roster_size: i32) -> Vec<f64> {
    let total: f64 = means.iter().sum();
    if total <= 0.0 {
        return vec![0.0; means.len()];
    }
    let scale = roster_size as f64 / total;
    means.iter().map(|m| (m * scale).clamp(0.0, 1.0)).collect()
}
