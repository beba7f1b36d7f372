//! Tail metrics over scenario-indexed lineup scores: upper-tail CVaR,
//! Top-X% probability, and conditional upside. All metrics are empirical
//! over the N scenarios; quantile ties break by scenario index so results
//! are deterministic.

use crate::scenario::ScenarioMatrix;

/// Chunk size for deterministic tree-reduction. Matches the generator's
/// chunking so core count never moves a floating-point result.
pub const REDUCE_CHUNK: usize = 1024;

/// Sum in fixed 1024-element chunks: per-chunk partials, then the partials
/// in index order.
pub fn chunked_sum(values: &[f64]) -> f64 {
    values
        .chunks(REDUCE_CHUNK)
        .map(|c| c.iter().sum::<f64>())
        .sum()
}

/// Chunked sum over an indexed accessor, same reduction tree as
/// [`chunked_sum`].
pub fn chunked_sum_by(n: usize, f: impl Fn(usize) -> f64) -> f64 {
    let mut total = 0.0;
    let mut lo = 0;
    while lo < n {
        let hi = (lo + REDUCE_CHUNK).min(n);
        let mut partial = 0.0;
        for i in lo..hi {
            partial += f(i);
        }
        total += partial;
        lo = hi;
    }
    total
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    chunked_sum(values) / values.len() as f64
}

pub fn stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = chunked_sum_by(values.len(), |i| (values[i] - m).powi(2)) / values.len() as f64;
    var.sqrt()
}

/// Scenario indices ordered by (score desc, index asc).
fn order_descending(scores: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    order
}

/// Number of scenarios in the upper α-tail: ceil(α·N), at least 1.
pub fn tail_len(n: usize, alpha: f64) -> usize {
    ((alpha * n as f64).ceil() as usize).clamp(1, n)
}

/// Upper-tail CVaR at level α: the mean of the top ceil(α·N) scores.
/// At α = 1 this is the plain mean.
pub fn upper_cvar(scores: &[f64], alpha: f64) -> f64 {
    assert!(!scores.is_empty(), "cvar over empty score vector");
    let order = order_descending(scores);
    let k = tail_len(scores.len(), alpha);
    let tail: Vec<f64> = order[..k].iter().map(|&s| scores[s]).collect();
    mean(&tail)
}

/// Empirical value-at-risk: the (1−α) quantile, i.e. the smallest score
/// still inside the upper α-tail.
pub fn value_at_risk(scores: &[f64], alpha: f64) -> f64 {
    assert!(!scores.is_empty(), "var over empty score vector");
    let order = order_descending(scores);
    let k = tail_len(scores.len(), alpha);
    scores[order[k - 1]]
}

/// P(L ≥ threshold), empirical.
pub fn top_x_prob(scores: &[f64], threshold: f64) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let hits = chunked_sum_by(scores.len(), |i| if scores[i] >= threshold { 1.0 } else { 0.0 });
    hits / scores.len() as f64
}

/// Conditional upside E[L | L ≥ q_{1−α}(L)] with the empirical quantile.
/// Differs from [`upper_cvar`] only when scores tie at the quantile: every
/// scenario at the threshold is included here.
pub fn conditional_upside(scores: &[f64], alpha: f64) -> f64 {
    let q = value_at_risk(scores, alpha);
    let n_hits = scores.iter().filter(|&&s| s >= q).count();
    let sum = chunked_sum_by(scores.len(), |i| if scores[i] >= q { scores[i] } else { 0.0 });
    sum / n_hits as f64
}

/// Fill `out` with the lineup's score in every scenario (pre-allocated by
/// the caller; cleared here).
pub fn lineup_scores(matrix: &ScenarioMatrix, drivers: &[usize], out: &mut Vec<f64>) {
    out.clear();
    out.reserve(matrix.n);
    for s in 0..matrix.n {
        out.push(matrix.lineup_score(s, drivers));
    }
}

/// Lineup scores restricted to a scenario subset (stable indices).
pub fn lineup_scores_subset(
    matrix: &ScenarioMatrix,
    drivers: &[usize],
    subset: &[usize],
    out: &mut Vec<f64>,
) {
    out.clear();
    out.reserve(subset.len());
    for &s in subset {
        out.push(matrix.lineup_score(s, drivers));
    }
}
