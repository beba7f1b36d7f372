use crate::error::{ErrorContext, GppError};
use serde::{Deserialize, Serialize};

/// Contest-size tier. small < 5k ≤ medium < 20k ≤ large.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayoutTier {
    Small,
    Medium,
    Large,
}

impl PayoutTier {
    pub fn from_field_size(field_size: usize) -> PayoutTier {
        if field_size < 5_000 {
            PayoutTier::Small
        } else if field_size < 20_000 {
            PayoutTier::Medium
        } else {
            PayoutTier::Large
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }

    pub fn parse(s: &str) -> Option<PayoutTier> {
        match s {
            "small" => Some(PayoutTier::Small),
            "medium" => Some(PayoutTier::Medium),
            "large" => Some(PayoutTier::Large),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurveModel {
    /// payout = a · rank^(−b)
    PowerLaw,
    /// payout = a · exp(−b · rank)
    Exponential,
}

/// Fitted rank → payout curve. Monotone non-increasing over the paid
/// range; zero beyond the paid cutoff. Value-typed and cacheable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutCurve {
    pub model: CurveModel,
    pub a: f64,
    pub b: f64,
    pub r2: f64,
    pub tier: PayoutTier,
    /// Last paying rank observed in the fit data.
    pub paid_cutoff: i32,
}

const R2_WARN: f64 = 0.90;
const R2_FAIL: f64 = 0.50;

impl PayoutCurve {
    /// Fit both model families against historical (rank, payout) pairs and
    /// keep the better one by R² (computed on the payout scale).
    ///
    /// The paid cutoff is the last rank with a strictly positive payout;
    /// zero-payout rows at or before the cutoff are dropped from the fit
    /// with a warning. R² < 0.90 warns; best R² < 0.50 fails.
    pub fn fit(points: &[(i32, f64)], tier: PayoutTier) -> Result<PayoutCurve, GppError> {
        let ctx = || ErrorContext::new("-", "payout_curve");
        for &(rank, payout) in points {
            if rank < 1 || !payout.is_finite() || payout < 0.0 {
                return Err(GppError::InvalidInput {
                    message: format!("bad payout row (rank {}, payout {})", rank, payout),
                    context: ctx(),
                });
            }
        }
        let paid_cutoff = points
            .iter()
            .filter(|(_, p)| *p > 0.0)
            .map(|(r, _)| *r)
            .max()
            .ok_or_else(|| GppError::InvalidInput {
                message: "no positive payouts in fit data".into(),
                context: ctx(),
            })?;

        let mut dropped = 0usize;
        let fit_data: Vec<(f64, f64)> = points
            .iter()
            .filter(|&&(rank, payout)| {
                if rank <= paid_cutoff && payout == 0.0 {
                    dropped += 1;
                    false
                } else {
                    rank <= paid_cutoff
                }
            })
            .map(|&(rank, payout)| (rank as f64, payout))
            .collect();
        if dropped > 0 {
            tracing::warn!(
                dropped,
                paid_cutoff,
                "zero-payout rows inside the paid range dropped from curve fit"
            );
        }
        if fit_data.len() < 2 {
            return Err(GppError::InvalidInput {
                message: format!("{} usable payout rows, need at least 2", fit_data.len()),
                context: ctx(),
            });
        }

        let power = fit_log_linear(&fit_data, CurveModel::PowerLaw);
        let exponential = fit_log_linear(&fit_data, CurveModel::Exponential);
        let (model, a, b, r2) = [
            power.map(|(a, b, r2)| (CurveModel::PowerLaw, a, b, r2)),
            exponential.map(|(a, b, r2)| (CurveModel::Exponential, a, b, r2)),
        ]
        .into_iter()
        .flatten()
        .max_by(|x, y| x.3.partial_cmp(&y.3).unwrap_or(std::cmp::Ordering::Equal))
        .ok_or(GppError::CurveFit {
            best_r2: f64::NEG_INFINITY,
            context: ctx(),
        })?;

        if r2 < R2_FAIL {
            return Err(GppError::CurveFit {
                best_r2: r2,
                context: ctx(),
            });
        }
        if r2 < R2_WARN {
            tracing::warn!(
                r2,
                model = ?model,
                tier = tier.name(),
                "payout curve fit quality below target"
            );
        }

        Ok(PayoutCurve {
            model,
            a,
            b,
            r2,
            tier,
            paid_cutoff,
        })
    }

    /// Build a curve from explicit parameters (no fit).
    pub fn from_params(model: CurveModel, a: f64, b: f64, tier: PayoutTier, paid_cutoff: i32) -> Self {
        PayoutCurve {
            model,
            a,
            b,
            r2: 1.0,
            tier,
            paid_cutoff,
        }
    }

    /// Model-exact payout at a (possibly fractional) rank; zero outside
    /// the paid range.
    pub fn predict_at(&self, rank: f64) -> f64 {
        if rank < 1.0 || rank > self.paid_cutoff as f64 {
            return 0.0;
        }
        let value = match self.model {
            CurveModel::PowerLaw => self.a * rank.powf(-self.b),
            CurveModel::Exponential => self.a * (-self.b * rank).exp(),
        };
        value.max(0.0)
    }

    pub fn predict(&self, rank: i32) -> f64 {
        self.predict_at(rank as f64)
    }
}

/// Log-space least squares: ln y = ln a − b·g(rank) with g = ln for the
/// power law and identity for the exponential. Returns (a, b, R² on the
/// payout scale); None when the family cannot be monotone non-increasing
/// (fitted b < 0) or the regressor has no spread.
fn fit_log_linear(data: &[(f64, f64)], model: CurveModel) -> Option<(f64, f64, f64)> {
    let n = data.len() as f64;
    let xs: Vec<f64> = data
        .iter()
        .map(|&(r, _)| match model {
            CurveModel::PowerLaw => r.ln(),
            CurveModel::Exponential => r,
        })
        .collect();
    let ys: Vec<f64> = data.iter().map(|&(_, p)| p.ln()).collect();

    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let sxx: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
    if sxx < 1e-12 {
        return None;
    }
    let sxy: f64 = xs
        .iter()
        .zip(ys.iter())
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let slope = sxy / sxx;
    let b = -slope;
    if b < 0.0 {
        return None;
    }
    let a = (mean_y - slope * mean_x).exp();

    // R² on the payout scale, not the log scale.
    let payout_mean = data.iter().map(|&(_, p)| p).sum::<f64>() / n;
    let mut sse = 0.0;
    let mut sst = 0.0;
    for &(r, p) in data {
        let fitted = match model {
            CurveModel::PowerLaw => a * r.powf(-b),
            CurveModel::Exponential => a * (-b * r).exp(),
        };
        sse += (p - fitted).powi(2);
        sst += (p - payout_mean).powi(2);
    }
    let r2 = if sst < 1e-12 {
        if sse < 1e-9 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - sse / sst
    };
    Some((a, b, r2))
}
