use thiserror::Error;

/// Where an error came from: slate id plus the component that raised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    pub slate_id: String,
    pub component: &'static str,
}

impl ErrorContext {
    pub fn new(slate_id: impl Into<String>, component: &'static str) -> Self {
        ErrorContext {
            slate_id: slate_id.into(),
            component,
        }
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slate={} component={}", self.slate_id, self.component)
    }
}

/// Crate-wide error taxonomy. Every public operation returns one of these;
/// none of them carries a stack trace, only kind + message + context.
#[derive(Debug, Error)]
pub enum GppError {
    /// Malformed slate, roster mismatch, non-finite projection. Never retried.
    #[error("invalid input [{context}]: {message}")]
    InvalidInput {
        message: String,
        context: ErrorContext,
    },

    /// The constraint source contradicts itself (or the roster rules).
    #[error("constraint spec failed to compile: {reason}")]
    SpecCompile { reason: String },

    /// Scenario resampling budget exhausted; carries the last failing predicate.
    #[error("scenario rejected {attempts} times [{context}]: predicate '{predicate}'")]
    InfeasibleScenarioBudget {
        predicate: &'static str,
        attempts: u32,
        context: ErrorContext,
    },

    /// The optimizer constraints admit no lineup.
    #[error("no feasible lineup [{context}]: {detail}")]
    InfeasibleLineup {
        detail: String,
        context: ErrorContext,
    },

    /// The field sampler could not produce enough feasible lineups.
    #[error(
        "field yield insufficient [{context}]: {produced}/{requested} after {attempts} attempts"
    )]
    FieldYieldInsufficient {
        produced: usize,
        requested: usize,
        attempts: u32,
        context: ErrorContext,
    },

    /// Neither payout model reached the minimum fit quality (R² ≥ 0.50).
    #[error("payout curve fit rejected [{context}]: best R² {best_r2:.4}")]
    CurveFit { best_r2: f64, context: ErrorContext },

    /// Fewer than two ownership base estimators could be fitted.
    #[error("ownership ensemble underdetermined: {available} of {total} bases available")]
    EstimatorUnderdetermined { available: usize, total: usize },

    /// The MILP solver exceeded its wall-clock budget with no solution.
    #[error("solver exceeded {budget_sec:.1}s wall-clock budget [{context}]")]
    SolverTimeout {
        budget_sec: f64,
        context: ErrorContext,
    },

    /// The request's cancellation token fired. Callers that can return a
    /// partial result (the portfolio generator) catch this and mark the
    /// result cancelled instead of surfacing it.
    #[error("cancelled [{context}]")]
    Cancelled { context: ErrorContext },

    /// A bug in scenario generation or constraint compilation. Fatal.
    #[error("internal invariant violated [{context}]: {detail}")]
    Internal {
        detail: String,
        context: ErrorContext,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl GppError {
    /// Short machine-readable kind tag, for structured reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            GppError::InvalidInput { .. } => "invalid_input",
            GppError::SpecCompile { .. } => "spec_compile",
            GppError::InfeasibleScenarioBudget { .. } => "infeasible_scenario_budget",
            GppError::InfeasibleLineup { .. } => "infeasible_lineup",
            GppError::FieldYieldInsufficient { .. } => "field_yield_insufficient",
            GppError::CurveFit { .. } => "curve_fit",
            GppError::EstimatorUnderdetermined { .. } => "estimator_underdetermined",
            GppError::SolverTimeout { .. } => "solver_timeout",
            GppError::Cancelled { .. } => "cancelled",
            GppError::Internal { .. } => "internal",
            GppError::Io(_) => "io",
        }
    }
}
