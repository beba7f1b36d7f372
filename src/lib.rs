//! Tournament-equity (GPP) lineup optimizer for NASCAR daily fantasy.
//!
//! The pipeline: a compiled constraint spec gates a causal scenario
//! generator; tail metrics and a CVaR MILP turn the scenario matrix into
//! tail-optimal lineups; an ownership ensemble, field sampler, payout
//! curve, and Monte-Carlo contest simulator estimate what those lineups
//! earn against a realistic field.

pub mod cache;
pub mod cancel;
pub mod constraint;
pub mod contest;
pub mod error;
pub mod field;
pub mod lineup;
pub mod optimizer;
pub mod output;
pub mod ownership;
pub mod payout;
pub mod portfolio;
pub mod regime;
pub mod scenario;
pub mod slate;
pub mod tail;

pub use cancel::CancelToken;
pub use contest::simulate_contest;
pub use error::GppError;
pub use ownership::estimate_ownership;
pub use portfolio::optimize_with_leverage;
