//! Unimodal Gaussian process regression by Expectation Propagation.
//!
//! The latent function `f` gets a squared-exponential GP prior. For
//! each input dimension an auxiliary GP `g_p` controls the sign of
//! `∂_p f`, and `g_p` is itself constrained to be monotone, so that the
//! sign of the derivative changes at most once. All non-Gaussian
//! factors are replaced by Gaussian sites fitted by EP.
//!
//! # References
//!
//! Riihimäki & Vehtari (2010). "Gaussian processes with monotonicity
//! information." AISTATS.

/// Shared aliases and default constants
pub mod common;

/// Squared-exponential kernel with derivative blocks
pub mod kernel;

/// Gaussian/probit integrals
pub mod probit;

/// Moment matching of the joint `f'`/`g` factor
pub mod moments;

/// Posterior of a GP under Gaussian sites
pub mod posterior;

/// Cavity distributions and the monotonicity factor
pub mod cavity;

/// Damped site updates with precision floors
pub mod site_update;

/// EP orchestration
pub mod ep;

/// Log marginal likelihood
pub mod evidence;

/// Predictive distributions
pub mod predict;

/// Synthetic unimodal data
pub mod simulate;

pub use ep::{run_ep, EpDiagnostics, EpFit, EpOptions, EpStatus, RefreshSchedule, UnimodalProblem};
pub use kernel::KernelParams;
pub use moments::MomentStrategyKind;
