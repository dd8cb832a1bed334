//! Cavity distributions and the monotonicity factor.

use crate::common::*;
use crate::posterior::GaussianPosterior;
use crate::probit::{probit_tilted, TiltedMoments};

/// One coordinate's marginal with its own site removed, in natural
/// parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cavity {
    pub eta: f64,
    pub theta: f64,
}

impl Cavity {
    /// `θ_cav = 1/v - θ_site`, `η_cav = m/v - η_site`.
    ///
    /// `None` when the cavity precision is not strictly positive or not
    /// finite; the caller skips that site.
    pub fn from_marginal(mean: f64, variance: f64, site_eta: f64, site_theta: f64) -> Option<Self> {
        let theta = 1.0 / variance - site_theta;
        let eta = mean / variance - site_eta;
        if theta > 0.0 && theta.is_finite() && eta.is_finite() {
            Some(Self { eta, theta })
        } else {
            None
        }
    }

    /// Cavity of coordinate `i` of `posterior` with respect to `sites`
    pub fn from_posterior(
        posterior: &GaussianPosterior,
        i: usize,
        sites: &GaussianSites,
    ) -> Option<Self> {
        let (mean, variance) = posterior.marginal(i);
        Self::from_marginal(mean, variance, sites.eta()[i], sites.theta()[i])
    }

    pub fn mean(&self) -> f64 {
        self.eta / self.theta
    }

    pub fn variance(&self) -> f64 {
        1.0 / self.theta
    }
}

/// Tilted moments of `Φ(s ν x) N(x | m_cav, v_cav)`
pub fn monotone_tilted_moments(cavity: &Cavity, sign: f64, nu: f64) -> TiltedMoments {
    probit_tilted(cavity.mean(), cavity.variance(), sign * nu)
}
