//! Gaussian posterior of a latent process under a GP prior `N(0, K)`
//! and independent Gaussian sites `exp(η_i x_i - θ_i x_i² / 2)`.
//!
//! With `S = diag(√θ)` the posterior covariance is computed without
//! ever inverting `K` or `θ`:
//!
//! ```text
//! B = I + S K S = L Lᵀ
//! V = L⁻¹ S K
//! Σ = K - Vᵀ V
//! μ = Σ η
//! ```

use crate::common::*;
use log::debug;

#[derive(Debug, Clone)]
pub struct GaussianPosterior {
    pub mu: DVec,
    pub sigma_diag: DVec,
    pub sigma: Mat,
    /// lower Cholesky factor of `I + S K S`
    pub chol_l: Mat,
    pub eta: DVec,
    pub theta: DVec,
}

/// Posterior of `N(0, K)` combined with sites `(η, θ)`.
///
/// Fails if the dimensions disagree, any `θ` is negative, or
/// `I + S K S` is not positive definite.
pub fn update_posterior(kk: &Mat, eta: &DVec, theta: &DVec) -> anyhow::Result<GaussianPosterior> {
    let dd = kk.nrows();

    if kk.ncols() != dd || eta.len() != dd || theta.len() != dd {
        return Err(anyhow::anyhow!(
            "posterior dimensions disagree: K {} x {}, eta {}, theta {}",
            kk.nrows(),
            kk.ncols(),
            eta.len(),
            theta.len()
        ));
    }

    if let Some(i) = theta.iter().position(|&t| t.is_nan() || t < 0.0) {
        return Err(anyhow::anyhow!("negative site precision at {}: {}", i, theta[i]));
    }

    if dd == 0 {
        return Ok(GaussianPosterior {
            mu: DVec::zeros(0),
            sigma_diag: DVec::zeros(0),
            sigma: Mat::zeros(0, 0),
            chol_l: Mat::zeros(0, 0),
            eta: DVec::zeros(0),
            theta: DVec::zeros(0),
        });
    }

    let sqrt_theta = theta.map(f64::sqrt);

    // G = S K
    let mut gg = kk.clone();
    for (i, mut row) in gg.row_iter_mut().enumerate() {
        row *= sqrt_theta[i];
    }

    // B = I + G S
    let mut bb = gg.clone();
    for (j, mut col) in bb.column_iter_mut().enumerate() {
        col *= sqrt_theta[j];
    }
    for i in 0..dd {
        bb[(i, i)] += 1.0;
    }

    let chol = bb
        .cholesky()
        .ok_or_else(|| anyhow::anyhow!("I + S K S is not positive definite (dim {})", dd))?;
    let chol_l = chol.l();

    let vv = chol_l
        .solve_lower_triangular(&gg)
        .ok_or_else(|| anyhow::anyhow!("singular Cholesky factor"))?;

    let sigma = kk - vv.tr_mul(&vv);
    let mu = &sigma * eta;
    let sigma_diag = sigma.diagonal();

    debug!("posterior refreshed: dim {}", dd);

    Ok(GaussianPosterior {
        mu,
        sigma_diag,
        sigma,
        chol_l,
        eta: eta.clone(),
        theta: theta.clone(),
    })
}

impl GaussianPosterior {
    pub fn dim(&self) -> usize {
        self.mu.len()
    }

    /// `(μ_i, Σ_ii)`
    pub fn marginal(&self, i: usize) -> (f64, f64) {
        (self.mu[i], self.sigma_diag[i])
    }

    /// `log N(η/θ | 0, K + diag(1/θ))`, the Gaussian part of the EP
    /// evidence:
    ///
    /// ```text
    /// -D/2 log 2π - Σ log L_ii + Σ log √θ - |L⁻¹ (η / √θ)|² / 2
    /// ```
    ///
    /// Every `θ_i` must be strictly positive.
    pub fn mvn_log_normalizer(&self) -> anyhow::Result<f64> {
        let dd = self.dim();
        if dd == 0 {
            return Ok(0.0);
        }

        if let Some(i) = self.theta.iter().position(|&t| !(t > 0.0)) {
            return Err(anyhow::anyhow!(
                "coordinate {} has no site precision ({})",
                i,
                self.theta[i]
            ));
        }

        let sqrt_theta = self.theta.map(f64::sqrt);
        let scaled = self.eta.component_div(&sqrt_theta);
        let half_quad = self
            .chol_l
            .solve_lower_triangular(&scaled)
            .ok_or_else(|| anyhow::anyhow!("singular Cholesky factor"))?
            .norm_squared()
            * 0.5;

        let log_det_l: f64 = self.chol_l.diagonal().iter().map(|x| x.ln()).sum();
        let log_sqrt_theta: f64 = sqrt_theta.iter().map(|x| x.ln()).sum();

        Ok(-0.5 * dd as f64 * LN_2PI - log_det_l + log_sqrt_theta - half_quad)
    }

    /// `(μ, diag Σ)` stacked into one vector
    pub fn stacked_summary(&self) -> DVec {
        let dd = self.dim();
        DVec::from_fn(2 * dd, |i, _| {
            if i < dd {
                self.mu[i]
            } else {
                self.sigma_diag[i - dd]
            }
        })
    }
}
