//! Predictions from a fitted latent process.
//!
//! With `K` the joint prior of the fitted coordinates, `K_pf` the
//! cross-covariance of the new locations and `H = K⁻¹ K_pfᵀ`:
//!
//! ```text
//! mean = Hᵀ μ
//! cov  = K_pp - K_pf H + Hᵀ Σ H
//! ```

use crate::common::*;
use crate::ep::{EpFit, UnimodalProblem};
use crate::kernel::*;
use crate::posterior::GaussianPosterior;
use crate::probit::{normal_cdf, normal_log_pdf};

use matrix_util::traits::SampleOps;
use rand::Rng;

/// Fitted locations of a latent process `[h(t); ∂_{dims} h(t2)]`
pub struct PredictionInput<'a> {
    pub t: &'a Mat,
    pub t2: &'a Mat,
    pub kernel: &'a KernelParams,
    pub deriv_dims: &'a [usize],
    pub jitter: f64,
}

/// Predictive mean and full covariance of `h(t_pred)`
pub fn predict_full(
    posterior: &GaussianPosterior,
    input: &PredictionInput,
    t_pred: &Mat,
) -> anyhow::Result<(DVec, Mat)> {
    let kk = joint_derivative_kernel(
        input.t,
        input.t2,
        input.kernel,
        input.deriv_dims,
        input.jitter,
    )?;
    if kk.nrows() != posterior.dim() {
        anyhow::bail!(
            "posterior dimension {} does not match the prior {}",
            posterior.dim(),
            kk.nrows()
        );
    }

    let kpf = cross_covariance(t_pred, input.t, input.t2, input.kernel, input.deriv_dims)?;
    let kpp = value_kernel(t_pred, input.kernel)?;

    let chol = kk
        .cholesky()
        .ok_or_else(|| anyhow::anyhow!("prior covariance is not positive definite"))?;
    let hh = chol.solve(&kpf.transpose());

    let mean = hh.tr_mul(&posterior.mu);
    let cov = kpp - &kpf * &hh + hh.tr_mul(&(&posterior.sigma * &hh));
    let cov = (&cov + cov.transpose()) * 0.5;

    Ok((mean, cov))
}

/// Predictive mean and variance of `h(t_pred)`, plus `noise_variance`
/// when given
pub fn predict(
    posterior: &GaussianPosterior,
    input: &PredictionInput,
    t_pred: &Mat,
    noise_variance: Option<f64>,
) -> anyhow::Result<(DVec, DVec)> {
    let (mean, cov) = predict_full(posterior, input, t_pred)?;
    let noise = noise_variance.unwrap_or(0.0);
    let var = cov.diagonal().map(|v| v.max(0.0) + noise);
    Ok((mean, var))
}

/// Log predictive density `log N(y_i | mean_i, var_i)` of held-out
/// observations; one entry per observation if `per_sample`, otherwise
/// a single entry with their sum
pub fn lppd(y_test: &DVec, mean: &DVec, variance: &DVec, per_sample: bool) -> anyhow::Result<DVec> {
    if y_test.len() != mean.len() || y_test.len() != variance.len() {
        anyhow::bail!(
            "lengths differ: y {}, mean {}, variance {}",
            y_test.len(),
            mean.len(),
            variance.len()
        );
    }
    if let Some(v) = variance.iter().find(|&&v| !(v > 0.0)) {
        anyhow::bail!("predictive variance must be positive: {}", v);
    }

    let lp = DVec::from_fn(y_test.len(), |i, _| {
        normal_log_pdf(y_test[i], mean[i], variance[i])
    });

    if per_sample {
        Ok(lp)
    } else {
        Ok(DVec::from_element(1, lp.sum()))
    }
}

/// Monte Carlo mean and variance of `Φ(g)` for `g ~ N(mean, cov)`,
/// the probability that `f` increases along the corresponding input
pub fn sample_z_probabilities<R: Rng>(
    mean: &DVec,
    cov: &Mat,
    num_samples: usize,
    rng: &mut R,
) -> anyhow::Result<(DVec, DVec)> {
    let n = mean.len();
    if cov.nrows() != n || cov.ncols() != n {
        anyhow::bail!("covariance is {} x {}, mean {}", cov.nrows(), cov.ncols(), n);
    }
    if num_samples == 0 {
        anyhow::bail!("need at least one sample");
    }

    // predictive covariances can be numerically indefinite
    let eig = cov.clone().symmetric_eigen();
    let sqrt_lambda = eig.eigenvalues.map(|x| x.max(0.0).sqrt());
    let root = &eig.eigenvectors * Mat::from_diagonal(&sqrt_lambda);

    let zz = Mat::rnorm_with(n, num_samples, rng);
    let mut samples = &root * zz;
    for mut col in samples.column_iter_mut() {
        col += mean;
        col.apply(|x| *x = normal_cdf(*x));
    }

    let prob_mean = samples.column_mean();
    let prob_var = samples.column_variance();
    Ok((prob_mean, prob_var))
}

impl EpFit {
    /// Predictive mean and variance of `f(t_pred)`, of `y` if
    /// `with_noise`
    pub fn predict_f(
        &self,
        problem: &UnimodalProblem,
        t_pred: &Mat,
        jitter: f64,
        with_noise: bool,
    ) -> anyhow::Result<(DVec, DVec)> {
        let dims = problem.all_dims();
        let input = PredictionInput {
            t: &problem.t,
            t2: &problem.t2,
            kernel: &problem.kernel_f,
            deriv_dims: &dims,
            jitter,
        };
        let noise = with_noise.then_some(problem.noise_variance);
        predict(&self.f.posterior, &input, t_pred, noise)
    }

    /// Predictive mean and covariance of `g_p(t_pred)`
    pub fn predict_g(
        &self,
        problem: &UnimodalProblem,
        dim: usize,
        t_pred: &Mat,
        jitter: f64,
    ) -> anyhow::Result<(DVec, Mat)> {
        let g = self
            .g
            .get(dim)
            .ok_or_else(|| anyhow::anyhow!("no g process for dimension {}", dim))?;
        let input = PredictionInput {
            t: &problem.t2,
            t2: &problem.t2,
            kernel: &problem.kernel_g,
            deriv_dims: &[dim],
            jitter,
        };
        predict_full(&g.posterior, &input, t_pred)
    }

    /// Monte Carlo mean and variance of `P(∂_p f(t_pred) > 0)`
    pub fn increasing_probability<R: Rng>(
        &self,
        problem: &UnimodalProblem,
        dim: usize,
        t_pred: &Mat,
        jitter: f64,
        num_samples: usize,
        rng: &mut R,
    ) -> anyhow::Result<(DVec, DVec)> {
        let (mean, cov) = self.predict_g(problem, dim, t_pred, jitter)?;
        sample_z_probabilities(&mean, &cov, num_samples, rng)
    }
}
