//! Expectation propagation for a GP regression whose latent function
//! `f` is unimodal along every input dimension.
//!
//! For each input dimension `p` an auxiliary process `g_p` decides the
//! sign of `∂_p f` through the joint factor of [`crate::moments`], and
//! `g_p` itself is made monotone by probit factors on `∂_p g_p`. One
//! EP iteration visits every dimension in turn:
//!
//! 1. monotonicity sites of `g_p`, then refresh `g_p`
//! 2. joint sites between `∂_p f` and `g_p`, then refresh `f` and `g_p`
//!
//! See [`RefreshSchedule`] for when the sites are committed and in which
//! order they are visited.
//!
//! Convergence is declared when the relative change of the stacked
//! `(μ_f, diag Σ_f, μ_g, diag Σ_g)` falls below the tolerance.

use crate::cavity::*;
use crate::common::*;
use crate::evidence::EvidenceTerms;
use crate::kernel::*;
use crate::moments::{MomentStrategy, MomentStrategyKind};
use crate::posterior::*;
use crate::site_update::*;

use clap::ValueEnum;
use log::{debug, info, warn};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

/// When batched site proposals are committed.
///
/// Under `PerSweep` every cavity of a sweep is taken from the posterior
/// at the start of the sweep, so the visiting order does not matter and
/// the sites are visited in index order. `PerSite` shuffles the order
/// with the seeded generator of [`EpOptions::seed`].
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshSchedule {
    /// commit one sweep's proposals together, then refresh once
    #[default]
    PerSweep,
    /// commit and refresh after every coordinate
    PerSite,
}

/// Tuning knobs of [`run_ep`]
#[derive(Debug, Clone, Serialize)]
pub struct EpOptions {
    /// Maximum number of EP iterations. Default: 50
    pub max_iters: usize,
    /// Slope of the monotonicity probit on `g'`. Default: 10.0
    pub nu: f64,
    /// Slope of the probit on `f'` in the joint factor. Default: 1.0
    pub nu2: f64,
    /// Weight of the new site in a damped update. Default: 0.9
    pub damping: f64,
    /// Convergence threshold on the relative change. Default: 1e-4
    pub tolerance: f64,
    /// Default: strict
    pub moment_strategy: MomentStrategyKind,
    /// Seed of the sweep order under [`RefreshSchedule::PerSite`]. Default: 0
    pub seed: u64,
    /// Default: per-sweep
    pub refresh: RefreshSchedule,
    /// Diagonal jitter added to the prior covariances. Default: 1e-8
    pub jitter: f64,
    /// Precision floor of the monotonicity sites. Default: 1e-10
    pub monotone_precision_floor: f64,
    /// Precision floor of the joint sign sites. Default: 1e-6
    pub sign_precision_floor: f64,
    /// Precision of every constraint site before the first sweep. Default: 1e-10
    pub initial_site_precision: f64,
}

impl Default for EpOptions {
    fn default() -> Self {
        EpOptions {
            max_iters: DEFAULT_MAX_ITERS,
            nu: DEFAULT_NU,
            nu2: DEFAULT_NU2,
            damping: DEFAULT_DAMPING,
            tolerance: DEFAULT_TOLERANCE,
            moment_strategy: MomentStrategyKind::default(),
            seed: 0,
            refresh: RefreshSchedule::default(),
            jitter: DEFAULT_JITTER,
            monotone_precision_floor: DEFAULT_MONOTONE_FLOOR,
            sign_precision_floor: DEFAULT_SIGN_FLOOR,
            initial_site_precision: DEFAULT_INITIAL_SITE_PRECISION,
        }
    }
}

impl EpOptions {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_iters == 0 {
            anyhow::bail!("max_iters must be at least 1");
        }
        if !(self.damping > 0.0 && self.damping <= 1.0) {
            anyhow::bail!("damping must lie in (0, 1]: {}", self.damping);
        }
        if !(self.tolerance > 0.0) {
            anyhow::bail!("tolerance must be positive: {}", self.tolerance);
        }
        if !(self.nu.is_finite() && self.nu2.is_finite()) {
            anyhow::bail!("probit slopes must be finite: {}, {}", self.nu, self.nu2);
        }
        if !(self.jitter >= 0.0) {
            anyhow::bail!("jitter must be non-negative: {}", self.jitter);
        }
        for (name, x) in [
            ("monotone_precision_floor", self.monotone_precision_floor),
            ("sign_precision_floor", self.sign_precision_floor),
            ("initial_site_precision", self.initial_site_precision),
        ] {
            if !(x > 0.0 && x.is_finite()) {
                anyhow::bail!("{} must be positive: {}", name, x);
            }
        }
        Ok(())
    }
}

/// Observations, constraint locations and hyperparameters
#[derive(Debug, Clone)]
pub struct UnimodalProblem {
    /// `N x P` observation locations
    pub t: Mat,
    /// `N` observations
    pub y: DVec,
    /// `M x P` constraint locations
    pub t2: Mat,
    /// `M x P` entries in `{-1, +1}`; `+1` makes `g_p` increasing
    pub sign_labels: Mat,
    pub kernel_f: KernelParams,
    pub kernel_g: KernelParams,
    pub noise_variance: f64,
}

impl UnimodalProblem {
    /// Constraints at the observation locations with all labels `+1`,
    /// and `g` sharing the kernel of `f`
    pub fn new(t: Mat, y: DVec, kernel_f: KernelParams, noise_variance: f64) -> Self {
        let t2 = t.clone();
        let sign_labels = Mat::from_element(t.nrows(), t.ncols(), 1.0);
        Self {
            t,
            y,
            t2,
            sign_labels,
            kernel_f,
            kernel_g: kernel_f,
            noise_variance,
        }
    }

    /// Constraint locations; resets the sign labels to `+1`
    pub fn with_constraint_points(mut self, t2: Mat) -> Self {
        self.sign_labels = Mat::from_element(t2.nrows(), self.t.ncols(), 1.0);
        self.t2 = t2;
        self
    }

    pub fn with_sign_labels(mut self, sign_labels: Mat) -> Self {
        self.sign_labels = sign_labels;
        self
    }

    pub fn with_g_kernel(mut self, kernel_g: KernelParams) -> Self {
        self.kernel_g = kernel_g;
        self
    }

    pub fn num_obs(&self) -> usize {
        self.t.nrows()
    }

    pub fn num_constraints(&self) -> usize {
        self.t2.nrows()
    }

    pub fn num_dims(&self) -> usize {
        self.t.ncols()
    }

    /// `[0, 1, ..., P-1]`
    pub fn all_dims(&self) -> Vec<usize> {
        (0..self.num_dims()).collect()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let (nn, mm, pp) = (self.num_obs(), self.num_constraints(), self.num_dims());
        if nn == 0 || pp == 0 {
            anyhow::bail!("need at least one observation and one input dimension");
        }
        if self.y.len() != nn {
            anyhow::bail!("{} observations for {} locations", self.y.len(), nn);
        }
        if mm > 0 && self.t2.ncols() != pp {
            anyhow::bail!(
                "constraint points have {} columns, observations {}",
                self.t2.ncols(),
                pp
            );
        }
        if self.sign_labels.nrows() != mm || self.sign_labels.ncols() != pp {
            anyhow::bail!(
                "sign labels are {} x {}, expected {} x {}",
                self.sign_labels.nrows(),
                self.sign_labels.ncols(),
                mm,
                pp
            );
        }
        if let Some(s) = self.sign_labels.iter().find(|&&s| s != 1.0 && s != -1.0) {
            anyhow::bail!("sign labels must be -1 or +1, found {}", s);
        }
        if !(self.noise_variance > 0.0 && self.noise_variance.is_finite()) {
            anyhow::bail!("noise variance must be positive: {}", self.noise_variance);
        }
        if self.y.iter().any(|y| !y.is_finite()) {
            anyhow::bail!("observations must be finite");
        }
        self.kernel_f.validate()?;
        self.kernel_g.validate()?;
        Ok(())
    }
}

/// The latent function `f` stacked with its partial derivatives
#[derive(Debug, Clone)]
pub struct FProcess {
    pub layout: JointLayout,
    pub prior_cov: Mat,
    /// Gaussian likelihood on the first `N` coordinates
    pub likelihood: GaussianSites,
    /// joint sign sites on the derivative coordinates
    pub sign: GaussianSites,
    pub posterior: GaussianPosterior,
}

/// One auxiliary sign process `g_p` stacked with `∂_p g_p`
#[derive(Debug, Clone)]
pub struct GProcess {
    pub dim: usize,
    pub layout: JointLayout,
    pub prior_cov: Mat,
    /// joint sign sites on `g_p(t2)`
    pub sign: GaussianSites,
    /// monotonicity sites on `∂_p g_p(t2)`
    pub monotone: GaussianSites,
    pub posterior: GaussianPosterior,
}

fn refresh(prior_cov: &Mat, a: &GaussianSites, b: &GaussianSites) -> anyhow::Result<GaussianPosterior> {
    let (eta, theta) = GaussianSites::sum_stat(&[a, b])?;
    update_posterior(prior_cov, &eta, &theta)
}

impl FProcess {
    pub fn new(problem: &UnimodalProblem, options: &EpOptions) -> anyhow::Result<Self> {
        let dims = problem.all_dims();
        let (nn, mm) = (problem.num_obs(), problem.num_constraints());
        let layout = JointLayout::new(nn, mm, &dims);
        let prior_cov = joint_derivative_kernel(
            &problem.t,
            &problem.t2,
            &problem.kernel_f,
            &dims,
            options.jitter,
        )?;

        let dd = layout.dim();
        let prec = 1.0 / problem.noise_variance;
        let mut likelihood = GaussianSites::new(dd, 0.0, 0.0);
        for i in 0..nn {
            likelihood.set_stat(i, problem.y[i] * prec, prec);
        }

        let mut sign = GaussianSites::new(dd, 0.0, 0.0);
        sign.fill_block(nn, dd, 0.0, options.initial_site_precision);

        let posterior = refresh(&prior_cov, &likelihood, &sign)?;

        Ok(Self {
            layout,
            prior_cov,
            likelihood,
            sign,
            posterior,
        })
    }

    pub fn refresh(&mut self) -> anyhow::Result<()> {
        self.posterior = refresh(&self.prior_cov, &self.likelihood, &self.sign)?;
        Ok(())
    }
}

impl GProcess {
    pub fn new(problem: &UnimodalProblem, dim: usize, options: &EpOptions) -> anyhow::Result<Self> {
        let mm = problem.num_constraints();
        let layout = JointLayout::new(mm, mm, &[dim]);
        let prior_cov = joint_derivative_kernel(
            &problem.t2,
            &problem.t2,
            &problem.kernel_g,
            &[dim],
            options.jitter,
        )?;

        let dd = layout.dim();
        let mut sign = GaussianSites::new(dd, 0.0, 0.0);
        sign.fill_block(0, mm, 0.0, options.initial_site_precision);
        let mut monotone = GaussianSites::new(dd, 0.0, 0.0);
        monotone.fill_block(mm, dd, 0.0, options.initial_site_precision);

        let posterior = refresh(&prior_cov, &sign, &monotone)?;

        Ok(Self {
            dim,
            layout,
            prior_cov,
            sign,
            monotone,
            posterior,
        })
    }

    pub fn refresh(&mut self) -> anyhow::Result<()> {
        self.posterior = refresh(&self.prior_cov, &self.sign, &self.monotone)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EpStatus {
    Initialized,
    Iterating,
    Converged,
    MaxItersReached,
}

#[derive(Debug, Clone, Serialize)]
pub struct EpDiagnostics {
    pub status: EpStatus,
    pub iterations: usize,
    pub converged: bool,
    /// site updates skipped for a degenerate cavity or normalizer
    pub skipped_sites: usize,
    /// site updates whose precision was floored
    pub clamped_sites: usize,
    /// relative change of the last iteration
    pub relative_change: f64,
}

impl EpDiagnostics {
    fn new() -> Self {
        Self {
            status: EpStatus::Initialized,
            iterations: 0,
            converged: false,
            skipped_sites: 0,
            clamped_sites: 0,
            relative_change: f64::INFINITY,
        }
    }

    fn note(&mut self, proposal: &SiteProposal) {
        if proposal.clamped {
            self.clamped_sites += 1;
        }
    }
}

/// Converged (or last) posteriors with their sites
#[derive(Debug, Clone)]
pub struct EpFit {
    pub f: FProcess,
    pub g: Vec<GProcess>,
    pub log_evidence: f64,
    pub evidence: EvidenceTerms,
    pub diagnostics: EpDiagnostics,
}

/// `(μ_f, diag Σ_f)` followed by `(μ_g, diag Σ_g)` of every `g_p`
fn convergence_summary(f: &FProcess, g: &[GProcess]) -> DVec {
    let parts: Vec<DVec> = std::iter::once(&f.posterior)
        .chain(g.iter().map(|g_p| &g_p.posterior))
        .map(|post| post.stacked_summary())
        .collect();
    let total = parts.iter().map(|x| x.len()).sum();
    DVec::from_iterator(total, parts.iter().flat_map(|x| x.iter().copied()))
}

/// `mean((new - old)²) / mean(old²)`
pub fn relative_change(old: &DVec, new: &DVec) -> f64 {
    if old.is_empty() {
        return 0.0;
    }
    let num = (new - old).norm_squared();
    let denom = old.norm_squared();
    if denom > 0.0 {
        num / denom
    } else if num > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

struct Sweeper<'a> {
    options: &'a EpOptions,
    strategy: &'a dyn MomentStrategy,
    diagnostics: &'a mut EpDiagnostics,
}

impl Sweeper<'_> {
    fn skip(&mut self, what: &str, coord: usize, dim: usize) {
        warn!("skipping {} site {} (dimension {}): degenerate cavity", what, coord, dim);
        self.diagnostics.skipped_sites += 1;
    }

    /// Monotonicity factors `Φ(s_j ν ∂_p g_p(t2_j))`
    fn monotone(&mut self, g: &mut GProcess, order: &[usize], signs: &[f64]) -> anyhow::Result<()> {
        let mut batch = Vec::with_capacity(order.len());

        for &j in order {
            let i = g.layout.deriv_index(0, j);

            let Some(cavity) = Cavity::from_posterior(&g.posterior, i, &g.monotone) else {
                self.skip("monotone", j, g.dim);
                continue;
            };

            let tilted = monotone_tilted_moments(&cavity, signs[j], self.options.nu);
            if !tilted.is_proper() {
                self.skip("monotone", j, g.dim);
                continue;
            }

            let proposal = propose_site(
                i,
                tilted.mean,
                tilted.variance,
                &cavity,
                self.options.monotone_precision_floor,
            );
            self.diagnostics.note(&proposal);

            match self.options.refresh {
                RefreshSchedule::PerSweep => batch.push(proposal),
                RefreshSchedule::PerSite => {
                    commit_sites(&mut g.monotone, &[proposal], self.options.damping);
                    g.refresh()?;
                }
            }
        }

        if self.options.refresh == RefreshSchedule::PerSweep {
            commit_sites(&mut g.monotone, &batch, self.options.damping);
            g.refresh()?;
        }
        Ok(())
    }

    /// Joint factors between `∂_p f(t2_j)` and `g_p(t2_j)`
    fn joint(&mut self, f: &mut FProcess, g: &mut GProcess, order: &[usize]) -> anyhow::Result<()> {
        let mut batch_f = Vec::with_capacity(order.len());
        let mut batch_g = Vec::with_capacity(order.len());

        for &j in order {
            let i_f = f.layout.deriv_index(g.dim, j);
            let i_g = j;

            let (Some(cav_f), Some(cav_g)) = (
                Cavity::from_posterior(&f.posterior, i_f, &f.sign),
                Cavity::from_posterior(&g.posterior, i_g, &g.sign),
            ) else {
                self.skip("joint", j, g.dim);
                continue;
            };

            let jm = self.strategy.match_moments(
                cav_f.mean(),
                cav_f.variance(),
                cav_g.mean(),
                cav_g.variance(),
                self.options.nu2,
            );
            if !jm.is_proper() {
                self.skip("joint", j, g.dim);
                continue;
            }

            let floor = self.options.sign_precision_floor;
            let pf = propose_site(i_f, jm.fp.mean, jm.fp.variance, &cav_f, floor);
            let pg = propose_site(i_g, jm.g.mean, jm.g.variance, &cav_g, floor);
            self.diagnostics.note(&pf);
            self.diagnostics.note(&pg);

            match self.options.refresh {
                RefreshSchedule::PerSweep => {
                    batch_f.push(pf);
                    batch_g.push(pg);
                }
                RefreshSchedule::PerSite => {
                    commit_sites(&mut f.sign, &[pf], self.options.damping);
                    commit_sites(&mut g.sign, &[pg], self.options.damping);
                    f.refresh()?;
                    g.refresh()?;
                }
            }
        }

        if self.options.refresh == RefreshSchedule::PerSweep {
            commit_sites(&mut f.sign, &batch_f, self.options.damping);
            commit_sites(&mut g.sign, &batch_g, self.options.damping);
            f.refresh()?;
            g.refresh()?;
        }
        Ok(())
    }
}

/// Fit the unimodal GP by expectation propagation.
///
/// Degenerate sites are skipped and counted; a failed Cholesky
/// factorization aborts the run. Reaching `max_iters` is not an
/// error, see [`EpDiagnostics::converged`].
pub fn run_ep(problem: &UnimodalProblem, options: &EpOptions) -> anyhow::Result<EpFit> {
    problem.validate()?;
    options.validate()?;

    let (nn, mm, pp) = (
        problem.num_obs(),
        problem.num_constraints(),
        problem.num_dims(),
    );
    info!(
        "EP: {} observations, {} constraint points, {} dimension(s), {} moments",
        nn, mm, pp, options.moment_strategy
    );

    let mut f = FProcess::new(problem, options)?;
    let mut g = (0..pp)
        .map(|p| GProcess::new(problem, p, options))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let strategy = options.moment_strategy.strategy();
    let mut rng = SmallRng::seed_from_u64(options.seed);
    let mut order: Vec<usize> = (0..mm).collect();
    let signs: Vec<Vec<f64>> = (0..pp)
        .map(|p| problem.sign_labels.column(p).iter().copied().collect())
        .collect();

    let mut diagnostics = EpDiagnostics::new();
    diagnostics.status = EpStatus::Iterating;

    for iter in 0..options.max_iters {
        let old = convergence_summary(&f, &g);

        let mut sweeper = Sweeper {
            options,
            strategy: strategy.as_ref(),
            diagnostics: &mut diagnostics,
        };

        let shuffle = options.refresh == RefreshSchedule::PerSite;
        for (g_p, signs_p) in g.iter_mut().zip(signs.iter()) {
            if shuffle {
                order.shuffle(&mut rng);
            }
            sweeper.monotone(g_p, &order, signs_p)?;
            if shuffle {
                order.shuffle(&mut rng);
            }
            sweeper.joint(&mut f, g_p, &order)?;
        }

        let rel = relative_change(&old, &convergence_summary(&f, &g));
        diagnostics.iterations = iter + 1;
        diagnostics.relative_change = rel;
        debug!("EP iteration {}: relative change {:.3e}", iter + 1, rel);

        if rel < options.tolerance {
            diagnostics.status = EpStatus::Converged;
            diagnostics.converged = true;
            break;
        }
    }

    if diagnostics.converged {
        info!("EP converged after {} iteration(s)", diagnostics.iterations);
    } else {
        diagnostics.status = EpStatus::MaxItersReached;
        warn!(
            "EP stopped at {} iterations; relative change {:.3e}",
            diagnostics.iterations, diagnostics.relative_change
        );
    }

    debug!(
        "smallest site precisions: f {:?}, g {:?}",
        f.sign.min_theta(),
        g.iter().map(|g_p| g_p.monotone.min_theta()).collect::<Vec<_>>()
    );

    let evidence = EvidenceTerms::compute(&f, &g, problem, options, strategy.as_ref())?;
    let log_evidence = evidence.total();
    info!("log evidence: {:.6}", log_evidence);

    Ok(EpFit {
        f,
        g,
        log_evidence,
        evidence,
        diagnostics,
    })
}
