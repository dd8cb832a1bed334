//! EP approximation of the log marginal likelihood.
//!
//! ```text
//! log Z = log N(μ̃_f | 0, K_f + Σ̃_f) + Σ_p log N(μ̃_g | 0, K_g + Σ̃_g)
//!       + Σ_sites [ log Z_site - log N(m_cav | μ̃_site, v_cav + σ̃²_site) ]
//! ```
//!
//! where `μ̃ = η/θ`, `σ̃² = 1/θ` are the site means and variances and
//! `Z_site` is the normalizer of the exact factor under its cavity.
//! The Gaussian likelihood sites are exact and contribute nothing to
//! the second line.

use crate::cavity::Cavity;
use crate::common::*;
use crate::ep::{EpOptions, FProcess, GProcess, UnimodalProblem};
use crate::moments::MomentStrategy;
use crate::probit::{normal_log_pdf, probit_log_normalizer};

use log::{debug, warn};
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvidenceTerms {
    /// Gaussian term of `f`
    pub mvn_f: f64,
    /// Gaussian term of each `g_p`
    pub mvn_g: Vec<f64>,
    /// `Σ log Z` of the monotonicity factors
    pub log_k1: f64,
    /// site correction of the monotonicity sites
    pub log_k2: f64,
    /// `Σ log Z` of the joint `f'`/`g` factors
    pub log_c1: f64,
    /// site correction of the joint sites on `f'`
    pub log_c3: f64,
    /// site correction of the joint sites on `g`
    pub log_c4: f64,
    /// constraint sites left out for a non-positive cavity
    pub excluded_sites: usize,
}

/// `-log N(m_cav | μ̃, v_cav + σ̃²)`
pub fn gaussian_site_correction(cavity: &Cavity, site_mean: f64, site_var: f64) -> f64 {
    -normal_log_pdf(cavity.mean(), site_mean, cavity.variance() + site_var)
}

fn site_correction(cavity: &Cavity, sites: &GaussianSites, i: usize) -> f64 {
    gaussian_site_correction(cavity, sites.site_mean()[i], sites.site_variance()[i])
}

impl EvidenceTerms {
    pub fn total(&self) -> f64 {
        self.mvn_f + self.mvn_g.iter().sum::<f64>() + self.constraint_terms()
    }

    /// Everything but the Gaussian terms
    pub fn constraint_terms(&self) -> f64 {
        self.log_k1 + self.log_k2 + self.log_c1 + self.log_c3 + self.log_c4
    }

    pub fn compute(
        f: &FProcess,
        g: &[GProcess],
        problem: &UnimodalProblem,
        options: &EpOptions,
        strategy: &dyn MomentStrategy,
    ) -> anyhow::Result<Self> {
        let mut ret = EvidenceTerms {
            mvn_f: f.posterior.mvn_log_normalizer()?,
            mvn_g: g
                .iter()
                .map(|g_p| g_p.posterior.mvn_log_normalizer())
                .collect::<anyhow::Result<Vec<_>>>()?,
            ..Default::default()
        };

        let mm = problem.num_constraints();

        for g_p in g {
            for j in 0..mm {
                let i = g_p.layout.deriv_index(0, j);
                let Some(cav) = Cavity::from_posterior(&g_p.posterior, i, &g_p.monotone) else {
                    ret.excluded_sites += 1;
                    continue;
                };
                let sign = problem.sign_labels[(j, g_p.dim)];
                ret.log_k1 += probit_log_normalizer(cav.mean(), cav.variance(), sign * options.nu);
                ret.log_k2 += site_correction(&cav, &g_p.monotone, i);
            }

            for j in 0..mm {
                let i_f = f.layout.deriv_index(g_p.dim, j);
                let (Some(cav_f), Some(cav_g)) = (
                    Cavity::from_posterior(&f.posterior, i_f, &f.sign),
                    Cavity::from_posterior(&g_p.posterior, j, &g_p.sign),
                ) else {
                    ret.excluded_sites += 1;
                    continue;
                };
                ret.log_c1 += strategy.log_normalizer(
                    cav_f.mean(),
                    cav_f.variance(),
                    cav_g.mean(),
                    cav_g.variance(),
                    options.nu2,
                );
                ret.log_c3 += site_correction(&cav_f, &f.sign, i_f);
                ret.log_c4 += site_correction(&cav_g, &g_p.sign, j);
            }
        }

        if ret.excluded_sites > 0 {
            warn!(
                "{} constraint site(s) left out of the evidence",
                ret.excluded_sites
            );
        }
        debug!("{:?}", ret);

        Ok(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn exact_gaussian_site_needs_no_correction() {
        // factor N(y | x, s2) under cavity N(m, v) has Z = N(y | m, v + s2)
        let cav = Cavity {
            eta: 0.4,
            theta: 0.8,
        };
        let (y, s2) = (1.3, 0.2);
        let log_z = normal_log_pdf(y, cav.mean(), cav.variance() + s2);
        let sites = GaussianSites::new(1, y / s2, 1.0 / s2);
        let corr = site_correction(&cav, &sites, 0);
        assert_abs_diff_eq!(log_z + corr, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn regrouping_does_not_change_the_total() {
        let terms = EvidenceTerms {
            mvn_f: -12.345678,
            mvn_g: vec![-3.25, 0.75],
            log_k1: -0.6931,
            log_k2: 4.5,
            log_c1: -2.1,
            log_c3: 8.25,
            log_c4: 1.0e-3,
            excluded_sites: 0,
        };
        let regrouped = (terms.log_k1 + terms.log_c1)
            + (terms.log_k2 + terms.log_c3 + terms.log_c4)
            + (terms.mvn_g[1] + terms.mvn_f + terms.mvn_g[0]);
        assert_relative_eq!(terms.total(), regrouped, max_relative = 1e-9);
        assert_relative_eq!(
            terms.total() - terms.constraint_terms(),
            terms.mvn_f + terms.mvn_g.iter().sum::<f64>(),
            max_relative = 1e-9
        );
    }
}
