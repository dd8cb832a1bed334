//! Moment matching for the joint sign-consistency factor between
//! `f'` and `g`:
//!
//! ```text
//! T(f', g) = A(f') B(g) + (1 - A(f')) (1 - B(g)),    A(f') = Φ(ν₂ f')
//! ```
//!
//! Under a product cavity `N(f' | m₁, v₁) N(g | m₂, v₂)` each marginal
//! of the tilted distribution is a two-component mixture, one
//! component per branch of `T`.

use crate::probit::*;
use clap::ValueEnum;
use serde::Serialize;

/// Floor on the matched variances
pub const MIN_TILTED_VARIANCE: f64 = 1e-12;

/// Mean and variance of one marginal of a tilted distribution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarginalMoments {
    pub mean: f64,
    pub variance: f64,
}

impl MarginalMoments {
    pub fn second_moment(&self) -> f64 {
        self.variance + self.mean * self.mean
    }
}

/// Normalizer and matched moments of the joint `(f', g)` factor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointMoments {
    pub log_z: f64,
    pub fp: MarginalMoments,
    pub g: MarginalMoments,
}

impl JointMoments {
    pub fn z(&self) -> f64 {
        self.log_z.exp()
    }

    /// `(Z, E f', E f'², E g, E g²)`
    pub fn as_tuple(&self) -> (f64, f64, f64, f64, f64) {
        (
            self.z(),
            self.fp.mean,
            self.fp.second_moment(),
            self.g.mean,
            self.g.second_moment(),
        )
    }

    /// `Z` is neither zero nor NaN, and both marginals are usable
    pub fn is_proper(&self) -> bool {
        self.log_z.is_finite()
            && self.fp.mean.is_finite()
            && self.g.mean.is_finite()
            && self.fp.variance.is_finite()
            && self.g.variance.is_finite()
    }
}

/// Pluggable moment computation for the joint `f'`/`g` factor
pub trait MomentStrategy {
    fn match_moments(
        &self,
        m_cav_fp: f64,
        v_cav_fp: f64,
        m_cav_g: f64,
        v_cav_g: f64,
        nu2: f64,
    ) -> JointMoments;

    /// `log Z` alone; used by the evidence
    fn log_normalizer(
        &self,
        m_cav_fp: f64,
        v_cav_fp: f64,
        m_cav_g: f64,
        v_cav_g: f64,
        nu2: f64,
    ) -> f64 {
        self.match_moments(m_cav_fp, v_cav_fp, m_cav_g, v_cav_g, nu2)
            .log_z
    }
}

/// `B(g) = 1[g > 0]`: the sign of `g` decides the sign of `f'`
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictMoments;

/// `B(g) = Φ(g)`: `g` carries soft information about the sign of `f'`
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftInformationMoments;

impl MomentStrategy for StrictMoments {
    fn match_moments(&self, m_fp: f64, v_fp: f64, m_g: f64, v_g: f64, nu2: f64) -> JointMoments {
        let fp_up = probit_tilted(m_fp, v_fp, nu2);
        let fp_down = probit_tilted(m_fp, v_fp, -nu2);
        let g_up = step_tilted(m_g, v_g, 1.0);
        let g_down = step_tilted(m_g, v_g, -1.0);
        two_branch_moments((&fp_up, &fp_down), (&g_up, &g_down))
    }
}

impl MomentStrategy for SoftInformationMoments {
    fn match_moments(&self, m_fp: f64, v_fp: f64, m_g: f64, v_g: f64, nu2: f64) -> JointMoments {
        let fp_up = probit_tilted(m_fp, v_fp, nu2);
        let fp_down = probit_tilted(m_fp, v_fp, -nu2);
        let g_up = probit_tilted(m_g, v_g, 1.0);
        let g_down = probit_tilted(m_g, v_g, -1.0);
        two_branch_moments((&fp_up, &fp_down), (&g_up, &g_down))
    }
}

/// Combine per-branch tilted moments, `up` for `A B`, `down` for
/// `(1 - A)(1 - B)`, into the joint normalizer and the moments of the
/// two mixture marginals.
fn two_branch_moments(
    fp: (&TiltedMoments, &TiltedMoments),
    g: (&TiltedMoments, &TiltedMoments),
) -> JointMoments {
    let (fp_up, fp_down) = fp;
    let (g_up, g_down) = g;

    let log_up = fp_up.log_z + g_up.log_z;
    let log_down = fp_down.log_z + g_down.log_z;
    let log_z = log_sum_exp2(log_up, log_down);

    if !log_z.is_finite() {
        let nan = MarginalMoments {
            mean: f64::NAN,
            variance: f64::NAN,
        };
        return JointMoments {
            log_z,
            fp: nan,
            g: nan,
        };
    }

    let w_up = (log_up - log_z).exp();
    let w_down = (log_down - log_z).exp();

    JointMoments {
        log_z,
        fp: mixture(w_up, fp_up, w_down, fp_down),
        g: mixture(w_up, g_up, w_down, g_down),
    }
}

fn mixture(w1: f64, c1: &TiltedMoments, w2: f64, c2: &TiltedMoments) -> MarginalMoments {
    let mean = w1 * c1.mean + w2 * c2.mean;
    let delta = c1.mean - c2.mean;
    let variance = w1 * c1.variance + w2 * c2.variance + w1 * w2 * delta * delta;
    MarginalMoments {
        mean,
        variance: variance.max(MIN_TILTED_VARIANCE),
    }
}

/// Selects a [`MomentStrategy`] at call time
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MomentStrategyKind {
    #[default]
    Strict,
    SoftInformation,
}

impl MomentStrategyKind {
    pub fn strategy(&self) -> Box<dyn MomentStrategy> {
        match self {
            MomentStrategyKind::Strict => Box::new(StrictMoments),
            MomentStrategyKind::SoftInformation => Box::new(SoftInformationMoments),
        }
    }
}

impl std::fmt::Display for MomentStrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MomentStrategyKind::Strict => write!(f, "strict"),
            MomentStrategyKind::SoftInformation => write!(f, "soft-information"),
        }
    }
}
