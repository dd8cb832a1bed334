//! Gaussian/probit integrals used by the moment matchers.
//!
//! For a Gaussian `N(x | m, v)` multiplied by a probit factor
//! `Φ(s x)` the tilted normalizer and moments are closed form:
//!
//! ```text
//! z   = s m / sqrt(1 + s² v)
//! Z   = Φ(z)
//! E x = m + s v λ(z) / sqrt(1 + s² v)
//! V x = v - s² v² λ(z) (z + λ(z)) / (1 + s² v)
//! ```
//!
//! where `λ(z) = φ(z) / Φ(z)` is the inverse Mills ratio.

use crate::common::LN_2PI;
use special::Error;
use std::f64::consts::{PI, SQRT_2};

/// below this, `Φ(z)` is evaluated by its asymptotic expansion
const LOG_CDF_TAIL: f64 = -30.0;

/// Normalizer and first two central moments of a tilted distribution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TiltedMoments {
    pub log_z: f64,
    pub mean: f64,
    pub variance: f64,
}

impl TiltedMoments {
    pub fn z(&self) -> f64 {
        self.log_z.exp()
    }

    pub fn second_moment(&self) -> f64 {
        self.variance + self.mean * self.mean
    }

    /// `Z` is neither zero nor NaN, and the moments are finite
    pub fn is_proper(&self) -> bool {
        self.log_z.is_finite()
            && self.mean.is_finite()
            && self.variance.is_finite()
            && self.variance > 0.0
    }
}

/// `Φ(z)`
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (-z / SQRT_2).compl_error()
}

/// `log Φ(z)`, accurate in both tails
pub fn normal_log_cdf(z: f64) -> f64 {
    if z.is_nan() {
        return f64::NAN;
    }
    if z > 0.0 {
        // Φ(z) = 1 - Φ(-z)
        (-0.5 * (z / SQRT_2).compl_error()).ln_1p()
    } else if z > LOG_CDF_TAIL {
        (0.5 * (-z / SQRT_2).compl_error()).ln()
    } else {
        let z2 = z * z;
        let series = 1.0 - 1.0 / z2 + 3.0 / (z2 * z2) - 15.0 / (z2 * z2 * z2)
            + 105.0 / (z2 * z2 * z2 * z2);
        -0.5 * z2 - (-z).ln() - 0.5 * LN_2PI + series.ln()
    }
}

/// `log N(x | m, v)`
pub fn normal_log_pdf(x: f64, m: f64, v: f64) -> f64 {
    -0.5 * (2.0 * PI * v).ln() - (x - m) * (x - m) / (2.0 * v)
}

/// `λ(z) = φ(z) / Φ(z)`
pub fn inverse_mills(z: f64) -> f64 {
    (normal_log_pdf(z, 0.0, 1.0) - normal_log_cdf(z)).exp()
}

/// `log(exp(a) + exp(b))`
pub fn log_sum_exp2(a: f64, b: f64) -> f64 {
    let m = a.max(b);
    if m == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    m + ((a - m).exp() + (b - m).exp()).ln()
}

/// Tilted moments of `Φ(slope · x) N(x | mean, var)`.
///
/// `slope = 0` leaves the Gaussian untouched with `Z = 1/2`.
pub fn probit_tilted(mean: f64, var: f64, slope: f64) -> TiltedMoments {
    let s2v = slope * slope * var;
    let denom = (1.0 + s2v).sqrt();
    let z = slope * mean / denom;
    let lam = inverse_mills(z);

    // λ(z + λ) lies in (0, 1)
    let shrink = (lam * (z + lam)).clamp(0.0, 1.0);

    TiltedMoments {
        log_z: normal_log_cdf(z),
        mean: mean + slope * var * lam / denom,
        variance: var - slope * slope * var * var * shrink / (1.0 + s2v),
    }
}

/// Tilted moments of `1[sign · x > 0] N(x | mean, var)`, the
/// `slope → ∞` limit of [`probit_tilted`]
pub fn step_tilted(mean: f64, var: f64, sign: f64) -> TiltedMoments {
    let sd = var.sqrt();
    let z = sign * mean / sd;
    let lam = inverse_mills(z);
    let shrink = (lam * (z + lam)).clamp(0.0, 1.0);

    TiltedMoments {
        log_z: normal_log_cdf(z),
        mean: mean + sign * sd * lam,
        variance: var * (1.0 - shrink),
    }
}

/// `log ∫ Φ(slope · x) N(x | mean, var) dx`
pub fn probit_log_normalizer(mean: f64, var: f64, slope: f64) -> f64 {
    normal_log_cdf(slope * mean / (1.0 + slope * slope * var).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// brute-force `(Z, E x, V x)` of `factor(x) N(x | m, v)`
    fn quadrature(m: f64, v: f64, factor: impl Fn(f64) -> f64) -> (f64, f64, f64) {
        let sd = v.sqrt();
        let (lb, ub) = (m - 12.0 * sd, m + 12.0 * sd);
        let n = 200_000;
        let h = (ub - lb) / n as f64;
        let (mut z, mut s1, mut s2) = (0.0, 0.0, 0.0);
        for i in 0..=n {
            let x = lb + h * i as f64;
            let w = if i == 0 || i == n { 0.5 } else { 1.0 };
            let p = w * h * factor(x) * normal_log_pdf(x, m, v).exp();
            z += p;
            s1 += p * x;
            s2 += p * x * x;
        }
        let mean = s1 / z;
        (z, mean, s2 / z - mean * mean)
    }

    #[test]
    fn cdf_landmarks() {
        assert_abs_diff_eq!(normal_cdf(0.0), 0.5, epsilon = 1e-15);
        assert_abs_diff_eq!(normal_cdf(1.959963984540054), 0.975, epsilon = 1e-12);
        assert_abs_diff_eq!(normal_log_cdf(0.0), 0.5f64.ln(), epsilon = 1e-15);
    }

    #[test]
    fn log_cdf_is_continuous_at_the_tail_switch() {
        let below = normal_log_cdf(LOG_CDF_TAIL - 1e-9);
        let above = normal_log_cdf(LOG_CDF_TAIL + 1e-9);
        assert!((below - above).abs() < 1e-6, "{} vs {}", below, above);
        assert!(normal_log_cdf(-200.0).is_finite());
        assert!(normal_log_cdf(40.0) <= 0.0);
    }

    #[test]
    fn log_sum_exp_handles_empty_branches() {
        assert_abs_diff_eq!(log_sum_exp2(0.0, 0.0), 2f64.ln(), epsilon = 1e-15);
        assert_abs_diff_eq!(log_sum_exp2(f64::NEG_INFINITY, -3.0), -3.0);
        assert_eq!(
            log_sum_exp2(f64::NEG_INFINITY, f64::NEG_INFINITY),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn probit_tilted_matches_quadrature() {
        for &(m, v, s) in &[(0.3, 0.8, 10.0), (-1.0, 2.0, 1.0), (0.5, 0.1, -3.0)] {
            let t = probit_tilted(m, v, s);
            let (z, mean, var) = quadrature(m, v, |x| normal_cdf(s * x));
            assert_abs_diff_eq!(t.z(), z, epsilon = 1e-6);
            assert_abs_diff_eq!(t.mean, mean, epsilon = 1e-6);
            assert_abs_diff_eq!(t.variance, var, epsilon = 1e-6);
        }
    }

    #[test]
    fn step_tilted_matches_quadrature() {
        let (m, v) = (-0.4, 1.5);
        let t = step_tilted(m, v, 1.0);
        let (z, mean, var) = quadrature(m, v, |x| if x > 0.0 { 1.0 } else { 0.0 });
        assert_abs_diff_eq!(t.z(), z, epsilon = 5e-4);
        assert_abs_diff_eq!(t.mean, mean, epsilon = 5e-4);
        assert_abs_diff_eq!(t.variance, var, epsilon = 5e-4);
    }

    #[test]
    fn flat_probit_leaves_the_gaussian_alone() {
        let t = probit_tilted(1.3, 0.7, 0.0);
        assert_abs_diff_eq!(t.z(), 0.5, epsilon = 1e-15);
        assert_abs_diff_eq!(t.mean, 1.3, epsilon = 1e-15);
        assert_abs_diff_eq!(t.variance, 0.7, epsilon = 1e-15);
    }

    #[test]
    fn far_tail_variance_stays_positive() {
        let t = probit_tilted(-50.0, 1.0, 10.0);
        assert!(t.variance > 0.0 && t.variance <= 1.0);
        assert!(t.log_z.is_finite());
    }
}
