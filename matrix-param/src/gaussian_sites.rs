use crate::traits::*;
use nalgebra::DVector;

/// Gaussian site approximations, one per coordinate of a latent
/// process, stored as natural parameters.
///
/// `θ[i] = 0` means that coordinate carries no site of this family.
#[derive(Debug, Clone)]
pub struct GaussianSites {
    /////////////////////////
    // natural parameters //
    /////////////////////////
    eta: DVector<f64>,
    theta: DVector<f64>,
    //////////////////////////
    // calibrated summaries //
    //////////////////////////
    estimated_mean: DVector<f64>,
    estimated_variance: DVector<f64>,
}

impl TwoStatParam for GaussianSites {
    type Vec = DVector<f64>;
    type Scalar = f64;

    fn new(dim: usize, eta0: f64, theta0: f64) -> Self {
        let mut ret = Self {
            eta: DVector::from_element(dim, eta0),
            theta: DVector::from_element(dim, theta0.max(0.0)),
            estimated_mean: DVector::zeros(dim),
            estimated_variance: DVector::zeros(dim),
        };
        ret.calibrate();
        ret
    }

    fn from_stat(eta: DVector<f64>, theta: DVector<f64>) -> anyhow::Result<Self> {
        if eta.len() != theta.len() {
            return Err(anyhow::anyhow!(
                "eta ({}) and theta ({}) differ in length",
                eta.len(),
                theta.len()
            ));
        }
        if let Some(i) = theta.iter().position(|&t| t.is_nan() || t < 0.0) {
            return Err(anyhow::anyhow!("negative site precision at {}: {}", i, theta[i]));
        }
        let dim = eta.len();
        let mut ret = Self {
            eta,
            theta,
            estimated_mean: DVector::zeros(dim),
            estimated_variance: DVector::zeros(dim),
        };
        ret.calibrate();
        Ok(ret)
    }

    fn eta(&self) -> &DVector<f64> {
        &self.eta
    }

    fn theta(&self) -> &DVector<f64> {
        &self.theta
    }

    fn set_stat(&mut self, i: usize, eta: f64, theta: f64) {
        debug_assert!(theta >= 0.0);
        self.eta[i] = eta;
        self.theta[i] = theta;
        self.calibrate_at(i);
    }

    fn damp_stat(&mut self, i: usize, eta: f64, theta: f64, alpha: f64) {
        let eta = (1.0 - alpha) * self.eta[i] + alpha * eta;
        let theta = (1.0 - alpha) * self.theta[i] + alpha * theta;
        self.set_stat(i, eta, theta);
    }

    fn fill_block(&mut self, lb: usize, ub: usize, eta0: f64, theta0: f64) {
        for i in lb..ub {
            self.eta[i] = eta0;
            self.theta[i] = theta0.max(0.0);
            self.calibrate_at(i);
        }
    }

    fn len(&self) -> usize {
        self.eta.len()
    }
}

impl Inference for GaussianSites {
    type Vec = DVector<f64>;

    fn site_mean(&self) -> &DVector<f64> {
        &self.estimated_mean
    }

    fn site_variance(&self) -> &DVector<f64> {
        &self.estimated_variance
    }

    fn calibrate(&mut self) {
        for i in 0..self.len() {
            self.calibrate_at(i);
        }
    }
}

impl GaussianSites {
    fn calibrate_at(&mut self, i: usize) {
        let (eta, theta) = (self.eta[i], self.theta[i]);
        if theta > 0.0 {
            self.estimated_mean[i] = eta / theta;
            self.estimated_variance[i] = 1.0 / theta;
        } else {
            self.estimated_mean[i] = 0.0;
            self.estimated_variance[i] = f64::INFINITY;
        }
    }

    /// Element-wise sum of natural parameters over several site
    /// families defined on the same coordinates
    pub fn sum_stat(sites: &[&GaussianSites]) -> anyhow::Result<(DVector<f64>, DVector<f64>)> {
        let dim = sites.first().map(|s| s.len()).unwrap_or(0);
        let mut eta = DVector::zeros(dim);
        let mut theta = DVector::zeros(dim);
        for s in sites {
            if s.len() != dim {
                return Err(anyhow::anyhow!(
                    "site families differ in length: {} vs {}",
                    s.len(),
                    dim
                ));
            }
            eta += &s.eta;
            theta += &s.theta;
        }
        Ok((eta, theta))
    }

    /// Smallest precision, `None` when empty
    pub fn min_theta(&self) -> Option<f64> {
        self.theta.iter().copied().reduce(f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn damped_update_is_convex_combination() {
        let mut sites = GaussianSites::new(3, 0.0, 1.0);
        sites.damp_stat(1, 2.0, 3.0, 0.9);
        assert_abs_diff_eq!(sites.eta()[1], 1.8, epsilon = 1e-12);
        assert_abs_diff_eq!(sites.theta()[1], 0.1 + 2.7, epsilon = 1e-12);
        assert_abs_diff_eq!(sites.theta()[0], 1.0);
        assert_abs_diff_eq!(sites.site_mean()[1], 1.8 / 2.8, epsilon = 1e-12);
        assert_abs_diff_eq!(sites.site_variance()[1], 1.0 / 2.8, epsilon = 1e-12);
    }

    #[test]
    fn empty_coordinates_have_infinite_variance() {
        let mut sites = GaussianSites::new(4, 0.0, 0.0);
        sites.fill_block(2, 4, 0.5, 1e-10);
        assert!(sites.site_variance()[0].is_infinite());
        assert_abs_diff_eq!(sites.site_variance()[3], 1e10, epsilon = 1.0);
        assert_abs_diff_eq!(sites.min_theta().unwrap(), 0.0);
    }

    #[test]
    fn negative_precision_is_rejected() {
        let eta = DVector::from_vec(vec![0.0, 1.0]);
        let theta = DVector::from_vec(vec![1.0, -1.0]);
        assert!(GaussianSites::from_stat(eta, theta).is_err());
    }

    #[test]
    fn sum_of_families() -> anyhow::Result<()> {
        let a = GaussianSites::new(2, 1.0, 2.0);
        let b = GaussianSites::new(2, -0.5, 0.5);
        let (eta, theta) = GaussianSites::sum_stat(&[&a, &b])?;
        assert_abs_diff_eq!(eta[0], 0.5);
        assert_abs_diff_eq!(theta[1], 2.5);

        let c = GaussianSites::new(3, 0.0, 0.0);
        assert!(GaussianSites::sum_stat(&[&a, &c]).is_err());
        Ok(())
    }
}
