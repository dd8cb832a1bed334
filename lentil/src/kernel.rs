//! Squared-exponential covariance of a latent function jointly with
//! its first partial derivatives.
//!
//! ```text
//! k(x, y)                 = a² exp(-|x - y|² / 2ℓ²)
//! cov(∂_p f(x), f(y))     = -k(x, y) (x_p - y_p) / ℓ²
//! cov(∂_p f(x), ∂_q f(y)) =  k(x, y) (δ_pq / ℓ² - (x_p - y_p)(x_q - y_q) / ℓ⁴)
//! ```
//!
//! Locations are the rows of an `n x P` matrix.

use crate::common::*;
use serde::Serialize;

/// Amplitude `a` and lengthscale `ℓ`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KernelParams {
    pub amplitude: f64,
    pub lengthscale: f64,
}

impl KernelParams {
    pub fn new(amplitude: f64, lengthscale: f64) -> anyhow::Result<Self> {
        let ret = Self {
            amplitude,
            lengthscale,
        };
        ret.validate()?;
        Ok(ret)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.amplitude > 0.0 && self.amplitude.is_finite()) {
            return Err(anyhow::anyhow!("kernel amplitude must be positive: {}", self.amplitude));
        }
        if !(self.lengthscale > 0.0 && self.lengthscale.is_finite()) {
            return Err(anyhow::anyhow!(
                "kernel lengthscale must be positive: {}",
                self.lengthscale
            ));
        }
        Ok(())
    }

    fn sq_dist(x: &Mat, i: usize, y: &Mat, j: usize) -> f64 {
        (0..x.ncols())
            .map(|p| {
                let d = x[(i, p)] - y[(j, p)];
                d * d
            })
            .sum()
    }

    /// `k(x_i, y_j)`
    pub fn value(&self, x: &Mat, i: usize, y: &Mat, j: usize) -> f64 {
        let l2 = self.lengthscale * self.lengthscale;
        self.amplitude * self.amplitude * (-0.5 * Self::sq_dist(x, i, y, j) / l2).exp()
    }

    /// `cov(∂_p f(x_i), f(y_j))`
    pub fn grad_value(&self, x: &Mat, i: usize, p: usize, y: &Mat, j: usize) -> f64 {
        let l2 = self.lengthscale * self.lengthscale;
        -self.value(x, i, y, j) * (x[(i, p)] - y[(j, p)]) / l2
    }

    /// `cov(∂_p f(x_i), ∂_q f(y_j))`
    pub fn grad_grad(&self, x: &Mat, i: usize, p: usize, y: &Mat, j: usize, q: usize) -> f64 {
        let l2 = self.lengthscale * self.lengthscale;
        let dp = x[(i, p)] - y[(j, p)];
        let dq = x[(i, q)] - y[(j, q)];
        let delta = if p == q { 1.0 / l2 } else { 0.0 };
        self.value(x, i, y, j) * (delta - dp * dq / (l2 * l2))
    }
}

/// Block index layout of a latent process observed through values at
/// `t` and partial derivatives at `t2`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JointLayout {
    pub num_values: usize,
    pub num_derivs: usize,
    pub deriv_dims: Vec<usize>,
}

impl JointLayout {
    pub fn new(num_values: usize, num_derivs: usize, deriv_dims: &[usize]) -> Self {
        Self {
            num_values,
            num_derivs,
            deriv_dims: deriv_dims.to_vec(),
        }
    }

    /// total dimension `N + |dims| M`
    pub fn dim(&self) -> usize {
        self.num_values + self.deriv_dims.len() * self.num_derivs
    }

    /// coordinate of `∂_{deriv_dims[b]} f(t2_j)`
    pub fn deriv_index(&self, block: usize, j: usize) -> usize {
        self.num_values + block * self.num_derivs + j
    }
}

fn check_columns(t: &Mat, t2: &Mat, deriv_dims: &[usize]) -> anyhow::Result<()> {
    if t.nrows() > 0 && t2.nrows() > 0 && t.ncols() != t2.ncols() {
        return Err(anyhow::anyhow!(
            "input dimensions differ: {} vs {}",
            t.ncols(),
            t2.ncols()
        ));
    }
    if t2.nrows() == 0 {
        return Ok(());
    }
    let ncols = t2.ncols();
    if let Some(&p) = deriv_dims.iter().find(|&&p| p >= ncols) {
        return Err(anyhow::anyhow!(
            "derivative dimension {} out of range for {} input columns",
            p,
            ncols
        ));
    }
    Ok(())
}

/// Joint prior covariance of `[f(t); ∂_{d₀} f(t2); ∂_{d₁} f(t2); ...]`
/// plus `jitter · I`
///
/// * `t` - `N x P` value locations
/// * `t2` - `M x P` derivative locations
/// * `deriv_dims` - input dimensions of the derivative blocks
pub fn joint_derivative_kernel(
    t: &Mat,
    t2: &Mat,
    params: &KernelParams,
    deriv_dims: &[usize],
    jitter: f64,
) -> anyhow::Result<Mat> {
    params.validate()?;
    check_columns(t, t2, deriv_dims)?;

    let layout = JointLayout::new(t.nrows(), t2.nrows(), deriv_dims);
    let (nn, mm) = (layout.num_values, layout.num_derivs);
    let mut kk = Mat::zeros(layout.dim(), layout.dim());

    for i in 0..nn {
        for j in 0..=i {
            let k = params.value(t, i, t, j);
            kk[(i, j)] = k;
            kk[(j, i)] = k;
        }
    }

    for (b, &p) in deriv_dims.iter().enumerate() {
        for i in 0..mm {
            let r = layout.deriv_index(b, i);
            for j in 0..nn {
                let k = params.grad_value(t2, i, p, t, j);
                kk[(r, j)] = k;
                kk[(j, r)] = k;
            }
        }
    }

    for (b, &p) in deriv_dims.iter().enumerate() {
        for (c, &q) in deriv_dims.iter().enumerate().take(b + 1) {
            for i in 0..mm {
                for j in 0..mm {
                    let r = layout.deriv_index(b, i);
                    let s = layout.deriv_index(c, j);
                    let k = params.grad_grad(t2, i, p, t2, j, q);
                    kk[(r, s)] = k;
                    kk[(s, r)] = k;
                }
            }
        }
    }

    for i in 0..kk.nrows() {
        kk[(i, i)] += jitter;
    }

    Ok(kk)
}

/// Covariance between `f(t_pred)` and the joint process
/// `[f(t); ∂ f(t2)]`, a `P_pred x D` matrix
pub fn cross_covariance(
    t_pred: &Mat,
    t: &Mat,
    t2: &Mat,
    params: &KernelParams,
    deriv_dims: &[usize],
) -> anyhow::Result<Mat> {
    params.validate()?;
    check_columns(t, t2, deriv_dims)?;

    let layout = JointLayout::new(t.nrows(), t2.nrows(), deriv_dims);
    let mut kpf = Mat::zeros(t_pred.nrows(), layout.dim());

    for a in 0..t_pred.nrows() {
        for j in 0..layout.num_values {
            kpf[(a, j)] = params.value(t_pred, a, t, j);
        }
        for (b, &p) in deriv_dims.iter().enumerate() {
            for j in 0..layout.num_derivs {
                // cov(f(x), ∂_p f(y)) = cov(∂_p f(y), f(x))
                kpf[(a, layout.deriv_index(b, j))] = params.grad_value(t2, j, p, t_pred, a);
            }
        }
    }
    Ok(kpf)
}

/// `k(t_pred, t_pred)`
pub fn value_kernel(t_pred: &Mat, params: &KernelParams) -> anyhow::Result<Mat> {
    params.validate()?;
    let n = t_pred.nrows();
    Ok(Mat::from_fn(n, n, |i, j| params.value(t_pred, i, t_pred, j)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn column(xs: &[f64]) -> Mat {
        Mat::from_column_slice(xs.len(), 1, xs)
    }

    #[test]
    fn one_dimensional_blocks() -> anyhow::Result<()> {
        let t = column(&[-1.0, 0.0, 2.0]);
        let t2 = column(&[0.5, 1.0]);
        let params = KernelParams::new(1.5, 0.8)?;
        let kk = joint_derivative_kernel(&t, &t2, &params, &[0], 0.0)?;
        assert_eq!(kk.shape(), (5, 5));

        let (a2, l2) = (1.5 * 1.5, 0.8 * 0.8);
        let k = |x: f64, y: f64| a2 * (-0.5 * (x - y) * (x - y) / l2).exp();

        // K_ff
        assert_abs_diff_eq!(kk[(0, 2)], k(-1.0, 2.0), epsilon = 1e-14);
        // K_f'f = -k (t2 - t) / ℓ²
        let want = -k(0.5, -1.0) * (0.5 + 1.0) / l2;
        assert_abs_diff_eq!(kk[(3, 0)], want, epsilon = 1e-14);
        assert_abs_diff_eq!(kk[(0, 3)], want, epsilon = 1e-14);
        // K_f'f' = k (1 - d²/ℓ²) / ℓ²
        let d = 0.5 - 1.0;
        let want = k(0.5, 1.0) * (1.0 - d * d / l2) / l2;
        assert_abs_diff_eq!(kk[(3, 4)], want, epsilon = 1e-14);
        assert_abs_diff_eq!(kk[(4, 4)], a2 / l2, epsilon = 1e-14);
        Ok(())
    }

    #[test]
    fn derivative_covariance_matches_finite_differences() -> anyhow::Result<()> {
        let params = KernelParams::new(1.0, 0.7)?;
        let x = Mat::from_row_slice(1, 2, &[0.3, -0.2]);
        let y = Mat::from_row_slice(1, 2, &[-0.1, 0.4]);
        let h = 1e-5;

        let shift = |m: &Mat, p: usize, s: f64| {
            let mut m = m.clone();
            m[(0, p)] += s;
            m
        };

        // ∂/∂x_1 k(x, y)
        let fd = (params.value(&shift(&x, 1, h), 0, &y, 0)
            - params.value(&shift(&x, 1, -h), 0, &y, 0))
            / (2.0 * h);
        assert_abs_diff_eq!(params.grad_value(&x, 0, 1, &y, 0), fd, epsilon = 1e-8);

        // ∂²/∂x_0 ∂y_1 k(x, y)
        let fd = (params.grad_value(&x, 0, 0, &shift(&y, 1, h), 0)
            - params.grad_value(&x, 0, 0, &shift(&y, 1, -h), 0))
            / (2.0 * h);
        assert_abs_diff_eq!(params.grad_grad(&x, 0, 0, &y, 0, 1), fd, epsilon = 1e-7);
        Ok(())
    }

    #[test]
    fn joint_kernel_is_positive_definite() -> anyhow::Result<()> {
        let t = Mat::from_row_slice(4, 2, &[0.0, 0.0, 1.0, 0.5, -0.5, 1.0, 0.3, -0.7]);
        let params = KernelParams::new(1.0, 1.0)?;
        let kk = joint_derivative_kernel(&t, &t, &params, &[0, 1], 1e-8)?;
        assert_eq!(kk.shape(), (12, 12));
        assert_abs_diff_eq!(kk.clone(), kk.transpose(), epsilon = 1e-14);
        assert!(kk.cholesky().is_some());
        Ok(())
    }

    #[test]
    fn cross_covariance_agrees_with_joint_kernel() -> anyhow::Result<()> {
        let t = column(&[-1.0, 0.0, 1.0]);
        let t2 = column(&[-0.5, 0.5]);
        let params = KernelParams::new(0.9, 1.2)?;
        let kk = joint_derivative_kernel(&t, &t2, &params, &[0], 0.0)?;
        let kpf = cross_covariance(&t, &t, &t2, &params, &[0])?;
        for a in 0..3 {
            for c in 0..5 {
                assert_abs_diff_eq!(kpf[(a, c)], kk[(a, c)], epsilon = 1e-14);
            }
        }
        Ok(())
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert!(KernelParams::new(0.0, 1.0).is_err());
        assert!(KernelParams::new(1.0, f64::NAN).is_err());
        let params = KernelParams {
            amplitude: 1.0,
            lengthscale: 1.0,
        };
        let t = column(&[0.0]);
        assert!(joint_derivative_kernel(&t, &t, &params, &[1], 0.0).is_err());
    }
}
