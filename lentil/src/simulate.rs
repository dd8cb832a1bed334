use crate::common::*;

use clap::ValueEnum;
use log::info;
use matrix_util::dmatrix_util::linspace;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Shape of the simulated function
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum UnimodalShape {
    /// `f(x) = -exp(-x²/2w²)`, decreasing then increasing
    #[default]
    Valley,
    /// `f(x) = exp(-x²/2w²)`, increasing then decreasing
    Bump,
}

impl UnimodalShape {
    pub fn eval(&self, x: f64, width: f64) -> f64 {
        let k = (-0.5 * x * x / (width * width)).exp();
        match self {
            UnimodalShape::Valley => -k,
            UnimodalShape::Bump => k,
        }
    }

    /// Sign label that makes `g` agree with this shape
    pub fn sign_label(&self) -> f64 {
        match self {
            UnimodalShape::Valley => 1.0,
            UnimodalShape::Bump => -1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedData {
    /// `n x 1` locations
    pub t: Mat,
    pub y: DVec,
    pub f_true: DVec,
}

///
/// Sample `y = f(t) + ε` on a regular grid over `[lb, ub]`
///
/// * `n` - number of points
/// * `shape` - valley or bump centred at zero
/// * `width` - width of the mode
/// * `noise_sd` - standard deviation of `ε`
/// * `seed` - random seed
///
pub fn simulate_unimodal(
    n: usize,
    lb: f64,
    ub: f64,
    shape: UnimodalShape,
    width: f64,
    noise_sd: f64,
    seed: u64,
) -> anyhow::Result<SimulatedData> {
    if n == 0 {
        anyhow::bail!("need at least one point");
    }
    if !(width > 0.0) {
        anyhow::bail!("width must be positive: {}", width);
    }
    let noise = Normal::new(0.0, noise_sd)
        .map_err(|e| anyhow::anyhow!("invalid noise sd {}: {}", noise_sd, e))?;

    info!(
        "Simulating {} points of a {:?} on [{}, {}]",
        n, shape, lb, ub
    );

    let mut rng = SmallRng::seed_from_u64(seed);
    let t = linspace(lb, ub, n);
    let f_true = DVec::from_fn(n, |i, _| shape.eval(t[(i, 0)], width));
    let y = DVec::from_fn(n, |i, _| f_true[i] + noise.sample(&mut rng));

    Ok(SimulatedData { t, y, f_true })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_data() -> anyhow::Result<()> {
        let a = simulate_unimodal(20, -2.0, 2.0, UnimodalShape::Bump, 1.0, 0.1, 3)?;
        let b = simulate_unimodal(20, -2.0, 2.0, UnimodalShape::Bump, 1.0, 0.1, 3)?;
        assert_eq!(a.y, b.y);
        assert_eq!(a.t.nrows(), 20);
        Ok(())
    }

    #[test]
    fn noiseless_valley_has_a_single_minimum() -> anyhow::Result<()> {
        let d = simulate_unimodal(41, -2.0, 2.0, UnimodalShape::Valley, 0.7, 0.0, 0)?;
        assert_eq!(d.y, d.f_true);
        let argmin = d.y.argmin().0;
        assert_eq!(argmin, 20);
        assert!((1..=argmin).all(|i| d.y[i] < d.y[i - 1]));
        assert!((argmin + 1..41).all(|i| d.y[i] > d.y[i - 1]));
        Ok(())
    }
}
