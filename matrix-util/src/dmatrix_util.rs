pub use nalgebra::{DMatrix, DVector};
pub use rand::Rng;
pub use rand_distr::{StandardNormal, Uniform};
pub use rayon::prelude::*;

use crate::traits::SampleOps;
use num_traits::{Float, FromPrimitive};

impl<T> SampleOps for DMatrix<T>
where
    T: nalgebra::Scalar + Float + FromPrimitive + Send,
{
    type Mat = Self;
    type Scalar = T;

    fn runif(dd: usize, nn: usize) -> Self::Mat {
        let rvec: Vec<T> = (0..(dd * nn))
            .into_par_iter()
            .map_init(rand::rng, |rng, _| {
                let x: f64 = rng.random();
                T::from_f64(x).unwrap_or_else(T::zero)
            })
            .collect();

        DMatrix::from_vec(dd, nn, rvec)
    }

    fn rnorm_with<R: Rng>(dd: usize, nn: usize, rng: &mut R) -> Self::Mat {
        // sequential so that the stream is reproducible
        DMatrix::from_fn(dd, nn, |_, _| {
            let x: f64 = rng.sample(StandardNormal);
            T::from_f64(x).unwrap_or_else(T::zero)
        })
    }
}

/// Column-wise `x[,j] - mean(x[,j])`
pub fn centre_columns(xx: &DMatrix<f64>) -> DMatrix<f64> {
    let mut ret = xx.clone();
    for mut xx_j in ret.column_iter_mut() {
        let mu = xx_j.mean();
        xx_j.add_scalar_mut(-mu);
    }
    ret
}

/// `n` equally spaced points in `[lb, ub]` as an `n x 1` matrix
pub fn linspace(lb: f64, ub: f64, n: usize) -> DMatrix<f64> {
    if n < 2 {
        return DMatrix::from_element(n, 1, lb);
    }
    let step = (ub - lb) / (n - 1) as f64;
    DMatrix::from_fn(n, 1, |i, _| lb + step * i as f64)
}
