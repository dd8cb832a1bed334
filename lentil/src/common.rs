pub const DEFAULT_MAX_ITERS: usize = 50;
pub const DEFAULT_NU: f64 = 10.0;
pub const DEFAULT_NU2: f64 = 1.0;
pub const DEFAULT_DAMPING: f64 = 0.9;
pub const DEFAULT_TOLERANCE: f64 = 1e-4;
pub const DEFAULT_JITTER: f64 = 1e-8;
pub const DEFAULT_MONOTONE_FLOOR: f64 = 1e-10;
pub const DEFAULT_SIGN_FLOOR: f64 = 1e-6;
pub const DEFAULT_INITIAL_SITE_PRECISION: f64 = 1e-10;

pub const LN_2PI: f64 = 1.837_877_066_409_345_5;

pub type Mat = nalgebra::DMatrix<f64>;
pub type DVec = nalgebra::DVector<f64>;

pub use matrix_param::gaussian_sites::GaussianSites;
pub use matrix_param::traits::{Inference, TwoStatParam};
