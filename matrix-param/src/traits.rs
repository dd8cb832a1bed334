/// A vector of Gaussian factors kept in two natural statistics
/// `(η, θ)`: precision-weighted mean and precision
pub trait TwoStatParam {
    type Vec;
    type Scalar;

    fn new(dim: usize, eta0: Self::Scalar, theta0: Self::Scalar) -> Self;
    fn from_stat(eta: Self::Vec, theta: Self::Vec) -> anyhow::Result<Self>
    where
        Self: Sized;

    fn eta(&self) -> &Self::Vec;
    fn theta(&self) -> &Self::Vec;

    /// overwrite `(η[i], θ[i])`
    fn set_stat(&mut self, i: usize, eta: Self::Scalar, theta: Self::Scalar);

    /// `(η[i], θ[i]) <- (1-α) (η[i], θ[i]) + α (eta, theta)`
    fn damp_stat(&mut self, i: usize, eta: Self::Scalar, theta: Self::Scalar, alpha: Self::Scalar);

    /// fill `(η, θ)` on the coordinates `[lb, ub)`
    fn fill_block(&mut self, lb: usize, ub: usize, eta0: Self::Scalar, theta0: Self::Scalar);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Moment summaries of the sites
pub trait Inference {
    type Vec;

    /// `η / θ` (zero where `θ = 0`)
    fn site_mean(&self) -> &Self::Vec;

    /// `1 / θ` (infinite where `θ = 0`)
    fn site_variance(&self) -> &Self::Vec;

    fn calibrate(&mut self);
}
