pub mod gaussian_sites;
pub mod traits;
