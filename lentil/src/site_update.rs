//! Site updates from matched moments.

use crate::cavity::Cavity;
use crate::common::*;
use log::debug;

/// Undamped site for one coordinate, waiting to be committed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteProposal {
    pub coord: usize,
    pub eta: f64,
    pub theta: f64,
    /// the precision was floored
    pub clamped: bool,
}

/// Site whose product with `cavity` has the matched `(mean, variance)`.
///
/// A non-positive site precision is replaced by `floor`, and `η` is
/// recomputed so that the tilted mean is kept.
pub fn propose_site(
    coord: usize,
    mean: f64,
    variance: f64,
    cavity: &Cavity,
    floor: f64,
) -> SiteProposal {
    let theta = 1.0 / variance - cavity.theta;
    if theta > 0.0 && theta.is_finite() {
        SiteProposal {
            coord,
            eta: mean / variance - cavity.eta,
            theta,
            clamped: false,
        }
    } else {
        debug!(
            "site {}: precision {:.3e} clamped to {:.1e}",
            coord, theta, floor
        );
        SiteProposal {
            coord,
            eta: mean * (floor + cavity.theta) - cavity.eta,
            theta: floor,
            clamped: true,
        }
    }
}

/// `site <- (1 - α) site + α proposal` for every proposal
pub fn commit_sites(sites: &mut GaussianSites, proposals: &[SiteProposal], damping: f64) {
    for p in proposals {
        sites.damp_stat(p.coord, p.eta, p.theta, damping);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn exact_update_reproduces_the_moments() {
        let cav = Cavity {
            eta: 0.5,
            theta: 2.0,
        };
        let (m, v) = (0.8, 0.25);
        let p = propose_site(3, m, v, &cav, 1e-10);
        assert!(!p.clamped);
        // (cavity × site) has precision 1/v and mean m
        assert_abs_diff_eq!(cav.theta + p.theta, 1.0 / v, epsilon = 1e-12);
        assert_abs_diff_eq!((cav.eta + p.eta) / (cav.theta + p.theta), m, epsilon = 1e-12);
    }

    #[test]
    fn wider_tilted_variance_is_floored() {
        let cav = Cavity {
            eta: 0.0,
            theta: 4.0,
        };
        let floor = 1e-6;
        let p = propose_site(0, 0.3, 1.0, &cav, floor);
        assert!(p.clamped);
        assert_abs_diff_eq!(p.theta, floor);
        assert_abs_diff_eq!((cav.eta + p.eta) / (cav.theta + p.theta), 0.3, epsilon = 1e-12);
    }

    #[test]
    fn damped_commit_keeps_precision_positive() {
        let mut sites = GaussianSites::new(2, 0.0, 1e-10);
        let cav = Cavity {
            eta: 1.0,
            theta: 1.0,
        };
        let proposals = [
            propose_site(0, 0.0, 10.0, &cav, 1e-10),
            propose_site(1, 2.0, 0.5, &cav, 1e-10),
        ];
        commit_sites(&mut sites, &proposals, 0.9);
        assert!(sites.theta().iter().all(|&t| t > 0.0));
        assert_abs_diff_eq!(sites.theta()[1], 0.1 * 1e-10 + 0.9 * 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sites.eta()[1], 0.9 * 3.0, epsilon = 1e-12);
    }
}
