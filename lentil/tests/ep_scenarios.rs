use approx::assert_abs_diff_eq;
use lentil::common::*;
use lentil::ep::*;
use lentil::kernel::{joint_derivative_kernel, KernelParams};
use lentil::moments::MomentStrategyKind;
use lentil::simulate::UnimodalShape;

const NOISE: [f64; 5] = [0.05, -0.03, 0.02, -0.04, 0.01];

fn valley_problem() -> anyhow::Result<(UnimodalProblem, DVec)> {
    let xs = [-2.0, -1.0, 0.0, 1.0, 2.0];
    let t = Mat::from_column_slice(5, 1, &xs);
    let f_true = DVec::from_fn(5, |i, _| UnimodalShape::Valley.eval(xs[i], 1.0));
    let y = DVec::from_fn(5, |i, _| f_true[i] + NOISE[i]);
    let kernel = KernelParams::new(1.0, 1.0)?;
    Ok((UnimodalProblem::new(t, y, kernel, 0.01), f_true))
}

#[test]
fn valley_converges_and_tracks_the_truth() -> anyhow::Result<()> {
    let (problem, f_true) = valley_problem()?;
    let fit = run_ep(&problem, &EpOptions::default())?;

    assert!(fit.diagnostics.converged, "{:?}", fit.diagnostics);
    assert_eq!(fit.diagnostics.status, EpStatus::Converged);
    assert!(fit.diagnostics.iterations <= 50);
    assert!(fit.log_evidence.is_finite());

    for i in 0..5 {
        assert!(
            (fit.f.posterior.mu[i] - f_true[i]).abs() < 0.2,
            "f({}) = {} vs {}",
            i,
            fit.f.posterior.mu[i],
            f_true[i]
        );
    }
    Ok(())
}

#[test]
fn prediction_at_the_data_reproduces_the_posterior() -> anyhow::Result<()> {
    let (problem, _) = valley_problem()?;
    let options = EpOptions::default();
    let fit = run_ep(&problem, &options)?;
    let (mean, var) = fit.predict_f(&problem, &problem.t, options.jitter, false)?;
    for i in 0..5 {
        assert_abs_diff_eq!(mean[i], fit.f.posterior.mu[i], epsilon = 1e-4);
        assert_abs_diff_eq!(var[i], fit.f.posterior.sigma_diag[i], epsilon = 1e-4);
    }
    let (_, var_y) = fit.predict_f(&problem, &problem.t, options.jitter, true)?;
    assert_abs_diff_eq!(var_y[2] - var[2], 0.01, epsilon = 1e-12);
    Ok(())
}

#[test]
fn without_constraints_it_is_plain_gp_regression() -> anyhow::Result<()> {
    let (problem, _) = valley_problem()?;
    let problem = problem.with_constraint_points(Mat::zeros(0, 1));
    let options = EpOptions::default();
    let fit = run_ep(&problem, &options)?;

    assert!(fit.diagnostics.converged);
    assert_eq!(fit.diagnostics.skipped_sites, 0);

    let kk = joint_derivative_kernel(&problem.t, &problem.t2, &problem.kernel_f, &[0], options.jitter)?;
    let cc = &kk + Mat::identity(5, 5) * problem.noise_variance;
    let chol = cc.clone().cholesky().unwrap();
    let alpha = chol.solve(&problem.y);
    let mu = &kk * &alpha;
    let sigma = &kk - &kk * chol.solve(&kk);

    assert_abs_diff_eq!(fit.f.posterior.mu, mu, epsilon = 1e-8);
    assert_abs_diff_eq!(fit.f.posterior.sigma, sigma, epsilon = 1e-8);

    let log_det = 2.0 * chol.l().diagonal().iter().map(|x| x.ln()).sum::<f64>();
    let log_ml = -0.5 * problem.y.dot(&alpha) - 0.5 * log_det - 2.5 * LN_2PI;
    assert_abs_diff_eq!(fit.log_evidence, log_ml, epsilon = 1e-8);
    assert_abs_diff_eq!(fit.evidence.constraint_terms(), 0.0);
    Ok(())
}

#[test]
fn same_seed_same_trajectory() -> anyhow::Result<()> {
    let (problem, _) = valley_problem()?;
    let options = EpOptions {
        refresh: RefreshSchedule::PerSite,
        seed: 11,
        max_iters: 7,
        ..Default::default()
    };
    let a = run_ep(&problem, &options)?;
    let b = run_ep(&problem, &options)?;
    assert_eq!(a.f.sign.eta(), b.f.sign.eta());
    assert_eq!(a.f.sign.theta(), b.f.sign.theta());
    assert_eq!(a.g[0].monotone.eta(), b.g[0].monotone.eta());
    assert_eq!(a.f.posterior.mu, b.f.posterior.mu);
    assert_eq!(a.log_evidence, b.log_evidence);
    Ok(())
}

#[test]
fn schedules_share_the_fixed_point() -> anyhow::Result<()> {
    let (problem, _) = valley_problem()?;
    let batched = run_ep(&problem, &EpOptions::default())?;
    let sequential = run_ep(
        &problem,
        &EpOptions {
            refresh: RefreshSchedule::PerSite,
            ..Default::default()
        },
    )?;
    for i in 0..5 {
        assert_abs_diff_eq!(
            batched.f.posterior.mu[i],
            sequential.f.posterior.mu[i],
            epsilon = 1e-2
        );
    }
    Ok(())
}

#[test]
fn flipped_labels_mirror_the_posterior() -> anyhow::Result<()> {
    let (problem, _) = valley_problem()?;
    let mut flipped = problem.clone();
    flipped.y = -&problem.y;
    flipped.sign_labels = -&problem.sign_labels;

    let options = EpOptions {
        max_iters: 10,
        ..Default::default()
    };
    let a = run_ep(&problem, &options)?;
    let b = run_ep(&flipped, &options)?;

    assert_abs_diff_eq!(a.f.posterior.mu, -&b.f.posterior.mu, epsilon = 1e-9);
    assert_abs_diff_eq!(a.g[0].posterior.mu, -&b.g[0].posterior.mu, epsilon = 1e-9);
    assert_abs_diff_eq!(
        a.g[0].posterior.sigma_diag,
        b.g[0].posterior.sigma_diag,
        epsilon = 1e-9
    );
    assert_abs_diff_eq!(a.log_evidence, b.log_evidence, epsilon = 1e-9);
    Ok(())
}

#[test]
fn conflicting_labels_keep_precisions_positive() -> anyhow::Result<()> {
    let (problem, _) = valley_problem()?;
    let problem = problem.with_sign_labels(Mat::from_element(5, 1, -1.0));
    for kind in [MomentStrategyKind::Strict, MomentStrategyKind::SoftInformation] {
        let fit = run_ep(
            &problem,
            &EpOptions {
                moment_strategy: kind,
                max_iters: 20,
                ..Default::default()
            },
        )?;
        let nn = problem.num_obs();
        assert!(fit.f.sign.theta().iter().skip(nn).all(|&t| t > 0.0));
        for g in &fit.g {
            assert!(g.sign.theta().iter().take(5).all(|&t| t > 0.0));
            assert!(g.monotone.theta().iter().skip(5).all(|&t| t > 0.0));
        }
        assert!(fit.f.posterior.sigma_diag.iter().all(|&v| v > 0.0));
        assert!(fit.diagnostics.iterations >= 1);
    }
    Ok(())
}

#[test]
fn two_input_dimensions() -> anyhow::Result<()> {
    let grid = [-1.0, 0.0, 1.0];
    let mut rows = vec![];
    for &a in &grid {
        for &b in &grid {
            rows.push(a);
            rows.push(b);
        }
    }
    let t = Mat::from_row_slice(9, 2, &rows);
    let y = DVec::from_fn(9, |i, _| {
        let (a, b) = (t[(i, 0)], t[(i, 1)]);
        -(-0.5 * (a * a + b * b)).exp()
    });
    let problem = UnimodalProblem::new(t, y, KernelParams::new(1.0, 1.0)?, 0.01);
    let fit = run_ep(
        &problem,
        &EpOptions {
            max_iters: 10,
            ..Default::default()
        },
    )?;

    assert_eq!(fit.g.len(), 2);
    assert_eq!(fit.f.posterior.dim(), 9 + 2 * 9);
    assert_eq!(fit.g[1].posterior.dim(), 2 * 9);
    assert_eq!(fit.evidence.mvn_g.len(), 2);
    assert!(fit.log_evidence.is_finite());
    assert!(fit.g[1].monotone.theta().iter().skip(9).all(|&t| t > 0.0));
    Ok(())
}

#[test]
fn default_tolerance_reaches_the_fixed_point_evidence() -> anyhow::Result<()> {
    let nn = 30;
    let xs: Vec<f64> = (0..nn).map(|i| -2.0 + 4.0 * i as f64 / (nn - 1) as f64).collect();
    let t = Mat::from_column_slice(nn, 1, &xs);
    let y = DVec::from_fn(nn, |i, _| {
        UnimodalShape::Valley.eval(xs[i], 1.0) + 0.05 * (7.0 * xs[i]).sin()
    });
    let problem = UnimodalProblem::new(t, y, KernelParams::new(1.0, 1.0)?, 0.01);

    let fit = run_ep(&problem, &EpOptions::default())?;
    let tight = run_ep(
        &problem,
        &EpOptions {
            tolerance: 1e-14,
            max_iters: 500,
            ..Default::default()
        },
    )?;

    assert!(fit.diagnostics.converged);
    assert!(fit.diagnostics.iterations > 2, "{:?}", fit.diagnostics);
    assert_abs_diff_eq!(fit.log_evidence, tight.log_evidence, epsilon = 2e-2);
    Ok(())
}
