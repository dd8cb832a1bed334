use anyhow::Result;
use clap::Args;
use log::info;
use rand::rngs::SmallRng;
use rand::SeedableRng;

use lentil::common::*;
use lentil::ep::{run_ep, EpOptions, RefreshSchedule, UnimodalProblem};
use lentil::kernel::KernelParams;
use lentil::moments::MomentStrategyKind;
use matrix_util::common_io::mkdir;
use matrix_util::dmatrix_util::{centre_columns, linspace};
use matrix_util::traits::IoOps;

#[derive(Args, Debug, Clone)]
pub struct FitArgs {
    /// Observation locations, N x P TSV (optionally gzipped)
    #[arg(short, long)]
    pub t_file: String,

    /// Observations, N x 1 TSV
    #[arg(short, long)]
    pub y_file: String,

    /// Constraint locations, M x P TSV (default: observation locations)
    #[arg(long)]
    pub t2_file: Option<String>,

    /// Sign labels, M x P TSV of -1/+1 (default: `--sign` everywhere)
    #[arg(long)]
    pub sign_file: Option<String>,

    /// Sign label used when no sign file is given; +1 for a valley,
    /// -1 for a bump
    #[arg(long, default_value = "1.0", allow_hyphen_values = true)]
    pub sign: f64,

    /// Output prefix
    #[arg(short, long)]
    pub out: String,

    /// Amplitude of the kernel of f
    #[arg(long, default_value = "1.0")]
    pub amplitude: f64,

    /// Lengthscale of the kernel of f
    #[arg(long, default_value = "1.0")]
    pub lengthscale: f64,

    /// Amplitude of the kernel of g (default: same as f)
    #[arg(long)]
    pub g_amplitude: Option<f64>,

    /// Lengthscale of the kernel of g (default: same as f)
    #[arg(long)]
    pub g_lengthscale: Option<f64>,

    /// Gaussian noise variance
    #[arg(long, default_value = "0.01")]
    pub noise_variance: f64,

    /// Subtract the mean of y before fitting and add it back after
    #[arg(long, default_value_t = false)]
    pub centre: bool,

    /// Maximum number of EP iterations
    #[arg(long, default_value_t = DEFAULT_MAX_ITERS)]
    pub max_iters: usize,

    /// Slope of the monotonicity probit on g'
    #[arg(long, default_value_t = DEFAULT_NU)]
    pub nu: f64,

    /// Slope of the probit on f' in the joint factor
    #[arg(long, default_value_t = DEFAULT_NU2)]
    pub nu2: f64,

    /// Damping of site updates, in (0, 1]
    #[arg(long, default_value_t = DEFAULT_DAMPING)]
    pub damping: f64,

    /// Convergence tolerance
    #[arg(long, default_value_t = DEFAULT_TOLERANCE)]
    pub tolerance: f64,

    /// Moment matching of the joint f'/g factor
    #[arg(long, value_enum, default_value = "strict")]
    pub moment_strategy: MomentStrategyKind,

    /// When site updates are committed
    #[arg(long, value_enum, default_value = "per-sweep")]
    pub refresh: RefreshSchedule,

    /// Random seed of the sweep order and of the Monte Carlo samples
    #[arg(long, default_value = "0")]
    pub seed: u64,

    /// Diagonal jitter of the prior covariances
    #[arg(long, default_value_t = DEFAULT_JITTER)]
    pub jitter: f64,

    /// Prediction locations, K x P TSV
    #[arg(long)]
    pub pred_file: Option<String>,

    /// Number of grid points for prediction over the range of t (P = 1)
    #[arg(long, default_value = "0")]
    pub pred_points: usize,

    /// Monte Carlo samples for P(increasing)
    #[arg(long, default_value = "500")]
    pub num_samples: usize,
}

impl FitArgs {
    fn options(&self) -> EpOptions {
        EpOptions {
            max_iters: self.max_iters,
            nu: self.nu,
            nu2: self.nu2,
            damping: self.damping,
            tolerance: self.tolerance,
            moment_strategy: self.moment_strategy,
            seed: self.seed,
            refresh: self.refresh,
            jitter: self.jitter,
            ..Default::default()
        }
    }

    fn prediction_points(&self, t: &Mat) -> Result<Option<Mat>> {
        if let Some(file) = &self.pred_file {
            return Ok(Some(Mat::from_tsv(file, None)?));
        }
        if self.pred_points == 0 {
            return Ok(None);
        }
        if t.ncols() != 1 {
            anyhow::bail!("--pred-points needs one input dimension; use --pred-file");
        }
        Ok(Some(linspace(t.min(), t.max(), self.pred_points)))
    }
}

pub fn fit(args: &FitArgs) -> Result<()> {
    mkdir(&args.out)?;

    let t = Mat::from_tsv(&args.t_file, None)?;
    let y = Mat::from_tsv(&args.y_file, None)?;
    if y.ncols() != 1 {
        anyhow::bail!("{} must have one column, found {}", args.y_file, y.ncols());
    }

    let offset = if args.centre { y.mean() } else { 0.0 };
    let y = if args.centre { centre_columns(&y) } else { y };
    let y: DVec = y.column(0).into_owned();

    let kernel_f = KernelParams::new(args.amplitude, args.lengthscale)?;
    let kernel_g = KernelParams::new(
        args.g_amplitude.unwrap_or(args.amplitude),
        args.g_lengthscale.unwrap_or(args.lengthscale),
    )?;

    let pp = t.ncols();
    let mut problem =
        UnimodalProblem::new(t, y, kernel_f, args.noise_variance).with_g_kernel(kernel_g);

    if let Some(file) = &args.t2_file {
        problem = problem.with_constraint_points(Mat::from_tsv(file, None)?);
    }

    let mm = problem.num_constraints();
    let sign_labels = match &args.sign_file {
        Some(file) => Mat::from_tsv(file, None)?,
        None => Mat::from_element(mm, pp, args.sign),
    };
    problem = problem.with_sign_labels(sign_labels);

    let options = args.options();
    let fit = run_ep(&problem, &options)?;

    let f_file = format!("{}.f.tsv", args.out);
    let mut f_mean = fit.f.posterior.mu.clone();
    f_mean.rows_mut(0, problem.num_obs()).add_scalar_mut(offset);
    Mat::from_columns(&[f_mean, fit.f.posterior.sigma_diag.clone()]).to_tsv(&f_file)?;
    info!("Wrote f posterior: {}", f_file);

    for g in &fit.g {
        let g_file = format!("{}.g{}.tsv", args.out, g.dim);
        Mat::from_columns(&[g.posterior.mu.clone(), g.posterior.sigma_diag.clone()])
            .to_tsv(&g_file)?;
        info!("Wrote g posterior: {}", g_file);
    }

    if let Some(t_pred) = args.prediction_points(&problem.t)? {
        let (mean, var) = fit.predict_f(&problem, &t_pred, options.jitter, false)?;

        let mut rng = SmallRng::seed_from_u64(args.seed);
        let mut columns: Vec<DVec> = t_pred.column_iter().map(|c| c.into_owned()).collect();
        columns.push(mean.add_scalar(offset));
        columns.push(var);
        for p in 0..pp {
            let (prob, _) = fit.increasing_probability(
                &problem,
                p,
                &t_pred,
                options.jitter,
                args.num_samples,
                &mut rng,
            )?;
            columns.push(prob);
        }

        let pred_file = format!("{}.pred.tsv", args.out);
        Mat::from_columns(&columns).to_tsv(&pred_file)?;
        info!("Wrote predictions: {}", pred_file);
    }

    let summary_file = format!("{}.summary.json", args.out);
    let summary = serde_json::json!({
        "command": "fit",
        "num_obs": problem.num_obs(),
        "num_constraints": mm,
        "num_dims": pp,
        "noise_variance": problem.noise_variance,
        "kernel_f": problem.kernel_f,
        "kernel_g": problem.kernel_g,
        "y_offset": offset,
        "options": options,
        "diagnostics": fit.diagnostics,
        "log_evidence": fit.log_evidence,
        "evidence": fit.evidence,
    });
    std::fs::write(&summary_file, serde_json::to_string_pretty(&summary)?)?;
    info!("Wrote summary: {}", summary_file);

    Ok(())
}
