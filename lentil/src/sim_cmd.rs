use anyhow::Result;
use clap::Args;
use log::info;

use lentil::common::Mat;
use lentil::simulate::{simulate_unimodal, UnimodalShape};
use matrix_util::common_io::mkdir;
use matrix_util::traits::IoOps;

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Output prefix; writes `{out}.t.tsv`, `{out}.y.tsv` and `{out}.f.tsv`
    #[arg(short, long)]
    pub out: String,

    /// Number of points
    #[arg(short, long, default_value = "30")]
    pub num_points: usize,

    /// Lower end of the grid
    #[arg(long, default_value = "-2.0", allow_hyphen_values = true)]
    pub lb: f64,

    /// Upper end of the grid
    #[arg(long, default_value = "2.0", allow_hyphen_values = true)]
    pub ub: f64,

    /// Shape of the mode
    #[arg(long, value_enum, default_value = "valley")]
    pub shape: UnimodalShape,

    /// Width of the mode
    #[arg(long, default_value = "0.7")]
    pub width: f64,

    /// Noise standard deviation
    #[arg(long, default_value = "0.1")]
    pub noise_sd: f64,

    /// Random seed
    #[arg(long, default_value = "42")]
    pub seed: u64,
}

pub fn simulate(args: &SimulateArgs) -> Result<()> {
    mkdir(&args.out)?;

    let data = simulate_unimodal(
        args.num_points,
        args.lb,
        args.ub,
        args.shape,
        args.width,
        args.noise_sd,
        args.seed,
    )?;

    let t_file = format!("{}.t.tsv", args.out);
    let y_file = format!("{}.y.tsv", args.out);
    let f_file = format!("{}.f.tsv", args.out);

    data.t.to_tsv(&t_file)?;
    Mat::from_columns(&[data.y.clone()]).to_tsv(&y_file)?;
    Mat::from_columns(&[data.f_true.clone()]).to_tsv(&f_file)?;

    info!(
        "Wrote {}, {}, {}; fit with --sign {}",
        t_file,
        y_file,
        f_file,
        args.shape.sign_label()
    );
    Ok(())
}
