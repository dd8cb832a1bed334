mod fit_cmd;
mod sim_cmd;

use fit_cmd::*;
use sim_cmd::*;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "lentil")]
#[command(about = "Unimodal Gaussian process regression by Expectation Propagation")]
struct Cli {
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a unimodal GP to observations and write posterior summaries
    Fit(FitArgs),
    /// Simulate noisy observations of a unimodal function
    Simulate(SimulateArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    match &cli.commands {
        Commands::Fit(args) => {
            fit(args)?;
        }
        Commands::Simulate(args) => {
            simulate(args)?;
        }
    }

    Ok(())
}
