use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;

use vp_symex::config::Env;
use vp_symex::demo::BranchingDemo;
use vp_symex::driver::{ExplorationDriver, RunConfig};
use vp_symex::logger;

/// Concolic exploration driver for a virtual-prototype instruction-set
/// simulator.
///
/// The instruction-set simulator itself is supplied by the embedder
/// (see `driver::Simulation`); this binary wires up logging,
/// environment-driven configuration and the exploration loop around a
/// small reference simulation, standing in for a real guest target
/// until one is plugged in.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Guest binary to explore. Reserved for a future instruction-set
    /// simulator integration; the bundled reference simulation ignores
    /// it today.
    target: Option<PathBuf>,

    /// Seed for the exploration loop's random leaf selection. Defaults
    /// to a wall-clock-derived value when omitted, so unattended runs
    /// don't collapse to the same exploration order every time.
    #[arg(long)]
    seed: Option<u64>,

    /// Directory test cases (and captured errors) are written to.
    #[arg(long, default_value = "symex-testcases")]
    testcase_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    logger::init();

    let cli = Cli::parse();
    if let Some(target) = &cli.target {
        tracing::info!(target = %target.display(), "target binary specified (reserved for future ISS integration)");
    }

    let seed = cli.seed.unwrap_or_else(|| {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0)
    });

    let env = Env::from_env();
    let config = RunConfig::from_env(&env, seed, cli.testcase_dir);
    let driver = ExplorationDriver::new(config);

    let report = driver.explore(BranchingDemo)?;
    tracing::info!(paths = report.paths_explored, errors = report.errors_found, "done");
    Ok(())
}
