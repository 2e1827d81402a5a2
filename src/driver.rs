//! Exploration driver: the outermost state machine, grounded on
//! `symbolic_explore.cpp`'s `explore_paths` loop. Each iteration resets
//! the trace, asks a [`Simulation`] to run one full guest program, and
//! reacts to how it ended: normal completion or an `assume()` signal
//! both lead to picking a fresh unexplored leaf from the path tree;
//! a guest error is captured to a test-case file and exploration
//! continues (or stops immediately, under `SYMEX_ERREXIT`).

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::config::Env;
use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::path_tree::Node;
use crate::testcase::TestCaseFile;
use crate::trace::AssumeNotification;

/// One run of the guest program under exploration. The actual
/// instruction-set simulator is out of scope (spec.md §Non-goals); a
/// caller plugs in an implementation that drives it and calls
/// `ExecutionContext::trace_mut()` at each branch/assume point.
pub trait Simulation {
    /// Runs the guest program to completion against `ctx`. An
    /// `AssumeNotification` (see `trace::Trace::assume`) must be
    /// propagated as-is so the driver can tell it apart from a genuine
    /// guest error.
    fn run(&mut self, ctx: &mut ExecutionContext) -> anyhow::Result<()>;
}

/// Parameters resolved once at startup, analogous to `norlen`'s
/// `RunConfig` but driven by this crate's own environment variables
/// rather than a CLI flag set.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub testcase: Option<PathBuf>,
    pub time_budget: Option<Duration>,
    pub err_exit: bool,
    pub seed: u64,
    pub testcase_dir: PathBuf,
}

impl RunConfig {
    pub fn from_env(env: &Env, seed: u64, testcase_dir: PathBuf) -> Self {
        RunConfig {
            testcase: env.testcase.clone(),
            time_budget: env.time_budget,
            err_exit: env.err_exit,
            seed,
            testcase_dir,
        }
    }
}

#[derive(Debug, Default)]
pub struct ExplorationReport {
    pub paths_explored: u64,
    pub errors_found: u64,
}

pub struct ExplorationDriver {
    config: RunConfig,
}

impl ExplorationDriver {
    pub fn new(config: RunConfig) -> Self {
        ExplorationDriver { config }
    }

    /// Runs `sim` repeatedly until the path tree is exhausted, the time
    /// budget elapses, or (with `err_exit`) a guest error is found.
    pub fn explore(&self, mut sim: impl Simulation) -> Result<ExplorationReport> {
        if let Some(testcase) = &self.config.testcase {
            return self.replay(&mut sim, testcase);
        }

        std::fs::create_dir_all(&self.config.testcase_dir)?;

        let root = Node::new_ref();
        let mut ctx = ExecutionContext::new(root);
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let start = Instant::now();
        let mut report = ExplorationReport::default();
        let mut solver_time = Duration::ZERO;

        loop {
            if let Some(budget) = self.config.time_budget {
                if start.elapsed() >= budget {
                    info!(elapsed = ?start.elapsed(), "time budget exhausted");
                    break;
                }
            }

            match sim.run(&mut ctx) {
                Ok(()) => {
                    report.paths_explored += 1;
                }
                Err(err) if err.downcast_ref::<AssumeNotification>().is_some() => {
                    report.paths_explored += 1;
                }
                Err(err) => {
                    report.paths_explored += 1;
                    report.errors_found += 1;
                    self.capture_error(&ctx, report.errors_found, &err)?;
                    if self.config.err_exit {
                        info!(errors = report.errors_found, "stopping at first guest error");
                        break;
                    }
                }
            }

            let solve_start = Instant::now();
            let has_next = ctx.setup_new_values_from_tree(&mut rng)?;
            solver_time += solve_start.elapsed();

            info!(
                path = report.paths_explored,
                solver_time = ?solver_time,
                "iteration boundary"
            );

            if !has_next {
                info!(paths = report.paths_explored, "path tree fully explored");
                break;
            }
        }

        info!(
            paths = report.paths_explored,
            errors = report.errors_found,
            solver_time = ?solver_time,
            elapsed = ?start.elapsed(),
            "exploration finished"
        );

        if report.errors_found == 0 {
            std::fs::remove_dir_all(&self.config.testcase_dir).ok();
        }

        Ok(report)
    }

    fn replay(&self, sim: &mut impl Simulation, testcase: &Path) -> Result<ExplorationReport> {
        let file = TestCaseFile::read(testcase)?;
        let root = Node::new_ref();
        let mut ctx = ExecutionContext::new(root);
        ctx.setup_new_values(file.to_store());
        file.replay_constraints(ctx.solver(), ctx.trace_mut(), |_| 32)?;

        let mut report = ExplorationReport::default();
        match sim.run(&mut ctx) {
            Ok(()) => report.paths_explored += 1,
            Err(err) if err.downcast_ref::<AssumeNotification>().is_some() => {
                report.paths_explored += 1;
            }
            Err(err) => {
                report.paths_explored += 1;
                report.errors_found += 1;
                warn!(error = %err, "replayed test case reproduces the captured error");
                return Err(Error::SimulationFailed(1));
            }
        }
        Ok(report)
    }

    fn capture_error(&self, ctx: &ExecutionContext, index: u64, err: &anyhow::Error) -> Result<()> {
        let file = TestCaseFile::from_store(ctx.current_store());
        let path = self.config.testcase_dir.join(format!("error{index}.json"));
        file.write(&path)?;
        warn!(path = %path.display(), error = %err, "captured guest error to test case");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::value::ConcolicValue;

    struct CountToThree {
        runs: u32,
    }

    impl Simulation for CountToThree {
        fn run(&mut self, ctx: &mut ExecutionContext) -> anyhow::Result<()> {
            self.runs += 1;
            let x_bytes = ctx.current_store().get("x").map(|b| b.to_vec()).unwrap_or_else(|| vec![0; 4]);
            let x = ctx.solver().bvc(Some("x"), &x_bytes);
            let ten = ConcolicValue::from_const(10, 32);
            let taken = x.concrete < 10;
            ctx.trace_mut().add(taken, &x.ult(&ten), 0);
            Ok(())
        }
    }

    #[test]
    fn explore_terminates_once_the_tree_is_exhausted() {
        let dir = std::env::temp_dir().join(format!("vp-symex-driver-test-{}", std::process::id()));
        let config = RunConfig {
            testcase: None,
            time_budget: Some(Duration::from_secs(5)),
            err_exit: false,
            seed: 42,
            testcase_dir: dir.clone(),
        };
        let driver = ExplorationDriver::new(config);
        let report = driver.explore(CountToThree { runs: 0 }).unwrap();
        assert_eq!(report.paths_explored, 2);
        assert_eq!(report.errors_found, 0);
        std::fs::remove_dir_all(&dir).ok();
    }
}
