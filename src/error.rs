use std::io;

use thiserror::Error;

/// Fatal errors that terminate the exploration process.
///
/// Guest assertion failures, assume-notifications and unsatisfiable
/// negations are *not* represented here: per the driver's error
/// handling policy they are absorbed or accumulated rather than
/// propagated (see `driver::ExplorationDriver`).
#[derive(Debug, Error)]
pub enum Error {
    #[error("solver error: {0}")]
    Solver(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed test case: {0}")]
    TestCase(String),

    #[error("simulation failed with non-zero exit status {0}")]
    SimulationFailed(i32),
}

pub type Result<T> = std::result::Result<T, Error>;
