use std::env;
use std::path::PathBuf;
use std::time::Duration;

const TESTCASE_ENV: &str = "SYMEX_TESTCASE";
const TIMEBUDGET_ENV: &str = "SYMEX_TIMEBUDGET";
const ERR_EXIT_ENV: &str = "SYMEX_ERREXIT";

/// Exploration parameters resolved once at startup from the environment.
///
/// The driver itself never looks at `std::env` directly; everything it
/// needs to decide comes from this struct.
#[derive(Debug, Clone, Default)]
pub struct Env {
    /// When set, replay this single test case and exit instead of exploring.
    pub testcase: Option<PathBuf>,
    /// Soft wall-clock budget for the exploration loop.
    pub time_budget: Option<Duration>,
    /// Exit at the first guest error found.
    pub err_exit: bool,
}

impl Env {
    pub fn from_env() -> Self {
        Self {
            testcase: env::var_os(TESTCASE_ENV).map(PathBuf::from),
            time_budget: env::var(TIMEBUDGET_ENV)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs),
            err_exit: env::var_os(ERR_EXIT_ENV).is_some(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_env_explores_without_bounds() {
        let env = Env::default();
        assert!(env.testcase.is_none());
        assert!(env.time_budget.is_none());
        assert!(!env.err_exit);
    }
}
