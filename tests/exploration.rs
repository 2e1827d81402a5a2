//! Integration tests driving the exploration engine end to end through
//! [`vp_symex::driver::ExplorationDriver`], using the bundled
//! `BranchingDemo` in place of a real instruction-set simulator.

use std::time::Duration;

use vp_symex::config::Env;
use vp_symex::demo::BranchingDemo;
use vp_symex::driver::{ExplorationDriver, RunConfig};
use vp_symex::testcase::TestCaseFile;

fn temp_dir(label: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("vp-symex-it-{label}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn base_config(dir: std::path::PathBuf) -> RunConfig {
    let env = Env::default();
    RunConfig::from_env(&env, 1, dir)
}

#[test]
fn exploration_terminates_within_a_generous_time_budget() {
    let dir = temp_dir("terminates");
    let mut config = base_config(dir.clone());
    config.time_budget = Some(Duration::from_secs(5));

    let driver = ExplorationDriver::new(config);
    let report = driver.explore(BranchingDemo).unwrap();

    // Three symbolic decision points (the initial branch, the assume,
    // and the under-ten branch) bound how many distinct leaves the tree
    // can ever have; exploration must stop well short of runaway.
    assert!(report.paths_explored >= 1);
    assert!(report.paths_explored <= 16);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn zero_time_budget_stops_before_the_first_run() {
    let dir = temp_dir("zero-budget");
    let mut config = base_config(dir.clone());
    config.time_budget = Some(Duration::ZERO);

    let driver = ExplorationDriver::new(config);
    let report = driver.explore(BranchingDemo).unwrap();

    assert_eq!(report.paths_explored, 0);
    assert_eq!(report.errors_found, 0);
    assert!(!dir.exists(), "testcase directory must be removed on a zero-error run");
}

#[test]
fn replaying_a_known_bad_input_reproduces_the_guest_error() {
    let dir = temp_dir("replay-bad");
    let case_path = dir.join("bad.json");

    let mut store = vp_symex::store::ConcreteStore::new();
    store.insert("x", vec![7, 0, 0, 0]);
    TestCaseFile::from_store(&store).write(&case_path).unwrap();

    let mut config = base_config(dir.clone());
    config.testcase = Some(case_path);

    let driver = ExplorationDriver::new(config);
    let result = driver.explore(BranchingDemo);

    assert!(result.is_err(), "x == 7 must reproduce the captured division/assumption failure");

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn replaying_an_assume_satisfying_input_does_not_count_as_an_error() {
    let dir = temp_dir("replay-assume-ok");
    let case_path = dir.join("ok.json");

    let mut store = vp_symex::store::ConcreteStore::new();
    store.insert("x", vec![20, 0, 0, 0]);
    TestCaseFile::from_store(&store).write(&case_path).unwrap();

    let mut config = base_config(dir.clone());
    config.testcase = Some(case_path);

    let driver = ExplorationDriver::new(config);
    let report = driver.explore(BranchingDemo).unwrap();

    assert_eq!(report.paths_explored, 1);
    assert_eq!(report.errors_found, 0);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn captured_error_test_case_round_trips() {
    let dir = temp_dir("capture-round-trip");
    let mut store = vp_symex::store::ConcreteStore::new();
    store.insert("x", vec![7, 0, 0, 0]);
    let file = TestCaseFile::from_store(&store).with_constraint("x == 7");

    let path = dir.join("error-1.json");
    file.write(&path).unwrap();
    let reloaded = TestCaseFile::read(&path).unwrap();
    assert_eq!(reloaded.to_store(), store);

    std::fs::remove_dir_all(&dir).ok();
}
