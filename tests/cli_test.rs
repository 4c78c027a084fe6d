use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_simulator_runs_operation_exactly_once() {
    let mut cmd = Command::cargo_bin("idemgate").unwrap();
    cmd.args([
        "--tasks",
        "4",
        "--hold-ms",
        "50",
        "--wait-max-ms",
        "2000",
    ]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("invocations=1"))
        .stdout(predicate::str::contains("fresh=1"));
}

#[test]
fn test_simulator_single_task() {
    let mut cmd = Command::cargo_bin("idemgate").unwrap();
    cmd.args(["--tasks", "1", "--hold-ms", "1"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("invocations=1 fresh=1 replayed=0 in_progress=0"));
}
