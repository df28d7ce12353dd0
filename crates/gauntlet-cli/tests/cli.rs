//! End-to-end exercises of the `gauntlet` binary against a scratch data
//! directory.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn gauntlet(data: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("gauntlet").unwrap();
    cmd.env("GAUNTLET_DATA_DIR", data.path());
    cmd
}

fn write_engine_tree(root: &Path) {
    fs::create_dir_all(root.join("bin")).unwrap();
    fs::write(root.join("bin/solver"), "#!/bin/sh\nexit 0\n").unwrap();
}

fn seed_team_and_problem(data: &TempDir) {
    gauntlet(data)
        .args(["register", "team", "GALOIS", "reference team"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1"));
    gauntlet(data)
        .args(["register", "problem", "1-0-2"])
        .assert()
        .success();
}

#[test]
fn registering_an_engine_prints_its_digest_and_is_idempotent() {
    let data = TempDir::new().unwrap();
    let tree = TempDir::new().unwrap();
    write_engine_tree(tree.path());
    seed_team_and_problem(&data);

    let first = gauntlet(&data)
        .args(["register", "engine", "1"])
        .arg(tree.path())
        .assert()
        .success();
    let digest = String::from_utf8(first.get_output().stdout.clone())
        .unwrap()
        .trim()
        .to_string();
    assert_eq!(digest.len(), 64);
    assert!(data.path().join(format!("blobs/{digest}.tar.gz")).is_file());

    gauntlet(&data)
        .args(["register", "engine", "1"])
        .arg(tree.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("already registered"));
}

#[test]
fn registering_against_a_missing_team_fails_with_the_reference() {
    let data = TempDir::new().unwrap();
    let tree = TempDir::new().unwrap();
    write_engine_tree(tree.path());

    gauntlet(&data)
        .args(["register", "engine", "9"])
        .arg(tree.path())
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("team"));
}

#[test]
fn a_nonexistent_path_is_rejected() {
    let data = TempDir::new().unwrap();
    seed_team_and_problem(&data);

    gauntlet(&data)
        .args(["register", "engine", "1", "/no/such/tree"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn a_malformed_problem_id_is_a_config_error() {
    let data = TempDir::new().unwrap();
    gauntlet(&data)
        .args(["register", "problem", "one-two"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn deleting_an_engine_with_yes_skips_the_prompt() {
    let data = TempDir::new().unwrap();
    let tree = TempDir::new().unwrap();
    write_engine_tree(tree.path());
    seed_team_and_problem(&data);

    let out = gauntlet(&data)
        .args(["register", "engine", "1"])
        .arg(tree.path())
        .assert()
        .success();
    let digest = String::from_utf8(out.get_output().stdout.clone())
        .unwrap()
        .trim()
        .to_string();

    gauntlet(&data)
        .args(["delete", "engine", &digest[..12], "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("deleted engine"));

    gauntlet(&data)
        .args(["delete", "engine", &digest, "--yes"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("no such engine"));
}

#[test]
fn deleting_without_confirmation_aborts() {
    let data = TempDir::new().unwrap();
    let tree = TempDir::new().unwrap();
    write_engine_tree(tree.path());
    seed_team_and_problem(&data);

    let out = gauntlet(&data)
        .args(["register", "engine", "1"])
        .arg(tree.path())
        .assert()
        .success();
    let digest = String::from_utf8(out.get_output().stdout.clone())
        .unwrap()
        .trim()
        .to_string();

    gauntlet(&data)
        .args(["delete", "engine", &digest])
        .write_stdin("n\n")
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("aborted"));
}

fn stdout_last_line(assert: &assert_cmd::assert::Assert) -> String {
    String::from_utf8(assert.get_output().stdout.clone())
        .unwrap()
        .trim()
        .lines()
        .last()
        .unwrap()
        .to_string()
}

#[test]
fn full_run_and_evaluate_flow() {
    let data = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    seed_team_and_problem(&data);

    let engine_tree = work.path().join("engine");
    write_engine_tree(&engine_tree);

    let input_dir = work.path().join("input");
    fs::create_dir_all(&input_dir).unwrap();
    fs::write(input_dir.join("input.csv"), "1,2,3\n").unwrap();
    let truth_dir = work.path().join("truth");
    fs::create_dir_all(&truth_dir).unwrap();
    // Distinct bytes from input.csv: blob digests are content-only, so
    // identical contents would collide and the truth blob would overwrite
    // the input blob in the store.
    fs::write(truth_dir.join("truth.csv"), "9,9,9\n").unwrap();

    // run.sh contract: config, input dir, output dir, log file.
    let solution_dir = work.path().join("solution");
    fs::create_dir_all(&solution_dir).unwrap();
    fs::write(
        solution_dir.join("run.sh"),
        "#!/bin/sh\ncp \"$2\"/input.csv \"$3\"/result.csv\necho finished > \"$4\"\n",
    )
    .unwrap();
    let config_file = work.path().join("slam.conf");
    fs::write(&config_file, "iterations = 10\n").unwrap();

    // eval.sh contract: result dir, ground-truth dir, output dir.
    let evaluator_dir = work.path().join("evaluator");
    fs::create_dir_all(&evaluator_dir).unwrap();
    fs::write(
        evaluator_dir.join("eval.sh"),
        "#!/bin/sh\ncmp -s \"$1\"/result.csv \"$2\"/truth.csv\necho $? > \"$3\"/score\n",
    )
    .unwrap();

    let engine_id = stdout_last_line(
        &gauntlet(&data)
            .args(["register", "engine", "1"])
            .arg(&engine_tree)
            .assert()
            .success(),
    );
    let dataset_id = stdout_last_line(
        &gauntlet(&data)
            .args(["register", "dataset", "1-0-2"])
            .arg(&input_dir)
            .arg(&truth_dir)
            .assert()
            .success(),
    );
    let solution_id = stdout_last_line(
        &gauntlet(&data)
            .args(["register", "solution", &engine_id, "1-0-2"])
            .arg(&solution_dir)
            .arg(&config_file)
            .assert()
            .success(),
    );
    let config_id = stdout_last_line(
        &gauntlet(&data)
            .args(["register", "configuration", &solution_id])
            .arg(&config_file)
            .assert()
            .success(),
    );
    gauntlet(&data)
        .args(["register", "evaluator", "1-0-2"])
        .arg(&evaluator_dir)
        .assert()
        .success();

    let run_id = stdout_last_line(
        &gauntlet(&data)
            .args(["run", &engine_id, &solution_id, &config_id, &dataset_id])
            .assert()
            .success(),
    );
    assert_eq!(run_id, "1");

    let verdict = stdout_last_line(
        &gauntlet(&data)
            .args(["evaluate", "run", "1"])
            .assert()
            .success(),
    );
    assert_eq!(verdict.len(), 64);
    assert!(data
        .path()
        .join(format!("blobs/{verdict}.tar.gz"))
        .is_file());

    gauntlet(&data)
        .args(["evaluate", "all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to evaluate"));

    gauntlet(&data)
        .args(["show", "run", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"dataset_id\"").and(predicate::str::contains(&dataset_id)));
    gauntlet(&data)
        .args(["show", "engine", "ffffffffffff"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("no such engine"));
}

#[test]
fn run_finds_the_config_when_the_solution_collapses_to_a_subdirectory() {
    let data = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    seed_team_and_problem(&data);

    let engine_tree = work.path().join("engine");
    write_engine_tree(&engine_tree);

    let input_dir = work.path().join("input");
    fs::create_dir_all(&input_dir).unwrap();
    fs::write(input_dir.join("input.csv"), "1,2,3\n").unwrap();
    let truth_dir = work.path().join("truth");
    fs::create_dir_all(&truth_dir).unwrap();
    // Distinct bytes from input.csv; see full_run_and_evaluate_flow.
    fs::write(truth_dir.join("truth.csv"), "9,9,9\n").unwrap();

    // Every solution file under one subdirectory: the unpacked solution
    // root is scripts/, while the config file unpacks one level up.
    let solution_dir = work.path().join("solution");
    fs::create_dir_all(solution_dir.join("scripts")).unwrap();
    fs::write(
        solution_dir.join("scripts/run.sh"),
        "#!/bin/sh\ntest -f \"$1\" || exit 9\ncp \"$2\"/input.csv \"$3\"/result.csv\n",
    )
    .unwrap();
    let config_file = work.path().join("slam.conf");
    fs::write(&config_file, "iterations = 10\n").unwrap();

    let engine_id = stdout_last_line(
        &gauntlet(&data)
            .args(["register", "engine", "1"])
            .arg(&engine_tree)
            .assert()
            .success(),
    );
    let dataset_id = stdout_last_line(
        &gauntlet(&data)
            .args(["register", "dataset", "1-0-2"])
            .arg(&input_dir)
            .arg(&truth_dir)
            .assert()
            .success(),
    );
    let solution_id = stdout_last_line(
        &gauntlet(&data)
            .args(["register", "solution", &engine_id, "1-0-2"])
            .arg(&solution_dir)
            .arg(&config_file)
            .assert()
            .success(),
    );
    let config_id = stdout_last_line(
        &gauntlet(&data)
            .args(["register", "configuration", &solution_id])
            .arg(&config_file)
            .assert()
            .success(),
    );

    let run_id = stdout_last_line(
        &gauntlet(&data)
            .args(["run", &engine_id, &solution_id, &config_id, &dataset_id])
            .assert()
            .success(),
    );
    assert_eq!(run_id, "1");
}

#[test]
fn evaluate_all_with_no_runs_reports_nothing_to_do() {
    let data = TempDir::new().unwrap();
    gauntlet(&data)
        .args(["evaluate", "all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to evaluate"));
}
