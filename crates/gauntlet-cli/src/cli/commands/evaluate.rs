//! Scoring recorded runs against ground truth.
//!
//! An evaluation unpacks the run's output, the dataset's ground truth and
//! the challenge problem's current evaluator into a sandbox, runs
//! `eval.sh`, and stores the verdict. A run keeps at most one evaluation;
//! re-evaluating replaces the previous verdict.

use std::path::Path;

use anyhow::Result;
use tracing::{info, warn};

use gauntlet_core::db::model::{Dataset, Evaluator, Run};
use gauntlet_core::errors::Fatal;
use gauntlet_core::sandbox::with_sandbox;
use gauntlet_core::watch::{ensure_executable, find_in_tree, DEFAULT_POLL};

use super::run::{supervise, Aggregate};
use super::Env;
use crate::cli::args::EvaluateSub;

pub fn dispatch(env: &Env, cmd: EvaluateSub) -> Result<i32> {
    match cmd {
        EvaluateSub::Run { run_id, persist } => evaluate_run(env, run_id, persist),
        EvaluateSub::All => evaluate_all(env),
    }
}

struct Snapshot {
    run: Run,
    dataset: Dataset,
    evaluator: Evaluator,
}

pub fn evaluate_run(env: &Env, run_id: i64, persist: bool) -> Result<i32> {
    let snap = env.index.session(|s| {
        let run = s.get_run(run_id)?.ok_or(Fatal::ForeignKey {
            table: "run",
            key: run_id.to_string(),
        })?;
        let solution = s.get_solution(&run.solution_id)?.ok_or(Fatal::ForeignKey {
            table: "solution",
            key: run.solution_id.clone(),
        })?;
        let dataset = s.get_dataset(&run.dataset_id)?.ok_or(Fatal::ForeignKey {
            table: "dataset",
            key: run.dataset_id.clone(),
        })?;
        let evaluator = s
            .evaluator_for_cp(solution.challenge_problem)?
            .ok_or_else(|| {
                Fatal::Execution(format!(
                    "no registered evaluator for challenge problem {}",
                    solution.challenge_problem
                ))
            })?;
        Ok(Snapshot {
            run,
            dataset,
            evaluator,
        })
    })?;

    let digest = with_sandbox("gauntlet-eval.", persist, |sb| {
        score(env, &snap, sb.path())
    })?;
    println!("{digest}");
    Ok(0)
}

fn score(env: &Env, snap: &Snapshot, sandbox: &Path) -> Result<String> {
    let result_dir = env.store.extract(&snap.run.output, sandbox, "result")?;
    let truth_dir = env
        .store
        .extract(&snap.dataset.eval_digest, sandbox, "ground_truth")?;
    let input_dir = env
        .store
        .extract(&snap.dataset.in_digest, sandbox, "input")?;
    let evaluator_dir = env.store.extract(&snap.evaluator.id, sandbox, "evaluator")?;

    let output_dir = sandbox.join("output");
    let scratch = sandbox.join("scratch");
    std::fs::create_dir_all(&output_dir)?;
    std::fs::create_dir_all(&scratch)?;

    let eval_sh = find_in_tree(&evaluator_dir, "eval.sh")
        .ok_or_else(|| Fatal::Execution("the evaluator has no eval.sh".to_string()))?;
    ensure_executable(&eval_sh)?;

    let argv: Vec<String> = [
        eval_sh.as_path(),
        result_dir.as_path(),
        truth_dir.as_path(),
        output_dir.as_path(),
    ]
    .iter()
    .map(|p| p.to_string_lossy().into_owned())
    .collect();
    let env_overrides = vec![(
        "INPUT_DIR".to_string(),
        input_dir.to_string_lossy().into_owned(),
    )];

    info!(run_id = snap.run.id, script = %eval_sh.display(), "evaluating run");
    let code = supervise(
        &evaluator_dir,
        &argv,
        &env_overrides,
        &mut Aggregate::default(),
        DEFAULT_POLL,
    )?;

    let staged = env.store.prepare(&output_dir, &scratch)?;
    env.store.commit(&staged)?;

    // The verdict is recorded whichever way the evaluator decided; only
    // then does a failing exit status propagate as an error.
    let recorded = env
        .index
        .session(|s| s.save_evaluation(snap.run.id, &staged.digest, code == 0));
    recorded.inspect_err(|_| {
        warn!(digest = %staged.digest, "evaluation insert failed; orphan blob left in store")
    })?;

    if code != 0 {
        return Err(Fatal::Execution(format!("eval.sh exited with status {code}")).into());
    }
    Ok(staged.digest)
}

/// Evaluates every run with no verdict yet. One failing run does not stop
/// the sweep; an interrupt does.
fn evaluate_all(env: &Env) -> Result<i32> {
    let pending = env.index.session(|s| s.unevaluated_run_ids())?;
    if pending.is_empty() {
        println!("nothing to evaluate");
        return Ok(0);
    }

    let total = pending.len();
    let mut failures = 0usize;
    for run_id in pending {
        match evaluate_run(env, run_id, false) {
            Ok(_) => {}
            Err(err) => {
                if matches!(err.downcast_ref::<Fatal>(), Some(Fatal::Interrupted)) {
                    return Err(err);
                }
                warn!(run_id, %err, "evaluation failed");
                failures += 1;
            }
        }
    }

    println!("evaluated {} of {total} runs", total - failures);
    if failures > 0 {
        return Err(Fatal::Execution(format!(
            "{failures} of {total} evaluations failed"
        ))
        .into());
    }
    Ok(0)
}
