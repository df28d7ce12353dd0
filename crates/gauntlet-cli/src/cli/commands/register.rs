use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::warn;

use gauntlet_core::config::{load_run_config, CpKey};
use gauntlet_core::store::{resolve_path, walk_files, StagedBlob};

use super::Env;
use crate::cli::args::RegisterSub;

pub fn dispatch(env: &Env, cmd: RegisterSub) -> Result<i32> {
    match cmd {
        RegisterSub::Team {
            institution,
            description,
        } => team(env, &institution, &description),
        RegisterSub::Problem { cp_id, url } => problem(env, &cp_id, url.as_deref()),
        RegisterSub::Engine { team_id, path } => engine(env, team_id, &path),
        RegisterSub::Dataset {
            cp_id,
            in_path,
            eval_path,
        } => dataset(env, &cp_id, &in_path, &eval_path),
        RegisterSub::Solution {
            engine,
            cp_id,
            path,
            configs,
        } => solution(env, &engine, &cp_id, &path, &configs),
        RegisterSub::Configuration { solution, path } => configuration(env, &solution, &path),
        RegisterSub::Evaluator { cp_id, path } => evaluator(env, &cp_id, &path),
        RegisterSub::Bundle { config } => bundle(env, &config),
    }
}

/// Blobs are committed before the metadata row. When the row insert then
/// fails, the blob stays behind: content-addressed names make an orphan
/// harmless, and a later registration of the same bytes reclaims it.
fn warn_orphan(staged: &StagedBlob) {
    warn!(digest = %staged.digest, "metadata insert failed; orphan blob left in store");
}

fn team(env: &Env, institution: &str, description: &str) -> Result<i32> {
    let id = env
        .index
        .session(|s| s.insert_team(institution, description))?;
    println!("{id}");
    Ok(0)
}

fn problem(env: &Env, cp_id: &str, url: Option<&str>) -> Result<i32> {
    let cp: CpKey = cp_id.parse()?;
    let fresh = env
        .index
        .session(|s| s.insert_challenge_problem(cp, url))?;
    if !fresh {
        println!("challenge problem {cp} already registered");
    }
    Ok(0)
}

fn engine(env: &Env, team_id: i64, path: &Path) -> Result<i32> {
    let scratch = tempfile::tempdir()?;
    let source = resolve_path(path)?;
    let staged = env.store.prepare(&source, scratch.path())?;
    env.store.commit(&staged)?;

    let recorded = env.index.session(|s| {
        s.register_engine(team_id, &staged.digest, &source.to_string_lossy())
    });
    let fresh = recorded.inspect_err(|_| warn_orphan(&staged))?;
    if !fresh {
        println!("engine already registered");
    }
    println!("{}", staged.digest);
    Ok(0)
}

fn dataset(env: &Env, cp_id: &str, in_path: &Path, eval_path: &Path) -> Result<i32> {
    let cp: CpKey = cp_id.parse()?;
    let scratch = tempfile::tempdir()?;
    let in_source = resolve_path(in_path)?;
    let eval_source = resolve_path(eval_path)?;

    let in_staged = env.store.prepare(&in_source, scratch.path())?;
    let eval_staged = env.store.prepare(&eval_source, scratch.path())?;
    env.store.commit(&in_staged)?;
    env.store.commit(&eval_staged)?;

    let recorded = env.index.session(|s| {
        s.register_dataset(
            cp,
            &in_staged.digest,
            &eval_staged.digest,
            &in_source.to_string_lossy(),
            &eval_source.to_string_lossy(),
        )
    });
    let fresh = recorded.inspect_err(|_| warn_orphan(&in_staged))?;
    if !fresh {
        println!("dataset already registered");
    }
    println!("{}", in_staged.digest);
    Ok(0)
}

fn solution(
    env: &Env,
    engine_id: &str,
    cp_id: &str,
    path: &Path,
    configs: &[PathBuf],
) -> Result<i32> {
    let cp: CpKey = cp_id.parse()?;
    // The engine must already be present in the store, not only the index.
    env.store.resolve(engine_id)?;

    let scratch = tempfile::tempdir()?;
    let source = resolve_path(path)?;
    let staged = env.store.prepare(&source, scratch.path())?;

    let mut staged_configs = Vec::new();
    for config in configs {
        let config = resolve_path(config)?;
        if !config.is_file() {
            return Err(gauntlet_core::errors::Fatal::Config(format!(
                "'{}' is not a regular file (is it a directory perhaps?)",
                config.display()
            ))
            .into());
        }
        let filename = config
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staged_config = env.store.prepare(&config, scratch.path())?;
        staged_configs.push((staged_config, filename));
    }

    env.store.commit(&staged)?;
    for (staged_config, _) in &staged_configs {
        env.store.commit(staged_config)?;
    }

    let recorded = env.index.session(|s| {
        s.register_solution(engine_id, cp, &staged.digest, None)?;
        for (staged_config, filename) in &staged_configs {
            s.register_configuration(&staged.digest, &staged_config.digest, filename)?;
        }
        Ok(())
    });
    recorded.inspect_err(|_| warn_orphan(&staged))?;
    println!("{}", staged.digest);
    Ok(0)
}

fn configuration(env: &Env, solution_id: &str, path: &Path) -> Result<i32> {
    env.store.resolve(solution_id)?;

    let scratch = tempfile::tempdir()?;
    // No canonicalization here: a configuration registered through a
    // symlink keeps the name the user expects.
    let source = resolve_path(path)?;
    let filename = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let staged = env.store.prepare(&source, scratch.path())?;
    env.store.commit(&staged)?;

    let recorded = env.index.session(|s| {
        s.register_configuration(solution_id, &staged.digest, &filename)
    });
    let fresh = recorded.inspect_err(|_| warn_orphan(&staged))?;
    if !fresh {
        println!("configuration already registered");
    }
    println!("{}", staged.digest);
    Ok(0)
}

fn evaluator(env: &Env, cp_id: &str, path: &Path) -> Result<i32> {
    let cp: CpKey = cp_id.parse()?;
    let scratch = tempfile::tempdir()?;
    let source = resolve_path(path)?;
    let staged = env.store.prepare(&source, scratch.path())?;
    env.store.commit(&staged)?;

    let recorded = env
        .index
        .session(|s| s.register_evaluator(cp, &staged.digest));
    let replaced = recorded.inspect_err(|_| warn_orphan(&staged))?;
    if let Some(old) = replaced {
        println!("replaced evaluator {old}");
    }
    println!("{}", staged.digest);
    Ok(0)
}

/// One-shot registration of a whole submission from a run-configuration
/// file. Validation happens in full before any blob or row is written.
fn bundle(env: &Env, config_path: &Path) -> Result<i32> {
    let cfg = load_run_config(config_path)?;
    let cp = cfg.problem.challenge_problem_id;

    env.store.resolve(&cfg.problem.engine_id)?;

    let base = resolve_path(Path::new(&cfg.artifact.base))?;
    let scratch = tempfile::tempdir()?;

    let mut files: Vec<PathBuf> = Vec::new();
    for rel in &cfg.artifact.paths {
        let path = resolve_path(&base.join(rel))?;
        if path.is_dir() {
            files.extend(walk_files(&path));
        } else {
            files.push(path);
        }
    }
    let solution_staged = env.store.prepare_list(&files, &base, scratch.path())?;

    let config_file = resolve_path(&base.join(&cfg.artifact.config))?;
    let config_name = config_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let config_staged = env.store.prepare(&config_file, scratch.path())?;

    let input = resolve_path(&base.join(&cfg.artifact.input))?;
    let truth = resolve_path(&base.join(&cfg.evaluation.ground_truth))?;
    let input_staged = env.store.prepare(&input, scratch.path())?;
    let truth_staged = env.store.prepare(&truth, scratch.path())?;

    let evaluator_entry = cfg.evaluation.evaluator.first().ok_or_else(|| {
        gauntlet_core::errors::Fatal::Config("field 'evaluator' names no files".into())
    })?;
    let evaluator_path = resolve_path(&base.join(evaluator_entry))?;
    let evaluator_staged = env.store.prepare(&evaluator_path, scratch.path())?;

    for staged in [
        &solution_staged,
        &config_staged,
        &input_staged,
        &truth_staged,
        &evaluator_staged,
    ] {
        env.store.commit(staged)?;
    }

    let recorded = env.index.session(|s| {
        s.register_solution(
            &cfg.problem.engine_id,
            cp,
            &solution_staged.digest,
            Some(&cfg.artifact.description),
        )?;
        s.register_configuration(&solution_staged.digest, &config_staged.digest, &config_name)?;
        s.register_dataset(
            cp,
            &input_staged.digest,
            &truth_staged.digest,
            &input.to_string_lossy(),
            &truth.to_string_lossy(),
        )?;
        s.register_evaluator(cp, &evaluator_staged.digest)?;
        Ok(())
    });
    recorded.inspect_err(|_| warn_orphan(&solution_staged))?;

    println!("solution      {}", solution_staged.digest);
    println!("configuration {}", config_staged.digest);
    println!("dataset       {}", input_staged.digest);
    println!("evaluator     {}", evaluator_staged.digest);
    Ok(0)
}
