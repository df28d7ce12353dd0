//! Deleting index entities with cascading-dependency confirmation.
//!
//! Every delete first shows the full set of rows that would be orphaned
//! and asks before destroying anything; `--yes` skips the prompt for
//! scripted use. Blobs are left in the store: they are content-addressed
//! and harmless, and another entity may share them.

use std::collections::BTreeSet;
use std::io::{self, BufRead, Write};

use anyhow::Result;

use gauntlet_core::db::deps::{self, Dependent};

use super::{expand_id, Env};
use crate::cli::args::DeleteSub;

pub fn dispatch(env: &Env, cmd: DeleteSub) -> Result<i32> {
    match cmd {
        DeleteSub::Engine { id, yes } => engine(env, &id, yes),
        DeleteSub::Solution { id, yes } => solution(env, &id, yes),
        DeleteSub::Configuration { id, yes } => configuration(env, &id, yes),
        DeleteSub::Dataset { id, yes } => dataset(env, &id, yes),
        DeleteSub::Evaluator { id, yes } => evaluator(env, &id, yes),
        DeleteSub::Run { id, yes } => run(env, id, yes),
        DeleteSub::Evaluation { id, yes } => evaluation(env, &id, yes),
    }
}

fn approve(label: &str, dependents: &BTreeSet<Dependent>, yes: bool) -> Result<bool> {
    if dependents.is_empty() {
        println!("deleting {label}");
    } else {
        println!("deleting {label} will also delete:");
        for dep in dependents {
            println!("  {dep}");
        }
    }
    if yes {
        return Ok(true);
    }
    print!("proceed? [y/N] ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(
        line.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

fn engine(env: &Env, id: &str, yes: bool) -> Result<i32> {
    let id = expand_id(env, id);
    let found = env.index.session(|s| {
        Ok(match s.get_engine(&id)? {
            None => None,
            Some(_) => Some(deps::engine_deps(s, &id)?),
        })
    })?;
    let Some(dependents) = found else {
        println!("no such engine: {id}");
        return Ok(1);
    };
    if !approve(&format!("engine {id}"), &dependents, yes)? {
        println!("aborted");
        return Ok(1);
    }
    env.index.session(|s| deps::delete_engine(s, &id))?;
    println!("deleted engine {id}");
    Ok(0)
}

fn solution(env: &Env, id: &str, yes: bool) -> Result<i32> {
    let id = expand_id(env, id);
    let found = env.index.session(|s| {
        Ok(match s.get_solution(&id)? {
            None => None,
            Some(_) => Some(deps::solution_deps(s, &id)?),
        })
    })?;
    let Some(dependents) = found else {
        println!("no such solution: {id}");
        return Ok(1);
    };
    if !approve(&format!("solution {id}"), &dependents, yes)? {
        println!("aborted");
        return Ok(1);
    }
    env.index.session(|s| deps::delete_solution(s, &id))?;
    println!("deleted solution {id}");
    Ok(0)
}

/// A configuration digest may be attached to several solutions; deletion
/// by digest removes every attachment.
fn configuration(env: &Env, id: &str, yes: bool) -> Result<i32> {
    let id = expand_id(env, id);
    let found = env.index.session(|s| {
        let attachments = s.get_configurations_by_id(&id)?;
        if attachments.is_empty() {
            return Ok(None);
        }
        Ok(Some(deps::configured_solution_deps(s, &id)?))
    })?;
    let Some(dependents) = found else {
        println!("no such configuration: {id}");
        return Ok(1);
    };
    if !approve(&format!("configuration {id}"), &dependents, yes)? {
        println!("aborted");
        return Ok(1);
    }
    env.index
        .session(|s| deps::delete_configured_solution(s, &id))?;
    println!("deleted configuration {id}");
    Ok(0)
}

fn dataset(env: &Env, id: &str, yes: bool) -> Result<i32> {
    let id = expand_id(env, id);
    let found = env.index.session(|s| {
        Ok(match s.get_dataset(&id)? {
            None => None,
            Some(_) => Some(deps::dataset_deps(s, &id)?),
        })
    })?;
    let Some(dependents) = found else {
        println!("no such dataset: {id}");
        return Ok(1);
    };
    if !approve(&format!("dataset {id}"), &dependents, yes)? {
        println!("aborted");
        return Ok(1);
    }
    env.index.session(|s| deps::delete_dataset(s, &id))?;
    println!("deleted dataset {id}");
    Ok(0)
}

fn evaluator(env: &Env, id: &str, yes: bool) -> Result<i32> {
    let id = expand_id(env, id);
    let found = env.index.session(|s| {
        Ok(match s.get_evaluator(&id)? {
            None => None,
            Some(_) => Some(deps::evaluator_deps(s, &id)?),
        })
    })?;
    let Some(dependents) = found else {
        println!("no such evaluator: {id}");
        return Ok(1);
    };
    if !approve(&format!("evaluator {id}"), &dependents, yes)? {
        println!("aborted");
        return Ok(1);
    }
    env.index.session(|s| deps::delete_evaluator(s, &id))?;
    println!("deleted evaluator {id}");
    Ok(0)
}

fn run(env: &Env, id: i64, yes: bool) -> Result<i32> {
    let found = env.index.session(|s| {
        Ok(match s.get_run(id)? {
            None => None,
            Some(_) => Some(deps::run_deps(s, id)?),
        })
    })?;
    let Some(dependents) = found else {
        println!("no such run: {id}");
        return Ok(1);
    };
    if !approve(&format!("run {id}"), &dependents, yes)? {
        println!("aborted");
        return Ok(1);
    }
    env.index.session(|s| deps::delete_run(s, id))?;
    println!("deleted run {id}");
    Ok(0)
}

fn evaluation(env: &Env, id: &str, yes: bool) -> Result<i32> {
    let id = expand_id(env, id);
    let exists = env
        .index
        .session(|s| Ok(s.get_evaluation(&id)?.is_some()))?;
    if !exists {
        println!("no such evaluation: {id}");
        return Ok(1);
    }
    if !approve(&format!("evaluation {id}"), &BTreeSet::new(), yes)? {
        println!("aborted");
        return Ok(1);
    }
    env.index.session(|s| deps::delete_evaluation(s, &id))?;
    println!("deleted evaluation {id}");
    Ok(0)
}
