//! Printing index entities as JSON, for inspection and scripting.

use anyhow::Result;
use serde::Serialize;

use super::{expand_id, Env};
use crate::cli::args::ShowSub;

pub fn dispatch(env: &Env, cmd: ShowSub) -> Result<i32> {
    match cmd {
        ShowSub::Team { id } => print(env.index.session(|s| s.get_team(id))?, "team"),
        ShowSub::Engine { id } => {
            let id = expand_id(env, &id);
            print(env.index.session(|s| s.get_engine(&id))?, "engine")
        }
        ShowSub::Solution { id } => {
            let id = expand_id(env, &id);
            print(env.index.session(|s| s.get_solution(&id))?, "solution")
        }
        ShowSub::Configuration { id } => {
            let id = expand_id(env, &id);
            let attachments = env.index.session(|s| s.get_configurations_by_id(&id))?;
            if attachments.is_empty() {
                eprintln!("no such configuration");
                return Ok(1);
            }
            println!("{}", serde_json::to_string_pretty(&attachments)?);
            Ok(0)
        }
        ShowSub::Dataset { id } => {
            let id = expand_id(env, &id);
            print(env.index.session(|s| s.get_dataset(&id))?, "dataset")
        }
        ShowSub::Evaluator { id } => {
            let id = expand_id(env, &id);
            print(env.index.session(|s| s.get_evaluator(&id))?, "evaluator")
        }
        ShowSub::Run { id } => print(env.index.session(|s| s.get_run(id))?, "run"),
        ShowSub::Evaluation { id } => {
            let id = expand_id(env, &id);
            print(env.index.session(|s| s.get_evaluation(&id))?, "evaluation")
        }
    }
}

fn print<T: Serialize>(row: Option<T>, kind: &str) -> Result<i32> {
    match row {
        Some(row) => {
            println!("{}", serde_json::to_string_pretty(&row)?);
            Ok(0)
        }
        None => {
            eprintln!("no such {kind}");
            Ok(1)
        }
    }
}
