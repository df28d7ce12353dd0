//! Cascading-dependency discovery.
//!
//! Deletion never relies on database-level cascades. Instead, a pure
//! recursive walk over the known one-hop relations computes the exact set
//! of rows that would be orphaned, so the caller can show that set and
//! require confirmation before anything is destroyed. Relations walked:
//! Engine→Solution→ConfiguredSolution→Run→Evaluation, Dataset→Run→
//! Evaluation, Evaluator→Evaluation.

use std::collections::BTreeSet;
use std::fmt;

use rusqlite::params;
use tracing::info;

use crate::db::Session;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Dependent {
    Solution(String),
    ConfiguredSolution { id: String, solution_id: String },
    Run(i64),
    Evaluation { id: String, evaluator_id: String, run_id: i64 },
}

impl fmt::Display for Dependent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependent::Solution(id) => write!(f, "solution {id}"),
            Dependent::ConfiguredSolution { id, solution_id } => {
                write!(f, "configuration {id} (solution {solution_id})")
            }
            Dependent::Run(id) => write!(f, "run {id}"),
            Dependent::Evaluation { id, run_id, .. } => {
                write!(f, "evaluation {id} (run {run_id})")
            }
        }
    }
}

pub fn engine_deps(s: &Session<'_>, engine_id: &str) -> anyhow::Result<BTreeSet<Dependent>> {
    let mut stmt = s
        .tx()
        .prepare("SELECT id FROM solution WHERE engine_id = ?1")?;
    let solutions = stmt
        .query_map(params![engine_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut total = BTreeSet::new();
    for sol in solutions {
        total.extend(solution_deps(s, &sol)?);
        total.insert(Dependent::Solution(sol));
    }
    Ok(total)
}

pub fn solution_deps(s: &Session<'_>, solution_id: &str) -> anyhow::Result<BTreeSet<Dependent>> {
    let mut stmt = s
        .tx()
        .prepare("SELECT id, solution_id FROM configured_solution WHERE solution_id = ?1")?;
    let configs = stmt
        .query_map(params![solution_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut total = BTreeSet::new();
    for (id, solution_id) in configs {
        total.extend(configured_solution_deps(s, &id)?);
        total.insert(Dependent::ConfiguredSolution { id, solution_id });
    }
    Ok(total)
}

pub fn configured_solution_deps(s: &Session<'_>, cs_id: &str) -> anyhow::Result<BTreeSet<Dependent>> {
    let mut stmt = s.tx().prepare("SELECT id FROM run WHERE config_id = ?1")?;
    let runs = stmt
        .query_map(params![cs_id], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut total = BTreeSet::new();
    for run in runs {
        total.extend(run_deps(s, run)?);
        total.insert(Dependent::Run(run));
    }
    Ok(total)
}

pub fn run_deps(s: &Session<'_>, run_id: i64) -> anyhow::Result<BTreeSet<Dependent>> {
    let mut stmt = s
        .tx()
        .prepare("SELECT id, evaluator_id, run_id FROM evaluation WHERE run_id = ?1")?;
    let evals = stmt
        .query_map(params![run_id], |row| {
            Ok(Dependent::Evaluation {
                id: row.get(0)?,
                evaluator_id: row.get(1)?,
                run_id: row.get(2)?,
            })
        })?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(evals)
}

pub fn dataset_deps(s: &Session<'_>, dataset_id: &str) -> anyhow::Result<BTreeSet<Dependent>> {
    let mut stmt = s.tx().prepare("SELECT id FROM run WHERE dataset_id = ?1")?;
    let runs = stmt
        .query_map(params![dataset_id], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut total = BTreeSet::new();
    for run in runs {
        total.extend(run_deps(s, run)?);
        total.insert(Dependent::Run(run));
    }
    Ok(total)
}

pub fn evaluator_deps(s: &Session<'_>, evaluator_id: &str) -> anyhow::Result<BTreeSet<Dependent>> {
    let mut stmt = s
        .tx()
        .prepare("SELECT id, evaluator_id, run_id FROM evaluation WHERE evaluator_id = ?1")?;
    let evals = stmt
        .query_map(params![evaluator_id], |row| {
            Ok(Dependent::Evaluation {
                id: row.get(0)?,
                evaluator_id: row.get(1)?,
                run_id: row.get(2)?,
            })
        })?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(evals)
}

/// Deletes every row in `deps`, children first so the declared foreign
/// keys are never violated mid-way. `BTreeSet` ordering is not the delete
/// order; rows are grouped by kind.
pub fn delete_dependents(s: &Session<'_>, deps: &BTreeSet<Dependent>) -> anyhow::Result<()> {
    for dep in deps {
        if let Dependent::Evaluation { id, evaluator_id, run_id } = dep {
            s.tx().execute(
                "DELETE FROM evaluation WHERE id = ?1 AND evaluator_id = ?2 AND run_id = ?3",
                params![id, evaluator_id, run_id],
            )?;
        }
    }
    for dep in deps {
        if let Dependent::Run(id) = dep {
            s.tx().execute("DELETE FROM run WHERE id = ?1", params![id])?;
        }
    }
    for dep in deps {
        if let Dependent::ConfiguredSolution { id, solution_id } = dep {
            s.tx().execute(
                "DELETE FROM configured_solution WHERE id = ?1 AND solution_id = ?2",
                params![id, solution_id],
            )?;
        }
    }
    for dep in deps {
        if let Dependent::Solution(id) = dep {
            s.tx()
                .execute("DELETE FROM solution WHERE id = ?1", params![id])?;
        }
    }
    if !deps.is_empty() {
        info!(count = deps.len(), "deleted dependent rows");
    }
    Ok(())
}

pub fn delete_engine(s: &Session<'_>, id: &str) -> anyhow::Result<()> {
    delete_dependents(s, &engine_deps(s, id)?)?;
    s.tx().execute("DELETE FROM engine WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn delete_solution(s: &Session<'_>, id: &str) -> anyhow::Result<()> {
    delete_dependents(s, &solution_deps(s, id)?)?;
    s.tx().execute("DELETE FROM solution WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn delete_configured_solution(s: &Session<'_>, id: &str) -> anyhow::Result<()> {
    delete_dependents(s, &configured_solution_deps(s, id)?)?;
    s.tx()
        .execute("DELETE FROM configured_solution WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn delete_dataset(s: &Session<'_>, id: &str) -> anyhow::Result<()> {
    delete_dependents(s, &dataset_deps(s, id)?)?;
    s.tx()
        .execute("DELETE FROM challenge_problem_dataset WHERE dataset_id = ?1", params![id])?;
    s.tx()
        .execute("DELETE FROM dataset WHERE in_digest = ?1", params![id])?;
    Ok(())
}

pub fn delete_evaluator(s: &Session<'_>, id: &str) -> anyhow::Result<()> {
    delete_dependents(s, &evaluator_deps(s, id)?)?;
    s.tx().execute("DELETE FROM evaluator WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn delete_run(s: &Session<'_>, id: i64) -> anyhow::Result<()> {
    delete_dependents(s, &run_deps(s, id)?)?;
    s.tx().execute("DELETE FROM run WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn delete_evaluation(s: &Session<'_>, id: &str) -> anyhow::Result<()> {
    s.tx().execute("DELETE FROM evaluation WHERE id = ?1", params![id])?;
    Ok(())
}
