//! Schema-first entity records.
//!
//! Each row type is a plain struct with explicit fields and an explicit
//! `from_row` mapping; nothing is inferred from the live database.

use rusqlite::Row;
use serde::Serialize;

use crate::config::CpKey;

#[derive(Debug, Clone, Serialize)]
pub struct Team {
    pub id: i64,
    pub institution: String,
    pub description: String,
}

impl Team {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Team> {
        Ok(Team {
            id: row.get("id")?,
            institution: row.get("institution")?,
            description: row.get("description")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Engine {
    pub id: String,
    pub full_path: String,
    pub team_id: i64,
}

impl Engine {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Engine> {
        Ok(Engine {
            id: row.get("id")?,
            full_path: row.get("full_path")?,
            team_id: row.get("team_id")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Dataset {
    pub in_digest: String,
    pub eval_digest: String,
    pub label: Option<String>,
    pub rel_inpath: String,
    pub rel_evalpath: String,
}

impl Dataset {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Dataset> {
        Ok(Dataset {
            in_digest: row.get("in_digest")?,
            eval_digest: row.get("eval_digest")?,
            label: row.get("label")?,
            rel_inpath: row.get("rel_inpath")?,
            rel_evalpath: row.get("rel_evalpath")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Solution {
    pub id: String,
    pub engine_id: String,
    pub description: Option<String>,
    pub challenge_problem: CpKey,
}

impl Solution {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Solution> {
        Ok(Solution {
            id: row.get("id")?,
            engine_id: row.get("engine_id")?,
            description: row.get("description")?,
            challenge_problem: CpKey {
                id: row.get("cp_id")?,
                major: row.get("cp_major")?,
                minor: row.get("cp_minor")?,
            },
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfiguredSolution {
    pub id: String,
    pub filename: String,
    pub solution_id: String,
}

impl ConfiguredSolution {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<ConfiguredSolution> {
        Ok(ConfiguredSolution {
            id: row.get("id")?,
            filename: row.get("filename")?,
            solution_id: row.get("solution_id")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Evaluator {
    pub id: String,
    pub challenge_problem: CpKey,
}

impl Evaluator {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Evaluator> {
        Ok(Evaluator {
            id: row.get("id")?,
            challenge_problem: CpKey {
                id: row.get("cp_id")?,
                major: row.get("cp_major")?,
                minor: row.get("cp_minor")?,
            },
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Run {
    pub id: i64,
    pub engine_id: String,
    pub config_id: String,
    pub solution_id: String,
    pub dataset_id: String,
    pub output: String,
    pub log: Option<String>,
    pub started: String,
    pub duration: f64,
    pub load_average: f64,
    pub load_max: f64,
    pub ram_average: f64,
    pub ram_max: f64,
}

impl Run {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Run> {
        Ok(Run {
            id: row.get("id")?,
            engine_id: row.get("engine_id")?,
            config_id: row.get("config_id")?,
            solution_id: row.get("solution_id")?,
            dataset_id: row.get("dataset_id")?,
            output: row.get("output")?,
            log: row.get("log")?,
            started: row.get("started")?,
            duration: row.get("duration")?,
            load_average: row.get("load_average")?,
            load_max: row.get("load_max")?,
            ram_average: row.get("ram_average")?,
            ram_max: row.get("ram_max")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub id: String,
    pub evaluator_id: String,
    pub run_id: i64,
    pub did_succeed: bool,
}

impl Evaluation {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Evaluation> {
        Ok(Evaluation {
            id: row.get("id")?,
            evaluator_id: row.get("evaluator_id")?,
            run_id: row.get("run_id")?,
            did_succeed: row.get("did_succeed")?,
        })
    }
}

/// Metrics captured while the artifact ran, stored on the Run row.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    pub started_unix: f64,
    pub duration: f64,
    pub load_average: f64,
    pub load_max: f64,
    pub ram_average: f64,
    pub ram_max: f64,
}
