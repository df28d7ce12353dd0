//! Registration and record-keeping operations.
//!
//! Every entity is created through a register operation here. Duplicate
//! registration of identical content is a silent no-op (content hashes
//! make "same bytes" and "same key" the same question), and every foreign
//! reference is validated through `require_foreign_key` before the insert
//! is attempted.

use rusqlite::types::Value;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

use crate::config::CpKey;
use crate::db::model::{
    ConfiguredSolution, Dataset, Engine, Evaluation, Evaluator, Run, RunStats, Solution, Team,
};
use crate::db::{now, Session};
use crate::errors::Fatal;

impl<'a> Session<'a> {
    pub fn insert_team(&self, institution: &str, description: &str) -> anyhow::Result<i64> {
        let ts = now();
        self.tx().execute(
            "INSERT INTO team (institution, description, meta_created, meta_updated)
             VALUES (?1, ?2, ?3, ?3)",
            params![institution, description, ts],
        )?;
        Ok(self.tx().last_insert_rowid())
    }

    pub fn insert_challenge_problem(&self, cp: CpKey, url: Option<&str>) -> anyhow::Result<bool> {
        if self.contains_cp(cp)? {
            return Ok(false);
        }
        let ts = now();
        self.tx().execute(
            "INSERT INTO challenge_problem
               (id, revision_major, revision_minor, url, meta_created, meta_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![cp.id, cp.major, cp.minor, url, ts],
        )?;
        info!(%cp, "registered challenge problem");
        Ok(true)
    }

    fn contains_cp(&self, cp: CpKey) -> anyhow::Result<bool> {
        self.contains(
            "challenge_problem",
            &[
                ("id", Value::Integer(cp.id)),
                ("revision_major", Value::Integer(cp.major)),
                ("revision_minor", Value::Integer(cp.minor)),
            ],
        )
    }

    fn require_cp(&self, cp: CpKey) -> anyhow::Result<()> {
        if self.contains_cp(cp)? {
            Ok(())
        } else {
            Err(Fatal::ForeignKey {
                table: "challenge_problem",
                key: cp.to_string(),
            }
            .into())
        }
    }

    /// Returns false when the engine was already registered (idempotent
    /// re-registration is success, not failure).
    pub fn register_engine(
        &self,
        team_id: i64,
        digest: &str,
        full_path: &str,
    ) -> anyhow::Result<bool> {
        if self.contains("engine", &[("id", Value::from(digest.to_string()))])? {
            debug!(digest, "engine already registered");
            return Ok(false);
        }
        self.require_foreign_key("team", "id", Value::Integer(team_id))?;
        let ts = now();
        self.tx().execute(
            "INSERT INTO engine (id, full_path, team_id, meta_created, meta_updated)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![digest, full_path, team_id, ts],
        )?;
        info!(digest, team_id, "registered engine");
        Ok(true)
    }

    /// Registers a dataset (idempotently) and links it to the challenge
    /// problem. The link is many-to-many; re-linking is a no-op.
    pub fn register_dataset(
        &self,
        cp: CpKey,
        in_digest: &str,
        eval_digest: &str,
        rel_inpath: &str,
        rel_evalpath: &str,
    ) -> anyhow::Result<bool> {
        self.require_cp(cp)?;

        let fresh = !self.contains("dataset", &[("in_digest", Value::from(in_digest.to_string()))])?;
        if fresh {
            let ts = now();
            self.tx().execute(
                "INSERT INTO dataset
                   (in_digest, eval_digest, rel_inpath, rel_evalpath, meta_created, meta_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![in_digest, eval_digest, rel_inpath, rel_evalpath, ts],
            )?;
            info!(in_digest, "registered dataset");
        }

        self.tx().execute(
            "INSERT OR IGNORE INTO challenge_problem_dataset (cp_id, cp_major, cp_minor, dataset_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![cp.id, cp.major, cp.minor, in_digest],
        )?;
        Ok(fresh)
    }

    pub fn register_solution(
        &self,
        engine_id: &str,
        cp: CpKey,
        digest: &str,
        description: Option<&str>,
    ) -> anyhow::Result<bool> {
        if self.contains("solution", &[("id", Value::from(digest.to_string()))])? {
            debug!(digest, "solution already registered");
            return Ok(false);
        }
        self.require_foreign_key("engine", "id", Value::from(engine_id.to_string()))?;
        self.require_cp(cp)?;
        let ts = now();
        self.tx().execute(
            "INSERT INTO solution
               (id, engine_id, description, cp_id, cp_major, cp_minor, meta_created, meta_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![digest, engine_id, description, cp.id, cp.major, cp.minor, ts],
        )?;
        info!(digest, engine_id, %cp, "registered solution");
        Ok(true)
    }

    pub fn register_configuration(
        &self,
        solution_id: &str,
        digest: &str,
        filename: &str,
    ) -> anyhow::Result<bool> {
        if self.contains(
            "configured_solution",
            &[
                ("id", Value::from(digest.to_string())),
                ("solution_id", Value::from(solution_id.to_string())),
            ],
        )? {
            debug!(digest, solution_id, "configuration already registered");
            return Ok(false);
        }
        self.require_foreign_key("solution", "id", Value::from(solution_id.to_string()))?;
        let ts = now();
        self.tx().execute(
            "INSERT INTO configured_solution (id, filename, solution_id, meta_created, meta_updated)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![digest, filename, solution_id, ts],
        )?;
        info!(digest, solution_id, "registered configuration");
        Ok(true)
    }

    /// A challenge problem has at most one evaluator. Registering a new
    /// one replaces (deletes) the old evaluator row; evaluations recorded
    /// under the old evaluator are kept as history. Returns the replaced
    /// evaluator id, if any.
    pub fn register_evaluator(&self, cp: CpKey, digest: &str) -> anyhow::Result<Option<String>> {
        self.require_cp(cp)?;

        let old = self.evaluator_for_cp(cp)?;
        if let Some(old) = &old {
            if old.id == digest {
                debug!(digest, "evaluator already registered");
                return Ok(None);
            }
            self.tx()
                .execute("DELETE FROM evaluator WHERE id = ?1", params![old.id])?;
            info!(old = %old.id, "old evaluator removed");
        }

        let ts = now();
        self.tx().execute(
            "INSERT INTO evaluator (id, cp_id, cp_major, cp_minor, meta_created, meta_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![digest, cp.id, cp.major, cp.minor, ts],
        )?;
        info!(digest, %cp, "registered evaluator");
        Ok(old.map(|e| e.id))
    }

    pub fn save_run(
        &self,
        engine_id: &str,
        solution_id: &str,
        config_id: &str,
        dataset_id: &str,
        output: &str,
        log: Option<&str>,
        stats: &RunStats,
    ) -> anyhow::Result<i64> {
        self.require_foreign_key("engine", "id", Value::from(engine_id.to_string()))?;
        self.require_foreign_key("dataset", "in_digest", Value::from(dataset_id.to_string()))?;
        if !self.contains(
            "configured_solution",
            &[
                ("id", Value::from(config_id.to_string())),
                ("solution_id", Value::from(solution_id.to_string())),
            ],
        )? {
            return Err(Fatal::ForeignKey {
                table: "configured_solution",
                key: format!("{config_id} (solution {solution_id})"),
            }
            .into());
        }

        let started = chrono::DateTime::from_timestamp(
            stats.started_unix as i64,
            ((stats.started_unix.fract()) * 1e9) as u32,
        )
        .unwrap_or_else(chrono::Utc::now)
        .to_rfc3339();

        let ts = now();
        self.tx().execute(
            "INSERT INTO run
               (engine_id, config_id, solution_id, dataset_id, output, log,
                started, duration, load_average, load_max, ram_average, ram_max,
                meta_created, meta_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
            params![
                engine_id,
                config_id,
                solution_id,
                dataset_id,
                output,
                log,
                started,
                stats.duration,
                stats.load_average,
                stats.load_max,
                stats.ram_average,
                stats.ram_max,
                ts,
            ],
        )?;
        let run_id = self.tx().last_insert_rowid();
        info!(run_id, "recorded run");
        Ok(run_id)
    }

    /// How many times this (configuration, dataset) combination has run.
    /// Recomputed by scanning runs; no counter row is maintained.
    pub fn run_count(
        &self,
        config_id: &str,
        solution_id: &str,
        dataset_id: &str,
    ) -> anyhow::Result<i64> {
        let count = self.tx().query_row(
            "SELECT COUNT(*) FROM run
             WHERE config_id = ?1 AND solution_id = ?2 AND dataset_id = ?3",
            params![config_id, solution_id, dataset_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Records an evaluation for a run. A run has at most one evaluation;
    /// latest wins, so an existing one is deleted before the insert, inside
    /// the surrounding transaction.
    pub fn save_evaluation(
        &self,
        run_id: i64,
        output_digest: &str,
        did_succeed: bool,
    ) -> anyhow::Result<()> {
        let run = self
            .get_run(run_id)?
            .ok_or(Fatal::ForeignKey {
                table: "run",
                key: run_id.to_string(),
            })?;
        let solution = self
            .get_solution(&run.solution_id)?
            .ok_or(Fatal::ForeignKey {
                table: "solution",
                key: run.solution_id.clone(),
            })?;
        let evaluator = self
            .evaluator_for_cp(solution.challenge_problem)?
            .ok_or_else(|| {
                Fatal::Execution(format!(
                    "no registered evaluator for challenge problem {}",
                    solution.challenge_problem
                ))
            })?;

        let replaced = self
            .tx()
            .execute("DELETE FROM evaluation WHERE run_id = ?1", params![run_id])?;
        if replaced > 0 {
            info!(run_id, "old evaluation replaced");
        }

        let ts = now();
        self.tx().execute(
            "INSERT INTO evaluation
               (id, evaluator_id, run_id, did_succeed, meta_created, meta_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![output_digest, evaluator.id, run_id, did_succeed, ts],
        )?;
        info!(run_id, did_succeed, "recorded evaluation");
        Ok(())
    }

    /// Run ids with no evaluation yet, in id order.
    pub fn unevaluated_run_ids(&self) -> anyhow::Result<Vec<i64>> {
        let mut stmt = self.tx().prepare(
            "SELECT id FROM run
             WHERE id NOT IN (SELECT run_id FROM evaluation)
             ORDER BY id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    pub fn configurations_for_solution(
        &self,
        solution_id: &str,
    ) -> anyhow::Result<Vec<ConfiguredSolution>> {
        let mut stmt = self.tx().prepare(
            "SELECT id, filename, solution_id FROM configured_solution
             WHERE solution_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![solution_id], ConfiguredSolution::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_team(&self, id: i64) -> anyhow::Result<Option<Team>> {
        let row = self
            .tx()
            .query_row(
                "SELECT id, institution, description FROM team WHERE id = ?1",
                params![id],
                Team::from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_engine(&self, id: &str) -> anyhow::Result<Option<Engine>> {
        let row = self
            .tx()
            .query_row(
                "SELECT id, full_path, team_id FROM engine WHERE id = ?1",
                params![id],
                Engine::from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_dataset(&self, in_digest: &str) -> anyhow::Result<Option<Dataset>> {
        let row = self
            .tx()
            .query_row(
                "SELECT in_digest, eval_digest, label, rel_inpath, rel_evalpath
                 FROM dataset WHERE in_digest = ?1",
                params![in_digest],
                Dataset::from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_solution(&self, id: &str) -> anyhow::Result<Option<Solution>> {
        let row = self
            .tx()
            .query_row(
                "SELECT id, engine_id, description, cp_id, cp_major, cp_minor
                 FROM solution WHERE id = ?1",
                params![id],
                Solution::from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Configurations are addressed by digest alone at the CLI; the same
    /// digest may be attached to several solutions.
    pub fn get_configurations_by_id(&self, id: &str) -> anyhow::Result<Vec<ConfiguredSolution>> {
        let mut stmt = self.tx().prepare(
            "SELECT id, filename, solution_id FROM configured_solution WHERE id = ?1",
        )?;
        let rows = stmt
            .query_map(params![id], ConfiguredSolution::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_evaluator(&self, id: &str) -> anyhow::Result<Option<Evaluator>> {
        let row = self
            .tx()
            .query_row(
                "SELECT id, cp_id, cp_major, cp_minor FROM evaluator WHERE id = ?1",
                params![id],
                Evaluator::from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn evaluator_for_cp(&self, cp: CpKey) -> anyhow::Result<Option<Evaluator>> {
        let row = self
            .tx()
            .query_row(
                "SELECT id, cp_id, cp_major, cp_minor FROM evaluator
                 WHERE cp_id = ?1 AND cp_major = ?2 AND cp_minor = ?3",
                params![cp.id, cp.major, cp.minor],
                Evaluator::from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_run(&self, id: i64) -> anyhow::Result<Option<Run>> {
        let row = self
            .tx()
            .query_row(
                "SELECT id, engine_id, config_id, solution_id, dataset_id, output, log,
                        started, duration, load_average, load_max, ram_average, ram_max
                 FROM run WHERE id = ?1",
                params![id],
                Run::from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_evaluation(&self, id: &str) -> anyhow::Result<Option<Evaluation>> {
        let row = self
            .tx()
            .query_row(
                "SELECT id, evaluator_id, run_id, did_succeed FROM evaluation WHERE id = ?1",
                params![id],
                Evaluation::from_row,
            )
            .optional()?;
        Ok(row)
    }
}
