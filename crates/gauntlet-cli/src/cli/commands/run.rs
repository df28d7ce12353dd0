//! Executing a configured solution against a dataset.
//!
//! The four referenced artifacts are unpacked into a tagged sandbox, the
//! solution's `run.sh` is spawned with a fixed argument contract, and the
//! process tree is sampled while it runs. Provenance (blob digests plus
//! resource figures) is recorded only after the script exits cleanly.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tracing::{info, warn};

use gauntlet_core::db::model::{ConfiguredSolution, Dataset, Engine, RunStats, Solution};
use gauntlet_core::errors::Fatal;
use gauntlet_core::sandbox::{self, with_sandbox};
use gauntlet_core::watch::{
    ensure_executable, find_in_tree, ProcessWatcher, ResourceMonitor, DEFAULT_POLL,
};

use super::{resolve_digest, Env};
use crate::cli::args::RunArgs;

/// The timed run samples resources an order of magnitude faster than the
/// watcher's default, so short-lived solutions still get usable figures.
const RUN_POLL: Duration = Duration::from_millis(100);

struct Snapshot {
    engine: Engine,
    solution: Solution,
    config: ConfiguredSolution,
    dataset: Dataset,
}

pub fn run_solution(env: &Env, args: &RunArgs) -> Result<i32> {
    let engine_id = resolve_digest(&env.store, &args.engine)?;
    let solution_id = resolve_digest(&env.store, &args.solution)?;
    let config_id = resolve_digest(&env.store, &args.config)?;
    let dataset_id = resolve_digest(&env.store, &args.dataset)?;

    let snap = env.index.session(|s| {
        let engine = s.get_engine(&engine_id)?.ok_or(Fatal::ForeignKey {
            table: "engine",
            key: engine_id.clone(),
        })?;
        let solution = s.get_solution(&solution_id)?.ok_or(Fatal::ForeignKey {
            table: "solution",
            key: solution_id.clone(),
        })?;
        let config = s
            .configurations_for_solution(&solution_id)?
            .into_iter()
            .find(|c| c.id == config_id)
            .ok_or(Fatal::ForeignKey {
                table: "configured_solution",
                key: format!("{config_id} (solution {solution_id})"),
            })?;
        let dataset = s.get_dataset(&dataset_id)?.ok_or(Fatal::ForeignKey {
            table: "dataset",
            key: dataset_id.clone(),
        })?;
        Ok(Snapshot {
            engine,
            solution,
            config,
            dataset,
        })
    })?;

    if snap.solution.engine_id != snap.engine.id {
        return Err(Fatal::Execution(format!(
            "solution {} belongs to engine {}, not {}",
            snap.solution.id, snap.solution.engine_id, snap.engine.id
        ))
        .into());
    }

    let run_id = with_sandbox("gauntlet-run.", args.persist, |sb| {
        execute(env, &snap, sb.path())
    })?;
    println!("{run_id}");
    Ok(0)
}

fn execute(env: &Env, snap: &Snapshot, sandbox: &Path) -> Result<i64> {
    let engine_dir = env.store.extract(&snap.engine.id, sandbox, "engine")?;
    let input_dir = env.store.extract(&snap.dataset.in_digest, sandbox, "input")?;
    let solution_dir = env.store.extract(&snap.solution.id, sandbox, "solution")?;
    // The chosen configuration unpacks into the solution tree, next to the
    // scripts that will read it. Its extract root can differ from the
    // solution's (the solution may collapse onto a subdirectory, a single
    // config file never does), so the config is searched under its own
    // root.
    let config_dir = env.store.extract(&snap.config.id, sandbox, "solution")?;

    let config_path = find_in_tree(&config_dir, &snap.config.filename).ok_or_else(|| {
        Fatal::Execution(format!(
            "configuration file '{}' not found in the unpacked solution",
            snap.config.filename
        ))
    })?;

    let output_dir = sandbox.join("output");
    let trace_dir = sandbox.join("trace");
    let scratch = sandbox.join("scratch");
    std::fs::create_dir_all(&output_dir)?;
    std::fs::create_dir_all(&trace_dir)?;
    std::fs::create_dir_all(&scratch)?;
    let log_file = sandbox.join("log");

    let env_overrides = vec![
        (
            "ENGROOT".to_string(),
            engine_dir.to_string_lossy().into_owned(),
        ),
        (
            "GAUNTLET_TRACE_BASE".to_string(),
            trace_dir.join("trace").to_string_lossy().into_owned(),
        ),
    ];

    // Optional compile step. A solution without build.sh goes straight to
    // execution.
    if let Some(build) = find_in_tree(&solution_dir, "build.sh") {
        ensure_executable(&build)?;
        info!(script = %build.display(), "building solution");
        let code = supervise(
            &solution_dir,
            &[build.to_string_lossy().into_owned()],
            &env_overrides,
            &mut Aggregate::default(),
            DEFAULT_POLL,
        )?;
        if code != 0 {
            return Err(Fatal::Execution(format!("build.sh exited with status {code}")).into());
        }
    }

    let run_sh = find_in_tree(&solution_dir, "run.sh").ok_or_else(|| {
        Fatal::Execution("the solution has no run.sh".to_string())
    })?;
    ensure_executable(&run_sh)?;

    let argv: Vec<String> = [
        run_sh.as_path(),
        config_path.as_path(),
        input_dir.as_path(),
        output_dir.as_path(),
        log_file.as_path(),
    ]
    .iter()
    .map(|p| p.to_string_lossy().into_owned())
    .collect();

    let started_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();

    let mut agg = Aggregate::default();
    info!(script = %run_sh.display(), "running solution");
    let code = supervise(&solution_dir, &argv, &env_overrides, &mut agg, RUN_POLL)?;
    if code != 0 {
        return Err(Fatal::Execution(format!("run.sh exited with status {code}")).into());
    }

    let stats = RunStats {
        started_unix,
        duration: agg.duration,
        load_average: agg.load_average(),
        load_max: agg.load_max,
        ram_average: agg.ram_average(),
        ram_max: agg.ram_max,
    };

    let output_staged = env.store.prepare(&output_dir, &scratch)?;
    env.store.commit(&output_staged)?;
    let log_digest = if log_file.is_file() {
        let staged = env.store.prepare(&log_file, &scratch)?;
        env.store.commit(&staged)?;
        Some(staged.digest)
    } else {
        None
    };

    let recorded = env.index.session(|s| {
        let run_id = s.save_run(
            &snap.engine.id,
            &snap.solution.id,
            &snap.config.id,
            &snap.dataset.in_digest,
            &output_staged.digest,
            log_digest.as_deref(),
            &stats,
        )?;
        let count = s.run_count(&snap.config.id, &snap.solution.id, &snap.dataset.in_digest)?;
        info!(run_id, count, "configuration/dataset pair run recorded");
        Ok(run_id)
    });
    recorded.inspect_err(|_| {
        warn!(digest = %output_staged.digest, "run insert failed; orphan output blob left in store")
    })
}

/// Drives one watched process to completion, folding resource samples into
/// `agg`. Returns the exit code.
pub(crate) fn supervise(
    cwd: &Path,
    argv: &[String],
    env_overrides: &[(String, String)],
    agg: &mut Aggregate,
    poll: Duration,
) -> Result<i32> {
    let mut watcher = ProcessWatcher::spawn(cwd, argv, env_overrides, poll)?;
    let mut monitor = ResourceMonitor::new();

    let mut exit_code = None;
    while let Some(sample) = watcher.next() {
        if sandbox::interrupted() {
            watcher.kill();
            sandbox::check_interrupted()?;
        }
        let pid = match sample.pid {
            // The spawn-time existence check passed, so the sentinel here
            // means the script disappeared underneath us.
            None => {
                let program = argv.first().map(String::as_str).unwrap_or("");
                return Err(
                    Fatal::Execution(format!("'{program}' vanished before it could run")).into(),
                );
            }
            Some(pid) => pid,
        };
        if let Some(code) = sample.exit_code {
            if let (Some(started), Some(at)) = (sample.started, sample.at) {
                agg.duration = at.duration_since(started).as_secs_f64();
            }
            exit_code = Some(code);
            break;
        }
        if let Some((load, ram_kib)) = monitor.poll(pid) {
            agg.add(load, ram_kib as f64);
        }
    }

    exit_code.ok_or_else(|| {
        Fatal::Execution("child exited without reporting a status".to_string()).into()
    })
}

/// Running max/mean over the resource samples of one supervised process.
#[derive(Debug, Default)]
pub(crate) struct Aggregate {
    duration: f64,
    load_sum: f64,
    load_max: f64,
    ram_sum: f64,
    ram_max: f64,
    samples: u64,
}

impl Aggregate {
    fn add(&mut self, load: f64, ram_kib: f64) {
        self.load_sum += load;
        self.load_max = self.load_max.max(load);
        self.ram_sum += ram_kib;
        self.ram_max = self.ram_max.max(ram_kib);
        self.samples += 1;
    }

    fn load_average(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.load_sum / self.samples as f64
        }
    }

    fn ram_average(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.ram_sum / self.samples as f64
        }
    }
}
