//! Spawning and polling the external artifact process.
//!
//! [`ProcessWatcher`] is a lazy, finite iterator of samples: the caller
//! gets one sample before any waiting (for a zero-time resource reading),
//! then one per poll interval until the child exits, then a final sample
//! carrying the exit code. Resource aggregation reads `/proc` directly and
//! sums over the process and its live descendants.

use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::errors::Fatal;

pub const DEFAULT_POLL: Duration = Duration::from_secs(3);

/// One observation of the running child.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub started: Option<Instant>,
    pub at: Option<Instant>,
}

impl Sample {
    /// The sentinel yielded when the executable did not exist. Callers
    /// must check for it; it is not an error from the watcher's point of
    /// view.
    fn missing() -> Sample {
        Sample {
            pid: None,
            exit_code: None,
            started: None,
            at: None,
        }
    }
}

pub struct ProcessWatcher {
    child: Option<Child>,
    started: Option<Instant>,
    poll: Duration,
    exit_code: Option<i32>,
    yielded_first: bool,
    done: bool,
}

impl ProcessWatcher {
    /// Spawns `argv` in `cwd` with the parent environment plus
    /// `env_overrides`. A missing executable produces a watcher that
    /// yields the single sentinel sample instead of failing; a present but
    /// unspawnable one (typically a permission problem) is an execution
    /// error with a hint.
    pub fn spawn(
        cwd: &Path,
        argv: &[String],
        env_overrides: &[(String, String)],
        poll: Duration,
    ) -> anyhow::Result<ProcessWatcher> {
        let program = argv.first().filter(|p| Path::new(p.as_str()).is_file());
        let program = match program {
            Some(p) => p,
            None => {
                warn!(?argv, "executable not found, yielding sentinel");
                return Ok(ProcessWatcher {
                    child: None,
                    started: None,
                    poll,
                    exit_code: None,
                    yielded_first: false,
                    done: false,
                });
            }
        };

        debug!(program, cwd = %cwd.display(), "spawning");
        let mut cmd = Command::new(program);
        cmd.args(&argv[1..]).current_dir(cwd);
        for (key, value) in env_overrides {
            cmd.env(key, value);
        }

        let child = cmd.spawn().map_err(|e| {
            Fatal::Execution(format!("cannot start '{program}' ({e}); is it executable?"))
        })?;

        Ok(ProcessWatcher {
            child: Some(child),
            started: Some(Instant::now()),
            poll,
            exit_code: None,
            yielded_first: false,
            done: false,
        })
    }

    /// Terminates the child, if it is still around. Used when an interrupt
    /// unwinds the surrounding run.
    pub fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.done = true;
    }

    fn sample(&self) -> Sample {
        Sample {
            pid: self.child.as_ref().map(Child::id),
            exit_code: self.exit_code,
            started: self.started,
            at: Some(Instant::now()),
        }
    }
}

impl Iterator for ProcessWatcher {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        if self.done {
            return None;
        }
        let child = match self.child.as_mut() {
            None => {
                self.done = true;
                return Some(Sample::missing());
            }
            Some(c) => c,
        };

        if !self.yielded_first {
            self.yielded_first = true;
            return Some(self.sample());
        }

        // Bounded wait: re-check exit status in small slices until the
        // poll interval elapses, then yield another in-flight sample.
        let deadline = Instant::now() + self.poll;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    self.exit_code = Some(exit_code_of(status));
                    self.done = true;
                    return Some(self.sample());
                }
                // A transient wait error means the reaping race hit; the
                // next slice re-checks.
                Ok(None) | Err(_) => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return Some(self.sample());
            }
            let slice = Duration::from_millis(50).min(deadline - now);
            std::thread::sleep(slice);
        }
    }
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

/// Summed resource usage over a process tree at one instant.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceSample {
    pub cpu_ticks: u64,
    pub vsize_kib: u64,
}

/// Reads CPU ticks and virtual memory for `pid` and all live descendants.
/// Returns `None` when any member of the tree vanished mid-walk (it exited
/// between listing and reading); the caller should skip the sample and
/// re-check the parent rather than treat this as an error.
pub fn sample_process_tree(pid: u32) -> Option<ResourceSample> {
    let mut total = ResourceSample::default();
    let mut stack = vec![pid];
    while let Some(p) = stack.pop() {
        let (ticks, vsize) = read_proc_stat(p)?;
        total.cpu_ticks += ticks;
        total.vsize_kib += vsize >> 10;
        stack.extend(children_of(p)?);
    }
    Some(total)
}

/// utime + stime (clock ticks) and vsize (bytes) from `/proc/<pid>/stat`.
fn read_proc_stat(pid: u32) -> Option<(u64, u64)> {
    let raw = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // Fields after the parenthesised comm, which may itself contain
    // spaces.
    let rest = raw.rsplit_once(')').map(|(_, r)| r)?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    let vsize: u64 = fields.get(20)?.parse().ok()?;
    Some((utime + stime, vsize))
}

fn children_of(pid: u32) -> Option<Vec<u32>> {
    let task_dir = format!("/proc/{pid}/task");
    let mut children = Vec::new();
    for entry in std::fs::read_dir(task_dir).ok()? {
        let entry = entry.ok()?;
        let path = entry.path().join("children");
        let raw = std::fs::read_to_string(path).ok()?;
        for tok in raw.split_whitespace() {
            children.push(tok.parse().ok()?);
        }
    }
    Some(children)
}

/// Turns cumulative tick counts into a CPU load figure per poll. The first
/// poll has no baseline and reports zero load.
pub struct ResourceMonitor {
    clk_tck: f64,
    last: Option<(Instant, u64)>,
}

impl ResourceMonitor {
    pub fn new() -> ResourceMonitor {
        let clk_tck = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        ResourceMonitor {
            clk_tck: if clk_tck > 0 { clk_tck as f64 } else { 100.0 },
            last: None,
        }
    }

    /// Returns `(cpu_load, ram_kib)` or `None` for an inconclusive sample.
    pub fn poll(&mut self, pid: u32) -> Option<(f64, u64)> {
        let sample = sample_process_tree(pid)?;
        let now = Instant::now();
        let load = match self.last {
            Some((then, ticks)) => {
                let dt = now.duration_since(then).as_secs_f64();
                if dt > 0.0 {
                    // Ticks can shrink when a child exits and its time
                    // leaves the sum.
                    sample.cpu_ticks.saturating_sub(ticks) as f64 / self.clk_tck / dt
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.last = Some((now, sample.cpu_ticks));
        Some((load, sample.vsize_kib))
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// First file named `name` found anywhere under `dir`.
pub fn find_in_tree(dir: &Path, name: &str) -> Option<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .find(|e| e.file_type().is_file() && e.file_name().to_string_lossy() == name)
        .map(|e| e.into_path())
}

/// Submitted scripts routinely arrive without the executable bit.
pub fn ensure_executable(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let meta = std::fs::metadata(path)?;
    let mut perms = meta.permissions();
    perms.set_mode(perms.mode() | 0o111);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}
