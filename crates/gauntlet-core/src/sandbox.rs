//! Scratch directories scoped to one run, tagged on disk with their
//! terminal outcome.
//!
//! The directory is renamed to `<name>.UNDECIDED` the moment it is
//! created, so a harness that dies without unwinding still leaves forensic
//! evidence of an in-flight run. On scope exit the tag is rewritten to the
//! real outcome; anything other than SUCCESS is always kept for
//! inspection, even when the caller did not ask for persistence.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::errors::Fatal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Undecided,
    Success,
    Failed,
    Interrupt,
    Crash,
}

impl Outcome {
    pub fn suffix(self) -> &'static str {
        match self {
            Outcome::Undecided => ".UNDECIDED",
            Outcome::Success => ".SUCCESS",
            Outcome::Failed => ".FAILED",
            Outcome::Interrupt => ".INTERRUPT",
            Outcome::Crash => ".CRASH",
        }
    }
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_sig: i32) {
    // Async-signal-safe: a single atomic store, nothing else.
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Installs the SIGINT handler. Call once, early in `main`.
pub fn install_interrupt_handler() {
    unsafe {
        libc::signal(libc::SIGINT, on_sigint as usize);
    }
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Fails with [`Fatal::Interrupted`] once SIGINT has been received.
/// Polling loops call this so an interrupt unwinds like any other fatal
/// error instead of being handled inside the signal handler.
pub fn check_interrupted() -> anyhow::Result<()> {
    if interrupted() {
        Err(Fatal::Interrupted.into())
    } else {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn reset_interrupt_for_tests() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

/// One run's scratch directory. The outcome is explicit state on the
/// value, not process-wide, so independent sandboxes in one process do not
/// clobber each other's tags.
#[derive(Debug)]
pub struct Sandbox {
    base: PathBuf,
    current: PathBuf,
    outcome: Outcome,
    persist: bool,
    finished: bool,
}

impl Sandbox {
    pub fn create(prefix: &str, persist: bool) -> anyhow::Result<Sandbox> {
        let base = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()?
            .into_path();
        let current = tag(&base, Outcome::Undecided);
        fs::rename(&base, &current)?;
        Ok(Sandbox {
            base,
            current,
            outcome: Outcome::Undecided,
            persist,
            finished: false,
        })
    }

    /// The live (UNDECIDED-tagged) directory.
    pub fn path(&self) -> &Path {
        &self.current
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn set_outcome(&mut self, outcome: Outcome) {
        // INTERRUPT is sticky; a later generic failure must not hide the
        // fact that the operator asked for a stop.
        if self.outcome == Outcome::Interrupt && outcome == Outcome::Failed {
            return;
        }
        self.outcome = outcome;
    }

    fn finish(&mut self) -> anyhow::Result<PathBuf> {
        self.finished = true;
        let final_path = tag(&self.base, self.outcome);
        fs::rename(&self.current, &final_path)?;

        let keep = self.persist || self.outcome != Outcome::Success;
        if keep {
            info!(outcome = ?self.outcome, path = %final_path.display(), "sandbox kept");
        } else {
            fs::remove_dir_all(&final_path)?;
            info!("sandbox removed");
        }
        Ok(final_path)
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Reached only when the scope panicked: tag the directory CRASH and
        // keep it. Errors here are unreportable.
        let crash_path = tag(&self.base, Outcome::Crash);
        if fs::rename(&self.current, &crash_path).is_ok() {
            warn!(path = %crash_path.display(), "sandbox tagged CRASH");
        }
    }
}

fn tag(base: &Path, outcome: Outcome) -> PathBuf {
    let mut name = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(outcome.suffix());
    base.with_file_name(name)
}

/// Runs `body` inside a fresh sandbox and guarantees the terminal tag on
/// every exit path: SUCCESS on a clean return, INTERRUPT when SIGINT was
/// seen, FAILED on any other error, CRASH (via `Drop`) on panic.
pub fn with_sandbox<T>(
    prefix: &str,
    persist: bool,
    body: impl FnOnce(&mut Sandbox) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let mut sandbox = Sandbox::create(prefix, persist)?;
    let result = body(&mut sandbox);

    match &result {
        Ok(_) => {
            if sandbox.outcome() == Outcome::Undecided {
                sandbox.set_outcome(Outcome::Success);
            }
        }
        Err(err) => {
            let was_interrupt =
                interrupted() || matches!(err.downcast_ref::<Fatal>(), Some(Fatal::Interrupted));
            if was_interrupt {
                sandbox.set_outcome(Outcome::Interrupt);
            } else {
                sandbox.set_outcome(Outcome::Failed);
            }
        }
    }

    sandbox.finish()?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sibling_with_suffix(dir: &Path, suffix: &str) -> Option<PathBuf> {
        let parent = dir.parent()?;
        let stem = dir.file_name()?.to_string_lossy().into_owned();
        // The UNDECIDED path is `<base>.UNDECIDED`; siblings share <base>.
        let base = stem.strip_suffix(".UNDECIDED")?.to_string();
        let candidate = parent.join(format!("{base}{suffix}"));
        candidate.exists().then_some(candidate)
    }

    #[test]
    fn success_without_persist_is_deleted() -> anyhow::Result<()> {
        reset_interrupt_for_tests();
        let mut seen = PathBuf::new();
        with_sandbox("gauntlet-test.", false, |sb| {
            seen = sb.path().to_path_buf();
            assert!(seen.exists());
            assert!(seen.to_string_lossy().ends_with(".UNDECIDED"));
            Ok(())
        })?;
        assert!(!seen.exists());
        assert!(sibling_with_suffix(&seen, ".SUCCESS").is_none());
        Ok(())
    }

    #[test]
    fn success_with_persist_is_kept() -> anyhow::Result<()> {
        reset_interrupt_for_tests();
        let mut seen = PathBuf::new();
        with_sandbox("gauntlet-test.", true, |sb| {
            seen = sb.path().to_path_buf();
            Ok(())
        })?;
        let kept = sibling_with_suffix(&seen, ".SUCCESS").expect("SUCCESS dir kept");
        fs::remove_dir_all(kept)?;
        Ok(())
    }

    #[test]
    fn failure_is_tagged_and_kept_even_without_persist() {
        reset_interrupt_for_tests();
        let mut seen = PathBuf::new();
        let result: anyhow::Result<()> = with_sandbox("gauntlet-test.", false, |sb| {
            seen = sb.path().to_path_buf();
            anyhow::bail!("solution exploded")
        });
        assert!(result.is_err());
        assert!(!seen.exists());
        let kept = sibling_with_suffix(&seen, ".FAILED").expect("FAILED dir kept");
        fs::remove_dir_all(kept).unwrap();
    }
}
