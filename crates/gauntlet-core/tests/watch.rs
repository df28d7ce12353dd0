//! Watcher behavior against real child processes.

use std::time::Duration;

use gauntlet_core::watch::ProcessWatcher;

const FAST_POLL: Duration = Duration::from_millis(20);

#[test]
fn missing_executable_yields_a_single_sentinel() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let argv = vec![tmp.path().join("no-such-script").display().to_string()];
    let mut watcher = ProcessWatcher::spawn(tmp.path(), &argv, &[], FAST_POLL)?;

    let sentinel = watcher.next().expect("one sentinel sample");
    assert!(sentinel.pid.is_none());
    assert!(sentinel.exit_code.is_none());
    assert!(watcher.next().is_none());
    Ok(())
}

#[test]
fn a_real_child_reports_its_exit_code() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let argv = vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        "exit 7".to_string(),
    ];
    let watcher = ProcessWatcher::spawn(tmp.path(), &argv, &[], FAST_POLL)?;

    let last = watcher.last().expect("at least one sample");
    assert_eq!(last.exit_code, Some(7));
    Ok(())
}

#[test]
fn environment_overrides_reach_the_child() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let marker = tmp.path().join("marker");
    let argv = vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        format!("printf %s \"$PROBE\" > {}", marker.display()),
    ];
    let overrides = vec![("PROBE".to_string(), "visible".to_string())];
    let watcher = ProcessWatcher::spawn(tmp.path(), &argv, &overrides, FAST_POLL)?;

    let last = watcher.last().expect("at least one sample");
    assert_eq!(last.exit_code, Some(0));
    assert_eq!(std::fs::read_to_string(marker)?, "visible");
    Ok(())
}
