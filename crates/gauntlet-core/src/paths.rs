//! Where the shared store and index live.
//!
//! Defaults to the platform data directory; `GAUNTLET_DATA_DIR` overrides
//! it (tests and multi-instance setups point it at a scratch location).

use std::path::PathBuf;

use anyhow::Context;
use directories::ProjectDirs;

pub const DATA_DIR_ENV: &str = "GAUNTLET_DATA_DIR";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    let dir = match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) => PathBuf::from(dir),
        None => ProjectDirs::from("", "", "gauntlet")
            .context("cannot determine a data directory for this platform")?
            .data_dir()
            .to_path_buf(),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("cannot create data directory {}", dir.display()))?;
    Ok(dir)
}

pub fn blob_dir() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join("blobs"))
}

pub fn index_path() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join("index.db"))
}
