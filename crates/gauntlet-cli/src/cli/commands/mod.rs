pub mod delete;
pub mod evaluate;
pub mod register;
pub mod run;
pub mod show;

use std::path::PathBuf;

use gauntlet_core::db::Index;
use gauntlet_core::paths;
use gauntlet_core::store::{BlobStore, BLOB_EXT};

use crate::cli::args::{Cli, Command};

/// The shared blob store plus index database every command operates on.
pub struct Env {
    pub store: BlobStore,
    pub index: Index,
}

pub fn open_env(data_dir: Option<PathBuf>) -> anyhow::Result<Env> {
    let (blob_dir, index_path) = match data_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            (dir.join("blobs"), dir.join("index.db"))
        }
        None => (paths::blob_dir()?, paths::index_path()?),
    };
    let store = BlobStore::open(blob_dir)?;
    let index = Index::open(&index_path)?;
    index.init_schema()?;
    Ok(Env { store, index })
}

/// Expands a (possibly abbreviated) content id to the full digest by
/// looking at what the blob store actually holds.
pub(crate) fn resolve_digest(store: &BlobStore, id: &str) -> anyhow::Result<String> {
    let path = store.resolve(id)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(name
        .strip_suffix(&format!(".{BLOB_EXT}"))
        .unwrap_or(&name)
        .to_string())
}

/// Expands an abbreviated digest via the blob store where possible. An id
/// with no blob behind it is passed through unchanged so index rows whose
/// blob has gone missing stay addressable by their full key.
pub(crate) fn expand_id(env: &Env, id: &str) -> String {
    resolve_digest(&env.store, id).unwrap_or_else(|_| id.to_string())
}

pub fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let env = open_env(cli.data_dir)?;
    match cli.cmd {
        Command::Register(args) => register::dispatch(&env, args.cmd),
        Command::Run(args) => run::run_solution(&env, &args),
        Command::Evaluate(args) => evaluate::dispatch(&env, args.cmd),
        Command::Show(args) => show::dispatch(&env, args.cmd),
        Command::Delete(args) => delete::dispatch(&env, args.cmd),
    }
}
