//! Content-addressed blob store.
//!
//! File trees are packaged into immutable `<digest>.tar.gz` archives in a
//! single flat directory. Writes are staged outside the store and land via
//! copy + rename inside it, so a partially written blob is never visible
//! under its canonical name. Content-addressed names are collision-free,
//! which makes the directory safe for cooperating processes to append to.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::Context;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::errors::Fatal;
use crate::fingerprint;

pub const BLOB_EXT: &str = "tar.gz";

/// An archive staged in scratch space, not yet visible in the store.
#[derive(Debug)]
pub struct StagedBlob {
    pub digest: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("cannot create blob store at {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        self.root.join(format!("{digest}.{BLOB_EXT}"))
    }

    /// Packages `source` (a file or a directory tree) into a staged archive
    /// named by its content digest. Nothing touches the store directory.
    pub fn prepare(&self, source: &Path, scratch: &Path) -> anyhow::Result<StagedBlob> {
        let source = resolve_path(source)?;
        let (contents, prefix) = if source.is_dir() {
            (walk_files(&source), source.clone())
        } else {
            let parent = source
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("/"));
            (vec![source.clone()], parent)
        };
        self.prepare_list(&contents, &prefix, scratch)
    }

    /// Packages an explicit file list, stripping `prefix` from archive
    /// member names. The digest is computed over the pre-archive file list,
    /// never over archive bytes (compression headers are not stable).
    pub fn prepare_list(
        &self,
        contents: &[PathBuf],
        prefix: &Path,
        scratch: &Path,
    ) -> anyhow::Result<StagedBlob> {
        if contents.is_empty() {
            return Err(Fatal::Store("nothing to archive".into()).into());
        }

        let mut contents: Vec<PathBuf> = contents.to_vec();
        contents.sort();
        contents.dedup();

        let digest = fingerprint::digest_paths(&contents)?;
        let staged = scratch.join(format!("{digest}.{BLOB_EXT}"));

        let file = File::create(&staged)
            .with_context(|| format!("cannot stage archive at {}", staged.display()))?;
        let enc = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(enc);
        builder.follow_symlinks(false);

        for item in &contents {
            let name = item.strip_prefix(prefix).unwrap_or(item);
            builder
                .append_path_with_name(item, name)
                .with_context(|| format!("cannot archive {}", item.display()))?;
        }
        builder.into_inner()?.finish()?;

        debug!(digest = %digest, files = contents.len(), "staged blob");
        Ok(StagedBlob {
            digest,
            path: staged,
        })
    }

    /// Commits a staged archive into the store under its canonical name.
    ///
    /// The archive is copied (not renamed) so the scratch directory may
    /// live on a different filesystem; the copy lands under a
    /// process-unique temporary name inside the store and is renamed into
    /// place, so concurrent committers of the same digest never share an
    /// intermediate file. Committing a digest that is already present
    /// overwrites identical bytes, so the operation is idempotent.
    pub fn commit(&self, staged: &StagedBlob) -> anyhow::Result<()> {
        let final_path = self.blob_path(&staged.digest);

        let tmp = tempfile::NamedTempFile::new_in(&self.root)
            .with_context(|| format!("cannot stage blob in {}", self.root.display()))?;
        fs::copy(&staged.path, tmp.path())
            .with_context(|| format!("cannot copy blob into {}", self.root.display()))?;
        tmp.persist(&final_path)?;

        info!(digest = %staged.digest, "committed blob");
        Ok(())
    }

    /// Resolves a full digest or unique prefix to an archive path.
    pub fn resolve(&self, id: &str) -> anyhow::Result<PathBuf> {
        if id.is_empty() {
            return Err(Fatal::BlobNotFound(String::new()).into());
        }
        let mut matches: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(id) && name.ends_with(BLOB_EXT) {
                matches.push(entry.path());
            }
        }
        match matches.len() {
            0 => Err(Fatal::BlobNotFound(id.to_string()).into()),
            1 => Ok(matches.remove(0)),
            n => Err(Fatal::AmbiguousId {
                prefix: id.to_string(),
                matches: n,
            }
            .into()),
        }
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.blob_path(digest).is_file()
    }

    /// Extracts a blob into `dest/label` and returns the path to the
    /// top-level unpacked content.
    pub fn extract(&self, id: &str, dest: &Path, label: &str) -> anyhow::Result<PathBuf> {
        let archive_path = self.resolve(id)?;
        let dstdir = dest.join(label);
        fs::create_dir_all(&dstdir)?;

        // First pass for the member list, second to unpack; tar readers are
        // single-shot.
        let mut members: Vec<PathBuf> = Vec::new();
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&archive_path)?));
        for entry in archive.entries()? {
            members.push(entry?.path()?.into_owned());
        }

        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&archive_path)?));
        archive
            .unpack(&dstdir)
            .with_context(|| format!("cannot extract {}", archive_path.display()))?;

        debug!(id, label, members = members.len(), "extracted blob");
        Ok(dstdir.join(common_dir_prefix(&members)))
    }

    /// Deletes an archive from the store. Only meant to undo a registration
    /// whose metadata insert failed; blobs are otherwise append-only.
    pub fn remove(&self, digest: &str) -> anyhow::Result<()> {
        let path = self.blob_path(digest);
        if !path.is_file() {
            return Err(Fatal::BlobNotFound(digest.to_string()).into());
        }
        fs::remove_file(&path)?;
        info!(digest, "removed blob");
        Ok(())
    }
}

/// Recursively collects regular files and symlinks, hidden entries
/// included.
pub fn walk_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() || e.path_is_symlink())
        .map(|e| e.into_path())
        .collect()
}

/// Expands `~`, resolves to an absolute path, and requires existence.
pub fn resolve_path(path: &Path) -> anyhow::Result<PathBuf> {
    let expanded = expand_home(path);
    let abs = std::path::absolute(&expanded)?;
    if !abs.exists() && std::fs::symlink_metadata(&abs).is_err() {
        return Err(Fatal::MissingPath(abs).into());
    }
    Ok(abs)
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}

/// Common directory prefix of archive members, used to find the root of an
/// unpacked tree. When the prefix would collapse onto a `dataset*`
/// directory it is dropped, so datasets extract next to their label
/// directory rather than inside a nested dataset folder.
fn common_dir_prefix(members: &[PathBuf]) -> PathBuf {
    let mut prefix: Option<PathBuf> = None;
    for m in members {
        let dir = m.parent().unwrap_or(Path::new("")).to_path_buf();
        prefix = Some(match prefix {
            None => dir,
            Some(p) => {
                let mut common = PathBuf::new();
                for (a, b) in p.components().zip(dir.components()) {
                    if a == b {
                        common.push(a.as_os_str());
                    } else {
                        break;
                    }
                }
                common
            }
        });
    }
    let mut prefix = prefix.unwrap_or_default();
    if let Some(last) = prefix.file_name().map(|n| n.to_string_lossy().into_owned()) {
        if last.starts_with("dataset") {
            prefix.pop();
        }
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_prefix_of_flat_members_is_empty() {
        let members = vec![PathBuf::from("run.sh"), PathBuf::from("lib.so")];
        assert_eq!(common_dir_prefix(&members), PathBuf::new());
    }

    #[test]
    fn common_prefix_of_nested_members() {
        let members = vec![
            PathBuf::from("pkg/bin/run.sh"),
            PathBuf::from("pkg/bin/helper.sh"),
        ];
        assert_eq!(common_dir_prefix(&members), PathBuf::from("pkg/bin"));
    }

    #[test]
    fn dataset_directories_do_not_become_the_root() {
        let members = vec![
            PathBuf::from("dataset1/input.csv"),
            PathBuf::from("dataset1/truth.csv"),
        ];
        assert_eq!(common_dir_prefix(&members), PathBuf::new());
    }
}
