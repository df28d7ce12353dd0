use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use sha2::{Digest, Sha256};

/// Chunk size for streaming file reads; bounds memory use regardless of
/// file size.
const CHUNK: usize = 4096;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// Computes one stable content id for a set of files.
///
/// Paths are made absolute, de-duplicated and sorted lexicographically, so
/// the digest does not depend on input ordering. Regular non-empty files
/// contribute a streaming hash of their contents; symlinks and empty files
/// contribute the hash of their basename only. Two symlinks with different
/// names pointing at the same target would otherwise make the digest
/// depend on which link was traversed first.
///
/// An unreadable file fails the whole digest; callers must treat a failed
/// digest as "nothing was stored".
pub fn digest_paths<P: AsRef<Path>>(paths: &[P]) -> anyhow::Result<String> {
    let mut ordered: BTreeSet<PathBuf> = BTreeSet::new();
    for p in paths {
        ordered.insert(std::path::absolute(p.as_ref())?);
    }

    let mut outer = Sha256::new();
    let mut name_only: Vec<String> = Vec::new();

    for path in &ordered {
        let meta = std::fs::symlink_metadata(path)
            .with_context(|| format!("cannot stat {}", path.display()))?;

        if meta.file_type().is_symlink() || meta.len() == 0 {
            let basename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            name_only.push(basename);
            continue;
        }

        let mut f = File::open(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let mut buf = [0u8; CHUNK];
        loop {
            let n = f
                .read(&mut buf)
                .with_context(|| format!("read failed for {}", path.display()))?;
            if n == 0 {
                break;
            }
            outer.update(sha256_hex(&buf[..n]).as_bytes());
        }
    }

    for name in name_only {
        outer.update(sha256_hex(name.as_bytes()).as_bytes());
    }

    Ok(hex::encode(outer.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_order_independent() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, b"alpha")?;
        std::fs::write(&b, b"beta")?;

        let fwd = digest_paths(&[&a, &b])?;
        let rev = digest_paths(&[&b, &a])?;
        assert_eq!(fwd, rev);
        Ok(())
    }

    #[test]
    fn duplicates_do_not_change_digest() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a.txt");
        std::fs::write(&a, b"alpha")?;

        assert_eq!(digest_paths(&[&a])?, digest_paths(&[&a, &a])?);
        Ok(())
    }

    #[test]
    fn empty_files_hash_by_basename() -> anyhow::Result<()> {
        let one = tempfile::tempdir()?;
        let two = tempfile::tempdir()?;
        std::fs::write(one.path().join("empty"), b"")?;
        std::fs::write(two.path().join("empty"), b"")?;

        // Same basename, different location: identical digest.
        assert_eq!(
            digest_paths(&[one.path().join("empty")])?,
            digest_paths(&[two.path().join("empty")])?
        );

        std::fs::write(two.path().join("other"), b"")?;
        assert_ne!(
            digest_paths(&[one.path().join("empty")])?,
            digest_paths(&[two.path().join("other")])?
        );
        Ok(())
    }

    #[test]
    fn symlinks_hash_by_basename() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target_a = dir.path().join("target-a");
        let target_b = dir.path().join("target-b");
        std::fs::write(&target_a, b"alpha")?;
        std::fs::write(&target_b, b"beta")?;

        let one = tempfile::tempdir()?;
        let two = tempfile::tempdir()?;
        std::os::unix::fs::symlink(&target_a, one.path().join("link"))?;
        std::os::unix::fs::symlink(&target_b, two.path().join("link"))?;

        // Same basename, different targets: identical digest.
        assert_eq!(
            digest_paths(&[one.path().join("link")])?,
            digest_paths(&[two.path().join("link")])?
        );

        std::os::unix::fs::symlink(&target_a, two.path().join("other"))?;
        assert_ne!(
            digest_paths(&[one.path().join("link")])?,
            digest_paths(&[two.path().join("other")])?
        );
        Ok(())
    }

    #[test]
    fn unreadable_path_fails_whole_digest() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(digest_paths(&[&missing]).is_err());
    }
}
