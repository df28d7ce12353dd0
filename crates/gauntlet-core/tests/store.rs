//! Blob store behavior against a real filesystem.

use std::fs;
use std::path::Path;

use gauntlet_core::errors::Fatal;
use gauntlet_core::fingerprint::digest_paths;
use gauntlet_core::store::{walk_files, BlobStore};

fn write_tree(root: &Path) {
    fs::create_dir_all(root.join("bin")).unwrap();
    fs::write(root.join("bin/run.sh"), "#!/bin/sh\necho hi\n").unwrap();
    fs::write(root.join("README"), "a solution\n").unwrap();
}

#[test]
fn prepare_commit_extract_roundtrip() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = BlobStore::open(tmp.path().join("blobs"))?;
    let source = tmp.path().join("src");
    write_tree(&source);

    let scratch = tempfile::tempdir()?;
    let staged = store.prepare(&source, scratch.path())?;
    assert_eq!(staged.digest.len(), 64);
    assert!(!store.contains(&staged.digest));

    store.commit(&staged)?;
    assert!(store.contains(&staged.digest));

    let dest = tempfile::tempdir()?;
    let unpacked = store.extract(&staged.digest, dest.path(), "solution")?;
    assert_eq!(
        fs::read_to_string(unpacked.join("README"))?,
        "a solution\n"
    );
    assert!(unpacked.join("bin/run.sh").is_file());
    Ok(())
}

#[test]
fn identical_trees_produce_identical_digests() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = BlobStore::open(tmp.path().join("blobs"))?;
    let scratch = tempfile::tempdir()?;

    let a = tmp.path().join("a");
    let b = tmp.path().join("b");
    write_tree(&a);
    write_tree(&b);

    let staged_a = store.prepare(&a, scratch.path())?;
    let staged_b = store.prepare(&b, scratch.path())?;
    // Same bytes, same basenames, different parents.
    assert_eq!(staged_a.digest, staged_b.digest);
    Ok(())
}

#[test]
fn commit_is_idempotent() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = BlobStore::open(tmp.path().join("blobs"))?;
    let source = tmp.path().join("src");
    write_tree(&source);

    let scratch = tempfile::tempdir()?;
    let staged = store.prepare(&source, scratch.path())?;
    store.commit(&staged)?;
    store.commit(&staged)?;
    assert!(store.contains(&staged.digest));

    // Only the canonical archive remains; staging leaves nothing behind.
    let entries: Vec<_> = fs::read_dir(tmp.path().join("blobs"))?
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec![format!("{}.tar.gz", staged.digest)]);
    Ok(())
}

#[test]
fn extracted_trees_redigest_to_the_blob_id() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = BlobStore::open(tmp.path().join("blobs"))?;
    let source = tmp.path().join("src");
    write_tree(&source);
    std::os::unix::fs::symlink("README", source.join("latest"))?;

    let scratch = tempfile::tempdir()?;
    let staged = store.prepare(&source, scratch.path())?;
    store.commit(&staged)?;

    let dest = tempfile::tempdir()?;
    let unpacked = store.extract(&staged.digest, dest.path(), "solution")?;
    assert_eq!(digest_paths(&walk_files(&unpacked))?, staged.digest);
    Ok(())
}

#[test]
fn resolve_accepts_unique_prefixes_only() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = BlobStore::open(tmp.path().join("blobs"))?;
    let scratch = tempfile::tempdir()?;

    let source = tmp.path().join("src");
    write_tree(&source);
    let staged = store.prepare(&source, scratch.path())?;
    store.commit(&staged)?;

    let short = &staged.digest[..12];
    assert_eq!(store.resolve(short)?, store.resolve(&staged.digest)?);

    let missing = store.resolve("ffffffffffff").unwrap_err();
    assert!(matches!(
        missing.downcast_ref::<Fatal>(),
        Some(Fatal::BlobNotFound(_))
    ));

    // An empty prefix would match everything; it is rejected outright.
    let empty = store.resolve("").unwrap_err();
    assert!(matches!(
        empty.downcast_ref::<Fatal>(),
        Some(Fatal::BlobNotFound(_))
    ));
    Ok(())
}

#[test]
fn single_file_blobs_extract_to_the_file() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = BlobStore::open(tmp.path().join("blobs"))?;
    let scratch = tempfile::tempdir()?;

    let file = tmp.path().join("solo.conf");
    fs::write(&file, "k = v\n")?;
    let staged = store.prepare(&file, scratch.path())?;
    store.commit(&staged)?;

    let dest = tempfile::tempdir()?;
    let unpacked = store.extract(&staged.digest, dest.path(), "config")?;
    assert_eq!(fs::read_to_string(unpacked.join("solo.conf"))?, "k = v\n");
    Ok(())
}

#[test]
fn remove_deletes_the_archive() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = BlobStore::open(tmp.path().join("blobs"))?;
    let scratch = tempfile::tempdir()?;

    let source = tmp.path().join("src");
    write_tree(&source);
    let staged = store.prepare(&source, scratch.path())?;
    store.commit(&staged)?;

    store.remove(&staged.digest)?;
    assert!(!store.contains(&staged.digest));
    assert!(store.remove(&staged.digest).is_err());
    Ok(())
}
