//! Deterministic directory snapshots and a structural comparison.
//!
//! Used to check a squashed root against a reference tree. Nothing in the
//! analysis pipeline depends on it.

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotEntry {
    /// Path relative to the snapshot root.
    pub path: PathBuf,
    pub kind: EntryKind,
    /// `<size>:<sha256>` for files, the literal target for symlinks.
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectorySnapshot {
    pub root: PathBuf,
    pub entries: Vec<SnapshotEntry>,
}

impl DirectorySnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&SnapshotEntry> {
        let path = path.as_ref();
        self.entries
            .binary_search_by(|e| e.path.as_path().cmp(path))
            .ok()
            .map(|i| &self.entries[i])
    }
}

/// Paths of a [`compare`] result, each sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotDiff {
    pub removed: Vec<PathBuf>,
    pub added: Vec<PathBuf>,
    pub changed: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
}

impl SnapshotDiff {
    pub fn is_identical(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty() && self.changed.is_empty()
    }
}

fn file_fingerprint(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(format!("{}:{}", size, hex::encode(hasher.finalize())))
}

/// Walks `root` into a snapshot sorted by relative path. The root itself is not
/// recorded and symlinks are never followed.
pub fn snapshot(root: &Path, include_content: bool) -> Result<DirectorySnapshot> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .context("Failed to get relative path")?
            .to_path_buf();
        let file_type = entry.file_type();

        let (kind, fingerprint) = if file_type.is_symlink() {
            let target = if include_content {
                Some(
                    fs::read_link(entry.path())
                        .with_context(|| format!("Failed to read link {}", entry.path().display()))?
                        .to_string_lossy()
                        .into_owned(),
                )
            } else {
                None
            };
            (EntryKind::Symlink, target)
        } else if file_type.is_dir() {
            (EntryKind::Dir, None)
        } else {
            let fingerprint = if include_content {
                Some(file_fingerprint(entry.path())?)
            } else {
                None
            };
            (EntryKind::File, fingerprint)
        };

        entries.push(SnapshotEntry {
            path: rel,
            kind,
            fingerprint,
        });
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(DirectorySnapshot {
        root: root.to_path_buf(),
        entries,
    })
}

/// Compares two snapshots by path. Returns the differences and whether the
/// trees are identical.
pub fn compare(a: &DirectorySnapshot, b: &DirectorySnapshot) -> (SnapshotDiff, bool) {
    let left: BTreeMap<&Path, &SnapshotEntry> =
        a.entries.iter().map(|e| (e.path.as_path(), e)).collect();
    let right: BTreeMap<&Path, &SnapshotEntry> =
        b.entries.iter().map(|e| (e.path.as_path(), e)).collect();

    let mut diff = SnapshotDiff::default();

    for (path, l) in &left {
        match right.get(path) {
            None => diff.removed.push(path.to_path_buf()),
            Some(r) if l.kind != r.kind || l.fingerprint != r.fingerprint => {
                diff.changed.push(path.to_path_buf())
            }
            Some(_) => diff.unchanged.push(path.to_path_buf()),
        }
    }
    diff.added = right
        .keys()
        .filter(|path| !left.contains_key(*path))
        .map(|path| path.to_path_buf())
        .collect();

    let identical = diff.is_identical();
    (diff, identical)
}
