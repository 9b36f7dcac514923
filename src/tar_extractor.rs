//! Layer squashing: apply ordered tar layers onto one root directory.
//!
//! Every layer is replayed on top of what the previous layers left behind,
//! honoring the union-filesystem whiteout conventions:
//! - `.wh.<name>` removes the sibling `<name>` from lower layers,
//! - `.wh..wh..opq` hides everything lower layers put in its directory.
//!
//! All writes are resolved inside the extraction root. Entry names climbing
//! above the root with `..`, and symlink or hard link targets doing the same,
//! abort the extraction with [`ExtractError::PathEscape`]. Symlinks already
//! present under the root are followed as if the root were `/`, so a link
//! planted by one layer cannot redirect a later write to the host.

use crate::error::ExtractError;
use flate2::read::GzDecoder;
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tar_rs as tar;

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_MARKER: &str = ".wh..wh..opq";
const MAX_SYMLINK_HOPS: usize = 40;

type Result<T> = std::result::Result<T, ExtractError>;

/// Counters collected while applying layers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractStats {
    pub layers: usize,
    pub entries: usize,
    pub whiteouts: usize,
    pub excluded: usize,
}

impl ExtractStats {
    pub fn absorb(&mut self, other: ExtractStats) {
        self.layers += other.layers;
        self.entries += other.entries;
        self.whiteouts += other.whiteouts;
        self.excluded += other.excluded;
    }
}

/// Normalizes a path from a tar archive relative to the extraction root.
///
/// `.` components and any leading `/` are dropped. Returns `None` when a
/// `..` would climb above the root.
fn normalize_tar_path(p: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();

    for comp in p.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(c) => out.push(c),
            Component::RootDir | Component::Prefix(_) => {}
        }
    }

    Some(out)
}

fn push_components(pending: &mut Vec<OsString>, path: &Path) {
    for comp in path.components().rev() {
        match comp {
            Component::Normal(n) => pending.push(n.to_os_string()),
            Component::ParentDir => pending.push(OsString::from("..")),
            _ => {}
        }
    }
}

/// Walks `rel` from the root-relative directory `start`, following symlinks
/// that already exist under `root` as if `root` were `/`.
///
/// A `..` at the root stays there when `clamp` is set; otherwise the walk
/// stops with `Ok(None)`.
fn walk_in_root(
    root: &Path,
    start: PathBuf,
    rel: &Path,
    follow_last: bool,
    clamp: bool,
) -> io::Result<Option<PathBuf>> {
    let mut resolved = start;
    let mut pending = Vec::new();
    push_components(&mut pending, rel);
    let mut hops = 0;

    while let Some(name) = pending.pop() {
        if name == ".." {
            if !resolved.pop() && !clamp {
                return Ok(None);
            }
            continue;
        }

        let candidate = resolved.join(&name);
        if pending.is_empty() && !follow_last {
            resolved = candidate;
            break;
        }

        let host = root.join(&candidate);
        match fs::symlink_metadata(&host) {
            Ok(meta) if meta.file_type().is_symlink() => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        format!("too many levels of symbolic links: {}", rel.display()),
                    ));
                }
                let link = fs::read_link(&host)?;
                if link.has_root() {
                    resolved = PathBuf::new();
                }
                push_components(&mut pending, &link);
            }
            _ => resolved = candidate,
        }
    }

    Ok(Some(resolved))
}

/// Maps a root-relative path onto the host filesystem, following symlinks
/// that already exist under `root` as if `root` were `/`.
///
/// With `follow_last` unset the final component is left as-is, which is what
/// callers replacing or deleting that component need.
pub(crate) fn resolve_in_root(root: &Path, rel: &Path, follow_last: bool) -> io::Result<PathBuf> {
    let resolved = walk_in_root(root, PathBuf::new(), rel, follow_last, true)?;
    Ok(root.join(resolved.unwrap_or_default()))
}

/// Whether a relative symlink target, read from the root-relative directory
/// `dir`, climbs above the root. Absolute targets are read against the root
/// and never do.
fn link_escapes(root: &Path, dir: &Path, target: &Path) -> bool {
    if target.has_root() {
        return false;
    }
    match walk_in_root(root, dir.to_path_buf(), target, true, false) {
        Ok(resolved) => resolved.is_none(),
        // a link loop: judge the target text alone
        Err(_) => normalize_tar_path(&dir.join(target)).is_none(),
    }
}

fn normalize_excludes(exclude: &[PathBuf]) -> Vec<PathBuf> {
    exclude
        .iter()
        .filter_map(|p| match normalize_tar_path(p) {
            Some(n) if !n.as_os_str().is_empty() => Some(n),
            _ => {
                log::warn!("Ignoring exclusion prefix outside the image root: {}", p.display());
                None
            }
        })
        .collect()
}

fn is_excluded(rel: &Path, exclude: &[PathBuf]) -> bool {
    exclude.iter().any(|prefix| rel.starts_with(prefix))
}

/// Removes a file, symlink or directory tree without following a final link.
fn remove_path(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(path).map_err(|e| ExtractError::io(path, e))
        }
        Ok(_) => fs::remove_file(path).map_err(|e| ExtractError::io(path, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ExtractError::io(path, e)),
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ExtractError::io(parent, e))?;
    }
    Ok(())
}

/// Wraps `reader` in a gzip decoder when the stream starts with gzip magic.
fn maybe_gunzip<'a, R: Read + 'a>(reader: R) -> io::Result<Box<dyn Read + 'a>> {
    let mut buffered = BufReader::new(reader);
    let is_gzip = buffered.fill_buf()?.starts_with(&[0x1f, 0x8b]);
    if is_gzip {
        Ok(Box::new(GzDecoder::new(buffered)))
    } else {
        Ok(Box::new(buffered))
    }
}

/// Opens a layer tarball from disk (plain or gzipped).
pub fn open_layer(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| ExtractError::io(path, e))
}

/// What an opaque-directory reset must leave alone.
enum Keep {
    Whole,
    Descendants,
    Nothing,
}

/// Applies one layer stream onto `target`.
struct LayerApplier<'a> {
    root: &'a Path,
    exclude: &'a [PathBuf],
    /// Paths materialized by the layer being applied; opaque resets keep them.
    written: HashSet<PathBuf>,
    stats: ExtractStats,
}

impl<'a> LayerApplier<'a> {
    fn new(root: &'a Path, exclude: &'a [PathBuf]) -> Self {
        Self {
            root,
            exclude,
            written: HashSet::new(),
            stats: ExtractStats {
                layers: 1,
                ..ExtractStats::default()
            },
        }
    }

    fn resolve(&self, rel: &Path, follow_last: bool) -> Result<PathBuf> {
        resolve_in_root(self.root, rel, follow_last).map_err(|e| ExtractError::io(self.root.join(rel), e))
    }

    fn apply<R: Read>(mut self, reader: R) -> Result<ExtractStats> {
        let reader = maybe_gunzip(reader).map_err(|source| ExtractError::Archive { source })?;
        let mut archive = tar::Archive::new(reader);

        for entry_result in archive
            .entries()
            .map_err(|source| ExtractError::Archive { source })?
        {
            let mut entry = entry_result.map_err(|source| ExtractError::Archive { source })?;
            let raw_path = entry
                .path()
                .map_err(|source| ExtractError::Archive { source })?
                .into_owned();

            let rel = normalize_tar_path(&raw_path).ok_or_else(|| ExtractError::PathEscape {
                entry: raw_path.display().to_string(),
                target: raw_path.display().to_string(),
            })?;
            if rel.as_os_str().is_empty() {
                // "./" itself
                continue;
            }
            self.stats.entries += 1;

            if let Some(file_name) = rel.file_name().and_then(|n| n.to_str()) {
                if file_name == OPAQUE_MARKER {
                    let dir = rel.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
                    self.stats.whiteouts += 1;
                    self.reset_opaque_dir(&dir)?;
                    continue;
                } else if let Some(deleted_name) = file_name.strip_prefix(WHITEOUT_PREFIX) {
                    if matches!(deleted_name, "" | "." | "..") {
                        log::warn!("Ignoring whiteout without a target: {}", rel.display());
                        continue;
                    }
                    let deleted = rel.with_file_name(deleted_name);
                    self.stats.whiteouts += 1;
                    self.apply_whiteout(&deleted)?;
                    continue;
                }
            }

            if is_excluded(&rel, self.exclude) {
                log::trace!("Skipping excluded entry: {}", rel.display());
                self.stats.excluded += 1;
                continue;
            }

            let entry_type = entry.header().entry_type();
            let mode = entry.header().mode().ok();

            match entry_type {
                tar::EntryType::Directory => self.create_dir(&rel, mode)?,
                tar::EntryType::Regular | tar::EntryType::Continuous => {
                    self.write_file(&rel, &mut entry, mode)?
                }
                tar::EntryType::Symlink => {
                    let link_name = entry
                        .link_name()
                        .map_err(|source| ExtractError::Archive { source })?
                        .ok_or_else(|| ExtractError::Archive {
                            source: io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!("symlink without target: {}", rel.display()),
                            ),
                        })?
                        .into_owned();
                    self.create_symlink(&rel, &link_name)?
                }
                tar::EntryType::Link => {
                    let link_name = entry
                        .link_name()
                        .map_err(|source| ExtractError::Archive { source })?
                        .ok_or_else(|| ExtractError::Archive {
                            source: io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!("hardlink without target: {}", rel.display()),
                            ),
                        })?
                        .into_owned();
                    self.create_hardlink(&rel, &link_name)?
                }
                other => {
                    log::debug!("Skipping unsupported entry type {:?}: {}", other, rel.display());
                    continue;
                }
            }

            self.written.insert(rel);
        }

        Ok(self.stats)
    }

    fn apply_whiteout(&mut self, deleted: &Path) -> Result<()> {
        if is_excluded(deleted, self.exclude) {
            log::trace!("Whiteout targets excluded path, keeping: {}", deleted.display());
            self.stats.excluded += 1;
            return Ok(());
        }
        let host = self.resolve(deleted, false)?;
        match self.keep_status(deleted) {
            // whiteouts only hide what lower layers put there
            Keep::Whole => Ok(()),
            Keep::Descendants if fs::symlink_metadata(&host).map(|m| m.is_dir()).unwrap_or(false) => {
                self.clear_dir(&host, deleted)
            }
            _ => {
                log::debug!("Found whiteout marker, deleting: {}", host.display());
                remove_path(&host)
            }
        }
    }

    fn reset_opaque_dir(&mut self, dir: &Path) -> Result<()> {
        if !dir.as_os_str().is_empty() && is_excluded(dir, self.exclude) {
            self.stats.excluded += 1;
            return Ok(());
        }
        let host = self.resolve(dir, true)?;
        if !host.is_dir() {
            return Ok(());
        }
        log::debug!("Found opaque directory marker, clearing: {}", host.display());
        self.clear_dir(&host, dir)
    }

    fn keep_status(&self, rel: &Path) -> Keep {
        if self.written.contains(rel) || is_excluded(rel, self.exclude) {
            Keep::Whole
        } else if self.written.iter().any(|w| w.starts_with(rel))
            || self.exclude.iter().any(|e| e.starts_with(rel))
        {
            Keep::Descendants
        } else {
            Keep::Nothing
        }
    }

    fn clear_dir(&self, host_dir: &Path, rel_dir: &Path) -> Result<()> {
        let entries = match fs::read_dir(host_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(ExtractError::io(host_dir, e)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| ExtractError::io(host_dir, e))?;
            let rel = rel_dir.join(entry.file_name());
            let host = entry.path();
            match self.keep_status(&rel) {
                Keep::Whole => {}
                Keep::Descendants => {
                    let is_dir = entry
                        .file_type()
                        .map_err(|e| ExtractError::io(&host, e))?
                        .is_dir();
                    if is_dir {
                        self.clear_dir(&host, &rel)?;
                    }
                }
                Keep::Nothing => remove_path(&host)?,
            }
        }
        Ok(())
    }

    fn create_dir(&self, rel: &Path, mode: Option<u32>) -> Result<()> {
        let host = self.resolve(rel, true)?;
        match fs::symlink_metadata(&host) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                remove_path(&host)?;
                fs::create_dir_all(&host).map_err(|e| ExtractError::io(&host, e))?;
            }
            Err(_) => fs::create_dir_all(&host).map_err(|e| ExtractError::io(&host, e))?,
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Owner must keep rwx so later layers can write into it
            let mode = mode.unwrap_or(0o755) | 0o700;
            if let Err(e) = fs::set_permissions(&host, fs::Permissions::from_mode(mode)) {
                log::debug!("Failed to set permissions on {}: {}", host.display(), e);
            }
        }
        #[cfg(not(unix))]
        let _ = mode;

        Ok(())
    }

    fn write_file<R: Read>(&self, rel: &Path, contents: &mut R, mode: Option<u32>) -> Result<()> {
        let literal = self.resolve(rel, false)?;
        let dest = match fs::symlink_metadata(&literal) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let through = self.resolve(rel, true)?;
                if through.is_dir() {
                    remove_path(&literal)?;
                    literal
                } else {
                    log::debug!(
                        "Writing through existing symlink: {} -> {}",
                        literal.display(),
                        through.display()
                    );
                    through
                }
            }
            Ok(_) => {
                // Unlink rather than truncate so hard-linked siblings keep their content
                remove_path(&literal)?;
                literal
            }
            Err(_) => literal,
        };

        create_parent(&dest)?;
        let mut out_file = File::create(&dest).map_err(|e| ExtractError::io(&dest, e))?;
        io::copy(contents, &mut out_file).map_err(|e| ExtractError::io(&dest, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mut mode) = mode {
                if mode & 0o400 == 0 {
                    mode |= 0o400;
                    log::trace!("Fixed unreadable file during extraction: {}", dest.display());
                }
                if let Err(e) = fs::set_permissions(&dest, fs::Permissions::from_mode(mode)) {
                    log::debug!("Failed to set permissions on {}: {}", dest.display(), e);
                }
            }
        }
        #[cfg(not(unix))]
        let _ = mode;

        Ok(())
    }

    fn create_symlink(&self, rel: &Path, link_name: &Path) -> Result<()> {
        // The link lands where the existing links of its parent lead, so the
        // target is checked from there
        let placed = walk_in_root(self.root, PathBuf::new(), rel, false, true)
            .map_err(|e| ExtractError::io(self.root.join(rel), e))?
            .unwrap_or_default();
        let dir = placed.parent().unwrap_or_else(|| Path::new(""));
        if link_escapes(self.root, dir, link_name) {
            return Err(ExtractError::PathEscape {
                entry: rel.display().to_string(),
                target: link_name.display().to_string(),
            });
        }

        let host = self.root.join(&placed);
        remove_path(&host)?;
        create_parent(&host)?;

        #[cfg(unix)]
        std::os::unix::fs::symlink(link_name, &host).map_err(|e| ExtractError::io(&host, e))?;

        #[cfg(not(unix))]
        log::warn!("Symlink support not implemented on this platform: {}", host.display());

        Ok(())
    }

    fn create_hardlink(&self, rel: &Path, link_name: &Path) -> Result<()> {
        let target_rel = normalize_tar_path(link_name).ok_or_else(|| ExtractError::PathEscape {
            entry: rel.display().to_string(),
            target: link_name.display().to_string(),
        })?;

        let target = self.resolve(&target_rel, true)?;
        if !target.exists() {
            log::warn!(
                "Skipping broken hardlink (target missing): {} -> {}",
                rel.display(),
                target_rel.display()
            );
            return Ok(());
        }

        let dest = self.resolve(rel, false)?;
        remove_path(&dest)?;
        create_parent(&dest)?;

        if let Err(e) = fs::hard_link(&target, &dest) {
            log::debug!(
                "hardlink failed ({}), falling back to copy: {} -> {}",
                e,
                target.display(),
                dest.display()
            );
            fs::copy(&target, &dest).map_err(|e| ExtractError::io(&dest, e))?;
        }
        Ok(())
    }
}

/// Applies a single layer stream (plain or gzipped tar) onto `target`.
pub fn extract_layer<R: Read>(reader: R, target: &Path, exclude: &[PathBuf]) -> Result<ExtractStats> {
    fs::create_dir_all(target).map_err(|e| ExtractError::io(target, e))?;
    let exclude = normalize_excludes(exclude);
    LayerApplier::new(target, &exclude).apply(reader)
}

/// Applies `layers` (oldest first) onto `target`, stopping at the first error.
///
/// A [`ExtractError::PathEscape`] leaves `target` in an undefined state that
/// callers must discard.
pub fn extract_layers<I, R>(layers: I, target: &Path, exclude: &[PathBuf]) -> Result<ExtractStats>
where
    I: IntoIterator<Item = R>,
    R: Read,
{
    fs::create_dir_all(target).map_err(|e| ExtractError::io(target, e))?;
    let exclude = normalize_excludes(exclude);

    let mut stats = ExtractStats::default();
    for (i, layer) in layers.into_iter().enumerate() {
        log::debug!("Applying layer {} onto {}", i + 1, target.display());
        let layer_stats = LayerApplier::new(target, &exclude).apply(layer)?;
        stats.absorb(layer_stats);
    }
    Ok(stats)
}

/// Opens and applies layer tarballs from disk, oldest first.
pub fn extract_layer_files(paths: &[PathBuf], target: &Path, exclude: &[PathBuf]) -> Result<ExtractStats> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        files.push(open_layer(path)?);
    }
    extract_layers(files, target, exclude)
}
