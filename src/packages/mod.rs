//! Package-manager databases read from a squashed image root.
//!
//! Each family (dpkg/apt, apk, rpm) is a single-pass line scanner folding an
//! explicit "current package" cursor over the database lines. Field meanings
//! are shared between formats, so the mutation side lives in
//! [`InventoryBuilder`] and the per-format modules only map keys to it.

pub mod apk;
pub mod apt;
pub mod rpm;

pub use apk::ApkParser;
pub use apt::AptParser;
pub use rpm::RpmParser;

use crate::tar_extractor::resolve_in_root;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Normalized metadata of one installed package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInfo {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub auto_installed: bool,
    pub provides: Vec<String>,
    pub deps: BTreeSet<String>,
}

/// Installed packages keyed by name, iterated in name order.
pub type Inventory = BTreeMap<String, PackageInfo>;

/// A non-fatal finding made while scanning a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Anomaly {
    /// A second version field for a package already carrying one.
    DuplicateVersion {
        package: String,
        kept: String,
        ignored: String,
    },
    /// A field line seen before any package-name line.
    FieldWithoutPackage { line: usize, key: String },
    /// A line that is neither blank, a continuation nor `key<sep>value`.
    MalformedLine { line: usize, text: String },
    /// The auxiliary database exists but could not be read.
    AuxiliaryUnreadable { path: PathBuf, reason: String },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::DuplicateVersion {
                package,
                kept,
                ignored,
            } => write!(
                f,
                "Multiple versions of package {} detected ({} kept, {} ignored); diffing such multi-versioning is not supported",
                package, kept, ignored
            ),
            Anomaly::FieldWithoutPackage { line, key } => {
                write!(f, "Line {}: field {} appears before any package", line, key)
            }
            Anomaly::MalformedLine { line, text } => {
                write!(f, "Line {}: skipping malformed line {:?}", line, text)
            }
            Anomaly::AuxiliaryUnreadable { path, reason } => {
                write!(f, "Could not read {}: {}", path.display(), reason)
            }
        }
    }
}

/// Output of one parse pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedInventory {
    pub packages: Inventory,
    pub anomalies: Vec<Anomaly>,
}

/// A parser turning the package database found under an image root into an
/// [`Inventory`].
pub trait PackageParser: Send + Sync {
    /// Analyzer name used to key results.
    fn name(&self) -> &'static str;

    /// Human-readable analyzer label.
    fn display_name(&self) -> &'static str;

    /// Reads the database below `root`. An absent database yields an empty
    /// inventory; a missing root or an unreadable database is an error.
    fn parse(&self, root: &Path) -> Result<ParsedInventory>;
}

/// Line accumulator shared by all formats.
#[derive(Debug, Default)]
pub struct InventoryBuilder {
    packages: Inventory,
    anomalies: Vec<Anomaly>,
}

impl InventoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> ParsedInventory {
        ParsedInventory {
            packages: self.packages,
            anomalies: self.anomalies,
        }
    }

    pub fn packages(&self) -> &Inventory {
        &self.packages
    }

    pub fn anomaly(&mut self, anomaly: Anomaly) {
        self.anomalies.push(anomaly);
    }

    /// Entry for the current package, or an anomaly when there is none yet.
    fn entry(&mut self, current: Option<&str>, line: usize, key: &str) -> Option<&mut PackageInfo> {
        match current {
            Some(name) => Some(self.packages.entry(name.to_string()).or_default()),
            None => {
                self.anomalies.push(Anomaly::FieldWithoutPackage {
                    line,
                    key: key.to_string(),
                });
                None
            }
        }
    }

    pub fn set_version(&mut self, current: Option<&str>, line: usize, key: &str, version: &str) {
        let Some(name) = current else {
            self.entry(None, line, key);
            return;
        };
        let info = self.packages.entry(name.to_string()).or_default();
        if info.version.is_empty() {
            info.version = version.to_string();
        } else {
            let kept = info.version.clone();
            self.anomalies.push(Anomaly::DuplicateVersion {
                package: name.to_string(),
                kept,
                ignored: version.to_string(),
            });
        }
    }

    pub fn set_source(&mut self, current: Option<&str>, line: usize, key: &str, value: &str) {
        let Some(source) = value.split_whitespace().next() else {
            return;
        };
        if let Some(info) = self.entry(current, line, key) {
            info.source = Some(source.to_string());
        }
    }

    pub fn add_provides<I, S>(&mut self, current: Option<&str>, line: usize, key: &str, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(info) = self.entry(current, line, key) {
            info.provides.extend(names.into_iter().map(Into::into));
        }
    }

    pub fn add_deps<I, S>(&mut self, current: Option<&str>, line: usize, key: &str, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(info) = self.entry(current, line, key) {
            info.deps.extend(names.into_iter().map(Into::into));
        }
    }

    pub fn mark_auto_installed(&mut self, name: &str) -> bool {
        match self.packages.get_mut(name) {
            Some(info) => {
                info.auto_installed = true;
                true
            }
            None => false,
        }
    }
}

/// Records `text` as malformed unless it is blank or a continuation line.
pub(crate) fn note_unparsed(builder: &mut InventoryBuilder, line: usize, text: &str) {
    if text.trim().is_empty() || text.starts_with([' ', '\t']) {
        return;
    }
    builder.anomaly(Anomaly::MalformedLine {
        line,
        text: text.to_string(),
    });
}

/// Fails when the image root itself is missing.
pub(crate) fn check_root(root: &Path) -> Result<()> {
    fs::metadata(root)
        .with_context(|| format!("Invalid image directory path: {}", root.display()))?;
    Ok(())
}

/// Locates `rel` inside the image, following the image's own symlinks
/// with `root` as `/`.
pub(crate) fn image_path(root: &Path, rel: &str) -> Result<PathBuf> {
    resolve_in_root(root, Path::new(rel), true)
        .with_context(|| format!("Failed to resolve /{} in {}", rel, root.display()))
}

/// Reads a database file; `Ok(None)` when it does not exist.
pub(crate) fn read_database(path: &Path) -> Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::debug!("Package database not present: {}", path.display());
            Ok(None)
        }
        Err(e) => Err(e).with_context(|| format!("Failed to read package database {}", path.display())),
    }
}
