//! RPM inventories.
//!
//! Distroless rpm images ship a plain text manifest next to (or instead of)
//! the Berkeley/sqlite database; it is read directly. Otherwise the database is
//! queried through the host `rpm` tool.

use super::{check_root, image_path, note_unparsed, read_database, InventoryBuilder, PackageParser, ParsedInventory};
use anyhow::{anyhow, Context, Result};
use std::io;
use std::path::Path;
use std::process::Command;

pub const RPM_MANIFEST: &str = "var/lib/rpmmanifest/container-manifest-2";
pub const RPM_DATABASE: &str = "var/lib/rpm";

/// Row layout consumed by [`parse_query_line`].
pub const QUERY_FORMAT: &str =
    "%{NAME}\t%{EPOCHNUM}\t%{VERSION}-%{RELEASE}\t%{SOURCERPM}\t[%{PROVIDENAME} ]\t[%{REQUIRENAME} ]\n";

const MANIFEST_COLUMNS: usize = 10;
const QUERY_COLUMNS: usize = 6;

/// `epoch:version-release`, or plain `version-release` for epoch 0.
fn full_version(epoch: &str, version_release: &str) -> String {
    match epoch.trim().parse::<u64>() {
        Ok(epoch) if epoch > 0 => format!("{}:{}", epoch, version_release),
        _ => version_release.to_string(),
    }
}

/// Source package name of `bash-5.1.8-6.el9.src.rpm`.
fn source_name(source_rpm: &str, version_release: &str) -> Option<String> {
    let source_rpm = source_rpm.trim();
    if source_rpm.is_empty() || source_rpm == "(none)" {
        return None;
    }
    if let Some(name) = source_rpm.strip_suffix(&format!("-{}.src.rpm", version_release)) {
        return Some(name.to_string());
    }
    // Subpackages may be built from a source rpm with a different release
    let stem = source_rpm.strip_suffix(".src.rpm").unwrap_or(source_rpm);
    let mut parts = stem.rsplitn(3, '-');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_release), Some(_version), Some(name)) => Some(name.to_string()),
        _ => Some(stem.to_string()),
    }
}

fn is_package_require(name: &str) -> bool {
    !name.starts_with("rpmlib(") && !name.starts_with('/')
}

fn add_row(builder: &mut InventoryBuilder, line: usize, name: &str, epoch: &str, version_release: &str, source_rpm: &str) {
    let name = Some(name);
    builder.set_version(name, line, "version", &full_version(epoch, version_release));
    if let Some(source) = source_name(source_rpm, version_release) {
        builder.set_source(name, line, "sourcerpm", &source);
    }
}

/// Applies one `container-manifest-2` row.
pub fn parse_manifest_line(builder: &mut InventoryBuilder, line: usize, text: &str) {
    let columns: Vec<&str> = text.split('\t').collect();
    if columns.len() < MANIFEST_COLUMNS || columns[0].trim().is_empty() {
        note_unparsed(builder, line, text);
        return;
    }
    add_row(builder, line, columns[0].trim(), columns[8], columns[1].trim(), columns[9]);
}

pub fn parse_manifest(text: &str) -> InventoryBuilder {
    let mut builder = InventoryBuilder::new();
    for (i, line) in text.lines().enumerate() {
        parse_manifest_line(&mut builder, i + 1, line);
    }
    builder
}

/// Applies one row printed by `rpm -qa --queryformat QUERY_FORMAT`.
pub fn parse_query_line(builder: &mut InventoryBuilder, line: usize, text: &str) {
    let columns: Vec<&str> = text.split('\t').collect();
    if columns.len() < QUERY_COLUMNS || columns[0].trim().is_empty() {
        note_unparsed(builder, line, text);
        return;
    }
    let name = columns[0].trim();
    // EPOCHNUM prints 0 for unset epochs
    add_row(builder, line, name, columns[1], columns[2].trim(), columns[3]);

    let mut provides: Vec<&str> = Vec::new();
    for item in columns[4].split_whitespace() {
        if !provides.contains(&item) {
            provides.push(item);
        }
    }
    builder.add_provides(Some(name), line, "provides", provides);
    builder.add_deps(
        Some(name),
        line,
        "requires",
        columns[5].split_whitespace().filter(|r| is_package_require(r)),
    );
}

pub fn parse_query(text: &str) -> InventoryBuilder {
    let mut builder = InventoryBuilder::new();
    for (i, line) in text.lines().enumerate() {
        parse_query_line(&mut builder, i + 1, line);
    }
    builder
}

fn query_database(db_path: &Path) -> Result<String> {
    log::debug!("Querying rpm database at {}", db_path.display());

    let output = Command::new("rpm")
        .arg("--dbpath")
        .arg(db_path)
        .args(["-qa", "--queryformat", QUERY_FORMAT])
        .output()
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                anyhow!("rpm database found at {} but the rpm tool is not installed", db_path.display())
            }
            _ => anyhow::Error::new(e).context("Failed to execute rpm"),
        })?;

    if !output.status.success() {
        return Err(anyhow!(
            "rpm -qa failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RpmParser;

impl PackageParser for RpmParser {
    fn name(&self) -> &'static str {
        "rpm"
    }

    fn display_name(&self) -> &'static str {
        "RpmAnalyzer"
    }

    fn parse(&self, root: &Path) -> Result<ParsedInventory> {
        check_root(root)?;

        if let Some(text) = read_database(&image_path(root, RPM_MANIFEST)?)? {
            return Ok(parse_manifest(&text).finish());
        }

        let db_path = image_path(root, RPM_DATABASE)?;
        if !db_path.is_dir() {
            return Ok(ParsedInventory::default());
        }
        let text = query_database(&db_path)
            .with_context(|| format!("Failed to read rpm packages of {}", root.display()))?;
        Ok(parse_query(&text).finish())
    }
}
