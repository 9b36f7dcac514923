//! dpkg status database plus apt's record of automatically installed packages.

use super::{check_root, image_path, note_unparsed, read_database, Anomaly, InventoryBuilder, PackageParser, ParsedInventory};
use anyhow::Result;
use std::path::Path;

pub const DPKG_STATUS: &str = "var/lib/dpkg/status";
pub const APT_EXTENDED_STATES: &str = "var/lib/apt/extended_states";

/// Splits a `Key: value` line. Keys never contain whitespace, so continuation
/// lines and free text fall through as `None`.
fn split_field(text: &str) -> Option<(&str, &str)> {
    let (key, value) = text.split_once(':')?;
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key, value.trim()))
}

/// Bare package name of a relation or provides item: version constraint in
/// parentheses and `:arch` qualifier removed.
fn bare_name(item: &str) -> Option<&str> {
    let name = item.split_whitespace().next()?;
    let name = name.split(['(', '=']).next().unwrap_or(name);
    let name = name.split(':').next().unwrap_or(name);
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Names in a `Depends`/`Pre-Depends` value: comma separated groups of
/// `|` separated alternatives.
fn dependency_names(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(',')
        .flat_map(|group| group.split('|'))
        .filter_map(bare_name)
        .filter(|name| !name.starts_with('!'))
}

fn provided_names(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').filter_map(bare_name)
}

/// Applies one `dpkg/status` line and returns the new current package.
pub fn parse_status_line(
    builder: &mut InventoryBuilder,
    current: Option<String>,
    line: usize,
    text: &str,
) -> Option<String> {
    let Some((key, value)) = split_field(text) else {
        note_unparsed(builder, line, text);
        return current;
    };

    let cur = current.as_deref();
    match key {
        "Package" => return Some(value.to_string()),
        "Version" => builder.set_version(cur, line, key, value),
        "Source" => builder.set_source(cur, line, key, value),
        "Provides" => builder.add_provides(cur, line, key, provided_names(value)),
        "Depends" | "Pre-Depends" => builder.add_deps(cur, line, key, dependency_names(value)),
        _ => {}
    }
    current
}

/// Scans a whole `dpkg/status` text.
pub fn parse_status(text: &str) -> InventoryBuilder {
    let mut builder = InventoryBuilder::new();
    text.lines()
        .enumerate()
        .fold(None, |current, (i, line)| {
            parse_status_line(&mut builder, current, i + 1, line)
        });
    builder
}

/// Applies one `extended_states` line, collecting auto-installed names.
pub fn parse_extended_states_line(
    auto_installed: &mut Vec<String>,
    current: Option<String>,
    text: &str,
) -> Option<String> {
    let Some((key, value)) = split_field(text) else {
        return current;
    };
    match key {
        "Package" => return Some(value.to_string()),
        "Auto-Installed" => {
            if let (Some(name), Ok(1)) = (current.as_ref(), value.parse::<u8>()) {
                auto_installed.push(name.clone());
            }
        }
        _ => {}
    }
    current
}

/// Package names marked `Auto-Installed: 1`.
pub fn parse_extended_states(text: &str) -> Vec<String> {
    let mut auto_installed = Vec::new();
    text.lines().fold(None, |current, line| {
        parse_extended_states_line(&mut auto_installed, current, line)
    });
    auto_installed
}

/// Reads packages installed through dpkg/apt.
#[derive(Debug, Default, Clone, Copy)]
pub struct AptParser;

impl PackageParser for AptParser {
    fn name(&self) -> &'static str {
        "apt"
    }

    fn display_name(&self) -> &'static str {
        "AptAnalyzer"
    }

    fn parse(&self, root: &Path) -> Result<ParsedInventory> {
        check_root(root)?;

        let mut builder = match read_database(&image_path(root, DPKG_STATUS)?)? {
            Some(text) => parse_status(&text),
            None => return Ok(ParsedInventory::default()),
        };

        let ext_states = image_path(root, APT_EXTENDED_STATES)?;
        match read_database(&ext_states) {
            Ok(Some(text)) => {
                for name in parse_extended_states(&text) {
                    if !builder.mark_auto_installed(&name) {
                        log::trace!("Auto-installed package {} is not in the dpkg status", name);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => builder.anomaly(Anomaly::AuxiliaryUnreadable {
                path: ext_states,
                reason: format!("{:#}", e),
            }),
        }

        Ok(builder.finish())
    }
}
