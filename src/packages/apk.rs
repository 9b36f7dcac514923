//! apk's installed database (`lib/apk/db/installed`).
//!
//! Records are blocks of single-letter `K:value` lines separated by blank
//! lines; packages start at `P:`.

use super::{check_root, image_path, note_unparsed, read_database, InventoryBuilder, PackageParser, ParsedInventory};
use anyhow::Result;
use std::path::Path;

pub const APK_INSTALLED: &str = "lib/apk/db/installed";

fn split_field(text: &str) -> Option<(&str, &str)> {
    let (key, value) = text.split_once(':')?;
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key, value))
}

/// Name part of a `name`, `name=ver`, `name>=ver` or `name~ver` token.
fn strip_constraint(token: &str) -> &str {
    token
        .split(['=', '<', '>', '~'])
        .next()
        .unwrap_or(token)
}

fn names(value: &str) -> impl Iterator<Item = &str> {
    value
        .split_whitespace()
        .map(strip_constraint)
        .filter(|name| !name.is_empty())
}

/// Applies one database line and returns the new current package.
pub fn parse_line(
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
        "P" => return Some(value.to_string()),
        "V" => builder.set_version(cur, line, key, value),
        "o" => builder.set_source(cur, line, key, value),
        "p" => builder.add_provides(cur, line, key, names(value)),
        // `!name` is a conflict, not a dependency
        "D" | "r" => builder.add_deps(cur, line, key, names(value).filter(|n| !n.starts_with('!'))),
        _ => {}
    }
    current
}

pub fn parse_installed(text: &str) -> InventoryBuilder {
    let mut builder = InventoryBuilder::new();
    text.lines()
        .enumerate()
        .fold(None, |current, (i, line)| parse_line(&mut builder, current, i + 1, line));
    builder
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ApkParser;

impl PackageParser for ApkParser {
    fn name(&self) -> &'static str {
        "apk"
    }

    fn display_name(&self) -> &'static str {
        "ApkAnalyzer"
    }

    fn parse(&self, root: &Path) -> Result<ParsedInventory> {
        check_root(root)?;
        Ok(match read_database(&image_path(root, APK_INSTALLED)?)? {
            Some(text) => parse_installed(&text).finish(),
            None => ParsedInventory::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::{Inventory, PackageInfo};
    use std::collections::BTreeSet;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn run_line(line: &str, current: Option<&str>) -> (Option<String>, Inventory) {
        let mut builder = InventoryBuilder::new();
        let next = parse_line(&mut builder, current.map(String::from), 1, line);
        (next, builder.finish().packages)
    }

    #[test]
    fn test_not_applicable_line() {
        let (current, packages) = run_line("Garbage: garbage info", None);
        assert_eq!(current, None);
        assert!(packages.is_empty());
    }

    #[test]
    fn test_package_line() {
        let (current, packages) = run_line("P:La-Croix", Some("Tea"));
        assert_eq!(current.as_deref(), Some("La-Croix"));
        assert!(packages.is_empty());
    }

    #[test]
    fn test_version_line() {
        let (_, packages) = run_line("V:Lime+extra_lime", Some("La-Croix"));
        assert_eq!(packages["La-Croix"].version, "Lime+extra_lime");
    }

    #[test]
    fn test_depends_with_colons() {
        let (_, packages) = run_line(
            "D:lua so:libc.so.0.9.32 so:libdl.so.0.9.32 so:libm.so.0.9.32 so:libncurses.so.5",
            Some("vim"),
        );
        assert_eq!(
            packages["vim"].deps,
            set(&[
                "lua",
                "so:libc.so.0.9.32",
                "so:libdl.so.0.9.32",
                "so:libm.so.0.9.32",
                "so:libncurses.so.5"
            ])
        );
    }

    #[test]
    fn test_depends_with_exclusion() {
        let (_, packages) = run_line(
            "D:!uclibc-utils scanelf musl=1.1.18-r3 so:libc.musl-x86_64.so.1",
            Some("musl-utils"),
        );
        assert_eq!(
            packages["musl-utils"].deps,
            set(&["scanelf", "musl", "so:libc.musl-x86_64.so.1"])
        );
    }

    #[test]
    fn test_replaces_are_deps() {
        let (_, packages) = run_line("r:libiconv uclibc-utils", Some("musl-utils"));
        assert_eq!(packages["musl-utils"].deps, set(&["libiconv", "uclibc-utils"]));
    }

    #[test]
    fn test_range_constraints_are_stripped() {
        let (_, packages) = run_line("D:busybox>=1.36 ssl_client~1.36", Some("alpine-base"));
        assert_eq!(packages["alpine-base"].deps, set(&["busybox", "ssl_client"]));
    }

    #[test]
    fn test_provides_multiple_values() {
        let (_, packages) = run_line(
            "p:so:ld64-uClibc.so.0.9.32=0 so:libc.so.0.9.32=0 so:libcrypt.so.0.9.32=0",
            Some("libc"),
        );
        assert_eq!(
            packages["libc"].provides,
            vec!["so:ld64-uClibc.so.0.9.32", "so:libc.so.0.9.32", "so:libcrypt.so.0.9.32"]
        );
    }

    #[test]
    fn test_origin_is_source() {
        let (_, packages) = run_line("o:busybox", Some("ssl_client"));
        assert_eq!(packages["ssl_client"].source.as_deref(), Some("busybox"));
    }

    #[test]
    fn test_musl_utils_scenario() {
        let text = "P:musl-utils\nV:1.1.18-r3\nD:!uclibc-utils scanelf musl=1.1.18-r3\n";
        let parsed = parse_installed(text).finish();

        let expected = PackageInfo {
            version: "1.1.18-r3".to_string(),
            deps: set(&["scanelf", "musl"]),
            ..PackageInfo::default()
        };
        assert_eq!(parsed.packages.len(), 1);
        assert_eq!(parsed.packages["musl-utils"], expected);
    }

    #[test]
    fn test_duplicate_version_keeps_first() {
        let parsed = parse_installed("P:busybox\nV:1.36.1-r0\nP:busybox\nV:1.36.1-r5\n").finish();
        assert_eq!(parsed.packages["busybox"].version, "1.36.1-r0");
        assert_eq!(parsed.anomalies.len(), 1);
    }
}
