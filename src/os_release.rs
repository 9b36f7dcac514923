//! Distribution name and version of an extracted image root.

use crate::tar_extractor::resolve_in_root;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OsRelease {
    pub name: String,
    pub version: String,
}

impl OsRelease {
    fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

type Probe = fn(&str) -> Result<OsRelease>;

/// Release files in probing order. A probe only runs when its file exists,
/// and a file that exists but cannot be parsed ends detection.
const PROBES: &[(&str, Probe)] = &[
    ("etc/os-release", parse_os_release),
    ("etc/lsb-release", parse_lsb_release),
    ("etc/debian_version", parse_debian_version),
    ("etc/alpine-release", parse_alpine_release),
    ("etc/oracle-release", parse_oracle_release),
    ("etc/redhat-release", parse_redhat_release),
];

/// Detects the distribution of the image mounted at `root`.
pub fn detect(root: &Path) -> Result<OsRelease> {
    for (rel, probe) in PROBES {
        let path = resolve_in_root(root, Path::new(rel), true)
            .with_context(|| format!("Failed to resolve /{} in {}", rel, root.display()))?;
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };

        let mut release = probe(&text).with_context(|| format!("Failed to parse /{}", rel))?;
        // Oracle Linux identifies itself with "ol"
        if release.name == "ol" {
            release.name = "oracle".to_string();
        }
        return Ok(release);
    }
    Err(anyhow!("Failed to detect OS release"))
}

/// Captures of `re`'s first group across `text`.
fn captures<'t>(pattern: &str, text: &'t str) -> Result<Vec<&'t str>> {
    let re = Regex::new(pattern)?;
    Ok(re
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect())
}

fn unquote(value: &str) -> String {
    value.trim().replace('"', "")
}

/// Exactly one capture of `pattern`, unquoted.
fn single(pattern: &str, text: &str) -> Result<Option<String>> {
    match captures(pattern, text)?.as_slice() {
        [value] => Ok(Some(unquote(value))),
        _ => Ok(None),
    }
}

fn parse_os_release(text: &str) -> Result<OsRelease> {
    let id = single(r"(?m)^ID=(.+)$", text)?.ok_or_else(|| anyhow!("expected exactly one ID"))?;
    let version = single(r"(?m)^VERSION_ID=(.+)$", text)?.unwrap_or_else(|| "unstable".to_string());
    Ok(OsRelease::new(id, version))
}

fn parse_lsb_release(text: &str) -> Result<OsRelease> {
    let id = single(r"(?m)^DISTRIB_ID=(.+)$", text)?;
    let version = single(r"(?m)^DISTRIB_RELEASE=(.+)$", text)?;
    match (id, version) {
        (Some(id), Some(version)) => Ok(OsRelease::new(id.to_lowercase(), version)),
        _ => Err(anyhow!("expected exactly one DISTRIB_ID and DISTRIB_RELEASE")),
    }
}

fn parse_debian_version(text: &str) -> Result<OsRelease> {
    let text = text.trim();
    if text.len() < 2 {
        return Err(anyhow!("version too short"));
    }
    let major = text.split('.').next().unwrap_or(text);
    Ok(OsRelease::new("debian", major))
}

fn parse_alpine_release(text: &str) -> Result<OsRelease> {
    let text = text.trim();
    if text.len() < 2 {
        return Err(anyhow!("version too short"));
    }
    Ok(OsRelease::new("alpine", text))
}

/// `<Name> ... release <version>` files; `version_pattern` picks the version.
fn parse_release_line(text: &str, version_pattern: &str) -> Result<OsRelease> {
    let id = single(r"(?m)^(\S+)", text)?;
    let version = single(version_pattern, text)?;
    match (id, version) {
        (Some(id), Some(version)) => Ok(OsRelease::new(id.to_lowercase(), version)),
        _ => Err(anyhow!("unrecognized release line")),
    }
}

fn parse_oracle_release(text: &str) -> Result<OsRelease> {
    parse_release_line(text, r"(\d+\.\d+)")
}

fn parse_redhat_release(text: &str) -> Result<OsRelease> {
    parse_release_line(text, r"(\d+)\.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn root_with(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        dir
    }

    fn detected(files: &[(&str, &str)]) -> OsRelease {
        detect(root_with(files).path()).unwrap()
    }

    #[test]
    fn test_os_release() {
        let release = detected(&[(
            "etc/os-release",
            "NAME=\"Ubuntu\"\nVERSION=\"22.04.3 LTS (Jammy Jellyfish)\"\nID=ubuntu\nID_LIKE=debian\nVERSION_ID=\"22.04\"\n",
        )]);
        assert_eq!(release, OsRelease::new("ubuntu", "22.04"));
    }

    #[test]
    fn test_os_release_without_version_is_unstable() {
        let release = detected(&[("etc/os-release", "PRETTY_NAME=\"Debian sid\"\nID=debian\n")]);
        assert_eq!(release, OsRelease::new("debian", "unstable"));
    }

    #[cfg(unix)]
    #[test]
    fn test_absolute_os_release_link_stays_in_image() {
        let root = root_with(&[("usr/lib/os-release", "ID=debian\nVERSION_ID=\"12\"\n")]);
        fs::create_dir_all(root.path().join("etc")).unwrap();
        std::os::unix::fs::symlink("/usr/lib/os-release", root.path().join("etc/os-release")).unwrap();

        assert_eq!(detect(root.path()).unwrap(), OsRelease::new("debian", "12"));
    }

    #[test]
    fn test_os_release_wins_over_fallbacks() {
        let release = detected(&[
            ("etc/os-release", "ID=alpine\nVERSION_ID=3.19.1\n"),
            ("etc/debian_version", "12.5\n"),
        ]);
        assert_eq!(release.name, "alpine");
    }

    #[test]
    fn test_lsb_release() {
        let release = detected(&[("etc/lsb-release", "DISTRIB_ID=Ubuntu\nDISTRIB_RELEASE=14.04\n")]);
        assert_eq!(release, OsRelease::new("ubuntu", "14.04"));
    }

    #[test]
    fn test_debian_version_major_only() {
        let release = detected(&[("etc/debian_version", "8.11\n")]);
        assert_eq!(release, OsRelease::new("debian", "8"));
    }

    #[test]
    fn test_alpine_release() {
        let release = detected(&[("etc/alpine-release", "3.7.0\n")]);
        assert_eq!(release, OsRelease::new("alpine", "3.7.0"));
    }

    #[test]
    fn test_oracle_release_is_renamed() {
        let release = detected(&[("etc/os-release", "ID=\"ol\"\nVERSION_ID=\"8.9\"\n")]);
        assert_eq!(release, OsRelease::new("oracle", "8.9"));

        let release = detected(&[("etc/oracle-release", "Oracle Linux Server release 7.4\n")]);
        assert_eq!(release, OsRelease::new("oracle", "7.4"));
    }

    #[test]
    fn test_redhat_release() {
        let release = detected(&[("etc/redhat-release", "CentOS release 6.9 (Final)\n")]);
        assert_eq!(release, OsRelease::new("centos", "6"));
    }

    #[test]
    fn test_unparseable_file_stops_detection() {
        let dir = root_with(&[("etc/os-release", "NAME=nothing\n"), ("etc/alpine-release", "3.7.0\n")]);
        assert!(detect(dir.path()).is_err());
    }

    #[test]
    fn test_nothing_to_detect() {
        let dir = TempDir::new().unwrap();
        let err = detect(dir.path()).unwrap_err();
        assert_eq!(err.to_string(), "Failed to detect OS release");
    }
}
