mod common;

use common::{write_dir, write_file};
use oci_inventory::packages::apk::APK_INSTALLED;
use oci_inventory::packages::apt::{APT_EXTENDED_STATES, DPKG_STATUS};
use oci_inventory::packages::{
    Anomaly, ApkParser, AptParser, PackageInfo, PackageParser, ParsedInventory, RpmParser,
};
use std::collections::BTreeSet;
use tempfile::TempDir;

const DPKG_FIXTURE: &str = "\
Package: pac1
Status: install ok installed
Installed-Size: 12
Version: 1.0
Description: first package
 with a continued description
 .
 and a paragraph break

Package: pac2
Version: 2.0
Source: pac2-src (2.0-1)
Depends: pac1 (>= 1.0), libc6 | musl
Provides: pac2-virtual

Package: pac3
Version: 3.0
Pre-Depends: dpkg (>= 1.15)

Package: pac4
Version: 4.0
Depends: pac2:amd64, pac3
";

const EXTENDED_STATES_FIXTURE: &str = "\
Package: pac1
Architecture: amd64
Auto-Installed: 0

Package: pac2
Architecture: amd64
Auto-Installed: 1

Package: not-installed
Architecture: amd64
Auto-Installed: 1
";

const APK_FIXTURE: &str = "\
C:Q1aGz1+rb5MLhn3cY3EhwwsXz3yHQ=
P:musl
V:1.2.4-r2
A:x86_64
o:musl
p:so:libc.musl-x86_64.so.1=1

C:Q1VOTQjLYFK6IUAZiDHScWECAUK2E=
P:musl-utils
V:1.2.4-r2
o:musl
D:!uclibc-utils scanelf musl=1.2.4-r2 so:libc.musl-x86_64.so.1
p:cmd:getconf=1.2.4-r2 cmd:ldd=1.2.4-r2
";

fn deps(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn image_with(files: &[(&str, &str)]) -> TempDir {
    let root = TempDir::new().unwrap();
    for (rel, content) in files {
        write_file(root.path(), rel, content);
    }
    root
}

#[test]
fn test_dpkg_inventory_with_auto_installed() {
    let root = image_with(&[(DPKG_STATUS, DPKG_FIXTURE), (APT_EXTENDED_STATES, EXTENDED_STATES_FIXTURE)]);

    let parsed = AptParser.parse(root.path()).unwrap();
    let packages = &parsed.packages;

    assert_eq!(
        packages.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["pac1", "pac2", "pac3", "pac4"]
    );
    assert_eq!(
        packages["pac2"],
        PackageInfo {
            version: "2.0".to_string(),
            source: Some("pac2-src".to_string()),
            auto_installed: true,
            provides: vec!["pac2-virtual".to_string()],
            deps: deps(&["pac1", "libc6", "musl"]),
        }
    );
    assert!(!packages["pac1"].auto_installed);
    assert_eq!(packages["pac3"].deps, deps(&["dpkg"]));
    assert_eq!(packages["pac4"].deps, deps(&["pac2", "pac3"]));
    assert!(parsed.anomalies.is_empty(), "{:?}", parsed.anomalies);
}

#[test]
fn test_auto_installed_does_not_touch_other_fields() {
    let without = image_with(&[(DPKG_STATUS, DPKG_FIXTURE)]);
    let with = image_with(&[(DPKG_STATUS, DPKG_FIXTURE), (APT_EXTENDED_STATES, EXTENDED_STATES_FIXTURE)]);

    let mut plain = AptParser.parse(without.path()).unwrap().packages;
    let marked = AptParser.parse(with.path()).unwrap().packages;

    plain.get_mut("pac2").unwrap().auto_installed = true;
    assert_eq!(plain, marked);
}

#[test]
fn test_unreadable_extended_states_keeps_inventory() {
    let root = image_with(&[(DPKG_STATUS, DPKG_FIXTURE)]);
    // a directory in place of the file cannot be read
    write_dir(root.path(), APT_EXTENDED_STATES);

    let parsed = AptParser.parse(root.path()).unwrap();

    assert_eq!(parsed.packages.len(), 4);
    assert!(parsed.packages.values().all(|p| !p.auto_installed));
    assert!(matches!(
        parsed.anomalies.as_slice(),
        [Anomaly::AuxiliaryUnreadable { .. }]
    ));
}

#[test]
fn test_unreadable_status_is_error() {
    let root = TempDir::new().unwrap();
    write_dir(root.path(), DPKG_STATUS);

    assert!(AptParser.parse(root.path()).is_err());
}

#[test]
fn test_absent_databases_are_empty() {
    let root = TempDir::new().unwrap();
    let parsers: [&dyn PackageParser; 3] = [&AptParser, &ApkParser, &RpmParser];

    for parser in parsers {
        assert_eq!(
            parser.parse(root.path()).unwrap(),
            ParsedInventory::default(),
            "{} should be empty",
            parser.name()
        );
    }
}

#[test]
fn test_missing_root_is_error() {
    let root = TempDir::new().unwrap();
    let gone = root.path().join("gone");

    assert!(AptParser.parse(&gone).is_err());
    assert!(ApkParser.parse(&gone).is_err());
}

#[test]
fn test_apk_inventory() {
    let root = image_with(&[(APK_INSTALLED, APK_FIXTURE)]);

    let parsed = ApkParser.parse(root.path()).unwrap();
    let utils = &parsed.packages["musl-utils"];

    assert_eq!(parsed.packages.len(), 2);
    assert_eq!(utils.version, "1.2.4-r2");
    assert_eq!(utils.source.as_deref(), Some("musl"));
    assert_eq!(utils.deps, deps(&["scanelf", "musl", "so:libc.musl-x86_64.so.1"]));
    assert_eq!(utils.provides, vec!["cmd:getconf", "cmd:ldd"]);
    assert_eq!(parsed.packages["musl"].provides, vec!["so:libc.musl-x86_64.so.1"]);
}

#[test]
fn test_parsing_is_idempotent() {
    let root = image_with(&[
        (DPKG_STATUS, DPKG_FIXTURE),
        (APT_EXTENDED_STATES, EXTENDED_STATES_FIXTURE),
        (APK_INSTALLED, APK_FIXTURE),
    ]);

    assert_eq!(AptParser.parse(root.path()).unwrap(), AptParser.parse(root.path()).unwrap());
    assert_eq!(ApkParser.parse(root.path()).unwrap(), ApkParser.parse(root.path()).unwrap());

    let first = serde_json::to_vec(&AptParser.parse(root.path()).unwrap().packages).unwrap();
    let second = serde_json::to_vec(&AptParser.parse(root.path()).unwrap().packages).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_duplicate_version_is_reported_not_fatal() {
    let root = image_with(&[(
        DPKG_STATUS,
        "Package: curl\nVersion: 7.88.1-10\n\nPackage: curl\nVersion: 8.5.0-2\n",
    )]);

    let parsed = AptParser.parse(root.path()).unwrap();

    assert_eq!(parsed.packages["curl"].version, "7.88.1-10");
    assert_eq!(
        parsed.anomalies,
        vec![Anomaly::DuplicateVersion {
            package: "curl".to_string(),
            kept: "7.88.1-10".to_string(),
            ignored: "8.5.0-2".to_string(),
        }]
    );
}

#[cfg(unix)]
#[test]
fn test_absolute_database_link_resolves_inside_image() {
    let sandbox = TempDir::new().unwrap();
    let root = sandbox.path().join("rootfs");
    let host_db = sandbox.path().join("hostdpkg");
    write_file(&host_db, "status", "Package: host-only\nVersion: 1.0\n");
    write_dir(&root, "var/lib");
    std::os::unix::fs::symlink(&host_db, root.join("var/lib/dpkg")).unwrap();

    let parsed = AptParser.parse(&root).unwrap();
    assert!(parsed.packages.is_empty(), "{:?}", parsed.packages);

    // the same link target, populated inside the image
    write_file(&root, &format!("{}/status", host_db.strip_prefix("/").unwrap().display()), "Package: in-image\nVersion: 2.0\n");
    let parsed = AptParser.parse(&root).unwrap();
    assert_eq!(parsed.packages.keys().collect::<Vec<_>>(), vec!["in-image"]);
}
