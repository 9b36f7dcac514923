//! Single-image summaries and two-image comparisons of inventories.

use crate::packages::{Anomaly, Inventory, PackageInfo};
use serde::Serialize;
use std::collections::BTreeSet;

/// One package of an [`Analysis`] or a [`Diff`] added/deleted list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageEntry {
    pub name: String,
    #[serde(flatten)]
    pub info: PackageInfo,
}

impl PackageEntry {
    fn new(name: &str, info: &PackageInfo) -> Self {
        Self {
            name: name.to_string(),
            info: info.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub analyzer: String,
    pub image: String,
    pub packages: Vec<PackageEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub anomalies: Vec<Anomaly>,
}

/// A field of a package present in both images that differs between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "field", rename_all = "camelCase")]
pub enum FieldChange {
    Version {
        from: String,
        to: String,
    },
    Source {
        from: Option<String>,
        to: Option<String>,
    },
    AutoInstalled {
        from: bool,
        to: bool,
    },
    Provides {
        added: Vec<String>,
        removed: Vec<String>,
    },
    Deps {
        added: Vec<String>,
        removed: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageChange {
    pub name: String,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diff {
    pub analyzer: String,
    pub image1: String,
    pub image2: String,
    pub added: Vec<PackageEntry>,
    pub deleted: Vec<PackageEntry>,
    pub modified: Vec<PackageChange>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.modified.is_empty()
    }
}

/// Wraps one inventory for reporting.
pub fn analyze(analyzer: &str, image: &str, inventory: &Inventory, anomalies: &[Anomaly]) -> Analysis {
    Analysis {
        analyzer: analyzer.to_string(),
        image: image.to_string(),
        packages: inventory
            .iter()
            .map(|(name, info)| PackageEntry::new(name, info))
            .collect(),
        anomalies: anomalies.to_vec(),
    }
}

/// Members of `to` missing from `from`, then members of `from` missing from `to`.
fn set_delta<'a>(from: &BTreeSet<&'a str>, to: &BTreeSet<&'a str>) -> (Vec<String>, Vec<String>) {
    let added = to.difference(from).map(|s| s.to_string()).collect();
    let removed = from.difference(to).map(|s| s.to_string()).collect();
    (added, removed)
}

/// Field-level differences between two versions of a package, empty when
/// they are equal.
pub fn compare_package(a: &PackageInfo, b: &PackageInfo) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    if a.version != b.version {
        changes.push(FieldChange::Version {
            from: a.version.clone(),
            to: b.version.clone(),
        });
    }
    if a.source != b.source {
        changes.push(FieldChange::Source {
            from: a.source.clone(),
            to: b.source.clone(),
        });
    }
    if a.auto_installed != b.auto_installed {
        changes.push(FieldChange::AutoInstalled {
            from: a.auto_installed,
            to: b.auto_installed,
        });
    }

    // provides order is informational only
    let provides_a: BTreeSet<&str> = a.provides.iter().map(String::as_str).collect();
    let provides_b: BTreeSet<&str> = b.provides.iter().map(String::as_str).collect();
    if provides_a != provides_b {
        let (added, removed) = set_delta(&provides_a, &provides_b);
        changes.push(FieldChange::Provides { added, removed });
    }

    let deps_a: BTreeSet<&str> = a.deps.iter().map(String::as_str).collect();
    let deps_b: BTreeSet<&str> = b.deps.iter().map(String::as_str).collect();
    if deps_a != deps_b {
        let (added, removed) = set_delta(&deps_a, &deps_b);
        changes.push(FieldChange::Deps { added, removed });
    }

    changes
}

/// Compares the inventory of `image1` against that of `image2`.
pub fn diff(analyzer: &str, image1: &str, inv1: &Inventory, image2: &str, inv2: &Inventory) -> Diff {
    let mut added = Vec::new();
    let mut deleted = Vec::new();
    let mut modified = Vec::new();

    for (name, info) in inv1 {
        match inv2.get(name) {
            None => deleted.push(PackageEntry::new(name, info)),
            Some(other) => {
                let changes = compare_package(info, other);
                if !changes.is_empty() {
                    modified.push(PackageChange {
                        name: name.clone(),
                        changes,
                    });
                }
            }
        }
    }
    for (name, info) in inv2 {
        if !inv1.contains_key(name) {
            added.push(PackageEntry::new(name, info));
        }
    }

    Diff {
        analyzer: analyzer.to_string(),
        image1: image1.to_string(),
        image2: image2.to_string(),
        added,
        deleted,
        modified,
    }
}
