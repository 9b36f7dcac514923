use anyhow::Result;
use log::{debug, warn};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::analysis::{self, Analysis, Diff};
use crate::error::ConfigError;
use crate::packages::{ApkParser, AptParser, PackageParser, ParsedInventory, RpmParser};

/// Supported package-manager families, in result order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AnalyzerKind {
    Apk,
    Apt,
    Rpm,
}

impl AnalyzerKind {
    pub const ALL: [AnalyzerKind; 3] = [AnalyzerKind::Apt, AnalyzerKind::Apk, AnalyzerKind::Rpm];

    pub fn name(self) -> &'static str {
        self.parser().name()
    }

    pub fn parser(self) -> &'static dyn PackageParser {
        match self {
            AnalyzerKind::Apk => &ApkParser,
            AnalyzerKind::Apt => &AptParser,
            AnalyzerKind::Rpm => &RpmParser,
        }
    }
}

impl fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AnalyzerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        AnalyzerKind::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| ConfigError::UnknownAnalyzer(s.to_string()))
    }
}

/// Results keyed by analyzer name; one failing analyzer never hides the others.
pub type AnalyzerResults<T> = BTreeMap<&'static str, Result<T>>;

/// Parses `root` with `parser`, logging anomalies.
pub fn parse_root<P: PackageParser + ?Sized>(parser: &P, root: &Path) -> Result<ParsedInventory> {
    debug!("Running {} on {}", parser.display_name(), root.display());
    let parsed = parser.parse(root)?;
    for anomaly in &parsed.anomalies {
        warn!("{}: {}", parser.display_name(), anomaly);
    }
    debug!(
        "{} found {} packages in {}",
        parser.display_name(),
        parsed.packages.len(),
        root.display()
    );
    Ok(parsed)
}

/// Runs every analyzer in `kinds` against one extracted root concurrently.
pub fn run_analyze(kinds: &[AnalyzerKind], image: &str, root: &Path) -> AnalyzerResults<Analysis> {
    kinds
        .par_iter()
        .map(|kind| {
            let result = parse_root(kind.parser(), root)
                .map(|parsed| analysis::analyze(kind.name(), image, &parsed.packages, &parsed.anomalies));
            (kind.name(), result)
        })
        .collect()
}

/// Runs every analyzer in `kinds` against both roots and diffs the inventories.
pub fn run_diff(
    kinds: &[AnalyzerKind],
    image1: (&str, &Path),
    image2: (&str, &Path),
) -> AnalyzerResults<Diff> {
    kinds
        .par_iter()
        .map(|kind| {
            let parser = kind.parser();
            let (left, right) = rayon::join(|| parse_root(parser, image1.1), || parse_root(parser, image2.1));
            let result = left.and_then(|left| {
                let right = right?;
                Ok(analysis::diff(
                    kind.name(),
                    image1.0,
                    &left.packages,
                    image2.0,
                    &right.packages,
                ))
            });
            (kind.name(), result)
        })
        .collect()
}
