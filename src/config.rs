use std::path::PathBuf;

use crate::analyzer::AnalyzerKind;
use crate::error::ConfigError;

/// Pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Analyzers to run, without duplicates, in request order.
    pub analyzers: Vec<AnalyzerKind>,
    /// Keep extracted image roots after the run.
    pub save: bool,
    /// Root-relative path prefixes never written during extraction.
    pub exclude: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            analyzers: AnalyzerKind::ALL.to_vec(),
            save: false,
            exclude: Vec::new(),
        }
    }
}

impl Config {
    /// Builds a configuration from analyzer names as typed by the user. No
    /// names selects every analyzer.
    pub fn from_names<I, S>(names: I, save: bool, exclude: Vec<PathBuf>) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut analyzers = Vec::new();
        for name in names {
            let kind: AnalyzerKind = name.as_ref().parse()?;
            if !analyzers.contains(&kind) {
                analyzers.push(kind);
            }
        }
        if analyzers.is_empty() {
            analyzers = AnalyzerKind::ALL.to_vec();
        }

        Ok(Self {
            analyzers,
            save,
            exclude,
        })
    }
}
