//! JSON reports printed by the CLI.

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;

use crate::analysis::{Analysis, Diff};
use crate::analyzer::AnalyzerResults;
use crate::image::Image;
use crate::os_release::OsRelease;

/// Outcome of one analyzer. A failure is reported in place of its result.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum AnalyzerReport<T> {
    Completed(T),
    Failed { analyzer: String, error: String },
}

impl<T> AnalyzerReport<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, AnalyzerReport::Failed { .. })
    }
}

fn collect_reports<T>(results: AnalyzerResults<T>) -> Vec<AnalyzerReport<T>> {
    results
        .into_iter()
        .map(|(analyzer, result)| match result {
            Ok(value) => AnalyzerReport::Completed(value),
            Err(e) => {
                log::error!("Analyzer {} failed: {:#}", analyzer, e);
                AnalyzerReport::Failed {
                    analyzer: analyzer.to_string(),
                    error: format!("{:#}", e),
                }
            }
        })
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeReport {
    pub image_id: String,
    pub os_release: Option<OsRelease>,
    pub results: Vec<AnalyzerReport<Analysis>>,
}

impl AnalyzeReport {
    pub fn new(image: &Image, results: AnalyzerResults<Analysis>) -> Self {
        Self {
            image_id: image.reference.clone(),
            os_release: image.os_release.clone(),
            results: collect_reports(results),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffReport {
    pub image1: String,
    pub image2: String,
    pub os_release1: Option<OsRelease>,
    pub os_release2: Option<OsRelease>,
    pub results: Vec<AnalyzerReport<Diff>>,
}

impl DiffReport {
    pub fn new(image1: &Image, image2: &Image, results: AnalyzerResults<Diff>) -> Self {
        Self {
            image1: image1.reference.clone(),
            image2: image2.reference.clone(),
            os_release1: image1.os_release.clone(),
            os_release2: image2.os_release.clone(),
            results: collect_reports(results),
        }
    }
}

/// Writes `report` as pretty JSON followed by a newline.
pub fn write_json<W: Write, T: Serialize>(mut writer: W, report: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, report).context("Failed to serialize report")?;
    writeln!(writer).context("Failed to write report")?;
    Ok(())
}
