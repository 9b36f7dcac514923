//! End-to-end "image → package report" pipeline orchestrator.
//!
//! This module provides [`ImageProcessor`], a high-level orchestrator that:
//! - fetches an image tarball from a concrete [`crate::sources::Source`],
//! - unpacks it and squashes the ordered filesystem layers into a fresh root,
//! - detects the distribution,
//! - and runs the configured package analyzers against one or two such roots.
//!
//! Construction helpers:
//! - [`ImageProcessor::new`] injects a concrete [`Source`], a [`Notifier`] and a [`Config`].

use crate::analyzer;
use crate::config::Config;
use crate::extracted_image::ExtractedImage;
use crate::image::Image;
use crate::notifier::Notifier;
use crate::os_release;
use crate::output::{AnalyzeReport, DiffReport};
use crate::sources::Source;
use crate::tar_extractor::{self, ExtractStats};
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Instant;

/// Orchestrates image preparation and analysis for a concrete [`Source`].
///
/// ### Type parameters
/// - `S`: a concrete image source (see [`crate::sources`]) that knows how to
///   retrieve an image tarball.
///
/// ### Concurrency
/// The two images of a diff are prepared in parallel and analyzers run in parallel
/// over the rayon global pool, so both `S` and the notifier are shared across threads.
pub struct ImageProcessor<S: Source> {
    source: S,
    notifier: Notifier,
    config: Config,
}

impl<S: Source> ImageProcessor<S> {
    pub fn new(source: S, notifier: Notifier, config: Config) -> Self {
        Self {
            source,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Fetches `image_name` and squashes its layers into a new root.
    ///
    /// Any extraction error, a path escape in particular, fails the whole image;
    /// the partially written root is removed with the work directory.
    pub fn prepare(&self, image_name: &str) -> Result<Image> {
        let started = Instant::now();
        self.notifier.info(&format!(
            "Getting image tarball using {} source: {}",
            self.source.name(),
            image_name
        ));

        // The tarball tempdir has to live until the outer archive is unpacked
        let (tarball_path, _tarball_temp_dir) = self
            .source
            .get_image_tarball(image_name, &self.notifier)
            .with_context(|| format!("Failed to get image {}", image_name))?;

        self.notifier.info("Extracting image tarball...");
        let extracted = ExtractedImage::from_tarball(&tarball_path, &self.notifier)
            .with_context(|| format!("Failed to read image tarball {}", tarball_path.display()))?;

        let workdir = tempfile::Builder::new()
            .prefix("oci-inventory-")
            .tempdir()
            .context("Failed to create work directory")?;
        let root = workdir.path().join("rootfs");

        let stats = self.squash_layers(&extracted, &root)?;
        self.notifier.debug(&format!(
            "Squashed {} layers of {}: {} entries, {} whiteouts, {} excluded",
            stats.layers, image_name, stats.entries, stats.whiteouts, stats.excluded
        ));

        let os_release = match os_release::detect(&root) {
            Ok(release) => {
                self.notifier
                    .debug(&format!("Detected {} {}", release.name, release.version));
                Some(release)
            }
            Err(e) => {
                self.notifier
                    .warn(&format!("Could not detect OS release of {}: {:#}", image_name, e));
                None
            }
        };

        let mut image = Image::new(image_name, extracted.info().clone(), os_release, root, workdir);
        if self.config.save {
            if let Some(kept) = image.retain() {
                self.notifier
                    .warn(&format!("Image filesystem of {} saved at {}", image_name, kept.display()));
            }
        }

        self.notifier.debug(&format!(
            "Prepared {} in {:.1}s",
            image_name,
            started.elapsed().as_secs_f64()
        ));
        Ok(image)
    }

    fn squash_layers(&self, extracted: &ExtractedImage, root: &Path) -> Result<ExtractStats> {
        let layers = extracted.layers();
        let total = layers.len() as u64;
        let progress_bar = self.notifier.create_progress_bar(total, "Applying layers");

        let mut stats = ExtractStats::default();
        // Layers are order-dependent: deletions of one must land before the next
        for (i, layer) in layers.iter().enumerate() {
            self.notifier
                .progress(i as u64 + 1, total, "Applying layers");
            let file = tar_extractor::open_layer(layer)?;
            let layer_stats = tar_extractor::extract_layer(file, root, &self.config.exclude)
                .with_context(|| format!("Failed to apply layer {}", layer.display()))?;
            stats.absorb(layer_stats);
            if let Some(pb) = &progress_bar {
                pb.inc(1);
            }
        }
        if let Some(pb) = progress_bar {
            pb.finish_and_clear();
        }

        Ok(stats)
    }

    /// Prepares one image and runs every configured analyzer on it.
    pub fn analyze(&self, image_name: &str) -> Result<AnalyzeReport> {
        let image = self.prepare(image_name)?;

        self.notifier.info(&format!("Analyzing packages of {}...", image_name));
        let results = analyzer::run_analyze(&self.config.analyzers, &image.reference, image.root());
        self.notifier.finish();

        Ok(AnalyzeReport::new(&image, results))
    }

    /// Prepares both images concurrently and diffs their inventories.
    pub fn diff(&self, image1: &str, image2: &str) -> Result<DiffReport> {
        let (first, second) = rayon::join(|| self.prepare(image1), || self.prepare(image2));
        let (first, second) = (first?, second?);

        self.notifier
            .info(&format!("Comparing packages of {} and {}...", image1, image2));
        let results = analyzer::run_diff(
            &self.config.analyzers,
            (first.reference.as_str(), first.root()),
            (second.reference.as_str(), second.root()),
        );
        self.notifier.finish();

        Ok(DiffReport::new(&first, &second, results))
    }
}
