use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use super::Source;
use crate::notifier::Notifier;

const TARBALL_EXTENSIONS: &[&str] = &["tar", "gz", "tgz"];

fn has_tarball_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TARBALL_EXTENSIONS.contains(&ext))
}

/// Tar implementation of the Source trait for `docker save` and OCI layout archives
pub struct TarSource;

impl TarSource {
    pub fn new() -> Result<Self> {
        Ok(Self)
    }
}

impl Source for TarSource {
    fn name(&self) -> &str {
        "tar"
    }

    fn get_image_tarball(
        &self,
        image_path: &str,
        notifier: &Notifier,
    ) -> Result<(PathBuf, Option<TempDir>)> {
        // For tar source, image_path is the path to the existing tarball
        let tarball_path = PathBuf::from(image_path);

        if !tarball_path.exists() {
            return Err(anyhow!(
                "Tarball file does not exist: {}",
                tarball_path.display()
            ));
        }

        if !tarball_path.is_file() {
            return Err(anyhow!("Path is not a file: {}", tarball_path.display()));
        }

        if !has_tarball_extension(&tarball_path) {
            notifier.warn(&format!(
                "{} does not have a .tar extension. Proceeding anyway, but this might not be a valid image tarball.",
                tarball_path.display()
            ));
        }

        // No temp dir needed, the tarball belongs to the caller
        Ok((tarball_path, None))
    }
}
