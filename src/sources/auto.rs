use anyhow::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use super::{DockerSource, Source, TarSource};
use crate::notifier::Notifier;

/// Treats existing files as tarballs and everything else as a Docker image reference
pub struct AutoSource {
    tar: TarSource,
    docker: DockerSource,
}

impl AutoSource {
    pub fn new() -> Result<Self> {
        Ok(Self {
            tar: TarSource::new()?,
            docker: DockerSource::new()?,
        })
    }

    fn pick(&self, image_name: &str) -> &dyn Source {
        if Path::new(image_name).is_file() {
            &self.tar
        } else {
            &self.docker
        }
    }
}

impl Source for AutoSource {
    fn name(&self) -> &str {
        "auto"
    }

    fn get_image_tarball(
        &self,
        image_name: &str,
        notifier: &Notifier,
    ) -> Result<(PathBuf, Option<TempDir>)> {
        let source = self.pick(image_name);
        notifier.debug(&format!("Resolved {} to the {} source", image_name, source.name()));
        source.get_image_tarball(image_name, notifier)
    }
}
