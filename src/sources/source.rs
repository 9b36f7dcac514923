use anyhow::Result;
use std::path::PathBuf;
use tempfile::TempDir;

use crate::notifier::Notifier;

/// Source trait for getting image tarballs from different container sources
pub trait Source: Sync {
    /// Returns the name of the source for identification purposes
    fn name(&self) -> &str;

    /// Retrieves an image tarball and returns the path to it along with temp directory if created
    /// The image_name parameter can be an image reference (for daemon sources)
    /// or a filesystem path (for local sources)
    ///
    /// Returns a tuple with the path to the tarball and an optional TempDir that needs to be kept alive
    /// for the duration of the tarball use
    fn get_image_tarball(
        &self,
        image_name: &str,
        notifier: &Notifier,
    ) -> Result<(PathBuf, Option<TempDir>)>;
}
