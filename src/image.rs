use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::extracted_image::ImageInfo;
use crate::os_release::OsRelease;

/// A squashed image filesystem ready for analysis.
///
/// The root is deleted when the image is dropped, unless [`Image::retain`] was called.
#[derive(Debug)]
pub struct Image {
    /// Reference the image was requested by (tarball path or image name).
    pub reference: String,
    pub info: ImageInfo,
    pub os_release: Option<OsRelease>,
    root: PathBuf,
    workdir: Option<TempDir>,
}

impl Image {
    pub(crate) fn new(
        reference: &str,
        info: ImageInfo,
        os_release: Option<OsRelease>,
        root: PathBuf,
        workdir: TempDir,
    ) -> Self {
        Self {
            reference: reference.to_string(),
            info,
            os_release,
            root,
            workdir: Some(workdir),
        }
    }

    /// Path of the merged filesystem.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Keeps the filesystem on disk after drop. Returns the kept work directory
    /// the first time it is called.
    pub fn retain(&mut self) -> Option<PathBuf> {
        self.workdir.take().map(TempDir::keep)
    }

    pub fn is_retained(&self) -> bool {
        self.workdir.is_none()
    }
}
