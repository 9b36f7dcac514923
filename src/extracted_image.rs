//! Unpack an OCI/Docker image tarball and locate its layers.
//!
//! [`ExtractedImage`] unwraps a `docker save` or OCI image-layout tarball into a
//! temporary directory and reads:
//! - [`ImageInfo`] (id, repo tags, os, architecture) from the image config,
//! - the ordered layer blob paths (oldest → newest).
//!
//! Layouts:
//! - `manifest.json` (`docker save`): `Config`, `RepoTags` and `Layers` of the first entry.
//!   Recent Docker versions write an OCI `index.json` next to it; its first manifest
//!   digest is then used as the image id, matching `docker image inspect`.
//! - `index.json` only (OCI image layout): first manifest descriptor → manifest blob →
//!   config and layer descriptors.
//!
//! The outer archive goes through the same path-checked extractor as the layers.
//! Temporary extraction is scoped to the instance lifetime via `tempfile::TempDir`.

use crate::notifier::Notifier;
use crate::tar_extractor;
use anyhow::{anyhow, Context, Result};
use oci_spec::image::{Descriptor, ImageConfiguration, ImageIndex, ImageManifest};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageInfo {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub os: String,
    pub architecture: String,
}

/// One entry of a `docker save` manifest.json.
#[derive(Debug, Deserialize)]
struct DockerManifestEntry {
    #[serde(rename = "Config")]
    config: String,
    #[serde(rename = "RepoTags", default)]
    repo_tags: Option<Vec<String>>,
    #[serde(rename = "Layers", default)]
    layers: Vec<String>,
}

pub struct ExtractedImage {
    _temp_dir: tempfile::TempDir,
    info: ImageInfo,
    layers: Vec<PathBuf>,
}

impl ExtractedImage {
    pub fn from_tarball<P: AsRef<Path>>(tarball_path: P, notifier: &Notifier) -> Result<Self> {
        let tarball_path = tarball_path.as_ref();

        notifier.debug(&format!("Extracting image tarball: {:?}", tarball_path));

        let temp_dir = tempfile::tempdir().context("Failed to create temporary directory")?;
        let extract_dir = temp_dir.path().join("extracted");

        let tarball = tar_extractor::open_layer(tarball_path)?;
        tar_extractor::extract_layer(tarball, &extract_dir, &[])
            .with_context(|| format!("Failed to extract tar file: {:?}", tarball_path))?;

        let (info, layers) = if extract_dir.join("manifest.json").exists() {
            notifier.debug("Reading docker-save manifest...");
            Self::load_docker_layout(&extract_dir)?
        } else if extract_dir.join("index.json").exists() {
            notifier.debug("Reading OCI image layout...");
            Self::load_oci_layout(&extract_dir)?
        } else {
            return Err(anyhow!(
                "Invalid image tarball: neither manifest.json nor index.json found. This does not appear to be a valid OCI/Docker image tarball."
            ));
        };

        for layer in &layers {
            if !layer.is_file() {
                return Err(anyhow!("Layer blob missing from image tarball: {}", layer.display()));
            }
        }

        notifier.info(&format!("Successfully loaded {} layers", layers.len()));

        Ok(ExtractedImage {
            _temp_dir: temp_dir,
            info,
            layers,
        })
    }

    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    /// Layer blob paths, oldest first.
    pub fn layers(&self) -> &[PathBuf] {
        &self.layers
    }

    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
        let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn load_config(path: &Path) -> Result<ImageConfiguration> {
        Self::read_json(path).context("Failed to parse image configuration")
    }

    /// `blobs/<algorithm>/<hex>` path of a descriptor.
    fn blob_path(extract_dir: &Path, descriptor: &Descriptor) -> Result<PathBuf> {
        let digest = descriptor.digest().to_string();
        let (algorithm, hex) = digest
            .split_once(':')
            .ok_or_else(|| anyhow!("Invalid descriptor digest: {}", digest))?;
        Ok(extract_dir.join("blobs").join(algorithm).join(hex))
    }

    fn index_manifest_digest(extract_dir: &Path) -> Result<Option<String>> {
        let index_path = extract_dir.join("index.json");
        if !index_path.exists() {
            return Ok(None);
        }
        let index: ImageIndex = Self::read_json(&index_path)?;
        Ok(index.manifests().first().map(|m| m.digest().to_string()))
    }

    fn load_docker_layout(extract_dir: &Path) -> Result<(ImageInfo, Vec<PathBuf>)> {
        let manifest: Vec<DockerManifestEntry> = Self::read_json(&extract_dir.join("manifest.json"))?;
        let entry = manifest
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty manifest.json"))?;

        let config = Self::load_config(&extract_dir.join(&entry.config))
            .with_context(|| format!("Failed to read config file: {}", entry.config))?;

        let id = match Self::index_manifest_digest(extract_dir)? {
            Some(digest) => digest,
            // Config path is either blobs/sha256/HASH or HASH.json
            None => {
                let hash = entry
                    .config
                    .strip_prefix("blobs/sha256/")
                    .or_else(|| entry.config.strip_suffix(".json"))
                    .unwrap_or(&entry.config);
                format!("sha256:{}", hash)
            }
        };

        let info = ImageInfo {
            id,
            repo_tags: entry.repo_tags.unwrap_or_default(),
            os: config.os().to_string(),
            architecture: config.architecture().to_string(),
        };
        let layers = entry.layers.iter().map(|l| extract_dir.join(l)).collect();
        Ok((info, layers))
    }

    fn load_oci_layout(extract_dir: &Path) -> Result<(ImageInfo, Vec<PathBuf>)> {
        let index: ImageIndex = Self::read_json(&extract_dir.join("index.json"))?;
        let descriptor = index
            .manifests()
            .first()
            .ok_or_else(|| anyhow!("index.json lists no manifests"))?;

        let manifest: ImageManifest = Self::read_json(&Self::blob_path(extract_dir, descriptor)?)
            .context("Failed to read image manifest (nested image indexes are not supported)")?;
        let config = Self::load_config(&Self::blob_path(extract_dir, manifest.config())?)?;

        let repo_tags = descriptor
            .annotations()
            .as_ref()
            .and_then(|a| a.get(REF_NAME_ANNOTATION))
            .map(|name| vec![name.clone()])
            .unwrap_or_default();

        let info = ImageInfo {
            id: descriptor.digest().to_string(),
            repo_tags,
            os: config.os().to_string(),
            architecture: config.architecture().to_string(),
        };
        let layers = manifest
            .layers()
            .iter()
            .map(|layer| Self::blob_path(extract_dir, layer))
            .collect::<Result<Vec<_>>>()?;
        Ok((info, layers))
    }
}
