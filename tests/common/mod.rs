//! Common utilities for integration tests: in-memory layer and image builders,
//! and reference tree writers.

#![allow(dead_code)]

use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tar_rs as tar;

fn set_raw(field: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    assert!(bytes.len() < field.len(), "name too long for a v7 header: {value}");
    field.fill(0);
    field[..bytes.len()].copy_from_slice(bytes);
}

/// Builds one layer tarball entry by entry. Names are written verbatim so
/// tests can produce entries a well-behaved tar tool would refuse.
pub struct LayerBuilder {
    builder: tar::Builder<Vec<u8>>,
}

impl LayerBuilder {
    pub fn new() -> Self {
        Self {
            builder: tar::Builder::new(Vec::new()),
        }
    }

    fn append(mut self, name: &str, entry_type: tar::EntryType, mode: u32, link: Option<&str>, data: &[u8]) -> Self {
        let mut header = tar::Header::new_old();
        set_raw(&mut header.as_old_mut().name, name);
        if let Some(link) = link {
            set_raw(&mut header.as_old_mut().linkname, link);
        }
        header.set_entry_type(entry_type);
        header.set_mode(mode);
        header.set_size(data.len() as u64);
        header.set_mtime(0);
        header.set_cksum();
        self.builder.append(&header, data).unwrap();
        self
    }

    pub fn dir(self, name: &str) -> Self {
        self.append(name, tar::EntryType::Directory, 0o755, None, &[])
    }

    pub fn file(self, name: &str, content: &str) -> Self {
        self.append(name, tar::EntryType::Regular, 0o644, None, content.as_bytes())
    }

    pub fn file_with_mode(self, name: &str, content: &str, mode: u32) -> Self {
        self.append(name, tar::EntryType::Regular, mode, None, content.as_bytes())
    }

    pub fn symlink(self, name: &str, target: &str) -> Self {
        self.append(name, tar::EntryType::Symlink, 0o777, Some(target), &[])
    }

    pub fn hardlink(self, name: &str, target: &str) -> Self {
        self.append(name, tar::EntryType::Link, 0o644, Some(target), &[])
    }

    /// `.wh.<name>` next to `path`'s file name.
    pub fn whiteout(self, path: &str) -> Self {
        let marker = match path.rsplit_once('/') {
            Some((dir, name)) => format!("{dir}/.wh.{name}"),
            None => format!(".wh.{path}"),
        };
        self.file(&marker, "")
    }

    pub fn opaque(self, dir: &str) -> Self {
        self.file(&format!("{dir}/.wh..wh..opq"), "")
    }

    pub fn build(self) -> Vec<u8> {
        self.builder.into_inner().unwrap()
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn append_file(builder: &mut tar::Builder<Vec<u8>>, path: &str, data: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    builder.append_data(&mut header, path, data).unwrap();
}

fn image_config(layer_count: usize) -> Vec<u8> {
    let diff_ids: Vec<String> = (0..layer_count)
        .map(|i| format!("sha256:{}", sha256_hex(format!("layer-{i}").as_bytes())))
        .collect();
    serde_json::to_vec(&json!({
        "architecture": "amd64",
        "os": "linux",
        "config": {},
        "rootfs": { "type": "layers", "diff_ids": diff_ids },
        "history": []
    }))
    .unwrap()
}

/// A `docker save` style archive: `manifest.json`, `<hash>.json` config and
/// `<hash>/layer.tar` blobs.
pub fn docker_save_archive(layers: &[Vec<u8>], repo_tag: &str) -> Vec<u8> {
    let config = image_config(layers.len());
    let config_hash = sha256_hex(&config);
    let config_name = format!("{config_hash}.json");

    let mut builder = tar::Builder::new(Vec::new());
    let mut layer_names = Vec::new();
    for layer in layers {
        let name = format!("{}/layer.tar", sha256_hex(layer));
        append_file(&mut builder, &name, layer);
        layer_names.push(name);
    }
    append_file(&mut builder, &config_name, &config);

    let manifest = serde_json::to_vec(&json!([{
        "Config": config_name,
        "RepoTags": [repo_tag],
        "Layers": layer_names,
    }]))
    .unwrap();
    append_file(&mut builder, "manifest.json", &manifest);
    builder.into_inner().unwrap()
}

/// An OCI image-layout archive: `index.json` → manifest blob → config and
/// layer blobs, all under `blobs/sha256/`.
pub fn oci_layout_archive(layers: &[Vec<u8>], ref_name: &str) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    append_file(&mut builder, "oci-layout", br#"{"imageLayoutVersion":"1.0.0"}"#);

    let mut layer_descriptors = Vec::new();
    for layer in layers {
        let hash = sha256_hex(layer);
        append_file(&mut builder, &format!("blobs/sha256/{hash}"), layer);
        layer_descriptors.push(json!({
            "mediaType": "application/vnd.oci.image.layer.v1.tar",
            "digest": format!("sha256:{hash}"),
            "size": layer.len(),
        }));
    }

    let config = image_config(layers.len());
    let config_hash = sha256_hex(&config);
    append_file(&mut builder, &format!("blobs/sha256/{config_hash}"), &config);

    let manifest = serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": format!("sha256:{config_hash}"),
            "size": config.len(),
        },
        "layers": layer_descriptors,
    }))
    .unwrap();
    let manifest_hash = sha256_hex(&manifest);
    append_file(&mut builder, &format!("blobs/sha256/{manifest_hash}"), &manifest);

    let index = serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.index.v1+json",
        "manifests": [{
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "digest": format!("sha256:{manifest_hash}"),
            "size": manifest.len(),
            "annotations": { "org.opencontainers.image.ref.name": ref_name },
        }],
    }))
    .unwrap();
    append_file(&mut builder, "index.json", &index);
    builder.into_inner().unwrap()
}

/// Writes `content` at `rel` below `root`, creating parents.
pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

pub fn write_dir(root: &Path, rel: &str) {
    fs::create_dir_all(root.join(rel)).unwrap();
}

#[cfg(unix)]
pub fn write_symlink(root: &Path, rel: &str, target: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::os::unix::fs::symlink(target, path).unwrap();
}
