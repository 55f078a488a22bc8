//! Builders for small layout archives used across the test suite.

use super::{blob_digest, blob_path, header, OCI_LAYOUT};
use crate::constants::media_type;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;
use std::io::Write;
use tar::{Builder, EntryType};

pub(crate) struct ArchiveOptions {
    /// Record each platform on its index entry
    pub platform_in_index: bool,
    /// Wrap the per-platform manifests in a nested index
    pub nested: bool,
    pub gzip: bool,
    /// Extra content mixed into every layer, to get distinct digests
    pub salt: &'static str,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            platform_in_index: true,
            nested: false,
            gzip: false,
            salt: "",
        }
    }
}

pub(crate) fn fake_archive(platforms: &[&str]) -> Vec<u8> {
    fake_archive_with(platforms, ArchiveOptions::default())
}

fn descriptor(media_type: &str, data: &[u8]) -> serde_json::Value {
    json!({
        "mediaType": media_type,
        "size": data.len(),
        "digest": blob_digest(data),
    })
}

pub(crate) fn fake_archive_with(platforms: &[&str], options: ArchiveOptions) -> Vec<u8> {
    let mut blobs: Vec<Vec<u8>> = Vec::new();
    let mut entries = Vec::new();

    for platform in platforms {
        let mut parts = platform.split('/');
        let os = parts.next().unwrap();
        let arch = parts.next().unwrap();
        let mut platform_json = json!({"os": os, "architecture": arch});
        if let Some(variant) = parts.next() {
            platform_json["variant"] = json!(variant);
        }

        let config = serde_json::to_vec(&platform_json).unwrap();
        let layer = format!("layer for {}{}", platform, options.salt).into_bytes();
        let manifest = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": media_type::OCI_MANIFEST,
            "config": descriptor("application/vnd.oci.image.config.v1+json", &config),
            "layers": [descriptor("application/vnd.oci.image.layer.v1.tar", &layer)],
        }))
        .unwrap();

        let mut entry = descriptor(media_type::OCI_MANIFEST, &manifest);
        if options.platform_in_index {
            entry["platform"] = platform_json.clone();
        }
        entries.push(entry);
        blobs.extend([config, layer, manifest]);
    }

    let mut index = json!({
        "schemaVersion": 2,
        "mediaType": media_type::OCI_INDEX,
        "manifests": entries,
    });
    if options.nested {
        let nested = serde_json::to_vec(&index).unwrap();
        index = json!({
            "schemaVersion": 2,
            "manifests": [descriptor(media_type::OCI_INDEX, &nested)],
        });
        blobs.push(nested);
    }
    let index = serde_json::to_vec(&index).unwrap();

    let mut data = Vec::new();
    {
        let mut tar = Builder::new(&mut data);
        let mut files = vec![
            ("oci-layout".to_string(), OCI_LAYOUT.to_vec()),
            ("index.json".to_string(), index),
        ];
        for blob in blobs {
            files.push((blob_path(&blob_digest(&blob)).unwrap(), blob));
        }
        for (path, content) in files {
            let header = header(&path, content.len() as u64, EntryType::Regular, 0o644).unwrap();
            tar.append(&header, content.as_slice()).unwrap();
        }
        tar.finish().unwrap();
    }

    if !options.gzip {
        return data;
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&data).unwrap();
    encoder.finish().unwrap()
}
