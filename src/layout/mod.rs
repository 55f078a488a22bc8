//! OCI image layouts: reading the archives produced by build tools and
//! writing deterministic multi-platform archives.

use crate::constants::media_type;
use crate::error::{Error, Result};
use crate::manifest::{ImageIndex, ImageManifest, ManifestEntry};
use crate::platform::PlatformRef;
use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use serde::Deserialize;
use sha256::digest;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use tar::{Archive, Builder, EntryType, Header};
use tracing::debug;

#[cfg(test)]
pub(crate) mod testing;

const OCI_LAYOUT: &[u8] = br#"{"imageLayoutVersion":"1.0.0"}"#;
const BLOB_DIR: &str = "blobs/sha256";

/// Compute the `sha256:<hex>` digest of a blob
pub fn blob_digest(data: &[u8]) -> String {
    format!("sha256:{}", digest(data))
}

fn blob_path(digest: &str) -> Result<String> {
    let hex = digest
        .strip_prefix("sha256:")
        .ok_or_else(|| Error::Layout(format!("unsupported digest algorithm: {}", digest)))?;
    Ok(format!("{}/{}", BLOB_DIR, hex))
}

/// One single-platform image: its manifest descriptor and every blob the
/// manifest references.
#[derive(Debug, Clone, PartialEq)]
pub struct OciImage {
    manifest: ManifestEntry,
    blobs: BTreeMap<String, Arc<Vec<u8>>>,
}

impl OciImage {
    /// Assemble an image from its manifest bytes and a blob store. Fails if
    /// the config or any layer is missing.
    fn from_store(
        media_type: &str,
        manifest_bytes: Arc<Vec<u8>>,
        store: &BTreeMap<String, Arc<Vec<u8>>>,
    ) -> Result<Self> {
        let manifest: ImageManifest = serde_json::from_slice(&manifest_bytes)?;
        let manifest_digest = blob_digest(&manifest_bytes);

        let mut blobs = BTreeMap::new();
        for descriptor in std::iter::once(&manifest.config).chain(manifest.layers.iter()) {
            let blob = store
                .get(&descriptor.digest)
                .ok_or_else(|| Error::Layout(format!("missing blob {}", descriptor.digest)))?;
            blobs.insert(descriptor.digest.clone(), blob.clone());
        }

        let entry = ManifestEntry {
            media_type: media_type.to_string(),
            size: manifest_bytes.len() as i64,
            digest: manifest_digest.clone(),
            platform: None,
            annotations: BTreeMap::new(),
        };
        blobs.insert(manifest_digest, manifest_bytes);

        Ok(Self {
            manifest: entry,
            blobs,
        })
    }

    pub fn digest(&self) -> &str {
        &self.manifest.digest
    }

    pub fn media_type(&self) -> &str {
        &self.manifest.media_type
    }

    pub fn size(&self) -> i64 {
        self.manifest.size
    }

    pub fn blobs(&self) -> impl Iterator<Item = (&String, &Arc<Vec<u8>>)> {
        self.blobs.iter()
    }

    /// Platform recorded in the image config, if any.
    fn config_platform(&self) -> Result<Option<PlatformRef>> {
        #[derive(Deserialize)]
        struct ConfigPlatform {
            #[serde(default)]
            os: String,
            #[serde(default)]
            architecture: String,
            #[serde(default)]
            variant: Option<String>,
        }

        let manifest_bytes = self
            .blobs
            .get(&self.manifest.digest)
            .ok_or_else(|| Error::Layout("manifest blob missing".to_string()))?;
        let manifest: ImageManifest = serde_json::from_slice(manifest_bytes)?;
        let config = self
            .blobs
            .get(&manifest.config.digest)
            .ok_or_else(|| Error::Layout(format!("missing blob {}", manifest.config.digest)))?;
        let config: ConfigPlatform = serde_json::from_slice(config)?;

        Ok(PlatformRef::new(config.os, config.architecture)
            .ok()
            .map(|p| match config.variant {
                Some(variant) => p.with_variant(variant),
                None => p,
            }))
    }
}

/// The contents of an OCI image layout: every image it holds, by platform,
/// in index order.
#[derive(Debug, Clone, Default)]
pub struct OciLayout {
    images: Vec<(PlatformRef, OciImage)>,
}

impl OciLayout {
    /// Read a layout archive (`tar` or `tar.gz`) as written by apko or
    /// `docker buildx --output type=oci`.
    pub fn from_archive(data: &[u8]) -> Result<Self> {
        let files = if data.starts_with(&[0x1f, 0x8b]) {
            read_tar(GzDecoder::new(data))?
        } else {
            read_tar(data)?
        };
        Self::from_files(files)
    }

    /// Read a layout archive from disk.
    pub fn from_archive_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_archive(&data)
            .map_err(|e| Error::Layout(format!("{}: {}", path.display(), e)))
    }

    fn from_files(files: BTreeMap<String, Vec<u8>>) -> Result<Self> {
        let mut store = BTreeMap::new();
        for (name, data) in &files {
            if let Some(hex) = name.strip_prefix(&format!("{}/", BLOB_DIR)) {
                let computed = digest(data.as_slice());
                if computed != hex {
                    return Err(Error::Layout(format!(
                        "blob {} has digest sha256:{}",
                        name, computed
                    )));
                }
                store.insert(format!("sha256:{}", hex), Arc::new(data.clone()));
            }
        }

        let index_bytes = files
            .get("index.json")
            .ok_or_else(|| Error::Layout("archive has no index.json".to_string()))?;
        let index: ImageIndex = serde_json::from_slice(index_bytes)?;

        let mut images = Vec::new();
        collect_images(&index, &store, &mut images, 0)?;
        debug!("Read OCI layout with {} image(s)", images.len());
        Ok(Self { images })
    }

    pub fn platforms(&self) -> Vec<PlatformRef> {
        self.images.iter().map(|(p, _)| p.clone()).collect()
    }

    /// The image built for `platform`. An exact match wins; otherwise the
    /// first image whose platform satisfies the request, so `linux/arm64`
    /// finds an image recorded as `linux/arm64/v8`.
    pub fn image(&self, platform: &PlatformRef) -> Result<OciImage> {
        self.images
            .iter()
            .find(|(p, _)| p == platform)
            .or_else(|| self.images.iter().find(|(p, _)| p.satisfies(platform)))
            .map(|(_, image)| image.clone())
            .ok_or_else(|| {
                Error::Layout(format!(
                    "no image for {} (layout has {})",
                    platform,
                    self.platforms()
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

fn read_tar<R: Read>(reader: R) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut archive = Archive::new(reader);
    let mut files = BTreeMap::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type() != EntryType::Regular {
            continue;
        }
        let path = entry.path()?.to_string_lossy().into_owned();
        let path = path.trim_start_matches("./").to_string();
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        files.insert(path, data);
    }
    Ok(files)
}

fn collect_images(
    index: &ImageIndex,
    store: &BTreeMap<String, Arc<Vec<u8>>>,
    images: &mut Vec<(PlatformRef, OciImage)>,
    depth: usize,
) -> Result<()> {
    if depth > 4 {
        return Err(Error::Layout("image indexes nested too deeply".to_string()));
    }

    for entry in &index.manifests {
        let blob = store
            .get(&entry.digest)
            .ok_or_else(|| Error::Layout(format!("missing blob {}", entry.digest)))?;

        match entry.media_type.as_str() {
            media_type::OCI_INDEX | media_type::DOCKER_MANIFEST_LIST => {
                let nested: ImageIndex = serde_json::from_slice(blob)?;
                collect_images(&nested, store, images, depth + 1)?;
            }
            media_type::OCI_MANIFEST | media_type::DOCKER_MANIFEST => {
                let image = OciImage::from_store(&entry.media_type, blob.clone(), store)?;
                let platform = match &entry.platform {
                    Some(platform) if platform.os != "unknown" => {
                        Some(PlatformRef::try_from(platform)?)
                    }
                    // Attestation manifests carry unknown/unknown
                    Some(_) => None,
                    None => image.config_platform()?,
                };
                match platform {
                    Some(platform) => images.push((platform, image)),
                    None => debug!("Skipping manifest {} without platform", entry.digest),
                }
            }
            other => debug!("Skipping descriptor {} of type {}", entry.digest, other),
        }
    }
    Ok(())
}

/// Index listing `images` in order, each annotated with its platform.
fn index_for(images: &[(&PlatformRef, &OciImage)]) -> ImageIndex {
    ImageIndex::new(
        images
            .iter()
            .map(|(platform, image)| ManifestEntry {
                media_type: image.media_type().to_string(),
                size: image.size(),
                digest: image.digest().to_string(),
                platform: Some((*platform).into()),
                annotations: BTreeMap::new(),
            })
            .collect(),
    )
}

/// Every file of the layout for `images`: `oci-layout`, `index.json` and
/// the deduplicated blobs in digest order.
fn layout_files(images: &[(&PlatformRef, &OciImage)]) -> Result<Vec<(String, Arc<Vec<u8>>)>> {
    let index = serde_json::to_vec_pretty(&index_for(images))?;

    let mut blobs: BTreeMap<&str, &Arc<Vec<u8>>> = BTreeMap::new();
    for (_, image) in images {
        for (digest, data) in image.blobs() {
            blobs.insert(digest, data);
        }
    }

    let mut files = vec![
        ("oci-layout".to_string(), Arc::new(OCI_LAYOUT.to_vec())),
        ("index.json".to_string(), Arc::new(index)),
    ];
    for (digest, data) in blobs {
        files.push((blob_path(digest)?, data.clone()));
    }
    Ok(files)
}

fn header(path: &str, size: u64, entry_type: EntryType, mode: u32) -> Result<Header> {
    let mut header = Header::new_gnu();
    header.set_path(path)?;
    header.set_size(size);
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_cksum();
    Ok(header)
}

/// Write a multi-platform layout archive. The same images always produce
/// the same bytes: fixed metadata, blobs in digest order, index entries in
/// the given order. `compress` gzips the archive (mtime 0 in the header).
pub fn write_archive(images: &[(&PlatformRef, &OciImage)], compress: bool) -> Result<Vec<u8>> {
    let mut tar_data = Vec::new();
    {
        let mut tar = Builder::new(&mut tar_data);
        for dir in ["blobs/", "blobs/sha256/"] {
            let header = header(dir, 0, EntryType::Directory, 0o755)?;
            tar.append(&header, std::io::empty())?;
        }
        for (path, data) in layout_files(images)? {
            let header = header(&path, data.len() as u64, EntryType::Regular, 0o644)?;
            tar.append(&header, data.as_slice())?;
        }
        tar.finish()?;
    }

    if !compress {
        return Ok(tar_data);
    }

    let mut encoder = GzBuilder::new()
        .mtime(0)
        .write(Vec::new(), Compression::default());
    encoder.write_all(&tar_data)?;
    Ok(encoder.finish()?)
}

/// Write the same layout unpacked into `dir`.
pub fn write_dir(images: &[(&PlatformRef, &OciImage)], dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir.join(BLOB_DIR))?;
    for (path, data) in layout_files(images)? {
        std::fs::write(dir.join(path), data.as_slice())?;
    }
    Ok(())
}
