//! The result of a multi-platform build, before it is published.

use crate::assemble::{Assembled, Variant};
use crate::error::{Error, Result};
use crate::image::{ImageResult, ImageTools};
use crate::layout::{self, OciImage, OciLayout};
use crate::platform::{ensure_unique, PlatformRef};
use crate::sbom::Sbom;
use crate::tools::{Grype, ScanOptions};
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};


/// Destination for a built image layout.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Push the layout in `layout_dir` under `tag`. Returns the pushed
    /// reference, ideally `repo@sha256:...`.
    async fn publish(&self, layout_dir: &Path, tag: &str) -> Result<String>;
}

/// One platform's image within a build.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformVariant {
    pub platform: PlatformRef,
    pub image: OciImage,
}

impl PlatformVariant {
    pub fn new(platform: PlatformRef, image: OciImage) -> Self {
        Self { platform, image }
    }

    /// Select `platform` from a layout archive written by a build tool.
    pub fn from_archive(platform: PlatformRef, archive: &Path) -> Result<Self> {
        let image = OciLayout::from_archive_file(archive)?.image(&platform)?;
        Ok(Self { platform, image })
    }
}

impl Variant for PlatformVariant {
    fn platform(&self) -> &PlatformRef {
        &self.platform
    }
}

/// A built, unpublished multi-platform image.
///
/// The primary is the variant for the platform the build ran on, when that
/// platform was requested. It never appears again in `variants`.
#[derive(Debug, Clone)]
pub struct BuildResult {
    primary: Option<PlatformVariant>,
    variants: Vec<PlatformVariant>,
    sbom: Option<Sbom>,
}

impl From<Assembled<PlatformVariant>> for BuildResult {
    fn from(assembled: Assembled<PlatformVariant>) -> Self {
        Self {
            primary: assembled.primary,
            variants: assembled.variants,
            sbom: None,
        }
    }
}

impl BuildResult {
    /// Fails with [`Error::DuplicatePlatform`] when a platform, the
    /// primary's included, appears more than once.
    pub fn new(primary: Option<PlatformVariant>, variants: Vec<PlatformVariant>) -> Result<Self> {
        let build = Self {
            primary,
            variants,
            sbom: None,
        };
        ensure_unique(&build.platforms_list())?;
        Ok(build)
    }

    pub fn with_sbom(self, sbom: Sbom) -> Self {
        Self {
            sbom: Some(sbom),
            ..self
        }
    }

    pub fn primary(&self) -> Option<&PlatformVariant> {
        self.primary.as_ref()
    }

    pub fn variants(&self) -> &[PlatformVariant] {
        &self.variants
    }

    pub fn sbom(&self) -> Option<&Sbom> {
        self.sbom.as_ref()
    }

    fn all(&self) -> impl Iterator<Item = &PlatformVariant> {
        self.primary.iter().chain(self.variants.iter())
    }

    fn images(&self) -> Vec<(&PlatformRef, &OciImage)> {
        self.all().map(|v| (&v.platform, &v.image)).collect()
    }

    /// Platforms of the build: the primary's first, then the variants in
    /// the order they were requested.
    pub fn platforms_list(&self) -> Vec<PlatformRef> {
        self.all().map(|v| v.platform.clone()).collect()
    }

    /// One OCI layout archive holding every platform. Identical builds
    /// export byte-identical archives.
    pub fn export_tarball(&self, compress: bool) -> Result<Vec<u8>> {
        let images = self.images();
        if images.is_empty() {
            return Err(Error::Layout("build has no variants".to_string()));
        }
        layout::write_archive(&images, compress)
    }

    /// The same layout, unpacked into `dir`.
    pub fn write_layout(&self, dir: &Path) -> Result<()> {
        let images = self.images();
        if images.is_empty() {
            return Err(Error::Layout("build has no variants".to_string()));
        }
        layout::write_dir(&images, dir)
    }

    /// Write `image.tar` and, when the build produced one, the `sbom/`
    /// directory into `dir`.
    pub fn as_directory(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join("image.tar"), self.export_tarball(false)?)?;
        if let Some(sbom) = &self.sbom {
            sbom.copy_to(&dir.join("sbom"))?;
        }
        Ok(())
    }

    /// Scan the exported archive for vulnerabilities.
    pub async fn scan(&self, grype: &Grype, options: &ScanOptions) -> Result<String> {
        let dir = tempfile::tempdir()?;
        let tarball = dir.path().join("image.tar");
        std::fs::write(&tarball, self.export_tarball(false)?)?;
        grype.scan_file(&tarball, "oci-archive", options).await
    }

    /// Push the image under every tag, in order. The first failing tag
    /// aborts; tags pushed before it stay pushed.
    pub async fn publish(
        &self,
        tags: &[String],
        publisher: &dyn Publisher,
        tools: ImageTools,
    ) -> Result<ImageResult> {
        let first = tags
            .first()
            .ok_or_else(|| Error::InvalidReference("no tags to publish".to_string()))?;

        let dir = tempfile::tempdir()?;
        self.write_layout(dir.path())?;

        let mut pushed = Vec::with_capacity(tags.len());
        for tag in tags {
            let reference = publisher
                .publish(dir.path(), tag)
                .await
                .map_err(|source| Error::Publish {
                    tag: tag.clone(),
                    source: Box::new(source),
                })?;
            debug!("Pushed {} as {}", tag, reference);
            pushed.push(reference);
        }

        let digest = pushed
            .first()
            .and_then(|r| r.rsplit_once('@'))
            .map(|(_, digest)| digest.to_string());
        info!("Published {}", first);

        let mut image = ImageResult::new(first.clone(), tools);
        if let Some(digest) = digest {
            image = image.with_digest(digest);
        }
        if let Some(sbom) = &self.sbom {
            image = image.with_sbom(sbom.clone());
        }
        Ok(image)
    }
}
