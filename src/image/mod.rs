//! A published image and what can be done with it afterwards.
//!
//! An [`ImageResult`] is addressed by the reference it was pushed under.
//! Tagging, copying, scanning, signing and attesting all act on that
//! remote image; none of them changes which image the value refers to.

use crate::error::{Error, Result};
use crate::platform::PlatformRef;
use crate::resolve::PlatformResolver;
use crate::sbom::Sbom;
use crate::tools::{AttestOptions, Cosign, CopyOptions, Crane, Grype, ScanOptions, SignOptions};
use tracing::info;

#[cfg(test)]
mod tests;

const SBOM_PREDICATE: &str = "spdxjson";

/// Tools a published image is inspected and signed with
#[derive(Debug, Clone)]
pub struct ImageTools {
    pub crane: Crane,
    pub cosign: Cosign,
    pub grype: Grype,
}

#[derive(Debug, Clone)]
pub struct ImageResult {
    address: String,
    digest: Option<String>,
    sbom: Option<Sbom>,
    tools: ImageTools,
}

impl ImageResult {
    pub fn new(address: impl Into<String>, tools: ImageTools) -> Self {
        Self {
            address: address.into(),
            digest: None,
            sbom: None,
            tools,
        }
    }

    /// Record the digest reported when the image was pushed
    pub fn with_digest(self, digest: impl Into<String>) -> Self {
        Self {
            digest: Some(digest.into()),
            ..self
        }
    }

    pub fn with_sbom(self, sbom: Sbom) -> Self {
        Self {
            sbom: Some(sbom),
            ..self
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Digest reported at push time, without asking the registry
    pub fn known_digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// `repo@digest` built from the address and the digest known at push
    /// time, without asking the registry
    pub fn digest_reference(&self) -> Option<String> {
        let digest = self.digest.as_deref()?;
        Some(format!("{}@{}", repository(&self.address), digest))
    }

    pub fn sbom(&self) -> Option<&Sbom> {
        self.sbom.as_ref()
    }

    pub fn tools(&self) -> &ImageTools {
        &self.tools
    }

    /// Platforms in the image's manifest list
    pub async fn platforms(&self) -> Result<Vec<PlatformRef>> {
        PlatformResolver::new(self.tools.crane.clone())
            .platforms(&self.address)
            .await
    }

    /// Fully qualified `repo@sha256:...` reference
    pub async fn reference(&self) -> Result<String> {
        self.tools
            .crane
            .digest(&self.address, None, true, None)
            .await
    }

    /// Digest of the index, or of one platform's image
    pub async fn digest(&self, platform: Option<&PlatformRef>) -> Result<String> {
        self.tools
            .crane
            .digest(&self.address, platform, false, None)
            .await
    }

    /// Registry host the image lives in
    pub async fn registry(&self) -> Result<String> {
        let reference = self.reference().await?;
        Ok(netloc(&reference).to_string())
    }

    pub async fn tag(&self, tag: &str) -> Result<String> {
        self.tools.crane.tag(&self.address, tag, None).await
    }

    pub async fn with_tag(self, tag: &str) -> Result<Self> {
        self.tag(tag).await?;
        Ok(self)
    }

    /// Copy the image, signatures and attestations included, to `target`
    pub async fn copy(&self, target: &str) -> Result<String> {
        let options = CopyOptions {
            force: true,
            ..Default::default()
        };
        info!("Copying {} to {}", self.address, target);
        self.tools.cosign.copy(&self.address, target, &options).await
    }

    pub async fn with_copy(self, target: &str) -> Result<Self> {
        self.copy(target).await?;
        Ok(self)
    }

    pub async fn scan(&self, options: &ScanOptions) -> Result<String> {
        self.tools.grype.scan_image(&self.address, options).await
    }

    pub async fn with_scan(self, options: &ScanOptions) -> Result<Self> {
        self.scan(options).await?;
        Ok(self)
    }

    /// Sign the index and every image in it
    pub async fn sign(&self, options: &SignOptions) -> Result<String> {
        let reference = self.reference().await?;
        let options = SignOptions {
            recursive: true,
            ..options.clone()
        };
        info!("Signing {}", reference);
        self.tools.cosign.sign(&reference, &options).await
    }

    pub async fn with_sign(self, options: &SignOptions) -> Result<Self> {
        self.sign(options).await?;
        Ok(self)
    }

    /// Attest the SBOM of every platform, then the index SBOM. Returns the
    /// output of the last attestation.
    pub async fn attest(&self, options: &SignOptions) -> Result<String> {
        let sbom = self
            .sbom
            .as_ref()
            .ok_or_else(|| Error::NoSbom(self.address.clone()))?;
        let reference = self.reference().await?;
        let options = AttestOptions {
            predicate_type: Some(SBOM_PREDICATE.to_string()),
            signing: options.clone(),
        };

        for platform in self.platforms().await? {
            let predicate = sbom.file(Some(&platform))?;
            info!("Attesting {} SBOM of {}", platform, reference);
            self.tools
                .cosign
                .attest(&reference, &predicate, &options)
                .await?;
        }

        let predicate = sbom.file(None)?;
        info!("Attesting index SBOM of {}", reference);
        self.tools.cosign.attest(&reference, &predicate, &options).await
    }

    pub async fn with_attest(self, options: &SignOptions) -> Result<Self> {
        self.attest(options).await?;
        Ok(self)
    }
}

/// Reference without its tag or digest
fn repository(address: &str) -> &str {
    let address = address.split('@').next().unwrap_or(address);
    match address.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => repo,
        _ => address,
    }
}

/// Host part of a reference: everything before the first `/`
fn netloc(reference: &str) -> &str {
    reference.split('/').next().unwrap_or(reference)
}
