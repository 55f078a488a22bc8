//! Platform detection from registry manifests
//!
//! Fetches an image's manifest with crane and lists the platforms of its
//! manifest list.

use crate::error::{Error, Result};
use crate::manifest::parse_platforms;
use crate::platform::PlatformRef;
use crate::tools::Crane;
use tracing::{debug, info};

/// Lists the platforms an image is published for
#[derive(Debug, Clone)]
pub struct PlatformResolver {
    crane: Crane,
}

impl PlatformResolver {
    pub fn new(crane: Crane) -> Self {
        Self { crane }
    }

    /// Platforms listed by the manifest of `image`, in manifest order.
    ///
    /// A single-platform image has no manifest list and yields an empty
    /// list. Every call fetches the manifest again.
    pub async fn platforms(&self, image: &str) -> Result<Vec<PlatformRef>> {
        if image.trim().is_empty() {
            return Err(Error::InvalidReference(image.to_string()));
        }

        debug!("Fetching manifest for {}", image);
        let document = self
            .crane
            .manifest(image, None)
            .await
            .map_err(|source| Error::ManifestFetch {
                image: image.to_string(),
                source: Box::new(source),
            })?;

        parse_platforms(&document).map_err(|reason| Error::ManifestParse {
            image: image.to_string(),
            reason,
        })
    }

    /// Like [`platforms`](Self::platforms), but a single-platform image
    /// counts as built for `host`
    pub async fn platforms_or_host(&self, image: &str, host: &PlatformRef) -> Result<Vec<PlatformRef>> {
        let platforms = self.platforms(image).await?;
        if platforms.is_empty() {
            info!("{} has no manifest list, assuming {}", image, host);
            return Ok(vec![host.clone()]);
        }
        let names: Vec<String> = platforms.iter().map(ToString::to_string).collect();
        info!("Detected platforms: {}", names.join(", "));
        Ok(platforms)
    }
}
