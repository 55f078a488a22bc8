//! What happens to a build once the tool is done: export, SBOM copy and
//! publish.

use super::Toolbox;
use crate::build::BuildResult;
use crate::error::Result;
use crate::image::ImageResult;
use std::path::PathBuf;
use tracing::{info, warn};

/// Where a build's results go
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    /// Write the layout archive here
    pub tarball: Option<PathBuf>,
    /// Gzip the archive
    pub compress: bool,
    /// Copy the build's SBOMs here
    pub sbom_dir: Option<PathBuf>,
    /// Push under these tags, in order
    pub publish: Vec<String>,
}

pub struct BuildService;

impl BuildService {
    /// Export and publish `build` as `output` asks. Returns the published
    /// image when there were tags to publish.
    pub async fn finish(
        toolbox: &Toolbox,
        build: &BuildResult,
        output: &BuildOutput,
    ) -> Result<Option<ImageResult>> {
        let platforms: Vec<String> = build
            .platforms_list()
            .iter()
            .map(ToString::to_string)
            .collect();
        info!("Built {}", platforms.join(", "));

        if let Some(path) = &output.tarball {
            std::fs::write(path, build.export_tarball(output.compress)?)?;
            info!("Wrote {}", path.display());
        }

        if let Some(dir) = &output.sbom_dir {
            match build.sbom() {
                Some(sbom) => sbom.copy_to(dir)?,
                None => warn!("Build produced no SBOM, nothing copied to {}", dir.display()),
            }
        }

        if output.publish.is_empty() {
            return Ok(None);
        }
        let image = build
            .publish(&output.publish, &toolbox.crane(), toolbox.image_tools())
            .await?;
        Ok(Some(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::PlatformVariant;
    use crate::config::Config;
    use crate::layout::{testing::fake_archive, OciLayout};
    use crate::platform::PlatformRef;
    use crate::runner::{MockRunner, ToolOutput};
    use std::sync::Arc;

    fn build() -> BuildResult {
        let amd64: PlatformRef = "linux/amd64".parse().unwrap();
        let layout = OciLayout::from_archive(&fake_archive(&["linux/amd64"])).unwrap();
        let variant = PlatformVariant::new(amd64.clone(), layout.image(&amd64).unwrap());
        BuildResult::new(Some(variant), Vec::new()).unwrap()
    }

    #[tokio::test]
    async fn test_export_only() {
        let runner = Arc::new(MockRunner::new());
        let toolbox = Toolbox::new(Config::default(), runner.clone());
        let dir = tempfile::tempdir().unwrap();
        let output = BuildOutput {
            tarball: Some(dir.path().join("image.tar.gz")),
            compress: true,
            ..Default::default()
        };

        let image = BuildService::finish(&toolbox, &build(), &output).await.unwrap();

        assert!(image.is_none());
        assert!(runner.invocations().is_empty());
        let written = std::fs::read(dir.path().join("image.tar.gz")).unwrap();
        assert_eq!(&written[..2], &[0x1f, 0x8b]);
    }

    #[tokio::test]
    async fn test_publish_through_crane() {
        let runner = Arc::new(MockRunner::with_handler(|_, args| {
            Ok(ToolOutput::stdout(format!("{}@sha256:beef\n", args[2].trim_end_matches(":1"))))
        }));
        let toolbox = Toolbox::new(Config::default(), runner.clone());
        let output = BuildOutput {
            publish: vec!["ghcr.io/org/app:1".to_string()],
            ..Default::default()
        };

        let image = BuildService::finish(&toolbox, &build(), &output)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(image.known_digest(), Some("sha256:beef"));
        assert_eq!(
            runner.invocations()[0].command_line(),
            "push /tmp/layout ghcr.io/org/app:1 --index"
        );
    }
}
