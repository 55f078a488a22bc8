//! crane: registry reads and writes without a daemon.

use super::{push_flag, push_opt, wrapper, Tool};
use crate::build::Publisher;
use crate::error::Result;
use crate::platform::PlatformRef;
use crate::runner::{args, Mount, ToolRunner, ToolSpec};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const LAYOUT_PATH: &str = "/tmp/layout";

#[derive(Debug, Clone)]
pub struct Crane {
    tool: Tool,
}

wrapper!(Crane);

#[derive(Debug, Clone, Default)]
pub struct CraneCopyOptions {
    pub platform: Option<PlatformRef>,
    /// Maximum number of concurrent copies
    pub jobs: Option<u32>,
    pub all_tags: bool,
    /// Keep existing tags in the destination
    pub no_clobber: bool,
}

impl Crane {
    pub fn new(runner: Arc<dyn ToolRunner>, spec: ToolSpec) -> Self {
        Self {
            tool: Tool::new(runner, spec),
        }
    }

    /// Raw manifest of `image` as served by the registry
    pub async fn manifest(&self, image: &str, platform: Option<&PlatformRef>) -> Result<String> {
        let mut cmd = args(["manifest", image]);
        push_opt(&mut cmd, "--platform", platform.map(ToString::to_string).as_deref());
        self.tool.stdout(&cmd).await
    }

    /// Digest of `image`, or its full `repo@digest` reference with `full_ref`.
    /// With `tarball` the digest is computed from a local image archive.
    pub async fn digest(
        &self,
        image: &str,
        platform: Option<&PlatformRef>,
        full_ref: bool,
        tarball: Option<&Path>,
    ) -> Result<String> {
        let mut cmd = args(["digest", image]);
        push_opt(&mut cmd, "--platform", platform.map(ToString::to_string).as_deref());
        push_flag(&mut cmd, "--full-ref", full_ref);

        let output = match tarball {
            Some(tarball) => {
                let name = tarball
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "image.tar".to_string());
                let target = format!("/tmp/{}", name);
                let spec = self.tool.spec().clone().with_mounted_file(tarball, &target);
                cmd.extend(["--tarball".to_string(), target]);
                self.tool.run_with(&spec, &cmd).await?
            }
            None => self.tool.run(&cmd).await?,
        };
        Ok(output.stdout.trim().to_string())
    }

    pub async fn copy(&self, source: &str, target: &str, options: &CraneCopyOptions) -> Result<String> {
        let mut cmd = args(["copy", source, target]);
        push_opt(
            &mut cmd,
            "--platform",
            options.platform.as_ref().map(ToString::to_string).as_deref(),
        );
        push_opt(&mut cmd, "--jobs", options.jobs.map(|j| j.to_string()).as_deref());
        push_flag(&mut cmd, "--all-tags", options.all_tags);
        push_flag(&mut cmd, "--no-clobber", options.no_clobber);
        self.tool.stdout(&cmd).await
    }

    /// Tag a remote image without downloading it
    pub async fn tag(&self, image: &str, tag: &str, platform: Option<&PlatformRef>) -> Result<String> {
        let mut cmd = args(["tag", image, tag]);
        push_opt(&mut cmd, "--platform", platform.map(ToString::to_string).as_deref());
        self.tool.stdout(&cmd).await
    }

    /// Push an OCI layout directory as an index. Returns the pushed
    /// reference by digest.
    pub async fn push(&self, layout_dir: &Path, tag: &str) -> Result<String> {
        let spec = self.tool.spec().clone().with_mount(Mount {
            source: layout_dir.to_path_buf(),
            target: LAYOUT_PATH.to_string(),
            read_only: true,
        });
        let cmd = args(["push", LAYOUT_PATH, tag, "--index"]);
        let output = self.tool.run_with(&spec, &cmd).await?;
        Ok(output.stdout.trim().to_string())
    }
}

#[async_trait]
impl Publisher for Crane {
    async fn publish(&self, layout_dir: &Path, tag: &str) -> Result<String> {
        info!("Pushing {}", tag);
        self.push(layout_dir, tag).await
    }
}
