//! docker: Dockerfile builds through buildx, one per platform.

use super::{push_opt, wrapper, Tool};
use crate::assemble::assemble;
use crate::build::{BuildResult, PlatformVariant};
use crate::constants::path;
use crate::error::{Error, Result};
use crate::manifest::parse_platforms;
use crate::platform::PlatformRef;
use crate::runner::{args, Mount, Secret, ToolRunner, ToolSpec};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const DOCKER_SOCKET: &str = "/var/run/docker.sock";
const OUTPUT_PATH: &str = "/tmp/out";

#[derive(Debug, Clone)]
pub struct Docker {
    tool: Tool,
}

wrapper!(Docker);

#[derive(Debug, Clone, Default)]
pub struct DockerBuildOptions {
    /// Dockerfile path relative to the context
    pub dockerfile: Option<String>,
    /// Stage to build
    pub target: Option<String>,
    /// Platforms to build; empty builds for the host
    pub platforms: Vec<PlatformRef>,
    pub build_args: BTreeMap<String, String>,
    /// Build secrets, exposed to `RUN --mount=type=secret,id=<name>`
    pub secrets: BTreeMap<String, Secret>,
}

impl Docker {
    /// Builds go through the host daemon's socket.
    pub fn new(runner: Arc<dyn ToolRunner>, spec: ToolSpec) -> Self {
        let spec = spec.with_mounted_directory(DOCKER_SOCKET, DOCKER_SOCKET);
        Self {
            tool: Tool::new(runner, spec),
        }
    }

    /// Build `context` once per platform, concurrently. Each build exports
    /// an OCI layout that is loaded as that platform's variant.
    pub async fn build(&self, context: &Path, options: &DockerBuildOptions) -> Result<BuildResult> {
        let host = PlatformRef::linux_host();
        info!("Building {} with docker", context.display());

        let assembled = assemble(&options.platforms, &host, move |platform| {
            self.build_platform(context, platform, options)
        })
        .await?;
        Ok(BuildResult::from(assembled))
    }

    async fn build_platform(
        &self,
        context: &Path,
        platform: PlatformRef,
        options: &DockerBuildOptions,
    ) -> Result<PlatformVariant> {
        let output = tempfile::tempdir()?;
        let dest = format!("type=oci,dest={}/image.tar", OUTPUT_PATH);
        let mut cmd = args(["buildx", "build", "--platform"]);
        cmd.push(platform.to_string());
        cmd.extend(["--output".to_string(), dest]);
        push_opt(
            &mut cmd,
            "--file",
            options
                .dockerfile
                .as_ref()
                .map(|f| format!("{}/{}", path::WORK, f))
                .as_deref(),
        );
        push_opt(&mut cmd, "--target", options.target.as_deref());
        for (name, value) in &options.build_args {
            cmd.extend(["--build-arg".to_string(), format!("{}={}", name, value)]);
        }

        let mut spec = self
            .tool
            .spec()
            .clone()
            .with_mount(Mount {
                source: context.to_path_buf(),
                target: path::WORK.to_string(),
                read_only: true,
            })
            .with_mounted_directory(output.path(), OUTPUT_PATH);
        for (name, secret) in &options.secrets {
            cmd.extend(["--secret".to_string(), format!("id={},env={}", name, name)]);
            spec = spec.with_secret_variable(name, secret.clone());
        }
        cmd.push(path::WORK.to_string());

        self.tool.run_with(&spec, &cmd).await?;
        PlatformVariant::from_archive(platform, &output.path().join("image.tar"))
    }

    /// Platforms of a published image, read with `docker manifest inspect`
    pub async fn platforms(&self, address: &str) -> Result<Vec<PlatformRef>> {
        let document = self
            .tool
            .stdout(&args(["manifest", "inspect", address]))
            .await
            .map_err(|source| Error::ManifestFetch {
                image: address.to_string(),
                source: Box::new(source),
            })?;
        parse_platforms(&document).map_err(|reason| Error::ManifestParse {
            image: address.to_string(),
            reason,
        })
    }
}
