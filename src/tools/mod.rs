//! Wrappers for the supply-chain CLIs.
//!
//! Each wrapper owns a [`Tool`]: the spec its binary runs with and the
//! runner that executes it. Wrappers only build argument lists and mounts;
//! what the tool writes lands in host directories mounted into its
//! container.

use crate::auth::{DockerConfig, RegistryCredentials};
use crate::error::Result;
use crate::runner::{Secret, ToolOutput, ToolRunner, ToolSpec};
use std::fmt;
use std::sync::Arc;

pub mod apko;
pub mod cosign;
pub mod crane;
pub mod docker;
pub mod grype;
pub mod helm;
pub mod melange;

pub use apko::{Apko, ApkoBuildOptions, ApkoConfig, ApkoPublishOptions};
pub use cosign::{AttestOptions, Cosign, CopyOptions, SignOptions};
pub use crane::{Crane, CraneCopyOptions};
pub use docker::{Docker, DockerBuildOptions};
pub use grype::{Grype, ScanOptions};
pub use helm::{Helm, PackageOptions, TemplateOptions};
pub use melange::{Melange, MelangeBuildOptions};

/// A wrapped binary and the runner that executes it
#[derive(Clone)]
pub struct Tool {
    runner: Arc<dyn ToolRunner>,
    spec: ToolSpec,
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool").field("spec", &self.spec).finish()
    }
}

impl Tool {
    pub fn new(runner: Arc<dyn ToolRunner>, spec: ToolSpec) -> Self {
        Self { runner, spec }
    }

    pub fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    pub fn runner(&self) -> Arc<dyn ToolRunner> {
        self.runner.clone()
    }

    /// Same runner, derived spec
    pub fn map_spec(&self, f: impl FnOnce(ToolSpec) -> ToolSpec) -> Self {
        Self {
            runner: self.runner.clone(),
            spec: f(self.spec.clone()),
        }
    }

    pub async fn run(&self, args: &[String]) -> Result<ToolOutput> {
        self.runner.run(&self.spec, args).await
    }

    /// Run with a one-off spec derived from this tool's
    pub async fn run_with(&self, spec: &ToolSpec, args: &[String]) -> Result<ToolOutput> {
        self.runner.run(spec, args).await
    }

    pub async fn stdout(&self, args: &[String]) -> Result<String> {
        Ok(self.run(args).await?.stdout)
    }
}

/// Builders every wrapper shares. Each returns a new wrapper and leaves the
/// original untouched.
pub trait Wrapper: Sized {
    fn tool(&self) -> &Tool;

    fn with_tool(self, tool: Tool) -> Self;

    fn with_registry_auth(self, credentials: &RegistryCredentials) -> Self {
        let tool = self.tool().map_spec(|s| s.with_registry_auth(credentials));
        self.with_tool(tool)
    }

    fn with_docker_config(self, config: &DockerConfig) -> Self {
        let tool = self.tool().map_spec(|s| s.with_docker_config(config));
        self.with_tool(tool)
    }

    fn with_env_variable(self, name: &str, value: &str) -> Self {
        let tool = self.tool().map_spec(|s| s.with_env_variable(name, value));
        self.with_tool(tool)
    }

    fn with_secret_variable(self, name: &str, secret: Secret) -> Self {
        let tool = self.tool().map_spec(|s| s.with_secret_variable(name, secret));
        self.with_tool(tool)
    }
}

macro_rules! wrapper {
    ($name:ident) => {
        impl $crate::tools::Wrapper for $name {
            fn tool(&self) -> &$crate::tools::Tool {
                &self.tool
            }

            fn with_tool(self, tool: $crate::tools::Tool) -> Self {
                Self { tool }
            }
        }
    };
}

pub(crate) use wrapper;

/// Push `flag value` when the value is set and non-empty
pub(crate) fn push_opt(cmd: &mut Vec<String>, flag: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        cmd.extend([flag.to_string(), value.to_string()]);
    }
}

/// Push `flag` when `enabled`
pub(crate) fn push_flag(cmd: &mut Vec<String>, flag: &str, enabled: bool) {
    if enabled {
        cmd.push(flag.to_string());
    }
}
