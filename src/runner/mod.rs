//! Execution of the wrapped tools inside containers.
//!
//! A [`ToolSpec`] describes how one binary runs: image, user, mounts, caches,
//! environment and secrets. Specs are values; every `with_*` call returns a
//! new spec, so two callers deriving from the same base never see each
//! other's changes. A [`ToolRunner`] executes a spec with an argument list.

use crate::auth::{DockerConfig, RegistryCredentials};
use crate::constants::tag;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

mod container;
#[cfg(any(test, feature = "testing"))]
mod mock;


pub use container::ContainerRunner;
#[cfg(any(test, feature = "testing"))]
pub use mock::{Invocation, MockRunner};

/// How concurrent runs share a cache volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSharing {
    /// Any number of concurrent writers.
    Shared,
    /// At most one run uses the volume at a time.
    Locked,
    /// Every run gets its own throwaway volume.
    Private,
}

/// A named cache volume mounted into the tool container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMount {
    pub volume: String,
    pub path: String,
    pub sharing: CacheSharing,
}

/// A host file or directory mounted into the tool container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

/// A secret value. Never printed by `Debug` or `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Everything needed to run one tool binary in a container.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    binary: String,
    image: String,
    version: String,
    user: Option<String>,
    entrypoint: Option<String>,
    workdir: Option<String>,
    env: BTreeMap<String, String>,
    secrets: BTreeMap<String, Secret>,
    mounts: Vec<Mount>,
    caches: Vec<CacheMount>,
    registry_config: DockerConfig,
    privileged: bool,
}

impl ToolSpec {
    /// A spec for `binary` running from `image`.
    pub fn new(binary: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            image: image.into(),
            version: tag::DEFAULT.to_string(),
            user: None,
            entrypoint: None,
            workdir: None,
            env: BTreeMap::new(),
            secrets: BTreeMap::new(),
            mounts: Vec::new(),
            caches: Vec::new(),
            registry_config: DockerConfig::default(),
            privileged: false,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = Some(entrypoint.into());
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn with_env_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn with_secret_variable(mut self, name: impl Into<String>, secret: Secret) -> Self {
        self.secrets.insert(name.into(), secret);
        self
    }

    pub fn with_mounted_file(self, source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        self.with_mount(Mount {
            source: source.into(),
            target: target.into(),
            read_only: true,
        })
    }

    pub fn with_mounted_directory(
        self,
        source: impl Into<PathBuf>,
        target: impl Into<String>,
    ) -> Self {
        self.with_mount(Mount {
            source: source.into(),
            target: target.into(),
            read_only: false,
        })
    }

    pub fn with_mount(mut self, mount: Mount) -> Self {
        self.mounts.retain(|m| m.target != mount.target);
        self.mounts.push(mount);
        self
    }

    pub fn with_mounted_cache(
        mut self,
        path: impl Into<String>,
        volume: impl Into<String>,
        sharing: CacheSharing,
    ) -> Self {
        let path = path.into();
        self.caches.retain(|c| c.path != path);
        self.caches.push(CacheMount {
            volume: volume.into(),
            path,
            sharing,
        });
        self
    }

    /// Merge an existing docker config (e.g. one read from the host).
    pub fn with_docker_config(mut self, config: &DockerConfig) -> Self {
        self.registry_config = self.registry_config.merged(config);
        self
    }

    /// Credentials the tool will find in its docker `config.json`.
    pub fn with_registry_auth(mut self, credentials: &RegistryCredentials) -> Self {
        self.registry_config = self.registry_config.with_credentials(credentials);
        self
    }

    /// Run with root privileges and all capabilities.
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// The image to run: `image` itself when it already names a tag or
    /// digest, else `image:version`.
    pub fn image_ref(&self) -> String {
        let last = self.image.rsplit('/').next().unwrap_or(&self.image);
        if self.image.contains('@') || last.contains(':') {
            self.image.clone()
        } else {
            format!("{}:{}", self.image, self.version)
        }
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn entrypoint(&self) -> Option<&str> {
        self.entrypoint.as_deref()
    }

    pub fn workdir(&self) -> Option<&str> {
        self.workdir.as_deref()
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn secrets(&self) -> &BTreeMap<String, Secret> {
        &self.secrets
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    pub fn caches(&self) -> &[CacheMount] {
        &self.caches
    }

    pub fn registry_config(&self) -> &DockerConfig {
        &self.registry_config
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }
}

/// Captured result of one successful tool run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ToolOutput {
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }
}

/// Executes tool specs.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run the tool with `args`. A non-zero exit is an error.
    async fn run(&self, spec: &ToolSpec, args: &[String]) -> Result<ToolOutput>;
}

/// Build an argument vector from string-ish parts.
pub fn args<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}
