//! Runs tool specs with a local container runtime (docker or podman).

use super::{CacheSharing, ToolOutput, ToolRunner, ToolSpec};
use crate::constants::path;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info};

/// Runtimes looked up on `PATH`, in order.
const RUNTIMES: &[&str] = &["docker", "podman"];

/// In-process locks for cache volumes mounted with [`CacheSharing::Locked`].
#[derive(Debug, Default, Clone)]
struct CacheLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl CacheLocks {
    fn lock_for(&self, volume: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(volume.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Acquire every locked volume of `spec`, in name order so that two runs
    /// needing the same volumes cannot deadlock.
    async fn acquire(&self, spec: &ToolSpec) -> Vec<OwnedMutexGuard<()>> {
        let mut volumes: Vec<&str> = spec
            .caches()
            .iter()
            .filter(|c| c.sharing == CacheSharing::Locked)
            .map(|c| c.volume.as_str())
            .collect();
        volumes.sort_unstable();
        volumes.dedup();

        let mut guards = Vec::with_capacity(volumes.len());
        for volume in volumes {
            debug!("Waiting for cache volume lock: {}", volume);
            guards.push(self.lock_for(volume).lock_owned().await);
        }
        guards
    }
}

/// [`ToolRunner`] backed by `docker run` / `podman run`.
#[derive(Debug, Clone)]
pub struct ContainerRunner {
    runtime: PathBuf,
    locks: CacheLocks,
}

impl ContainerRunner {
    pub fn new(runtime: impl Into<PathBuf>) -> Self {
        Self {
            runtime: runtime.into(),
            locks: CacheLocks::default(),
        }
    }

    /// Locate a container runtime: `preferred` if given, else the first of
    /// docker and podman found on `PATH`.
    pub fn detect(preferred: Option<&str>) -> Result<Self> {
        let candidates: Vec<&str> = match preferred {
            Some(runtime) => vec![runtime],
            None => RUNTIMES.to_vec(),
        };

        for candidate in &candidates {
            if let Ok(path) = which::which(candidate) {
                debug!("Using container runtime: {}", path.display());
                return Ok(Self::new(path));
            }
        }

        Err(Error::Config(format!(
            "No container runtime found (tried {})",
            candidates.join(", ")
        )))
    }

    pub fn runtime(&self) -> &Path {
        &self.runtime
    }

    /// Arguments passed to the runtime for one run. Secret values are not
    /// part of them; only their names are, with the values supplied through
    /// the runtime's own environment.
    pub fn command_args(
        &self,
        spec: &ToolSpec,
        args: &[String],
        docker_config: Option<&Path>,
    ) -> Vec<String> {
        let mut cmd = vec!["run".to_string(), "--rm".to_string()];

        if let Some(user) = spec.user() {
            cmd.extend(["--user".to_string(), user.to_string()]);
        }

        if spec.is_privileged() {
            cmd.push("--privileged".to_string());
        }

        if let Some(entrypoint) = spec.entrypoint() {
            cmd.extend(["--entrypoint".to_string(), entrypoint.to_string()]);
        }

        if let Some(workdir) = spec.workdir() {
            cmd.extend(["--workdir".to_string(), workdir.to_string()]);
        }

        for (name, value) in spec.env() {
            cmd.extend(["--env".to_string(), format!("{}={}", name, value)]);
        }

        for name in spec.secrets().keys() {
            cmd.extend(["--env".to_string(), name.clone()]);
        }

        if let Some(config_dir) = docker_config {
            cmd.extend([
                "--env".to_string(),
                format!("DOCKER_CONFIG={}", path::DOCKER_CONFIG),
                "--env".to_string(),
                format!("HELM_REGISTRY_CONFIG={}/config.json", path::DOCKER_CONFIG),
                "--volume".to_string(),
                format!("{}:{}:ro", config_dir.display(), path::DOCKER_CONFIG),
            ]);
        }

        for mount in spec.mounts() {
            // a relative source would be taken for a named volume
            let source = std::path::absolute(&mount.source).unwrap_or_else(|_| mount.source.clone());
            let mut volume = format!("{}:{}", source.display(), mount.target);
            if mount.read_only {
                volume.push_str(":ro");
            }
            cmd.extend(["--volume".to_string(), volume]);
        }

        for cache in spec.caches() {
            let volume = match cache.sharing {
                CacheSharing::Private => cache.path.clone(),
                CacheSharing::Shared | CacheSharing::Locked => {
                    format!("{}:{}", cache.volume.to_lowercase(), cache.path)
                }
            };
            cmd.extend(["--volume".to_string(), volume]);
        }

        cmd.push(spec.image_ref());
        cmd.extend(args.iter().cloned());
        cmd
    }

    /// Write the spec's registry config to a private temp dir.
    fn materialize_docker_config(spec: &ToolSpec) -> Result<Option<tempfile::TempDir>> {
        if spec.registry_config().is_empty() {
            return Ok(None);
        }

        let dir = tempfile::tempdir()?;
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, spec.registry_config().to_json()?)?;

        // The container user is not the host user
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755))?;
            std::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o644))?;
        }

        Ok(Some(dir))
    }
}

#[async_trait]
impl ToolRunner for ContainerRunner {
    async fn run(&self, spec: &ToolSpec, args: &[String]) -> Result<ToolOutput> {
        let docker_config = Self::materialize_docker_config(spec)?;
        let cmd_args = self.command_args(
            spec,
            args,
            docker_config.as_ref().map(|d| d.path()),
        );

        let mut cmd = Command::new(&self.runtime);
        cmd.args(&cmd_args).kill_on_drop(true);
        for (name, secret) in spec.secrets() {
            cmd.env(name, secret.expose());
        }

        let _guards = self.locks.acquire(spec).await;

        info!("Running {} {}", spec.binary(), args.join(" "));
        debug!("Running command: {} {:?}", self.runtime.display(), cmd_args);

        let output = cmd.output().await.map_err(|source| Error::ToolSpawn {
            binary: self.runtime.display().to_string(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            error!("{} failed with status {}", spec.binary(), exit_code);
            debug!("stderr:\n{}", stderr);
            return Err(Error::ToolFailed {
                binary: spec.binary().to_string(),
                code: exit_code,
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(ToolOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}
