//! melange: apk package builds.

use super::{wrapper, Tool};
use crate::constants::{cache, image, path, user};
use crate::error::Result;
use crate::platform::{arch_flags, PlatformRef};
use crate::runner::{args, CacheSharing, ToolRunner, ToolSpec};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const CONFIG_FILE: &str = "melange.yaml";
const SOURCE_PATH: &str = "/tmp/source";
const PACKAGES_PATH: &str = "/work/packages";
const PUBLIC_KEY_FILE: &str = "melange.rsa.pub";

#[derive(Debug, Clone)]
pub struct Melange {
    tool: Tool,
}

wrapper!(Melange);

#[derive(Debug, Clone)]
pub struct MelangeBuildOptions {
    /// Bump the config to this version before building
    pub version: Option<String>,
    /// Directory holding sources the pipeline includes
    pub source_dir: Option<PathBuf>,
    /// RSA key the packages are signed with
    pub signing_key: PathBuf,
    pub platforms: Vec<PlatformRef>,
}

impl Melange {
    pub fn new(runner: Arc<dyn ToolRunner>, spec: ToolSpec) -> Self {
        let spec = spec
            .with_env_variable("MELANGE_CACHE_DIR", path::MELANGE_CACHE)
            .with_env_variable("MELANGE_APK_CACHE_DIR", path::MELANGE_APK_CACHE)
            .with_mounted_cache(path::MELANGE_CACHE, cache::MELANGE, CacheSharing::Shared)
            .with_mounted_cache(path::MELANGE_APK_CACHE, cache::MELANGE_APK, CacheSharing::Shared)
            .with_workdir(path::WORK);
        Self {
            tool: Tool::new(runner, spec),
        }
    }

    fn in_workspace(&self, workspace: &Path) -> ToolSpec {
        self.tool
            .spec()
            .clone()
            .with_mounted_directory(workspace, path::WORK)
    }

    /// Generate `melange.rsa` and `melange.rsa.pub` in `out_dir`
    pub async fn keygen(&self, out_dir: &Path, key_size: u32) -> Result<()> {
        let cmd = args(["keygen", "--key-size", key_size.to_string().as_str(), "melange.rsa"]);
        self.tool.run_with(&self.in_workspace(out_dir), &cmd).await?;
        Ok(())
    }

    /// Bump `config` to `version`. Returns the updated config; the file
    /// itself is left untouched.
    pub async fn bump(&self, config: &Path, version: &str) -> Result<String> {
        let workspace = tempfile::tempdir()?;
        std::fs::copy(config, workspace.path().join(CONFIG_FILE))?;

        let cmd = args(["bump", CONFIG_FILE, version]);
        self.tool
            .run_with(&self.in_workspace(workspace.path()), &cmd)
            .await?;
        Ok(std::fs::read_to_string(workspace.path().join(CONFIG_FILE))?)
    }

    /// Public half of an RSA signing key, in PEM form
    pub async fn public_key(&self, signing_key: &Path) -> Result<String> {
        let spec = ToolSpec::new("openssl", image::WOLFI_BASE)
            .with_user(user::ROOT)
            .with_entrypoint("/bin/sh")
            .with_docker_config(self.tool.spec().registry_config())
            .with_mounted_file(signing_key, path::MELANGE_SIGNING_KEY);
        let script = format!(
            "apk add --no-cache openssl >/dev/null && openssl rsa -in {} -pubout",
            path::MELANGE_SIGNING_KEY
        );
        Ok(self.tool.run_with(&spec, &args(["-c".to_string(), script])).await?.stdout)
    }

    /// Build the packages of `config` into `out_dir/packages`, signed with
    /// the given key. The public key lands next to them as
    /// `melange.rsa.pub`. Returns the packages directory.
    pub async fn build(&self, config: &Path, out_dir: &Path, options: &MelangeBuildOptions) -> Result<PathBuf> {
        let workspace = tempfile::tempdir()?;
        std::fs::copy(config, workspace.path().join(CONFIG_FILE))?;
        let packages = out_dir.join("packages");
        std::fs::create_dir_all(&packages)?;

        if let Some(version) = &options.version {
            let cmd = args(["bump", CONFIG_FILE, version.as_str()]);
            self.tool
                .run_with(&self.in_workspace(workspace.path()), &cmd)
                .await?;
        }

        let mut cmd = args([
            "build",
            CONFIG_FILE,
            "--signing-key",
            path::MELANGE_SIGNING_KEY,
            "--apk-cache-dir",
            path::MELANGE_APK_CACHE,
            "--cache-dir",
            path::MELANGE_CACHE,
            "--out-dir",
            PACKAGES_PATH,
        ]);

        let mut spec = self
            .in_workspace(workspace.path())
            .with_mounted_directory(&packages, PACKAGES_PATH)
            .with_mounted_file(&options.signing_key, path::MELANGE_SIGNING_KEY)
            .with_user(user::ROOT)
            .privileged();

        if let Some(source_dir) = &options.source_dir {
            spec = spec.with_mounted_file(source_dir, SOURCE_PATH);
            cmd.extend(["--source-dir".to_string(), SOURCE_PATH.to_string()]);
        }
        cmd.extend(arch_flags(&options.platforms));

        info!("Building packages from {}", config.display());
        self.tool.run_with(&spec, &cmd).await?;

        let public_key = self.public_key(&options.signing_key).await?;
        std::fs::write(packages.join(PUBLIC_KEY_FILE), public_key)?;
        Ok(packages)
    }
}
