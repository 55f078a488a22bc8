use crate::auth::{DockerAuthEntry, RegistryCredentials};
use crate::constants::{image, user};
use crate::error::{Error, Result};
use crate::platform::PlatformRef;
use crate::runner::{Secret, ToolSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[cfg(test)]
mod tests;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "RIGGER_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Container runtime binary; docker then podman are tried when unset
    pub runtime: Option<String>,

    /// Platforms to build when a command is given none
    #[serde(default)]
    pub default_platforms: Vec<PlatformRef>,

    /// Per-tool image overrides, keyed by tool name
    #[serde(default)]
    pub tools: HashMap<String, ToolConfig>,

    /// Registry authentication configuration
    #[serde(default)]
    pub registries: HashMap<String, RegistryAuth>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub image: Option<String>,
    pub version: Option<String>,
    pub user: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryAuth {
    pub username: Option<String>,
    pub password: Option<String>,
    pub auth: Option<String>,
}

/// Built-in image and user for a tool
fn default_tool(name: &str) -> (String, &'static str) {
    match name {
        "docker" => (image::DOCKER_CLI.to_string(), user::ROOT),
        "openssl" => (image::WOLFI_BASE.to_string(), user::ROOT),
        "crane" | "cosign" | "grype" | "apko" => {
            (format!("{}/{}", image::CHAINGUARD, name), user::NONROOT)
        }
        other => (format!("{}/{}", image::CHAINGUARD, other), user::NONROOT_UID),
    }
}

impl Config {
    /// Path of the config file: `$RIGGER_CONFIG`, else
    /// `<config dir>/rigger/config.toml`
    pub fn path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join("rigger").join("config.toml"))
    }

    /// Load the config file, falling back to defaults when there is none
    pub fn load() -> Result<Self> {
        match Self::path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Config::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Base spec for the tool `name`: the configured image, version and user,
    /// with built-in defaults for anything unset
    pub fn tool(&self, name: &str) -> ToolSpec {
        let (default_image, default_user) = default_tool(name);
        let configured = self.tools.get(name).cloned().unwrap_or_default();

        let spec = ToolSpec::new(name, configured.image.unwrap_or(default_image))
            .with_user(configured.user.unwrap_or_else(|| default_user.to_string()));
        match configured.version {
            Some(version) => spec.with_version(version),
            None => spec,
        }
    }

    /// Credentials for every configured registry. Entries with neither a
    /// username/password pair nor a decodable `auth` are skipped.
    pub fn credentials(&self) -> Vec<RegistryCredentials> {
        let mut registries: Vec<_> = self.registries.iter().collect();
        registries.sort_by(|a, b| a.0.cmp(b.0));

        registries
            .into_iter()
            .filter_map(|(address, auth)| {
                let entry = DockerAuthEntry {
                    auth: auth.auth.clone(),
                    username: auth.username.clone(),
                    password: auth.password.clone(),
                    ..Default::default()
                };
                match entry.credentials() {
                    Some((username, password)) => Some(RegistryCredentials::new(
                        address.clone(),
                        username,
                        Secret::new(password),
                    )),
                    None => {
                        warn!("Ignoring incomplete credentials for {}", address);
                        None
                    }
                }
            })
            .collect()
    }
}
