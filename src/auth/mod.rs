//! Registry authentication for the wrapped tools
//!
//! Every tool reads registry credentials from a docker `config.json`. This
//! module models that file, turns `(address, username, secret)` triples into
//! entries, and discovers the host's own config so its credentials can be
//! forwarded into tool containers.

use crate::runner::Secret;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[cfg(test)]
mod tests;

/// Key docker uses for Docker Hub credentials
const DOCKER_HUB_KEY: &str = "https://index.docker.io/v1/";

/// Registry host assumed for references without one
pub const DOCKER_HUB_HOST: &str = "index.docker.io";

/// Username and password for one registry
#[derive(Debug, Clone)]
pub struct RegistryCredentials {
    pub address: String,
    pub username: String,
    pub secret: Secret,
}

impl RegistryCredentials {
    pub fn new(address: impl Into<String>, username: impl Into<String>, secret: Secret) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            secret,
        }
    }

    /// Registry host these credentials apply to
    pub fn host(&self) -> String {
        registry_host(&self.address)
    }
}

/// Extract the registry host from an address or image reference
///
/// Handles the forms the tools accept:
/// - `ghcr.io/org/image:tag` -> `ghcr.io`
/// - `oci://registry.example.com/charts` -> `registry.example.com`
/// - `localhost:5000/image` -> `localhost:5000`
/// - `ubuntu:latest`, `user/image` -> `index.docker.io`
pub fn registry_host(address: &str) -> String {
    let without_scheme = address
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(address);

    let (first, has_path) = match without_scheme.split_once('/') {
        Some((first, _)) => (first, true),
        None => (without_scheme, false),
    };

    let looks_like_host = first.contains('.') || first == "localhost" || first.starts_with("localhost:");
    // `host:port` with a path is a registry; without a path it may be `image:tag`
    let has_port = has_path && first.contains(':');

    if looks_like_host || has_port || address.contains("://") {
        normalize_host(first.split('@').next().unwrap_or(first))
    } else {
        DOCKER_HUB_HOST.to_string()
    }
}

fn normalize_host(host: &str) -> String {
    match host {
        "docker.io" | "registry-1.docker.io" => DOCKER_HUB_HOST.to_string(),
        other => other.to_string(),
    }
}

/// Key under which docker stores credentials for `host`
fn config_key(host: &str) -> String {
    if host == DOCKER_HUB_HOST {
        DOCKER_HUB_KEY.to_string()
    } else {
        host.to_string()
    }
}

/// Docker config file structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DockerConfig {
    #[serde(default)]
    pub auths: BTreeMap<String, DockerAuthEntry>,
    #[serde(rename = "credHelpers", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cred_helpers: BTreeMap<String, String>,
    #[serde(rename = "credsStore", skip_serializing_if = "Option::is_none")]
    pub creds_store: Option<String>,
}

/// Entry in the Docker config auths section
#[derive(Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DockerAuthEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(rename = "identitytoken", skip_serializing_if = "Option::is_none")]
    pub identity_token: Option<String>,
    #[serde(rename = "registrytoken", skip_serializing_if = "Option::is_none")]
    pub registry_token: Option<String>,
}

impl fmt::Debug for DockerAuthEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerAuthEntry")
            .field("username", &self.username)
            .field("has_auth", &self.auth.is_some())
            .field("has_password", &self.password.is_some())
            .finish()
    }
}

impl DockerAuthEntry {
    /// Entry carrying basic auth for `username`/`secret`
    pub fn basic(username: &str, secret: &Secret) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", username, secret.expose()));
        Self {
            auth: Some(encoded),
            ..Default::default()
        }
    }

    /// Decode the username and password, from `auth` or the explicit fields
    pub fn credentials(&self) -> Option<(String, String)> {
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            return Some((username.clone(), password.clone()));
        }

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(self.auth.as_ref()?)
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        decoded
            .split_once(':')
            .map(|(user, pass)| (user.to_string(), pass.to_string()))
    }
}

impl DockerConfig {
    /// Parse a config file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Get paths to check for the host's Docker config
    fn config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(docker_config) = std::env::var("DOCKER_CONFIG") {
            paths.push(PathBuf::from(docker_config).join("config.json"));
        }

        if let Ok(auth_file) = std::env::var("REGISTRY_AUTH_FILE") {
            paths.push(PathBuf::from(auth_file));
        }

        if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
            paths.push(PathBuf::from(xdg_runtime).join("containers/auth.json"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".docker/config.json"));
        }

        paths
    }

    /// Load the first readable host docker config, keeping only inline
    /// credentials. Credential helpers are dropped since their binaries do
    /// not exist inside tool containers.
    pub fn discover() -> Self {
        for path in Self::config_paths() {
            if !path.exists() {
                continue;
            }
            debug!("Checking Docker config at: {}", path.display());
            match Self::load(&path) {
                Ok(config) => {
                    debug!("Loaded Docker config from: {}", path.display());
                    return config.inline_only();
                }
                Err(e) => warn!("Failed to read Docker config at {}: {}", path.display(), e),
            }
        }
        Self::default()
    }

    /// Copy without credential helpers or stores
    pub fn inline_only(&self) -> Self {
        Self {
            auths: self.auths.clone(),
            cred_helpers: BTreeMap::new(),
            creds_store: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.auths.is_empty() && self.cred_helpers.is_empty() && self.creds_store.is_none()
    }

    /// New config with `credentials` added; existing entries for the same
    /// registry are replaced
    pub fn with_credentials(&self, credentials: &RegistryCredentials) -> Self {
        let mut next = self.clone();
        next.auths.insert(
            config_key(&credentials.host()),
            DockerAuthEntry::basic(&credentials.username, &credentials.secret),
        );
        next
    }

    /// New config with the entries of `other` layered over `self`
    pub fn merged(&self, other: &DockerConfig) -> Self {
        let mut next = self.clone();
        next.auths
            .extend(other.auths.iter().map(|(k, v)| (k.clone(), v.clone())));
        next.cred_helpers
            .extend(other.cred_helpers.iter().map(|(k, v)| (k.clone(), v.clone())));
        if other.creds_store.is_some() {
            next.creds_store = other.creds_store.clone();
        }
        next
    }

    /// Find the entry for a registry, trying the spellings docker uses
    pub fn find(&self, registry: &str) -> Option<&DockerAuthEntry> {
        let host = registry_host(registry);
        let variants = if host == DOCKER_HUB_HOST {
            vec![
                DOCKER_HUB_KEY.to_string(),
                "docker.io".to_string(),
                DOCKER_HUB_HOST.to_string(),
                "https://index.docker.io/v2/".to_string(),
            ]
        } else {
            vec![
                host.clone(),
                format!("https://{}", host),
                format!("http://{}", host),
                format!("https://{}/v1/", host),
                format!("https://{}/v2/", host),
            ]
        };
        variants.iter().find_map(|v| self.auths.get(v))
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
