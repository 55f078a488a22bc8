//! Platform identifiers for multi-arch images.
//!
//! A [`PlatformRef`] is the `os/architecture[/variant]` pair used by OCI
//! image indexes, docker `--platform` flags and the `--arch` flags of apko
//! and melange.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// An OCI platform, serialized as `os/architecture` (e.g. `linux/amd64`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlatformRef {
    os: String,
    architecture: String,
    variant: Option<String>,
}

impl PlatformRef {
    /// Create a platform from its os and architecture.
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Result<Self> {
        let os = os.into();
        let architecture = architecture.into();
        if os.is_empty() || architecture.is_empty() {
            return Err(Error::InvalidPlatform(format!("{}/{}", os, architecture)));
        }
        Ok(Self {
            os,
            architecture,
            variant: None,
        })
    }

    /// Attach a CPU variant (e.g. `v7` for `linux/arm/v7`).
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        let variant = variant.into();
        self.variant = (!variant.is_empty()).then_some(variant);
        self
    }

    pub fn os(&self) -> &str {
        &self.os
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }

    /// The platform of the machine running rigger.
    pub fn host() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let (architecture, variant) = match std::env::consts::ARCH {
            "x86_64" => ("amd64", None),
            "aarch64" => ("arm64", None),
            "x86" => ("386", None),
            "arm" => ("arm", Some("v7")),
            "powerpc64" => ("ppc64le", None),
            other => (other, None),
        };
        Self {
            os: os.to_string(),
            architecture: architecture.to_string(),
            variant: variant.map(str::to_string),
        }
    }

    /// The host's architecture on linux, the platform container builds
    /// target by default.
    pub fn linux_host() -> Self {
        Self {
            os: "linux".to_string(),
            ..Self::host()
        }
    }

    /// Whether an image built for `self` serves a request for `wanted`.
    /// A request without a variant takes any variant of its os and
    /// architecture, and `arm64/v8` is the same platform as `arm64`.
    pub fn satisfies(&self, wanted: &PlatformRef) -> bool {
        if self.os != wanted.os || self.architecture != wanted.architecture {
            return false;
        }
        match wanted.normalized_variant() {
            None => true,
            want => self.normalized_variant() == want,
        }
    }

    fn normalized_variant(&self) -> Option<&str> {
        match (self.architecture.as_str(), self.variant()) {
            ("arm64", Some("v8")) => None,
            (_, variant) => variant,
        }
    }

    /// Architecture name as understood by apk, apko and melange.
    pub fn apk_arch(&self) -> &str {
        match (self.architecture.as_str(), self.variant()) {
            ("amd64", _) => "x86_64",
            ("arm64", _) => "aarch64",
            ("arm", Some("v6")) => "armhf",
            ("arm", _) => "armv7",
            ("386", _) => "x86",
            (other, _) => other,
        }
    }

    /// Map an apk architecture (as listed in an apko config `archs`) back to
    /// a linux platform. Unknown names yield `None`.
    pub fn from_apk_arch(arch: &str) -> Option<Self> {
        let (architecture, variant) = match arch {
            "x86_64" | "amd64" => ("amd64", None),
            "aarch64" | "arm64" => ("arm64", None),
            "armv7" => ("arm", Some("v7")),
            "armhf" => ("arm", Some("v6")),
            "x86" | "386" => ("386", None),
            "ppc64le" => ("ppc64le", None),
            "s390x" => ("s390x", None),
            "riscv64" => ("riscv64", None),
            _ => return None,
        };
        Some(Self {
            os: "linux".to_string(),
            architecture: architecture.to_string(),
            variant: variant.map(str::to_string),
        })
    }
}

impl fmt::Display for PlatformRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

impl FromStr for PlatformRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        match parts.as_slice() {
            [os, arch] => Self::new(*os, *arch),
            [os, arch, variant] if !variant.is_empty() => {
                Ok(Self::new(*os, *arch)?.with_variant(*variant))
            }
            _ => Err(Error::InvalidPlatform(s.to_string())),
        }
    }
}

impl Serialize for PlatformRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PlatformRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// `--arch <architecture>` once per platform, in input order.
pub fn arch_flags(platforms: &[PlatformRef]) -> Vec<String> {
    platforms
        .iter()
        .flat_map(|p| ["--arch".to_string(), p.architecture().to_string()])
        .collect()
}

/// Reject platform lists that name the same platform twice.
pub fn ensure_unique(platforms: &[PlatformRef]) -> Result<()> {
    let mut seen = HashSet::with_capacity(platforms.len());
    for platform in platforms {
        if !seen.insert(platform) {
            return Err(Error::DuplicatePlatform(platform.clone()));
        }
    }
    Ok(())
}
