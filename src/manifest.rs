use crate::constants::media_type;
use crate::platform::PlatformRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// OCI Image Index (manifest list) for multi-arch support
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageIndex {
    #[serde(rename = "schemaVersion")]
    pub schema_version: i32,
    #[serde(rename = "mediaType", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub manifests: Vec<ManifestEntry>,
}

/// Descriptor for a platform-specific manifest in the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub size: i64,
    pub digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Platform information for a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// Single-platform image manifest; only the fields needed to walk blobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: i32,
    #[serde(rename = "mediaType", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub size: i64,
    pub digest: String,
}

impl ImageIndex {
    pub fn new(manifests: Vec<ManifestEntry>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(media_type::OCI_INDEX.to_string()),
            manifests,
        }
    }
}

impl From<&PlatformRef> for Platform {
    fn from(platform: &PlatformRef) -> Self {
        Self {
            architecture: platform.architecture().to_string(),
            os: platform.os().to_string(),
            variant: platform.variant().map(str::to_string),
        }
    }
}

impl TryFrom<&Platform> for PlatformRef {
    type Error = crate::Error;

    fn try_from(platform: &Platform) -> crate::Result<Self> {
        let p = PlatformRef::new(&platform.os, &platform.architecture)?;
        Ok(match &platform.variant {
            Some(variant) => p.with_variant(variant),
            None => p,
        })
    }
}

/// Extract the platforms listed by a manifest document.
///
/// A document without a `manifests` array is a single-platform image and
/// yields an empty list. Entry order is preserved and duplicates are kept.
/// Errors are plain reasons; the caller attaches the image reference.
pub fn parse_platforms(document: &str) -> Result<Vec<PlatformRef>, String> {
    let value: Value =
        serde_json::from_str(document).map_err(|e| format!("invalid JSON: {}", e))?;
    let object = value
        .as_object()
        .ok_or_else(|| "manifest is not a JSON object".to_string())?;

    let entries = match object.get("manifests") {
        None => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(_) => return Err("\"manifests\" is not an array".to_string()),
    };

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| -> Result<PlatformRef, String> {
            let platform = entry
                .get("platform")
                .and_then(Value::as_object)
                .ok_or_else(|| format!("manifests[{}] has no platform", i))?;
            let field = |name: &str| {
                platform
                    .get(name)
                    .and_then(Value::as_str)
                    .ok_or_else(|| format!("manifests[{}].platform has no {}", i, name))
            };
            let platform_ref = PlatformRef::new(field("os")?, field("architecture")?)
                .map_err(|e| format!("manifests[{}]: {}", i, e))?;
            Ok(match platform.get("variant").and_then(Value::as_str) {
                Some(variant) => platform_ref.with_variant(variant),
                None => platform_ref,
            })
        })
        .collect()
}
