//! Error types for rigger operations.

use crate::platform::PlatformRef;
use thiserror::Error;

/// Errors returned by the library.
#[derive(Debug, Error)]
pub enum Error {
    /// The registry tool could not fetch a manifest (network, auth, not found).
    #[error("Failed to fetch manifest for {image}: {source}")]
    ManifestFetch {
        image: String,
        #[source]
        source: Box<Error>,
    },

    /// The manifest payload was not valid JSON or lacked expected fields.
    #[error("Failed to parse manifest for {image}: {reason}")]
    ManifestParse { image: String, reason: String },

    /// A platform build action failed.
    #[error("Build failed for platform {platform}: {source}")]
    BuildAction {
        platform: PlatformRef,
        #[source]
        source: Box<Error>,
    },

    /// Pushing the image under a tag failed.
    #[error("Failed to publish {tag}: {source}")]
    Publish {
        tag: String,
        #[source]
        source: Box<Error>,
    },

    /// A wrapped tool exited with a non-zero status.
    #[error("{binary} exited with status {code}: {stderr}")]
    ToolFailed {
        binary: String,
        code: i32,
        stderr: String,
    },

    /// A wrapped tool or the container runtime could not be started.
    #[error("Failed to start {binary}: {source}")]
    ToolSpawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid platform: {0}")]
    InvalidPlatform(String),

    #[error("Platform {0} requested more than once")]
    DuplicatePlatform(PlatformRef),

    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// An operation needed the SBOM of a build that produced none.
    #[error("No SBOM available for {0}")]
    NoSbom(String),

    /// Malformed OCI image layout or archive.
    #[error("Invalid OCI layout: {0}")]
    Layout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stderr of the failed tool invocation, if this error came from one.
    pub fn tool_stderr(&self) -> Option<&str> {
        match self {
            Error::ToolFailed { stderr, .. } => Some(stderr),
            Error::ManifestFetch { source, .. }
            | Error::BuildAction { source, .. }
            | Error::Publish { source, .. } => source.tool_stderr(),
            _ => None,
        }
    }
}

/// Result type for rigger operations.
pub type Result<T> = std::result::Result<T, Error>;
