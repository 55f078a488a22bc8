//! SPDX SBOM files written next to a build.

use crate::error::{Error, Result};
use crate::platform::PlatformRef;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// How the build tool names its per-platform SBOM files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbomNaming {
    /// `sbom-<apk arch>.spdx.json`, plus `sbom-index.spdx.json`
    Apko,
    /// `sbom-<os>-<arch>.spdx.json`
    Docker,
}

/// A directory of SBOM files.
#[derive(Debug, Clone)]
pub struct Sbom {
    directory: PathBuf,
    naming: SbomNaming,
    // Keeps a temporary output directory alive as long as any clone
    _owned: Option<Arc<TempDir>>,
}

impl Sbom {
    pub fn new(directory: impl Into<PathBuf>, naming: SbomNaming) -> Self {
        Self {
            directory: directory.into(),
            naming,
            _owned: None,
        }
    }

    /// SBOMs in a temporary directory, removed when the last clone drops.
    pub fn in_tempdir(dir: TempDir, naming: SbomNaming) -> Self {
        Self {
            directory: dir.path().to_path_buf(),
            naming,
            _owned: Some(Arc::new(dir)),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn naming(&self) -> SbomNaming {
        self.naming
    }

    /// File name of the SBOM for `platform`. Without a platform, apko
    /// naming gives the index SBOM and docker naming the host's.
    pub fn file_name(&self, platform: Option<&PlatformRef>) -> String {
        match (self.naming, platform) {
            (SbomNaming::Apko, Some(platform)) => {
                format!("sbom-{}.spdx.json", platform.apk_arch())
            }
            (SbomNaming::Apko, None) => "sbom-index.spdx.json".to_string(),
            (SbomNaming::Docker, platform) => {
                let platform = platform.cloned().unwrap_or_else(PlatformRef::host);
                format!("sbom-{}.spdx.json", platform.to_string().replace('/', "-"))
            }
        }
    }

    /// Path of the SBOM for `platform`; it must exist.
    pub fn file(&self, platform: Option<&PlatformRef>) -> Result<PathBuf> {
        let path = self.directory.join(self.file_name(platform));
        if !path.is_file() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("SBOM not found: {}", path.display()),
            )));
        }
        Ok(path)
    }

    /// Copy every file of the SBOM directory into `target`.
    pub fn copy_to(&self, target: &Path) -> Result<()> {
        std::fs::create_dir_all(target)?;
        for entry in std::fs::read_dir(&self.directory)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                std::fs::copy(entry.path(), target.join(entry.file_name()))?;
            }
        }
        Ok(())
    }
}
