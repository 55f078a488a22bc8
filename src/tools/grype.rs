//! grype: vulnerability scans of images and archives.

use super::{push_opt, wrapper, Tool};
use crate::constants::{cache, path};
use crate::error::Result;
use crate::runner::{args, CacheSharing, ToolRunner, ToolSpec};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Grype {
    tool: Tool,
}

wrapper!(Grype);

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Minimum severity that fails the scan
    pub severity_cutoff: Option<String>,
    /// Set to false to report without failing on `severity_cutoff`
    pub fail: bool,
    /// Report format: table, json, sarif, cyclonedx...
    pub output_format: String,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            severity_cutoff: None,
            fail: true,
            output_format: "table".to_string(),
        }
    }
}

impl ScanOptions {
    fn args(&self) -> Vec<String> {
        let mut cmd = args(["--output", self.output_format.as_str()]);
        if self.fail {
            push_opt(&mut cmd, "--fail-on", self.severity_cutoff.as_deref());
        }
        cmd
    }
}

impl Grype {
    /// The vulnerability database is kept in a locked cache volume shared by
    /// every scan.
    pub fn new(runner: Arc<dyn ToolRunner>, spec: ToolSpec) -> Self {
        let spec = spec
            .with_env_variable("GRYPE_DB_CACHE_DIR", path::GRYPE_DB_CACHE)
            .with_mounted_cache(path::GRYPE_DB_CACHE, cache::GRYPE_DB, CacheSharing::Locked);
        Self {
            tool: Tool::new(runner, spec),
        }
    }

    /// Scan a remote image. Returns the report.
    pub async fn scan_image(&self, source: &str, options: &ScanOptions) -> Result<String> {
        let mut cmd = args([source]);
        cmd.extend(options.args());
        self.tool.stdout(&cmd).await
    }

    /// Scan a local file, e.g. an `oci-archive` or `docker-archive` tarball.
    pub async fn scan_file(&self, file: &Path, source_type: &str, options: &ScanOptions) -> Result<String> {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image.tar".to_string());
        let target = format!("/tmp/{}", name);

        let mut cmd = args([format!("{}:{}", source_type, target)]);
        cmd.extend(options.args());
        let spec = self.tool.spec().clone().with_mounted_file(file, target);
        Ok(self.tool.run_with(&spec, &cmd).await?.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockRunner;

    fn grype(runner: Arc<MockRunner>) -> Grype {
        Grype::new(runner, ToolSpec::new("grype", "cgr.dev/chainguard/grype"))
    }

    #[test]
    fn test_db_cache_is_locked() {
        let grype = grype(Arc::new(MockRunner::new()));
        let cache = &grype.tool.spec().caches()[0];
        assert_eq!(cache.volume, "GRYPE_DB_CACHE");
        assert_eq!(cache.path, "/tmp/.grype/cache");
        assert_eq!(cache.sharing, CacheSharing::Locked);
    }

    #[tokio::test]
    async fn test_scan_image_args() {
        let runner = Arc::new(MockRunner::new());
        let options = ScanOptions {
            severity_cutoff: Some("high".to_string()),
            ..Default::default()
        };

        grype(runner.clone()).scan_image("alpine:3", &options).await.unwrap();
        assert_eq!(
            runner.invocations()[0].command_line(),
            "alpine:3 --output table --fail-on high"
        );
    }

    #[tokio::test]
    async fn test_no_fail_drops_cutoff() {
        let runner = Arc::new(MockRunner::new());
        let options = ScanOptions {
            severity_cutoff: Some("high".to_string()),
            fail: false,
            output_format: "sarif".to_string(),
        };

        grype(runner.clone())
            .scan_file(Path::new("/out/image.tar"), "oci-archive", &options)
            .await
            .unwrap();

        let invocation = &runner.invocations()[0];
        assert_eq!(
            invocation.command_line(),
            "oci-archive:/tmp/image.tar --output sarif"
        );
        assert_eq!(invocation.spec.mounts()[0].target, "/tmp/image.tar");
    }
}
