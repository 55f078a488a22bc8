//! helm: chart linting, rendering, packaging and OCI pushes.

use super::{push_flag, push_opt, wrapper, Tool};
use crate::error::{Error, Result};
use crate::runner::{args, Mount, ToolRunner, ToolSpec};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const CHART_PATH: &str = "/tmp/chart";
const DEST_PATH: &str = "/tmp/dest";

#[derive(Debug, Clone)]
pub struct Helm {
    tool: Tool,
}

wrapper!(Helm);

#[derive(Debug, Clone, Default)]
pub struct TemplateOptions {
    /// Only render these templates
    pub show_only: Vec<String>,
    pub set: Vec<String>,
    pub set_file: Vec<String>,
    pub set_json: Vec<String>,
    pub set_literal: Vec<String>,
    pub set_string: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PackageOptions {
    pub app_version: Option<String>,
    pub version: Option<String>,
    pub dependency_update: bool,
}

/// `oci://` form of a registry address
pub fn oci_address(registry: &str) -> String {
    if registry.starts_with("oci://") {
        registry.to_string()
    } else {
        format!("oci://{}", registry)
    }
}

impl Helm {
    pub fn new(runner: Arc<dyn ToolRunner>, spec: ToolSpec) -> Self {
        Self {
            tool: Tool::new(runner, spec),
        }
    }

    fn chart_spec(&self, chart: &Path) -> ToolSpec {
        self.tool
            .spec()
            .clone()
            .with_mount(Mount {
                source: chart.to_path_buf(),
                target: CHART_PATH.to_string(),
                read_only: true,
            })
            .with_workdir(CHART_PATH)
    }

    /// Verify that the chart in `chart` is well-formed
    pub async fn lint(&self, chart: &Path, strict: bool, quiet: bool) -> Result<String> {
        let mut cmd = args(["lint", "."]);
        push_flag(&mut cmd, "--strict", strict);
        push_flag(&mut cmd, "--quiet", quiet);
        Ok(self.tool.run_with(&self.chart_spec(chart), &cmd).await?.stdout)
    }

    /// Render the chart's templates
    pub async fn template(&self, chart: &Path, options: &TemplateOptions) -> Result<String> {
        let mut cmd = args(["template", "."]);
        for template in &options.show_only {
            cmd.extend(["--show-only".to_string(), template.clone()]);
        }
        let joined = [
            ("--set", &options.set),
            ("--set-file", &options.set_file),
            ("--set-json", &options.set_json),
            ("--set-literal", &options.set_literal),
            ("--set-string", &options.set_string),
        ];
        for (flag, values) in joined {
            if !values.is_empty() {
                cmd.extend([flag.to_string(), values.join(",")]);
            }
        }
        Ok(self.tool.run_with(&self.chart_spec(chart), &cmd).await?.stdout)
    }

    /// Package the chart into `dest_dir`. Returns the path of the archive.
    pub async fn package(&self, chart: &Path, dest_dir: &Path, options: &PackageOptions) -> Result<PathBuf> {
        let mut cmd = args(["package", ".", "--destination", DEST_PATH]);
        push_opt(&mut cmd, "--app-version", options.app_version.as_deref());
        push_opt(&mut cmd, "--version", options.version.as_deref());
        push_flag(&mut cmd, "--dependency-update", options.dependency_update);

        // --dependency-update writes into the chart
        let mut spec = self.chart_spec(chart).with_mounted_directory(dest_dir, DEST_PATH);
        if options.dependency_update {
            spec = spec.with_mounted_directory(chart, CHART_PATH);
        }
        self.tool.run_with(&spec, &cmd).await?;

        let mut archives: Vec<PathBuf> = std::fs::read_dir(dest_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "tgz"))
            .collect();
        archives.sort();
        archives.pop().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("helm package wrote no chart to {}", dest_dir.display()),
            ))
        })
    }

    /// Push a packaged chart to an OCI registry
    pub async fn push(&self, chart_archive: &Path, registry: &str, plain_http: bool) -> Result<String> {
        let target = "/tmp/chart.tgz";
        let mut cmd = args(["push", target]);
        cmd.push(oci_address(registry));
        push_flag(&mut cmd, "--plain-http", plain_http);

        info!("Pushing chart to {}", oci_address(registry));
        let spec = self.tool.spec().clone().with_mounted_file(chart_archive, target);
        Ok(self.tool.run_with(&spec, &cmd).await?.stdout)
    }

    /// Package the chart and push the archive
    pub async fn package_push(
        &self,
        chart: &Path,
        registry: &str,
        plain_http: bool,
        options: &PackageOptions,
    ) -> Result<String> {
        let dest = tempfile::tempdir()?;
        let archive = self.package(chart, dest.path(), options).await?;
        self.push(&archive, registry, plain_http).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{MockRunner, ToolOutput};

    fn helm(runner: Arc<MockRunner>) -> Helm {
        Helm::new(runner, ToolSpec::new("helm", "cgr.dev/chainguard/helm"))
    }

    #[test]
    fn test_oci_address() {
        assert_eq!(oci_address("ghcr.io/org/charts"), "oci://ghcr.io/org/charts");
        assert_eq!(oci_address("oci://ghcr.io/org/charts"), "oci://ghcr.io/org/charts");
    }

    #[tokio::test]
    async fn test_lint_mounts_chart() {
        let runner = Arc::new(MockRunner::new());
        helm(runner.clone())
            .lint(Path::new("/src/chart"), true, false)
            .await
            .unwrap();

        let invocation = &runner.invocations()[0];
        assert_eq!(invocation.command_line(), "lint . --strict");
        assert_eq!(invocation.spec.workdir(), Some("/tmp/chart"));
        assert!(invocation.spec.mounts()[0].read_only);
    }

    #[tokio::test]
    async fn test_template_args() {
        let runner = Arc::new(MockRunner::new());
        let options = TemplateOptions {
            show_only: vec!["templates/deployment.yaml".to_string()],
            set: vec!["image.tag=v1".to_string(), "replicas=2".to_string()],
            ..Default::default()
        };
        helm(runner.clone())
            .template(Path::new("/src/chart"), &options)
            .await
            .unwrap();

        assert_eq!(
            runner.invocations()[0].command_line(),
            "template . --show-only templates/deployment.yaml --set image.tag=v1,replicas=2"
        );
    }

    #[tokio::test]
    async fn test_package_push() {
        // Simulate helm writing the archive into the mounted destination
        let runner = Arc::new(MockRunner::with_handler(|spec, args| {
            if args[0] == "package" {
                let dest = spec
                    .mounts()
                    .iter()
                    .find(|m| m.target == "/tmp/dest")
                    .expect("destination mounted");
                std::fs::write(dest.source.join("app-1.2.3.tgz"), b"chart")?;
            }
            Ok(ToolOutput::default())
        }));

        let options = PackageOptions {
            version: Some("1.2.3".to_string()),
            ..Default::default()
        };
        helm(runner.clone())
            .package_push(Path::new("/src/chart"), "ghcr.io/org/charts", false, &options)
            .await
            .unwrap();

        let invocations = runner.invocations();
        assert_eq!(
            invocations[0].command_line(),
            "package . --destination /tmp/dest --version 1.2.3"
        );
        assert_eq!(
            invocations[1].command_line(),
            "push /tmp/chart.tgz oci://ghcr.io/org/charts"
        );
        assert!(invocations[1].spec.mounts()[0]
            .source
            .ends_with("app-1.2.3.tgz"));
    }
}
