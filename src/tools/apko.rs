//! apko: declarative apk-based images.

use super::{push_flag, wrapper, Tool};
use crate::assemble::assemble;
use crate::build::{BuildResult, PlatformVariant};
use crate::constants::{cache, path};
use crate::error::{Error, Result};
use crate::image::{ImageResult, ImageTools};
use crate::layout::OciLayout;
use crate::platform::{arch_flags, PlatformRef};
use crate::runner::{args, CacheSharing, Mount, ToolRunner, ToolSpec};
use crate::sbom::{Sbom, SbomNaming};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use yaml_rust2::{Yaml, YamlLoader};

const CONFIG_PATH: &str = "/tmp/apko.yaml";
const OUTPUT_PATH: &str = "/tmp/output";
const SBOM_PATH: &str = "/tmp/sbom";
const KEYRING_PATH: &str = "/tmp/keyring/melange.rsa.pub";
const REPOSITORY_PATH: &str = "/tmp/repository";

const ANNOTATION_PREFIX: &str = "org.opencontainers.image.";

#[derive(Debug, Clone)]
pub struct Apko {
    tool: Tool,
}

wrapper!(Apko);

#[derive(Debug, Clone)]
pub struct ApkoBuildOptions {
    /// Tag recorded in the built layout
    pub tag: String,
    /// Platforms to build; empty builds for the host
    pub platforms: Vec<PlatformRef>,
    /// Directory the config's relative paths resolve against
    pub context: Option<PathBuf>,
    /// Extra public key to trust, e.g. a melange signing key
    pub keyring_append: Option<PathBuf>,
    /// Extra local repository, e.g. melange output packages
    pub repository_append: Option<PathBuf>,
}

impl Default for ApkoBuildOptions {
    fn default() -> Self {
        Self {
            tag: "apko-build".to_string(),
            platforms: Vec::new(),
            context: None,
            keyring_append: None,
            repository_append: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApkoPublishOptions {
    pub platforms: Vec<PlatformRef>,
    pub context: Option<PathBuf>,
    pub keyring_append: Option<PathBuf>,
    pub repository_append: Option<PathBuf>,
    /// Generate SBOMs next to the published image
    pub sbom: bool,
    /// Publish to the local docker daemon only
    pub local: bool,
    /// Bypass cached results of earlier publishes
    pub force: bool,
}

impl Default for ApkoPublishOptions {
    fn default() -> Self {
        Self {
            platforms: Vec::new(),
            context: None,
            keyring_append: None,
            repository_append: None,
            sbom: true,
            local: false,
            force: false,
        }
    }
}

/// The resolved apko configuration, as printed by `apko show-config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApkoConfig {
    pub annotations: BTreeMap<String, String>,
    pub archs: Vec<String>,
}

impl ApkoConfig {
    pub fn parse(document: &str) -> Result<Self> {
        let docs = YamlLoader::load_from_str(document)
            .map_err(|e| Error::Config(format!("invalid apko config: {}", e)))?;
        let Some(doc) = docs.first() else {
            return Ok(Self::default());
        };

        let mut annotations = BTreeMap::new();
        if let Yaml::Hash(map) = &doc["annotations"] {
            for (key, value) in map {
                if let (Some(key), Some(value)) = (key.as_str(), scalar(value)) {
                    annotations.insert(key.to_string(), value);
                }
            }
        }

        let archs = match &doc["archs"] {
            Yaml::Array(items) => items.iter().filter_map(scalar).collect(),
            _ => Vec::new(),
        };

        Ok(Self { annotations, archs })
    }

    /// Value of the `org.opencontainers.image.<name>` annotation, trimmed
    pub fn annotation(&self, name: &str) -> Option<&str> {
        self.annotations
            .get(&format!("{}{}", ANNOTATION_PREFIX, name))
            .map(|v| v.trim())
    }

    pub fn authors(&self) -> Vec<String> {
        self.list("authors")
    }

    pub fn title(&self) -> Option<&str> {
        self.annotation("title")
    }

    pub fn description(&self) -> Option<&str> {
        self.annotation("description")
    }

    pub fn source(&self) -> Option<&str> {
        self.annotation("source")
    }

    pub fn version(&self) -> Option<&str> {
        self.annotation("version")
    }

    pub fn vendor(&self) -> Option<&str> {
        self.annotation("vendor")
    }

    pub fn licenses(&self) -> Vec<String> {
        self.list("licenses")
    }

    /// Platforms of the config's `archs`. Unknown architectures are skipped.
    pub fn platforms(&self) -> Vec<PlatformRef> {
        self.archs
            .iter()
            .filter_map(|arch| PlatformRef::from_apk_arch(arch))
            .collect()
    }

    fn list(&self, name: &str) -> Vec<String> {
        self.annotation(name)
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default()
    }
}

fn scalar(value: &Yaml) -> Option<String> {
    match value {
        Yaml::String(s) | Yaml::Real(s) => Some(s.clone()),
        Yaml::Integer(i) => Some(i.to_string()),
        Yaml::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

impl Apko {
    /// Packages are cached in a volume locked to one apko run at a time.
    pub fn new(runner: Arc<dyn ToolRunner>, spec: ToolSpec) -> Self {
        let spec = spec
            .with_env_variable("APKO_CACHE_DIR", path::APKO_CACHE)
            .with_mounted_cache(path::APKO_CACHE, cache::APKO, CacheSharing::Locked)
            .with_workdir(path::WORK);
        Self {
            tool: Tool::new(runner, spec),
        }
    }

    /// Spec with the config, the context and any extra keyring or
    /// repository mounted, plus the matching flags appended to `cmd`.
    fn config_spec(
        &self,
        config: &Path,
        context: Option<&Path>,
        keyring_append: Option<&Path>,
        repository_append: Option<&Path>,
        cmd: &mut Vec<String>,
    ) -> ToolSpec {
        let mut spec = self
            .tool
            .spec()
            .clone()
            .with_mounted_file(config, CONFIG_PATH);
        if let Some(context) = context {
            spec = spec.with_mount(Mount {
                source: context.to_path_buf(),
                target: path::WORK.to_string(),
                read_only: true,
            });
        }
        if let Some(keyring) = keyring_append {
            spec = spec.with_mounted_file(keyring, KEYRING_PATH);
            cmd.extend(args(["--keyring-append", KEYRING_PATH]));
        }
        if let Some(repository) = repository_append {
            spec = spec.with_mounted_file(repository, REPOSITORY_PATH);
            cmd.extend(args(["--repository-append", REPOSITORY_PATH]));
        }
        spec
    }

    /// Build the image for every requested platform in one apko run, then
    /// split the resulting layout per platform.
    pub async fn build(&self, config: &Path, options: &ApkoBuildOptions) -> Result<BuildResult> {
        let host = PlatformRef::linux_host();
        let platforms = if options.platforms.is_empty() {
            vec![host.clone()]
        } else {
            options.platforms.clone()
        };

        let output = tempfile::tempdir()?;
        let sbom = tempfile::tempdir()?;
        let tarball = format!("{}/image.tar", OUTPUT_PATH);

        let mut cmd = args([
            "build",
            CONFIG_PATH,
            options.tag.as_str(),
            tarball.as_str(),
            "--cache-dir",
            path::APKO_CACHE,
            "--sbom-path",
            SBOM_PATH,
        ]);
        let spec = self
            .config_spec(
                config,
                options.context.as_deref(),
                options.keyring_append.as_deref(),
                options.repository_append.as_deref(),
                &mut cmd,
            )
            .with_mounted_directory(output.path(), OUTPUT_PATH)
            .with_mounted_directory(sbom.path(), SBOM_PATH);
        cmd.extend(arch_flags(&platforms));

        info!("Building {} with apko", config.display());
        self.tool.run_with(&spec, &cmd).await?;

        let layout = OciLayout::from_archive_file(&output.path().join("image.tar"))?;
        debug!("apko produced {} image(s)", layout.platforms().len());

        let layout = &layout;
        let assembled = assemble(&platforms, &host, move |platform| async move {
            let image = layout.image(&platform)?;
            Ok(PlatformVariant::new(platform, image))
        })
        .await?;

        Ok(BuildResult::from(assembled).with_sbom(Sbom::in_tempdir(sbom, SbomNaming::Apko)))
    }

    /// Build and push the image under every tag in one apko run. The
    /// result is addressed by the first tag.
    pub async fn publish(
        &self,
        config: &Path,
        tags: &[String],
        options: &ApkoPublishOptions,
        tools: ImageTools,
    ) -> Result<ImageResult> {
        let first = tags
            .first()
            .ok_or_else(|| Error::InvalidReference("no tags to publish".to_string()))?;

        let sbom = tempfile::tempdir()?;
        let mut cmd = args(["publish", CONFIG_PATH]);
        cmd.extend(tags.iter().cloned());
        cmd.extend(args(["--cache-dir", path::APKO_CACHE]));

        let mut spec = self.config_spec(
            config,
            options.context.as_deref(),
            options.keyring_append.as_deref(),
            options.repository_append.as_deref(),
            &mut cmd,
        );
        if options.sbom {
            cmd.extend(args(["--sbom=true", "--sbom-path", SBOM_PATH]));
            spec = spec.with_mounted_directory(sbom.path(), SBOM_PATH);
        } else {
            cmd.push("--sbom=false".to_string());
        }
        cmd.extend(arch_flags(&options.platforms));
        push_flag(&mut cmd, "--local", options.local);
        if options.force {
            spec = spec.with_env_variable("CACHEBUSTER", chrono::Utc::now().to_rfc3339());
        }

        info!("Publishing {} as {}", config.display(), tags.join(", "));
        let output = self.tool.run_with(&spec, &cmd).await?;

        // apko prints the pushed reference (`repo@sha256:...`) last
        let digest = output
            .stdout
            .lines()
            .rev()
            .find_map(|line| line.trim().rsplit_once('@'))
            .map(|(_, digest)| digest.to_string());

        let mut image = ImageResult::new(first.clone(), tools);
        if let Some(digest) = digest {
            image = image.with_digest(digest);
        }
        if options.sbom {
            image = image.with_sbom(Sbom::in_tempdir(sbom, SbomNaming::Apko));
        }
        Ok(image)
    }

    /// The fully resolved configuration, includes and defaults applied
    pub async fn show_config(&self, config: &Path, context: Option<&Path>) -> Result<ApkoConfig> {
        let mut cmd = args(["show-config", CONFIG_PATH, "--log-level", "ERROR"]);
        let spec = self.config_spec(config, context, None, None, &mut cmd);
        let output = self.tool.run_with(&spec, &cmd).await?;
        ApkoConfig::parse(&output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::testing::fake_archive;
    use crate::runner::{MockRunner, ToolOutput};
    use crate::tools::{Cosign, Crane, Grype};

    const SHOW_CONFIG: &str = r#"
contents:
  packages:
    - wolfi-baselayout
annotations:
  org.opencontainers.image.authors: "Ops Team <ops@example.com>, Dev Team"
  org.opencontainers.image.title: " hello "
  org.opencontainers.image.licenses: Apache-2.0,MIT
  org.opencontainers.image.version: 1.2
archs:
  - x86_64
  - aarch64
  - sparc
"#;

    fn apko(runner: Arc<MockRunner>) -> Apko {
        Apko::new(runner, ToolSpec::new("apko", "cgr.dev/chainguard/apko"))
    }

    fn tools(runner: Arc<MockRunner>) -> ImageTools {
        ImageTools {
            crane: Crane::new(runner.clone(), ToolSpec::new("crane", "cgr.dev/chainguard/crane")),
            cosign: Cosign::new(runner.clone(), ToolSpec::new("cosign", "cgr.dev/chainguard/cosign")),
            grype: Grype::new(runner, ToolSpec::new("grype", "cgr.dev/chainguard/grype")),
        }
    }

    fn mounted(spec: &ToolSpec, target: &str) -> PathBuf {
        spec.mounts()
            .iter()
            .find(|m| m.target == target)
            .map(|m| m.source.clone())
            .unwrap_or_else(|| panic!("{} not mounted", target))
    }

    /// Runner that writes a layout for the requested archs plus the SBOMs
    fn building_runner() -> Arc<MockRunner> {
        Arc::new(MockRunner::with_handler(|spec, args| {
            if args[0] == "build" {
                let platforms: Vec<String> = args
                    .windows(2)
                    .filter(|w| w[0] == "--arch")
                    .map(|w| format!("linux/{}", w[1]))
                    .collect();
                let platforms: Vec<&str> = platforms.iter().map(String::as_str).collect();
                std::fs::write(
                    mounted(spec, OUTPUT_PATH).join("image.tar"),
                    fake_archive(&platforms),
                )?;
                std::fs::write(mounted(spec, SBOM_PATH).join("sbom-index.spdx.json"), "{}")?;
            }
            Ok(ToolOutput::default())
        }))
    }

    fn platform(s: &str) -> PlatformRef {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_show_config() {
        let config = ApkoConfig::parse(SHOW_CONFIG).unwrap();
        assert_eq!(config.authors(), vec!["Ops Team <ops@example.com>", "Dev Team"]);
        assert_eq!(config.title(), Some("hello"));
        assert_eq!(config.licenses(), vec!["Apache-2.0", "MIT"]);
        assert_eq!(config.version(), Some("1.2"));
        assert_eq!(config.vendor(), None);
        assert_eq!(
            config.platforms(),
            vec![platform("linux/amd64"), platform("linux/arm64")]
        );
    }

    #[test]
    fn test_parse_empty_config() {
        let config = ApkoConfig::parse("").unwrap();
        assert!(config.authors().is_empty());
        assert!(config.platforms().is_empty());
    }

    #[test]
    fn test_cache_is_locked() {
        let apko = apko(Arc::new(MockRunner::new()));
        let cache = &apko.tool.spec().caches()[0];
        assert_eq!(cache.volume, "APKO_CACHE");
        assert_eq!(cache.sharing, CacheSharing::Locked);
    }

    #[tokio::test]
    async fn test_build_one_run_for_all_platforms() {
        let runner = building_runner();
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("apko.yaml");
        std::fs::write(&config, "contents: {}\n").unwrap();

        let options = ApkoBuildOptions {
            platforms: vec![platform("linux/arm64"), platform("linux/amd64")],
            keyring_append: Some(dir.path().join("melange.rsa.pub")),
            ..Default::default()
        };
        let build = apko(runner.clone()).build(&config, &options).await.unwrap();

        let invocations = runner.invocations();
        assert_eq!(invocations.len(), 1);
        let command = invocations[0].command_line();
        assert!(command.starts_with(
            "build /tmp/apko.yaml apko-build /tmp/output/image.tar --cache-dir /tmp/apko/cache"
        ));
        assert!(command.contains("--keyring-append /tmp/keyring/melange.rsa.pub"));
        assert!(command.ends_with("--arch arm64 --arch amd64"));

        let mut platforms = build.platforms_list();
        platforms.sort();
        assert_eq!(platforms, vec![platform("linux/amd64"), platform("linux/arm64")]);

        let sbom = build.sbom().unwrap();
        assert_eq!(sbom.naming(), SbomNaming::Apko);
        assert!(sbom.file(None).is_ok());
    }

    #[tokio::test]
    async fn test_build_defaults_to_host() {
        let runner = building_runner();
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("apko.yaml");
        std::fs::write(&config, "contents: {}\n").unwrap();

        let build = apko(runner)
            .build(&config, &ApkoBuildOptions::default())
            .await
            .unwrap();

        let primary = &build.primary().unwrap().platform;
        assert_eq!(primary.os(), "linux");
        assert_eq!(primary.architecture(), PlatformRef::host().architecture());
        assert!(build.variants().is_empty());
    }

    #[tokio::test]
    async fn test_build_arm64_layout_with_v8_variant() {
        let runner = Arc::new(MockRunner::with_handler(|spec, _| {
            std::fs::write(
                mounted(spec, OUTPUT_PATH).join("image.tar"),
                fake_archive(&["linux/amd64", "linux/arm64/v8"]),
            )?;
            Ok(ToolOutput::default())
        }));
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("apko.yaml");
        std::fs::write(&config, "contents: {}\n").unwrap();

        let options = ApkoBuildOptions {
            platforms: vec![platform("linux/arm64"), platform("linux/amd64")],
            ..Default::default()
        };
        let build = apko(runner).build(&config, &options).await.unwrap();

        let mut platforms = build.platforms_list();
        platforms.sort();
        assert_eq!(platforms, vec![platform("linux/amd64"), platform("linux/arm64")]);
    }

    #[tokio::test]
    async fn test_build_missing_platform_names_it() {
        let runner = Arc::new(MockRunner::with_handler(|spec, _| {
            std::fs::write(
                mounted(spec, OUTPUT_PATH).join("image.tar"),
                fake_archive(&["linux/amd64"]),
            )?;
            Ok(ToolOutput::default())
        }));
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("apko.yaml");
        std::fs::write(&config, "contents: {}\n").unwrap();

        let options = ApkoBuildOptions {
            platforms: vec![platform("linux/amd64"), platform("linux/s390x")],
            ..Default::default()
        };
        let err = apko(runner).build(&config, &options).await.unwrap_err();
        assert!(matches!(err, Error::BuildAction { platform, .. } if platform.to_string() == "linux/s390x"));
    }

    #[tokio::test]
    async fn test_publish_args_and_digest() {
        let runner = Arc::new(MockRunner::with_handler(|_, _| {
            Ok(ToolOutput::stdout("ghcr.io/org/app@sha256:abc\n"))
        }));
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("apko.yaml");
        std::fs::write(&config, "contents: {}\n").unwrap();

        let tags = vec!["ghcr.io/org/app:1".to_string(), "ghcr.io/org/app:latest".to_string()];
        let options = ApkoPublishOptions {
            platforms: vec![platform("linux/amd64")],
            force: true,
            ..Default::default()
        };
        let image = apko(runner.clone())
            .publish(&config, &tags, &options, tools(runner.clone()))
            .await
            .unwrap();

        let invocation = &runner.invocations()[0];
        assert_eq!(
            invocation.command_line(),
            "publish /tmp/apko.yaml ghcr.io/org/app:1 ghcr.io/org/app:latest \
             --cache-dir /tmp/apko/cache --sbom=true --sbom-path /tmp/sbom --arch amd64"
        );
        assert!(invocation.spec.env().contains_key("CACHEBUSTER"));
        assert_eq!(image.address(), "ghcr.io/org/app:1");
        assert_eq!(image.known_digest(), Some("sha256:abc"));
        assert!(image.sbom().is_some());
    }

    #[tokio::test]
    async fn test_publish_without_sbom() {
        let runner = Arc::new(MockRunner::new());
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("apko.yaml");
        std::fs::write(&config, "contents: {}\n").unwrap();

        let options = ApkoPublishOptions {
            sbom: false,
            local: true,
            ..Default::default()
        };
        let image = apko(runner.clone())
            .publish(&config, &["app:dev".to_string()], &options, tools(runner.clone()))
            .await
            .unwrap();

        assert!(runner.invocations()[0]
            .command_line()
            .ends_with("--sbom=false --local"));
        assert!(image.sbom().is_none());
        assert_eq!(image.known_digest(), None);
    }

    #[tokio::test]
    async fn test_publish_needs_a_tag() {
        let runner = Arc::new(MockRunner::new());
        let err = apko(runner.clone())
            .publish(Path::new("apko.yaml"), &[], &ApkoPublishOptions::default(), tools(runner.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidReference(_)));
        assert!(runner.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_show_config() {
        let runner = Arc::new(MockRunner::with_handler(|_, _| Ok(ToolOutput::stdout(SHOW_CONFIG))));
        let config = apko(runner.clone())
            .show_config(Path::new("/src/apko.yaml"), None)
            .await
            .unwrap();

        assert_eq!(
            runner.invocations()[0].command_line(),
            "show-config /tmp/apko.yaml --log-level ERROR"
        );
        assert_eq!(config.title(), Some("hello"));
    }
}
