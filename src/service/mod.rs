//! Service layer wiring configuration, credentials and a runner into the
//! tool wrappers, separating that from the CLI layer in main.rs.

use crate::auth::{DockerConfig, RegistryCredentials};
use crate::config::Config;
use crate::image::{ImageResult, ImageTools};
use crate::platform::PlatformRef;
use crate::resolve::PlatformResolver;
use crate::runner::{ToolRunner, ToolSpec};
use crate::tools::{Apko, Cosign, Crane, Docker, Grype, Helm, Melange};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub mod build;

pub use build::{BuildOutput, BuildService};

/// Hands out tool wrappers that share one runner and one set of registry
/// credentials.
#[derive(Clone)]
pub struct Toolbox {
    config: Config,
    runner: Arc<dyn ToolRunner>,
    docker_config: DockerConfig,
    credentials: Vec<RegistryCredentials>,
}

impl fmt::Debug for Toolbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Toolbox")
            .field("runtime", &self.config.runtime)
            .field("registries", &self.credentials.len())
            .finish()
    }
}

impl Toolbox {
    /// A toolbox with the credentials listed in `config`.
    pub fn new(config: Config, runner: Arc<dyn ToolRunner>) -> Self {
        let credentials = config.credentials();
        Self {
            config,
            runner,
            docker_config: DockerConfig::default(),
            credentials,
        }
    }

    /// Forward a host docker config into every tool.
    pub fn with_docker_config(self, docker_config: DockerConfig) -> Self {
        Self {
            docker_config,
            ..self
        }
    }

    /// Add credentials; they take precedence over the docker config.
    pub fn with_credentials(mut self, credentials: RegistryCredentials) -> Self {
        self.credentials.push(credentials);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn spec(&self, name: &str) -> ToolSpec {
        let spec = self
            .config
            .tool(name)
            .with_docker_config(&self.docker_config);
        let spec = self
            .credentials
            .iter()
            .fold(spec, |spec, creds| spec.with_registry_auth(creds));
        debug!("Using {} for {}", spec.image_ref(), name);
        spec
    }

    pub fn apko(&self) -> Apko {
        Apko::new(self.runner.clone(), self.spec("apko"))
    }

    pub fn cosign(&self) -> Cosign {
        Cosign::new(self.runner.clone(), self.spec("cosign"))
    }

    pub fn crane(&self) -> Crane {
        Crane::new(self.runner.clone(), self.spec("crane"))
    }

    pub fn docker(&self) -> Docker {
        Docker::new(self.runner.clone(), self.spec("docker"))
    }

    pub fn grype(&self) -> Grype {
        Grype::new(self.runner.clone(), self.spec("grype"))
    }

    pub fn helm(&self) -> Helm {
        Helm::new(self.runner.clone(), self.spec("helm"))
    }

    pub fn melange(&self) -> Melange {
        Melange::new(self.runner.clone(), self.spec("melange"))
    }

    pub fn image_tools(&self) -> ImageTools {
        ImageTools {
            crane: self.crane(),
            cosign: self.cosign(),
            grype: self.grype(),
        }
    }

    pub fn resolver(&self) -> PlatformResolver {
        PlatformResolver::new(self.crane())
    }

    /// An already published image
    pub fn image(&self, address: &str) -> ImageResult {
        ImageResult::new(address, self.image_tools())
    }

    /// `requested` when given, else the configured default platforms
    pub fn platforms(&self, requested: Vec<PlatformRef>) -> Vec<PlatformRef> {
        if requested.is_empty() {
            self.config.default_platforms.clone()
        } else {
            requested
        }
    }
}
