use crate::platform::PlatformRef;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rigger")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Container runtime running the tools (docker or podman)
    #[arg(long, global = true, env = "RIGGER_RUNTIME")]
    pub runtime: Option<String>,

    /// Registry the username and password apply to
    #[arg(long, global = true, env = "RIGGER_REGISTRY", default_value = "docker.io")]
    pub registry: String,

    /// Registry username
    #[arg(long, global = true, env = "RIGGER_REGISTRY_USERNAME")]
    pub registry_username: Option<String>,

    /// Registry password or token
    #[arg(long, global = true, env = "RIGGER_REGISTRY_PASSWORD", hide_env_values = true)]
    pub registry_password: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the platforms an image is published for
    Platforms {
        /// Image reference
        image: String,
    },

    /// Build and publish images with apko
    #[command(subcommand)]
    Apko(ApkoCommands),

    /// Build images from a Dockerfile, one platform at a time
    #[command(subcommand)]
    Docker(DockerCommands),

    /// Inspect, tag and copy remote images
    #[command(subcommand)]
    Crane(CraneCommands),

    /// Scan images for vulnerabilities
    #[command(subcommand)]
    Grype(GrypeCommands),

    /// Sign, attest and copy images
    #[command(subcommand)]
    Cosign(CosignCommands),

    /// Lint, package and push Helm charts
    #[command(subcommand)]
    Helm(HelmCommands),

    /// Build apk packages
    #[command(subcommand)]
    Melange(MelangeCommands),

    /// Show version information
    Version,
}

/// Where a build goes once it is done
#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Write the OCI layout archive to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Gzip the archive
    #[arg(long, requires = "output")]
    pub compress: bool,

    /// Copy the build's SBOMs into this directory
    #[arg(long)]
    pub sbom_dir: Option<PathBuf>,

    /// Push the image under these tags; the first one is reported
    #[arg(long, value_delimiter = ',')]
    pub publish: Vec<String>,
}

/// Key material for cosign. Without a key, signing is keyless.
#[derive(Args, Debug, Clone)]
pub struct SigningArgs {
    /// Private key file
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Password of the private key
    #[arg(long, env = "COSIGN_PASSWORD", hide_env_values = true)]
    pub key_password: Option<String>,

    /// OIDC identity token for keyless signing
    #[arg(long, env = "SIGSTORE_ID_TOKEN", hide_env_values = true)]
    pub identity_token: Option<String>,

    /// OIDC provider to get the token from
    #[arg(long)]
    pub oidc_provider: Option<String>,

    /// OIDC issuer of the token
    #[arg(long)]
    pub oidc_issuer: Option<String>,
}

#[derive(Subcommand)]
pub enum ApkoCommands {
    /// Build the image without publishing it through apko
    Build {
        /// apko config file
        #[arg(short, long)]
        config: PathBuf,

        /// Directory the config's relative paths resolve against
        #[arg(long)]
        context: Option<PathBuf>,

        /// Target platforms (e.g., linux/amd64,linux/arm64)
        #[arg(long, value_delimiter = ',')]
        arch: Vec<PlatformRef>,

        /// Tag recorded in the layout
        #[arg(long, default_value = "apko-build")]
        tag: String,

        /// Extra public key to trust
        #[arg(long)]
        keyring_append: Option<PathBuf>,

        /// Extra package repository
        #[arg(long)]
        repository_append: Option<PathBuf>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Build and push the image in one apko run
    Publish {
        /// apko config file
        #[arg(short, long)]
        config: PathBuf,

        /// Directory the config's relative paths resolve against
        #[arg(long)]
        context: Option<PathBuf>,

        /// Tags to publish
        #[arg(long, required = true, value_delimiter = ',')]
        tag: Vec<String>,

        /// Target platforms (e.g., linux/amd64,linux/arm64)
        #[arg(long, value_delimiter = ',')]
        arch: Vec<PlatformRef>,

        /// Skip SBOM generation
        #[arg(long)]
        no_sbom: bool,

        /// Publish to the local docker daemon only
        #[arg(long)]
        local: bool,

        /// Ignore cached results
        #[arg(long)]
        force: bool,

        #[arg(long)]
        keyring_append: Option<PathBuf>,

        #[arg(long)]
        repository_append: Option<PathBuf>,
    },

    /// Print the resolved config
    ShowConfig {
        /// apko config file
        #[arg(short, long)]
        config: PathBuf,

        #[arg(long)]
        context: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum DockerCommands {
    /// Build a Dockerfile for every platform concurrently
    Build {
        /// Build context directory
        #[arg(long, default_value = ".")]
        context: PathBuf,

        /// Dockerfile, relative to the context
        #[arg(short = 'f', long)]
        dockerfile: Option<String>,

        /// Stage to build
        #[arg(long)]
        target: Option<String>,

        /// Target platforms (e.g., linux/amd64,linux/arm64)
        #[arg(long, value_delimiter = ',')]
        platform: Vec<PlatformRef>,

        /// Build arguments as KEY=VALUE
        #[arg(long, value_parser = parse_key_value)]
        build_arg: Vec<(String, String)>,

        /// Build secrets taken from the environment variable of the same name
        #[arg(long)]
        secret: Vec<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// List the platforms of a published image
    Platforms {
        /// Image reference
        address: String,
    },
}

#[derive(Subcommand)]
pub enum CraneCommands {
    /// Print the digest of an image
    Digest {
        image: String,

        #[arg(long)]
        platform: Option<PlatformRef>,

        /// Print the full `repo@digest` reference
        #[arg(long)]
        full_ref: bool,
    },

    /// Print the manifest of an image
    Manifest {
        image: String,

        #[arg(long)]
        platform: Option<PlatformRef>,
    },

    /// Add a tag to an image
    Tag { image: String, tag: String },

    /// Copy an image between repositories
    Copy {
        source: String,
        target: String,

        #[arg(long)]
        platform: Option<PlatformRef>,

        /// Maximum number of concurrent copies
        #[arg(long)]
        jobs: Option<u32>,

        #[arg(long)]
        all_tags: bool,

        /// Keep existing tags in the destination
        #[arg(long)]
        no_clobber: bool,
    },
}

#[derive(Subcommand)]
pub enum GrypeCommands {
    /// Scan a remote image, or a local archive when SOURCE is a file
    Scan {
        source: String,

        /// Kind of local archive (oci-archive, docker-archive, oci-dir)
        #[arg(long, default_value = "oci-archive")]
        source_type: String,

        /// Fail on vulnerabilities of this severity or worse
        #[arg(long)]
        severity_cutoff: Option<String>,

        /// Report without failing on the severity cutoff
        #[arg(long)]
        no_fail: bool,

        #[arg(long, default_value = "table")]
        output_format: String,
    },
}

#[derive(Subcommand)]
pub enum CosignCommands {
    /// Sign an image and every image in its index
    Sign {
        image: String,

        #[command(flatten)]
        signing: SigningArgs,
    },

    /// Attest the SBOMs of a published image
    Attest {
        image: String,

        /// Directory holding the SBOM files
        #[arg(long)]
        sbom_dir: PathBuf,

        /// How the SBOM files are named
        #[arg(long, value_enum, default_value_t = SbomFormat::Apko)]
        sbom_format: SbomFormat,

        #[command(flatten)]
        signing: SigningArgs,
    },

    /// Copy an image with its signatures and attestations
    Copy {
        source: String,
        destination: String,

        /// Only copy these items (sig, att, sbom)
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        #[arg(long)]
        force: bool,
    },

    /// Write cosign.key and cosign.pub
    GenerateKeyPair {
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        #[arg(long, env = "COSIGN_PASSWORD", hide_env_values = true)]
        key_password: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum HelmCommands {
    /// Check a chart for problems
    Lint {
        #[arg(default_value = ".")]
        chart: PathBuf,

        #[arg(long)]
        strict: bool,

        #[arg(long)]
        quiet: bool,
    },

    /// Render a chart's templates
    Template {
        #[arg(default_value = ".")]
        chart: PathBuf,

        /// Only render these templates
        #[arg(short, long)]
        show_only: Vec<String>,

        /// Values as KEY=VALUE
        #[arg(long)]
        set: Vec<String>,

        /// String values as KEY=VALUE
        #[arg(long)]
        set_string: Vec<String>,

        /// Values read from files as KEY=PATH
        #[arg(long)]
        set_file: Vec<String>,
    },

    /// Package a chart into an archive
    Package {
        #[arg(default_value = ".")]
        chart: PathBuf,

        #[arg(short, long, default_value = ".")]
        destination: PathBuf,

        #[arg(long)]
        version: Option<String>,

        #[arg(long)]
        app_version: Option<String>,

        #[arg(long)]
        dependency_update: bool,
    },

    /// Push a chart to an OCI registry, packaging it first if needed
    Push {
        /// Chart directory or packaged `.tgz`
        chart: PathBuf,

        /// Registry address, with or without `oci://`
        registry: String,

        #[arg(long)]
        plain_http: bool,

        #[arg(long)]
        version: Option<String>,

        #[arg(long)]
        app_version: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum MelangeCommands {
    /// Generate a package signing key pair
    Keygen {
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        #[arg(long, default_value_t = 4096)]
        key_size: u32,
    },

    /// Print the config bumped to a new version
    Bump { config: PathBuf, version: String },

    /// Build the packages of a config
    Build {
        config: PathBuf,

        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        #[arg(long)]
        signing_key: PathBuf,

        /// Bump the config to this version first
        #[arg(long)]
        version: Option<String>,

        #[arg(long)]
        source_dir: Option<PathBuf>,

        /// Target platforms (e.g., linux/amd64,linux/arm64)
        #[arg(long, value_delimiter = ',')]
        arch: Vec<PlatformRef>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SbomFormat {
    /// sbom-<apk arch>.spdx.json and sbom-index.spdx.json
    Apko,
    /// sbom-<os>-<arch>.spdx.json
    Docker,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {}", s))
}
