use anyhow::{bail, Context, Result};
use clap::Parser;
use rigger::{
    auth::{DockerConfig, RegistryCredentials},
    cli::{
        ApkoCommands, Cli, Commands, CosignCommands, CraneCommands, DockerCommands,
        GrypeCommands, HelmCommands, MelangeCommands, OutputArgs, SbomFormat, SigningArgs,
    },
    config::Config,
    image::ImageResult,
    platform::PlatformRef,
    runner::{ContainerRunner, Secret},
    sbom::{Sbom, SbomNaming},
    service::{BuildOutput, BuildService, Toolbox},
    tools::{
        ApkoBuildOptions, ApkoPublishOptions, CopyOptions, CraneCopyOptions, DockerBuildOptions,
        MelangeBuildOptions, PackageOptions, ScanOptions, SignOptions, TemplateOptions,
    },
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging to stderr
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let command = match cli.command {
        Commands::Version => {
            println!("rigger {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        command => command,
    };

    let credentials = match (cli.registry_username, cli.registry_password) {
        (Some(username), Some(password)) => Some(RegistryCredentials::new(
            cli.registry,
            username,
            Secret::new(password),
        )),
        (Some(_), None) => bail!("--registry-username needs --registry-password"),
        _ => None,
    };
    let toolbox = toolbox(cli.runtime.as_deref(), credentials)?;

    match command {
        Commands::Platforms { image } => {
            let host = PlatformRef::linux_host();
            for platform in toolbox.resolver().platforms_or_host(&image, &host).await? {
                println!("{}", platform);
            }
        }
        Commands::Apko(command) => apko(&toolbox, command).await?,
        Commands::Docker(command) => docker(&toolbox, command).await?,
        Commands::Crane(command) => crane(&toolbox, command).await?,
        Commands::Grype(command) => grype(&toolbox, command).await?,
        Commands::Cosign(command) => cosign(&toolbox, command).await?,
        Commands::Helm(command) => helm(&toolbox, command).await?,
        Commands::Melange(command) => melange(&toolbox, command).await?,
        Commands::Version => {}
    }

    Ok(())
}

/// Runner, config and registry credentials shared by every command
fn toolbox(runtime: Option<&str>, credentials: Option<RegistryCredentials>) -> Result<Toolbox> {
    let config = Config::load().context("Failed to load config")?;
    let runtime = runtime.or(config.runtime.as_deref());
    let runner = ContainerRunner::detect(runtime)?;
    info!("Running tools with {}", runner.runtime().display());

    let toolbox = Toolbox::new(config, Arc::new(runner)).with_docker_config(DockerConfig::discover());
    Ok(match credentials {
        Some(credentials) => toolbox.with_credentials(credentials),
        None => toolbox,
    })
}

fn build_output(args: OutputArgs) -> BuildOutput {
    BuildOutput {
        tarball: args.output,
        compress: args.compress,
        sbom_dir: args.sbom_dir,
        publish: args.publish,
    }
}

/// Print the published reference, by digest when it is known
fn print_published(image: &ImageResult) {
    match image.digest_reference() {
        Some(reference) => println!("{}", reference),
        None => println!("{}", image.address()),
    }
}

fn sign_options(args: SigningArgs) -> Result<SignOptions> {
    let private_key = match &args.key {
        Some(path) => Some(Secret::new(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read key {}", path.display()))?,
        )),
        None => None,
    };
    Ok(SignOptions {
        private_key,
        password: args.key_password.map(Secret::new),
        identity_token: args.identity_token.map(Secret::new),
        oidc_provider: args.oidc_provider,
        oidc_issuer: args.oidc_issuer,
        recursive: false,
    })
}

async fn apko(toolbox: &Toolbox, command: ApkoCommands) -> Result<()> {
    let apko = toolbox.apko();
    match command {
        ApkoCommands::Build {
            config,
            context,
            arch,
            tag,
            keyring_append,
            repository_append,
            output,
        } => {
            let options = ApkoBuildOptions {
                tag,
                platforms: toolbox.platforms(arch),
                context,
                keyring_append,
                repository_append,
            };
            let build = apko.build(&config, &options).await?;
            if let Some(image) = BuildService::finish(toolbox, &build, &build_output(output)).await? {
                print_published(&image);
            }
        }
        ApkoCommands::Publish {
            config,
            context,
            tag,
            arch,
            no_sbom,
            local,
            force,
            keyring_append,
            repository_append,
        } => {
            let options = ApkoPublishOptions {
                platforms: toolbox.platforms(arch),
                context,
                keyring_append,
                repository_append,
                sbom: !no_sbom,
                local,
                force,
            };
            let image = apko
                .publish(&config, &tag, &options, toolbox.image_tools())
                .await?;
            print_published(&image);
        }
        ApkoCommands::ShowConfig { config, context } => {
            let resolved = apko.show_config(&config, context.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&resolved)?);
        }
    }
    Ok(())
}

async fn docker(toolbox: &Toolbox, command: DockerCommands) -> Result<()> {
    let docker = toolbox.docker();
    match command {
        DockerCommands::Build {
            context,
            dockerfile,
            target,
            platform,
            build_arg,
            secret,
            output,
        } => {
            let mut secrets = std::collections::BTreeMap::new();
            for name in secret {
                let value = std::env::var(&name)
                    .with_context(|| format!("Build secret {} is not set in the environment", name))?;
                secrets.insert(name, Secret::new(value));
            }
            let options = DockerBuildOptions {
                dockerfile,
                target,
                platforms: toolbox.platforms(platform),
                build_args: build_arg.into_iter().collect(),
                secrets,
            };
            let build = docker.build(&context, &options).await?;
            if let Some(image) = BuildService::finish(toolbox, &build, &build_output(output)).await? {
                print_published(&image);
            }
        }
        DockerCommands::Platforms { address } => {
            for platform in docker.platforms(&address).await? {
                println!("{}", platform);
            }
        }
    }
    Ok(())
}

async fn crane(toolbox: &Toolbox, command: CraneCommands) -> Result<()> {
    let crane = toolbox.crane();
    match command {
        CraneCommands::Digest {
            image,
            platform,
            full_ref,
        } => {
            println!("{}", crane.digest(&image, platform.as_ref(), full_ref, None).await?);
        }
        CraneCommands::Manifest { image, platform } => {
            println!("{}", crane.manifest(&image, platform.as_ref()).await?.trim_end());
        }
        CraneCommands::Tag { image, tag } => {
            crane.tag(&image, &tag, None).await?;
            info!("Tagged {} as {}", image, tag);
        }
        CraneCommands::Copy {
            source,
            target,
            platform,
            jobs,
            all_tags,
            no_clobber,
        } => {
            let options = CraneCopyOptions {
                platform,
                jobs,
                all_tags,
                no_clobber,
            };
            crane.copy(&source, &target, &options).await?;
            info!("Copied {} to {}", source, target);
        }
    }
    Ok(())
}

async fn grype(toolbox: &Toolbox, command: GrypeCommands) -> Result<()> {
    let grype = toolbox.grype();
    match command {
        GrypeCommands::Scan {
            source,
            source_type,
            severity_cutoff,
            no_fail,
            output_format,
        } => {
            let options = ScanOptions {
                severity_cutoff,
                fail: !no_fail,
                output_format,
            };
            let local = Path::new(&source);
            let report = if local.is_file() {
                grype.scan_file(local, &source_type, &options).await?
            } else {
                grype.scan_image(&source, &options).await?
            };
            print!("{}", report);
        }
    }
    Ok(())
}

async fn cosign(toolbox: &Toolbox, command: CosignCommands) -> Result<()> {
    match command {
        CosignCommands::Sign { image, signing } => {
            let image = toolbox.image(&image);
            image.sign(&sign_options(signing)?).await?;
            info!("Signed {}", image.address());
        }
        CosignCommands::Attest {
            image,
            sbom_dir,
            sbom_format,
            signing,
        } => {
            let naming = match sbom_format {
                SbomFormat::Apko => SbomNaming::Apko,
                SbomFormat::Docker => SbomNaming::Docker,
            };
            let image = toolbox.image(&image).with_sbom(Sbom::new(sbom_dir, naming));
            image.attest(&sign_options(signing)?).await?;
            info!("Attested {}", image.address());
        }
        CosignCommands::Copy {
            source,
            destination,
            only,
            force,
        } => {
            let options = CopyOptions {
                only,
                force,
                ..Default::default()
            };
            toolbox.cosign().copy(&source, &destination, &options).await?;
            info!("Copied {} to {}", source, destination);
        }
        CosignCommands::GenerateKeyPair {
            out_dir,
            key_password,
        } => {
            let password = key_password.map(Secret::new);
            toolbox
                .cosign()
                .generate_key_pair(password.as_ref(), &out_dir)
                .await?;
            info!("Wrote cosign.key and cosign.pub to {}", out_dir.display());
        }
    }
    Ok(())
}

async fn helm(toolbox: &Toolbox, command: HelmCommands) -> Result<()> {
    let helm = toolbox.helm();
    match command {
        HelmCommands::Lint {
            chart,
            strict,
            quiet,
        } => {
            print!("{}", helm.lint(&chart, strict, quiet).await?);
        }
        HelmCommands::Template {
            chart,
            show_only,
            set,
            set_string,
            set_file,
        } => {
            let options = TemplateOptions {
                show_only,
                set,
                set_string,
                set_file,
                ..Default::default()
            };
            print!("{}", helm.template(&chart, &options).await?);
        }
        HelmCommands::Package {
            chart,
            destination,
            version,
            app_version,
            dependency_update,
        } => {
            let options = PackageOptions {
                app_version,
                version,
                dependency_update,
            };
            let archive = helm.package(&chart, &destination, &options).await?;
            println!("{}", archive.display());
        }
        HelmCommands::Push {
            chart,
            registry,
            plain_http,
            version,
            app_version,
        } => {
            let output = if chart.is_dir() {
                let options = PackageOptions {
                    app_version,
                    version,
                    dependency_update: false,
                };
                helm.package_push(&chart, &registry, plain_http, &options).await?
            } else {
                helm.push(&chart, &registry, plain_http).await?
            };
            print!("{}", output);
        }
    }
    Ok(())
}

async fn melange(toolbox: &Toolbox, command: MelangeCommands) -> Result<()> {
    let melange = toolbox.melange();
    match command {
        MelangeCommands::Keygen { out_dir, key_size } => {
            melange.keygen(&out_dir, key_size).await?;
            info!("Wrote melange.rsa and melange.rsa.pub to {}", out_dir.display());
        }
        MelangeCommands::Bump { config, version } => {
            print!("{}", melange.bump(&config, &version).await?);
        }
        MelangeCommands::Build {
            config,
            out_dir,
            signing_key,
            version,
            source_dir,
            arch,
        } => {
            let options = MelangeBuildOptions {
                version,
                source_dir,
                signing_key,
                platforms: toolbox.platforms(arch),
            };
            let packages = melange.build(&config, &out_dir, &options).await?;
            println!("{}", packages.display());
        }
    }
    Ok(())
}
