//! cosign: signatures and attestations.

use super::{push_flag, push_opt, wrapper, Tool};
use crate::constants::path;
use crate::error::Result;
use crate::platform::PlatformRef;
use crate::runner::{args, Secret, ToolRunner, ToolSpec};
use std::path::Path;
use std::sync::Arc;

const PRIVATE_KEY_ENV: &str = "COSIGN_PRIVATE_KEY";
const PASSWORD_ENV: &str = "COSIGN_PASSWORD";
const IDENTITY_TOKEN_ENV: &str = "SIGSTORE_ID_TOKEN";

#[derive(Debug, Clone)]
pub struct Cosign {
    tool: Tool,
}

wrapper!(Cosign);

/// Key material and identity for signing. Without a private key cosign
/// signs keyless through OIDC.
#[derive(Debug, Clone, Default)]
pub struct SignOptions {
    pub private_key: Option<Secret>,
    pub password: Option<Secret>,
    pub identity_token: Option<Secret>,
    pub oidc_provider: Option<String>,
    pub oidc_issuer: Option<String>,
    /// Also sign each image of a multi-platform index
    pub recursive: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AttestOptions {
    /// Predicate type, e.g. `spdxjson`
    pub predicate_type: Option<String>,
    pub signing: SignOptions,
}

#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    pub platform: Option<PlatformRef>,
    /// Only copy these items, e.g. `sig`, `att`, `sbom`
    pub only: Vec<String>,
    pub force: bool,
    pub allow_http_registry: bool,
    pub allow_insecure_registry: bool,
}

impl Cosign {
    pub fn new(runner: Arc<dyn ToolRunner>, spec: ToolSpec) -> Self {
        Self {
            tool: Tool::new(runner, spec),
        }
    }

    /// Key flags and the spec carrying the key secrets
    fn signing(&self, cmd: &mut Vec<String>, options: &SignOptions) -> ToolSpec {
        let mut spec = self.tool.spec().clone().with_env_variable("COSIGN_YES", "true");

        if let Some(key) = &options.private_key {
            cmd.extend(["--key".to_string(), format!("env://{}", PRIVATE_KEY_ENV)]);
            spec = spec
                .with_secret_variable(PRIVATE_KEY_ENV, key.clone())
                .with_secret_variable(
                    PASSWORD_ENV,
                    options.password.clone().unwrap_or_else(|| Secret::new("")),
                );
        }
        if let Some(token) = &options.identity_token {
            spec = spec.with_secret_variable(IDENTITY_TOKEN_ENV, token.clone());
        }

        push_opt(cmd, "--oidc-provider", options.oidc_provider.as_deref());
        push_opt(cmd, "--oidc-issuer", options.oidc_issuer.as_deref());
        push_flag(cmd, "--recursive", options.recursive);
        spec
    }

    /// Write `cosign.key` and `cosign.pub` into `out_dir`
    pub async fn generate_key_pair(&self, password: Option<&Secret>, out_dir: &Path) -> Result<()> {
        let spec = self
            .tool
            .spec()
            .clone()
            .with_secret_variable(
                PASSWORD_ENV,
                password.cloned().unwrap_or_else(|| Secret::new("")),
            )
            .with_mounted_directory(out_dir, path::WORK)
            .with_workdir(path::WORK);
        self.tool.run_with(&spec, &args(["generate-key-pair"])).await?;
        Ok(())
    }

    pub async fn sign(&self, image: &str, options: &SignOptions) -> Result<String> {
        let mut cmd = args(["sign", image]);
        let spec = self.signing(&mut cmd, options);
        Ok(self.tool.run_with(&spec, &cmd).await?.stdout)
    }

    /// Attest `image` with the predicate file at `predicate`
    pub async fn attest(&self, image: &str, predicate: &Path, options: &AttestOptions) -> Result<String> {
        let name = predicate
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "predicate.json".to_string());
        let target = format!("/tmp/{}", name);

        let mut cmd = args(["attest", image]);
        push_opt(&mut cmd, "--type", options.predicate_type.as_deref());
        cmd.extend(["--predicate".to_string(), target.clone()]);
        let spec = self
            .signing(&mut cmd, &options.signing)
            .with_mounted_file(predicate, target);
        Ok(self.tool.run_with(&spec, &cmd).await?.stdout)
    }

    /// Copy an image with its signatures and attestations
    pub async fn copy(&self, source: &str, destination: &str, options: &CopyOptions) -> Result<String> {
        let mut cmd = args(["copy", source, destination]);
        push_opt(
            &mut cmd,
            "--platform",
            options.platform.as_ref().map(ToString::to_string).as_deref(),
        );
        if !options.only.is_empty() {
            cmd.extend(["--only".to_string(), options.only.join(",")]);
        }
        push_flag(&mut cmd, "--force", options.force);
        push_flag(&mut cmd, "--allow-http-registry", options.allow_http_registry);
        push_flag(&mut cmd, "--allow-insecure-registry", options.allow_insecure_registry);
        self.tool.stdout(&cmd).await
    }
}
