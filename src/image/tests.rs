use super::*;
use crate::runner::{MockRunner, ToolOutput, ToolSpec};
use crate::sbom::SbomNaming;
use std::sync::Arc;

const REFERENCE: &str = "ghcr.io/org/app@sha256:aaaa";

const MANIFEST_LIST: &str = r#"{
    "schemaVersion": 2,
    "manifests": [
        {"mediaType": "application/vnd.oci.image.manifest.v1+json", "size": 1, "digest": "sha256:01",
         "platform": {"architecture": "amd64", "os": "linux"}},
        {"mediaType": "application/vnd.oci.image.manifest.v1+json", "size": 1, "digest": "sha256:02",
         "platform": {"architecture": "arm64", "os": "linux"}}
    ]
}"#;

/// Answers crane like a registry holding a two-platform image
fn registry_runner() -> Arc<MockRunner> {
    Arc::new(MockRunner::with_handler(|spec, args| {
        let stdout = match (spec.binary(), args[0].as_str()) {
            ("crane", "digest") if args.iter().any(|a| a == "--full-ref") => {
                format!("{}\n", REFERENCE)
            }
            ("crane", "digest") => "sha256:aaaa\n".to_string(),
            ("crane", "manifest") => MANIFEST_LIST.to_string(),
            _ => String::new(),
        };
        Ok(ToolOutput::stdout(stdout))
    }))
}

fn tools(runner: Arc<MockRunner>) -> ImageTools {
    ImageTools {
        crane: Crane::new(runner.clone(), ToolSpec::new("crane", "cgr.dev/chainguard/crane")),
        cosign: Cosign::new(runner.clone(), ToolSpec::new("cosign", "cgr.dev/chainguard/cosign")),
        grype: Grype::new(runner, ToolSpec::new("grype", "cgr.dev/chainguard/grype")),
    }
}

fn image(runner: Arc<MockRunner>) -> ImageResult {
    ImageResult::new("ghcr.io/org/app:1.0", tools(runner))
}

fn sbom_dir(files: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for file in files {
        std::fs::write(dir.path().join(file), "{}").unwrap();
    }
    dir
}

fn commands(runner: &MockRunner, binary: &str) -> Vec<String> {
    runner
        .invocations()
        .iter()
        .filter(|i| i.spec.binary() == binary)
        .map(|i| i.command_line())
        .collect()
}

#[tokio::test]
async fn test_reference_and_registry() {
    let runner = registry_runner();
    let image = image(runner.clone());

    assert_eq!(image.reference().await.unwrap(), REFERENCE);
    assert_eq!(image.registry().await.unwrap(), "ghcr.io");
    assert_eq!(
        commands(&runner, "crane")[0],
        "digest ghcr.io/org/app:1.0 --full-ref"
    );
}

#[tokio::test]
async fn test_platform_digest() {
    let runner = registry_runner();
    let arm64: PlatformRef = "linux/arm64".parse().unwrap();

    let digest = image(runner.clone()).digest(Some(&arm64)).await.unwrap();
    assert_eq!(digest, "sha256:aaaa");
    assert_eq!(
        commands(&runner, "crane"),
        vec!["digest ghcr.io/org/app:1.0 --platform linux/arm64"]
    );
}

#[tokio::test]
async fn test_platforms() {
    let runner = registry_runner();
    let platforms = image(runner).platforms().await.unwrap();
    let names: Vec<String> = platforms.iter().map(ToString::to_string).collect();
    assert_eq!(names, vec!["linux/amd64", "linux/arm64"]);
}

#[tokio::test]
async fn test_chaining_keeps_identity() {
    let runner = registry_runner();
    let image = image(runner.clone())
        .with_digest("sha256:aaaa")
        .with_tag("ghcr.io/org/app:stable")
        .await
        .unwrap()
        .with_copy("registry.example.com/app:1.0")
        .await
        .unwrap()
        .with_scan(&ScanOptions::default())
        .await
        .unwrap();

    assert_eq!(image.address(), "ghcr.io/org/app:1.0");
    assert_eq!(image.known_digest(), Some("sha256:aaaa"));
    assert_eq!(
        commands(&runner, "crane"),
        vec!["tag ghcr.io/org/app:1.0 ghcr.io/org/app:stable"]
    );
    assert_eq!(
        commands(&runner, "cosign"),
        vec!["copy ghcr.io/org/app:1.0 registry.example.com/app:1.0 --force"]
    );
    assert_eq!(
        commands(&runner, "grype"),
        vec!["ghcr.io/org/app:1.0 --output table"]
    );
}

#[tokio::test]
async fn test_sign_is_recursive_on_reference() {
    let runner = registry_runner();
    image(runner.clone())
        .sign(&SignOptions::default())
        .await
        .unwrap();

    assert_eq!(
        commands(&runner, "cosign"),
        vec![format!("sign {} --recursive", REFERENCE)]
    );
}

#[tokio::test]
async fn test_attest_requires_sbom() {
    let runner = registry_runner();
    let err = image(runner.clone())
        .attest(&SignOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NoSbom(address) if address == "ghcr.io/org/app:1.0"));
    assert!(runner.invocations().is_empty());
}

#[tokio::test]
async fn test_attest_each_platform_then_index() {
    let runner = registry_runner();
    let dir = sbom_dir(&[
        "sbom-x86_64.spdx.json",
        "sbom-aarch64.spdx.json",
        "sbom-index.spdx.json",
    ]);
    image(runner.clone())
        .with_sbom(Sbom::new(dir.path(), SbomNaming::Apko))
        .with_attest(&SignOptions::default())
        .await
        .unwrap();

    let attest = |file: &str| {
        format!(
            "attest {} --type spdxjson --predicate /tmp/{}",
            REFERENCE, file
        )
    };
    assert_eq!(
        commands(&runner, "cosign"),
        vec![
            attest("sbom-x86_64.spdx.json"),
            attest("sbom-aarch64.spdx.json"),
            attest("sbom-index.spdx.json"),
        ]
    );
}

#[tokio::test]
async fn test_attest_missing_platform_sbom() {
    let runner = registry_runner();
    let dir = sbom_dir(&["sbom-x86_64.spdx.json", "sbom-index.spdx.json"]);
    let err = image(runner.clone())
        .with_sbom(Sbom::new(dir.path(), SbomNaming::Apko))
        .attest(&SignOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Io(_)));
    assert!(err.to_string().contains("sbom-aarch64.spdx.json"));
    // the amd64 attestation went out before the missing file was noticed
    assert_eq!(commands(&runner, "cosign").len(), 1);
}

#[test]
fn test_netloc() {
    assert_eq!(netloc("ghcr.io/org/app@sha256:aa"), "ghcr.io");
    assert_eq!(netloc("localhost:5000/app@sha256:aa"), "localhost:5000");
}

#[test]
fn test_digest_reference() {
    let runner = Arc::new(MockRunner::new());
    assert_eq!(image(runner.clone()).digest_reference(), None);

    let image = image(runner.clone()).with_digest("sha256:aaaa");
    assert_eq!(image.digest_reference().as_deref(), Some(REFERENCE));
    assert!(runner.invocations().is_empty());

    assert_eq!(repository("localhost:5000/app"), "localhost:5000/app");
    assert_eq!(repository("localhost:5000/app:1@sha256:aa"), "localhost:5000/app");
}
