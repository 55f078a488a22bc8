use super::*;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert!(config.runtime.is_none());
    assert!(config.default_platforms.is_empty());
    assert!(config.tools.is_empty());
    assert!(config.registries.is_empty());
}

#[test]
fn test_default_tool_specs() {
    let config = Config::default();

    let crane = config.tool("crane");
    assert_eq!(crane.binary(), "crane");
    assert_eq!(crane.image_ref(), "cgr.dev/chainguard/crane:latest");
    assert_eq!(crane.user(), Some("nonroot"));

    let melange = config.tool("melange");
    assert_eq!(melange.user(), Some("65532"));

    let docker = config.tool("docker");
    assert_eq!(docker.image_ref(), "cgr.dev/chainguard/docker-cli:latest");
    assert_eq!(docker.user(), Some("0"));
}

#[test]
fn test_parse_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
runtime = "podman"
default_platforms = ["linux/amd64", "linux/arm64"]

[tools.grype]
image = "anchore/grype"
version = "v0.80.0"

[registries."ghcr.io"]
username = "bot"
password = "token"

[registries."registry.example.com"]
auth = "dXNlcjpwYXNz"

[registries."broken.example.com"]
username = "only-a-user"
"#,
    )
    .unwrap();

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.runtime.as_deref(), Some("podman"));
    assert_eq!(config.default_platforms.len(), 2);
    assert_eq!(config.default_platforms[1].to_string(), "linux/arm64");

    let grype = config.tool("grype");
    assert_eq!(grype.image_ref(), "anchore/grype:v0.80.0");
    assert_eq!(grype.user(), Some("nonroot"));

    let credentials = config.credentials();
    assert_eq!(credentials.len(), 2);
    assert_eq!(credentials[0].address, "ghcr.io");
    assert_eq!(credentials[0].username, "bot");
    assert_eq!(credentials[0].secret.expose(), "token");
    assert_eq!(credentials[1].address, "registry.example.com");
    assert_eq!(credentials[1].username, "user");
    assert_eq!(credentials[1].secret.expose(), "pass");
}

#[test]
fn test_invalid_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "default_platforms = [\"not-a-platform\"]").unwrap();

    let err = Config::load_from(&path).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
