//! Tests for the auth module

use super::*;

#[test]
fn test_docker_config_parsing() {
    let config_json = r#"{
        "auths": {
            "https://index.docker.io/v1/": {
                "auth": "dXNlcjpwYXNz"
            },
            "gcr.io": {
                "username": "oauth2accesstoken",
                "password": "ya29.token",
                "registrytoken": "bearer-token"
            }
        },
        "credHelpers": {
            "ecr.amazonaws.com": "ecr-login"
        },
        "credsStore": "osxkeychain"
    }"#;

    let config: DockerConfig = serde_json::from_str(config_json).unwrap();

    assert_eq!(config.auths.len(), 2);
    let gcr_auth = &config.auths["gcr.io"];
    assert_eq!(gcr_auth.username, Some("oauth2accesstoken".to_string()));
    assert_eq!(gcr_auth.registry_token, Some("bearer-token".to_string()));
    assert_eq!(config.cred_helpers["ecr.amazonaws.com"], "ecr-login");
    assert_eq!(config.creds_store, Some("osxkeychain".to_string()));

    let hub = config.find("docker.io/library/alpine").unwrap();
    assert_eq!(
        hub.credentials(),
        Some(("user".to_string(), "pass".to_string()))
    );

    let inline = config.inline_only();
    assert!(inline.cred_helpers.is_empty());
    assert!(inline.creds_store.is_none());
    assert_eq!(inline.auths.len(), 2);
}

#[test]
fn test_registry_host() {
    assert_eq!(registry_host("docker.io/library/ubuntu:latest"), "index.docker.io");
    assert_eq!(registry_host("docker.io"), "index.docker.io");
    assert_eq!(registry_host("gcr.io/project/image:tag"), "gcr.io");
    assert_eq!(registry_host("ghcr.io"), "ghcr.io");
    assert_eq!(registry_host("localhost:5000/image"), "localhost:5000");
    assert_eq!(registry_host("localhost:5000"), "localhost:5000");
    assert_eq!(registry_host("ubuntu:latest"), "index.docker.io");
    assert_eq!(registry_host("user/image:tag"), "index.docker.io");
    assert_eq!(
        registry_host("oci://registry.example.com/charts"),
        "registry.example.com"
    );
    assert_eq!(
        registry_host("ghcr.io/org/app@sha256:abcd"),
        "ghcr.io"
    );
}

#[test]
fn test_with_credentials_writes_basic_auth() {
    let creds = RegistryCredentials::new("ghcr.io/org/app", "bot", Secret::new("s3cret"));
    let config = DockerConfig::default().with_credentials(&creds);

    let entry = config.find("ghcr.io").unwrap();
    assert_eq!(
        entry.credentials(),
        Some(("bot".to_string(), "s3cret".to_string()))
    );

    let json = config.to_json().unwrap();
    assert!(json.contains("\"ghcr.io\""));
    assert!(!json.contains("s3cret"));
}

#[test]
fn test_with_credentials_does_not_mutate_original() {
    let base = DockerConfig::default();
    let creds = RegistryCredentials::new("docker.io", "me", Secret::new("pw"));
    let derived = base.with_credentials(&creds);

    assert!(base.is_empty());
    assert!(derived.auths.contains_key("https://index.docker.io/v1/"));
}

#[test]
fn test_merged_layers_entries() {
    let a = DockerConfig::default().with_credentials(&RegistryCredentials::new(
        "ghcr.io",
        "a",
        Secret::new("1"),
    ));
    let b = DockerConfig::default().with_credentials(&RegistryCredentials::new(
        "ghcr.io",
        "b",
        Secret::new("2"),
    ));

    let merged = a.merged(&b);
    assert_eq!(
        merged.find("ghcr.io").unwrap().credentials(),
        Some(("b".to_string(), "2".to_string()))
    );
}

#[test]
fn test_debug_redacts_credentials() {
    let entry = DockerAuthEntry::basic("user", &Secret::new("hunter2"));
    let rendered = format!("{:?}", entry);
    assert!(!rendered.contains("hunter2"));
    assert!(!rendered.contains(entry.auth.as_deref().unwrap()));
}
