/// Default images for the wrapped tools
pub mod image {
    /// Registry namespace the default tool images are pulled from
    pub const CHAINGUARD: &str = "cgr.dev/chainguard";

    /// Wolfi base image, used for tools that need a shell and apk
    pub const WOLFI_BASE: &str = "cgr.dev/chainguard/wolfi-base";

    /// Image shipping the docker CLI with buildx
    pub const DOCKER_CLI: &str = "cgr.dev/chainguard/docker-cli";
}

/// Container image tag constants
pub mod tag {
    /// Default container image tag
    pub const DEFAULT: &str = "latest";
}

/// User and group constants
pub mod user {
    /// Nonroot user name shipped by Chainguard images
    pub const NONROOT: &str = "nonroot";

    /// Nonroot user UID, for images without a named nonroot user
    pub const NONROOT_UID: &str = "65532";

    /// Root user, needed by melange for its build sandbox
    pub const ROOT: &str = "0";
}

/// Cache volume names shared across invocations
pub mod cache {
    pub const APKO: &str = "APKO_CACHE";
    pub const GRYPE_DB: &str = "GRYPE_DB_CACHE";
    pub const MELANGE: &str = "MELANGE_CACHE";
    pub const MELANGE_APK: &str = "MELANGE_APK_CACHE";
}

/// Fixed paths inside tool containers
pub mod path {
    /// Directory holding the docker config.json read by the tools
    pub const DOCKER_CONFIG: &str = "/tmp/docker";

    /// Host working directory mount point
    pub const WORK: &str = "/work";

    pub const APKO_CACHE: &str = "/tmp/apko/cache";
    pub const GRYPE_DB_CACHE: &str = "/tmp/.grype/cache";
    pub const MELANGE_CACHE: &str = "/cache/melange";
    pub const MELANGE_APK_CACHE: &str = "/cache/apk";
    pub const MELANGE_SIGNING_KEY: &str = "/tmp/melange.rsa";
}

/// OCI media types
pub mod media_type {
    pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    pub const DOCKER_MANIFEST_LIST: &str =
        "application/vnd.docker.distribution.manifest.list.v2+json";
    pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
}
