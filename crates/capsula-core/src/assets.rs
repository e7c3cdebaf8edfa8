//! Text assets embedded at compile time.

/// Dockerfile for the Debian based environment image.
pub const DOCKERFILE_DEBIAN: &str = include_str!("../assets/capsula-container-debian.dockerfile");

/// Dockerfile for the Alpine based environment image.
pub const DOCKERFILE_ALPINE: &str = include_str!("../assets/capsula-container-alpine.dockerfile");

/// In-container bootstrap script (the container entrypoint).
pub const BOOTSTRAP_SCRIPT: &str = include_str!("../assets/capsula-container.bash");

/// File name of the bootstrap script inside build and run directories.
pub const BOOTSTRAP_NAME: &str = "capsula-container.bash";

/// File name of the Dockerfile inside the build directory.
pub const DOCKERFILE_NAME: &str = "Dockerfile";

/// Built-in context document.
pub const DEFAULT_CONTEXTS: &str = include_str!("../assets/capsula.yaml");
