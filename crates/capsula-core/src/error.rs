//! Error types for capsula-core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for capsula-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while provisioning or launching an environment.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A required auxiliary tool is not on the shell path
    #[error("necessary tool \"{0}\" not found")]
    ToolNotFound(String),

    /// None of the known container engines is on the shell path
    #[error("neither {} command found in shell path", .candidates.join(", "))]
    NoEngineFound {
        /// Engine binaries that were probed
        candidates: Vec<String>,
    },

    /// Building the environment image failed
    #[error("failed to build container image: {0}")]
    BuildFailed(String),

    /// Creating the persistent volume failed
    #[error("failed to create persistent volume: {0}")]
    VolumeCreateFailed(String),

    /// The engine could not be started for the run step
    #[error("failed to launch container: {0}")]
    LaunchFailed(String),

    /// An engine command exited unsuccessfully
    #[error(
        "`{command}` failed with {status}{}",
        .detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
    )]
    CommandFailed {
        /// Engine binary and subcommand
        command: String,
        /// Exit status as reported by the OS
        status: String,
        /// Captured error output, if any
        detail: Option<String>,
    },

    /// The container invocation could not be assembled
    #[error("invalid invocation plan: {0}")]
    InvalidPlan(String),

    /// `release_one` was called on a spool without handles
    #[error("no resource spooled")]
    EmptySpool,

    /// The invocation directory is not below the home directory
    #[error("working directory {} not below home directory {}", .workdir.display(), .home.display())]
    WorkdirOutsideHome {
        /// Directory the tool was started in
        workdir: PathBuf,
        /// Home directory of the invoking user
        home: PathBuf,
    },

    /// Invalid configuration or context document
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_yaml::Error> for CoreError {
    fn from(e: serde_yaml::Error) -> Self {
        CoreError::Config(e.to_string())
    }
}
