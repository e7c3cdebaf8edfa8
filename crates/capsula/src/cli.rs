//! Command-line interface.
//!
//! ## Environment Variables
//!
//! | Variable            | Option          | Default            |
//! |---------------------|-----------------|--------------------|
//! | `CAPSULA_LOG_LEVEL` | `--log-level`   | `warning`          |
//! | `CAPSULA_PLATFORM`  | `--platform`    | `debian`           |
//! | `CAPSULA_ENGINE`    | `--docker`      | probed             |
//! | `CAPSULA_CONTEXT`   | `--context`     | `default`          |
//! | `CAPSULA_CONFIG`    | `--config`      | `~/.capsula.yaml`  |
//!
//! `RUST_LOG` takes precedence over the log level when set.

use capsula_core::Platform;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\n",
    "Encapsulated command execution in cached container environments\n",
    "Licensed under the ",
    env!("CARGO_PKG_LICENSE"),
    " license <",
    env!("CARGO_PKG_REPOSITORY"),
    ">"
);

/// Verbosity of diagnostic output on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum LogLevel {
    Error,
    #[value(alias = "warn")]
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    /// `tracing` level directive.
    pub fn directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "capsula")]
#[command(
    version,
    long_version = LONG_VERSION,
    about = "Run a command inside an encapsulated container environment",
    long_about = None
)]
pub struct Cli {
    /// Level of diagnostic output
    #[arg(short, long, value_enum, env = "CAPSULA_LOG_LEVEL", default_value = "warning")]
    pub log_level: LogLevel,

    /// Platform of the container image (debian or alpine)
    #[arg(short, long, env = "CAPSULA_PLATFORM", default_value = "debian")]
    pub platform: Platform,

    /// Container engine binary (default: first of docker, podman, nerdctl)
    #[arg(short = 'd', long = "docker", value_name = "ENGINE", env = "CAPSULA_ENGINE")]
    pub engine: Option<String>,

    /// Context selecting the exposed dotfiles and environment variables
    #[arg(short, long, env = "CAPSULA_CONTEXT", default_value = capsula_core::DEFAULT_CONTEXT)]
    pub context: String,

    /// Context document (default: ~/.capsula.yaml, then the built-in one)
    #[arg(short = 'C', long, value_name = "FILE", env = "CAPSULA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Grant password-less sudo inside the container
    #[arg(short, long)]
    pub sudo: bool,

    /// Command and arguments to run (default: interactive shell)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}
