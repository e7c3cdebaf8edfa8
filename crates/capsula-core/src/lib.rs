//! # capsula-core
//!
//! Provisioning and launch engine for Capsula encapsulated command execution.
//!
//! Capsula runs a command inside a throw-away container that mirrors the
//! invoking user: same user and group ids, same working directory, and a
//! selected set of dotfiles and environment variables from the host. The
//! expensive parts (the environment image and a persistent volume) are
//! cached per *context* and reused across invocations.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Orchestrator                       │
//! │  workdir check → ToolResolver → Identity → EngineContext │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌──────────────────┐      ┌─────────────────────────┐   │
//! │  │ ImageProvisioner │─────▶│  Spool (sub-scope)      │   │
//! │  │  images -q/build │      │  tempdir, files, spinner│   │
//! │  └──────────────────┘      └─────────────────────────┘   │
//! │  ┌──────────────────┐                                    │
//! │  │VolumeProvisioner │                                    │
//! │  │ inspect / create │                                    │
//! │  └──────────────────┘                                    │
//! │  ┌──────────────────┐      ┌─────────────────────────┐   │
//! │  │ ContainerLauncher│─────▶│  InvocationPlan         │   │
//! │  │  run (inherited) │      │  flags, mounts, args    │   │
//! │  └──────────────────┘      └─────────────────────────┘   │
//! │           │                                              │
//! └───────────┼──────────────────────────────────────────────┘
//!             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │        docker / podman / nerdctl  (dyn Engine)           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use capsula_core::{ContextDocument, Orchestrator, RunConfig};
//!
//! # async fn example() -> capsula_core::Result<()> {
//! let contexts = ContextDocument::load(None).await?;
//!
//! let config = RunConfig::builder()
//!     .context("default")
//!     .profile(contexts.profile("default"))
//!     .command(["make", "test"])
//!     .build()?;
//!
//! let code = Orchestrator::new(config).run().await?;
//! std::process::exit(code);
//! # }
//! ```
//!
//! ## Features
//!
//! - **Engine Discovery**: docker, podman or nerdctl, or an explicit override
//! - **Cached Provisioning**: image and volume are created only when missing
//! - **Scoped Cleanup**: every temporary file and directory is released in reverse order
//! - **Dotfile Mounts**: read-only by default, read-write with a trailing `!`
//! - **Exit Code Passthrough**: the command's exit code becomes Capsula's

mod assets;
mod config;
mod context;
mod engine;
mod error;
mod identity;
mod image;
mod launch;
mod mounts;
mod orchestrator;
mod plan;
mod progress;
mod scratch;
mod spool;
mod tool;
mod volume;

pub use assets::{BOOTSTRAP_SCRIPT, DEFAULT_CONTEXTS};
pub use config::{
    ContextDocument, ContextProfile, RunConfig, RunConfigBuilder, DEFAULT_CONTEXT, USER_DOCUMENT,
};
pub use context::{is_valid_context_name, EngineContext, Platform};
pub use engine::{BuildRequest, CliEngine, Engine, Probe};
pub use error::{CoreError, Result};
pub use identity::Identity;
pub use image::{ImageProvisioner, Provisioned};
pub use launch::ContainerLauncher;
pub use mounts::{plan_mounts, EnvSpec, MountPlan, MountSpec, READ_WRITE_MARKER, SANDBOX_HOME_PREFIX};
pub use orchestrator::{ensure_workdir_below_home, EngineFactory, Orchestrator};
pub use plan::{
    EntrypointArgs, InvocationPlan, InvocationPlanBuilder, RunArg, BOOTSTRAP_TARGET,
    VOLUME_TARGET, WORKDIR_PREFIX,
};
pub use progress::{ProgressMode, Spinner};
pub use scratch::TEMP_PREFIX;
pub use spool::Spool;
pub use tool::{ToolResolver, ENGINE_CANDIDATES, REQUIRED_TOOLS};
pub use volume::VolumeProvisioner;
