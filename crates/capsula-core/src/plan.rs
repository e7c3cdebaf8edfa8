//! Typed construction of the engine `run` invocation.
//!
//! The bootstrap script inside the container reads its arguments by
//! position, so the token order produced here is part of the contract:
//!
//! ```text
//! run --rm -i --privileged [-t] --name <container>
//!     -v <dotfile mounts>...
//!     -v <bootstrap>:/etc/capsula-container:ro
//!     -v <workdir>:/mnt/fs-work<workdir>
//!     -v <volume>:/mnt/fs-volume
//!     -e <NAME>...
//!     --entrypoint /etc/capsula-container
//!     <image> <platform> <hostname> <user> <uid> <group> <gid>
//!             <home> <workdir> <dotfiles> <environment> <sudo>
//!     <command>...
//! ```

use crate::context::Platform;
use crate::error::{CoreError, Result};
use crate::mounts::{EnvSpec, MountPlan, MountSpec};
use std::path::{Path, PathBuf};

/// Container path of the bootstrap script, also the entrypoint.
pub const BOOTSTRAP_TARGET: &str = "/etc/capsula-container";

/// Container prefix under which the working directory is mirrored.
pub const WORKDIR_PREFIX: &str = "/mnt/fs-work";

/// Container path of the persistent volume.
pub const VOLUME_TARGET: &str = "/mnt/fs-volume";

/// One element of a `run` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunArg {
    /// A bare flag or subcommand (`run`, `--rm`, `-t`, ...).
    Flag(&'static str),
    /// `--name <name>`.
    Name(String),
    /// `-v <host>:<container>[:ro]`.
    Mount(MountSpec),
    /// `-v <volume>:<target>` for a named volume.
    Volume {
        /// Volume name.
        name: String,
        /// Container path.
        target: String,
    },
    /// `-e <NAME>`.
    Env(EnvSpec),
    /// `--entrypoint <path>`.
    Entrypoint(String),
    /// The image reference.
    Image(String),
    /// A fixed-position bootstrap argument.
    Positional(String),
    /// A user command token, passed through unchanged.
    Command(String),
}

impl RunArg {
    fn push_tokens(&self, out: &mut Vec<String>) {
        match self {
            Self::Flag(flag) => out.push((*flag).to_string()),
            Self::Name(name) => out.extend(["--name".to_string(), name.clone()]),
            Self::Mount(spec) => out.extend(spec.to_args()),
            Self::Volume { name, target } => {
                out.extend(["-v".to_string(), format!("{name}:{target}")])
            }
            Self::Env(env) => out.extend(env.to_args()),
            Self::Entrypoint(path) => out.extend(["--entrypoint".to_string(), path.clone()]),
            Self::Image(image) => out.push(image.clone()),
            Self::Positional(value) | Self::Command(value) => out.push(value.clone()),
        }
    }
}

/// The fixed positional block handed to the bootstrap script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrypointArgs {
    /// Image platform.
    pub platform: Platform,
    /// Host name to assume.
    pub hostname: String,
    /// User name.
    pub user: String,
    /// Numeric user id.
    pub uid: u32,
    /// Group name.
    pub group: String,
    /// Numeric group id.
    pub gid: u32,
    /// Home directory.
    pub home: PathBuf,
    /// Working directory.
    pub workdir: PathBuf,
    /// Dotfile tokens, markers retained.
    pub dotfiles: Vec<String>,
    /// Environment variable names.
    pub environment: Vec<String>,
    /// Grant password-less sudo.
    pub sudo: bool,
}

impl EntrypointArgs {
    /// Number of positional arguments following the image.
    pub const COUNT: usize = 11;

    /// Arguments in bootstrap order.
    pub fn to_positional(&self) -> Vec<String> {
        vec![
            self.platform.to_string(),
            self.hostname.clone(),
            self.user.clone(),
            self.uid.to_string(),
            self.group.clone(),
            self.gid.to_string(),
            self.home.display().to_string(),
            self.workdir.display().to_string(),
            self.dotfiles.join(" "),
            self.environment.join(" "),
            if self.sudo { "yes" } else { "no" }.to_string(),
        ]
    }
}

/// A validated, ordered `run` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationPlan {
    args: Vec<RunArg>,
}

impl InvocationPlan {
    /// Create a new plan builder.
    pub fn builder() -> InvocationPlanBuilder {
        InvocationPlanBuilder::default()
    }

    /// The typed arguments in order.
    pub fn args(&self) -> &[RunArg] {
        &self.args
    }

    /// Flatten into engine command-line tokens.
    pub fn to_tokens(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.args.len() * 2);
        for arg in &self.args {
            arg.push_tokens(&mut out);
        }
        out
    }
}

/// Builder for [`InvocationPlan`].
#[derive(Debug, Default)]
pub struct InvocationPlanBuilder {
    container_name: Option<String>,
    tty: bool,
    mounts: MountPlan,
    bootstrap: Option<PathBuf>,
    volume: Option<String>,
    image: Option<String>,
    entry: Option<EntrypointArgs>,
    command: Vec<String>,
}

impl InvocationPlanBuilder {
    /// Set the container name.
    pub fn container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = Some(name.into());
        self
    }

    /// Allocate a pseudo terminal.
    pub fn tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    /// Set the dotfile mounts and environment pass-throughs.
    pub fn mounts(mut self, mounts: MountPlan) -> Self {
        self.mounts = mounts;
        self
    }

    /// Set the host path of the bootstrap script.
    pub fn bootstrap(mut self, path: impl Into<PathBuf>) -> Self {
        self.bootstrap = Some(path.into());
        self
    }

    /// Set the persistent volume name.
    pub fn volume(mut self, name: impl Into<String>) -> Self {
        self.volume = Some(name.into());
        self
    }

    /// Set the image reference.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the positional bootstrap arguments.
    pub fn entrypoint_args(mut self, entry: EntrypointArgs) -> Self {
        self.entry = Some(entry);
        self
    }

    /// Set the user command.
    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Validate and assemble the plan.
    pub fn build(self) -> Result<InvocationPlan> {
        let container_name = required(self.container_name, "container name")?;
        let bootstrap = self
            .bootstrap
            .ok_or_else(|| CoreError::InvalidPlan("missing bootstrap script".into()))?;
        let volume = required(self.volume, "volume")?;
        let image = required(self.image, "image")?;
        let entry = self
            .entry
            .ok_or_else(|| CoreError::InvalidPlan("missing entrypoint arguments".into()))?;

        ensure_absolute(&bootstrap, "bootstrap script")?;
        ensure_absolute(&entry.home, "home directory")?;
        ensure_absolute(&entry.workdir, "working directory")?;
        ensure_mountable(&entry.workdir, "working directory")?;
        for mount in &self.mounts.mounts {
            ensure_absolute(&mount.host_path, "mount source")?;
            ensure_mountable(&mount.host_path, "mount source")?;
        }
        let env_names = self.mounts.env.iter().map(EnvSpec::name);
        for name in env_names.chain(entry.environment.iter().map(String::as_str)) {
            if !is_env_name(name) {
                return Err(CoreError::InvalidPlan(format!(
                    "invalid environment variable name \"{name}\""
                )));
            }
        }
        for token in entry.dotfiles.iter().filter(|t| !t.trim().is_empty()) {
            if token.chars().any(|c| c.is_whitespace() || c == ':') {
                return Err(CoreError::InvalidPlan(format!(
                    "invalid dotfile \"{token}\" (must not contain whitespace or ':')"
                )));
            }
        }

        let mut args = vec![
            RunArg::Flag("run"),
            RunArg::Flag("--rm"),
            RunArg::Flag("-i"),
            RunArg::Flag("--privileged"),
        ];
        if self.tty {
            args.push(RunArg::Flag("-t"));
        }
        args.push(RunArg::Name(container_name));
        args.extend(self.mounts.mounts.into_iter().map(RunArg::Mount));
        args.push(RunArg::Mount(MountSpec::new(
            bootstrap,
            BOOTSTRAP_TARGET,
            true,
        )));
        args.push(RunArg::Mount(MountSpec::new(
            entry.workdir.clone(),
            format!("{WORKDIR_PREFIX}{}", entry.workdir.display()),
            false,
        )));
        args.push(RunArg::Volume {
            name: volume,
            target: VOLUME_TARGET.to_string(),
        });
        args.extend(self.mounts.env.into_iter().map(RunArg::Env));
        args.push(RunArg::Entrypoint(BOOTSTRAP_TARGET.to_string()));
        args.push(RunArg::Image(image));
        args.extend(entry.to_positional().into_iter().map(RunArg::Positional));
        args.extend(self.command.into_iter().map(RunArg::Command));

        Ok(InvocationPlan { args })
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`, the names a POSIX shell can expand.
fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn required(value: Option<String>, what: &str) -> Result<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CoreError::InvalidPlan(format!("missing {what}")))
}

fn ensure_absolute(path: &Path, what: &str) -> Result<()> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(CoreError::InvalidPlan(format!(
            "{what} {} is not an absolute path",
            path.display()
        )))
    }
}

/// `-v` splits on ':', so a host path must not contain one.
fn ensure_mountable(path: &Path, what: &str) -> Result<()> {
    if path.to_string_lossy().contains(':') {
        return Err(CoreError::InvalidPlan(format!(
            "{what} {} contains ':'",
            path.display()
        )));
    }
    Ok(())
}
