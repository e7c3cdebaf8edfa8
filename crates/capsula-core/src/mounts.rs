//! Translation of dotfile tokens and environment names into run flags.
//!
//! Everything here is pure: no filesystem access, no environment lookups.
//! Environment values are deliberately not captured; the engine resolves
//! `-e NAME` from the invoking process when the container starts.

use std::path::{Path, PathBuf};

/// Container directory under which host paths are mirrored.
pub const SANDBOX_HOME_PREFIX: &str = "/mnt/fs-home";

/// Trailing token marker that makes a dotfile mount read-write.
pub const READ_WRITE_MARKER: char = '!';

/// A bind mount of a host path into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    /// Absolute host path.
    pub host_path: PathBuf,
    /// Absolute container path.
    pub container_path: String,
    /// Whether the mount is read-only.
    pub read_only: bool,
}

impl MountSpec {
    /// Mount `host_path` at `container_path`.
    pub fn new(host_path: impl Into<PathBuf>, container_path: impl Into<String>, read_only: bool) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only,
        }
    }

    /// Mount for a dotfile token relative to `home`.
    ///
    /// A trailing [`READ_WRITE_MARKER`] flips the default read-only mode.
    /// Returns `None` for blank tokens.
    pub fn from_dotfile(token: &str, home: &Path) -> Option<Self> {
        let token = token.trim();
        let (name, read_only) = match token.strip_suffix(READ_WRITE_MARKER) {
            Some(name) => (name, false),
            None => (token, true),
        };
        if name.is_empty() {
            return None;
        }
        let host_path = home.join(name);
        let container_path = mirrored(&host_path);
        Some(Self {
            host_path,
            container_path,
            read_only,
        })
    }

    /// The `-v host:container[:ro]` flag value.
    pub fn volume_arg(&self) -> String {
        format!(
            "{}:{}{}",
            self.host_path.display(),
            self.container_path,
            if self.read_only { ":ro" } else { "" }
        )
    }

    /// Flag pair for the engine command line.
    pub fn to_args(&self) -> [String; 2] {
        ["-v".to_string(), self.volume_arg()]
    }
}

/// Container location mirroring an absolute host path under the sandbox prefix.
pub fn mirrored(host_path: &Path) -> String {
    format!("{}{}", SANDBOX_HOME_PREFIX, host_path.display())
}

/// An environment variable passed through by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSpec(pub String);

impl EnvSpec {
    /// Variable name.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Flag pair for the engine command line.
    pub fn to_args(&self) -> [String; 2] {
        ["-e".to_string(), self.0.clone()]
    }
}

/// Mounts and environment pass-throughs for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountPlan {
    /// Dotfile bind mounts, in token order.
    pub mounts: Vec<MountSpec>,
    /// Environment pass-throughs, in name order as given.
    pub env: Vec<EnvSpec>,
}

impl MountPlan {
    /// Flattened `-v` flags.
    pub fn mount_args(&self) -> Vec<String> {
        self.mounts.iter().flat_map(MountSpec::to_args).collect()
    }

    /// Flattened `-e` flags.
    pub fn env_args(&self) -> Vec<String> {
        self.env.iter().flat_map(EnvSpec::to_args).collect()
    }
}

/// Plan mounts for `dotfiles` (relative to `home`) and pass-throughs for `env`.
pub fn plan_mounts<D, E>(dotfiles: &[D], env: &[E], home: &Path) -> MountPlan
where
    D: AsRef<str>,
    E: AsRef<str>,
{
    let mounts = dotfiles
        .iter()
        .filter_map(|token| MountSpec::from_dotfile(token.as_ref(), home))
        .collect();
    let env = env
        .iter()
        .map(|name| name.as_ref().trim())
        .filter(|name| !name.is_empty())
        .map(|name| EnvSpec(name.to_string()))
        .collect();
    MountPlan { mounts, env }
}
