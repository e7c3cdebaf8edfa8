//! Provisioning target identity and derived resource names.

use crate::assets;
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// Prefix shared by all image, volume and container names.
pub const NAME_PREFIX: &str = "capsula";

/// Linux distribution the environment image is based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Platform {
    /// Debian stable (default).
    #[default]
    Debian,
    /// Alpine Linux.
    Alpine,
}

impl Platform {
    /// All supported platforms.
    pub const ALL: [Platform; 2] = [Platform::Debian, Platform::Alpine];

    /// Lower-case platform name as used in names and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debian => "debian",
            Self::Alpine => "alpine",
        }
    }

    /// Dockerfile used to build the environment image for this platform.
    pub fn dockerfile(&self) -> &'static str {
        match self {
            Self::Debian => assets::DOCKERFILE_DEBIAN,
            Self::Alpine => assets::DOCKERFILE_ALPINE,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debian" => Ok(Self::Debian),
            "alpine" => Ok(Self::Alpine),
            other => Err(CoreError::Config(format!(
                "unknown platform \"{other}\" (expected \"debian\" or \"alpine\")"
            ))),
        }
    }
}

/// One provisioning target: engine, platform, context, user and version.
///
/// Image and volume names depend only on the target, so repeated
/// invocations share (and cache) them. Container names additionally embed
/// the invocation time and process id so that concurrent runs never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineContext {
    engine: String,
    platform: Platform,
    context: String,
    user: String,
    version: String,
}

impl EngineContext {
    /// Create a new provisioning target.
    pub fn new(
        engine: impl Into<String>,
        platform: Platform,
        context: impl Into<String>,
        user: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            engine: engine.into(),
            platform,
            context: context.into(),
            user: user.into(),
            version: version.into(),
        }
    }

    /// Engine binary driving this target.
    pub fn engine(&self) -> &str {
        &self.engine
    }

    /// Target platform.
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Context name.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// User the environment is provisioned for.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Image version.
    pub fn version(&self) -> &str {
        &self.version
    }

    fn stem(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            NAME_PREFIX,
            sanitize(&self.user),
            self.platform,
            sanitize(&self.context)
        )
    }

    /// Persistent volume name, stable across versions.
    pub fn volume_name(&self) -> String {
        self.stem()
    }

    /// Image reference (`name:tag`), the tag being the version.
    pub fn image_name(&self) -> String {
        format!("{}:{}", self.stem(), sanitize(&self.version))
    }

    /// Container name for an invocation starting now.
    pub fn container_name(&self) -> String {
        self.container_name_at(Utc::now(), std::process::id())
    }

    /// Container name for an invocation at `at` by process `pid`.
    pub fn container_name_at(&self, at: DateTime<Utc>, pid: u32) -> String {
        format!("{}-{}-{}", self.stem(), at.format("%Y%m%d-%H%M%S-%3f"), pid)
    }
}

/// Whether `name` can be used as a context name.
///
/// Context names become part of image and volume references verbatim, so
/// they are restricted to lower-case alphanumeric runs joined by a single
/// `.`, `_` or `-`. Rejecting anything else (instead of rewriting it) keeps
/// distinct contexts from sharing an image and volume.
pub fn is_valid_context_name(name: &str) -> bool {
    name.split(['.', '_', '-']).all(|part| {
        !part.is_empty() && part.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    })
}

/// Turn an arbitrary string into a reference path component.
///
/// Lower-cases, maps characters outside `[a-z0-9_.-]` to `-`, collapses a
/// run of separators to its first character and strips separators at both
/// ends. The result matches `[a-z0-9]+([._-][a-z0-9]+)*`.
fn sanitize(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    let mut pending = None;
    for c in component.chars().map(|c| c.to_ascii_lowercase()) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if let Some(sep) = pending.take() {
                if !out.is_empty() {
                    out.push(sep);
                }
            }
            out.push(c);
        } else if pending.is_none() {
            pending = Some(if matches!(c, '_' | '.') { c } else { '-' });
        }
    }
    if out.is_empty() {
        "unnamed".to_string()
    } else {
        out
    }
}
