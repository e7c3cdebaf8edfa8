//! Container engine and auxiliary tool discovery.

use crate::error::{CoreError, Result};
use std::sync::Arc;

/// docker(1) compatible engines, in probe order.
pub const ENGINE_CANDIDATES: [&str; 3] = ["docker", "podman", "nerdctl"];

/// Tools that must exist regardless of the selected engine.
pub const REQUIRED_TOOLS: [&str; 1] = ["id"];

type Probe = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Finds the container engine binary to drive.
///
/// Probing is a plain existence check on the shell path; it does not verify
/// that the engine (or its daemon) actually works.
#[derive(Clone)]
pub struct ToolResolver {
    probe: Probe,
}

impl Default for ToolResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolResolver").finish_non_exhaustive()
    }
}

impl ToolResolver {
    /// Resolver that looks tools up on `PATH`.
    pub fn new() -> Self {
        Self::with_probe(|tool| which::which(tool).is_ok())
    }

    /// Resolver with a custom existence probe.
    pub fn with_probe(probe: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            probe: Arc::new(probe),
        }
    }

    /// Whether `tool` exists.
    pub fn exists(&self, tool: &str) -> bool {
        (self.probe)(tool)
    }

    /// Fail with [`CoreError::ToolNotFound`] unless `tool` exists.
    pub fn ensure(&self, tool: &str) -> Result<()> {
        if self.exists(tool) {
            Ok(())
        } else {
            Err(CoreError::ToolNotFound(tool.to_string()))
        }
    }

    /// Determine the engine binary.
    ///
    /// An explicit override is trusted as given. Without one, the first of
    /// [`ENGINE_CANDIDATES`] found wins. In both cases the
    /// [`REQUIRED_TOOLS`] must be present.
    pub fn resolve(&self, explicit: Option<&str>) -> Result<String> {
        for tool in REQUIRED_TOOLS {
            self.ensure(tool)?;
        }

        if let Some(engine) = explicit.filter(|e| !e.is_empty()) {
            tracing::debug!(engine, "Using engine override");
            return Ok(engine.to_string());
        }

        let engine = ENGINE_CANDIDATES
            .into_iter()
            .find(|candidate| self.exists(candidate))
            .ok_or_else(|| CoreError::NoEngineFound {
                candidates: ENGINE_CANDIDATES.iter().map(|c| c.to_string()).collect(),
            })?;
        tracing::debug!(engine, "Detected container engine");
        Ok(engine.to_string())
    }
}
