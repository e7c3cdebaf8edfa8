//! Foreground execution of the user command in a throw-away container.

use crate::context::EngineContext;
use crate::engine::Engine;
use crate::error::{CoreError, Result};
use crate::mounts::MountPlan;
use crate::plan::{EntrypointArgs, InvocationPlan};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;

/// Runs one container per invocation and reports its exit code.
pub struct ContainerLauncher {
    engine: Arc<dyn Engine>,
    tty: bool,
}

impl ContainerLauncher {
    /// Create a launcher; a pseudo terminal is requested when stdin is one.
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            tty: std::io::stdin().is_terminal(),
        }
    }

    /// Override terminal detection.
    pub fn with_tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    /// Assemble the `run` invocation without executing it.
    pub fn plan(
        &self,
        ctx: &EngineContext,
        mounts: &MountPlan,
        entry: &EntrypointArgs,
        bootstrap: &Path,
        command: &[String],
    ) -> Result<InvocationPlan> {
        InvocationPlan::builder()
            .container_name(ctx.container_name())
            .tty(self.tty)
            .mounts(mounts.clone())
            .bootstrap(bootstrap)
            .volume(ctx.volume_name())
            .image(ctx.image_name())
            .entrypoint_args(entry.clone())
            .command(command.iter().cloned())
            .build()
    }

    /// Run `command` in a fresh container and wait for it.
    ///
    /// The container's exit code is returned as-is, including non-zero
    /// codes; only a failure to start the engine is an error.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPlan`] for an inconsistent invocation and
    /// [`CoreError::LaunchFailed`] if the engine cannot be executed.
    pub async fn launch(
        &self,
        ctx: &EngineContext,
        mounts: &MountPlan,
        entry: &EntrypointArgs,
        bootstrap: &Path,
        command: &[String],
    ) -> Result<i32> {
        let plan = self.plan(ctx, mounts, entry, bootstrap, command)?;
        let tokens = plan.to_tokens();

        tracing::info!(
            image = %ctx.image_name(),
            workdir = %entry.workdir.display(),
            tty = self.tty,
            "Running command in container"
        );
        let start = std::time::Instant::now();
        let code = self
            .engine
            .run(&tokens)
            .await
            .map_err(|e| CoreError::LaunchFailed(e.to_string()))?;

        if code == 0 {
            tracing::debug!(elapsed_ms = start.elapsed().as_millis() as u64, "Container exited");
        } else {
            tracing::warn!(code, elapsed_ms = start.elapsed().as_millis() as u64, "Container exited with non-zero code");
        }
        Ok(code)
    }
}
