//! Idempotent provisioning of the environment image.

use crate::assets::{BOOTSTRAP_NAME, DOCKERFILE_NAME};
use crate::context::EngineContext;
use crate::engine::{BuildRequest, Engine, Probe};
use crate::error::{CoreError, Result};
use crate::progress::{self, ProgressMode, Spinner};
use crate::scratch;
use crate::spool::Spool;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Whether a provisioning step found an existing object or created one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    /// The object already existed.
    Cached,
    /// The object was created by this call.
    Created,
}

/// Builds the environment image unless it already exists.
///
/// Like volume provisioning, the check-then-build sequence is not locked;
/// concurrent first runs for one context may build the same image twice.
pub struct ImageProvisioner {
    engine: Arc<dyn Engine>,
    progress: ProgressMode,
}

impl ImageProvisioner {
    /// Create a provisioner presenting build output according to `progress`.
    pub fn new(engine: Arc<dyn Engine>, progress: ProgressMode) -> Self {
        Self { engine, progress }
    }

    /// Make sure the image for `ctx` exists, building it if necessary.
    ///
    /// Build inputs live in a sub-scope of `spool` that is drained before
    /// this returns, whether the build succeeded or not.
    ///
    /// A failing image query is treated like a missing image: the build is
    /// attempted and, if the engine really is broken, fails loudly there.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BuildFailed`] if the build inputs cannot be
    /// written or the engine build fails.
    pub async fn ensure_image(
        &self,
        spool: &Spool,
        ctx: &EngineContext,
        dockerfile: &str,
        bootstrap: &str,
    ) -> Result<Provisioned> {
        let image = ctx.image_name();
        match self.engine.image_exists(&image).await {
            Probe::Present => {
                tracing::debug!(%image, "Container image exists");
                return Ok(Provisioned::Cached);
            }
            Probe::Absent => {}
            Probe::Failed(reason) => {
                tracing::debug!(%image, %reason, "Image query failed, treating image as absent");
            }
        }

        let start = std::time::Instant::now();
        tracing::info!(%image, platform = %ctx.platform(), "Building container image");

        let scope = spool.subscope();
        let result = self.build(&scope, &image, dockerfile, bootstrap).await;
        let released = scope.release_all().await;

        result.map_err(|e| match e {
            CoreError::BuildFailed(_) => e,
            other => CoreError::BuildFailed(other.to_string()),
        })?;
        released?;

        tracing::info!(
            %image,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Container image built"
        );
        Ok(Provisioned::Created)
    }

    async fn build(&self, scope: &Spool, image: &str, dockerfile: &str, bootstrap: &str) -> Result<()> {
        let dir = scratch::private_tempdir(scope)?;
        scratch::write_spooled(scope, dir.join(DOCKERFILE_NAME), dockerfile, 0o640).await?;
        scratch::write_spooled(scope, dir.join(BOOTSTRAP_NAME), bootstrap, 0o750).await?;

        let spinner = match self.progress {
            ProgressMode::Spinner => {
                let spinner = Spinner::start(format!("building container image {image}"));
                scope.register(spinner.clone(), |spinner| {
                    spinner.stop().map_err(CoreError::from)
                });
                Some(spinner)
            }
            ProgressMode::Log => None,
        };

        self.run_build(image, &dir, spinner).await
    }

    async fn run_build(&self, image: &str, dir: &Path, spinner: Option<Spinner>) -> Result<()> {
        let request = BuildRequest {
            image,
            dockerfile: DOCKERFILE_NAME,
            context_dir: dir,
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let (result, ()) = tokio::join!(
            self.engine.build(&request, tx),
            progress::report(spinner, rx)
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Platform;
    use crate::engine::stub::StubEngine;

    fn ctx() -> EngineContext {
        EngineContext::new("stub", Platform::Debian, "default", "u", "0.1.0")
    }

    #[tokio::test]
    async fn test_second_call_does_not_rebuild() {
        let engine = Arc::new(StubEngine::default());
        let provisioner = ImageProvisioner::new(engine.clone(), ProgressMode::Log);
        let spool = Spool::new();

        let first = provisioner
            .ensure_image(&spool, &ctx(), "FROM debian\n", "#!/bin/bash\n")
            .await
            .unwrap();
        let second = provisioner
            .ensure_image(&spool, &ctx(), "FROM debian\n", "#!/bin/bash\n")
            .await
            .unwrap();

        assert_eq!(first, Provisioned::Created);
        assert_eq!(second, Provisioned::Cached);
        assert_eq!(engine.count("build "), 1);
        assert_eq!(engine.count("images -q "), 2);
        spool.release_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_existing_image_is_not_built() {
        let engine = Arc::new(StubEngine::default());
        *engine.image.lock().unwrap() = Probe::Present;
        let provisioner = ImageProvisioner::new(engine.clone(), ProgressMode::Log);
        let spool = Spool::new();

        let status = provisioner
            .ensure_image(&spool, &ctx(), "FROM debian\n", "")
            .await
            .unwrap();

        assert_eq!(status, Provisioned::Cached);
        assert_eq!(engine.calls(), vec!["images -q capsula-u-debian-default:0.1.0"]);
        assert!(spool.is_empty());
    }

    #[tokio::test]
    async fn test_failed_query_triggers_build() {
        let engine = Arc::new(StubEngine::default());
        *engine.image.lock().unwrap() = Probe::Failed("daemon not running".into());
        let provisioner = ImageProvisioner::new(engine.clone(), ProgressMode::Log);
        let spool = Spool::new();

        let status = provisioner.ensure_image(&spool, &ctx(), "FROM x\n", "").await.unwrap();

        assert_eq!(status, Provisioned::Created);
        assert_eq!(engine.count("build "), 1);
    }

    #[tokio::test]
    async fn test_build_failure_is_wrapped_and_cleaned_up() {
        let engine = Arc::new(StubEngine {
            build_error: Some("no space left on device".into()),
            ..Default::default()
        });
        let provisioner = ImageProvisioner::new(engine.clone(), ProgressMode::Log);
        let spool = Spool::new();

        let err = provisioner
            .ensure_image(&spool, &ctx(), "FROM x\n", "")
            .await
            .unwrap_err();

        match err {
            CoreError::BuildFailed(msg) => assert!(msg.contains("no space left on device")),
            other => panic!("unexpected error: {other}"),
        }
        // The build scope is drained and gone from the parent.
        assert!(spool.is_empty());
    }

    #[tokio::test]
    async fn test_build_inputs_are_removed_after_build() {
        let engine = Arc::new(StubEngine::default());
        let provisioner = ImageProvisioner::new(engine.clone(), ProgressMode::Log);
        let spool = Spool::new();

        provisioner.ensure_image(&spool, &ctx(), "FROM x\n", "").await.unwrap();

        let dir = engine.last_context.lock().unwrap().clone().unwrap();
        assert!(dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(scratch::TEMP_PREFIX));
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_spinner_is_cleared_with_scope() {
        let engine = Arc::new(StubEngine::default());
        let provisioner = ImageProvisioner::new(engine.clone(), ProgressMode::Spinner);
        let spool = Spool::new();

        provisioner.ensure_image(&spool, &ctx(), "FROM x\n", "").await.unwrap();

        assert!(spool.is_empty());
    }
}
