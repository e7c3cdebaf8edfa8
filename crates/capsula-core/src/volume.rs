//! Idempotent provisioning of the persistent volume.

use crate::context::EngineContext;
use crate::engine::{Engine, Probe};
use crate::error::{CoreError, Result};
use crate::image::Provisioned;
use std::sync::Arc;

/// Creates the per-context volume unless it already exists.
///
/// No lock is held between the existence check and the creation: two
/// first-time invocations for the same context may both attempt to create
/// the volume. This is a known limitation.
pub struct VolumeProvisioner {
    engine: Arc<dyn Engine>,
}

impl VolumeProvisioner {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self { engine }
    }

    /// Make sure the volume for `ctx` exists.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::VolumeCreateFailed`] if creation fails.
    pub async fn ensure_volume(&self, ctx: &EngineContext) -> Result<Provisioned> {
        let volume = ctx.volume_name();
        match self.engine.volume_exists(&volume).await {
            Probe::Present => {
                tracing::debug!(%volume, "Container volume exists");
                return Ok(Provisioned::Cached);
            }
            Probe::Absent => {}
            Probe::Failed(reason) => {
                tracing::debug!(%volume, %reason, "Volume query failed, treating volume as absent");
            }
        }

        tracing::info!(%volume, "Creating container volume");
        self.engine
            .volume_create(&volume)
            .await
            .map_err(|e| CoreError::VolumeCreateFailed(e.to_string()))?;
        Ok(Provisioned::Created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Platform;
    use crate::engine::stub::StubEngine;

    fn ctx() -> EngineContext {
        EngineContext::new("stub", Platform::Alpine, "work", "u", "0.1.0")
    }

    #[tokio::test]
    async fn test_absent_volume_is_created_once() {
        let engine = Arc::new(StubEngine::default());
        let provisioner = VolumeProvisioner::new(engine.clone());

        assert_eq!(provisioner.ensure_volume(&ctx()).await.unwrap(), Provisioned::Created);
        assert_eq!(provisioner.ensure_volume(&ctx()).await.unwrap(), Provisioned::Cached);

        assert_eq!(
            engine.calls(),
            vec![
                "volume inspect capsula-u-alpine-work",
                "volume create capsula-u-alpine-work",
                "volume inspect capsula-u-alpine-work",
            ]
        );
    }

    #[tokio::test]
    async fn test_present_volume_is_left_alone() {
        let engine = Arc::new(StubEngine::default());
        *engine.volume.lock().unwrap() = Probe::Present;
        let provisioner = VolumeProvisioner::new(engine.clone());

        assert_eq!(provisioner.ensure_volume(&ctx()).await.unwrap(), Provisioned::Cached);
        assert_eq!(engine.count("volume create "), 0);
    }

    #[tokio::test]
    async fn test_failed_inspect_attempts_create() {
        let engine = Arc::new(StubEngine::default());
        *engine.volume.lock().unwrap() = Probe::Failed("permission denied".into());
        let provisioner = VolumeProvisioner::new(engine.clone());

        provisioner.ensure_volume(&ctx()).await.unwrap();
        assert_eq!(engine.count("volume create "), 1);
    }

    #[tokio::test]
    async fn test_create_failure_is_wrapped() {
        let engine = Arc::new(StubEngine {
            create_error: Some("disk quota exceeded".into()),
            ..Default::default()
        });
        let provisioner = VolumeProvisioner::new(engine);

        let err = provisioner.ensure_volume(&ctx()).await.unwrap_err();
        assert!(matches!(err, CoreError::VolumeCreateFailed(ref m) if m.contains("quota")));
    }
}
