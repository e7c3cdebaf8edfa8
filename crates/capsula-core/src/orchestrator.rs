//! End-to-end sequencing of one invocation.

use crate::assets::{BOOTSTRAP_NAME, BOOTSTRAP_SCRIPT};
use crate::config::RunConfig;
use crate::context::EngineContext;
use crate::engine::{CliEngine, Engine};
use crate::error::{CoreError, Result};
use crate::identity::Identity;
use crate::image::ImageProvisioner;
use crate::launch::ContainerLauncher;
use crate::mounts::plan_mounts;
use crate::plan::EntrypointArgs;
use crate::scratch;
use crate::spool::Spool;
use crate::tool::ToolResolver;
use crate::volume::VolumeProvisioner;
use std::path::Path;
use std::sync::Arc;

/// Creates the engine for a resolved binary name.
pub type EngineFactory = Arc<dyn Fn(String) -> Arc<dyn Engine> + Send + Sync>;

/// Fail unless `workdir` lies strictly below `home`; `home` itself is
/// rejected as well.
pub fn ensure_workdir_below_home(workdir: &Path, home: &Path) -> Result<()> {
    match workdir.strip_prefix(home) {
        Ok(rest) if !rest.as_os_str().is_empty() => Ok(()),
        _ => Err(CoreError::WorkdirOutsideHome {
            workdir: workdir.to_path_buf(),
            home: home.to_path_buf(),
        }),
    }
}

/// Drives provisioning and the run step for one [`RunConfig`].
///
/// Every temporary resource created along the way is registered in a single
/// root [`Spool`] which is drained before [`run`](Self::run) returns, on
/// success and failure alike.
pub struct Orchestrator {
    config: RunConfig,
    resolver: ToolResolver,
    factory: EngineFactory,
}

impl Orchestrator {
    /// Orchestrator using `PATH` lookups and the engine's CLI.
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            resolver: ToolResolver::new(),
            factory: Arc::new(|binary| Arc::new(CliEngine::new(binary)) as Arc<dyn Engine>),
        }
    }

    /// Replace the tool resolver.
    pub fn with_resolver(mut self, resolver: ToolResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Replace the engine factory.
    pub fn with_engine_factory(
        mut self,
        factory: impl Fn(String) -> Arc<dyn Engine> + Send + Sync + 'static,
    ) -> Self {
        self.factory = Arc::new(factory);
        self
    }

    /// Run the configured command and return its exit code.
    ///
    /// # Errors
    ///
    /// Any provisioning or launch failure. A non-zero exit code of the
    /// command itself is not an error.
    pub async fn run(self) -> Result<i32> {
        let spool = Spool::new();
        let result = self.provision_and_launch(&spool).await;

        let released = spool.release_all().await;
        if let Err(e) = &released {
            tracing::warn!(error = %e, "Cleanup of temporary resources failed");
        }

        let code = result?;
        released?;
        Ok(code)
    }

    async fn provision_and_launch(&self, spool: &Spool) -> Result<i32> {
        let config = &self.config;
        ensure_workdir_below_home(&config.workdir, &config.home)?;

        let binary = self.resolver.resolve(config.engine.as_deref())?;
        let engine = (self.factory)(binary.clone());

        let identity = match &config.identity {
            Some(identity) => identity.clone(),
            None => Identity::detect().await?,
        };

        let ctx = EngineContext::new(
            binary,
            config.platform,
            config.context.clone(),
            identity.user.clone(),
            config.version.clone(),
        );
        tracing::debug!(
            engine = %ctx.engine(),
            platform = %ctx.platform(),
            context = %ctx.context(),
            "Provisioning environment"
        );

        ImageProvisioner::new(engine.clone(), config.progress)
            .ensure_image(spool, &ctx, config.platform.dockerfile(), BOOTSTRAP_SCRIPT)
            .await?;
        VolumeProvisioner::new(engine.clone())
            .ensure_volume(&ctx)
            .await?;

        let mounts = plan_mounts(&config.profile.dotfiles, &config.profile.environment, &config.home);
        let entry = EntrypointArgs {
            platform: config.platform,
            hostname: identity.hostname,
            user: identity.user,
            uid: identity.uid,
            group: identity.group,
            gid: identity.gid,
            home: config.home.clone(),
            workdir: config.workdir.clone(),
            dotfiles: config.profile.dotfiles.clone(),
            environment: mounts.env.iter().map(|e| e.name().to_string()).collect(),
            sudo: config.sudo,
        };

        let scope = spool.subscope();
        let dir = scratch::private_tempdir(&scope)?;
        let bootstrap =
            scratch::write_spooled(&scope, dir.join(BOOTSTRAP_NAME), BOOTSTRAP_SCRIPT, 0o750).await?;

        let mut launcher = ContainerLauncher::new(engine);
        if let Some(tty) = config.tty {
            launcher = launcher.with_tty(tty);
        }
        launcher
            .launch(&ctx, &mounts, &entry, &bootstrap, &config.command)
            .await
    }
}
