//! Capsula entry point.
//!
//! Provisions the container environment for the selected context and runs
//! the given command in it. Diagnostics go to stderr; stdout belongs to the
//! command. The process exits with the command's exit code, or with 1 if
//! provisioning or launching failed.

mod cli;

use anyhow::Context as _;
use capsula_core::{ContextDocument, Orchestrator, ProgressMode, RunConfig};
use clap::Parser;
use cli::{Cli, LogLevel};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(level: LogLevel) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("off")
            .add_directive(format!("capsula={}", level.directive()).parse()?)
            .add_directive(format!("capsula_core={}", level.directive()).parse()?),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(level >= LogLevel::Debug),
        )
        .try_init()?;
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let contexts = ContextDocument::load(cli.config.as_deref())
        .await
        .context("failed to load context document")?;
    let profile = contexts.profile(&cli.context);
    tracing::debug!(
        context = %cli.context,
        dotfiles = profile.dotfiles.len(),
        environment = profile.environment.len(),
        "Context resolved"
    );

    let mut builder = RunConfig::builder()
        .platform(cli.platform)
        .context(cli.context)
        .profile(profile)
        .sudo(cli.sudo)
        .progress(ProgressMode::detect(cli.log_level >= LogLevel::Info))
        .command(cli.command);
    if let Some(engine) = cli.engine.filter(|e| !e.trim().is_empty()) {
        builder = builder.engine(engine);
    }
    let config = builder.build()?;

    Ok(Orchestrator::new(config).run().await?)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    let logging = match init_tracing(cli.log_level) {
        Ok(()) => true,
        Err(e) => {
            eprintln!("capsula: failed to initialize logging: {e:?}");
            false
        }
    };

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) if logging => {
            tracing::error!("{e:#}");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("capsula: {e:?}");
            std::process::exit(1);
        }
    }
}
