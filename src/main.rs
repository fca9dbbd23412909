//! # repo-watcher
//!
//! ## Initialization Sequence
//!
//! 1. **Configuration** - Load and validate the YAML file (compiles the
//!    descriptor template when OBS meta project creation is on)
//! 2. **Platform** - Gitee client, or the in-memory platform with `--dry-run`
//! 3. **Governance** - Build the desired state once to learn the org and
//!    fail fast on broken governance files
//! 4. **Registry** - Seed observed state from the repositories the org has
//! 5. **Reconciliation Loop** - Run cycles on the worker pool
//! 6. **Ingress** - Optional inert webhook endpoint
//!
//! ## Shutdown
//!
//! SIGINT/SIGTERM stop the loop at the next cycle boundary; the process
//! exits once every dispatched task has finished.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use repo_watcher::cli::Cli;
use repo_watcher::ingress;
use watcher_core::{LoadedConfig, ResultExt, WatcherConfig};
use watcher_platform::{GiteeClient, GiteeConfig, InMemoryPlatform, PlatformClient};
use watcher_reconciler::{
    DescriptorPublisher, DesiredStateProvider, FsGovernanceSource, GovernanceBuilder,
    GovernanceSource, LoopConfig, PlatformGovernanceSource, ReconcilerBuilder, ReconcilerConfig,
    ReconciliationLoop, Registry, WorkerPool,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let loaded = WatcherConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    info!(
        config = %cli.config.display(),
        dry_run = cli.dry_run,
        "repo-watcher starting"
    );

    let platform = init_platform(&loaded.config, cli.dry_run)?;
    let builder = Arc::new(GovernanceBuilder::new(
        init_governance_source(&loaded.config, platform.clone(), cli.dry_run)?,
        &loaded.config.watching_files,
    ));

    let initial = builder
        .get_desired_state()
        .await
        .context("Failed to load governance files")?;
    info!(org = %initial.org, repos = initial.len(), "Governance loaded");

    let registry = Registry::load_from_platform(platform.as_ref(), &initial.org)
        .await
        .context("Failed to list repositories on the platform")?;

    let loop_runner = ReconciliationLoop::new(
        Arc::new(init_reconciler(&loaded, platform)?),
        builder,
        Arc::new(registry),
        WorkerPool::new(loaded.config.concurrent_size, loaded.config.queue_size)?,
        LoopConfig::from_watcher(&loaded.config),
    );

    if let Some(addr) = cli.webhook_addr {
        tokio::spawn(async move {
            ingress::serve(addr).await.ok_logged("Webhook ingress stopped");
        });
    }

    let stopper = loop_runner.stopper();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        stopper.stop();
    });

    loop_runner.run().await.context("Reconciliation loop failed")?;

    info!("repo-watcher stopped gracefully");
    Ok(())
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_platform(config: &WatcherConfig, dry_run: bool) -> Result<Arc<dyn PlatformClient>> {
    if dry_run {
        info!("Dry run: using the in-memory platform");
        return Ok(Arc::new(InMemoryPlatform::new()));
    }

    let gitee = GiteeConfig::from_settings(&config.platform)
        .context("Invalid platform settings")?;
    Ok(Arc::new(GiteeClient::new(gitee)?))
}

fn init_governance_source(
    config: &WatcherConfig,
    platform: Arc<dyn PlatformClient>,
    dry_run: bool,
) -> Result<Arc<dyn GovernanceSource>> {
    let files = &config.watching_files;
    match &files.local_root {
        Some(root) => Ok(Arc::new(FsGovernanceSource::new(root))),
        None if dry_run => bail!("--dry-run needs watching_files.local_root"),
        None => Ok(Arc::new(PlatformGovernanceSource::new(
            platform,
            files.source.clone(),
        ))),
    }
}

fn init_reconciler(
    loaded: &LoadedConfig,
    platform: Arc<dyn PlatformClient>,
) -> Result<watcher_reconciler::Reconciler> {
    let mut builder = ReconcilerBuilder::new()
        .with_client(platform.clone())
        .with_config(ReconcilerConfig::from_watcher(&loaded.config));

    if let Some(template) = &loaded.project_template {
        builder = builder.with_descriptor(DescriptorPublisher::new(
            platform,
            loaded.config.obs_meta_project.clone(),
            template.clone(),
        ));
    }

    Ok(builder.build()?)
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
        () = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
