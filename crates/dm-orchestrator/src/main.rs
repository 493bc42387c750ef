//! dockman
//!
//! Connects to the local Docker daemon and to every configured remote
//! machine over SSH, then lists the fleet or brings its containers up to
//! date.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dm_core::config::{self, DockmanConfig};
use dm_core::UpdatePolicy;
use dm_orchestrator::concurrency::scatter_gather;
use dm_orchestrator::output::{format_hosts, format_report};
use dm_orchestrator::service::{HostService, UpdateError};
use dm_orchestrator::update::UpdateReport;
use dm_orchestrator::OrchestratorState;

#[derive(Parser)]
#[command(name = "dockman")]
#[command(author, version, about = "Docker fleet manager")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    foreground: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect the fleet and list the reachable hosts
    Hosts,

    /// Update containers to the newest image of their tag
    Update(UpdateArgs),

    /// Show recorded updates for images present on a host
    Pending {
        /// Host to query (default host when omitted)
        #[arg(long)]
        host: Option<String>,
    },
}

#[derive(Args, Clone)]
struct UpdateArgs {
    /// Host to update (default host when omitted)
    #[arg(long, conflicts_with = "all_hosts")]
    host: Option<String>,

    /// Update every host in parallel
    #[arg(long)]
    all_hosts: bool,

    /// Ignore `dockman.update.disable` labels
    #[arg(long)]
    force: bool,

    /// Only record available updates
    #[arg(long)]
    notify_only: bool,

    /// Only update containers labelled `dockman.update`
    #[arg(long)]
    opt_in_only: bool,

    /// Update dockman's own container inside the loop
    #[arg(long)]
    allow_self: bool,

    /// Only containers created from this image reference
    #[arg(long, conflicts_with = "container")]
    image: Option<String>,

    /// Only these containers (ID, ID prefix or name)
    #[arg(long, num_args = 1..)]
    container: Vec<String>,

    /// Replace dockman's own container with this ID
    #[arg(long, conflicts_with_all = ["image", "container"])]
    self_container: Option<String>,
}

impl UpdateArgs {
    fn policy(&self, base: UpdatePolicy) -> UpdatePolicy {
        base.with_force_update(base.force_update || self.force)
            .with_notify_only(base.notify_only || self.notify_only)
            .with_opt_in_only(base.opt_in_only || self.opt_in_only)
            .with_allow_self_update(base.allow_self_update || self.allow_self)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.foreground { "debug" } else { &cli.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(cli.config.as_deref())?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let state = Arc::new(OrchestratorState::new(config));

    let default = tokio::select! {
        result = state.bootstrap() => result.context("Failed to connect the fleet")?,
        _ = cancel.cancelled() => {
            state.shutdown().await;
            return Ok(());
        }
    };
    tracing::debug!("Default host: {}", default);

    let result = match cli.command {
        Commands::Hosts => {
            let mut hosts: Vec<_> = state.registry.list_all().into_values().collect();
            hosts.sort_by(|a, b| a.name.cmp(&b.name));
            println!("{}", format_hosts(&hosts, Some(&default)));
            Ok(())
        }
        Commands::Update(args) => update(&state, args, &cancel).await,
        Commands::Pending { host } => pending(&state, host.as_deref()).await,
    };

    state.shutdown().await;
    tracing::info!("dockman finished");
    result
}

fn load_config(path: Option<&std::path::Path>) -> Result<DockmanConfig> {
    if let Some(path) = path {
        return config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path));
    }

    let default_path = config::default_config_path();
    if default_path.exists() {
        Ok(config::load_config(&default_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
            DockmanConfig::default()
        }))
    } else {
        tracing::info!("Using default configuration");
        Ok(DockmanConfig::default())
    }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, finishing the current step...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, finishing the current step...");
            }
        }

        cancel.cancel();
    });
}

fn service_for(state: &OrchestratorState, host: Option<&str>) -> Result<HostService> {
    let service = match host {
        Some(name) => {
            if !state.registry.list_names().iter().any(|n| n == name) {
                anyhow::bail!("Host {:?} is not connected", name);
            }
            state.get_service(name)?
        }
        None => state.default_service()?,
    };
    Ok(service)
}

async fn update(state: &OrchestratorState, args: UpdateArgs, cancel: &CancellationToken) -> Result<()> {
    let policy = args.policy(state.config.updater.policy());

    let services = if args.all_hosts {
        state
            .registry
            .list_names()
            .iter()
            .map(|name| state.get_service(name))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        vec![service_for(state, args.host.as_deref())?]
    };

    let tasks = services.into_iter().map(|service| {
        let args = args.clone();
        let cancel = cancel.clone();
        async move {
            let name = service.name().to_string();
            (name, run_update(&service, &args, policy, &cancel).await)
        }
    });

    let mut failed = 0;
    for joined in scatter_gather(tasks).await {
        match joined {
            Ok((_, Ok(report))) => {
                failed += report.failed();
                println!("{}", format_report(&report));
            }
            Ok((host, Err(e))) => {
                failed += 1;
                tracing::error!(host = %host, "Update failed: {}", e);
            }
            Err(e) => {
                failed += 1;
                tracing::error!("Update task panicked: {}", e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} update(s) failed", failed);
    }
    Ok(())
}

async fn run_update(
    service: &HostService,
    args: &UpdateArgs,
    policy: UpdatePolicy,
    cancel: &CancellationToken,
) -> Result<UpdateReport, UpdateError> {
    if let Some(id) = &args.self_container {
        service.update_self(id, cancel).await
    } else if let Some(tag) = &args.image {
        service.update_by_image(tag, policy, cancel).await
    } else if !args.container.is_empty() {
        service.update_by_container_id(&args.container, policy, cancel).await
    } else {
        service.update_all(policy, cancel).await
    }
}

async fn pending(state: &OrchestratorState, host: Option<&str>) -> Result<()> {
    let service = service_for(state, host)?;
    let pending = service.pending_updates().await?;

    if pending.is_empty() {
        println!("No pending updates on {}", service.name());
        return Ok(());
    }

    let mut records: Vec<_> = pending.into_values().collect();
    records.sort_by(|a, b| a.image_id.cmp(&b.image_id));
    for record in records {
        println!(
            "{}  {}  -> {}  (checked {})",
            service.name(),
            record.image_id,
            record.update_ref,
            record.checked_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}
