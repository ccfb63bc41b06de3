//! mvirt-converge: runs the managed resource controllers.
//!
//! This binary:
//! - Loads provider configs and managed resources from a seed manifest
//! - Runs one controller per built-in kind against an in-memory store
//! - Talks to an emulated cloud provider
//! - Stops all controllers on Ctrl-C

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mvirt_converge::clients::{Emulated, MemoryCloud, SUBSCRIPTION_ID};
use mvirt_converge::external::DEFAULT_PROVIDER_CONFIG;
use mvirt_converge::kinds::{self, DatabaseServer, StorageAccount, VirtualNetworkRule};
use mvirt_converge::manifest::Manifest;
use mvirt_converge::store::{MemorySecretStore, MemoryStore, ObjectStore, SecretStore};
use mvirt_converge::{
    Controller, CredentialConnector, Credentials, EngineConfig, ReconcileError, Reconciler,
    StaticCredentials,
};

/// mvirt convergence engine
#[derive(Parser, Debug)]
#[command(name = "mvirt-converge", version, about)]
struct Args {
    /// Seed manifest (JSON) with provider configs and managed resources
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Requeue interval for available resources, in seconds
    #[arg(long, default_value = "60")]
    poll_interval: u64,

    /// Requeue interval while a resource is still provisioning, in seconds
    #[arg(long, default_value = "15")]
    wait_interval: u64,

    /// Deadline for a single reconcile pass, in seconds
    #[arg(long, default_value = "120")]
    timeout: u64,

    /// Upper bound for the retry delay after failures, in seconds
    #[arg(long, default_value = "300")]
    max_backoff: u64,

    /// Concurrent reconcile passes per kind
    #[arg(long, default_value = "5")]
    concurrency: usize,

    /// Reads for which the emulated cloud reports writes as in progress
    #[arg(long, default_value = "0")]
    provisioning_polls: usize,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            poll_interval: Duration::from_secs(self.poll_interval),
            wait_interval: Duration::from_secs(self.wait_interval),
            reconcile_timeout: Duration::from_secs(self.timeout),
            max_backoff: Duration::from_secs(self.max_backoff),
            concurrency: self.concurrency,
            ..Default::default()
        }
        .normalized()
    }
}

/// Shared collaborators handed to every controller.
#[derive(Clone)]
struct Runtime {
    store: Arc<dyn ObjectStore>,
    secrets: Arc<dyn SecretStore>,
    resolver: StaticCredentials,
    config: EngineConfig,
    provisioning_polls: usize,
    shutdown: watch::Receiver<bool>,
}

impl Runtime {
    fn spawn_controller<K: Emulated>(&self, tasks: &mut JoinSet<Result<(), ReconcileError>>) {
        let cloud = MemoryCloud::<K>::new().with_provisioning_polls(self.provisioning_polls);
        let connector = CredentialConnector::new(self.resolver.clone(), cloud);
        let reconciler = Arc::new(Reconciler::<K, _>::new(
            Arc::clone(&self.store),
            Arc::clone(&self.secrets),
            connector,
            self.config.clone(),
        ));
        let shutdown = self.shutdown.clone();
        tasks.spawn(Controller::new(reconciler).run(shutdown));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mvirt_converge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = args.engine_config();

    info!("Starting mvirt-converge");
    info!(
        "Poll interval {:?}, wait interval {:?}, timeout {:?}, concurrency {}",
        config.poll_interval, config.wait_interval, config.reconcile_timeout, config.concurrency
    );

    let store = Arc::new(MemoryStore::new());
    let secrets = Arc::new(MemorySecretStore::new());

    let manifest = match &args.manifest {
        Some(path) => Manifest::load(path)
            .with_context(|| format!("Failed to load manifest {}", path.display()))?,
        None => {
            warn!("No manifest given, starting with an empty store");
            Manifest::default()
        }
    };

    let mut resolver = StaticCredentials::new();
    if manifest.provider_configs.is_empty() {
        resolver = resolver.with_config(
            DEFAULT_PROVIDER_CONFIG,
            Credentials::new().with(SUBSCRIPTION_ID, "local"),
        );
    }
    for (name, credentials) in manifest.credentials() {
        resolver = resolver.with_config(name, credentials);
    }

    for object in manifest.objects {
        let key = object.key();
        let kind = object.kind.clone();
        store
            .create(object)
            .await
            .with_context(|| format!("Failed to seed {} {}", kind, key))?;
        info!("Seeded {} {}", kind, key);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runtime = Runtime {
        store,
        secrets,
        resolver,
        config,
        provisioning_polls: args.provisioning_polls,
        shutdown: shutdown_rx,
    };

    let mut tasks = JoinSet::new();
    runtime.spawn_controller::<DatabaseServer>(&mut tasks);
    runtime.spawn_controller::<StorageAccount>(&mut tasks);
    runtime.spawn_controller::<VirtualNetworkRule>(&mut tasks);
    for info in kinds::CATALOG {
        info!(
            "Running {} controller ({}, connection secret: {})",
            info.kind,
            info.description,
            if info.publishes_secret { "yes" } else { "no" }
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    // Controllers also stop when the receiver sees the sender dropped.
    let _ = shutdown_tx.send(true);

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Controller failed: {}", e),
            Err(e) => error!("Controller task failed: {}", e),
        }
    }

    Ok(())
}
