//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! server startup, Kubernetes client setup and the shared reconciler contexts.

use crate::config::{load_config, SharedControllerConfig};
use crate::controller::backoff::BackoffRegistry;
use crate::controller::plan::PlanContext;
use crate::controller::release::{HelmCli, ReleaseWorkerPool};
use crate::controller::repository::{
    KubeComponentStore, KubeCredentialSource, RepositoryContext, RepositorySyncer,
    RepositoryWatchers,
};
use crate::controller::server::{start_server, ServerState};
use crate::controller::subscription::{SubscriptionContext, SubscriptionIndex};
use crate::crd::{ComponentPlan, Repository, Subscription};
use crate::observability;
use anyhow::{Context, Result};
use kube::{api::Api, api::ListParams, Client, Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// Controller configuration
    pub config: SharedControllerConfig,
    pub repository_context: Arc<RepositoryContext>,
    pub plan_context: Arc<PlanContext>,
    pub subscription_context: Arc<SubscriptionContext>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    /// Cancelled on shutdown; parent of every poll loop and release job
    pub shutdown: CancellationToken,
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Helm discovery, release worker pool and repository watchers
/// - Startup resource summary
pub async fn initialize() -> Result<InitializationResult> {
    // Must run before anything opens a TLS connection
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "component_controller=info".into()),
        )
        .init();

    info!("Starting Component Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    let (controller_config, server_config) = load_config();
    info!("Controller configuration: {:?}", controller_config);
    let config: SharedControllerConfig = Arc::new(controller_config);

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());

    // Start server in background task and wait for it to bind
    let server_state_clone = server_state.clone();
    let server_port = server_config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(
        &server_state,
        &server_handle,
        Duration::from_secs(server_config.startup_timeout_secs),
        Duration::from_millis(server_config.poll_interval_ms),
    )
    .await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let shutdown = CancellationToken::new();

    let helm = HelmCli::discover(
        config.helm_bin.as_deref(),
        Duration::from_secs(config.release_timeout_secs),
    )?;
    let pool = Arc::new(ReleaseWorkerPool::new(
        Arc::new(helm),
        config.result_ttl(),
        shutdown.child_token(),
    ));

    let credentials = Arc::new(KubeCredentialSource::new(client.clone()));
    let syncer = Arc::new(RepositorySyncer::new(
        Arc::new(KubeComponentStore::new(client.clone())),
        credentials.clone(),
        Duration::from_millis(config.pull_retry_backoff_ms),
    ));
    let watchers = Arc::new(RepositoryWatchers::new(
        syncer,
        config.min_pull_interval_secs,
        shutdown.child_token(),
    ));

    let backoff = || BackoffRegistry::new(config.error_backoff_min_secs, config.error_backoff_max_secs);
    let repository_context = Arc::new(RepositoryContext {
        client: client.clone(),
        watchers,
        config: config.clone(),
        backoff: backoff(),
    });
    let plan_context = Arc::new(PlanContext {
        client: client.clone(),
        pool,
        credentials,
        config: config.clone(),
        backoff: backoff(),
    });
    let subscription_context = Arc::new(SubscriptionContext {
        client: client.clone(),
        index: Arc::new(SubscriptionIndex::new()),
        config: config.clone(),
        backoff: backoff(),
    });

    summarize_existing::<Repository>(&client, config.watch_namespace.as_deref()).await;
    summarize_existing::<ComponentPlan>(&client, config.watch_namespace.as_deref()).await;
    summarize_existing::<Subscription>(&client, config.watch_namespace.as_deref()).await;

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        config,
        repository_context,
        plan_context,
        subscription_context,
        server_state,
        shutdown,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    startup_timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.ready() {
            info!("HTTP server is ready and accepting connections");
            break;
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}

/// `Api<K>` scoped to `namespace`, or cluster-wide when unset
pub fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Log the existing resources of one kind, grouped by namespace
///
/// Also confirms the CRD is installed before the watch starts.
async fn summarize_existing<K>(client: &Client, namespace: Option<&str>)
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
    <K as Resource>::DynamicType: Default,
{
    let kind = K::kind(&Default::default()).to_string();
    let api: Api<K> = scoped_api(client.clone(), namespace);
    match api.list(&ListParams::default()).await {
        Ok(list) => {
            let mut by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for item in &list.items {
                by_namespace
                    .entry(item.namespace().unwrap_or_else(|| "default".to_string()))
                    .or_default()
                    .push(item.name_any());
            }
            info!(
                "Resource Kind: {} - {} existing in {} namespace(s)",
                kind,
                list.items.len(),
                by_namespace.len()
            );
            for (namespace, mut names) in by_namespace {
                names.sort();
                info!(
                    "  {}: {}",
                    namespace,
                    if names.len() <= 3 {
                        names.join(", ")
                    } else {
                        format!("{}, ... ({} total)", names[..3].join(", "), names.len())
                    }
                );
            }
        }
        Err(e) => {
            error!("{} CRD is not queryable; {:?}. Is the CRD installed?", kind, e);
            error!("Installation: crdgen | kubectl apply -f -");
            warn!("Continuing despite CRD queryability check failure - controller will retry");
        }
    }
}
