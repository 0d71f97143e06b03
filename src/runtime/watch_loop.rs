//! # Watch Loop
//!
//! Runs the Repository, ComponentPlan and Subscription controllers until shutdown.

use super::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use super::initialization::{scoped_api, InitializationResult};
use crate::controller::plan::reconcile_component_plan;
use crate::controller::repository::reconcile_repository;
use crate::controller::subscription::reconcile_subscription;
use crate::controller::watch::WatchedObject;
use crate::crd::{Component, ComponentPlan, Repository, Subscription};
use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::{watcher::Config, Controller};
use std::fmt::Debug;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tracing::{debug, info, Instrument};

const INITIAL_WATCH_BACKOFF_MS: u64 = 1_000;
const MAX_WATCH_BACKOFF_MS: u64 = 30_000;

/// Run every controller until SIGINT/SIGTERM, then cancel background work
pub async fn run_watch_loop(init: InitializationResult) -> Result<()> {
    let InitializationResult {
        client,
        config,
        repository_context,
        plan_context,
        subscription_context,
        server_state,
        shutdown,
    } = init;
    let namespace = config.watch_namespace.as_deref();
    let watcher_config = Config::default().any_semantic();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            info!("🛑 Shutdown signal received, stopping controllers");
            shutdown.cancel();
        }
    });

    let repositories = Controller::new(
        scoped_api::<Repository>(client.clone(), namespace),
        watcher_config.clone(),
    )
    .graceful_shutdown_on(shutdown.clone().cancelled_owned())
    .run(
        reconcile_repository,
        handle_reconciliation_error,
        repository_context,
    );

    let plans = Controller::new(
        scoped_api::<ComponentPlan>(client.clone(), namespace),
        watcher_config.clone(),
    )
    .owns(
        scoped_api::<ConfigMap>(client.clone(), namespace),
        watcher_config.clone(),
    )
    .graceful_shutdown_on(shutdown.clone().cancelled_owned())
    .run(
        reconcile_component_plan,
        handle_reconciliation_error,
        plan_context.clone(),
    );

    let component_index = subscription_context.index.clone();
    let plan_index = subscription_context.index.clone();
    let subscriptions = Controller::new(
        scoped_api::<Subscription>(client.clone(), namespace),
        watcher_config.clone(),
    )
    .watches(
        scoped_api::<Component>(client.clone(), namespace),
        watcher_config.clone(),
        move |component: Component| {
            WatchedObject::Component(&component).subscriptions(&component_index)
        },
    )
    .watches(
        scoped_api::<ComponentPlan>(client.clone(), namespace),
        watcher_config,
        move |plan: ComponentPlan| WatchedObject::ComponentPlan(&plan).subscriptions(&plan_index),
    )
    .graceful_shutdown_on(shutdown.clone().cancelled_owned())
    .run(
        reconcile_subscription,
        handle_reconciliation_error,
        subscription_context,
    );

    info!("Starting Repository, ComponentPlan and Subscription controllers...");
    tokio::join!(
        drain("repository", repositories),
        drain("componentplan", plans),
        drain("subscription", subscriptions),
    );

    server_state.set_ready(false);
    plan_context.pool.shutdown();
    if !shutdown.is_cancelled() {
        shutdown.cancel();
    }
    info!("Component controller shutting down");
    Ok(())
}

/// Consume one controller's result stream, logging each reconcile
async fn drain<S, T, E>(kind: &'static str, stream: S)
where
    S: futures::Stream<Item = std::result::Result<T, E>>,
    T: Debug,
    E: std::fmt::Display,
{
    let backoff = Arc::new(AtomicU64::new(INITIAL_WATCH_BACKOFF_MS));
    stream
        .for_each(|reconciliation_result| {
            let span = tracing::info_span!("reconciliation_result", resource.kind = kind);
            let backoff = backoff.clone();
            async move {
                match reconciliation_result {
                    Ok(resource) => {
                        debug!(resource = ?resource, "{} reconciliation successful", kind);
                        backoff.store(INITIAL_WATCH_BACKOFF_MS, std::sync::atomic::Ordering::Relaxed);
                    }
                    Err(e) => {
                        handle_watch_stream_error(kind, &e.to_string(), &backoff, MAX_WATCH_BACKOFF_MS)
                            .await;
                    }
                }
            }
            .instrument(span)
        })
        .await;
    info!("{} controller stopped", kind);
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut terminate =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
