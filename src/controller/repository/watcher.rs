//! # Repository Watchers
//!
//! Registry of per-Repository poll loops keyed by `namespace/name`.
//!
//! A loop is (re)started when the Repository generation changes and stopped when
//! the Repository is deleted. Every loop runs under a child of the process-wide
//! shutdown token.

use super::syncer::RepositorySyncer;
use crate::crd::Repository;
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};

#[derive(Debug)]
struct WatcherHandle {
    generation: i64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Debug)]
pub struct RepositoryWatchers {
    syncer: Arc<RepositorySyncer>,
    min_interval_secs: u64,
    shutdown: CancellationToken,
    watchers: Mutex<HashMap<String, WatcherHandle>>,
}

/// Registry key of a Repository
pub fn watcher_key(repository: &Repository) -> String {
    format!(
        "{}/{}",
        repository.namespace().unwrap_or_default(),
        repository.name_any()
    )
}

impl RepositoryWatchers {
    pub fn new(
        syncer: Arc<RepositorySyncer>,
        min_interval_secs: u64,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            syncer,
            min_interval_secs,
            shutdown,
            watchers: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, WatcherHandle>> {
        self.watchers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make sure a loop runs for the current generation; returns `true` when one was (re)started
    pub fn add(&self, repository: &Repository) -> bool {
        let key = watcher_key(repository);
        let generation = repository.metadata.generation.unwrap_or_default();
        let mut watchers = self.lock();

        if let Some(existing) = watchers.get(&key) {
            if existing.generation == generation && !existing.task.is_finished() {
                return false;
            }
            info!(
                "Restarting watcher for repository {} (generation {} -> {})",
                key, existing.generation, generation
            );
            existing.cancel.cancel();
        } else {
            info!("Starting watcher for repository {}", key);
        }

        let cancel = self.shutdown.child_token();
        let interval = repository.pull_strategy().interval(self.min_interval_secs);
        let span = tracing::info_span!("repository.watcher", repository = %key, generation);
        let task = tokio::spawn(
            run_poll_loop(
                Arc::clone(&self.syncer),
                repository.clone(),
                interval,
                cancel.clone(),
            )
            .instrument(span),
        );
        watchers.insert(
            key,
            WatcherHandle {
                generation,
                cancel,
                task,
            },
        );
        true
    }

    /// Stop the loop of `key`; returns `true` when one was running
    pub fn remove(&self, key: &str) -> bool {
        match self.lock().remove(key) {
            Some(handle) => {
                info!("Stopping watcher for repository {}", key);
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Generation the running loop of `key` was started for
    pub fn lookup(&self, key: &str) -> Option<i64> {
        self.lock().get(key).map(|handle| handle.generation)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Sync immediately, then once per `interval` until cancelled
pub async fn run_poll_loop(
    syncer: Arc<RepositorySyncer>,
    repository: Repository,
    interval: Duration,
    cancel: CancellationToken,
) {
    debug!("Poll loop running every {}s", interval.as_secs());
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            result = syncer.sync_and_record(&repository) => {
                if let Ok(summary) = result {
                    debug!("Sync complete: {:?}", summary);
                }
            }
        }
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }
    debug!("Poll loop stopped");
}
