//! # Release Worker Pool
//!
//! Runs package-manager actions off the reconcile path.
//!
//! ## Invariants
//!
//! - At most one job per `(class, release key)` is in flight.
//! - A job is identified by the plan snapshot that requested it ([`JobIdentity`]).
//!   A request whose identity supersedes the running one cancels it before
//!   starting the replacement.
//! - Finished results are cached per identity for a fixed TTL; reading a result
//!   does not evict it.
//! - One mutex guards the job table and both result caches. It is never held
//!   across an `.await`.

use super::cache::ResultCache;
use super::package_manager::{PackageManager, ReleaseError, ReleaseFailureReason};
use super::types::{ChartRef, JobClass, JobState, Release, ReleaseKey, ReleaseRequest};
use crate::controller::annotations::release_owned_by;
use crate::crd::ComponentPlan;
use crate::observability;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Requests the pool refuses to accept
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("uninstall of release {0} is in progress")]
    UninstallInProgress(String),
    #[error("install or upgrade of release {0} is in progress")]
    InstallInProgress(String),
}

/// Plan snapshot a job was started for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobIdentity {
    pub class: JobClass,
    pub key: ReleaseKey,
    pub plan_uid: String,
    pub generation: i64,
    /// Install/upgrade only: UID of the Repository serving the chart
    pub repository_uid: Option<String>,
    /// Install/upgrade only: failed attempts recorded before this one
    pub attempt: u32,
}

impl JobIdentity {
    pub fn install(plan: &ComponentPlan, repository_uid: &str, attempt: u32) -> Self {
        Self {
            class: JobClass::InstallOrUpgrade,
            key: ReleaseKey::for_plan(plan),
            plan_uid: plan.uid().to_string(),
            generation: plan.generation(),
            repository_uid: Some(repository_uid.to_string()),
            attempt,
        }
    }

    /// Uninstall and rollback jobs are identified by plan UID and generation only
    pub fn plan_scoped(class: JobClass, plan: &ComponentPlan) -> Self {
        Self {
            class,
            key: ReleaseKey::for_plan(plan),
            plan_uid: plan.uid().to_string(),
            generation: plan.generation(),
            repository_uid: None,
            attempt: 0,
        }
    }

    /// `self` makes the running job `running` obsolete
    pub fn supersedes(&self, running: &JobIdentity) -> bool {
        self.plan_uid != running.plan_uid
            || self.repository_uid != running.repository_uid
            || self.generation > running.generation
            || (self.generation == running.generation && self.attempt != running.attempt)
    }
}

#[derive(Debug)]
struct ActiveJob {
    id: u64,
    identity: JobIdentity,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct PoolState {
    next_job_id: u64,
    jobs: HashMap<(JobClass, ReleaseKey), ActiveJob>,
    release_results: ResultCache<JobIdentity, JobState<Release>>,
    uninstall_results: ResultCache<JobIdentity, JobState<()>>,
}

/// Keyed, cancellable executor for release actions
#[derive(Debug)]
pub struct ReleaseWorkerPool {
    manager: Arc<dyn PackageManager>,
    shutdown: CancellationToken,
    state: Arc<Mutex<PoolState>>,
}

impl ReleaseWorkerPool {
    /// Create a pool whose jobs are cancelled together with `shutdown`
    pub fn new(
        manager: Arc<dyn PackageManager>,
        result_ttl: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            manager,
            shutdown,
            state: Arc::new(Mutex::new(PoolState {
                next_job_id: 0,
                jobs: HashMap::new(),
                release_results: ResultCache::new(result_ttl),
                uninstall_results: ResultCache::new(result_ttl),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        lock_state(&self.state)
    }

    /// Render the release manifest without touching the cluster
    pub async fn get_manifests(
        &self,
        plan: &ComponentPlan,
        chart: ChartRef,
    ) -> Result<String, ReleaseError> {
        let request = ReleaseRequest::for_plan(plan, chart);
        self.manager.template(&request).await
    }

    /// Start, join or report the install/upgrade job of `plan`
    pub fn install_or_upgrade(
        &self,
        plan: &ComponentPlan,
        repository_uid: &str,
        chart: ChartRef,
        attempt: u32,
    ) -> Result<JobState<Release>, PoolError> {
        let identity = JobIdentity::install(plan, repository_uid, attempt);
        let key = identity.key.clone();
        let mut state = self.lock();

        if state.jobs.contains_key(&(JobClass::Uninstall, key.clone())) {
            return Err(PoolError::UninstallInProgress(key.to_string()));
        }

        if let Some(job) = state.jobs.get(&(JobClass::InstallOrUpgrade, key.clone())) {
            if job.identity == identity || !identity.supersedes(&job.identity) {
                return Ok(JobState::Running);
            }
            info!(
                "⏹️  Cancelling stale {} job for {} (generation {} attempt {} superseded by generation {} attempt {})",
                JobClass::InstallOrUpgrade.as_str(),
                key,
                job.identity.generation,
                job.identity.attempt,
                identity.generation,
                identity.attempt
            );
            job.cancel.cancel();
            observability::metrics::increment_release_jobs_cancelled(JobClass::InstallOrUpgrade.as_str());
            state.jobs.remove(&(JobClass::InstallOrUpgrade, key.clone()));
        }

        if let Some(result) = state.release_results.get(&identity) {
            return Ok(result);
        }

        let request = ReleaseRequest::for_plan(plan, chart);
        let manager = Arc::clone(&self.manager);
        self.spawn_job(
            &mut state,
            identity,
            store_release,
            async move { manager.install_or_upgrade(&request).await },
        );
        Ok(JobState::Started)
    }

    /// Read-only view of the install/upgrade job for this identity
    pub fn poll_install(
        &self,
        plan: &ComponentPlan,
        repository_uid: &str,
        attempt: u32,
    ) -> Option<JobState<Release>> {
        let identity = JobIdentity::install(plan, repository_uid, attempt);
        let state = self.lock();
        if state
            .jobs
            .get(&(JobClass::InstallOrUpgrade, identity.key.clone()))
            .is_some_and(|job| job.identity == identity)
        {
            return Some(JobState::Running);
        }
        state.release_results.get(&identity)
    }

    /// Start, join or report the uninstall job of `plan`.
    ///
    /// An in-flight install of the same plan is cancelled first and the call reports
    /// `Running` until that job has wound down. The job itself leaves releases that
    /// were not produced by `plan` untouched.
    pub fn uninstall(&self, plan: &ComponentPlan) -> Result<JobState<()>, PoolError> {
        let identity = JobIdentity::plan_scoped(JobClass::Uninstall, plan);
        let key = identity.key.clone();
        let mut state = self.lock();

        for class in [JobClass::InstallOrUpgrade, JobClass::Rollback] {
            if let Some(job) = state.jobs.get(&(class, key.clone())) {
                if job.identity.plan_uid == identity.plan_uid && !job.cancel.is_cancelled() {
                    info!(
                        "⏹️  Cancelling {} job for {} before uninstall",
                        class.as_str(),
                        key
                    );
                    job.cancel.cancel();
                    observability::metrics::increment_release_jobs_cancelled(class.as_str());
                }
                return Ok(JobState::Running);
            }
        }

        if let Some(job) = state.jobs.get(&(JobClass::Uninstall, key.clone())) {
            if job.identity == identity || !identity.supersedes(&job.identity) {
                return Ok(JobState::Running);
            }
            job.cancel.cancel();
            observability::metrics::increment_release_jobs_cancelled(JobClass::Uninstall.as_str());
            state.jobs.remove(&(JobClass::Uninstall, key.clone()));
        }

        if let Some(result) = state.uninstall_results.get(&identity) {
            return Ok(result);
        }

        let manager = Arc::clone(&self.manager);
        let snapshot = plan.clone();
        let job_key = key.clone();
        self.spawn_job(&mut state, identity, store_uninstall, async move {
            match manager.last_release(&job_key).await? {
                None => {
                    info!("Release {} does not exist, nothing to uninstall", job_key);
                    Ok(())
                }
                Some(release) if !release_owned_by(&snapshot, &release.description, release.revision) => {
                    info!(
                        "Release {} revision {} was not installed by this plan, leaving it untouched",
                        job_key, release.revision
                    );
                    Ok(())
                }
                Some(_) => match manager.uninstall(&job_key).await {
                    Err(e) if e.reason == ReleaseFailureReason::ReleaseNotFound => Ok(()),
                    other => other,
                },
            }
        });
        Ok(JobState::Started)
    }

    /// Start, join or report a rollback of `plan` to its installed revision
    pub fn rollback(&self, plan: &ComponentPlan) -> Result<JobState<Release>, PoolError> {
        let identity = JobIdentity::plan_scoped(JobClass::Rollback, plan);
        let key = identity.key.clone();
        let mut state = self.lock();

        if state.jobs.contains_key(&(JobClass::InstallOrUpgrade, key.clone())) {
            return Err(PoolError::InstallInProgress(key.to_string()));
        }
        if state.jobs.contains_key(&(JobClass::Uninstall, key.clone())) {
            return Err(PoolError::UninstallInProgress(key.to_string()));
        }

        if let Some(job) = state.jobs.get(&(JobClass::Rollback, key.clone())) {
            if job.identity == identity || !identity.supersedes(&job.identity) {
                return Ok(JobState::Running);
            }
            job.cancel.cancel();
            observability::metrics::increment_release_jobs_cancelled(JobClass::Rollback.as_str());
            state.jobs.remove(&(JobClass::Rollback, key.clone()));
        }

        if let Some(result) = state.release_results.get(&identity) {
            return Ok(result);
        }

        let manager = Arc::clone(&self.manager);
        let revision = plan.installed_revision();
        let config = plan.spec.config.clone();
        let job_key = key.clone();
        self.spawn_job(&mut state, identity, store_release, async move {
            manager.rollback(&job_key, revision, &config).await
        });
        Ok(JobState::Started)
    }

    /// Deployed revision of `key`, straight from the package manager
    pub async fn last_release(&self, key: &ReleaseKey) -> Result<Option<Release>, ReleaseError> {
        self.manager.last_release(key).await
    }

    /// Number of jobs currently in flight
    pub fn active_jobs(&self) -> usize {
        self.lock().jobs.len()
    }

    /// Cancel every in-flight job
    pub fn shutdown(&self) {
        info!("Shutting down release worker pool");
        self.shutdown.cancel();
    }

    fn spawn_job<T, F>(
        &self,
        state: &mut PoolState,
        identity: JobIdentity,
        store: fn(&mut PoolState, JobIdentity, JobState<T>),
        action: F,
    ) where
        T: Send + 'static,
        F: Future<Output = Result<T, ReleaseError>> + Send + 'static,
    {
        state.next_job_id += 1;
        let id = state.next_job_id;
        let cancel = self.shutdown.child_token();
        let class = identity.class;
        state.jobs.insert(
            (class, identity.key.clone()),
            ActiveJob {
                id,
                identity: identity.clone(),
                cancel: cancel.clone(),
            },
        );
        observability::metrics::increment_release_jobs_started(class.as_str());

        let shared = Arc::clone(&self.state);
        let span = tracing::info_span!(
            "release.job",
            job.id = id,
            job.class = class.as_str(),
            release = %identity.key,
            generation = identity.generation,
            attempt = identity.attempt
        );
        tokio::spawn(
            async move {
                let started = std::time::Instant::now();
                debug!("Release job started");
                let outcome = tokio::select! {
                    () = cancel.cancelled() => None,
                    result = action => Some(result),
                };
                observability::metrics::decrement_release_jobs_active(class.as_str());

                let mut state = lock_state(&shared);
                let slot_key = (class, identity.key.clone());
                if state.jobs.get(&slot_key).is_some_and(|job| job.id == id) {
                    state.jobs.remove(&slot_key);
                }
                let Some(result) = outcome else {
                    info!("Release job cancelled");
                    return;
                };

                let elapsed = started.elapsed().as_secs_f64();
                let job_state = match result {
                    Ok(value) => {
                        info!("✅ Release job succeeded in {:.1}s", elapsed);
                        observability::metrics::observe_release_job(class.as_str(), "success", elapsed);
                        JobState::Succeeded(value)
                    }
                    Err(e) => {
                        warn!("❌ Release job failed in {:.1}s: {}", elapsed, e);
                        observability::metrics::observe_release_job(class.as_str(), "failure", elapsed);
                        JobState::Failed(e.to_string())
                    }
                };
                store(&mut state, identity, job_state);
            }
            .instrument(span),
        );
    }
}

fn lock_state(state: &Mutex<PoolState>) -> MutexGuard<'_, PoolState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn store_release(state: &mut PoolState, identity: JobIdentity, result: JobState<Release>) {
    state.release_results.purge_expired();
    state.release_results.insert(identity, result);
}

fn store_uninstall(state: &mut PoolState, identity: JobIdentity, result: JobState<()>) {
    state.uninstall_results.purge_expired();
    state.uninstall_results.insert(identity, result);
}
