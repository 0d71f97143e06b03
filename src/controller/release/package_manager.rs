//! # Package Manager Seam
//!
//! The worker pool drives releases through this trait so the controller never
//! depends on a concrete package manager. [`super::HelmCli`] is the production
//! implementation; tests substitute an in-memory fake.

use super::types::{Release, ReleaseKey, ReleaseRequest};
use crate::crd::ReleaseConfig;
use async_trait::async_trait;
use thiserror::Error;

/// Package-manager failure with transient/permanent classification
#[derive(Debug, Error)]
#[error("{action} failed for release {key}: {reason:?} - {message}")]
pub struct ReleaseError {
    pub action: &'static str,
    pub key: String,
    pub reason: ReleaseFailureReason,
    pub message: String,
}

impl ReleaseError {
    pub fn new(
        action: &'static str,
        key: &ReleaseKey,
        reason: ReleaseFailureReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            action,
            key: key.to_string(),
            reason,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.reason.is_transient()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseFailureReason {
    /// The package-manager binary could not be found or started
    BinaryUnavailable,
    /// Chart or version not found in the repository
    ChartNotFound,
    /// Release does not exist
    ReleaseNotFound,
    /// Action exceeded its timeout
    Timeout,
    /// Another operation holds the release lock (pending-* status)
    Conflict,
    /// Output could not be parsed
    InvalidOutput,
    /// Scratch files could not be written
    Io,
    /// Action reported failure
    ActionFailed,
}

impl ReleaseFailureReason {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReleaseFailureReason::Timeout
                | ReleaseFailureReason::Conflict
                | ReleaseFailureReason::Io
                | ReleaseFailureReason::BinaryUnavailable
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseFailureReason::BinaryUnavailable => "binary_unavailable",
            ReleaseFailureReason::ChartNotFound => "chart_not_found",
            ReleaseFailureReason::ReleaseNotFound => "release_not_found",
            ReleaseFailureReason::Timeout => "timeout",
            ReleaseFailureReason::Conflict => "conflict",
            ReleaseFailureReason::InvalidOutput => "invalid_output",
            ReleaseFailureReason::Io => "io",
            ReleaseFailureReason::ActionFailed => "action_failed",
        }
    }
}

/// Operations the controller needs from a package manager
#[async_trait]
pub trait PackageManager: Send + Sync + std::fmt::Debug {
    /// Render the chart without touching the cluster
    async fn template(&self, request: &ReleaseRequest) -> Result<String, ReleaseError>;

    /// Install the release, or upgrade it when it already exists
    async fn install_or_upgrade(&self, request: &ReleaseRequest) -> Result<Release, ReleaseError>;

    async fn uninstall(&self, key: &ReleaseKey) -> Result<(), ReleaseError>;

    /// Roll back to `revision` and return the revision it produced
    async fn rollback(
        &self,
        key: &ReleaseKey,
        revision: i32,
        config: &ReleaseConfig,
    ) -> Result<Release, ReleaseError>;

    /// Currently deployed revision, `None` when the release does not exist
    async fn last_release(&self, key: &ReleaseKey) -> Result<Option<Release>, ReleaseError>;
}
