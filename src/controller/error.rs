//! # Reconciler Errors
//!
//! Errors returned to the controller runtime. Every variant ends up in the error
//! policy, which applies per-resource Fibonacci backoff.

use crate::controller::release::{PoolError, ReleaseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("finalizer error: {0}")]
    Finalizer(#[source] Box<kube::runtime::finalizer::Error<ReconcilerError>>),
    #[error("invalid spec: {0}")]
    Validation(String),
    #[error(transparent)]
    Release(#[from] ReleaseError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("failed to encode patch: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("object has no name or namespace")]
    MissingObjectKey,
}

impl ReconcilerError {
    /// Short label for metrics
    pub fn metric_label(&self) -> &'static str {
        match self {
            ReconcilerError::Kube(_) => "kube",
            ReconcilerError::Finalizer(_) => "finalizer",
            ReconcilerError::Validation(_) => "validation",
            ReconcilerError::Release(_) => "release",
            ReconcilerError::Pool(_) => "pool",
            ReconcilerError::Serialization(_) => "serialization",
            ReconcilerError::MissingObjectKey => "missing_object_key",
        }
    }
}

pub type Result<T, E = ReconcilerError> = std::result::Result<T, E>;
