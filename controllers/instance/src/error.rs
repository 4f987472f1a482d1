//! Controller-specific error types.
//!
//! Cluster API failures are classified once, at the client seam, so the
//! reconciler can branch on conflicts and missing objects without digging
//! into HTTP status codes.

use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Instance Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error not covered by a more specific variant
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Optimistic-concurrency conflict (HTTP 409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The object being created already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The object being updated does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Template referenced by an Instance could not be retrieved
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// Tenant referenced by an Instance could not be retrieved
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    /// Resource content the controller cannot work with
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// (De)serialization of a Kubernetes object failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Metrics registry failure
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Translate a kube-rs error into the controller taxonomy.
    pub fn from_kube(err: KubeError) -> Self {
        match err {
            KubeError::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Self::AlreadyExists(ae.message)
            }
            KubeError::Api(ae) if ae.code == 409 => Self::Conflict(ae.message),
            KubeError::Api(ae) if ae.code == 404 => Self::NotFound(ae.message),
            other => Self::Kube(other),
        }
    }

    /// Whether the error is an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
