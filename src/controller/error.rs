use super::key::ObjectKey;
use thiserror::Error;

/// Outcome of a failed reconciliation
///
/// The worker pool only looks at [`ReconcileError::is_retryable`]: retryable
/// errors are re-queued with backoff, everything else is logged and dropped
/// until the next change notification or resync.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Object missing namespace")]
    MissingNamespace,

    #[error("Object missing name")]
    MissingName,

    #[error("Invalid spec: {0}")]
    ValidationError(String),

    #[error("Service {0} not found")]
    ServiceNotFound(ObjectKey),

    #[error("Service {service} is managed by rollout '{owner}'")]
    ServiceConflict { service: ObjectKey, owner: String },

    #[error("Reconciler panicked: {0}")]
    Panicked(String),
}

impl ReconcileError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::KubeError(kube::Error::Api(err)) => {
                err.code == 409 || err.code == 429 || err.code >= 500
            }
            // Same object, same bytes: serializing it again fails again
            ReconcileError::KubeError(kube::Error::SerdeError(_)) => false,
            // Transport and auth refresh failures are usually transient
            ReconcileError::KubeError(_) => true,
            // The cache may simply not have caught up yet
            ReconcileError::ServiceNotFound(_) => true,
            ReconcileError::MissingNamespace
            | ReconcileError::MissingName
            | ReconcileError::ValidationError(_)
            | ReconcileError::ServiceConflict { .. }
            | ReconcileError::Panicked(_) => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_is_terminal() {
        assert!(!ReconcileError::ValidationError("bad".to_string()).is_retryable());
        assert!(!ReconcileError::Panicked("boom".to_string()).is_retryable());
    }

    #[test]
    fn test_missing_service_is_retryable() {
        let err = ReconcileError::ServiceNotFound(ObjectKey::new("prod", "svc"));
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Service prod/svc not found");
    }

    #[test]
    fn test_serialization_error_is_terminal() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!ReconcileError::KubeError(kube::Error::SerdeError(err)).is_retryable());
    }

    #[test]
    fn test_api_errors_by_status_code() {
        let api = |code| {
            ReconcileError::KubeError(kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: String::new(),
                reason: String::new(),
                code,
            }))
        };
        assert!(api(409).is_retryable());
        assert!(api(503).is_retryable());
        assert!(!api(422).is_retryable());
    }

    #[test]
    fn test_conflict_is_terminal() {
        let err = ReconcileError::ServiceConflict {
            service: ObjectKey::new("prod", "svc"),
            owner: "other".to_string(),
        };
        assert!(!err.is_retryable());
    }
}
