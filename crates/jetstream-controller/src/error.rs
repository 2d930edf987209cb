use jetstream_model::{KeyError, StoreError};

use crate::backend::BackendError;
use crate::config::ConfigError;

/// Outcome of a failed reconcile.
///
/// Everything except `Validation` and `InvalidKey` goes back on the queue.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("invalid work item key: {0}")]
    InvalidKey(#[from] KeyError),
    #[error("invalid stream spec: {0}")]
    Validation(String),
    #[error("backend: {0}")]
    Backend(#[from] BackendError),
    #[error("resource store: {0}")]
    Store(#[from] StoreError),
    #[error("transient: {0}")]
    Transient(String),
}

impl ReconcileError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidKey(_) | Self::Validation(_) => false,
            Self::Backend(err) => !matches!(err, BackendError::InvalidConfig(_)),
            Self::Store(_) | Self::Transient(_) => true,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ControllerError {
    #[error("failed to wait for cache sync: {0}")]
    CacheSync(String),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("backoff: {0}")]
    Backoff(String),
}

#[cfg(test)]
mod test {
    use jetstream_model::{KeyError, StoreError};

    use crate::backend::BackendError;

    use super::ReconcileError;

    #[test]
    fn test_retry_classification() {
        assert!(!ReconcileError::Validation("storage".to_owned()).is_retryable());
        assert!(!ReconcileError::from(KeyError::MissingName).is_retryable());
        assert!(ReconcileError::from(BackendError::Transient("io".to_owned())).is_retryable());
        assert!(!ReconcileError::from(BackendError::InvalidConfig("x".to_owned())).is_retryable());
        assert!(ReconcileError::from(StoreError::WatchClosed).is_retryable());
    }
}
