//! Error taxonomy shared by the retry engine, circuit breaker, executor and
//! state store.

use std::fmt;

/// Classification used by the retry engine to decide whether a failure is
/// worth retrying. Task functions may implement [`TaskError`] to report
/// their own category; otherwise the engine falls back to [`ErrorCategory::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Transient,
    Throttling,
    Timeout,
    NetworkError,
    ClientError,
    ServerError,
    Authentication,
    Authorization,
    ResourceNotFound,
    Validation,
    Unknown,
}

impl ErrorCategory {
    /// Whether this category is retryable absent any other policy override.
    pub fn is_retryable_by_default(&self) -> bool {
        !matches!(
            self,
            ErrorCategory::ClientError
                | ErrorCategory::Validation
                | ErrorCategory::Authentication
                | ErrorCategory::Authorization
                | ErrorCategory::ResourceNotFound
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Throttling => "throttling",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::ResourceNotFound => "resource_not_found",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// What the retry engine should do next after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryWithBackoff,
    RetryImmediately,
    Stop,
}

/// Minimal surface a task function's error must expose so the retry engine
/// can classify it without downcasting. Implement this directly on a task's
/// error type; use [`OpaqueTaskError`] to wrap an arbitrary error that has no
/// meaningful category.
pub trait TaskError: std::error::Error + Send + Sync + 'static {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Unknown
    }

    /// Explicit retryability override; `None` defers to the category default.
    fn retryable(&self) -> Option<bool> {
        None
    }
}

/// Boxed, type-erased task error carried through the scheduler, which must
/// hold a heterogeneous set of task functions behind one error type.
pub type BoxTaskError = Box<dyn TaskError>;

impl TaskError for BoxTaskError {
    fn category(&self) -> ErrorCategory {
        (**self).category()
    }

    fn retryable(&self) -> Option<bool> {
        (**self).retryable()
    }
}

/// Adapts any ordinary error into a [`TaskError`] classified as
/// [`ErrorCategory::Unknown`] (still retryable, per §4.1 rule 6) — useful for
/// task functions whose failures don't carry a meaningful category.
#[derive(Debug)]
pub struct OpaqueTaskError(pub Box<dyn std::error::Error + Send + Sync>);

impl fmt::Display for OpaqueTaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for OpaqueTaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl TaskError for OpaqueTaskError {}

/// Errors surfaced by the [`crate::store`] backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("execution already exists: {0}")]
    AlreadyExists(String),

    #[error("execution not found: {0}")]
    NotFound(String),

    #[error("concurrent modification detected for execution {0}")]
    ConcurrencyConflict(String),

    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("state backend io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error returned by the executor and scheduler.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("task {task_id} exhausted retries after {attempts} attempt(s): {message}")]
    RetryExhausted { task_id: String, attempts: usize, message: String, category: ErrorCategory },

    #[error("task {task_id} failed: {message}")]
    TaskFailed { task_id: String, message: String, category: ErrorCategory },

    #[error("circuit breaker open for task class {task_class}")]
    CircuitOpen { task_class: String },

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("dependency deadlock: task(s) {tasks:?} never became ready")]
    Deadlock { tasks: Vec<String> },

    #[error("execution was cancelled")]
    Cancelled,

    #[error("invalid policy configuration: {0}")]
    InvalidConfig(String),
}

impl OrchestratorError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OrchestratorError::Cancelled)
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, OrchestratorError::CircuitOpen { .. })
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, OrchestratorError::RetryExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn default_category_is_retryable() {
        assert!(ErrorCategory::Unknown.is_retryable_by_default());
        assert!(ErrorCategory::Transient.is_retryable_by_default());
        assert!(ErrorCategory::Throttling.is_retryable_by_default());
    }

    #[test]
    fn permanent_categories_are_not_retryable_by_default() {
        assert!(!ErrorCategory::ClientError.is_retryable_by_default());
        assert!(!ErrorCategory::Validation.is_retryable_by_default());
        assert!(!ErrorCategory::Authentication.is_retryable_by_default());
        assert!(!ErrorCategory::Authorization.is_retryable_by_default());
        assert!(!ErrorCategory::ResourceNotFound.is_retryable_by_default());
    }

    #[test]
    fn opaque_task_error_defaults_to_unknown() {
        let inner = io::Error::new(io::ErrorKind::Other, "boom");
        let wrapped = OpaqueTaskError(Box::new(inner));
        assert_eq!(wrapped.category(), ErrorCategory::Unknown);
        assert_eq!(wrapped.retryable(), None);
        assert_eq!(wrapped.to_string(), "boom");
    }

    #[test]
    fn boxed_task_error_delegates_to_inner() {
        #[derive(Debug)]
        struct Custom;
        impl fmt::Display for Custom {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "custom")
            }
        }
        impl std::error::Error for Custom {}
        impl TaskError for Custom {
            fn category(&self) -> ErrorCategory {
                ErrorCategory::Throttling
            }
        }

        let boxed: BoxTaskError = Box::new(Custom);
        assert_eq!(boxed.category(), ErrorCategory::Throttling);
    }

    #[test]
    fn display_is_snake_case() {
        assert_eq!(ErrorCategory::NetworkError.to_string(), "network_error");
        assert_eq!(ErrorCategory::ResourceNotFound.to_string(), "resource_not_found");
    }

    #[test]
    fn orchestrator_error_predicates() {
        let err = OrchestratorError::CircuitOpen { task_class: "EC2_METRICS".into() };
        assert!(err.is_circuit_open());
        assert!(!err.is_cancelled());
    }
}
