//! Error types for the VM reconciliation engine.
//!
//! This module provides the error hierarchy for every phase of a
//! reconciliation cycle: configuration, state storage, the CloudTower API,
//! task polling, diffing and power-state transitions.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::context::ContextError;

fn field_prefix(field: Option<&str>) -> String {
    field.map(|f| format!("{f}: ")).unwrap_or_default()
}

/// The main error type for the reconciliation engine.
#[derive(Debug, Error)]
pub enum TowerError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// CloudTower API errors.
    #[error("CloudTower API error: {0}")]
    Api(#[from] ApiError),

    /// The caller cancelled the operation or its deadline expired.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// A remote task reached the `FAILED` status.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Diff validation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Power-state errors.
    #[error("Power state error: {0}")]
    Power(#[from] PowerError),

    /// Every retry attempt of a remote call failed.
    #[error("failed after {attempts} retries: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error returned by the final attempt.
        #[source]
        last: Box<TowerError>,
    },

    /// Timed out waiting for a VM to reach an expected condition.
    #[error("Timeout waiting for vm {vm_id} to reach {expected}")]
    Timeout {
        /// ID of the VM.
        vm_id: String,
        /// Condition that was not reached.
        expected: String,
    },

    /// Several independent failures collected from one batch.
    #[error("{}", AggregateDisplay(.0))]
    Aggregate(Vec<TowerError>),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

struct AggregateDisplay<'a>(&'a [TowerError]);

impl fmt::Display for AggregateDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred", self.0.len())?;
        for err in self.0 {
            write!(f, "\n  * {err}")?;
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {}{message}", field_prefix(.field.as_deref()))]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State file not found.
    #[error("State file not found: {path}")]
    NotFound {
        /// Path to the missing state file.
        path: PathBuf,
    },

    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },
}

/// CloudTower API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Authentication failed.
    #[error("authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// API request failed.
    #[error("request {operation} failed: {status} - {message}")]
    RequestFailed {
        /// Remote operation name.
        operation: String,
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Network error.
    #[error("network error during {operation}: {message}")]
    NetworkError {
        /// Remote operation name.
        operation: String,
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from the API.
    #[error("invalid response from {operation}: {message}")]
    InvalidResponse {
        /// Remote operation name.
        operation: String,
        /// Description of the response issue.
        message: String,
    },

    /// A referenced remote entity does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Kind of entity (vm, vlan, iso, storage policy).
        kind: &'static str,
        /// Identifier that was looked up.
        id: String,
    },
}

/// A remote task finished unsuccessfully.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task reached `FAILED`; the display is the remote message verbatim.
    #[error("{message}")]
    Failed {
        /// ID of the failed task.
        task_id: String,
        /// Error message reported by the control plane.
        message: String,
    },
}

/// Errors raised while diffing desired against observed sub-resources.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// An update would change a field that is immutable after creation.
    #[error("mounted disk {name}'s {field} can not be changed")]
    ImmutableField {
        /// Volume name of the offending disk.
        name: String,
        /// Field that would change.
        field: &'static str,
    },

    /// An update would shrink a volume.
    #[error("disk {name}'s size can not shrink ({current} -> {requested} bytes)")]
    VolumeShrink {
        /// Volume name of the offending disk.
        name: String,
        /// Currently observed size in bytes.
        current: u64,
        /// Requested size in bytes.
        requested: u64,
    },

    /// The requested vcpu/cores/sockets combination is not valid.
    #[error("invalid cpu topology: {message}")]
    InvalidCpuTopology {
        /// Description of the problem.
        message: String,
    },

    /// A sub-resource references a remote entity that could not be resolved.
    #[error("{resource} references {kind} {id}: {reason}")]
    UnresolvedReference {
        /// Sub-resource identity (e.g. `nic[1]`).
        resource: String,
        /// Kind of referenced entity.
        kind: &'static str,
        /// Referenced identifier.
        id: String,
        /// Why the lookup failed.
        reason: String,
    },
}

/// Power-state transition errors.
#[derive(Debug, Error)]
pub enum PowerError {
    /// The requested transition has no legal remote operation.
    #[error("vm status is {current}, cannot transition to {requested}")]
    InvalidTransition {
        /// Current power state.
        current: String,
        /// Requested power state.
        requested: String,
    },

    /// The VM is in a state that forbids the requested operation.
    #[error("vm {vm_id} status is {status}, {action}")]
    InvalidState {
        /// ID of the VM.
        vm_id: String,
        /// Observed status.
        status: String,
        /// What could not be done.
        action: &'static str,
    },
}

/// Phase of a reconciliation cycle an error originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Checking the desired configuration.
    Validate,
    /// Reading remote state.
    Observe,
    /// Submitting a mutation.
    Submit,
    /// Polling a remote task.
    Poll,
    /// Local bookkeeping.
    Local,
}

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, TowerError>;

impl TowerError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Combines two errors, keeping both.
    #[must_use]
    pub fn join(self, other: Self) -> Self {
        match self {
            Self::Aggregate(mut errors) => {
                errors.push(other);
                Self::Aggregate(errors)
            }
            first => Self::Aggregate(vec![first, other]),
        }
    }

    /// Folds collected errors into a single error, if any.
    #[must_use]
    pub fn from_collected(mut errors: Vec<Self>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate(errors)),
        }
    }

    /// Returns true if this error is worth retrying: network failures,
    /// throttling and server-side request failures. Client errors such as a
    /// rejected token or a malformed mutation fail the same way every time.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Api(ApiError::NetworkError { .. }) | Self::State(StateError::LockFailed { .. }) => {
                true
            }
            Self::Api(ApiError::RequestFailed { status, .. }) => {
                *status >= 500 || *status == 429 || *status == 408
            }
            _ => false,
        }
    }

    /// Returns true if the caller's context ended the operation.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Context(_))
    }

    /// Returns the phase this error belongs to.
    #[must_use]
    pub fn phase(&self) -> Phase {
        match self {
            Self::Config(_) | Self::Reconcile(_) | Self::Power(_) => Phase::Validate,
            Self::Task(_) | Self::Timeout { .. } => Phase::Poll,
            Self::Api(_) => Phase::Submit,
            Self::RetriesExhausted { last, .. } => last.phase(),
            Self::Aggregate(errors) => errors.first().map_or(Phase::Local, Self::phase),
            Self::State(_) | Self::Context(_) | Self::Io(_) | Self::Internal(_) => Phase::Local,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StateError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ApiError {
    /// Creates a request error.
    #[must_use]
    pub fn request(operation: &str, status: u16, message: impl Into<String>) -> Self {
        Self::RequestFailed {
            operation: operation.to_string(),
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(operation: &str, message: impl Into<String>) -> Self {
        Self::NetworkError {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Creates an invalid-response error.
    #[must_use]
    pub fn invalid_response(operation: &str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validate => "validate",
            Self::Observe => "observe",
            Self::Submit => "submit",
            Self::Poll => "poll",
            Self::Local => "local",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_names_the_field() {
        let err = ConfigError::validation("cannot be empty", "vm.name");
        assert_eq!(
            err.to_string(),
            "Configuration validation failed: vm.name: cannot be empty"
        );

        let err = ConfigError::ValidationError {
            message: String::from("no vm"),
            field: None,
        };
        assert_eq!(err.to_string(), "Configuration validation failed: no vm");
    }

    #[test]
    fn test_task_failure_displays_remote_message_verbatim() {
        let err = TowerError::from(TaskError::Failed {
            task_id: String::from("task-1"),
            message: String::from("disk attach conflict"),
        });

        assert_eq!(err.to_string(), "disk attach conflict");
        assert_eq!(err.phase(), Phase::Poll);
    }

    #[test]
    fn test_join_keeps_both_errors() {
        let joined = TowerError::internal("change failed").join(TowerError::internal("restore failed"));

        let TowerError::Aggregate(errors) = &joined else {
            panic!("expected aggregate, got {joined:?}");
        };
        assert_eq!(errors.len(), 2);
        let text = joined.to_string();
        assert!(text.contains("change failed"));
        assert!(text.contains("restore failed"));
    }

    #[test]
    fn test_from_collected() {
        assert!(TowerError::from_collected(vec![]).is_none());

        let single = TowerError::from_collected(vec![TowerError::internal("one")]);
        assert!(matches!(single, Some(TowerError::Internal(_))));

        let many = TowerError::from_collected(vec![
            TowerError::internal("one"),
            TowerError::internal("two"),
        ]);
        assert!(matches!(many, Some(TowerError::Aggregate(ref e)) if e.len() == 2));
    }

    #[test]
    fn test_retries_exhausted_preserves_last_error() {
        let err = TowerError::RetriesExhausted {
            attempts: 3,
            last: Box::new(ApiError::network("get-tasks", "connection reset").into()),
        };

        assert!(err.to_string().starts_with("failed after 3 retries"));
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(err.phase(), Phase::Submit);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_is_retryable() {
        assert!(TowerError::from(ApiError::network("get-vms", "timeout")).is_retryable());
        assert!(TowerError::from(ApiError::request("get-vms", 502, "bad gateway")).is_retryable());
        assert!(TowerError::from(ApiError::request("get-vms", 429, "slow down")).is_retryable());
        assert!(!TowerError::from(ApiError::request("updateVm", 400, "bad input")).is_retryable());
        assert!(!TowerError::from(ContextError::Cancelled).is_retryable());
        assert!(TowerError::from(ContextError::DeadlineExceeded).is_cancellation());
    }
}
