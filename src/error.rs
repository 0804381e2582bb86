//! Error types for the dependency manager runtime.

use crate::id::ServiceId;
use thiserror::Error;

/// A start coroutine's recoverable failure. Surfaced to the resolver, which
/// leaves the service INSTALLED; the service restarts only when a new
/// dependency arrives or an explicit `StartService` event is pushed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("service {service} failed to start: {reason}")]
    Failed { service: ServiceId, reason: String },

    #[error("service {service} start was cancelled")]
    Cancelled { service: ServiceId },
}

impl StartError {
    pub fn failed(service: ServiceId, reason: impl Into<String>) -> Self {
        Self::Failed {
            service,
            reason: reason.into(),
        }
    }
}

/// Returned by waiters (`wait_for_event`, `wait_for_service`) when they
/// cannot be fulfilled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    /// The manager is shutting down and cannot fulfil the wait.
    #[error("manager is quitting, wait cannot be fulfilled")]
    Quitting,

    /// The event or service id being waited on is unknown to this manager.
    #[error("no such event or service to wait on")]
    NotFound,
}

/// The runtime's top-level error type, covering both user-facing operation
/// failures and the diagnostics attached to fatal invariant violations
/// before the process terminates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DmError {
    #[error(transparent)]
    Start(#[from] StartError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    /// Produced by an external service (an I/O plugin, a timer); the core
    /// itself never synthesises this variant.
    #[error("I/O error: {0}")]
    Io(String),

    /// An internal inconsistency: missing record, illegal state transition,
    /// leaked generator, removal with non-zero dependees. The core's
    /// invariants require these never to occur in a correct program; when
    /// one is detected the manager logs a diagnostic and aborts the
    /// process rather than continuing in an unknown state.
    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("service not found: {0}")]
    ServiceNotFound(ServiceId),

    #[error("no such registration {registration} on service {service}")]
    NoSuchRegistration {
        service: ServiceId,
        registration: usize,
    },
}

impl DmError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, DmError>;

/// Reports a fatal invariant violation: logs a diagnostic (via `tracing` if
/// the `logging` feature is enabled, else to stderr) and aborts the
/// process. Used for the handful of error paths spec.md designates
/// catastrophic: a stop coroutine failing, removing a service with
/// non-empty dependees, injecting into a record that is not
/// INSTALLED/INJECTING.
#[cold]
#[track_caller]
pub fn fatal(msg: impl std::fmt::Display) -> ! {
    #[cfg(feature = "logging")]
    tracing::error!(target: "dependency_manager", "fatal invariant violation: {msg}");
    #[cfg(not(feature = "logging"))]
    eprintln!("fatal invariant violation: {msg}");
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_error_display() {
        let err = StartError::failed(ServiceId::NONE, "boom");
        assert!(format!("{err}").contains("boom"));
    }

    #[test]
    fn dm_error_wraps_start_error() {
        let err: DmError = StartError::failed(ServiceId::NONE, "boom").into();
        assert!(matches!(err, DmError::Start(_)));
    }
}
