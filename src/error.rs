//! # Error types surfaced by the bundlevisor runtime.
//!
//! [`FrameworkError`] covers everything the framework hands back to callers:
//! activator failures, lifecycle timeouts, races with uninstall, and registry
//! misuse. User-supplied activator and listener code reports its own failures
//! as [`ActivatorError`], an opaque boxed error; the bundle worker captures it
//! and the caller side translates it into a [`FrameworkError`].
//!
//! Errors are values. They are never thrown across a worker boundary and a
//! failing listener can never abort bundle shutdown.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Opaque error produced by user-supplied activator or listener code.
pub type ActivatorError = Box<dyn std::error::Error + Send + Sync>;

/// Lifecycle operation a failure refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleOp {
    Start,
    Stop,
}

impl fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleOp::Start => f.write_str("start"),
            LifecycleOp::Stop => f.write_str("stop"),
        }
    }
}

/// # Errors produced by the bundle framework.
///
/// These represent failures in the lifecycle kernel itself or in the
/// activator callbacks it supervises.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FrameworkError {
    /// The bundle activator returned an error or panicked.
    #[error("bundle #{id} {op}() failed: {reason}")]
    ActivatorFailed {
        /// Id of the bundle whose activator failed.
        id: u64,
        /// Which entry point failed.
        op: LifecycleOp,
        /// Stringified activator error or panic payload.
        reason: String,
    },

    /// The activator did not return within the configured wall-clock budget.
    ///
    /// The callback is not interrupted, only disowned; its worker is
    /// quarantined as a zombie.
    #[error("bundle #{id} {op} failed with reason: Time-out during bundle {op}()")]
    Timeout {
        /// Id of the bundle whose operation timed out.
        id: u64,
        /// Which entry point timed out.
        op: LifecycleOp,
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// The bundle was uninstalled while the operation was in flight.
    #[error("bundle #{id} {op} failed with reason: Bundle uninstalled during {op}()")]
    UninstalledDuring {
        /// Id of the uninstalled bundle.
        id: u64,
        /// Which entry point was abandoned.
        op: LifecycleOp,
    },

    /// The operation is not legal in the current state.
    #[error("illegal state: expected {expected}, was {actual}")]
    IllegalState {
        /// States in which the operation would have been legal.
        expected: &'static str,
        /// The state that was actually observed.
        actual: String,
    },

    /// A bundle with the same symbolic name is already installed.
    #[error("bundle '{name}' is already installed")]
    Duplicate {
        /// The duplicate symbolic name.
        name: String,
    },

    /// No bundle or service matched the lookup.
    #[error("{what} not found")]
    NotFound {
        /// Description of what was looked up.
        what: String,
    },
}

impl FrameworkError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            FrameworkError::ActivatorFailed { .. } => "activator_failed",
            FrameworkError::Timeout { .. } => "lifecycle_timeout",
            FrameworkError::UninstalledDuring { .. } => "uninstalled_during_op",
            FrameworkError::IllegalState { .. } => "illegal_state",
            FrameworkError::Duplicate { .. } => "duplicate_bundle",
            FrameworkError::NotFound { .. } => "not_found",
        }
    }

    /// True if this error reports a lifecycle timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, FrameworkError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_the_operation() {
        let err = FrameworkError::Timeout {
            id: 7,
            op: LifecycleOp::Start,
            timeout: Duration::from_millis(50),
        };
        let msg = err.to_string();
        assert!(msg.contains("Time-out during bundle start()"), "{msg}");
        assert!(msg.contains("#7"), "{msg}");
        assert!(err.is_timeout());
    }

    #[test]
    fn uninstall_message_names_the_operation() {
        let err = FrameworkError::UninstalledDuring {
            id: 3,
            op: LifecycleOp::Stop,
        };
        assert!(err.to_string().contains("Bundle uninstalled during stop()"));
    }

    #[test]
    fn labels_are_stable() {
        let err = FrameworkError::Duplicate { name: "b1".into() };
        assert_eq!(err.as_label(), "duplicate_bundle");
    }
}
