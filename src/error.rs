//! Error handling module for pkgplan
//!
//! Library errors use thiserror so callers can match on them; the binary
//! and settings I/O wrap them in anyhow. Failures of a running install
//! never appear here: they are delivered as a
//! [`TerminalStatus`](crate::install_state::TerminalStatus) on the event
//! channel instead.

use crate::install_state::{InstallStatus, InstallTransitionError};
use thiserror::Error;

/// Errors raised before a plan is produced
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("No packages were selected. Select one or more apps first.")]
    EmptySelection,
}

/// Errors returned synchronously by the install executor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallError {
    /// `start` was called while another run is preparing or running
    #[error("An installation is already in progress ({status})")]
    ConcurrentRun { status: InstallStatus },

    /// `acknowledge` was called before the run reached a terminal state
    #[error("Installation has not finished yet ({status})")]
    RunActive { status: InstallStatus },

    #[error(transparent)]
    Transition(#[from] InstallTransitionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_selection_display() {
        assert_eq!(
            PlanError::EmptySelection.to_string(),
            "No packages were selected. Select one or more apps first."
        );
    }

    #[test]
    fn test_concurrent_run_display() {
        let err = InstallError::ConcurrentRun {
            status: InstallStatus::Running,
        };
        assert_eq!(err.to_string(), "An installation is already in progress (Running)");
    }

    #[test]
    fn test_transition_error_is_transparent() {
        let err: InstallError = InstallTransitionError::AlreadyAt {
            status: InstallStatus::Idle,
        }
        .into();
        assert_eq!(err.to_string(), "Install run is already Idle");
    }
}
