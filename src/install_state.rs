//! Install Run State Machine
//!
//! Caller-side source of truth for the lifecycle of one install run. Every
//! status change goes through [`InstallRun::transition_to`], which rejects
//! edges that are not in the graph below.
//!
//! # Status Flow
//!
//! ```text
//! Idle
//!   ↓ start
//! Preparing ──(spawn failure)──→ Failed
//!   │        ──(cancel before launch)──→ Cancelled
//!   ↓ spawned
//! Running ──→ Complete | Failed | Cancelled
//!
//! Complete | Failed | Cancelled ──acknowledge──→ Idle
//! ```

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Lifecycle status of an install run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallStatus {
    /// No run in progress
    Idle,
    /// Writing the script and launching the privileged child
    Preparing,
    /// Child is running and output is streaming
    Running,
    /// Child exited with status 0 (terminal)
    Complete,
    /// Child exited non-zero, or the run faulted (terminal)
    Failed,
    /// Cancellation was requested before exit was observed (terminal)
    Cancelled,
}

impl InstallStatus {
    /// Returns true for Complete, Failed and Cancelled
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    /// Returns true while a worker owns the run
    #[inline]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Preparing | Self::Running)
    }

    /// Whether moving from `self` to `next` is a legal edge.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Preparing)
                | (Self::Preparing, Self::Running)
                | (Self::Preparing, Self::Failed)
                | (Self::Preparing, Self::Cancelled)
                | (Self::Running, Self::Complete)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
                | (Self::Complete, Self::Idle)
                | (Self::Failed, Self::Idle)
                | (Self::Cancelled, Self::Idle)
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Preparing => "Preparing",
            Self::Running => "Running",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final outcome of one run, delivered exactly once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalStatus {
    Complete,
    Failed,
    Cancelled,
}

impl TerminalStatus {
    /// Decide the outcome once the child's exit has been observed.
    ///
    /// A cancellation request always wins over the exit code, so a child
    /// that exits on its own while a cancel is in flight still reports
    /// `Cancelled`.
    pub const fn from_exit(cancel_requested: bool, success: bool) -> Self {
        if cancel_requested {
            Self::Cancelled
        } else if success {
            Self::Complete
        } else {
            Self::Failed
        }
    }

    /// Upper-case form used in the closing output banner.
    pub const fn banner(self) -> &'static str {
        match self {
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl From<TerminalStatus> for InstallStatus {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Complete => Self::Complete,
            TerminalStatus::Failed => Self::Failed,
            TerminalStatus::Cancelled => Self::Cancelled,
        }
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(InstallStatus::from(*self).as_str())
    }
}

/// Errors that can occur during status transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallTransitionError {
    #[error("Cannot move install run from {from} to {to}")]
    Invalid { from: InstallStatus, to: InstallStatus },

    #[error("Install run is already {status}")]
    AlreadyAt { status: InstallStatus },
}

/// Tracks the status of the current install run.
///
/// # Example
///
/// ```
/// use pkgplan::install_state::{InstallRun, InstallStatus, TerminalStatus};
///
/// let mut run = InstallRun::new();
/// run.transition_to(InstallStatus::Preparing).unwrap();
/// assert!(run.transition_to(InstallStatus::Complete).is_err());
///
/// run.transition_to(InstallStatus::Running).unwrap();
/// run.finish(TerminalStatus::Complete).unwrap();
/// run.acknowledge().unwrap();
/// assert_eq!(run.status(), InstallStatus::Idle);
/// ```
#[derive(Debug, Clone)]
pub struct InstallRun {
    status: InstallStatus,
    /// Statuses entered during this run, with unix timestamps
    history: Vec<(InstallStatus, u64)>,
}

impl Default for InstallRun {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallRun {
    pub fn new() -> Self {
        Self {
            status: InstallStatus::Idle,
            history: Vec::with_capacity(4),
        }
    }

    #[inline]
    pub fn status(&self) -> InstallStatus {
        self.status
    }

    /// Statuses entered since the last acknowledge
    pub fn history(&self) -> &[(InstallStatus, u64)] {
        &self.history
    }

    /// Move to `next`, validating the edge.
    pub fn transition_to(&mut self, next: InstallStatus) -> Result<(), InstallTransitionError> {
        if self.status == next {
            return Err(InstallTransitionError::AlreadyAt { status: next });
        }
        if !self.status.can_transition_to(next) {
            return Err(InstallTransitionError::Invalid {
                from: self.status,
                to: next,
            });
        }

        tracing::debug!("Install run: {} -> {}", self.status, next);
        self.status = next;
        self.history.push((next, unix_now()));
        Ok(())
    }

    /// Record the terminal outcome.
    pub fn finish(&mut self, outcome: TerminalStatus) -> Result<(), InstallTransitionError> {
        self.transition_to(outcome.into())
    }

    /// Return to Idle after a terminal status, dropping the run's history.
    pub fn acknowledge(&mut self) -> Result<(), InstallTransitionError> {
        self.transition_to(InstallStatus::Idle)?;
        self.history.clear();
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
