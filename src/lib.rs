//! pkgplan library
//!
//! Resolves selected applications to one of four package backends, renders
//! the result as a bash install plan, and runs that plan as a privileged
//! child process with streamed output and cooperative cancellation.
//!
//! ```text
//! Catalog → resolve() → generate() → InstallExecutor
//! ```

pub mod catalog;
pub mod cli;
pub mod error;
pub mod executor;
pub mod install_state;
pub mod plan;
pub mod process_guard;
pub mod resolver;
pub mod settings;
pub mod types;

// Re-export main types for convenience
pub use catalog::{Catalog, PackageEntry};
pub use error::{InstallError, PlanError};
pub use executor::{CancelHandle, CancelRelay, InstallEvent, InstallExecutor, LaunchConfig};
pub use install_state::{InstallRun, InstallStatus, InstallTransitionError, TerminalStatus};
pub use plan::{build_plan, generate, Plan, PlanOptions};
pub use resolver::{resolve, Placement, Resolution};
pub use settings::Settings;
pub use types::{AurHelper, Backend, EnabledBackends, Selection};
