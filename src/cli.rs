use crate::types::{AurHelper, Backend};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// pkgplan - pick apps, pick sources, get one install script
#[derive(Parser, Debug)]
#[command(name = "pkgplan")]
#[command(about = "Resolve applications to Flatpak, Snap, AUR or Nix and install them")]
#[command(version)]
pub struct Cli {
    /// Settings file to use instead of the per-user default
    #[arg(long, global = true, value_name = "PATH")]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Browse the application catalog
    List {
        /// Only show one category
        #[arg(short, long)]
        category: Option<String>,
        /// Filter by name, key or description
        #[arg(short, long)]
        search: Option<String>,
    },
    /// Show enabled sources and selected applications
    Status,
    /// Enable a package source
    Enable {
        /// flatpak, snap, aur or nix
        backend: Backend,
    },
    /// Disable a package source
    Disable {
        /// flatpak, snap, aur or nix
        backend: Backend,
    },
    /// Mark applications for installation
    Select {
        /// Select every application shown by the filters below (the whole
        /// catalog without them)
        #[arg(long, conflicts_with = "keys")]
        all: bool,
        /// With --all, only this category
        #[arg(short, long, requires = "all")]
        category: Option<String>,
        /// With --all, only entries matching this name, key or description
        #[arg(short, long, requires = "all")]
        search: Option<String>,
        /// Catalog keys (see `pkgplan list`)
        keys: Vec<String>,
    },
    /// Unmark applications
    Deselect {
        /// Clear the whole selection
        #[arg(long, conflicts_with = "keys")]
        all: bool,
        keys: Vec<String>,
    },
    /// Choose the AUR helper used in generated plans
    AurHelper {
        /// paru or yay
        helper: AurHelper,
    },
    /// Print the install script for the current selection
    Plan {
        /// Write the script to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Generate the install script and run it with elevated privileges
    Install {
        /// Print the script instead of running it
        #[arg(long)]
        dry_run: bool,
        /// Privilege wrapper command line; the script path is appended
        #[arg(long, num_args = 1.., value_name = "CMD", allow_hyphen_values = true)]
        launcher: Option<Vec<String>>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
