//! Install plan generation.
//!
//! Renders a [`Resolution`] into a bash script: a header listing which
//! backends are on, one command block per backend in priority order, and a
//! trailing comment-only block for anything unresolved.
//!
//! Identifiers are sorted before joining so the same resolution always
//! renders to byte-identical text.

use crate::catalog::Catalog;
use crate::error::PlanError;
use crate::resolver::{resolve, Resolution};
use crate::types::{AurHelper, Backend, EnabledBackends, Selection};
use std::borrow::Cow;
use std::fmt::Write as _;

const SEPARATOR: &str = "# ----------------------------------------------------------";
const FLATPAK_INSTALL: &str = "flatpak install flathub -y";
const SNAP_INSTALL: &str = "sudo snap install";
const AUR_FLAGS: &str = "-S --needed --noconfirm";
const NIX_INSTALL: &str = "nix-env -iA";
const NIX_ATTR_PREFIX: &str = "nixpkgs.";

/// Knobs that change command text without changing resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOptions {
    pub aur_helper: AurHelper,
}

/// A rendered plan together with the resolution it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub resolution: Resolution,
    pub text: String,
}

impl Plan {
    /// Number of packages that will actually be installed.
    pub fn package_count(&self) -> usize {
        self.resolution.resolved_count()
    }
}

/// Block label for `backend` in the rendered plan.
pub fn block_label(backend: Backend, options: &PlanOptions) -> String {
    match backend {
        Backend::Flatpak => "Flatpak".to_string(),
        Backend::Snap => "Snap".to_string(),
        Backend::Aur => format!("AUR/Pacman ({})", options.aur_helper.label()),
        Backend::Nix => "Nix".to_string(),
    }
}

/// Install command for `backend`; `ids` must already be sorted.
pub fn install_command(backend: Backend, ids: &[&str], options: &PlanOptions) -> String {
    let joined = ids.join(" ");
    match backend {
        Backend::Flatpak => format!("{FLATPAK_INSTALL} {joined}"),
        Backend::Snap => format!("{SNAP_INSTALL} {joined}"),
        Backend::Aur => format!("{} {AUR_FLAGS} {joined}", options.aur_helper),
        Backend::Nix => {
            let attrs: Vec<String> = ids
                .iter()
                .map(|id| format!("{NIX_ATTR_PREFIX}{id}"))
                .collect();
            format!("{NIX_INSTALL} {}", attrs.join(" "))
        }
    }
}

/// Render `resolution` as plan text. Pure and deterministic.
pub fn generate(resolution: &Resolution, enabled: &EnabledBackends, options: &PlanOptions) -> String {
    let mut out = String::new();

    out.push_str("#!/bin/bash\n");
    out.push_str("set -e\n\n");
    out.push_str("# --- Installation Script Generated by pkgplan ---\n");
    out.push_str("# Enabled Sources (Priority: Flatpak > Snap > AUR > Nix):\n");
    for backend in Backend::in_priority_order() {
        let name = format!("{}:", backend.header_name());
        let state = if enabled.is_enabled(backend) {
            "Enabled"
        } else {
            "Disabled"
        };
        let _ = writeln!(out, "# {name:<8} {state}");
    }
    out.push_str(SEPARATOR);
    out.push_str("\n\n");

    for backend in Backend::in_priority_order() {
        let mut ids: Vec<&str> = resolution.identifiers(backend).collect();
        if ids.is_empty() {
            continue;
        }
        ids.sort_unstable();

        let _ = writeln!(
            out,
            "# ## {} Packages ({})",
            block_label(backend, options),
            ids.len()
        );
        out.push_str(SEPARATOR);
        out.push('\n');
        out.push_str(&install_command(backend, &ids, options));
        out.push_str("\n\n");
    }

    if resolution.has_unresolved() {
        let mut names: Vec<Cow<'_, str>> =
            resolution.unresolved.iter().map(|name| comment_safe(name)).collect();
        names.sort_unstable();

        let _ = writeln!(out, "# ## Unresolved Packages ({})", names.len());
        out.push_str(SEPARATOR);
        out.push('\n');
        out.push_str(
            "# WARNING: The following selected packages could not be mapped to any enabled source:\n",
        );
        let _ = writeln!(out, "# {}", names.join(", "));
        out.push('\n');
    }

    out
}

/// `name` with control characters (line breaks included) replaced by
/// spaces, so it cannot end the comment line it is written on.
fn comment_safe(name: &str) -> Cow<'_, str> {
    if name.chars().any(char::is_control) {
        Cow::Owned(
            name.chars()
                .map(|c| if c.is_control() { ' ' } else { c })
                .collect(),
        )
    } else {
        Cow::Borrowed(name)
    }
}

/// Resolve `selection` and render it.
///
/// Returns [`PlanError::EmptySelection`] rather than a blank plan when
/// nothing is selected.
pub fn build_plan(
    catalog: &Catalog,
    enabled: &EnabledBackends,
    selection: &Selection,
    options: &PlanOptions,
) -> Result<Plan, PlanError> {
    if selection.is_empty() {
        return Err(PlanError::EmptySelection);
    }

    let resolution = resolve(catalog, enabled, selection);
    for name in &resolution.unresolved {
        tracing::warn!("No enabled source provides {}", name);
    }
    let text = generate(&resolution, enabled, options);

    tracing::info!(
        packages = resolution.resolved_count(),
        unresolved = resolution.unresolved.len(),
        "Generated install plan"
    );
    Ok(Plan { resolution, text })
}
