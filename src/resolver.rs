//! Package Resolver
//!
//! Assigns every selected package key to at most one enabled backend.
//!
//! # Resolution Rules
//!
//! - Backends are tried in priority order (Flatpak > Snap > AUR > Nix)
//! - The first backend that is enabled AND maps the key wins; later
//!   backends are never consulted for that key
//! - A key no enabled backend maps is reported by display name in
//!   `unresolved` (raw key when the catalog does not know it)
//!
//! Pure logic: no I/O and no shared state. The result only depends on the
//! set of selected keys, never on the order they are supplied in.

use crate::catalog::Catalog;
use crate::types::{Backend, EnabledBackends};
use std::collections::{BTreeMap, BTreeSet};

/// Where a single selected key ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Installed through `backend` as `identifier`
    Backend { backend: Backend, identifier: String },
    /// No enabled backend maps this key
    Unresolved { display_name: String },
}

/// Outcome of resolving a selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Identifiers to install per backend (deduplicated)
    pub assignments: BTreeMap<Backend, BTreeSet<String>>,
    /// Display names of selected packages no enabled backend can provide
    pub unresolved: BTreeSet<String>,
    /// Per-key placement, for reporting
    pub placements: BTreeMap<String, Placement>,
}

impl Resolution {
    /// Identifiers assigned to `backend` (empty set if none).
    pub fn identifiers(&self, backend: Backend) -> impl Iterator<Item = &str> {
        self.assignments
            .get(&backend)
            .into_iter()
            .flat_map(|ids| ids.iter().map(String::as_str))
    }

    /// Backends with at least one identifier, highest priority first.
    pub fn used_backends(&self) -> impl Iterator<Item = Backend> + '_ {
        self.assignments
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(backend, _)| *backend)
    }

    /// Number of identifiers across all backends.
    pub fn resolved_count(&self) -> usize {
        self.assignments.values().map(BTreeSet::len).sum()
    }

    pub fn has_unresolved(&self) -> bool {
        !self.unresolved.is_empty()
    }

    /// Backend a key was assigned to, if any.
    pub fn backend_for(&self, key: &str) -> Option<Backend> {
        match self.placements.get(key) {
            Some(Placement::Backend { backend, .. }) => Some(*backend),
            _ => None,
        }
    }

    fn place(&mut self, key: &str, placement: Placement) {
        match &placement {
            Placement::Backend { backend, identifier } => {
                self.assignments
                    .entry(*backend)
                    .or_default()
                    .insert(identifier.clone());
            }
            Placement::Unresolved { display_name } => {
                self.unresolved.insert(display_name.clone());
            }
        }
        self.placements.insert(key.to_string(), placement);
    }
}

/// Resolve `selection` against `catalog` under the given backend flags.
///
/// Total for every input: with all backends off or an empty catalog every
/// key simply becomes unresolved.
pub fn resolve<I, S>(catalog: &Catalog, enabled: &EnabledBackends, selection: I) -> Resolution
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut resolution = Resolution::default();

    for key in selection {
        let key = key.as_ref();
        if resolution.placements.contains_key(key) {
            continue;
        }
        resolution.place(key, place_key(catalog, enabled, key));
    }

    tracing::debug!(
        resolved = resolution.resolved_count(),
        unresolved = resolution.unresolved.len(),
        "Resolved selection"
    );
    resolution
}

fn place_key(catalog: &Catalog, enabled: &EnabledBackends, key: &str) -> Placement {
    let Some(entry) = catalog.get(key) else {
        return Placement::Unresolved {
            display_name: key.to_string(),
        };
    };

    enabled
        .enabled()
        .find_map(|backend| {
            entry.identifier(backend).map(|id| Placement::Backend {
                backend,
                identifier: id.to_string(),
            })
        })
        .unwrap_or_else(|| Placement::Unresolved {
            display_name: entry.display_name.clone(),
        })
}
