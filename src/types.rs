//! Core value types shared by the resolver, plan generator and settings.
//!
//! Backends are a closed enum rather than strings so that priority order is
//! fixed at compile time and every `match` over them is exhaustive.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Package delivery backend.
///
/// Declaration order IS priority order: `Flatpak` is tried first and `Nix`
/// last. `Ord` is derived so ordered collections iterate in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Backend {
    /// Universal sandboxed apps from Flathub (unprivileged)
    Flatpak,
    /// Canonical's Snap store (needs sudo)
    Snap,
    /// Arch repositories and the AUR through a helper
    Aur,
    /// Nix functional package manager
    Nix,
}

impl Backend {
    /// All backends, highest priority first.
    pub fn in_priority_order() -> impl Iterator<Item = Backend> {
        Backend::iter()
    }

    /// Name used in the plan header's enabled/disabled listing.
    pub const fn header_name(self) -> &'static str {
        match self {
            Self::Flatpak => "Flatpak",
            Self::Snap => "Snap",
            Self::Aur => "AUR",
            Self::Nix => "Nix",
        }
    }

    /// Whether this backend is on when nothing has been configured.
    pub const fn enabled_by_default(self) -> bool {
        matches!(self, Self::Flatpak | Self::Aur)
    }
}

/// AUR helper used for the `Aur` backend's command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AurHelper {
    #[default]
    Paru,
    Yay,
}

impl AurHelper {
    /// Capitalized name shown in the plan's block label.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Paru => "Paru",
            Self::Yay => "Yay",
        }
    }
}

/// Enabled/disabled flag per backend.
///
/// Owned by the surrounding application; the resolver and plan generator only
/// read it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnabledBackends {
    flags: [bool; 4],
}

impl EnabledBackends {
    /// Every backend switched off.
    pub const fn none() -> Self {
        Self { flags: [false; 4] }
    }

    /// Every backend switched on.
    pub const fn all() -> Self {
        Self { flags: [true; 4] }
    }

    /// Build from an explicit list of enabled backends; the rest are off.
    pub fn only(enabled: impl IntoIterator<Item = Backend>) -> Self {
        let mut result = Self::none();
        for backend in enabled {
            result.set(backend, true);
        }
        result
    }

    #[inline]
    pub fn is_enabled(&self, backend: Backend) -> bool {
        self.flags[backend as usize]
    }

    #[inline]
    pub fn set(&mut self, backend: Backend, enabled: bool) {
        self.flags[backend as usize] = enabled;
    }

    /// Enabled backends, highest priority first.
    pub fn enabled(&self) -> impl Iterator<Item = Backend> + '_ {
        Backend::in_priority_order().filter(|b| self.is_enabled(*b))
    }

    pub fn any_enabled(&self) -> bool {
        self.flags.iter().any(|f| *f)
    }
}

impl Default for EnabledBackends {
    fn default() -> Self {
        let mut result = Self::none();
        for backend in Backend::in_priority_order() {
            result.set(backend, backend.enabled_by_default());
        }
        result
    }
}

impl fmt::Debug for EnabledBackends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(Backend::in_priority_order().map(|b| (b, self.is_enabled(b))))
            .finish()
    }
}

/// Package keys the user marked for installation.
pub type Selection = BTreeSet<String>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_priority_order_is_fixed() {
        let order: Vec<Backend> = Backend::in_priority_order().collect();
        assert_eq!(
            order,
            vec![Backend::Flatpak, Backend::Snap, Backend::Aur, Backend::Nix]
        );
        assert!(Backend::Flatpak < Backend::Nix);
    }

    #[test]
    fn test_backend_string_forms() {
        assert_eq!(Backend::Aur.to_string(), "aur");
        assert_eq!(Backend::from_str("FLATPAK").unwrap(), Backend::Flatpak);
        assert!(Backend::from_str("apt").is_err());

        let json = serde_json::to_string(&Backend::Nix).unwrap();
        assert_eq!(json, "\"nix\"");
    }

    #[test]
    fn test_enabled_backends_defaults() {
        let enabled = EnabledBackends::default();
        assert!(enabled.is_enabled(Backend::Flatpak));
        assert!(!enabled.is_enabled(Backend::Snap));
        assert!(enabled.is_enabled(Backend::Aur));
        assert!(!enabled.is_enabled(Backend::Nix));

        let order: Vec<Backend> = enabled.enabled().collect();
        assert_eq!(order, vec![Backend::Flatpak, Backend::Aur]);
    }

    #[test]
    fn test_enabled_backends_only_and_none() {
        assert!(!EnabledBackends::none().any_enabled());

        let enabled = EnabledBackends::only([Backend::Nix]);
        assert!(enabled.is_enabled(Backend::Nix));
        assert_eq!(enabled.enabled().count(), 1);
    }

    #[test]
    fn test_aur_helper_parse() {
        assert_eq!(AurHelper::from_str("yay").unwrap(), AurHelper::Yay);
        assert_eq!(AurHelper::default().to_string(), "paru");
        assert_eq!(AurHelper::Paru.label(), "Paru");
    }
}
