//! Application catalog.
//!
//! Maps a stable package key to its display name, category and the
//! identifier it has on each backend. A missing backend entry means the
//! application is not offered there.
//!
//! The built-in catalog is constructed once on first use and shared
//! read-only for the rest of the process, so it can be read from any thread.

use crate::types::Backend;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// One installable application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    /// Stable identifier used in settings and on the command line
    pub key: String,
    pub display_name: String,
    pub category: String,
    pub description: String,
    /// Backend-specific identifiers; absent means unavailable on that backend
    pub backend_map: BTreeMap<Backend, String>,
}

impl PackageEntry {
    pub fn new(
        key: impl Into<String>,
        display_name: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            category: category.into(),
            description: String::new(),
            backend_map: BTreeMap::new(),
        }
    }

    /// Builder-style description setter.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder-style backend mapping.
    pub fn with_backend(mut self, backend: Backend, identifier: impl Into<String>) -> Self {
        self.backend_map.insert(backend, identifier.into());
        self
    }

    /// Identifier on `backend`, ignoring blank mappings.
    pub fn identifier(&self, backend: Backend) -> Option<&str> {
        self.backend_map
            .get(&backend)
            .map(String::as_str)
            .filter(|id| !id.trim().is_empty())
    }

    /// Whether an already lower-cased `needle` occurs in the key, display
    /// name or description. An empty needle matches.
    fn matches(&self, needle: &str) -> bool {
        needle.is_empty()
            || self.key.to_lowercase().contains(needle)
            || self.display_name.to_lowercase().contains(needle)
            || self.description.to_lowercase().contains(needle)
    }

    /// Backends offering this entry, highest priority first.
    pub fn available_backends(&self) -> Vec<Backend> {
        Backend::in_priority_order()
            .filter(|b| self.identifier(*b).is_some())
            .collect()
    }
}

/// Immutable registry of package entries keyed by package key.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: BTreeMap<String, PackageEntry>,
    /// Categories in the order they were first seen
    categories: Vec<String>,
}

impl Catalog {
    /// Build a catalog from entries. A later entry with a duplicate key
    /// replaces the earlier one.
    pub fn from_entries(entries: impl IntoIterator<Item = PackageEntry>) -> Self {
        let mut catalog = Self::default();
        for entry in entries {
            if !catalog.categories.contains(&entry.category) {
                catalog.categories.push(entry.category.clone());
            }
            catalog.entries.insert(entry.key.clone(), entry);
        }
        catalog
    }

    /// The catalog shipped with the binary.
    pub fn builtin() -> &'static Catalog {
        static BUILTIN: OnceLock<Catalog> = OnceLock::new();
        BUILTIN.get_or_init(|| {
            Catalog::from_entries(BUILTIN_ROWS.iter().map(CatalogRow::to_entry))
        })
    }

    pub fn get(&self, key: &str) -> Option<&PackageEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = &PackageEntry> {
        self.entries.values()
    }

    /// All keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Entries in `category` (exact, case-insensitive match).
    pub fn in_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a PackageEntry> {
        self.entries
            .values()
            .filter(move |e| e.category.eq_ignore_ascii_case(category))
    }

    /// Case-insensitive substring search over key, display name and
    /// description. An empty query matches everything.
    pub fn search<'a>(&'a self, query: &str) -> impl Iterator<Item = &'a PackageEntry> + use<'a> {
        self.filtered(None, Some(query))
    }

    /// Entries passing both optional filters: `category` (case-insensitive
    /// exact match) and `search` (as in [`search`](Self::search)).
    pub fn filtered<'a>(
        &'a self,
        category: Option<&'a str>,
        search: Option<&str>,
    ) -> impl Iterator<Item = &'a PackageEntry> + use<'a> {
        let needle = search.unwrap_or("").trim().to_lowercase();
        self.entries.values().filter(move |e| {
            category.is_none_or(|c| e.category.eq_ignore_ascii_case(c)) && e.matches(&needle)
        })
    }

    /// Name to show for `key`; falls back to the key itself when the
    /// catalog does not know it.
    pub fn display_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.get(key).map_or(key, |e| e.display_name.as_str())
    }
}

struct CatalogRow {
    key: &'static str,
    name: &'static str,
    category: &'static str,
    description: &'static str,
    flatpak: Option<&'static str>,
    snap: Option<&'static str>,
    aur: Option<&'static str>,
    nix: Option<&'static str>,
}

impl CatalogRow {
    fn to_entry(&self) -> PackageEntry {
        let mut entry = PackageEntry::new(self.key, self.name, self.category)
            .with_description(self.description);
        let mappings = [
            (Backend::Flatpak, self.flatpak),
            (Backend::Snap, self.snap),
            (Backend::Aur, self.aur),
            (Backend::Nix, self.nix),
        ];
        for (backend, id) in mappings {
            if let Some(id) = id {
                entry = entry.with_backend(backend, id);
            }
        }
        entry
    }
}

macro_rules! row {
    ($key:literal, $name:literal, $cat:literal, $desc:literal,
     flatpak: $f:expr, snap: $s:expr, aur: $a:expr, nix: $n:expr) => {
        CatalogRow {
            key: $key,
            name: $name,
            category: $cat,
            description: $desc,
            flatpak: $f,
            snap: $s,
            aur: $a,
            nix: $n,
        }
    };
}

const BUILTIN_ROWS: &[CatalogRow] = &[
    // Browsers
    row!("brave", "Brave", "Browsers", "Fast, private, secure web browser.",
        flatpak: Some("com.brave.Browser"), snap: Some("brave"), aur: Some("brave-bin"), nix: Some("brave")),
    row!("librewolf", "LibreWolf", "Browsers", "Privacy-focused Firefox fork.",
        flatpak: Some("io.gitlab.librewolf-community"), snap: None, aur: Some("librewolf"), nix: Some("librewolf")),
    row!("chrome", "Google Chrome", "Browsers", "Google's proprietary web browser.",
        flatpak: None, snap: Some("google-chrome"), aur: Some("google-chrome"), nix: Some("google-chrome")),
    row!("chromium", "Chromium", "Browsers", "Open-source basis for Chrome.",
        flatpak: Some("org.chromium.Chromium"), snap: Some("chromium"), aur: Some("chromium"), nix: Some("chromium")),
    row!("ungoogled chromium", "Ungoogled Chromium", "Browsers", "Chromium without Google services.",
        flatpak: Some("com.github.Eloston.UngoogledChromium"), snap: None, aur: Some("ungoogled-chromium"), nix: Some("ungoogled-chromium")),
    row!("zen browser", "Zen Browser", "Browsers", "Focus-oriented web browsing.",
        flatpak: None, snap: None, aur: Some("zen-browser-bin"), nix: None),
    row!("helium browser", "Helium Browser", "Browsers", "Minimalist floating browser.",
        flatpak: None, snap: None, aur: Some("helium-browser-bin"), nix: None),
    // Development
    row!("vscode", "VS Code", "Development", "Microsoft's popular code editor.",
        flatpak: Some("com.visualstudio.Code"), snap: Some("code"), aur: Some("visual-studio-code-bin"), nix: Some("vscode")),
    row!("vscodium", "VSCodium", "Development", "VS Code without MS telemetry.",
        flatpak: Some("com.vscodium.codium"), snap: None, aur: Some("vscodium-bin"), nix: Some("vscodium")),
    // Office
    row!("libreoffice", "LibreOffice", "Office", "The powerful, free office suite.",
        flatpak: Some("org.libreoffice.LibreOffice"), snap: Some("libreoffice"), aur: Some("libreoffice-fresh"), nix: Some("libreoffice")),
    row!("onlyoffice", "OnlyOffice", "Office", "Alternative office suite.",
        flatpak: Some("org.onlyoffice.desktopeditors"), snap: Some("onlyoffice-desktopeditors"), aur: Some("onlyoffice-bin"), nix: None),
    // Utilities
    row!("1password", "1Password", "Utilities", "Secure password management.",
        flatpak: None, snap: Some("1password"), aur: Some("1password"), nix: Some("onepassword")),
    row!("keepassxc", "KeePassXC", "Utilities", "Free, cross-platform password manager.",
        flatpak: Some("org.keepassxc.KeePassXC"), snap: Some("keepassxc"), aur: Some("keepassxc"), nix: Some("keepassxc")),
    row!("redshift", "Redshift", "Utilities", "Adjusts screen temperature.",
        flatpak: Some("org.geoclue.Redshift"), snap: Some("redshift"), aur: Some("redshift"), nix: Some("redshift")),
    row!("timeshift", "Timeshift", "Utilities", "System restore utility for Linux.",
        flatpak: None, snap: None, aur: Some("timeshift"), nix: Some("timeshift")),
    row!("tty-clock", "TTY-Clock", "Utilities", "A simple clock for the terminal.",
        flatpak: None, snap: None, aur: Some("tty-clock"), nix: Some("tty-clock")),
    row!("ms-fonts", "MS Fonts", "Utilities", "Microsoft TrueType core fonts.",
        flatpak: None, snap: None, aur: Some("ttf-ms-fonts"), nix: None),
    row!("snapd", "Snapd", "Utilities", "The service for running Snap packages.",
        flatpak: None, snap: None, aur: Some("snapd"), nix: None),
    // Gaming
    row!("steam", "Steam", "Gaming", "Valve's digital distribution service.",
        flatpak: Some("com.valvesoftware.Steam"), snap: Some("steam"), aur: Some("steam"), nix: Some("steam")),
    row!("lutris", "Lutris", "Gaming", "Open Gaming Platform for Linux.",
        flatpak: Some("net.lutris.Lutris"), snap: Some("lutris"), aur: Some("lutris"), nix: Some("lutris")),
    row!("proton-ge", "Proton-GE", "Gaming", "Custom Proton build for Steam/Lutris.",
        flatpak: None, snap: None, aur: Some("proton-ge-custom-bin"), nix: None),
    // Graphics & Multimedia
    row!("gimp", "GIMP", "Graphics & Multimedia", "GNU Image Manipulation Program.",
        flatpak: Some("org.gimp.GIMP"), snap: Some("gimp"), aur: Some("gimp"), nix: Some("gimp")),
    row!("krita", "Krita", "Graphics & Multimedia", "Professional painting program.",
        flatpak: Some("org.kde.krita"), snap: Some("krita"), aur: Some("krita"), nix: Some("krita")),
    row!("kdenlive", "Kdenlive", "Graphics & Multimedia", "Free video editing software.",
        flatpak: Some("org.kde.kdenlive"), snap: Some("kdenlive"), aur: Some("kdenlive"), nix: Some("kdenlive")),
    row!("spotify", "Spotify", "Graphics & Multimedia", "Digital music streaming service.",
        flatpak: Some("com.spotify.Client"), snap: Some("spotify"), aur: Some("spotify"), nix: Some("spotify")),
    row!("zoom", "Zoom", "Graphics & Multimedia", "Video conferencing tool.",
        flatpak: Some("us.zoom.Zoom"), snap: Some("zoom-client"), aur: Some("zoom"), nix: Some("zoom")),
    // System & Virtualization
    row!("bottles", "Bottles", "System & Virtualization", "Manage Windows environments.",
        flatpak: Some("com.usebottles.bottles"), snap: None, aur: Some("bottles"), nix: Some("bottles")),
    row!("wine", "Wine", "System & Virtualization", "Run Windows applications.",
        flatpak: Some("org.winehq.Wine"), snap: None, aur: Some("wine"), nix: Some("wine")),
    row!("gearlever", "Gear Lever", "System & Virtualization", "Manage AppImages.",
        flatpak: Some("it.mijorus.gearlever"), snap: None, aur: None, nix: None),
    row!("appimagelauncher", "AppImageLauncher", "System & Virtualization", "Integrate AppImages into your system.",
        flatpak: None, snap: None, aur: Some("appimagelauncher"), nix: None),
    row!("boxbuddy", "BoxBuddy", "System & Virtualization", "GUI for Toolbx/Distrobox containers.",
        flatpak: Some("com.github.flxzt.boxbuddy"), snap: None, aur: None, nix: None),
    // Social
    row!("goofcord", "Goofcord", "Social", "Discord client alternative.",
        flatpak: None, snap: None, aur: Some("goofcord-bin"), nix: None),
    row!("vesktop", "Vesktop", "Social", "Custom Discord client with Vencord.",
        flatpak: None, snap: None, aur: Some("vesktop-bin"), nix: None),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_populated() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.len(), BUILTIN_ROWS.len());
        assert!(catalog.contains("brave"));
        assert!(catalog.contains("ungoogled chromium"));
    }

    #[test]
    fn test_builtin_entries_have_a_backend() {
        for entry in Catalog::builtin().entries() {
            assert!(
                !entry.available_backends().is_empty(),
                "{} has no backend mapping",
                entry.key
            );
        }
    }

    #[test]
    fn test_categories_keep_first_seen_order() {
        let categories = Catalog::builtin().categories();
        assert_eq!(categories.first().map(String::as_str), Some("Browsers"));
        assert_eq!(categories.last().map(String::as_str), Some("Social"));
        assert_eq!(categories.len(), 8);
    }

    #[test]
    fn test_identifier_ignores_blank_mapping() {
        let entry = PackageEntry::new("x", "X", "Misc")
            .with_backend(Backend::Flatpak, "  ")
            .with_backend(Backend::Aur, "x-bin");
        assert_eq!(entry.identifier(Backend::Flatpak), None);
        assert_eq!(entry.identifier(Backend::Aur), Some("x-bin"));
        assert_eq!(entry.available_backends(), vec![Backend::Aur]);
    }

    #[test]
    fn test_search_matches_name_and_description() {
        let catalog = Catalog::builtin();
        let hits: Vec<&str> = catalog.search("DISCORD").map(|e| e.key.as_str()).collect();
        assert_eq!(hits, vec!["goofcord", "vesktop"]);

        assert_eq!(catalog.search("").count(), catalog.len());
        assert_eq!(catalog.search("no-such-app").count(), 0);
    }

    #[test]
    fn test_in_category() {
        let office: Vec<&str> = Catalog::builtin()
            .in_category("office")
            .map(|e| e.key.as_str())
            .collect();
        assert_eq!(office, vec!["libreoffice", "onlyoffice"]);
    }

    #[test]
    fn test_filtered_combines_category_and_search() {
        let catalog = Catalog::builtin();
        let hits: Vec<&str> = catalog
            .filtered(Some("utilities"), Some("password"))
            .map(|e| e.key.as_str())
            .collect();
        assert_eq!(hits, vec!["1password", "keepassxc"]);

        assert_eq!(catalog.filtered(Some("Browsers"), None).count(), 7);
        assert_eq!(catalog.filtered(None, None).count(), catalog.len());
        assert_eq!(catalog.filtered(Some("Gaming"), Some("office")).count(), 0);
    }

    #[test]
    fn test_display_name_falls_back_to_key() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.display_name("gimp"), "GIMP");
        assert_eq!(catalog.display_name("unknown-app"), "unknown-app");
    }
}
