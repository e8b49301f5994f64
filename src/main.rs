//! pkgplan - command-line entry point

use anyhow::{Context, Result};
use pkgplan::catalog::Catalog;
use pkgplan::cli::{Cli, Commands};
use pkgplan::error::PlanError;
use pkgplan::executor::{CancelRelay, InstallEvent, InstallExecutor, LaunchConfig, CANCEL_BANNER};
use pkgplan::install_state::TerminalStatus;
use pkgplan::plan::{build_plan, Plan, PlanOptions};
use pkgplan::process_guard::{self, ShutdownGuard};
use pkgplan::settings::Settings;
use pkgplan::types::{Backend, EnabledBackends};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Log to stderr at `info` unless RUST_LOG says otherwise
fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    init_logger();

    if let Err(e) = process_guard::install_shutdown_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    let _guard = ShutdownGuard::new();

    let cli = Cli::parse_args();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let settings_path = match cli.settings {
        Some(path) => path,
        None => Settings::default_path().context("Could not determine a config directory")?,
    };
    debug!("Using settings file {:?}", settings_path);
    let mut settings = Settings::load_or_default(&settings_path);
    let catalog = Catalog::builtin();

    match cli.command {
        Commands::List { category, search } => {
            list_catalog(catalog, &settings, category.as_deref(), search.as_deref());
        }
        Commands::Status => print_status(catalog, &settings),
        Commands::Enable { backend } => {
            settings.set_backend(backend, true);
            settings.save_to_file(&settings_path)?;
            println!("✓ {} enabled", backend.header_name());
        }
        Commands::Disable { backend } => {
            settings.set_backend(backend, false);
            settings.save_to_file(&settings_path)?;
            println!("✓ {} disabled", backend.header_name());
        }
        Commands::Select {
            all,
            category,
            search,
            keys,
        } => {
            let keys: Vec<String> = if all {
                catalog
                    .filtered(category.as_deref(), search.as_deref())
                    .map(|e| e.key.clone())
                    .collect()
            } else {
                keys
            };
            for key in &keys {
                if !catalog.contains(key) {
                    warn!("'{}' is not in the catalog; it will be listed as unresolved", key);
                }
                settings.set_selected(key.clone(), true);
            }
            settings.save_to_file(&settings_path)?;
            println!("✓ {} application(s) selected", settings.selection().len());
        }
        Commands::Deselect { all, keys } => {
            if all {
                settings.packages.clear();
            } else {
                for key in keys {
                    settings.set_selected(key, false);
                }
            }
            settings.save_to_file(&settings_path)?;
            println!("✓ {} application(s) selected", settings.selection().len());
        }
        Commands::AurHelper { helper } => {
            settings.aur_helper = helper;
            settings.save_to_file(&settings_path)?;
            println!("✓ AUR helper set to {}", helper);
        }
        Commands::Plan { output } => {
            let Some(plan) = make_plan(catalog, &settings) else {
                return Ok(ExitCode::FAILURE);
            };
            match output {
                Some(path) => write_plan(&plan, &path)?,
                None => print!("{}", plan.text),
            }
        }
        Commands::Install { dry_run, launcher } => {
            let Some(plan) = make_plan(catalog, &settings) else {
                return Ok(ExitCode::FAILURE);
            };
            if dry_run {
                print!("{}", plan.text);
                return Ok(ExitCode::SUCCESS);
            }
            let launch = match launcher {
                Some(parts) => LaunchConfig::from_command_line(&parts)
                    .context("--launcher needs at least a program name")?,
                None => LaunchConfig::default(),
            };
            return run_install(&plan, launch);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn make_plan(catalog: &Catalog, settings: &Settings) -> Option<Plan> {
    let options = PlanOptions {
        aur_helper: settings.aur_helper,
    };
    match build_plan(catalog, &settings.enabled_backends(), &settings.selection(), &options) {
        Ok(plan) => Some(plan),
        Err(PlanError::EmptySelection) => {
            eprintln!("✗ {}", PlanError::EmptySelection);
            eprintln!("  Use `pkgplan select <key>...`; `pkgplan list` shows what is available.");
            None
        }
    }
}

fn write_plan(plan: &Plan, path: &Path) -> Result<()> {
    std::fs::write(path, &plan.text)
        .with_context(|| format!("Failed to write plan to {:?}", path))?;
    println!("✓ Plan for {} package(s) written to {:?}", plan.package_count(), path);
    Ok(())
}

fn run_install(plan: &Plan, launch: LaunchConfig) -> Result<ExitCode> {
    let mut executor = InstallExecutor::new(launch);

    // Ctrl-C cancels the current run instead of killing pkgplan outright
    let relay = Arc::new(CancelRelay::default());
    let handler_relay = Arc::clone(&relay);
    ctrlc::set_handler(move || {
        eprintln!("\n{CANCEL_BANNER}\nTerminating process...");
        handler_relay.interrupt();
    })
    .context("Failed to install Ctrl-C handler")?;

    println!("Starting installation...");
    println!("This may take a while. Please enter your password when prompted.\n");
    executor.start(plan.text.clone())?;
    if let Some(handle) = executor.cancel_handle() {
        relay.arm(handle);
    }

    let mut outcome = TerminalStatus::Failed;
    while let Some(event) = executor.recv() {
        match event {
            InstallEvent::Started { pid } => info!("Install process started (PID {})", pid),
            InstallEvent::Output(line) => println!("{line}"),
            InstallEvent::Finished(status) => outcome = status,
        }
    }
    relay.disarm();

    println!("\n--- INSTALLATION {} ---", outcome.banner());
    executor.acknowledge()?;

    Ok(match outcome {
        TerminalStatus::Complete => ExitCode::SUCCESS,
        TerminalStatus::Failed => ExitCode::FAILURE,
        TerminalStatus::Cancelled => ExitCode::from(130),
    })
}

fn list_catalog(catalog: &Catalog, settings: &Settings, category: Option<&str>, search: Option<&str>) {
    let selection = settings.selection();

    for name in catalog.categories() {
        if category.is_some_and(|c| !c.eq_ignore_ascii_case(name)) {
            continue;
        }
        let matches: Vec<_> = catalog.filtered(Some(name.as_str()), search).collect();
        if matches.is_empty() {
            continue;
        }

        println!("{name}");
        for entry in matches {
            let marker = if selection.contains(&entry.key) { "[x]" } else { "[ ]" };
            let sources: Vec<String> = entry
                .available_backends()
                .iter()
                .map(Backend::to_string)
                .collect();
            println!(
                "  {marker} {:<20} {:<22} {}  ({})",
                entry.key,
                entry.display_name,
                entry.description,
                sources.join(", ")
            );
        }
        println!();
    }
}

fn print_status(catalog: &Catalog, settings: &Settings) {
    let enabled: EnabledBackends = settings.enabled_backends();
    println!("Sources (priority order):");
    for backend in Backend::in_priority_order() {
        let mark = if enabled.is_enabled(backend) { "✓" } else { "✗" };
        println!("  {mark} {}", backend.header_name());
    }
    println!("AUR helper: {}", settings.aur_helper);

    let selection = settings.selection();
    println!("\nSelected ({}):", selection.len());
    for key in &selection {
        println!("  {} ({})", catalog.display_name(key), key);
    }
}
