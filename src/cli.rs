// CLI module - command-line argument parsing and handlers
//
// Subcommands:
// - config --show: Display effective configuration
// - config --reset: Regenerate config file with defaults
// - config --path: Print the config file location
// - buffer-key [--new]: Print (or regenerate) the buffer secret
// - site <host>: Register (or reconfigure) a site, printing its ID

use crate::config::{Config, VERSION};
use crate::secret;
use crate::site::Collect;
use crate::store::SqliteStore;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Write;

/// hitkeeper - privacy-friendly pageview buffer and session tracker
#[derive(Parser)]
#[command(name = "hitkeeper")]
#[command(version = VERSION)]
#[command(about = "Buffers pageviews and assigns pseudonymous sessions", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Reset config file to defaults
        #[arg(long)]
        reset: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Print the shared secret for the hit buffer endpoint
    BufferKey {
        /// Generate a new key, invalidating the old one
        #[arg(long)]
        new: bool,
    },

    /// Register a site by hostname, or update an existing site's flags
    Site {
        host: String,

        /// Don't track sessions for this site
        #[arg(long)]
        no_sessions: bool,
    },
}

/// Handle CLI commands. Returns true if a command was handled (exit after).
pub fn handle_cli() -> anyhow::Result<bool> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Config { show, reset, path }) => {
            if path {
                handle_config_path()?;
            } else if show {
                handle_config_show()?;
            } else if reset {
                handle_config_reset()?;
            } else {
                // No flag provided, show help
                println!("Usage: hitkeeper config [--show|--reset|--path]");
                println!();
                println!("Options:");
                println!("  --show    Display effective configuration");
                println!("  --reset   Reset config file to defaults");
                println!("  --path    Show config file path");
            }
            Ok(true)
        }
        Some(Commands::BufferKey { new }) => {
            handle_buffer_key(new)?;
            Ok(true)
        }
        Some(Commands::Site { host, no_sessions }) => {
            handle_site(&host, no_sessions)?;
            Ok(true)
        }
        None => Ok(false), // No subcommand, run the memstore
    }
}

fn config_path() -> anyhow::Result<std::path::PathBuf> {
    Config::config_path().context("Could not determine config path")
}

fn handle_config_path() -> anyhow::Result<()> {
    println!("{}", config_path()?.display());
    Ok(())
}

fn handle_config_show() -> anyhow::Result<()> {
    let config = Config::load()?;

    println!("# Effective configuration (env > file > defaults)");
    println!();
    print!("{}", config.to_toml());
    println!("# demo_mode = {} (HITKEEPER_DEMO)", config.demo_mode);

    // Show source info
    println!();
    let path = config_path()?;
    if path.exists() {
        println!("# Source: {}", path.display());
    } else {
        println!("# Source: defaults (no config file)");
    }
    Ok(())
}

fn handle_config_reset() -> anyhow::Result<()> {
    let path = config_path()?;

    // Confirm if file exists
    if path.exists() {
        eprint!(
            "Config file exists at {}. Overwrite? [y/N] ",
            path.display()
        );
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Error creating {}", parent.display()))?;
    }

    // Write the default config (using Config's single source of truth)
    std::fs::write(&path, Config::default().to_toml())
        .with_context(|| format!("Error writing {}", path.display()))?;

    println!("Config reset to defaults: {}", path.display());
    Ok(())
}

fn open_store() -> anyhow::Result<SqliteStore> {
    let config = Config::load()?;
    SqliteStore::open(&config.db_path)
        .with_context(|| format!("Opening database {}", config.db_path.display()))
}

fn handle_buffer_key(new: bool) -> anyhow::Result<()> {
    let store = open_store()?;
    let key = if new {
        secret::new_buffer_key(&store)?
    } else {
        secret::load_or_create_buffer_key(&store)?
    };
    println!("{}", key);
    Ok(())
}

fn handle_site(host: &str, no_sessions: bool) -> anyhow::Result<()> {
    let store = open_store()?;
    let collect = if no_sessions {
        Collect::all().without(Collect::SESSION)
    } else {
        Collect::all()
    };
    let (site, changed) = store.configure_site(host, collect)?;
    if changed {
        eprintln!("Updated collection flags for existing site {}", site.host);
    }
    println!("{}\t{}\t{}", site.id, site.host, site.collect);
    Ok(())
}
