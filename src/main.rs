// hitkeeper daemon
//
// Opens the hit database, restores stored sessions, and runs the memstore
// driver until Ctrl+C. In demo mode a synthetic producer feeds pageviews for
// a demo site. On shutdown the buffer is flushed and the sessions are
// snapshotted so a restart picks up where this run left off.

use anyhow::{Context, Result};
use hitkeeper::cache::{CachedSites, HitCounts};
use hitkeeper::config::Config;
use hitkeeper::driver::Driver;
use hitkeeper::memstore::{Backends, Memstore, MemstoreOptions};
use hitkeeper::refspam::RefspamList;
use hitkeeper::site::Collect;
use hitkeeper::store::SqliteStore;
use hitkeeper::util::{Clock, SystemClock};
use hitkeeper::{cli, demo, logging, secret};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> Result<()> {
    // Handle CLI commands first (config --show, --reset, --path, ...)
    // If a command was handled, exit early
    if cli::handle_cli()? {
        return Ok(());
    }

    // Ensure config template exists (helps users discover options)
    Config::ensure_config_exists();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("\n╔══════════════════════════════════════════════════════════════╗");
            eprintln!("║  CONFIG ERROR - Failed to load configuration                 ║");
            eprintln!("╚══════════════════════════════════════════════════════════════╝\n");
            eprintln!("  Error: {:#}\n", e);
            eprintln!("  To reset, run: hitkeeper config --reset\n");
            std::process::exit(1);
        }
    };

    // The guard must be kept alive for the duration of the program to ensure logs flush
    let _file_guard = logging::init(&config.logging);

    let store = Arc::new(
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("Opening database {}", config.db_path.display()))?,
    );
    tracing::info!("Hit database: {}", config.db_path.display());

    secret::load_or_create_buffer_key(store.as_ref()).context("Loading buffer secret")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let spam = Arc::new(RefspamList::with_builtin(config.refspam.extra_hosts.clone()));
    tracing::debug!(hosts = spam.len(), "Referrer spam list loaded");

    let sites = Arc::new(CachedSites::new(store.clone(), clock.clone()));
    let backends = Backends::from_store(store.clone(), spam).with_sites(sites);

    let mem = Arc::new(Memstore::new(
        MemstoreOptions {
            deterministic_ids: config.deterministic_sessions,
        },
        backends,
        clock.clone(),
    ));
    if config.deterministic_sessions {
        tracing::warn!("Deterministic session IDs enabled; don't use this in production");
    }
    mem.init().context("Restoring sessions")?;

    let counts = Arc::new(HitCounts::new(clock));
    let (driver_tx, driver_rx) = oneshot::channel();
    let driver = Driver::new(mem.clone(), config.driver_config()).with_hit_counts(counts);
    let driver_handle = tokio::spawn(driver.run(driver_rx));

    let demo_shutdown = if config.demo_mode {
        let site = store.ensure_site(demo::DEMO_HOST, Collect::all())?;
        tracing::info!("Running in DEMO MODE - generating pageviews for site {}", site.id);
        let (tx, rx) = oneshot::channel();
        let demo_handle = tokio::spawn(demo::run_demo(
            mem.clone(),
            site.id,
            Duration::from_millis(250),
            rx,
        ));
        Some((tx, demo_handle))
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    // Stop producing before the final flush
    if let Some((tx, handle)) = demo_shutdown {
        let _ = tx.send(());
        let _ = handle.await;
    }

    // If the send fails the driver has already stopped (which is fine)
    let _ = driver_tx.send(());
    if let Err(e) = driver_handle.await {
        tracing::error!("Driver task failed: {}", e);
    }

    tracing::info!(hits = store.hit_count()?, "Shutdown complete");
    Ok(())
}
