//! ADS-B Logger CLI
//!
//! Runs the polling loop until SIGINT/SIGTERM, or checks the setup with
//! `probe` and `validate`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use adsb_logger::{
    cache::RegistryCache,
    error::{AppError, Result},
    logging::{self, LogFileManager, TeeWriter},
    models::{AircraftSnapshot, Config, LoggingConfig, MailConfig},
    pipeline::{
        CircuitBreakerConfig, Pipeline, ShutdownTrigger, StatusEvent, StatusReceiver, shutdown,
        status,
    },
    services::{
        AircraftFeed, HttpRegistrySource, JsonFeed, LogNotifier, Notifier, RegistrySource,
        parse_registry,
    },
    storage::{MemorySummaryStore, MySqlSummaryStore, PersistenceManager, SummaryStore},
};
use clap::{Parser, Subcommand};

/// ADS-B Logger - aircraft sighting summaries for MySQL
#[derive(Parser, Debug)]
#[command(
    name = "adsb-logger",
    version,
    about = "Polls aircraft.json and commits per-aircraft summaries to MySQL"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "adsb-logger.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the feed and commit summaries until interrupted
    Run {
        /// Keep summaries in memory instead of writing to MySQL
        #[arg(long)]
        dry_run: bool,
    },

    /// Read the feed and registry once and report what was found
    Probe,

    /// Validate the configuration file
    Validate,
}

/// Initialize logging from config, mirroring output into the log file if set.
fn init_logging(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    builder.format_timestamp_secs();

    if let Some(path) = &config.file {
        let file = logging::open_log_file(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(TeeWriter::new(file))));
    }
    builder.init();
    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = Config::load(&cli.config);
    let mut config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => Config::default(),
    };
    config.apply_env_overrides();
    init_logging(&config.logging, cli.verbose)?;

    match &loaded {
        Ok(_) => log::info!("Loaded configuration from {}", cli.config.display()),
        Err(e) => log::warn!(
            "Config load failed from {}: {e}. Using defaults.",
            cli.config.display()
        ),
    }

    match cli.command {
        Command::Run { dry_run } => run(config, dry_run).await?,
        Command::Probe => probe(&config).await?,
        Command::Validate => validate(&config, &cli.config, loaded.err())?,
    }

    Ok(())
}

async fn run(config: Config, dry_run: bool) -> Result<()> {
    config.validate()?;

    let store: Arc<dyn SummaryStore> = if dry_run {
        log::info!("Dry run: summaries are kept in memory only");
        Arc::new(MemorySummaryStore::new())
    } else {
        let manager = PersistenceManager::connect(&config.database).await?;
        Arc::new(MySqlSummaryStore::new(
            manager,
            &config.database,
            config.upload.batch_size,
        ))
    };

    let feed = Arc::new(JsonFeed::new(&config.feed)?);
    let registry = Arc::new(RegistryCache::new(
        Arc::new(HttpRegistrySource::new(
            &config.registry,
            &config.feed.user_agent,
        )?),
        Duration::from_secs(config.registry.ttl_secs),
        CircuitBreakerConfig {
            failure_threshold: config.registry.breaker_threshold,
            timeout: Duration::from_secs(config.registry.breaker_timeout_secs),
        },
    ));

    let (tx, rx) = status::channel();
    let mut pipeline = Pipeline::new(&config, feed, registry, store, build_notifier(&config.mail))
        .with_status(tx);
    if let Some(path) = &config.logging.file {
        pipeline = pipeline.with_log_manager(
            LogFileManager::new(path, config.logging.cleanup_interval_hours)
                .with_max_size(config.logging.max_size_mb * 1024 * 1024),
        );
    }

    let (trigger, mut shutdown) = shutdown::channel();
    tokio::spawn(listen_for_signals(trigger));
    let reporter = tokio::spawn(report_status(rx));

    pipeline.run(&mut shutdown).await;

    // Dropping the pipeline closes the status channel and ends the reporter.
    drop(pipeline);
    if let Err(e) = reporter.await {
        log::warn!("Status reporter ended abnormally: {e}");
    }
    log::info!("ADS-B logger shut down cleanly");
    Ok(())
}

#[cfg_attr(not(feature = "mail"), allow(unused_variables))]
fn build_notifier(config: &MailConfig) -> Arc<dyn Notifier> {
    #[cfg(feature = "mail")]
    if let Some(mailer) = adsb_logger::services::MailNotifier::from_config(config) {
        return Arc::new(mailer);
    }
    Arc::new(LogNotifier)
}

/// Trigger shutdown on Ctrl-C or SIGTERM.
async fn listen_for_signals(trigger: ShutdownTrigger) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                log::warn!("Cannot listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    log::info!("Shutdown signal received, finishing current cycle...");
    trigger.trigger();
}

/// Render pipeline status events through the logger.
async fn report_status(mut rx: StatusReceiver) {
    while let Some(event) = rx.recv().await {
        match &event {
            StatusEvent::CommitFailed { .. } | StatusEvent::CycleFailed { .. } => {
                log::warn!("{event}")
            }
            StatusEvent::CycleCompleted(report) if !report.feed_ok => log::warn!("{event}"),
            StatusEvent::Health(health) => {
                log::info!("{event}");
                if let Some(cleanup) = &health.log_cleanup {
                    log::info!(
                        "Next log cleanup in {:.1} hours",
                        cleanup.hours_until_cleanup
                    );
                }
            }
            _ => log::info!("{event}"),
        }
    }
}

async fn probe(config: &Config) -> Result<()> {
    let feed = JsonFeed::new(&config.feed)?;
    log::info!("Reading feed from {}", feed.location());
    let entries = feed.fetch().await?;

    let valid: Vec<AircraftSnapshot> = entries
        .iter()
        .filter_map(|entry| AircraftSnapshot::from_value(entry).ok())
        .collect();
    log::info!(
        "Feed: {} entries, {} valid, {} rejected",
        entries.len(),
        valid.len(),
        entries.len() - valid.len()
    );

    let source = HttpRegistrySource::new(&config.registry, &config.feed.user_agent)?;
    log::info!("Downloading registry from {}", source.location());
    let registry = parse_registry(&source.fetch().await?);
    let known = valid
        .iter()
        .filter(|a| registry.contains_key(&a.hex.to_uppercase()))
        .count();
    log::info!(
        "Registry: {} records, {known}/{} current aircraft known",
        registry.len(),
        valid.len()
    );

    Ok(())
}

fn validate(config: &Config, path: &Path, load_error: Option<AppError>) -> Result<()> {
    log::info!("Validating configuration...");

    if let Some(e) = load_error {
        log::error!("Could not load {}: {e}", path.display());
        return Err(e);
    }
    if let Err(e) = config.validate() {
        log::error!("Config validation failed: {}", e);
        return Err(e);
    }
    log::info!("✓ Config OK");

    if config.mail.is_configured() {
        log::info!("✓ Failure notifications mailed to {}", config.mail.recipient);
    } else {
        log::warn!("Email not configured, failure notifications go to the log only");
    }

    log::info!("All validations passed!");
    Ok(())
}
