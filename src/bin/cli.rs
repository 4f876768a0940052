//! bamboo-cdx CLI
//!
//! Local entry point for running indexing passes, rule refreshes, and
//! one-off policy resolutions against a data directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bamboo_cdx::{
    config::Config,
    error::{AppError, Result},
    pipeline::Coordinator,
    rules::{LogReprocessor, RuleEngine, RuleRefresher, RuleSet, RuleSource},
    storage::{LocalStore, MetadataStore},
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

/// bamboo-cdx - web-archive CDX indexer and access-control rule engine
#[derive(Parser, Debug)]
#[command(
    name = "bamboo-cdx",
    version,
    about = "Web-archive CDX indexer and access-control rule engine"
)]
struct Cli {
    /// Path to the data directory holding config and store documents
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index pending archive files into their collections' CDX servers
    Index,

    /// Pull rules from the rule source and reprocess what changed
    Refresh,

    /// Resolve the access policy for a URL
    Resolve {
        url: String,

        /// Capture time (RFC 3339); defaults to now
        #[arg(long)]
        captured: Option<DateTime<Utc>>,

        /// Access time (RFC 3339); defaults to now
        #[arg(long)]
        accessed: Option<DateTime<Utc>>,
    },

    /// Clear the rule-engine lockdown flag after a failed refresh
    ClearLockdown,

    /// Validate configuration files
    Validate,

    /// Show store and rule-engine status
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Build the rule engine from the locally persisted snapshot.
async fn load_engine(store: &LocalStore) -> Result<Arc<RuleEngine>> {
    let rules = store.load_rules().await?;
    let engine = RuleEngine::new(RuleSet::build(rules));
    engine.set_lockdown(store.lockdown().await?);
    Ok(Arc::new(engine))
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.data_dir.join("config.toml");
    let config = Config::load_or_default(&config_path);
    let store = Arc::new(LocalStore::new(&cli.data_dir));

    match cli.command {
        Command::Index => {
            config.validate()?;
            let coordinator = Coordinator::new(Arc::clone(&store) as Arc<dyn MetadataStore>, &config)?;
            let summary = coordinator.run().await?;
            if summary.failed > 0 {
                log::warn!("{} files left for retry next pass", summary.failed);
            }
        }

        Command::Refresh => {
            config.validate()?;
            if config.rules.source_url.is_empty() {
                return Err(AppError::config(
                    "rules.source_url is not configured; refresh is disabled",
                ));
            }
            let engine = load_engine(&store).await?;
            let source = RuleSource::new(
                &config.rules.source_url,
                Duration::from_secs(config.rules.timeout_secs),
            )?;
            let refresher = RuleRefresher::new(
                source,
                Arc::clone(&store) as Arc<dyn MetadataStore>,
                engine,
                Arc::new(LogReprocessor),
            );
            let outcome = refresher.run_once().await?;
            if outcome.recovered {
                log::info!("recovered an interrupted refresh run");
            }
            log::info!(
                "{} rules changed, {} documents re-evaluated",
                outcome.changed,
                outcome.documents
            );
        }

        Command::Resolve {
            url,
            captured,
            accessed,
        } => {
            let engine = load_engine(&store).await?;
            let captured = captured.unwrap_or_else(Utc::now);
            let accessed = accessed.unwrap_or_else(Utc::now);
            let rule = engine.resolve(&url, captured, accessed)?;

            log::info!("url: {url}");
            log::info!("policy: {:?}", rule.policy);
            if rule.id < 0 {
                log::info!("matched: default-accept (no rule applies)");
            } else {
                log::info!("matched: rule {} {:?}", rule.id, rule.patterns);
            }
        }

        Command::ClearLockdown => {
            store.set_lockdown(false).await?;
            log::info!("lockdown cleared; rule filtering is trusted again");
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("Config OK");
        }

        Command::Info => {
            log::info!("Data directory: {}", cli.data_dir.display());

            let files = store.files().await?;
            let pending = store.pending_files(usize::MAX).await?;
            log::info!("Files: {} total, {} pending", files.len(), pending.len());

            let rules = store.load_rules().await?;
            log::info!("Rules: {}", rules.len());

            match store.last_run().await? {
                Some(run) if run.completed => {
                    log::info!("Last refresh: completed at {:?}", run.finished)
                }
                Some(run) => log::info!(
                    "Last refresh: INCOMPLETE (checkpoint {:?}), next refresh will recover",
                    run.checkpoint
                ),
                None => log::info!("Last refresh: never"),
            }

            if store.lockdown().await? {
                log::warn!("Rule engine is LOCKED DOWN; clear-lockdown to resume");
            }
        }
    }

    Ok(())
}
