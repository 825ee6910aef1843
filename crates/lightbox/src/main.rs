//! Lightbox command-line entry point
//!
//! - `run`: watcher plus periodic sweeps until Ctrl-C
//! - `sweep`: one reconciliation pass
//! - `process`: push a single stored artifact through both stages
//! - `notify`: deliver one inbox notification given as JSON
//! - `records`: print stored analysis records

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lightbox::{
    AnnotationClient, CategorizerClient, KeywordCategorizer, LlmCategorizer,
    LocalArtifactStore, LocalWatcher, Pipeline, PipelineConfig, ReconciliationScanner,
    ResultStore, ScanScheduler, ServiceCredentials, ServiceMode, SqliteResultStore,
    StageOutcome, StaticAnnotator, SweepStats, VisionClient,
};
use lightbox_logging::{init_logging, LogConfig};
use lightbox_protocol::{owner_namespace, paths, InboxNotification};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// How long `run` waits for background loops after Ctrl-C
const SHUTDOWN_TIMEOUT_SECS: u64 = 10;

#[derive(Parser, Debug)]
#[command(name = "lightbox", version, about = "Idempotent image ingestion pipeline")]
struct Cli {
    /// Enable debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.lightbox/lightbox.toml)
    #[arg(long, global = true, env = "LIGHTBOX_CONFIG")]
    config: Option<PathBuf>,

    /// API key for the label-detection service
    #[arg(long, global = true, env = "LIGHTBOX_VISION_API_KEY", hide_env_values = true)]
    vision_api_key: Option<String>,

    /// API key for the categorization model
    #[arg(long, global = true, env = "LIGHTBOX_CATEGORIZER_API_KEY", hide_env_values = true)]
    categorizer_api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the store and run both sweeps until interrupted
    Run {
        /// Sweeps only; do not poll for new uploads
        #[arg(long)]
        no_watch: bool,
    },

    /// Run one reconciliation pass (both kinds unless one is selected)
    Sweep {
        #[arg(long)]
        relocate: bool,

        #[arg(long)]
        analyze: bool,

        /// Restrict the sweep to this prefix
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Run one stored artifact through every stage it is eligible for
    Process {
        /// Store-relative path, e.g. inbox/a.jpg
        path: String,
    },

    /// Deliver a single inbox notification
    Notify {
        /// Notification JSON: {"path": ..., "content_kind": ..., "byte_size": ..., "metadata": {...}}
        json: String,
    },

    /// Print analysis records for an owner
    Records {
        /// Owner id
        uid: String,

        /// Print public cross-references instead
        #[arg(long)]
        public: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config {
        /// Write it to the config path if no file exists there yet
        #[arg(long)]
        init: bool,
    },
}

/// Everything a command needs, wired from the config file.
struct App {
    config: PipelineConfig,
    pipeline: Arc<Pipeline>,
    results: Arc<SqliteResultStore>,
}

impl App {
    async fn open(config: PipelineConfig, credentials: ServiceCredentials) -> Result<Self> {
        let store = LocalArtifactStore::new(&config.store_root).with_context(|| {
            format!("Failed to open artifact store at {}", config.store_root.display())
        })?;
        if let Some(parent) = config.results_db.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let results = Arc::new(
            SqliteResultStore::open(&config.results_db)
                .await
                .with_context(|| {
                    format!("Failed to open result store at {}", config.results_db.display())
                })?,
        );

        let (annotator, categorizer) = enrichment_clients(&config, &credentials);
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(store),
            results.clone(),
            annotator,
            categorizer,
            config.pipeline_settings(credentials),
        ));

        Ok(Self {
            config,
            pipeline,
            results,
        })
    }

    fn scanner(&self) -> Arc<ReconciliationScanner> {
        Arc::new(ReconciliationScanner::new(
            self.pipeline.clone(),
            self.config.max_concurrent_invocations,
        ))
    }
}

fn enrichment_clients(
    config: &PipelineConfig,
    credentials: &ServiceCredentials,
) -> (Arc<dyn AnnotationClient>, Arc<dyn CategorizerClient>) {
    let services = &config.services;
    match services.mode {
        ServiceMode::Offline => {
            info!(labels = ?services.offline_labels, "Using offline enrichment");
            (
                Arc::new(StaticAnnotator::new(services.offline_labels.clone())),
                Arc::new(KeywordCategorizer),
            )
        }
        ServiceMode::Http => {
            if credentials.vision_api_key().is_none() || credentials.categorizer_api_key().is_none() {
                warn!("HTTP enrichment selected but an API key is missing; analysis will fail until it is set");
            }
            (
                Arc::new(VisionClient::new(
                    services.vision_endpoint.clone(),
                    services.max_labels,
                )),
                Arc::new(LlmCategorizer::new(
                    services.categorizer_endpoint.clone(),
                    services.model.clone(),
                )),
            )
        }
    }
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config.clone().unwrap_or_else(paths::default_config_path)
}

fn load_config(path: &Path, must_exist: bool) -> Result<PipelineConfig> {
    let config = if must_exist {
        PipelineConfig::load(path)
    } else {
        PipelineConfig::load_or_default(path)
    };
    config.with_context(|| format!("Failed to load config from {}", path.display()))
}

async fn run_command(cli: Cli) -> Result<()> {
    let path = config_path(&cli);
    // `config --init` is how a missing explicit file gets created
    let must_exist = cli.config.is_some() && !matches!(cli.command, Commands::Config { init: true });
    let config = load_config(&path, must_exist)?;
    let credentials = ServiceCredentials::new(cli.vision_api_key, cli.categorizer_api_key);

    match cli.command {
        Commands::Config { init } => {
            if init {
                if path.exists() {
                    bail!("{} already exists", path.display());
                }
                config
                    .save(&path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Wrote {}", path.display());
            }
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Run { no_watch } => run(App::open(config, credentials).await?, !no_watch).await,
        Commands::Sweep {
            relocate,
            analyze,
            prefix,
        } => {
            let app = App::open(config, credentials).await?;
            let scanner = app.scanner();
            let both = !relocate && !analyze;
            if relocate || both {
                let stats = scanner.relocation_sweep(prefix.as_deref()).await?;
                print_stats("relocation", &stats);
            }
            if analyze || both {
                let stats = scanner.analysis_sweep(prefix.as_deref()).await?;
                print_stats("analysis", &stats);
            }
            Ok(())
        }
        Commands::Process { path } => {
            let app = App::open(config, credentials).await?;
            let outcomes = app
                .pipeline
                .process(&path)
                .await
                .with_context(|| format!("Failed to process {}", path))?;
            for outcome in &outcomes {
                print_outcome(&path, outcome);
            }
            Ok(())
        }
        Commands::Notify { json } => {
            let notification: InboxNotification =
                serde_json::from_str(&json).context("Invalid notification JSON")?;
            let app = App::open(config, credentials).await?;
            let outcome = app
                .pipeline
                .handle_notification(&notification)
                .await
                .with_context(|| format!("Failed to handle notification for {}", notification.path))?;
            print_outcome(&notification.path, &outcome);
            Ok(())
        }
        Commands::Records { uid, public, json } => {
            let app = App::open(config, credentials).await?;
            if public {
                let refs: Vec<_> = app
                    .results
                    .list_public_references()
                    .await?
                    .into_iter()
                    .filter(|r| r.owner_id == uid)
                    .collect();
                if json {
                    println!("{}", serde_json::to_string_pretty(&refs)?);
                } else {
                    for r in &refs {
                        println!("{}  {}  {}", r.created_at.to_rfc3339(), r.record_id, r.namespace);
                    }
                }
                return Ok(());
            }

            let records = app.results.list_records(&owner_namespace(&uid)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No records for {}", uid);
            } else {
                for r in &records {
                    println!(
                        "{}  {:<28} {:<8} {}  [{}]",
                        r.record_id,
                        r.category.as_str(),
                        r.visibility.as_str(),
                        r.file_path,
                        r.tags.join(", ")
                    );
                }
            }
            Ok(())
        }
    }
}

async fn run(app: App, watch_enabled: bool) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    let scheduler = ScanScheduler::new(
        app.scanner(),
        app.config.relocation_interval(),
        app.config.analysis_interval(),
    );
    handles.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));

    if watch_enabled {
        let watcher = LocalWatcher::new(app.pipeline.clone(), app.config.watch_interval());
        handles.push(tokio::spawn(watcher.run(shutdown_rx.clone())));
    }

    info!(
        store = %app.config.store_root.display(),
        watch = watch_enabled,
        "Lightbox running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    // Receivers may already be gone if a loop exited on its own
    let _ = shutdown_tx.send(true);

    let all = join_all(handles);
    if tokio::time::timeout(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS), all)
        .await
        .is_err()
    {
        warn!(
            timeout_secs = SHUTDOWN_TIMEOUT_SECS,
            "Background loops did not stop in time"
        );
    }
    Ok(())
}

async fn join_all(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
}

fn print_stats(kind: &str, stats: &SweepStats) {
    println!(
        "{} sweep: {} listed, {} eligible, {} succeeded, {} skipped, {} failed, {} vanished",
        kind,
        stats.listed,
        stats.eligible,
        stats.succeeded,
        stats.skipped,
        stats.failed,
        stats.vanished
    );
}

fn print_outcome(path: &str, outcome: &StageOutcome) {
    match outcome {
        StageOutcome::Skipped(reason) => println!("{}: skipped ({})", path, reason),
        StageOutcome::Relocated { destination } => println!("{}: relocated to {}", path, destination),
        StageOutcome::Analyzed {
            record_id,
            category,
            public,
        } => println!(
            "{}: analyzed as {} (record {}{})",
            path,
            category,
            record_id,
            if *public { ", public" } else { "" }
        ),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "lightbox",
        verbose: cli.verbose,
        log_dir: None,
    }) {
        eprintln!("Warning: logging disabled: {:?}", err);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("Failed to start async runtime: {}", err);
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run_command(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{:?}", err);
            ExitCode::from(1)
        }
    }
}
