mod capture;
mod events;
mod queue;
mod report;
mod scheduler;
#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use events::{EventBus, PipelineEvent, TimerKind};
use recap_core::config::init_logging;
use recap_core::provider::{ActiveProviders, ProviderRegistry, ProviderSettings};
use recap_core::{AppConfig, Database};
use report::{ReportGenerator, ReportSelection};
use scheduler::Scheduler;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "recap-daemon", about = "Recap screenshot and report daemon")]
struct Cli {
    /// Path to an alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

// Drain serialization is a per-process mutex: `drain` and `report` assume
// the daemon is not running, otherwise two processes can interleave drains
// against the same captures through the shared database file.
#[derive(Subcommand)]
enum Command {
    /// Start the daemon (default when no subcommand given)
    Run,
    /// Take a single screenshot now
    Capture,
    /// Describe every undescribed screenshot in the queue (stop the daemon first)
    Drain,
    /// Generate a report for today, or for specific captures (stop the daemon first)
    Report {
        /// Comma-separated capture ids; omit to report on today
        #[arg(long, value_delimiter = ',')]
        ids: Vec<i64>,
    },
    /// List recent reports
    Reports {
        #[arg(long, default_value = "10")]
        limit: i64,
    },
    /// List available provider connectors
    Providers,
    /// Update one configuration setting, e.g. `set description.model llava`
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_daemon(config).await,
        Command::Capture => run_capture(config).await,
        Command::Drain => run_drain(config).await,
        Command::Report { ids } => run_report(config, ids).await,
        Command::Reports { limit } => run_list_reports(config, limit),
        Command::Providers => run_providers(config),
        Command::Set { key, value } => run_set(config, cli.config.as_deref(), &key, &value),
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    config.ensure_dirs()?;
    Ok(config)
}

fn open_db(config: &AppConfig) -> anyhow::Result<Arc<Mutex<Database>>> {
    let db_path = config.db_path()?;
    let db = Database::open(&db_path)?;
    info!(path = %db_path.display(), "database opened");
    Ok(Arc::new(Mutex::new(db)))
}

struct Pipeline {
    db: Arc<Mutex<Database>>,
    queue: Arc<queue::QueueProcessor>,
    reports: ReportGenerator,
    events: EventBus,
}

fn build_pipeline(config: &AppConfig) -> anyhow::Result<Pipeline> {
    let db = open_db(config)?;
    let events = EventBus::new();

    let settings = ProviderSettings::from_config(config)?;
    let registry = ProviderRegistry::with_builtins(&settings);
    let providers = ActiveProviders::from_config(&registry, config)?;

    let queue = Arc::new(queue::QueueProcessor::new(
        db.clone(),
        providers.vision,
        config,
        events.clone(),
    ));
    let reports = ReportGenerator::new(
        db.clone(),
        providers.text,
        queue.clone(),
        config,
        events.clone(),
    );

    Ok(Pipeline {
        db,
        queue,
        reports,
        events,
    })
}

async fn run_daemon(config: AppConfig) -> anyhow::Result<()> {
    info!(
        capture_interval_min = config.capture.interval_minutes,
        description_interval_min = config.description.interval_minutes,
        "recap-daemon starting"
    );

    let pipeline = build_pipeline(&config)?;
    let backend = Arc::new(capture::CaptureBackend::new(&config)?);

    // Log pipeline events as they happen.
    {
        let mut rx = pipeline.events.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                match event {
                    PipelineEvent::ScreenshotTaken { capture_id } => {
                        info!(capture_id, "event: screenshot taken")
                    }
                    PipelineEvent::QueueCompleted { described } => {
                        info!(described, "event: queue drained")
                    }
                    PipelineEvent::TimerStateChanged { timer, running } => {
                        info!(timer = %timer, running, "event: timer state changed")
                    }
                    PipelineEvent::ReportGenerated { report_id } => {
                        info!(report_id, "event: report generated")
                    }
                }
            }
        });
    }

    let scheduler = Scheduler::new(pipeline.events.clone());

    if config.capture.enabled {
        let backend = backend.clone();
        let db = pipeline.db.clone();
        let events = pipeline.events.clone();
        scheduler.start_timer(
            TimerKind::Screenshot,
            Duration::from_secs(u64::from(config.capture.interval_minutes) * 60),
            Arc::new(move || {
                let backend = backend.clone();
                let db = db.clone();
                let events = events.clone();
                Box::pin(async move { capture::capture_tick(&backend, &db, &events).await })
            }),
        );
    }

    if config.description.enabled {
        let queue = pipeline.queue.clone();
        scheduler.start_timer(
            TimerKind::Description,
            Duration::from_secs(u64::from(config.description.interval_minutes) * 60),
            Arc::new(move || {
                let queue = queue.clone();
                Box::pin(async move {
                    if let Err(e) = queue.drain().await {
                        warn!(error = %e, "scheduled drain failed");
                    }
                })
            }),
        );
    }

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
    }

    scheduler.stop_all();
    info!("recap-daemon stopped");
    Ok(())
}

async fn run_capture(config: AppConfig) -> anyhow::Result<()> {
    let db = open_db(&config)?;
    let backend = capture::CaptureBackend::new(&config)?;
    let capture_id = capture::capture_once(&backend, &db, &EventBus::new()).await?;
    println!("Captured #{capture_id}");
    Ok(())
}

async fn run_drain(config: AppConfig) -> anyhow::Result<()> {
    let pipeline = build_pipeline(&config)?;
    let described = pipeline.queue.drain().await?;
    println!("Described {} screenshot(s)", described.len());
    Ok(())
}

async fn run_report(config: AppConfig, ids: Vec<i64>) -> anyhow::Result<()> {
    let pipeline = build_pipeline(&config)?;
    let selection = if ids.is_empty() {
        ReportSelection::Today
    } else {
        ReportSelection::Captures(ids)
    };

    match pipeline.reports.generate(selection).await? {
        Some(report_id) => {
            let db = pipeline.db.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(report) = db.get_report(report_id)? {
                println!("Report #{report_id}\n\n{}", report.content);
            }
        }
        None => println!("Nothing to report on yet today."),
    }
    Ok(())
}

fn run_list_reports(config: AppConfig, limit: i64) -> anyhow::Result<()> {
    let db = open_db(&config)?;
    let db = db.lock().unwrap_or_else(|e| e.into_inner());
    let reports = db.get_reports(limit)?;

    if reports.is_empty() {
        println!("No reports yet.");
        return Ok(());
    }
    for report in reports {
        let when = chrono::DateTime::from_timestamp(report.timestamp, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| report.timestamp.to_string());
        let model = report.model.as_deref().unwrap_or("unknown");
        println!("#{} [{}] via {}", report.report_id, when, model);
    }
    Ok(())
}

fn run_providers(config: AppConfig) -> anyhow::Result<()> {
    let settings = ProviderSettings::from_config(&config)?;
    let registry = ProviderRegistry::with_builtins(&settings);

    println!("Available connectors:");
    for name in registry.names() {
        println!("  {name}");
    }
    println!(
        "\nDescription: {} ({})",
        config.description.connector, config.description.model
    );
    println!(
        "Report:      {} ({})",
        config.report.connector, config.report.model
    );
    Ok(())
}

fn run_set(
    mut config: AppConfig,
    config_path: Option<&std::path::Path>,
    key: &str,
    value: &str,
) -> anyhow::Result<()> {
    config.apply_setting(key, value)?;

    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => AppConfig::default_base_dir()?.join("config.toml"),
    };
    config.save_to(&path)?;
    println!("Set {key} = {value}");
    Ok(())
}
