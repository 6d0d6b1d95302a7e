//! scrob-firsts - first scrobble of every artist
//!
//! Downloads a Last.fm user's full listening history, keeps the earliest
//! scrobble per artist and writes the result as CSV or JSON.

use anyhow::{bail, Context, Result};
use clap::Parser;
use scrob_common::config::{load_toml_config, resolve_api_key, resolve_config_path, TomlConfig};
use scrob_common::events::{EventBus, ProgressEvent};
use scrob_firsts::export::{self, ExportFormat};
use scrob_firsts::pipeline::resolve_lower_bound;
use scrob_firsts::{LastFmClient, LowerBound, Pipeline};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for scrob-firsts
#[derive(Parser, Debug)]
#[command(name = "scrob-firsts")]
#[command(about = "Find the first scrobble of every artist in a Last.fm history")]
#[command(version)]
struct Args {
    /// Last.fm username (prompted for when omitted)
    username: Option<String>,

    /// Last.fm API key (overrides SCROB_LASTFM_API_KEY and the config file)
    #[arg(long)]
    api_key: Option<String>,

    /// Config file (default: <config dir>/scrob/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only consider scrobbles at or after this Unix timestamp
    #[arg(long, conflicts_with = "all_time")]
    from: Option<i64>,

    /// Do not bound the history by the registration date
    #[arg(long)]
    all_time: bool,

    /// Folder for the export file
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Export format
    #[arg(short, long, value_enum, default_value_t = ExportFormat::Csv)]
    format: ExportFormat,

    /// Pages fetched concurrently per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Retries per page before the run is aborted
    #[arg(long)]
    max_retries: Option<u32>,
}

impl Args {
    fn lower_bound(&self) -> LowerBound {
        match (self.from, self.all_time) {
            (Some(ts), _) => LowerBound::Since(ts),
            (None, true) => LowerBound::None,
            (None, false) => LowerBound::Registration,
        }
    }
}

fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("scrob_firsts={level},scrob_common={level},warn"))
    });

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };
    let stderr_layer = file_layer
        .is_none()
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
    Ok(())
}

fn prompt_username() -> Result<String> {
    print!("Enter your Last.fm username: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Print progress lines until the run finishes
fn spawn_progress_printer(event_bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ProgressEvent::TotalPagesDiscovered { total_pages, .. }) => {
                    println!("Total pages to process: {}", total_pages);
                }
                Ok(ProgressEvent::BatchCompleted {
                    completed,
                    total_pages,
                    ..
                }) => {
                    println!("Processed {} / {} pages", completed, total_pages);
                }
                Ok(ProgressEvent::RunCompleted { .. }) | Ok(ProgressEvent::RunFailed { .. }) => {
                    break
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let config = match &config_path {
        Some(path) => load_toml_config(path)?,
        None => TomlConfig::default(),
    };
    init_tracing(&config)?;

    info!("Starting scrob-firsts {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!("Config file: {}", path.display());
    }

    let username = match args.username.clone() {
        Some(name) => name.trim().to_string(),
        None => prompt_username()?,
    };
    if username.is_empty() {
        bail!("No username given");
    }

    let mut settings = config.fetch.clone();
    if let Some(batch_size) = args.batch_size {
        settings.batch_size = batch_size;
    }
    if let Some(max_retries) = args.max_retries {
        settings.max_retries = max_retries;
    }

    let api_key = resolve_api_key(args.api_key.as_deref(), &config)?;
    let client = Arc::new(LastFmClient::new(api_key, &settings)?);

    let lower_bound = resolve_lower_bound(&client, &username, args.lower_bound())
        .await
        .context("Failed to determine the lower time bound")?;

    let event_bus = EventBus::new(1024);
    let printer = spawn_progress_printer(&event_bus);
    let pipeline = Pipeline::new(client, settings, event_bus)?;

    let outcome = match pipeline.run(&username, lower_bound).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Error fetching data: {}", e);
            let _ = printer.await;
            return Err(e).context(format!("Retrieval failed for {}", username));
        }
    };
    let _ = printer.await;

    let rows = export::build_local_rows(&outcome.aggregate);
    let output_dir = args
        .output_dir
        .or(config.output_dir)
        .unwrap_or_else(|| PathBuf::from("result"));
    let path = export::export_path(
        &output_dir,
        &username,
        chrono::Utc::now().timestamp(),
        args.format,
    );
    export::save(&rows, &path, args.format)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!(
        "{} artists found across {} pages. Data saved to {}",
        rows.len(),
        outcome.stats.pages_fetched,
        path.display()
    );
    Ok(())
}
