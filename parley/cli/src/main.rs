use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use parley_consultation::{
    classify, ConsultationTelemetry, ConversationRuntime, Fingerprint, HttpInferenceClient,
    ParleyConfig,
};
use parley_memory::{Coordinates, MemoryTelemetry, TieredMemoryStore};
use serde::Serialize;
use shared_event_bus::{EventPublisher, FileEventPublisher, HttpEventPublisher};
use shared_logging::{JsonLogger, LogLevel, LogSink};
use tokio::runtime::Runtime;

const SINK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "parley", version, about = "Location-aware multi-specialist consultation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs one conversational turn and prints the reply as JSON.
    Ask(AskArgs),
    /// Prints the cache fingerprint of a query.
    Fingerprint {
        query: String,
        #[command(flatten)]
        location: LocationArgs,
        #[arg(long, default_value_t = 2)]
        precision: u32,
    },
    /// Shows the domain and specialist routing chosen for a query.
    Classify { query: String },
    /// Validates a configuration file and prints the effective settings.
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct AskArgs {
    /// Question to ask.
    query: String,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "local")]
    user: String,
    #[command(flatten)]
    location: LocationArgs,
    /// JSON-lines log file; overrides `events.log_path`.
    #[arg(long)]
    log: Option<PathBuf>,
    /// Appends completed conversations to a file instead of the HTTP sink.
    #[arg(long)]
    event_log: Option<PathBuf>,
    #[arg(long)]
    verbose: bool,
}

#[derive(Args, Debug, Default)]
struct LocationArgs {
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    lng: Option<f64>,
}

impl LocationArgs {
    fn coordinates(&self) -> Result<Option<Coordinates>> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Ok(Some(
                Coordinates::new(lat, lng).context("invalid --lat/--lng")?,
            )),
            (None, None) => Ok(None),
            _ => bail!("--lat and --lng must be given together"),
        }
    }
}

#[derive(Debug, Serialize)]
struct FingerprintReport {
    fingerprint: Fingerprint,
    precision: u32,
    location: Option<Coordinates>,
}

#[derive(Debug, Serialize)]
struct ClassifyReport {
    domain: &'static str,
    mode: &'static str,
    routing: Vec<&'static str>,
    requires_location: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Ask(args) => handle_ask(args),
        Commands::Fingerprint {
            query,
            location,
            precision,
        } => {
            let location = location.coordinates()?;
            let report = FingerprintReport {
                fingerprint: Fingerprint::compute(&query, location.as_ref(), precision),
                precision,
                location,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Classify { query } => {
            println!("{}", serde_json::to_string_pretty(&classify_report(&query))?);
            Ok(())
        }
        Commands::CheckConfig { config } => {
            let config = load_config(config.as_deref())?;
            print!(
                "{}",
                toml::to_string_pretty(&config).context("failed to render configuration")?
            );
            Ok(())
        }
    }
}

fn handle_ask(args: AskArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let location = args.location.coordinates()?;
    let runtime = Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(async move {
        let client = HttpInferenceClient::from_config(&config.inference)
            .context("failed to build inference client")?;
        let mut conversation = ConversationRuntime::new(Arc::new(client), &config)?;

        let log_path = args
            .log
            .clone()
            .or_else(|| config.events.log_path.as_ref().map(PathBuf::from));
        if let Some(path) = log_path {
            let level = if args.verbose {
                LogLevel::Debug
            } else {
                LogLevel::Info
            };
            let (consultation, memory) = telemetry_for(&path, level)?;
            let store = TieredMemoryStore::new(config.memory.clone())?.with_telemetry(memory);
            conversation = conversation
                .with_memory(Arc::new(store))
                .with_telemetry(consultation);
        }
        if let Some(sink) = build_sink(&args, &config)? {
            conversation = conversation.with_sink(sink);
        }

        let reply = conversation.converse(&args.user, &args.query, location).await?;
        conversation.flush_events().await;
        println!("{}", serde_json::to_string_pretty(&reply)?);
        Ok(())
    })
}

/// Consultation and memory telemetry writing to one JSON-lines file.
fn telemetry_for(path: &Path, level: LogLevel) -> Result<(ConsultationTelemetry, MemoryTelemetry)> {
    let logger = JsonLogger::new(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?
        .with_min_level(level);
    let sink: Arc<dyn LogSink> = Arc::new(logger);
    let consultation = ConsultationTelemetry::builder("parley-cli")
        .log_sink(Arc::clone(&sink))
        .build()?;
    let memory = MemoryTelemetry::builder("parley-memory")
        .log_sink(sink)
        .build()?;
    Ok((consultation, memory))
}

fn build_sink(args: &AskArgs, config: &ParleyConfig) -> Result<Option<Arc<dyn EventPublisher>>> {
    if let Some(path) = &args.event_log {
        let publisher = FileEventPublisher::new(path)
            .with_context(|| format!("failed to open event log {}", path.display()))?;
        return Ok(Some(Arc::new(publisher)));
    }
    match &config.events.endpoint {
        Some(endpoint) => {
            let publisher = HttpEventPublisher::new(endpoint.as_str(), SINK_TIMEOUT)
                .with_context(|| format!("failed to build sink for {endpoint}"))?;
            Ok(Some(Arc::new(publisher)))
        }
        None => Ok(None),
    }
}

fn load_config(path: Option<&Path>) -> Result<ParleyConfig> {
    match path {
        Some(path) => ParleyConfig::load(path)
            .with_context(|| format!("failed to load configuration {}", path.display())),
        None => Ok(ParleyConfig::default()),
    }
}

fn classify_report(query: &str) -> ClassifyReport {
    let classification = classify(query);
    ClassifyReport {
        domain: classification.domain,
        mode: classification.mode.label(),
        routing: classification.routing.iter().map(|id| id.name()).collect(),
        requires_location: classification.requires_location,
    }
}
