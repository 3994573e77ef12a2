mod input;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mace::{
    MaceEngine, MemoryObservationSource, MemoryResultStore, Overview, PredictionsResponse,
    RunReport, Settings,
};
use serde::Serialize;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "mace-cli")]
#[command(about = "Compute MACE consensus labels and annotator competence")]
#[command(version)]
struct Args {
    /// JSON settings file: { "mace": {...}, "annotation_schemes": [...] }
    #[arg(short, long)]
    config: PathBuf,

    /// JSON-lines file with one observation per line
    #[arg(short, long)]
    observations: PathBuf,

    /// Print predictions for this schema instead of the overview
    #[arg(short, long)]
    schema: Option<String>,

    /// Restrict predictions to one item
    #[arg(short, long, requires = "schema")]
    item: Option<String>,

    /// Override the restart seed
    #[arg(long)]
    seed: Option<u64>,

    /// Run even if the settings leave MACE disabled
    #[arg(long)]
    enable: bool,

    /// Log level (trace, debug, info, warn, error, off); RUST_LOG overrides
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Serialize)]
struct Output {
    report: RunReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    overview: Option<Overview>,
    #[serde(skip_serializing_if = "Option::is_none")]
    predictions: Option<PredictionsResponse>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // logs go to stderr, stdout carries the JSON result only
    mace::tracing::init(&args.log_level)?;

    let mut settings = Settings::load(&args.config)?;
    if let Some(seed) = args.seed {
        settings.mace.seed = seed;
    }
    if args.enable {
        settings.mace.enabled = true;
    }

    let observations = input::load_observations(&args.observations)?;
    info!(
        "Loaded {} observations from {}",
        observations.len(),
        args.observations.display()
    );

    let source = Arc::new(MemoryObservationSource::with_observations(observations));
    let store = Arc::new(MemoryResultStore::new());
    let engine = MaceEngine::new(settings.mace, &settings.annotation_schemes, source, store)?;

    let report = engine.trigger_manual().await?;
    info!("Processed schemas: {:?}", report.processed());

    let output = match args.schema {
        Some(schema) => Output {
            report,
            overview: None,
            predictions: Some(engine.predictions(&schema, args.item.as_deref())?),
        },
        None => Output {
            report,
            overview: Some(engine.overview()),
            predictions: None,
        },
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
