//! mmdl-extract - Structured field extraction from Myanmar driving license photos
//!
//! Reads a license photo, extracts its fields through either a hosted
//! multimodal model or the local detector + recognizer pipeline, and
//! optionally scores the result against operator-entered ground truth.

mod config;
mod extract;
mod infer;
mod schema;
mod verify;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::{AppConfig, BackendKind};
use crate::extract::hosted::HostedModelBackend;
use crate::extract::local::LocalPipelineBackend;
use crate::extract::{ExtractBackend, ExtractionOutcome, Extractor, FieldMap};
use crate::infer::detector::FieldDetector;
use crate::infer::weights;
use crate::schema::FieldSchema;
use crate::verify::{score, GroundTruth, ScoreOutcome};

/// mmdl-extract - Myanmar driving license field extraction
#[derive(Parser, Debug)]
#[command(name = "mmdl-extract")]
#[command(about = "Extract structured fields from a Myanmar driving license photo")]
struct Args {
    /// Path to the license photo (JPEG or PNG)
    image: PathBuf,

    /// Extraction backend (overrides the configured default)
    #[arg(short, long, value_enum)]
    backend: Option<BackendKind>,

    /// TOML file with ground-truth values for exact-match scoring
    #[arg(short, long)]
    truth: Option<PathBuf>,

    /// Print the raw JSON document only
    #[arg(long)]
    json: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run the field detector alone and write an annotated copy here
    #[arg(long, value_name = "OUT_IMAGE")]
    inspect: Option<PathBuf>,
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = load_or_create_config(args.config.as_deref())?;

    let image = std::fs::read(&args.image)
        .with_context(|| format!("failed to read image {:?}", args.image))?;

    if let Some(out) = &args.inspect {
        return run_inspection(&config, &image, out);
    }

    let backend_kind = args.backend.unwrap_or(config.extraction.backend);
    let backend = build_backend(backend_kind, &config)?;
    let mut extractor =
        Extractor::new(backend, FieldSchema::license()).with_cache(config.extraction.cache);

    info!(backend = ?backend_kind, "extracting license fields");
    let outcome = extractor.extract(&image);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome.to_json())?);
    } else {
        render_outcome(extractor.schema(), &outcome)?;
    }

    if let (Some(path), ExtractionOutcome::Extracted(fields)) = (&args.truth, &outcome) {
        let truth = load_ground_truth(path)?;
        render_score(extractor.schema(), fields, &truth);
    }

    if outcome.is_failure() {
        std::process::exit(1);
    }
    Ok(())
}

/// Load configuration from file or create default
fn load_or_create_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        return config::load_config(path)
            .with_context(|| format!("failed to load config {:?}", path));
    }

    if let Ok(config_dir) = config::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            if let Ok(config) = config::load_config(&config_path) {
                info!("Loaded configuration from {:?}", config_path);
                return Ok(config);
            }
        }
    }
    info!("Using default configuration");
    Ok(AppConfig::default())
}

/// Build the selected backend; construction failures surface before any
/// extraction is attempted
fn build_backend(kind: BackendKind, config: &AppConfig) -> Result<Box<dyn ExtractBackend>> {
    match kind {
        BackendKind::Hosted => {
            let backend = HostedModelBackend::new(config.hosted.clone(), FieldSchema::license())
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            Ok(Box::new(backend))
        }
        BackendKind::Local => {
            weights::ensure_pipeline_weights(&config.local)?;
            let backend =
                LocalPipelineBackend::new(&config.local).map_err(|e| anyhow::anyhow!("{e}"))?;
            Ok(Box::new(backend))
        }
    }
}

/// Labeled field display in schema order, followed by the raw document
fn render_outcome(schema: &FieldSchema, outcome: &ExtractionOutcome) -> Result<()> {
    match outcome {
        ExtractionOutcome::Extracted(fields) => {
            println!("Extracted fields:");
            for field in schema.fields() {
                if let Some(value) = fields.get(field.name) {
                    println!("  {:<16} {}", field.name, value);
                }
            }
            println!();
            println!("Raw JSON:");
            println!("{}", serde_json::to_string_pretty(&outcome.to_json())?);
        }
        ExtractionOutcome::NoDetection => {
            println!("No license fields detected in the image.");
        }
        ExtractionOutcome::Failed { message } => {
            eprintln!("Error: {message}");
        }
    }
    Ok(())
}

fn load_ground_truth(path: &Path) -> Result<GroundTruth> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read ground truth {:?}", path))?;
    let truth: GroundTruth =
        toml::from_str(&content).with_context(|| format!("invalid ground truth {:?}", path))?;
    Ok(truth)
}

fn render_score(schema: &FieldSchema, fields: &FieldMap, truth: &GroundTruth) {
    println!();
    match score(schema, fields, truth) {
        ScoreOutcome::Report(report) => {
            println!("Field exact match rate: {}", report.summary());
        }
        ScoreOutcome::NoComparableFields => {
            println!("No ground-truth values provided; nothing to score.");
        }
    }
}

/// Detector-only debugging mode: log every detection and write a copy of
/// the image with the detected regions outlined
fn run_inspection(config: &AppConfig, image: &[u8], out: &Path) -> Result<()> {
    weights::ensure_weight(
        "field detector",
        &config.local.det_model,
        config.local.det_url.as_deref(),
    )?;

    let mut detector = FieldDetector::new(
        &config.local.det_model,
        config.local.input_size,
        config.local.confidence_threshold,
        config.local.iou_threshold,
        config.local.use_gpu,
    )?;

    let img = image::load_from_memory(image)
        .context("could not decode image")?
        .to_rgb8();
    let detections = detector.detect(&img)?;

    if detections.is_empty() {
        info!("no field regions detected");
    }

    let mut annotated = img.clone();
    for detection in &detections {
        info!(
            class = detection.class.label(),
            confidence = detection.confidence,
            "detected region {:?}",
            detection.bounds
        );
        let (x, y, w, h) = detection.bounds;
        imageproc::drawing::draw_hollow_rect_mut(
            &mut annotated,
            imageproc::rect::Rect::at(x as i32, y as i32).of_size(w.max(1), h.max(1)),
            image::Rgb([255, 0, 0]),
        );
    }

    annotated
        .save(out)
        .with_context(|| format!("failed to write annotated image {:?}", out))?;
    info!("annotated image written to {:?}", out);
    Ok(())
}
