//! docuscan - document capture and rectification pipeline
//!
//! Continuously scans camera-style frames for document quadrilaterals,
//! publishes throttled display-space detections, and on capture rectifies
//! the best quad and extracts text or MRZ fields from it.

mod capture;
mod config;
mod engine;
mod extract;
mod geometry;
mod rectify;
mod vision;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::capture::{FolderSource, FrameSource, TestPatternSource};
use crate::config::AppConfig;
use crate::engine::{CaptureOutcome, PipelineEvent, ScanEngine};
use crate::extract::{
    mrz, ExtractionResult, Extractor, MrzExtractor, MrzRecord, NullRecognizer, TextExtractor,
};
use crate::vision::{Detector, EdgeQuadDetector};

/// docuscan - document capture and rectification pipeline
#[derive(Parser, Debug)]
#[command(name = "docuscan")]
#[command(about = "Scan frames for documents, rectify the best quad, extract fields")]
struct Args {
    /// Folder of images to scan (defaults to a synthetic test pattern)
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Detection updates to observe before triggering the capture
    #[arg(long, default_value = "3")]
    capture_after: u32,

    /// Print extraction results as JSON
    #[arg(long)]
    json: bool,

    /// Parse a machine-readable zone from a text file and exit
    #[arg(long)]
    mrz_file: Option<PathBuf>,

    /// Configuration file (defaults to the platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    if let Some(path) = &args.mrz_file {
        return run_mrz_file(path, args.json);
    }

    info!("docuscan starting...");

    let config = load_or_create_config(args.config.as_deref());

    // One-time notice; the built-in detectors and parsers need no license.
    if config.sdk.load_license().is_none() {
        info!("No vendor SDK license configured; built-in detection only");
    }

    run_session(&args, &config)?;

    info!("docuscan shutdown complete");
    Ok(())
}

/// Load configuration from file or create default.
fn load_or_create_config(explicit: Option<&Path>) -> AppConfig {
    if let Some(path) = explicit {
        match config::load_config(path) {
            Ok(config) => {
                info!("Loaded configuration from {:?}", path);
                return config;
            }
            Err(e) => {
                tracing::warn!("Could not load {:?}: {e}; using defaults", path);
                return AppConfig::default();
            }
        }
    }
    if let Ok(config_dir) = config::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            if let Ok(config) = config::load_config(&config_path) {
                info!("Loaded configuration from {:?}", config_path);
                return config;
            }
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}

/// Run one scan session: observe detections, trigger a single capture,
/// print its extraction result.
fn run_session(args: &Args, config: &AppConfig) -> Result<()> {
    let orientation = config.capture.orientation();

    let source_dir = args.source.as_ref().or(config.capture.source_dir.as_ref());
    let source: Box<dyn FrameSource> = match source_dir {
        Some(dir) => Box::new(FolderSource::new(dir, orientation)?),
        None => Box::new(TestPatternSource::new(1280, 720, 120, orientation)),
    };

    let detectors: Vec<Box<dyn Detector>> = vec![Box::new(EdgeQuadDetector::default())];
    let extractor: Box<dyn Extractor> = if config.extraction.parse_mrz {
        Box::new(MrzExtractor::new(Box::new(NullRecognizer)))
    } else {
        Box::new(TextExtractor::new(Box::new(NullRecognizer)))
    };

    let engine = ScanEngine::start(config.engine_config(), source, detectors, extractor);

    let mut updates = 0u32;
    let mut capture_id = None;
    loop {
        match engine.events().recv() {
            Ok(PipelineEvent::Detections {
                detections,
                frames_seen,
            }) => {
                if let Some(best) = detections.first() {
                    let center = best.quad.centroid();
                    debug!(
                        "Frame {frames_seen}: {:?} at display ({:.0}, {:.0}), confidence {:.2}",
                        best.kind, center.x, center.y, best.confidence
                    );
                } else {
                    debug!("Frame {frames_seen}: no detections");
                }
                updates += 1;
                if capture_id.is_none() && updates >= args.capture_after {
                    let id = engine.trigger_capture();
                    info!("Capture triggered ({id})");
                    capture_id = Some(id);
                }
            }
            Ok(PipelineEvent::SourceEnded) => {
                // Late trigger if the source ran dry before enough updates.
                if capture_id.is_none() {
                    capture_id = Some(engine.trigger_capture());
                }
            }
            Ok(PipelineEvent::CaptureFinished { id, outcome }) if Some(id) == capture_id => {
                print_outcome(outcome, args.json)?;
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }

    let status = engine.status();
    info!(
        "Session: {} frames, {} published batches, {} captures",
        status.frames_seen, status.batches_published, status.captures_completed
    );
    engine.shutdown();
    Ok(())
}

fn print_outcome(outcome: CaptureOutcome, json: bool) -> Result<()> {
    match outcome {
        CaptureOutcome::Completed {
            result,
            width,
            height,
        } => {
            info!("Capture complete: rectified image {width}x{height}");
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }
            match result {
                ExtractionResult::Text { lines } if lines.is_empty() => {
                    println!("No text extracted (no OCR engine configured)");
                }
                ExtractionResult::Text { lines } => {
                    for line in lines {
                        println!("{line}");
                    }
                }
                ExtractionResult::Document { record } => print_record(&record),
            }
        }
        CaptureOutcome::NoImage => println!("No image: the frame source delivered nothing"),
        CaptureOutcome::Rejected => println!("Capture rejected: another capture was outstanding"),
    }
    Ok(())
}

fn print_record(record: &MrzRecord) {
    println!("Document Type:   {}", record.document_type);
    println!("Document Number: {}", record.document_number);
    println!("Name:            {}", record.name);
    println!("Issuing State:   {}", record.issuing_state);
    println!("Nationality:     {}", record.nationality);
    println!("Date of Birth:   {}", record.birth_date);
    println!("Sex:             {}", record.sex);
    println!("Date of Expiry:  {}", record.expiry_date);
}

/// Parse an MRZ block from a plain text file, one line per MRZ line.
fn run_mrz_file(path: &Path, json: bool) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read MRZ file {:?}", path))?;
    let lines: Vec<String> = text.lines().map(str::to_string).collect();

    match mrz::find_and_parse(&lines) {
        Some(record) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print_record(&record);
            }
            Ok(())
        }
        None => {
            println!("No parsable MRZ found in {:?}", path);
            Ok(())
        }
    }
}
