use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use face_match_core::recognition::domain::face_encoder::FaceEncoder;
use face_match_core::recognition::infrastructure::directory_reference_source::DirectoryReferenceSource;
use face_match_core::recognition::infrastructure::onnx_face_encoder::{
    OnnxFaceEncoder, DEFAULT_CONFIDENCE,
};
use face_match_core::recognition::infrastructure::reference_cache::ReferenceCache;
use face_match_core::session::session_engine::{SessionConfig, SessionEngine};
use face_match_core::session::session_logger::StdoutSessionLogger;
use face_match_core::session::session_state::SessionMode;
use face_match_core::shared::constants::{
    EMBEDDING_MODEL_NAME, EMBEDDING_MODEL_URL, IMAGE_EXTENSIONS, YOLO_MODEL_NAME, YOLO_MODEL_URL,
};
use face_match_core::shared::match_config::{DetectionModel, MatchConfig};
use face_match_core::shared::model_resolver;
use face_match_core::transport::domain::frame_source::FrameSource;
use face_match_core::transport::infrastructure::image_sequence_source::ImageSequenceSource;
use face_match_core::transport::infrastructure::json_lines_sink::JsonLinesSink;
use face_match_core::transport::infrastructure::length_prefixed_source::LengthPrefixedSource;
use face_match_core::transport::infrastructure::unreadable_clip_source::UnreadableClipSource;

/// Verify faces in a clip or frame stream against enrolled reference photos.
#[derive(Parser)]
#[command(name = "face-match")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON config file (config/arcface.json suits the bundled models);
    /// flags below override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory of reference photos (one identity per file).
    #[arg(long, global = true)]
    references: Option<PathBuf>,

    /// Maximum frames examined by a one-shot verification.
    #[arg(long, global = true)]
    frame_cap: Option<usize>,

    /// One-shot match tolerance (distance <= tolerance).
    #[arg(long, global = true)]
    tolerance: Option<f64>,

    /// Continuous match threshold (distance < threshold).
    #[arg(long, global = true)]
    threshold: Option<f64>,

    /// Continuous-mode downscale ratio (0.0-1.0, 1.0 disables).
    #[arg(long, global = true)]
    downscale: Option<f64>,

    /// Detection model: fast or accurate.
    #[arg(long, global = true)]
    model: Option<DetectionModel>,

    /// Per-frame processing time limit in milliseconds.
    #[arg(long, global = true)]
    frame_timeout_ms: Option<u64>,

    /// Face detection confidence threshold (0.0-1.0).
    #[arg(long, global = true, default_value_t = DEFAULT_CONFIDENCE)]
    confidence: f64,
}

#[derive(Subcommand)]
enum Command {
    /// One-shot: report whether any face in a clip matches a reference.
    ///
    /// INPUT is a directory of frame images, a single image, a video file
    /// (ffmpeg builds), or `-` to read the clip from stdin.
    Verify { input: PathBuf },
    /// Continuous: read length-prefixed frames from stdin, write one JSON
    /// result per frame to stdout.
    Stream,
    /// List the identities loaded from the reference directory.
    References,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;
    validate(&cli)?;

    let models = resolve_models()?;
    let references = Arc::new(ReferenceCache::new(Box::new(DirectoryReferenceSource::new(
        config.reference_dir.clone(),
        build_encoder(&models, &config, cli.confidence)?,
    ))));

    match &cli.command {
        Command::References => list_references(&references),
        Command::Verify { input } => {
            let encoder = build_encoder(&models, &config, cli.confidence)?;
            run_verify(input, &config, encoder, references)
        }
        Command::Stream => {
            let encoder = build_encoder(&models, &config, cli.confidence)?;
            let mut source = LengthPrefixedSource::new(io::stdin());
            run_session(SessionMode::Continuous, &config, encoder, references, &mut source)
        }
    }
}

fn list_references(references: &ReferenceCache) -> Result<(), Box<dyn std::error::Error>> {
    let set = references.get_or_load()?;
    if set.is_empty() {
        log::warn!("No reference photos found");
    }
    for name in set.names() {
        println!("{name}");
    }
    Ok(())
}

fn run_verify(
    input: &Path,
    config: &MatchConfig,
    encoder: Box<dyn FaceEncoder>,
    references: Arc<ReferenceCache>,
) -> Result<(), Box<dyn std::error::Error>> {
    if input == Path::new("-") {
        return run_verify_stdin(config, encoder, references);
    }

    let mut source = open_clip(input);
    run_session(SessionMode::OneShot, config, encoder, references, &mut *source)
}

/// Opens a clip for one-shot verification. A clip that cannot be opened
/// becomes a source that fails on first read, so the session reports it
/// as an error payload.
fn open_clip(input: &Path) -> Box<dyn FrameSource> {
    let opened: Result<Box<dyn FrameSource>, Box<dyn std::error::Error>> = if input.is_dir() {
        ImageSequenceSource::open(input)
            .map(|source| Box::new(source) as Box<dyn FrameSource>)
            .map_err(Into::into)
    } else if is_image(input) {
        Ok(Box::new(ImageSequenceSource::from_paths(vec![input.to_path_buf()])))
    } else {
        open_video(input)
    };
    opened.unwrap_or_else(|e| {
        log::error!("Cannot open clip {}: {e}", input.display());
        Box::new(UnreadableClipSource::new(e.to_string()))
    })
}

/// Spools the uploaded clip to a temp file that is removed when this
/// function returns, whatever the outcome.
#[cfg(feature = "ffmpeg")]
fn run_verify_stdin(
    config: &MatchConfig,
    encoder: Box<dyn FaceEncoder>,
    references: Arc<ReferenceCache>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut spool = tempfile::NamedTempFile::new()?;
    let bytes = io::copy(&mut io::stdin().lock(), spool.as_file_mut())?;
    log::info!("Spooled {bytes} bytes to {}", spool.path().display());
    let mut source = open_clip(spool.path());
    run_session(SessionMode::OneShot, config, encoder, references, &mut *source)
}

/// Without a video decoder the clip is read as length-prefixed frames,
/// spooled to a temp file first.
#[cfg(not(feature = "ffmpeg"))]
fn run_verify_stdin(
    config: &MatchConfig,
    encoder: Box<dyn FaceEncoder>,
    references: Arc<ReferenceCache>,
) -> Result<(), Box<dyn std::error::Error>> {
    use std::io::Seek;

    let mut spool = tempfile::tempfile()?;
    let bytes = io::copy(&mut io::stdin().lock(), &mut spool)?;
    log::info!("Spooled {bytes} bytes");
    spool.rewind()?;
    let mut source = LengthPrefixedSource::new(io::BufReader::new(spool));
    run_session(SessionMode::OneShot, config, encoder, references, &mut source)
}

fn run_session(
    mode: SessionMode,
    config: &MatchConfig,
    encoder: Box<dyn FaceEncoder>,
    references: Arc<ReferenceCache>,
    source: &mut dyn FrameSource,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut sink = JsonLinesSink::new(io::stdout());
    let mut engine = SessionEngine::new(SessionConfig::new(mode, config), encoder, references)
        .with_logger(Box::new(StdoutSessionLogger::new()));
    let state = engine.run(source, &mut sink)?;
    log::info!(
        "Processed {} of {} frames",
        state.frames_scored,
        state.frames_received
    );
    Ok(())
}

#[cfg(feature = "ffmpeg")]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>, Box<dyn std::error::Error>> {
    use face_match_core::transport::infrastructure::ffmpeg_clip_source::FfmpegClipSource;
    Ok(Box::new(FfmpegClipSource::open(path)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>, Box<dyn std::error::Error>> {
    Err(format!(
        "Cannot decode {}: video input requires the ffmpeg feature",
        path.display()
    )
    .into())
}

struct ModelPaths {
    detector: PathBuf,
    embedder: PathBuf,
}

fn resolve_models() -> Result<ModelPaths, Box<dyn std::error::Error>> {
    log::info!("Resolving model: {YOLO_MODEL_NAME}");
    let detector = model_resolver::resolve(
        YOLO_MODEL_NAME,
        YOLO_MODEL_URL,
        None,
        Some(Box::new(|done, total| download_progress("face detection", done, total))),
    )?;
    log::info!("Resolving model: {EMBEDDING_MODEL_NAME}");
    let embedder = model_resolver::resolve(
        EMBEDDING_MODEL_NAME,
        EMBEDDING_MODEL_URL,
        None,
        Some(Box::new(|done, total| download_progress("face embedding", done, total))),
    )?;
    Ok(ModelPaths { detector, embedder })
}

fn build_encoder(
    models: &ModelPaths,
    config: &MatchConfig,
    confidence: f64,
) -> Result<Box<dyn FaceEncoder>, Box<dyn std::error::Error>> {
    Ok(Box::new(OnnxFaceEncoder::new(
        &models.detector,
        &models.embedder,
        config.detection_model,
        confidence,
    )?))
}

fn build_config(cli: &Cli) -> Result<MatchConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => MatchConfig::load(path)?,
        None => MatchConfig::default(),
    };
    if let Some(dir) = &cli.references {
        config.reference_dir = dir.clone();
    }
    if let Some(cap) = cli.frame_cap {
        config.frame_cap = cap;
    }
    if let Some(tolerance) = cli.tolerance {
        config.one_shot_tolerance = tolerance;
    }
    if let Some(threshold) = cli.threshold {
        config.continuous_threshold = threshold;
    }
    if let Some(ratio) = cli.downscale {
        config.downscale_ratio = if ratio == 1.0 { None } else { Some(ratio) };
    }
    if let Some(model) = cli.model {
        config.detection_model = model;
    }
    if let Some(ms) = cli.frame_timeout_ms {
        config.frame_timeout_ms = Some(ms);
    }
    config.validate()?;
    Ok(config)
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Command::Verify { input } = &cli.command {
        if input != Path::new("-") && !input.exists() {
            return Err(format!("Input not found: {}", input.display()).into());
        }
    }
    if !(0.0..=1.0).contains(&cli.confidence) {
        return Err(format!(
            "Confidence must be between 0.0 and 1.0, got {}",
            cli.confidence
        )
        .into());
    }
    if cli.frame_timeout_ms == Some(0) {
        return Err("Frame timeout must be at least 1 ms".into());
    }
    Ok(())
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn download_progress(label: &str, downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading {label} model... {pct}%");
    } else {
        eprint!("\rDownloading {label} model... {downloaded} bytes");
    }
}
