// lumen command line interface
// Classify photos or a live camera feed with an on-device model

mod listener;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use lumen_core::{load_config, render_config, ConfigFormat};
use lumen_eye::config::{ClassifierOptions, Delegate, RunningMode, VisionConfig};
use lumen_eye::display::{format_categories, format_latency};
use lumen_eye::engine::EngineLoader;
use lumen_eye::frame::open_photo;
use lumen_eye::models::{ModelSource, ModelStore};
use lumen_eye::results::ClassificationResult;
use lumen_eye::session::ClassifierSession;
use lumen_eye::sink::{spawn_listener, ResultSink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lumen")]
#[command(about = "On-device image classification", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (toml, yaml or json)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[arg(long, short, global = true)]
    verbose: bool,
}

/// Classifier flags shared by every subcommand that builds a session
#[derive(clap::Args, Debug, Default)]
struct ClassifierArgs {
    /// Model file name inside the model directory
    #[arg(long, short)]
    model: Option<String>,

    /// Directory holding models and label files
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Minimum score for a label to be shown (0.0 - 1.0)
    #[arg(long, short)]
    threshold: Option<f32>,

    /// Maximum number of labels per image
    #[arg(long)]
    max_results: Option<usize>,

    /// Compute delegate (cpu, gpu, accelerator)
    #[arg(long, short)]
    delegate: Option<Delegate>,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify one or more image files
    Classify {
        /// Image files (jpeg, png, ...)
        #[arg(required = true)]
        images: Vec<PathBuf>,

        #[command(flatten)]
        classifier: ClassifierArgs,

        /// Print results as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Classify frames from a camera until interrupted
    Stream {
        #[command(flatten)]
        classifier: ClassifierArgs,

        /// Camera device index
        #[arg(long)]
        camera_id: Option<u32>,

        /// Stop after this many frames (0 runs until Ctrl-C)
        #[arg(long, default_value = "0")]
        frames: u64,
    },

    /// Download a model into the model directory
    FetchModel {
        /// HTTPS URL of the model file
        #[arg(long)]
        url: String,

        /// File name to store the model under
        #[arg(long)]
        name: String,

        /// Expected SHA-256 of the download, hex encoded
        #[arg(long)]
        sha256: Option<String>,

        #[arg(long)]
        model_dir: Option<PathBuf>,
    },

    /// Print the effective configuration
    ShowConfig {
        #[arg(long, value_enum, default_value = "toml")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Toml,
    Yaml,
    Json,
}

impl From<OutputFormat> for ConfigFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Toml => ConfigFormat::Toml,
            OutputFormat::Yaml => ConfigFormat::Yaml,
            OutputFormat::Json => ConfigFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .init();

    let mut config = read_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Classify {
            images,
            classifier,
            json,
        } => {
            apply_overrides(&mut config, &classifier);
            config.classifier.running_mode = RunningMode::Image;
            classify_images(config, images, json).await?;
        }
        Commands::Stream {
            classifier,
            camera_id,
            frames,
        } => {
            apply_overrides(&mut config, &classifier);
            if let Some(id) = camera_id {
                config.camera.camera_id = id;
            }
            config.classifier.running_mode = RunningMode::LiveStream;
            stream_camera(config, frames).await?;
        }
        Commands::FetchModel {
            url,
            name,
            sha256,
            model_dir,
        } => {
            let store = ModelStore::new(model_dir.unwrap_or(config.model_path));
            let mut source = ModelSource::new(url);
            if let Some(digest) = sha256 {
                source = source.with_sha256(digest);
            }
            let path = store.ensure_model(&name, &source).await?;
            println!("{}", path.display());
        }
        Commands::ShowConfig { format } => {
            print!("{}", render_config(&config, format.into())?);
        }
    }

    Ok(())
}

fn read_config(path: Option<&Path>) -> anyhow::Result<VisionConfig> {
    let config = match path {
        Some(path) => load_config::<VisionConfig>(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => VisionConfig::default(),
    };
    debug!("Using model directory {:?}", config.model_path);
    Ok(config)
}

/// Command line flags win over the config file
fn apply_overrides(config: &mut VisionConfig, args: &ClassifierArgs) {
    let options: &mut ClassifierOptions = &mut config.classifier;
    if let Some(model) = &args.model {
        options.model = model.clone();
    }
    if let Some(threshold) = args.threshold {
        options.score_threshold = threshold;
    }
    if let Some(max_results) = args.max_results {
        options.max_results = max_results;
    }
    if let Some(delegate) = args.delegate {
        options.delegate = delegate;
    }
    if let Some(dir) = &args.model_dir {
        config.model_path = dir.clone();
    }
}

#[cfg(feature = "onnx")]
fn engine_loader(config: &VisionConfig) -> anyhow::Result<Arc<dyn EngineLoader>> {
    use lumen_eye::engine::OnnxLoader;

    let store = ModelStore::new(&config.model_path);
    Ok(Arc::new(OnnxLoader::new(store, config.engine.clone())))
}

#[cfg(not(feature = "onnx"))]
fn engine_loader(_config: &VisionConfig) -> anyhow::Result<Arc<dyn EngineLoader>> {
    anyhow::bail!("lumen was built without an inference engine; rebuild with --features onnx")
}

async fn classify_images(
    config: VisionConfig,
    images: Vec<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let loader = engine_loader(&config)?;
    let (sink, events) = ResultSink::channel();
    let errors = spawn_listener(events, Arc::new(listener::LogListener));
    let session = Arc::new(ClassifierSession::new(config.classifier, loader, sink));

    let total = images.len();
    let mut failed = 0usize;
    for path in images {
        let result = match classify_path(session.clone(), path.clone()).await {
            Ok(result) => result,
            Err(e) => {
                error!("{}: {:#}", path.display(), e);
                failed += 1;
                continue;
            }
        };

        if json {
            println!(
                "{}",
                serde_json::json!({ "image": path.display().to_string(), "result": result })
            );
        } else {
            println!("{} ({})", path.display(), format_latency(result.inference_time));
            println!("{}", format_categories(&result.categories));
        }
    }

    info!("Classified with {} engine setup(s)", session.stats().engine_setups);
    drop(session);
    errors.await?;

    if failed > 0 {
        anyhow::bail!("{} of {} image(s) could not be classified", failed, total);
    }
    Ok(())
}

/// Decode and classify one file on the blocking pool
async fn classify_path(
    session: Arc<ClassifierSession>,
    path: PathBuf,
) -> anyhow::Result<ClassificationResult> {
    let result = tokio::task::spawn_blocking(move || {
        let image = open_photo(&path)?;
        session.classify(&image)
    })
    .await??;
    Ok(result)
}

#[cfg(feature = "camera")]
async fn stream_camera(config: VisionConfig, frame_limit: u64) -> anyhow::Result<()> {
    use lumen_eye::camera::CameraSource;
    use tracing::warn;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let loader = engine_loader(&config)?;
    let (sink, events) = ResultSink::channel();
    let printer = spawn_listener(events, Arc::new(listener::PrintListener));
    let session = ClassifierSession::new(config.classifier, loader, sink);
    session.configure()?;

    let camera = CameraSource::new(config.camera);
    let mut frames = camera.start_stream()?;
    let mut submitted = 0u64;

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = session.classify_async(&frame) {
                    warn!("Skipping frame {}: {}", frame.timestamp_ms, e);
                    continue;
                }
                submitted += 1;
                if frame_limit > 0 && submitted >= frame_limit {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    camera.stop();
    let stats = session.stats();
    session.shutdown();
    drop(session);
    printer.await?;

    info!(
        "Stream finished: {} submitted, {} delivered, {} superseded, {} discarded",
        stats.frames_submitted,
        stats.results_delivered,
        stats.frames_superseded,
        stats.frames_discarded
    );
    Ok(())
}

#[cfg(not(feature = "camera"))]
async fn stream_camera(_config: VisionConfig, _frame_limit: u64) -> anyhow::Result<()> {
    anyhow::bail!("lumen was built without camera support; rebuild with --features camera")
}
