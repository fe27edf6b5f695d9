use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facepipe_core::detection::DEFAULT_FACE_SIZE;
use facepipe_core::recognizer::DEFAULT_EMBEDDING_DIM;
use facepipe_core::{
    codec, DetectionStage, Gallery, MatchResult, OnnxExtractor, RecognitionStage, ScrfdDetector,
};
use facepipe_pipeline::{request_response, Orchestrator, PipelineConfig, SpoolPublisher, SpoolQueue, Stage, StageRunner};
use serde_json::{json, Value};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "facepipe", about = "Face detection and identification pipeline tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ModelArgs {
    /// Face detection model
    #[arg(long, default_value = "models/det_10g.onnx")]
    detector_model: PathBuf,
    /// Embedding extraction model
    #[arg(long, default_value = "models/inception_resnet_v1_vggface2.onnx")]
    extractor_model: PathBuf,
    /// Embedding dimension produced by the extractor
    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIM)]
    embedding_dim: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect, crop and normalize the most confident face in an image
    Detect {
        image: PathBuf,
        /// Directory for the normalized face
        #[arg(long, default_value = ".")]
        out: PathBuf,
        #[arg(long, default_value_t = DEFAULT_FACE_SIZE)]
        face_size: u32,
        #[command(flatten)]
        models: ModelArgs,
    },
    /// Identify a normalized face against a gallery
    Recognize {
        face: PathBuf,
        #[arg(long)]
        gallery: PathBuf,
        /// Report matches further than this as unknown
        #[arg(long)]
        threshold: Option<f32>,
        #[command(flatten)]
        models: ModelArgs,
    },
    /// Summarize a gallery snapshot
    Gallery {
        file: PathBuf,
        #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIM)]
        embedding_dim: usize,
    },
    /// Run one request/response invocation: event JSON on stdin, response on stdout
    Invoke {
        #[arg(long)]
        stage: Stage,
        /// Spool root holding the outbound queues
        #[arg(long)]
        spool: PathBuf,
        #[arg(long, default_value = "req-queue-2")]
        next_queue: String,
        #[arg(long, default_value = "resp-queue")]
        response_queue: String,
        /// Gallery snapshot (recognition stage)
        #[arg(long)]
        gallery: Option<PathBuf>,
        #[command(flatten)]
        models: ModelArgs,
    },
    /// Enqueue a detection request for an image file
    Publish {
        #[arg(long)]
        spool: PathBuf,
        #[arg(long, default_value = "req-queue-1")]
        queue: String,
        #[arg(long)]
        image: PathBuf,
        #[arg(long)]
        request_id: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Detect {
            image,
            out,
            face_size,
            models,
        } => {
            let stage = detection_stage(&models)?.with_face_size(face_size);
            let decoded = image::open(&image).with_context(|| format!("cannot read {}", image.display()))?;
            std::fs::create_dir_all(&out).with_context(|| format!("cannot create {}", out.display()))?;

            match stage.detect_and_store(&decoded, &file_name(&image), &out)? {
                Some(path) => println!("{}", path.display()),
                None => println!("No face detected"),
            }
        }
        Commands::Recognize {
            face,
            gallery,
            threshold,
            models,
        } => {
            let stage = recognition_stage(&models, &gallery)?.with_distance_threshold(threshold);
            let decoded = image::open(&face).with_context(|| format!("cannot read {}", face.display()))?;

            let report = match stage.recognize(&decoded.to_rgb8())? {
                MatchResult::Identity { label, distance } => json!({"result": label, "distance": distance}),
                MatchResult::Unrecognized { distance } => json!({"result": "Unknown", "distance": distance}),
                MatchResult::NoFace => json!({"result": "No-Face"}),
            };
            println!("{report}");
        }
        Commands::Gallery {
            file,
            embedding_dim,
        } => {
            let gallery = Gallery::load(&file, embedding_dim)
                .with_context(|| format!("cannot load gallery {}", file.display()))?;
            println!("{}: {} identities, {}-dim", file.display(), gallery.len(), gallery.dimension());
            for (i, entry) in gallery.entries().iter().enumerate() {
                println!("  {i:>4}  {}", entry.label);
            }
        }
        Commands::Invoke {
            stage,
            spool,
            next_queue,
            response_queue,
            gallery,
            models,
        } => {
            let runner = match stage {
                Stage::Detect => StageRunner::Detect(detection_stage(&models)?),
                Stage::Recognize => {
                    let gallery = gallery.context("--gallery is required for the recognition stage")?;
                    StageRunner::Recognize(recognition_stage(&models, &gallery)?)
                }
            };
            let publisher = SpoolPublisher::open(&spool, &next_queue, &response_queue)
                .context("cannot open outbound queues")?;
            let orchestrator = Orchestrator::new(runner, Arc::new(publisher), PipelineConfig::default());

            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("cannot read event from stdin")?;
            let event: Value = serde_json::from_str(&raw).context("event is not valid JSON")?;

            let response = request_response::invoke(&orchestrator, &event);
            println!("{}", serde_json::to_string(&response)?);
            if response.status_code != 200 {
                std::process::exit(1);
            }
        }
        Commands::Publish {
            spool,
            queue,
            image,
            request_id,
        } => {
            let bytes = std::fs::read(&image).with_context(|| format!("cannot read {}", image.display()))?;
            let message = json!({
                "encoded": codec::encode_payload(&bytes),
                "request_id": request_id,
                "filename": file_name(&image),
            });
            let queue = SpoolQueue::open(&spool, &queue).context("cannot open queue")?;
            let id = queue.enqueue(message.to_string().as_bytes())?;
            println!("{id}");
        }
    }

    Ok(())
}

fn detection_stage(models: &ModelArgs) -> Result<DetectionStage> {
    let path = models.detector_model.to_string_lossy();
    let detector =
        ScrfdDetector::load(&path).with_context(|| format!("cannot load detector model {path}"))?;
    Ok(DetectionStage::new(Arc::new(detector)))
}

fn recognition_stage(models: &ModelArgs, gallery: &Path) -> Result<RecognitionStage> {
    let gallery = Gallery::load(gallery, models.embedding_dim)
        .with_context(|| format!("cannot load gallery {}", gallery.display()))?;
    let path = models.extractor_model.to_string_lossy();
    let extractor = OnnxExtractor::load(&path, models.embedding_dim)
        .with_context(|| format!("cannot load extractor model {path}"))?;
    Ok(RecognitionStage::new(Arc::new(extractor), Arc::new(gallery)))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}
