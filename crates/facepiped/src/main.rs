use anyhow::{Context, Result};
use facepipe_core::{DetectionStage, Gallery, OnnxExtractor, RecognitionStage, ScrfdDetector};
use facepipe_pipeline::{
    run_subscriber, Orchestrator, PipelineConfig, SpoolPublisher, SpoolQueue, Stage, StageRunner,
    SubscriberConfig,
};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    tracing::info!(stage = %config.stage, spool = %config.spool_dir.display(), "facepiped starting");

    let runner = build_runner(&config)?;

    let inbound = SpoolQueue::open(&config.spool_dir, &config.inbound_queue)
        .with_context(|| format!("cannot open inbound queue {}", config.inbound_queue))?;
    let publisher = SpoolPublisher::open(&config.spool_dir, &config.next_queue, &config.response_queue)
        .context("cannot open outbound queues")?;

    let orchestrator = Arc::new(Orchestrator::new(
        runner,
        Arc::new(publisher),
        PipelineConfig {
            work_root: config.work_dir.clone(),
        },
    ));

    let mut sigterm = signal(SignalKind::terminate()).context("failed to register SIGTERM")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to register SIGINT")?;
    let shutdown = async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            _ = sigint.recv() => tracing::info!("received SIGINT"),
        }
    };

    tracing::info!(
        inbound = %config.inbound_queue,
        next = %config.next_queue,
        response = %config.response_queue,
        "facepiped ready"
    );

    let stats = run_subscriber(
        Arc::new(inbound),
        orchestrator,
        SubscriberConfig {
            max_in_flight: config.max_in_flight,
            poll_interval: config.poll_interval,
        },
        shutdown,
    )
    .await
    .context("subscriber stopped with a transport error")?;

    tracing::info!(
        published = stats.published,
        dropped = stats.dropped,
        failed = stats.failed,
        "facepiped shut down"
    );
    Ok(())
}

/// Load the models (and gallery) the configured stage needs.
fn build_runner(config: &Config) -> Result<StageRunner> {
    match config.stage {
        Stage::Detect => {
            let path = config.detector_model_path();
            let detector = ScrfdDetector::load(&path)
                .with_context(|| format!("cannot load detector model {path}"))?;
            Ok(StageRunner::Detect(
                DetectionStage::new(Arc::new(detector))
                    .with_face_size(config.face_size)
                    .with_min_face_size(config.min_face_size),
            ))
        }
        Stage::Recognize => {
            let gallery_path = config
                .gallery_path
                .as_deref()
                .context("FACEPIPE_GALLERY_PATH is not set")?;
            let gallery = Gallery::load(gallery_path, config.embedding_dim)
                .with_context(|| format!("cannot load gallery {}", gallery_path.display()))?;
            tracing::info!(identities = gallery.len(), dimension = gallery.dimension(), "gallery loaded");

            let path = config.extractor_model_path();
            let extractor = OnnxExtractor::load(&path, config.embedding_dim)
                .with_context(|| format!("cannot load extractor model {path}"))?;
            Ok(StageRunner::Recognize(
                RecognitionStage::new(Arc::new(extractor), Arc::new(gallery))
                    .with_distance_threshold(config.distance_threshold),
            ))
        }
    }
}
