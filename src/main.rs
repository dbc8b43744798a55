use facial_emotion::config::AppConfig;
use facial_emotion::error::{PipelineError, Result};
use facial_emotion::pipeline::{ModelHub, OnnxModelLoader};
use facial_emotion::sampler::{SamplerSettings, VideoPipeline};
use facial_emotion::source::{FrameSource, SourceFactory};
use facial_emotion::still::StillSession;
use facial_emotion::ui::EmotionApp;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the logging system (file only, no console output)
fn init_logging(config: &AppConfig) -> Result<()> {
    let log_file = std::fs::File::create(&config.log_file).map_err(PipelineError::Io)?;

    let file_layer = fmt::layer()
        .with_writer(Arc::new(log_file))
        .with_ansi(false);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .init();

    Ok(())
}

#[cfg(feature = "camera")]
fn camera_factory(config: &AppConfig) -> SourceFactory {
    let index = config.camera_index;
    Arc::new(move || -> Result<Box<dyn FrameSource>> {
        let camera = facial_emotion::camera::CameraSource::new(index)?;
        Ok(Box::new(camera) as Box<dyn FrameSource>)
    })
}

#[cfg(not(feature = "camera"))]
fn camera_factory(_config: &AppConfig) -> SourceFactory {
    Arc::new(|| -> Result<Box<dyn FrameSource>> {
        Err(PipelineError::CameraInit(
            "Camera support is not enabled in this build".to_string(),
        ))
    })
}

fn main() -> Result<()> {
    let config = AppConfig::from_env();
    init_logging(&config)?;
    info!("Starting with {:?}", config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(PipelineError::Io)?;

    let mut loader = OnnxModelLoader::new(
        &config.face_model_path,
        &config.emotion_model_path,
        config.face_score_threshold,
    );
    if let Some(cascade) = &config.haar_cascade_path {
        loader = loader.with_haar_cascade(cascade);
    }
    let hub = Arc::new(ModelHub::new(Arc::new(loader)));

    // Load both models up front so the first start does not wait on disk
    let preload = hub.clone();
    runtime.spawn(async move {
        if let Err(e) = preload.models().await {
            error!("Model preload failed: {}", e);
        }
    });

    let video = VideoPipeline::new(
        hub.clone(),
        camera_factory(&config),
        SamplerSettings::from_config(&config),
    );
    let still = StillSession::new(hub, config.crop_policy);
    let handle = runtime.handle().clone();

    let result = eframe::run_native(
        "Facial Emotion",
        eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default()
                .with_inner_size([960.0, 800.0])
                .with_title("Facial Emotion"),
            ..Default::default()
        },
        Box::new(move |_cc| Ok(Box::new(EmotionApp::new(handle, video, still)))),
    );

    if let Err(e) = result {
        error!("Application error: {}", e);
    }

    runtime.shutdown_background();
    Ok(())
}
