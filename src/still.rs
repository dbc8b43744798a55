// Photo upload flow: validate, decode, one inference, publish

use crate::error::{PipelineError, Result};
use crate::models::{EmotionLabel, Frame, OverlayRect};
use crate::pipeline::ModelHub;
use crate::preprocess::{CropPolicy, Preprocessor};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

/// File extensions accepted for upload (case-insensitive)
pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["jpeg", "png", "jpg"];

pub const CANCELED_WARNING: &str = "File upload canceled";
pub const INVALID_TYPE_WARNING: &str = "Invalid file type. Please choose an image file.";

/// Whether `path` has an accepted image extension
pub fn is_accepted_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ACCEPTED_EXTENSIONS
                .iter()
                .any(|accepted| ext.eq_ignore_ascii_case(accepted))
        })
        .unwrap_or(false)
}

/// What the photo view shows
#[derive(Clone, Debug, Default)]
pub struct StillDisplay {
    /// Selected file
    pub source: Option<PathBuf>,
    /// Decoded image
    pub image: Option<Arc<Frame>>,
    /// Prediction for the image, or the no-face sentinel
    pub prediction: Option<EmotionLabel>,
    /// Located face in image pixels
    pub face: Option<OverlayRect>,
    /// An inference is pending
    pub loading: bool,
}

/// Result of one selection
#[derive(Clone, Debug, PartialEq)]
pub enum StillOutcome {
    /// The dialog was closed without a file
    Canceled,
    /// The file was not an accepted or readable image
    Rejected(String),
    /// The image was classified
    Predicted(EmotionLabel),
    /// A newer selection or a clear happened before this one finished
    Superseded,
}

/// Handles photo selections, one inference per selected file
#[derive(Clone)]
pub struct StillSession {
    hub: Arc<ModelHub>,
    preprocessor: Preprocessor,
    display: Arc<watch::Sender<StillDisplay>>,
    warnings: broadcast::Sender<String>,
    generation: Arc<AtomicU64>,
}

impl StillSession {
    pub fn new(hub: Arc<ModelHub>, crop_policy: CropPolicy) -> Self {
        let (display, _) = watch::channel(StillDisplay::default());
        let (warnings, _) = broadcast::channel(16);
        Self {
            hub,
            preprocessor: Preprocessor::still(crop_policy),
            display: Arc::new(display),
            warnings,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StillDisplay> {
        self.display.subscribe()
    }

    /// User-visible warnings
    pub fn warnings(&self) -> broadcast::Receiver<String> {
        self.warnings.subscribe()
    }

    pub fn display(&self) -> StillDisplay {
        self.display.borrow().clone()
    }

    /// Drops the displayed image and prediction
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.display.send_replace(StillDisplay::default());
    }

    /// Handles one file selection; `None` means the dialog was canceled
    pub async fn select(&self, selection: Option<&Path>) -> Result<StillOutcome> {
        let Some(path) = selection else {
            self.warn(CANCELED_WARNING.to_string());
            return Ok(StillOutcome::Canceled);
        };

        if !is_accepted_image(path) {
            self.clear();
            self.warn(INVALID_TYPE_WARNING.to_string());
            return Ok(StillOutcome::Rejected(INVALID_TYPE_WARNING.to_string()));
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let owned = path.to_path_buf();
        let decoded = tokio::task::spawn_blocking(move || image::open(owned))
            .await
            .map_err(|e| PipelineError::ImageLoad(format!("Decode task failed: {e}")))?;
        let image = match decoded {
            Ok(image) => Arc::new(Frame::from_dynamic_image(&image)),
            Err(e) => {
                let message = format!("Could not read image {}: {e}", path.display());
                self.clear();
                self.warn(message.clone());
                return Ok(StillOutcome::Rejected(message));
            }
        };

        info!(
            "Classifying {} ({}x{})",
            path.display(),
            image.width,
            image.height
        );

        self.publish(generation, |d| {
            *d = StillDisplay {
                source: Some(path.to_path_buf()),
                image: Some(image.clone()),
                loading: true,
                ..StillDisplay::default()
            };
        });

        let result = match self.hub.pipeline(self.preprocessor).await {
            Ok(pipeline) => {
                // Model sessions run synchronously; keep them off the async workers
                let frame = image.clone();
                let handle = Handle::current();
                tokio::task::spawn_blocking(move || handle.block_on(pipeline.infer(&frame)))
                    .await
                    .unwrap_or_else(|e| {
                        Err(PipelineError::Classification(format!("Inference task failed: {e}")))
                    })
            }
            Err(e) => Err(e),
        };

        let inference = match result {
            Ok(inference) => inference,
            Err(e) => {
                self.publish(generation, |d| d.loading = false);
                self.warn(format!("Prediction failed: {e}"));
                return Err(e);
            }
        };

        let published = self.publish(generation, |d| {
            d.loading = false;
            d.prediction = Some(inference.label);
            d.face = inference.face.map(|face| face.overlay());
        });

        if published {
            Ok(StillOutcome::Predicted(inference.label))
        } else {
            Ok(StillOutcome::Superseded)
        }
    }

    /// Applies `update` unless a newer selection or clear happened
    fn publish(&self, generation: u64, update: impl FnOnce(&mut StillDisplay)) -> bool {
        self.display.send_if_modified(|d| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            update(d);
            true
        })
    }

    fn warn(&self, message: String) {
        warn!("{}", message);
        let _ = self.warnings.send(message);
    }
}
