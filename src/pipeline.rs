// Model loading and the single-frame inference pipeline

use crate::emotion::{EmotionClassifier, EmotionModel, OnnxEmotionModel};
use crate::error::{PipelineError, Result};
use crate::locator::{FaceLocator, OnnxFaceLocator};
use crate::models::{BoundingBox, EmotionLabel, Frame};
use crate::preprocess::Preprocessor;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};
#[cfg(not(feature = "opencv"))]
use tracing::warn;

/// Loads the two models. Each load is independent of the other.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load_locator(&self) -> Result<Arc<dyn FaceLocator>>;
    async fn load_classifier(&self) -> Result<Arc<dyn EmotionModel>>;
}

/// Loads both models from ONNX files
pub struct OnnxModelLoader {
    face_model_path: PathBuf,
    emotion_model_path: PathBuf,
    face_score_threshold: f32,
    haar_cascade_path: Option<PathBuf>,
}

impl OnnxModelLoader {
    pub fn new(
        face_model_path: impl Into<PathBuf>,
        emotion_model_path: impl Into<PathBuf>,
        face_score_threshold: f32,
    ) -> Self {
        Self {
            face_model_path: face_model_path.into(),
            emotion_model_path: emotion_model_path.into(),
            face_score_threshold,
            haar_cascade_path: None,
        }
    }

    /// Locates faces with an OpenCV Haar cascade instead of the ONNX detector
    pub fn with_haar_cascade(mut self, cascade_path: impl Into<PathBuf>) -> Self {
        self.haar_cascade_path = Some(cascade_path.into());
        self
    }
}

#[async_trait]
impl ModelLoader for OnnxModelLoader {
    async fn load_locator(&self) -> Result<Arc<dyn FaceLocator>> {
        if let Some(cascade) = &self.haar_cascade_path {
            #[cfg(feature = "opencv")]
            {
                let cascade = cascade.to_string_lossy().into_owned();
                let locator = tokio::task::spawn_blocking(move || {
                    crate::locator::HaarCascadeLocator::new(&cascade)
                })
                .await
                .map_err(|e| PipelineError::ModelLoad(format!("Cascade load task failed: {e}")))??;
                return Ok(Arc::new(locator));
            }
            #[cfg(not(feature = "opencv"))]
            warn!(
                "Ignoring Haar cascade {:?}: built without the opencv feature",
                cascade
            );
        }

        let path = self.face_model_path.clone();
        let threshold = self.face_score_threshold;
        let locator = tokio::task::spawn_blocking(move || OnnxFaceLocator::new(path, threshold))
            .await
            .map_err(|e| PipelineError::ModelLoad(format!("Face detector load task failed: {e}")))??;
        Ok(Arc::new(locator))
    }

    async fn load_classifier(&self) -> Result<Arc<dyn EmotionModel>> {
        let path = self.emotion_model_path.clone();
        let model = tokio::task::spawn_blocking(move || OnnxEmotionModel::new(path))
            .await
            .map_err(|e| PipelineError::ModelLoad(format!("Classifier load task failed: {e}")))??;
        Ok(Arc::new(model))
    }
}

/// Both models, ready for inference
#[derive(Clone)]
pub struct LoadedModels {
    pub locator: Arc<dyn FaceLocator>,
    pub classifier: EmotionClassifier,
}

/// Loads the models once and hands out the cached pair afterwards
pub struct ModelHub {
    loader: Arc<dyn ModelLoader>,
    models: OnceCell<LoadedModels>,
}

impl ModelHub {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            models: OnceCell::new(),
        }
    }

    /// Hub over already loaded models
    pub fn preloaded(locator: Arc<dyn FaceLocator>, classifier: Arc<dyn EmotionModel>) -> Self {
        struct Unused;

        #[async_trait]
        impl ModelLoader for Unused {
            async fn load_locator(&self) -> Result<Arc<dyn FaceLocator>> {
                Err(PipelineError::ModelLoad("no loader configured".to_string()))
            }
            async fn load_classifier(&self) -> Result<Arc<dyn EmotionModel>> {
                Err(PipelineError::ModelLoad("no loader configured".to_string()))
            }
        }

        let models = LoadedModels {
            locator,
            classifier: EmotionClassifier::new(classifier),
        };
        Self {
            loader: Arc::new(Unused),
            models: OnceCell::new_with(Some(models)),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.models.initialized()
    }

    /// Waits until both models are loaded. A failed load is retried on the next call.
    pub async fn models(&self) -> Result<LoadedModels> {
        let models = self
            .models
            .get_or_try_init(|| async {
                info!("Loading face locator and emotion classifier");
                let (locator, classifier) =
                    tokio::try_join!(self.loader.load_locator(), self.loader.load_classifier())?;
                info!("Models loaded");
                Ok::<_, PipelineError>(LoadedModels {
                    locator,
                    classifier: EmotionClassifier::new(classifier),
                })
            })
            .await?;
        Ok(models.clone())
    }

    /// Builds an inference pipeline once the models are available
    pub async fn pipeline(&self, preprocessor: Preprocessor) -> Result<InferencePipeline> {
        Ok(InferencePipeline::new(self.models().await?, preprocessor))
    }
}

/// Outcome of one locate, preprocess and classify cycle
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Inference {
    pub label: EmotionLabel,
    pub face: Option<BoundingBox>,
}

/// Face locator, preprocessor and classifier wired together
#[derive(Clone)]
pub struct InferencePipeline {
    models: LoadedModels,
    preprocessor: Preprocessor,
}

impl InferencePipeline {
    pub fn new(models: LoadedModels, preprocessor: Preprocessor) -> Self {
        Self {
            models,
            preprocessor,
        }
    }

    /// Runs one cycle. No classification happens when no face is found.
    pub async fn infer(&self, frame: &Frame) -> Result<Inference> {
        let Some(face) = self.models.locator.locate(frame).await? else {
            debug!("No face in {}x{} frame", frame.width, frame.height);
            return Ok(Inference {
                label: EmotionLabel::NoFace,
                face: None,
            });
        };

        let tensor = self.preprocessor.prepare(frame, Some(&face))?;
        let emotion = self.models.classifier.classify(tensor).await?;

        Ok(Inference {
            label: EmotionLabel::Detected(emotion),
            face: Some(face),
        })
    }
}
