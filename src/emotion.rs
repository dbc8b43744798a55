// Emotion classification on preprocessed face tensors

use crate::error::{PipelineError, Result};
use crate::models::Emotion;
use crate::preprocess::NormalizedTensor;
use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

/// A model producing one score per emotion class
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmotionModel: Send + Sync {
    async fn scores(&self, input: &NormalizedTensor) -> Result<Vec<f32>>;
}

/// Index of the largest score. Ties go to the lowest index and NaN never wins.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, b)| score > b) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i)
}

/// Maps model scores onto the fixed label table
#[derive(Clone)]
pub struct EmotionClassifier {
    model: Arc<dyn EmotionModel>,
}

impl EmotionClassifier {
    pub fn new(model: Arc<dyn EmotionModel>) -> Self {
        Self { model }
    }

    /// Classifies one tensor. The tensor is consumed and released when this returns,
    /// whether or not classification succeeded.
    pub async fn classify(&self, tensor: NormalizedTensor) -> Result<Emotion> {
        let scores = self.model.scores(&tensor).await;
        drop(tensor);
        let scores = scores?;

        if scores.len() != Emotion::COUNT {
            error!(
                "Classifier returned {} scores, label table has {}",
                scores.len(),
                Emotion::COUNT
            );
            return Err(PipelineError::LabelTableMismatch {
                expected: Emotion::COUNT,
                actual: scores.len(),
            });
        }

        let index = argmax(&scores)
            .ok_or_else(|| PipelineError::Classification("No usable scores".to_string()))?;
        debug!("Classifier scores {:?} -> index {}", scores, index);

        Emotion::from_index(index).ok_or(PipelineError::LabelTableMismatch {
            expected: Emotion::COUNT,
            actual: scores.len(),
        })
    }
}

/// Emotion classifier using ONNX Runtime, input (1, 48, 48, 1)
pub struct OnnxEmotionModel {
    session: Mutex<Session>,
}

impl OnnxEmotionModel {
    /// Creates a new OnnxEmotionModel by loading the ONNX model
    pub fn new(model_path: impl AsRef<Path>) -> Result<Self> {
        let model_path = model_path.as_ref();
        let session = Session::builder()
            .map_err(|e| PipelineError::ModelLoad(format!("Failed to create session builder: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| {
                error!("Failed to load ONNX model {:?}: {}", model_path, e);
                PipelineError::ModelLoad(format!("ONNX model load failed: {e}"))
            })?;

        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

#[async_trait]
impl EmotionModel for OnnxEmotionModel {
    async fn scores(&self, input: &NormalizedTensor) -> Result<Vec<f32>> {
        let input_tensor = Tensor::from_array(input.view().to_owned()).map_err(|e| {
            PipelineError::OnnxRuntime(format!("Failed to create input tensor: {e}"))
        })?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| PipelineError::OnnxRuntime("Classifier session poisoned".to_string()))?;

        let outputs = session.run(ort::inputs![input_tensor]).map_err(|e| {
            error!("ONNX inference failed: {}", e);
            PipelineError::OnnxRuntime(format!("Inference failed: {e}"))
        })?;

        let (_, output_value) = outputs
            .iter()
            .next()
            .ok_or_else(|| PipelineError::OnnxRuntime("No output from model".to_string()))?;

        let (_, scores) = output_value.try_extract_tensor::<f32>().map_err(|e| {
            PipelineError::OnnxRuntime(format!("Failed to extract output tensor: {e}"))
        })?;

        Ok(scores.to_vec())
    }
}
