// Face locator adapters

use crate::error::{PipelineError, Result};
use crate::models::{BoundingBox, Frame};
use async_trait::async_trait;
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, error};

/// Finds at most one face in a frame.
///
/// An empty result is an ordinary outcome. When a detector reports several
/// faces only the first (or highest scoring) one is returned.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FaceLocator: Send + Sync {
    async fn locate(&self, frame: &Frame) -> Result<Option<BoundingBox>>;
}

/// UltraFace-style detector input width
const DETECTOR_WIDTH: u32 = 320;
/// UltraFace-style detector input height
const DETECTOR_HEIGHT: u32 = 240;

/// Face locator backed by an ONNX face detector (UltraFace RFB-320 layout)
pub struct OnnxFaceLocator {
    session: Mutex<Session>,
    score_threshold: f32,
}

impl OnnxFaceLocator {
    /// Loads the detector model from disk
    pub fn new(model_path: impl AsRef<Path>, score_threshold: f32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let session = Session::builder()
            .map_err(|e| PipelineError::ModelLoad(format!("Failed to create session builder: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| {
                error!("Failed to load face detector {:?}: {}", model_path, e);
                PipelineError::ModelLoad(format!("Face detector load failed: {e}"))
            })?;

        Ok(Self {
            session: Mutex::new(session),
            score_threshold,
        })
    }

    /// Builds the (1, 3, 240, 320) input, normalized to roughly [-1, 1]
    fn detector_input(frame: &Frame) -> Result<Array4<f32>> {
        let rgb = frame.to_dynamic_image()?.to_rgb8();
        let resized = imageops::resize(&rgb, DETECTOR_WIDTH, DETECTOR_HEIGHT, FilterType::Triangle);

        let (h, w) = (DETECTOR_HEIGHT as usize, DETECTOR_WIDTH as usize);
        let mut input = Array4::<f32>::zeros((1, 3, h, w));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - 127.0) / 128.0;
            }
        }
        Ok(input)
    }
}

#[async_trait]
impl FaceLocator for OnnxFaceLocator {
    async fn locate(&self, frame: &Frame) -> Result<Option<BoundingBox>> {
        let input = Self::detector_input(frame)?;
        let input_tensor = Tensor::from_array(input).map_err(|e| {
            PipelineError::FaceDetection(format!("Failed to create input tensor: {e}"))
        })?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| PipelineError::FaceDetection("Detector session poisoned".to_string()))?;

        let outputs = session.run(ort::inputs![input_tensor]).map_err(|e| {
            error!("Face detector inference failed: {}", e);
            PipelineError::FaceDetection(format!("Inference failed: {e}"))
        })?;

        let mut values = outputs.iter().map(|(_, value)| value);
        let scores_value = values
            .next()
            .ok_or_else(|| PipelineError::FaceDetection("Missing scores output".to_string()))?;
        let boxes_value = values
            .next()
            .ok_or_else(|| PipelineError::FaceDetection("Missing boxes output".to_string()))?;

        let (_, scores) = scores_value
            .try_extract_tensor::<f32>()
            .map_err(|e| PipelineError::FaceDetection(format!("Bad scores output: {e}")))?;
        let (_, boxes) = boxes_value
            .try_extract_tensor::<f32>()
            .map_err(|e| PipelineError::FaceDetection(format!("Bad boxes output: {e}")))?;

        Ok(best_detection(scores, boxes, self.score_threshold)
            .map(|(score, corners)| scale_corners(corners, frame.width, frame.height).with_score(score)))
    }
}

/// Picks the highest face score above `threshold` from `[N, 2]` scores and `[N, 4]` boxes.
/// Earlier candidates win exact ties.
fn best_detection(scores: &[f32], boxes: &[f32], threshold: f32) -> Option<(f32, [f32; 4])> {
    let candidates = (scores.len() / 2).min(boxes.len() / 4);
    let mut best: Option<(usize, f32)> = None;
    for i in 0..candidates {
        let face_score = scores[i * 2 + 1];
        if face_score < threshold || face_score.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, s)| face_score > s) {
            best = Some((i, face_score));
        }
    }
    best.map(|(i, score)| {
        debug!("Face candidate {} selected with score {:.3}", i, score);
        (score, [boxes[i * 4], boxes[i * 4 + 1], boxes[i * 4 + 2], boxes[i * 4 + 3]])
    })
}

/// Maps normalized `[x1, y1, x2, y2]` into frame pixels
fn scale_corners(corners: [f32; 4], width: u32, height: u32) -> BoundingBox {
    let (w, h) = (width as f32, height as f32);
    BoundingBox::new((corners[0] * w, corners[1] * h), (corners[2] * w, corners[3] * h))
        .clamped(width, height)
}

#[cfg(feature = "opencv")]
pub use haar::HaarCascadeLocator;

#[cfg(feature = "opencv")]
mod haar {
    use super::FaceLocator;
    use crate::error::{PipelineError, Result};
    use crate::models::{BoundingBox, Frame};
    use async_trait::async_trait;
    use opencv::core::{Mat, Rect, Size, Vector};
    use opencv::imgproc;
    use opencv::objdetect::CascadeClassifier;
    use opencv::prelude::*;
    use std::sync::Mutex;
    use tracing::error;

    /// Face locator using an OpenCV Haar cascade
    pub struct HaarCascadeLocator {
        classifier: Mutex<CascadeClassifier>,
    }

    impl HaarCascadeLocator {
        /// Loads the cascade XML
        pub fn new(cascade_path: &str) -> Result<Self> {
            let classifier = CascadeClassifier::new(cascade_path).map_err(|e| {
                error!("Failed to load Haar Cascade: {}", e);
                PipelineError::ModelLoad(format!("Haar Cascade load failed: {e}"))
            })?;

            if classifier.empty()? {
                return Err(PipelineError::ModelLoad(
                    "Haar Cascade classifier is empty".to_string(),
                ));
            }

            Ok(Self {
                classifier: Mutex::new(classifier),
            })
        }

        fn gray_mat(frame: &Frame) -> Result<Mat> {
            let mat = Mat::from_slice(&frame.data).map_err(|e| {
                PipelineError::FaceDetection(format!("Failed to create Mat: {e}"))
            })?;
            let mat = mat
                .reshape(frame.channels as i32, frame.height as i32)
                .map_err(|e| PipelineError::FaceDetection(format!("Failed to reshape Mat: {e}")))?;

            let code = match frame.channels {
                1 => return Ok(mat.try_clone()?),
                3 => imgproc::COLOR_RGB2GRAY,
                _ => imgproc::COLOR_RGBA2GRAY,
            };
            let mut gray = Mat::default();
            imgproc::cvt_color_def(&mat, &mut gray, code).map_err(|e| {
                PipelineError::FaceDetection(format!("Failed to convert to grayscale: {e}"))
            })?;
            Ok(gray)
        }
    }

    #[async_trait]
    impl FaceLocator for HaarCascadeLocator {
        async fn locate(&self, frame: &Frame) -> Result<Option<BoundingBox>> {
            let gray = Self::gray_mat(frame)?;

            let mut faces = Vector::<Rect>::new();
            let mut classifier = self.classifier.lock().map_err(|_| {
                PipelineError::FaceDetection("Cascade classifier poisoned".to_string())
            })?;
            classifier
                .detect_multi_scale(
                    &gray,
                    &mut faces,
                    1.1,
                    5,
                    0,
                    Size::new(40, 40),
                    Size::new(0, 0),
                )
                .map_err(|e| PipelineError::FaceDetection(format!("Face detection failed: {e}")))?;

            Ok(faces.iter().next().map(|r| {
                BoundingBox::new(
                    (r.x as f32, r.y as f32),
                    ((r.x + r.width) as f32, (r.y + r.height) as f32),
                )
            }))
        }
    }
}
