// Error types for the facial emotion pipeline

use thiserror::Error;

/// Main error type for the facial emotion pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Camera initialization failed: {0}")]
    CameraInit(String),

    #[error("Frame processing failed: {0}")]
    FrameProcessing(String),

    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Image loading failed: {0}")]
    ImageLoad(String),

    #[error("Face detection failed: {0}")]
    FaceDetection(String),

    #[error("Emotion classification failed: {0}")]
    Classification(String),

    #[error("Classifier produced {actual} scores but the label table has {expected} entries")]
    LabelTableMismatch { expected: usize, actual: usize },

    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("ONNX Runtime error: {0}")]
    OnnxRuntime(String),

    #[cfg(feature = "opencv")]
    #[error("OpenCV error: {0}")]
    OpenCV(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

// Conversion from nokhwa errors
#[cfg(feature = "camera")]
impl From<nokhwa::NokhwaError> for PipelineError {
    fn from(err: nokhwa::NokhwaError) -> Self {
        match err {
            nokhwa::NokhwaError::StructureError { structure, error } => {
                PipelineError::CameraInit(format!("{structure}: {error}"))
            }
            nokhwa::NokhwaError::OpenDeviceError(device, error) => {
                PipelineError::CameraInit(format!("Device {device}: {error}"))
            }
            _ => PipelineError::CameraInit(err.to_string()),
        }
    }
}

// Conversion from OpenCV errors
#[cfg(feature = "opencv")]
impl From<opencv::Error> for PipelineError {
    fn from(err: opencv::Error) -> Self {
        PipelineError::OpenCV(err.to_string())
    }
}

// Conversion from ONNX Runtime errors
impl From<ort::Error> for PipelineError {
    fn from(err: ort::Error) -> Self {
        PipelineError::OnnxRuntime(err.to_string())
    }
}

impl From<ndarray::ShapeError> for PipelineError {
    fn from(err: ndarray::ShapeError) -> Self {
        PipelineError::FrameProcessing(format!("Tensor shape error: {err}"))
    }
}
