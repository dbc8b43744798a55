// Application configuration

use crate::preprocess::CropPolicy;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for the emotion pipeline and UI.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// ONNX face detector path
    pub face_model_path: PathBuf,
    /// ONNX emotion classifier path
    pub emotion_model_path: PathBuf,
    /// Haar cascade XML; when set, replaces the ONNX face detector (needs the `opencv` feature)
    pub haar_cascade_path: Option<PathBuf>,
    /// Minimum detector score for a face to count
    pub face_score_threshold: f32,
    /// Interval between sampling ticks in video mode
    pub cadence: Duration,
    /// Camera index tried first
    pub camera_index: u32,
    /// Mirror the overlay to match a mirrored preview
    pub mirror_preview: bool,
    /// Classifier input region
    pub crop_policy: CropPolicy,
    /// Log output file
    pub log_file: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            face_model_path: PathBuf::from("assets/models/version-RFB-320.onnx"),
            emotion_model_path: PathBuf::from("assets/models/emotion.onnx"),
            haar_cascade_path: None,
            face_score_threshold: 0.7,
            cadence: Duration::from_millis(10),
            camera_index: 0,
            mirror_preview: true,
            crop_policy: CropPolicy::FullFrame,
            log_file: PathBuf::from("facial_emotion.log"),
        }
    }
}

impl AppConfig {
    /// Create config from `EMOTION_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            face_model_path: lookup("EMOTION_FACE_MODEL")
                .map(PathBuf::from)
                .unwrap_or(defaults.face_model_path),
            emotion_model_path: lookup("EMOTION_CLASSIFIER_MODEL")
                .map(PathBuf::from)
                .unwrap_or(defaults.emotion_model_path),
            haar_cascade_path: lookup("EMOTION_HAAR_CASCADE").map(PathBuf::from),
            face_score_threshold: lookup("EMOTION_FACE_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .filter(|t: &f32| (0.0..=1.0).contains(t))
                .unwrap_or(defaults.face_score_threshold),
            cadence: lookup("EMOTION_CADENCE_MS")
                .and_then(|s| s.parse().ok())
                .filter(|ms: &u64| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.cadence),
            camera_index: lookup("EMOTION_CAMERA_INDEX")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.camera_index),
            mirror_preview: lookup("EMOTION_MIRROR")
                .map(|s| parse_bool(&s))
                .unwrap_or(defaults.mirror_preview),
            crop_policy: match lookup("EMOTION_CROP_TO_FACE").map(|s| parse_bool(&s)) {
                Some(true) => CropPolicy::FaceRegion,
                _ => defaults.crop_policy,
            },
            log_file: lookup("EMOTION_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_file),
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
