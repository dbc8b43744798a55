// Core data models for the facial emotion pipeline

use crate::error::{PipelineError, Result};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

/// A single video frame or decoded photo
#[derive(Clone, Debug)]
pub struct Frame {
    /// Raw interleaved pixel data (width * height * channels bytes)
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Samples per pixel: 1 (gray), 3 (RGB) or 4 (RGBA)
    pub channels: u8,
}

impl Frame {
    /// Creates a new RGB frame
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            channels: 3,
        }
    }

    /// Creates a frame with an explicit channel count, checking the buffer length
    pub fn with_channels(data: Vec<u8>, width: u32, height: u32, channels: u8) -> Result<Self> {
        if !matches!(channels, 1 | 3 | 4) {
            return Err(PipelineError::UnsupportedInput(format!(
                "{channels} channels per pixel"
            )));
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(PipelineError::FrameProcessing(format!(
                "Frame buffer has {} bytes, expected {expected} for {width}x{height}x{channels}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
        })
    }

    /// Builds a frame from a decoded image, keeping gray and alpha layouts as they are
    pub fn from_dynamic_image(img: &DynamicImage) -> Self {
        match img {
            DynamicImage::ImageLuma8(gray) => Self {
                data: gray.as_raw().clone(),
                width: gray.width(),
                height: gray.height(),
                channels: 1,
            },
            DynamicImage::ImageRgba8(rgba) => Self {
                data: rgba.as_raw().clone(),
                width: rgba.width(),
                height: rgba.height(),
                channels: 4,
            },
            other => {
                let rgb = other.to_rgb8();
                let (width, height) = rgb.dimensions();
                Self::new(rgb.into_raw(), width, height)
            }
        }
    }

    /// Converts the frame back into an `image` buffer
    pub fn to_dynamic_image(&self) -> Result<DynamicImage> {
        let invalid = || {
            PipelineError::FrameProcessing(format!(
                "Frame buffer does not match {}x{}x{}",
                self.width, self.height, self.channels
            ))
        };
        let data = self.data.clone();
        let img = match self.channels {
            1 => DynamicImage::ImageLuma8(
                GrayImage::from_raw(self.width, self.height, data).ok_or_else(invalid)?,
            ),
            3 => DynamicImage::ImageRgb8(
                RgbImage::from_raw(self.width, self.height, data).ok_or_else(invalid)?,
            ),
            4 => DynamicImage::ImageRgba8(
                RgbaImage::from_raw(self.width, self.height, data).ok_or_else(invalid)?,
            ),
            n => {
                return Err(PipelineError::UnsupportedInput(format!(
                    "{n} channels per pixel"
                )))
            }
        };
        Ok(img)
    }

    /// Returns RGB bytes suitable for display, expanding gray and dropping alpha
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        match self.channels {
            3 => self.data.clone(),
            1 => self.data.iter().flat_map(|&v| [v, v, v]).collect(),
            _ => self
                .data
                .chunks_exact(self.channels as usize)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
        }
    }
}

/// Face rectangle in frame pixel coordinates
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    /// Top-left corner (x, y)
    pub top_left: (f32, f32),
    /// Bottom-right corner (x, y)
    pub bottom_right: (f32, f32),
    /// Detector confidence, when the detector reports one
    pub score: Option<f32>,
}

impl BoundingBox {
    pub fn new(top_left: (f32, f32), bottom_right: (f32, f32)) -> Self {
        Self {
            top_left,
            bottom_right,
            score: None,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }

    pub fn width(&self) -> f32 {
        (self.bottom_right.0 - self.top_left.0).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.bottom_right.1 - self.top_left.1).max(0.0)
    }

    /// Clamps both corners into a `width` x `height` frame
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self {
            top_left: (self.top_left.0.clamp(0.0, w), self.top_left.1.clamp(0.0, h)),
            bottom_right: (
                self.bottom_right.0.clamp(0.0, w),
                self.bottom_right.1.clamp(0.0, h),
            ),
            score: self.score,
        }
    }

    /// Overlay rectangle in frame coordinates, unmirrored
    pub fn overlay(&self) -> OverlayRect {
        OverlayRect {
            x: self.top_left.0,
            y: self.top_left.1,
            width: self.width(),
            height: self.height(),
        }
    }

    /// Overlay rectangle flipped horizontally to match a mirrored preview
    pub fn mirrored_overlay(&self, frame_width: u32) -> OverlayRect {
        let width = self.width();
        OverlayRect {
            x: frame_width as f32 - self.top_left.0 - width,
            y: self.top_left.1,
            width,
            height: self.height(),
        }
    }
}

/// Rectangle handed to the presentation layer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverlayRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// The fixed set of emotion classes, in classifier output order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Emotion {
    Angry,
    Disgust,
    Fear,
    Happy,
    Neutral,
    Sad,
    Surprise,
}

impl Emotion {
    /// All classes indexed by classifier output position
    pub const ALL: [Emotion; 7] = [
        Emotion::Angry,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happy,
        Emotion::Neutral,
        Emotion::Sad,
        Emotion::Surprise,
    ];

    /// Number of classes the classifier must score
    pub const COUNT: usize = Self::ALL.len();

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn english(self) -> &'static str {
        match self {
            Emotion::Angry => "Angry",
            Emotion::Disgust => "Disgust",
            Emotion::Fear => "Fear",
            Emotion::Happy => "Happy",
            Emotion::Neutral => "Neutral",
            Emotion::Sad => "Sad",
            Emotion::Surprise => "Surprise",
        }
    }

    pub fn arabic(self) -> &'static str {
        match self {
            Emotion::Angry => "غاضب",
            Emotion::Disgust => "اشمئزاز",
            Emotion::Fear => "خوف",
            Emotion::Happy => "سعيد",
            Emotion::Neutral => "محايد",
            Emotion::Sad => "حزين",
            Emotion::Surprise => "مفاجأة",
        }
    }
}

impl std::fmt::Display for Emotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.english())
    }
}

/// What the presentation layer shows for a finished cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EmotionLabel {
    /// A face was found and classified
    Detected(Emotion),
    /// The face locator found nothing
    NoFace,
}

impl EmotionLabel {
    pub fn english(&self) -> &'static str {
        match self {
            EmotionLabel::Detected(emotion) => emotion.english(),
            EmotionLabel::NoFace => "No face detected",
        }
    }

    pub fn arabic(&self) -> &'static str {
        match self {
            EmotionLabel::Detected(emotion) => emotion.arabic(),
            EmotionLabel::NoFace => "لم يتم العثور على وجه",
        }
    }

    /// Classifier index, `None` for the sentinel
    pub fn index(&self) -> Option<usize> {
        match self {
            EmotionLabel::Detected(emotion) => Some(emotion.index()),
            EmotionLabel::NoFace => None,
        }
    }
}

impl std::fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {}", self.english(), self.arabic())
    }
}

/// Lifecycle of the live video pipeline
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PipelineState {
    #[default]
    Idle,
    Loading,
    Running,
    Stopped,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "Idle"),
            PipelineState::Loading => write!(f, "Loading"),
            PipelineState::Running => write!(f, "Running"),
            PipelineState::Stopped => write!(f, "Stopped"),
        }
    }
}
