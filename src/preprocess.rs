// Frame preprocessing into the classifier's 48x48 grayscale input

use crate::error::{PipelineError, Result};
use crate::models::{BoundingBox, Frame};
use image::imageops::{self, FilterType};
use ndarray::{Array4, ArrayView4};
use tracing::debug;

/// Side length of the classifier input
pub const INPUT_SIZE: u32 = 48;

/// Resize kernel used before the grayscale collapse
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interpolation {
    Bilinear,
    Nearest,
}

impl Interpolation {
    fn filter(self) -> FilterType {
        match self {
            Interpolation::Bilinear => FilterType::Triangle,
            Interpolation::Nearest => FilterType::Nearest,
        }
    }
}

/// Which region of the frame feeds the classifier
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CropPolicy {
    /// Resize the whole frame; the face box only drives the overlay
    #[default]
    FullFrame,
    /// Crop to the located face before resizing
    FaceRegion,
}

/// Classifier input of shape (1, 48, 48, 1), sample values in 0..=255
#[derive(Debug)]
pub struct NormalizedTensor {
    data: Array4<f32>,
}

impl NormalizedTensor {
    pub const SHAPE: [usize; 4] = [1, INPUT_SIZE as usize, INPUT_SIZE as usize, 1];

    /// Wraps row-major grayscale samples, checking the length
    pub fn from_samples(samples: Vec<f32>) -> Result<Self> {
        let data = Array4::from_shape_vec(
            (1, INPUT_SIZE as usize, INPUT_SIZE as usize, 1),
            samples,
        )?;
        Ok(Self { data })
    }

    /// A tensor filled with one value
    pub fn filled(value: f32) -> Self {
        Self {
            data: Array4::from_elem((1, INPUT_SIZE as usize, INPUT_SIZE as usize, 1), value),
        }
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }
}

/// Turns frames into classifier input
#[derive(Clone, Copy, Debug)]
pub struct Preprocessor {
    interpolation: Interpolation,
    crop: CropPolicy,
}

impl Preprocessor {
    pub fn new(interpolation: Interpolation, crop: CropPolicy) -> Self {
        Self {
            interpolation,
            crop,
        }
    }

    /// Live video path: bilinear resize
    pub fn video(crop: CropPolicy) -> Self {
        Self::new(Interpolation::Bilinear, crop)
    }

    /// Photo upload path: nearest-neighbor resize
    pub fn still(crop: CropPolicy) -> Self {
        Self::new(Interpolation::Nearest, crop)
    }

    /// Resizes to 48x48, averages the color channels and adds batch and channel axes
    pub fn prepare(&self, frame: &Frame, face: Option<&BoundingBox>) -> Result<NormalizedTensor> {
        if frame.width == 0 || frame.height == 0 {
            return Err(PipelineError::FrameProcessing(
                "Cannot preprocess an empty frame".to_string(),
            ));
        }

        let mut img = frame.to_dynamic_image()?;

        if let (CropPolicy::FaceRegion, Some(face)) = (self.crop, face) {
            let face = face.clamped(frame.width, frame.height);
            let (x, y) = (face.top_left.0 as u32, face.top_left.1 as u32);
            let (w, h) = (face.width() as u32, face.height() as u32);
            if w > 0 && h > 0 {
                img = img.crop_imm(x, y, w, h);
            } else {
                debug!("Degenerate face box, resizing the full frame");
            }
        }

        // Float resize keeps fractional bilinear results; the image crate clamps
        // f32 samples to [0, 1], so values are rescaled to 0..255 afterwards.
        let rgb = img.to_rgb32f();
        let resized = imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, self.interpolation.filter());

        let samples: Vec<f32> = resized
            .pixels()
            .map(|p| (p.0[0] + p.0[1] + p.0[2]) / 3.0 * 255.0)
            .collect();

        NormalizedTensor::from_samples(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let data = (0..width * height).flat_map(|_| rgb).collect();
        Frame::new(data, width, height)
    }

    #[test]
    fn output_has_batch_and_channel_axes() {
        let frame = solid_frame(640, 480, [10, 20, 30]);
        let tensor = Preprocessor::video(CropPolicy::FullFrame)
            .prepare(&frame, None)
            .unwrap();
        assert_eq!(tensor.shape(), &NormalizedTensor::SHAPE);
    }

    #[test]
    fn grayscale_is_unweighted_channel_mean() {
        let frame = solid_frame(96, 96, [30, 60, 90]);
        for pre in [
            Preprocessor::video(CropPolicy::FullFrame),
            Preprocessor::still(CropPolicy::FullFrame),
        ] {
            let tensor = pre.prepare(&frame, None).unwrap();
            for v in tensor.view().iter() {
                assert!((v - 60.0).abs() < 0.01, "got {v}");
            }
        }
    }

    #[test]
    fn gray_frames_keep_their_value() {
        let frame = Frame::with_channels(vec![128; 100 * 50], 100, 50, 1).unwrap();
        let tensor = Preprocessor::still(CropPolicy::FullFrame)
            .prepare(&frame, None)
            .unwrap();
        assert!(tensor.view().iter().all(|v| (v - 128.0).abs() < 0.01));
    }

    #[test]
    fn full_frame_policy_ignores_the_face_box() {
        // left half black, right half white
        let (w, h) = (96u32, 96u32);
        let data = (0..h)
            .flat_map(|_| (0..w).flat_map(move |x| if x < w / 2 { [0u8; 3] } else { [255u8; 3] }))
            .collect();
        let frame = Frame::new(data, w, h);
        let face = BoundingBox::new((60.0, 0.0), (96.0, 96.0));

        let full = Preprocessor::still(CropPolicy::FullFrame)
            .prepare(&frame, Some(&face))
            .unwrap();
        let left_column = full.view()[[0, 24, 0, 0]];
        assert!(left_column < 1.0);

        let cropped = Preprocessor::still(CropPolicy::FaceRegion)
            .prepare(&frame, Some(&face))
            .unwrap();
        assert!(cropped.view().iter().all(|v| (v - 255.0).abs() < 0.01));
    }

    #[test]
    fn empty_frame_is_rejected() {
        let frame = Frame::new(Vec::new(), 0, 0);
        assert!(Preprocessor::video(CropPolicy::FullFrame)
            .prepare(&frame, None)
            .is_err());
    }

    #[test]
    fn tensor_length_is_checked() {
        assert!(NormalizedTensor::from_samples(vec![0.0; 10]).is_err());
        let tensor = NormalizedTensor::filled(128.0);
        assert_eq!(tensor.view().len(), 48 * 48);
    }
}
