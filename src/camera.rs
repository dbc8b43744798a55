// Webcam frame source

use crate::error::{PipelineError, Result};
use crate::models::Frame;
use crate::source::FrameSource;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use tracing::{error, info};

/// Webcam capture through nokhwa
pub struct CameraSource {
    camera: Camera,
    is_open: bool,
}

impl CameraSource {
    /// Opens the camera at `index`, falling back to the next index
    pub fn new(index: u32) -> Result<Self> {
        // Request 640x480 at 30 FPS
        let requested_format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            nokhwa::utils::CameraFormat::new(
                nokhwa::utils::Resolution::new(640, 480),
                nokhwa::utils::FrameFormat::YUYV,
                30,
            ),
        ));

        let camera = Self::try_open_camera(index, requested_format)
            .or_else(|_| Self::try_open_camera(index + 1, requested_format))
            .map_err(|e| {
                error!("Failed to initialize camera at index {} or {}: {}", index, index + 1, e);
                PipelineError::CameraInit(format!(
                    "Could not open camera. Make sure:\n\
                    1. A camera is connected\n\
                    2. No other app is using it\n\
                    3. Camera permissions are granted\n\
                    Error: {e}"
                ))
            })?;

        info!("Camera opened: {}", camera.info().human_name());

        Ok(Self {
            camera,
            is_open: false,
        })
    }

    fn try_open_camera(index: u32, requested_format: RequestedFormat) -> Result<Camera> {
        Ok(Camera::new(CameraIndex::Index(index), requested_format)?)
    }
}

impl FrameSource for CameraSource {
    fn open(&mut self) -> Result<()> {
        if self.is_open {
            return Ok(());
        }
        self.camera.open_stream().map_err(|e| {
            error!("Failed to open camera stream: {}", e);
            PipelineError::CameraInit(e.to_string())
        })?;
        self.is_open = true;
        let resolution = self.camera.resolution();
        info!(
            "Camera stream open at {}x{}",
            resolution.width(),
            resolution.height()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.is_open || !self.camera.is_stream_open() {
            return Ok(None);
        }

        let frame_data = self.camera.frame().map_err(|e| {
            PipelineError::FrameProcessing(format!("Failed to capture frame: {e}"))
        })?;

        let buffer = frame_data.decode_image::<RgbFormat>().map_err(|e| {
            PipelineError::FrameProcessing(format!("Failed to decode frame: {e}"))
        })?;

        let (width, height) = (buffer.width(), buffer.height());
        Ok(Some(Frame::new(buffer.into_raw(), width, height)))
    }

    fn close(&mut self) {
        if !self.is_open {
            return;
        }
        self.is_open = false;

        if let Err(e) = self.camera.stop_stream() {
            error!("Error stopping camera stream: {}", e);
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}
