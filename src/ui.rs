// UI module for the facial emotion application

use crate::models::{EmotionLabel, Frame, OverlayRect, PipelineState};
use crate::sampler::{VideoDisplay, VideoPipeline};
use crate::still::{StillDisplay, StillSession, ACCEPTED_EXTENSIONS};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tracing::error;

/// How many warnings stay on screen
const MAX_NOTICES: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Image,
    Video,
}

/// Texture cached against the frame it was uploaded from
struct FrameTexture {
    source: Arc<Frame>,
    texture: egui::TextureHandle,
}

impl FrameTexture {
    /// Reuses the texture while the frame is unchanged
    fn refresh(
        slot: &mut Option<FrameTexture>,
        ctx: &egui::Context,
        name: &str,
        frame: Option<&Arc<Frame>>,
    ) {
        let Some(frame) = frame else {
            *slot = None;
            return;
        };
        if slot
            .as_ref()
            .is_some_and(|cached| Arc::ptr_eq(&cached.source, frame))
        {
            return;
        }
        let color_image = egui::ColorImage::from_rgb(
            [frame.width as usize, frame.height as usize],
            &frame.to_rgb_bytes(),
        );
        *slot = Some(FrameTexture {
            source: frame.clone(),
            texture: ctx.load_texture(name, color_image, egui::TextureOptions::LINEAR),
        });
    }
}

/// Main application UI
pub struct EmotionApp {
    runtime: Handle,
    mode: Mode,
    video: VideoPipeline,
    video_display: watch::Receiver<VideoDisplay>,
    still: StillSession,
    still_display: watch::Receiver<StillDisplay>,
    warnings: broadcast::Receiver<String>,
    notices: Vec<String>,
    path_input: String,
    camera_texture: Option<FrameTexture>,
    photo_texture: Option<FrameTexture>,
}

impl EmotionApp {
    pub fn new(runtime: Handle, video: VideoPipeline, still: StillSession) -> Self {
        let video_display = video.subscribe();
        let still_display = still.subscribe();
        let warnings = still.warnings();
        Self {
            runtime,
            mode: Mode::Image,
            video,
            video_display,
            still,
            still_display,
            warnings,
            notices: Vec::new(),
            path_input: String::new(),
            camera_texture: None,
            photo_texture: None,
        }
    }

    fn set_mode(&mut self, mode: Mode) {
        if self.mode == mode {
            return;
        }
        if self.mode == Mode::Video {
            self.video.stop();
        }
        self.mode = mode;
    }

    /// Sends a selection to the upload flow; an empty path counts as a canceled dialog
    fn submit(&self, path: Option<PathBuf>) {
        let still = self.still.clone();
        self.runtime.spawn(async move {
            if let Err(e) = still.select(path.as_deref()).await {
                error!("Image prediction failed: {}", e);
            }
        });
    }

    fn collect_warnings(&mut self) {
        loop {
            match self.warnings.try_recv() {
                Ok(message) => self.notices.push(message),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        if self.notices.len() > MAX_NOTICES {
            let excess = self.notices.len() - MAX_NOTICES;
            self.notices.drain(..excess);
        }
    }

    fn handle_dropped_files(&mut self, ctx: &egui::Context) {
        let dropped: Vec<PathBuf> = ctx.input(|i| {
            i.raw
                .dropped_files
                .iter()
                .filter_map(|file| file.path.clone())
                .collect()
        });
        if let Some(path) = dropped.into_iter().next() {
            self.set_mode(Mode::Image);
            self.path_input = path.display().to_string();
            self.submit(Some(path));
        }
    }

    /// Renders the header with the Image/Video switch
    fn render_header(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("header").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("Facial Emotion");
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    let mut mode = self.mode;
                    ui.selectable_value(&mut mode, Mode::Video, "Video");
                    ui.selectable_value(&mut mode, Mode::Image, "Image");
                    self.set_mode(mode);
                });
            });
        });
    }

    fn render_notices(&mut self, ctx: &egui::Context) {
        if self.notices.is_empty() {
            return;
        }
        egui::TopBottomPanel::bottom("notices").show(ctx, |ui| {
            for notice in &self.notices {
                ui.colored_label(egui::Color32::from_rgb(200, 120, 0), notice);
            }
            if ui.small_button("Dismiss").clicked() {
                self.notices.clear();
            }
        });
    }

    fn render_video(&mut self, ctx: &egui::Context) {
        let display = self.video_display.borrow().clone();
        FrameTexture::refresh(
            &mut self.camera_texture,
            ctx,
            "camera",
            display.preview.as_ref(),
        );

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.heading("Real-time Video");
                let running = matches!(
                    display.state,
                    PipelineState::Loading | PipelineState::Running
                );
                let button = if running {
                    "Turn Camera Off"
                } else {
                    "Turn Camera On"
                };
                if ui.button(button).clicked() {
                    if let Err(e) = self.video.toggle() {
                        error!("Camera toggle failed: {}", e);
                        self.notices.push(e.to_string());
                    }
                }

                match display.state {
                    PipelineState::Loading => {
                        ui.label("Please wait");
                    }
                    PipelineState::Running => {
                        if let Some(label) = display.label {
                            ui.label(
                                egui::RichText::new(format!(
                                    "Emotion: {}--{}",
                                    label.english(),
                                    label.arabic()
                                ))
                                .size(20.0)
                                .strong(),
                            );
                        } else if let Some(reason) = &display.error {
                            ui.colored_label(egui::Color32::RED, reason);
                        }
                    }
                    PipelineState::Idle | PipelineState::Stopped => {
                        ui.label(egui::RichText::new("Camera is off").size(20.0).strong());
                        if let Some(reason) = &display.error {
                            ui.colored_label(egui::Color32::RED, reason);
                        }
                    }
                }

                if let (PipelineState::Running, Some(camera)) =
                    (display.state, &self.camera_texture)
                {
                    let frame = &camera.source;
                    let size = fit_size(
                        egui::vec2(frame.width as f32, frame.height as f32),
                        egui::vec2(640.0, 480.0),
                    );
                    // Mirrored preview, like a selfie camera
                    let response = ui.add(
                        egui::Image::new(&camera.texture)
                            .uv(egui::Rect::from_min_max(
                                egui::pos2(1.0, 0.0),
                                egui::pos2(0.0, 1.0),
                            ))
                            .fit_to_exact_size(size),
                    );
                    if let Some(overlay) = display.overlay {
                        draw_overlay(ui, response.rect, frame, overlay);
                    }
                }
            });
        });
    }

    fn render_image(&mut self, ctx: &egui::Context) {
        let display = self.still_display.borrow().clone();
        FrameTexture::refresh(
            &mut self.photo_texture,
            ctx,
            "photo",
            display.image.as_ref(),
        );

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.heading("Image/Photo");
                ui.label(format!(
                    "Accepted file types: {}",
                    ACCEPTED_EXTENSIONS.join(", ")
                ));
                ui.label("Drop an image here or enter its path");

                ui.horizontal(|ui| {
                    ui.text_edit_singleline(&mut self.path_input);
                    if ui.button("Choose an image").clicked() {
                        let trimmed = self.path_input.trim();
                        let path = (!trimmed.is_empty()).then(|| PathBuf::from(trimmed));
                        self.submit(path);
                    }
                });

                if display.loading {
                    ui.label("Loading...");
                }
                match display.prediction {
                    Some(label @ EmotionLabel::Detected(_)) => {
                        ui.label(format!(
                            "Prediction: {} / {}",
                            label.english(),
                            label.arabic()
                        ));
                    }
                    Some(EmotionLabel::NoFace) => {
                        ui.label(EmotionLabel::NoFace.to_string());
                    }
                    None => {}
                }

                if let Some(photo) = &self.photo_texture {
                    let frame = &photo.source;
                    let size = fit_size(
                        egui::vec2(frame.width as f32, frame.height as f32),
                        egui::vec2(300.0, 300.0),
                    );
                    let response =
                        ui.add(egui::Image::new(&photo.texture).fit_to_exact_size(size));
                    if let Some(face) = display.face {
                        draw_overlay(ui, response.rect, frame, face);
                    }
                    if ui.button("Clear Image").clicked() {
                        self.still.clear();
                    }
                }
            });
        });
    }
}

/// Largest size with the frame's aspect ratio that fits in `bounds`
fn fit_size(frame: egui::Vec2, bounds: egui::Vec2) -> egui::Vec2 {
    if frame.x <= 0.0 || frame.y <= 0.0 {
        return bounds;
    }
    let scale = (bounds.x / frame.x).min(bounds.y / frame.y);
    frame * scale
}

/// Strokes a frame-space rectangle over the displayed image
fn draw_overlay(ui: &egui::Ui, shown: egui::Rect, frame: &Frame, overlay: OverlayRect) {
    let sx = shown.width() / frame.width as f32;
    let sy = shown.height() / frame.height as f32;
    let rect = egui::Rect::from_min_size(
        egui::pos2(shown.min.x + overlay.x * sx, shown.min.y + overlay.y * sy),
        egui::vec2(overlay.width * sx, overlay.height * sy),
    );
    ui.painter()
        .rect_stroke(rect, 0.0, egui::Stroke::new(5.0, egui::Color32::RED));
}

impl eframe::App for EmotionApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint();

        self.collect_warnings();
        self.handle_dropped_files(ctx);

        self.render_header(ctx);
        self.render_notices(ctx);
        match self.mode {
            Mode::Video => self.render_video(ctx),
            Mode::Image => self.render_image(ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_size_keeps_aspect_ratio() {
        let size = fit_size(egui::vec2(1280.0, 720.0), egui::vec2(640.0, 480.0));
        assert_eq!(size, egui::vec2(640.0, 360.0));
        let size = fit_size(egui::vec2(100.0, 400.0), egui::vec2(300.0, 300.0));
        assert_eq!(size, egui::vec2(75.0, 300.0));
    }
}
