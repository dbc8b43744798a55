// Live video sampling loop
//
// Each start spawns a session thread with its own current-thread runtime. The
// session loads the models, opens the frame source and runs one inference cycle
// per tick. Cycles are awaited inline, so a tick that fires while a cycle is
// pending is skipped. Results only reach the display while the session that
// produced them is still the current, running one.

use crate::config::AppConfig;
use crate::error::{PipelineError, Result};
use crate::models::{EmotionLabel, Frame, OverlayRect, PipelineState};
use crate::pipeline::{InferencePipeline, ModelHub};
use crate::preprocess::{CropPolicy, Preprocessor};
use crate::source::{FrameSource, SourceFactory};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Everything the live view needs to draw
#[derive(Clone, Debug, Default)]
pub struct VideoDisplay {
    pub state: PipelineState,
    /// Current label; set while running unless the latest cycle failed
    pub label: Option<EmotionLabel>,
    /// Face rectangle in frame pixels, mirrored if configured
    pub overlay: Option<OverlayRect>,
    /// Last frame a cycle ran on
    pub preview: Option<Arc<Frame>>,
    /// Why the last session ended early, or why the latest cycle failed
    pub error: Option<String>,
    /// Completed cycles in the current session
    pub cycles: u64,
    session: u64,
}

/// Sampling loop settings
#[derive(Clone, Copy, Debug)]
pub struct SamplerSettings {
    pub cadence: Duration,
    pub mirror_preview: bool,
    pub crop_policy: CropPolicy,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl SamplerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            cadence: config.cadence,
            mirror_preview: config.mirror_preview,
            crop_policy: config.crop_policy,
        }
    }
}

struct Session {
    shutdown: watch::Sender<bool>,
    thread: JoinHandle<()>,
}

/// Orchestrates the live camera pipeline
pub struct VideoPipeline {
    hub: Arc<ModelHub>,
    factory: SourceFactory,
    settings: SamplerSettings,
    display: Arc<watch::Sender<VideoDisplay>>,
    /// Held across each cycle, shared by every session of this pipeline
    cycle_permit: Arc<Mutex<()>>,
    current: Option<Session>,
    retired: Vec<JoinHandle<()>>,
    next_session: u64,
}

impl VideoPipeline {
    pub fn new(hub: Arc<ModelHub>, factory: SourceFactory, settings: SamplerSettings) -> Self {
        let (display, _) = watch::channel(VideoDisplay::default());
        Self {
            hub,
            factory,
            settings,
            display: Arc::new(display),
            cycle_permit: Arc::new(Mutex::new(())),
            current: None,
            retired: Vec::new(),
            next_session: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.display.borrow().state
    }

    /// Snapshot of the display state
    pub fn display(&self) -> VideoDisplay {
        self.display.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<VideoDisplay> {
        self.display.subscribe()
    }

    /// Starts sampling. Does nothing while already loading or running.
    pub fn start(&mut self) -> Result<()> {
        if matches!(self.state(), PipelineState::Loading | PipelineState::Running) {
            return Ok(());
        }

        self.retire_current();
        self.next_session += 1;
        let id = self.next_session;

        self.display.send_modify(|d| {
            *d = VideoDisplay {
                state: PipelineState::Loading,
                session: id,
                ..VideoDisplay::default()
            };
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = SessionWorker {
            id,
            hub: self.hub.clone(),
            factory: self.factory.clone(),
            settings: self.settings,
            display: self.display.clone(),
            cycle_permit: self.cycle_permit.clone(),
            shutdown: shutdown_rx,
            failures: 0,
        };

        let thread = std::thread::Builder::new()
            .name(format!("emotion-sampler-{id}"))
            .spawn(move || worker.run())
            .map_err(|e| {
                error!("Failed to spawn sampling thread: {}", e);
                self.display.send_modify(|d| d.state = PipelineState::Stopped);
                PipelineError::Io(e)
            })?;

        info!("Video session {} started", id);
        self.current = Some(Session { shutdown, thread });
        Ok(())
    }

    /// Stops sampling. An in-flight cycle finishes but its result is dropped.
    pub fn stop(&mut self) {
        if let Some(session) = &self.current {
            let _ = session.shutdown.send(true);
        }

        self.display.send_if_modified(|d| {
            if matches!(d.state, PipelineState::Loading | PipelineState::Running) {
                info!("Video session {} stopped", d.session);
                d.state = PipelineState::Stopped;
                d.label = None;
                d.overlay = None;
                d.preview = None;
                d.error = None;
                true
            } else {
                false
            }
        });
    }

    /// Flips between running and stopped
    pub fn toggle(&mut self) -> Result<()> {
        match self.state() {
            PipelineState::Loading | PipelineState::Running => {
                self.stop();
                Ok(())
            }
            PipelineState::Idle | PipelineState::Stopped => self.start(),
        }
    }

    /// Stops sampling and waits for every session thread to exit
    pub fn shutdown(mut self) {
        self.stop();
        self.retire_current();
        for thread in self.retired.drain(..) {
            if thread.join().is_err() {
                error!("Sampling thread panicked");
            }
        }
    }

    fn retire_current(&mut self) {
        if let Some(session) = self.current.take() {
            let _ = session.shutdown.send(true);
            self.retired.push(session.thread);
        }
        self.retired.retain(|thread| !thread.is_finished());
    }
}

impl Drop for VideoPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by one session thread
struct SessionWorker {
    id: u64,
    hub: Arc<ModelHub>,
    factory: SourceFactory,
    settings: SamplerSettings,
    display: Arc<watch::Sender<VideoDisplay>>,
    cycle_permit: Arc<Mutex<()>>,
    shutdown: watch::Receiver<bool>,
    /// Consecutive failed cycles
    failures: u64,
}

/// Failed cycles between repeated warnings
const FAILURE_LOG_EVERY: u64 = 100;

impl SessionWorker {
    fn run(self) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Failed to build sampling runtime: {}", e);
                self.fail(format!("Runtime error: {e}"));
                return;
            }
        };
        runtime.block_on(self.sample());
    }

    async fn sample(mut self) {
        let pipeline = tokio::select! {
            result = self.hub.pipeline(Preprocessor::video(self.settings.crop_policy)) => match result {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    error!("Model loading failed: {}", e);
                    self.fail(e.to_string());
                    return;
                }
            },
            _ = wait_for_shutdown(&mut self.shutdown) => {
                debug!("Session {} stopped while loading", self.id);
                return;
            }
        };

        let mut source = match (self.factory)().and_then(|mut source| {
            source.open()?;
            Ok(source)
        }) {
            Ok(source) => source,
            Err(e) => {
                error!("Frame source unavailable: {}", e);
                self.fail(e.to_string());
                return;
            }
        };

        let id = self.id;
        let running = self.display.send_if_modified(|d| {
            if d.session == id && d.state == PipelineState::Loading {
                d.state = PipelineState::Running;
                d.label = Some(EmotionLabel::NoFace);
                true
            } else {
                false
            }
        });

        if running {
            info!("Session {} running", id);
            self.sample_loop(&pipeline, source.as_mut()).await;
        }

        source.close();
        debug!("Session {} finished", id);
    }

    async fn sample_loop(&mut self, pipeline: &InferencePipeline, source: &mut dyn FrameSource) {
        let mut ticker = tokio::time::interval(self.settings.cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let cycle_permit = self.cycle_permit.clone();

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => break,
                _ = ticker.tick() => {}
            }
            // A previous session may still be finishing its last cycle
            let _permit = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => break,
                permit = cycle_permit.lock() => permit,
            };
            if !self.cycle(pipeline, source).await {
                break;
            }
        }
    }

    /// Pulls one frame and runs it through the pipeline. Returns false once the
    /// session cannot go on.
    async fn cycle(
        &mut self,
        pipeline: &InferencePipeline,
        source: &mut dyn FrameSource,
    ) -> bool {
        let frame = match source.next_frame() {
            Ok(Some(frame)) => Arc::new(frame),
            Ok(None) => return true,
            Err(e) => {
                warn!("Skipping tick: {}", e);
                return true;
            }
        };

        let inference = match pipeline.infer(&frame).await {
            Ok(inference) => {
                self.failures = 0;
                Ok(inference)
            }
            Err(e @ PipelineError::LabelTableMismatch { .. }) => {
                error!("Session {} cannot classify: {}", self.id, e);
                self.fail(e.to_string());
                return false;
            }
            Err(e) => {
                self.failures += 1;
                if self.failures % FAILURE_LOG_EVERY == 1 {
                    warn!("Inference cycle failed ({} in a row): {}", self.failures, e);
                } else {
                    debug!("Inference cycle failed: {}", e);
                }
                Err(e.to_string())
            }
        };

        let id = self.id;
        let mirror = self.settings.mirror_preview;
        let published = self.display.send_if_modified(|d| {
            if d.session != id || d.state != PipelineState::Running {
                return false;
            }
            match &inference {
                Ok(inference) => {
                    d.label = Some(inference.label);
                    d.overlay = inference.face.map(|face| {
                        if mirror {
                            face.mirrored_overlay(frame.width)
                        } else {
                            face.overlay()
                        }
                    });
                    d.error = None;
                    d.cycles += 1;
                }
                Err(reason) => {
                    d.label = None;
                    d.overlay = None;
                    d.error = Some(reason.clone());
                }
            }
            d.preview = Some(frame.clone());
            true
        });

        if !published {
            debug!("Discarded result of session {} after stop", id);
        }
        true
    }

    fn fail(&self, reason: String) {
        let id = self.id;
        self.display.send_if_modified(|d| {
            if d.session != id || d.state == PipelineState::Stopped {
                return false;
            }
            d.state = PipelineState::Stopped;
            d.label = None;
            d.overlay = None;
            d.preview = None;
            d.error = Some(reason);
            true
        });
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender counts as shutdown
    let _ = shutdown.wait_for(|stop| *stop).await;
}
