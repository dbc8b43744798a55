// Shared fakes for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use facial_emotion::emotion::EmotionModel;
use facial_emotion::error::Result;
use facial_emotion::locator::FaceLocator;
use facial_emotion::models::{BoundingBox, Frame};
use facial_emotion::preprocess::NormalizedTensor;
use facial_emotion::source::FrameSource;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};

pub const REFERENCE_SCORES: [f32; 7] = [0.1, 0.05, 0.2, 0.15, 0.3, 0.1, 0.1];

pub fn gray_frame(width: u32, height: u32) -> Frame {
    Frame::new(vec![128; (width * height * 3) as usize], width, height)
}

/// Yields a fixed number of frames, then reports "not ready" forever
pub struct FiniteFrames {
    frame: Frame,
    remaining: usize,
}

impl FiniteFrames {
    pub fn new(frame: Frame, count: usize) -> Self {
        Self {
            frame,
            remaining: count,
        }
    }
}

impl FrameSource for FiniteFrames {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(self.frame.clone()))
    }

    fn close(&mut self) {}
}

/// Always reports the same face, or none
pub struct FixedLocator {
    pub face: Option<BoundingBox>,
    pub calls: AtomicUsize,
}

impl FixedLocator {
    pub fn new(face: Option<BoundingBox>) -> Arc<Self> {
        Arc::new(Self {
            face,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl FaceLocator for FixedLocator {
    async fn locate(&self, _frame: &Frame) -> Result<Option<BoundingBox>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.face)
    }
}

/// Holds a classification until the test releases it
pub struct Gate {
    entered: Mutex<mpsc::Sender<()>>,
    release: Arc<Notify>,
}

/// Returns fixed scores and records how it was called
pub struct ScriptedModel {
    pub scores: Vec<f32>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    delay: Duration,
    gate: Option<Gate>,
}

impl ScriptedModel {
    pub fn new(scores: &[f32]) -> Self {
        Self {
            scores: scores.to_vec(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay: Duration::ZERO,
            gate: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every call signals `entered` and then waits for `release`
    pub fn gated(mut self) -> (Self, mpsc::Receiver<()>, Arc<Notify>) {
        let (tx, rx) = mpsc::channel();
        let release = Arc::new(Notify::new());
        self.gate = Some(Gate {
            entered: Mutex::new(tx),
            release: release.clone(),
        });
        (self, rx, release)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmotionModel for ScriptedModel {
    async fn scores(&self, _input: &NormalizedTensor) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(entered) = gate.entered.lock() {
                let _ = entered.send(());
            }
            gate.release.notified().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self.scores.clone())
    }
}

/// Polls a watch channel until `pred` holds or the timeout passes
pub fn wait_until<T>(rx: &watch::Receiver<T>, timeout: Duration, pred: impl Fn(&T) -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred(&rx.borrow()) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    pred(&rx.borrow())
}
