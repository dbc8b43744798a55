mod common;

use async_trait::async_trait;
use common::{FixedLocator, ScriptedModel, REFERENCE_SCORES};
use facial_emotion::emotion::EmotionModel;
use facial_emotion::error::{PipelineError, Result};
use facial_emotion::models::{BoundingBox, Emotion, EmotionLabel};
use facial_emotion::pipeline::ModelHub;
use facial_emotion::preprocess::{CropPolicy, NormalizedTensor};
use facial_emotion::still::{StillOutcome, StillSession, CANCELED_WARNING, INVALID_TYPE_WARNING};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::oneshot;

const TIMEOUT: Duration = Duration::from_secs(5);

fn write_png(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(64, 48, Rgb([128, 128, 128]))
        .save(&path)
        .unwrap();
    path
}

fn session(face: Option<BoundingBox>) -> (StillSession, Arc<ScriptedModel>) {
    session_with(face, ScriptedModel::new(&REFERENCE_SCORES))
}

fn session_with(
    face: Option<BoundingBox>,
    model: ScriptedModel,
) -> (StillSession, Arc<ScriptedModel>) {
    let model = Arc::new(model);
    let hub = Arc::new(ModelHub::preloaded(FixedLocator::new(face), model.clone()));
    (StillSession::new(hub, CropPolicy::FullFrame), model)
}

fn face() -> BoundingBox {
    BoundingBox::new((8.0, 8.0), (40.0, 40.0))
}

#[tokio::test]
async fn accepted_image_is_classified_once() {
    let dir = TempDir::new().unwrap();
    let path = write_png(dir.path(), "face.png");
    let (still, model) = session(Some(face()));

    let outcome = still.select(Some(&path)).await.unwrap();
    assert_eq!(
        outcome,
        StillOutcome::Predicted(EmotionLabel::Detected(Emotion::Neutral))
    );
    assert_eq!(model.calls(), 1);

    let display = still.display();
    assert_eq!(display.source.as_deref(), Some(path.as_path()));
    assert_eq!(display.image.as_ref().map(|f| (f.width, f.height)), Some((64, 48)));
    assert_eq!(
        display.prediction,
        Some(EmotionLabel::Detected(Emotion::Neutral))
    );
    assert_eq!(display.face.map(|f| f.x), Some(8.0));
    assert!(!display.loading);
}

#[tokio::test]
async fn no_face_publishes_sentinel() {
    let dir = TempDir::new().unwrap();
    let path = write_png(dir.path(), "empty.PNG");
    let (still, model) = session(None);

    let outcome = still.select(Some(&path)).await.unwrap();
    assert_eq!(outcome, StillOutcome::Predicted(EmotionLabel::NoFace));
    assert_eq!(model.calls(), 0);
    assert_eq!(still.display().prediction, Some(EmotionLabel::NoFace));
}

#[tokio::test]
async fn rejected_type_clears_display_and_warns_once() {
    let dir = TempDir::new().unwrap();
    let good = write_png(dir.path(), "face.png");
    let bad = dir.path().join("notes.gif");
    std::fs::write(&bad, b"GIF89a").unwrap();
    let (still, model) = session(Some(face()));
    let mut warnings = still.warnings();

    still.select(Some(&good)).await.unwrap();
    assert!(still.display().prediction.is_some());

    let outcome = still.select(Some(&bad)).await.unwrap();
    assert_eq!(
        outcome,
        StillOutcome::Rejected(INVALID_TYPE_WARNING.to_string())
    );

    let display = still.display();
    assert!(display.image.is_none());
    assert!(display.prediction.is_none());
    assert!(display.source.is_none());

    assert_eq!(warnings.try_recv().unwrap(), INVALID_TYPE_WARNING);
    assert!(matches!(warnings.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn canceled_dialog_keeps_current_prediction() {
    let dir = TempDir::new().unwrap();
    let good = write_png(dir.path(), "face.jpg");
    let (still, _model) = session(Some(face()));
    let mut warnings = still.warnings();

    still.select(Some(&good)).await.unwrap();
    let outcome = still.select(None).await.unwrap();
    assert_eq!(outcome, StillOutcome::Canceled);

    assert!(still.display().prediction.is_some());
    assert_eq!(warnings.try_recv().unwrap(), CANCELED_WARNING);
    assert!(matches!(warnings.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn undecodable_image_is_rejected() {
    let dir = TempDir::new().unwrap();
    let broken = dir.path().join("broken.jpeg");
    std::fs::write(&broken, b"definitely not a jpeg").unwrap();
    let (still, model) = session(Some(face()));
    let mut warnings = still.warnings();

    let outcome = still.select(Some(&broken)).await.unwrap();
    assert!(matches!(outcome, StillOutcome::Rejected(_)));
    assert!(still.display().image.is_none());
    assert!(warnings.try_recv().is_ok());
    assert!(matches!(warnings.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn clear_removes_image_and_prediction() {
    let dir = TempDir::new().unwrap();
    let good = write_png(dir.path(), "face.png");
    let (still, _model) = session(Some(face()));

    still.select(Some(&good)).await.unwrap();
    still.clear();

    let display = still.display();
    assert!(display.image.is_none());
    assert!(display.prediction.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clear_during_inference_supersedes_the_result() {
    let dir = TempDir::new().unwrap();
    let good = write_png(dir.path(), "face.png");
    let (model, entered, release) = ScriptedModel::new(&REFERENCE_SCORES).gated();
    let (still, model) = session_with(Some(face()), model);

    let pending = {
        let still = still.clone();
        tokio::spawn(async move { still.select(Some(&good)).await })
    };
    tokio::task::spawn_blocking(move || entered.recv_timeout(TIMEOUT))
        .await
        .unwrap()
        .unwrap();
    assert!(still.display().loading);

    still.clear();
    release.notify_one();

    let outcome = pending.await.unwrap().unwrap();
    assert_eq!(outcome, StillOutcome::Superseded);
    assert_eq!(model.calls(), 1);

    let display = still.display();
    assert!(display.image.is_none());
    assert!(display.prediction.is_none());
    assert!(!display.loading);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_file_during_inference_keeps_display_cleared() {
    let dir = TempDir::new().unwrap();
    let good = write_png(dir.path(), "face.png");
    let bad = dir.path().join("notes.txt");
    std::fs::write(&bad, b"hello").unwrap();
    let (model, entered, release) = ScriptedModel::new(&REFERENCE_SCORES).gated();
    let (still, _model) = session_with(Some(face()), model);
    let mut warnings = still.warnings();

    let pending = {
        let still = still.clone();
        tokio::spawn(async move { still.select(Some(&good)).await })
    };
    tokio::task::spawn_blocking(move || entered.recv_timeout(TIMEOUT))
        .await
        .unwrap()
        .unwrap();

    let outcome = still.select(Some(&bad)).await.unwrap();
    assert_eq!(outcome, StillOutcome::Rejected(INVALID_TYPE_WARNING.to_string()));
    release.notify_one();

    assert_eq!(pending.await.unwrap().unwrap(), StillOutcome::Superseded);
    let display = still.display();
    assert!(display.image.is_none());
    assert!(display.prediction.is_none());
    assert_eq!(warnings.try_recv().unwrap(), INVALID_TYPE_WARNING);
    assert!(matches!(warnings.try_recv(), Err(TryRecvError::Empty)));
}

/// Blocks its thread inside `scores` like a synchronous runtime session would
struct BlockingModel {
    entered: Mutex<Option<oneshot::Sender<()>>>,
    release: Mutex<mpsc::Receiver<()>>,
}

#[async_trait]
impl EmotionModel for BlockingModel {
    async fn scores(&self, _input: &NormalizedTensor) -> Result<Vec<f32>> {
        if let Some(entered) = self.entered.lock().unwrap().take() {
            let _ = entered.send(());
        }
        self.release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(2))
            .map_err(|_| PipelineError::Classification("never released".to_string()))?;
        Ok(REFERENCE_SCORES.to_vec())
    }
}

#[tokio::test]
async fn upload_inference_leaves_the_runtime_free() {
    let dir = TempDir::new().unwrap();
    let good = write_png(dir.path(), "face.png");
    let (entered_tx, entered_rx) = oneshot::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let model = Arc::new(BlockingModel {
        entered: Mutex::new(Some(entered_tx)),
        release: Mutex::new(release_rx),
    });
    let hub = Arc::new(ModelHub::preloaded(FixedLocator::new(Some(face())), model));
    let still = StillSession::new(hub, CropPolicy::FullFrame);

    // Only runs if the single runtime thread is not stuck inside the model
    tokio::spawn(async move {
        if entered_rx.await.is_ok() {
            let _ = release_tx.send(());
        }
    });

    let outcome = still.select(Some(&good)).await.unwrap();
    assert_eq!(
        outcome,
        StillOutcome::Predicted(EmotionLabel::Detected(Emotion::Neutral))
    );
}
