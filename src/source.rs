// Frame sources for the live pipeline

use crate::error::Result;
use crate::models::Frame;
use std::sync::Arc;

/// Supplies frames to the sampling loop.
///
/// Sources are created and used on the sampling thread only, so they need not be `Send`.
pub trait FrameSource {
    /// Starts the feed
    fn open(&mut self) -> Result<()>;

    /// Current frame, or `None` while the feed is not ready yet
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Stops the feed
    fn close(&mut self);
}

/// Builds a source on the sampling thread
pub type SourceFactory = Arc<dyn Fn() -> Result<Box<dyn FrameSource>> + Send + Sync>;

/// Replays a fixed list of frames in a loop
pub struct StillFrames {
    frames: Vec<Frame>,
    position: usize,
    warmup: usize,
}

impl StillFrames {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            position: 0,
            warmup: 0,
        }
    }

    /// Reports "not ready" for the first `ticks` pulls, like a camera warming up
    pub fn with_warmup(mut self, ticks: usize) -> Self {
        self.warmup = ticks;
        self
    }
}

impl FrameSource for StillFrames {
    fn open(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.warmup > 0 {
            self.warmup -= 1;
            return Ok(None);
        }
        if self.frames.is_empty() {
            return Ok(None);
        }
        let frame = self.frames[self.position % self.frames.len()].clone();
        self.position += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn still_frames_loop_after_warmup() {
        let a = Frame::new(vec![1; 3], 1, 1);
        let b = Frame::new(vec![2; 3], 1, 1);
        let mut source = StillFrames::new(vec![a, b]).with_warmup(1);
        source.open().unwrap();

        assert!(source.next_frame().unwrap().is_none());
        let values: Vec<u8> = (0..3)
            .map(|_| source.next_frame().unwrap().unwrap().data[0])
            .collect();
        assert_eq!(values, vec![1, 2, 1]);
    }

    #[test]
    fn empty_source_is_never_ready() {
        let mut source = StillFrames::new(Vec::new());
        assert!(source.next_frame().unwrap().is_none());
    }
}
