//! Recording sink
//!
//! Keeps a log of what reached the end of a chain. Used by the headless
//! runner to report results and by tests to observe delivery.

use std::sync::{Arc, Mutex, PoisonError};

use super::operators::FrameConsumer;
use crate::render::RenderFramebuffer;
use crate::video::FrameSize;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedFrame {
    pub millis: i64,
    pub size: FrameSize,
    /// Render size after orientation is applied
    pub display_size: FrameSize,
    /// First pixel, when the frame is CPU-resident
    pub first_pixel: Option<[u8; 4]>,
}

/// Shared view of everything a [`FrameRecorder`] has seen
pub type FrameLog = Arc<Mutex<Vec<RecordedFrame>>>;

pub struct FrameRecorder {
    name: String,
    frames: FrameLog,
    limit: Option<usize>,
}

impl FrameRecorder {
    /// Create a recorder and the log it appends to
    pub fn new(name: impl Into<String>) -> (Self, FrameLog) {
        let frames: FrameLog = Arc::new(Mutex::new(Vec::new()));
        let recorder = Self {
            name: name.into(),
            frames: Arc::clone(&frames),
            limit: None,
        };
        (recorder, frames)
    }

    /// Keep only the most recent `limit` frames
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit.max(1));
        self
    }
}

impl FrameConsumer for FrameRecorder {
    fn label(&self) -> &str {
        &self.name
    }

    fn present(&mut self, framebuffer: &RenderFramebuffer) {
        let first_pixel = framebuffer
            .pixels()
            .and_then(|p| p.get(..4))
            .map(|p| [p[0], p[1], p[2], p[3]]);
        let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        frames.push(RecordedFrame {
            millis: framebuffer.millis(),
            size: framebuffer.size,
            display_size: framebuffer.orientation.render_size(),
            first_pixel,
        });
        if let Some(limit) = self.limit {
            if frames.len() > limit {
                let excess = frames.len() - limit;
                frames.drain(..excess);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::MediaTime;

    #[test]
    fn test_recorder_keeps_latest_frames() {
        let (recorder, log) = FrameRecorder::new("rec");
        let mut recorder = recorder.with_limit(2);
        for ms in [0, 33, 66] {
            let fb = RenderFramebuffer::from_pixels(FrameSize::new(1, 1), MediaTime::from_millis(ms), vec![9, 8, 7, 255]);
            recorder.present(&fb);
        }
        let frames = log.lock().unwrap();
        assert_eq!(frames.iter().map(|f| f.millis).collect::<Vec<_>>(), vec![33, 66]);
        assert_eq!(frames[0].first_pixel, Some([9, 8, 7, 255]));
    }
}
