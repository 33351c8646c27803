//! Display-tick frame pump
//!
//! On every display tick the [`FrameSource`] asks the decoder whether a frame
//! is due at the tick's host time and, if so, extracts exactly one frame and
//! hands it to the pixel-buffer consumer it owns. A tick with nothing due is a
//! no-op; the pump never waits on the decoder.

use super::time::{HostTime, MediaTime};
use super::{DecoderStatus, MediaDecoder, PixelFrame};
use crate::error::PlayerError;

/// Receives each extracted pixel buffer
///
/// The consumer takes ownership of the frame and must drop it once the frame
/// has been converted.
pub trait PixelBufferConsumer {
    fn new_pixel_buffer_available(&mut self, frame: PixelFrame) -> Result<(), PlayerError>;
}

/// A frame extracted for one display tick
#[derive(Debug)]
pub struct PulledFrame {
    pub frame: PixelFrame,
    /// Presentation timestamp in whole milliseconds
    pub millis: i64,
    /// Decoder item time the frame was pulled for
    pub item_time: MediaTime,
}

/// Pulls decoded frames on display ticks and forwards them to its consumer
pub struct FrameSource<C: PixelBufferConsumer> {
    consumer: C,
    last_sequence: Option<u64>,
    frames_pulled: u64,
}

impl<C: PixelBufferConsumer> FrameSource<C> {
    pub fn new(consumer: C) -> Self {
        Self {
            consumer,
            last_sequence: None,
            frames_pulled: 0,
        }
    }

    /// Extract the frame due at `host_time`, if there is one
    ///
    /// Never blocks. Returns `None` when the decoder is not ready, when no
    /// frame is due, or when the decoder offers the frame already pulled.
    pub fn try_pull_frame(&mut self, decoder: &mut dyn MediaDecoder, host_time: HostTime) -> Option<PulledFrame> {
        if decoder.status() != DecoderStatus::ReadyToPlay {
            return None;
        }

        let item_time = decoder.item_time(host_time);
        if !decoder.has_new_frame(item_time) {
            return None;
        }

        let frame = decoder.copy_frame(item_time)?;
        if self.last_sequence == Some(frame.sequence) {
            return None;
        }
        self.last_sequence = Some(frame.sequence);
        self.frames_pulled += 1;

        let millis = frame.millis();
        Some(PulledFrame {
            frame,
            millis,
            item_time,
        })
    }

    /// Pull one frame and deliver it to the consumer
    ///
    /// Returns the delivered frame's timestamp in milliseconds.
    pub fn pump(&mut self, decoder: &mut dyn MediaDecoder, host_time: HostTime) -> Result<Option<i64>, PlayerError> {
        let Some(pulled) = self.try_pull_frame(decoder, host_time) else {
            return Ok(None);
        };
        tracing::trace!(
            millis = pulled.millis,
            sequence = pulled.frame.sequence,
            item_ms = pulled.item_time.millis(),
            "FrameSource: pulled frame"
        );
        self.consumer.new_pixel_buffer_available(pulled.frame)?;
        Ok(Some(pulled.millis))
    }

    /// Forget the last pulled frame (after a seek the decoder may legitimately
    /// restart its output)
    pub fn reset_cursor(&mut self) {
        self.last_sequence = None;
    }

    pub fn frames_pulled(&self) -> u64 {
        self.frames_pulled
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    pub fn consumer_mut(&mut self) -> &mut C {
        &mut self.consumer
    }
}
