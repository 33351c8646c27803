//! The decoder boundary consumed by the playback pipeline
//!
//! Anything that can open a media source and hand out decoded NV12 frames for
//! a given host time implements [`MediaDecoder`]. Status changes and buffering
//! events are reported as typed [`DecoderNotification`]s, drained on the
//! pipeline thread through [`MediaDecoder::poll_notification`].

use super::orientation::AffineTransform;
use super::time::{HostTime, MediaTime};
use super::{FrameSize, PixelFrame};

/// Readiness of the decoder
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DecoderStatus {
    #[default]
    Unknown,
    /// Loading failed; the message is surfaced to the host
    Failed(String),
    ReadyToPlay,
}

/// How far a seek may land from the requested time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeekTolerance {
    /// Land exactly on the target, decoding and discarding frames before it
    #[default]
    Exact,
    /// Land on the nearest preceding keyframe
    Keyframe,
}

/// Typed state changes reported by a decoder
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderNotification {
    StatusChanged(DecoderStatus),
    /// The output queue ran dry while playing
    BufferEmpty,
    /// Enough frames are queued for playback to continue
    LikelyToKeepUp,
    /// The output queue reached capacity
    BufferFull,
    /// Decoded-ahead ranges as `(start, end)` pairs
    LoadedRanges(Vec<(MediaTime, MediaTime)>),
    /// Presentation reached the last frame
    PlayedToEnd,
}

/// A media source that yields planar frames on demand
pub trait MediaDecoder: Send {
    fn status(&self) -> DecoderStatus;

    /// Total duration, zero while unknown
    fn duration(&self) -> MediaTime;

    /// Natural (unrotated) size of the video track
    fn presentation_size(&self) -> FrameSize;

    /// Display matrix stored in the container
    fn preferred_transform(&self) -> AffineTransform {
        AffineTransform::IDENTITY
    }

    fn can_play_fast_forward(&self) -> bool;

    fn can_play_slow_forward(&self) -> bool;

    /// Media time that should be on screen at `host_time`
    fn item_time(&self, host_time: HostTime) -> MediaTime;

    /// Whether an unconsumed frame is due at `item_time`
    fn has_new_frame(&mut self, item_time: MediaTime) -> bool;

    /// Take the newest frame due at `item_time`, discarding older late ones
    fn copy_frame(&mut self, item_time: MediaTime) -> Option<PixelFrame>;

    /// Current playback position
    fn current_time(&self) -> MediaTime;

    fn seek(&mut self, time: MediaTime, tolerance: SeekTolerance);

    fn play(&mut self);

    fn pause(&mut self);

    fn set_rate(&mut self, rate: f32);

    fn set_volume(&mut self, volume: f32);

    fn set_mix_with_others(&mut self, mix: bool);

    /// Next pending notification, if any (non-blocking)
    fn poll_notification(&mut self) -> Option<DecoderNotification>;

    /// Release decoding resources; the decoder is unusable afterwards
    fn close(&mut self);
}
