//! Video decoding, timing and the display-tick frame pump
//!
//! Provides video file decoding using FFmpeg via the `ffmpeg-next` crate.
//! Decoded frames are NV12 pixel buffers stamped with media time, pulled by
//! the [`FrameSource`] once per display tick.

pub mod clock;
mod decoder;
mod frame;
mod media;
pub mod orientation;
mod player;
mod source;
pub mod time;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{DisplayClock, MediaClock, TickDecision, TickScheduler};
pub use decoder::{parse_display_matrix, MediaInfo, VideoDecoder, VideoDecoderError};
pub use frame::{FrameSize, PixelFormat, PixelFrame, Plane};
pub use media::{DecoderNotification, DecoderStatus, MediaDecoder, SeekTolerance};
pub use orientation::{orientation_matrix, render_size, AffineTransform, FrameOrientation};
pub use player::ThreadedDecoder;
pub use source::{FrameSource, PixelBufferConsumer, PulledFrame};
pub use time::{millis_from_time, HostTime, MediaTime};
