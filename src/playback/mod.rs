//! Playback control
//!
//! - `controller` - state machine driving the decoder and the display clock
//! - `events` - the event surface reported to the host

mod controller;
mod events;

pub use controller::{PlaybackController, PlaybackState, PlayerControl, PlayerState};
pub use events::{logging_sink, EventSink, PlayerEvent};
