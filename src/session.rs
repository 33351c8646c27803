//! A playback session: decoder, controller, frame pump and graph together
//!
//! The host calls [`PlaybackSession::on_display_tick`] once per display
//! refresh (or per scheduler tick when headless). Everything runs on that
//! thread; the decoder's own worker only talks to it through the decoder.

use std::time::Instant;

use crate::error::PlayerError;
use crate::playback::{EventSink, PlaybackController, PlayerControl, PlayerState};
use crate::render::VideoInput;
use crate::telemetry::{FrameProfiler, FrameStats};
use crate::video::{FrameSource, HostTime, MediaDecoder};

pub struct PlaybackSession<D: MediaDecoder> {
    controller: PlaybackController<D>,
    source: FrameSource<VideoInput>,
    profiler: FrameProfiler,
    orientation_applied: bool,
}

impl<D: MediaDecoder> PlaybackSession<D> {
    pub fn new(decoder: D, input: VideoInput, sink: EventSink) -> Self {
        Self {
            controller: PlaybackController::new(decoder, sink),
            source: FrameSource::new(input),
            profiler: FrameProfiler::new(),
            orientation_applied: false,
        }
    }

    pub fn controller(&self) -> &PlaybackController<D> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut PlaybackController<D> {
        &mut self.controller
    }

    pub fn input(&self) -> &VideoInput {
        self.source.consumer()
    }

    /// Graph and conversion access for rewiring between ticks
    pub fn input_mut(&mut self) -> &mut VideoInput {
        self.source.consumer_mut()
    }

    pub fn state(&self) -> PlayerState {
        self.controller.state()
    }

    pub fn is_closed(&self) -> bool {
        self.controller.is_closed()
    }

    pub fn frames_delivered(&self) -> u64 {
        self.source.frames_pulled()
    }

    pub fn stats(&self) -> FrameStats {
        self.profiler.stats()
    }

    /// Run one display tick
    ///
    /// Returns the timestamp in milliseconds of the frame pushed through the
    /// graph, if one was due.
    pub fn on_display_tick(&mut self, host_time: HostTime) -> Option<i64> {
        if self.controller.is_closed() {
            return None;
        }
        self.controller.pump_notifications();

        if !self.orientation_applied {
            if let Some(orientation) = self.controller.orientation() {
                self.source.consumer_mut().set_orientation(orientation);
                self.orientation_applied = true;
            }
        }

        if !self.controller.clock().should_tick() {
            return None;
        }
        let decoder = self.controller.decoder_mut()?;

        self.profiler.begin_tick(Instant::now());
        let result = self.source.pump(decoder, host_time);
        let now = Instant::now();
        self.profiler.end_tick(now, matches!(result, Ok(Some(_))));
        if let Some(stats) = self.profiler.take_report(now) {
            tracing::debug!(
                avg_ms = stats.avg_ms,
                p95_ms = stats.p95_ms,
                fps = stats.delivered_fps,
                "Session: tick timing"
            );
        }

        match result {
            Ok(delivered) => delivered,
            Err(e) if e.is_fatal() => {
                self.controller.fail(e.to_string());
                None
            }
            Err(e) => {
                tracing::warn!("Session: dropped frame: {}", e);
                None
            }
        }
    }
}

impl<D: MediaDecoder> PlayerControl for PlaybackSession<D> {
    fn play(&mut self) {
        self.controller.play();
    }

    fn pause(&mut self) {
        self.controller.pause();
    }

    fn position(&self) -> i64 {
        self.controller.position()
    }

    fn duration(&self) -> i64 {
        self.controller.duration()
    }

    fn seek_to(&mut self, millis: i64) {
        self.controller.seek_to(millis);
        self.source.reset_cursor();
    }

    fn set_is_looping(&mut self, is_looping: bool) {
        self.controller.set_is_looping(is_looping);
    }

    fn set_volume(&mut self, volume: f64) {
        self.controller.set_volume(volume);
    }

    fn set_playback_speed(&mut self, speed: f64) -> Result<(), PlayerError> {
        self.controller.set_playback_speed(speed)
    }

    fn set_mix_with_others(&mut self, mix_with_others: bool) {
        self.controller.set_mix_with_others(mix_with_others);
    }

    fn close(&mut self) {
        self.controller.close();
    }
}
