//! Playback clock controller
//!
//! Owns the decoder and the display clock. Every decoder notification goes
//! through [`PlaybackController::handle_notification`], the single place where
//! playback state changes in response to the decoder. Host commands come in
//! through [`PlayerControl`].

use super::events::{EventSink, PlayerEvent};
use crate::error::PlayerError;
use crate::video::{
    DecoderNotification, DecoderStatus, DisplayClock, FrameOrientation, MediaDecoder, MediaTime, SeekTolerance,
};

/// Lifecycle of a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Uninitialized,
    Ready,
    Playing,
    Paused,
    /// Terminal
    Closed,
}

/// Flags mutated only by the controller
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub is_looping: bool,
    pub is_initialized: bool,
    pub rate: f32,
    pub volume: f32,
    pub mix_with_others: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            is_looping: false,
            is_initialized: false,
            rate: 1.0,
            volume: 1.0,
            mix_with_others: false,
        }
    }
}

/// Host-facing playback controls
pub trait PlayerControl {
    fn play(&mut self);
    fn pause(&mut self);
    /// Current position in milliseconds
    fn position(&self) -> i64;
    /// Total duration in milliseconds
    fn duration(&self) -> i64;
    /// Exact seek to `millis`
    fn seek_to(&mut self, millis: i64);
    fn set_is_looping(&mut self, is_looping: bool);
    fn set_volume(&mut self, volume: f64);
    /// Change the rate; rejected rates are also reported as `VideoError`
    fn set_playback_speed(&mut self, speed: f64) -> Result<(), PlayerError>;
    fn set_mix_with_others(&mut self, mix_with_others: bool);
    fn close(&mut self);
}

pub struct PlaybackController<D: MediaDecoder> {
    decoder: Option<D>,
    clock: DisplayClock,
    sink: EventSink,
    state: PlaybackState,
    paused: bool,
    orientation: Option<FrameOrientation>,
}

impl<D: MediaDecoder> PlaybackController<D> {
    pub fn new(decoder: D, sink: EventSink) -> Self {
        Self {
            decoder: Some(decoder),
            clock: DisplayClock::new(),
            sink,
            state: PlaybackState::default(),
            paused: false,
            orientation: None,
        }
    }

    pub fn state(&self) -> PlayerState {
        if self.decoder.is_none() {
            PlayerState::Closed
        } else if !self.state.is_initialized {
            PlayerState::Uninitialized
        } else if self.state.is_playing {
            PlayerState::Playing
        } else if self.paused {
            PlayerState::Paused
        } else {
            PlayerState::Ready
        }
    }

    pub fn playback_state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn is_closed(&self) -> bool {
        self.decoder.is_none()
    }

    /// Gate consulted by the frame pump on every tick
    pub fn clock(&self) -> &DisplayClock {
        &self.clock
    }

    /// Display orientation, known once initialized
    pub fn orientation(&self) -> Option<FrameOrientation> {
        self.orientation
    }

    pub fn decoder(&self) -> Option<&D> {
        self.decoder.as_ref()
    }

    pub fn decoder_mut(&mut self) -> Option<&mut D> {
        self.decoder.as_mut()
    }

    fn emit(&mut self, event: PlayerEvent) {
        tracing::debug!("Controller: emitting {:?}", event);
        (self.sink)(event);
    }

    fn emit_error(&mut self, error: &PlayerError) {
        self.emit(PlayerEvent::VideoError {
            message: error.to_string(),
        });
    }

    /// Drain and handle every pending decoder notification
    pub fn pump_notifications(&mut self) {
        while let Some(notification) = self.decoder.as_mut().and_then(|d| d.poll_notification()) {
            self.handle_notification(notification);
        }
    }

    /// Apply one decoder notification
    pub fn handle_notification(&mut self, notification: DecoderNotification) {
        if self.is_closed() {
            return;
        }
        match notification {
            DecoderNotification::StatusChanged(DecoderStatus::Failed(message)) => {
                tracing::error!("Controller: decoder failed: {}", message);
                self.emit_error(&PlayerError::DecoderFailure(message));
                // A failed decoder cannot recover within this session
                self.close();
            }
            DecoderNotification::StatusChanged(DecoderStatus::ReadyToPlay) => {
                self.send_initialized();
                self.update_playing_state();
            }
            DecoderNotification::StatusChanged(DecoderStatus::Unknown) => {}
            DecoderNotification::LikelyToKeepUp => {
                self.update_playing_state();
                self.emit(PlayerEvent::BufferingEnd);
            }
            DecoderNotification::BufferEmpty => self.emit(PlayerEvent::BufferingStart),
            DecoderNotification::BufferFull => self.emit(PlayerEvent::BufferingEnd),
            DecoderNotification::LoadedRanges(ranges) => {
                let values = ranges
                    .iter()
                    .map(|(start, end)| [start.millis(), end.millis()])
                    .collect();
                self.emit(PlayerEvent::BufferingUpdate { values });
            }
            DecoderNotification::PlayedToEnd => {
                if self.state.is_looping {
                    tracing::debug!("Controller: looping to start");
                    if let Some(decoder) = self.decoder.as_mut() {
                        decoder.seek(MediaTime::ZERO, SeekTolerance::Exact);
                    }
                }
            }
        }
    }

    /// Emit `initialized` the first time size and duration are both known
    fn send_initialized(&mut self) {
        if self.state.is_initialized {
            return;
        }
        let Some(decoder) = self.decoder.as_ref() else {
            return;
        };

        let natural = decoder.presentation_size();
        // Not loaded yet
        if natural.is_empty() {
            return;
        }
        // Loaded, but duration still unknown
        let duration = decoder.duration().millis();
        if duration == 0 {
            return;
        }

        let orientation = FrameOrientation::from_preferred(decoder.preferred_transform(), natural);
        let display_size = orientation.render_size();
        tracing::info!(
            "Controller: initialized {} ({}°) {} ms",
            display_size,
            orientation.rotation_degrees(),
            duration
        );

        self.orientation = Some(orientation);
        self.state.is_initialized = true;
        self.emit(PlayerEvent::Initialized {
            duration,
            width: display_size.width,
            height: display_size.height,
        });
    }

    /// Push the requested play/pause state to the decoder and the clock
    fn update_playing_state(&mut self) {
        if !self.state.is_initialized {
            return;
        }
        let playing = self.state.is_playing;
        if let Some(decoder) = self.decoder.as_mut() {
            if playing {
                decoder.play();
            } else {
                decoder.pause();
            }
        }
        self.clock.set_paused(!playing);
    }

    /// Report a fatal pipeline error and shut the session down
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.is_closed() {
            return;
        }
        let message = message.into();
        tracing::error!("Controller: fatal error: {}", message);
        self.emit(PlayerEvent::VideoError { message });
        self.close();
    }
}

impl<D: MediaDecoder> PlayerControl for PlaybackController<D> {
    fn play(&mut self) {
        if self.is_closed() {
            return;
        }
        self.state.is_playing = true;
        self.paused = false;
        self.update_playing_state();
    }

    fn pause(&mut self) {
        if self.is_closed() {
            return;
        }
        self.state.is_playing = false;
        self.paused = true;
        self.update_playing_state();
    }

    fn position(&self) -> i64 {
        self.decoder.as_ref().map_or(0, |d| d.current_time().millis())
    }

    fn duration(&self) -> i64 {
        self.decoder.as_ref().map_or(0, |d| d.duration().millis())
    }

    fn seek_to(&mut self, millis: i64) {
        if !self.state.is_initialized {
            tracing::debug!("Controller: ignoring seek to {} ms before initialization", millis);
            return;
        }
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.seek(MediaTime::from_millis(millis), SeekTolerance::Exact);
        }
    }

    fn set_is_looping(&mut self, is_looping: bool) {
        self.state.is_looping = is_looping;
    }

    fn set_volume(&mut self, volume: f64) {
        let volume = volume.clamp(0.0, 1.0) as f32;
        self.state.volume = volume;
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.set_volume(volume);
        }
    }

    fn set_playback_speed(&mut self, speed: f64) -> Result<(), PlayerError> {
        let Some(decoder) = self.decoder.as_ref() else {
            return Err(PlayerError::Closed);
        };

        let rejection = if !speed.is_finite() || speed <= 0.0 {
            Some("Playback speed must be a positive number")
        } else if speed > 2.0 && !decoder.can_play_fast_forward() {
            Some("Video cannot be fast-forwarded beyond 2.0x")
        } else if speed < 1.0 && !decoder.can_play_slow_forward() {
            Some("Video cannot be slow-forwarded")
        } else {
            None
        };
        if let Some(message) = rejection {
            let error = PlayerError::UnsupportedRate(message.to_string());
            self.emit_error(&error);
            return Err(error);
        }

        self.state.rate = speed as f32;
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.set_rate(speed as f32);
        }
        Ok(())
    }

    fn set_mix_with_others(&mut self, mix_with_others: bool) {
        self.state.mix_with_others = mix_with_others;
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.set_mix_with_others(mix_with_others);
        }
    }

    fn close(&mut self) {
        // The clock stops before the decoder goes away
        self.clock.invalidate();
        let Some(mut decoder) = self.decoder.take() else {
            return;
        };
        self.state.is_playing = false;
        decoder.close();
        tracing::info!("Controller: closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::testing::{DecoderLog, ScriptedDecoder};
    use crate::video::{AffineTransform, FrameSize};
    use std::sync::{Arc, Mutex};

    type Events = Arc<Mutex<Vec<PlayerEvent>>>;

    fn controller_with(decoder: ScriptedDecoder) -> (PlaybackController<ScriptedDecoder>, Events, Arc<Mutex<DecoderLog>>) {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&events);
        let log = decoder.log();
        let controller = PlaybackController::new(decoder, Box::new(move |e| captured.lock().unwrap().push(e)));
        (controller, events, log)
    }

    fn controller() -> (PlaybackController<ScriptedDecoder>, Events, Arc<Mutex<DecoderLog>>) {
        controller_with(ScriptedDecoder::new(FrameSize::new(640, 360), MediaTime::from_millis(10_000)))
    }

    fn ready(controller: &mut PlaybackController<ScriptedDecoder>) {
        controller
            .decoder_mut()
            .unwrap()
            .notify(DecoderNotification::StatusChanged(DecoderStatus::ReadyToPlay));
        controller.pump_notifications();
    }

    #[test]
    fn test_initialized_is_sent_once() {
        let (mut controller, events, _) = controller();
        assert_eq!(controller.state(), PlayerState::Uninitialized);
        ready(&mut controller);
        ready(&mut controller);

        assert_eq!(
            *events.lock().unwrap(),
            vec![PlayerEvent::Initialized {
                duration: 10_000,
                width: 640,
                height: 360
            }]
        );
        assert_eq!(controller.state(), PlayerState::Ready);
    }

    #[test]
    fn test_initialized_waits_for_size_and_duration() {
        let (mut controller, events, _) =
            controller_with(ScriptedDecoder::new(FrameSize::new(0, 0), MediaTime::ZERO));
        ready(&mut controller);
        assert!(events.lock().unwrap().is_empty());

        controller.decoder_mut().unwrap().set_size(FrameSize::new(320, 240));
        ready(&mut controller);
        assert!(events.lock().unwrap().is_empty());

        controller.decoder_mut().unwrap().set_duration(MediaTime::from_millis(500));
        ready(&mut controller);
        assert_eq!(events.lock().unwrap().len(), 1);
        assert!(controller.playback_state().is_initialized);
    }

    #[test]
    fn test_initialized_reports_rotated_size() {
        let mut decoder = ScriptedDecoder::new(FrameSize::new(1920, 1080), MediaTime::from_millis(3_000));
        decoder.set_transform(AffineTransform::rotation(90.0));
        let (mut controller, events, _) = controller_with(decoder);
        ready(&mut controller);

        assert_eq!(
            events.lock().unwrap()[0],
            PlayerEvent::Initialized {
                duration: 3_000,
                width: 1080,
                height: 1920
            }
        );
        assert_eq!(controller.orientation().unwrap().rotation_degrees(), 90);
    }

    #[test]
    fn test_play_before_ready_starts_on_ready() {
        let (mut controller, _, log) = controller();
        controller.play();
        assert!(controller.clock().is_paused());
        assert!(!log.lock().unwrap().playing);

        ready(&mut controller);
        assert!(!controller.clock().is_paused());
        assert!(log.lock().unwrap().playing);
        assert_eq!(controller.state(), PlayerState::Playing);
    }

    #[test]
    fn test_pause_stops_clock() {
        let (mut controller, _, log) = controller();
        ready(&mut controller);
        controller.play();
        assert!(controller.clock().should_tick());

        controller.pause();
        assert!(!controller.clock().should_tick());
        assert!(!log.lock().unwrap().playing);
        assert_eq!(controller.state(), PlayerState::Paused);

        controller.play();
        assert_eq!(controller.state(), PlayerState::Playing);
    }

    #[test]
    fn test_playback_speed_rejections() {
        let mut decoder = ScriptedDecoder::new(FrameSize::new(640, 360), MediaTime::from_millis(1_000));
        decoder.set_capabilities(false, false);
        let (mut controller, events, log) = controller_with(decoder);

        assert!(matches!(controller.set_playback_speed(3.0), Err(PlayerError::UnsupportedRate(_))));
        assert!(controller.set_playback_speed(0.5).is_err());
        assert!(controller.set_playback_speed(1.5).is_ok());

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                PlayerEvent::VideoError {
                    message: "Video cannot be fast-forwarded beyond 2.0x".into()
                },
                PlayerEvent::VideoError {
                    message: "Video cannot be slow-forwarded".into()
                },
            ]
        );
        assert_eq!(log.lock().unwrap().rates, vec![1.5]);
        assert_eq!(controller.playback_state().rate, 1.5);
    }

    #[test]
    fn test_playback_speed_boundaries_are_accepted() {
        let mut decoder = ScriptedDecoder::new(FrameSize::new(640, 360), MediaTime::from_millis(1_000));
        decoder.set_capabilities(false, false);
        let (mut controller, events, log) = controller_with(decoder);

        assert!(controller.set_playback_speed(2.0).is_ok());
        assert!(controller.set_playback_speed(1.0).is_ok());
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(log.lock().unwrap().rates, vec![2.0, 1.0]);
    }

    #[test]
    fn test_playback_speed_must_be_positive_and_finite() {
        let (mut controller, events, log) = controller();
        for speed in [f64::NAN, f64::INFINITY, 0.0, -1.0] {
            assert!(matches!(controller.set_playback_speed(speed), Err(PlayerError::UnsupportedRate(_))));
        }

        assert_eq!(events.lock().unwrap().len(), 4);
        assert!(log.lock().unwrap().rates.is_empty());
        assert_eq!(controller.playback_state().rate, 1.0);
    }

    #[test]
    fn test_fast_forward_allowed_when_supported() {
        let (mut controller, events, log) = controller();
        controller.set_playback_speed(4.0).unwrap();
        controller.set_playback_speed(0.25).unwrap();
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(log.lock().unwrap().rates, vec![4.0, 0.25]);
    }

    #[test]
    fn test_volume_is_clamped() {
        let (mut controller, _, log) = controller();
        controller.set_volume(1.7);
        assert_eq!(log.lock().unwrap().volume, Some(1.0));
        controller.set_volume(-0.3);
        assert_eq!(log.lock().unwrap().volume, Some(0.0));
        assert_eq!(controller.playback_state().volume, 0.0);
    }

    #[test]
    fn test_close_is_idempotent_and_stops_clock() {
        let (mut controller, _, log) = controller();
        ready(&mut controller);
        controller.play();
        controller.close();
        controller.close();

        assert_eq!(controller.state(), PlayerState::Closed);
        assert!(controller.clock().is_invalidated());
        assert!(!controller.clock().should_tick());
        assert!(log.lock().unwrap().closed);

        controller.play();
        assert!(!controller.clock().should_tick());
        assert_eq!(controller.position(), 0);
        assert_eq!(controller.duration(), 0);
    }

    #[test]
    fn test_close_from_uninitialized() {
        let (mut controller, _, _) = controller();
        controller.close();
        assert_eq!(controller.state(), PlayerState::Closed);
        assert!(controller.clock().is_invalidated());
    }

    #[test]
    fn test_failed_status_reports_error_and_closes() {
        let (mut controller, events, log) = controller();
        controller.play();
        controller
            .decoder_mut()
            .unwrap()
            .notify(DecoderNotification::StatusChanged(DecoderStatus::Failed("no video stream".into())));
        controller.pump_notifications();

        assert_eq!(
            *events.lock().unwrap(),
            vec![PlayerEvent::VideoError {
                message: "Failed to load video: no video stream".into()
            }]
        );
        assert_eq!(controller.state(), PlayerState::Closed);
        assert!(controller.clock().is_invalidated());
        assert!(log.lock().unwrap().closed);

        // Later notifications are ignored
        controller.handle_notification(DecoderNotification::BufferEmpty);
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_buffering_notifications() {
        let (mut controller, events, _) = controller();
        controller.handle_notification(DecoderNotification::BufferEmpty);
        controller.handle_notification(DecoderNotification::LikelyToKeepUp);
        controller.handle_notification(DecoderNotification::BufferFull);
        controller.handle_notification(DecoderNotification::LoadedRanges(vec![(
            MediaTime::ZERO,
            MediaTime::new(90_000, 90_000),
        )]));

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                PlayerEvent::BufferingStart,
                PlayerEvent::BufferingEnd,
                PlayerEvent::BufferingEnd,
                PlayerEvent::BufferingUpdate { values: vec![[0, 1000]] },
            ]
        );
    }

    #[test]
    fn test_played_to_end_loops_only_when_looping() {
        let (mut controller, _, log) = controller();
        ready(&mut controller);
        controller.handle_notification(DecoderNotification::PlayedToEnd);
        assert!(log.lock().unwrap().seeks.is_empty());

        controller.set_is_looping(true);
        controller.handle_notification(DecoderNotification::PlayedToEnd);
        assert_eq!(log.lock().unwrap().seeks, vec![(MediaTime::ZERO, SeekTolerance::Exact)]);
    }

    #[test]
    fn test_seek_is_exact_and_keeps_state() {
        let (mut controller, _, log) = controller();
        ready(&mut controller);
        controller.pause();
        controller.seek_to(2_500);
        assert_eq!(
            log.lock().unwrap().seeks,
            vec![(MediaTime::from_millis(2_500), SeekTolerance::Exact)]
        );
        assert_eq!(controller.state(), PlayerState::Paused);
        assert_eq!(controller.position(), 2_500);
    }

    #[test]
    fn test_fail_emits_and_closes() {
        let (mut controller, events, _) = controller();
        controller.fail("GPU resource failure: out of memory");
        assert_eq!(controller.state(), PlayerState::Closed);
        assert_eq!(events.lock().unwrap().len(), 1);
    }
}
