//! Scripted decoder used by pipeline and controller tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::orientation::AffineTransform;
use super::time::{HostTime, MediaTime};
use super::{DecoderNotification, DecoderStatus, FrameSize, MediaDecoder, PixelFrame, SeekTolerance};

/// Calls recorded by a [`ScriptedDecoder`], readable after the decoder moved
#[derive(Debug, Default)]
pub struct DecoderLog {
    pub seeks: Vec<(MediaTime, SeekTolerance)>,
    pub rates: Vec<f32>,
    pub volume: Option<f32>,
    pub mix_with_others: Option<bool>,
    pub playing: bool,
    pub play_calls: usize,
    pub closed: bool,
}

/// In-memory [`MediaDecoder`] driven entirely by the test
pub struct ScriptedDecoder {
    status: DecoderStatus,
    size: FrameSize,
    duration: MediaTime,
    transform: AffineTransform,
    item_time: MediaTime,
    frames: VecDeque<PixelFrame>,
    last: Option<PixelFrame>,
    repeat_last: bool,
    next_sequence: u64,
    notifications: VecDeque<DecoderNotification>,
    can_fast_forward: bool,
    can_slow_forward: bool,
    log: Arc<Mutex<DecoderLog>>,
}

impl ScriptedDecoder {
    pub fn new(size: FrameSize, duration: MediaTime) -> Self {
        Self {
            status: DecoderStatus::Unknown,
            size,
            duration,
            transform: AffineTransform::IDENTITY,
            item_time: MediaTime::ZERO,
            frames: VecDeque::new(),
            last: None,
            repeat_last: false,
            next_sequence: 0,
            notifications: VecDeque::new(),
            can_fast_forward: true,
            can_slow_forward: true,
            log: Arc::new(Mutex::new(DecoderLog::default())),
        }
    }

    /// Switch to ready without queuing a notification
    pub fn make_ready(&mut self) {
        self.status = DecoderStatus::ReadyToPlay;
    }

    /// Queue a notification; status changes also update `status()`
    pub fn notify(&mut self, notification: DecoderNotification) {
        if let DecoderNotification::StatusChanged(status) = &notification {
            self.status = status.clone();
        }
        self.notifications.push_back(notification);
    }

    pub fn push_frame(&mut self, timestamp: MediaTime) {
        self.push_frame_with_size(self.size, timestamp);
    }

    pub fn push_frame_with_size(&mut self, size: FrameSize, timestamp: MediaTime) {
        let frame = PixelFrame::filled(size, [128, 128, 128], timestamp, self.next_sequence)
            .expect("filled frame");
        self.next_sequence += 1;
        self.frames.push_back(frame);
    }

    pub fn set_item_time(&mut self, time: MediaTime) {
        self.item_time = time;
    }

    /// Keep offering the last frame once the queue is empty
    pub fn set_repeat_last(&mut self, repeat: bool) {
        self.repeat_last = repeat;
    }

    pub fn set_capabilities(&mut self, fast_forward: bool, slow_forward: bool) {
        self.can_fast_forward = fast_forward;
        self.can_slow_forward = slow_forward;
    }

    pub fn set_size(&mut self, size: FrameSize) {
        self.size = size;
    }

    pub fn set_duration(&mut self, duration: MediaTime) {
        self.duration = duration;
    }

    pub fn set_transform(&mut self, transform: AffineTransform) {
        self.transform = transform;
    }

    pub fn queued(&self) -> usize {
        self.frames.len()
    }

    pub fn log(&self) -> Arc<Mutex<DecoderLog>> {
        Arc::clone(&self.log)
    }
}

impl MediaDecoder for ScriptedDecoder {
    fn status(&self) -> DecoderStatus {
        self.status.clone()
    }

    fn duration(&self) -> MediaTime {
        self.duration
    }

    fn presentation_size(&self) -> FrameSize {
        self.size
    }

    fn preferred_transform(&self) -> AffineTransform {
        self.transform
    }

    fn can_play_fast_forward(&self) -> bool {
        self.can_fast_forward
    }

    fn can_play_slow_forward(&self) -> bool {
        self.can_slow_forward
    }

    fn item_time(&self, _host_time: HostTime) -> MediaTime {
        self.item_time
    }

    fn has_new_frame(&mut self, item_time: MediaTime) -> bool {
        self.frames.front().is_some_and(|f| f.timestamp <= item_time)
            || (self.repeat_last && self.last.as_ref().is_some_and(|f| f.timestamp <= item_time))
    }

    fn copy_frame(&mut self, item_time: MediaTime) -> Option<PixelFrame> {
        let mut latest = None;
        while self.frames.front().is_some_and(|f| f.timestamp <= item_time) {
            latest = self.frames.pop_front();
        }
        if let Some(frame) = &latest {
            self.last = Some(frame.clone());
            return latest;
        }
        if self.repeat_last {
            return self.last.clone();
        }
        None
    }

    fn current_time(&self) -> MediaTime {
        self.item_time
    }

    fn seek(&mut self, time: MediaTime, tolerance: SeekTolerance) {
        self.item_time = time;
        self.log.lock().unwrap().seeks.push((time, tolerance));
    }

    fn play(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.playing = true;
        log.play_calls += 1;
    }

    fn pause(&mut self) {
        self.log.lock().unwrap().playing = false;
    }

    fn set_rate(&mut self, rate: f32) {
        self.log.lock().unwrap().rates.push(rate);
    }

    fn set_volume(&mut self, volume: f32) {
        self.log.lock().unwrap().volume = Some(volume);
    }

    fn set_mix_with_others(&mut self, mix: bool) {
        self.log.lock().unwrap().mix_with_others = Some(mix);
    }

    fn poll_notification(&mut self) -> Option<DecoderNotification> {
        self.notifications.pop_front()
    }

    fn close(&mut self) {
        self.log.lock().unwrap().closed = true;
    }
}
