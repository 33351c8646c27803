//! Background-threaded decoder behind the [`MediaDecoder`] boundary
//!
//! Decodes video frames on a background thread while the pipeline thread
//! picks them up on display ticks. All cross-thread traffic (readiness,
//! failures, frames, end of stream) flows through one bounded channel that
//! the pipeline thread drains at the start of each tick, so asynchronous
//! results never touch playback state from another thread.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use super::clock::MediaClock;
use super::decoder::{MediaInfo, VideoDecoder};
use super::orientation::AffineTransform;
use super::time::{HostTime, MediaTime};
use super::{DecoderNotification, DecoderStatus, FrameSize, MediaDecoder, PixelFrame, SeekTolerance};
use crate::error::PlayerError;

/// Consecutive decode errors tolerated before the stream is declared failed
const MAX_DECODE_ERRORS: u32 = 8;

/// Minimum advance of the decoded-ahead range before it is reported again
const LOADED_RANGE_STEP_SECS: f64 = 1.0;

enum DecoderCommand {
    Seek {
        time: MediaTime,
        tolerance: SeekTolerance,
        epoch: u64,
    },
    Stop,
}

enum DecoderMessage {
    Ready(MediaInfo),
    Failed(String),
    Frame { frame: PixelFrame, epoch: u64 },
    EndOfStream { epoch: u64 },
}

/// FFmpeg decoder running on its own thread
///
/// The decode thread stays at most `queue_depth` frames ahead of the channel
/// consumer; the pipeline side keeps another `queue_depth` frames queued.
pub struct ThreadedDecoder {
    commands: Sender<DecoderCommand>,
    messages: Receiver<DecoderMessage>,
    thread_handle: Option<JoinHandle<()>>,
    path: PathBuf,

    status: DecoderStatus,
    info: Option<MediaInfo>,
    queue: VecDeque<PixelFrame>,
    queue_depth: usize,
    /// Incremented on every seek; frames from older epochs are stale
    epoch: u64,
    awaiting_first_frame: bool,

    clock: MediaClock,
    playing: bool,
    rate: f32,
    volume: f32,
    mix_with_others: bool,

    stalled: bool,
    full_reported: bool,
    end_of_stream: bool,
    played_to_end_sent: bool,
    range_start: MediaTime,
    range_end: MediaTime,
    reported_range_end: Option<MediaTime>,
    notifications: VecDeque<DecoderNotification>,
    closed: bool,
}

impl ThreadedDecoder {
    /// Start opening `path` on a background thread
    ///
    /// Returns immediately with status [`DecoderStatus::Unknown`]; readiness
    /// or failure arrives later as a notification.
    pub fn open(path: &Path, queue_depth: usize) -> Result<Self, PlayerError> {
        let queue_depth = queue_depth.max(1);
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (message_tx, message_rx) = crossbeam_channel::bounded(queue_depth);

        let path_clone = path.to_path_buf();
        let thread_handle = thread::Builder::new()
            .name("video-decode".to_string())
            .spawn(move || Self::decode_loop(path_clone, command_rx, message_tx))
            .map_err(|e| PlayerError::DecoderFailure(format!("could not start decode thread: {}", e)))?;

        tracing::info!("ThreadedDecoder: opening {}", path.display());
        Ok(Self::with_channels(path, queue_depth, command_tx, message_rx, Some(thread_handle)))
    }

    /// Pipeline-side state around an already running decode loop
    fn with_channels(
        path: &Path,
        queue_depth: usize,
        commands: Sender<DecoderCommand>,
        messages: Receiver<DecoderMessage>,
        thread_handle: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            commands,
            messages,
            thread_handle,
            path: path.to_path_buf(),
            status: DecoderStatus::Unknown,
            info: None,
            queue: VecDeque::with_capacity(queue_depth),
            queue_depth,
            epoch: 0,
            awaiting_first_frame: true,
            clock: MediaClock::new(),
            playing: false,
            rate: 1.0,
            volume: 1.0,
            mix_with_others: false,
            stalled: false,
            full_reported: false,
            end_of_stream: false,
            played_to_end_sent: false,
            range_start: MediaTime::ZERO,
            range_end: MediaTime::ZERO,
            reported_range_end: None,
            notifications: VecDeque::new(),
            closed: false,
        }
    }

    /// Background decode loop
    fn decode_loop(path: PathBuf, commands: Receiver<DecoderCommand>, messages: Sender<DecoderMessage>) {
        // Open decoder in this thread
        let mut decoder = match VideoDecoder::open(&path) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!("Failed to open video in decode thread: {}", e);
                let _ = messages.send(DecoderMessage::Failed(e.to_string()));
                return;
            }
        };

        if messages.send(DecoderMessage::Ready(decoder.info().clone())).is_err() {
            return;
        }

        let mut epoch = 0u64;
        let mut finished = false;
        let mut consecutive_errors = 0u32;

        loop {
            // Once the stream is exhausted, sleep until told to seek or stop
            let command = if finished {
                match commands.recv() {
                    Ok(command) => Some(command),
                    Err(_) => break,
                }
            } else {
                match commands.try_recv() {
                    Ok(command) => Some(command),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            };

            match command {
                Some(DecoderCommand::Stop) => break,
                Some(DecoderCommand::Seek {
                    time,
                    tolerance,
                    epoch: new_epoch,
                }) => {
                    epoch = new_epoch;
                    finished = false;
                    if let Err(e) = decoder.seek(time, tolerance) {
                        tracing::warn!("Failed to seek to {}ms: {}", time.millis(), e);
                    }
                    continue;
                }
                None => {}
            }

            match decoder.decode_next_frame() {
                Ok(Some(frame)) => {
                    consecutive_errors = 0;
                    // Blocks while the pipeline side is full
                    if messages.send(DecoderMessage::Frame { frame, epoch }).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    finished = true;
                    tracing::debug!("ThreadedDecoder: end of stream");
                    if messages.send(DecoderMessage::EndOfStream { epoch }).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::error!("Decode error: {}", e);
                    if consecutive_errors >= MAX_DECODE_ERRORS {
                        let _ = messages.send(DecoderMessage::Failed(e.to_string()));
                        break;
                    }
                }
            }
        }

        tracing::debug!("ThreadedDecoder decode thread stopped");
    }

    /// Move decoder output onto the pipeline thread, up to the queue depth
    fn drain_messages(&mut self) {
        while self.queue.len() < self.queue_depth {
            match self.messages.try_recv() {
                Ok(message) => self.handle_message(message),
                Err(_) => break,
            }
        }
        self.update_buffering();
    }

    fn handle_message(&mut self, message: DecoderMessage) {
        match message {
            DecoderMessage::Ready(info) => {
                tracing::info!(
                    "ThreadedDecoder: ready {} @ {:.2}fps ({})",
                    info.size,
                    info.frame_rate,
                    info.codec_name
                );
                self.info = Some(info);
                self.set_status(DecoderStatus::ReadyToPlay);
            }
            DecoderMessage::Failed(message) => {
                self.set_status(DecoderStatus::Failed(message));
            }
            DecoderMessage::Frame { frame, epoch } => {
                if epoch != self.epoch {
                    return;
                }
                if self.awaiting_first_frame {
                    // Align the media clock with the first decodable frame
                    self.awaiting_first_frame = false;
                    self.clock.seek(HostTime::now(), frame.timestamp);
                }
                self.range_end = self.range_end.max(frame.timestamp);
                self.queue.push_back(frame);
            }
            DecoderMessage::EndOfStream { epoch } => {
                if epoch == self.epoch {
                    self.end_of_stream = true;
                    if let Some(info) = &self.info {
                        self.range_end = self.range_end.max(info.duration);
                    }
                }
            }
        }
    }

    fn set_status(&mut self, status: DecoderStatus) {
        if self.status != status {
            self.status = status.clone();
            self.notifications.push_back(DecoderNotification::StatusChanged(status));
        }
    }

    fn update_buffering(&mut self) {
        if self.status != DecoderStatus::ReadyToPlay {
            return;
        }

        if self.queue.len() >= self.queue_depth {
            if !self.full_reported {
                self.full_reported = true;
                self.notifications.push_back(DecoderNotification::BufferFull);
            }
        } else {
            self.full_reported = false;
        }

        if self.playing && !self.stalled && self.queue.is_empty() && !self.end_of_stream {
            self.stalled = true;
            self.clock.stop(HostTime::now());
            self.notifications.push_back(DecoderNotification::BufferEmpty);
        } else if self.stalled && (self.queue.len() >= self.queue_depth.div_ceil(2) || self.end_of_stream) {
            self.stalled = false;
            if self.playing {
                self.clock.start(HostTime::now());
            }
            self.notifications.push_back(DecoderNotification::LikelyToKeepUp);
        }

        let advanced = match self.reported_range_end {
            None => self.range_end > self.range_start,
            Some(reported) => {
                self.range_end.as_seconds() - reported.as_seconds() >= LOADED_RANGE_STEP_SECS
                    || (self.end_of_stream && self.range_end > reported)
            }
        };
        if advanced {
            self.reported_range_end = Some(self.range_end);
            self.notifications
                .push_back(DecoderNotification::LoadedRanges(vec![(self.range_start, self.range_end)]));
        }

        if self.playing && self.end_of_stream && self.queue.is_empty() && !self.played_to_end_sent {
            self.played_to_end_sent = true;
            self.notifications.push_back(DecoderNotification::PlayedToEnd);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> Option<&MediaInfo> {
        self.info.as_ref()
    }
}

impl MediaDecoder for ThreadedDecoder {
    fn status(&self) -> DecoderStatus {
        self.status.clone()
    }

    fn duration(&self) -> MediaTime {
        self.info.as_ref().map(|i| i.duration).unwrap_or(MediaTime::ZERO)
    }

    fn presentation_size(&self) -> FrameSize {
        self.info.as_ref().map(|i| i.size).unwrap_or_default()
    }

    fn preferred_transform(&self) -> AffineTransform {
        self.info.as_ref().map(|i| i.transform).unwrap_or(AffineTransform::IDENTITY)
    }

    fn can_play_fast_forward(&self) -> bool {
        // Only files with a known extent can be decoded faster than real time
        self.duration() > MediaTime::ZERO
    }

    fn can_play_slow_forward(&self) -> bool {
        true
    }

    fn item_time(&self, host_time: HostTime) -> MediaTime {
        self.clock.time_at(host_time)
    }

    fn has_new_frame(&mut self, item_time: MediaTime) -> bool {
        self.drain_messages();
        self.queue.front().is_some_and(|f| f.timestamp <= item_time)
    }

    fn copy_frame(&mut self, item_time: MediaTime) -> Option<PixelFrame> {
        self.drain_messages();
        let mut latest = None;
        let mut skipped = 0usize;
        while self.queue.front().is_some_and(|f| f.timestamp <= item_time) {
            if latest.is_some() {
                skipped += 1;
            }
            latest = self.queue.pop_front();
        }
        if skipped > 0 {
            tracing::debug!("ThreadedDecoder: dropped {} late frames", skipped);
        }
        latest
    }

    fn current_time(&self) -> MediaTime {
        let now = self.clock.time_at(HostTime::now());
        let duration = self.duration();
        if duration > MediaTime::ZERO && now > duration {
            duration
        } else {
            now.max(MediaTime::ZERO)
        }
    }

    fn seek(&mut self, time: MediaTime, tolerance: SeekTolerance) {
        if self.closed {
            return;
        }
        self.epoch += 1;
        self.queue.clear();
        // Frames still in flight belong to the old epoch and are dropped
        while let Ok(message) = self.messages.try_recv() {
            self.handle_message(message);
        }

        let _ = self.commands.send(DecoderCommand::Seek {
            time,
            tolerance,
            epoch: self.epoch,
        });

        self.clock.seek(HostTime::now(), time);
        self.awaiting_first_frame = true;
        self.end_of_stream = false;
        self.played_to_end_sent = false;
        self.range_start = time;
        self.range_end = time;
        self.reported_range_end = None;
        tracing::debug!("ThreadedDecoder: seek to {}ms (epoch {})", time.millis(), self.epoch);
    }

    fn play(&mut self) {
        self.playing = true;
        if !self.stalled {
            self.clock.start(HostTime::now());
        }
    }

    fn pause(&mut self) {
        self.playing = false;
        self.clock.stop(HostTime::now());
    }

    fn set_rate(&mut self, rate: f32) {
        self.rate = rate;
        self.clock.set_rate(HostTime::now(), rate as f64);
    }

    fn set_volume(&mut self, volume: f32) {
        // Video-only pipeline: recorded for reporting
        self.volume = volume;
    }

    fn set_mix_with_others(&mut self, mix: bool) {
        self.mix_with_others = mix;
    }

    fn poll_notification(&mut self) -> Option<DecoderNotification> {
        if self.notifications.is_empty() && !self.closed {
            self.drain_messages();
        }
        self.notifications.pop_front()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.playing = false;
        let _ = self.commands.send(DecoderCommand::Stop);
        // Dropping the receiver unblocks a decode thread waiting on a full channel
        self.messages = crossbeam_channel::never();
        self.queue.clear();

        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                tracing::warn!("Failed to join decode thread: {:?}", e);
            }
        }
        tracing::info!("ThreadedDecoder: closed {}", self.path.display());
    }
}

impl Drop for ThreadedDecoder {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Decoder state driven by hand instead of a decode thread
    struct Harness {
        decoder: ThreadedDecoder,
        commands: Receiver<DecoderCommand>,
        messages: Sender<DecoderMessage>,
        next_sequence: u64,
    }

    impl Harness {
        fn new(queue_depth: usize) -> Self {
            let (command_tx, command_rx) = crossbeam_channel::unbounded();
            let (message_tx, message_rx) = crossbeam_channel::bounded(64);
            let decoder =
                ThreadedDecoder::with_channels(Path::new("clip.mp4"), queue_depth, command_tx, message_rx, None);
            Self {
                decoder,
                commands: command_rx,
                messages: message_tx,
                next_sequence: 0,
            }
        }

        fn ready(&mut self) {
            self.send(DecoderMessage::Ready(MediaInfo {
                size: FrameSize::new(4, 2),
                frame_rate: 30.0,
                duration: MediaTime::from_millis(10_000),
                codec_name: "h264".to_string(),
                transform: AffineTransform::IDENTITY,
            }));
            assert_eq!(
                self.notifications(),
                vec![DecoderNotification::StatusChanged(DecoderStatus::ReadyToPlay)]
            );
        }

        fn send(&self, message: DecoderMessage) {
            self.messages.send(message).unwrap();
        }

        fn frame(&mut self, millis: i64, epoch: u64) {
            let frame = PixelFrame::filled(FrameSize::new(4, 2), [16, 128, 128], MediaTime::from_millis(millis), self.next_sequence)
                .unwrap();
            self.next_sequence += 1;
            self.send(DecoderMessage::Frame { frame, epoch });
        }

        fn notifications(&mut self) -> Vec<DecoderNotification> {
            std::iter::from_fn(|| self.decoder.poll_notification()).collect()
        }
    }

    #[test]
    fn test_stale_epoch_frames_are_dropped() {
        let mut h = Harness::new(4);
        h.ready();
        // In flight before the seek
        h.frame(0, 0);
        h.decoder.seek(MediaTime::from_millis(5_000), SeekTolerance::Exact);
        assert!(matches!(
            h.commands.try_recv(),
            Ok(DecoderCommand::Seek { epoch: 1, .. })
        ));

        // Sent before the decode thread saw the seek
        h.frame(33, 0);
        h.frame(5_000, 1);

        let frame = h.decoder.copy_frame(MediaTime::from_millis(10_000)).unwrap();
        assert_eq!(frame.timestamp, MediaTime::from_millis(5_000));
        assert_eq!(frame.sequence, 2);
        assert!(h.decoder.copy_frame(MediaTime::from_millis(10_000)).is_none());
    }

    #[test]
    fn test_stall_stops_clock_until_refilled() {
        let mut h = Harness::new(4);
        h.ready();
        h.decoder.play();
        assert!(h.decoder.clock.is_running());

        assert_eq!(h.notifications(), vec![DecoderNotification::BufferEmpty]);
        assert!(!h.decoder.clock.is_running());
        // Still stalled with one frame of the two needed
        h.frame(0, 0);
        assert!(!h.notifications().contains(&DecoderNotification::LikelyToKeepUp));
        assert!(!h.decoder.clock.is_running());

        h.frame(33, 0);
        let notifications = h.notifications();
        assert_eq!(notifications[0], DecoderNotification::LikelyToKeepUp);
        assert!(h.decoder.clock.is_running());
    }

    #[test]
    fn test_buffer_full_once_per_fill() {
        let mut h = Harness::new(4);
        h.ready();
        for i in 0..4 {
            h.frame(i * 33, 0);
        }
        let full = |n: &Vec<DecoderNotification>| n.iter().filter(|n| **n == DecoderNotification::BufferFull).count();
        let first = h.notifications();
        assert_eq!(full(&first), 1);
        assert!(h.notifications().is_empty());

        assert!(h.decoder.copy_frame(MediaTime::ZERO).is_some());
        assert!(h.notifications().is_empty());
        h.frame(132, 0);
        assert_eq!(h.notifications(), vec![DecoderNotification::BufferFull]);
    }

    #[test]
    fn test_loaded_ranges_report_in_one_second_steps() {
        let mut h = Harness::new(32);
        h.ready();
        h.frame(0, 0);
        h.frame(500, 0);
        assert_eq!(
            h.notifications(),
            vec![DecoderNotification::LoadedRanges(vec![(MediaTime::ZERO, MediaTime::from_millis(500))])]
        );

        h.frame(1_000, 0);
        assert!(h.notifications().is_empty());

        h.frame(1_500, 0);
        assert_eq!(
            h.notifications(),
            vec![DecoderNotification::LoadedRanges(vec![(MediaTime::ZERO, MediaTime::from_millis(1_500))])]
        );
    }

    #[test]
    fn test_played_to_end_once_until_seek() {
        let mut h = Harness::new(4);
        h.ready();
        h.decoder.play();
        h.frame(0, 0);
        h.send(DecoderMessage::EndOfStream { epoch: 0 });
        let count = |n: Vec<DecoderNotification>| n.into_iter().filter(|n| *n == DecoderNotification::PlayedToEnd).count();

        // Queued frames still have to be shown
        assert_eq!(count(h.notifications()), 0);
        assert!(h.decoder.copy_frame(MediaTime::from_millis(100)).is_some());
        assert_eq!(count(h.notifications()), 1);
        assert_eq!(count(h.notifications()), 0);

        h.decoder.seek(MediaTime::ZERO, SeekTolerance::Exact);
        // End of the old epoch does not count
        h.send(DecoderMessage::EndOfStream { epoch: 0 });
        h.frame(0, 1);
        assert!(h.decoder.copy_frame(MediaTime::from_millis(100)).is_some());
        assert_eq!(count(h.notifications()), 0);

        h.send(DecoderMessage::EndOfStream { epoch: 1 });
        assert_eq!(count(h.notifications()), 1);
    }

    fn wait_for_status(decoder: &mut ThreadedDecoder) -> DecoderStatus {
        for _ in 0..200 {
            if let Some(DecoderNotification::StatusChanged(status)) = decoder.poll_notification() {
                return status;
            }
            thread::sleep(Duration::from_millis(5));
        }
        decoder.status()
    }

    #[test]
    fn test_missing_file_reports_failure() {
        let mut decoder = ThreadedDecoder::open(Path::new("/nonexistent/clip.mp4"), 3).unwrap();
        assert_eq!(decoder.status(), DecoderStatus::Unknown);
        assert!(matches!(wait_for_status(&mut decoder), DecoderStatus::Failed(_)));
        assert_eq!(decoder.duration(), MediaTime::ZERO);
        decoder.close();
        decoder.close();
    }

    #[test]
    fn test_no_frames_before_ready() {
        let mut decoder = ThreadedDecoder::open(Path::new("/nonexistent/clip.mp4"), 2).unwrap();
        assert!(!decoder.has_new_frame(MediaTime::from_millis(1_000)));
        assert!(decoder.copy_frame(MediaTime::from_millis(1_000)).is_none());
    }
}
