//! Display clock gating, media clock and tick pacing
//!
//! The display clock is the on/off switch for per-tick frame pulls. It starts
//! paused and is unpaused by the playback controller once the session is ready
//! and playing. Invalidating it is irreversible and happens on close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::time::{HostTime, MediaTime};

struct ClockState {
    paused: AtomicBool,
    invalidated: AtomicBool,
}

/// Shared handle to the display-tick gate
#[derive(Clone)]
pub struct DisplayClock {
    state: Arc<ClockState>,
}

impl Default for DisplayClock {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayClock {
    /// A clock that delivers no ticks until unpaused
    pub fn new() -> Self {
        Self {
            state: Arc::new(ClockState {
                paused: AtomicBool::new(true),
                invalidated: AtomicBool::new(false),
            }),
        }
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.paused.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::Acquire)
    }

    /// Stop the clock for good
    pub fn invalidate(&self) {
        self.state.invalidated.store(true, Ordering::Release);
        self.state.paused.store(true, Ordering::Release);
    }

    pub fn is_invalidated(&self) -> bool {
        self.state.invalidated.load(Ordering::Acquire)
    }

    /// Whether a tick arriving now should pull a frame
    pub fn should_tick(&self) -> bool {
        !self.is_invalidated() && !self.is_paused()
    }
}

/// Maps host time to media time at a playback rate
///
/// Re-anchored on every rate change, seek, start and stop so the mapping
/// stays continuous.
#[derive(Debug, Clone)]
pub struct MediaClock {
    anchor_host: HostTime,
    anchor_media: f64,
    rate: f64,
    running: bool,
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaClock {
    pub fn new() -> Self {
        Self {
            anchor_host: HostTime::default(),
            anchor_media: 0.0,
            rate: 1.0,
            running: false,
        }
    }

    fn seconds_at(&self, host: HostTime) -> f64 {
        if self.running {
            let elapsed = host.seconds_since(self.anchor_host).max(0.0);
            self.anchor_media + elapsed * self.rate
        } else {
            self.anchor_media
        }
    }

    /// Media time at `host`
    pub fn time_at(&self, host: HostTime) -> MediaTime {
        MediaTime::from_seconds(self.seconds_at(host))
    }

    fn reanchor(&mut self, host: HostTime) {
        self.anchor_media = self.seconds_at(host);
        self.anchor_host = host;
    }

    pub fn start(&mut self, host: HostTime) {
        if !self.running {
            self.anchor_host = host;
            self.running = true;
        }
    }

    pub fn stop(&mut self, host: HostTime) {
        if self.running {
            self.reanchor(host);
            self.running = false;
        }
    }

    pub fn set_rate(&mut self, host: HostTime, rate: f64) {
        self.reanchor(host);
        self.rate = rate;
    }

    pub fn seek(&mut self, host: HostTime, time: MediaTime) {
        self.anchor_host = host;
        self.anchor_media = time.as_seconds();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

/// Outcome of [`TickScheduler::poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// Run a display tick now
    Tick,
    /// Nothing to do before this instant
    WaitUntil(Instant),
}

/// Paces display ticks at a fixed rate without catching up on missed ticks
#[derive(Debug, Clone)]
pub struct TickScheduler {
    interval: Duration,
    next_tick: Instant,
}

impl TickScheduler {
    pub fn new(ticks_per_second: u32, now: Instant) -> Self {
        Self {
            interval: Self::interval_for(ticks_per_second),
            next_tick: now,
        }
    }

    fn interval_for(ticks_per_second: u32) -> Duration {
        // Integer nanoseconds to eliminate floating-point drift
        Duration::from_nanos(1_000_000_000u64 / ticks_per_second.max(1) as u64)
    }

    pub fn set_rate(&mut self, ticks_per_second: u32, now: Instant) {
        self.interval = Self::interval_for(ticks_per_second);
        self.next_tick = now;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn poll(&mut self, now: Instant) -> TickDecision {
        if now < self.next_tick {
            return TickDecision::WaitUntil(self.next_tick);
        }

        self.next_tick += self.interval;
        // Fell behind: skip the missed deadlines
        if self.next_tick <= now {
            self.next_tick = now + self.interval;
        }
        TickDecision::Tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_clock_starts_paused() {
        let clock = DisplayClock::new();
        assert!(!clock.should_tick());
        clock.set_paused(false);
        assert!(clock.should_tick());
    }

    #[test]
    fn test_invalidate_is_permanent() {
        let clock = DisplayClock::new();
        let handle = clock.clone();
        clock.set_paused(false);
        handle.invalidate();
        clock.set_paused(false);
        assert!(!clock.should_tick());
        assert!(clock.is_invalidated());
    }

    #[test]
    fn test_media_clock_tracks_rate() {
        let mut clock = MediaClock::new();
        let t0 = HostTime::from_secs_f64(10.0);
        clock.start(t0);
        assert_eq!(clock.time_at(HostTime::from_secs_f64(11.0)).millis(), 1000);

        clock.set_rate(HostTime::from_secs_f64(11.0), 2.0);
        assert_eq!(clock.time_at(HostTime::from_secs_f64(12.0)).millis(), 3000);

        clock.stop(HostTime::from_secs_f64(12.0));
        assert_eq!(clock.time_at(HostTime::from_secs_f64(20.0)).millis(), 3000);
    }

    #[test]
    fn test_media_clock_seek() {
        let mut clock = MediaClock::new();
        clock.start(HostTime::from_secs_f64(1.0));
        clock.seek(HostTime::from_secs_f64(2.0), MediaTime::from_millis(500));
        assert_eq!(clock.time_at(HostTime::from_secs_f64(2.25)).millis(), 750);
    }

    #[test]
    fn test_scheduler_waits_then_ticks() {
        let start = Instant::now();
        let mut scheduler = TickScheduler::new(50, start);
        assert_eq!(scheduler.poll(start), TickDecision::Tick);
        assert_eq!(
            scheduler.poll(start + Duration::from_millis(5)),
            TickDecision::WaitUntil(start + Duration::from_millis(20))
        );
        assert_eq!(scheduler.poll(start + Duration::from_millis(20)), TickDecision::Tick);
    }

    #[test]
    fn test_scheduler_does_not_catch_up() {
        let start = Instant::now();
        let mut scheduler = TickScheduler::new(100, start);
        assert_eq!(scheduler.poll(start), TickDecision::Tick);

        let late = start + Duration::from_millis(95);
        assert_eq!(scheduler.poll(late), TickDecision::Tick);
        // One tick for the stall, then back to the regular cadence
        assert_eq!(
            scheduler.poll(late + Duration::from_millis(1)),
            TickDecision::WaitUntil(late + Duration::from_millis(10))
        );
    }
}
