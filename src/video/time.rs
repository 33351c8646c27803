//! Media time arithmetic and the monotonic host clock
//!
//! `MediaTime` is a rational timestamp as produced by demuxers (`value / timescale`
//! seconds). `HostTime` is a monotonic sample of the process clock, taken once per
//! display tick and mapped to media time by the decoder.

use std::cmp::Ordering;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Timescale used for millisecond timestamps
pub const MILLIS_TIMESCALE: i32 = 1_000;
/// Timescale used for clock-derived item times
pub const MICROS_TIMESCALE: i32 = 1_000_000;

/// A rational media timestamp: `value / timescale` seconds
///
/// A zero timescale marks an invalid time. It is never a panic: every
/// conversion degrades to zero instead.
#[derive(Debug, Clone, Copy)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: i32,
}

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime::new(0, MILLIS_TIMESCALE);

    pub const fn new(value: i64, timescale: i32) -> Self {
        Self { value, timescale }
    }

    /// Build a time from whole milliseconds
    pub const fn from_millis(millis: i64) -> Self {
        Self::new(millis, MILLIS_TIMESCALE)
    }

    /// Build a time from seconds, rounded to the nearest microsecond
    pub fn from_seconds(seconds: f64) -> Self {
        Self::new((seconds * MICROS_TIMESCALE as f64).round() as i64, MICROS_TIMESCALE)
    }

    /// Whether the timescale can be divided by
    pub fn is_valid(&self) -> bool {
        self.timescale != 0
    }

    pub fn as_seconds(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        self.value as f64 / self.timescale as f64
    }

    /// Milliseconds with integer truncation (see [`millis_from_time`])
    pub fn millis(&self) -> i64 {
        millis_from_time(*self)
    }

    /// Re-express the time in another timescale, truncating toward zero
    pub fn rescale(&self, timescale: i32) -> MediaTime {
        if self.timescale == 0 || timescale == 0 {
            return MediaTime::new(0, timescale);
        }
        let value = self.value as i128 * timescale as i128 / self.timescale as i128;
        MediaTime::new(clamp_i64(value), timescale)
    }

    /// (numerator, denominator) with a positive denominator, for cross-multiplied comparison
    fn normalized(&self) -> (i128, i128) {
        match self.timescale.cmp(&0) {
            Ordering::Equal => (0, 1),
            Ordering::Greater => (self.value as i128, self.timescale as i128),
            Ordering::Less => (-(self.value as i128), -(self.timescale as i128)),
        }
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, a_scale) = self.normalized();
        let (b, b_scale) = other.normalized();
        (a * b_scale).cmp(&(b * a_scale))
    }
}

/// Convert a media time to whole milliseconds
///
/// `value * 1000 / timescale` with truncation toward zero. A zero timescale
/// yields 0 rather than dividing by zero.
pub fn millis_from_time(time: MediaTime) -> i64 {
    if time.timescale == 0 {
        return 0;
    }
    clamp_i64(time.value as i128 * 1000 / time.timescale as i128)
}

fn clamp_i64(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

// ═══════════════════════════════════════════════════════════════════════════════
// HOST CLOCK
// ═══════════════════════════════════════════════════════════════════════════════

fn process_epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Monotonic host time, measured from a process-wide epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HostTime(Duration);

impl HostTime {
    /// Sample the host clock
    pub fn now() -> Self {
        Self(process_epoch().elapsed())
    }

    pub const fn from_duration(since_epoch: Duration) -> Self {
        Self(since_epoch)
    }

    pub fn from_secs_f64(seconds: f64) -> Self {
        Self(Duration::from_secs_f64(seconds.max(0.0)))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Signed seconds elapsed since `earlier` (negative if `earlier` is later)
    pub fn seconds_since(&self, earlier: HostTime) -> f64 {
        self.0.as_secs_f64() - earlier.0.as_secs_f64()
    }
}
