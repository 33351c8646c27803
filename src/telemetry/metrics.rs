//! Per-tick pipeline timing
//!
//! Measures how long each display tick spends pulling, converting and
//! propagating, and how many ticks actually delivered a frame.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Tick timing statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    /// Average tick work time in milliseconds
    pub avg_ms: f64,
    /// Minimum tick work time in milliseconds
    pub min_ms: f64,
    /// Maximum tick work time in milliseconds
    pub max_ms: f64,
    /// 50th percentile (median) tick time
    pub p50_ms: f64,
    /// 95th percentile tick time
    pub p95_ms: f64,
    /// 99th percentile tick time
    pub p99_ms: f64,
    /// Number of ticks in the statistics
    pub sample_count: usize,
    /// Frames delivered per second over the sample window
    pub delivered_fps: f64,
}

/// Rolling profiler fed by the session on every tick
pub struct FrameProfiler {
    /// Work time of each recent tick
    tick_times: VecDeque<Duration>,
    /// End times of recent ticks that delivered a frame
    deliveries: VecDeque<Instant>,
    max_samples: usize,
    current_tick: Option<Instant>,
    last_report: Option<Instant>,
    report_interval: Duration,
}

impl Default for FrameProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameProfiler {
    /// Keeps five seconds of samples at 60 ticks per second
    pub fn new() -> Self {
        Self::with_capacity(300)
    }

    pub fn with_capacity(max_samples: usize) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            tick_times: VecDeque::with_capacity(max_samples),
            deliveries: VecDeque::with_capacity(max_samples),
            max_samples,
            current_tick: None,
            last_report: None,
            report_interval: Duration::from_secs(5),
        }
    }

    pub fn begin_tick(&mut self, now: Instant) {
        self.current_tick = Some(now);
    }

    /// Close the tick opened by [`begin_tick`](Self::begin_tick)
    pub fn end_tick(&mut self, now: Instant, delivered: bool) {
        let Some(start) = self.current_tick.take() else {
            return;
        };
        self.tick_times.push_back(now.saturating_duration_since(start));
        if self.tick_times.len() > self.max_samples {
            self.tick_times.pop_front();
        }
        if delivered {
            self.deliveries.push_back(now);
            if self.deliveries.len() > self.max_samples {
                self.deliveries.pop_front();
            }
        }
    }

    pub fn stats(&self) -> FrameStats {
        if self.tick_times.is_empty() {
            return FrameStats::default();
        }

        let mut times: Vec<f64> = self.tick_times.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        times.sort_by(|a, b| a.total_cmp(b));

        let sum: f64 = times.iter().sum();
        FrameStats {
            avg_ms: sum / times.len() as f64,
            min_ms: times.first().copied().unwrap_or(0.0),
            max_ms: times.last().copied().unwrap_or(0.0),
            p50_ms: percentile(&times, 0.50),
            p95_ms: percentile(&times, 0.95),
            p99_ms: percentile(&times, 0.99),
            sample_count: times.len(),
            delivered_fps: self.delivered_fps(),
        }
    }

    /// Delivered frames per second across the kept deliveries
    pub fn delivered_fps(&self) -> f64 {
        let (Some(first), Some(last)) = (self.deliveries.front(), self.deliveries.back()) else {
            return 0.0;
        };
        let span = last.saturating_duration_since(*first).as_secs_f64();
        if span > 0.0 {
            (self.deliveries.len() - 1) as f64 / span
        } else {
            0.0
        }
    }

    /// Statistics to log, at most once per report interval
    pub fn take_report(&mut self, now: Instant) -> Option<FrameStats> {
        match self.last_report {
            None => {
                self.last_report = Some(now);
                None
            }
            Some(last) if now.saturating_duration_since(last) >= self.report_interval => {
                self.last_report = Some(now);
                Some(self.stats())
            }
            Some(_) => None,
        }
    }
}

/// Value at fraction `p` of a sorted slice
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p) as usize;
    sorted[idx]
}
