//! Telemetry and logging infrastructure
//!
//! Provides structured logging with tracing and per-tick pipeline timing.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogConfig, LogGuard};
pub use metrics::{FrameProfiler, FrameStats};
