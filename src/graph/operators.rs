//! Node traits of the operator graph
//!
//! - `ImageOperator` - a transform that turns one framebuffer into another
//! - `FrameConsumer` - a terminal sink that displays or records frames

use crate::error::PlayerError;
use crate::render::RenderFramebuffer;

/// A transform node
///
/// Operators may keep state between frames but must not hold on to the input
/// framebuffer beyond the call unless they clone it.
pub trait ImageOperator {
    /// Short name used in logs
    fn label(&self) -> &str;

    /// Number of input slots this operator accepts
    fn input_count(&self) -> usize {
        1
    }

    /// Process a framebuffer arriving on `slot`
    ///
    /// Returns `Ok(None)` when the operator produced nothing for this input
    /// (for example while still waiting on another slot).
    fn process(&mut self, input: &RenderFramebuffer, slot: usize) -> Result<Option<RenderFramebuffer>, PlayerError>;
}

/// A sink node
///
/// Presentation is fire-and-forget: sinks log their own failures.
pub trait FrameConsumer {
    fn label(&self) -> &str {
        "sink"
    }

    fn present(&mut self, framebuffer: &RenderFramebuffer);
}
