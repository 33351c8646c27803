//! Entry of decoded frames into the operator graph

use super::framebuffer::RenderFramebuffer;
use super::yuv::{convert_nv12_to_rgba, ColorConversionMatrix, YuvConverter};
use crate::error::PlayerError;
use crate::graph::{NodeId, OperatorGraph};
use crate::video::{FrameOrientation, PixelBufferConsumer, PixelFrame};

/// Where YUV to RGB conversion runs
pub enum ConversionBackend {
    Gpu(YuvConverter),
    /// Software conversion into CPU-resident framebuffers
    Cpu(ColorConversionMatrix),
}

impl ConversionBackend {
    pub fn name(&self) -> &'static str {
        match self {
            ConversionBackend::Gpu(_) => "gpu",
            ConversionBackend::Cpu(_) => "cpu",
        }
    }
}

/// Converts each pixel buffer and pushes the result from the graph's source node
///
/// Owns the graph; the frame pump owns this consumer.
pub struct VideoInput {
    graph: OperatorGraph,
    source: NodeId,
    backend: ConversionBackend,
    orientation: Option<FrameOrientation>,
    frames_converted: u64,
}

impl VideoInput {
    pub fn new(graph: OperatorGraph, source: NodeId, backend: ConversionBackend) -> Self {
        Self {
            graph,
            source,
            backend,
            orientation: None,
            frames_converted: 0,
        }
    }

    /// Orientation attached to every framebuffer from now on
    pub fn set_orientation(&mut self, orientation: FrameOrientation) {
        self.orientation = Some(orientation);
    }

    pub fn orientation(&self) -> Option<FrameOrientation> {
        self.orientation
    }

    pub fn graph(&self) -> &OperatorGraph {
        &self.graph
    }

    /// Graph access for rewiring between ticks
    pub fn graph_mut(&mut self) -> &mut OperatorGraph {
        &mut self.graph
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    pub fn backend(&self) -> &ConversionBackend {
        &self.backend
    }

    pub fn frames_converted(&self) -> u64 {
        self.frames_converted
    }

    fn convert(&mut self, frame: &PixelFrame) -> Result<RenderFramebuffer, PlayerError> {
        match &mut self.backend {
            ConversionBackend::Gpu(converter) => converter.convert(frame),
            ConversionBackend::Cpu(matrix) => {
                let pixels = convert_nv12_to_rgba(frame, matrix)?;
                Ok(RenderFramebuffer::from_pixels(frame.size, frame.timestamp, pixels))
            }
        }
    }
}

impl PixelBufferConsumer for VideoInput {
    fn new_pixel_buffer_available(&mut self, frame: PixelFrame) -> Result<(), PlayerError> {
        let framebuffer = self.convert(&frame)?;
        // Pixel data is no longer needed once converted
        drop(frame);
        self.frames_converted += 1;

        let framebuffer = match self.orientation {
            Some(orientation) if orientation.natural_size == framebuffer.size => framebuffer.with_orientation(orientation),
            Some(orientation) => {
                tracing::debug!(
                    "VideoInput: frame size {} differs from natural size {}, presenting upright",
                    framebuffer.size,
                    orientation.natural_size
                );
                framebuffer
            }
            None => framebuffer,
        };

        self.graph.propagate(self.source, &framebuffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::FrameRecorder;
    use crate::render::BT601_FULL_RANGE;
    use crate::video::{AffineTransform, FrameSize, MediaTime};

    fn input_with_recorder() -> (VideoInput, crate::graph::FrameLog) {
        let mut graph = OperatorGraph::new();
        let source = graph.add_source();
        let (recorder, log) = FrameRecorder::new("recorder");
        let sink = graph.add_sink(recorder);
        graph.add_target(source, sink, 0).unwrap();
        (VideoInput::new(graph, source, ConversionBackend::Cpu(BT601_FULL_RANGE)), log)
    }

    #[test]
    fn test_cpu_conversion_reaches_sink() {
        let (mut input, log) = input_with_recorder();
        let frame = PixelFrame::filled(FrameSize::new(4, 2), [255, 128, 128], MediaTime::from_millis(33), 1).unwrap();
        input.new_pixel_buffer_available(frame).unwrap();

        let frames = log.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].millis, 33);
        assert_eq!(frames[0].first_pixel, Some([255, 255, 255, 255]));
        assert_eq!(input.frames_converted(), 1);
        assert_eq!(input.backend().name(), "cpu");
    }

    #[test]
    fn test_orientation_is_attached() {
        let (mut input, log) = input_with_recorder();
        let natural = FrameSize::new(4, 2);
        input.set_orientation(FrameOrientation::from_preferred(AffineTransform::rotation(90.0), natural));
        let frame = PixelFrame::filled(natural, [0, 128, 128], MediaTime::ZERO, 1).unwrap();
        input.new_pixel_buffer_available(frame).unwrap();
        assert_eq!(log.lock().unwrap()[0].display_size, FrameSize::new(2, 4));
    }

    #[test]
    fn test_invalid_frame_is_rejected() {
        let (mut input, log) = input_with_recorder();
        let mut frame = PixelFrame::filled(FrameSize::new(4, 4), [0, 128, 128], MediaTime::ZERO, 1).unwrap();
        frame.size = FrameSize::new(8, 8);
        assert!(matches!(
            input.new_pixel_buffer_available(frame),
            Err(PlayerError::InvalidFrame(_))
        ));
        assert!(log.lock().unwrap().is_empty());
    }
}
