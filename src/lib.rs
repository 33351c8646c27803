//! Filter Player Library
//!
//! Decodes a video file, converts each NV12 frame to RGBA on the GPU and pushes
//! it through a graph of image operators paced by the display refresh.

pub mod error;
pub mod gpu_context;
pub mod graph;
pub mod playback;
pub mod render;
pub mod session;
pub mod settings;
pub mod shaders;
pub mod telemetry;
pub mod video;

pub use error::PlayerError;
pub use gpu_context::{GpuContext, WindowGpuContext};
pub use graph::{build_chain, FilterRegistry, FilterSettings, FrameConsumer, ImageOperator, NodeId, OperatorGraph};
pub use playback::{PlaybackController, PlayerControl, PlayerEvent, PlayerState};
pub use render::{ConversionBackend, RenderFramebuffer, SurfacePresenter, VideoInput, YuvConverter};
pub use session::PlaybackSession;
pub use settings::{BackendChoice, PlayerSettings, SettingsError};
pub use video::{FrameSize, HostTime, MediaDecoder, MediaTime, ThreadedDecoder};
