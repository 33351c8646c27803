//! GPU-side frame handling
//!
//! - `yuv` - NV12 to RGBA conversion (GPU pass and CPU reference)
//! - `texture_cache` - pooled textures handed out as leases
//! - `framebuffer` - the RGBA frames flowing through the operator graph
//! - `input` - bridge from the frame pump into the graph
//! - `present` - window presentation sink

mod framebuffer;
mod input;
mod present;
mod texture_cache;
mod yuv;

pub use framebuffer::{FrameStorage, RenderFramebuffer};
pub use input::{ConversionBackend, VideoInput};
pub use present::{fit_aspect_ratio, PresentParams, SharedSurface, SurfacePresenter};
pub use texture_cache::{
    gpu_texture_cache, CacheStats, FramebufferCache, GpuTexture, TextureKey, TextureLease, CACHED_TEXTURE_USAGE,
};
pub use yuv::{
    convert_nv12_to_rgba, ColorConversionMatrix, ColorConversionUniform, ColorStandard, YuvConverter,
    BT601_FULL_RANGE, BT601_VIDEO_RANGE, BT709_VIDEO_RANGE,
};

/// Format of every framebuffer produced by conversion and filters
pub const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
