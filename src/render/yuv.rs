//! YUV to RGB conversion
//!
//! The GPU path binds the luminance plane to binding 0 and the chrominance
//! plane to binding 1 and applies one of the fixed color matrices in a single
//! fullscreen pass. A CPU path with identical math serves headless machines
//! without an adapter.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::framebuffer::RenderFramebuffer;
use super::texture_cache::{FramebufferCache, GpuTexture, TextureKey, TextureLease};
use super::OUTPUT_FORMAT;
use crate::error::PlayerError;
use crate::gpu_context::GpuContext;
use crate::shaders;
use crate::video::{PixelFrame, Plane};

/// Column-major 3x3 YCbCr to RGB matrix plus luma offset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorConversionMatrix {
    pub columns: [[f32; 3]; 3],
    /// Subtracted from normalized luma before the matrix (16/255 for video range)
    pub luma_offset: f32,
}

/// Chroma is centered on 0.5 in every supported range
const CHROMA_OFFSET: f32 = 0.5;

/// BT.601, full range (0-255 luma)
pub const BT601_FULL_RANGE: ColorConversionMatrix = ColorConversionMatrix {
    columns: [[1.0, 1.0, 1.0], [0.0, -0.343, 1.765], [1.4, -0.711, 0.0]],
    luma_offset: 0.0,
};

/// BT.601, video range (16-235 luma)
pub const BT601_VIDEO_RANGE: ColorConversionMatrix = ColorConversionMatrix {
    columns: [[1.164, 1.164, 1.164], [0.0, -0.392, 2.017], [1.596, -0.813, 0.0]],
    luma_offset: 16.0 / 255.0,
};

/// BT.709, video range (16-235 luma)
pub const BT709_VIDEO_RANGE: ColorConversionMatrix = ColorConversionMatrix {
    columns: [[1.164, 1.164, 1.164], [0.0, -0.213, 2.112], [1.793, -0.533, 0.0]],
    luma_offset: 16.0 / 255.0,
};

impl ColorConversionMatrix {
    /// Convert one normalized YCbCr sample to RGB, clamped to `[0, 1]`
    pub fn apply(&self, y: f32, cb: f32, cr: f32) -> [f32; 3] {
        let v = [y - self.luma_offset, cb - CHROMA_OFFSET, cr - CHROMA_OFFSET];
        let c = &self.columns;
        [0, 1, 2].map(|row| (c[0][row] * v[0] + c[1][row] * v[1] + c[2][row] * v[2]).clamp(0.0, 1.0))
    }

    pub fn uniform(&self) -> ColorConversionUniform {
        let col = |i: usize| [self.columns[i][0], self.columns[i][1], self.columns[i][2], 0.0];
        ColorConversionUniform {
            col0: col(0),
            col1: col(1),
            col2: col(2),
            offset: [self.luma_offset, CHROMA_OFFSET, CHROMA_OFFSET, 0.0],
        }
    }
}

/// Selectable conversion standard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ColorStandard {
    #[default]
    #[serde(rename = "bt601-full")]
    Bt601FullRange,
    #[serde(rename = "bt601-video")]
    Bt601VideoRange,
    #[serde(rename = "bt709-video")]
    Bt709VideoRange,
}

impl ColorStandard {
    pub fn matrix(&self) -> &'static ColorConversionMatrix {
        match self {
            ColorStandard::Bt601FullRange => &BT601_FULL_RANGE,
            ColorStandard::Bt601VideoRange => &BT601_VIDEO_RANGE,
            ColorStandard::Bt709VideoRange => &BT709_VIDEO_RANGE,
        }
    }
}

/// Uniform layout of the conversion shader (must match `yuv_to_rgb.wgsl`)
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ColorConversionUniform {
    pub col0: [f32; 4],
    pub col1: [f32; 4],
    pub col2: [f32; 4],
    pub offset: [f32; 4],
}

/// Convert an NV12 frame to tightly packed RGBA8 on the CPU
pub fn convert_nv12_to_rgba(frame: &PixelFrame, matrix: &ColorConversionMatrix) -> Result<Vec<u8>, PlayerError> {
    frame.validate()?;

    let size = frame.size;
    let mut rgba = Vec::with_capacity(size.pixel_count() * 4);
    for y in 0..size.height {
        let luma_row = frame.luma.row(y);
        let chroma_row = frame.chroma.row(y / 2);
        for x in 0..size.width as usize {
            let c = (x / 2) * 2;
            let rgb = matrix.apply(
                luma_row[x] as f32 / 255.0,
                chroma_row[c] as f32 / 255.0,
                chroma_row[c + 1] as f32 / 255.0,
            );
            rgba.extend(rgb.map(|v| (v * 255.0).round() as u8));
            rgba.push(255);
        }
    }
    Ok(rgba)
}

// ═══════════════════════════════════════════════════════════════════════════════
// GPU CONVERTER
// ═══════════════════════════════════════════════════════════════════════════════

/// GPU conversion pass writing into cache-backed RGBA framebuffers
pub struct YuvConverter {
    gpu: Arc<GpuContext>,
    cache: FramebufferCache<GpuTexture>,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    matrix: ColorConversionMatrix,
}

impl YuvConverter {
    pub fn new(gpu: Arc<GpuContext>, cache: FramebufferCache<GpuTexture>, matrix: ColorConversionMatrix) -> Self {
        let device = &gpu.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("YUV Conversion Shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::with_fullscreen_vertex(shaders::YUV_TO_RGB_FRAGMENT).into()),
        });

        let plane_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("YUV Conversion Bind Group Layout"),
            entries: &[
                // Luminance plane
                plane_entry(0),
                // Chrominance plane
                plane_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                // Color matrix
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("YUV Conversion Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("YUV Conversion Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: OUTPUT_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("YUV Plane Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniform = matrix.uniform();
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("YUV Conversion Uniforms"),
            size: std::mem::size_of::<ColorConversionUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        gpu.queue.write_buffer(&uniform_buffer, 0, bytemuck::bytes_of(&uniform));

        Self {
            gpu,
            cache,
            pipeline,
            bind_group_layout,
            sampler,
            uniform_buffer,
            matrix,
        }
    }

    pub fn matrix(&self) -> &ColorConversionMatrix {
        &self.matrix
    }

    fn upload_plane(&self, lease: &TextureLease<GpuTexture>, plane: &Plane) {
        self.gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &lease.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &plane.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(plane.stride as u32),
                rows_per_image: Some(plane.height),
            },
            wgpu::Extent3d {
                width: plane.width,
                height: plane.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Convert one frame into a new RGBA framebuffer of full luma size
    ///
    /// Both plane textures stay leased until the pass has been submitted.
    pub fn convert(&mut self, frame: &PixelFrame) -> Result<RenderFramebuffer, PlayerError> {
        frame.validate()?;

        let luma = self
            .cache
            .acquire(TextureKey::new(frame.luma.size(), frame.format.luma_texture_format()))?;
        let chroma = self
            .cache
            .acquire(TextureKey::new(frame.chroma.size(), frame.format.chroma_texture_format()))?;
        let output = self.cache.acquire(TextureKey::new(frame.size, OUTPUT_FORMAT))?;

        self.upload_plane(&luma, &frame.luma);
        self.upload_plane(&chroma, &frame.chroma);

        let device = &self.gpu.device;
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("YUV Conversion Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&luma.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&chroma.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("YUV Conversion Encoder"),
        });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("YUV Conversion Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &output.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }
        self.gpu.queue.submit(std::iter::once(encoder.finish()));

        // Planes go back to the cache only now; later uploads are queued after this pass
        drop(luma);
        drop(chroma);

        Ok(RenderFramebuffer::from_texture(frame.timestamp, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::{FrameSize, MediaTime};

    fn close_to(actual: u8, expected: u8) -> bool {
        (actual as i16 - expected as i16).abs() <= 3
    }

    #[test]
    fn test_uniform_size() {
        assert_eq!(std::mem::size_of::<ColorConversionUniform>(), 64);
    }

    #[test]
    fn test_uniform_layout_is_column_major() {
        let u = BT601_FULL_RANGE.uniform();
        assert_eq!(u.col2[0], 1.4);
        assert_eq!(u.col1[2], 1.765);
        assert_eq!(u.offset, [0.0, 0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_full_range_white_and_black() {
        let white = PixelFrame::filled(FrameSize::new(2, 2), [255, 128, 128], MediaTime::ZERO, 0).unwrap();
        let rgba = convert_nv12_to_rgba(&white, &BT601_FULL_RANGE).unwrap();
        assert_eq!(&rgba[..4], &[255, 255, 255, 255]);

        let black = PixelFrame::filled(FrameSize::new(2, 2), [0, 128, 128], MediaTime::ZERO, 0).unwrap();
        let rgba = convert_nv12_to_rgba(&black, &BT601_FULL_RANGE).unwrap();
        assert!(rgba[..3].iter().all(|&v| v <= 1));
    }

    #[test]
    fn test_video_range_black_level() {
        let black = PixelFrame::filled(FrameSize::new(2, 2), [16, 128, 128], MediaTime::ZERO, 0).unwrap();
        let rgba = convert_nv12_to_rgba(&black, &BT601_VIDEO_RANGE).unwrap();
        assert!(rgba[..3].iter().all(|&v| v <= 1));
        let white = PixelFrame::filled(FrameSize::new(2, 2), [235, 128, 128], MediaTime::ZERO, 0).unwrap();
        let rgba = convert_nv12_to_rgba(&white, &BT709_VIDEO_RANGE).unwrap();
        assert!(rgba[..3].iter().all(|&v| v >= 253));
    }

    #[test]
    fn test_full_range_red() {
        let red = PixelFrame::filled(FrameSize::new(4, 2), [76, 85, 255], MediaTime::ZERO, 0).unwrap();
        let rgba = convert_nv12_to_rgba(&red, &BT601_FULL_RANGE).unwrap();
        assert_eq!(rgba.len(), 4 * 2 * 4);
        assert!(close_to(rgba[0], 255));
        assert!(close_to(rgba[1], 0));
        assert!(close_to(rgba[2], 0));
    }

    #[test]
    fn test_odd_dimensions_convert() {
        let frame = PixelFrame::filled(FrameSize::new(3, 3), [128, 128, 128], MediaTime::ZERO, 0).unwrap();
        let rgba = convert_nv12_to_rgba(&frame, &BT601_FULL_RANGE).unwrap();
        assert_eq!(rgba.len(), 3 * 3 * 4);
    }

    #[test]
    fn test_color_standard_selects_matrix() {
        assert_eq!(ColorStandard::default().matrix(), &BT601_FULL_RANGE);
        assert_eq!(ColorStandard::Bt709VideoRange.matrix(), &BT709_VIDEO_RANGE);
    }
}
