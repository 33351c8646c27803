//! Window presentation sink
//!
//! Draws framebuffers upright and aspect-fitted into the window surface.
//! CPU-resident framebuffers are first uploaded into a scratch texture.

use std::sync::{Arc, Mutex, PoisonError};

use super::framebuffer::{FrameStorage, RenderFramebuffer};
use super::texture_cache::GpuTexture;
use super::OUTPUT_FORMAT;
use crate::gpu_context::{GpuContext, WindowGpuContext};
use crate::graph::FrameConsumer;
use crate::shaders;
use crate::video::{FrameOrientation, FrameSize};

/// Surface shared between the presenter and the window event handler
pub type SharedSurface = Arc<Mutex<WindowGpuContext>>;

/// Parameters for presentation, matching the shader uniform
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PresentParams {
    /// Quad scale in clip space (1.0, 1.0 = fill surface)
    pub scale: [f32; 2],
    /// Padding for 16-byte alignment
    pub _padding: [f32; 2],
    /// Rows of the render-UV to source-UV matrix
    pub uv_row0: [f32; 4],
    pub uv_row1: [f32; 4],
}

impl PresentParams {
    /// Letterboxed placement of an oriented frame on a surface
    pub fn fit(orientation: &FrameOrientation, surface_width: u32, surface_height: u32) -> Self {
        let display = orientation.render_size();
        let scale = fit_aspect_ratio(display, surface_width, surface_height);
        let [row0, row1] = orientation.uv_transform();
        Self {
            scale,
            _padding: [0.0; 2],
            uv_row0: [row0[0], row0[1], row0[2], 0.0],
            uv_row1: [row1[0], row1[1], row1[2], 0.0],
        }
    }
}

/// Scale that preserves aspect ratio (letterbox/pillarbox)
pub fn fit_aspect_ratio(content: FrameSize, screen_width: u32, screen_height: u32) -> [f32; 2] {
    if content.is_empty() || screen_width == 0 || screen_height == 0 {
        return [1.0, 1.0];
    }
    let content_aspect = content.width as f32 / content.height as f32;
    let screen_aspect = screen_width as f32 / screen_height as f32;

    if content_aspect > screen_aspect {
        // Wider than the screen: bars top and bottom
        [1.0, screen_aspect / content_aspect]
    } else {
        // Taller than the screen: bars on the sides
        [content_aspect / screen_aspect, 1.0]
    }
}

/// Sink that presents every framebuffer it receives to a window
pub struct SurfacePresenter {
    gpu: Arc<GpuContext>,
    surface: SharedSurface,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    params_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    /// Upload target for CPU-resident framebuffers
    scratch: Option<(FrameSize, GpuTexture)>,
    presented: u64,
}

impl SurfacePresenter {
    pub fn new(gpu: Arc<GpuContext>, surface: SharedSurface) -> Self {
        let device = &gpu.device;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Present Shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::PRESENT_SHADER.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Present Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
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
            label: Some("Present Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Present Pipeline"),
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
                    format: gpu.surface_format,
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

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Present Params Buffer"),
            size: std::mem::size_of::<PresentParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Present Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            gpu,
            surface,
            pipeline,
            bind_group_layout,
            params_buffer,
            sampler,
            scratch: None,
            presented: 0,
        }
    }

    pub fn frames_presented(&self) -> u64 {
        self.presented
    }

    /// Upload tightly packed RGBA8 pixels into the scratch texture
    fn upload_pixels(&mut self, size: FrameSize, pixels: &[u8]) {
        let device = &self.gpu.device;
        let scratch = match self.scratch.take() {
            Some((scratch_size, texture)) if scratch_size == size => texture,
            _ => {
                let texture = device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("Present Upload Texture"),
                    size: wgpu::Extent3d {
                        width: size.width.max(1),
                        height: size.height.max(1),
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: OUTPUT_FORMAT,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                });
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                GpuTexture { texture, view }
            }
        };

        self.gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &scratch.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * size.width),
                rows_per_image: Some(size.height),
            },
            wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
        );

        self.scratch = Some((size, scratch));
    }

    fn draw(&self, view: &wgpu::TextureView, framebuffer: &RenderFramebuffer) {
        let surface = self.surface.lock().unwrap_or_else(PoisonError::into_inner);
        let output = match surface.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                tracing::debug!("Present: surface lost, reconfiguring");
                surface.reconfigure(&self.gpu);
                return;
            }
            Err(e) => {
                tracing::warn!("Present: could not acquire surface texture: {}", e);
                return;
            }
        };

        let (width, height) = surface.size();
        let params = PresentParams::fit(&framebuffer.orientation, width, height);
        self.gpu
            .queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        let device = &self.gpu.device;
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Present Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.params_buffer.as_entire_binding(),
                },
            ],
        });

        let target = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Present Encoder"),
        });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Present Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target,
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
            // Two triangles covering the fitted quad
            render_pass.draw(0..6, 0..1);
        }
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        output.present();
    }
}

impl FrameConsumer for SurfacePresenter {
    fn label(&self) -> &str {
        "surface"
    }

    fn present(&mut self, framebuffer: &RenderFramebuffer) {
        match &framebuffer.storage {
            FrameStorage::Texture(lease) => self.draw(&lease.view, framebuffer),
            FrameStorage::Pixels(pixels) => {
                self.upload_pixels(framebuffer.size, pixels);
                if let Some((_, scratch)) = &self.scratch {
                    self.draw(&scratch.view, framebuffer);
                }
            }
        }
        self.presented += 1;
        tracing::trace!("Present: frame at {} ms", framebuffer.millis());
    }
}
