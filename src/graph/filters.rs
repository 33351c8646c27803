//! Built-in filters
//!
//! Each filter handles CPU-resident framebuffers directly and, when created
//! with a GPU pass, texture framebuffers through a fullscreen fragment shader.

use std::sync::Arc;

use super::operators::ImageOperator;
use crate::error::PlayerError;
use crate::gpu_context::GpuContext;
use crate::render::{FramebufferCache, FrameStorage, GpuTexture, RenderFramebuffer, TextureKey, OUTPUT_FORMAT};
use crate::shaders;

/// Uniform block shared by the filter shaders (must match `FilterParams` in WGSL)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FilterParams {
    /// 1/width, 1/height, width, height
    pub texel: [f32; 4],
    /// Filter-specific values
    pub values: [f32; 4],
}

impl FilterParams {
    pub fn new(width: u32, height: u32, values: [f32; 4]) -> Self {
        let (w, h) = (width.max(1) as f32, height.max(1) as f32);
        Self {
            texel: [1.0 / w, 1.0 / h, w, h],
            values,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GPU PASS
// ═══════════════════════════════════════════════════════════════════════════════

/// One fullscreen fragment pass from a cached texture to another
pub struct FullscreenFilterPass {
    gpu: Arc<GpuContext>,
    cache: FramebufferCache<GpuTexture>,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    params_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    label: &'static str,
}

impl FullscreenFilterPass {
    pub fn new(gpu: Arc<GpuContext>, cache: FramebufferCache<GpuTexture>, label: &'static str, fragment: &str) -> Self {
        let device = &gpu.device;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(shaders::with_fullscreen_vertex(fragment).into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Filter Bind Group Layout"),
            entries: &[
                // Input texture
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
                // Sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                // Parameters
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
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
            label: Some("Filter Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
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

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Filter Params Buffer"),
            size: std::mem::size_of::<FilterParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // Nearest keeps pixellated blocks hard-edged
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Filter Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            gpu,
            cache,
            pipeline,
            bind_group_layout,
            params_buffer,
            sampler,
            label,
        }
    }

    /// Render `input` into a freshly leased texture of the same size
    pub fn run(&self, input: &RenderFramebuffer, texture: &GpuTexture, values: [f32; 4]) -> Result<RenderFramebuffer, PlayerError> {
        let params = FilterParams::new(input.size.width, input.size.height, values);
        self.gpu
            .queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        let output = self.cache.acquire(TextureKey::new(input.size, OUTPUT_FORMAT))?;

        let device = &self.gpu.device;
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Filter Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&texture.view),
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

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(self.label),
        });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(self.label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &output.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
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

        Ok(input.derive(input.size, FrameStorage::Texture(Arc::new(output))))
    }
}

/// Run `gpu_pass` or `cpu` depending on where the framebuffer lives
fn dispatch(
    label: &str,
    input: &RenderFramebuffer,
    pass: Option<&FullscreenFilterPass>,
    values: [f32; 4],
    cpu: impl FnOnce(&[u8]) -> Vec<u8>,
) -> Result<Option<RenderFramebuffer>, PlayerError> {
    match (&input.storage, pass) {
        (FrameStorage::Pixels(pixels), _) => {
            let out = cpu(pixels);
            Ok(Some(input.derive(input.size, FrameStorage::Pixels(Arc::new(out)))))
        }
        (FrameStorage::Texture(texture), Some(pass)) => pass.run(input, texture, values).map(Some),
        (FrameStorage::Texture(_), None) => Err(PlayerError::UnsupportedStorage {
            operator: label.to_string(),
            storage: input.storage.kind(),
        }),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILTERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Forwards every frame unchanged
#[derive(Debug, Default)]
pub struct IdentityFilter;

impl IdentityFilter {
    pub fn new() -> Self {
        Self
    }
}

impl ImageOperator for IdentityFilter {
    fn label(&self) -> &str {
        "identity"
    }

    fn process(&mut self, input: &RenderFramebuffer, _slot: usize) -> Result<Option<RenderFramebuffer>, PlayerError> {
        Ok(Some(input.clone()))
    }
}

/// Color inversion blended by `amount`
pub struct InvertFilter {
    amount: f32,
    pass: Option<FullscreenFilterPass>,
}

impl InvertFilter {
    pub fn new(amount: f32) -> Self {
        Self {
            amount: amount.clamp(0.0, 1.0),
            pass: None,
        }
    }

    pub fn with_gpu(mut self, gpu: Arc<GpuContext>, cache: FramebufferCache<GpuTexture>) -> Self {
        self.pass = Some(FullscreenFilterPass::new(gpu, cache, "Invert Pass", shaders::INVERT_FRAGMENT));
        self
    }

    pub fn amount(&self) -> f32 {
        self.amount
    }

    fn invert_pixels(&self, pixels: &[u8]) -> Vec<u8> {
        let amount = self.amount;
        pixels
            .chunks_exact(4)
            .flat_map(|px| {
                let mix = |c: u8| {
                    let c = c as f32;
                    (c + ((255.0 - c) - c) * amount).round() as u8
                };
                [mix(px[0]), mix(px[1]), mix(px[2]), px[3]]
            })
            .collect()
    }
}

impl ImageOperator for InvertFilter {
    fn label(&self) -> &str {
        "invert"
    }

    fn process(&mut self, input: &RenderFramebuffer, _slot: usize) -> Result<Option<RenderFramebuffer>, PlayerError> {
        dispatch("invert", input, self.pass.as_ref(), [self.amount, 0.0, 0.0, 0.0], |px| {
            self.invert_pixels(px)
        })
    }
}

/// Default block width as a fraction of the frame width
pub const DEFAULT_PIXEL_WIDTH: f32 = 0.05;

/// Square-block pixellation
///
/// Block width is a fraction of the frame width; block height is derived from
/// the aspect ratio so blocks stay square in pixels.
pub struct PixellateFilter {
    fractional_width: f32,
    pass: Option<FullscreenFilterPass>,
}

impl Default for PixellateFilter {
    fn default() -> Self {
        Self::new(DEFAULT_PIXEL_WIDTH)
    }
}

impl PixellateFilter {
    pub fn new(fractional_width: f32) -> Self {
        Self {
            fractional_width: fractional_width.clamp(0.0, 1.0),
            pass: None,
        }
    }

    pub fn with_gpu(mut self, gpu: Arc<GpuContext>, cache: FramebufferCache<GpuTexture>) -> Self {
        self.pass = Some(FullscreenFilterPass::new(
            gpu,
            cache,
            "Pixellate Pass",
            shaders::PIXELLATE_FRAGMENT,
        ));
        self
    }

    pub fn fractional_width(&self) -> f32 {
        self.fractional_width
    }

    fn pixellate(&self, width: u32, height: u32, pixels: &[u8]) -> Vec<u8> {
        let (w, h) = (width as f32, height as f32);
        let dx = self.fractional_width.max(1.0 / w);
        let dy = dx * w / h;

        // Map a pixel index to the index of its block's center sample
        let center = |i: u32, extent: f32, step: f32, max: u32| {
            let t = (i as f32 + 0.5) / extent;
            let s = t - (t % step) + 0.5 * step;
            ((s * extent) as u32).min(max)
        };

        let mut out = Vec::with_capacity(pixels.len());
        for y in 0..height {
            let sy = center(y, h, dy, height - 1);
            for x in 0..width {
                let sx = center(x, w, dx, width - 1);
                let i = ((sy * width + sx) * 4) as usize;
                out.extend_from_slice(&pixels[i..i + 4]);
            }
        }
        out
    }
}

impl ImageOperator for PixellateFilter {
    fn label(&self) -> &str {
        "pixellate"
    }

    fn process(&mut self, input: &RenderFramebuffer, _slot: usize) -> Result<Option<RenderFramebuffer>, PlayerError> {
        if input.size.is_empty() {
            return Ok(Some(input.clone()));
        }
        let aspect = input.size.height as f32 / input.size.width as f32;
        let (width, height) = (input.size.width, input.size.height);
        dispatch(
            "pixellate",
            input,
            self.pass.as_ref(),
            [self.fractional_width, aspect, 0.0, 0.0],
            |px| self.pixellate(width, height, px),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::{FrameSize, MediaTime};

    fn gradient(width: u32, height: u32) -> RenderFramebuffer {
        let mut pixels = Vec::new();
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[(x * 10) as u8, (y * 10) as u8, 0, 255]);
            }
        }
        RenderFramebuffer::from_pixels(FrameSize::new(width, height), MediaTime::from_millis(40), pixels)
    }

    fn pixel(fb: &RenderFramebuffer, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * fb.size.width + x) * 4) as usize;
        let p = &fb.pixels().unwrap()[i..i + 4];
        [p[0], p[1], p[2], p[3]]
    }

    #[test]
    fn test_filter_params_size() {
        assert_eq!(std::mem::size_of::<FilterParams>(), 32);
        let params = FilterParams::new(4, 2, [0.5, 0.0, 0.0, 0.0]);
        assert_eq!(params.texel, [0.25, 0.5, 4.0, 2.0]);
    }

    #[test]
    fn test_identity_passes_frame_through() {
        let input = gradient(2, 2);
        let output = IdentityFilter::new().process(&input, 0).unwrap().unwrap();
        assert_eq!(output.pixels(), input.pixels());
        assert_eq!(output.millis(), 40);
    }

    #[test]
    fn test_full_invert() {
        let input = RenderFramebuffer::from_pixels(FrameSize::new(1, 1), MediaTime::ZERO, vec![0, 100, 255, 200]);
        let output = InvertFilter::new(1.0).process(&input, 0).unwrap().unwrap();
        assert_eq!(output.pixels().unwrap(), &[255, 155, 0, 200]);
    }

    #[test]
    fn test_zero_amount_invert_is_noop() {
        let input = gradient(3, 1);
        let output = InvertFilter::new(0.0).process(&input, 0).unwrap().unwrap();
        assert_eq!(output.pixels(), input.pixels());
    }

    #[test]
    fn test_pixellate_blocks_share_center_sample() {
        let input = gradient(4, 4);
        let output = PixellateFilter::new(0.5).process(&input, 0).unwrap().unwrap();
        // 2x2 blocks sampled at their lower-right center pixel
        assert_eq!(pixel(&output, 0, 0), pixel(&input, 1, 1));
        assert_eq!(pixel(&output, 1, 1), pixel(&input, 1, 1));
        assert_eq!(pixel(&output, 2, 0), pixel(&input, 3, 1));
        assert_eq!(pixel(&output, 3, 3), pixel(&input, 3, 3));
        assert_eq!(output.millis(), 40);
    }

    #[test]
    fn test_pixellate_blocks_are_square_on_wide_frames() {
        let input = gradient(8, 4);
        let output = PixellateFilter::new(0.25).process(&input, 0).unwrap().unwrap();
        // 2 pixel blocks in both directions
        assert_eq!(pixel(&output, 0, 0), pixel(&output, 1, 1));
        assert_ne!(pixel(&output, 0, 0), pixel(&output, 0, 2));
    }

    #[test]
    fn test_default_pixel_width() {
        assert_eq!(PixellateFilter::default().fractional_width(), DEFAULT_PIXEL_WIDTH);
    }
}
