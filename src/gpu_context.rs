//! Shared GPU context
//!
//! Provides `GpuContext` for the device and queue every GPU component is built
//! on, and `WindowGpuContext` for the surface the presenter draws into.
//! A context can also be created headless, without any window.

use std::sync::Arc;
use winit::window::Window;

use crate::error::PlayerError;

// ═══════════════════════════════════════════════════════════════════════════════
// GPU CONTEXT - Shared GPU resources
// ═══════════════════════════════════════════════════════════════════════════════

/// Device, queue and adapter shared by the converter, filters and presenter.
pub struct GpuContext {
    /// The wgpu instance
    pub instance: wgpu::Instance,
    /// The selected GPU adapter
    pub adapter: wgpu::Adapter,
    /// The GPU device for creating resources
    pub device: wgpu::Device,
    /// The command queue for submitting GPU work
    pub queue: wgpu::Queue,
    /// Format used for presentation. Frames are already gamma encoded, so a
    /// non-sRGB format is preferred.
    pub surface_format: wgpu::TextureFormat,
}

impl GpuContext {
    fn create_instance() -> wgpu::Instance {
        wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        })
    }

    /// Create a context able to present to `window`.
    ///
    /// Returns the window's surface alongside so it is only created once.
    pub async fn new(window: Arc<Window>) -> Result<(Self, wgpu::Surface<'static>), PlayerError> {
        let instance = Self::create_instance();

        let surface = instance
            .create_surface(window)
            .map_err(|e| PlayerError::GpuResource(format!("Failed to create surface: {}", e)))?;

        let mut context = Self::with_instance(instance, Some(&surface)).await?;

        let surface_caps = surface.get_capabilities(&context.adapter);
        context.surface_format = surface_caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| PlayerError::GpuResource("Surface reports no formats".into()))?;

        tracing::info!("Surface format: {:?}", context.surface_format);
        Ok((context, surface))
    }

    /// Create a context without a window (offscreen rendering only).
    pub async fn new_headless() -> Result<Self, PlayerError> {
        Self::with_instance(Self::create_instance(), None).await
    }

    async fn with_instance(
        instance: wgpu::Instance,
        compatible_surface: Option<&wgpu::Surface<'_>>,
    ) -> Result<Self, PlayerError> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| PlayerError::GpuResource("Failed to find suitable GPU adapter".into()))?;

        tracing::info!("Using GPU: {}", adapter.get_info().name);
        tracing::info!("Backend: {:?}", adapter.get_info().backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Filter Player Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| PlayerError::GpuResource(format!("Failed to create device: {}", e)))?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            surface_format: wgpu::TextureFormat::Rgba8Unorm,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WINDOW GPU CONTEXT - Per-window rendering resources
// ═══════════════════════════════════════════════════════════════════════════════

/// The surface a window presents into.
pub struct WindowGpuContext {
    /// The wgpu surface for this window
    pub surface: wgpu::Surface<'static>,
    /// Surface configuration
    pub config: wgpu::SurfaceConfiguration,
}

impl WindowGpuContext {
    /// Configure `surface` for presentation.
    ///
    /// With vsync the display paces presentation (Fifo); otherwise the
    /// fastest available mode is used and the tick scheduler paces frames.
    pub fn new(gpu: &GpuContext, surface: wgpu::Surface<'static>, size: winit::dpi::PhysicalSize<u32>, vsync: bool) -> Self {
        let surface_caps = surface.get_capabilities(&gpu.adapter);

        let present_mode = if vsync {
            wgpu::PresentMode::Fifo
        } else if surface_caps.present_modes.contains(&wgpu::PresentMode::Immediate) {
            wgpu::PresentMode::Immediate
        } else if surface_caps.present_modes.contains(&wgpu::PresentMode::Mailbox) {
            wgpu::PresentMode::Mailbox
        } else {
            wgpu::PresentMode::Fifo
        };

        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: gpu.surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };

        surface.configure(&gpu.device, &config);
        tracing::info!("Surface configured: {}x{} {:?}", config.width, config.height, present_mode);

        Self { surface, config }
    }

    /// Resize the window surface.
    pub fn resize(&mut self, gpu: &GpuContext, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&gpu.device, &self.config);
        }
    }

    /// Reconfigure after the surface was lost or outdated.
    pub fn reconfigure(&self, gpu: &GpuContext) {
        self.surface.configure(&gpu.device, &self.config);
    }

    /// Get the current surface size.
    pub fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }
}
