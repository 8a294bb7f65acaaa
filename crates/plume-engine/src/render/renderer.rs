//! Windowed volume renderer.
//!
//! [`VolumeRenderer`] owns the surface, device and queue. It does not own
//! the event loop or the simulation: the app runner feeds it one
//! [`FrameUpdate`] per tick via [`apply`](VolumeRenderer::apply) and then
//! calls [`render`](VolumeRenderer::render).

use std::sync::Arc;

use crate::coordinator::FrameUpdate;
use crate::volume::{aspect_ratio, CameraState, RayMarchSettings, RayMarchUniforms};

use super::composite::{CompositeMode, CompositePass};
use super::raymarch::{OutputTarget, RayMarchPass};
use super::volume_textures::VolumeCache;
use super::RenderError;

const BACKGROUND: wgpu::Color = wgpu::Color {
    r: 0.05,
    g: 0.05,
    b: 0.1,
    a: 1.0,
};

/// The offscreen frame the volume is composited over.
struct SourceFrame {
    view: wgpu::TextureView,
}

impl SourceFrame {
    fn new(device: &wgpu::Device, config: &wgpu::SurfaceConfiguration) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("plume_source_frame"),
            size: wgpu::Extent3d {
                width: config.width,
                height: config.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: config.format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        Self {
            view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
        }
    }
}

/// Ray-marching renderer for simulation grids.
///
/// If the ray-march pipeline cannot be built, the renderer keeps running
/// with ray marching unavailable and presents the source frame unchanged.
/// Only the lowest-id grid with uploaded fields is marched.
pub struct VolumeRenderer {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    window: Arc<winit::window::Window>,
    source: SourceFrame,
    raymarch: Option<RayMarchPass>,
    composite: CompositePass,
    output: OutputTarget,
    volumes: VolumeCache,
    settings: RayMarchSettings,
    /// Camera used to build the ray-march uniforms.
    pub camera: CameraState,
}

impl VolumeRenderer {
    /// Create the surface, device, and pipelines for `window`.
    ///
    /// Async because adapter and device selection are. Call with
    /// `pollster::block_on`.
    ///
    /// # Errors
    ///
    /// Returns an error if no adapter or device is available or the
    /// composite pipeline is rejected. A rejected ray-march pipeline is not
    /// an error; it disables ray marching.
    pub async fn new(
        window: Arc<winit::window::Window>,
        mut settings: RayMarchSettings,
        camera: CameraState,
    ) -> Result<Self, anyhow::Error> {
        settings.set_output_size(settings.width, settings.height);
        let size = window.inner_size();
        let width = size.width.max(1);
        let height = size.height.max(1);

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(RenderError::from)?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RenderError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("plume_volume_renderer"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(RenderError::from)?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| anyhow::anyhow!("surface reports no supported formats"))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width,
            height,
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let raymarch = match RayMarchPass::new(&device) {
            Ok(pass) => Some(pass),
            Err(e) => {
                tracing::error!(error = %e, "ray marching unavailable, presenting source frame only");
                None
            }
        };
        let composite = CompositePass::new(&device, surface_format)?;
        let source = SourceFrame::new(&device, &config);

        tracing::info!(width, height, format = ?surface_format, "volume renderer ready");

        Ok(Self {
            surface,
            device,
            queue,
            config,
            window,
            source,
            raymarch,
            composite,
            output: OutputTarget::new(),
            volumes: VolumeCache::new(),
            settings,
            camera,
        })
    }

    /// Upload the fields published this tick and drop released grids.
    ///
    /// Grids too large for the device are skipped and logged.
    pub fn apply(&mut self, update: &FrameUpdate) {
        self.volumes.apply(&self.device, &self.queue, update);
    }

    /// Draw and present one frame.
    ///
    /// # Errors
    ///
    /// Returns a [`wgpu::SurfaceError`] if the surface cannot provide a
    /// texture (window minimized, surface lost).
    pub fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let frame = self.surface.get_current_texture()?;
        let frame_view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("plume_frame_encoder"),
        });

        {
            let _clear = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("plume_source_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.source.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(BACKGROUND),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }

        let marched = self.march(&mut encoder);
        let mode = CompositeMode::select(self.settings.enabled, marched);
        self.composite.record(
            &self.device,
            &mut encoder,
            &self.source.view,
            self.output.view(),
            &frame_view,
            mode,
        );

        self.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        Ok(())
    }

    /// Record the ray-march dispatch. Returns `false` if nothing was marched.
    fn march(&mut self, encoder: &mut wgpu::CommandEncoder) -> bool {
        if !self.settings.enabled {
            return false;
        }
        let Some(pass) = &self.raymarch else {
            return false;
        };
        let Some(slot) = self.volumes.first() else {
            return false;
        };

        self.output
            .ensure_size(&self.device, self.settings.width, self.settings.height);
        let Some(size) = self.output.size() else {
            return false;
        };

        let aspect = aspect_ratio(self.config.width, self.config.height);
        let uniforms = RayMarchUniforms::new(&self.camera, &slot.transform, &self.settings, size, aspect);
        pass.dispatch(
            &self.device,
            &self.queue,
            encoder,
            &slot.textures,
            &self.output,
            &uniforms,
        );
        true
    }

    /// Resize the surface and source frame. Zero-sized requests are ignored.
    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
            self.source = SourceFrame::new(&self.device, &self.config);
        }
    }

    pub fn settings(&self) -> &RayMarchSettings {
        &self.settings
    }

    /// Change the ray-march resolution, clamped to 512..=2048 per axis. The
    /// output target is reallocated on the next frame if the size changed.
    pub fn set_output_size(&mut self, width: u32, height: u32) {
        self.settings.set_output_size(width, height);
        tracing::debug!(width = self.settings.width, height = self.settings.height, "ray-march size requested");
    }

    /// Turn ray marching on or off. When off, frames pass through.
    pub fn set_ray_march_enabled(&mut self, enabled: bool) {
        self.settings.enabled = enabled;
    }

    /// Whether the ray-march pipeline was built successfully.
    pub fn ray_march_available(&self) -> bool {
        self.raymarch.is_some()
    }

    /// Number of grids with textures resident on the GPU.
    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    pub fn window(&self) -> &winit::window::Window {
        &self.window
    }
}
