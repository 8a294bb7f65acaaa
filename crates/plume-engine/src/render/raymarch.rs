//! Compute pass that ray marches a density volume into an offscreen target.

use crate::volume::{needs_resize, workgroup_count, RayMarchUniforms};

use super::volume_textures::VolumeTextureSet;
use super::RenderError;

/// Format of the ray-march output. Filterable, so the composite pass can
/// sample it with a linear sampler.
pub const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

// ---------------------------------------------------------------------------
// OutputTarget
// ---------------------------------------------------------------------------

/// The storage texture the ray-march pass writes into.
///
/// Recreated only when the requested resolution changes.
#[derive(Default)]
pub struct OutputTarget {
    view: Option<wgpu::TextureView>,
    size: Option<(u32, u32)>,
}

impl OutputTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure the target exists at `width` x `height`.
    ///
    /// Returns `true` if a new texture was allocated.
    pub fn ensure_size(&mut self, device: &wgpu::Device, width: u32, height: u32) -> bool {
        let requested = (width.max(1), height.max(1));
        if !needs_resize(self.size, requested) {
            return false;
        }

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("plume_raymarch_output"),
            size: wgpu::Extent3d {
                width: requested.0,
                height: requested.1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OUTPUT_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        self.view = Some(texture.create_view(&wgpu::TextureViewDescriptor::default()));
        self.size = Some(requested);
        tracing::debug!(width = requested.0, height = requested.1, "ray-march target allocated");
        true
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.size
    }

    pub fn view(&self) -> Option<&wgpu::TextureView> {
        self.view.as_ref()
    }
}

// ---------------------------------------------------------------------------
// RayMarchPass
// ---------------------------------------------------------------------------

/// Compute pipeline plus the uniform buffer it reads.
///
/// Bindings:
///
/// | Binding | Resource |
/// |---------|----------|
/// | 0 | density, `R32Float` 3D |
/// | 1 | velocity, `Rgba32Float` 3D |
/// | 2 | output, `Rgba16Float` storage 2D |
/// | 3 | [`RayMarchUniforms`] |
pub struct RayMarchPass {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
}

fn volume_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D3,
            multisampled: false,
        },
        count: None,
    }
}

impl RayMarchPass {
    /// Build the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Pipeline`] if the device rejects the shader or
    /// pipeline. Callers treat that as "ray marching unavailable" and keep
    /// presenting the source frame.
    pub fn new(device: &wgpu::Device) -> Result<Self, RenderError> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("plume_raymarch_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("raymarch.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("plume_raymarch_bind_group_layout"),
            entries: &[
                volume_entry(0),
                volume_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: OUTPUT_FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
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
            label: Some("plume_raymarch_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("plume_raymarch_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("plume_raymarch_uniforms"),
            size: std::mem::size_of::<RayMarchUniforms>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(RenderError::Pipeline {
                stage: "ray-march",
                message: err.to_string(),
            });
        }

        Ok(Self {
            pipeline,
            bind_group_layout,
            uniform_buffer,
        })
    }

    /// Record one dispatch covering the whole target.
    ///
    /// Does nothing if the target has not been allocated yet.
    pub fn dispatch(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        volume: &VolumeTextureSet,
        target: &OutputTarget,
        uniforms: &RayMarchUniforms,
    ) {
        let (Some(output_view), Some((width, height))) = (target.view(), target.size()) else {
            return;
        };

        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(uniforms));

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("plume_raymarch_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(volume.density_view()),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(volume.velocity_view()),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(output_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let [groups_x, groups_y, groups_z] = workgroup_count(width, height);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("plume_raymarch_pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(groups_x, groups_y, groups_z);
    }
}
