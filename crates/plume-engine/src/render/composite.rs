//! Final pass: copy the source frame to the surface, then blend the
//! ray-marched volume over it.

use super::RenderError;

/// What the composite pass does this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeMode {
    /// Copy the source frame unchanged.
    Passthrough,
    /// Copy the source frame and blend the volume output on top.
    Blend,
}

impl CompositeMode {
    /// Blend only when ray marching is enabled and there is a marched
    /// volume to show.
    pub fn select(enabled: bool, volume_ready: bool) -> Self {
        if enabled && volume_ready {
            Self::Blend
        } else {
            Self::Passthrough
        }
    }
}

/// Two fullscreen-triangle pipelines sharing one shader and bind group
/// layout: a replace blit and a premultiplied-alpha blend.
pub struct CompositePass {
    blit_pipeline: wgpu::RenderPipeline,
    blend_pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl CompositePass {
    /// # Errors
    ///
    /// Returns [`RenderError::Pipeline`] if the device rejects either pipeline.
    pub fn new(device: &wgpu::Device, target_format: wgpu::TextureFormat) -> Result<Self, RenderError> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("plume_composite_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("composite.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("plume_composite_bind_group_layout"),
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
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("plume_composite_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let make_pipeline = |label: &str, blend: wgpu::BlendState| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_fullscreen"),
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_sample"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: target_format,
                        blend: Some(blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };

        let blit_pipeline = make_pipeline("plume_composite_blit", wgpu::BlendState::REPLACE);
        let blend_pipeline = make_pipeline(
            "plume_composite_blend",
            wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING,
        );

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("plume_composite_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(RenderError::Pipeline {
                stage: "composite",
                message: err.to_string(),
            });
        }

        Ok(Self {
            blit_pipeline,
            blend_pipeline,
            bind_group_layout,
            sampler,
        })
    }

    fn bind(&self, device: &wgpu::Device, view: &wgpu::TextureView) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("plume_composite_bind_group"),
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
            ],
        })
    }

    /// Write `source` into `destination`, then blend `volume` over it when
    /// `mode` is [`CompositeMode::Blend`] and a volume view is given.
    pub fn record(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::TextureView,
        volume: Option<&wgpu::TextureView>,
        destination: &wgpu::TextureView,
        mode: CompositeMode,
    ) {
        let source_group = self.bind(device, source);
        let volume_group = match (mode, volume) {
            (CompositeMode::Blend, Some(view)) => Some(self.bind(device, view)),
            _ => None,
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("plume_composite_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: destination,
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

        pass.set_pipeline(&self.blit_pipeline);
        pass.set_bind_group(0, &source_group, &[]);
        pass.draw(0..3, 0..1);

        if let Some(group) = &volume_group {
            pass.set_pipeline(&self.blend_pipeline);
            pass.set_bind_group(0, group, &[]);
            pass.draw(0..3, 0..1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blends_only_when_enabled_and_ready() {
        assert_eq!(CompositeMode::select(true, true), CompositeMode::Blend);
        assert_eq!(CompositeMode::select(true, false), CompositeMode::Passthrough);
        assert_eq!(CompositeMode::select(false, true), CompositeMode::Passthrough);
        assert_eq!(CompositeMode::select(false, false), CompositeMode::Passthrough);
    }
}
