//! Tests for the volume renderer.
//!
//! Most of these run without a GPU: they check the byte layout the shader
//! depends on and the CPU-side decisions the renderer makes each frame. The
//! ones that need a device return early when no adapter is available.

#[cfg(feature = "renderer")]
mod tests {
    use glam::Vec3;
    use plume_bridge::{FieldBuffer, FieldFormat, FieldSource, GridDims, SoftwareEngine};
    use plume_engine::coordinator::{Coordinator, CoordinatorConfig, FrameUpdate};
    use plume_engine::grid::GridDesc;
    use plume_engine::render::{CompositeMode, OutputTarget, VolumeCache};
    use plume_engine::resources::GridId;
    use plume_engine::volume::{
        aspect_ratio, density_texels, velocity_texels, workgroup_count, CameraState,
        RayMarchSettings, RayMarchUniforms, VolumeTransform,
    };

    fn uniforms() -> RayMarchUniforms {
        let camera = CameraState::looking_at(Vec3::new(0.0, 1.0, 6.0), Vec3::ZERO);
        let volume = VolumeTransform::for_grid(GridDims::new(32, 64, 32), 0.1, [0.0, 1.0, 0.0]);
        RayMarchUniforms::new(
            &camera,
            &volume,
            &RayMarchSettings::default(),
            (1024, 1024),
            aspect_ratio(1280, 720),
        )
    }

    fn headless_device() -> Option<(wgpu::Device, wgpu::Queue)> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))?;
        pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor::default(), None)).ok()
    }

    /// One tick over a 4096x1x1 grid and an 8x8x8 grid.
    fn update_with_oversized_grid() -> (FrameUpdate, GridId, GridId) {
        let mut coordinator = Coordinator::new(Box::new(SoftwareEngine::new()), CoordinatorConfig::default());
        coordinator.initialize().unwrap();
        let large = coordinator.create_grid(GridDesc::new(4096, 1, 1, 0.01)).unwrap();
        let small = coordinator.create_grid(GridDesc::new(8, 8, 8, 0.25)).unwrap();
        let update = coordinator.tick();
        assert_eq!(update.uploads.len(), 2);
        (update, large, small)
    }

    // -----------------------------------------------------------------------
    // Uniform layout
    // -----------------------------------------------------------------------

    #[test]
    fn uniform_bytes_match_the_wgsl_struct() {
        let u = uniforms();
        let bytes = bytemuck::bytes_of(&u);
        assert_eq!(bytes.len(), 192);

        // mat4 (64) + six vec4 (96) puts the scalars at 160.
        let cell_size = f32::from_le_bytes(bytes[160..164].try_into().unwrap());
        assert_eq!(cell_size, 0.1);
        let max_steps = u32::from_le_bytes(bytes[176..180].try_into().unwrap());
        assert_eq!(max_steps, 128);
        let width = u32::from_le_bytes(bytes[180..184].try_into().unwrap());
        assert_eq!(width, 1024);
    }

    #[test]
    fn volume_placement_reaches_the_shader() {
        let u = uniforms();
        assert_eq!(u.volume_position, [0.0, 1.0, 0.0, 1.0]);
        assert!((u.volume_size[1] - 6.4).abs() < 1e-5);
        assert_eq!(u.camera_position, [0.0, 1.0, 6.0, 1.0]);
    }

    // -----------------------------------------------------------------------
    // Upload packing
    // -----------------------------------------------------------------------

    #[test]
    fn texel_bytes_match_row_pitch() {
        let dims = GridDims::new(5, 3, 2);
        let density = FieldBuffer::zeroed(dims, FieldFormat::Scalar, FieldSource::Native);
        let velocity = FieldBuffer::zeroed(dims, FieldFormat::Vector3, FieldSource::Native);

        let d = density_texels(density.data(), dims);
        let v = velocity_texels(velocity.data(), dims);
        let d_bytes: &[u8] = bytemuck::cast_slice(d);
        let v_bytes: &[u8] = bytemuck::cast_slice(&v);

        // bytes_per_row * rows_per_image * depth
        assert_eq!(d_bytes.len(), (5 * 4) * 3 * 2);
        assert_eq!(v_bytes.len(), (5 * 16) * 3 * 2);
    }

    // -----------------------------------------------------------------------
    // Frame decisions
    // -----------------------------------------------------------------------

    #[test]
    fn default_target_dispatch_size() {
        let s = RayMarchSettings::default();
        assert_eq!(workgroup_count(s.width, s.height), [128, 128, 1]);
    }

    #[test]
    fn disabled_ray_marching_passes_frames_through() {
        let mut s = RayMarchSettings::default();
        assert_eq!(CompositeMode::select(s.enabled, true), CompositeMode::Blend);
        s.enabled = false;
        assert_eq!(CompositeMode::select(s.enabled, true), CompositeMode::Passthrough);
    }

    #[test]
    fn grids_beyond_the_default_3d_limit_are_flagged() {
        let (update, large, _small) = update_with_oversized_grid();
        assert_eq!(wgpu::Limits::default().max_texture_dimension_3d, 2048);
        assert_eq!(VolumeCache::oversized(&update, &wgpu::Limits::default()), vec![large]);
    }

    // -----------------------------------------------------------------------
    // Device-backed
    // -----------------------------------------------------------------------

    #[test]
    fn oversized_grid_is_skipped_not_uploaded() {
        let Some((device, queue)) = headless_device() else {
            return;
        };
        let (update, large, small) = update_with_oversized_grid();

        let mut cache = VolumeCache::new();
        assert_eq!(cache.apply(&device, &queue, &update), 1);
        assert!(cache.contains(small));
        assert!(!cache.contains(large));

        let released = FrameUpdate {
            released: vec![small],
            ..Default::default()
        };
        cache.apply(&device, &queue, &released);
        assert!(cache.is_empty());
    }

    #[test]
    fn output_target_reallocates_only_on_size_change() {
        let Some((device, _queue)) = headless_device() else {
            return;
        };
        let mut target = OutputTarget::new();
        let mut settings = RayMarchSettings::default();

        assert!(target.ensure_size(&device, settings.width, settings.height));
        assert!(!target.ensure_size(&device, settings.width, settings.height));

        settings.set_output_size(640, 4000);
        assert!(target.ensure_size(&device, settings.width, settings.height));
        assert_eq!(target.size(), Some((640, 2048)));
        assert!(!target.ensure_size(&device, 640, 2048));
    }
}
