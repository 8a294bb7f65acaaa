//! GPU copies of exported grid fields.

use std::collections::{BTreeMap, BTreeSet};

use plume_bridge::GridDims;

use crate::coordinator::FrameUpdate;
use crate::grid::GridFields;
use crate::resources::GridId;
use crate::volume::{field_texels, fits_texture_3d, VolumeTransform};

/// Density as an `R32Float` 3D texture and velocity as an `Rgba32Float` 3D
/// texture, both sized to the grid.
///
/// A derived cache: [`upload`](Self::upload) rebuilds both textures whenever
/// the incoming fields have different dims.
pub struct VolumeTextureSet {
    dims: GridDims,
    density: wgpu::Texture,
    density_view: wgpu::TextureView,
    velocity: wgpu::Texture,
    velocity_view: wgpu::TextureView,
    generation: u64,
}

fn create_volume(
    device: &wgpu::Device,
    label: &str,
    dims: GridDims,
    format: wgpu::TextureFormat,
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: extent(dims),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D3,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

fn extent(dims: GridDims) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: dims.x,
        height: dims.y,
        depth_or_array_layers: dims.z,
    }
}

fn write_volume(queue: &wgpu::Queue, texture: &wgpu::Texture, dims: GridDims, bytes: &[u8], texel_size: u32) {
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytes,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(dims.x * texel_size),
            rows_per_image: Some(dims.y),
        },
        extent(dims),
    );
}

impl VolumeTextureSet {
    /// Allocate zeroed textures for `dims`.
    pub fn new(device: &wgpu::Device, dims: GridDims) -> Self {
        let (density, density_view) =
            create_volume(device, "plume_density_volume", dims, wgpu::TextureFormat::R32Float);
        let (velocity, velocity_view) =
            create_volume(device, "plume_velocity_volume", dims, wgpu::TextureFormat::Rgba32Float);
        Self {
            dims,
            density,
            density_view,
            velocity,
            velocity_view,
            generation: 0,
        }
    }

    /// Copy `fields` into the textures, rebuilding them first if the dims
    /// changed.
    ///
    /// # Panics
    ///
    /// Panics if a field's length does not match its dims.
    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, fields: &GridFields) {
        let dims = fields.dims();
        if dims != self.dims {
            tracing::debug!(from = %self.dims, to = %dims, "rebuilding volume textures");
            *self = Self::new(device, dims);
        }

        let (density, velocity) = field_texels(fields, self.dims);
        write_volume(queue, &self.density, dims, bytemuck::cast_slice(density), 4);
        write_volume(queue, &self.velocity, dims, bytemuck::cast_slice(&velocity), 16);

        self.generation = fields.generation;
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    /// Generation of the fields last uploaded.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn density_view(&self) -> &wgpu::TextureView {
        &self.density_view
    }

    pub fn velocity_view(&self) -> &wgpu::TextureView {
        &self.velocity_view
    }
}

// ---------------------------------------------------------------------------
// VolumeCache
// ---------------------------------------------------------------------------

/// Textures and placement of one grid's volume.
pub struct VolumeSlot {
    pub textures: VolumeTextureSet,
    pub transform: VolumeTransform,
}

/// Every grid's volume textures, kept in step with the coordinator's
/// [`FrameUpdate`]s.
///
/// Grids larger than the device's 3D texture limit are skipped with an
/// error log instead of reaching the device.
#[derive(Default)]
pub struct VolumeCache {
    slots: BTreeMap<GridId, VolumeSlot>,
    rejected: BTreeSet<GridId>,
}

impl VolumeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grids uploaded in `update` whose dims exceed `limits`.
    pub fn oversized(update: &FrameUpdate, limits: &wgpu::Limits) -> Vec<GridId> {
        update
            .uploads
            .iter()
            .filter(|upload| !fits_texture_3d(upload.fields.dims(), limits.max_texture_dimension_3d))
            .map(|upload| upload.grid)
            .collect()
    }

    /// Drop released grids and upload the rest of `update`. Returns the
    /// number of grids uploaded.
    pub fn apply(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, update: &FrameUpdate) -> usize {
        for grid in &update.released {
            self.rejected.remove(grid);
            if self.slots.remove(grid).is_some() {
                tracing::debug!(%grid, "volume textures released");
            }
        }

        let oversized = Self::oversized(update, &device.limits());
        let mut uploaded = 0;
        for upload in &update.uploads {
            if oversized.contains(&upload.grid) {
                self.slots.remove(&upload.grid);
                if self.rejected.insert(upload.grid) {
                    tracing::error!(
                        grid = %upload.grid,
                        dims = %upload.fields.dims(),
                        limit = device.limits().max_texture_dimension_3d,
                        "grid exceeds the device's 3D texture limit, not rendering it"
                    );
                }
                continue;
            }
            self.rejected.remove(&upload.grid);

            let slot = self.slots.entry(upload.grid).or_insert_with(|| VolumeSlot {
                textures: VolumeTextureSet::new(device, upload.fields.dims()),
                transform: upload.volume,
            });
            slot.textures.upload(device, queue, &upload.fields);
            slot.transform = upload.volume;
            uploaded += 1;
        }
        uploaded
    }

    /// The lowest-id grid with textures, the one the renderer marches.
    pub fn first(&self) -> Option<&VolumeSlot> {
        self.slots.values().next()
    }

    pub fn contains(&self, grid: GridId) -> bool {
        self.slots.contains_key(&grid)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
