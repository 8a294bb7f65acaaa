//! A rising smoke column rendered with the volume ray marcher.
//!
//! Run with: `cargo run -p plume-engine --example smoke_column --features renderer [config.json]`
//!
//! With no config file, a 48x96x48 grid with one emitter near the floor is
//! used. Set `RUST_LOG=plume_engine=debug` for per-grid logging.

use glam::Vec3;
use plume_engine::prelude::*;

fn default_config() -> FlowConfig {
    FlowConfig {
        grid: GridDesc::new(48, 96, 48, 0.05),
        emitters: vec![EmitterDesc {
            position: [0.0, -1.8, 0.0],
            radius: 0.3,
            density: 1.5,
        }],
        placeholder_policy: PlaceholderPolicy::OnExportFailure,
        ..Default::default()
    }
}

#[cfg(feature = "link-native")]
fn engine() -> anyhow::Result<Box<dyn NativeEngine>> {
    Ok(Box::new(plume_engine::plume_bridge::LinkedEngine::claim()?))
}

#[cfg(not(feature = "link-native"))]
fn engine() -> anyhow::Result<Box<dyn NativeEngine>> {
    Ok(Box::new(SoftwareEngine::new()))
}

fn main() -> anyhow::Result<()> {
    init_tracing("info,wgpu_core=warn,wgpu_hal=warn");

    let config = match std::env::args().nth(1) {
        Some(path) => FlowConfig::load(&path)?,
        None => default_config(),
    };

    let mut coordinator = Coordinator::try_new(engine()?, CoordinatorConfig::try_from(&config)?)?;
    coordinator.initialize()?;
    let grid = coordinator.spawn_scene(&config)?;
    tracing::info!(%grid, dims = %config.grid.dims, "scene spawned");

    if config.headless {
        let uploads = coordinator.run_ticks(600);
        let report = coordinator.shutdown();
        tracing::info!(uploads, grids = report.grids_destroyed, "headless run finished");
        return Ok(());
    }

    let extent = config.grid.world_extent();
    let camera = CameraState::looking_at(
        Vec3::new(0.0, 0.0, extent[1] * 1.6),
        Vec3::from(config.grid.position),
    );

    run_windowed(
        coordinator,
        config.render,
        camera,
        WindowOptions {
            title: "plume: smoke column".to_owned(),
            ..Default::default()
        },
    )
}
