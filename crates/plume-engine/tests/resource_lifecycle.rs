//! Grid and emitter lifecycles against a recording engine.
//!
//! Every test checks what actually crossed the engine boundary, not just the
//! host-side state.

mod common;

use common::{count, invalid_handles, Call, RecordingEngine};
use plume_bridge::{FieldSource, SimulationBridge, SoftwareEngine};
use plume_dispatch::Dispatcher;
use plume_engine::emitter::{EmitterDesc, EmitterResource};
use plume_engine::grid::{
    ExportOutcome, ExportSettings, GridDesc, GridResource, GridState, PlaceholderPolicy,
};
use plume_engine::resources::ResourceError;
use plume_engine::volume::density_texels;

fn bridge_with(engine: SoftwareEngine) -> (SimulationBridge, Dispatcher, common::CallLog) {
    let dispatcher = Dispatcher::new();
    let (engine, calls) = RecordingEngine::new(engine);
    let bridge = SimulationBridge::new(Box::new(engine), dispatcher.handle());
    (bridge, dispatcher, calls)
}

fn small_grid(policy: PlaceholderPolicy) -> GridResource {
    GridResource::new(
        GridDesc::new(4, 4, 4, 0.5),
        ExportSettings {
            interval: 1,
            placeholder: policy,
        },
    )
}

// -- 1. creation --

#[test]
fn create_before_initialize_never_reaches_engine() {
    let (mut bridge, _dispatcher, calls) = bridge_with(SoftwareEngine::new());
    let mut grid = small_grid(PlaceholderPolicy::Never);

    assert_eq!(grid.create(&mut bridge), Err(ResourceError::BridgeNotInitialized));
    assert!(!grid.handle().is_valid());
    assert_eq!(grid.state(), GridState::Uninitialized);
    assert_eq!(count(&calls, |c| *c == Call::CreateGrid), 0);

    bridge.initialize().unwrap();
    let handle = grid.create(&mut bridge).unwrap();
    assert!(handle.is_valid());
    assert_eq!(grid.state(), GridState::Created);
    assert_eq!(count(&calls, |c| *c == Call::CreateGrid), 1);
}

#[test]
fn create_twice_returns_the_same_handle() {
    let (mut bridge, _dispatcher, calls) = bridge_with(SoftwareEngine::new());
    bridge.initialize().unwrap();
    let mut grid = small_grid(PlaceholderPolicy::Never);

    let first = grid.create(&mut bridge).unwrap();
    let second = grid.create(&mut bridge).unwrap();
    assert_eq!(first, second);
    assert_eq!(count(&calls, |c| *c == Call::CreateGrid), 1);
}

#[test]
fn engine_refusal_maps_to_resource_exhausted() {
    let (mut bridge, _dispatcher, _calls) = bridge_with(SoftwareEngine::new().with_grid_capacity(0));
    bridge.initialize().unwrap();
    let mut grid = small_grid(PlaceholderPolicy::Never);

    assert_eq!(
        grid.create(&mut bridge),
        Err(ResourceError::ResourceExhausted { kind: "grid" })
    );
    assert_eq!(grid.state(), GridState::Uninitialized);
}

#[test]
fn invalid_descriptor_is_rejected_before_the_engine() {
    let (mut bridge, _dispatcher, calls) = bridge_with(SoftwareEngine::new());
    bridge.initialize().unwrap();
    let mut grid = GridResource::new(GridDesc::new(0, 4, 4, 0.5), ExportSettings::default());

    assert!(matches!(
        grid.create(&mut bridge),
        Err(ResourceError::InvalidDescriptor { .. })
    ));
    assert_eq!(count(&calls, |c| *c == Call::CreateGrid), 0);
}

// -- 2. export --

#[test]
fn export_before_any_step_publishes_native_fields() {
    let (mut bridge, _dispatcher, _calls) = bridge_with(SoftwareEngine::new());
    bridge.initialize().unwrap();
    let mut grid = small_grid(PlaceholderPolicy::Never);
    grid.create(&mut bridge).unwrap();

    assert_eq!(grid.export(&mut bridge).unwrap(), ExportOutcome::Native);
    let fields = grid.fields().unwrap();
    assert_eq!(fields.generation, 1);
    assert_eq!(fields.density.data().len(), 64);
    assert_eq!(fields.velocity.data().len(), 64 * 3);
    assert_eq!(fields.density.source(), FieldSource::Native);
    assert!(fields.density.data().iter().all(|&d| d == 0.0));
    assert_eq!(grid.state(), GridState::FieldsReady);
}

#[test]
fn unavailable_export_keeps_previous_fields_when_placeholders_are_off() {
    let (mut bridge, _dispatcher, _calls) = bridge_with(SoftwareEngine::new().with_exports_disabled());
    bridge.initialize().unwrap();
    let mut grid = small_grid(PlaceholderPolicy::Never);
    grid.create(&mut bridge).unwrap();

    assert_eq!(grid.step(&mut bridge, 0.016).unwrap(), ExportOutcome::Unavailable);
    assert!(grid.fields().is_none());
    assert_eq!(grid.state(), GridState::Stepping);
}

#[test]
fn placeholder_substitutes_for_failed_export() {
    let (mut bridge, _dispatcher, _calls) = bridge_with(SoftwareEngine::new().with_exports_disabled());
    bridge.initialize().unwrap();
    let mut grid = small_grid(PlaceholderPolicy::OnExportFailure);
    grid.create(&mut bridge).unwrap();

    assert_eq!(grid.step(&mut bridge, 0.016).unwrap(), ExportOutcome::Placeholder);
    let fields = grid.fields().unwrap();
    assert!(fields.is_placeholder());
    assert_eq!(fields.density.source(), FieldSource::Placeholder);
    assert!(fields.density.data().iter().any(|&d| d > 0.0));
    assert!(fields.velocity.data().iter().all(|&v| v == 0.0));
}

#[test]
fn always_policy_skips_native_export() {
    let (mut bridge, _dispatcher, calls) = bridge_with(SoftwareEngine::new());
    bridge.initialize().unwrap();
    let mut grid = small_grid(PlaceholderPolicy::Always);
    grid.create(&mut bridge).unwrap();

    assert_eq!(grid.export(&mut bridge).unwrap(), ExportOutcome::Placeholder);
    assert_eq!(count(&calls, |c| matches!(c, Call::ExportDensity(_))), 0);
}

#[test]
fn export_cadence_counts_steps() {
    let (mut bridge, _dispatcher, calls) = bridge_with(SoftwareEngine::new());
    bridge.initialize().unwrap();
    let mut grid = GridResource::new(
        GridDesc::new(4, 4, 4, 0.5),
        ExportSettings {
            interval: 3,
            placeholder: PlaceholderPolicy::Never,
        },
    );
    grid.create(&mut bridge).unwrap();

    let outcomes: Vec<_> = (0..6).map(|_| grid.step(&mut bridge, 0.016).unwrap()).collect();
    assert_eq!(
        outcomes,
        vec![
            ExportOutcome::Skipped,
            ExportOutcome::Skipped,
            ExportOutcome::Native,
            ExportOutcome::Skipped,
            ExportOutcome::Skipped,
            ExportOutcome::Native,
        ]
    );
    assert_eq!(count(&calls, |c| matches!(c, Call::StepGrid(_))), 6);
    assert_eq!(count(&calls, |c| matches!(c, Call::ExportDensity(_))), 2);
    assert_eq!(grid.fields().unwrap().generation, 2);
}

#[test]
fn exported_density_packs_bit_for_bit() {
    let (mut bridge, _dispatcher, _calls) = bridge_with(SoftwareEngine::new());
    bridge.initialize().unwrap();

    let mut emitter = EmitterResource::new(EmitterDesc::default());
    emitter.create(&mut bridge).unwrap();
    let mut grid = small_grid(PlaceholderPolicy::Never);
    grid.create(&mut bridge).unwrap();
    for _ in 0..4 {
        grid.step(&mut bridge, 0.016).unwrap();
    }

    let fields = grid.fields().unwrap();
    let native = bridge.export_density(grid.handle()).unwrap();
    let packed = density_texels(fields.density.data(), fields.dims());

    assert!(native.data().iter().any(|&d| d > 0.0));
    assert_eq!(packed.len(), native.data().len());
    for (a, b) in packed.iter().zip(native.data()) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
}

// -- 3. destruction --

#[test]
fn destroy_is_idempotent() {
    let (mut bridge, _dispatcher, calls) = bridge_with(SoftwareEngine::new());
    bridge.initialize().unwrap();
    let mut grid = small_grid(PlaceholderPolicy::Never);
    grid.create(&mut bridge).unwrap();
    grid.export(&mut bridge).unwrap();

    assert!(grid.destroy(&mut bridge));
    assert!(!grid.destroy(&mut bridge));
    assert_eq!(grid.state(), GridState::Destroyed);
    assert!(grid.fields().is_none());
    assert_eq!(count(&calls, |c| matches!(c, Call::DestroyGrid(_))), 1);
}

#[test]
fn operations_after_destroy_do_not_reach_engine() {
    let (mut bridge, _dispatcher, calls) = bridge_with(SoftwareEngine::new());
    bridge.initialize().unwrap();
    let mut grid = small_grid(PlaceholderPolicy::Never);
    grid.create(&mut bridge).unwrap();
    grid.destroy(&mut bridge);

    assert!(matches!(
        grid.step(&mut bridge, 0.016),
        Err(ResourceError::InvalidHandle { kind: "grid" })
    ));
    assert!(grid.export(&mut bridge).is_err());

    let mut emitter = EmitterResource::new(EmitterDesc::default());
    assert!(!emitter.destroy(&mut bridge));
    assert!(emitter.sync(&mut bridge).is_err());

    assert!(invalid_handles(&calls).is_empty());
    assert_eq!(count(&calls, |c| matches!(c, Call::StepGrid(_))), 0);
}

#[test]
fn emitter_parameters_sync_to_engine() {
    let (mut bridge, _dispatcher, calls) = bridge_with(SoftwareEngine::new());
    bridge.initialize().unwrap();
    let mut emitter = EmitterResource::new(EmitterDesc::default());
    let handle = emitter.create(&mut bridge).unwrap();

    emitter.set_position([0.0, 1.0, 0.0]);
    emitter.set_params(0.25, 2.0);
    emitter.sync(&mut bridge).unwrap();

    assert_eq!(emitter.desc().position, [0.0, 1.0, 0.0]);
    assert_eq!(emitter.desc().radius, 0.25);
    assert_eq!(
        count(&calls, |c| *c == Call::SetEmitterParams(handle.raw())),
        1
    );
}
