//! Windowed runner: drives a [`Coordinator`] inside a winit event loop.
//!
//! Each `RedrawRequested` event runs one coordinator tick, hands the
//! resulting [`FrameUpdate`](crate::coordinator::FrameUpdate) to the
//! [`VolumeRenderer`], and presents a frame. Closing the window shuts the
//! coordinator down before the event loop exits.

use std::sync::Arc;

use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{WindowAttributes, WindowId};

use super::renderer::VolumeRenderer;
use crate::coordinator::Coordinator;
use crate::volume::{CameraState, RayMarchSettings};

/// Window parameters for [`run_windowed`].
#[derive(Debug, Clone)]
pub struct WindowOptions {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            title: "plume".to_owned(),
            width: 1280,
            height: 720,
        }
    }
}

/// Run `coordinator` in a window until it is closed.
///
/// The coordinator should already be initialized with its scene spawned.
///
/// # Errors
///
/// Returns an error if the event loop cannot be created, or if the window
/// or renderer fail to initialize.
pub fn run_windowed(
    coordinator: Coordinator,
    settings: RayMarchSettings,
    camera: CameraState,
    window: WindowOptions,
) -> Result<(), anyhow::Error> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App {
        state: AppState::Pending {
            coordinator,
            settings,
            camera,
            window,
        },
        init_failed: false,
    };

    event_loop.run_app(&mut app)?;

    if app.init_failed {
        return Err(anyhow::anyhow!(
            "failed to initialize windowed renderer (see logs for details)"
        ));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Internal state machine
// ---------------------------------------------------------------------------

/// Window creation has to happen in `resumed`, so the app starts `Pending`
/// and moves to `Running` once the window and renderer exist.
enum AppState {
    Pending {
        coordinator: Coordinator,
        settings: RayMarchSettings,
        camera: CameraState,
        window: WindowOptions,
    },
    Running {
        coordinator: Coordinator,
        renderer: VolumeRenderer,
    },
    /// Placeholder while moving between states.
    Transitioning,
}

struct App {
    state: AppState,
    init_failed: bool,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop, mut coordinator: Coordinator) {
        coordinator.shutdown();
        self.init_failed = true;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let state = std::mem::replace(&mut self.state, AppState::Transitioning);
        match state {
            AppState::Pending {
                coordinator,
                settings,
                camera,
                window: options,
            } => {
                let attrs = WindowAttributes::default()
                    .with_title(options.title.as_str())
                    .with_inner_size(winit::dpi::PhysicalSize::new(options.width, options.height));

                let window = match event_loop.create_window(attrs) {
                    Ok(window) => Arc::new(window),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to create window, exiting");
                        self.fail(event_loop, coordinator);
                        return;
                    }
                };

                match pollster::block_on(VolumeRenderer::new(window.clone(), settings, camera)) {
                    Ok(renderer) => {
                        tracing::info!(
                            width = options.width,
                            height = options.height,
                            ray_march = renderer.ray_march_available(),
                            "window created"
                        );
                        window.request_redraw();
                        self.state = AppState::Running {
                            coordinator,
                            renderer,
                        };
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to initialize volume renderer, exiting");
                        self.fail(event_loop, coordinator);
                    }
                }
            }
            running @ AppState::Running { .. } => {
                self.state = running;
            }
            AppState::Transitioning => {
                tracing::warn!("resumed called during state transition");
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        let AppState::Running {
            coordinator,
            renderer,
        } = &mut self.state
        else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                let report = coordinator.shutdown();
                tracing::info!(
                    ticks = coordinator.tick_count(),
                    grids = report.grids_destroyed,
                    emitters = report.emitters_destroyed,
                    "window close requested, shutting down"
                );
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                tracing::debug!(width = new_size.width, height = new_size.height, "window resized");
                renderer.resize(new_size);
            }
            WindowEvent::RedrawRequested => {
                let update = coordinator.tick();
                renderer.apply(&update);

                match renderer.render() {
                    Ok(()) => {}
                    Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                        let size = renderer.window().inner_size();
                        renderer.resize(size);
                    }
                    Err(wgpu::SurfaceError::OutOfMemory) => {
                        tracing::error!("GPU out of memory, exiting");
                        coordinator.shutdown();
                        event_loop.exit();
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "surface error during render");
                    }
                }

                renderer.window().request_redraw();
            }
            _ => {}
        }
    }
}
