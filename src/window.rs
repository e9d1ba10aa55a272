//! Interactive demo window.
//!
//! Space pauses the simulation, Left/Right cycle the render mode, F1 toggles
//! the FPS readout in the title bar. Drag with the left mouse button to orbit
//! and use the wheel to zoom.

use std::sync::Arc;

use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::ActiveEventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crate::backend::WgpuDevice;
use crate::camera::Camera;
use crate::config::FluidConfig;
use crate::frame::FrameOrchestrator;
use crate::render::RenderMode;
use crate::time::FrameClock;

pub struct App {
    config: FluidConfig,
    window: Option<Arc<Window>>,
    frames: Option<FrameOrchestrator<WgpuDevice>>,
    camera: Camera,
    clock: FrameClock,
    mode: RenderMode,
    show_fps: bool,
    mouse_pressed: bool,
    last_mouse_pos: Option<(f64, f64)>,
}

impl App {
    pub fn new(config: FluidConfig) -> Self {
        Self {
            clock: FrameClock::new(config.grid),
            mode: config.render_mode,
            config,
            window: None,
            frames: None,
            camera: Camera::new(),
            show_fps: false,
            mouse_pressed: false,
            last_mouse_pos: None,
        }
    }

    fn title(&self) -> String {
        let grid = self.config.grid;
        let mut title = format!("fluidx {}x{}x{}", grid.x, grid.y, grid.z);
        if grid.is_volumetric() {
            title.push_str(&format!(" - {}", self.mode));
        }
        if self.clock.is_paused() {
            title.push_str(" (paused)");
        }
        if self.show_fps {
            title.push_str(&format!(" - {:.1} fps", self.clock.fps()));
        }
        title
    }

    fn handle_key(&mut self, key: KeyCode) {
        match key {
            KeyCode::Space => {
                self.clock.toggle_pause();
                log::info!("simulation {}", if self.clock.is_paused() { "paused" } else { "resumed" });
            }
            KeyCode::ArrowRight => self.set_mode(self.mode.next()),
            KeyCode::ArrowLeft => self.set_mode(self.mode.prev()),
            KeyCode::F1 => self.show_fps = !self.show_fps,
            _ => {}
        }
        if let Some(window) = &self.window {
            window.set_title(&self.title());
        }
    }

    fn set_mode(&mut self, mode: RenderMode) {
        self.mode = mode;
        log::info!("render mode: {}", mode);
    }

    fn redraw(&mut self) {
        let Some(frames) = &mut self.frames else {
            return;
        };

        let time_step = self.clock.tick();
        let (width, height) = frames.device().size();
        let aspect = width as f32 / height.max(1) as f32;
        let view = self.camera.view_matrix();
        let proj = self.camera.projection_matrix(aspect);

        frames.update(time_step, &view, &proj, self.camera.position());
        // A lost or timed-out surface drops this frame only.
        if let Err(e) = frames.render_frame(self.mode) {
            log::warn!("frame skipped: {}", e);
        }

        if let Some(window) = &self.window {
            if self.show_fps && self.clock.frame() % 30 == 0 {
                window.set_title(&self.title());
            }
            window.request_redraw();
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let (width, height) = self.config.viewport;
        let window_attrs = Window::default_attributes()
            .with_title(self.title())
            .with_inner_size(winit::dpi::PhysicalSize::new(width, height));

        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        let size = window.inner_size();
        let config = self
            .config
            .clone()
            .with_viewport(size.width.max(1), size.height.max(1));
        let frames = pollster::block_on(WgpuDevice::new(Arc::clone(&window)))
            .and_then(|device| FrameOrchestrator::new(device, &config));

        match frames {
            Ok(frames) => {
                log::info!("simulating {:?} grid", config.grid.dims());
                self.frames = Some(frames);
                self.window = Some(window);
            }
            Err(e) => {
                log::error!("{}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(physical_size) => {
                if let Some(frames) = &mut self.frames {
                    frames.device_mut().resize(physical_size.width, physical_size.height);
                    frames
                        .fluid_mut()
                        .set_viewport(physical_size.width.max(1), physical_size.height.max(1));
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => self.handle_key(key),
            WindowEvent::MouseInput { state, button, .. } => {
                if button == MouseButton::Left {
                    self.mouse_pressed = state == ElementState::Pressed;
                    if !self.mouse_pressed {
                        self.last_mouse_pos = None;
                    }
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                if self.mouse_pressed {
                    if let Some((last_x, last_y)) = self.last_mouse_pos {
                        let dx = position.x - last_x;
                        let dy = position.y - last_y;
                        self.camera.orbit(dx as f32, dy as f32);
                    }
                    self.last_mouse_pos = Some((position.x, position.y));
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let scroll = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 * 0.1,
                };
                self.camera.zoom(scroll);
            }
            WindowEvent::RedrawRequested => self.redraw(),
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(frames) = &mut self.frames {
            frames.wait_for_gpu();
        }
    }
}
