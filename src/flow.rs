//! Desktop host: a winit window driving an [`Engine`] on a [`WgpuDevice`].
//!
//! The event loop maps window events onto engine entry points:
//!
//! - resize → [`Engine::resize`]
//! - redraw → [`Engine::render`], then another redraw is requested
//! - left-drag → camera yaw/pitch, mouse wheel → camera distance
//! - arrow keys → camera roll, `R` → reset rotation
//!
//! Frame statistics are logged every few seconds.

use std::{path::PathBuf, sync::Arc};

use instant::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalPosition,
    event::{ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crate::{
    config::EngineConfig,
    engine::Engine,
    frame::{FrameOutcome, SkipReason},
    gpu::{GpuDevice, WgpuDevice},
    resources::assets::{FsAssetSource, ImageCrateDecoder},
};

const ROTATE_SPEED: f32 = 0.005;
const ZOOM_SPEED: f32 = 0.5;
const ROLL_STEP: f32 = 0.05;
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// What the desktop host opens.
#[derive(Clone, Debug)]
pub struct HostOptions {
    pub title: String,
    /// Directory the asset paths below are relative to.
    pub asset_root: PathBuf,
    pub models: Vec<String>,
    pub config: EngineConfig,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            title: "prism-ngin".to_string(),
            asset_root: PathBuf::from(crate::BUILT_ASSETS),
            models: Vec::new(),
            config: EngineConfig::default(),
        }
    }
}

struct App {
    options: HostOptions,
    async_runtime: tokio::runtime::Runtime,
    window: Option<Arc<Window>>,
    engine: Option<Engine>,
    dragging: bool,
    cursor: Option<PhysicalPosition<f64>>,
    last_stats: Instant,
}

impl App {
    fn new(options: HostOptions) -> anyhow::Result<Self> {
        Ok(Self {
            options,
            async_runtime: tokio::runtime::Runtime::new()?,
            window: None,
            engine: None,
            dragging: false,
            cursor: None,
            last_stats: Instant::now(),
        })
    }

    fn start(&mut self, window: Arc<Window>) -> anyhow::Result<Engine> {
        let device = self.async_runtime.block_on(WgpuDevice::new(window.clone()))?;
        let device: Arc<dyn GpuDevice> = Arc::new(device);
        let engine = Engine::new(
            device,
            Arc::new(FsAssetSource::new(self.options.asset_root.clone())),
            Arc::new(ImageCrateDecoder),
            self.options.config.clone(),
        )?;
        let size = window.inner_size();
        engine.init(size.width.max(1), size.height.max(1))?;
        for path in &self.options.models {
            let id = engine.load_model(path)?;
            log::info!("Model {path} loaded as {id:?}");
        }
        Ok(engine)
    }

    fn log_stats(&mut self, engine: &Engine) {
        if self.last_stats.elapsed() < STATS_INTERVAL {
            return;
        }
        let stats = engine.frame_stats();
        log::info!(
            "{} frames presented, {} dropped, last frame {:.2} ms",
            stats.frames_presented,
            stats.frames_dropped,
            stats.last_frame_time.as_secs_f64() * 1000.0
        );
        self.last_stats = Instant::now();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attributes = Window::default_attributes().with_title(self.options.title.clone());
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Failed to create a window: {e}");
                event_loop.exit();
                return;
            }
        };
        match self.start(window.clone()) {
            Ok(engine) => {
                self.engine = Some(engine);
                window.request_redraw();
                self.window = Some(window);
            }
            Err(e) => {
                log::error!("Failed to start the engine: {e:#}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        let Some(engine) = self.engine.take() else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => {
                engine.destroy();
                event_loop.exit();
                return;
            }
            WindowEvent::Resized(size) => engine.resize(size.width, size.height),
            WindowEvent::RedrawRequested => {
                if let FrameOutcome::Skipped(SkipReason::Failed) = engine.render() {
                    log::error!(
                        "Rendering stopped: {}",
                        engine.last_error().unwrap_or_default()
                    );
                    engine.destroy();
                    event_loop.exit();
                    return;
                }
                self.log_stats(&engine);
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => self.dragging = state == ElementState::Pressed,
            WindowEvent::CursorMoved { position, .. } => {
                if let (true, Some(last)) = (self.dragging, self.cursor) {
                    let dx = (position.x - last.x) as f32;
                    let dy = (position.y - last.y) as f32;
                    engine.rotate_camera(dx * ROTATE_SPEED, dy * ROTATE_SPEED, 0.0);
                }
                self.cursor = Some(position);
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 40.0,
                };
                engine.move_camera(lines * ZOOM_SPEED);
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => match code {
                KeyCode::ArrowLeft => engine.rotate_camera(0.0, 0.0, -ROLL_STEP),
                KeyCode::ArrowRight => engine.rotate_camera(0.0, 0.0, ROLL_STEP),
                KeyCode::KeyR => engine.set_camera_rotation(0.0, 0.0, 0.0),
                KeyCode::Escape => {
                    engine.destroy();
                    event_loop.exit();
                    return;
                }
                _ => {}
            },
            _ => {}
        }
        self.engine = Some(engine);
    }
}

/// Opens a window and runs the engine until it is closed.
pub fn run(options: HostOptions) -> anyhow::Result<()> {
    if let Err(e) = env_logger::try_init() {
        log::warn!("Could not initialize logger: {e}");
    }
    let event_loop = EventLoop::new()?;
    let mut app = App::new(options)?;
    event_loop.run_app(&mut app)?;
    Ok(())
}
