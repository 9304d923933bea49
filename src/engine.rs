//! The host-facing engine.
//!
//! Hosts call into [`Engine`] from whatever threads their platform uses
//! (a UI thread for input, a render thread for frames); every entry point
//! takes the same lock, so calls are serialised.
//!
//! Failures follow one policy. Bad input data is logged and skipped. A fatal
//! GPU error (a failed rebuild, device loss) puts the engine into a failed
//! state: the error is logged, kept for [`Engine::last_error`], and every
//! later call becomes a no-op.

use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;

use crate::{
    camera::Camera,
    config::EngineConfig,
    context::RendererContext,
    data_structures::model::ModelId,
    frame::{FrameOutcome, FrameStats, SkipReason},
    gpu::GpuDevice,
    resources::{
        assets::{AssetSource, ImageDecoder},
        import_model,
    },
};

#[derive(Debug)]
struct EngineState {
    context: Option<RendererContext>,
    assets: Arc<dyn AssetSource>,
    initialized: bool,
    failure: Option<String>,
}

impl EngineState {
    /// The live context, or `None` (logged) once the engine failed or was destroyed.
    fn live(&mut self, op: &str) -> Option<&mut RendererContext> {
        if let Some(failure) = &self.failure {
            log::warn!("Ignoring {op}: engine failed earlier ({failure})");
            return None;
        }
        if self.context.is_none() {
            log::warn!("Ignoring {op}: engine was destroyed");
        }
        self.context.as_mut()
    }

    fn fail(&mut self, op: &str, error: anyhow::Error) -> anyhow::Error {
        let message = format!("{op} failed: {error:#}");
        log::error!("{message}");
        self.failure = Some(message.clone());
        anyhow!(message)
    }
}

#[derive(Debug)]
pub struct Engine {
    state: Mutex<EngineState>,
}

impl Engine {
    /// Creates the engine on `device`. No surface-sized resources exist until [`init`](Self::init).
    pub fn new(
        device: Arc<dyn GpuDevice>,
        assets: Arc<dyn AssetSource>,
        decoder: Arc<dyn ImageDecoder>,
        config: EngineConfig,
    ) -> anyhow::Result<Self> {
        let context = RendererContext::new(device, assets.clone(), decoder, config)?;
        Ok(Self {
            state: Mutex::new(EngineState {
                context: Some(context),
                assets,
                initialized: false,
                failure: None,
            }),
        })
    }

    /// Builds the swapchain and everything that depends on it.
    ///
    /// An error here means the engine cannot render at all; it is also kept
    /// for [`last_error`](Self::last_error).
    pub fn init(&self, width: u32, height: u32) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        let Some(context) = state.live("init") else {
            return Err(anyhow!("Engine is not usable"));
        };
        match context.rebuild(width, height) {
            Ok(()) => {
                state.initialized = true;
                Ok(())
            }
            Err(e) => Err(state.fail("init", e)),
        }
    }

    /// Rebuilds the swapchain for a new surface size. Zero sizes (a minimised window) are ignored.
    pub fn resize(&self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            log::debug!("Ignoring resize to {width}x{height}");
            return;
        }
        let mut state = self.state.lock();
        if !state.initialized {
            log::warn!("Ignoring resize before init");
            return;
        }
        let Some(context) = state.live("resize") else {
            return;
        };
        if let Err(e) = context.rebuild(width, height) {
            state.fail("resize", e);
        }
    }

    /// Imports a model at the origin and uploads it.
    ///
    /// A file that cannot be imported yields a model without geometry (the
    /// cause is logged); only GPU failures are errors.
    pub fn load_model(&self, path: &str) -> anyhow::Result<ModelId> {
        self.load_model_at(path, 0.0, 0.0, 0.0)
    }

    /// Like [`load_model`](Self::load_model), placing the model at `(x, y, z)`.
    pub fn load_model_at(&self, path: &str, x: f32, y: f32, z: f32) -> anyhow::Result<ModelId> {
        let mut state = self.state.lock();
        let assets = state.assets.clone();
        let Some(context) = state.live("load_model") else {
            return Err(anyhow!("Engine is not usable"));
        };
        let mut mesh = import_model(assets.as_ref(), path);
        mesh.translation = [x, y, z];
        match context.resources.add_model(path, mesh) {
            Ok(id) => Ok(id),
            Err(e) => Err(state.fail("load_model", e)),
        }
    }

    /// Moves a loaded model. Returns `false` for unknown ids.
    pub fn set_model_position(&self, id: ModelId, x: f32, y: f32, z: f32) -> bool {
        let mut state = self.state.lock();
        match state.live("set_model_position") {
            Some(context) => context.resources.set_model_position(id, [x, y, z]),
            None => false,
        }
    }

    /// Drops a model and its GPU buffers. Returns `false` for unknown ids.
    pub fn remove_model(&self, id: ModelId) -> bool {
        let mut state = self.state.lock();
        let Some(context) = state.live("remove_model") else {
            return false;
        };
        match context.resources.remove_model(id) {
            Ok(removed) => removed,
            Err(e) => {
                state.fail("remove_model", e);
                false
            }
        }
    }

    pub fn model_count(&self) -> usize {
        let state = self.state.lock();
        state
            .context
            .as_ref()
            .map_or(0, |context| context.resources.model_count())
    }

    /// Moves the camera along its view axis by `delta`, clamped to the configured range.
    pub fn move_camera(&self, delta: f32) {
        if let Some(context) = self.state.lock().live("move_camera") {
            context.camera.move_by(delta);
        }
    }

    pub fn rotate_camera(&self, yaw: f32, pitch: f32, roll: f32) {
        if let Some(context) = self.state.lock().live("rotate_camera") {
            context.camera.rotate_yaw(yaw);
            context.camera.rotate_pitch(pitch);
            context.camera.rotate_roll(roll);
        }
    }

    pub fn set_camera_rotation(&self, yaw: f32, pitch: f32, roll: f32) {
        if let Some(context) = self.state.lock().live("set_camera_rotation") {
            context.camera.set_yaw(yaw);
            context.camera.set_pitch(pitch);
            context.camera.set_roll(roll);
        }
    }

    /// Snapshot of the camera state.
    pub fn camera(&self) -> Option<Camera> {
        let state = self.state.lock();
        state.context.as_ref().map(|context| context.camera.clone())
    }

    /// Renders and presents one frame.
    pub fn render(&self) -> FrameOutcome {
        let mut state = self.state.lock();
        if !state.initialized {
            return FrameOutcome::Skipped(SkipReason::NotReady);
        }
        if state.failure.is_some() {
            return FrameOutcome::Skipped(SkipReason::Failed);
        }
        let Some(context) = state.context.as_mut() else {
            return FrameOutcome::Skipped(SkipReason::NotReady);
        };
        match context.render() {
            Ok(outcome) => outcome,
            Err(e) => {
                state.fail("render", e.into());
                FrameOutcome::Skipped(SkipReason::Failed)
            }
        }
    }

    pub fn frame_stats(&self) -> FrameStats {
        let state = self.state.lock();
        state
            .context
            .as_ref()
            .map(RendererContext::stats)
            .unwrap_or_default()
    }

    /// The fatal error that stopped the engine, if any.
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().failure.clone()
    }

    pub fn is_initialized(&self) -> bool {
        let state = self.state.lock();
        state.initialized && state.failure.is_none() && state.context.is_some()
    }

    /// Waits for the GPU and releases every resource. Later calls are no-ops.
    pub fn destroy(&self) {
        let mut state = self.state.lock();
        if let Some(mut context) = state.context.take() {
            if let Err(e) = context.release() {
                log::warn!("Device did not go idle before teardown: {e}");
            }
            drop(context);
            log::info!("Engine destroyed");
        }
        state.initialized = false;
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.destroy();
    }
}
