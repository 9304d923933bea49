use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use instant::Instant;

use crate::{
    camera::Camera,
    config::EngineConfig,
    frame::{FrameOutcome, FrameScheduler, FrameStats, SkipReason},
    gpu::{Command, CommandBufferId, Extent2d, GpuDevice, GpuError, GpuResult, IndexType, ShaderStage},
    pipelines::basic::ModelPushConstants,
    resource_manager::ResourceManager,
    resources::assets::{AssetSource, ImageDecoder},
};

/// Everything the renderer needs between two host calls.
///
/// Owned by the engine; nothing here is global.
#[derive(Debug)]
pub struct RendererContext {
    // Frames go first: their fences guard the resources below.
    frames: Option<FrameScheduler>,
    pub resources: ResourceManager,
    pub camera: Camera,
    device: Arc<dyn GpuDevice>,
    config: EngineConfig,
    surface_extent: Extent2d,
    stats: FrameStats,
}

impl RendererContext {
    pub fn new(
        device: Arc<dyn GpuDevice>,
        assets: Arc<dyn AssetSource>,
        decoder: Arc<dyn ImageDecoder>,
        config: EngineConfig,
    ) -> anyhow::Result<Self> {
        log::info!("Creating renderer context");
        let resources = ResourceManager::new(device.clone(), assets, decoder, config.clone())?;
        Ok(Self {
            frames: None,
            resources,
            camera: Camera::from_config(&config),
            device,
            config,
            surface_extent: Extent2d::default(),
            stats: FrameStats::default(),
        })
    }

    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether a swapchain and frame ring exist.
    pub fn is_ready(&self) -> bool {
        self.frames.is_some() && self.resources.targets().is_some()
    }

    pub fn surface_extent(&self) -> Extent2d {
        self.surface_extent
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Rebuilds every swapchain-dependent resource for a `width` x `height` surface.
    pub fn rebuild(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        self.device
            .device_wait_idle()
            .context("Failed to wait for the device before rebuilding")?;
        self.frames = None;
        self.surface_extent = Extent2d::new(width, height);
        self.resources.rebuild(self.surface_extent)?;

        let targets = self
            .resources
            .targets()
            .ok_or_else(|| anyhow!("Swapchain missing after rebuild"))?;
        let extent = targets.swapchain.extent();
        let image_count = targets.swapchain.image_count();
        self.camera.update_viewport(extent);
        self.frames = Some(FrameScheduler::new(
            &self.device,
            self.config.frames_in_flight(),
            image_count,
        )?);
        log::info!(
            "Renderer ready at {}x{} with {} frames in flight",
            extent.width,
            extent.height,
            self.config.frames_in_flight()
        );
        Ok(())
    }

    /// Renders and presents one frame. Errors are fatal; a stale swapchain is not an error.
    pub fn render(&mut self) -> GpuResult<FrameOutcome> {
        let start = Instant::now();
        let Self {
            frames,
            resources,
            camera,
            device,
            config,
            stats,
            ..
        } = self;
        let (Some(frames), Some(targets)) = (frames.as_mut(), resources.targets()) else {
            return Ok(FrameOutcome::Skipped(SkipReason::NotReady));
        };
        let swapchain = targets.swapchain.id();
        let outcome = frames.render_frame(device.as_ref(), swapchain, |cmd, image_index| {
            record_frame(device.as_ref(), cmd, image_index, resources, camera, config)
        })?;
        match outcome {
            FrameOutcome::Presented { .. } => {
                stats.frames_presented += 1;
                stats.last_frame_time = start.elapsed();
            }
            FrameOutcome::Skipped(_) => stats.frames_dropped += 1,
        }
        Ok(outcome)
    }

    /// Waits for the GPU and drops every swapchain-dependent resource.
    pub fn release(&mut self) -> GpuResult<()> {
        let idle = self.device.device_wait_idle();
        self.frames = None;
        self.resources.release_swapchain();
        idle
    }
}

/// Records the single forward pass drawing every loaded model.
///
/// Models without geometry are skipped. A model without subsets is drawn in
/// one call with the texture of material 0.
pub fn record_frame(
    device: &dyn GpuDevice,
    cmd: CommandBufferId,
    image_index: u32,
    resources: &ResourceManager,
    camera: &Camera,
    config: &EngineConfig,
) -> GpuResult<()> {
    let targets = resources
        .targets()
        .ok_or_else(|| GpuError::InvalidUsage("recording without a swapchain".to_string()))?;
    let framebuffer = targets.framebuffer(image_index).ok_or_else(|| {
        GpuError::InvalidUsage(format!("no framebuffer for image {image_index}"))
    })?;
    let layout = resources.pipeline_layout();
    let fallback = resources.fallback_texture();

    device.record(
        cmd,
        Command::BeginRenderPass {
            render_pass: targets.render_pass.get(),
            framebuffer,
            extent: targets.swapchain.extent(),
            clear_color: config.clear_color,
        },
    )?;
    device.record(cmd, Command::SetViewport(camera.viewport()))?;
    device.record(cmd, Command::SetScissor(camera.scissor()))?;
    device.record(cmd, Command::BindPipeline(targets.pipeline.get()))?;

    for model in resources.models() {
        let Some(buffers) = &model.buffers else {
            continue;
        };
        if buffers.index_count == 0 {
            continue;
        }
        device.record(
            cmd,
            Command::PushConstants {
                layout,
                stage: ShaderStage::Vertex,
                offset: 0,
                data: ModelPushConstants::new(camera, model.mesh.translation).as_bytes(),
            },
        )?;
        device.record(cmd, Command::BindVertexBuffer(buffers.vertex.get()))?;
        device.record(cmd, Command::BindIndexBuffer(buffers.index.get(), IndexType::U32))?;

        let draws: Vec<(u32, u32, usize)> = if model.mesh.subsets.is_empty() {
            vec![(0, buffers.index_count, 0)]
        } else {
            model
                .mesh
                .subsets
                .iter()
                .map(|s| (s.first_index, s.index_count, s.material))
                .collect()
        };
        for (first_index, index_count, material) in draws {
            let Some(set) = resources.texture_set(model.texture_slot(material, fallback)) else {
                log::warn!("Model {}: no texture for material {material}", model.source);
                continue;
            };
            device.record(cmd, Command::BindDescriptorSet { layout, set })?;
            device.record(
                cmd,
                Command::DrawIndexed {
                    index_count,
                    first_index,
                    vertex_offset: 0,
                },
            )?;
        }
    }

    device.record(cmd, Command::EndRenderPass)
}
