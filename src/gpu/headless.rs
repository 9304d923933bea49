//! In-memory implementation of [`GpuDevice`].
//!
//! Nothing is drawn, but every object is tracked, command buffers are
//! validated while recording and replayed on submit (layout transitions,
//! buffer to image copies, index range checks), and fences/semaphores follow
//! the same signal/wait rules a real driver enforces. Surface invalidation
//! and device loss can be injected to exercise the recovery paths.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use parking_lot::Mutex;

use super::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Swapchain,
    Image,
    ImageView,
    Sampler,
    RenderPass,
    Framebuffer,
    ShaderModule,
    DescriptorSetLayout,
    PipelineLayout,
    Pipeline,
    Buffer,
    DescriptorPool,
    DescriptorSet,
    CommandPool,
    CommandBuffer,
    Fence,
    Semaphore,
}

/// Counters collected while the device executes work.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub submissions: u64,
    pub presents: u64,
    pub draws: u64,
    /// Draw calls executed by the most recent submission that contained a render pass.
    pub last_pass_draws: u64,
}

#[derive(Debug)]
struct SwapchainState {
    images: Vec<ImageId>,
    next_image: usize,
    generation: u64,
}

#[derive(Debug)]
struct ImageState {
    extent: Extent2d,
    layout: ImageLayout,
    swapchain: Option<SwapchainId>,
    pixels: Vec<u8>,
}

#[derive(Debug)]
struct DescriptorSetState {
    pool: DescriptorPoolId,
    binding: Option<(ImageViewId, SamplerId)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Recording {
    Initial,
    Recording,
    Executable,
}

#[derive(Debug, Default)]
struct Bindings {
    in_pass: bool,
    pipeline: bool,
    vertex: bool,
    index: bool,
    set: bool,
}

#[derive(Debug)]
struct CommandBufferState {
    pool: CommandPoolId,
    recording: Recording,
    commands: Vec<Command>,
    bindings: Bindings,
}

#[derive(Debug)]
struct State {
    next_id: u64,
    caps: SurfaceCapabilities,
    surface_generation: u64,
    lost: bool,
    stalled_acquires: u32,
    swapchains: HashMap<SwapchainId, SwapchainState>,
    images: HashMap<ImageId, ImageState>,
    image_views: HashMap<ImageViewId, ImageId>,
    samplers: HashSet<SamplerId>,
    render_passes: HashMap<RenderPassId, Format>,
    framebuffers: HashMap<FramebufferId, (RenderPassId, ImageViewId)>,
    shader_modules: HashSet<ShaderModuleId>,
    set_layouts: HashSet<DescriptorSetLayoutId>,
    pipeline_layouts: HashMap<PipelineLayoutId, PushConstantRange>,
    pipelines: HashSet<PipelineId>,
    buffers: HashMap<BufferId, Vec<u8>>,
    descriptor_pools: HashMap<DescriptorPoolId, u32>,
    descriptor_sets: HashMap<DescriptorSetId, DescriptorSetState>,
    command_pools: HashSet<CommandPoolId>,
    command_buffers: HashMap<CommandBufferId, CommandBufferState>,
    fences: HashMap<FenceId, bool>,
    semaphores: HashMap<SemaphoreId, bool>,
    stats: HeadlessStats,
    last_pass: Vec<Command>,
}

fn missing(kind: &'static str, id: u64) -> GpuError {
    GpuError::InvalidHandle { kind, id }
}

fn usage(msg: impl Into<String>) -> GpuError {
    GpuError::InvalidUsage(msg.into())
}

impl State {
    fn alloc(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_alive(&self) -> GpuResult<()> {
        if self.lost {
            Err(GpuError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn live_count(&self, kind: ResourceKind) -> usize {
        match kind {
            ResourceKind::Swapchain => self.swapchains.len(),
            ResourceKind::Image => self.images.len(),
            ResourceKind::ImageView => self.image_views.len(),
            ResourceKind::Sampler => self.samplers.len(),
            ResourceKind::RenderPass => self.render_passes.len(),
            ResourceKind::Framebuffer => self.framebuffers.len(),
            ResourceKind::ShaderModule => self.shader_modules.len(),
            ResourceKind::DescriptorSetLayout => self.set_layouts.len(),
            ResourceKind::PipelineLayout => self.pipeline_layouts.len(),
            ResourceKind::Pipeline => self.pipelines.len(),
            ResourceKind::Buffer => self.buffers.len(),
            ResourceKind::DescriptorPool => self.descriptor_pools.len(),
            ResourceKind::DescriptorSet => self.descriptor_sets.len(),
            ResourceKind::CommandPool => self.command_pools.len(),
            ResourceKind::CommandBuffer => self.command_buffers.len(),
            ResourceKind::Fence => self.fences.len(),
            ResourceKind::Semaphore => self.semaphores.len(),
        }
    }

    /// Validates a command against the recording state of its command buffer.
    fn validate_record(bindings: &mut Bindings, command: &Command) -> GpuResult<()> {
        match command {
            Command::PipelineBarrier { .. } | Command::CopyBufferToImage { .. } => {
                if bindings.in_pass {
                    return Err(usage("transfer commands are not allowed inside a render pass"));
                }
            }
            Command::BeginRenderPass { .. } => {
                if bindings.in_pass {
                    return Err(usage("render pass already begun"));
                }
                *bindings = Bindings {
                    in_pass: true,
                    ..Default::default()
                };
            }
            Command::EndRenderPass => {
                if !bindings.in_pass {
                    return Err(usage("no render pass to end"));
                }
                bindings.in_pass = false;
            }
            Command::BindPipeline(_) => bindings.pipeline = true,
            Command::BindVertexBuffer(_) => bindings.vertex = true,
            Command::BindIndexBuffer(..) => bindings.index = true,
            Command::BindDescriptorSet { .. } => bindings.set = true,
            Command::DrawIndexed { .. } => {
                if !bindings.in_pass {
                    return Err(usage("draw outside of a render pass"));
                }
                if !(bindings.pipeline && bindings.vertex && bindings.index && bindings.set) {
                    return Err(usage(
                        "draw requires a pipeline, vertex buffer, index buffer and descriptor set",
                    ));
                }
            }
            Command::SetViewport(_) | Command::SetScissor(_) | Command::PushConstants { .. } => {}
        }
        Ok(())
    }

    /// Replays recorded commands. Returns the number of draws executed and
    /// whether a render pass was part of the work.
    fn execute(&mut self, commands: &[Command]) -> GpuResult<(u64, bool)> {
        let mut index_buffer = None;
        let mut draws = 0;
        let mut had_pass = false;
        for command in commands {
            match command {
                Command::PipelineBarrier {
                    image,
                    old_layout,
                    new_layout,
                } => {
                    let img = self
                        .images
                        .get_mut(image)
                        .ok_or_else(|| missing("image", image.0))?;
                    if *old_layout != ImageLayout::Undefined && img.layout != *old_layout {
                        return Err(usage(format!(
                            "image {} is in layout {:?}, barrier expected {:?}",
                            image.0, img.layout, old_layout
                        )));
                    }
                    img.layout = *new_layout;
                }
                Command::CopyBufferToImage {
                    buffer,
                    image,
                    extent,
                } => {
                    let data = self
                        .buffers
                        .get(buffer)
                        .ok_or_else(|| missing("buffer", buffer.0))?;
                    let len = extent.width as usize * extent.height as usize * 4;
                    if data.len() < len {
                        return Err(usage(format!(
                            "copy of {len} bytes from a {} byte buffer",
                            data.len()
                        )));
                    }
                    let pixels = data[..len].to_vec();
                    let img = self
                        .images
                        .get_mut(image)
                        .ok_or_else(|| missing("image", image.0))?;
                    if img.layout != ImageLayout::TransferDst {
                        return Err(usage(format!(
                            "copy into image {} while in layout {:?}",
                            image.0, img.layout
                        )));
                    }
                    if img.extent != *extent {
                        return Err(usage("copy extent does not match the image"));
                    }
                    img.pixels = pixels;
                }
                Command::BeginRenderPass {
                    render_pass,
                    framebuffer,
                    ..
                } => {
                    if !self.render_passes.contains_key(render_pass) {
                        return Err(missing("render pass", render_pass.0));
                    }
                    let (_, view) = self
                        .framebuffers
                        .get(framebuffer)
                        .ok_or_else(|| missing("framebuffer", framebuffer.0))?;
                    if !self.image_views.contains_key(view) {
                        return Err(missing("image view", view.0));
                    }
                    had_pass = true;
                }
                Command::SetViewport(_) | Command::SetScissor(_) | Command::EndRenderPass => {}
                Command::BindPipeline(pipeline) => {
                    if !self.pipelines.contains(pipeline) {
                        return Err(missing("pipeline", pipeline.0));
                    }
                }
                Command::PushConstants {
                    layout,
                    stage,
                    offset,
                    data,
                } => {
                    let range = self
                        .pipeline_layouts
                        .get(layout)
                        .ok_or_else(|| missing("pipeline layout", layout.0))?;
                    let end = *offset as usize + data.len();
                    if range.stage != *stage
                        || *offset < range.offset
                        || end > (range.offset + range.size) as usize
                    {
                        return Err(usage("push constants outside of the declared range"));
                    }
                }
                Command::BindVertexBuffer(buffer) => {
                    if !self.buffers.contains_key(buffer) {
                        return Err(missing("buffer", buffer.0));
                    }
                }
                Command::BindIndexBuffer(buffer, _) => {
                    if !self.buffers.contains_key(buffer) {
                        return Err(missing("buffer", buffer.0));
                    }
                    index_buffer = Some(*buffer);
                }
                Command::BindDescriptorSet { layout, set } => {
                    if !self.pipeline_layouts.contains_key(layout) {
                        return Err(missing("pipeline layout", layout.0));
                    }
                    let state = self
                        .descriptor_sets
                        .get(set)
                        .ok_or_else(|| missing("descriptor set", set.0))?;
                    match state.binding {
                        Some((view, sampler)) => {
                            if !self.image_views.contains_key(&view) {
                                return Err(missing("image view", view.0));
                            }
                            if !self.samplers.contains(&sampler) {
                                return Err(missing("sampler", sampler.0));
                            }
                        }
                        None => return Err(usage("descriptor set was never written")),
                    }
                }
                Command::DrawIndexed {
                    index_count,
                    first_index,
                    ..
                } => {
                    let buffer = index_buffer.ok_or_else(|| usage("draw without index buffer"))?;
                    let available = self
                        .buffers
                        .get(&buffer)
                        .map(|data| data.len() / 4)
                        .ok_or_else(|| missing("buffer", buffer.0))?;
                    if (*first_index as usize + *index_count as usize) > available {
                        return Err(usage(format!(
                            "draw reads indices {}..{} of {}",
                            first_index,
                            first_index + index_count,
                            available
                        )));
                    }
                    draws += 1;
                }
            }
        }
        Ok((draws, had_pass))
    }
}

/// A [`GpuDevice`] that lives entirely in host memory.
#[derive(Debug)]
pub struct HeadlessDevice {
    state: Mutex<State>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(SurfaceCapabilities {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: None,
            formats: vec![
                SurfaceFormat {
                    format: Format::Bgra8Srgb,
                    color_space: ColorSpace::SrgbNonlinear,
                },
                SurfaceFormat {
                    format: Format::Rgba8Unorm,
                    color_space: ColorSpace::SrgbNonlinear,
                },
            ],
            present_modes: vec![PresentMode::Fifo, PresentMode::Mailbox],
        })
    }
}

impl HeadlessDevice {
    pub fn new(caps: SurfaceCapabilities) -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 0,
                caps,
                surface_generation: 0,
                lost: false,
                stalled_acquires: 0,
                swapchains: HashMap::new(),
                images: HashMap::new(),
                image_views: HashMap::new(),
                samplers: HashSet::new(),
                render_passes: HashMap::new(),
                framebuffers: HashMap::new(),
                shader_modules: HashSet::new(),
                set_layouts: HashSet::new(),
                pipeline_layouts: HashMap::new(),
                pipelines: HashSet::new(),
                buffers: HashMap::new(),
                descriptor_pools: HashMap::new(),
                descriptor_sets: HashMap::new(),
                command_pools: HashSet::new(),
                command_buffers: HashMap::new(),
                fences: HashMap::new(),
                semaphores: HashMap::new(),
                stats: HeadlessStats::default(),
                last_pass: Vec::new(),
            }),
        }
    }

    pub fn live_count(&self, kind: ResourceKind) -> usize {
        self.state.lock().live_count(kind)
    }

    /// Number of images owned by live swapchains.
    pub fn swapchain_image_count(&self) -> usize {
        self.state
            .lock()
            .swapchains
            .values()
            .map(|s| s.images.len())
            .sum()
    }

    pub fn stats(&self) -> HeadlessStats {
        self.state.lock().stats.clone()
    }

    /// Commands of the most recent submission that contained a render pass.
    pub fn last_render_commands(&self) -> Vec<Command> {
        self.state.lock().last_pass.clone()
    }

    pub fn buffer_contents(&self, buffer: BufferId) -> Option<Vec<u8>> {
        self.state.lock().buffers.get(&buffer).cloned()
    }

    /// RGBA8 pixels and extent of the image behind a descriptor set.
    pub fn descriptor_set_pixels(&self, set: DescriptorSetId) -> Option<(Extent2d, Vec<u8>)> {
        let state = self.state.lock();
        let (view, _) = state.descriptor_sets.get(&set)?.binding?;
        let image = state.image_views.get(&view)?;
        let img = state.images.get(image)?;
        Some((img.extent, img.pixels.clone()))
    }

    /// Marks every existing swapchain as out of date.
    pub fn invalidate_surface(&self) {
        self.state.lock().surface_generation += 1;
    }

    /// Fixes the surface size (as a window resize does) and invalidates swapchains.
    pub fn set_surface_extent(&self, extent: Extent2d) {
        let mut state = self.state.lock();
        state.caps.current_extent = Some(extent);
        state.surface_generation += 1;
    }

    /// The next `count` acquires time out, as they do for an occluded window.
    pub fn stall_acquires(&self, count: u32) {
        self.state.lock().stalled_acquires = count;
    }

    /// Every subsequent queue operation fails with [`GpuError::DeviceLost`].
    pub fn lose_device(&self) {
        self.state.lock().lost = true;
    }
}

impl GpuDevice for HeadlessDevice {
    fn surface_capabilities(&self) -> GpuResult<SurfaceCapabilities> {
        let state = self.state.lock();
        state.check_alive()?;
        Ok(state.caps.clone())
    }

    fn create_swapchain(&self, desc: &SwapchainDescriptor) -> GpuResult<SwapchainId> {
        let mut state = self.state.lock();
        state.check_alive()?;
        let caps = &state.caps;
        if desc.image_count < caps.min_image_count
            || (caps.max_image_count > 0 && desc.image_count > caps.max_image_count)
        {
            return Err(usage(format!(
                "image count {} outside of [{}, {}]",
                desc.image_count, caps.min_image_count, caps.max_image_count
            )));
        }
        if !caps.formats.contains(&desc.format) {
            return Err(usage(format!("unsupported surface format {:?}", desc.format)));
        }
        if !caps.present_modes.contains(&desc.present_mode) {
            return Err(usage(format!(
                "unsupported present mode {:?}",
                desc.present_mode
            )));
        }
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(usage("swapchain extent must not be empty"));
        }
        let id = SwapchainId(state.alloc());
        let mut images = Vec::with_capacity(desc.image_count as usize);
        for _ in 0..desc.image_count {
            let image = ImageId(state.alloc());
            state.images.insert(
                image,
                ImageState {
                    extent: desc.extent,
                    layout: ImageLayout::Undefined,
                    swapchain: Some(id),
                    pixels: Vec::new(),
                },
            );
            images.push(image);
        }
        let generation = state.surface_generation;
        state.swapchains.insert(
            id,
            SwapchainState {
                images,
                next_image: 0,
                generation,
            },
        );
        Ok(id)
    }

    fn swapchain_images(&self, swapchain: SwapchainId) -> GpuResult<Vec<ImageId>> {
        let state = self.state.lock();
        state
            .swapchains
            .get(&swapchain)
            .map(|s| s.images.clone())
            .ok_or_else(|| missing("swapchain", swapchain.0))
    }

    fn destroy_swapchain(&self, swapchain: SwapchainId) {
        let mut state = self.state.lock();
        if state.swapchains.remove(&swapchain).is_some() {
            state.images.retain(|_, img| img.swapchain != Some(swapchain));
        }
    }

    fn create_image(&self, desc: &ImageDescriptor<'_>) -> GpuResult<ImageId> {
        let mut state = self.state.lock();
        state.check_alive()?;
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(usage(format!("image '{}' has an empty extent", desc.label)));
        }
        let id = ImageId(state.alloc());
        state.images.insert(
            id,
            ImageState {
                extent: desc.extent,
                layout: ImageLayout::Undefined,
                swapchain: None,
                pixels: Vec::new(),
            },
        );
        Ok(id)
    }

    fn destroy_image(&self, image: ImageId) {
        let mut state = self.state.lock();
        if state
            .images
            .get(&image)
            .is_some_and(|img| img.swapchain.is_none())
        {
            state.images.remove(&image);
        }
    }

    fn create_image_view(&self, image: ImageId) -> GpuResult<ImageViewId> {
        let mut state = self.state.lock();
        if !state.images.contains_key(&image) {
            return Err(missing("image", image.0));
        }
        let id = ImageViewId(state.alloc());
        state.image_views.insert(id, image);
        Ok(id)
    }

    fn destroy_image_view(&self, view: ImageViewId) {
        self.state.lock().image_views.remove(&view);
    }

    fn create_sampler(&self) -> GpuResult<SamplerId> {
        let mut state = self.state.lock();
        let id = SamplerId(state.alloc());
        state.samplers.insert(id);
        Ok(id)
    }

    fn destroy_sampler(&self, sampler: SamplerId) {
        self.state.lock().samplers.remove(&sampler);
    }

    fn create_render_pass(&self, color_format: Format) -> GpuResult<RenderPassId> {
        let mut state = self.state.lock();
        let id = RenderPassId(state.alloc());
        state.render_passes.insert(id, color_format);
        Ok(id)
    }

    fn destroy_render_pass(&self, render_pass: RenderPassId) {
        self.state.lock().render_passes.remove(&render_pass);
    }

    fn create_framebuffer(
        &self,
        render_pass: RenderPassId,
        view: ImageViewId,
        extent: Extent2d,
    ) -> GpuResult<FramebufferId> {
        let mut state = self.state.lock();
        if !state.render_passes.contains_key(&render_pass) {
            return Err(missing("render pass", render_pass.0));
        }
        let image = *state
            .image_views
            .get(&view)
            .ok_or_else(|| missing("image view", view.0))?;
        if state.images.get(&image).map(|img| img.extent) != Some(extent) {
            return Err(usage("framebuffer extent does not match its attachment"));
        }
        let id = FramebufferId(state.alloc());
        state.framebuffers.insert(id, (render_pass, view));
        Ok(id)
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferId) {
        self.state.lock().framebuffers.remove(&framebuffer);
    }

    fn create_shader_module(&self, code: &[u32]) -> GpuResult<ShaderModuleId> {
        const SPIRV_MAGIC: u32 = 0x0723_0203;
        if code.first() != Some(&SPIRV_MAGIC) {
            return Err(usage("shader code is not SPIR-V"));
        }
        let mut state = self.state.lock();
        let id = ShaderModuleId(state.alloc());
        state.shader_modules.insert(id);
        Ok(id)
    }

    fn destroy_shader_module(&self, module: ShaderModuleId) {
        self.state.lock().shader_modules.remove(&module);
    }

    fn create_descriptor_set_layout(&self) -> GpuResult<DescriptorSetLayoutId> {
        let mut state = self.state.lock();
        let id = DescriptorSetLayoutId(state.alloc());
        state.set_layouts.insert(id);
        Ok(id)
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutId) {
        self.state.lock().set_layouts.remove(&layout);
    }

    fn create_pipeline_layout(
        &self,
        set_layout: DescriptorSetLayoutId,
        push_constants: PushConstantRange,
    ) -> GpuResult<PipelineLayoutId> {
        let mut state = self.state.lock();
        if !state.set_layouts.contains(&set_layout) {
            return Err(missing("descriptor set layout", set_layout.0));
        }
        let id = PipelineLayoutId(state.alloc());
        state.pipeline_layouts.insert(id, push_constants);
        Ok(id)
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutId) {
        self.state.lock().pipeline_layouts.remove(&layout);
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor<'_>,
    ) -> GpuResult<PipelineId> {
        let mut state = self.state.lock();
        state.check_alive()?;
        if !state.pipeline_layouts.contains_key(&desc.layout) {
            return Err(missing("pipeline layout", desc.layout.0));
        }
        if !state.render_passes.contains_key(&desc.render_pass) {
            return Err(missing("render pass", desc.render_pass.0));
        }
        for module in [desc.vertex_shader, desc.fragment_shader] {
            if !state.shader_modules.contains(&module) {
                return Err(missing("shader module", module.0));
            }
        }
        let id = PipelineId(state.alloc());
        state.pipelines.insert(id);
        Ok(id)
    }

    fn destroy_pipeline(&self, pipeline: PipelineId) {
        self.state.lock().pipelines.remove(&pipeline);
    }

    fn create_buffer(&self, desc: &BufferDescriptor<'_>) -> GpuResult<BufferId> {
        let mut state = self.state.lock();
        state.check_alive()?;
        if desc.size == 0 {
            return Err(usage(format!("buffer '{}' has size 0", desc.label)));
        }
        let id = BufferId(state.alloc());
        state.buffers.insert(id, vec![0; desc.size as usize]);
        Ok(id)
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> GpuResult<()> {
        let mut state = self.state.lock();
        let memory = state
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| missing("buffer", buffer.0))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > memory.len() {
            return Err(usage(format!(
                "write of {} bytes at {} overflows a {} byte buffer",
                data.len(),
                offset,
                memory.len()
            )));
        }
        memory[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        self.state.lock().buffers.remove(&buffer);
    }

    fn create_descriptor_pool(&self, max_sets: u32) -> GpuResult<DescriptorPoolId> {
        let mut state = self.state.lock();
        let id = DescriptorPoolId(state.alloc());
        state.descriptor_pools.insert(id, max_sets);
        Ok(id)
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolId,
        layout: DescriptorSetLayoutId,
    ) -> GpuResult<DescriptorSetId> {
        let mut state = self.state.lock();
        let max_sets = *state
            .descriptor_pools
            .get(&pool)
            .ok_or_else(|| missing("descriptor pool", pool.0))?;
        if !state.set_layouts.contains(&layout) {
            return Err(missing("descriptor set layout", layout.0));
        }
        let allocated = state
            .descriptor_sets
            .values()
            .filter(|set| set.pool == pool)
            .count();
        if allocated as u32 >= max_sets {
            return Err(usage(format!("descriptor pool exhausted ({max_sets} sets)")));
        }
        let id = DescriptorSetId(state.alloc());
        state.descriptor_sets.insert(
            id,
            DescriptorSetState {
                pool,
                binding: None,
            },
        );
        Ok(id)
    }

    fn write_descriptor_set(
        &self,
        set: DescriptorSetId,
        view: ImageViewId,
        sampler: SamplerId,
    ) -> GpuResult<()> {
        let mut state = self.state.lock();
        if !state.image_views.contains_key(&view) {
            return Err(missing("image view", view.0));
        }
        if !state.samplers.contains(&sampler) {
            return Err(missing("sampler", sampler.0));
        }
        let entry = state
            .descriptor_sets
            .get_mut(&set)
            .ok_or_else(|| missing("descriptor set", set.0))?;
        entry.binding = Some((view, sampler));
        Ok(())
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolId) {
        let mut state = self.state.lock();
        if state.descriptor_pools.remove(&pool).is_some() {
            state.descriptor_sets.retain(|_, set| set.pool != pool);
        }
    }

    fn create_command_pool(&self) -> GpuResult<CommandPoolId> {
        let mut state = self.state.lock();
        let id = CommandPoolId(state.alloc());
        state.command_pools.insert(id);
        Ok(id)
    }

    fn allocate_command_buffers(
        &self,
        pool: CommandPoolId,
        count: u32,
    ) -> GpuResult<Vec<CommandBufferId>> {
        let mut state = self.state.lock();
        if !state.command_pools.contains(&pool) {
            return Err(missing("command pool", pool.0));
        }
        let mut buffers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = CommandBufferId(state.alloc());
            state.command_buffers.insert(
                id,
                CommandBufferState {
                    pool,
                    recording: Recording::Initial,
                    commands: Vec::new(),
                    bindings: Bindings::default(),
                },
            );
            buffers.push(id);
        }
        Ok(buffers)
    }

    fn free_command_buffers(&self, pool: CommandPoolId, buffers: &[CommandBufferId]) {
        let mut state = self.state.lock();
        for id in buffers {
            if state.command_buffers.get(id).is_some_and(|cmd| cmd.pool == pool) {
                state.command_buffers.remove(id);
            }
        }
    }

    fn destroy_command_pool(&self, pool: CommandPoolId) {
        let mut state = self.state.lock();
        if state.command_pools.remove(&pool) {
            state.command_buffers.retain(|_, cmd| cmd.pool != pool);
        }
    }

    fn reset_command_buffer(&self, cmd: CommandBufferId) -> GpuResult<()> {
        let mut state = self.state.lock();
        let buffer = state
            .command_buffers
            .get_mut(&cmd)
            .ok_or_else(|| missing("command buffer", cmd.0))?;
        buffer.recording = Recording::Initial;
        buffer.commands.clear();
        buffer.bindings = Bindings::default();
        Ok(())
    }

    fn begin_command_buffer(&self, cmd: CommandBufferId) -> GpuResult<()> {
        let mut state = self.state.lock();
        let buffer = state
            .command_buffers
            .get_mut(&cmd)
            .ok_or_else(|| missing("command buffer", cmd.0))?;
        if buffer.recording == Recording::Recording {
            return Err(usage("command buffer is already recording"));
        }
        buffer.recording = Recording::Recording;
        buffer.commands.clear();
        buffer.bindings = Bindings::default();
        Ok(())
    }

    fn record(&self, cmd: CommandBufferId, command: Command) -> GpuResult<()> {
        let mut state = self.state.lock();
        let buffer = state
            .command_buffers
            .get_mut(&cmd)
            .ok_or_else(|| missing("command buffer", cmd.0))?;
        if buffer.recording != Recording::Recording {
            return Err(usage("command buffer is not recording"));
        }
        State::validate_record(&mut buffer.bindings, &command)?;
        buffer.commands.push(command);
        Ok(())
    }

    fn end_command_buffer(&self, cmd: CommandBufferId) -> GpuResult<()> {
        let mut state = self.state.lock();
        let buffer = state
            .command_buffers
            .get_mut(&cmd)
            .ok_or_else(|| missing("command buffer", cmd.0))?;
        if buffer.recording != Recording::Recording {
            return Err(usage("command buffer is not recording"));
        }
        if buffer.bindings.in_pass {
            return Err(usage("render pass left open"));
        }
        buffer.recording = Recording::Executable;
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> GpuResult<FenceId> {
        let mut state = self.state.lock();
        let id = FenceId(state.alloc());
        state.fences.insert(id, signaled);
        Ok(id)
    }

    fn wait_for_fence(&self, fence: FenceId, _timeout: Option<Duration>) -> GpuResult<()> {
        let state = self.state.lock();
        state.check_alive()?;
        match state.fences.get(&fence) {
            Some(true) => Ok(()),
            // Work completes at submit, so an unsignaled fence has nothing pending.
            Some(false) => Err(GpuError::Timeout),
            None => Err(missing("fence", fence.0)),
        }
    }

    fn reset_fence(&self, fence: FenceId) -> GpuResult<()> {
        let mut state = self.state.lock();
        let signaled = state
            .fences
            .get_mut(&fence)
            .ok_or_else(|| missing("fence", fence.0))?;
        *signaled = false;
        Ok(())
    }

    fn destroy_fence(&self, fence: FenceId) {
        self.state.lock().fences.remove(&fence);
    }

    fn create_semaphore(&self) -> GpuResult<SemaphoreId> {
        let mut state = self.state.lock();
        let id = SemaphoreId(state.alloc());
        state.semaphores.insert(id, false);
        Ok(id)
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreId) {
        self.state.lock().semaphores.remove(&semaphore);
    }

    fn acquire_next_image(&self, swapchain: SwapchainId, signal: SemaphoreId) -> GpuResult<u32> {
        let mut state = self.state.lock();
        state.check_alive()?;
        let generation = state.surface_generation;
        let chain = state
            .swapchains
            .get(&swapchain)
            .ok_or_else(|| missing("swapchain", swapchain.0))?;
        if chain.generation != generation {
            return Err(GpuError::OutOfDate);
        }
        let index = chain.next_image;
        let image_count = chain.images.len();
        if state.stalled_acquires > 0 {
            state.stalled_acquires -= 1;
            return Err(GpuError::Timeout);
        }
        let semaphore = state
            .semaphores
            .get_mut(&signal)
            .ok_or_else(|| missing("semaphore", signal.0))?;
        if *semaphore {
            return Err(usage("acquire would signal an already signaled semaphore"));
        }
        *semaphore = true;
        if let Some(chain) = state.swapchains.get_mut(&swapchain) {
            chain.next_image = (index + 1) % image_count;
        }
        Ok(index as u32)
    }

    fn queue_submit(&self, submit: &SubmitInfo) -> GpuResult<()> {
        let mut state = self.state.lock();
        state.check_alive()?;
        let commands = match state.command_buffers.get(&submit.command_buffer) {
            Some(buffer) if buffer.recording == Recording::Executable => buffer.commands.clone(),
            Some(_) => return Err(usage("submitted command buffer is not executable")),
            None => return Err(missing("command buffer", submit.command_buffer.0)),
        };
        if let Some(fence) = submit.fence {
            match state.fences.get(&fence) {
                Some(false) => {}
                Some(true) => return Err(usage("submit with a fence that is already signaled")),
                None => return Err(missing("fence", fence.0)),
            }
        }
        if let Some(wait) = submit.wait_semaphore {
            let semaphore = state
                .semaphores
                .get_mut(&wait)
                .ok_or_else(|| missing("semaphore", wait.0))?;
            if !*semaphore {
                return Err(usage("submit waits on a semaphore that is never signaled"));
            }
            *semaphore = false;
        }

        let (draws, had_pass) = state.execute(&commands)?;
        state.stats.submissions += 1;
        state.stats.draws += draws;
        if had_pass {
            state.stats.last_pass_draws = draws;
            state.last_pass = commands;
        }

        if let Some(signal) = submit.signal_semaphore {
            let semaphore = state
                .semaphores
                .get_mut(&signal)
                .ok_or_else(|| missing("semaphore", signal.0))?;
            *semaphore = true;
        }
        if let Some(fence) = submit.fence {
            state.fences.insert(fence, true);
        }
        Ok(())
    }

    fn queue_present(
        &self,
        swapchain: SwapchainId,
        image_index: u32,
        wait: SemaphoreId,
    ) -> GpuResult<()> {
        let mut state = self.state.lock();
        state.check_alive()?;
        let generation = state.surface_generation;
        let chain = state
            .swapchains
            .get(&swapchain)
            .ok_or_else(|| missing("swapchain", swapchain.0))?;
        if image_index as usize >= chain.images.len() {
            return Err(usage(format!("present of image {image_index} out of range")));
        }
        let stale = chain.generation != generation;
        let semaphore = state
            .semaphores
            .get_mut(&wait)
            .ok_or_else(|| missing("semaphore", wait.0))?;
        if !*semaphore {
            return Err(usage("present waits on a semaphore that is never signaled"));
        }
        *semaphore = false;
        if stale {
            return Err(GpuError::OutOfDate);
        }
        state.stats.presents += 1;
        Ok(())
    }

    fn queue_wait_idle(&self) -> GpuResult<()> {
        self.state.lock().check_alive()
    }

    fn device_wait_idle(&self) -> GpuResult<()> {
        self.state.lock().check_alive()
    }
}
