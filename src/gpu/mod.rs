//! Explicit GPU device abstraction.
//!
//! The renderer talks to the GPU through [`GpuDevice`], a deliberately
//! Vulkan-shaped interface: swapchains hand out images, command buffers are
//! recorded from a list of [`Command`]s and submitted together with
//! semaphores and a fence, and every object is addressed through a small
//! typed handle. Two backends ship with the crate:
//!
//! - [`WgpuDevice`] drives a real GPU through `wgpu`
//! - [`HeadlessDevice`] keeps everything in memory, which is what the tests
//!   and off-screen hosts use
//!
//! Handles are plain `Copy` ids. Exclusive ownership with deterministic
//! release is provided by [`Owned`].

use std::{fmt, time::Duration};

pub mod handle;
pub mod headless;
pub mod wgpu_device;

pub use handle::{Handle, Owned};
pub use headless::{HeadlessDevice, ResourceKind};
pub use wgpu_device::WgpuDevice;

macro_rules! gpu_handles {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u64);
        )*
    };
}

gpu_handles!(
    SwapchainId,
    ImageId,
    ImageViewId,
    SamplerId,
    RenderPassId,
    FramebufferId,
    ShaderModuleId,
    DescriptorSetLayoutId,
    PipelineLayoutId,
    PipelineId,
    BufferId,
    DescriptorPoolId,
    DescriptorSetId,
    CommandPoolId,
    CommandBufferId,
    FenceId,
    SemaphoreId,
);

pub type GpuResult<T> = Result<T, GpuError>;

/// Failures reported by a [`GpuDevice`].
///
/// `OutOfDate` and `Suboptimal` are transient: the swapchain no longer
/// matches the surface and has to be rebuilt. `DeviceLost` is fatal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GpuError {
    OutOfDate,
    Suboptimal,
    DeviceLost,
    Timeout,
    InvalidHandle { kind: &'static str, id: u64 },
    InvalidUsage(String),
    Backend(String),
}

impl GpuError {
    /// Whether the error only means "rebuild the swapchain and try again".
    pub fn is_transient(&self) -> bool {
        matches!(self, GpuError::OutOfDate | GpuError::Suboptimal)
    }
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::OutOfDate => write!(f, "swapchain is out of date"),
            GpuError::Suboptimal => write!(f, "swapchain is suboptimal for the surface"),
            GpuError::DeviceLost => write!(f, "GPU device lost"),
            GpuError::Timeout => write!(f, "GPU wait timed out"),
            GpuError::InvalidHandle { kind, id } => {
                write!(f, "invalid or destroyed {kind} handle {id}")
            }
            GpuError::InvalidUsage(msg) => write!(f, "invalid usage: {msg}"),
            GpuError::Backend(msg) => write!(f, "backend error: {msg}"),
        }
    }
}

impl std::error::Error for GpuError {}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect2d {
    pub x: i32,
    pub y: i32,
    pub extent: Extent2d,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Unorm,
    Bgra8Srgb,
    Rgb10a2Unorm,
    Rgba16Float,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    SrgbNonlinear,
    ExtendedSrgbLinear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceFormat {
    pub format: Format,
    pub color_space: ColorSpace,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PresentMode {
    Immediate,
    Mailbox,
    Fifo,
    FifoRelaxed,
}

/// What the surface supports, as reported by the device.
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceCapabilities {
    pub min_image_count: u32,
    /// Zero means "no upper bound".
    pub max_image_count: u32,
    /// Fixed by the surface when `Some`, otherwise the requested size is used.
    pub current_extent: Option<Extent2d>,
    pub formats: Vec<SurfaceFormat>,
    pub present_modes: Vec<PresentMode>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SwapchainDescriptor {
    pub image_count: u32,
    pub format: SurfaceFormat,
    pub extent: Extent2d,
    pub present_mode: PresentMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    /// Host-visible staging memory used as a copy source.
    TransferSrc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDescriptor<'a> {
    pub label: &'a str,
    pub size: u64,
    pub usage: BufferUsage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDescriptor<'a> {
    pub label: &'a str,
    pub extent: Extent2d,
    pub format: Format,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageLayout {
    Undefined,
    TransferDst,
    ShaderReadOnly,
    ColorAttachment,
    PresentSrc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PushConstantRange {
    pub stage: ShaderStage,
    pub offset: u32,
    pub size: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub offset: u32,
    pub format: VertexFormat,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

/// A triangle-list pipeline with dynamic viewport and scissor.
#[derive(Clone, Copy, Debug)]
pub struct GraphicsPipelineDescriptor<'a> {
    pub label: &'a str,
    pub layout: PipelineLayoutId,
    pub render_pass: RenderPassId,
    pub vertex_shader: ShaderModuleId,
    pub fragment_shader: ShaderModuleId,
    pub vertex_layout: &'a VertexLayout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexType {
    U32,
}

/// A single command recorded into a command buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    PipelineBarrier {
        image: ImageId,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    },
    CopyBufferToImage {
        buffer: BufferId,
        image: ImageId,
        extent: Extent2d,
    },
    BeginRenderPass {
        render_pass: RenderPassId,
        framebuffer: FramebufferId,
        extent: Extent2d,
        clear_color: [f32; 4],
    },
    SetViewport(Viewport),
    SetScissor(Rect2d),
    BindPipeline(PipelineId),
    PushConstants {
        layout: PipelineLayoutId,
        stage: ShaderStage,
        offset: u32,
        data: Vec<u8>,
    },
    BindVertexBuffer(BufferId),
    BindIndexBuffer(BufferId, IndexType),
    BindDescriptorSet {
        layout: PipelineLayoutId,
        set: DescriptorSetId,
    },
    DrawIndexed {
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    },
    EndRenderPass,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmitInfo {
    pub wait_semaphore: Option<SemaphoreId>,
    pub command_buffer: CommandBufferId,
    pub signal_semaphore: Option<SemaphoreId>,
    pub fence: Option<FenceId>,
}

/// The explicit GPU API consumed by the renderer.
///
/// Every `create_*` has a matching `destroy_*`. Destroying an unknown handle
/// is ignored so that teardown paths stay idempotent. Swapchain images are
/// owned by their swapchain, command buffers by their pool and descriptor
/// sets by their pool.
pub trait GpuDevice: Send + Sync + fmt::Debug {
    fn surface_capabilities(&self) -> GpuResult<SurfaceCapabilities>;

    fn create_swapchain(&self, desc: &SwapchainDescriptor) -> GpuResult<SwapchainId>;
    fn swapchain_images(&self, swapchain: SwapchainId) -> GpuResult<Vec<ImageId>>;
    fn destroy_swapchain(&self, swapchain: SwapchainId);

    fn create_image(&self, desc: &ImageDescriptor<'_>) -> GpuResult<ImageId>;
    fn destroy_image(&self, image: ImageId);
    fn create_image_view(&self, image: ImageId) -> GpuResult<ImageViewId>;
    fn destroy_image_view(&self, view: ImageViewId);
    fn create_sampler(&self) -> GpuResult<SamplerId>;
    fn destroy_sampler(&self, sampler: SamplerId);

    fn create_render_pass(&self, color_format: Format) -> GpuResult<RenderPassId>;
    fn destroy_render_pass(&self, render_pass: RenderPassId);
    fn create_framebuffer(
        &self,
        render_pass: RenderPassId,
        view: ImageViewId,
        extent: Extent2d,
    ) -> GpuResult<FramebufferId>;
    fn destroy_framebuffer(&self, framebuffer: FramebufferId);

    /// Creates a shader module from a prebuilt SPIR-V blob.
    fn create_shader_module(&self, code: &[u32]) -> GpuResult<ShaderModuleId>;
    fn destroy_shader_module(&self, module: ShaderModuleId);

    /// A layout with a single combined image + sampler at binding 0, visible to the fragment stage.
    fn create_descriptor_set_layout(&self) -> GpuResult<DescriptorSetLayoutId>;
    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutId);
    fn create_pipeline_layout(
        &self,
        set_layout: DescriptorSetLayoutId,
        push_constants: PushConstantRange,
    ) -> GpuResult<PipelineLayoutId>;
    fn destroy_pipeline_layout(&self, layout: PipelineLayoutId);
    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor<'_>,
    ) -> GpuResult<PipelineId>;
    fn destroy_pipeline(&self, pipeline: PipelineId);

    fn create_buffer(&self, desc: &BufferDescriptor<'_>) -> GpuResult<BufferId>;
    /// Copies `data` into host-visible buffer memory (map, copy, unmap).
    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> GpuResult<()>;
    fn destroy_buffer(&self, buffer: BufferId);

    fn create_descriptor_pool(&self, max_sets: u32) -> GpuResult<DescriptorPoolId>;
    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolId,
        layout: DescriptorSetLayoutId,
    ) -> GpuResult<DescriptorSetId>;
    fn write_descriptor_set(
        &self,
        set: DescriptorSetId,
        view: ImageViewId,
        sampler: SamplerId,
    ) -> GpuResult<()>;
    fn destroy_descriptor_pool(&self, pool: DescriptorPoolId);

    fn create_command_pool(&self) -> GpuResult<CommandPoolId>;
    fn allocate_command_buffers(
        &self,
        pool: CommandPoolId,
        count: u32,
    ) -> GpuResult<Vec<CommandBufferId>>;
    /// Returns buffers to their pool. Unknown ids are ignored.
    fn free_command_buffers(&self, pool: CommandPoolId, buffers: &[CommandBufferId]);
    fn destroy_command_pool(&self, pool: CommandPoolId);
    fn reset_command_buffer(&self, cmd: CommandBufferId) -> GpuResult<()>;
    fn begin_command_buffer(&self, cmd: CommandBufferId) -> GpuResult<()>;
    fn record(&self, cmd: CommandBufferId, command: Command) -> GpuResult<()>;
    fn end_command_buffer(&self, cmd: CommandBufferId) -> GpuResult<()>;

    fn create_fence(&self, signaled: bool) -> GpuResult<FenceId>;
    /// Blocks until the fence is signaled. `None` waits without a timeout.
    fn wait_for_fence(&self, fence: FenceId, timeout: Option<Duration>) -> GpuResult<()>;
    fn reset_fence(&self, fence: FenceId) -> GpuResult<()>;
    fn destroy_fence(&self, fence: FenceId);
    fn create_semaphore(&self) -> GpuResult<SemaphoreId>;
    fn destroy_semaphore(&self, semaphore: SemaphoreId);

    /// Returns the index of the next presentable image and signals `signal` once it is ready.
    fn acquire_next_image(&self, swapchain: SwapchainId, signal: SemaphoreId) -> GpuResult<u32>;
    fn queue_submit(&self, submit: &SubmitInfo) -> GpuResult<()>;
    fn queue_present(
        &self,
        swapchain: SwapchainId,
        image_index: u32,
        wait: SemaphoreId,
    ) -> GpuResult<()>;
    fn queue_wait_idle(&self) -> GpuResult<()>;
    fn device_wait_idle(&self) -> GpuResult<()>;
}

/// Records `commands` into a fresh single-use command buffer, submits it and
/// blocks until the queue is idle. The buffer goes back to `pool` either way.
pub fn submit_one_shot(
    device: &dyn GpuDevice,
    pool: CommandPoolId,
    commands: impl IntoIterator<Item = Command>,
) -> GpuResult<()> {
    let cmd = device
        .allocate_command_buffers(pool, 1)?
        .into_iter()
        .next()
        .ok_or_else(|| GpuError::Backend("no command buffer allocated".to_string()))?;
    let result = record_and_wait(device, cmd, commands);
    device.free_command_buffers(pool, &[cmd]);
    result
}

fn record_and_wait(
    device: &dyn GpuDevice,
    cmd: CommandBufferId,
    commands: impl IntoIterator<Item = Command>,
) -> GpuResult<()> {
    device.begin_command_buffer(cmd)?;
    for command in commands {
        device.record(cmd, command)?;
    }
    device.end_command_buffer(cmd)?;
    device.queue_submit(&SubmitInfo {
        wait_semaphore: None,
        command_buffer: cmd,
        signal_semaphore: None,
        fence: None,
    })?;
    device.queue_wait_idle()
}
