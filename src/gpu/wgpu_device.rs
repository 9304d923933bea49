//! [`GpuDevice`] on top of `wgpu`.
//!
//! The explicit API is mapped onto wgpu's implicit one:
//!
//! - the configured surface is the swapchain, its images are virtual ids that
//!   resolve to the currently acquired surface texture
//! - host-visible staging buffers live in host memory and buffer to image
//!   copies become `Queue::write_texture`
//! - layout transitions are tracked by wgpu and recorded barriers are no-ops
//! - a descriptor set is a bind group (texture at binding 0, sampler at 1)
//! - push constants are wgpu immediates
//! - a fence is the submission index of the work it guards
//! - semaphores only order work on the single queue and carry no state

use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::Context as _;
use parking_lot::Mutex;
use winit::window::Window;

use super::*;

/// Upper bound of the immediate (push-constant) block requested from the adapter.
const MAX_IMMEDIATE_SIZE: u32 = 64;

enum ImageEntry {
    Texture(wgpu::Texture),
    Swapchain { swapchain: SwapchainId, index: u32 },
}

enum ViewEntry {
    Texture(wgpu::TextureView),
    Swapchain(ImageId),
}

enum BufferEntry {
    Host(Vec<u8>),
    Device(wgpu::Buffer),
}

struct SwapchainEntry {
    images: Vec<ImageId>,
    next_image: u32,
}

struct AcquiredFrame {
    swapchain: SwapchainId,
    index: u32,
    texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
}

struct DescriptorSetEntry {
    pool: DescriptorPoolId,
    layout: DescriptorSetLayoutId,
    group: Option<wgpu::BindGroup>,
}

#[derive(Default)]
struct FenceEntry {
    signaled: bool,
    submission: Option<wgpu::SubmissionIndex>,
}

#[derive(Default)]
struct WgpuState {
    next_id: u64,
    swapchains: HashMap<SwapchainId, SwapchainEntry>,
    acquired: Option<AcquiredFrame>,
    images: HashMap<ImageId, ImageEntry>,
    image_views: HashMap<ImageViewId, ViewEntry>,
    samplers: HashMap<SamplerId, wgpu::Sampler>,
    render_passes: HashMap<RenderPassId, wgpu::TextureFormat>,
    framebuffers: HashMap<FramebufferId, ImageViewId>,
    shader_modules: HashMap<ShaderModuleId, wgpu::ShaderModule>,
    set_layouts: HashMap<DescriptorSetLayoutId, wgpu::BindGroupLayout>,
    pipeline_layouts: HashMap<PipelineLayoutId, wgpu::PipelineLayout>,
    pipelines: HashMap<PipelineId, wgpu::RenderPipeline>,
    buffers: HashMap<BufferId, BufferEntry>,
    descriptor_pools: HashMap<DescriptorPoolId, u32>,
    descriptor_sets: HashMap<DescriptorSetId, DescriptorSetEntry>,
    command_pools: HashSet<CommandPoolId>,
    command_buffers: HashMap<CommandBufferId, (CommandPoolId, Vec<Command>)>,
    fences: HashMap<FenceId, FenceEntry>,
    semaphores: HashSet<SemaphoreId>,
}

fn missing(kind: &'static str, id: u64) -> GpuError {
    GpuError::InvalidHandle { kind, id }
}

fn usage(msg: impl Into<String>) -> GpuError {
    GpuError::InvalidUsage(msg.into())
}

impl WgpuState {
    fn alloc(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn framebuffer_view(&self, framebuffer: FramebufferId) -> GpuResult<&wgpu::TextureView> {
        let view = self
            .framebuffers
            .get(&framebuffer)
            .ok_or_else(|| missing("framebuffer", framebuffer.0))?;
        match self
            .image_views
            .get(view)
            .ok_or_else(|| missing("image view", view.0))?
        {
            ViewEntry::Texture(view) => Ok(view),
            ViewEntry::Swapchain(image) => {
                let Some(ImageEntry::Swapchain { swapchain, index }) = self.images.get(image)
                else {
                    return Err(missing("swapchain image", image.0));
                };
                match &self.acquired {
                    Some(frame) if frame.swapchain == *swapchain && frame.index == *index => {
                        Ok(&frame.view)
                    }
                    _ => Err(usage("render target swapchain image was not acquired")),
                }
            }
        }
    }
}

fn to_wgpu_format(format: Format) -> wgpu::TextureFormat {
    match format {
        Format::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        Format::Rgba8Srgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        Format::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        Format::Bgra8Srgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        Format::Rgb10a2Unorm => wgpu::TextureFormat::Rgb10a2Unorm,
        Format::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
    }
}

fn from_wgpu_format(format: wgpu::TextureFormat) -> Option<SurfaceFormat> {
    let (format, color_space) = match format {
        wgpu::TextureFormat::Rgba8Unorm => (Format::Rgba8Unorm, ColorSpace::SrgbNonlinear),
        wgpu::TextureFormat::Rgba8UnormSrgb => (Format::Rgba8Srgb, ColorSpace::SrgbNonlinear),
        wgpu::TextureFormat::Bgra8Unorm => (Format::Bgra8Unorm, ColorSpace::SrgbNonlinear),
        wgpu::TextureFormat::Bgra8UnormSrgb => (Format::Bgra8Srgb, ColorSpace::SrgbNonlinear),
        wgpu::TextureFormat::Rgb10a2Unorm => (Format::Rgb10a2Unorm, ColorSpace::SrgbNonlinear),
        wgpu::TextureFormat::Rgba16Float => (Format::Rgba16Float, ColorSpace::ExtendedSrgbLinear),
        _ => return None,
    };
    Some(SurfaceFormat {
        format,
        color_space,
    })
}

fn to_wgpu_present_mode(mode: PresentMode) -> wgpu::PresentMode {
    match mode {
        PresentMode::Immediate => wgpu::PresentMode::Immediate,
        PresentMode::Mailbox => wgpu::PresentMode::Mailbox,
        PresentMode::Fifo => wgpu::PresentMode::Fifo,
        PresentMode::FifoRelaxed => wgpu::PresentMode::FifoRelaxed,
    }
}

fn from_wgpu_present_mode(mode: wgpu::PresentMode) -> Option<PresentMode> {
    match mode {
        wgpu::PresentMode::Immediate => Some(PresentMode::Immediate),
        wgpu::PresentMode::Mailbox => Some(PresentMode::Mailbox),
        wgpu::PresentMode::Fifo => Some(PresentMode::Fifo),
        wgpu::PresentMode::FifoRelaxed => Some(PresentMode::FifoRelaxed),
        _ => None,
    }
}

fn to_wgpu_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
    }
}

fn active<'p>(
    pass: &'p mut Option<wgpu::RenderPass<'static>>,
) -> GpuResult<&'p mut wgpu::RenderPass<'static>> {
    pass.as_mut()
        .ok_or_else(|| usage("draw state command outside of a render pass"))
}

/// A window-backed GPU device.
pub struct WgpuDevice {
    surface: wgpu::Surface<'static>,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    lost: Arc<AtomicBool>,
    state: Mutex<WgpuState>,
}

impl fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuDevice")
            .field("adapter", &self.adapter.get_info().name)
            .field("lost", &self.lost.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl WgpuDevice {
    pub async fn new(window: Arc<Window>) -> anyhow::Result<Self> {
        log::info!("WGPU setup");
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let surface = instance
            .create_surface(window)
            .context("Failed to create a surface for the window")?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("No GPU adapter can present to the window")?;
        log::info!("Using adapter {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("prism device"),
                required_features: wgpu::Features::IMMEDIATES,
                required_limits: wgpu::Limits {
                    max_immediate_size: MAX_IMMEDIATE_SIZE,
                    ..wgpu::Limits::default()
                },
                memory_hints: Default::default(),
                ..Default::default()
            })
            .await
            .context("Failed to create the GPU device")?;

        let lost = Arc::new(AtomicBool::new(false));
        let flag = lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            log::error!("GPU device lost ({reason:?}): {message}");
            flag.store(true, Ordering::Release);
        });

        Ok(Self {
            surface,
            adapter,
            device,
            queue,
            lost,
            state: Mutex::new(WgpuState::default()),
        })
    }

    fn check_alive(&self) -> GpuResult<()> {
        if self.lost.load(Ordering::Acquire) {
            Err(GpuError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn poll(&self, submission: Option<wgpu::SubmissionIndex>, timeout: Option<Duration>) -> GpuResult<()> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: submission,
                timeout,
            })
            .map(|_| ())
            .map_err(|e| match e {
                wgpu::PollError::Timeout => GpuError::Timeout,
                other => GpuError::Backend(other.to_string()),
            })?;
        self.check_alive()
    }

    fn encode(&self, state: &WgpuState, commands: &[Command]) -> GpuResult<wgpu::CommandBuffer> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        let mut pass: Option<wgpu::RenderPass<'static>> = None;
        for command in commands {
            match command {
                Command::PipelineBarrier { .. } => {}
                Command::CopyBufferToImage {
                    buffer,
                    image,
                    extent,
                } => {
                    let Some(BufferEntry::Host(data)) = state.buffers.get(buffer) else {
                        return Err(missing("staging buffer", buffer.0));
                    };
                    let Some(ImageEntry::Texture(texture)) = state.images.get(image) else {
                        return Err(missing("image", image.0));
                    };
                    let len = extent.width as usize * extent.height as usize * 4;
                    if data.len() < len {
                        return Err(usage("staging buffer smaller than the copied region"));
                    }
                    self.queue.write_texture(
                        wgpu::TexelCopyTextureInfo {
                            texture,
                            mip_level: 0,
                            origin: wgpu::Origin3d::ZERO,
                            aspect: wgpu::TextureAspect::All,
                        },
                        &data[..len],
                        wgpu::TexelCopyBufferLayout {
                            offset: 0,
                            bytes_per_row: Some(4 * extent.width),
                            rows_per_image: Some(extent.height),
                        },
                        wgpu::Extent3d {
                            width: extent.width,
                            height: extent.height,
                            depth_or_array_layers: 1,
                        },
                    );
                }
                Command::BeginRenderPass {
                    framebuffer,
                    clear_color,
                    ..
                } => {
                    if pass.is_some() {
                        return Err(usage("render pass already begun"));
                    }
                    let view = state.framebuffer_view(*framebuffer)?;
                    let [r, g, b, a] = clear_color.map(f64::from);
                    let render_pass = encoder
                        .begin_render_pass(&wgpu::RenderPassDescriptor {
                            label: Some("Model Pass"),
                            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                                view,
                                resolve_target: None,
                                ops: wgpu::Operations {
                                    load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                                    store: wgpu::StoreOp::Store,
                                },
                                depth_slice: None,
                            })],
                            depth_stencil_attachment: None,
                            timestamp_writes: None,
                            occlusion_query_set: None,
                            multiview_mask: None,
                        })
                        .forget_lifetime();
                    pass = Some(render_pass);
                }
                Command::SetViewport(vp) => {
                    active(&mut pass)?.set_viewport(
                        vp.x,
                        vp.y,
                        vp.width,
                        vp.height,
                        vp.min_depth,
                        vp.max_depth,
                    );
                }
                Command::SetScissor(rect) => {
                    active(&mut pass)?.set_scissor_rect(
                        rect.x.max(0) as u32,
                        rect.y.max(0) as u32,
                        rect.extent.width,
                        rect.extent.height,
                    );
                }
                Command::BindPipeline(pipeline) => {
                    let pipeline = state
                        .pipelines
                        .get(pipeline)
                        .ok_or_else(|| missing("pipeline", pipeline.0))?;
                    active(&mut pass)?.set_pipeline(pipeline);
                }
                Command::PushConstants { offset, data, .. } => {
                    active(&mut pass)?.set_immediates(*offset, data);
                }
                Command::BindVertexBuffer(buffer) => {
                    let Some(BufferEntry::Device(buf)) = state.buffers.get(buffer) else {
                        return Err(missing("vertex buffer", buffer.0));
                    };
                    active(&mut pass)?.set_vertex_buffer(0, buf.slice(..));
                }
                Command::BindIndexBuffer(buffer, IndexType::U32) => {
                    let Some(BufferEntry::Device(buf)) = state.buffers.get(buffer) else {
                        return Err(missing("index buffer", buffer.0));
                    };
                    active(&mut pass)?.set_index_buffer(buf.slice(..), wgpu::IndexFormat::Uint32);
                }
                Command::BindDescriptorSet { set, .. } => {
                    let group = state
                        .descriptor_sets
                        .get(set)
                        .and_then(|entry| entry.group.as_ref())
                        .ok_or_else(|| missing("descriptor set", set.0))?;
                    active(&mut pass)?.set_bind_group(0, group, &[]);
                }
                Command::DrawIndexed {
                    index_count,
                    first_index,
                    vertex_offset,
                } => {
                    active(&mut pass)?.draw_indexed(
                        *first_index..first_index + index_count,
                        *vertex_offset,
                        0..1,
                    );
                }
                Command::EndRenderPass => {
                    if pass.take().is_none() {
                        return Err(usage("no render pass to end"));
                    }
                }
            }
        }
        if pass.is_some() {
            return Err(usage("render pass left open"));
        }
        Ok(encoder.finish())
    }
}

impl GpuDevice for WgpuDevice {
    fn surface_capabilities(&self) -> GpuResult<SurfaceCapabilities> {
        self.check_alive()?;
        let caps = self.surface.get_capabilities(&self.adapter);
        Ok(SurfaceCapabilities {
            // wgpu manages the image ring itself and only takes a frame latency.
            min_image_count: 2,
            max_image_count: 3,
            current_extent: None,
            formats: caps
                .formats
                .iter()
                .copied()
                .filter_map(from_wgpu_format)
                .collect(),
            present_modes: caps
                .present_modes
                .iter()
                .copied()
                .filter_map(from_wgpu_present_mode)
                .collect(),
        })
    }

    fn create_swapchain(&self, desc: &SwapchainDescriptor) -> GpuResult<SwapchainId> {
        self.check_alive()?;
        let caps = self.surface.get_capabilities(&self.adapter);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: to_wgpu_format(desc.format.format),
            width: desc.extent.width,
            height: desc.extent.height,
            present_mode: to_wgpu_present_mode(desc.present_mode),
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: desc.image_count.saturating_sub(1).max(1),
        };
        self.surface.configure(&self.device, &config);

        let mut state = self.state.lock();
        let id = SwapchainId(state.alloc());
        let mut images = Vec::with_capacity(desc.image_count as usize);
        for index in 0..desc.image_count {
            let image = ImageId(state.alloc());
            state.images.insert(
                image,
                ImageEntry::Swapchain {
                    swapchain: id,
                    index,
                },
            );
            images.push(image);
        }
        state.swapchains.insert(
            id,
            SwapchainEntry {
                images,
                next_image: 0,
            },
        );
        Ok(id)
    }

    fn swapchain_images(&self, swapchain: SwapchainId) -> GpuResult<Vec<ImageId>> {
        self.state
            .lock()
            .swapchains
            .get(&swapchain)
            .map(|entry| entry.images.clone())
            .ok_or_else(|| missing("swapchain", swapchain.0))
    }

    fn destroy_swapchain(&self, swapchain: SwapchainId) {
        let mut state = self.state.lock();
        if let Some(entry) = state.swapchains.remove(&swapchain) {
            for image in entry.images {
                state.images.remove(&image);
            }
            if state
                .acquired
                .as_ref()
                .is_some_and(|frame| frame.swapchain == swapchain)
            {
                state.acquired = None;
            }
        }
    }

    fn create_image(&self, desc: &ImageDescriptor<'_>) -> GpuResult<ImageId> {
        self.check_alive()?;
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: desc.extent.width,
                height: desc.extent.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: to_wgpu_format(desc.format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let mut state = self.state.lock();
        let id = ImageId(state.alloc());
        state.images.insert(id, ImageEntry::Texture(texture));
        Ok(id)
    }

    fn destroy_image(&self, image: ImageId) {
        let mut state = self.state.lock();
        if matches!(state.images.get(&image), Some(ImageEntry::Texture(_))) {
            if let Some(ImageEntry::Texture(texture)) = state.images.remove(&image) {
                texture.destroy();
            }
        }
    }

    fn create_image_view(&self, image: ImageId) -> GpuResult<ImageViewId> {
        let mut state = self.state.lock();
        let entry = match state.images.get(&image) {
            Some(ImageEntry::Texture(texture)) => {
                ViewEntry::Texture(texture.create_view(&wgpu::TextureViewDescriptor::default()))
            }
            Some(ImageEntry::Swapchain { .. }) => ViewEntry::Swapchain(image),
            None => return Err(missing("image", image.0)),
        };
        let id = ImageViewId(state.alloc());
        state.image_views.insert(id, entry);
        Ok(id)
    }

    fn destroy_image_view(&self, view: ImageViewId) {
        self.state.lock().image_views.remove(&view);
    }

    fn create_sampler(&self) -> GpuResult<SamplerId> {
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Texture Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let mut state = self.state.lock();
        let id = SamplerId(state.alloc());
        state.samplers.insert(id, sampler);
        Ok(id)
    }

    fn destroy_sampler(&self, sampler: SamplerId) {
        self.state.lock().samplers.remove(&sampler);
    }

    fn create_render_pass(&self, color_format: Format) -> GpuResult<RenderPassId> {
        let mut state = self.state.lock();
        let id = RenderPassId(state.alloc());
        state
            .render_passes
            .insert(id, to_wgpu_format(color_format));
        Ok(id)
    }

    fn destroy_render_pass(&self, render_pass: RenderPassId) {
        self.state.lock().render_passes.remove(&render_pass);
    }

    fn create_framebuffer(
        &self,
        render_pass: RenderPassId,
        view: ImageViewId,
        _extent: Extent2d,
    ) -> GpuResult<FramebufferId> {
        let mut state = self.state.lock();
        if !state.render_passes.contains_key(&render_pass) {
            return Err(missing("render pass", render_pass.0));
        }
        if !state.image_views.contains_key(&view) {
            return Err(missing("image view", view.0));
        }
        let id = FramebufferId(state.alloc());
        state.framebuffers.insert(id, view);
        Ok(id)
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferId) {
        self.state.lock().framebuffers.remove(&framebuffer);
    }

    fn create_shader_module(&self, code: &[u32]) -> GpuResult<ShaderModuleId> {
        self.check_alive()?;
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("SPIR-V Module"),
                source: wgpu::ShaderSource::SpirV(Cow::Borrowed(code)),
            });
        let mut state = self.state.lock();
        let id = ShaderModuleId(state.alloc());
        state.shader_modules.insert(id, module);
        Ok(id)
    }

    fn destroy_shader_module(&self, module: ShaderModuleId) {
        self.state.lock().shader_modules.remove(&module);
    }

    fn create_descriptor_set_layout(&self) -> GpuResult<DescriptorSetLayoutId> {
        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("texture_bind_group_layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });
        let mut state = self.state.lock();
        let id = DescriptorSetLayoutId(state.alloc());
        state.set_layouts.insert(id, layout);
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
        if push_constants.offset + push_constants.size > MAX_IMMEDIATE_SIZE {
            return Err(usage("push constant block exceeds the device limit"));
        }
        let mut state = self.state.lock();
        let bind_group_layout = state
            .set_layouts
            .get(&set_layout)
            .ok_or_else(|| missing("descriptor set layout", set_layout.0))?;
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Model Pipeline Layout"),
                bind_group_layouts: &[bind_group_layout],
                immediate_size: push_constants.offset + push_constants.size,
            });
        let id = PipelineLayoutId(state.alloc());
        state.pipeline_layouts.insert(id, layout);
        Ok(id)
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutId) {
        self.state.lock().pipeline_layouts.remove(&layout);
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor<'_>,
    ) -> GpuResult<PipelineId> {
        self.check_alive()?;
        let mut state = self.state.lock();
        let layout = state
            .pipeline_layouts
            .get(&desc.layout)
            .ok_or_else(|| missing("pipeline layout", desc.layout.0))?;
        let format = *state
            .render_passes
            .get(&desc.render_pass)
            .ok_or_else(|| missing("render pass", desc.render_pass.0))?;
        let vertex = state
            .shader_modules
            .get(&desc.vertex_shader)
            .ok_or_else(|| missing("shader module", desc.vertex_shader.0))?;
        let fragment = state
            .shader_modules
            .get(&desc.fragment_shader)
            .ok_or_else(|| missing("shader module", desc.fragment_shader.0))?;

        let attributes: Vec<wgpu::VertexAttribute> = desc
            .vertex_layout
            .attributes
            .iter()
            .map(|attr| wgpu::VertexAttribute {
                format: to_wgpu_vertex_format(attr.format),
                offset: attr.offset as wgpu::BufferAddress,
                shader_location: attr.location,
            })
            .collect();
        let buffers = [wgpu::VertexBufferLayout {
            array_stride: desc.vertex_layout.stride as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        }];

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(desc.label),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module: vertex,
                    entry_point: Some("main"),
                    buffers: &buffers,
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: fragment,
                    entry_point: Some("main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            });
        let id = PipelineId(state.alloc());
        state.pipelines.insert(id, pipeline);
        Ok(id)
    }

    fn destroy_pipeline(&self, pipeline: PipelineId) {
        self.state.lock().pipelines.remove(&pipeline);
    }

    fn create_buffer(&self, desc: &BufferDescriptor<'_>) -> GpuResult<BufferId> {
        self.check_alive()?;
        let entry = match desc.usage {
            BufferUsage::TransferSrc => BufferEntry::Host(vec![0; desc.size as usize]),
            BufferUsage::Vertex | BufferUsage::Index => {
                let usage = if desc.usage == BufferUsage::Vertex {
                    wgpu::BufferUsages::VERTEX
                } else {
                    wgpu::BufferUsages::INDEX
                };
                BufferEntry::Device(self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(desc.label),
                    size: desc.size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
                    usage: usage | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                }))
            }
        };
        let mut state = self.state.lock();
        let id = BufferId(state.alloc());
        state.buffers.insert(id, entry);
        Ok(id)
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> GpuResult<()> {
        let mut state = self.state.lock();
        match state.buffers.get_mut(&buffer) {
            Some(BufferEntry::Host(memory)) => {
                let start = offset as usize;
                let end = start + data.len();
                if end > memory.len() {
                    return Err(usage("write overflows the staging buffer"));
                }
                memory[start..end].copy_from_slice(data);
            }
            Some(BufferEntry::Device(buf)) => self.queue.write_buffer(buf, offset, data),
            None => return Err(missing("buffer", buffer.0)),
        }
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        if let Some(BufferEntry::Device(buf)) = self.state.lock().buffers.remove(&buffer) {
            buf.destroy();
        }
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
        if !state.set_layouts.contains_key(&layout) {
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
            DescriptorSetEntry {
                pool,
                layout,
                group: None,
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
        let layout = state
            .descriptor_sets
            .get(&set)
            .map(|entry| entry.layout)
            .ok_or_else(|| missing("descriptor set", set.0))?;
        let group = {
            let layout = state
                .set_layouts
                .get(&layout)
                .ok_or_else(|| missing("descriptor set layout", layout.0))?;
            let Some(ViewEntry::Texture(texture_view)) = state.image_views.get(&view) else {
                return Err(missing("texture view", view.0));
            };
            let sampler = state
                .samplers
                .get(&sampler)
                .ok_or_else(|| missing("sampler", sampler.0))?;
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("texture_bind_group"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(texture_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                ],
            })
        };
        if let Some(entry) = state.descriptor_sets.get_mut(&set) {
            entry.group = Some(group);
        }
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
        Ok((0..count)
            .map(|_| {
                let id = CommandBufferId(state.alloc());
                state.command_buffers.insert(id, (pool, Vec::new()));
                id
            })
            .collect())
    }

    fn free_command_buffers(&self, pool: CommandPoolId, buffers: &[CommandBufferId]) {
        let mut state = self.state.lock();
        for id in buffers {
            if state
                .command_buffers
                .get(id)
                .is_some_and(|(owner, _)| *owner == pool)
            {
                state.command_buffers.remove(id);
            }
        }
    }

    fn destroy_command_pool(&self, pool: CommandPoolId) {
        let mut state = self.state.lock();
        if state.command_pools.remove(&pool) {
            state.command_buffers.retain(|_, (owner, _)| *owner != pool);
        }
    }

    fn reset_command_buffer(&self, cmd: CommandBufferId) -> GpuResult<()> {
        self.begin_command_buffer(cmd)
    }

    fn begin_command_buffer(&self, cmd: CommandBufferId) -> GpuResult<()> {
        let mut state = self.state.lock();
        let (_, commands) = state
            .command_buffers
            .get_mut(&cmd)
            .ok_or_else(|| missing("command buffer", cmd.0))?;
        commands.clear();
        Ok(())
    }

    fn record(&self, cmd: CommandBufferId, command: Command) -> GpuResult<()> {
        let mut state = self.state.lock();
        let (_, commands) = state
            .command_buffers
            .get_mut(&cmd)
            .ok_or_else(|| missing("command buffer", cmd.0))?;
        commands.push(command);
        Ok(())
    }

    fn end_command_buffer(&self, cmd: CommandBufferId) -> GpuResult<()> {
        if self.state.lock().command_buffers.contains_key(&cmd) {
            Ok(())
        } else {
            Err(missing("command buffer", cmd.0))
        }
    }

    fn create_fence(&self, signaled: bool) -> GpuResult<FenceId> {
        let mut state = self.state.lock();
        let id = FenceId(state.alloc());
        state.fences.insert(
            id,
            FenceEntry {
                signaled,
                submission: None,
            },
        );
        Ok(id)
    }

    fn wait_for_fence(&self, fence: FenceId, timeout: Option<Duration>) -> GpuResult<()> {
        self.check_alive()?;
        let submission = {
            let state = self.state.lock();
            let entry = state
                .fences
                .get(&fence)
                .ok_or_else(|| missing("fence", fence.0))?;
            if entry.signaled {
                return Ok(());
            }
            entry.submission.clone().ok_or(GpuError::Timeout)?
        };
        self.poll(Some(submission), timeout)?;
        if let Some(entry) = self.state.lock().fences.get_mut(&fence) {
            entry.signaled = true;
        }
        Ok(())
    }

    fn reset_fence(&self, fence: FenceId) -> GpuResult<()> {
        let mut state = self.state.lock();
        let entry = state
            .fences
            .get_mut(&fence)
            .ok_or_else(|| missing("fence", fence.0))?;
        *entry = FenceEntry::default();
        Ok(())
    }

    fn destroy_fence(&self, fence: FenceId) {
        self.state.lock().fences.remove(&fence);
    }

    fn create_semaphore(&self) -> GpuResult<SemaphoreId> {
        let mut state = self.state.lock();
        let id = SemaphoreId(state.alloc());
        state.semaphores.insert(id);
        Ok(id)
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreId) {
        self.state.lock().semaphores.remove(&semaphore);
    }

    fn acquire_next_image(&self, swapchain: SwapchainId, _signal: SemaphoreId) -> GpuResult<u32> {
        self.check_alive()?;
        if !self.state.lock().swapchains.contains_key(&swapchain) {
            return Err(missing("swapchain", swapchain.0));
        }
        let texture = match self.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                return Err(GpuError::OutOfDate);
            }
            Err(wgpu::SurfaceError::Timeout) => return Err(GpuError::Timeout),
            Err(e) => return Err(GpuError::Backend(e.to_string())),
        };
        let view = texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut state = self.state.lock();
        let entry = state
            .swapchains
            .get_mut(&swapchain)
            .ok_or_else(|| missing("swapchain", swapchain.0))?;
        let index = entry.next_image;
        entry.next_image = (index + 1) % entry.images.len().max(1) as u32;
        state.acquired = Some(AcquiredFrame {
            swapchain,
            index,
            texture,
            view,
        });
        Ok(index)
    }

    fn queue_submit(&self, submit: &SubmitInfo) -> GpuResult<()> {
        self.check_alive()?;
        let mut state = self.state.lock();
        let commands = state
            .command_buffers
            .get(&submit.command_buffer)
            .map(|(_, commands)| commands.clone())
            .ok_or_else(|| missing("command buffer", submit.command_buffer.0))?;
        let buffer = self.encode(&state, &commands)?;
        let index = self.queue.submit(std::iter::once(buffer));
        if let Some(fence) = submit.fence {
            let entry = state
                .fences
                .get_mut(&fence)
                .ok_or_else(|| missing("fence", fence.0))?;
            entry.signaled = false;
            entry.submission = Some(index);
        }
        drop(state);
        self.check_alive()
    }

    fn queue_present(
        &self,
        swapchain: SwapchainId,
        image_index: u32,
        _wait: SemaphoreId,
    ) -> GpuResult<()> {
        self.check_alive()?;
        let frame = self
            .state
            .lock()
            .acquired
            .take()
            .ok_or_else(|| usage("present without an acquired image"))?;
        if frame.swapchain != swapchain || frame.index != image_index {
            return Err(usage("presented image is not the acquired one"));
        }
        drop(frame.view);
        frame.texture.present();
        Ok(())
    }

    fn queue_wait_idle(&self) -> GpuResult<()> {
        self.check_alive()?;
        self.poll(None, None)
    }

    fn device_wait_idle(&self) -> GpuResult<()> {
        self.queue_wait_idle()
    }
}
