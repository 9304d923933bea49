//! Swapchain and the presentation targets derived from it.

use std::sync::Arc;

use anyhow::{Context, bail};

use crate::gpu::{
    ColorSpace, Extent2d, Format, FramebufferId, GpuDevice, ImageViewId, Owned, PresentMode,
    RenderPassId, SurfaceCapabilities, SurfaceFormat, SwapchainDescriptor, SwapchainId,
};

/// The 8-bit RGBA, sRGB-nonlinear format if offered, else the first one.
pub fn choose_surface_format(formats: &[SurfaceFormat]) -> Option<SurfaceFormat> {
    formats
        .iter()
        .find(|f| f.format == Format::Rgba8Unorm && f.color_space == ColorSpace::SrgbNonlinear)
        .or_else(|| formats.first())
        .copied()
}

/// Mailbox (low-latency triple buffering) when available, plain vsync otherwise.
pub fn choose_present_mode(modes: &[PresentMode]) -> PresentMode {
    if modes.contains(&PresentMode::Mailbox) {
        PresentMode::Mailbox
    } else {
        PresentMode::Fifo
    }
}

/// One image more than the minimum, capped by the maximum when there is one.
pub fn choose_image_count(caps: &SurfaceCapabilities) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && count > caps.max_image_count {
        caps.max_image_count
    } else {
        count
    }
}

/// The surface decides the extent when it reports one.
pub fn choose_extent(caps: &SurfaceCapabilities, requested: Extent2d) -> Extent2d {
    caps.current_extent.unwrap_or(requested)
}

#[derive(Debug)]
pub struct Swapchain {
    views: Vec<Owned<ImageViewId>>,
    swapchain: Owned<SwapchainId>,
    format: SurfaceFormat,
    present_mode: PresentMode,
    extent: Extent2d,
}

impl Swapchain {
    /// Creates the swapchain and one view per swapchain image.
    pub fn new(device: &Arc<dyn GpuDevice>, requested: Extent2d) -> anyhow::Result<Self> {
        let caps = device
            .surface_capabilities()
            .context("Failed to query surface capabilities")?;
        let Some(format) = choose_surface_format(&caps.formats) else {
            bail!("Surface reports no formats");
        };
        let present_mode = choose_present_mode(&caps.present_modes);
        let image_count = choose_image_count(&caps);
        let extent = choose_extent(&caps, requested);
        if extent.width == 0 || extent.height == 0 {
            bail!("Surface extent {}x{} is empty", extent.width, extent.height);
        }

        let swapchain = Owned::create(device, |d| {
            d.create_swapchain(&SwapchainDescriptor {
                image_count,
                format,
                extent,
                present_mode,
            })
        })
        .context("Failed to create the swapchain")?;
        let views = device
            .swapchain_images(swapchain.get())?
            .into_iter()
            .map(|image| Owned::create(device, |d| d.create_image_view(image)))
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to create swapchain image views")?;
        log::info!(
            "Swapchain {}x{}: {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            views.len(),
            format.format,
            present_mode
        );
        Ok(Self {
            views,
            swapchain,
            format,
            present_mode,
            extent,
        })
    }

    pub fn id(&self) -> SwapchainId {
        self.swapchain.get()
    }

    pub fn image_count(&self) -> usize {
        self.views.len()
    }

    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    pub fn format(&self) -> SurfaceFormat {
        self.format
    }

    pub fn present_mode(&self) -> PresentMode {
        self.present_mode
    }

    pub fn create_render_pass(&self, device: &Arc<dyn GpuDevice>) -> anyhow::Result<Owned<RenderPassId>> {
        Owned::create(device, |d| d.create_render_pass(self.format.format))
            .context("Failed to create the render pass")
    }

    /// One framebuffer per swapchain image, in image order.
    pub fn create_framebuffers(
        &self,
        device: &Arc<dyn GpuDevice>,
        render_pass: RenderPassId,
    ) -> anyhow::Result<Vec<Owned<FramebufferId>>> {
        self.views
            .iter()
            .map(|view| {
                Owned::create(device, |d| {
                    d.create_framebuffer(render_pass, view.get(), self.extent)
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to create framebuffers")
    }
}
