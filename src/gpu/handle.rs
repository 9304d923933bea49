use std::{fmt, sync::Arc};

use super::*;

/// A device object that can be handed back to the device that created it.
pub trait Handle: Copy + fmt::Debug + Send + Sync + 'static {
    fn release(self, device: &dyn GpuDevice);
}

macro_rules! impl_handle {
    ($($ty:ident => $destroy:ident),* $(,)?) => {
        $(
            impl Handle for $ty {
                fn release(self, device: &dyn GpuDevice) {
                    device.$destroy(self);
                }
            }
        )*
    };
}

impl_handle!(
    SwapchainId => destroy_swapchain,
    ImageId => destroy_image,
    ImageViewId => destroy_image_view,
    SamplerId => destroy_sampler,
    RenderPassId => destroy_render_pass,
    FramebufferId => destroy_framebuffer,
    ShaderModuleId => destroy_shader_module,
    DescriptorSetLayoutId => destroy_descriptor_set_layout,
    PipelineLayoutId => destroy_pipeline_layout,
    PipelineId => destroy_pipeline,
    BufferId => destroy_buffer,
    DescriptorPoolId => destroy_descriptor_pool,
    CommandPoolId => destroy_command_pool,
    FenceId => destroy_fence,
    SemaphoreId => destroy_semaphore,
);

/// Exclusive owner of one GPU handle.
///
/// The handle is released exactly once: either through [`Owned::destroy`] or
/// when the wrapper is dropped.
pub struct Owned<H: Handle> {
    device: Arc<dyn GpuDevice>,
    handle: Option<H>,
}

impl<H: Handle> Owned<H> {
    pub fn new(device: Arc<dyn GpuDevice>, handle: H) -> Self {
        Self {
            device,
            handle: Some(handle),
        }
    }

    /// Wraps the result of a `create_*` call.
    pub fn create(
        device: &Arc<dyn GpuDevice>,
        create: impl FnOnce(&dyn GpuDevice) -> GpuResult<H>,
    ) -> GpuResult<Self> {
        let handle = create(device.as_ref())?;
        Ok(Self::new(device.clone(), handle))
    }

    pub fn get(&self) -> H {
        // Only `destroy` and `drop` take the handle and both consume `self`.
        match self.handle {
            Some(handle) => handle,
            None => unreachable!("owned handle used after release"),
        }
    }

    pub fn destroy(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.release(self.device.as_ref());
        }
    }
}

impl<H: Handle> Drop for Owned<H> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<H: Handle> fmt::Debug for Owned<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owned").field(&self.handle).finish()
    }
}
