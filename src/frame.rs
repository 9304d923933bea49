//! Frame scheduling: a ring of in-flight frame slots.
//!
//! Each slot owns a fence and two semaphores. A frame waits for its slot's
//! fence (bounding how far the CPU can run ahead), acquires a swapchain image,
//! re-records that image's command buffer, submits it and presents.

use std::{sync::Arc, time::Duration};

use anyhow::Context;

use crate::gpu::{
    CommandBufferId, CommandPoolId, FenceId, GpuDevice, GpuError, GpuResult, Owned, SemaphoreId,
    SubmitInfo, SwapchainId,
};

/// Counters the host can sample (e.g. to show FPS).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameStats {
    pub frames_presented: u64,
    pub frames_dropped: u64,
    /// CPU time of the last presented frame.
    pub last_frame_time: Duration,
}

/// Why a frame produced no image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The swapchain no longer matches the surface; the next resize rebuilds it.
    OutOfDate,
    /// The surface had no image ready in time, e.g. while the window is occluded.
    Timeout,
    /// No swapchain yet, or the engine was destroyed.
    NotReady,
    /// The engine hit a fatal error, see `Engine::last_error`.
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { image_index: u32 },
    Skipped(SkipReason),
}

#[derive(Debug)]
struct FrameSlot {
    in_flight: Owned<FenceId>,
    image_available: Owned<SemaphoreId>,
    render_finished: Owned<SemaphoreId>,
}

impl FrameSlot {
    fn new(device: &Arc<dyn GpuDevice>) -> GpuResult<Self> {
        Ok(Self {
            // Signaled so the first wait on every slot returns at once.
            in_flight: Owned::create(device, |d| d.create_fence(true))?,
            image_available: Owned::create(device, |d| d.create_semaphore())?,
            render_finished: Owned::create(device, |d| d.create_semaphore())?,
        })
    }
}

#[derive(Debug)]
pub struct FrameScheduler {
    slots: Vec<FrameSlot>,
    /// One command buffer per swapchain image, owned by `command_pool`.
    command_buffers: Vec<CommandBufferId>,
    /// Slot whose submission last used each swapchain image.
    images_in_flight: Vec<Option<usize>>,
    command_pool: Owned<CommandPoolId>,
    current: usize,
    frame_count: u64,
}

impl FrameScheduler {
    pub fn new(
        device: &Arc<dyn GpuDevice>,
        frames_in_flight: usize,
        image_count: usize,
    ) -> anyhow::Result<Self> {
        let command_pool = Owned::create(device, |d| d.create_command_pool())
            .context("Failed to create the frame command pool")?;
        let command_buffers = device
            .allocate_command_buffers(command_pool.get(), image_count as u32)
            .context("Failed to allocate frame command buffers")?;
        let slots = (0..frames_in_flight.max(1))
            .map(|_| FrameSlot::new(device))
            .collect::<GpuResult<Vec<_>>>()
            .context("Failed to create frame synchronisation objects")?;
        Ok(Self {
            slots,
            command_buffers,
            images_in_flight: vec![None; image_count],
            command_pool,
            current: 0,
            frame_count: 0,
        })
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Slot the next frame will use.
    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// Frames submitted so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Runs one frame. `record` fills the command buffer for the acquired image.
    ///
    /// A stale swapchain is reported as [`SkipReason::OutOfDate`] and an
    /// acquire that timed out as [`SkipReason::Timeout`]. When either happens
    /// at acquire time nothing was recorded and the slot is reused by the next
    /// frame. Any other error is fatal to the caller.
    pub fn render_frame(
        &mut self,
        device: &dyn GpuDevice,
        swapchain: SwapchainId,
        record: impl FnOnce(CommandBufferId, u32) -> GpuResult<()>,
    ) -> GpuResult<FrameOutcome> {
        let slot_index = self.current;
        let slot = &self.slots[slot_index];
        device.wait_for_fence(slot.in_flight.get(), None)?;

        let image_index = match device.acquire_next_image(swapchain, slot.image_available.get()) {
            Ok(index) => index,
            Err(e) if e.is_transient() => {
                log::debug!("Skipping frame: {e}");
                return Ok(FrameOutcome::Skipped(SkipReason::OutOfDate));
            }
            // Nothing was signaled or reset, so the slot is simply reused.
            Err(GpuError::Timeout) => {
                log::warn!("Surface timeout, skipping frame");
                return Ok(FrameOutcome::Skipped(SkipReason::Timeout));
            }
            Err(e) => return Err(e),
        };
        let image = image_index as usize;
        let Some(&cmd) = self.command_buffers.get(image) else {
            return Err(GpuError::InvalidUsage(format!(
                "acquired image {image_index} has no command buffer"
            )));
        };

        // The image may still be in use by a frame from another slot.
        if let Some(previous) = self.images_in_flight[image] {
            if previous != slot_index {
                device.wait_for_fence(self.slots[previous].in_flight.get(), None)?;
            }
        }
        self.images_in_flight[image] = Some(slot_index);

        device.reset_fence(slot.in_flight.get())?;
        device.reset_command_buffer(cmd)?;
        device.begin_command_buffer(cmd)?;
        record(cmd, image_index)?;
        device.end_command_buffer(cmd)?;

        device.queue_submit(&SubmitInfo {
            wait_semaphore: Some(slot.image_available.get()),
            command_buffer: cmd,
            signal_semaphore: Some(slot.render_finished.get()),
            fence: Some(slot.in_flight.get()),
        })?;
        self.current = (self.current + 1) % self.slots.len();
        self.frame_count += 1;

        match device.queue_present(swapchain, image_index, slot.render_finished.get()) {
            Ok(()) => Ok(FrameOutcome::Presented { image_index }),
            Err(e) if e.is_transient() => {
                log::debug!("Frame rendered but not presented: {e}");
                Ok(FrameOutcome::Skipped(SkipReason::OutOfDate))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{
        ColorSpace, Extent2d, Format, HeadlessDevice, PresentMode, ResourceKind, SurfaceFormat,
        SwapchainDescriptor,
    };

    fn setup(frames: usize) -> (Arc<HeadlessDevice>, Arc<dyn GpuDevice>, SwapchainId, FrameScheduler) {
        let headless = Arc::new(HeadlessDevice::default());
        let device: Arc<dyn GpuDevice> = headless.clone();
        let swapchain = device
            .create_swapchain(&SwapchainDescriptor {
                image_count: 3,
                format: SurfaceFormat {
                    format: Format::Rgba8Unorm,
                    color_space: ColorSpace::SrgbNonlinear,
                },
                extent: Extent2d::new(8, 8),
                present_mode: PresentMode::Fifo,
            })
            .unwrap();
        let scheduler = FrameScheduler::new(&device, frames, 3).unwrap();
        (headless, device, swapchain, scheduler)
    }

    #[test]
    fn slots_cycle_and_images_rotate() {
        let (headless, device, swapchain, mut frames) = setup(2);
        let mut images = Vec::new();
        for _ in 0..6 {
            let outcome = frames
                .render_frame(device.as_ref(), swapchain, |_, _| Ok(()))
                .unwrap();
            match outcome {
                FrameOutcome::Presented { image_index } => images.push(image_index),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(images, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(frames.current_slot(), 0);
        assert_eq!(frames.frame_count(), 6);
        assert_eq!(headless.stats().presents, 6);
    }

    #[test]
    fn out_of_date_acquire_keeps_the_slot() {
        let (headless, device, swapchain, mut frames) = setup(2);
        headless.invalidate_surface();
        let mut recorded = false;
        let outcome = frames
            .render_frame(device.as_ref(), swapchain, |_, _| {
                recorded = true;
                Ok(())
            })
            .unwrap();
        assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::OutOfDate));
        assert!(!recorded);
        assert_eq!(frames.current_slot(), 0);
        // fence is still signaled, so the next attempt does not block or time out
        let again = frames.render_frame(device.as_ref(), swapchain, |_, _| Ok(()));
        assert_eq!(again, Ok(FrameOutcome::Skipped(SkipReason::OutOfDate)));
    }

    #[test]
    fn acquire_timeout_skips_without_consuming_the_slot() {
        let (headless, device, swapchain, mut frames) = setup(2);
        headless.stall_acquires(2);
        for _ in 0..2 {
            let outcome = frames.render_frame(device.as_ref(), swapchain, |_, _| Ok(()));
            assert_eq!(outcome, Ok(FrameOutcome::Skipped(SkipReason::Timeout)));
        }
        assert_eq!(frames.current_slot(), 0);
        assert_eq!(frames.frame_count(), 0);
        let outcome = frames.render_frame(device.as_ref(), swapchain, |_, _| Ok(()));
        assert_eq!(outcome, Ok(FrameOutcome::Presented { image_index: 0 }));
    }

    #[test]
    fn device_loss_is_an_error() {
        let (headless, device, swapchain, mut frames) = setup(1);
        headless.lose_device();
        let result = frames.render_frame(device.as_ref(), swapchain, |_, _| Ok(()));
        assert_eq!(result, Err(GpuError::DeviceLost));
    }

    #[test]
    fn dropping_releases_sync_objects() {
        let (headless, _device, _swapchain, frames) = setup(3);
        assert_eq!(headless.live_count(ResourceKind::Fence), 3);
        assert_eq!(headless.live_count(ResourceKind::Semaphore), 6);
        drop(frames);
        assert_eq!(headless.live_count(ResourceKind::Fence), 0);
        assert_eq!(headless.live_count(ResourceKind::Semaphore), 0);
        assert_eq!(headless.live_count(ResourceKind::CommandBuffer), 0);
    }
}
