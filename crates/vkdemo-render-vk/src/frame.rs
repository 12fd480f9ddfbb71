// SPDX-License-Identifier: CEPL-1.0
//! Per-frame acquire → record → submit → present.
//!
//! A stale chain (out of date or suboptimal) is an expected outcome, reported
//! as `None`/`false` rather than as an error. Every frame drains the queue
//! before returning, so at most one frame of GPU work is outstanding.

use std::rc::Rc;

use ash::vk;
use vkdemo_core::{Level, Logger};

use crate::command::CommandBuffers;
use crate::device::{create_semaphore, Device, Semaphore};
use crate::error::{RenderError, Result, VkResultExt};
use crate::swapchain::{Framebuffer, RenderPass, Swapchain, SwapchainBundle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presented,
    Stale,
}

impl FrameState {
    pub fn can_advance_to(self, next: FrameState) -> bool {
        use FrameState::*;
        matches!(
            (self, next),
            (Idle, Acquiring)
                | (Acquiring, Recording)
                | (Recording, Submitted)
                | (Submitted, Presented)
                | (Presented, Idle)
                | (Acquiring, Stale)
                | (Presented, Stale)
                | (Stale, Idle)
        )
    }
}

fn is_stale_code(code: vk::Result) -> bool {
    code == vk::Result::ERROR_OUT_OF_DATE_KHR || code == vk::Result::SUBOPTIMAL_KHR
}

/// Maps a raw acquire result: `Some(index)` for a usable image, `None` when
/// the chain is stale.
pub fn classify_acquire(
    result: std::result::Result<(u32, bool), vk::Result>,
    image_count: usize,
) -> Result<Option<u32>> {
    match result {
        Ok((_, true)) => Ok(None),
        Ok((index, false)) if (index as usize) < image_count => Ok(Some(index)),
        Ok((_, false)) => Err(RenderError::Gpu {
            op: "vkAcquireNextImageKHR",
            code: vk::Result::ERROR_UNKNOWN,
        }),
        Err(code) if is_stale_code(code) => Ok(None),
        Err(code) => Err(RenderError::Gpu {
            op: "vkAcquireNextImageKHR",
            code,
        }),
    }
}

/// Maps a raw present result: `true` when presented on a fresh chain.
pub fn classify_present(result: std::result::Result<bool, vk::Result>) -> Result<bool> {
    match result {
        Ok(suboptimal) => Ok(!suboptimal),
        Err(code) if is_stale_code(code) => Ok(false),
        Err(code) => Err(RenderError::Gpu {
            op: "vkQueuePresentKHR",
            code,
        }),
    }
}

/// Blocks without timeout until an image is available.
pub fn acquire_next_image(
    device: &Device,
    swapchain: &Swapchain,
    image_available: &Semaphore,
) -> Result<Option<u32>> {
    let result = unsafe {
        device.swapchain_fn.acquire_next_image(
            swapchain.swapchain,
            u64::MAX,
            image_available.semaphore,
            vk::Fence::null(),
        )
    };
    classify_acquire(result, swapchain.images().len())
}

pub fn record_clear_pass(
    device: &Device,
    cmd: vk::CommandBuffer,
    render_pass: &RenderPass,
    framebuffer: &Framebuffer,
    extent: vk::Extent2D,
    clear: [f32; 4],
) -> Result<()> {
    let d = &device.device;
    let begin =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue { float32: clear },
    }];
    let area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    let pass = vk::RenderPassBeginInfo::default()
        .render_pass(render_pass.render_pass)
        .framebuffer(framebuffer.framebuffer)
        .render_area(area)
        .clear_values(&clear_values);
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };

    unsafe {
        d.begin_command_buffer(cmd, &begin)
            .gpu("vkBeginCommandBuffer")?;
        d.cmd_begin_render_pass(cmd, &pass, vk::SubpassContents::INLINE);
        d.cmd_set_viewport(cmd, 0, &[viewport]);
        d.cmd_set_scissor(cmd, 0, &[area]);
        d.cmd_end_render_pass(cmd);
        d.end_command_buffer(cmd).gpu("vkEndCommandBuffer")
    }
}

/// Waits on `wait` at color-attachment output, signals `signal`. Does not block.
pub fn submit_command_buffer(
    device: &Device,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
    wait: &Semaphore,
    signal: &Semaphore,
) -> Result<()> {
    let waits = [wait.semaphore];
    let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
    let cmds = [cmd];
    let signals = [signal.semaphore];
    let submit = vk::SubmitInfo::default()
        .wait_semaphores(&waits)
        .wait_dst_stage_mask(&stages)
        .command_buffers(&cmds)
        .signal_semaphores(&signals);
    unsafe {
        device
            .device
            .queue_submit(queue, std::slice::from_ref(&submit), vk::Fence::null())
    }
    .gpu("vkQueueSubmit")
}

pub fn present_image(
    device: &Device,
    queue: vk::Queue,
    swapchain: &Swapchain,
    index: u32,
    wait: &Semaphore,
) -> Result<bool> {
    let waits = [wait.semaphore];
    let swapchains = [swapchain.swapchain];
    let indices = [index];
    let info = vk::PresentInfoKHR::default()
        .wait_semaphores(&waits)
        .swapchains(&swapchains)
        .image_indices(&indices);
    classify_present(unsafe { device.swapchain_fn.queue_present(queue, &info) })
}

pub struct FrameCoordinator {
    // Semaphores go before the device reference.
    image_available: Semaphore,
    render_finished: Semaphore,
    device: Rc<Device>,
    queue: vk::Queue,
    state: FrameState,
    clear: [f32; 4],
    logger: Logger,
}

impl FrameCoordinator {
    pub fn new(device: &Rc<Device>, queue: vk::Queue, clear: [f32; 4], logger: &Logger) -> Result<Self> {
        Ok(Self {
            image_available: create_semaphore(device)?,
            render_finished: create_semaphore(device)?,
            device: device.clone(),
            queue,
            state: FrameState::Idle,
            clear,
            logger: logger.clone(),
        })
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = rgba;
    }

    fn advance(&mut self, next: FrameState) {
        if !self.state.can_advance_to(next) {
            self.logger.error(format_args!(
                "vk: frame state {:?} -> {next:?} is not a valid transition",
                self.state
            ));
        }
        self.state = next;
    }

    // STRICT PER-FRAME ORDER:
    // 1) acquire (signals image_available)
    // 2) record the clear pass into the buffer for that image
    // 3) submit (waits image_available, signals render_finished)
    // 4) present (waits render_finished), then drain the queue
    /// Draws one frame. Returns the presented image index, or `None` when the
    /// chain went stale and must be recreated before the next frame.
    pub fn draw(
        &mut self,
        bundle: &SwapchainBundle,
        render_pass: &RenderPass,
        commands: &CommandBuffers,
    ) -> Result<Option<u32>> {
        if self.state != FrameState::Idle {
            // A previous frame failed part way; start over.
            self.state = FrameState::Idle;
        }

        self.advance(FrameState::Acquiring);
        let Some(index) =
            acquire_next_image(&self.device, &bundle.swapchain, &self.image_available)?
        else {
            self.advance(FrameState::Stale);
            self.refresh_image_available()?;
            self.advance(FrameState::Idle);
            return Ok(None);
        };

        self.advance(FrameState::Recording);
        let i = index as usize;
        let cmd = commands.get(i).ok_or(RenderError::Gpu {
            op: "command buffer lookup",
            code: vk::Result::ERROR_UNKNOWN,
        })?;
        record_clear_pass(
            &self.device,
            cmd,
            render_pass,
            &bundle.framebuffers[i],
            bundle.extent(),
            self.clear,
        )?;

        self.advance(FrameState::Submitted);
        submit_command_buffer(
            &self.device,
            self.queue,
            cmd,
            &self.image_available,
            &self.render_finished,
        )?;

        self.advance(FrameState::Presented);
        let fresh = present_image(
            &self.device,
            self.queue,
            &bundle.swapchain,
            index,
            &self.render_finished,
        )?;
        unsafe { self.device.device.queue_wait_idle(self.queue) }.gpu("vkQueueWaitIdle")?;

        if !fresh {
            self.advance(FrameState::Stale);
            self.advance(FrameState::Idle);
            if self.logger.should_log(Level::DEBUG) {
                self.logger.debug(format_args!("vk: present of image {index} reported a stale chain"));
            }
            return Ok(None);
        }

        self.advance(FrameState::Idle);
        Ok(Some(index))
    }

    /// A suboptimal acquire may still signal `image_available`; replace it so
    /// the next acquire starts from an unsignaled semaphore.
    fn refresh_image_available(&mut self) -> Result<()> {
        self.device.wait_idle()?;
        self.image_available = create_semaphore(&self.device)?;
        self.logger.debug("vk: acquire reported a stale chain, semaphore replaced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_stale_codes_skip_the_frame() {
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR), 2).unwrap(),
            None
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::SUBOPTIMAL_KHR), 2).unwrap(),
            None
        );
        assert_eq!(classify_acquire(Ok((1, true)), 2).unwrap(), None);
    }

    #[test]
    fn acquire_success_returns_index_in_range() {
        assert_eq!(classify_acquire(Ok((0, false)), 2).unwrap(), Some(0));
        assert_eq!(classify_acquire(Ok((1, false)), 2).unwrap(), Some(1));
        assert!(classify_acquire(Ok((2, false)), 2).is_err());
    }

    #[test]
    fn acquire_other_codes_are_fatal() {
        for code in [
            vk::Result::ERROR_DEVICE_LOST,
            vk::Result::ERROR_SURFACE_LOST_KHR,
            vk::Result::TIMEOUT,
            vk::Result::NOT_READY,
        ] {
            let err = classify_acquire(Err(code), 2).unwrap_err();
            assert!(matches!(err, RenderError::Gpu { code: c, .. } if c == code));
            assert!(!err.is_setup());
        }
    }

    #[test]
    fn present_results() {
        assert!(classify_present(Ok(false)).unwrap());
        assert!(!classify_present(Ok(true)).unwrap());
        assert!(!classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap());
        assert!(!classify_present(Err(vk::Result::SUBOPTIMAL_KHR)).unwrap());
        assert!(classify_present(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }

    #[test]
    fn frame_cycle_transitions() {
        use FrameState::*;
        let cycle = [Idle, Acquiring, Recording, Submitted, Presented, Idle];
        for w in cycle.windows(2) {
            assert!(w[0].can_advance_to(w[1]), "{:?} -> {:?}", w[0], w[1]);
        }
        assert!(Acquiring.can_advance_to(Stale));
        assert!(Presented.can_advance_to(Stale));
        assert!(Stale.can_advance_to(Idle));
    }

    #[test]
    fn stale_never_advances_the_frame() {
        use FrameState::*;
        assert!(!Stale.can_advance_to(Recording));
        assert!(!Stale.can_advance_to(Presented));
        assert!(!Recording.can_advance_to(Stale));
        assert!(!Idle.can_advance_to(Recording));
        assert!(!Submitted.can_advance_to(Idle));
    }
}
