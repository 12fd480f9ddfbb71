// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan backend: owned handle chain, device selection, presentable chain
//! management and the per-frame coordinator.

mod command;
mod device;
mod error;
mod frame;
mod instance;
mod renderer;
mod resource;
mod select;
mod swapchain;

use anyhow::{Context, Result};
use vkdemo_core::Logger;
use vkdemo_platform::{Platform, WindowHandle};
use vkdemo_render::{drive_frames, FrameStats, RenderSize, Renderer, RendererOptions, WindowEvents};

pub use command::{allocate_command_buffers, create_command_pool, CommandBuffers, CommandPool};
pub use device::{
    collect_queues, create_device_and_queues, create_semaphore, queue_priorities,
    validate_queue_plan, Device, QueueMap, QueueRequest, Semaphore,
};
pub use error::RenderError;
pub use frame::{
    acquire_next_image, classify_acquire, classify_present, present_image, record_clear_pass,
    submit_command_buffer, FrameCoordinator, FrameState,
};
pub use instance::{
    create_debug_messenger, create_instance, create_surface, enumerate_physical_devices,
    filter_available, filter_available_instance_extensions, filter_available_layers,
    DebugMessenger, Instance, PhysicalDevice, Surface, VALIDATION_LAYER,
};
pub use renderer::{ChainInfo, VkRenderer};
pub use resource::{Destroy, Handle, OrderViolation, ResourceId, ResourceKind, ResourceLedger};
pub use select::{
    choose_candidate, select_physical_device, DeviceCandidate, DeviceRequirements,
    QueueFamilyInfo,
};
pub use swapchain::{
    check_surface_capabilities, choose_image_count, choose_pre_transform, choose_present_mode,
    choose_surface_format, create_framebuffers, create_render_pass, create_swapchain_and_views,
    filter_available_surface_formats, is_zero_area, Framebuffer, ImageView, RenderPass,
    Swapchain, SwapchainBundle, SwapchainPlan, PREFERRED_FORMATS,
};

/// Builds a renderer for `window` and runs frames until the window is closed.
///
/// Returns normally on quit; any setup or fatal GPU failure is returned as an
/// error. Everything is torn down before returning.
pub fn run_frame_loop(
    platform: &mut Platform,
    window: &WindowHandle,
    options: &RendererOptions,
    logger: &Logger,
) -> Result<FrameStats> {
    let (width, height) = window.drawable_size();
    let mut renderer = VkRenderer::new(
        window,
        window,
        RenderSize { width, height },
        options,
        logger,
    )
    .context("vulkan renderer setup")?;

    let mut events = WindowEvents::new(platform, window);
    let stats = drive_frames(&mut events, &mut renderer, logger)?;

    let ledger = renderer.ledger();
    drop(renderer);
    let violations = ledger.violations();
    if !violations.is_empty() {
        logger.warn(format_args!(
            "vk: {} teardown order violations",
            violations.len()
        ));
    }
    Ok(stats)
}
