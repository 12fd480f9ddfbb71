// SPDX-License-Identifier: CEPL-1.0
use std::rc::Rc;

use anyhow::{Context, Result};
use ash::{ext::debug_utils, khr::swapchain, vk, Entry};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::info;
use vkdemo_core::Logger;
use vkdemo_render::{FrameOutcome, RenderSize, Renderer, RendererOptions};

use crate::command::{allocate_command_buffers, create_command_pool, CommandBuffers, CommandPool};
use crate::device::{create_device_and_queues, Device, QueueRequest};
use crate::error::RenderError;
use crate::frame::FrameCoordinator;
use crate::instance::{
    create_debug_messenger, create_instance, create_surface, enumerate_physical_devices,
    filter_available_instance_extensions, filter_available_layers, DebugMessenger, Instance,
    Surface, VALIDATION_LAYER,
};
use crate::resource::ResourceLedger;
use crate::select::select_physical_device;
use crate::swapchain::{
    choose_surface_format, create_render_pass, query_surface_capabilities, query_surface_formats,
    is_zero_area, RenderPass, SwapchainBundle,
};

/// Counts describing the current chain. They always agree on image count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainInfo {
    pub image_count: usize,
    pub view_count: usize,
    pub framebuffer_count: usize,
    pub command_buffer_count: usize,
    pub extent: vk::Extent2D,
}

/// Clear-and-present renderer. Fields are declared leaf first, which is the
/// order they are dropped in.
pub struct VkRenderer {
    coordinator: FrameCoordinator,
    commands: Option<CommandBuffers>,
    command_pool: Rc<CommandPool>,
    bundle: Option<SwapchainBundle>,
    render_pass: Rc<RenderPass>,
    device: Rc<Device>,
    surface: Rc<Surface>,
    debug_messenger: Option<DebugMessenger>,
    _instance: Rc<Instance>,

    queue_family: u32,
    surface_format: vk::SurfaceFormatKHR,
    paused: bool,
    ledger: ResourceLedger,
    logger: Logger,
}

// STRICT ORDER:
// instance -> debug messenger -> surface -> device selection -> device + queue
// -> surface format -> render pass -> command pool -> semaphores
// -> swapchain bundle + command buffers (deferred while the surface is 0x0)
fn build_renderer(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    options: &RendererOptions,
    logger: &Logger,
) -> Result<VkRenderer> {
    let display_raw = display.display_handle().map_err(RenderError::from)?.as_raw();
    let window_raw = window.window_handle().map_err(RenderError::from)?.as_raw();
    let ledger = ResourceLedger::new();

    let entry = Entry::linked();
    let (layers, extensions) = if options.validation {
        let debug_ext = debug_utils::NAME.to_string_lossy();
        (
            filter_available_layers(&entry, &[VALIDATION_LAYER], logger)?,
            filter_available_instance_extensions(&entry, &[&*debug_ext], logger)?,
        )
    } else {
        (Vec::new(), Vec::new())
    };

    let instance = create_instance(
        entry,
        &options.app_name,
        display_raw,
        &layers,
        &extensions,
        &ledger,
        logger,
    )
    .context("create instance")?;
    let debug_messenger = create_debug_messenger(&instance, logger)?;
    let surface = create_surface(&instance, display_raw, window_raw).context("create surface")?;

    let (device, queue_family, queue) = {
        let devices = enumerate_physical_devices(&instance, logger)?;
        let swapchain_ext = swapchain::NAME.to_string_lossy();
        let (physical, family) = select_physical_device(
            &devices,
            &[&*swapchain_ext],
            vk::QueueFlags::GRAPHICS,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Some(&*surface),
            logger,
        )?;
        let plan = [QueueRequest { family, count: 1 }];
        let (device, queues) =
            create_device_and_queues(&instance, physical, &plan, &[swapchain::NAME], logger)
                .context("create logical device")?;
        let queue = queues
            .get(&family)
            .and_then(|q| q.first().copied())
            .ok_or_else(|| RenderError::QueuePlan(format!("family {family} returned no queue")))?;
        (device, family, queue)
    };

    let surface_format = choose_surface_format(&query_surface_formats(&device, &surface)?)?;
    let render_pass = create_render_pass(&device, surface_format.format)?;
    let command_pool = create_command_pool(&device, queue_family)?;
    let coordinator = FrameCoordinator::new(&device, queue, options.clear_color, logger)?;

    let mut renderer = VkRenderer {
        coordinator,
        commands: None,
        command_pool,
        bundle: None,
        render_pass,
        device,
        surface,
        debug_messenger,
        _instance: instance,
        queue_family,
        surface_format,
        paused: size.is_empty(),
        ledger,
        logger: logger.clone(),
    };

    if renderer.paused {
        info!("vk: window is 0x0 → chain deferred, paused=true");
    } else {
        renderer
            .recreate_chain()
            .context("create presentable chain")?;
    }
    info!(
        "vk: renderer ready ({} images, {:?})",
        renderer.bundle.as_ref().map_or(0, SwapchainBundle::image_count),
        surface_format.format
    );
    Ok(renderer)
}

impl VkRenderer {
    pub fn ledger(&self) -> ResourceLedger {
        self.ledger.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn has_debug_messenger(&self) -> bool {
        self.debug_messenger.is_some()
    }

    /// `None` until the first chain exists.
    pub fn chain_info(&self) -> Option<ChainInfo> {
        let bundle = self.bundle.as_ref()?;
        Some(ChainInfo {
            image_count: bundle.image_count(),
            view_count: bundle.views.len(),
            framebuffer_count: bundle.framebuffers.len(),
            command_buffer_count: self.commands.as_ref().map_or(0, |c| c.len()),
            extent: bundle.extent(),
        })
    }

    // STRICT ORDER (recreate):
    // 1) device_wait_idle(): nothing in flight may reference the old chain
    // 2) a 0x0 surface pauses instead of recreating
    // 3) build the new bundle, handing over the old swapchain if there is one
    // 4) drop the old framebuffers, views and swapchain
    // 5) reallocate command buffers if the image count changed
    fn recreate_chain(&mut self) -> Result<(), RenderError> {
        self.device.wait_idle()?;

        let caps = query_surface_capabilities(&self.device, &self.surface)?;
        if is_zero_area(caps.current_extent) {
            if !self.paused {
                info!("vk: current_extent is 0x0 → paused=true");
            }
            self.paused = true;
            return Ok(());
        }

        let bundle = SwapchainBundle::build(
            &self.device,
            &self.surface,
            self.surface_format,
            &self.render_pass,
            self.bundle.as_ref().map(|b| b.swapchain.clone()),
            &self.logger,
        )?;
        let count = bundle.image_count();
        self.bundle = Some(bundle);

        if self.commands.as_ref().map(|c| c.len()) != Some(count) {
            self.commands = Some(allocate_command_buffers(&self.command_pool, count as u32)?);
            info!("vk: command buffers allocated for {count} images");
        }
        self.paused = false;
        Ok(())
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: &RendererOptions,
        logger: &Logger,
    ) -> Result<Self> {
        build_renderer(window, display, size, options, logger)
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if size.is_empty() {
            if !self.paused {
                info!("vk: resize to 0x0 → paused=true");
            }
            self.paused = true;
            return Ok(());
        }

        if self.paused {
            info!("vk: resize to {}x{} → paused=false", size.width, size.height);
        }
        self.paused = false;

        self.recreate_chain()
            .with_context(|| format!("recreate chain for {}x{}", size.width, size.height))
    }

    fn render(&mut self) -> Result<FrameOutcome> {
        let (Some(bundle), Some(commands)) = (&self.bundle, &self.commands) else {
            return Ok(FrameOutcome::Paused);
        };
        if self.paused {
            return Ok(FrameOutcome::Paused);
        }

        match self.coordinator.draw(bundle, &self.render_pass, commands)? {
            Some(image_index) => Ok(FrameOutcome::Presented { image_index }),
            None => {
                self.recreate_chain().context("recreate stale chain")?;
                Ok(FrameOutcome::Skipped)
            }
        }
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.coordinator.set_clear_color(rgba);
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            self.logger.warn(format_args!("vk: wait idle before teardown: {e}"));
        }
    }
}
