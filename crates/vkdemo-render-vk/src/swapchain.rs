// SPDX-License-Identifier: CEPL-1.0
//! Presentable chain: swapchain, image views, render pass and framebuffers.

use std::rc::Rc;

use ash::vk;
use vkdemo_core::{Level, Logger};

use crate::device::Device;
use crate::error::{RenderError, Result, VkResultExt};
use crate::instance::Surface;
use crate::resource::{Destroy, Handle, ResourceKind};

/// Preferred surface formats, best first.
pub const PREFERRED_FORMATS: [vk::Format; 2] =
    [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM];

pub fn choose_present_mode(available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// At least two images (or the surface minimum), capped by the surface
/// maximum unless that is 0 (unbounded).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count.max(2);
    if caps.max_image_count == 0 {
        wanted
    } else {
        wanted.min(caps.max_image_count)
    }
}

pub fn choose_pre_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

/// A minimised window reports a 0x0 extent; no swapchain can be built for it.
pub fn is_zero_area(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

pub fn check_surface_capabilities(caps: &vk::SurfaceCapabilitiesKHR) -> Result<()> {
    if caps.current_extent.width == u32::MAX {
        return Err(RenderError::SurfaceUnsupported(
            "current extent is undefined; the window must be resized first".to_owned(),
        ));
    }
    if is_zero_area(caps.current_extent) {
        return Err(RenderError::SurfaceUnsupported(format!(
            "current extent is {}x{}",
            caps.current_extent.width, caps.current_extent.height
        )));
    }
    if !caps
        .supported_composite_alpha
        .contains(vk::CompositeAlphaFlagsKHR::OPAQUE)
    {
        return Err(RenderError::SurfaceUnsupported(
            "opaque composite alpha not supported".to_owned(),
        ));
    }
    if !caps
        .supported_usage_flags
        .contains(vk::ImageUsageFlags::COLOR_ATTACHMENT)
    {
        return Err(RenderError::SurfaceUnsupported(
            "color attachment usage not supported".to_owned(),
        ));
    }
    Ok(())
}

/// Available formats whose format is in `desired`, ordered by `desired`.
pub fn filter_available_surface_formats(
    available: &[vk::SurfaceFormatKHR],
    desired: &[vk::Format],
) -> Vec<vk::SurfaceFormatKHR> {
    desired
        .iter()
        .flat_map(|d| available.iter().filter(move |a| a.format == *d).copied())
        .collect()
}

pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    filter_available_surface_formats(available, &PREFERRED_FORMATS)
        .first()
        .or_else(|| available.first())
        .copied()
        .ok_or_else(|| RenderError::SurfaceUnsupported("surface reports no formats".to_owned()))
}

/// Parameters for one swapchain creation, decided from the surface report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub image_count: u32,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub extent: vk::Extent2D,
}

impl SwapchainPlan {
    pub fn new(caps: &vk::SurfaceCapabilitiesKHR, modes: &[vk::PresentModeKHR]) -> Result<Self> {
        check_surface_capabilities(caps)?;
        Ok(Self {
            image_count: choose_image_count(caps),
            present_mode: choose_present_mode(modes),
            pre_transform: choose_pre_transform(caps),
            extent: caps.current_extent,
        })
    }
}

pub struct RawSwapchain {
    device: Rc<Device>,
    _surface: Rc<Surface>,
    pub(crate) swapchain: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
}

impl RawSwapchain {
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }
}

impl Destroy for RawSwapchain {
    const KIND: ResourceKind = ResourceKind::Swapchain;

    unsafe fn destroy(&mut self) {
        unsafe { self.device.swapchain_fn.destroy_swapchain(self.swapchain, None) };
    }
}

pub type Swapchain = Handle<RawSwapchain>;

pub struct RawImageView {
    device: Rc<Device>,
    _swapchain: Rc<Swapchain>,
    pub(crate) view: vk::ImageView,
}

impl Destroy for RawImageView {
    const KIND: ResourceKind = ResourceKind::ImageView;

    unsafe fn destroy(&mut self) {
        unsafe { self.device.device.destroy_image_view(self.view, None) };
    }
}

pub type ImageView = Handle<RawImageView>;

pub struct RawRenderPass {
    device: Rc<Device>,
    pub(crate) render_pass: vk::RenderPass,
}

impl Destroy for RawRenderPass {
    const KIND: ResourceKind = ResourceKind::RenderPass;

    unsafe fn destroy(&mut self) {
        unsafe { self.device.device.destroy_render_pass(self.render_pass, None) };
    }
}

pub type RenderPass = Handle<RawRenderPass>;

pub struct RawFramebuffer {
    device: Rc<Device>,
    _render_pass: Rc<RenderPass>,
    _view: Rc<ImageView>,
    pub(crate) framebuffer: vk::Framebuffer,
}

impl Destroy for RawFramebuffer {
    const KIND: ResourceKind = ResourceKind::Framebuffer;

    unsafe fn destroy(&mut self) {
        unsafe { self.device.device.destroy_framebuffer(self.framebuffer, None) };
    }
}

pub type Framebuffer = Handle<RawFramebuffer>;

pub fn query_surface_capabilities(
    device: &Device,
    surface: &Surface,
) -> Result<vk::SurfaceCapabilitiesKHR> {
    unsafe {
        device
            .instance()
            .surface_fn
            .get_physical_device_surface_capabilities(device.physical, surface.surface)
    }
    .setup("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")
}

pub fn query_surface_formats(device: &Device, surface: &Surface) -> Result<Vec<vk::SurfaceFormatKHR>> {
    unsafe {
        device
            .instance()
            .surface_fn
            .get_physical_device_surface_formats(device.physical, surface.surface)
    }
    .setup("vkGetPhysicalDeviceSurfaceFormatsKHR")
}

// STRICT ORDER:
// 1) query caps + present modes, decide the plan (fails on undefined or 0x0 extent)
// 2) create the new swapchain with the previous one as old_swapchain
// 3) drop our reference to the previous swapchain
// 4) fetch images, one color view per image in image order
/// Creates (or re-creates, when `previous` is given) the swapchain and its views.
///
/// Views of the previous chain must already be gone or be dropped by the
/// caller; they keep the previous swapchain alive until then.
pub fn create_swapchain_and_views(
    device: &Rc<Device>,
    surface: &Rc<Surface>,
    format: vk::SurfaceFormatKHR,
    previous: Option<Rc<Swapchain>>,
    logger: &Logger,
) -> Result<(Rc<Swapchain>, Vec<Rc<ImageView>>)> {
    let caps = query_surface_capabilities(device, surface)?;
    let modes = unsafe {
        device
            .instance()
            .surface_fn
            .get_physical_device_surface_present_modes(device.physical, surface.surface)
    }
    .setup("vkGetPhysicalDeviceSurfacePresentModesKHR")?;
    let plan = SwapchainPlan::new(&caps, &modes)?;

    let old = previous
        .as_ref()
        .map_or(vk::SwapchainKHR::null(), |p| p.swapchain);
    let info = vk::SwapchainCreateInfoKHR::default()
        .surface(surface.surface)
        .min_image_count(plan.image_count)
        .image_format(format.format)
        .image_color_space(format.color_space)
        .image_extent(plan.extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        .pre_transform(plan.pre_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(plan.present_mode)
        .clipped(true)
        .old_swapchain(old);

    let raw = unsafe { device.swapchain_fn.create_swapchain(&info, None) }
        .setup("vkCreateSwapchainKHR")?;
    drop(previous);

    let images = match unsafe { device.swapchain_fn.get_swapchain_images(raw) } {
        Ok(images) => images,
        Err(code) => {
            unsafe { device.swapchain_fn.destroy_swapchain(raw, None) };
            return Err(RenderError::Setup {
                op: "vkGetSwapchainImagesKHR",
                code,
            });
        }
    };

    logger.info(format_args!(
        "vk: swapchain {}x{} images={} mode={:?} format={:?}",
        plan.extent.width,
        plan.extent.height,
        images.len(),
        plan.present_mode,
        format.format
    ));
    if logger.should_log(Level::DEBUG) {
        logger.debug(format_args!(
            "vk: surface caps min={} max={} transform={:?}",
            caps.min_image_count, caps.max_image_count, plan.pre_transform
        ));
    }

    let swapchain = Rc::new(Handle::wrap(
        RawSwapchain {
            device: device.clone(),
            _surface: surface.clone(),
            swapchain: raw,
            format,
            extent: plan.extent,
            images,
        },
        device.ledger(),
        &[device.id(), surface.id()],
    ));

    let mut views = Vec::with_capacity(swapchain.images.len());
    for &image in &swapchain.images {
        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { device.device.create_image_view(&info, None) }
            .setup("vkCreateImageView")?;
        views.push(Rc::new(Handle::wrap(
            RawImageView {
                device: device.clone(),
                _swapchain: swapchain.clone(),
                view,
            },
            device.ledger(),
            &[device.id(), swapchain.id()],
        )));
    }

    Ok((swapchain, views))
}

/// Single color attachment, cleared and stored, handed to presentation.
pub fn create_render_pass(device: &Rc<Device>, format: vk::Format) -> Result<Rc<RenderPass>> {
    let attachments = [vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)];
    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)];
    // Wait for the acquire semaphore's stage before writing the attachment.
    let dependencies = [vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        )];

    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);
    let render_pass = unsafe { device.device.create_render_pass(&info, None) }
        .setup("vkCreateRenderPass")?;

    Ok(Rc::new(Handle::wrap(
        RawRenderPass {
            device: device.clone(),
            render_pass,
        },
        device.ledger(),
        &[device.id()],
    )))
}

pub fn create_framebuffers(
    device: &Rc<Device>,
    render_pass: &Rc<RenderPass>,
    views: &[Rc<ImageView>],
    extent: vk::Extent2D,
) -> Result<Vec<Framebuffer>> {
    views
        .iter()
        .map(|view| {
            let attachments = [view.view];
            let info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass.render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            let framebuffer = unsafe { device.device.create_framebuffer(&info, None) }
                .setup("vkCreateFramebuffer")?;
            Ok(Handle::wrap(
                RawFramebuffer {
                    device: device.clone(),
                    _render_pass: render_pass.clone(),
                    _view: view.clone(),
                    framebuffer,
                },
                device.ledger(),
                &[device.id(), render_pass.id(), view.id()],
            ))
        })
        .collect()
}

/// Everything that is rebuilt together when the chain is recreated.
/// Fields are in drop order.
pub struct SwapchainBundle {
    pub framebuffers: Vec<Framebuffer>,
    pub views: Vec<Rc<ImageView>>,
    pub swapchain: Rc<Swapchain>,
}

impl SwapchainBundle {
    pub fn build(
        device: &Rc<Device>,
        surface: &Rc<Surface>,
        format: vk::SurfaceFormatKHR,
        render_pass: &Rc<RenderPass>,
        previous: Option<Rc<Swapchain>>,
        logger: &Logger,
    ) -> Result<Self> {
        let (swapchain, views) =
            create_swapchain_and_views(device, surface, format, previous, logger)?;
        let framebuffers = create_framebuffers(device, render_pass, &views, swapchain.extent)?;
        Ok(Self {
            framebuffers,
            views,
            swapchain,
        })
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.images.len()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }
}
