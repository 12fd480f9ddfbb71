// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface and debug messenger ownership, plus the name filtering
//! used to negotiate optional layers and extensions.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::ffi::{c_char, c_void, CStr, CString};
use std::rc::Rc;

use ash::{ext::debug_utils, khr::surface, vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use vkdemo_core::{Level, Logger};

use crate::error::{Result, VkResultExt};
use crate::resource::{Destroy, Handle, ResourceKind, ResourceLedger};

pub const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

pub struct RawInstance {
    pub(crate) entry: Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) surface_fn: surface::Instance,
    enabled_extensions: Vec<String>,
}

impl RawInstance {
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn is_extension_enabled(&self, name: &CStr) -> bool {
        let name = name.to_string_lossy();
        self.enabled_extensions.iter().any(|e| *e == name)
    }
}

impl Destroy for RawInstance {
    const KIND: ResourceKind = ResourceKind::Instance;

    unsafe fn destroy(&mut self) {
        unsafe { self.instance.destroy_instance(None) };
    }
}

pub type Instance = Handle<RawInstance>;

pub struct RawSurface {
    instance: Rc<Instance>,
    pub(crate) surface: vk::SurfaceKHR,
}

impl RawSurface {
    pub fn instance(&self) -> &Rc<Instance> {
        &self.instance
    }
}

impl Destroy for RawSurface {
    const KIND: ResourceKind = ResourceKind::Surface;

    unsafe fn destroy(&mut self) {
        unsafe { self.instance.surface_fn.destroy_surface(self.surface, None) };
    }
}

pub type Surface = Handle<RawSurface>;

/// Data reachable from the driver callback through its user-data pointer.
/// The messenger owns it, so it outlives every callback.
struct DebugContext {
    logger: Logger,
}

pub struct RawDebugMessenger {
    _instance: Rc<Instance>,
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
    _context: Rc<DebugContext>,
}

impl Destroy for RawDebugMessenger {
    const KIND: ResourceKind = ResourceKind::DebugMessenger;

    unsafe fn destroy(&mut self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None)
        };
    }
}

pub type DebugMessenger = Handle<RawDebugMessenger>;

/// `desired ∩ available`, sorted, without duplicates.
pub fn filter_available<D, A>(desired: D, available: A) -> Vec<String>
where
    D: IntoIterator,
    D::Item: AsRef<str>,
    A: IntoIterator,
    A::Item: AsRef<str>,
{
    let available: BTreeSet<String> = available
        .into_iter()
        .map(|s| s.as_ref().to_owned())
        .collect();
    desired
        .into_iter()
        .map(|s| s.as_ref().to_owned())
        .filter(|s| available.contains(s))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn log_filtered(logger: &Logger, what: &str, desired: &[&str], kept: &[String]) {
    if !logger.should_log(Level::DEBUG) {
        return;
    }
    for name in desired.iter().filter(|d| !kept.iter().any(|k| k.as_str() == **d)) {
        logger.debug(format_args!("vk: {what} {name} unavailable, skipping"));
    }
    logger.debug(format_args!("vk: {what}s requested {desired:?}, enabled {kept:?}"));
}

pub fn filter_available_layers(
    entry: &Entry,
    desired: &[&str],
    logger: &Logger,
) -> Result<Vec<String>> {
    let props = unsafe { entry.enumerate_instance_layer_properties() }
        .setup("vkEnumerateInstanceLayerProperties")?;
    let available = props.iter().filter_map(|p| {
        p.layer_name_as_c_str()
            .ok()
            .map(|c| c.to_string_lossy().into_owned())
    });
    let kept = filter_available(desired.iter().copied(), available);
    log_filtered(logger, "layer", desired, &kept);
    Ok(kept)
}

pub fn filter_available_instance_extensions(
    entry: &Entry,
    desired: &[&str],
    logger: &Logger,
) -> Result<Vec<String>> {
    let props = unsafe { entry.enumerate_instance_extension_properties(None) }
        .setup("vkEnumerateInstanceExtensionProperties")?;
    let available = props.iter().filter_map(|p| {
        p.extension_name_as_c_str()
            .ok()
            .map(|c| c.to_string_lossy().into_owned())
    });
    let kept = filter_available(desired.iter().copied(), available);
    log_filtered(logger, "instance extension", desired, &kept);
    Ok(kept)
}

fn to_cstrings(names: &[String]) -> Vec<CString> {
    names
        .iter()
        .filter_map(|n| CString::new(n.as_str()).ok())
        .collect()
}

/// Creates the instance with the window-system extensions `display` needs plus
/// the already-filtered optional `layers` and `extensions`.
pub fn create_instance(
    entry: Entry,
    app_name: &str,
    display: RawDisplayHandle,
    layers: &[String],
    extensions: &[String],
    ledger: &ResourceLedger,
    logger: &Logger,
) -> Result<Rc<Instance>> {
    let app_name = CString::new(app_name.replace('\0', "")).unwrap_or_default();
    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .engine_name(&app_name)
        .api_version(vk::API_VERSION_1_0);

    let required = ash_window::enumerate_required_extensions(display)
        .setup("vkEnumerateRequiredExtensions")?;
    let mut ext_names: Vec<String> = required
        .iter()
        // SAFETY: ash_window hands out pointers to static NUL-terminated names.
        .map(|&p| unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned())
        .collect();
    for e in extensions {
        if !ext_names.contains(e) {
            ext_names.push(e.clone());
        }
    }

    let layer_c = to_cstrings(layers);
    let ext_c = to_cstrings(&ext_names);
    let layer_ptrs: Vec<*const c_char> = layer_c.iter().map(|c| c.as_ptr()).collect();
    let ext_ptrs: Vec<*const c_char> = ext_c.iter().map(|c| c.as_ptr()).collect();

    let info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_layer_names(&layer_ptrs)
        .enabled_extension_names(&ext_ptrs);

    let instance = unsafe { entry.create_instance(&info, None) }.setup("vkCreateInstance")?;
    let surface_fn = surface::Instance::new(&entry, &instance);
    logger.info(format_args!(
        "vk: instance created (layers {layers:?}, extensions {ext_names:?})"
    ));

    Ok(Rc::new(Handle::wrap(
        RawInstance {
            entry,
            instance,
            surface_fn,
            enabled_extensions: ext_names,
        },
        ledger,
        &[],
    )))
}

pub fn create_surface(
    instance: &Rc<Instance>,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> Result<Rc<Surface>> {
    let surface = unsafe {
        ash_window::create_surface(&instance.entry, &instance.instance, display, window, None)
    }
    .setup("vkCreateSurfaceKHR")?;
    Ok(Rc::new(Handle::wrap(
        RawSurface {
            instance: instance.clone(),
            surface,
        },
        instance.ledger(),
        &[instance.id()],
    )))
}

/// Registers the driver diagnostics callback. Returns `None` when the
/// debug-utils extension was not enabled on `instance`.
pub fn create_debug_messenger(
    instance: &Rc<Instance>,
    logger: &Logger,
) -> Result<Option<DebugMessenger>> {
    if !instance.is_extension_enabled(debug_utils::NAME) {
        logger.debug("vk: debug utils not enabled, no debug messenger");
        return Ok(None);
    }

    let loader = debug_utils::Instance::new(&instance.entry, &instance.instance);
    let context = Rc::new(DebugContext {
        logger: logger.clone(),
    });
    let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .user_data(Rc::as_ptr(&context) as *mut c_void);

    let messenger = unsafe { loader.create_debug_utils_messenger(&info, None) }
        .setup("vkCreateDebugUtilsMessengerEXT")?;
    Ok(Some(Handle::wrap(
        RawDebugMessenger {
            _instance: instance.clone(),
            loader,
            messenger,
            _context: context,
        },
        instance.ledger(),
        &[instance.id()],
    )))
}

pub(crate) fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Level {
    use vk::DebugUtilsMessageSeverityFlagsEXT as S;
    if severity.contains(S::ERROR) {
        Level::ERROR
    } else if severity.contains(S::WARNING) {
        Level::WARN
    } else if severity.contains(S::INFO) {
        Level::INFO
    } else {
        Level::DEBUG
    }
}

pub(crate) fn type_names(types: vk::DebugUtilsMessageTypeFlagsEXT) -> String {
    use vk::DebugUtilsMessageTypeFlagsEXT as T;
    let names: Vec<&str> = [
        (T::GENERAL, "GENERAL"),
        (T::VALIDATION, "VALIDATION"),
        (T::PERFORMANCE, "PERFORMANCE"),
        (T::DEVICE_ADDRESS_BINDING, "DEVICE_ADDRESS_BINDING"),
    ]
    .into_iter()
    .filter(|(flag, _)| types.contains(*flag))
    .map(|(_, name)| name)
    .collect();
    names.join("|")
}

/// # Safety
/// `p` is null or points to a NUL-terminated string.
unsafe fn lossy<'a>(p: *const c_char) -> Cow<'a, str> {
    if p.is_null() {
        Cow::Borrowed("")
    } else {
        unsafe { CStr::from_ptr(p) }.to_string_lossy()
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || user.is_null() {
        return vk::FALSE;
    }
    // SAFETY: `user` is the `DebugContext` owned by the messenger wrapper,
    // which is alive for as long as the messenger is registered.
    let ctx = unsafe { &*(user as *const DebugContext) };
    let level = severity_level(severity);
    if !ctx.logger.should_log(level) {
        return vk::FALSE;
    }

    // SAFETY: the driver passes valid callback data for the call's duration.
    let data = unsafe { &*data };
    let message_id = unsafe { lossy(data.p_message_id_name) };
    let message = unsafe { lossy(data.p_message) };
    let objects: Vec<String> = if data.p_objects.is_null() {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(data.p_objects, data.object_count as usize) }
            .iter()
            .map(|o| {
                let name = unsafe { lossy(o.p_object_name) };
                if name.is_empty() {
                    format!("{:?}:{:#x}", o.object_type, o.object_handle)
                } else {
                    name.into_owned()
                }
            })
            .collect()
    };

    let line = format!(
        "Vulkan [{}] [{}] Objects[{}]: {}",
        type_names(types),
        message_id,
        objects.join(", "),
        message
    );
    match level {
        Level::ERROR => ctx.logger.error(line),
        Level::WARN => ctx.logger.warn(line),
        Level::INFO => ctx.logger.info(line),
        _ => ctx.logger.debug(line),
    }
    vk::FALSE
}

/// A device found by enumeration. Only valid while the instance it came from
/// is alive, which the borrow enforces.
#[derive(Clone, Copy)]
pub struct PhysicalDevice<'i> {
    raw: vk::PhysicalDevice,
    instance: &'i RawInstance,
}

impl<'i> PhysicalDevice<'i> {
    pub fn raw(&self) -> vk::PhysicalDevice {
        self.raw
    }

    pub fn instance(&self) -> &'i RawInstance {
        self.instance
    }

    pub fn properties(&self) -> vk::PhysicalDeviceProperties {
        unsafe {
            self.instance
                .instance
                .get_physical_device_properties(self.raw)
        }
    }

    pub fn name(&self) -> String {
        let props = self.properties();
        props
            .device_name_as_c_str()
            .map(|c| c.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed>".to_owned())
    }

    pub fn queue_families(&self) -> Vec<vk::QueueFamilyProperties> {
        unsafe {
            self.instance
                .instance
                .get_physical_device_queue_family_properties(self.raw)
        }
    }

    pub fn extension_names(&self) -> Result<BTreeSet<String>> {
        let props = unsafe {
            self.instance
                .instance
                .enumerate_device_extension_properties(self.raw)
        }
        .setup("vkEnumerateDeviceExtensionProperties")?;
        Ok(props
            .iter()
            .filter_map(|p| {
                p.extension_name_as_c_str()
                    .ok()
                    .map(|c| c.to_string_lossy().into_owned())
            })
            .collect())
    }

    pub fn memory_types(&self) -> Vec<vk::MemoryPropertyFlags> {
        let mem = unsafe {
            self.instance
                .instance
                .get_physical_device_memory_properties(self.raw)
        };
        mem.memory_types[..mem.memory_type_count as usize]
            .iter()
            .map(|t| t.property_flags)
            .collect()
    }

    pub fn supports_present(&self, family: u32, surface: &RawSurface) -> Result<bool> {
        unsafe {
            self.instance.surface_fn.get_physical_device_surface_support(
                self.raw,
                family,
                surface.surface,
            )
        }
        .setup("vkGetPhysicalDeviceSurfaceSupportKHR")
    }
}

pub fn enumerate_physical_devices<'i>(
    instance: &'i Instance,
    logger: &Logger,
) -> Result<Vec<PhysicalDevice<'i>>> {
    let raw: &'i RawInstance = instance;
    let devices: Vec<PhysicalDevice<'i>> = unsafe { raw.instance.enumerate_physical_devices() }
        .setup("vkEnumeratePhysicalDevices")?
        .into_iter()
        .map(|pd| PhysicalDevice {
            raw: pd,
            instance: raw,
        })
        .collect();

    if logger.should_log(Level::DEBUG) {
        for (i, pd) in devices.iter().enumerate() {
            let props = pd.properties();
            logger.debug(format_args!(
                "vk: device[{i}] {} ({:?}, api {}.{}.{})",
                pd.name(),
                props.device_type,
                vk::api_version_major(props.api_version),
                vk::api_version_minor(props.api_version),
                vk::api_version_patch(props.api_version),
            ));
        }
    }
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_is_set_intersection() {
        let kept = filter_available(
            ["b", "a", "missing", "a"],
            ["a", "b", "c", "b"],
        );
        assert_eq!(kept, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn filter_membership_ignores_order() {
        let one = filter_available(["x", "y", "z"], ["z", "y"]);
        let two = filter_available(["z", "y", "x"], ["y", "z"]);
        assert_eq!(one, two);
    }

    #[test]
    fn filter_with_empty_side_is_empty() {
        assert!(filter_available(Vec::<String>::new(), ["a"]).is_empty());
        assert!(filter_available(["a"], Vec::<&str>::new()).is_empty());
    }

    #[test]
    fn severities_map_to_levels() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        assert_eq!(severity_level(S::ERROR), Level::ERROR);
        assert_eq!(severity_level(S::WARNING), Level::WARN);
        assert_eq!(severity_level(S::INFO), Level::INFO);
        assert_eq!(severity_level(S::VERBOSE), Level::DEBUG);
    }

    #[test]
    fn message_types_join_with_bar() {
        use vk::DebugUtilsMessageTypeFlagsEXT as T;
        assert_eq!(type_names(T::VALIDATION | T::PERFORMANCE), "VALIDATION|PERFORMANCE");
        assert_eq!(type_names(T::empty()), "");
    }
}
