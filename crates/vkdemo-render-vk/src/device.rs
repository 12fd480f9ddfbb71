// SPDX-License-Identifier: CEPL-1.0
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::{c_char, CStr};
use std::rc::Rc;

use ash::{khr::swapchain, vk};
use vkdemo_core::Logger;

use crate::error::{RenderError, Result, VkResultExt};
use crate::instance::{Instance, PhysicalDevice};
use crate::resource::{Destroy, Handle, ResourceKind};

pub struct RawDevice {
    instance: Rc<Instance>,
    /// Selection-time handle; valid because `instance` is kept alive.
    pub(crate) physical: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    pub(crate) swapchain_fn: swapchain::Device,
}

impl RawDevice {
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &Rc<Instance> {
        &self.instance
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.gpu("vkDeviceWaitIdle")
    }
}

impl Destroy for RawDevice {
    const KIND: ResourceKind = ResourceKind::Device;

    unsafe fn destroy(&mut self) {
        unsafe { self.device.destroy_device(None) };
    }
}

pub type Device = Handle<RawDevice>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueRequest {
    pub family: u32,
    pub count: u32,
}

/// Queues per family, in request order.
pub type QueueMap = BTreeMap<u32, Vec<vk::Queue>>;

pub fn validate_queue_plan(plan: &[QueueRequest]) -> Result<()> {
    if plan.is_empty() {
        return Err(RenderError::QueuePlan("no queues requested".to_owned()));
    }
    let mut seen = BTreeSet::new();
    for r in plan {
        if r.count == 0 {
            return Err(RenderError::QueuePlan(format!(
                "family {} requests zero queues",
                r.family
            )));
        }
        if !seen.insert(r.family) {
            return Err(RenderError::QueuePlan(format!(
                "family {} requested twice",
                r.family
            )));
        }
    }
    Ok(())
}

/// One shared priority array, long enough for the largest request.
pub fn queue_priorities(plan: &[QueueRequest]) -> Vec<f32> {
    let len = plan.iter().map(|r| r.count).max().unwrap_or(0);
    vec![1.0; len as usize]
}

pub fn collect_queues(
    plan: &[QueueRequest],
    mut get: impl FnMut(u32, u32) -> vk::Queue,
) -> QueueMap {
    plan.iter()
        .map(|r| (r.family, (0..r.count).map(|i| get(r.family, i)).collect()))
        .collect()
}

/// Opens `physical` with the given queues and device extensions.
pub fn create_device_and_queues(
    instance: &Rc<Instance>,
    physical: PhysicalDevice<'_>,
    plan: &[QueueRequest],
    extensions: &[&CStr],
    logger: &Logger,
) -> Result<(Rc<Device>, QueueMap)> {
    validate_queue_plan(plan)?;

    let priorities = queue_priorities(plan);
    let queue_infos: Vec<vk::DeviceQueueCreateInfo<'_>> = plan
        .iter()
        .map(|r| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(r.family)
                .queue_priorities(&priorities[..r.count as usize])
        })
        .collect();
    let ext_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();

    let info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&ext_ptrs);

    let device = unsafe { instance.instance.create_device(physical.raw(), &info, None) }
        .setup("vkCreateDevice")?;
    let queues = collect_queues(plan, |family, index| unsafe {
        device.get_device_queue(family, index)
    });
    let swapchain_fn = swapchain::Device::new(&instance.instance, &device);
    logger.info(format_args!(
        "vk: device created with {} queue famil{} and extensions {extensions:?}",
        plan.len(),
        if plan.len() == 1 { "y" } else { "ies" }
    ));

    let handle = Handle::wrap(
        RawDevice {
            instance: instance.clone(),
            physical: physical.raw(),
            device,
            swapchain_fn,
        },
        instance.ledger(),
        &[instance.id()],
    );
    Ok((Rc::new(handle), queues))
}

pub struct RawSemaphore {
    device: Rc<Device>,
    pub(crate) semaphore: vk::Semaphore,
}

impl Destroy for RawSemaphore {
    const KIND: ResourceKind = ResourceKind::Semaphore;

    unsafe fn destroy(&mut self) {
        unsafe { self.device.device.destroy_semaphore(self.semaphore, None) };
    }
}

pub type Semaphore = Handle<RawSemaphore>;

pub fn create_semaphore(device: &Rc<Device>) -> Result<Semaphore> {
    let semaphore =
        unsafe { device.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
            .setup("vkCreateSemaphore")?;
    Ok(Handle::wrap(
        RawSemaphore {
            device: device.clone(),
            semaphore,
        },
        device.ledger(),
        &[device.id()],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle as _;

    fn req(family: u32, count: u32) -> QueueRequest {
        QueueRequest { family, count }
    }

    #[test]
    fn priorities_sized_to_largest_request() {
        let p = queue_priorities(&[req(0, 1), req(2, 3)]);
        assert_eq!(p, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn rejects_bad_plans() {
        assert!(matches!(
            validate_queue_plan(&[]),
            Err(RenderError::QueuePlan(_))
        ));
        assert!(validate_queue_plan(&[req(0, 0)]).is_err());
        assert!(validate_queue_plan(&[req(1, 1), req(1, 2)]).is_err());
        assert!(validate_queue_plan(&[req(0, 1), req(1, 2)]).is_ok());
    }

    #[test]
    fn resolves_every_requested_queue_in_order() {
        let plan = [req(3, 2), req(0, 1)];
        let mut calls = Vec::new();
        let map = collect_queues(&plan, |family, index| {
            calls.push((family, index));
            vk::Queue::from_raw(u64::from(family * 10 + index + 1))
        });

        assert_eq!(map.len(), 2);
        assert_eq!(
            map[&3],
            vec![vk::Queue::from_raw(31), vk::Queue::from_raw(32)]
        );
        assert_eq!(map[&0], vec![vk::Queue::from_raw(1)]);
        assert_eq!(calls, vec![(3, 0), (3, 1), (0, 0)]);
    }
}
