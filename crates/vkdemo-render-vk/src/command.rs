// SPDX-License-Identifier: CEPL-1.0
use std::rc::Rc;

use ash::vk;

use crate::device::Device;
use crate::error::{Result, VkResultExt};
use crate::resource::{Destroy, Handle, ResourceKind};

pub struct RawCommandPool {
    device: Rc<Device>,
    pub(crate) pool: vk::CommandPool,
}

impl Destroy for RawCommandPool {
    const KIND: ResourceKind = ResourceKind::CommandPool;

    unsafe fn destroy(&mut self) {
        unsafe { self.device.device.destroy_command_pool(self.pool, None) };
    }
}

pub type CommandPool = Handle<RawCommandPool>;

/// Pool for `queue_family` whose buffers can be re-recorded individually.
pub fn create_command_pool(device: &Rc<Device>, queue_family: u32) -> Result<Rc<CommandPool>> {
    let info = vk::CommandPoolCreateInfo::default()
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        .queue_family_index(queue_family);
    let pool = unsafe { device.device.create_command_pool(&info, None) }
        .setup("vkCreateCommandPool")?;
    Ok(Rc::new(Handle::wrap(
        RawCommandPool {
            device: device.clone(),
            pool,
        },
        device.ledger(),
        &[device.id()],
    )))
}

/// Primary command buffers allocated together and freed together.
pub struct RawCommandBuffers {
    pool: Rc<CommandPool>,
    buffers: Vec<vk::CommandBuffer>,
}

impl RawCommandBuffers {
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<vk::CommandBuffer> {
        self.buffers.get(index).copied()
    }
}

impl Destroy for RawCommandBuffers {
    const KIND: ResourceKind = ResourceKind::CommandBuffers;

    unsafe fn destroy(&mut self) {
        if self.buffers.is_empty() {
            return;
        }
        unsafe {
            self.pool
                .device
                .device
                .free_command_buffers(self.pool.pool, &self.buffers)
        };
    }
}

pub type CommandBuffers = Handle<RawCommandBuffers>;

pub fn allocate_command_buffers(pool: &Rc<CommandPool>, count: u32) -> Result<CommandBuffers> {
    let buffers = if count == 0 {
        Vec::new()
    } else {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        unsafe { pool.device.device.allocate_command_buffers(&info) }
            .setup("vkAllocateCommandBuffers")?
    };
    Ok(Handle::wrap(
        RawCommandBuffers {
            pool: pool.clone(),
            buffers,
        },
        pool.ledger(),
        &[pool.device.id(), pool.id()],
    ))
}
