//! Command pool and command buffer ownership.
//!
//! Pools are created per queue family; command buffers allocated from a pool
//! retain it, so a pool is destroyed only after every buffer allocated from
//! it has been freed.

use crate::{Device, HasDevice, utils::AsVkHandle};
use ash::{prelude::VkResult, vk};
use std::sync::Arc;

/// A command pool serving a single queue family.
///
/// Created with the `RESET_COMMAND_BUFFER` flag so individual buffers can be
/// re-recorded.
#[derive(Clone)]
pub struct CommandPool {
    inner: Arc<CommandPoolInner>,
}

struct CommandPoolInner {
    device: Device,
    pool: vk::CommandPool,
    queue_family_index: u32,
}

impl HasDevice for CommandPool {
    fn device(&self) -> &Device {
        &self.inner.device
    }
}
impl AsVkHandle for CommandPool {
    type Handle = vk::CommandPool;

    fn vk_handle(&self) -> Self::Handle {
        self.inner.pool
    }
}

impl CommandPool {
    pub fn new(device: Device, queue_family_index: u32) -> VkResult<Self> {
        let create_info = vk::CommandPoolCreateInfo {
            queue_family_index,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let pool = unsafe { device.create_command_pool(&create_info, None) }?;
        Ok(Self {
            inner: Arc::new(CommandPoolInner {
                device,
                pool,
                queue_family_index,
            }),
        })
    }

    pub fn queue_family_index(&self) -> u32 {
        self.inner.queue_family_index
    }

    /// Allocates one command buffer from this pool.
    pub fn allocate(&self, level: vk::CommandBufferLevel) -> VkResult<CommandBuffer> {
        let allocate_info = vk::CommandBufferAllocateInfo {
            command_pool: self.inner.pool,
            level,
            command_buffer_count: 1,
            ..Default::default()
        };
        let buffer = unsafe { self.inner.device.allocate_command_buffers(&allocate_info) }?[0];
        Ok(CommandBuffer {
            pool: self.inner.clone(),
            buffer,
            level,
        })
    }
}

impl Drop for CommandPoolInner {
    fn drop(&mut self) {
        tracing::info!(pool = ?self.pool, "drop command pool");
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// A command buffer allocated from a [`CommandPool`].
///
/// Freed back to its pool on drop; the pool is kept alive for as long as any
/// of its buffers exist.
pub struct CommandBuffer {
    pool: Arc<CommandPoolInner>,
    buffer: vk::CommandBuffer,
    level: vk::CommandBufferLevel,
}

impl HasDevice for CommandBuffer {
    fn device(&self) -> &Device {
        &self.pool.device
    }
}
impl AsVkHandle for CommandBuffer {
    type Handle = vk::CommandBuffer;

    fn vk_handle(&self) -> Self::Handle {
        self.buffer
    }
}

impl CommandBuffer {
    pub fn level(&self) -> vk::CommandBufferLevel {
        self.level
    }

    pub fn queue_family_index(&self) -> u32 {
        self.pool.queue_family_index
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.pool
                .device
                .free_command_buffers(self.pool.pool, &[self.buffer]);
        }
    }
}
