//! Buffer creation.
//!
//! [`BufferBuilder`] accumulates a buffer description and creates the
//! [`Buffer`] in one call. Buffers are created unbound; pair them with a
//! [`DeviceMemory`](crate::memory::DeviceMemory) allocation through
//! [`BoundBuffer::bind`](crate::memory::BoundBuffer::bind).
//!
//! ```no_run
//! # use scoria::{Device, buffer::BufferBuilder, ash::vk};
//! # let device: Device = todo!();
//! let buffer = BufferBuilder {
//!     size: 65536,
//!     usage: vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
//!     ..Default::default()
//! }
//! .build(&device)
//! .unwrap();
//! let requirements = buffer.memory_requirements();
//! ```

use crate::{
    Device, HasDevice,
    utils::{AsVkHandle, SharingMode},
};
use ash::{prelude::VkResult, vk};
use std::fmt::Debug;

/// Accumulated state for buffer creation.
///
/// Sharing mode is inferred: listing queue family indices makes the buffer
/// concurrent, leaving them empty makes it exclusive.
#[derive(Clone, Debug, Default)]
pub struct BufferBuilder {
    pub flags: vk::BufferCreateFlags,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub queue_family_indices: Vec<u32>,
}

impl BufferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sharing_mode(&self) -> SharingMode<&[u32]> {
        SharingMode::from_queue_family_indices(&self.queue_family_indices)
    }

    pub fn build(&self, device: &Device) -> VkResult<Buffer> {
        Buffer::new(device.clone(), self)
    }
}

/// An unbound Vulkan buffer.
///
/// Records the builder state it was created from for later inspection.
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    flags: vk::BufferCreateFlags,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    queue_family_indices: Vec<u32>,
}

impl HasDevice for Buffer {
    fn device(&self) -> &Device {
        &self.device
    }
}
impl AsVkHandle for Buffer {
    type Handle = vk::Buffer;

    fn vk_handle(&self) -> Self::Handle {
        self.buffer
    }
}
impl Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.buffer)
            .field("size", &self.size)
            .field("usage", &self.usage)
            .finish_non_exhaustive()
    }
}

impl Buffer {
    pub fn builder() -> BufferBuilder {
        BufferBuilder::new()
    }

    pub fn new(device: Device, builder: &BufferBuilder) -> VkResult<Self> {
        let sharing = builder.sharing_mode();
        let create_info = vk::BufferCreateInfo {
            flags: builder.flags,
            size: builder.size,
            usage: builder.usage,
            sharing_mode: sharing.as_raw(),
            queue_family_index_count: sharing.queue_family_indices().len() as u32,
            p_queue_family_indices: sharing.queue_family_indices().as_ptr(),
            ..Default::default()
        };
        let buffer = unsafe { device.create_buffer(&create_info, None) }?;
        Ok(Self {
            device,
            buffer,
            flags: builder.flags,
            size: builder.size,
            usage: builder.usage,
            queue_family_indices: builder.queue_family_indices.clone(),
        })
    }

    pub fn flags(&self) -> vk::BufferCreateFlags {
        self.flags
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    pub fn queue_family_indices(&self) -> &[u32] {
        &self.queue_family_indices
    }

    pub fn sharing_mode(&self) -> SharingMode<&[u32]> {
        SharingMode::from_queue_family_indices(&self.queue_family_indices)
    }

    /// Queries the memory requirements for binding this buffer.
    pub fn memory_requirements(&self) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(self.buffer) }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.destroy_buffer(self.buffer, None) }
    }
}
