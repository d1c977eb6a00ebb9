//! Explicit device memory allocation and resource binding.
//!
//! This module wraps `vkAllocateMemory` directly: callers pick a memory type
//! (see [`PhysicalDevice::memory_type_index`](crate::physical_device::PhysicalDevice::memory_type_index))
//! and an allocation size, optionally layering allocate-flags and
//! dedicated-allocation records on the allocation. Structures the device
//! cannot honor — by API version or missing extension — are dropped or
//! masked before the call rather than handed to the driver.
//!
//! [`DeviceMemory`] is reference-counted so several resources can bind into
//! one allocation at different offsets via [`BoundBuffer`] and
//! [`BoundImage`].

use crate::{Device, HasDevice, buffer::Buffer, image::Image, utils::AsVkHandle, utils::Version};
use ash::{prelude::VkResult, vk};
use std::{
    ffi::{CStr, c_void},
    fmt::Debug,
    ptr::null,
    sync::Arc,
};

/// Accumulated state for a device memory allocation.
#[derive(Clone, Debug, Default)]
pub struct DeviceMemoryBuilder {
    pub allocation_size: vk::DeviceSize,
    pub memory_type_index: u32,
    /// Optional allocate-flags record (device address, device mask).
    pub flags_info: Option<vk::MemoryAllocateFlagsInfo<'static>>,
    /// Optional dedicated-allocation record tying the memory to one
    /// buffer or image.
    pub dedicated_info: Option<vk::MemoryDedicatedAllocateInfo<'static>>,
}

impl DeviceMemoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(&self, device: &Device) -> VkResult<DeviceMemory> {
        DeviceMemory::new(device.clone(), self)
    }
}

/// Drops or masks the optional allocate-info records the device cannot
/// honor.
///
/// The dedicated-allocation record requires Vulkan 1.1 or
/// `VK_KHR_dedicated_allocation`; the allocate-flags record requires Vulkan
/// 1.1 or `VK_KHR_device_group`. The DEVICE_ADDRESS flag additionally needs
/// a buffer-device-address extension below Vulkan 1.3. Kept records come
/// back with their links zeroed.
fn sanitize_allocate_chain(
    api_version: Version,
    supports_extension: impl Fn(&CStr) -> bool,
    flags_info: Option<vk::MemoryAllocateFlagsInfo<'static>>,
    dedicated_info: Option<vk::MemoryDedicatedAllocateInfo<'static>>,
) -> (
    Option<vk::MemoryAllocateFlagsInfo<'static>>,
    Option<vk::MemoryDedicatedAllocateInfo<'static>>,
) {
    let dedicated_allowed = api_version >= Version::V1_1
        || supports_extension(ash::khr::dedicated_allocation::NAME);
    let flags_allowed =
        api_version >= Version::V1_1 || supports_extension(ash::khr::device_group::NAME);

    let dedicated_info = dedicated_info.filter(|_| dedicated_allowed).map(|mut info| {
        info.p_next = null();
        info
    });
    let flags_info = flags_info.filter(|_| flags_allowed).map(|mut info| {
        info.p_next = null();
        let device_address_supported = supports_extension(ash::ext::buffer_device_address::NAME)
            || supports_extension(ash::khr::buffer_device_address::NAME)
            || api_version >= Version::V1_3;
        if !device_address_supported && info.flags.contains(vk::MemoryAllocateFlags::DEVICE_ADDRESS)
        {
            tracing::warn!(
                "DEVICE_ADDRESS allocate flag masked out: buffer device address is not available on this device"
            );
            info.flags &= !vk::MemoryAllocateFlags::DEVICE_ADDRESS;
        }
        info
    });
    (flags_info, dedicated_info)
}

/// An owned device memory allocation.
///
/// Reference-counted; clones share the same allocation. Freed when the last
/// reference drops.
#[derive(Clone)]
pub struct DeviceMemory(Arc<DeviceMemoryInner>);

struct DeviceMemoryInner {
    device: Device,
    memory: vk::DeviceMemory,
    allocation_size: vk::DeviceSize,
    memory_type_index: u32,
    /// Sanitized records the allocation was actually made with, links
    /// zeroed.
    flags_info: Option<vk::MemoryAllocateFlagsInfo<'static>>,
    dedicated_info: Option<vk::MemoryDedicatedAllocateInfo<'static>>,
}
unsafe impl Send for DeviceMemoryInner {}
unsafe impl Sync for DeviceMemoryInner {}

impl HasDevice for DeviceMemory {
    fn device(&self) -> &Device {
        &self.0.device
    }
}
impl AsVkHandle for DeviceMemory {
    type Handle = vk::DeviceMemory;

    fn vk_handle(&self) -> Self::Handle {
        self.0.memory
    }
}
impl Debug for DeviceMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceMemory")
            .field("handle", &self.0.memory)
            .field("allocation_size", &self.0.allocation_size)
            .field("memory_type_index", &self.0.memory_type_index)
            .finish_non_exhaustive()
    }
}

impl DeviceMemory {
    pub fn builder() -> DeviceMemoryBuilder {
        DeviceMemoryBuilder::new()
    }

    pub fn new(device: Device, builder: &DeviceMemoryBuilder) -> VkResult<Self> {
        let (flags_info, dedicated_info) = sanitize_allocate_chain(
            device.physical_device().api_version(),
            |name| device.supports_extension(name),
            builder.flags_info,
            builder.dedicated_info,
        );

        // Chain assembled on locals for the duration of the call:
        // allocate info -> flags info -> dedicated info.
        let mut flags_local = flags_info;
        let mut dedicated_local = dedicated_info;
        let mut head: *const c_void = null();
        if let Some(info) = dedicated_local.as_mut() {
            info.p_next = head;
            head = info as *const _ as *const c_void;
        }
        if let Some(info) = flags_local.as_mut() {
            info.p_next = head;
            head = info as *const _ as *const c_void;
        }
        let allocate_info = vk::MemoryAllocateInfo {
            allocation_size: builder.allocation_size,
            memory_type_index: builder.memory_type_index,
            p_next: head,
            ..Default::default()
        };
        let memory = unsafe { device.allocate_memory(&allocate_info, None) }?;

        Ok(Self(Arc::new(DeviceMemoryInner {
            device,
            memory,
            allocation_size: builder.allocation_size,
            memory_type_index: builder.memory_type_index,
            flags_info,
            dedicated_info,
        })))
    }

    pub fn allocation_size(&self) -> vk::DeviceSize {
        self.0.allocation_size
    }

    pub fn memory_type_index(&self) -> u32 {
        self.0.memory_type_index
    }

    /// Returns the allocate-flags record the allocation was made with, if
    /// any survived sanitizing.
    pub fn flags_info(&self) -> Option<&vk::MemoryAllocateFlagsInfo<'static>> {
        self.0.flags_info.as_ref()
    }

    /// Returns the dedicated-allocation record the allocation was made
    /// with, if any survived sanitizing.
    pub fn dedicated_info(&self) -> Option<&vk::MemoryDedicatedAllocateInfo<'static>> {
        self.0.dedicated_info.as_ref()
    }

    /// Maps the whole allocation and returns the host pointer.
    ///
    /// The memory type must be host-visible. The pointer stays valid until
    /// [`unmap`](Self::unmap); a `vkDeviceMemory` supports one mapping at a
    /// time.
    pub fn map(&self) -> VkResult<*mut c_void> {
        self.map_range(0, self.0.allocation_size)
    }

    /// Maps `size` bytes starting at `offset` and returns the host pointer.
    pub fn map_range(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> VkResult<*mut c_void> {
        unsafe {
            self.0.device.map_memory(
                self.0.memory,
                offset,
                size,
                vk::MemoryMapFlags::empty(),
            )
        }
    }

    pub fn unmap(&self) {
        unsafe { self.0.device.unmap_memory(self.0.memory) }
    }
}

impl Drop for DeviceMemoryInner {
    fn drop(&mut self) {
        tracing::info!(memory = ?self.memory, "free device memory");
        unsafe { self.device.free_memory(self.memory, None) }
    }
}

/// A buffer bound to a memory allocation.
///
/// Binding consumes the buffer (a Vulkan buffer binds once) and retains a
/// reference to the shared memory. The buffer device address is captured at
/// bind time when the memory was allocated with the DEVICE_ADDRESS flag.
pub struct BoundBuffer {
    buffer: Buffer,
    memory: DeviceMemory,
    offset: vk::DeviceSize,
    device_address: Option<vk::DeviceAddress>,
}

impl HasDevice for BoundBuffer {
    fn device(&self) -> &Device {
        self.buffer.device()
    }
}
impl AsVkHandle for BoundBuffer {
    type Handle = vk::Buffer;

    fn vk_handle(&self) -> Self::Handle {
        self.buffer.vk_handle()
    }
}

impl BoundBuffer {
    pub fn bind(
        buffer: Buffer,
        memory: DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<Self> {
        let device = buffer.device().clone();
        unsafe {
            device.bind_buffer_memory(buffer.vk_handle(), memory.vk_handle(), offset)?;
        }
        let device_address = memory
            .flags_info()
            .filter(|info| info.flags.contains(vk::MemoryAllocateFlags::DEVICE_ADDRESS))
            .map(|_| unsafe {
                device.get_buffer_device_address(
                    &vk::BufferDeviceAddressInfo::default().buffer(buffer.vk_handle()),
                )
            });
        Ok(Self {
            buffer,
            memory,
            offset,
            device_address,
        })
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn memory(&self) -> &DeviceMemory {
        &self.memory
    }

    pub fn offset(&self) -> vk::DeviceSize {
        self.offset
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.buffer.size()
    }

    /// Returns the buffer device address, if the backing memory was
    /// allocated with the DEVICE_ADDRESS flag.
    pub fn device_address(&self) -> Option<vk::DeviceAddress> {
        self.device_address
    }

    /// Maps the buffer's range of the backing memory.
    pub fn map(&self) -> VkResult<*mut c_void> {
        self.memory.map_range(self.offset, self.buffer.size())
    }

    /// Maps `size` bytes starting at `offset` within the buffer's range.
    pub fn map_range(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> VkResult<*mut c_void> {
        self.memory.map_range(self.offset + offset, size)
    }

    pub fn unmap(&self) {
        self.memory.unmap()
    }
}

/// An image bound to a memory allocation.
pub struct BoundImage {
    image: Image,
    memory: DeviceMemory,
    offset: vk::DeviceSize,
}

impl HasDevice for BoundImage {
    fn device(&self) -> &Device {
        self.image.device()
    }
}
impl AsVkHandle for BoundImage {
    type Handle = vk::Image;

    fn vk_handle(&self) -> Self::Handle {
        self.image.vk_handle()
    }
}

impl BoundImage {
    pub fn bind(image: Image, memory: DeviceMemory, offset: vk::DeviceSize) -> VkResult<Self> {
        let device = image.device().clone();
        unsafe {
            device.bind_image_memory(image.vk_handle(), memory.vk_handle(), offset)?;
        }
        Ok(Self {
            image,
            memory,
            offset,
        })
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn memory(&self) -> &DeviceMemory {
        &self.memory
    }

    pub fn offset(&self) -> vk::DeviceSize {
        self.offset
    }

    /// Maps `size` bytes starting at `offset` within the image's range.
    pub fn map_range(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> VkResult<*mut c_void> {
        self.memory.map_range(self.offset + offset, size)
    }

    pub fn unmap(&self) {
        self.memory.unmap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags_info(flags: vk::MemoryAllocateFlags) -> vk::MemoryAllocateFlagsInfo<'static> {
        vk::MemoryAllocateFlagsInfo {
            flags,
            device_mask: 0,
            ..Default::default()
        }
    }

    #[test]
    fn chain_records_dropped_below_1_1_without_extensions() {
        let (flags, dedicated) = sanitize_allocate_chain(
            Version::V1_0,
            |_| false,
            Some(flags_info(vk::MemoryAllocateFlags::DEVICE_ADDRESS)),
            Some(vk::MemoryDedicatedAllocateInfo::default()),
        );
        assert!(flags.is_none());
        assert!(dedicated.is_none());
    }

    #[test]
    fn chain_records_kept_via_extensions_on_1_0() {
        let (flags, dedicated) = sanitize_allocate_chain(
            Version::V1_0,
            |name| {
                name == ash::khr::dedicated_allocation::NAME
                    || name == ash::khr::device_group::NAME
            },
            Some(flags_info(vk::MemoryAllocateFlags::DEVICE_MASK)),
            Some(vk::MemoryDedicatedAllocateInfo::default()),
        );
        assert!(flags.is_some());
        assert!(dedicated.is_some());
    }

    #[test]
    fn device_address_flag_masked_without_support() {
        let (flags, _) = sanitize_allocate_chain(
            Version::V1_2,
            |_| false,
            Some(flags_info(
                vk::MemoryAllocateFlags::DEVICE_ADDRESS | vk::MemoryAllocateFlags::DEVICE_MASK,
            )),
            None,
        );
        let flags = flags.unwrap();
        assert!(!flags.flags.contains(vk::MemoryAllocateFlags::DEVICE_ADDRESS));
        assert!(flags.flags.contains(vk::MemoryAllocateFlags::DEVICE_MASK));
    }

    #[test]
    fn device_address_flag_kept_on_1_3() {
        let (flags, _) = sanitize_allocate_chain(
            Version::V1_3,
            |_| false,
            Some(flags_info(vk::MemoryAllocateFlags::DEVICE_ADDRESS)),
            None,
        );
        assert!(flags
            .unwrap()
            .flags
            .contains(vk::MemoryAllocateFlags::DEVICE_ADDRESS));
    }

    #[test]
    fn device_address_flag_kept_with_extension() {
        let (flags, _) = sanitize_allocate_chain(
            Version::V1_1,
            |name| name == ash::khr::buffer_device_address::NAME,
            Some(flags_info(vk::MemoryAllocateFlags::DEVICE_ADDRESS)),
            None,
        );
        assert!(flags
            .unwrap()
            .flags
            .contains(vk::MemoryAllocateFlags::DEVICE_ADDRESS));
    }

    #[test]
    fn kept_records_have_zeroed_links() {
        let mut bogus = vk::MemoryAllocateFlagsInfo::default();
        let mut dedicated = vk::MemoryDedicatedAllocateInfo::default();
        dedicated.p_next = &mut bogus as *mut _ as *const c_void;
        let (flags, dedicated) = sanitize_allocate_chain(
            Version::V1_2,
            |_| false,
            Some(flags_info(vk::MemoryAllocateFlags::DEVICE_MASK)),
            Some(dedicated),
        );
        assert!(flags.unwrap().p_next.is_null());
        assert!(dedicated.unwrap().p_next.is_null());
    }
}
