//! Host-visible staging for device uploads.
//!
//! [`StagingBuffer`] bundles a transfer-source buffer, a host-visible memory
//! allocation, and their binding. Fill it from the CPU with
//! [`upload`](StagingBuffer::upload), then record a transfer from it into
//! device-local resources.

use crate::{
    Device, HasDevice,
    buffer::BufferBuilder,
    memory::{BoundBuffer, DeviceMemory, DeviceMemoryBuilder},
    utils::AsVkHandle,
};
use ash::{prelude::VkResult, vk};

/// One copy region for [`StagingBuffer::upload`]: `data` lands at `offset`
/// bytes into the staging buffer.
#[derive(Clone, Copy, Debug)]
pub struct UploadRegion<'a> {
    pub data: &'a [u8],
    pub offset: vk::DeviceSize,
}

/// A host-visible buffer used to move data toward device-local memory.
pub struct StagingBuffer {
    bound: BoundBuffer,
}

impl HasDevice for StagingBuffer {
    fn device(&self) -> &Device {
        self.bound.device()
    }
}
impl AsVkHandle for StagingBuffer {
    type Handle = vk::Buffer;

    fn vk_handle(&self) -> Self::Handle {
        self.bound.vk_handle()
    }
}

impl StagingBuffer {
    /// Creates a staging buffer of `size` bytes.
    ///
    /// The backing memory type must be host-visible and host-coherent;
    /// returns `ERROR_OUT_OF_DEVICE_MEMORY` if the device offers no such
    /// type for the buffer.
    pub fn new(device: &Device, size: vk::DeviceSize) -> VkResult<Self> {
        let buffer = BufferBuilder {
            size,
            usage: vk::BufferUsageFlags::TRANSFER_SRC,
            ..Default::default()
        }
        .build(device)?;

        let requirements = buffer.memory_requirements();
        let memory_type_index = device
            .physical_device()
            .memory_type_index(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                vk::MemoryPropertyFlags::empty(),
            )
            .ok_or(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)?;

        let memory = DeviceMemoryBuilder {
            allocation_size: requirements.size,
            memory_type_index,
            ..Default::default()
        }
        .build(device)?;

        let bound = BoundBuffer::bind(buffer, memory, 0)?;
        Ok(Self { bound })
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.bound.size()
    }

    pub fn buffer(&self) -> &BoundBuffer {
        &self.bound
    }

    pub fn memory(&self) -> &DeviceMemory {
        self.bound.memory()
    }

    /// Copies every in-bounds region into the staging buffer through one
    /// mapping covering the span the regions touch. Out-of-bounds regions
    /// are skipped, matching the permissive fill-what-fits contract of the
    /// underlying API; an empty or fully out-of-bounds request is a no-op.
    pub fn upload(&self, regions: &[UploadRegion]) -> VkResult<()> {
        let Some((min_offset, max_end)) = upload_span(regions, self.size()) else {
            return Ok(());
        };
        let mapped = self.bound.map_range(min_offset, max_end - min_offset)?;
        for region in regions.iter().filter(|r| region_fits(r, self.size())) {
            unsafe {
                std::ptr::copy_nonoverlapping(
                    region.data.as_ptr(),
                    (mapped as *mut u8).add((region.offset - min_offset) as usize),
                    region.data.len(),
                );
            }
        }
        self.bound.unmap();
        Ok(())
    }
}

fn region_fits(region: &UploadRegion, size: vk::DeviceSize) -> bool {
    region.offset <= size && region.offset + region.data.len() as vk::DeviceSize <= size
}

/// Returns the `[min_offset, max_end)` span covered by the in-bounds
/// regions, or `None` if nothing fits.
fn upload_span(regions: &[UploadRegion], size: vk::DeviceSize) -> Option<(vk::DeviceSize, vk::DeviceSize)> {
    let mut span: Option<(vk::DeviceSize, vk::DeviceSize)> = None;
    for region in regions.iter().filter(|r| region_fits(r, size)) {
        let end = region.offset + region.data.len() as vk::DeviceSize;
        span = Some(match span {
            None => (region.offset, end),
            Some((min_offset, max_end)) => (min_offset.min(region.offset), max_end.max(end)),
        });
    }
    span
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_covers_all_in_bounds_regions() {
        let a = [0u8; 16];
        let b = [0u8; 8];
        let regions = [
            UploadRegion {
                data: &a,
                offset: 32,
            },
            UploadRegion {
                data: &b,
                offset: 8,
            },
        ];
        assert_eq!(upload_span(&regions, 64), Some((8, 48)));
    }

    #[test]
    fn out_of_bounds_regions_are_skipped() {
        let a = [0u8; 16];
        let regions = [
            UploadRegion {
                data: &a,
                offset: 0,
            },
            UploadRegion {
                data: &a,
                offset: 120, // past the end of a 64-byte staging buffer
            },
        ];
        assert_eq!(upload_span(&regions, 64), Some((0, 16)));
        assert!(!region_fits(&regions[1], 64));
    }

    #[test]
    fn empty_request_has_no_span() {
        assert_eq!(upload_span(&[], 64), None);
    }

    #[test]
    fn region_ending_exactly_at_size_fits() {
        let a = [0u8; 16];
        let region = UploadRegion {
            data: &a,
            offset: 48,
        };
        assert!(region_fits(&region, 64));
        assert!(!region_fits(
            &UploadRegion {
                data: &a,
                offset: 49
            },
            64
        ));
    }
}
