//! Image creation.
//!
//! [`ImageBuilder`] accumulates an image description and creates the
//! [`Image`] in one call. Like buffers, images are created unbound; pair
//! them with a [`DeviceMemory`](crate::memory::DeviceMemory) allocation
//! through [`BoundImage::bind`](crate::memory::BoundImage::bind).

use crate::{
    Device, HasDevice,
    utils::{AsVkHandle, SharingMode},
};
use ash::{prelude::VkResult, vk};
use std::fmt::Debug;

/// Accumulated state for image creation.
///
/// Defaults describe a single-mip, single-layer, single-sampled 2D image
/// with undefined format and layout; sharing mode is inferred from the queue
/// family index list.
#[derive(Clone, Debug)]
pub struct ImageBuilder {
    pub flags: vk::ImageCreateFlags,
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub queue_family_indices: Vec<u32>,
    pub initial_layout: vk::ImageLayout,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self {
            flags: vk::ImageCreateFlags::empty(),
            image_type: vk::ImageType::TYPE_2D,
            format: vk::Format::UNDEFINED,
            extent: vk::Extent3D::default(),
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::empty(),
            queue_family_indices: Vec::new(),
            initial_layout: vk::ImageLayout::UNDEFINED,
        }
    }
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sharing_mode(&self) -> SharingMode<&[u32]> {
        SharingMode::from_queue_family_indices(&self.queue_family_indices)
    }

    pub fn build(&self, device: &Device) -> VkResult<Image> {
        Image::new(device.clone(), self)
    }
}

/// An unbound Vulkan image.
///
/// Records the builder state it was created from for later inspection.
pub struct Image {
    device: Device,
    image: vk::Image,
    builder: ImageBuilder,
}

impl HasDevice for Image {
    fn device(&self) -> &Device {
        &self.device
    }
}
impl AsVkHandle for Image {
    type Handle = vk::Image;

    fn vk_handle(&self) -> Self::Handle {
        self.image
    }
}
impl Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("handle", &self.image)
            .field("format", &self.builder.format)
            .field("extent", &self.builder.extent)
            .finish_non_exhaustive()
    }
}

impl Image {
    pub fn builder() -> ImageBuilder {
        ImageBuilder::new()
    }

    pub fn new(device: Device, builder: &ImageBuilder) -> VkResult<Self> {
        let sharing = builder.sharing_mode();
        let create_info = vk::ImageCreateInfo {
            flags: builder.flags,
            image_type: builder.image_type,
            format: builder.format,
            extent: builder.extent,
            mip_levels: builder.mip_levels,
            array_layers: builder.array_layers,
            samples: builder.samples,
            tiling: builder.tiling,
            usage: builder.usage,
            sharing_mode: sharing.as_raw(),
            queue_family_index_count: sharing.queue_family_indices().len() as u32,
            p_queue_family_indices: sharing.queue_family_indices().as_ptr(),
            initial_layout: builder.initial_layout,
            ..Default::default()
        };
        let image = unsafe { device.create_image(&create_info, None) }?;
        Ok(Self {
            device,
            image,
            builder: builder.clone(),
        })
    }

    pub fn flags(&self) -> vk::ImageCreateFlags {
        self.builder.flags
    }

    pub fn image_type(&self) -> vk::ImageType {
        self.builder.image_type
    }

    pub fn format(&self) -> vk::Format {
        self.builder.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.builder.extent
    }

    pub fn mip_levels(&self) -> u32 {
        self.builder.mip_levels
    }

    pub fn array_layers(&self) -> u32 {
        self.builder.array_layers
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.builder.samples
    }

    pub fn tiling(&self) -> vk::ImageTiling {
        self.builder.tiling
    }

    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.builder.usage
    }

    pub fn queue_family_indices(&self) -> &[u32] {
        &self.builder.queue_family_indices
    }

    pub fn initial_layout(&self) -> vk::ImageLayout {
        self.builder.initial_layout
    }

    /// Queries the memory requirements for binding this image.
    pub fn memory_requirements(&self) -> vk::MemoryRequirements {
        unsafe { self.device.get_image_memory_requirements(self.image) }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe { self.device.destroy_image(self.image, None) }
    }
}
