//! Physical device enumeration and capability queries.
//!
//! This module provides the [`PhysicalDevice`] type for querying GPU
//! capabilities and selecting a device for logical device creation.
//!
//! # Overview
//!
//! A physical device represents a GPU in the system. Before creating a
//! logical device, you typically:
//!
//! 1. Enumerate available physical devices
//! 2. Query their properties and capabilities
//! 3. Select one based on your application's requirements
//!
//! # Example
//!
//! ```no_run
//! # use scoria::{Instance, ash::vk};
//! # let instance = Instance::builder().unwrap().build().unwrap();
//! let physical_devices = instance.enumerate_physical_devices().unwrap();
//! let gpu = physical_devices
//!     .iter()
//!     .find(|d| d.properties().device_type == vk::PhysicalDeviceType::DISCRETE_GPU)
//!     .unwrap_or(&physical_devices[0]);
//! println!("Using: {:?}", gpu.device_name());
//! ```

use crate::{Instance, utils::AsVkHandle, utils::Version};
use ash::{
    prelude::VkResult,
    vk::{self, TaggedStructure},
};
use std::{
    collections::BTreeMap,
    ffi::{CStr, CString, c_void},
    ptr::null_mut,
    sync::Arc,
};

/// A handle to a physical GPU device.
///
/// Physical devices are enumerated from an [`Instance`] and used to query
/// device capabilities before creating a logical
/// [`Device`](crate::Device).
///
/// This type is reference-counted and cheap to clone.
#[derive(Clone)]
pub struct PhysicalDevice(Arc<PhysicalDeviceInner>);
impl PartialEq for PhysicalDevice {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for PhysicalDevice {}

struct PhysicalDeviceInner {
    instance: Instance,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    queue_family_properties: Vec<vk::QueueFamilyProperties>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl Instance {
    /// Enumerates all physical devices (GPUs) available on the system.
    pub fn enumerate_physical_devices(&self) -> VkResult<Vec<PhysicalDevice>> {
        let pdevices = unsafe { (**self).enumerate_physical_devices()? };
        Ok(pdevices
            .into_iter()
            .map(|pdevice| {
                let properties = unsafe { self.get_physical_device_properties(pdevice) };
                let queue_family_properties =
                    unsafe { self.get_physical_device_queue_family_properties(pdevice) };
                let memory_properties =
                    unsafe { self.get_physical_device_memory_properties(pdevice) };
                PhysicalDevice(Arc::new(PhysicalDeviceInner {
                    instance: self.clone(),
                    physical_device: pdevice,
                    properties,
                    queue_family_properties,
                    memory_properties,
                }))
            })
            .collect())
    }
}

impl AsVkHandle for PhysicalDevice {
    type Handle = vk::PhysicalDevice;

    fn vk_handle(&self) -> Self::Handle {
        self.0.physical_device
    }
}

impl PhysicalDevice {
    /// Returns the instance this physical device was enumerated from.
    pub fn instance(&self) -> &Instance {
        &self.0.instance
    }

    /// Returns the cached physical device properties.
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.0.properties
    }

    /// Returns the device name as a C string.
    pub fn device_name(&self) -> &CStr {
        self.0.properties.device_name_as_c_str().unwrap()
    }

    /// Returns the maximum supported API version for this physical device.
    pub fn api_version(&self) -> Version {
        Version(self.0.properties.api_version)
    }

    /// Returns the queue family properties, indexed by family.
    pub fn queue_family_properties(&self) -> &[vk::QueueFamilyProperties] {
        &self.0.queue_family_properties
    }

    /// Returns the available memory types.
    pub fn memory_types(&self) -> &[vk::MemoryType] {
        &self.0.memory_properties.memory_types
            [0..self.0.memory_properties.memory_type_count as usize]
    }

    /// Returns the available memory heaps.
    pub fn memory_heaps(&self) -> &[vk::MemoryHeap] {
        &self.0.memory_properties.memory_heaps
            [0..self.0.memory_properties.memory_heap_count as usize]
    }

    /// Finds the first memory type allowed by `type_mask` that carries all
    /// of `required` and none of `avoid`.
    ///
    /// `type_mask` is the `memory_type_bits` field of a
    /// [`vk::MemoryRequirements`].
    pub fn memory_type_index(
        &self,
        type_mask: u32,
        required: vk::MemoryPropertyFlags,
        avoid: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        self.memory_types()
            .iter()
            .enumerate()
            .find(|(i, memory_type)| {
                (type_mask & (1 << i)) != 0
                    && memory_type.property_flags.contains(required)
                    && !memory_type.property_flags.intersects(avoid)
            })
            .map(|(i, _)| i as u32)
    }

    /// Enumerates the device extensions this physical device supports.
    pub fn enumerate_extension_properties(&self) -> VkResult<BTreeMap<CString, Version>> {
        let properties = unsafe {
            self.0
                .instance
                .enumerate_device_extension_properties(self.0.physical_device)?
        };
        Ok(properties
            .into_iter()
            .map(|ext| {
                let name = ext.extension_name_as_c_str().unwrap();
                (name.to_owned(), Version(ext.spec_version))
            })
            .collect())
    }

    /// Queries the device's base feature set.
    pub fn features2(&self) -> vk::PhysicalDeviceFeatures2<'static> {
        let mut features = vk::PhysicalDeviceFeatures2::default();
        unsafe {
            self.0
                .instance
                .get_physical_device_features2(self.0.physical_device, &mut features);
        }
        features
    }

    /// Queries support for a single extension feature structure.
    ///
    /// The structure is chained behind a temporary
    /// [`vk::PhysicalDeviceFeatures2`] head for the query; the returned copy
    /// is detached (link zeroed).
    pub fn query_feature<T: TaggedStructure + Copy + Default + 'static>(&self) -> T {
        let mut feature = T::default();
        let mut head = vk::PhysicalDeviceFeatures2::default();
        head.p_next = &mut feature as *mut T as *mut c_void;
        unsafe {
            self.0
                .instance
                .get_physical_device_features2(self.0.physical_device, &mut head);
            (*(&mut feature as *mut T as *mut vk::BaseOutStructure<'static>)).p_next = null_mut();
        }
        feature
    }

    /// Queries image format properties for a specific configuration.
    ///
    /// Returns `Ok(None)` if the format is not supported for the given
    /// parameters.
    pub fn image_format_properties(
        &self,
        format_info: &vk::PhysicalDeviceImageFormatInfo2,
    ) -> VkResult<Option<vk::ImageFormatProperties2<'static>>> {
        let mut out = vk::ImageFormatProperties2::default();
        unsafe {
            match self.0.instance.get_physical_device_image_format_properties2(
                self.0.physical_device,
                format_info,
                &mut out,
            ) {
                Err(vk::Result::ERROR_FORMAT_NOT_SUPPORTED) => Ok(None),
                Ok(()) => Ok(Some(out)),
                Err(err) => Err(err),
            }
        }
    }
}
