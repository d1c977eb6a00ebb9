//! Logical device creation and management.
//!
//! This module provides the core [`Device`] type and [`DeviceBuilder`] for
//! creating and configuring Vulkan logical devices.
//!
//! # Overview
//!
//! A Vulkan logical device represents a connection to the driver of a
//! physical GPU with a specific configuration of extensions, features, and
//! queues. This module provides:
//!
//! - [`Device`]: The main device handle, reference-counted for cheap sharing
//! - [`DeviceBuilder`]: Builder for configuring devices before creation
//! - [`HasDevice`]: Trait for types associated with a device
//!
//! # Feature negotiation
//!
//! The builder owns a [`DeviceFeatureSet`] seeded with everything the
//! physical device reports as supported. Callers layer extension feature
//! structures on top with [`set_features`](DeviceBuilder::set_features); at
//! build time the chain head becomes the `p_next` of the device create info.
//! After creation the same set is retained by the device as the record of
//! *enabled* features, queryable with [`feature`](Device::feature).
//!
//! ```no_run
//! # use scoria::{Instance, Device, ash::{self, vk}};
//! # let instance = Instance::builder().unwrap().build().unwrap();
//! # let pdevice = instance.enumerate_physical_devices().unwrap().remove(0);
//! use scoria::queue::QueueFamilyConfig;
//!
//! let mut builder = Device::builder(pdevice);
//! builder.enable_extension(ash::khr::timeline_semaphore::NAME).unwrap();
//! builder.set_features(
//!     vk::PhysicalDeviceTimelineSemaphoreFeatures::default().timeline_semaphore(true),
//! );
//! builder.enable_queue_family(QueueFamilyConfig::with_queue_count(0, 1));
//! let device = builder.build().unwrap();
//!
//! let enabled = device
//!     .feature::<vk::PhysicalDeviceTimelineSemaphoreFeatures>()
//!     .unwrap();
//! assert_eq!(enabled.timeline_semaphore, vk::TRUE);
//! ```

use crate::{
    Instance, MissingFeatureError,
    features::DeviceFeatureSet,
    physical_device::PhysicalDevice,
    queue::{Queue, QueueFamily, QueueFamilyConfig},
    sync::Fence,
    utils::{AsVkHandle, Version},
};
use ash::{
    prelude::VkResult,
    vk::{self, TaggedStructure},
};
use smallvec::SmallVec;
use std::{
    collections::{BTreeMap, BTreeSet},
    ffi::{CStr, CString, c_void},
    fmt::Debug,
    ops::Deref,
    ptr::null_mut,
    sync::Arc,
};

/// A trait for types created from a Vulkan device.
pub trait HasDevice {
    /// Returns a reference to the Vulkan device.
    fn device(&self) -> &Device;

    /// Returns a reference to the Vulkan [`PhysicalDevice`].
    fn physical_device(&self) -> &PhysicalDevice {
        self.device().physical_device()
    }

    /// Returns a reference to the Vulkan [`Instance`].
    fn instance(&self) -> &Instance {
        self.device().physical_device().instance()
    }
}

/// A Vulkan logical device wrapper.
///
/// Reference-counted using [`Arc`] for cheap shared access. The device
/// retains the feature set it was created with and the queue configuration,
/// so enabled capabilities and queues can be looked up afterwards.
#[derive(Clone)]
pub struct Device(Arc<DeviceInner>);
impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Device {}
impl Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Device")
            .field(&self.0.device.handle())
            .finish()
    }
}

struct DeviceInner {
    physical_device: PhysicalDevice,
    device: ash::Device,
    /// Names of the enabled device extensions
    enabled_extensions: BTreeSet<CString>,
    /// Chain of enabled device features
    enabled_features: DeviceFeatureSet,
    /// Queue configuration the device was created with, keyed by family
    queue_families: BTreeMap<u32, QueueFamilyConfig>,
}
unsafe impl Send for DeviceInner {}
unsafe impl Sync for DeviceInner {}

impl Device {
    /// Creates a new device builder for the given physical device.
    pub fn builder(pdevice: PhysicalDevice) -> DeviceBuilder {
        DeviceBuilder::new(pdevice)
    }

    /// Returns a reference to the Vulkan [`Instance`].
    pub fn instance(&self) -> &Instance {
        self.0.physical_device.instance()
    }

    /// Returns a reference to the [`PhysicalDevice`].
    pub fn physical_device(&self) -> &PhysicalDevice {
        &self.0.physical_device
    }

    /// Returns whether the named device extension was enabled at creation.
    pub fn supports_extension(&self, name: &CStr) -> bool {
        self.0.enabled_extensions.contains(name)
    }

    /// Copies the enabled feature structure of type `T` out of the device's
    /// feature chain (link zeroed), or `None` if it was not part of device
    /// creation.
    pub fn feature<T: TaggedStructure + Copy + 'static>(&self) -> Option<T> {
        self.0.enabled_features.read::<T>()
    }

    /// Returns whether queues from the given family were requested at
    /// creation.
    pub fn supports_queue_family(&self, family_index: u32) -> bool {
        self.0.queue_families.contains_key(&family_index)
    }

    /// Returns the priorities the given family's queues were created with,
    /// or an empty slice for an unconfigured family.
    pub fn queue_priorities(&self, family_index: u32) -> &[f32] {
        self.0
            .queue_families
            .get(&family_index)
            .map(|config| config.priorities())
            .unwrap_or(&[])
    }

    /// Returns the number of queues created from the given family.
    pub fn queue_count(&self, family_index: u32) -> u32 {
        self.queue_priorities(family_index).len() as u32
    }

    /// Looks up a single queue. Returns `None` if the family or index was
    /// not part of device creation.
    pub fn queue(&self, family_index: u32, index: u32) -> Option<Queue> {
        let priority = *self.queue_priorities(family_index).get(index as usize)?;
        let raw = unsafe { self.0.device.get_device_queue(family_index, index) };
        Some(Queue::from_raw(
            self.clone(),
            raw,
            family_index,
            index,
            priority,
        ))
    }

    /// Enumerates every queue created from the given family.
    pub fn queues(&self, family_index: u32) -> Vec<Queue> {
        self.queue_priorities(family_index)
            .iter()
            .enumerate()
            .map(|(index, &priority)| {
                let raw = unsafe {
                    self.0.device.get_device_queue(family_index, index as u32)
                };
                Queue::from_raw(self.clone(), raw, family_index, index as u32, priority)
            })
            .collect()
    }

    /// Looks up a queue family with all of its queues. Returns `None` if the
    /// family was not part of device creation.
    pub fn queue_family(&self, family_index: u32) -> Option<QueueFamily> {
        let queues = self.queues(family_index);
        if queues.is_empty() {
            return None;
        }
        Some(QueueFamily::new(self.clone(), family_index, queues))
    }

    /// Creates a fence, optionally already signaled.
    pub fn new_fence(&self, signaled: bool) -> VkResult<Fence> {
        Fence::new(self.clone(), signaled)
    }

    /// Blocks until the given fences signal, up to `timeout` nanoseconds.
    ///
    /// With `wait_all` false, returns as soon as any one fence signals. This
    /// and [`Fence::wait`](crate::sync::Fence::wait) are the only blocking
    /// operations in the crate.
    pub fn wait_for_fences(
        &self,
        fences: &[&Fence],
        wait_all: bool,
        timeout: u64,
    ) -> VkResult<()> {
        let handles: SmallVec<[vk::Fence; 4]> =
            fences.iter().map(|fence| fence.vk_handle()).collect();
        unsafe { self.0.device.wait_for_fences(&handles, wait_all, timeout) }
    }

    /// Blocks until all queues on the device have finished executing.
    pub fn wait_idle(&self) -> VkResult<()> {
        unsafe { self.0.device.device_wait_idle() }
    }
}

impl Deref for Device {
    type Target = ash::Device;

    fn deref(&self) -> &Self::Target {
        &self.0.device
    }
}
impl AsVkHandle for Device {
    type Handle = vk::Device;

    fn vk_handle(&self) -> Self::Handle {
        self.0.device.handle()
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        tracing::info!(device = ?self.device.handle(), "drop device");
        // Safety: Host synchronization rule for vkDestroyDevice:
        // - Host access to device must be externally synchronized.
        // - Host access to all VkQueue objects created from device must be
        //   externally synchronized.
        // We have &mut self and therefore exclusive control on device.
        // Queue retains an Arc to Device, so none can outlive us.
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

/// A builder for creating Vulkan logical devices.
///
/// Accumulates extensions, a feature chain, and per-family queue requests,
/// then creates the device in one [`build`](Self::build) call.
pub struct DeviceBuilder {
    pdevice: PhysicalDevice,
    /// Everything the physical device supports at builder creation;
    /// overwritten by the caller with the features to enable.
    features: DeviceFeatureSet,
    available_extensions: BTreeMap<CString, Version>,
    enabled_extensions: BTreeSet<CString>,
    queue_families: BTreeMap<u32, QueueFamilyConfig>,
}

impl DeviceBuilder {
    /// Creates a new device builder for the given physical device.
    ///
    /// The feature chain starts out as the full set the device reports
    /// supported — building without touching it enables everything the
    /// hardware offers, which is the permissive default the wrapped API
    /// allows. Use [`set_features`](Self::set_features) to replace the base
    /// set or layer extension structures on top.
    pub fn new(pdevice: PhysicalDevice) -> Self {
        let available_extensions = pdevice.enumerate_extension_properties().unwrap();
        let mut features = DeviceFeatureSet::default();
        features.insert(pdevice.features2());
        Self {
            pdevice,
            features,
            available_extensions,
            enabled_extensions: BTreeSet::new(),
            queue_families: BTreeMap::new(),
        }
    }

    /// Returns the physical device this builder targets.
    pub fn physical_device(&self) -> &PhysicalDevice {
        &self.pdevice
    }

    /// Enables a device extension by name.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the extension is available on the physical device, or
    /// `Err(MissingFeatureError)` otherwise.
    pub fn enable_extension(&mut self, name: &CStr) -> Result<(), MissingFeatureError> {
        if self.available_extensions.contains_key(name) {
            self.enabled_extensions.insert(name.to_owned());
            Ok(())
        } else {
            Err(MissingFeatureError::DeviceExtension(name.to_owned()))
        }
    }

    /// Returns whether an extension has been enabled on this builder.
    pub fn extension_enabled(&self, name: &CStr) -> bool {
        self.enabled_extensions.contains(name)
    }

    /// Inserts a feature structure into the chain, or overwrites the stored
    /// payload if one of the same type is already present.
    pub fn set_features<T: TaggedStructure + Copy + 'static>(&mut self, features: T) -> &mut Self {
        if !self.features.insert(features) {
            self.features.write(features);
        }
        self
    }

    /// Returns the feature chain in its current state.
    pub fn features(&self) -> &DeviceFeatureSet {
        &self.features
    }

    /// Re-queries a feature structure from the physical device, overwriting
    /// whatever the chain currently holds for it (and inserting it first if
    /// absent).
    ///
    /// When the structure is already chained it is updated in place: its
    /// link is saved, the driver writes through the mapped pointer with the
    /// structure spliced out of the chain, and the link is restored.
    pub fn reset_features<T: TaggedStructure + Copy + Default + 'static>(&mut self) -> &mut Self {
        match self.features.map::<T>() {
            Some(ptr) => {
                unsafe {
                    (*(ptr as *mut vk::BaseOutStructure<'static>)).p_next = null_mut();
                    let mut head = vk::PhysicalDeviceFeatures2::default();
                    head.p_next = ptr as *mut c_void;
                    self.pdevice
                        .instance()
                        .get_physical_device_features2(self.pdevice.vk_handle(), &mut head);
                }
                self.features.unmap::<T>();
            }
            None => {
                self.features.insert(self.pdevice.query_feature::<T>());
            }
        }
        self
    }

    /// Re-queries the base [`vk::PhysicalDeviceFeatures2`] structure from
    /// the physical device, updating it in place.
    pub fn reset_base_features(&mut self) -> &mut Self {
        if let Some(ptr) = self.features.map::<vk::PhysicalDeviceFeatures2<'static>>() {
            unsafe {
                (*(ptr as *mut vk::BaseOutStructure<'static>)).p_next = null_mut();
                self.pdevice
                    .instance()
                    .get_physical_device_features2(self.pdevice.vk_handle(), &mut *ptr);
            }
            self.features.unmap::<vk::PhysicalDeviceFeatures2<'static>>();
        }
        self
    }

    /// Requests queues from a family.
    ///
    /// The request is validated against the family's reported queue count;
    /// an out-of-range family, a zero-queue request, or asking for more
    /// queues than the family has is rejected with `false`. A repeated
    /// request for the same family replaces the earlier one.
    pub fn enable_queue_family(&mut self, config: QueueFamilyConfig) -> bool {
        let Some(properties) = self
            .pdevice
            .queue_family_properties()
            .get(config.family_index() as usize)
        else {
            return false;
        };
        if config.queue_count() == 0 || config.queue_count() > properties.queue_count {
            return false;
        }
        self.queue_families.insert(config.family_index(), config);
        true
    }

    /// Requests one queue from the least capable family that still supports
    /// `required`, preserving more capable families for work that needs
    /// them. Returns the chosen family index.
    pub fn enable_queue_with_caps(
        &mut self,
        required: vk::QueueFlags,
        priority: f32,
    ) -> Option<u32> {
        let (family_index, _) = self
            .pdevice
            .queue_family_properties()
            .iter()
            .enumerate()
            .filter(|(index, properties)| {
                properties.queue_flags.contains(required)
                    && !self.queue_families.contains_key(&(*index as u32))
            })
            .min_by_key(|(_, properties)| properties.queue_flags.as_raw().count_ones())?;
        let mut config = QueueFamilyConfig::new(family_index as u32);
        config.set_priorities(vec![priority]);
        self.enable_queue_family(config);
        Some(family_index as u32)
    }

    /// Builds the logical device with the current configuration.
    ///
    /// The feature chain's head pointer becomes the create info's extension
    /// chain; on success the chain is moved into the returned [`Device`] as
    /// its record of enabled features.
    pub fn build(self) -> VkResult<Device> {
        let extension_names = self
            .enabled_extensions
            .iter()
            .map(|name| name.as_ptr())
            .collect::<Vec<_>>();
        let queue_create_infos: SmallVec<[vk::DeviceQueueCreateInfo; 4]> = self
            .queue_families
            .values()
            .map(|config| vk::DeviceQueueCreateInfo {
                queue_family_index: config.family_index(),
                queue_count: config.queue_count(),
                p_queue_priorities: config.priorities().as_ptr(),
                ..Default::default()
            })
            .collect();
        let create_info = vk::DeviceCreateInfo {
            queue_create_info_count: queue_create_infos.len() as u32,
            p_queue_create_infos: queue_create_infos.as_ptr(),
            enabled_extension_count: extension_names.len() as u32,
            pp_enabled_extension_names: extension_names.as_ptr(),
            p_next: self.features.head(),
            ..Default::default()
        };
        let device = unsafe {
            self.pdevice.instance().create_device(
                self.pdevice.vk_handle(),
                &create_info,
                None,
            )?
        };
        Ok(Device(Arc::new(DeviceInner {
            physical_device: self.pdevice,
            device,
            enabled_extensions: self.enabled_extensions,
            enabled_features: self.features,
            queue_families: self.queue_families,
        })))
    }
}
