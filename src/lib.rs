//! # Scoria
//!
//! A typed convenience layer over Vulkan for Rust, built on [`ash`].
//!
//! Scoria wraps the verbose parts of bringing up a Vulkan application —
//! instance and device creation, capability negotiation, resource and
//! memory management — behind owned builder values and RAII handle
//! wrappers, while staying a thin pass-through to the native API.
//!
//! ## Quick Start
//!
//! ```no_run
//! use scoria::prelude::*;
//! use scoria::queue::QueueFamilyConfig;
//!
//! // Connect to the Vulkan loader and create an instance.
//! let instance = Instance::builder().unwrap().build().unwrap();
//! let pdevice = instance.enumerate_physical_devices().unwrap().remove(0);
//!
//! // Negotiate device capabilities through the feature chain and build.
//! let mut builder = Device::builder(pdevice);
//! builder.set_features(
//!     vk::PhysicalDeviceTimelineSemaphoreFeatures::default().timeline_semaphore(true),
//! );
//! builder.enable_queue_family(QueueFamilyConfig::with_queue_count(0, 1));
//! let device = builder.build().unwrap();
//! let queue = device.queue(0, 0).unwrap();
//! ```
//!
//! ## Overview
//!
//! ### Feature negotiation
//!
//! The heart of device configuration is
//! [`DeviceFeatureSet`](features::DeviceFeatureSet): an ordered, type-erased
//! container for the tagged feature structures Vulkan threads into a
//! `p_next` chain. The device builder owns one, hands its head pointer to
//! `vkCreateDevice`, and the created [`Device`] retains it so enabled
//! capabilities stay queryable.
//!
//! ### Resources and memory
//!
//! [`Buffer`](buffer::Buffer) and [`Image`](image::Image) are created
//! unbound, then attached to an explicitly allocated
//! [`DeviceMemory`](memory::DeviceMemory) via
//! [`BoundBuffer`](memory::BoundBuffer) / [`BoundImage`](memory::BoundImage).
//! [`StagingBuffer`](staging::StagingBuffer) covers the host-to-device
//! upload path.
//!
//! ### Object lifetimes
//!
//! Every wrapper owns exactly one native handle and destroys it when
//! dropped. Handles that other objects depend on (instance, device, command
//! pools, device memory) are reference-counted, so dependents keep their
//! parents alive.
//!
//! ## Blocking
//!
//! Everything executes synchronously and returns immediately, except
//! [`Fence::wait`](sync::Fence::wait) and
//! [`Device::wait_for_fences`](Device::wait_for_fences).

pub mod buffer;
pub mod command;
pub mod device;
pub mod features;
pub mod image;
pub mod instance;
pub mod loader;
pub mod memory;
pub mod physical_device;
pub mod pipeline;
pub mod queue;
pub mod render_pass;
pub mod shader;
pub mod staging;
pub mod sync;
pub mod utils;

pub use device::{Device, HasDevice};
pub use features::DeviceFeatureSet;
pub use instance::Instance;
pub use physical_device::PhysicalDevice;
pub use queue::Queue;

pub use ash;

use std::ffi::CString;

/// A requested capability is not available on this loader or device.
///
/// Returned by the builder `enable_*` methods, which validate requests
/// against what the implementation reports before any create call is made.
#[derive(Debug, thiserror::Error)]
pub enum MissingFeatureError {
    #[error("instance extension {0:?} is not available")]
    InstanceExtension(CString),
    #[error("device extension {0:?} is not available")]
    DeviceExtension(CString),
    #[error("layer {0:?} is not available")]
    Layer(CString),
}

pub mod prelude {
    pub use crate::{
        Device, DeviceFeatureSet, HasDevice, Instance, PhysicalDevice, Queue, ash,
        ash::vk,
        buffer::{Buffer, BufferBuilder},
        command::{CommandBuffer, CommandPool},
        image::{Image, ImageBuilder},
        memory::{BoundBuffer, BoundImage, DeviceMemory, DeviceMemoryBuilder},
        staging::StagingBuffer,
        sync::Fence,
        utils::AsVkHandle,
    };
}
