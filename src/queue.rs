//! Queue and queue family access.
//!
//! Queues are requested at device creation through [`QueueFamilyConfig`] and
//! retrieved afterwards by pure lookup over the configuration the device
//! recorded — no allocation happens beyond the vectors returned by
//! enumeration.

use crate::{Device, HasDevice, command::CommandPool, utils::AsVkHandle};
use ash::{prelude::VkResult, vk};

/// A request for queues from one queue family, supplied to
/// [`DeviceBuilder::enable_queue_family`](crate::device::DeviceBuilder::enable_queue_family).
///
/// One priority per queue; [`with_queue_count`](Self::with_queue_count) fills
/// them with 1.0.
#[derive(Clone, Debug, Default)]
pub struct QueueFamilyConfig {
    family_index: u32,
    priorities: Vec<f32>,
}

impl QueueFamilyConfig {
    pub fn new(family_index: u32) -> Self {
        Self {
            family_index,
            priorities: Vec::new(),
        }
    }

    /// Requests `queue_count` queues at priority 1.0.
    pub fn with_queue_count(family_index: u32, queue_count: u32) -> Self {
        Self {
            family_index,
            priorities: vec![1.0; queue_count as usize],
        }
    }

    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    pub fn queue_count(&self) -> u32 {
        self.priorities.len() as u32
    }

    pub fn priorities(&self) -> &[f32] {
        &self.priorities
    }

    /// Replaces the priority list (one entry per requested queue).
    pub fn set_priorities(&mut self, priorities: Vec<f32>) -> &mut Self {
        self.priorities = priorities;
        self
    }

    /// Sets the priority of one already-requested queue. Out-of-range
    /// indices are ignored.
    pub fn set_priority(&mut self, index: usize, priority: f32) -> &mut Self {
        if let Some(slot) = self.priorities.get_mut(index) {
            *slot = priority;
        }
        self
    }
}

/// A device queue handle.
///
/// Queues are owned by the device; this wrapper records which family and
/// slot the handle came from along with the priority it was created with.
#[derive(Clone)]
pub struct Queue {
    device: Device,
    queue: vk::Queue,
    family_index: u32,
    index: u32,
    priority: f32,
}

impl HasDevice for Queue {
    fn device(&self) -> &Device {
        &self.device
    }
}
impl AsVkHandle for Queue {
    type Handle = vk::Queue;

    fn vk_handle(&self) -> Self::Handle {
        self.queue
    }
}

impl Queue {
    pub(crate) fn from_raw(
        device: Device,
        queue: vk::Queue,
        family_index: u32,
        index: u32,
        priority: f32,
    ) -> Self {
        Self {
            device,
            queue,
            family_index,
            index,
            priority,
        }
    }

    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn priority(&self) -> f32 {
        self.priority
    }

    /// Returns the operations supported by this queue's family.
    pub fn capabilities(&self) -> vk::QueueFlags {
        self.device
            .physical_device()
            .queue_family_properties()
            .get(self.family_index as usize)
            .map(|family| family.queue_flags)
            .unwrap_or_default()
    }
}

/// A queue family the device was created with, holding its enumerated
/// queues.
pub struct QueueFamily {
    device: Device,
    family_index: u32,
    queues: Vec<Queue>,
}

impl HasDevice for QueueFamily {
    fn device(&self) -> &Device {
        &self.device
    }
}

impl QueueFamily {
    pub(crate) fn new(device: Device, family_index: u32, queues: Vec<Queue>) -> Self {
        Self {
            device,
            family_index,
            queues,
        }
    }

    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    pub fn queues(&self) -> &[Queue] {
        &self.queues
    }

    /// Creates a command pool serving this family.
    pub fn create_command_pool(&self) -> VkResult<CommandPool> {
        CommandPool::new(self.device.clone(), self.family_index)
    }
}
