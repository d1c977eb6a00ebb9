//! Host-device synchronization.
//!
//! This module provides the [`Fence`] wrapper. Together with
//! [`Device::wait_for_fences`](crate::Device::wait_for_fences), fence waits
//! are the only operations in this crate that block.

use crate::{Device, HasDevice, utils::AsVkHandle};
use ash::{prelude::VkResult, vk};
use std::fmt::Debug;

/// A fence for GPU-to-host synchronization.
///
/// Fences are signaled by queue submissions and waited on by the host.
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.fence.fmt(f)
    }
}
impl HasDevice for Fence {
    fn device(&self) -> &Device {
        &self.device
    }
}
impl AsVkHandle for Fence {
    type Handle = vk::Fence;

    fn vk_handle(&self) -> Self::Handle {
        self.fence
    }
}

impl Fence {
    /// Creates a fence, optionally in the signaled state.
    pub fn new(device: Device, signaled: bool) -> VkResult<Self> {
        let create_info = vk::FenceCreateInfo {
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        let fence = unsafe { device.create_fence(&create_info, None) }?;
        Ok(Self { device, fence })
    }

    /// Blocks until the fence signals, up to `timeout` nanoseconds.
    ///
    /// Returns `Err(vk::Result::TIMEOUT)` if the timeout elapsed first.
    pub fn wait(&self, timeout: u64) -> VkResult<()> {
        let device: &ash::Device = &self.device;
        unsafe { device.wait_for_fences(&[self.fence], true, timeout) }
    }

    /// Polls the fence without blocking. `Ok(true)` means signaled.
    pub fn status(&self) -> VkResult<bool> {
        unsafe { self.device.get_fence_status(self.fence) }
    }

    /// Returns the fence to the unsignaled state.
    pub fn reset(&self) -> VkResult<()> {
        unsafe { self.device.reset_fences(&[self.fence]) }
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.destroy_fence(self.fence, None) }
    }
}
