//! Shader module creation.

use crate::{Device, HasDevice, utils::AsVkHandle};
use ash::{prelude::VkResult, vk};
use std::fmt::Debug;

/// Accumulated state for shader module creation. `code` is SPIR-V words.
#[derive(Clone, Debug, Default)]
pub struct ShaderModuleBuilder {
    pub flags: vk::ShaderModuleCreateFlags,
    pub code: Vec<u32>,
}

impl ShaderModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_code(code: Vec<u32>) -> Self {
        Self {
            flags: vk::ShaderModuleCreateFlags::empty(),
            code,
        }
    }

    pub fn build(&self, device: &Device) -> VkResult<ShaderModule> {
        ShaderModule::new(device.clone(), self)
    }
}

/// A compiled SPIR-V shader module.
///
/// Retains its code words so pipeline tooling can inspect them later.
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
    flags: vk::ShaderModuleCreateFlags,
    code: Vec<u32>,
}

impl HasDevice for ShaderModule {
    fn device(&self) -> &Device {
        &self.device
    }
}
impl AsVkHandle for ShaderModule {
    type Handle = vk::ShaderModule;

    fn vk_handle(&self) -> Self::Handle {
        self.module
    }
}
impl Debug for ShaderModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderModule")
            .field("handle", &self.module)
            .field("code_size", &(self.code.len() * 4))
            .finish_non_exhaustive()
    }
}

impl ShaderModule {
    pub fn builder() -> ShaderModuleBuilder {
        ShaderModuleBuilder::new()
    }

    pub fn new(device: Device, builder: &ShaderModuleBuilder) -> VkResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo {
            flags: builder.flags,
            code_size: builder.code.len() * std::mem::size_of::<u32>(),
            p_code: builder.code.as_ptr(),
            ..Default::default()
        };
        let module = unsafe { device.create_shader_module(&create_info, None) }?;
        Ok(Self {
            device,
            module,
            flags: builder.flags,
            code: builder.code.clone(),
        })
    }

    pub fn flags(&self) -> vk::ShaderModuleCreateFlags {
        self.flags
    }

    /// Returns the SPIR-V words the module was created from.
    pub fn code(&self) -> &[u32] {
        &self.code
    }

    pub fn code_size(&self) -> usize {
        self.code.len() * std::mem::size_of::<u32>()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.module, None) }
    }
}
