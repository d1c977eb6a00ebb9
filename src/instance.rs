//! Instance creation and management.
//!
//! This module provides the [`Instance`] type and [`InstanceBuilder`] for
//! creating and configuring Vulkan instances.
//!
//! # Overview
//!
//! A Vulkan instance is the connection between your application and the
//! Vulkan loader. It is the first object you create and is used to:
//!
//! - Enumerate physical devices (GPUs)
//! - Enable instance-level extensions and layers
//! - Set application metadata
//!
//! # Example
//!
//! ```no_run
//! # use std::borrow::Cow;
//! # use scoria::{Instance, utils::Version};
//! let mut builder = Instance::builder().unwrap();
//! builder.info.application_name = Cow::Borrowed(c"My Application");
//! builder.set_api_version(Version::V1_2);
//! builder.enable_layer(c"VK_LAYER_KHRONOS_validation").ok();
//! let instance = builder.build().unwrap();
//! ```
//!
//! Extensions and layers are validated against what the loader reports;
//! requesting an unavailable one fails with
//! [`MissingFeatureError`](crate::MissingFeatureError) instead of being
//! silently dropped or deferred to a create-time driver error.

use crate::{MissingFeatureError, loader, utils::Version};
use ash::{prelude::VkResult, vk};
use std::{
    borrow::Cow,
    collections::{BTreeMap, BTreeSet},
    ffi::{CStr, CString, c_char},
    ops::Deref,
    sync::Arc,
};

/// A Vulkan instance wrapper.
///
/// The instance is reference-counted using [`Arc`] for cheap shared access
/// and is destroyed when the last reference is dropped.
#[derive(Clone)]
pub struct Instance(Arc<InstanceInner>);
impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Instance {}

struct InstanceInner {
    entry: Arc<ash::Entry>,
    instance: ash::Instance,
    api_version: Version,
    enabled_extensions: BTreeSet<CString>,
    enabled_layers: BTreeSet<CString>,
}

/// Configuration for instance creation.
pub struct InstanceCreateInfo {
    /// Instance creation flags.
    pub flags: vk::InstanceCreateFlags,
    /// The application name (shown in debugging tools).
    pub application_name: Cow<'static, CStr>,
    /// The application version.
    pub application_version: Version,
    /// The engine name.
    pub engine_name: Cow<'static, CStr>,
    /// The engine version.
    pub engine_version: Version,
}

impl Default for InstanceCreateInfo {
    fn default() -> Self {
        Self {
            flags: vk::InstanceCreateFlags::empty(),
            application_name: Cow::Borrowed(c"Unnamed Application"),
            application_version: Version::new(0, 1, 0, 0),
            engine_name: Cow::Borrowed(c"Unnamed Engine"),
            engine_version: Version::new(0, 1, 0, 0),
        }
    }
}

impl Instance {
    /// Creates a new instance builder backed by the process-wide loader.
    pub fn builder() -> Result<InstanceBuilder, ash::LoadingError> {
        Ok(InstanceBuilder::new(loader::acquire()?))
    }

    /// Returns the Vulkan entry point.
    pub fn entry(&self) -> &Arc<ash::Entry> {
        &self.0.entry
    }

    /// Returns the API version the instance was created with.
    pub fn api_version(&self) -> Version {
        self.0.api_version
    }

    /// Returns whether the named instance extension was enabled at creation.
    pub fn supports_extension(&self, name: &CStr) -> bool {
        self.0.enabled_extensions.contains(name)
    }

    /// Returns whether the named layer was enabled at creation.
    pub fn supports_layer(&self, name: &CStr) -> bool {
        self.0.enabled_layers.contains(name)
    }
}

impl Deref for Instance {
    type Target = ash::Instance;

    fn deref(&self) -> &Self::Target {
        &self.0.instance
    }
}

impl Drop for InstanceInner {
    fn drop(&mut self) {
        tracing::info!(instance = ?self.instance.handle(), "drop instance");
        // Safety: Host synchronization rule for vkDestroyInstance:
        // - Host access to instance must be externally synchronized.
        // - Host access to all VkPhysicalDevice objects enumerated from
        //   instance must be externally synchronized.
        // We have &mut self and therefore exclusive control on instance.
        // PhysicalDevice retains an Arc to Instance, so none can outlive us.
        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}

/// Properties of a Vulkan layer.
///
/// Returned by [`InstanceBuilder::enable_layer`] when a layer is successfully
/// enabled.
#[derive(Clone)]
pub struct LayerProperties {
    /// The Vulkan spec version the layer was written against.
    pub spec_version: Version,
    /// The layer's implementation version.
    pub implementation_version: Version,
    /// A human-readable description of the layer.
    pub description: String,
}

/// A builder for creating Vulkan instances.
///
/// The requested API version is clamped to what the loader supports; it
/// starts out at the loader's maximum.
pub struct InstanceBuilder {
    entry: Arc<ash::Entry>,
    max_api_version: Version,
    api_version: Version,

    available_extensions: BTreeMap<CString, Version>,
    available_layers: BTreeMap<CString, LayerProperties>,
    enabled_extensions: BTreeSet<CString>,
    enabled_layers: BTreeSet<CString>,

    /// Instance creation configuration. Modify this to set application
    /// metadata.
    pub info: InstanceCreateInfo,
}

impl InstanceBuilder {
    /// Creates a new instance builder with the given entry point.
    ///
    /// Enumerates available extensions and layers from the Vulkan loader.
    pub fn new(entry: Arc<ash::Entry>) -> Self {
        let max_api_version = unsafe { entry.try_enumerate_instance_version() }
            .unwrap()
            .map(Version)
            .unwrap_or(Version::V1_0);
        let available_extensions = unsafe { entry.enumerate_instance_extension_properties(None) }
            .unwrap()
            .into_iter()
            .map(|ext| {
                let name = ext.extension_name_as_c_str().unwrap();
                (name.to_owned(), Version(ext.spec_version))
            })
            .collect::<BTreeMap<CString, Version>>();
        let available_layers = unsafe { entry.enumerate_instance_layer_properties() }
            .unwrap()
            .into_iter()
            .map(|layer| {
                let name = layer.layer_name_as_c_str().unwrap();
                (
                    name.to_owned(),
                    LayerProperties {
                        implementation_version: Version(layer.implementation_version),
                        spec_version: Version(layer.spec_version),
                        description: layer
                            .description_as_c_str()
                            .unwrap()
                            .to_str()
                            .unwrap()
                            .to_string(),
                    },
                )
            })
            .collect::<BTreeMap<CString, LayerProperties>>();
        Self {
            entry,
            max_api_version,
            api_version: max_api_version,
            available_extensions,
            available_layers,
            enabled_extensions: BTreeSet::new(),
            enabled_layers: BTreeSet::new(),
            info: InstanceCreateInfo::default(),
        }
    }

    /// Requests an API version, clamped to the loader's maximum.
    pub fn set_api_version(&mut self, version: Version) -> &mut Self {
        self.api_version = version.min(self.max_api_version);
        self
    }

    /// Returns the API version the instance will be created with.
    pub fn api_version(&self) -> Version {
        self.api_version
    }

    /// Returns the highest API version the loader supports.
    pub fn max_api_version(&self) -> Version {
        self.max_api_version
    }

    /// Enables an instance extension by name.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the extension is available, `Err(MissingFeatureError)`
    /// otherwise.
    pub fn enable_extension(&mut self, name: &CStr) -> Result<(), MissingFeatureError> {
        if self.available_extensions.contains_key(name) {
            self.enabled_extensions.insert(name.to_owned());
            Ok(())
        } else {
            Err(MissingFeatureError::InstanceExtension(name.to_owned()))
        }
    }

    /// Enables a Vulkan layer by name.
    ///
    /// Layers intercept Vulkan calls for debugging, validation, or profiling.
    /// Any additional extensions the layer provides become available for
    /// enabling.
    pub fn enable_layer(&mut self, name: &CStr) -> Result<LayerProperties, MissingFeatureError> {
        let Some(properties) = self.available_layers.get(name).cloned() else {
            return Err(MissingFeatureError::Layer(name.to_owned()));
        };
        self.enabled_layers.insert(name.to_owned());

        let additional_extensions = unsafe {
            self.entry
                .enumerate_instance_extension_properties(Some(name))
                .unwrap()
        };
        self.available_extensions
            .extend(additional_extensions.into_iter().map(|ext| {
                (
                    ext.extension_name_as_c_str().unwrap().to_owned(),
                    Version(ext.spec_version),
                )
            }));

        Ok(properties)
    }

    /// Builds the Vulkan instance with the current configuration.
    pub fn build(self) -> VkResult<Instance> {
        let application_info = vk::ApplicationInfo {
            p_application_name: self.info.application_name.as_ptr(),
            application_version: self.info.application_version.0,
            p_engine_name: self.info.engine_name.as_ptr(),
            engine_version: self.info.engine_version.0,
            api_version: self.api_version.0,
            ..Default::default()
        };

        let enabled_extension_names = self
            .enabled_extensions
            .iter()
            .map(|name| name.as_ptr())
            .collect::<Vec<_>>();
        let enabled_layer_names = self
            .enabled_layers
            .iter()
            .map(|name| name.as_ptr())
            .collect::<Vec<*const c_char>>();
        let create_info = vk::InstanceCreateInfo {
            p_application_info: &application_info,
            enabled_layer_count: enabled_layer_names.len() as u32,
            pp_enabled_layer_names: enabled_layer_names.as_ptr(),
            enabled_extension_count: enabled_extension_names.len() as u32,
            pp_enabled_extension_names: enabled_extension_names.as_ptr(),
            flags: self.info.flags,
            ..Default::default()
        };
        // Safety: No host synchronization rules for vkCreateInstance.
        let instance = unsafe { self.entry.create_instance(&create_info, None)? };
        Ok(Instance(Arc::new(InstanceInner {
            entry: self.entry,
            instance,
            api_version: self.api_version,
            enabled_extensions: self.enabled_extensions,
            enabled_layers: self.enabled_layers,
        })))
    }
}
