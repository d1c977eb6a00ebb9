use ash::vk;
use std::{fmt::Debug, ops::Deref};

/// Queue sharing configuration for buffers and images.
///
/// Resources used by queues from a single family are `Exclusive`; resources
/// shared between families are `Concurrent` and must list every family that
/// will access them.
#[derive(Debug, Clone)]
pub enum SharingMode<T>
where
    T: Deref<Target = [u32]>,
{
    Exclusive,
    Concurrent { queue_family_indices: T },
}

impl<T: Deref<Target = [u32]>> SharingMode<T> {
    pub fn as_raw(&self) -> vk::SharingMode {
        match self {
            Self::Exclusive => vk::SharingMode::EXCLUSIVE,
            Self::Concurrent { .. } => vk::SharingMode::CONCURRENT,
        }
    }

    pub fn queue_family_indices(&self) -> &[u32] {
        match self {
            Self::Exclusive => &[],
            Self::Concurrent {
                queue_family_indices,
            } => queue_family_indices.deref(),
        }
    }

    /// Infers the sharing mode from a queue family index list: an empty list
    /// means exclusive ownership.
    pub fn from_queue_family_indices(queue_family_indices: T) -> Self {
        if queue_family_indices.is_empty() {
            Self::Exclusive
        } else {
            Self::Concurrent {
                queue_family_indices,
            }
        }
    }
}

/// Trait for types wrapping a raw Vulkan handle.
pub trait AsVkHandle {
    type Handle: ash::vk::Handle + Copy;
    fn vk_handle(&self) -> Self::Handle;
}
impl<T> AsVkHandle for &'_ T
where
    T: AsVkHandle,
{
    type Handle = T::Handle;

    fn vk_handle(&self) -> Self::Handle {
        T::vk_handle(self)
    }
}
impl<T> AsVkHandle for &'_ mut T
where
    T: AsVkHandle,
{
    type Handle = T::Handle;

    fn vk_handle(&self) -> Self::Handle {
        T::vk_handle(self)
    }
}

/// A packed Vulkan version number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(pub u32);
impl Version {
    pub const V1_0: Self = Self::new(0, 1, 0, 0);
    pub const V1_1: Self = Self::new(0, 1, 1, 0);
    pub const V1_2: Self = Self::new(0, 1, 2, 0);
    pub const V1_3: Self = Self::new(0, 1, 3, 0);
    pub const V1_4: Self = Self::new(0, 1, 4, 0);

    pub const fn new(variant: u32, major: u32, minor: u32, patch: u32) -> Self {
        let num = vk::make_api_version(variant, major, minor, patch);
        Self(num)
    }
    pub const fn major(&self) -> u32 {
        vk::api_version_major(self.0)
    }
    pub const fn minor(&self) -> u32 {
        vk::api_version_minor(self.0)
    }
    pub const fn patch(&self) -> u32 {
        vk::api_version_patch(self.0)
    }
    pub const fn variant(&self) -> u32 {
        vk::api_version_variant(self.0)
    }
    pub const fn as_raw(&self) -> u32 {
        self.0
    }
}
impl Default for Version {
    fn default() -> Self {
        Self::new(0, 0, 1, 0)
    }
}
impl Debug for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "Version({}.{}.{})",
            self.major(),
            self.minor(),
            self.patch()
        ))?;
        let variant = self.variant();
        if variant != 0 {
            f.write_fmt(format_args!(" variant {variant}"))?;
        }
        Ok(())
    }
}
impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "{}.{}.{}",
            self.major(),
            self.minor(),
            self.patch()
        ))?;
        let variant = self.variant();
        if variant != 0 {
            f.write_fmt(format_args!(" variant {variant}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering_follows_packed_encoding() {
        assert!(Version::V1_0 < Version::V1_1);
        assert!(Version::V1_2 < Version::V1_3);
        assert!(Version::new(0, 1, 2, 131) < Version::new(0, 1, 3, 0));
        assert_eq!(Version::V1_2.major(), 1);
        assert_eq!(Version::V1_2.minor(), 2);
    }

    #[test]
    fn version_display_omits_zero_variant() {
        assert_eq!(Version::V1_3.to_string(), "1.3.0");
        assert_eq!(Version::new(1, 1, 2, 7).to_string(), "1.2.7 variant 1");
    }

    #[test]
    fn sharing_mode_inferred_from_index_list() {
        let exclusive = SharingMode::from_queue_family_indices(Vec::new());
        assert_eq!(exclusive.as_raw(), vk::SharingMode::EXCLUSIVE);
        assert!(exclusive.queue_family_indices().is_empty());

        let concurrent = SharingMode::from_queue_family_indices(vec![0, 2]);
        assert_eq!(concurrent.as_raw(), vk::SharingMode::CONCURRENT);
        assert_eq!(concurrent.queue_family_indices(), &[0, 2]);
    }
}
