//! Render pass creation.
//!
//! [`SubpassDesc`] owns the attachment reference lists for one subpass and
//! assembles the transient `vk::SubpassDescription` views over them;
//! [`RenderPassBuilder`] collects attachments, subpasses, and dependencies
//! and creates the [`RenderPass`] in one call. The created pass keeps its
//! descriptions so attachment usage can be looked up per subpass afterwards.

use crate::{Device, HasDevice, utils::AsVkHandle};
use ash::{prelude::VkResult, vk};
use smallvec::SmallVec;

/// Description of a single subpass.
///
/// Resolve attachments take effect only when resolve is enabled and one
/// resolve reference is given per color attachment, as the native API
/// requires.
#[derive(Clone, Debug)]
pub struct SubpassDesc {
    pub flags: vk::SubpassDescriptionFlags,
    pub pipeline_bind_point: vk::PipelineBindPoint,
    pub input_attachments: Vec<vk::AttachmentReference>,
    pub color_attachments: Vec<vk::AttachmentReference>,
    pub resolve_attachments: Vec<vk::AttachmentReference>,
    pub resolve_enable: bool,
    pub depth_stencil_attachment: Option<vk::AttachmentReference>,
    pub preserve_attachments: Vec<u32>,
}

impl Default for SubpassDesc {
    fn default() -> Self {
        Self {
            flags: vk::SubpassDescriptionFlags::empty(),
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            input_attachments: Vec::new(),
            color_attachments: Vec::new(),
            resolve_attachments: Vec::new(),
            resolve_enable: false,
            depth_stencil_attachment: None,
            preserve_attachments: Vec::new(),
        }
    }
}

impl SubpassDesc {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve_active(&self) -> bool {
        self.resolve_enable
            && !self.resolve_attachments.is_empty()
            && self.resolve_attachments.len() == self.color_attachments.len()
    }

    /// Assembles the native description borrowing this desc's lists.
    pub fn raw_description(&self) -> vk::SubpassDescription<'_> {
        vk::SubpassDescription {
            flags: self.flags,
            pipeline_bind_point: self.pipeline_bind_point,
            input_attachment_count: self.input_attachments.len() as u32,
            p_input_attachments: self.input_attachments.as_ptr(),
            color_attachment_count: self.color_attachments.len() as u32,
            p_color_attachments: self.color_attachments.as_ptr(),
            p_resolve_attachments: if self.resolve_active() {
                self.resolve_attachments.as_ptr()
            } else {
                std::ptr::null()
            },
            p_depth_stencil_attachment: self
                .depth_stencil_attachment
                .as_ref()
                .map_or(std::ptr::null(), |attachment| attachment),
            preserve_attachment_count: self.preserve_attachments.len() as u32,
            p_preserve_attachments: self.preserve_attachments.as_ptr(),
            ..Default::default()
        }
    }
}

/// Accumulated state for render pass creation.
#[derive(Clone, Debug, Default)]
pub struct RenderPassBuilder {
    pub flags: vk::RenderPassCreateFlags,
    pub attachments: Vec<vk::AttachmentDescription>,
    pub subpasses: Vec<SubpassDesc>,
    pub dependencies: Vec<vk::SubpassDependency>,
}

impl RenderPassBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_attachment(&mut self, attachment: vk::AttachmentDescription) -> &mut Self {
        self.attachments.push(attachment);
        self
    }

    pub fn add_subpass(&mut self, subpass: SubpassDesc) -> &mut Self {
        self.subpasses.push(subpass);
        self
    }

    pub fn add_dependency(&mut self, dependency: vk::SubpassDependency) -> &mut Self {
        self.dependencies.push(dependency);
        self
    }

    /// Resolves a subpass's attachment references against the attachment
    /// list.
    fn resolve_references(
        &self,
        references: &[vk::AttachmentReference],
    ) -> Vec<vk::AttachmentDescription> {
        references
            .iter()
            .filter_map(|reference| self.attachments.get(reference.attachment as usize))
            .copied()
            .collect()
    }

    /// Returns the attachment descriptions a subpass reads as input.
    pub fn input_attachments(&self, subpass: usize) -> Vec<vk::AttachmentDescription> {
        self.subpasses
            .get(subpass)
            .map(|desc| self.resolve_references(&desc.input_attachments))
            .unwrap_or_default()
    }

    /// Returns the attachment descriptions a subpass writes as color
    /// output.
    pub fn color_attachments(&self, subpass: usize) -> Vec<vk::AttachmentDescription> {
        self.subpasses
            .get(subpass)
            .map(|desc| self.resolve_references(&desc.color_attachments))
            .unwrap_or_default()
    }

    /// Returns the attachment descriptions a subpass resolves into, or an
    /// empty list when resolve is not active for it.
    pub fn resolve_attachments(&self, subpass: usize) -> Vec<vk::AttachmentDescription> {
        self.subpasses
            .get(subpass)
            .filter(|desc| desc.resolve_active())
            .map(|desc| self.resolve_references(&desc.resolve_attachments))
            .unwrap_or_default()
    }

    /// Returns the depth-stencil attachment description of a subpass, if it
    /// has one.
    pub fn depth_stencil_attachment(&self, subpass: usize) -> Option<vk::AttachmentDescription> {
        let reference = self.subpasses.get(subpass)?.depth_stencil_attachment?;
        self.attachments.get(reference.attachment as usize).copied()
    }

    pub fn build(&self, device: &Device) -> VkResult<RenderPass> {
        RenderPass::new(device.clone(), self)
    }
}

/// A Vulkan render pass.
///
/// Retains the descriptions it was created from.
pub struct RenderPass {
    device: Device,
    render_pass: vk::RenderPass,
    builder: RenderPassBuilder,
}

impl HasDevice for RenderPass {
    fn device(&self) -> &Device {
        &self.device
    }
}
impl AsVkHandle for RenderPass {
    type Handle = vk::RenderPass;

    fn vk_handle(&self) -> Self::Handle {
        self.render_pass
    }
}

impl RenderPass {
    pub fn builder() -> RenderPassBuilder {
        RenderPassBuilder::new()
    }

    pub fn new(device: Device, builder: &RenderPassBuilder) -> VkResult<Self> {
        let subpass_descriptions: SmallVec<[vk::SubpassDescription; 4]> = builder
            .subpasses
            .iter()
            .map(|subpass| subpass.raw_description())
            .collect();
        let create_info = vk::RenderPassCreateInfo {
            flags: builder.flags,
            attachment_count: builder.attachments.len() as u32,
            p_attachments: builder.attachments.as_ptr(),
            subpass_count: subpass_descriptions.len() as u32,
            p_subpasses: subpass_descriptions.as_ptr(),
            dependency_count: builder.dependencies.len() as u32,
            p_dependencies: builder.dependencies.as_ptr(),
            ..Default::default()
        };
        let render_pass = unsafe { device.create_render_pass(&create_info, None) }?;
        Ok(Self {
            device,
            render_pass,
            builder: builder.clone(),
        })
    }

    pub fn flags(&self) -> vk::RenderPassCreateFlags {
        self.builder.flags
    }

    pub fn attachments(&self) -> &[vk::AttachmentDescription] {
        &self.builder.attachments
    }

    pub fn subpasses(&self) -> &[SubpassDesc] {
        &self.builder.subpasses
    }

    pub fn dependencies(&self) -> &[vk::SubpassDependency] {
        &self.builder.dependencies
    }

    pub fn input_attachments(&self, subpass: usize) -> Vec<vk::AttachmentDescription> {
        self.builder.input_attachments(subpass)
    }

    pub fn color_attachments(&self, subpass: usize) -> Vec<vk::AttachmentDescription> {
        self.builder.color_attachments(subpass)
    }

    pub fn resolve_attachments(&self, subpass: usize) -> Vec<vk::AttachmentDescription> {
        self.builder.resolve_attachments(subpass)
    }

    pub fn depth_stencil_attachment(&self, subpass: usize) -> Option<vk::AttachmentDescription> {
        self.builder.depth_stencil_attachment(subpass)
    }

    /// Returns the subpass on the source side of a dependency.
    pub fn src_subpass(&self, dependency: usize) -> Option<&SubpassDesc> {
        let dependency = self.builder.dependencies.get(dependency)?;
        self.builder.subpasses.get(dependency.src_subpass as usize)
    }

    /// Returns the subpass on the destination side of a dependency.
    pub fn dst_subpass(&self, dependency: usize) -> Option<&SubpassDesc> {
        let dependency = self.builder.dependencies.get(dependency)?;
        self.builder.subpasses.get(dependency.dst_subpass as usize)
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.destroy_render_pass(self.render_pass, None) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
        vk::AttachmentDescription {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        }
    }

    fn reference(attachment: u32) -> vk::AttachmentReference {
        vk::AttachmentReference {
            attachment,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }
    }

    #[test]
    fn raw_description_counts_match_lists() {
        let subpass = SubpassDesc {
            input_attachments: vec![reference(0)],
            color_attachments: vec![reference(1), reference(2)],
            preserve_attachments: vec![3],
            ..Default::default()
        };
        let raw = subpass.raw_description();
        assert_eq!(raw.input_attachment_count, 1);
        assert_eq!(raw.color_attachment_count, 2);
        assert_eq!(raw.preserve_attachment_count, 1);
        assert_eq!(raw.p_input_attachments, subpass.input_attachments.as_ptr());
        assert_eq!(raw.p_color_attachments, subpass.color_attachments.as_ptr());
        assert!(raw.p_resolve_attachments.is_null());
        assert!(raw.p_depth_stencil_attachment.is_null());
    }

    #[test]
    fn resolve_requires_enable_and_matching_count() {
        let mut subpass = SubpassDesc {
            color_attachments: vec![reference(0), reference(1)],
            resolve_attachments: vec![reference(2)],
            resolve_enable: true,
            ..Default::default()
        };
        // Mismatched count: resolve list is ignored.
        assert!(subpass.raw_description().p_resolve_attachments.is_null());

        subpass.resolve_attachments.push(reference(3));
        assert_eq!(
            subpass.raw_description().p_resolve_attachments,
            subpass.resolve_attachments.as_ptr()
        );

        subpass.resolve_enable = false;
        assert!(subpass.raw_description().p_resolve_attachments.is_null());
    }

    #[test]
    fn depth_stencil_pointer_set_when_present() {
        let subpass = SubpassDesc {
            depth_stencil_attachment: Some(vk::AttachmentReference {
                attachment: 0,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }),
            ..Default::default()
        };
        let raw = subpass.raw_description();
        assert!(!raw.p_depth_stencil_attachment.is_null());
        assert_eq!(
            unsafe { (*raw.p_depth_stencil_attachment).layout },
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn builder_resolves_subpass_attachment_usage() {
        let mut builder = RenderPassBuilder::new();
        builder
            .add_attachment(color_attachment(vk::Format::B8G8R8A8_SRGB))
            .add_attachment(color_attachment(vk::Format::R16G16B16A16_SFLOAT))
            .add_subpass(SubpassDesc {
                color_attachments: vec![reference(1)],
                ..Default::default()
            });

        let colors = builder.color_attachments(0);
        assert_eq!(colors.len(), 1);
        assert_eq!(colors[0].format, vk::Format::R16G16B16A16_SFLOAT);
        assert!(builder.input_attachments(0).is_empty());
        assert!(builder.depth_stencil_attachment(0).is_none());
        // Out-of-range subpass index resolves to nothing.
        assert!(builder.color_attachments(7).is_empty());
    }
}
