//! Graphics pipeline state and creation.
//!
//! Pipeline state is split into owned description values mirroring the
//! native create-info records: each desc owns its arrays and assembles the
//! transient `vk` view over them on demand. [`GraphicsPipelineBuilder`]
//! aggregates the descs plus layout and render pass, and creates the
//! [`GraphicsPipeline`] in a single call frame where every borrowed array
//! stays alive.
//!
//! # Key types
//!
//! - [`GraphicsPipeline`] / [`GraphicsPipelineBuilder`]: the pipeline itself
//! - [`PipelineLayout`] / [`PipelineLayoutBuilder`]: shader interface layout
//! - [`ShaderStageDesc`]: one shader stage with optional specialization
//! - [`SpecializationDesc`]: typed compile-time constants

use crate::{Device, HasDevice, shader::ShaderModule, utils::AsVkHandle};
use ash::{prelude::VkResult, vk};
use smallvec::SmallVec;
use std::ffi::{CString, c_void};

/// Specialization constants for one shader stage.
///
/// Entries describe where each constant lives inside the raw data block;
/// [`set_data`](Self::set_data) stores any `Copy` value as the block.
#[derive(Clone, Debug, Default)]
pub struct SpecializationDesc {
    pub entries: Vec<vk::SpecializationMapEntry>,
    data: Vec<u8>,
}

impl SpecializationDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&mut self, entry: vk::SpecializationMapEntry) -> &mut Self {
        self.entries.push(entry);
        self
    }

    /// Stores `value`'s bytes as the specialization data block.
    pub fn set_data<T: Copy + 'static>(&mut self, value: &T) -> &mut Self {
        self.data.clear();
        self.data.extend_from_slice(unsafe {
            std::slice::from_raw_parts(value as *const T as *const u8, std::mem::size_of::<T>())
        });
        self
    }

    /// Reads the data block back as a `T`, if the sizes match exactly.
    pub fn data<T: Copy + 'static>(&self) -> Option<T> {
        if self.data.len() != std::mem::size_of::<T>() {
            return None;
        }
        Some(unsafe { std::ptr::read_unaligned(self.data.as_ptr() as *const T) })
    }

    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    /// Assembles the native record borrowing this desc's storage.
    pub fn raw_info(&self) -> vk::SpecializationInfo<'_> {
        vk::SpecializationInfo {
            map_entry_count: self.entries.len() as u32,
            p_map_entries: self.entries.as_ptr(),
            data_size: self.data.len(),
            p_data: self.data.as_ptr() as *const c_void,
            ..Default::default()
        }
    }
}

/// One shader stage of a pipeline.
///
/// Holds the raw module handle; the [`ShaderModule`] it came from must
/// outlive pipeline creation.
#[derive(Clone, Debug)]
pub struct ShaderStageDesc {
    pub flags: vk::PipelineShaderStageCreateFlags,
    pub stage: vk::ShaderStageFlags,
    module: vk::ShaderModule,
    entry_point: CString,
    pub specialization: Option<SpecializationDesc>,
}

impl ShaderStageDesc {
    pub fn new(stage: vk::ShaderStageFlags, module: &ShaderModule) -> Self {
        Self {
            flags: vk::PipelineShaderStageCreateFlags::empty(),
            stage,
            module: module.vk_handle(),
            entry_point: c"main".to_owned(),
            specialization: None,
        }
    }

    pub fn set_entry_point(&mut self, name: CString) -> &mut Self {
        self.entry_point = name;
        self
    }

    pub fn entry_point(&self) -> &CString {
        &self.entry_point
    }

    pub fn module(&self) -> vk::ShaderModule {
        self.module
    }
}

/// Vertex input bindings, attributes, and per-instance divisors.
#[derive(Clone, Debug, Default)]
pub struct VertexInputStateDesc {
    pub flags: vk::PipelineVertexInputStateCreateFlags,
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
    pub divisors: Vec<vk::VertexInputBindingDivisorDescriptionEXT>,
}

impl VertexInputStateDesc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assembles the native record borrowing this desc's storage. The
    /// divisor record, when any divisors are set, is chained separately at
    /// pipeline build time.
    pub fn raw_info(&self) -> vk::PipelineVertexInputStateCreateInfo<'_> {
        vk::PipelineVertexInputStateCreateInfo {
            flags: self.flags,
            vertex_binding_description_count: self.bindings.len() as u32,
            p_vertex_binding_descriptions: self.bindings.as_ptr(),
            vertex_attribute_description_count: self.attributes.len() as u32,
            p_vertex_attribute_descriptions: self.attributes.as_ptr(),
            ..Default::default()
        }
    }

    /// Assembles the divisor extension record, or `None` when no divisors
    /// are set.
    pub fn divisor_info(&self) -> Option<vk::PipelineVertexInputDivisorStateCreateInfoEXT<'_>> {
        if self.divisors.is_empty() {
            return None;
        }
        Some(vk::PipelineVertexInputDivisorStateCreateInfoEXT {
            vertex_binding_divisor_count: self.divisors.len() as u32,
            p_vertex_binding_divisors: self.divisors.as_ptr(),
            ..Default::default()
        })
    }
}

/// Tessellation patch configuration.
#[derive(Clone, Debug, Default)]
pub struct TessellationStateDesc {
    pub flags: vk::PipelineTessellationStateCreateFlags,
    pub patch_control_points: u32,
    /// Chains a domain-origin record when set.
    pub domain_origin: Option<vk::TessellationDomainOrigin>,
}

/// Viewport and scissor configuration.
///
/// Leave the lists empty and mark the states dynamic to supply them at
/// record time.
#[derive(Clone, Debug, Default)]
pub struct ViewportStateDesc {
    pub flags: vk::PipelineViewportStateCreateFlags,
    pub viewports: Vec<vk::Viewport>,
    pub scissors: Vec<vk::Rect2D>,
}

/// Rasterizer configuration with the native defaults.
#[derive(Clone, Debug)]
pub struct RasterizationStateDesc {
    pub flags: vk::PipelineRasterizationStateCreateFlags,
    pub depth_clamp_enable: bool,
    pub rasterizer_discard_enable: bool,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_bias_enable: bool,
    pub depth_bias_constant_factor: f32,
    pub depth_bias_clamp: f32,
    pub depth_bias_slope_factor: f32,
    pub line_width: f32,
}

impl Default for RasterizationStateDesc {
    fn default() -> Self {
        Self {
            flags: vk::PipelineRasterizationStateCreateFlags::empty(),
            depth_clamp_enable: false,
            rasterizer_discard_enable: false,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_bias_enable: false,
            depth_bias_constant_factor: 0.0,
            depth_bias_clamp: 0.0,
            depth_bias_slope_factor: 0.0,
            line_width: 1.0,
        }
    }
}

impl RasterizationStateDesc {
    fn raw_info(&self) -> vk::PipelineRasterizationStateCreateInfo<'static> {
        vk::PipelineRasterizationStateCreateInfo {
            flags: self.flags,
            depth_clamp_enable: self.depth_clamp_enable.into(),
            rasterizer_discard_enable: self.rasterizer_discard_enable.into(),
            polygon_mode: self.polygon_mode,
            cull_mode: self.cull_mode,
            front_face: self.front_face,
            depth_bias_enable: self.depth_bias_enable.into(),
            depth_bias_constant_factor: self.depth_bias_constant_factor,
            depth_bias_clamp: self.depth_bias_clamp,
            depth_bias_slope_factor: self.depth_bias_slope_factor,
            line_width: self.line_width,
            ..Default::default()
        }
    }
}

/// Multisample configuration.
#[derive(Clone, Debug)]
pub struct MultisampleStateDesc {
    pub flags: vk::PipelineMultisampleStateCreateFlags,
    pub rasterization_samples: vk::SampleCountFlags,
    pub sample_shading_enable: bool,
    pub min_sample_shading: f32,
    pub sample_masks: Vec<vk::SampleMask>,
    pub alpha_to_coverage_enable: bool,
    pub alpha_to_one_enable: bool,
}

impl Default for MultisampleStateDesc {
    fn default() -> Self {
        Self {
            flags: vk::PipelineMultisampleStateCreateFlags::empty(),
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            sample_shading_enable: false,
            min_sample_shading: 0.0,
            sample_masks: Vec::new(),
            alpha_to_coverage_enable: false,
            alpha_to_one_enable: false,
        }
    }
}

impl MultisampleStateDesc {
    fn raw_info(&self) -> vk::PipelineMultisampleStateCreateInfo<'_> {
        vk::PipelineMultisampleStateCreateInfo {
            flags: self.flags,
            rasterization_samples: self.rasterization_samples,
            sample_shading_enable: self.sample_shading_enable.into(),
            min_sample_shading: self.min_sample_shading,
            p_sample_mask: if self.sample_masks.is_empty() {
                std::ptr::null()
            } else {
                self.sample_masks.as_ptr()
            },
            alpha_to_coverage_enable: self.alpha_to_coverage_enable.into(),
            alpha_to_one_enable: self.alpha_to_one_enable.into(),
            ..Default::default()
        }
    }
}

/// Color blend configuration, one attachment state per color attachment.
#[derive(Clone, Debug, Default)]
pub struct ColorBlendStateDesc {
    pub flags: vk::PipelineColorBlendStateCreateFlags,
    pub logic_op_enable: bool,
    pub logic_op: vk::LogicOp,
    pub attachments: Vec<vk::PipelineColorBlendAttachmentState>,
    pub blend_constants: [f32; 4],
}

impl ColorBlendStateDesc {
    fn raw_info(&self) -> vk::PipelineColorBlendStateCreateInfo<'_> {
        vk::PipelineColorBlendStateCreateInfo {
            flags: self.flags,
            logic_op_enable: self.logic_op_enable.into(),
            logic_op: self.logic_op,
            attachment_count: self.attachments.len() as u32,
            p_attachments: self.attachments.as_ptr(),
            blend_constants: self.blend_constants,
            ..Default::default()
        }
    }
}

/// Accumulated state for pipeline layout creation.
///
/// Holds raw descriptor set layout handles; their owners must outlive
/// layout creation.
#[derive(Clone, Debug, Default)]
pub struct PipelineLayoutBuilder {
    pub flags: vk::PipelineLayoutCreateFlags,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl PipelineLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(&self, device: &Device) -> VkResult<PipelineLayout> {
        PipelineLayout::new(device.clone(), self)
    }
}

/// The interface between a pipeline's shaders and its descriptor sets.
pub struct PipelineLayout {
    device: Device,
    layout: vk::PipelineLayout,
    push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl HasDevice for PipelineLayout {
    fn device(&self) -> &Device {
        &self.device
    }
}
impl AsVkHandle for PipelineLayout {
    type Handle = vk::PipelineLayout;

    fn vk_handle(&self) -> Self::Handle {
        self.layout
    }
}

impl PipelineLayout {
    pub fn builder() -> PipelineLayoutBuilder {
        PipelineLayoutBuilder::new()
    }

    pub fn new(device: Device, builder: &PipelineLayoutBuilder) -> VkResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo {
            flags: builder.flags,
            set_layout_count: builder.set_layouts.len() as u32,
            p_set_layouts: builder.set_layouts.as_ptr(),
            push_constant_range_count: builder.push_constant_ranges.len() as u32,
            p_push_constant_ranges: builder.push_constant_ranges.as_ptr(),
            ..Default::default()
        };
        let layout = unsafe { device.create_pipeline_layout(&create_info, None) }?;
        Ok(Self {
            device,
            layout,
            push_constant_ranges: builder.push_constant_ranges.clone(),
        })
    }

    pub fn push_constant_ranges(&self) -> &[vk::PushConstantRange] {
        &self.push_constant_ranges
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe { self.device.destroy_pipeline_layout(self.layout, None) }
    }
}

/// Accumulated state for graphics pipeline creation.
///
/// Stage, layout, and render pass handles are raw; their owners must
/// outlive [`build`](Self::build). States left `None` are omitted from the
/// create info, as the native API allows when the corresponding stage is
/// absent or the state is dynamic.
#[derive(Clone, Debug, Default)]
pub struct GraphicsPipelineBuilder {
    pub flags: vk::PipelineCreateFlags,
    pub stages: Vec<ShaderStageDesc>,
    pub vertex_input: Option<VertexInputStateDesc>,
    pub input_assembly: Option<vk::PipelineInputAssemblyStateCreateInfo<'static>>,
    pub tessellation: Option<TessellationStateDesc>,
    pub viewport: Option<ViewportStateDesc>,
    pub rasterization: Option<RasterizationStateDesc>,
    pub multisample: Option<MultisampleStateDesc>,
    pub depth_stencil: Option<vk::PipelineDepthStencilStateCreateInfo<'static>>,
    pub color_blend: Option<ColorBlendStateDesc>,
    pub dynamic_states: Vec<vk::DynamicState>,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    pub subpass: u32,
    base_pipeline: vk::Pipeline,
}

impl GraphicsPipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stage(&mut self, stage: ShaderStageDesc) -> &mut Self {
        self.stages.push(stage);
        self
    }

    pub fn set_layout(&mut self, layout: &PipelineLayout) -> &mut Self {
        self.layout = layout.vk_handle();
        self
    }

    pub fn set_render_pass(
        &mut self,
        render_pass: &crate::render_pass::RenderPass,
        subpass: u32,
    ) -> &mut Self {
        self.render_pass = render_pass.vk_handle();
        self.subpass = subpass;
        self
    }

    /// Derives from an existing pipeline; requires the DERIVATIVE flag.
    pub fn set_base_pipeline(&mut self, base: &GraphicsPipeline) -> &mut Self {
        self.base_pipeline = base.vk_handle();
        self
    }

    pub fn build(&self, device: &Device) -> VkResult<GraphicsPipeline> {
        GraphicsPipeline::new(device.clone(), self)
    }
}

/// A compiled graphics pipeline.
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl HasDevice for GraphicsPipeline {
    fn device(&self) -> &Device {
        &self.device
    }
}
impl AsVkHandle for GraphicsPipeline {
    type Handle = vk::Pipeline;

    fn vk_handle(&self) -> Self::Handle {
        self.pipeline
    }
}

impl GraphicsPipeline {
    pub fn builder() -> GraphicsPipelineBuilder {
        GraphicsPipelineBuilder::new()
    }

    pub fn new(device: Device, builder: &GraphicsPipelineBuilder) -> VkResult<Self> {
        // Every transient record below borrows desc storage owned by
        // `builder`, which outlives the create call.
        let specializations: Vec<Option<vk::SpecializationInfo>> = builder
            .stages
            .iter()
            .map(|stage| stage.specialization.as_ref().map(|desc| desc.raw_info()))
            .collect();
        let stages: SmallVec<[vk::PipelineShaderStageCreateInfo; 4]> = builder
            .stages
            .iter()
            .zip(&specializations)
            .map(|(stage, specialization)| vk::PipelineShaderStageCreateInfo {
                flags: stage.flags,
                stage: stage.stage,
                module: stage.module(),
                p_name: stage.entry_point().as_ptr(),
                p_specialization_info: specialization
                    .as_ref()
                    .map_or(std::ptr::null(), |info| info),
                ..Default::default()
            })
            .collect();

        let divisor_info = builder
            .vertex_input
            .as_ref()
            .and_then(|desc| desc.divisor_info());
        let vertex_input = builder.vertex_input.as_ref().map(|desc| {
            let mut info = desc.raw_info();
            if let Some(divisor) = divisor_info.as_ref() {
                info.p_next = divisor as *const _ as *const c_void;
            }
            info
        });

        let domain_origin = builder
            .tessellation
            .as_ref()
            .and_then(|desc| desc.domain_origin)
            .map(
                |origin| vk::PipelineTessellationDomainOriginStateCreateInfo {
                    domain_origin: origin,
                    ..Default::default()
                },
            );
        let tessellation = builder.tessellation.as_ref().map(|desc| {
            let mut info = vk::PipelineTessellationStateCreateInfo {
                flags: desc.flags,
                patch_control_points: desc.patch_control_points,
                ..Default::default()
            };
            if let Some(origin) = domain_origin.as_ref() {
                info.p_next = origin as *const _ as *const c_void;
            }
            info
        });

        let viewport = builder.viewport.as_ref().map(|desc| {
            vk::PipelineViewportStateCreateInfo {
                flags: desc.flags,
                viewport_count: desc.viewports.len() as u32,
                p_viewports: desc.viewports.as_ptr(),
                scissor_count: desc.scissors.len() as u32,
                p_scissors: desc.scissors.as_ptr(),
                ..Default::default()
            }
        });

        let rasterization = builder
            .rasterization
            .as_ref()
            .map(|desc| desc.raw_info());
        let multisample = builder.multisample.as_ref().map(|desc| desc.raw_info());
        let color_blend = builder.color_blend.as_ref().map(|desc| desc.raw_info());
        let dynamic_state = if builder.dynamic_states.is_empty() {
            None
        } else {
            Some(vk::PipelineDynamicStateCreateInfo {
                dynamic_state_count: builder.dynamic_states.len() as u32,
                p_dynamic_states: builder.dynamic_states.as_ptr(),
                ..Default::default()
            })
        };

        fn opt_ptr<T>(opt: &Option<T>) -> *const T {
            opt.as_ref().map_or(std::ptr::null(), |value| value)
        }

        let create_info = vk::GraphicsPipelineCreateInfo {
            flags: builder.flags,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: opt_ptr(&vertex_input),
            p_input_assembly_state: opt_ptr(&builder.input_assembly),
            p_tessellation_state: opt_ptr(&tessellation),
            p_viewport_state: opt_ptr(&viewport),
            p_rasterization_state: opt_ptr(&rasterization),
            p_multisample_state: opt_ptr(&multisample),
            p_depth_stencil_state: opt_ptr(&builder.depth_stencil),
            p_color_blend_state: opt_ptr(&color_blend),
            p_dynamic_state: opt_ptr(&dynamic_state),
            layout: builder.layout,
            render_pass: builder.render_pass,
            subpass: builder.subpass,
            base_pipeline_handle: builder.base_pipeline,
            base_pipeline_index: -1,
            ..Default::default()
        };
        let pipeline = unsafe {
            device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&create_info),
                None,
            )
        }
        .map_err(|(_, err)| err)?[0];

        Ok(Self {
            device,
            pipeline,
            layout: builder.layout,
        })
    }

    /// Returns the layout handle the pipeline was created with.
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe { self.device.destroy_pipeline(self.pipeline, None) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specialization_data_round_trips_by_size() {
        let mut desc = SpecializationDesc::new();
        desc.set_data(&42u64);
        assert_eq!(desc.data_size(), 8);
        assert_eq!(desc.data::<u64>(), Some(42));
        // Size mismatch refuses to reinterpret.
        assert_eq!(desc.data::<u32>(), None);

        desc.set_data(&[1.0f32, 2.0]);
        assert_eq!(desc.data::<[f32; 2]>(), Some([1.0, 2.0]));
    }

    #[test]
    fn specialization_raw_info_points_at_storage() {
        let mut desc = SpecializationDesc::new();
        desc.add_entry(vk::SpecializationMapEntry {
            constant_id: 0,
            offset: 0,
            size: 4,
        });
        desc.set_data(&16u32);
        let raw = desc.raw_info();
        assert_eq!(raw.map_entry_count, 1);
        assert_eq!(raw.data_size, 4);
        assert_eq!(raw.p_map_entries, desc.entries.as_ptr());
    }

    #[test]
    fn vertex_input_divisor_record_only_when_divisors_set() {
        let mut desc = VertexInputStateDesc::new();
        desc.bindings.push(vk::VertexInputBindingDescription {
            binding: 0,
            stride: 16,
            input_rate: vk::VertexInputRate::VERTEX,
        });
        assert!(desc.divisor_info().is_none());

        desc.divisors
            .push(vk::VertexInputBindingDivisorDescriptionEXT {
                binding: 0,
                divisor: 4,
            });
        let divisor = desc.divisor_info().unwrap();
        assert_eq!(divisor.vertex_binding_divisor_count, 1);

        let raw = desc.raw_info();
        assert_eq!(raw.vertex_binding_description_count, 1);
        assert_eq!(raw.vertex_attribute_description_count, 0);
    }

    #[test]
    fn rasterization_defaults_match_native_expectations() {
        let raw = RasterizationStateDesc::default().raw_info();
        assert_eq!(raw.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(raw.line_width, 1.0);
        assert_eq!(raw.rasterizer_discard_enable, vk::FALSE);
    }

    #[test]
    fn multisample_mask_pointer_null_when_unset() {
        let desc = MultisampleStateDesc::default();
        assert!(desc.raw_info().p_sample_mask.is_null());

        let masked = MultisampleStateDesc {
            sample_masks: vec![0xffff_ffff],
            ..Default::default()
        };
        assert!(!masked.raw_info().p_sample_mask.is_null());
    }
}
