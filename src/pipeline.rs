//! Graphics and compute pipeline creation.
//!
//! Pipelines are built over dynamic rendering: attachment formats are baked
//! into the pipeline through `PipelineRenderingCreateInfo` instead of a
//! renderpass object. Every pipeline layout references the one bindless
//! descriptor set layout plus the shader module's reflected push-constant
//! range.
//!
//! # Specialization Constants
//!
//! Use [`SpecializationConstants`] to provide compile-time constants:
//!
//! ```
//! # use scoria::pipeline::SpecializationConstants;
//! let mut spec = SpecializationConstants::new();
//! spec.push(0, 16u32);      // constant_id 0 = 16
//! spec.push(1, true);       // constant_id 1 = true (converted to VkBool32)
//! ```
//!
//! The pipeline keeps the constant bytes it was created with, so the span
//! handed to Vulkan stays valid for the pipeline's whole lifetime.

use ash::vk;

use crate::{
    device::Device,
    error::{Error, Result},
    pool::Handle,
    shader::{ShaderModule, ShaderStage},
    types::{
        ColorAttachmentState, CullMode, Format, PolygonMode, StencilState, Topology, VertexInput,
        WindingMode, MAX_COLOR_ATTACHMENTS, MAX_VERTEX_ATTRIBUTES, MAX_VERTEX_BINDINGS,
    },
};

/// Owned specialization-constant storage.
///
/// Values are appended tightly packed; `bool` is widened to `VkBool32`.
#[derive(Debug, Default, Clone)]
pub struct SpecializationConstants {
    entries: Vec<vk::SpecializationMapEntry>,
    data: Vec<u8>,
}

impl SpecializationConstants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<T: Copy + 'static>(&mut self, constant_id: u32, value: T) {
        if std::any::TypeId::of::<T>() == std::any::TypeId::of::<bool>() {
            // Shader-side bools are 32 bits wide.
            let value: vk::Bool32 = unsafe { *(&value as *const T as *const bool) } as vk::Bool32;
            self.push(constant_id, value);
            return;
        }
        let offset = self.data.len() as u32;
        let bytes = unsafe {
            std::slice::from_raw_parts(&value as *const T as *const u8, std::mem::size_of::<T>())
        };
        self.data.extend_from_slice(bytes);
        self.entries.push(vk::SpecializationMapEntry {
            constant_id,
            offset,
            size: std::mem::size_of::<T>(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn raw_info(&self) -> vk::SpecializationInfo<'_> {
        vk::SpecializationInfo::default()
            .map_entries(&self.entries)
            .data(&self.data)
    }
}

/// State description for a graphics pipeline.
#[derive(Debug, Clone, Default)]
pub struct GraphicsPipelineDescription {
    pub topology: Topology,
    pub vertex_input: VertexInput,
    pub shader: Handle<ShaderModule>,
    pub specialization: SpecializationConstants,
    /// Up to 8 colour attachments, format + blend per slot.
    pub color_attachments: Vec<ColorAttachmentState>,
    pub depth_format: Format,
    pub stencil_format: Format,
    pub cull_mode: CullMode,
    pub winding: WindingMode,
    pub polygon_mode: PolygonMode,
    pub front_stencil: StencilState,
    pub back_stencil: StencilState,
    pub sample_count: u32,
    pub patch_control_points: u32,
    pub debug_name: String,
}

/// State description for a compute pipeline.
#[derive(Debug, Clone, Default)]
pub struct ComputePipelineDescription {
    pub shader: Handle<ShaderModule>,
    /// Kernel name for multi-kernel modules; empty selects the anonymous one.
    pub entry_name: String,
    pub specialization: SpecializationConstants,
    pub debug_name: String,
}

/// A pooled graphics pipeline.
#[derive(Debug, Default)]
pub struct GraphicsPipeline {
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) layout: vk::PipelineLayout,
    pub(crate) stages: vk::ShaderStageFlags,
    /// The constant bytes the pipeline was specialised with, kept owned.
    pub(crate) specialization: SpecializationConstants,
    pub(crate) debug_name: String,
}

impl GraphicsPipeline {
    pub fn raw(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn raw_layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn stage_flags(&self) -> vk::ShaderStageFlags {
        self.stages
    }
}

/// A pooled compute pipeline.
#[derive(Debug, Default)]
pub struct ComputePipeline {
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) layout: vk::PipelineLayout,
    pub(crate) specialization: SpecializationConstants,
    pub(crate) debug_name: String,
}

impl ComputePipeline {
    pub fn raw(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn raw_layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

/// Builds the shared pipeline layout: the bindless set layout repeated four
/// times (keeps set indices 0..3 valid on runtimes that reject sparse set
/// usage) plus the module's push-constant range.
pub(crate) fn create_pipeline_layout(
    device: &Device,
    set_layout: vk::DescriptorSetLayout,
    push_constant_size: u32,
    push_constant_stages: vk::ShaderStageFlags,
) -> Result<vk::PipelineLayout> {
    let set_layouts = [set_layout; 4];
    let alignment = device.limits().min_uniform_buffer_offset_alignment.max(4) as u32;
    let size = push_constant_size.div_ceil(alignment) * alignment;
    let range = vk::PushConstantRange {
        stage_flags: push_constant_stages,
        offset: 0,
        size,
    };
    let ranges = [range];
    let mut info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
    if push_constant_size > 0 {
        info = info.push_constant_ranges(&ranges);
    }
    Ok(unsafe { device.create_pipeline_layout(&info, None)? })
}

/// Builds a graphics pipeline with dynamic rendering and the crate's fixed
/// set of dynamic states.
pub(crate) fn build_graphics_pipeline(
    device: &Device,
    set_layout: vk::DescriptorSetLayout,
    module: &ShaderModule,
    description: &GraphicsPipelineDescription,
) -> Result<GraphicsPipeline> {
    if description.color_attachments.len() > MAX_COLOR_ATTACHMENTS {
        return Err(Error::Context(format!(
            "too many colour attachments: {}",
            description.color_attachments.len()
        )));
    }
    if description.vertex_input.attributes.len() > MAX_VERTEX_ATTRIBUTES
        || description.vertex_input.bindings.len() > MAX_VERTEX_BINDINGS
    {
        return Err(Error::Context("vertex input too large".to_owned()));
    }

    let push = module.push_constants();
    let layout = create_pipeline_layout(device, set_layout, push.size, push.stages)?;

    let spec_info = description.specialization.raw_info();
    let mut stages: Vec<vk::PipelineShaderStageCreateInfo> = Vec::new();
    for stage_module in &module.stages {
        if stage_module.stage == ShaderStage::Compute {
            continue;
        }
        let mut stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(stage_module.stage.to_vk())
            .module(stage_module.module)
            .name(c"main");
        if !description.specialization.is_empty() {
            stage_info = stage_info.specialization_info(&spec_info);
        }
        stages.push(stage_info);
    }
    if stages.is_empty() {
        unsafe { device.destroy_pipeline_layout(layout, None) };
        return Err(Error::Context(
            "shader module has no graphics stages".to_owned(),
        ));
    }

    let attributes: Vec<vk::VertexInputAttributeDescription> = description
        .vertex_input
        .attributes
        .iter()
        .map(|a| vk::VertexInputAttributeDescription {
            location: a.location,
            binding: a.binding,
            format: a.format.to_vk(),
            offset: a.offset,
        })
        .collect();
    let bindings: Vec<vk::VertexInputBindingDescription> = description
        .vertex_input
        .bindings
        .iter()
        .map(|b| vk::VertexInputBindingDescription {
            binding: b.binding,
            stride: b.stride,
            input_rate: b.rate.to_vk(),
        })
        .collect();
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_attribute_descriptions(&attributes)
        .vertex_binding_descriptions(&bindings);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(description.topology.to_vk());
    let tessellation = vk::PipelineTessellationStateCreateInfo::default()
        .patch_control_points(description.patch_control_points);
    // Counts only; the rects themselves are dynamic.
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(description.polygon_mode.to_vk())
        .cull_mode(description.cull_mode.to_vk())
        .front_face(description.winding.to_vk())
        .line_width(1.0);
    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(device.clamp_sample_count(description.sample_count.max(1)));

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .stencil_test_enable(
            description.front_stencil.enabled || description.back_stencil.enabled,
        )
        .front(description.front_stencil.to_vk())
        .back(description.back_stencil.to_vk());

    let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = description
        .color_attachments
        .iter()
        .map(|a| vk::PipelineColorBlendAttachmentState {
            blend_enable: a.blend_enabled as vk::Bool32,
            src_color_blend_factor: a.src_color_blend_factor.to_vk(),
            dst_color_blend_factor: a.dst_color_blend_factor.to_vk(),
            color_blend_op: a.color_blend_op.to_vk(),
            src_alpha_blend_factor: a.src_alpha_blend_factor.to_vk(),
            dst_alpha_blend_factor: a.dst_alpha_blend_factor.to_vk(),
            alpha_blend_op: a.alpha_blend_op.to_vk(),
            color_write_mask: vk::ColorComponentFlags::RGBA,
        })
        .collect();
    let blend_state =
        vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let dynamic_states = [
        vk::DynamicState::VIEWPORT,
        vk::DynamicState::SCISSOR,
        vk::DynamicState::DEPTH_BIAS,
        vk::DynamicState::DEPTH_BIAS_ENABLE,
        vk::DynamicState::BLEND_CONSTANTS,
        vk::DynamicState::DEPTH_TEST_ENABLE,
        vk::DynamicState::DEPTH_WRITE_ENABLE,
        vk::DynamicState::DEPTH_COMPARE_OP,
    ];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let color_formats: Vec<vk::Format> = description
        .color_attachments
        .iter()
        .map(|a| a.format.to_vk())
        .collect();
    let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&color_formats)
        .depth_attachment_format(description.depth_format.to_vk())
        .stencil_attachment_format(description.stencil_format.to_vk());

    let create_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly)
        .tessellation_state(&tessellation)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .push_next(&mut rendering_info);

    let pipeline = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
    }
    .map_err(|(_, err)| {
        unsafe { device.destroy_pipeline_layout(layout, None) };
        Error::from(err)
    })?[0];

    tracing::debug!(name = %description.debug_name, "created graphics pipeline");
    Ok(GraphicsPipeline {
        pipeline,
        layout,
        stages: module.stage_flags(),
        specialization: description.specialization.clone(),
        debug_name: description.debug_name.clone(),
    })
}

/// Builds a compute pipeline from one kernel of a shader module.
pub(crate) fn build_compute_pipeline(
    device: &Device,
    set_layout: vk::DescriptorSetLayout,
    module: &ShaderModule,
    description: &ComputePipelineDescription,
) -> Result<ComputePipeline> {
    let stage_module = module
        .stage(ShaderStage::Compute, &description.entry_name)
        .ok_or_else(|| {
            Error::Context(format!(
                "no compute kernel named {:?} in module",
                description.entry_name
            ))
        })?;

    let push = module.push_constants();
    let layout = create_pipeline_layout(device, set_layout, push.size, push.stages)?;

    let spec_info = description.specialization.raw_info();
    let mut stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(stage_module.module)
        .name(c"main");
    if !description.specialization.is_empty() {
        stage = stage.specialization_info(&spec_info);
    }

    let create_info = vk::ComputePipelineCreateInfo::default()
        .stage(stage)
        .layout(layout);
    let pipeline = unsafe {
        device.create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
    }
    .map_err(|(_, err)| {
        unsafe { device.destroy_pipeline_layout(layout, None) };
        Error::from(err)
    })?[0];

    tracing::debug!(name = %description.debug_name, "created compute pipeline");
    Ok(ComputePipeline {
        pipeline,
        layout,
        specialization: description.specialization.clone(),
        debug_name: description.debug_name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specialization_constants_pack_tightly() {
        let mut spec = SpecializationConstants::new();
        spec.push(0, 16u32);
        spec.push(1, 2.5f32);
        spec.push(7, true);

        let info = spec.raw_info();
        assert_eq!(info.map_entry_count, 3);
        assert_eq!(info.data_size, 12);
        assert_eq!(spec.entries[0].offset, 0);
        assert_eq!(spec.entries[1].offset, 4);
        assert_eq!(spec.entries[2].offset, 8);
        // bool widened to VkBool32
        assert_eq!(spec.entries[2].size, 4);
        assert_eq!(&spec.data[8..12], &1u32.to_ne_bytes());
    }

    #[test]
    fn empty_specialization_reports_empty() {
        assert!(SpecializationConstants::new().is_empty());
    }
}
