//! Sampler entities.
//!
//! Samplers are immutable after creation and live in their own pool; slot 0
//! always holds the default linear-repeat sampler so shaders indexing an
//! unpopulated slot read defined state.

use ash::vk;

use crate::types::SamplerDescription;

/// A pooled sampler. The raw handle plus the description it was built from.
#[derive(Debug, Default)]
pub struct Sampler {
    pub(crate) sampler: vk::Sampler,
    pub(crate) description: Option<SamplerDescription>,
    pub(crate) debug_name: String,
}

impl PartialEq for Sampler {
    fn eq(&self, other: &Self) -> bool {
        self.sampler == other.sampler
    }
}

impl Sampler {
    pub fn raw(&self) -> vk::Sampler {
        self.sampler
    }

    pub fn description(&self) -> Option<&SamplerDescription> {
        self.description.as_ref()
    }
}

/// Maps the language-neutral description onto the Vulkan create info.
pub(crate) fn create_info(description: &SamplerDescription) -> vk::SamplerCreateInfo<'static> {
    let mut info = vk::SamplerCreateInfo {
        mag_filter: description.mag_filter.to_vk(),
        min_filter: description.min_filter.to_vk(),
        mipmap_mode: description.mipmap_mode.to_vk(),
        address_mode_u: description.wrap_u.to_vk(),
        address_mode_v: description.wrap_v.to_vk(),
        address_mode_w: description.wrap_w.to_vk(),
        min_lod: description.min_lod.to_f32(),
        max_lod: description.max_lod.to_f32(),
        border_color: description.border_color.to_vk(),
        ..Default::default()
    };
    if let Some(compare_op) = description.compare_op {
        info.compare_enable = vk::TRUE;
        info.compare_op = compare_op.to_vk();
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompareOp, FilterMode, OrderedLod, WrapMode};

    #[test]
    fn default_description_maps_to_linear_repeat() {
        let info = create_info(&SamplerDescription::default());
        assert_eq!(info.mag_filter, vk::Filter::LINEAR);
        assert_eq!(info.min_filter, vk::Filter::LINEAR);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::REPEAT);
        assert_eq!(info.compare_enable, vk::FALSE);
    }

    #[test]
    fn compare_op_enables_comparison() {
        let description = SamplerDescription {
            min_filter: FilterMode::Nearest,
            wrap_u: WrapMode::ClampToBorder,
            max_lod: OrderedLod::from_f32(1.0),
            compare_op: Some(CompareOp::LessOrEqual),
            ..Default::default()
        };
        let info = create_info(&description);
        assert_eq!(info.compare_enable, vk::TRUE);
        assert_eq!(info.compare_op, vk::CompareOp::LESS_OR_EQUAL);
        assert_eq!(info.max_lod, 1.0);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::CLAMP_TO_BORDER);
    }
}
