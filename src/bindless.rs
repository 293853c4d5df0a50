//! The bindless descriptor manager.
//!
//! # Overview
//!
//! One process-wide descriptor set, indexed from every shader:
//!
//! - **Binding 0**: sampled images, one slot per texture-pool slot
//! - **Binding 1**: samplers, one slot per sampler-pool slot
//! - **Binding 2**: storage images, one slot per texture-pool slot
//! - **Binding 3**: combined image+samplers (optional, off by default)
//!
//! Every binding carries `UPDATE_AFTER_BIND`, `PARTIALLY_BOUND` and
//! `UPDATE_UNUSED_WHILE_PENDING`, so the set can be rewritten between frames
//! without rebuilding command buffers. Capacity grows by 1.5x whenever a pool
//! outgrows it; growth recreates the layout, pool and set and defers the old
//! ones to the deleter.
//!
//! # Rewrite protocol
//!
//! A rewrite happens at frame start whenever the dirty flag is set. The image
//! info arrays are planned by walking the pools in slot order, substituting
//! the dummy resources for holes, multisampled or capability-mismatched
//! slots, then written in a single `vkUpdateDescriptorSets` call after both
//! queues have gone idle. Shaders indexing an unpopulated slot therefore
//! read the dummy white texture, never garbage.

use ash::vk;

use crate::{
    deferred::DeferredDeleter,
    device::Device,
    error::{Error, Result},
    pool::Pool,
    sampler::Sampler,
    texture::Texture,
};

pub(crate) const BINDING_SAMPLED_IMAGES: u32 = 0;
pub(crate) const BINDING_SAMPLERS: u32 = 1;
pub(crate) const BINDING_STORAGE_IMAGES: u32 = 2;
pub(crate) const BINDING_COMBINED: u32 = 3;

const INITIAL_CAPACITY: u32 = 16;

/// Next capacity step: grows by 1.5x, always by at least one slot.
fn grown_capacity(current: u32, required: u32) -> u32 {
    let mut capacity = current.max(1);
    while capacity < required {
        capacity = (capacity * 3).div_ceil(2);
    }
    capacity
}

/// The planned contents of one full descriptor rewrite, kept separate from
/// the write call so it is comparable across rebuilds.
#[derive(Debug, PartialEq, Eq, Default)]
pub(crate) struct RewritePlan {
    pub sampled: Vec<vk::ImageView>,
    pub storage: Vec<vk::ImageView>,
    pub samplers: Vec<vk::Sampler>,
}

/// Walks the pools in slot order and picks, per slot, the view or sampler a
/// shader should see: the real resource when it qualifies, the dummy
/// otherwise.
pub(crate) fn plan_rewrite(
    textures: &Pool<Texture>,
    samplers: &Pool<Sampler>,
    dummy_view: vk::ImageView,
    dummy_storage_view: vk::ImageView,
    dummy_sampler: vk::Sampler,
) -> RewritePlan {
    let mut plan = RewritePlan::default();
    for slot in textures.iter() {
        let sampled = slot
            .filter(|t| t.is_sampled() && t.sample_count == vk::SampleCountFlags::TYPE_1)
            .map(|t| t.view)
            .filter(|&v| v != vk::ImageView::null())
            .unwrap_or(dummy_view);
        plan.sampled.push(sampled);

        let storage = slot
            .filter(|t| t.is_storage() && t.sample_count == vk::SampleCountFlags::TYPE_1)
            .map(|t| t.storage_view)
            .filter(|&v| v != vk::ImageView::null())
            .unwrap_or(dummy_storage_view);
        plan.storage.push(storage);
    }
    for slot in samplers.iter() {
        let sampler = slot
            .map(|s| s.sampler)
            .filter(|&s| s != vk::Sampler::null())
            .unwrap_or(dummy_sampler);
        plan.samplers.push(sampler);
    }
    plan
}

pub(crate) struct DescriptorManager {
    device: Device,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
    set: vk::DescriptorSet,
    texture_capacity: u32,
    sampler_capacity: u32,
    use_combined: bool,
    dirty: bool,
}

impl DescriptorManager {
    pub fn new(device: Device, use_combined: bool) -> Result<Self> {
        let (pool, layout, set) =
            build_descriptor_objects(&device, INITIAL_CAPACITY, INITIAL_CAPACITY, use_combined)?;
        Ok(Self {
            device,
            pool,
            layout,
            set,
            texture_capacity: INITIAL_CAPACITY,
            sampler_capacity: INITIAL_CAPACITY,
            use_combined,
            dirty: true,
        })
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Grows capacity to cover the pools' slot counts. Returns `true` when a
    /// growth happened (which also forces a rewrite). The retired pool and
    /// layout ride the deleter so in-flight frames keep their set alive.
    pub fn maybe_grow(
        &mut self,
        texture_slots: u32,
        sampler_slots: u32,
        deleter: &mut DeferredDeleter,
        frame: u64,
    ) -> Result<bool> {
        if texture_slots <= self.texture_capacity && sampler_slots <= self.sampler_capacity {
            return Ok(false);
        }
        let texture_capacity = grown_capacity(self.texture_capacity, texture_slots);
        let sampler_capacity = grown_capacity(self.sampler_capacity, sampler_slots);

        let limits = self.device.limits();
        let max_textures = limits
            .max_update_after_bind_sampled_images
            .min(limits.max_update_after_bind_storage_images);
        if texture_capacity > max_textures || sampler_capacity > limits.max_update_after_bind_samplers
        {
            return Err(Error::Context(format!(
                "descriptor capacity {texture_capacity}/{sampler_capacity} exceeds device limits"
            )));
        }

        tracing::info!(
            textures = texture_capacity,
            samplers = sampler_capacity,
            "growing bindless descriptor table"
        );
        let (pool, layout, set) = build_descriptor_objects(
            &self.device,
            texture_capacity,
            sampler_capacity,
            self.use_combined,
        )?;

        let old_pool = std::mem::replace(&mut self.pool, pool);
        let old_layout = std::mem::replace(&mut self.layout, layout);
        self.set = set;
        self.texture_capacity = texture_capacity;
        self.sampler_capacity = sampler_capacity;
        self.dirty = true;
        deleter.defer(frame, move |device, _| unsafe {
            device.destroy_descriptor_pool(old_pool, None);
            device.destroy_descriptor_set_layout(old_layout, None);
        });
        Ok(true)
    }

    /// Applies a planned rewrite in one `vkUpdateDescriptorSets` call.
    ///
    /// Waits both queues idle first; that is the documented safe point at
    /// which no in-flight submission can still read the set.
    pub fn apply_rewrite(&mut self, plan: &RewritePlan) -> Result<()> {
        unsafe {
            self.device
                .queue_wait_idle(self.device.graphics_queue().queue)?;
            if self.device.compute_queue().family_index
                != self.device.graphics_queue().family_index
            {
                self.device
                    .queue_wait_idle(self.device.compute_queue().queue)?;
            }
        }

        let sampled_infos: Vec<vk::DescriptorImageInfo> = plan
            .sampled
            .iter()
            .map(|&image_view| vk::DescriptorImageInfo {
                image_view,
                image_layout: vk::ImageLayout::GENERAL,
                ..Default::default()
            })
            .collect();
        let storage_infos: Vec<vk::DescriptorImageInfo> = plan
            .storage
            .iter()
            .map(|&image_view| vk::DescriptorImageInfo {
                image_view,
                image_layout: vk::ImageLayout::GENERAL,
                ..Default::default()
            })
            .collect();
        let sampler_infos: Vec<vk::DescriptorImageInfo> = plan
            .samplers
            .iter()
            .map(|&sampler| vk::DescriptorImageInfo {
                sampler,
                image_layout: vk::ImageLayout::UNDEFINED,
                ..Default::default()
            })
            .collect();

        let mut writes: Vec<vk::WriteDescriptorSet> = Vec::with_capacity(3);
        if !sampled_infos.is_empty() {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(BINDING_SAMPLED_IMAGES)
                    .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                    .image_info(&sampled_infos),
            );
        }
        if !sampler_infos.is_empty() {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(BINDING_SAMPLERS)
                    .descriptor_type(vk::DescriptorType::SAMPLER)
                    .image_info(&sampler_infos),
            );
        }
        if !storage_infos.is_empty() {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(BINDING_STORAGE_IMAGES)
                    .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                    .image_info(&storage_infos),
            );
        }
        if !writes.is_empty() {
            unsafe { self.device.update_descriptor_sets(&writes, &[]) };
        }
        tracing::debug!(
            sampled = sampled_infos.len(),
            samplers = sampler_infos.len(),
            storage = storage_infos.len(),
            "rewrote bindless descriptor set"
        );
        self.dirty = false;
        Ok(())
    }

    pub fn destroy(&mut self) {
        unsafe {
            if self.pool != vk::DescriptorPool::null() {
                self.device.destroy_descriptor_pool(self.pool, None);
                self.pool = vk::DescriptorPool::null();
            }
            if self.layout != vk::DescriptorSetLayout::null() {
                self.device.destroy_descriptor_set_layout(self.layout, None);
                self.layout = vk::DescriptorSetLayout::null();
            }
        }
    }
}

fn build_descriptor_objects(
    device: &Device,
    texture_capacity: u32,
    sampler_capacity: u32,
    use_combined: bool,
) -> Result<(vk::DescriptorPool, vk::DescriptorSetLayout, vk::DescriptorSet)> {
    let mut bindings = vec![
        vk::DescriptorSetLayoutBinding::default()
            .binding(BINDING_SAMPLED_IMAGES)
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .descriptor_count(texture_capacity)
            .stage_flags(vk::ShaderStageFlags::ALL),
        vk::DescriptorSetLayoutBinding::default()
            .binding(BINDING_SAMPLERS)
            .descriptor_type(vk::DescriptorType::SAMPLER)
            .descriptor_count(sampler_capacity)
            .stage_flags(vk::ShaderStageFlags::ALL),
        vk::DescriptorSetLayoutBinding::default()
            .binding(BINDING_STORAGE_IMAGES)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .descriptor_count(texture_capacity)
            .stage_flags(vk::ShaderStageFlags::ALL),
    ];
    if use_combined {
        bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(BINDING_COMBINED)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(texture_capacity)
                .stage_flags(vk::ShaderStageFlags::ALL),
        );
    }

    let binding_flags = vec![
        vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
            | vk::DescriptorBindingFlags::PARTIALLY_BOUND
            | vk::DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING;
        bindings.len()
    ];
    let mut flags_info =
        vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);
    let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
        .bindings(&bindings)
        .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
        .push_next(&mut flags_info);
    let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None)? };

    let mut pool_sizes = vec![
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLED_IMAGE,
            descriptor_count: texture_capacity,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLER,
            descriptor_count: sampler_capacity,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_IMAGE,
            descriptor_count: texture_capacity,
        },
    ];
    if use_combined {
        pool_sizes.push(vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: texture_capacity,
        });
    }
    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
        .max_sets(1)
        .pool_sizes(&pool_sizes);
    let pool = match unsafe { device.create_descriptor_pool(&pool_info, None) } {
        Ok(pool) => pool,
        Err(err) => {
            unsafe { device.destroy_descriptor_set_layout(layout, None) };
            return Err(err.into());
        }
    };

    let layouts = [layout];
    let alloc_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(&layouts);
    let set = match unsafe { device.allocate_descriptor_sets(&alloc_info) } {
        Ok(sets) => sets[0],
        Err(err) => {
            unsafe {
                device.destroy_descriptor_pool(pool, None);
                device.destroy_descriptor_set_layout(layout, None);
            }
            return Err(err.into());
        }
    };
    Ok((pool, layout, set))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Format, TextureUsage};
    use ash::vk::Handle as _;

    fn fake_texture(sampled: bool, storage: bool, view: u64, storage_view: u64) -> Texture {
        let mut usage = TextureUsage::empty();
        if sampled {
            usage |= TextureUsage::SAMPLED;
        }
        if storage {
            usage |= TextureUsage::STORAGE;
        }
        Texture {
            view: vk::ImageView::from_raw(view),
            storage_view: vk::ImageView::from_raw(storage_view),
            format: Format::Rgba8Unorm,
            usage,
            ..Default::default()
        }
    }

    #[test]
    fn growth_steps_by_half() {
        assert_eq!(grown_capacity(16, 17), 24);
        assert_eq!(grown_capacity(16, 16), 16);
        assert_eq!(grown_capacity(16, 25), 36);
        assert_eq!(grown_capacity(1, 2), 2);
    }

    #[test]
    fn rewrite_substitutes_dummy_for_holes_and_mismatches() {
        let dummy_view = vk::ImageView::from_raw(0xd);
        let dummy_storage = vk::ImageView::from_raw(0xe);
        let dummy_sampler = vk::Sampler::from_raw(0xf);

        let mut textures = Pool::new();
        let sampled_only = textures.create(fake_texture(true, false, 0x10, 0));
        let both = textures.create(fake_texture(true, true, 0x20, 0x21));
        let hole = textures.create(fake_texture(true, true, 0x30, 0x31));
        textures.destroy(hole).unwrap();

        let mut samplers = Pool::new();
        let _s = samplers.create(Sampler {
            sampler: vk::Sampler::from_raw(0x40),
            ..Default::default()
        });

        let plan = plan_rewrite(&textures, &samplers, dummy_view, dummy_storage, dummy_sampler);
        assert_eq!(
            plan.sampled,
            vec![
                vk::ImageView::from_raw(0x10),
                vk::ImageView::from_raw(0x20),
                dummy_view
            ]
        );
        assert_eq!(
            plan.storage,
            vec![dummy_storage, vk::ImageView::from_raw(0x21), dummy_storage]
        );
        assert_eq!(plan.samplers, vec![vk::Sampler::from_raw(0x40)]);
        let _ = (sampled_only, both);
    }

    #[test]
    fn rewrite_is_idempotent_without_pool_changes() {
        let dummy_view = vk::ImageView::from_raw(0xd);
        let dummy_storage = vk::ImageView::from_raw(0xe);
        let dummy_sampler = vk::Sampler::from_raw(0xf);

        let mut textures = Pool::new();
        textures.create(fake_texture(true, true, 0x10, 0x11));
        textures.create(fake_texture(false, false, 0x20, 0x21));
        let samplers: Pool<Sampler> = Pool::new();

        let first = plan_rewrite(&textures, &samplers, dummy_view, dummy_storage, dummy_sampler);
        let second = plan_rewrite(&textures, &samplers, dummy_view, dummy_storage, dummy_sampler);
        assert_eq!(first, second);
    }

    #[test]
    fn multisampled_textures_fall_back_to_dummy() {
        let dummy_view = vk::ImageView::from_raw(0xd);
        let mut textures = Pool::new();
        let mut ms = fake_texture(true, false, 0x10, 0);
        ms.sample_count = vk::SampleCountFlags::TYPE_4;
        textures.create(ms);
        let samplers: Pool<Sampler> = Pool::new();
        let plan = plan_rewrite(
            &textures,
            &samplers,
            dummy_view,
            vk::ImageView::from_raw(0xe),
            vk::Sampler::from_raw(0xf),
        );
        assert_eq!(plan.sampled, vec![dummy_view]);
    }
}
