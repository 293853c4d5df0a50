//! Logical-device creation and physical-device selection.
//!
//! # Overview
//!
//! [`Device`] wraps `ash::Device` (it derefs to it) together with the queues,
//! extension loaders and cached limits the rest of the crate needs. Selection
//! requires Vulkan 1.3 plus the descriptor-indexing, timeline-semaphore,
//! buffer-device-address, dynamic-rendering and synchronization2 feature
//! bits; a device missing any of them is skipped. Discrete GPUs are
//! preferred over integrated ones.
//!
//! Queue policy: one graphics queue always; compute and transfer fall back to
//! the graphics family when no dedicated family exists.

use std::{ops::Deref, sync::Arc};

use ash::{ext, khr, vk};

use crate::{
    error::{Error, Result},
    instance::Instance,
};

/// Queue handle plus its family index.
#[derive(Debug, Clone, Copy)]
pub struct DeviceQueue {
    pub queue: vk::Queue,
    pub family_index: u32,
}

/// Limits the crate reads often, copied out of the property structs once.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceLimits {
    pub min_uniform_buffer_offset_alignment: u64,
    pub max_push_constants_size: u32,
    pub max_image_dimension_2d: u32,
    pub framebuffer_color_sample_counts: vk::SampleCountFlags,
    pub max_update_after_bind_sampled_images: u32,
    pub max_update_after_bind_samplers: u32,
    pub max_update_after_bind_storage_images: u32,
}

struct DeviceInner {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    graphics: DeviceQueue,
    compute: DeviceQueue,
    transfer: DeviceQueue,
    limits: DeviceLimits,
    swapchain_loader: khr::swapchain::Device,
    maintenance_loader: Option<ext::swapchain_maintenance1::Device>,
    // Held last so the instance outlives the device teardown above it.
    instance: Instance,
}

/// The logical device. Cheap to clone; derefs to [`ash::Device`].
#[derive(Clone)]
pub struct Device(Arc<DeviceInner>);

impl Deref for Device {
    type Target = ash::Device;

    fn deref(&self) -> &Self::Target {
        &self.0.device
    }
}

/// Access to the owning [`Device`] for types that hold one.
pub trait HasDevice {
    fn device(&self) -> &Device;
}

impl HasDevice for Device {
    fn device(&self) -> &Device {
        self
    }
}

struct Candidate {
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    supports_swapchain_maintenance: bool,
}

impl Device {
    /// Picks a physical device and creates the logical device and queues.
    pub fn new(instance: Instance, surface: vk::SurfaceKHR) -> Result<Self> {
        let candidate = select_physical_device(&instance)?;
        let physical_device = candidate.physical_device;
        let device_name = candidate
            .properties
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let graphics_family = families
            .iter()
            .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .ok_or_else(|| Error::Context("no graphics queue family".to_owned()))?
            as u32;
        // Present support is required on the graphics family; the crate does
        // not split present onto a second queue.
        if surface != vk::SurfaceKHR::null() {
            let supported = unsafe {
                instance.surface_loader().get_physical_device_surface_support(
                    physical_device,
                    graphics_family,
                    surface,
                )?
            };
            if !supported {
                return Err(Error::Context(
                    "graphics queue family cannot present to the surface".to_owned(),
                ));
            }
        }
        let compute_family = families
            .iter()
            .enumerate()
            .find(|(_, f)| {
                f.queue_flags.contains(vk::QueueFlags::COMPUTE)
                    && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            })
            .map(|(i, _)| i as u32)
            .unwrap_or(graphics_family);
        let transfer_family = families
            .iter()
            .enumerate()
            .find(|(_, f)| {
                f.queue_flags.contains(vk::QueueFlags::TRANSFER)
                    && !f
                        .queue_flags
                        .intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            })
            .map(|(i, _)| i as u32)
            .unwrap_or(compute_family);

        let mut unique_families = vec![graphics_family];
        for family in [compute_family, transfer_family] {
            if !unique_families.contains(&family) {
                unique_families.push(family);
            }
        }
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let mut extensions = vec![khr::swapchain::NAME.as_ptr()];
        if candidate.supports_swapchain_maintenance {
            extensions.push(ext::swapchain_maintenance1::NAME.as_ptr());
        }

        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);
        let mut features2 = vk::PhysicalDeviceFeatures2::default().features(features);
        let mut vk12 = vk::PhysicalDeviceVulkan12Features::default()
            .descriptor_indexing(true)
            .runtime_descriptor_array(true)
            .shader_sampled_image_array_non_uniform_indexing(true)
            .shader_storage_image_array_non_uniform_indexing(true)
            .descriptor_binding_sampled_image_update_after_bind(true)
            .descriptor_binding_storage_image_update_after_bind(true)
            .descriptor_binding_update_unused_while_pending(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_variable_descriptor_count(true)
            .timeline_semaphore(true)
            .buffer_device_address(true);
        let mut vk13 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);
        let mut maintenance_features =
            vk::PhysicalDeviceSwapchainMaintenance1FeaturesEXT::default()
                .swapchain_maintenance1(true);

        let mut create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .push_next(&mut features2)
            .push_next(&mut vk12)
            .push_next(&mut vk13);
        if candidate.supports_swapchain_maintenance {
            create_info = create_info.push_next(&mut maintenance_features);
        }

        let device = unsafe { instance.create_device(physical_device, &create_info, None)? };

        let graphics = DeviceQueue {
            queue: unsafe { device.get_device_queue(graphics_family, 0) },
            family_index: graphics_family,
        };
        let compute = DeviceQueue {
            queue: unsafe { device.get_device_queue(compute_family, 0) },
            family_index: compute_family,
        };
        let transfer = DeviceQueue {
            queue: unsafe { device.get_device_queue(transfer_family, 0) },
            family_index: transfer_family,
        };

        let limits = query_limits(&instance, physical_device);
        let swapchain_loader = khr::swapchain::Device::new(&instance, &device);
        let maintenance_loader = candidate
            .supports_swapchain_maintenance
            .then(|| ext::swapchain_maintenance1::Device::new(&instance, &device));

        tracing::info!(
            device = %device_name,
            graphics_family,
            compute_family,
            transfer_family,
            swapchain_maintenance = candidate.supports_swapchain_maintenance,
            "created logical device"
        );

        Ok(Self(Arc::new(DeviceInner {
            device,
            physical_device,
            graphics,
            compute,
            transfer,
            limits,
            swapchain_loader,
            maintenance_loader,
            instance,
        })))
    }

    pub fn instance(&self) -> &Instance {
        &self.0.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.0.physical_device
    }

    pub fn raw(&self) -> &ash::Device {
        &self.0.device
    }

    pub fn graphics_queue(&self) -> DeviceQueue {
        self.0.graphics
    }

    pub fn compute_queue(&self) -> DeviceQueue {
        self.0.compute
    }

    pub fn transfer_queue(&self) -> DeviceQueue {
        self.0.transfer
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.0.limits
    }

    pub fn swapchain_loader(&self) -> &khr::swapchain::Device {
        &self.0.swapchain_loader
    }

    pub fn swapchain_maintenance_loader(&self) -> Option<&ext::swapchain_maintenance1::Device> {
        self.0.maintenance_loader.as_ref()
    }

    /// Whether images of `format` can be linearly filtered by `vkCmdBlitImage2`,
    /// which the mip-chain generator requires.
    pub fn supports_linear_blit(&self, format: vk::Format) -> bool {
        let props = unsafe {
            self.instance()
                .get_physical_device_format_properties(self.0.physical_device, format)
        };
        props.optimal_tiling_features.contains(
            vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
                | vk::FormatFeatureFlags::BLIT_SRC
                | vk::FormatFeatureFlags::BLIT_DST,
        )
    }

    /// Whether `format` supports storage-image use under optimal tiling.
    pub fn supports_storage(&self, format: vk::Format) -> bool {
        let props = unsafe {
            self.instance()
                .get_physical_device_format_properties(self.0.physical_device, format)
        };
        props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::STORAGE_IMAGE)
    }

    /// Clamps a requested sample count to what the device can attach.
    pub fn clamp_sample_count(&self, requested: u32) -> vk::SampleCountFlags {
        let supported = self.0.limits.framebuffer_color_sample_counts;
        let mut count = requested.max(1).next_power_of_two().min(64);
        loop {
            let flags = vk::SampleCountFlags::from_raw(count);
            if count == 1 || supported.contains(flags) {
                return flags;
            }
            count /= 2;
        }
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

fn query_limits(instance: &Instance, physical_device: vk::PhysicalDevice) -> DeviceLimits {
    let mut indexing = vk::PhysicalDeviceDescriptorIndexingProperties::default();
    let mut props2 = vk::PhysicalDeviceProperties2::default().push_next(&mut indexing);
    unsafe { instance.get_physical_device_properties2(physical_device, &mut props2) };
    let limits = props2.properties.limits;
    DeviceLimits {
        min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
        max_push_constants_size: limits.max_push_constants_size,
        max_image_dimension_2d: limits.max_image_dimension2_d,
        framebuffer_color_sample_counts: limits.framebuffer_color_sample_counts,
        max_update_after_bind_sampled_images: indexing
            .max_descriptor_set_update_after_bind_sampled_images,
        max_update_after_bind_samplers: indexing.max_descriptor_set_update_after_bind_samplers,
        max_update_after_bind_storage_images: indexing
            .max_descriptor_set_update_after_bind_storage_images,
    }
}

fn select_physical_device(instance: &Instance) -> Result<Candidate> {
    let physical_devices = unsafe { instance.enumerate_physical_devices()? };
    let mut best: Option<Candidate> = None;
    for physical_device in physical_devices {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        if properties.api_version < vk::API_VERSION_1_3 {
            continue;
        }
        if !has_required_features(instance, physical_device) {
            continue;
        }
        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(physical_device)
                .unwrap_or_default()
        };
        let supports_swapchain = extensions
            .iter()
            .any(|e| e.extension_name_as_c_str() == Ok(khr::swapchain::NAME));
        if !supports_swapchain {
            continue;
        }
        let supports_swapchain_maintenance = instance.supports_surface_maintenance()
            && extensions
                .iter()
                .any(|e| e.extension_name_as_c_str() == Ok(ext::swapchain_maintenance1::NAME));

        let candidate = Candidate {
            physical_device,
            properties,
            supports_swapchain_maintenance,
        };
        let replace = match &best {
            None => true,
            Some(current) => {
                current.properties.device_type != vk::PhysicalDeviceType::DISCRETE_GPU
                    && properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
            }
        };
        if replace {
            best = Some(candidate);
        }
    }
    best.ok_or_else(|| {
        Error::Context("no physical device with Vulkan 1.3 and bindless support".to_owned())
    })
}

fn has_required_features(instance: &Instance, physical_device: vk::PhysicalDevice) -> bool {
    let mut vk12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut vk13 = vk::PhysicalDeviceVulkan13Features::default();
    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut vk12)
        .push_next(&mut vk13);
    unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };

    let wanted_vk12 = [
        vk12.descriptor_indexing,
        vk12.runtime_descriptor_array,
        vk12.shader_sampled_image_array_non_uniform_indexing,
        vk12.descriptor_binding_sampled_image_update_after_bind,
        vk12.descriptor_binding_storage_image_update_after_bind,
        vk12.descriptor_binding_update_unused_while_pending,
        vk12.descriptor_binding_partially_bound,
        vk12.descriptor_binding_variable_descriptor_count,
        vk12.timeline_semaphore,
        vk12.buffer_device_address,
    ];
    let wanted_vk13 = [vk13.dynamic_rendering, vk13.synchronization2];
    wanted_vk12.into_iter().all(|f| f == vk::TRUE)
        && wanted_vk13.into_iter().all(|f| f == vk::TRUE)
}
