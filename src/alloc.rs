//! GPU memory allocation.
//!
//! [`Allocator`] wraps the Vulkan Memory Allocator (VMA) library. It is the
//! external collaborator every buffer and image allocation goes through; the
//! crate never calls `vkAllocateMemory` itself.
//!
//! # Overview
//!
//! VMA sub-allocates resources out of large device-memory blocks and picks a
//! memory type matching each request, so the crate stays well under the
//! driver's allocation-count limit without tracking heaps itself.
//!
//! The allocator is created once per context with buffer-device-address
//! support enabled (the device feature is mandatory here).

use std::{ops::Deref, sync::Arc};

use ash::vk;

use crate::{
    device::{Device, HasDevice},
    error::{Error, Result},
};

/// A reference-counted VMA allocator. Derefs to [`vk_mem::Allocator`].
#[derive(Clone)]
pub struct Allocator(Arc<AllocatorInner>);

struct AllocatorInner {
    device: Device,
    inner: vk_mem::Allocator,
}

impl HasDevice for Allocator {
    fn device(&self) -> &Device {
        &self.0.device
    }
}

impl Allocator {
    pub fn new(device: Device) -> Result<Self> {
        let mut info = vk_mem::AllocatorCreateInfo::new(
            device.instance().raw(),
            device.raw(),
            device.physical_device(),
        );
        info.flags |= vk_mem::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS;
        let alloc = unsafe { vk_mem::Allocator::new(info) }
            .map_err(|err| Error::Allocation(format!("failed to create allocator: {err}")))?;
        Ok(Self(Arc::new(AllocatorInner {
            device,
            inner: alloc,
        })))
    }

    /// Memory-property flags of the type an allocation landed in.
    pub fn memory_properties_of(&self, allocation: &vk_mem::Allocation) -> vk::MemoryPropertyFlags {
        let info = self.0.inner.get_allocation_info(allocation);
        let props = unsafe {
            self.0
                .device
                .instance()
                .get_physical_device_memory_properties(self.0.device.physical_device())
        };
        props.memory_types[info.memory_type as usize].property_flags
    }
}

impl Deref for Allocator {
    type Target = vk_mem::Allocator;

    fn deref(&self) -> &Self::Target {
        &self.0.inner
    }
}
