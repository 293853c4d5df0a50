//! Buffer entities.
//!
//! A [`Buffer`] is a pooled record: the Vulkan handle, its VMA allocation,
//! size, usage and memory properties, plus the persistently mapped pointer
//! when the storage class is host-visible.
//!
//! # Memory access
//!
//! Host-visible buffers are persistently mapped at creation. Use
//! [`as_slice`](Buffer::as_slice) / [`as_slice_mut`](Buffer::as_slice_mut)
//! for CPU access and flush through the context for non-coherent memory.
//! The caller owns the discipline of not writing a range a submitted frame
//! still reads.

use ash::vk;

use crate::types::{BufferUsage, StorageClass};

/// A pooled buffer resource.
pub struct Buffer {
    pub(crate) buffer: vk::Buffer,
    pub(crate) allocation: Option<vk_mem::Allocation>,
    pub(crate) size: vk::DeviceSize,
    pub(crate) usage: BufferUsage,
    pub(crate) storage: StorageClass,
    pub(crate) memory_properties: vk::MemoryPropertyFlags,
    /// Set iff the backing memory is host-visible.
    pub(crate) mapped: *mut u8,
    pub(crate) device_address: vk::DeviceAddress,
    pub(crate) debug_name: String,
}

impl Default for Buffer {
    fn default() -> Self {
        Self {
            buffer: vk::Buffer::null(),
            allocation: None,
            size: 0,
            usage: BufferUsage::empty(),
            storage: StorageClass::DeviceLocal,
            memory_properties: vk::MemoryPropertyFlags::empty(),
            mapped: std::ptr::null_mut(),
            device_address: 0,
            debug_name: String::new(),
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.size)
            .field("usage", &self.usage)
            .field("storage", &self.storage)
            .field("debug_name", &self.debug_name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.buffer == other.buffer
    }
}

impl Buffer {
    pub fn raw(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn storage_class(&self) -> StorageClass {
        self.storage
    }

    /// Buffer device address, 0 unless created with
    /// [`BufferUsage::DEVICE_ADDRESS`].
    pub fn gpu_address(&self) -> vk::DeviceAddress {
        self.device_address
    }

    pub fn is_host_visible(&self) -> bool {
        !self.mapped.is_null()
    }

    pub fn is_coherent(&self) -> bool {
        self.memory_properties
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }

    /// Read view of the mapped memory, `None` for device-local buffers.
    pub fn as_slice(&self) -> Option<&[u8]> {
        if self.mapped.is_null() {
            return None;
        }
        Some(unsafe { std::slice::from_raw_parts(self.mapped, self.size as usize) })
    }

    /// Write view of the mapped memory, `None` for device-local buffers.
    pub fn as_slice_mut(&mut self) -> Option<&mut [u8]> {
        if self.mapped.is_null() {
            return None;
        }
        Some(unsafe { std::slice::from_raw_parts_mut(self.mapped, self.size as usize) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_buffer_is_not_mapped() {
        let buffer = Buffer::default();
        assert!(!buffer.is_host_visible());
        assert!(buffer.as_slice().is_none());
        assert_eq!(buffer.gpu_address(), 0);
    }
}
