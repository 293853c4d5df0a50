//! Texture entities and the upload / mip-generation path.
//!
//! # Overview
//!
//! A [`Texture`] is a pooled record: Vulkan image, primary sampled view,
//! optional storage view, a lazily filled per-(mip, layer) attachment view
//! cache, and the allocation plus flags describing the image. Swapchain
//! images reuse the same record with `is_swapchain` set and no allocation;
//! they are never destroyed through the deleter.
//!
//! # Upload
//!
//! Initial payloads land in a host-visible staging buffer, are copied into
//! the base mip, and the rest of the chain is generated on the GPU: each mip
//! is a linear `vkCmdBlitImage2` of the previous one. The whole upload is
//! recorded on one ring command buffer and waited on before creation
//! returns.

use std::collections::HashMap;

use ash::vk;

use crate::{
    device::Device,
    error::Result,
    types::{Format, TextureUsage},
};

/// A pooled texture resource.
pub struct Texture {
    pub(crate) image: vk::Image,
    pub(crate) view: vk::ImageView,
    /// Separate identity view for storage access; null when the texture is
    /// not storage-capable.
    pub(crate) storage_view: vk::ImageView,
    /// Single-mip single-layer views handed to dynamic rendering, created on
    /// first use.
    pub(crate) attachment_views: HashMap<(u32, u32), vk::ImageView>,
    pub(crate) allocation: Option<vk_mem::Allocation>,
    pub(crate) extent: vk::Extent3D,
    pub(crate) format: Format,
    pub(crate) vk_format: vk::Format,
    pub(crate) mip_levels: u32,
    pub(crate) layers: u32,
    pub(crate) sample_count: vk::SampleCountFlags,
    pub(crate) usage: TextureUsage,
    pub(crate) is_depth: bool,
    pub(crate) is_owned: bool,
    pub(crate) is_swapchain: bool,
    pub(crate) debug_name: String,
}

impl Default for Texture {
    fn default() -> Self {
        Self {
            image: vk::Image::null(),
            view: vk::ImageView::null(),
            storage_view: vk::ImageView::null(),
            attachment_views: HashMap::new(),
            allocation: None,
            extent: vk::Extent3D::default(),
            format: Format::Invalid,
            vk_format: vk::Format::UNDEFINED,
            mip_levels: 1,
            layers: 1,
            sample_count: vk::SampleCountFlags::TYPE_1,
            usage: TextureUsage::empty(),
            is_depth: false,
            is_owned: false,
            is_swapchain: false,
            debug_name: String::new(),
        }
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("extent", &self.extent)
            .field("format", &self.format)
            .field("mip_levels", &self.mip_levels)
            .field("layers", &self.layers)
            .field("usage", &self.usage)
            .field("is_swapchain", &self.is_swapchain)
            .field("debug_name", &self.debug_name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Texture {
    fn eq(&self, other: &Self) -> bool {
        self.image == other.image
    }
}

impl Texture {
    pub fn raw_image(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn storage_view(&self) -> vk::ImageView {
        self.storage_view
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn layers(&self) -> u32 {
        self.layers
    }

    pub fn is_sampled(&self) -> bool {
        self.usage.contains(TextureUsage::SAMPLED)
    }

    pub fn is_storage(&self) -> bool {
        self.usage.contains(TextureUsage::STORAGE)
    }

    pub fn is_depth(&self) -> bool {
        self.is_depth
    }

    pub fn is_swapchain(&self) -> bool {
        self.is_swapchain
    }

    pub fn aspect_mask(&self) -> vk::ImageAspectFlags {
        self.format.aspect_mask()
    }

    /// The single-(mip, layer) view used as a render attachment, created on
    /// first request and cached on the texture.
    pub fn get_or_create_attachment_view(
        &mut self,
        device: &Device,
        mip: u32,
        layer: u32,
    ) -> Result<vk::ImageView> {
        if let Some(&view) = self.attachment_views.get(&(mip, layer)) {
            return Ok(view);
        }
        let view = create_view(
            device,
            self.image,
            vk::ImageViewType::TYPE_2D,
            self.vk_format,
            self.aspect_mask(),
            mip,
            1,
            layer,
            1,
        )?;
        self.attachment_views.insert((mip, layer), view);
        Ok(view)
    }

    /// Destroys every view owned by this record. The image itself is only
    /// destroyed for owned textures, by the caller.
    pub(crate) fn destroy_views(&mut self, device: &Device) {
        unsafe {
            if self.view != vk::ImageView::null() {
                device.destroy_image_view(self.view, None);
                self.view = vk::ImageView::null();
            }
            if self.storage_view != vk::ImageView::null() {
                device.destroy_image_view(self.storage_view, None);
                self.storage_view = vk::ImageView::null();
            }
            for (_, view) in self.attachment_views.drain() {
                device.destroy_image_view(view, None);
            }
        }
    }
}

/// Picks the primary view type: CUBE for square 6-layer images, array views
/// for layered images, plain 2D otherwise.
pub(crate) fn primary_view_type(extent: vk::Extent3D, layers: u32) -> vk::ImageViewType {
    if layers == 6 && extent.width == extent.height {
        vk::ImageViewType::CUBE
    } else if layers > 1 {
        vk::ImageViewType::TYPE_2D_ARRAY
    } else {
        vk::ImageViewType::TYPE_2D
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn create_view(
    device: &Device,
    image: vk::Image,
    view_type: vk::ImageViewType,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
    base_mip: u32,
    mip_count: u32,
    base_layer: u32,
    layer_count: u32,
) -> Result<vk::ImageView> {
    let info = vk::ImageViewCreateInfo {
        image,
        view_type,
        format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: base_mip,
            level_count: mip_count,
            base_array_layer: base_layer,
            layer_count,
        },
        ..Default::default()
    };
    Ok(unsafe { device.create_image_view(&info, None)? })
}

/// Records a full-subresource layout transition with heavyweight
/// (all-commands) scopes. Upload and present paths are not hot enough to
/// warrant tighter masks.
pub(crate) fn record_transition(
    device: &Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    base_mip: u32,
    mip_count: u32,
    layer_count: u32,
) {
    let barrier = vk::ImageMemoryBarrier2 {
        src_stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
        src_access_mask: vk::AccessFlags2::MEMORY_WRITE,
        dst_stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
        dst_access_mask: vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
        old_layout,
        new_layout,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: base_mip,
            level_count: mip_count,
            base_array_layer: 0,
            layer_count,
        },
        ..Default::default()
    };
    let barriers = [barrier];
    let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
    unsafe { device.cmd_pipeline_barrier2(cmd, &dependency) };
}

fn mip_extent(extent: vk::Extent3D, mip: u32) -> vk::Extent3D {
    vk::Extent3D {
        width: (extent.width >> mip).max(1),
        height: (extent.height >> mip).max(1),
        depth: (extent.depth >> mip).max(1),
    }
}

/// Records the staged upload: base mip copy from `staging`, then a linear
/// blit cascade filling mips `1..mip_levels`, then a final transition of the
/// whole chain into `final_layout`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn record_upload_with_mips(
    device: &Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    staging: vk::Buffer,
    extent: vk::Extent3D,
    mip_levels: u32,
    layers: u32,
    final_layout: vk::ImageLayout,
) {
    let aspect = vk::ImageAspectFlags::COLOR;

    record_transition(
        device,
        cmd,
        image,
        aspect,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        0,
        mip_levels,
        layers,
    );

    let region = vk::BufferImageCopy2 {
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: aspect,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: layers,
        },
        image_extent: extent,
        ..Default::default()
    };
    let regions = [region];
    let copy_info = vk::CopyBufferToImageInfo2::default()
        .src_buffer(staging)
        .dst_image(image)
        .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .regions(&regions);
    unsafe { device.cmd_copy_buffer_to_image2(cmd, &copy_info) };

    for mip in 1..mip_levels {
        // Previous mip becomes the blit source for this one.
        record_transition(
            device,
            cmd,
            image,
            aspect,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            mip - 1,
            1,
            layers,
        );

        let src = mip_extent(extent, mip - 1);
        let dst = mip_extent(extent, mip);
        let blit = vk::ImageBlit2 {
            src_subresource: vk::ImageSubresourceLayers {
                aspect_mask: aspect,
                mip_level: mip - 1,
                base_array_layer: 0,
                layer_count: layers,
            },
            src_offsets: [
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: src.width as i32,
                    y: src.height as i32,
                    z: src.depth as i32,
                },
            ],
            dst_subresource: vk::ImageSubresourceLayers {
                aspect_mask: aspect,
                mip_level: mip,
                base_array_layer: 0,
                layer_count: layers,
            },
            dst_offsets: [
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: dst.width as i32,
                    y: dst.height as i32,
                    z: dst.depth as i32,
                },
            ],
            ..Default::default()
        };
        let blits = [blit];
        let blit_info = vk::BlitImageInfo2::default()
            .src_image(image)
            .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .dst_image(image)
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .regions(&blits)
            .filter(vk::Filter::LINEAR);
        unsafe { device.cmd_blit_image2(cmd, &blit_info) };
    }

    // Mips 0..N-1 sit in TRANSFER_SRC, the last one in TRANSFER_DST.
    if mip_levels > 1 {
        record_transition(
            device,
            cmd,
            image,
            aspect,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            final_layout,
            0,
            mip_levels - 1,
            layers,
        );
    }
    record_transition(
        device,
        cmd,
        image,
        aspect,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        final_layout,
        mip_levels - 1,
        1,
        layers,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_view_requires_square_six_layers() {
        let square = vk::Extent3D {
            width: 64,
            height: 64,
            depth: 1,
        };
        let wide = vk::Extent3D {
            width: 128,
            height: 64,
            depth: 1,
        };
        assert_eq!(primary_view_type(square, 6), vk::ImageViewType::CUBE);
        assert_eq!(primary_view_type(wide, 6), vk::ImageViewType::TYPE_2D_ARRAY);
        assert_eq!(primary_view_type(square, 4), vk::ImageViewType::TYPE_2D_ARRAY);
        assert_eq!(primary_view_type(square, 1), vk::ImageViewType::TYPE_2D);
    }

    #[test]
    fn mip_extent_halves_and_clamps() {
        let extent = vk::Extent3D {
            width: 100,
            height: 7,
            depth: 1,
        };
        assert_eq!(mip_extent(extent, 1).width, 50);
        assert_eq!(mip_extent(extent, 3).height, 1);
        assert_eq!(mip_extent(extent, 9).width, 1);
        assert_eq!(mip_extent(extent, 9).depth, 1);
    }
}
