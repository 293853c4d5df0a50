//! Swapchain management.
//!
//! # Overview
//!
//! The swapchain owns its Vulkan object plus the per-image presentation
//! plumbing: a ring of acquire semaphores and present fences stepped once
//! per acquire, and a timeline semaphore that gates image reuse. Swapchain images are pooled
//! as ordinary [`Texture`] records with `is_swapchain` set; the context hands
//! them out through [`Swapchain::acquire`] each frame.
//!
//! Present fences come from `VK_EXT_swapchain_maintenance1` when the device
//! has it. Without the extension the timeline semaphore alone paces reuse,
//! which can leave the driver holding semaphores a little longer on teardown.
//!
//! # Pacing
//!
//! A frame that presents signals the timeline with `frame_index +
//! image_count`. Acquiring an image first waits the timeline up to the value
//! stored for that image, so the CPU never records into an image the GPU is
//! still presenting from.

use ash::vk;
use smallvec::SmallVec;

use crate::{
    commands::ImmediateCommands,
    device::Device,
    error::{Error, Result},
    pool::{Handle, Pool},
    texture::{self, Texture},
    types::{Format, TextureUsage},
};

/// Upper bound on swapchain depth; drivers asking for more are clamped.
pub const MAX_SWAPCHAIN_IMAGES: usize = 8;

/// The colour encodings a surface can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    /// 8-bit sRGB-encoded output, the portable default.
    #[default]
    SrgbNonLinear,
    /// Extended linear sRGB in 16-bit float, for scRGB HDR paths.
    SrgbExtendedLinear,
    /// HDR10 (BT.2020 primaries, ST2084 transfer).
    Hdr10,
    /// Linear BT.709, for pipelines doing their own transfer function.
    Bt709Linear,
}

/// True when the surface's native 8-bit order is BGRA. Decided by the first
/// four-component 8-bit entry the driver lists, which drivers put first for
/// their preferred order.
fn native_order_is_bgr(available: &[vk::SurfaceFormatKHR]) -> bool {
    for entry in available {
        match entry.format {
            vk::Format::R8G8B8A8_UNORM | vk::Format::R8G8B8A8_SRGB => return false,
            vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB => return true,
            _ => {}
        }
    }
    false
}

fn contains(available: &[vk::SurfaceFormatKHR], wanted: vk::SurfaceFormatKHR) -> bool {
    available
        .iter()
        .any(|f| f.format == wanted.format && f.color_space == wanted.color_space)
}

/// Picks the surface format closest to the requested colour space.
///
/// Preference order is per colour space, with 8-bit candidates tried in the
/// surface's native component order first. Falls back to any
/// `SRGB_NONLINEAR` entry, then to the driver's first listed format.
pub(crate) fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    color_space: ColorSpace,
) -> vk::SurfaceFormatKHR {
    let bgr = native_order_is_bgr(available);
    let (srgb8, unorm8) = if bgr {
        (vk::Format::B8G8R8A8_SRGB, vk::Format::B8G8R8A8_UNORM)
    } else {
        (vk::Format::R8G8B8A8_SRGB, vk::Format::R8G8B8A8_UNORM)
    };
    let (srgb8_alt, unorm8_alt) = if bgr {
        (vk::Format::R8G8B8A8_SRGB, vk::Format::R8G8B8A8_UNORM)
    } else {
        (vk::Format::B8G8R8A8_SRGB, vk::Format::B8G8R8A8_UNORM)
    };

    let preferred: SmallVec<[vk::SurfaceFormatKHR; 4]> = match color_space {
        ColorSpace::SrgbNonLinear => SmallVec::from_slice(&[
            vk::SurfaceFormatKHR {
                format: srgb8,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: srgb8_alt,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: unorm8,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ]),
        ColorSpace::SrgbExtendedLinear => SmallVec::from_slice(&[vk::SurfaceFormatKHR {
            format: vk::Format::R16G16B16A16_SFLOAT,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        }]),
        ColorSpace::Hdr10 => SmallVec::from_slice(&[
            vk::SurfaceFormatKHR {
                format: vk::Format::A2B10G10R10_UNORM_PACK32,
                color_space: vk::ColorSpaceKHR::HDR10_ST2084_EXT,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::A2R10G10B10_UNORM_PACK32,
                color_space: vk::ColorSpaceKHR::HDR10_ST2084_EXT,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::R16G16B16A16_SFLOAT,
                color_space: vk::ColorSpaceKHR::HDR10_ST2084_EXT,
            },
        ]),
        ColorSpace::Bt709Linear => SmallVec::from_slice(&[
            vk::SurfaceFormatKHR {
                format: unorm8,
                color_space: vk::ColorSpaceKHR::BT709_LINEAR_EXT,
            },
            vk::SurfaceFormatKHR {
                format: unorm8_alt,
                color_space: vk::ColorSpaceKHR::BT709_LINEAR_EXT,
            },
        ]),
    };
    for wanted in preferred {
        if contains(available, wanted) {
            return wanted;
        }
    }

    if color_space != ColorSpace::SrgbNonLinear {
        tracing::warn!(
            ?color_space,
            "requested colour space unavailable, falling back to sRGB"
        );
        return choose_surface_format(available, ColorSpace::SrgbNonLinear);
    }
    available.first().copied().unwrap_or_default()
}

/// Which per-image sync slot (acquire semaphore, present fence) an acquire
/// uses. Cycles with the acquire count, not the context frame index: a frame
/// may carry several submits, and each submit advances the frame index.
fn next_sync_slot(acquire_counter: u64, image_count: usize) -> usize {
    (acquire_counter % image_count as u64) as usize
}

/// Picks the present mode: IMMEDIATE when low latency is preferred and
/// available, then MAILBOX, then the always-present FIFO.
pub(crate) fn pick_present_mode(
    available: &[vk::PresentModeKHR],
    prefer_immediate: bool,
) -> vk::PresentModeKHR {
    if prefer_immediate && available.contains(&vk::PresentModeKHR::IMMEDIATE) {
        return vk::PresentModeKHR::IMMEDIATE;
    }
    if available.contains(&vk::PresentModeKHR::MAILBOX) {
        return vk::PresentModeKHR::MAILBOX;
    }
    vk::PresentModeKHR::FIFO
}

pub struct Swapchain {
    device: Device,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    surface_format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    textures: SmallVec<[Handle<Texture>; MAX_SWAPCHAIN_IMAGES]>,
    acquire_semaphores: SmallVec<[vk::Semaphore; MAX_SWAPCHAIN_IMAGES]>,
    present_fences: SmallVec<[vk::Fence; MAX_SWAPCHAIN_IMAGES]>,
    present_fence_submitted: SmallVec<[bool; MAX_SWAPCHAIN_IMAGES]>,
    /// Gates image reuse; value `timeline_wait_values[i]` must be reached
    /// before image `i` can be recorded into again.
    timeline: vk::Semaphore,
    timeline_wait_values: SmallVec<[u64; MAX_SWAPCHAIN_IMAGES]>,
    /// Successful acquires since the last rebuild; see [`next_sync_slot`].
    acquire_counter: u64,
    /// Sync slot the current acquire claimed; `present` reuses it.
    sync_slot: usize,
    current_image: u32,
    acquired: bool,
    needs_rebuild: bool,
}

impl Swapchain {
    pub fn new(
        device: Device,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        color_space: ColorSpace,
        textures: &mut Pool<Texture>,
    ) -> Result<Self> {
        let mut timeline_info =
            vk::SemaphoreTypeCreateInfo::default().semaphore_type(vk::SemaphoreType::TIMELINE);
        let timeline_create = vk::SemaphoreCreateInfo::default().push_next(&mut timeline_info);
        let timeline = unsafe { device.create_semaphore(&timeline_create, None)? };

        let mut swapchain = Self {
            device,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            surface_format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            textures: SmallVec::new(),
            acquire_semaphores: SmallVec::new(),
            present_fences: SmallVec::new(),
            present_fence_submitted: SmallVec::new(),
            timeline,
            timeline_wait_values: SmallVec::new(),
            acquire_counter: 0,
            sync_slot: 0,
            current_image: 0,
            acquired: false,
            needs_rebuild: false,
        };
        swapchain.rebuild(width, height, color_space, textures)?;
        Ok(swapchain)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> Format {
        Format::from_vk(self.surface_format.format)
    }

    pub fn image_count(&self) -> usize {
        self.textures.len()
    }

    /// True after a suboptimal present; the owner should resize soon.
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    /// Handle of the image acquired this frame, if any.
    pub fn current_texture(&self) -> Option<Handle<Texture>> {
        self.acquired
            .then(|| self.textures[self.current_image as usize])
    }

    /// Acquires the next image and wires its semaphore into the command ring
    /// so the first submit of the frame waits on it.
    pub fn acquire(&mut self, immediate: &mut ImmediateCommands) -> Result<Handle<Texture>> {
        if self.acquired {
            return Ok(self.textures[self.current_image as usize]);
        }
        let slot = next_sync_slot(self.acquire_counter, self.textures.len());

        // Reclaim the slot's present fence so the driver has released the
        // wait semaphore of the present that used it.
        if self.present_fence_submitted[slot] {
            let fence = [self.present_fences[slot]];
            unsafe {
                self.device.wait_for_fences(&fence, true, u64::MAX)?;
                self.device.reset_fences(&fence)?;
            }
            self.present_fence_submitted[slot] = false;
        }

        let (image_index, suboptimal) = unsafe {
            self.device
                .swapchain_loader()
                .acquire_next_image(
                    self.swapchain,
                    u64::MAX,
                    self.acquire_semaphores[slot],
                    vk::Fence::null(),
                )
                .map_err(|err| match err {
                    vk::Result::ERROR_OUT_OF_DATE_KHR => Error::SwapchainOutOfDate,
                    other => Error::from(other),
                })?
        };
        if suboptimal {
            self.needs_rebuild = true;
        }

        // The GPU may still be presenting from this image.
        let wait_value = self.timeline_wait_values[image_index as usize];
        if wait_value > 0 {
            let semaphores = [self.timeline];
            let values = [wait_value];
            let wait_info = vk::SemaphoreWaitInfo::default()
                .semaphores(&semaphores)
                .values(&values);
            unsafe { self.device.wait_semaphores(&wait_info, u64::MAX)? };
        }

        immediate.set_wait_semaphore(self.acquire_semaphores[slot]);
        self.current_image = image_index;
        self.sync_slot = slot;
        self.acquire_counter = self.acquire_counter.wrapping_add(1);
        self.acquired = true;
        Ok(self.textures[image_index as usize])
    }

    /// Arms the presenting submit: it will signal the timeline with the value
    /// the acquired image waits on next time around the ring.
    pub(crate) fn prepare_present(
        &mut self,
        immediate: &mut ImmediateCommands,
        frame_index: u64,
    ) {
        let signal_value = frame_index + self.textures.len() as u64;
        self.timeline_wait_values[self.current_image as usize] = signal_value;
        immediate.set_signal_semaphore(self.timeline, signal_value);
    }

    /// Presents the acquired image, waiting on `wait_semaphore` (the last
    /// submission's semaphore).
    pub(crate) fn present(&mut self, wait_semaphore: vk::Semaphore, queue: vk::Queue) -> Result<()> {
        let slot = self.sync_slot;
        let waits = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [self.current_image];
        let mut present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let fences = [self.present_fences[slot]];
        let mut fence_info = vk::SwapchainPresentFenceInfoEXT::default().fences(&fences);
        let use_fence = self.device.swapchain_maintenance_loader().is_some();
        if use_fence {
            present_info = present_info.push_next(&mut fence_info);
        }

        let result = unsafe {
            self.device
                .swapchain_loader()
                .queue_present(queue, &present_info)
        };
        self.acquired = false;
        match result {
            Ok(suboptimal) => {
                if use_fence {
                    self.present_fence_submitted[slot] = true;
                }
                if suboptimal {
                    self.needs_rebuild = true;
                }
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.needs_rebuild = true;
                Err(Error::SwapchainOutOfDate)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Recreates the swapchain for a new extent, reusing the requested colour
    /// space of the current surface format.
    pub fn resize(
        &mut self,
        width: u32,
        height: u32,
        textures: &mut Pool<Texture>,
    ) -> Result<()> {
        let color_space = match self.surface_format.color_space {
            vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT => ColorSpace::SrgbExtendedLinear,
            vk::ColorSpaceKHR::HDR10_ST2084_EXT => ColorSpace::Hdr10,
            vk::ColorSpaceKHR::BT709_LINEAR_EXT => ColorSpace::Bt709Linear,
            _ => ColorSpace::SrgbNonLinear,
        };
        self.rebuild(width, height, color_space, textures)
    }

    fn rebuild(
        &mut self,
        width: u32,
        height: u32,
        color_space: ColorSpace,
        textures: &mut Pool<Texture>,
    ) -> Result<()> {
        let old_swapchain = self.swapchain;
        self.destroy_images(textures)?;

        let physical_device = self.device.physical_device();
        let surface_loader = self.device.instance().surface_loader();
        let caps = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, self.surface)?
        };
        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)?
        };

        let surface_format = choose_surface_format(&formats, color_space);
        let present_mode = pick_present_mode(
            &present_modes,
            cfg!(any(target_os = "linux", target_arch = "aarch64")),
        );

        let extent = vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        };
        if extent.width == 0 || extent.height == 0 {
            // Minimised windows report a zero extent; creation must wait.
            return Err(Error::SwapchainOutOfDate);
        }

        let mut image_count = caps.min_image_count + 1;
        if caps.max_image_count > 0 {
            image_count = image_count.min(caps.max_image_count);
        }
        image_count = image_count.min(MAX_SWAPCHAIN_IMAGES as u32);

        let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST;
        let storage = caps
            .supported_usage_flags
            .contains(vk::ImageUsageFlags::STORAGE)
            && self.device.supports_storage(surface_format.format);
        if storage {
            usage |= vk::ImageUsageFlags::STORAGE;
        }

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);
        let swapchain = unsafe {
            self.device
                .swapchain_loader()
                .create_swapchain(&create_info, None)?
        };
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.device
                    .swapchain_loader()
                    .destroy_swapchain(old_swapchain, None)
            };
        }
        self.swapchain = swapchain;
        self.surface_format = surface_format;
        self.extent = extent;
        self.needs_rebuild = false;
        self.acquired = false;
        self.acquire_counter = 0;
        self.sync_slot = 0;

        let images = unsafe {
            self.device
                .swapchain_loader()
                .get_swapchain_images(swapchain)?
        };
        let format = Format::from_vk(surface_format.format);
        for (i, image) in images.iter().enumerate() {
            let view = texture::create_view(
                &self.device,
                *image,
                vk::ImageViewType::TYPE_2D,
                surface_format.format,
                vk::ImageAspectFlags::COLOR,
                0,
                1,
                0,
                1,
            )?;
            let mut texture_usage = TextureUsage::ATTACHMENT | TextureUsage::SAMPLED;
            if storage {
                texture_usage |= TextureUsage::STORAGE;
            }
            let handle = textures.create(Texture {
                image: *image,
                view,
                extent: vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                },
                format,
                vk_format: surface_format.format,
                usage: texture_usage,
                is_swapchain: true,
                debug_name: format!("swapchain image {i}"),
                ..Default::default()
            });
            self.textures.push(handle);

            let semaphore = unsafe {
                self.device
                    .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
            };
            self.acquire_semaphores.push(semaphore);
            let fence = unsafe {
                self.device
                    .create_fence(&vk::FenceCreateInfo::default(), None)?
            };
            self.present_fences.push(fence);
            self.present_fence_submitted.push(false);
            self.timeline_wait_values.push(0);
        }

        tracing::info!(
            width = extent.width,
            height = extent.height,
            images = images.len(),
            format = ?surface_format.format,
            color_space = ?surface_format.color_space,
            present_mode = ?present_mode,
            "created swapchain"
        );
        Ok(())
    }

    /// Tears down per-image objects, waiting out any presentation still using
    /// them.
    fn destroy_images(&mut self, textures: &mut Pool<Texture>) -> Result<()> {
        if self.textures.is_empty() {
            return Ok(());
        }
        // Wait the timeline up to the highest value any image is owed.
        let max_value = self.timeline_wait_values.iter().copied().max().unwrap_or(0);
        if max_value > 0 {
            let semaphores = [self.timeline];
            let values = [max_value];
            let wait_info = vk::SemaphoreWaitInfo::default()
                .semaphores(&semaphores)
                .values(&values);
            unsafe { self.device.wait_semaphores(&wait_info, u64::MAX)? };
        }
        let submitted: SmallVec<[vk::Fence; MAX_SWAPCHAIN_IMAGES]> = self
            .present_fences
            .iter()
            .zip(&self.present_fence_submitted)
            .filter(|(_, &submitted)| submitted)
            .map(|(&f, _)| f)
            .collect();
        if !submitted.is_empty() {
            unsafe { self.device.wait_for_fences(&submitted, true, u64::MAX)? };
        }

        for handle in self.textures.drain(..) {
            if let Ok(mut record) = textures.destroy(handle) {
                record.destroy_views(&self.device);
            }
        }
        unsafe {
            for semaphore in self.acquire_semaphores.drain(..) {
                self.device.destroy_semaphore(semaphore, None);
            }
            for fence in self.present_fences.drain(..) {
                self.device.destroy_fence(fence, None);
            }
        }
        self.present_fence_submitted.clear();
        self.timeline_wait_values.clear();
        Ok(())
    }

    /// Final teardown. The context calls this after the device went idle and
    /// before the texture pool is dropped.
    pub(crate) fn destroy(&mut self, textures: &mut Pool<Texture>) {
        let _ = self.destroy_images(textures);
        unsafe {
            if self.swapchain != vk::SwapchainKHR::null() {
                self.device
                    .swapchain_loader()
                    .destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
            if self.timeline != vk::Semaphore::null() {
                self.device.destroy_semaphore(self.timeline, None);
                self.timeline = vk::Semaphore::null();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn srgb_surface_prefers_native_order() {
        let bgr_first = [
            entry(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            entry(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            entry(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&bgr_first, ColorSpace::SrgbNonLinear);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);

        let rgb_first = [
            entry(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            entry(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&rgb_first, ColorSpace::SrgbNonLinear);
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_SRGB);
    }

    #[test]
    fn srgb_surface_falls_back_to_unorm() {
        let formats = [entry(
            vk::Format::B8G8R8A8_UNORM,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        )];
        let chosen = choose_surface_format(&formats, ColorSpace::SrgbNonLinear);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn hdr10_picks_ten_bit_when_offered() {
        let formats = [
            entry(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            entry(
                vk::Format::A2B10G10R10_UNORM_PACK32,
                vk::ColorSpaceKHR::HDR10_ST2084_EXT,
            ),
        ];
        let chosen = choose_surface_format(&formats, ColorSpace::Hdr10);
        assert_eq!(chosen.format, vk::Format::A2B10G10R10_UNORM_PACK32);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::HDR10_ST2084_EXT);
    }

    #[test]
    fn unavailable_colour_space_falls_back_to_srgb() {
        let formats = [
            entry(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            entry(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats, ColorSpace::Hdr10);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn sync_slot_follows_acquires_not_frame_indices() {
        // A frame with an extra non-presenting submit advances the frame
        // index twice per acquire; the sync slot must keep cycling one step
        // per acquire so present fences pair with the acquire that reclaimed
        // them.
        let image_count = 2;
        let by_acquire: Vec<usize> = (0u64..3).map(|n| next_sync_slot(n, image_count)).collect();
        assert_eq!(by_acquire, vec![0, 1, 0]);

        let frame_indices = [0u64, 2, 4];
        let by_frame: Vec<usize> = frame_indices
            .iter()
            .map(|&f| (f % image_count as u64) as usize)
            .collect();
        assert_ne!(by_acquire, by_frame);
    }

    #[test]
    fn present_mode_preference_order() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(
            pick_present_mode(&all, true),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(pick_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            pick_present_mode(&[vk::PresentModeKHR::FIFO], true),
            vk::PresentModeKHR::FIFO
        );
    }
}
