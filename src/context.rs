//! The context facade.
//!
//! # Overview
//!
//! [`Context`] owns everything: instance, device, allocator, the immediate
//! command ring, the deferred deleter, the bindless descriptor set, the
//! resource pools and the swapchain. Creation methods hand out [`Holder`]s
//! whose drop retires the handle; retirements are picked up at the next frame
//! start and routed through the deleter, so resources never die under an
//! in-flight frame.
//!
//! # Frame protocol
//!
//! ```text
//! let cmd = ctx.acquire_command_buffer()?;   // frame start bookkeeping
//! let target = ctx.acquire_swapchain_texture()?;
//! ctx.cmd_begin_rendering(&cmd, &[...], None)?;
//! ...
//! ctx.cmd_end_rendering(&cmd, &[...], None)?;
//! ctx.submit(cmd, Some(target))?;            // submit + present
//! ```
//!
//! # Layout convention
//!
//! Owned textures live in `GENERAL`. `cmd_begin_rendering` moves attachments
//! into the attachment layout and `cmd_end_rendering` moves them back;
//! presenting moves the swapchain image `GENERAL -> PRESENT_SRC`. The one
//! descriptor set references every sampled and storage image in `GENERAL`,
//! which is what makes update-after-bind rewrites layout-oblivious.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use smallvec::SmallVec;
use vk_mem::Alloc;

use crate::{
    alloc::Allocator,
    bindless::{plan_rewrite, DescriptorManager},
    buffer::Buffer,
    commands::{CommandBuffer, ImmediateCommands, SubmitHandle, RING_SIZE},
    deferred::DeferredDeleter,
    device::Device,
    error::{Error, Result},
    instance::Instance,
    pipeline::{
        self, ComputePipeline, ComputePipelineDescription, GraphicsPipeline,
        GraphicsPipelineDescription,
    },
    pool::{Handle, Holder, Pool, Retired, RetireQueue},
    sampler::{self, Sampler},
    shader::{self, PushConstantInfo, ShaderModule, StageEntry, StageModule},
    swapchain::{ColorSpace, Swapchain},
    texture::{self, Texture},
    types::{
        BufferDescription, BufferUsage, ClearValue, CompareOp, Extent3d, Format,
        SamplerDescription, StorageClass, TextureDescription, TextureUsage,
        MAX_COLOR_ATTACHMENTS,
    },
};

/// Startup options.
#[derive(Debug, Clone, Copy)]
pub struct ContextDescription {
    pub width: u32,
    pub height: u32,
    pub color_space: ColorSpace,
    /// Also maintain the combined image+sampler binding. Off by default;
    /// shaders built for split sampling never touch it.
    pub combined_image_samplers: bool,
}

impl Default for ContextDescription {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            color_space: ColorSpace::SrgbNonLinear,
            combined_image_samplers: false,
        }
    }
}

/// One colour attachment for dynamic rendering.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorAttachment {
    pub texture: Handle<Texture>,
    /// `Some` clears on load (discarding the previous contents), `None`
    /// loads.
    pub clear: Option<ClearValue>,
    pub mip: u32,
    pub layer: u32,
}

/// The depth attachment for dynamic rendering.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepthAttachment {
    pub texture: Handle<Texture>,
    pub clear: Option<f32>,
}

type DeferredTask = Box<dyn FnOnce()>;

pub struct Context {
    swapchain: Option<Swapchain>,
    surface: vk::SurfaceKHR,
    immediate: ImmediateCommands,
    deleter: DeferredDeleter,
    descriptors: DescriptorManager,
    compiler: shaderc::Compiler,
    textures: Pool<Texture>,
    samplers: Pool<Sampler>,
    buffers: Pool<Buffer>,
    shader_modules: Pool<ShaderModule>,
    graphics_pipelines: Pool<GraphicsPipeline>,
    compute_pipelines: Pool<ComputePipeline>,
    retired: Arc<RetireQueue>,
    tasks: Vec<(SubmitHandle, DeferredTask)>,
    dummy_texture: Handle<Texture>,
    dummy_sampler: Handle<Sampler>,
    frame_index: u64,
    allocator: Allocator,
    device: Device,
}

impl Context {
    /// Brings up the whole stack against a window: instance, surface, device,
    /// allocator, command ring, bindless set, the slot-0 dummy resources and
    /// the swapchain.
    pub fn new(
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        description: &ContextDescription,
    ) -> Result<Self> {
        let instance = Instance::new(display_handle)?;
        let surface = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.raw(),
                display_handle,
                window_handle,
                None,
            )?
        };
        let device = Device::new(instance, surface)?;
        let allocator = Allocator::new(device.clone())?;
        let immediate = ImmediateCommands::new(device.clone(), device.graphics_queue())?;
        let descriptors =
            DescriptorManager::new(device.clone(), description.combined_image_samplers)?;
        let compiler = shaderc::Compiler::new()
            .ok_or_else(|| Error::Context("failed to initialise the shader compiler".to_owned()))?;

        let mut context = Self {
            swapchain: None,
            surface,
            immediate,
            deleter: DeferredDeleter::new(RING_SIZE as u64),
            descriptors,
            compiler,
            textures: Pool::new(),
            samplers: Pool::new(),
            buffers: Pool::new(),
            shader_modules: Pool::new(),
            graphics_pipelines: Pool::new(),
            compute_pipelines: Pool::new(),
            retired: Arc::new(RetireQueue::default()),
            tasks: Vec::new(),
            dummy_texture: Handle::INVALID,
            dummy_sampler: Handle::INVALID,
            frame_index: 0,
            allocator,
            device,
        };

        // Slot 0 of both pools: the white texture and the linear-repeat
        // sampler every unpopulated descriptor slot resolves to.
        context.dummy_texture = context.create_texture_inner(&TextureDescription {
            extent: Extent3d::new(1, 1, 1),
            format: Format::Rgba8Unorm,
            usage: TextureUsage::SAMPLED | TextureUsage::STORAGE,
            layers: 1,
            mip_count: Some(1),
            sample_count: 1,
            data: Some(&[255, 255, 255, 255]),
            debug_name: "dummy white texture",
        })?;
        context.dummy_sampler =
            context.create_sampler_inner(&SamplerDescription::default(), "dummy sampler")?;

        context.swapchain = Some(Swapchain::new(
            context.device.clone(),
            surface,
            description.width,
            description.height,
            description.color_space,
            &mut context.textures,
        )?);
        Ok(context)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn swapchain_format(&self) -> Option<Format> {
        self.swapchain.as_ref().map(Swapchain::format)
    }

    pub fn swapchain_extent(&self) -> Option<vk::Extent2D> {
        self.swapchain.as_ref().map(Swapchain::extent)
    }

    pub fn swapchain_needs_rebuild(&self) -> bool {
        self.swapchain
            .as_ref()
            .is_some_and(Swapchain::needs_rebuild)
    }

    // -----------------------------------------------------------------------
    // Resource access
    // -----------------------------------------------------------------------

    pub fn texture(&self, handle: Handle<Texture>) -> Result<&Texture> {
        Ok(self.textures.get(handle)?)
    }

    pub fn buffer(&self, handle: Handle<Buffer>) -> Result<&Buffer> {
        Ok(self.buffers.get(handle)?)
    }

    pub fn buffer_mut(&mut self, handle: Handle<Buffer>) -> Result<&mut Buffer> {
        Ok(self.buffers.get_mut(handle)?)
    }

    pub fn sampler(&self, handle: Handle<Sampler>) -> Result<&Sampler> {
        Ok(self.samplers.get(handle)?)
    }

    pub fn shader_module(&self, handle: Handle<ShaderModule>) -> Result<&ShaderModule> {
        Ok(self.shader_modules.get(handle)?)
    }

    /// Buffer device address, for shaders consuming raw pointers.
    pub fn gpu_address(&self, handle: Handle<Buffer>) -> Result<vk::DeviceAddress> {
        Ok(self.buffers.get(handle)?.gpu_address())
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    pub fn create_texture(&mut self, description: &TextureDescription) -> Result<Holder<Texture>> {
        let handle = self.create_texture_inner(description)?;
        Ok(Holder::new(handle, self.retired.clone()))
    }

    pub fn create_sampler(
        &mut self,
        description: &SamplerDescription,
        debug_name: &str,
    ) -> Result<Holder<Sampler>> {
        let handle = self.create_sampler_inner(description, debug_name)?;
        Ok(Holder::new(handle, self.retired.clone()))
    }

    pub fn create_buffer(&mut self, description: &BufferDescription) -> Result<Holder<Buffer>> {
        let handle = self.create_buffer_inner(description)?;
        Ok(Holder::new(handle, self.retired.clone()))
    }

    /// Compiles a multi-stage GLSL source into a pooled shader module.
    pub fn create_shader_module(
        &mut self,
        source: &str,
        debug_name: &str,
    ) -> Result<Holder<ShaderModule>> {
        let parsed = shader::parse(source)?;
        let mut push_constants = PushConstantInfo::default();
        let mut stages: Vec<StageModule> = Vec::with_capacity(parsed.entries.len());
        for entry in &parsed.entries {
            match self.compile_entry(entry, debug_name, &mut push_constants) {
                Ok(module) => stages.push(StageModule {
                    stage: entry.stage,
                    entry_name: entry.entry_name.clone(),
                    module,
                }),
                Err(err) => {
                    for stage in &stages {
                        unsafe { self.device.destroy_shader_module(stage.module, None) };
                    }
                    return Err(err);
                }
            }
        }
        let size = push_constants.size;
        if size > self.device.limits().max_push_constants_size {
            for stage in &stages {
                unsafe { self.device.destroy_shader_module(stage.module, None) };
            }
            return Err(Error::Context(format!(
                "push constant block of {size} bytes exceeds the device limit"
            )));
        }

        tracing::debug!(
            name = %debug_name,
            stages = stages.len(),
            push_constant_bytes = push_constants.size,
            "compiled shader module"
        );
        let handle = self.shader_modules.create(ShaderModule {
            stages,
            push_constants,
            debug_name: debug_name.to_owned(),
        });
        Ok(Holder::new(handle, self.retired.clone()))
    }

    pub fn create_graphics_pipeline(
        &mut self,
        description: &GraphicsPipelineDescription,
    ) -> Result<Holder<GraphicsPipeline>> {
        let module = self.shader_modules.get(description.shader)?;
        let built = pipeline::build_graphics_pipeline(
            &self.device,
            self.descriptors.layout(),
            module,
            description,
        )?;
        let handle = self.graphics_pipelines.create(built);
        Ok(Holder::new(handle, self.retired.clone()))
    }

    pub fn create_compute_pipeline(
        &mut self,
        description: &ComputePipelineDescription,
    ) -> Result<Holder<ComputePipeline>> {
        let module = self.shader_modules.get(description.shader)?;
        let built = pipeline::build_compute_pipeline(
            &self.device,
            self.descriptors.layout(),
            module,
            description,
        )?;
        let handle = self.compute_pipelines.create(built);
        Ok(Holder::new(handle, self.retired.clone()))
    }

    fn compile_entry(
        &self,
        entry: &StageEntry,
        debug_name: &str,
        push_constants: &mut PushConstantInfo,
    ) -> Result<vk::ShaderModule> {
        let source = shader::with_preamble(&entry.source);
        let spirv = shader::compile_stage(&self.compiler, entry.stage, &source, debug_name)?;
        shader::reflect_push_constants(&spirv, entry.stage, push_constants)?;
        let words = ash::util::read_spv(&mut std::io::Cursor::new(&spirv)).map_err(|err| {
            Error::Compile {
                stage: entry.stage,
                log: format!("malformed SPIR-V: {err}"),
            }
        })?;
        let info = vk::ShaderModuleCreateInfo::default().code(&words);
        Ok(unsafe { self.device.create_shader_module(&info, None)? })
    }

    fn create_sampler_inner(
        &mut self,
        description: &SamplerDescription,
        debug_name: &str,
    ) -> Result<Handle<Sampler>> {
        let info = sampler::create_info(description);
        let raw = unsafe { self.device.create_sampler(&info, None)? };
        let handle = self.samplers.create(Sampler {
            sampler: raw,
            description: Some(*description),
            debug_name: debug_name.to_owned(),
        });
        self.descriptors.set_dirty();
        Ok(handle)
    }

    fn create_texture_inner(
        &mut self,
        description: &TextureDescription,
    ) -> Result<Handle<Texture>> {
        let extent = description.extent.to_vk();
        if extent.width == 0 || extent.height == 0 {
            return Err(Error::Context("texture extent must be non-zero".to_owned()));
        }
        if description.format == Format::Invalid {
            return Err(Error::Context("texture format must be set".to_owned()));
        }
        let format = description.format;
        let vk_format = format.to_vk();
        let layers = description.layers.max(1);
        let sample_count = self
            .device
            .clamp_sample_count(description.sample_count.max(1));
        let multisampled = sample_count != vk::SampleCountFlags::TYPE_1;
        if multisampled && description.data.is_some() {
            return Err(Error::Context(
                "multisampled textures cannot take initial data".to_owned(),
            ));
        }
        if format.is_depth() && description.data.is_some() {
            return Err(Error::Context(
                "depth textures cannot take initial data".to_owned(),
            ));
        }

        let mut mip_levels = description.resolved_mip_count();
        if multisampled {
            mip_levels = 1;
        }
        if mip_levels > 1
            && description.data.is_some()
            && !self.device.supports_linear_blit(vk_format)
        {
            return Err(Error::Context(format!(
                "format {format:?} cannot generate a mip chain: no linear blit support"
            )));
        }

        let mut usage = description.usage;
        if description.data.is_some() {
            usage |= TextureUsage::TRANSFER_DST;
            if mip_levels > 1 {
                usage |= TextureUsage::TRANSFER_SRC;
            }
        }
        // Storage views of sRGB textures alias the linear counterpart format.
        let wants_storage = usage.contains(TextureUsage::STORAGE);
        let storage_vk_format = format.non_srgb().to_vk();
        let storage = wants_storage && self.device.supports_storage(storage_vk_format);
        if wants_storage && !storage {
            tracing::warn!(?format, "storage usage requested but unsupported, dropping");
            usage.remove(TextureUsage::STORAGE);
        }

        if let Some(data) = description.data {
            let expected = extent.width as u64
                * extent.height as u64
                * extent.depth.max(1) as u64
                * format.bytes_per_texel() as u64
                * layers as u64;
            if data.len() as u64 != expected {
                return Err(Error::Context(format!(
                    "texture payload is {} bytes, base mip needs {expected}",
                    data.len()
                )));
            }
        }

        let mut flags = vk::ImageCreateFlags::empty();
        let cube = layers == 6 && extent.width == extent.height;
        if cube {
            flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        }
        let aliased_storage_format = storage && storage_vk_format != vk_format;
        if aliased_storage_format {
            flags |= vk::ImageCreateFlags::MUTABLE_FORMAT;
        }
        let view_formats = [vk_format, storage_vk_format];
        let mut format_list = vk::ImageFormatListCreateInfo::default().view_formats(&view_formats);
        let mut image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk_format)
            .extent(extent)
            .mip_levels(mip_levels)
            .array_layers(layers)
            .samples(sample_count)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage.to_vk(format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        if aliased_storage_format {
            image_info = image_info.push_next(&mut format_list);
        }
        let alloc_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (image, allocation) = unsafe {
            self.allocator
                .create_image(&image_info, &alloc_info)
                .map_err(|err| Error::Allocation(format!("image allocation failed: {err}")))?
        };

        let aspect = format.aspect_mask();
        let view = match texture::create_view(
            &self.device,
            image,
            texture::primary_view_type(extent, layers),
            vk_format,
            aspect,
            0,
            mip_levels,
            0,
            layers,
        ) {
            Ok(view) => view,
            Err(err) => {
                let mut allocation = allocation;
                unsafe { self.allocator.destroy_image(image, &mut allocation) };
                return Err(err);
            }
        };
        let storage_view = if storage {
            let view_type = if layers > 1 {
                vk::ImageViewType::TYPE_2D_ARRAY
            } else {
                vk::ImageViewType::TYPE_2D
            };
            match texture::create_view(
                &self.device,
                image,
                view_type,
                storage_vk_format,
                aspect,
                0,
                1,
                0,
                layers,
            ) {
                Ok(view) => view,
                Err(err) => {
                    let mut allocation = allocation;
                    unsafe {
                        self.device.destroy_image_view(view, None);
                        self.allocator.destroy_image(image, &mut allocation);
                    }
                    return Err(err);
                }
            }
        } else {
            vk::ImageView::null()
        };

        // Synchronous upload (or the initial transition into GENERAL); the
        // texture is fully usable when this returns.
        if let Some(data) = description.data {
            let (staging, mut staging_allocation) = self.create_staging_buffer(data)?;
            let cmd = self.immediate.acquire()?;
            texture::record_upload_with_mips(
                &self.device,
                cmd.raw(),
                image,
                staging,
                extent,
                mip_levels,
                layers,
                vk::ImageLayout::GENERAL,
            );
            let submit = self.immediate.submit(cmd)?;
            self.immediate.wait(submit)?;
            unsafe { self.allocator.destroy_buffer(staging, &mut staging_allocation) };
        } else if usage.intersects(TextureUsage::SAMPLED | TextureUsage::STORAGE) {
            let cmd = self.immediate.acquire()?;
            texture::record_transition(
                &self.device,
                cmd.raw(),
                image,
                aspect,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::GENERAL,
                0,
                mip_levels,
                layers,
            );
            let submit = self.immediate.submit(cmd)?;
            self.immediate.wait(submit)?;
        }

        let handle = self.textures.create(Texture {
            image,
            view,
            storage_view,
            allocation: Some(allocation),
            extent,
            format,
            vk_format,
            mip_levels,
            layers,
            sample_count,
            usage,
            is_depth: format.is_depth(),
            is_owned: true,
            is_swapchain: false,
            debug_name: description.debug_name.to_owned(),
            ..Default::default()
        });
        self.descriptors.set_dirty();
        Ok(handle)
    }

    fn create_buffer_inner(&mut self, description: &BufferDescription) -> Result<Handle<Buffer>> {
        if description.size == 0 {
            return Err(Error::Context("buffer size must be non-zero".to_owned()));
        }
        let mut usage = description.usage;
        let host_visible = description.storage == StorageClass::HostVisible;
        if description.data.is_some() && !host_visible {
            usage |= BufferUsage::TRANSFER_DST;
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(description.size)
            .usage(usage.to_vk())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_info = match description.storage {
            StorageClass::HostVisible => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE
                    | vk_mem::AllocationCreateFlags::MAPPED,
                ..Default::default()
            },
            StorageClass::DeviceLocal | StorageClass::Transient => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
        };
        let (buffer, allocation) = unsafe {
            self.allocator
                .create_buffer(&buffer_info, &alloc_info)
                .map_err(|err| Error::Allocation(format!("buffer allocation failed: {err}")))?
        };
        let info = self.allocator.get_allocation_info(&allocation);
        let memory_properties = self.allocator.memory_properties_of(&allocation);
        let mapped = info.mapped_data.cast::<u8>();

        let device_address = if usage.contains(BufferUsage::DEVICE_ADDRESS) {
            let address_info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
            unsafe { self.device.get_buffer_device_address(&address_info) }
        } else {
            0
        };

        let handle = self.buffers.create(Buffer {
            buffer,
            allocation: Some(allocation),
            size: description.size,
            usage,
            storage: description.storage,
            memory_properties,
            mapped,
            device_address,
            debug_name: description.debug_name.to_owned(),
        });

        if let Some(data) = description.data {
            if data.len() as u64 > description.size {
                let _ = self.destroy_buffer(handle);
                return Err(Error::Context(
                    "buffer payload larger than the buffer".to_owned(),
                ));
            }
            self.write_buffer(handle, 0, data)?;
        }
        Ok(handle)
    }

    /// Writes `data` at `offset`. Host-visible buffers are written through
    /// the mapping (and flushed when non-coherent); device-local buffers go
    /// through a synchronous staging copy.
    pub fn write_buffer(
        &mut self,
        handle: Handle<Buffer>,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        let buffer = self.buffers.get(handle)?;
        if offset + data.len() as u64 > buffer.size() {
            return Err(Error::Context("buffer write out of range".to_owned()));
        }
        if buffer.is_host_visible() {
            let coherent = buffer.is_coherent();
            let buffer = self.buffers.get_mut(handle)?;
            let slice = buffer
                .as_slice_mut()
                .ok_or_else(|| Error::Context("buffer lost its mapping".to_owned()))?;
            slice[offset as usize..offset as usize + data.len()].copy_from_slice(data);
            if !coherent {
                self.flush_mapped_memory(handle, offset, data.len() as u64)?;
            }
            return Ok(());
        }

        let destination = buffer.raw();
        let (staging, mut staging_allocation) = self.create_staging_buffer(data)?;
        let cmd = self.immediate.acquire()?;
        let region = vk::BufferCopy2::default()
            .src_offset(0)
            .dst_offset(offset)
            .size(data.len() as u64);
        let regions = [region];
        let copy_info = vk::CopyBufferInfo2::default()
            .src_buffer(staging)
            .dst_buffer(destination)
            .regions(&regions);
        unsafe { self.device.cmd_copy_buffer2(cmd.raw(), &copy_info) };
        let submit = self.immediate.submit(cmd)?;
        self.immediate.wait(submit)?;
        unsafe { self.allocator.destroy_buffer(staging, &mut staging_allocation) };
        Ok(())
    }

    /// Flushes a mapped range of a non-coherent host-visible buffer. No-op
    /// for coherent memory.
    pub fn flush_mapped_memory(
        &self,
        handle: Handle<Buffer>,
        offset: u64,
        size: u64,
    ) -> Result<()> {
        let buffer = self.buffers.get(handle)?;
        if buffer.is_coherent() {
            return Ok(());
        }
        let allocation = buffer
            .allocation
            .as_ref()
            .ok_or_else(|| Error::Context("buffer has no allocation".to_owned()))?;
        self.allocator
            .flush_allocation(allocation, offset, size)
            .map_err(|err| Error::Allocation(format!("flush failed: {err}")))
    }

    fn create_staging_buffer(&self, data: &[u8]) -> Result<(vk::Buffer, vk_mem::Allocation)> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(data.len() as u64)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferHost,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE
                | vk_mem::AllocationCreateFlags::MAPPED,
            ..Default::default()
        };
        let (buffer, allocation) = unsafe {
            self.allocator
                .create_buffer(&buffer_info, &alloc_info)
                .map_err(|err| Error::Allocation(format!("staging allocation failed: {err}")))?
        };
        let info = self.allocator.get_allocation_info(&allocation);
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), info.mapped_data.cast(), data.len());
        }
        if let Err(err) = self
            .allocator
            .flush_allocation(&allocation, 0, vk::WHOLE_SIZE)
        {
            let mut allocation = allocation;
            unsafe { self.allocator.destroy_buffer(buffer, &mut allocation) };
            return Err(Error::Allocation(format!("staging flush failed: {err}")));
        }
        Ok((buffer, allocation))
    }

    // -----------------------------------------------------------------------
    // Destruction
    // -----------------------------------------------------------------------

    pub fn destroy_texture(&mut self, handle: Handle<Texture>) -> Result<()> {
        if self.textures.get(handle)?.is_swapchain() {
            tracing::warn!("ignoring destroy of a swapchain texture");
            return Ok(());
        }
        let record = self.textures.destroy(handle)?;
        self.descriptors.set_dirty();
        self.deleter.defer(self.frame_index, move |device, allocator| {
            let mut record = record;
            record.destroy_views(device);
            if let (true, Some(mut allocation)) = (record.is_owned, record.allocation.take()) {
                unsafe { allocator.destroy_image(record.image, &mut allocation) };
            }
        });
        Ok(())
    }

    pub fn destroy_sampler(&mut self, handle: Handle<Sampler>) -> Result<()> {
        let record = self.samplers.destroy(handle)?;
        self.descriptors.set_dirty();
        self.deleter.defer(self.frame_index, move |device, _| unsafe {
            device.destroy_sampler(record.raw(), None);
        });
        Ok(())
    }

    pub fn destroy_buffer(&mut self, handle: Handle<Buffer>) -> Result<()> {
        let record = self.buffers.destroy(handle)?;
        self.deleter.defer(self.frame_index, move |_, allocator| {
            let mut record = record;
            if let Some(mut allocation) = record.allocation.take() {
                unsafe { allocator.destroy_buffer(record.raw(), &mut allocation) };
            }
        });
        Ok(())
    }

    pub fn destroy_shader_module(&mut self, handle: Handle<ShaderModule>) -> Result<()> {
        let record = self.shader_modules.destroy(handle)?;
        self.deleter.defer(self.frame_index, move |device, _| unsafe {
            for stage in &record.stages {
                device.destroy_shader_module(stage.module, None);
            }
        });
        Ok(())
    }

    pub fn destroy_graphics_pipeline(&mut self, handle: Handle<GraphicsPipeline>) -> Result<()> {
        let record = self.graphics_pipelines.destroy(handle)?;
        self.deleter.defer(self.frame_index, move |device, _| unsafe {
            device.destroy_pipeline(record.raw(), None);
            device.destroy_pipeline_layout(record.raw_layout(), None);
        });
        Ok(())
    }

    pub fn destroy_compute_pipeline(&mut self, handle: Handle<ComputePipeline>) -> Result<()> {
        let record = self.compute_pipelines.destroy(handle)?;
        self.deleter.defer(self.frame_index, move |device, _| unsafe {
            device.destroy_pipeline(record.raw(), None);
            device.destroy_pipeline_layout(record.raw_layout(), None);
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Frame protocol
    // -----------------------------------------------------------------------

    /// Checks a command buffer out of the ring, after running the frame-start
    /// bookkeeping: retired holders, deferred tasks, due deletions, and the
    /// descriptor grow/rewrite cycle.
    pub fn acquire_command_buffer(&mut self) -> Result<CommandBuffer> {
        self.process_retired();
        self.process_deferred_tasks()?;
        self.deleter
            .drain(&self.device, &self.allocator, self.frame_index);
        self.descriptors.maybe_grow(
            self.textures.slot_count(),
            self.samplers.slot_count(),
            &mut self.deleter,
            self.frame_index,
        )?;
        if self.descriptors.is_dirty() {
            let dummy = self.textures.get(self.dummy_texture)?;
            let dummy_view = dummy.view();
            let dummy_storage_view = if dummy.storage_view() != vk::ImageView::null() {
                dummy.storage_view()
            } else {
                dummy.view()
            };
            let dummy_sampler = self.samplers.get(self.dummy_sampler)?.raw();
            let plan = plan_rewrite(
                &self.textures,
                &self.samplers,
                dummy_view,
                dummy_storage_view,
                dummy_sampler,
            );
            self.descriptors.apply_rewrite(&plan)?;
        }
        self.immediate.acquire()
    }

    /// Acquires the swapchain image for this frame and wires its semaphore
    /// into the next submit.
    pub fn acquire_swapchain_texture(&mut self) -> Result<Handle<Texture>> {
        let swapchain = self
            .swapchain
            .as_mut()
            .ok_or_else(|| Error::Context("context has no swapchain".to_owned()))?;
        swapchain.acquire(&mut self.immediate)
    }

    /// Submits a command buffer. With a `present` target the swapchain image
    /// is transitioned to `PRESENT_SRC`, the submit signals the pacing
    /// timeline, and the image is presented. The frame index always advances.
    ///
    /// `present` must be the handle returned by
    /// [`acquire_swapchain_texture`](Self::acquire_swapchain_texture) this
    /// frame.
    pub fn submit(
        &mut self,
        cmd: CommandBuffer,
        present: Option<Handle<Texture>>,
    ) -> Result<SubmitHandle> {
        let mut presenting = false;
        if let Some(target) = present {
            let swapchain = self
                .swapchain
                .as_mut()
                .ok_or_else(|| Error::Context("context has no swapchain".to_owned()))?;
            if swapchain.current_texture() != Some(target) {
                return Err(Error::Context(
                    "present target is not the acquired swapchain image".to_owned(),
                ));
            }
            let record = self.textures.get(target)?;
            texture::record_transition(
                &self.device,
                cmd.raw(),
                record.raw_image(),
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::GENERAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
                0,
                1,
                1,
            );
            swapchain.prepare_present(&mut self.immediate, self.frame_index);
            presenting = true;
        }

        let handle = self.immediate.submit(cmd)?;

        if presenting {
            let wait = self.immediate.take_last_submit_semaphore();
            let queue = self.device.graphics_queue().queue;
            if let Some(swapchain) = self.swapchain.as_mut() {
                swapchain.present(wait, queue)?;
            }
        }
        self.frame_index += 1;
        Ok(handle)
    }

    /// Recreates the swapchain after a window resize (or an out-of-date
    /// present).
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.immediate.wait_all()?;
        if let Some(swapchain) = self.swapchain.as_mut() {
            swapchain.resize(width, height, &mut self.textures)?;
            self.descriptors.set_dirty();
        }
        Ok(())
    }

    /// Runs `task` at a frame start once `handle`'s submission has completed
    /// on the GPU.
    pub fn defer_task(&mut self, handle: SubmitHandle, task: impl FnOnce() + 'static) {
        self.tasks.push((handle, Box::new(task)));
    }

    /// Runs `task` at the start of the next frame. Empty submit handles are
    /// always ready, so this is `defer_task` with no GPU dependency.
    pub fn pre_frame_task(&mut self, task: impl FnOnce() + 'static) {
        self.defer_task(SubmitHandle::default(), task);
    }

    /// Blocks until the GPU is idle and runs every pending teardown.
    pub fn wait_idle(&mut self) -> Result<()> {
        self.immediate.wait_all()?;
        self.process_retired();
        self.deleter.drain_all(&self.device, &self.allocator);
        Ok(())
    }

    pub fn is_ready(&self, handle: SubmitHandle) -> Result<bool> {
        self.immediate.is_ready(handle)
    }

    pub fn wait_submit(&mut self, handle: SubmitHandle) -> Result<()> {
        self.immediate.wait(handle)
    }

    fn process_retired(&mut self) {
        for retired in self.retired.drain() {
            // Stale retirements (handle already destroyed explicitly) are
            // fine to drop on the floor.
            let _ = match retired {
                Retired::Texture(handle) => self.destroy_texture(handle),
                Retired::Sampler(handle) => self.destroy_sampler(handle),
                Retired::Buffer(handle) => self.destroy_buffer(handle),
                Retired::ShaderModule(handle) => self.destroy_shader_module(handle),
                Retired::GraphicsPipeline(handle) => self.destroy_graphics_pipeline(handle),
                Retired::ComputePipeline(handle) => self.destroy_compute_pipeline(handle),
            };
        }
    }

    fn process_deferred_tasks(&mut self) -> Result<()> {
        if self.tasks.is_empty() {
            return Ok(());
        }
        let tasks = std::mem::take(&mut self.tasks);
        for (handle, task) in tasks {
            if self.immediate.is_ready(handle)? {
                task();
            } else {
                self.tasks.push((handle, task));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Command recording helpers
    // -----------------------------------------------------------------------

    /// Binds a graphics pipeline plus the bindless set on all four set
    /// indices.
    pub fn cmd_bind_graphics_pipeline(
        &self,
        cmd: &CommandBuffer,
        handle: Handle<GraphicsPipeline>,
    ) -> Result<()> {
        let record = self.graphics_pipelines.get(handle)?;
        let sets = [self.descriptors.set(); 4];
        unsafe {
            self.device.cmd_bind_pipeline(
                cmd.raw(),
                vk::PipelineBindPoint::GRAPHICS,
                record.raw(),
            );
            self.device.cmd_bind_descriptor_sets(
                cmd.raw(),
                vk::PipelineBindPoint::GRAPHICS,
                record.raw_layout(),
                0,
                &sets,
                &[],
            );
        }
        Ok(())
    }

    /// Binds a compute pipeline plus the bindless set on all four set
    /// indices.
    pub fn cmd_bind_compute_pipeline(
        &self,
        cmd: &CommandBuffer,
        handle: Handle<ComputePipeline>,
    ) -> Result<()> {
        let record = self.compute_pipelines.get(handle)?;
        let sets = [self.descriptors.set(); 4];
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd.raw(), vk::PipelineBindPoint::COMPUTE, record.raw());
            self.device.cmd_bind_descriptor_sets(
                cmd.raw(),
                vk::PipelineBindPoint::COMPUTE,
                record.raw_layout(),
                0,
                &sets,
                &[],
            );
        }
        Ok(())
    }

    pub fn cmd_push_graphics_constants(
        &self,
        cmd: &CommandBuffer,
        handle: Handle<GraphicsPipeline>,
        data: &[u8],
    ) -> Result<()> {
        let record = self.graphics_pipelines.get(handle)?;
        unsafe {
            self.device.cmd_push_constants(
                cmd.raw(),
                record.raw_layout(),
                record.stage_flags(),
                0,
                data,
            );
        }
        Ok(())
    }

    pub fn cmd_push_compute_constants(
        &self,
        cmd: &CommandBuffer,
        handle: Handle<ComputePipeline>,
        data: &[u8],
    ) -> Result<()> {
        let record = self.compute_pipelines.get(handle)?;
        unsafe {
            self.device.cmd_push_constants(
                cmd.raw(),
                record.raw_layout(),
                vk::ShaderStageFlags::COMPUTE,
                0,
                data,
            );
        }
        Ok(())
    }

    /// Transitions the attachments, begins dynamic rendering over them and
    /// sets every dynamic state to a drawable default (full viewport and
    /// scissor, no depth bias, depth test/write enabled iff a depth
    /// attachment is present).
    pub fn cmd_begin_rendering(
        &mut self,
        cmd: &CommandBuffer,
        colors: &[ColorAttachment],
        depth: Option<&DepthAttachment>,
    ) -> Result<()> {
        if colors.len() > MAX_COLOR_ATTACHMENTS {
            return Err(Error::Context(format!(
                "too many colour attachments: {}",
                colors.len()
            )));
        }
        let device = self.device.clone();
        let mut render_extent = vk::Extent2D::default();

        let mut color_infos: SmallVec<[vk::RenderingAttachmentInfo; MAX_COLOR_ATTACHMENTS]> =
            SmallVec::new();
        for attachment in colors {
            let record = self.textures.get_mut(attachment.texture)?;
            let extent = record.extent();
            render_extent = vk::Extent2D {
                width: (extent.width >> attachment.mip).max(1),
                height: (extent.height >> attachment.mip).max(1),
            };
            let whole = attachment.mip == 0
                && attachment.layer == 0
                && record.mip_levels() == 1
                && record.layers() == 1;
            let view = if whole {
                record.view()
            } else {
                record.get_or_create_attachment_view(&device, attachment.mip, attachment.layer)?
            };
            // A fresh swapchain image has no defined contents to preserve.
            let old_layout = if attachment.clear.is_some() || record.is_swapchain() {
                vk::ImageLayout::UNDEFINED
            } else {
                vk::ImageLayout::GENERAL
            };
            texture::record_transition(
                &device,
                cmd.raw(),
                record.raw_image(),
                vk::ImageAspectFlags::COLOR,
                old_layout,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                attachment.mip,
                1,
                record.layers(),
            );
            let mut info = vk::RenderingAttachmentInfo::default()
                .image_view(view)
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .store_op(vk::AttachmentStoreOp::STORE);
            info = match attachment.clear {
                Some(clear) => info
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .clear_value(vk::ClearValue {
                        color: clear.to_vk(),
                    }),
                None => info.load_op(vk::AttachmentLoadOp::LOAD),
            };
            color_infos.push(info);
        }

        let depth_info = match depth {
            Some(attachment) => {
                let record = self.textures.get_mut(attachment.texture)?;
                let old_layout = if attachment.clear.is_some() {
                    vk::ImageLayout::UNDEFINED
                } else {
                    vk::ImageLayout::GENERAL
                };
                texture::record_transition(
                    &device,
                    cmd.raw(),
                    record.raw_image(),
                    record.aspect_mask(),
                    old_layout,
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                    0,
                    1,
                    record.layers(),
                );
                if colors.is_empty() {
                    let extent = record.extent();
                    render_extent = vk::Extent2D {
                        width: extent.width,
                        height: extent.height,
                    };
                }
                let mut info = vk::RenderingAttachmentInfo::default()
                    .image_view(record.view())
                    .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                    .store_op(vk::AttachmentStoreOp::STORE);
                info = match attachment.clear {
                    Some(depth_value) => info.load_op(vk::AttachmentLoadOp::CLEAR).clear_value(
                        vk::ClearValue {
                            depth_stencil: vk::ClearDepthStencilValue {
                                depth: depth_value,
                                stencil: 0,
                            },
                        },
                    ),
                    None => info.load_op(vk::AttachmentLoadOp::LOAD),
                };
                Some(info)
            }
            None => None,
        };

        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: render_extent,
        };
        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_infos);
        if let Some(ref info) = depth_info {
            rendering_info = rendering_info.depth_attachment(info);
        }
        unsafe { device.cmd_begin_rendering(cmd.raw(), &rendering_info) };

        self.cmd_set_viewport_scissor(cmd, render_extent);
        let has_depth = depth.is_some();
        self.cmd_set_depth_state(cmd, has_depth, has_depth, CompareOp::Less);
        unsafe {
            device.cmd_set_depth_bias_enable(cmd.raw(), false);
            device.cmd_set_depth_bias(cmd.raw(), 0.0, 0.0, 0.0);
            device.cmd_set_blend_constants(cmd.raw(), &[0.0; 4]);
        }
        Ok(())
    }

    /// Ends dynamic rendering and moves the attachments back to `GENERAL`.
    pub fn cmd_end_rendering(
        &mut self,
        cmd: &CommandBuffer,
        colors: &[ColorAttachment],
        depth: Option<&DepthAttachment>,
    ) -> Result<()> {
        unsafe { self.device.cmd_end_rendering(cmd.raw()) };
        let device = self.device.clone();
        for attachment in colors {
            let record = self.textures.get(attachment.texture)?;
            texture::record_transition(
                &device,
                cmd.raw(),
                record.raw_image(),
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::GENERAL,
                attachment.mip,
                1,
                record.layers(),
            );
        }
        if let Some(attachment) = depth {
            let record = self.textures.get(attachment.texture)?;
            texture::record_transition(
                &device,
                cmd.raw(),
                record.raw_image(),
                record.aspect_mask(),
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::GENERAL,
                0,
                1,
                record.layers(),
            );
        }
        Ok(())
    }

    pub fn cmd_set_viewport_scissor(&self, cmd: &CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        unsafe {
            self.device.cmd_set_viewport(cmd.raw(), 0, &[viewport]);
            self.device.cmd_set_scissor(cmd.raw(), 0, &[scissor]);
        }
    }

    pub fn cmd_set_depth_state(
        &self,
        cmd: &CommandBuffer,
        test: bool,
        write: bool,
        compare: CompareOp,
    ) {
        unsafe {
            self.device.cmd_set_depth_test_enable(cmd.raw(), test);
            self.device.cmd_set_depth_write_enable(cmd.raw(), write);
            self.device
                .cmd_set_depth_compare_op(cmd.raw(), compare.to_vk());
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }
        self.process_retired();
        // Outstanding tasks were waiting on submissions that just completed.
        for (_, task) in self.tasks.drain(..) {
            task();
        }
        if let Some(mut swapchain) = self.swapchain.take() {
            swapchain.destroy(&mut self.textures);
        }

        for mut record in self.textures.drain_live() {
            if record.is_swapchain() {
                continue;
            }
            record.destroy_views(&self.device);
            if let (true, Some(mut allocation)) = (record.is_owned, record.allocation.take()) {
                unsafe { self.allocator.destroy_image(record.image, &mut allocation) };
            }
        }
        for record in self.samplers.drain_live() {
            unsafe { self.device.destroy_sampler(record.raw(), None) };
        }
        for mut record in self.buffers.drain_live() {
            if let Some(mut allocation) = record.allocation.take() {
                unsafe { self.allocator.destroy_buffer(record.raw(), &mut allocation) };
            }
        }
        for record in self.shader_modules.drain_live() {
            for stage in &record.stages {
                unsafe { self.device.destroy_shader_module(stage.module, None) };
            }
        }
        for record in self.graphics_pipelines.drain_live() {
            unsafe {
                self.device.destroy_pipeline(record.raw(), None);
                self.device.destroy_pipeline_layout(record.raw_layout(), None);
            }
        }
        for record in self.compute_pipelines.drain_live() {
            unsafe {
                self.device.destroy_pipeline(record.raw(), None);
                self.device.destroy_pipeline_layout(record.raw_layout(), None);
            }
        }

        self.deleter.drain_all(&self.device, &self.allocator);
        self.descriptors.destroy();
        unsafe {
            self.device
                .instance()
                .surface_loader()
                .destroy_surface(self.surface, None);
        }
    }
}
