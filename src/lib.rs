//! # Scoria
//!
//! A bindless Vulkan 1.3 rendering context for Rust.
//!
//! Scoria keeps the Vulkan object model at arm's length: resources are
//! created through one [`Context`](context::Context), addressed by small
//! generational [`Handle`](pool::Handle)s, and indexed from shaders through a
//! single update-after-bind descriptor set. There are no per-material
//! descriptor sets and no descriptor set layouts to author.
//!
//! ## Quick Start
//!
//! ```no_run
//! use scoria::prelude::*;
//! # fn run(display: raw_window_handle::RawDisplayHandle,
//! #        window: raw_window_handle::RawWindowHandle) -> scoria::Result<()> {
//! let mut ctx = Context::new(
//!     display,
//!     window,
//!     &ContextDescription {
//!         width: 1280,
//!         height: 720,
//!         ..Default::default()
//!     },
//! )?;
//!
//! let texture = ctx.create_texture(&TextureDescription {
//!     extent: Extent3d::new(2, 2, 1),
//!     format: Format::Rgba8Unorm,
//!     usage: TextureUsage::SAMPLED,
//!     data: Some(&[0xff; 16]),
//!     ..Default::default()
//! })?;
//! // texture.handle().index() is the slot shaders index binding 0 with.
//!
//! let cmd = ctx.acquire_command_buffer()?;
//! let target = ctx.acquire_swapchain_texture()?;
//! ctx.cmd_begin_rendering(
//!     &cmd,
//!     &[ColorAttachment {
//!         texture: target,
//!         clear: Some(ClearValue::Float([0.1, 0.1, 0.1, 1.0])),
//!         ..Default::default()
//!     }],
//!     None,
//! )?;
//! ctx.cmd_end_rendering(
//!     &cmd,
//!     &[ColorAttachment { texture: target, ..Default::default() }],
//!     None,
//! )?;
//! ctx.submit(cmd, Some(target))?;
//! # Ok(()) }
//! ```
//!
//! ## Overview
//!
//! - [`context`] is the facade: resource creation, the frame protocol and
//!   command-recording helpers.
//! - [`pool`] holds the generational handle machinery; stale handles are
//!   detected, never dereferenced.
//! - [`bindless`] maintains the one descriptor set (sampled images, samplers,
//!   storage images), growing it by half whenever a pool outgrows it.
//! - [`commands`] is a 64-deep ring of command buffers chained by binary
//!   semaphores; [`deferred`] delays resource teardown by the ring depth.
//! - [`shader`] compiles multi-stage GLSL sources (split on
//!   `#pragma stage : ...`) through shaderc and reflects push constants.
//! - [`swapchain`] paces presentation with a timeline semaphore and, where
//!   available, `VK_EXT_swapchain_maintenance1` present fences.
//!
//! ## Requirements
//!
//! Vulkan 1.3 with descriptor indexing, timeline semaphores, dynamic
//! rendering, synchronization2 and buffer device address. Devices missing
//! any of these are skipped at startup.

pub mod alloc;
pub mod bindless;
pub mod buffer;
pub mod commands;
pub mod context;
pub mod deferred;
pub mod device;
pub mod error;
pub mod instance;
pub mod pipeline;
pub mod pool;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod texture;
pub mod types;

pub use alloc::Allocator;
pub use context::Context;
pub use device::{Device, HasDevice};
pub use error::{Error, Result};
pub use instance::Instance;

pub use ash;

pub mod prelude {
    pub use crate::{
        ash,
        ash::vk,
        buffer::Buffer,
        commands::{CommandBuffer, SubmitHandle},
        context::{ColorAttachment, Context, ContextDescription, DepthAttachment},
        pipeline::{
            ComputePipelineDescription, GraphicsPipelineDescription, SpecializationConstants,
        },
        pool::{Handle, Holder},
        sampler::Sampler,
        shader::ShaderModule,
        swapchain::ColorSpace,
        texture::Texture,
        types::{
            BufferDescription, BufferUsage, ClearValue, ColorAttachmentState, Extent3d, Format,
            SamplerDescription, StorageClass, TextureDescription, TextureUsage,
        },
        Allocator, Device, Error, HasDevice, Instance, Result,
    };
}
