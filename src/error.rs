//! Crate-wide error sum.
//!
//! Every fallible operation returns [`Result`]. Narrow error enums
//! ([`PoolError`](crate::pool::PoolError), [`ParseError`](crate::shader::ParseError))
//! fold into [`Error`] via `From`, so `?` works across subsystem boundaries
//! while callers that care about the precise variant can still match on it.

use thiserror::Error;

use crate::pool::PoolError;
use crate::shader::{ParseError, ShaderStage};

#[derive(Debug, Error)]
pub enum Error {
    /// Initialisation failure: instance, device, queue or descriptor pool.
    #[error("context error: {0}")]
    Context(String),

    #[error(transparent)]
    Pool(#[from] PoolError),

    /// From the allocator facade.
    #[error("allocation error: {0}")]
    Allocation(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Shader preprocess/parse/link failure; carries the full info log.
    #[error("shader compile error ({}): {log}", stage.as_str())]
    Compile { stage: ShaderStage, log: String },

    /// The swapchain no longer matches the surface; the caller should resize.
    #[error("swapchain out of date")]
    SwapchainOutOfDate,

    #[error(transparent)]
    Vulkan(#[from] ash::vk::Result),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
