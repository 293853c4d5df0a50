//! Shared value types: formats, usage bitmasks, clear values and the
//! description structs consumed by resource creation.
//!
//! Everything here is plain data with a mapping onto the corresponding `vk`
//! type. The conversions are total in one direction (ours → Vulkan); the
//! reverse mappings exist only where the swapchain hands formats back.

use ash::vk;
use bitflags::bitflags;

/// Texel and vertex-attribute formats understood by the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    Invalid,
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Unorm,
    Bgra8Srgb,
    A2B10G10R10Unorm,
    R16Float,
    Rg16Float,
    Rgba16Float,
    R32Float,
    Rg32Float,
    Rgb32Float,
    Rgba32Float,
    R32Uint,
    Rg32Uint,
    Depth16,
    Depth32Float,
    Depth24Stencil8,
    Depth32FloatStencil8,
}

impl Format {
    pub fn to_vk(self) -> vk::Format {
        match self {
            Format::Invalid => vk::Format::UNDEFINED,
            Format::R8Unorm => vk::Format::R8_UNORM,
            Format::Rg8Unorm => vk::Format::R8G8_UNORM,
            Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            Format::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
            Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            Format::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
            Format::A2B10G10R10Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,
            Format::R16Float => vk::Format::R16_SFLOAT,
            Format::Rg16Float => vk::Format::R16G16_SFLOAT,
            Format::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
            Format::R32Float => vk::Format::R32_SFLOAT,
            Format::Rg32Float => vk::Format::R32G32_SFLOAT,
            Format::Rgb32Float => vk::Format::R32G32B32_SFLOAT,
            Format::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
            Format::R32Uint => vk::Format::R32_UINT,
            Format::Rg32Uint => vk::Format::R32G32_UINT,
            Format::Depth16 => vk::Format::D16_UNORM,
            Format::Depth32Float => vk::Format::D32_SFLOAT,
            Format::Depth24Stencil8 => vk::Format::D24_UNORM_S8_UINT,
            Format::Depth32FloatStencil8 => vk::Format::D32_SFLOAT_S8_UINT,
        }
    }

    pub fn from_vk(format: vk::Format) -> Self {
        match format {
            vk::Format::R8_UNORM => Format::R8Unorm,
            vk::Format::R8G8_UNORM => Format::Rg8Unorm,
            vk::Format::R8G8B8A8_UNORM => Format::Rgba8Unorm,
            vk::Format::R8G8B8A8_SRGB => Format::Rgba8Srgb,
            vk::Format::B8G8R8A8_UNORM => Format::Bgra8Unorm,
            vk::Format::B8G8R8A8_SRGB => Format::Bgra8Srgb,
            vk::Format::A2B10G10R10_UNORM_PACK32 => Format::A2B10G10R10Unorm,
            vk::Format::R16_SFLOAT => Format::R16Float,
            vk::Format::R16G16_SFLOAT => Format::Rg16Float,
            vk::Format::R16G16B16A16_SFLOAT => Format::Rgba16Float,
            vk::Format::R32_SFLOAT => Format::R32Float,
            vk::Format::R32G32_SFLOAT => Format::Rg32Float,
            vk::Format::R32G32B32_SFLOAT => Format::Rgb32Float,
            vk::Format::R32G32B32A32_SFLOAT => Format::Rgba32Float,
            vk::Format::R32_UINT => Format::R32Uint,
            vk::Format::R32G32_UINT => Format::Rg32Uint,
            vk::Format::D16_UNORM => Format::Depth16,
            vk::Format::D32_SFLOAT => Format::Depth32Float,
            vk::Format::D24_UNORM_S8_UINT => Format::Depth24Stencil8,
            vk::Format::D32_SFLOAT_S8_UINT => Format::Depth32FloatStencil8,
            _ => Format::Invalid,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(
            self,
            Format::Depth16
                | Format::Depth32Float
                | Format::Depth24Stencil8
                | Format::Depth32FloatStencil8
        )
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, Format::Depth24Stencil8 | Format::Depth32FloatStencil8)
    }

    pub fn is_srgb(self) -> bool {
        matches!(self, Format::Rgba8Srgb | Format::Bgra8Srgb)
    }

    /// The linear counterpart of an sRGB format. Storage image views cannot
    /// use sRGB formats, so storage views of sRGB textures alias this format.
    pub fn non_srgb(self) -> Format {
        match self {
            Format::Rgba8Srgb => Format::Rgba8Unorm,
            Format::Bgra8Srgb => Format::Bgra8Unorm,
            other => other,
        }
    }

    pub fn aspect_mask(self) -> vk::ImageAspectFlags {
        if self.is_depth() {
            let mut mask = vk::ImageAspectFlags::DEPTH;
            if self.has_stencil() {
                mask |= vk::ImageAspectFlags::STENCIL;
            }
            mask
        } else {
            vk::ImageAspectFlags::COLOR
        }
    }

    /// Bytes per texel for linear upload formats. Depth formats are never
    /// uploaded from host payloads.
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            Format::Invalid => 0,
            Format::R8Unorm => 1,
            Format::Rg8Unorm | Format::R16Float => 2,
            Format::Rgba8Unorm
            | Format::Rgba8Srgb
            | Format::Bgra8Unorm
            | Format::Bgra8Srgb
            | Format::A2B10G10R10Unorm
            | Format::Rg16Float
            | Format::R32Float
            | Format::R32Uint => 4,
            Format::Rgba16Float | Format::Rg32Float | Format::Rg32Uint => 8,
            Format::Rgb32Float => 12,
            Format::Rgba32Float => 16,
            Format::Depth16 => 2,
            Format::Depth32Float | Format::Depth24Stencil8 => 4,
            Format::Depth32FloatStencil8 => 5,
        }
    }
}

bitflags! {
    /// How a texture may be used. Mapped onto `vk::ImageUsageFlags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TextureUsage: u32 {
        const SAMPLED = 1 << 0;
        const STORAGE = 1 << 1;
        const ATTACHMENT = 1 << 2;
        const TRANSFER_SRC = 1 << 3;
        const TRANSFER_DST = 1 << 4;
    }
}

impl TextureUsage {
    pub fn to_vk(self, format: Format) -> vk::ImageUsageFlags {
        let mut usage = vk::ImageUsageFlags::empty();
        if self.contains(TextureUsage::SAMPLED) {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }
        if self.contains(TextureUsage::STORAGE) {
            usage |= vk::ImageUsageFlags::STORAGE;
        }
        if self.contains(TextureUsage::ATTACHMENT) {
            usage |= if format.is_depth() {
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::ImageUsageFlags::COLOR_ATTACHMENT
            };
        }
        if self.contains(TextureUsage::TRANSFER_SRC) {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        if self.contains(TextureUsage::TRANSFER_DST) {
            usage |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        usage
    }
}

bitflags! {
    /// How a buffer may be used. Mapped onto `vk::BufferUsageFlags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const INDIRECT = 1 << 4;
        const TRANSFER_SRC = 1 << 5;
        const TRANSFER_DST = 1 << 6;
        const DEVICE_ADDRESS = 1 << 7;
    }
}

impl BufferUsage {
    pub fn to_vk(self) -> vk::BufferUsageFlags {
        let mut usage = vk::BufferUsageFlags::empty();
        if self.contains(BufferUsage::VERTEX) {
            usage |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if self.contains(BufferUsage::INDEX) {
            usage |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if self.contains(BufferUsage::UNIFORM) {
            usage |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if self.contains(BufferUsage::STORAGE) {
            usage |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        if self.contains(BufferUsage::INDIRECT) {
            usage |= vk::BufferUsageFlags::INDIRECT_BUFFER;
        }
        if self.contains(BufferUsage::TRANSFER_SRC) {
            usage |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        if self.contains(BufferUsage::TRANSFER_DST) {
            usage |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        if self.contains(BufferUsage::DEVICE_ADDRESS) {
            usage |= vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        }
        usage
    }
}

/// Where a buffer's memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageClass {
    /// GPU-only memory. Uploads go through a staging copy.
    #[default]
    DeviceLocal,
    /// Host-visible, host-coherent, persistently mapped.
    HostVisible,
    /// Lazily allocated, for transient attachments.
    Transient,
}

/// A typed clear value for an attachment.
///
/// One of three 4-tuples; tagged rather than reinterpreted so the intent is
/// visible at the call site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Float([f32; 4]),
    Uint([u32; 4]),
    Int([i32; 4]),
}

impl Default for ClearValue {
    fn default() -> Self {
        ClearValue::Float([0.0; 4])
    }
}

impl ClearValue {
    pub fn to_vk(self) -> vk::ClearColorValue {
        match self {
            ClearValue::Float(float32) => vk::ClearColorValue { float32 },
            ClearValue::Uint(uint32) => vk::ClearColorValue { uint32 },
            ClearValue::Int(int32) => vk::ClearColorValue { int32 },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3d {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    pub fn to_vk(self) -> vk::Extent3D {
        vk::Extent3D {
            width: self.width,
            height: self.height,
            depth: self.depth.max(1),
        }
    }
}

/// Mip count for a full chain: `floor(log2(max(w, h, d))) + 1`.
pub fn full_mip_count(extent: Extent3d) -> u32 {
    let largest = extent.width.max(extent.height).max(extent.depth).max(1);
    32 - largest.leading_zeros()
}

// ---------------------------------------------------------------------------
// Sampler state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

impl FilterMode {
    pub fn to_vk(self) -> vk::Filter {
        match self {
            FilterMode::Nearest => vk::Filter::NEAREST,
            FilterMode::Linear => vk::Filter::LINEAR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum MipmapMode {
    Nearest,
    #[default]
    Linear,
}

impl MipmapMode {
    pub fn to_vk(self) -> vk::SamplerMipmapMode {
        match self {
            MipmapMode::Nearest => vk::SamplerMipmapMode::NEAREST,
            MipmapMode::Linear => vk::SamplerMipmapMode::LINEAR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum WrapMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

impl WrapMode {
    pub fn to_vk(self) -> vk::SamplerAddressMode {
        match self {
            WrapMode::Repeat => vk::SamplerAddressMode::REPEAT,
            WrapMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
            WrapMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            WrapMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum BorderColor {
    #[default]
    TransparentBlackFloat,
    TransparentBlackInt,
    OpaqueBlackFloat,
    OpaqueBlackInt,
    OpaqueWhiteFloat,
    OpaqueWhiteInt,
}

impl BorderColor {
    pub fn to_vk(self) -> vk::BorderColor {
        match self {
            BorderColor::TransparentBlackFloat => vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
            BorderColor::TransparentBlackInt => vk::BorderColor::INT_TRANSPARENT_BLACK,
            BorderColor::OpaqueBlackFloat => vk::BorderColor::FLOAT_OPAQUE_BLACK,
            BorderColor::OpaqueBlackInt => vk::BorderColor::INT_OPAQUE_BLACK,
            BorderColor::OpaqueWhiteFloat => vk::BorderColor::FLOAT_OPAQUE_WHITE,
            BorderColor::OpaqueWhiteInt => vk::BorderColor::INT_OPAQUE_WHITE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum CompareOp {
    #[default]
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

impl CompareOp {
    pub fn to_vk(self) -> vk::CompareOp {
        match self {
            CompareOp::Never => vk::CompareOp::NEVER,
            CompareOp::Less => vk::CompareOp::LESS,
            CompareOp::Equal => vk::CompareOp::EQUAL,
            CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareOp::Greater => vk::CompareOp::GREATER,
            CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
            CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
            CompareOp::Always => vk::CompareOp::ALWAYS,
        }
    }
}

/// Immutable sampler state.
#[derive(Debug, Clone, Copy, PartialEq, Hash)]
pub struct SamplerDescription {
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
    pub wrap_w: WrapMode,
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub mipmap_mode: MipmapMode,
    pub min_lod: OrderedLod,
    pub max_lod: OrderedLod,
    pub border_color: BorderColor,
    pub compare_op: Option<CompareOp>,
}

/// Lod endpoint stored as quarter-steps so the description stays hashable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderedLod(i32);

impl OrderedLod {
    pub fn from_f32(lod: f32) -> Self {
        Self((lod * 4.0) as i32)
    }

    pub fn to_f32(self) -> f32 {
        self.0 as f32 / 4.0
    }
}

impl Default for SamplerDescription {
    fn default() -> Self {
        Self {
            wrap_u: WrapMode::Repeat,
            wrap_v: WrapMode::Repeat,
            wrap_w: WrapMode::Repeat,
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            mipmap_mode: MipmapMode::Linear,
            min_lod: OrderedLod::from_f32(0.0),
            max_lod: OrderedLod::from_f32(vk::LOD_CLAMP_NONE),
            border_color: BorderColor::TransparentBlackFloat,
            compare_op: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
    PatchList,
}

impl Topology {
    pub fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            Topology::PointList => vk::PrimitiveTopology::POINT_LIST,
            Topology::LineList => vk::PrimitiveTopology::LINE_LIST,
            Topology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
            Topology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            Topology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
            Topology::PatchList => vk::PrimitiveTopology::PATCH_LIST,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
}

impl PolygonMode {
    pub fn to_vk(self) -> vk::PolygonMode {
        match self {
            PolygonMode::Fill => vk::PolygonMode::FILL,
            PolygonMode::Line => vk::PolygonMode::LINE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

impl CullMode {
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindingMode {
    #[default]
    CounterClockwise,
    Clockwise,
}

impl WindingMode {
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            WindingMode::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            WindingMode::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendFactor {
    #[default]
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    BlendColor,
    OneMinusBlendColor,
    BlendAlpha,
    OneMinusBlendAlpha,
    SrcAlphaSaturated,
}

impl BlendFactor {
    pub fn to_vk(self) -> vk::BlendFactor {
        match self {
            BlendFactor::Zero => vk::BlendFactor::ZERO,
            BlendFactor::One => vk::BlendFactor::ONE,
            BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
            BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
            BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
            BlendFactor::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
            BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
            BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
            BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
            BlendFactor::BlendColor => vk::BlendFactor::CONSTANT_COLOR,
            BlendFactor::OneMinusBlendColor => vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR,
            BlendFactor::BlendAlpha => vk::BlendFactor::CONSTANT_ALPHA,
            BlendFactor::OneMinusBlendAlpha => vk::BlendFactor::ONE_MINUS_CONSTANT_ALPHA,
            BlendFactor::SrcAlphaSaturated => vk::BlendFactor::SRC_ALPHA_SATURATE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

impl BlendOp {
    pub fn to_vk(self) -> vk::BlendOp {
        match self {
            BlendOp::Add => vk::BlendOp::ADD,
            BlendOp::Subtract => vk::BlendOp::SUBTRACT,
            BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
            BlendOp::Min => vk::BlendOp::MIN,
            BlendOp::Max => vk::BlendOp::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

impl StencilOp {
    pub fn to_vk(self) -> vk::StencilOp {
        match self {
            StencilOp::Keep => vk::StencilOp::KEEP,
            StencilOp::Zero => vk::StencilOp::ZERO,
            StencilOp::Replace => vk::StencilOp::REPLACE,
            StencilOp::IncrementClamp => vk::StencilOp::INCREMENT_AND_CLAMP,
            StencilOp::DecrementClamp => vk::StencilOp::DECREMENT_AND_CLAMP,
            StencilOp::Invert => vk::StencilOp::INVERT,
            StencilOp::IncrementWrap => vk::StencilOp::INCREMENT_AND_WRAP,
            StencilOp::DecrementWrap => vk::StencilOp::DECREMENT_AND_WRAP,
        }
    }
}

/// Per-face stencil state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StencilState {
    pub stencil_failure_op: StencilOp,
    pub depth_failure_op: StencilOp,
    pub pass_op: StencilOp,
    pub compare_op: CompareOp,
    pub compare_mask: u32,
    pub write_mask: u32,
    pub enabled: bool,
}

impl Default for StencilState {
    fn default() -> Self {
        Self {
            stencil_failure_op: StencilOp::Keep,
            depth_failure_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
            compare_op: CompareOp::Always,
            compare_mask: 0xff,
            write_mask: 0xff,
            enabled: false,
        }
    }
}

impl StencilState {
    pub fn to_vk(self) -> vk::StencilOpState {
        vk::StencilOpState {
            fail_op: self.stencil_failure_op.to_vk(),
            pass_op: self.pass_op.to_vk(),
            depth_fail_op: self.depth_failure_op.to_vk(),
            compare_op: self.compare_op.to_vk(),
            compare_mask: self.compare_mask,
            write_mask: self.write_mask,
            reference: 0,
        }
    }
}

/// Blend and format state for one colour attachment slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorAttachmentState {
    pub format: Format,
    pub blend_enabled: bool,
    pub src_color_blend_factor: BlendFactor,
    pub dst_color_blend_factor: BlendFactor,
    pub color_blend_op: BlendOp,
    pub src_alpha_blend_factor: BlendFactor,
    pub dst_alpha_blend_factor: BlendFactor,
    pub alpha_blend_op: BlendOp,
}

impl Default for ColorAttachmentState {
    fn default() -> Self {
        Self {
            format: Format::Invalid,
            blend_enabled: false,
            src_color_blend_factor: BlendFactor::One,
            dst_color_blend_factor: BlendFactor::Zero,
            color_blend_op: BlendOp::Add,
            src_alpha_blend_factor: BlendFactor::One,
            dst_alpha_blend_factor: BlendFactor::Zero,
            alpha_blend_op: BlendOp::Add,
        }
    }
}

pub const MAX_COLOR_ATTACHMENTS: usize = 8;
pub const MAX_VERTEX_ATTRIBUTES: usize = 16;
pub const MAX_VERTEX_BINDINGS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: Format,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VertexInputRate {
    #[default]
    Vertex,
    Instance,
}

impl VertexInputRate {
    pub fn to_vk(self) -> vk::VertexInputRate {
        match self {
            VertexInputRate::Vertex => vk::VertexInputRate::VERTEX,
            VertexInputRate::Instance => vk::VertexInputRate::INSTANCE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub rate: VertexInputRate,
}

/// Vertex fetch layout: up to 16 attributes over up to 16 bindings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VertexInput {
    pub attributes: Vec<VertexAttribute>,
    pub bindings: Vec<VertexBinding>,
}

// ---------------------------------------------------------------------------
// Resource descriptions
// ---------------------------------------------------------------------------

/// Everything needed to create a texture.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextureDescription<'a> {
    pub extent: Extent3d,
    pub format: Format,
    pub usage: TextureUsage,
    pub layers: u32,
    /// `None` selects the full chain for the extent.
    pub mip_count: Option<u32>,
    pub sample_count: u32,
    pub data: Option<&'a [u8]>,
    pub debug_name: &'a str,
}

impl TextureDescription<'_> {
    /// The mip count this description resolves to: the explicit count clamped
    /// to the extent's full chain, or the full chain when unset.
    pub fn resolved_mip_count(&self) -> u32 {
        let full = full_mip_count(self.extent);
        self.mip_count.unwrap_or(full).clamp(1, full)
    }
}

/// Everything needed to create a buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferDescription<'a> {
    pub size: u64,
    pub storage: StorageClass,
    pub usage: BufferUsage,
    pub data: Option<&'a [u8]>,
    pub debug_name: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_mip_count_matches_log2_floor() {
        assert_eq!(full_mip_count(Extent3d::new(1, 1, 1)), 1);
        assert_eq!(full_mip_count(Extent3d::new(2, 2, 1)), 2);
        assert_eq!(full_mip_count(Extent3d::new(1024, 512, 1)), 11);
        assert_eq!(full_mip_count(Extent3d::new(100, 300, 1)), 9);
    }

    #[test]
    fn mip_count_defaults_to_full_chain_without_payload() {
        let description = TextureDescription {
            extent: Extent3d::new(256, 256, 1),
            ..Default::default()
        };
        assert_eq!(description.resolved_mip_count(), 9);

        let explicit = TextureDescription {
            extent: Extent3d::new(256, 256, 1),
            mip_count: Some(1),
            ..Default::default()
        };
        assert_eq!(explicit.resolved_mip_count(), 1);

        let over = TextureDescription {
            extent: Extent3d::new(256, 256, 1),
            mip_count: Some(99),
            ..Default::default()
        };
        assert_eq!(over.resolved_mip_count(), 9);
    }

    #[test]
    fn usage_flags_map_attachment_by_format() {
        let usage = TextureUsage::ATTACHMENT | TextureUsage::SAMPLED;
        assert!(
            usage
                .to_vk(Format::Depth32Float)
                .contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
        );
        assert!(
            usage
                .to_vk(Format::Rgba8Unorm)
                .contains(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED)
        );
    }

    #[test]
    fn depth_aspects() {
        assert_eq!(
            Format::Depth24Stencil8.aspect_mask(),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            Format::Depth32Float.aspect_mask(),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(Format::Rgba8Srgb.aspect_mask(), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn clear_value_is_tagged() {
        let c = ClearValue::Uint([1, 2, 3, 4]);
        let vk = c.to_vk();
        assert_eq!(unsafe { vk.uint32 }, [1, 2, 3, 4]);
    }
}
