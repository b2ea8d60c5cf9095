/*!
Fixed-layout configuration records and the destination fields assignments write into.

Each render-state block owns one record. Records are plain `#[repr(C)]` words so an assignment
can address a field by byte offset and write it in place; enumerations are stored as their raw
D3D-style `u32` values and interpreted only by a [`Backend`](crate::Backend).
*/

use bytemuck::{Pod, Zeroable};

use crate::error::{Error, Result};
use crate::types::{BlockKind, ObjectKind, ScalarKind, ShaderStage};

pub mod blend {
    pub const ZERO: u32 = 1;
    pub const ONE: u32 = 2;
    pub const SRC_COLOR: u32 = 3;
    pub const INV_SRC_COLOR: u32 = 4;
    pub const SRC_ALPHA: u32 = 5;
    pub const INV_SRC_ALPHA: u32 = 6;
    pub const DEST_ALPHA: u32 = 7;
    pub const INV_DEST_ALPHA: u32 = 8;
    pub const DEST_COLOR: u32 = 9;
    pub const INV_DEST_COLOR: u32 = 10;
    pub const SRC_ALPHA_SAT: u32 = 11;
    pub const BLEND_FACTOR: u32 = 14;
    pub const INV_BLEND_FACTOR: u32 = 15;

    pub const OP_ADD: u32 = 1;
    pub const OP_SUBTRACT: u32 = 2;
    pub const OP_REV_SUBTRACT: u32 = 3;
    pub const OP_MIN: u32 = 4;
    pub const OP_MAX: u32 = 5;

    pub const WRITE_ALL: u32 = 0xF;
}

pub mod compare {
    pub const NEVER: u32 = 1;
    pub const LESS: u32 = 2;
    pub const EQUAL: u32 = 3;
    pub const LESS_EQUAL: u32 = 4;
    pub const GREATER: u32 = 5;
    pub const NOT_EQUAL: u32 = 6;
    pub const GREATER_EQUAL: u32 = 7;
    pub const ALWAYS: u32 = 8;
}

pub mod stencil {
    pub const KEEP: u32 = 1;
    pub const ZERO: u32 = 2;
    pub const REPLACE: u32 = 3;
    pub const INCR_SAT: u32 = 4;
    pub const DECR_SAT: u32 = 5;
    pub const INVERT: u32 = 6;
    pub const INCR: u32 = 7;
    pub const DECR: u32 = 8;
}

pub mod raster {
    pub const FILL_WIREFRAME: u32 = 2;
    pub const FILL_SOLID: u32 = 3;
    pub const CULL_NONE: u32 = 1;
    pub const CULL_FRONT: u32 = 2;
    pub const CULL_BACK: u32 = 3;
}

pub mod sampler {
    pub const FILTER_MIN_MAG_MIP_POINT: u32 = 0x00;
    pub const FILTER_MIN_MAG_MIP_LINEAR: u32 = 0x15;
    pub const FILTER_ANISOTROPIC: u32 = 0x55;
    /// Set on comparison filters.
    pub const FILTER_COMPARISON_BIT: u32 = 0x80;

    pub const ADDRESS_WRAP: u32 = 1;
    pub const ADDRESS_MIRROR: u32 = 2;
    pub const ADDRESS_CLAMP: u32 = 3;
    pub const ADDRESS_BORDER: u32 = 4;
    pub const ADDRESS_MIRROR_ONCE: u32 = 5;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RenderTargetBlend {
    pub blend_enable: u32,
    pub src_blend: u32,
    pub dest_blend: u32,
    pub blend_op: u32,
    pub src_blend_alpha: u32,
    pub dest_blend_alpha: u32,
    pub blend_op_alpha: u32,
    pub write_mask: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BlendRecord {
    pub alpha_to_coverage: u32,
    pub independent_blend: u32,
    pub render_targets: [RenderTargetBlend; 8],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct StencilFace {
    pub fail_op: u32,
    pub depth_fail_op: u32,
    pub pass_op: u32,
    pub func: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DepthStencilRecord {
    pub depth_enable: u32,
    pub depth_write_mask: u32,
    pub depth_func: u32,
    pub stencil_enable: u32,
    pub stencil_read_mask: u32,
    pub stencil_write_mask: u32,
    pub front: StencilFace,
    pub back: StencilFace,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RasterizerRecord {
    pub fill_mode: u32,
    pub cull_mode: u32,
    pub front_counter_clockwise: u32,
    pub depth_bias: i32,
    pub depth_bias_clamp: f32,
    pub slope_scaled_depth_bias: f32,
    pub depth_clip_enable: u32,
    pub scissor_enable: u32,
    pub multisample_enable: u32,
    pub antialiased_line_enable: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SamplerRecord {
    pub filter: u32,
    pub address_u: u32,
    pub address_v: u32,
    pub address_w: u32,
    pub mip_lod_bias: f32,
    pub max_anisotropy: u32,
    pub comparison_func: u32,
    pub border_color: [f32; 4],
    pub min_lod: f32,
    pub max_lod: f32,
}

/// Scalar state a pass sets directly, outside of any block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PassRecord {
    pub blend_factor: [f32; 4],
    pub sample_mask: u32,
    pub stencil_ref: u32,
}

impl Default for RenderTargetBlend {
    fn default() -> Self {
        RenderTargetBlend {
            blend_enable: 0,
            src_blend: blend::ONE,
            dest_blend: blend::ZERO,
            blend_op: blend::OP_ADD,
            src_blend_alpha: blend::ONE,
            dest_blend_alpha: blend::ZERO,
            blend_op_alpha: blend::OP_ADD,
            write_mask: blend::WRITE_ALL,
        }
    }
}

impl Default for BlendRecord {
    fn default() -> Self {
        BlendRecord {
            alpha_to_coverage: 0,
            independent_blend: 0,
            render_targets: [RenderTargetBlend::default(); 8],
        }
    }
}

impl Default for StencilFace {
    fn default() -> Self {
        StencilFace {
            fail_op: stencil::KEEP,
            depth_fail_op: stencil::KEEP,
            pass_op: stencil::KEEP,
            func: compare::ALWAYS,
        }
    }
}

impl Default for DepthStencilRecord {
    fn default() -> Self {
        DepthStencilRecord {
            depth_enable: 1,
            depth_write_mask: 1,
            depth_func: compare::LESS,
            stencil_enable: 0,
            stencil_read_mask: 0xFF,
            stencil_write_mask: 0xFF,
            front: StencilFace::default(),
            back: StencilFace::default(),
        }
    }
}

impl Default for RasterizerRecord {
    fn default() -> Self {
        RasterizerRecord {
            fill_mode: raster::FILL_SOLID,
            cull_mode: raster::CULL_BACK,
            front_counter_clockwise: 0,
            depth_bias: 0,
            depth_bias_clamp: 0.0,
            slope_scaled_depth_bias: 0.0,
            depth_clip_enable: 1,
            scissor_enable: 0,
            multisample_enable: 0,
            antialiased_line_enable: 0,
        }
    }
}

impl Default for SamplerRecord {
    fn default() -> Self {
        SamplerRecord {
            filter: sampler::FILTER_MIN_MAG_MIP_LINEAR,
            address_u: sampler::ADDRESS_CLAMP,
            address_v: sampler::ADDRESS_CLAMP,
            address_w: sampler::ADDRESS_CLAMP,
            mip_lod_bias: 0.0,
            max_anisotropy: 16,
            comparison_func: compare::NEVER,
            border_color: [1.0; 4],
            min_lod: f32::MIN,
            max_lod: f32::MAX,
        }
    }
}

impl Default for PassRecord {
    fn default() -> Self {
        PassRecord {
            blend_factor: [1.0; 4],
            sample_mask: 0xFFFF_FFFF,
            stencil_ref: 0,
        }
    }
}

/// The configuration record of one render-state block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StateRecord {
    Blend(BlendRecord),
    DepthStencil(DepthStencilRecord),
    Rasterizer(RasterizerRecord),
    Sampler(SamplerRecord),
}

impl StateRecord {
    /// A record of `kind` holding its defaults. Shader blocks have no record.
    pub fn default_for(kind: BlockKind) -> Option<Self> {
        Some(match kind {
            BlockKind::Blend => StateRecord::Blend(BlendRecord::default()),
            BlockKind::DepthStencil => StateRecord::DepthStencil(DepthStencilRecord::default()),
            BlockKind::Rasterizer => StateRecord::Rasterizer(RasterizerRecord::default()),
            BlockKind::Sampler => StateRecord::Sampler(SamplerRecord::default()),
            BlockKind::Shader(_) => return None,
        })
    }

    pub fn record_kind(&self) -> RecordKind {
        match self {
            StateRecord::Blend(_) => RecordKind::Blend,
            StateRecord::DepthStencil(_) => RecordKind::DepthStencil,
            StateRecord::Rasterizer(_) => RecordKind::Rasterizer,
            StateRecord::Sampler(_) => RecordKind::Sampler,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            StateRecord::Blend(r) => bytemuck::bytes_of(r),
            StateRecord::DepthStencil(r) => bytemuck::bytes_of(r),
            StateRecord::Rasterizer(r) => bytemuck::bytes_of(r),
            StateRecord::Sampler(r) => bytemuck::bytes_of(r),
        }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            StateRecord::Blend(r) => bytemuck::bytes_of_mut(r),
            StateRecord::DepthStencil(r) => bytemuck::bytes_of_mut(r),
            StateRecord::Rasterizer(r) => bytemuck::bytes_of_mut(r),
            StateRecord::Sampler(r) => bytemuck::bytes_of_mut(r),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Blend,
    DepthStencil,
    Rasterizer,
    Sampler,
    Pass,
}

/// A pointer-valued slot of a pass: the state or shader block it binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingSlot {
    Blend,
    DepthStencil,
    Rasterizer,
    Shader(ShaderStage),
}

impl BindingSlot {
    pub const COUNT: usize = 9;

    pub const ALL: [BindingSlot; BindingSlot::COUNT] = [
        BindingSlot::Blend,
        BindingSlot::DepthStencil,
        BindingSlot::Rasterizer,
        BindingSlot::Shader(ShaderStage::Vertex),
        BindingSlot::Shader(ShaderStage::Pixel),
        BindingSlot::Shader(ShaderStage::Geometry),
        BindingSlot::Shader(ShaderStage::Hull),
        BindingSlot::Shader(ShaderStage::Domain),
        BindingSlot::Shader(ShaderStage::Compute),
    ];

    pub const fn index(self) -> usize {
        match self {
            BindingSlot::Blend => 0,
            BindingSlot::DepthStencil => 1,
            BindingSlot::Rasterizer => 2,
            BindingSlot::Shader(stage) => 3 + stage.index(),
        }
    }

    /// The object kind a variable must have to be bound here.
    pub const fn object_kind(self) -> ObjectKind {
        match self {
            BindingSlot::Blend => ObjectKind::Blend,
            BindingSlot::DepthStencil => ObjectKind::DepthStencil,
            BindingSlot::Rasterizer => ObjectKind::Rasterizer,
            BindingSlot::Shader(ShaderStage::Vertex) => ObjectKind::VertexShader,
            BindingSlot::Shader(ShaderStage::Pixel) => ObjectKind::PixelShader,
            BindingSlot::Shader(ShaderStage::Geometry) => ObjectKind::GeometryShader,
            BindingSlot::Shader(ShaderStage::Hull) => ObjectKind::HullShader,
            BindingSlot::Shader(ShaderStage::Domain) => ObjectKind::DomainShader,
            BindingSlot::Shader(ShaderStage::Compute) => ObjectKind::ComputeShader,
        }
    }

    pub const fn block_kind(self) -> BlockKind {
        match self {
            BindingSlot::Blend => BlockKind::Blend,
            BindingSlot::DepthStencil => BlockKind::DepthStencil,
            BindingSlot::Rasterizer => BlockKind::Rasterizer,
            BindingSlot::Shader(stage) => BlockKind::Shader(stage),
        }
    }
}

/// A scalar or vector field inside a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldInfo {
    pub record: RecordKind,
    pub offset: u32,
    pub scalar: ScalarKind,
    pub components: u32,
    /// Number of indexable elements; fields that are not per-render-target have one.
    pub max_index: u32,
}

/// Byte distance between consecutive elements of an indexed field.
pub const FIELD_ELEMENT_STRIDE: u32 = 32;

impl FieldInfo {
    pub fn byte_offset(&self, index: u32) -> Result<u32> {
        if index >= self.max_index {
            return Err(Error::format(format!(
                "destination index {index} exceeds field limit {}",
                self.max_index
            )));
        }
        Ok(self.offset + index * FIELD_ELEMENT_STRIDE)
    }

    pub fn byte_len(&self) -> u32 {
        self.components * self.scalar.component_size()
    }
}

/// What an assignment's `lhs` id addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lhs {
    Binding(BindingSlot),
    Field(FieldInfo),
}

const fn field(record: RecordKind, offset: u32, scalar: ScalarKind, components: u32) -> Lhs {
    Lhs::Field(FieldInfo {
        record,
        offset,
        scalar,
        components,
        max_index: 1,
    })
}

const fn render_target_field(offset: u32, scalar: ScalarKind) -> Lhs {
    Lhs::Field(FieldInfo {
        record: RecordKind::Blend,
        offset: 8 + offset,
        scalar,
        components: 1,
        max_index: 8,
    })
}

impl Lhs {
    pub fn from_id(id: u32) -> Result<Self> {
        use RecordKind::*;
        use ScalarKind::{Bool, Float, Int, UInt};
        Ok(match id {
            1 => Lhs::Binding(BindingSlot::Blend),
            2 => Lhs::Binding(BindingSlot::DepthStencil),
            3 => Lhs::Binding(BindingSlot::Rasterizer),
            4..=9 => Lhs::Binding(BindingSlot::Shader(ShaderStage::ALL[(id - 4) as usize])),
            10 => field(Pass, 0, Float, 4),
            11 => field(Pass, 16, UInt, 1),
            12 => field(Pass, 20, UInt, 1),

            20 => field(Rasterizer, 0, UInt, 1),
            21 => field(Rasterizer, 4, UInt, 1),
            22 => field(Rasterizer, 8, Bool, 1),
            23 => field(Rasterizer, 12, Int, 1),
            24 => field(Rasterizer, 16, Float, 1),
            25 => field(Rasterizer, 20, Float, 1),
            26..=29 => field(Rasterizer, 24 + (id - 26) * 4, Bool, 1),

            40 => field(DepthStencil, 0, Bool, 1),
            41..=42 => field(DepthStencil, 4 + (id - 41) * 4, UInt, 1),
            43 => field(DepthStencil, 12, Bool, 1),
            44..=53 => field(DepthStencil, 16 + (id - 44) * 4, UInt, 1),

            60 => field(Blend, 0, Bool, 1),
            61 => render_target_field(0, Bool),
            62..=68 => render_target_field(4 + (id - 62) * 4, UInt),

            80..=83 => field(Sampler, (id - 80) * 4, UInt, 1),
            84 => field(Sampler, 16, Float, 1),
            85..=86 => field(Sampler, 20 + (id - 85) * 4, UInt, 1),
            87 => field(Sampler, 28, Float, 4),
            88..=89 => field(Sampler, 44 + (id - 88) * 4, Float, 1),

            other => return Err(Error::format(format!("unknown destination id {other}"))),
        })
    }

    /// The inverse of [`Lhs::from_id`].
    pub fn id(&self) -> u32 {
        (1..=89)
            .find(|id| Lhs::from_id(*id).is_ok_and(|lhs| lhs == *self))
            .unwrap_or(0)
    }
}

/// Per-stage pointer slots of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassBindings<B> {
    slots: [Option<B>; BindingSlot::COUNT],
}

impl<B: Copy> PassBindings<B> {
    pub fn empty() -> Self {
        PassBindings {
            slots: [None; BindingSlot::COUNT],
        }
    }

    pub fn get(&self, slot: BindingSlot) -> Option<B> {
        self.slots[slot.index()]
    }

    pub fn set(&mut self, slot: BindingSlot, value: Option<B>) {
        self.slots[slot.index()] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = B> + '_ {
        self.slots.iter().flatten().copied()
    }

    pub fn map<C: Copy>(&self, mut f: impl FnMut(B) -> C) -> PassBindings<C> {
        PassBindings {
            slots: self.slots.map(|slot| slot.map(&mut f)),
        }
    }

    pub fn try_map<C: Copy, E>(&self, mut f: impl FnMut(B) -> std::result::Result<C, E>) -> std::result::Result<PassBindings<C>, E> {
        let mut out = PassBindings::empty();
        for (target, source) in out.slots.iter_mut().zip(self.slots) {
            *target = source.map(&mut f).transpose()?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    fn field_info(id: u32) -> FieldInfo {
        match Lhs::from_id(id).unwrap() {
            Lhs::Field(info) => info,
            Lhs::Binding(_) => panic!("{id} is a binding"),
        }
    }

    #[test]
    fn record_sizes() {
        assert_eq!(size_of::<RenderTargetBlend>(), FIELD_ELEMENT_STRIDE as usize);
        assert_eq!(size_of::<BlendRecord>(), 8 + 8 * 32);
        assert_eq!(size_of::<DepthStencilRecord>(), 56);
        assert_eq!(size_of::<RasterizerRecord>(), 40);
        assert_eq!(size_of::<SamplerRecord>(), 52);
        assert_eq!(size_of::<PassRecord>(), 24);
    }

    #[test]
    fn destination_offsets_match_records() {
        assert_eq!(field_info(10).offset as usize, offset_of!(PassRecord, blend_factor));
        assert_eq!(field_info(12).offset as usize, offset_of!(PassRecord, stencil_ref));
        assert_eq!(field_info(23).offset as usize, offset_of!(RasterizerRecord, depth_bias));
        assert_eq!(field_info(29).offset as usize, offset_of!(RasterizerRecord, antialiased_line_enable));
        assert_eq!(field_info(43).offset as usize, offset_of!(DepthStencilRecord, stencil_enable));
        assert_eq!(field_info(53).offset as usize, offset_of!(DepthStencilRecord, back) + offset_of!(StencilFace, func));
        assert_eq!(field_info(68).offset as usize, 8 + offset_of!(RenderTargetBlend, write_mask));
        assert_eq!(field_info(87).offset as usize, offset_of!(SamplerRecord, border_color));
        assert_eq!(field_info(89).offset as usize, offset_of!(SamplerRecord, max_lod));
    }

    #[test]
    fn indexed_fields() {
        let write_mask = field_info(68);
        assert_eq!(write_mask.byte_offset(7).unwrap(), 8 + 28 + 7 * 32);
        assert!(write_mask.byte_offset(8).is_err());
        assert!(field_info(20).byte_offset(1).is_err());
    }

    #[test]
    fn binding_ids() {
        assert_eq!(Lhs::from_id(5).unwrap(), Lhs::Binding(BindingSlot::Shader(ShaderStage::Pixel)));
        assert!(Lhs::from_id(13).is_err());
        assert!(Lhs::from_id(90).is_err());
        assert_eq!(Lhs::from_id(66).unwrap().id(), 66);
    }

    #[test]
    fn defaults_are_written_bytewise() {
        let mut record = StateRecord::default_for(BlockKind::Rasterizer).unwrap();
        let info = field_info(21);
        record.bytes_mut()[info.offset as usize..][..4].copy_from_slice(&raster::CULL_NONE.to_le_bytes());
        let StateRecord::Rasterizer(rasterizer) = record else {
            panic!("kind changed");
        };
        assert_eq!(rasterizer.cull_mode, raster::CULL_NONE);
        assert_eq!(rasterizer.fill_mode, raster::FILL_SOLID);
        assert!(StateRecord::default_for(BlockKind::Shader(ShaderStage::Vertex)).is_none());
    }
}
