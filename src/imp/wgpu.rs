/*!
A [`Backend`] over a wgpu device.

wgpu has no standalone state objects, so blend, depth-stencil and rasterizer records are
translated into the wgpu structs a render pipeline is built from and kept behind their handle.
Samplers and shader modules are real device objects. Shader bytecode is read as WGSL text.

Constant buffers are created on first upload with `UNIFORM | COPY_DST` usage and written through
the queue.
*/

use std::borrow::Cow;

use rustc_hash::FxHashMap;
use wgpu::{
    AddressMode, BlendComponent, BlendFactor, BlendOperation, BlendState, BufferDescriptor, BufferUsages, ColorWrites,
    CompareFunction, DepthBiasState, Face, Features, FilterMode, FrontFace, PolygonMode, PrimitiveState,
    PrimitiveTopology, SamplerBorderColor, SamplerDescriptor, ShaderModuleDescriptor, ShaderSource, StencilFaceState,
    StencilOperation, StencilState,
};

use super::{Backend, BackendError, ConstantBufferUpload, ObjectHandle};
use crate::arena::Ref;
use crate::graph::ConstantBuffer;
use crate::state::{
    BlendRecord, DepthStencilRecord, RasterizerRecord, RenderTargetBlend, SamplerRecord, StateRecord, StencilFace,
    blend, compare, raster, sampler, stencil,
};
use crate::types::ShaderStage;

/// Depth-stencil state without the attachment format, which the pipeline supplies.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthStencil {
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
    pub stencil: StencilState,
}

impl DepthStencil {
    pub fn with_format(&self, format: wgpu::TextureFormat, bias: DepthBiasState) -> wgpu::DepthStencilState {
        wgpu::DepthStencilState {
            format,
            depth_write_enabled: self.depth_write_enabled,
            depth_compare: self.depth_compare,
            stencil: self.stencil.clone(),
            bias,
        }
    }
}

/// What a [`WgpuBackend`] handle stands for.
#[derive(Debug)]
pub enum WgpuObject {
    Blend {
        targets: [Option<BlendState>; 8],
        write_masks: [ColorWrites; 8],
        alpha_to_coverage: bool,
    },
    DepthStencil(DepthStencil),
    /// Depth bias lives on the depth-stencil state in wgpu; it is carried here until the
    /// pipeline is assembled.
    Rasterizer { primitive: PrimitiveState, bias: DepthBiasState },
    Sampler(wgpu::Sampler),
    Shader { stage: ShaderStage, module: wgpu::ShaderModule },
}

#[derive(Debug)]
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    next_handle: u64,
    objects: FxHashMap<ObjectHandle, WgpuObject>,
    buffers: FxHashMap<Ref<ConstantBuffer>, wgpu::Buffer>,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        WgpuBackend {
            device,
            queue,
            next_handle: 0,
            objects: FxHashMap::default(),
            buffers: FxHashMap::default(),
        }
    }

    pub fn object(&self, handle: ObjectHandle) -> Option<&WgpuObject> {
        self.objects.get(&handle)
    }

    /// The device buffer behind a constant buffer, once it has been uploaded.
    pub fn buffer(&self, buffer: Ref<ConstantBuffer>) -> Option<&wgpu::Buffer> {
        self.buffers.get(&buffer)
    }

    fn issue(&mut self, object: WgpuObject) -> ObjectHandle {
        self.next_handle += 1;
        let handle = ObjectHandle(self.next_handle);
        self.objects.insert(handle, object);
        handle
    }

    fn create_sampler(&self, record: &SamplerRecord) -> Result<wgpu::Sampler, BackendError> {
        let features = self.device.features();
        let address = |mode| {
            let mode = address_mode(mode)?;
            if mode == AddressMode::ClampToBorder && !features.contains(Features::ADDRESS_MODE_CLAMP_TO_BORDER) {
                return Err(unsupported("border addressing needs ADDRESS_MODE_CLAMP_TO_BORDER"));
            }
            Ok(mode)
        };
        let filters = sampler_filters(record);
        let descriptor = SamplerDescriptor {
            label: Some("effect sampler"),
            address_mode_u: address(record.address_u)?,
            address_mode_v: address(record.address_v)?,
            address_mode_w: address(record.address_w)?,
            mag_filter: filters.mag,
            min_filter: filters.min,
            mipmap_filter: filters.mip,
            lod_min_clamp: record.min_lod.max(0.0),
            lod_max_clamp: record.max_lod.clamp(record.min_lod.max(0.0), 32.0),
            compare: match filters.comparison {
                true => Some(compare_function(record.comparison_func)?),
                false => None,
            },
            anisotropy_clamp: filters.anisotropy,
            border_color: border_color(record.border_color)?,
        };
        if record.mip_lod_bias != 0.0 {
            logwise::trace_sync!("mip lod bias {bias} has no wgpu equivalent", bias = record.mip_lod_bias);
        }
        Ok(self.device.create_sampler(&descriptor))
    }
}

fn unsupported(context: &str) -> BackendError {
    BackendError::UnsupportedState(context.to_string())
}

fn blend_factor(raw: u32) -> Result<BlendFactor, BackendError> {
    Ok(match raw {
        blend::ZERO => BlendFactor::Zero,
        blend::ONE => BlendFactor::One,
        blend::SRC_COLOR => BlendFactor::Src,
        blend::INV_SRC_COLOR => BlendFactor::OneMinusSrc,
        blend::SRC_ALPHA => BlendFactor::SrcAlpha,
        blend::INV_SRC_ALPHA => BlendFactor::OneMinusSrcAlpha,
        blend::DEST_ALPHA => BlendFactor::DstAlpha,
        blend::INV_DEST_ALPHA => BlendFactor::OneMinusDstAlpha,
        blend::DEST_COLOR => BlendFactor::Dst,
        blend::INV_DEST_COLOR => BlendFactor::OneMinusDst,
        blend::SRC_ALPHA_SAT => BlendFactor::SrcAlphaSaturated,
        blend::BLEND_FACTOR => BlendFactor::Constant,
        blend::INV_BLEND_FACTOR => BlendFactor::OneMinusConstant,
        other => return Err(unsupported(&format!("blend factor {other}"))),
    })
}

fn blend_component(src: u32, dst: u32, op: u32) -> Result<BlendComponent, BackendError> {
    let operation = match op {
        blend::OP_ADD => BlendOperation::Add,
        blend::OP_SUBTRACT => BlendOperation::Subtract,
        blend::OP_REV_SUBTRACT => BlendOperation::ReverseSubtract,
        blend::OP_MIN => BlendOperation::Min,
        blend::OP_MAX => BlendOperation::Max,
        other => return Err(unsupported(&format!("blend operation {other}"))),
    };
    // wgpu requires unit factors for min and max
    if matches!(operation, BlendOperation::Min | BlendOperation::Max) {
        return Ok(BlendComponent {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::One,
            operation,
        });
    }
    Ok(BlendComponent {
        src_factor: blend_factor(src)?,
        dst_factor: blend_factor(dst)?,
        operation,
    })
}

fn target_blend(target: &RenderTargetBlend) -> Result<Option<BlendState>, BackendError> {
    if target.blend_enable == 0 {
        return Ok(None);
    }
    Ok(Some(BlendState {
        color: blend_component(target.src_blend, target.dest_blend, target.blend_op)?,
        alpha: blend_component(target.src_blend_alpha, target.dest_blend_alpha, target.blend_op_alpha)?,
    }))
}

fn blend_object(record: &BlendRecord) -> Result<WgpuObject, BackendError> {
    let mut targets = [None; 8];
    let mut write_masks = [ColorWrites::ALL; 8];
    for (index, (state, mask)) in targets.iter_mut().zip(write_masks.iter_mut()).enumerate() {
        // without independent blending every target follows the first
        let source = match record.independent_blend {
            0 => &record.render_targets[0],
            _ => &record.render_targets[index],
        };
        *state = target_blend(source)?;
        *mask = ColorWrites::from_bits_truncate(source.write_mask & blend::WRITE_ALL);
    }
    Ok(WgpuObject::Blend {
        targets,
        write_masks,
        alpha_to_coverage: record.alpha_to_coverage != 0,
    })
}

fn compare_function(raw: u32) -> Result<CompareFunction, BackendError> {
    Ok(match raw {
        compare::NEVER => CompareFunction::Never,
        compare::LESS => CompareFunction::Less,
        compare::EQUAL => CompareFunction::Equal,
        compare::LESS_EQUAL => CompareFunction::LessEqual,
        compare::GREATER => CompareFunction::Greater,
        compare::NOT_EQUAL => CompareFunction::NotEqual,
        compare::GREATER_EQUAL => CompareFunction::GreaterEqual,
        compare::ALWAYS => CompareFunction::Always,
        other => return Err(unsupported(&format!("comparison {other}"))),
    })
}

fn stencil_operation(raw: u32) -> Result<StencilOperation, BackendError> {
    Ok(match raw {
        stencil::KEEP => StencilOperation::Keep,
        stencil::ZERO => StencilOperation::Zero,
        stencil::REPLACE => StencilOperation::Replace,
        stencil::INCR_SAT => StencilOperation::IncrementClamp,
        stencil::DECR_SAT => StencilOperation::DecrementClamp,
        stencil::INVERT => StencilOperation::Invert,
        stencil::INCR => StencilOperation::IncrementWrap,
        stencil::DECR => StencilOperation::DecrementWrap,
        other => return Err(unsupported(&format!("stencil operation {other}"))),
    })
}

fn stencil_face(face: &StencilFace) -> Result<StencilFaceState, BackendError> {
    Ok(StencilFaceState {
        compare: compare_function(face.func)?,
        fail_op: stencil_operation(face.fail_op)?,
        depth_fail_op: stencil_operation(face.depth_fail_op)?,
        pass_op: stencil_operation(face.pass_op)?,
    })
}

fn depth_stencil(record: &DepthStencilRecord) -> Result<DepthStencil, BackendError> {
    let (depth_write_enabled, depth_compare) = match record.depth_enable {
        0 => (false, CompareFunction::Always),
        _ => (record.depth_write_mask != 0, compare_function(record.depth_func)?),
    };
    let stencil = match record.stencil_enable {
        0 => StencilState::default(),
        _ => StencilState {
            front: stencil_face(&record.front)?,
            back: stencil_face(&record.back)?,
            read_mask: record.stencil_read_mask,
            write_mask: record.stencil_write_mask,
        },
    };
    Ok(DepthStencil {
        depth_write_enabled,
        depth_compare,
        stencil,
    })
}

fn rasterizer(record: &RasterizerRecord, features: Features) -> Result<WgpuObject, BackendError> {
    let polygon_mode = match record.fill_mode {
        raster::FILL_SOLID => PolygonMode::Fill,
        raster::FILL_WIREFRAME if features.contains(Features::POLYGON_MODE_LINE) => PolygonMode::Line,
        raster::FILL_WIREFRAME => return Err(unsupported("wireframe fill needs POLYGON_MODE_LINE")),
        other => return Err(unsupported(&format!("fill mode {other}"))),
    };
    let cull_mode = match record.cull_mode {
        raster::CULL_NONE => None,
        raster::CULL_FRONT => Some(Face::Front),
        raster::CULL_BACK => Some(Face::Back),
        other => return Err(unsupported(&format!("cull mode {other}"))),
    };
    let primitive = PrimitiveState {
        topology: PrimitiveTopology::TriangleList,
        strip_index_format: None,
        front_face: match record.front_counter_clockwise {
            0 => FrontFace::Cw,
            _ => FrontFace::Ccw,
        },
        cull_mode,
        unclipped_depth: record.depth_clip_enable == 0 && features.contains(Features::DEPTH_CLIP_CONTROL),
        polygon_mode,
        conservative: false,
    };
    Ok(WgpuObject::Rasterizer {
        primitive,
        bias: DepthBiasState {
            constant: record.depth_bias,
            slope_scale: record.slope_scaled_depth_bias,
            clamp: record.depth_bias_clamp,
        },
    })
}

fn address_mode(raw: u32) -> Result<AddressMode, BackendError> {
    Ok(match raw {
        sampler::ADDRESS_WRAP => AddressMode::Repeat,
        sampler::ADDRESS_MIRROR => AddressMode::MirrorRepeat,
        sampler::ADDRESS_CLAMP => AddressMode::ClampToEdge,
        sampler::ADDRESS_BORDER => AddressMode::ClampToBorder,
        other => return Err(unsupported(&format!("address mode {other}"))),
    })
}

fn border_color(color: [f32; 4]) -> Result<Option<SamplerBorderColor>, BackendError> {
    Ok(Some(match color {
        [0.0, 0.0, 0.0, 0.0] => SamplerBorderColor::TransparentBlack,
        [0.0, 0.0, 0.0, 1.0] => SamplerBorderColor::OpaqueBlack,
        [1.0, 1.0, 1.0, 1.0] => SamplerBorderColor::OpaqueWhite,
        other => return Err(unsupported(&format!("border color {other:?}"))),
    }))
}

struct SamplerFilters {
    min: FilterMode,
    mag: FilterMode,
    mip: FilterMode,
    anisotropy: u16,
    comparison: bool,
}

/// Splits a packed filter value into per-stage modes. Bit 0 selects linear mip filtering,
/// bit 2 linear magnification, bit 4 linear minification and bit 6 anisotropy.
fn sampler_filters(record: &SamplerRecord) -> SamplerFilters {
    let filter = record.filter;
    let mode = |bit: u32| match filter & bit {
        0 => FilterMode::Nearest,
        _ => FilterMode::Linear,
    };
    let anisotropic = filter & 0x40 != 0;
    if anisotropic {
        return SamplerFilters {
            min: FilterMode::Linear,
            mag: FilterMode::Linear,
            mip: FilterMode::Linear,
            anisotropy: record.max_anisotropy.clamp(1, 16) as u16,
            comparison: filter & sampler::FILTER_COMPARISON_BIT != 0,
        };
    }
    SamplerFilters {
        min: mode(0x10),
        mag: mode(0x04),
        mip: mode(0x01),
        anisotropy: 1,
        comparison: filter & sampler::FILTER_COMPARISON_BIT != 0,
    }
}

impl Backend for WgpuBackend {
    fn create_state_object(&mut self, record: &StateRecord) -> Result<ObjectHandle, BackendError> {
        let object = match record {
            StateRecord::Blend(record) => blend_object(record)?,
            StateRecord::DepthStencil(record) => WgpuObject::DepthStencil(depth_stencil(record)?),
            StateRecord::Rasterizer(record) => rasterizer(record, self.device.features())?,
            StateRecord::Sampler(record) => WgpuObject::Sampler(self.create_sampler(record)?),
        };
        Ok(self.issue(object))
    }

    fn create_shader(&mut self, stage: ShaderStage, bytecode: &[u8]) -> Result<ObjectHandle, BackendError> {
        if !matches!(stage, ShaderStage::Vertex | ShaderStage::Pixel | ShaderStage::Compute) {
            return Err(BackendError::InvalidShader(format!("wgpu has no {stage:?} stage")));
        }
        let source = std::str::from_utf8(bytecode)
            .map_err(|e| BackendError::InvalidShader(format!("shader is not WGSL text: {e}")))?;
        let module = self.device.create_shader_module(ShaderModuleDescriptor {
            label: Some("effect shader"),
            source: ShaderSource::Wgsl(Cow::Borrowed(source)),
        });
        Ok(self.issue(WgpuObject::Shader { stage, module }))
    }

    fn release(&mut self, handle: ObjectHandle) {
        // wgpu objects are freed on drop
        self.objects.remove(&handle);
    }

    fn upload_constant_buffer(&mut self, upload: ConstantBufferUpload<'_>) -> Result<(), BackendError> {
        let size = upload.bytes.len() as u64;
        let stale = self.buffers.get(&upload.buffer).is_some_and(|buffer| buffer.size() != size);
        if stale {
            self.buffers.remove(&upload.buffer);
        }
        let device = &self.device;
        let buffer = self.buffers.entry(upload.buffer).or_insert_with(|| {
            logwise::trace_sync!("creating a {size}-byte uniform buffer", size = size);
            device.create_buffer(&BufferDescriptor {
                label: Some("effect constant buffer"),
                size,
                usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        self.queue.write_buffer(buffer, 0, upload.bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn independent_blend_off_copies_the_first_target() {
        let mut record = BlendRecord::default();
        record.render_targets[0].blend_enable = 1;
        record.render_targets[0].src_blend = blend::SRC_ALPHA;
        record.render_targets[0].dest_blend = blend::INV_SRC_ALPHA;
        record.render_targets[0].write_mask = 0x3;
        let WgpuObject::Blend { targets, write_masks, .. } = blend_object(&record).unwrap() else {
            panic!("expected a blend object");
        };
        assert_eq!(targets[5], targets[0]);
        assert_eq!(targets[0].unwrap().color.dst_factor, BlendFactor::OneMinusSrcAlpha);
        assert_eq!(write_masks[7], ColorWrites::RED | ColorWrites::GREEN);
    }

    #[test]
    fn unknown_enumerations_are_unsupported() {
        let mut record = RasterizerRecord::default();
        record.cull_mode = 9;
        assert!(matches!(
            rasterizer(&record, Features::empty()),
            Err(BackendError::UnsupportedState(_))
        ));
        assert!(address_mode(sampler::ADDRESS_MIRROR_ONCE).is_err());
    }

    #[test]
    fn filters_decode_per_stage() {
        let mut record = SamplerRecord::default();
        record.filter = 0x14;
        let filters = sampler_filters(&record);
        assert_eq!((filters.min, filters.mag, filters.mip), (FilterMode::Linear, FilterMode::Linear, FilterMode::Nearest));
        record.filter = sampler::FILTER_ANISOTROPIC;
        record.max_anisotropy = 64;
        assert_eq!(sampler_filters(&record).anisotropy, 16);
    }
}
