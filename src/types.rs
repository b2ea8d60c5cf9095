// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Type descriptors and the register layout rules they obey.

A [`TypeDescriptor`] is created once per distinct shape while loading, interned by the
[`pool`](crate::pool), and shared by every variable of that shape. Struct members refer to
their member types by canonical [`TypeRef`], so two descriptors compare equal exactly when
they are structurally identical.
*/

use crate::bittricks::{self, REGISTER_SIZE};
use crate::error::{Error, Result};
use crate::pool::{StrRef, TypeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Float,
    Int,
    UInt,
    Bool,
    Double,
}

impl ScalarKind {
    pub fn from_raw(raw: u32) -> Result<Self> {
        Ok(match raw {
            1 => ScalarKind::Float,
            2 => ScalarKind::Int,
            3 => ScalarKind::UInt,
            4 => ScalarKind::Bool,
            5 => ScalarKind::Double,
            other => return Err(Error::format(format!("unknown scalar kind {other}"))),
        })
    }

    pub const fn to_raw(self) -> u32 {
        match self {
            ScalarKind::Float => 1,
            ScalarKind::Int => 2,
            ScalarKind::UInt => 3,
            ScalarKind::Bool => 4,
            ScalarKind::Double => 5,
        }
    }

    /// Bytes occupied by one component in a constant buffer.
    pub const fn component_size(self) -> u32 {
        match self {
            ScalarKind::Double => 8,
            _ => 4,
        }
    }

    /// Whether values of this kind can be used as a runtime array index.
    pub const fn is_index(self) -> bool {
        matches!(self, ScalarKind::Int | ScalarKind::UInt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericLayout {
    Scalar,
    Vector,
    Matrix,
}

impl NumericLayout {
    fn from_raw(raw: u32) -> Result<Self> {
        Ok(match raw {
            1 => NumericLayout::Scalar,
            2 => NumericLayout::Vector,
            3 => NumericLayout::Matrix,
            other => return Err(Error::format(format!("unknown numeric layout {other}"))),
        })
    }

    const fn to_raw(self) -> u32 {
        match self {
            NumericLayout::Scalar => 1,
            NumericLayout::Vector => 2,
            NumericLayout::Matrix => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    String,
    Blend,
    DepthStencil,
    Rasterizer,
    Sampler,
    VertexShader,
    PixelShader,
    GeometryShader,
    HullShader,
    DomainShader,
    ComputeShader,
    Texture,
    RenderTargetView,
    DepthStencilView,
    UnorderedAccessView,
    Buffer,
}

const OBJECT_KINDS: [ObjectKind; 16] = [
    ObjectKind::String,
    ObjectKind::Blend,
    ObjectKind::DepthStencil,
    ObjectKind::Rasterizer,
    ObjectKind::Sampler,
    ObjectKind::VertexShader,
    ObjectKind::PixelShader,
    ObjectKind::GeometryShader,
    ObjectKind::HullShader,
    ObjectKind::DomainShader,
    ObjectKind::ComputeShader,
    ObjectKind::Texture,
    ObjectKind::RenderTargetView,
    ObjectKind::DepthStencilView,
    ObjectKind::UnorderedAccessView,
    ObjectKind::Buffer,
];

impl ObjectKind {
    pub fn from_raw(raw: u32) -> Result<Self> {
        raw.checked_sub(1)
            .and_then(|index| OBJECT_KINDS.get(index as usize))
            .copied()
            .ok_or_else(|| Error::format(format!("unknown object kind {raw}")))
    }

    pub fn to_raw(self) -> u32 {
        OBJECT_KINDS
            .iter()
            .position(|kind| *kind == self)
            .map_or(0, |index| index as u32 + 1)
    }

    /// The block kind that backs each element of a variable of this kind, if any.
    pub fn block_kind(self) -> Option<BlockKind> {
        Some(match self {
            ObjectKind::Blend => BlockKind::Blend,
            ObjectKind::DepthStencil => BlockKind::DepthStencil,
            ObjectKind::Rasterizer => BlockKind::Rasterizer,
            ObjectKind::Sampler => BlockKind::Sampler,
            ObjectKind::VertexShader => BlockKind::Shader(ShaderStage::Vertex),
            ObjectKind::PixelShader => BlockKind::Shader(ShaderStage::Pixel),
            ObjectKind::GeometryShader => BlockKind::Shader(ShaderStage::Geometry),
            ObjectKind::HullShader => BlockKind::Shader(ShaderStage::Hull),
            ObjectKind::DomainShader => BlockKind::Shader(ShaderStage::Domain),
            ObjectKind::ComputeShader => BlockKind::Shader(ShaderStage::Compute),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Geometry,
    Hull,
    Domain,
    Compute,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 6] = [
        ShaderStage::Vertex,
        ShaderStage::Pixel,
        ShaderStage::Geometry,
        ShaderStage::Hull,
        ShaderStage::Domain,
        ShaderStage::Compute,
    ];

    pub const fn index(self) -> usize {
        match self {
            ShaderStage::Vertex => 0,
            ShaderStage::Pixel => 1,
            ShaderStage::Geometry => 2,
            ShaderStage::Hull => 3,
            ShaderStage::Domain => 4,
            ShaderStage::Compute => 5,
        }
    }
}

/// The kind of runtime block an object element lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Blend,
    DepthStencil,
    Rasterizer,
    Sampler,
    Shader(ShaderStage),
}

/// Shape of a numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NumericType {
    pub layout: NumericLayout,
    pub scalar: ScalarKind,
    pub rows: u32,
    pub columns: u32,
    pub column_major: bool,
    pub packed_array: bool,
}

impl NumericType {
    pub const fn scalar(scalar: ScalarKind) -> Self {
        NumericType {
            layout: NumericLayout::Scalar,
            scalar,
            rows: 1,
            columns: 1,
            column_major: false,
            packed_array: false,
        }
    }

    pub const fn vector(scalar: ScalarKind, columns: u32) -> Self {
        NumericType {
            layout: NumericLayout::Vector,
            scalar,
            rows: 1,
            columns,
            column_major: false,
            packed_array: false,
        }
    }

    pub const fn matrix(scalar: ScalarKind, rows: u32, columns: u32, column_major: bool) -> Self {
        NumericType {
            layout: NumericLayout::Matrix,
            scalar,
            rows,
            columns,
            column_major,
            packed_array: false,
        }
    }

    pub fn unpack(packed: u32) -> Result<Self> {
        let ty = NumericType {
            layout: NumericLayout::from_raw(bittricks::bits(packed, 0, 3))?,
            scalar: ScalarKind::from_raw(bittricks::bits(packed, 3, 5))?,
            rows: bittricks::bits(packed, 8, 3),
            columns: bittricks::bits(packed, 11, 3),
            column_major: bittricks::bits(packed, 14, 1) != 0,
            packed_array: bittricks::bits(packed, 15, 1) != 0,
        };
        ty.validate()?;
        Ok(ty)
    }

    pub fn pack(&self) -> u32 {
        bittricks::put_bits(self.layout.to_raw(), 0, 3)
            | bittricks::put_bits(self.scalar.to_raw(), 3, 5)
            | bittricks::put_bits(self.rows, 8, 3)
            | bittricks::put_bits(self.columns, 11, 3)
            | bittricks::put_bits(self.column_major as u32, 14, 1)
            | bittricks::put_bits(self.packed_array as u32, 15, 1)
    }

    fn validate(&self) -> Result<()> {
        let dims_ok = (1..=4).contains(&self.rows) && (1..=4).contains(&self.columns);
        let layout_ok = match self.layout {
            NumericLayout::Scalar => self.rows == 1 && self.columns == 1,
            NumericLayout::Vector => self.rows == 1,
            NumericLayout::Matrix => true,
        };
        if !dims_ok || !layout_ok {
            return Err(Error::format(format!(
                "numeric type {:?} {}x{} has inconsistent dimensions",
                self.layout, self.rows, self.columns
            )));
        }
        let width = self.register_width() * self.scalar.component_size();
        if width > REGISTER_SIZE {
            return Err(Error::format(format!(
                "numeric type {:?} {:?} {}x{} needs {width} bytes per register",
                self.layout, self.scalar, self.rows, self.columns
            )));
        }
        Ok(())
    }

    /// Components stored in one register: the vector width, or one matrix row or column.
    const fn register_width(&self) -> u32 {
        match self.layout {
            NumericLayout::Matrix if self.column_major => self.rows,
            _ => self.columns,
        }
    }

    pub const fn components(&self) -> u32 {
        self.rows * self.columns
    }

    /// Bytes one element occupies in a constant buffer, without trailing padding.
    pub fn element_size(&self) -> u32 {
        let component = self.scalar.component_size();
        match self.layout {
            NumericLayout::Scalar | NumericLayout::Vector => self.columns * component,
            NumericLayout::Matrix => {
                let (registers, vector) = if self.column_major {
                    (self.columns, self.rows)
                } else {
                    (self.rows, self.columns)
                };
                (registers - 1) * REGISTER_SIZE + vector * component
            }
        }
    }

    pub fn packed_element_size(&self) -> u32 {
        self.components() * self.scalar.component_size()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Member {
    pub name: StrRef,
    pub semantic: Option<StrRef>,
    pub offset: u32,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Numeric(NumericType),
    Object(ObjectKind),
    Struct {
        members: Box<[Member]>,
        base: Option<TypeRef>,
        implements_interface: bool,
    },
    Interface,
}

/// A canonical description of a variable's shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    pub kind: TypeKind,
    pub name: StrRef,
    /// Array length, or 0 when the type is not an array.
    pub elements: u32,
    pub element_size: u32,
    pub stride: u32,
    pub total_size: u32,
    pub packed_size: u32,
}

/// Sizes computed from a type's shape, used both to validate container records and to
/// author them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sizes {
    pub element_size: u32,
    pub stride: u32,
    pub total_size: u32,
    pub packed_size: u32,
}

impl Sizes {
    const ZERO: Sizes = Sizes {
        element_size: 0,
        stride: 0,
        total_size: 0,
        packed_size: 0,
    };

    fn for_elements(element_size: u32, packed_element: u32, elements: u32, packed_array: bool) -> Result<Sizes> {
        let count = elements.max(1);
        let stride = if packed_array {
            element_size
        } else {
            bittricks::align_to_register(element_size, "type stride")?
        };
        let total_size =
            bittricks::align_to_register(bittricks::checked_mul(count, stride, "type total size")?, "type total size")?;
        let packed_size = bittricks::checked_mul(count, packed_element, "type packed size")?;
        Ok(Sizes {
            element_size,
            stride,
            total_size,
            packed_size,
        })
    }

    pub fn numeric(ty: &NumericType, elements: u32) -> Result<Sizes> {
        Sizes::for_elements(ty.element_size(), ty.packed_element_size(), elements, ty.packed_array)
    }

    /// Sizes of a struct whose members have already been placed.
    ///
    /// `member_sizes` pairs each member with its resolved descriptor.
    pub fn structure(members: &[(Member, &TypeDescriptor)], elements: u32) -> Result<Sizes> {
        let mut previous_offset = 0;
        let mut element_size = 0;
        let mut packed_element = 0u32;
        for (member, member_type) in members {
            let footprint = member_type.footprint()?;
            if member.offset < previous_offset {
                return Err(Error::format(format!(
                    "struct member offset {} precedes previous member at {previous_offset}",
                    member.offset
                )));
            }
            check_register_placement(member.offset, footprint, "struct member")?;
            previous_offset = member.offset;
            element_size = element_size.max(bittricks::checked_add(member.offset, footprint, "struct size")?);
            packed_element = bittricks::checked_add(packed_element, member_type.packed_size, "struct packed size")?;
        }
        Sizes::for_elements(element_size, packed_element, elements, false)
    }
}

/// Enforces that a value crossing a register boundary starts on one.
pub fn check_register_placement(offset: u32, footprint: u32, what: &str) -> Result<()> {
    if bittricks::crosses_register(offset, footprint) && offset % REGISTER_SIZE != 0 {
        return Err(Error::format(format!(
            "{what} at offset {offset} with size {footprint} straddles a register boundary"
        )));
    }
    Ok(())
}

impl TypeDescriptor {
    pub fn numeric(name: StrRef, ty: NumericType, elements: u32) -> Result<Self> {
        ty.validate()?;
        let sizes = Sizes::numeric(&ty, elements)?;
        Ok(TypeDescriptor::with_sizes(TypeKind::Numeric(ty), name, elements, sizes))
    }

    pub fn object(name: StrRef, kind: ObjectKind, elements: u32) -> Self {
        TypeDescriptor::with_sizes(TypeKind::Object(kind), name, elements, Sizes::ZERO)
    }

    pub fn interface(name: StrRef, elements: u32) -> Self {
        TypeDescriptor::with_sizes(TypeKind::Interface, name, elements, Sizes::ZERO)
    }

    pub(crate) fn with_sizes(kind: TypeKind, name: StrRef, elements: u32, sizes: Sizes) -> Self {
        TypeDescriptor {
            kind,
            name,
            elements,
            element_size: sizes.element_size,
            stride: sizes.stride,
            total_size: sizes.total_size,
            packed_size: sizes.packed_size,
        }
    }

    pub fn sizes(&self) -> Sizes {
        Sizes {
            element_size: self.element_size,
            stride: self.stride,
            total_size: self.total_size,
            packed_size: self.packed_size,
        }
    }

    /// Number of elements, treating a non-array as one.
    pub fn count(&self) -> u32 {
        self.elements.max(1)
    }

    /// Bytes actually touched in a buffer: every element but the last is padded to the stride.
    pub fn footprint(&self) -> Result<u32> {
        let leading = bittricks::checked_mul(self.count() - 1, self.stride, "type footprint")?;
        bittricks::checked_add(leading, self.element_size, "type footprint")
    }

    pub fn as_numeric(&self) -> Option<&NumericType> {
        match &self.kind {
            TypeKind::Numeric(numeric) => Some(numeric),
            _ => None,
        }
    }

    pub fn object_kind(&self) -> Option<ObjectKind> {
        match self.kind {
            TypeKind::Object(kind) => Some(kind),
            _ => None,
        }
    }

    /// Compares the sizes a container declares against the ones its shape implies.
    pub(crate) fn check_declared(&self, declared: Sizes) -> Result<()> {
        let expected = self.sizes();
        // element size is derived, containers only carry the other three
        if (declared.stride, declared.total_size, declared.packed_size)
            != (expected.stride, expected.total_size, expected.packed_size)
        {
            return Err(Error::format(format!(
                "declared sizes (stride {}, total {}, packed {}) do not match layout (stride {}, total {}, packed {})",
                declared.stride,
                declared.total_size,
                declared.packed_size,
                expected.stride,
                expected.total_size,
                expected.packed_size
            )));
        }
        if self.stride % REGISTER_SIZE != 0 && !matches!(&self.kind, TypeKind::Numeric(n) if n.packed_array) {
            return Err(Error::format("array stride is not register aligned"));
        }
        Ok(())
    }
}

/// The layout facts evaluation needs, copied out of a [`TypeDescriptor`] into the runtime
/// arena so they survive [`drop_reflection`](crate::Effect::drop_reflection).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub class: LayoutClass,
    pub elements: u32,
    pub element_size: u32,
    pub stride: u32,
    pub packed_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutClass {
    Numeric(NumericType),
    Struct { implements_interface: bool },
    Object(ObjectKind),
    Interface,
}

impl Layout {
    pub fn of(ty: &TypeDescriptor) -> Layout {
        let class = match &ty.kind {
            TypeKind::Numeric(numeric) => LayoutClass::Numeric(*numeric),
            TypeKind::Object(kind) => LayoutClass::Object(*kind),
            TypeKind::Struct {
                implements_interface, ..
            } => LayoutClass::Struct {
                implements_interface: *implements_interface,
            },
            TypeKind::Interface => LayoutClass::Interface,
        };
        Layout {
            class,
            elements: ty.elements,
            element_size: ty.element_size,
            stride: ty.stride,
            packed_size: ty.packed_size,
        }
    }

    pub fn count(&self) -> u32 {
        self.elements.max(1)
    }

    pub fn footprint(&self) -> u32 {
        // validated at load, so this cannot overflow for a loaded variable
        (self.count() - 1) * self.stride + self.element_size
    }

    pub fn numeric(&self) -> Option<&NumericType> {
        match &self.class {
            LayoutClass::Numeric(numeric) => Some(numeric),
            _ => None,
        }
    }

    pub fn scalar(&self) -> Option<ScalarKind> {
        self.numeric().map(|numeric| numeric.scalar)
    }

    pub fn components(&self) -> u32 {
        self.numeric().map_or(0, NumericType::components)
    }

    pub fn object_kind(&self) -> Option<ObjectKind> {
        match self.class {
            LayoutClass::Object(kind) => Some(kind),
            _ => None,
        }
    }
}

impl NumericType {
    /// Byte position of logical component `index` (row-major order) within one element.
    pub fn component_offset(&self, index: u32) -> u32 {
        let size = self.scalar.component_size();
        match self.layout {
            NumericLayout::Scalar | NumericLayout::Vector => index * size,
            NumericLayout::Matrix => {
                let (row, column) = (index / self.columns, index % self.columns);
                if self.column_major {
                    column * REGISTER_SIZE + row * size
                } else {
                    row * REGISTER_SIZE + column * size
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name() -> StrRef {
        StrRef::from_index(0)
    }

    #[test]
    fn scalar_and_vector_sizes() {
        let float = TypeDescriptor::numeric(name(), NumericType::scalar(ScalarKind::Float), 0).unwrap();
        assert_eq!((float.element_size, float.stride, float.total_size, float.packed_size), (4, 16, 16, 4));

        let float3_array = TypeDescriptor::numeric(name(), NumericType::vector(ScalarKind::Float, 3), 4).unwrap();
        assert_eq!(float3_array.stride, 16);
        assert_eq!(float3_array.total_size, 64);
        assert_eq!(float3_array.packed_size, 48);
        assert_eq!(float3_array.footprint().unwrap(), 60);
    }

    #[test]
    fn matrix_sizes_follow_majorness() {
        let row_major = TypeDescriptor::numeric(name(), NumericType::matrix(ScalarKind::Float, 3, 2, false), 0).unwrap();
        // three registers of two floats each
        assert_eq!(row_major.element_size, 2 * 16 + 8);
        let column_major = TypeDescriptor::numeric(name(), NumericType::matrix(ScalarKind::Float, 3, 2, true), 0).unwrap();
        // two registers of three floats each
        assert_eq!(column_major.element_size, 16 + 12);
        assert_eq!(column_major.packed_size, 24);
    }

    #[test]
    fn packed_arrays_use_element_stride() {
        let mut ty = NumericType::scalar(ScalarKind::UInt);
        ty.packed_array = true;
        let packed = TypeDescriptor::numeric(name(), ty, 5).unwrap();
        assert_eq!(packed.stride, 4);
        assert_eq!(packed.total_size, 32);
    }

    #[test]
    fn numeric_packing_roundtrips_and_validates() {
        let ty = NumericType::matrix(ScalarKind::Int, 4, 3, true);
        assert_eq!(NumericType::unpack(ty.pack()).unwrap(), ty);
        let bad_vector = NumericType {
            rows: 2,
            ..NumericType::vector(ScalarKind::Float, 4)
        };
        assert!(NumericType::unpack(bad_vector.pack()).is_err());
        assert!(NumericType::unpack(0).is_err());
    }

    #[test]
    fn struct_members_must_not_straddle_registers() {
        let float2 = TypeDescriptor::numeric(name(), NumericType::vector(ScalarKind::Float, 2), 0).unwrap();
        let member = |offset| Member {
            name: name(),
            semantic: None,
            offset,
            ty: TypeRef::from_index(0),
        };
        assert!(Sizes::structure(&[(member(0), &float2), (member(8), &float2)], 0).is_ok());
        assert!(Sizes::structure(&[(member(0), &float2), (member(12), &float2)], 0).is_err());
        assert!(Sizes::structure(&[(member(8), &float2), (member(0), &float2)], 0).is_err());

        let sizes = Sizes::structure(&[(member(0), &float2), (member(16), &float2)], 2).unwrap();
        assert_eq!(sizes.element_size, 24);
        assert_eq!(sizes.stride, 32);
        assert_eq!(sizes.total_size, 64);
        assert_eq!(sizes.packed_size, 32);
    }

    #[test]
    fn matrix_components_follow_registers() {
        let row_major = NumericType::matrix(ScalarKind::Float, 2, 3, false);
        assert_eq!(row_major.component_offset(4), 16 + 4);
        let column_major = NumericType::matrix(ScalarKind::Float, 2, 3, true);
        assert_eq!(column_major.component_offset(4), 16 + 4);
        assert_eq!(column_major.component_offset(2), 32);
        assert_eq!(NumericType::vector(ScalarKind::Double, 2).component_offset(1), 8);
    }

    #[test]
    fn elements_wider_than_a_register_are_rejected() {
        for wide in [
            NumericType::vector(ScalarKind::Double, 3),
            NumericType::vector(ScalarKind::Double, 4),
            NumericType::matrix(ScalarKind::Double, 2, 3, false),
            NumericType::matrix(ScalarKind::Double, 3, 2, true),
        ] {
            assert!(matches!(NumericType::unpack(wide.pack()), Err(Error::InvalidFormat { .. })), "{wide:?}");
            assert!(TypeDescriptor::numeric(name(), wide, 0).is_err());
        }

        let double3x2 = NumericType::matrix(ScalarKind::Double, 3, 2, false);
        assert_eq!(NumericType::unpack(double3x2.pack()).unwrap(), double3x2);
        let column_major = NumericType::matrix(ScalarKind::Double, 2, 3, true);
        let descriptor = TypeDescriptor::numeric(name(), column_major, 0).unwrap();
        assert_eq!(descriptor.element_size, 2 * 16 + 16);
        let offsets: Vec<u32> = (0..6).map(|i| column_major.component_offset(i)).collect();
        assert_eq!(offsets, [0, 16, 32, 8, 24, 40]);
    }

    #[test]
    fn object_kinds_roundtrip() {
        for raw in 1..=16 {
            assert_eq!(ObjectKind::from_raw(raw).unwrap().to_raw(), raw);
        }
        assert!(ObjectKind::from_raw(0).is_err());
        assert!(ObjectKind::from_raw(17).is_err());
    }
}
