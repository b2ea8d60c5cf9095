// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Writes containers in the layout [`Reader`](super::reader::Reader) consumes.

Types are declared first and yield a [`BuilderType`] to attach to variables and annotations.
Records are described with owned spec values and serialized in section order by
[`ContainerBuilder::finish`], which also fills in every header count.

```
use effect_runtime::container::FormatVersion;
use effect_runtime::container::builder::{BufferSpec, ContainerBuilder, VariableSpec};
use effect_runtime::types::{NumericType, ScalarKind};

let mut builder = ContainerBuilder::new(FormatVersion::Fx5_0);
let float4 = builder.numeric_type("float4", NumericType::vector(ScalarKind::Float, 4), 0)?;
builder.constant_buffer(BufferSpec::new("PerFrame", 16).variable(VariableSpec::new("Tint", float4, 0)));
let bytes = builder.finish()?;
assert!(bytes.len() > FormatVersion::Fx5_0.header_size());
# Ok::<(), effect_runtime::Error>(())
```
*/

use rustc_hash::FxHashMap;

use super::{FormatVersion, Header, HeaderCounts, NONE, RhsKind};
use crate::bittricks;
use crate::error::{Error, Result};
use crate::pool::{StrRef, TypeRef};
use crate::types::{Member, NumericType, ObjectKind, ScalarKind, Sizes, TypeDescriptor, TypeKind};

/// A type record written into the blob.
#[derive(Debug, Clone)]
pub struct BuilderType {
    offset: u32,
    descriptor: TypeDescriptor,
}

impl BuilderType {
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    fn element_count(&self) -> u32 {
        self.descriptor.count()
    }
}

#[derive(Debug, Clone)]
pub enum AnnotationData {
    /// Packed component bytes, `packed_size` long.
    Numeric(Vec<u8>),
    Strings(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct AnnotationSpec {
    pub name: String,
    pub ty: BuilderType,
    pub value: AnnotationData,
}

impl AnnotationSpec {
    pub fn numeric(name: &str, ty: BuilderType, bytes: &[u8]) -> Self {
        AnnotationSpec {
            name: name.to_owned(),
            ty,
            value: AnnotationData::Numeric(bytes.to_vec()),
        }
    }

    pub fn strings(name: &str, ty: BuilderType, values: &[&str]) -> Self {
        AnnotationSpec {
            name: name.to_owned(),
            ty,
            value: AnnotationData::Strings(values.iter().map(|s| (*s).to_owned()).collect()),
        }
    }
}

/// The right-hand side of an assignment record.
#[derive(Debug, Clone, PartialEq)]
pub enum Rhs {
    Constant(Vec<(ScalarKind, u32)>),
    Variable(String),
    ConstIndex(String, u32),
    /// Array name, then index variable name.
    VariableIndex(String, String),
    InlineShader(Option<Vec<u8>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentSpec {
    pub lhs: u32,
    pub index: u32,
    pub rhs: Rhs,
}

impl AssignmentSpec {
    pub fn new(lhs: u32, rhs: Rhs) -> Self {
        AssignmentSpec { lhs, index: 0, rhs }
    }

    pub fn at(mut self, index: u32) -> Self {
        self.index = index;
        self
    }

    pub fn constant_uint(lhs: u32, value: u32) -> Self {
        AssignmentSpec::new(lhs, Rhs::Constant(vec![(ScalarKind::UInt, value)]))
    }

    pub fn constant_bool(lhs: u32, value: bool) -> Self {
        AssignmentSpec::new(lhs, Rhs::Constant(vec![(ScalarKind::Bool, value as u32)]))
    }

    pub fn constant_floats(lhs: u32, values: &[f32]) -> Self {
        AssignmentSpec::new(
            lhs,
            Rhs::Constant(values.iter().map(|v| (ScalarKind::Float, v.to_bits())).collect()),
        )
    }

    pub fn variable(lhs: u32, name: &str) -> Self {
        AssignmentSpec::new(lhs, Rhs::Variable(name.to_owned()))
    }

    pub fn const_index(lhs: u32, array: &str, index: u32) -> Self {
        AssignmentSpec::new(lhs, Rhs::ConstIndex(array.to_owned(), index))
    }

    pub fn variable_index(lhs: u32, array: &str, index: &str) -> Self {
        AssignmentSpec::new(lhs, Rhs::VariableIndex(array.to_owned(), index.to_owned()))
    }

    pub fn inline_shader(lhs: u32, bytecode: Option<&[u8]>) -> Self {
        AssignmentSpec::new(lhs, Rhs::InlineShader(bytecode.map(<[u8]>::to_vec)))
    }
}

#[derive(Debug, Clone)]
pub struct VariableSpec {
    pub name: String,
    pub ty: BuilderType,
    pub semantic: Option<String>,
    pub offset: u32,
    pub default_value: Option<Vec<u8>>,
    pub flags: u32,
    pub annotations: Vec<AnnotationSpec>,
}

impl VariableSpec {
    pub fn new(name: &str, ty: BuilderType, offset: u32) -> Self {
        VariableSpec {
            name: name.to_owned(),
            ty,
            semantic: None,
            offset,
            default_value: None,
            flags: 0,
            annotations: Vec::new(),
        }
    }

    pub fn semantic(mut self, semantic: &str) -> Self {
        self.semantic = Some(semantic.to_owned());
        self
    }

    /// Default bytes in buffer layout, exactly the variable's footprint.
    pub fn default_value(mut self, bytes: &[u8]) -> Self {
        self.default_value = Some(bytes.to_vec());
        self
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn annotation(mut self, annotation: AnnotationSpec) -> Self {
        self.annotations.push(annotation);
        self
    }
}

#[derive(Debug, Clone)]
pub struct BufferSpec {
    pub name: String,
    pub size: u32,
    pub tbuffer: bool,
    pub bind_point: Option<u32>,
    pub variables: Vec<VariableSpec>,
    pub annotations: Vec<AnnotationSpec>,
}

impl BufferSpec {
    pub fn new(name: &str, size: u32) -> Self {
        BufferSpec {
            name: name.to_owned(),
            size,
            tbuffer: false,
            bind_point: None,
            variables: Vec::new(),
            annotations: Vec::new(),
        }
    }

    pub fn tbuffer(mut self) -> Self {
        self.tbuffer = true;
        self
    }

    pub fn bind_point(mut self, slot: u32) -> Self {
        self.bind_point = Some(slot);
        self
    }

    pub fn variable(mut self, variable: VariableSpec) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn annotation(mut self, annotation: AnnotationSpec) -> Self {
        self.annotations.push(annotation);
        self
    }
}

/// The initializer of one element of an object variable.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectInit {
    String(String),
    State(Vec<AssignmentSpec>),
    /// `None` is the null shader.
    Shader(Option<Vec<u8>>),
    Resource,
}

#[derive(Debug, Clone)]
pub struct ObjectSpec {
    pub name: String,
    pub ty: BuilderType,
    pub semantic: Option<String>,
    pub bind_point: Option<u32>,
    pub elements: Vec<ObjectInit>,
    pub annotations: Vec<AnnotationSpec>,
}

impl ObjectSpec {
    pub fn new(name: &str, ty: BuilderType) -> Self {
        ObjectSpec {
            name: name.to_owned(),
            ty,
            semantic: None,
            bind_point: None,
            elements: Vec::new(),
            annotations: Vec::new(),
        }
    }

    pub fn element(mut self, init: ObjectInit) -> Self {
        self.elements.push(init);
        self
    }

    pub fn bind_point(mut self, slot: u32) -> Self {
        self.bind_point = Some(slot);
        self
    }

    pub fn annotation(mut self, annotation: AnnotationSpec) -> Self {
        self.annotations.push(annotation);
        self
    }
}

#[derive(Debug, Clone)]
pub struct InterfaceSpec {
    pub name: String,
    pub ty: BuilderType,
    pub default_binding: Option<String>,
    pub annotations: Vec<AnnotationSpec>,
}

impl InterfaceSpec {
    pub fn new(name: &str, ty: BuilderType) -> Self {
        InterfaceSpec {
            name: name.to_owned(),
            ty,
            default_binding: None,
            annotations: Vec::new(),
        }
    }

    pub fn default_binding(mut self, variable: &str) -> Self {
        self.default_binding = Some(variable.to_owned());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct PassSpec {
    pub name: String,
    pub assignments: Vec<AssignmentSpec>,
    pub annotations: Vec<AnnotationSpec>,
}

impl PassSpec {
    pub fn new(name: &str) -> Self {
        PassSpec {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn assign(mut self, assignment: AssignmentSpec) -> Self {
        self.assignments.push(assignment);
        self
    }

    pub fn annotation(mut self, annotation: AnnotationSpec) -> Self {
        self.annotations.push(annotation);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct TechniqueSpec {
    pub name: String,
    pub passes: Vec<PassSpec>,
    pub annotations: Vec<AnnotationSpec>,
}

impl TechniqueSpec {
    pub fn new(name: &str) -> Self {
        TechniqueSpec {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn pass(mut self, pass: PassSpec) -> Self {
        self.passes.push(pass);
        self
    }

    pub fn annotation(mut self, annotation: AnnotationSpec) -> Self {
        self.annotations.push(annotation);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroupSpec {
    pub name: Option<String>,
    pub techniques: Vec<TechniqueSpec>,
    pub annotations: Vec<AnnotationSpec>,
}

impl GroupSpec {
    pub fn new(name: Option<&str>) -> Self {
        GroupSpec {
            name: name.map(str::to_owned),
            ..Default::default()
        }
    }

    pub fn technique(mut self, technique: TechniqueSpec) -> Self {
        self.techniques.push(technique);
        self
    }
}

/// Serializes effect containers.
#[derive(Debug)]
pub struct ContainerBuilder {
    format: FormatVersion,
    blob: Vec<u8>,
    string_offsets: FxHashMap<String, u32>,
    buffers: Vec<BufferSpec>,
    objects: Vec<ObjectSpec>,
    interfaces: Vec<InterfaceSpec>,
    groups: Vec<GroupSpec>,
}

fn put(out: &mut Vec<u8>, word: u32) {
    out.extend_from_slice(&word.to_le_bytes());
}

fn len_u32(len: usize, what: &'static str) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::overflow(what))
}

impl ContainerBuilder {
    pub fn new(format: FormatVersion) -> Self {
        ContainerBuilder {
            format,
            blob: Vec::new(),
            string_offsets: FxHashMap::default(),
            buffers: Vec::new(),
            objects: Vec::new(),
            interfaces: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn format(&self) -> FormatVersion {
        self.format
    }

    /// Appends raw bytes to the blob, returning their offset.
    pub fn raw_blob(&mut self, bytes: &[u8]) -> Result<u32> {
        let offset = len_u32(self.blob.len(), "blob offset")?;
        self.blob.extend_from_slice(bytes);
        Ok(offset)
    }

    fn raw_words(&mut self, words: &[u32]) -> Result<u32> {
        let offset = len_u32(self.blob.len(), "blob offset")?;
        for word in words {
            put(&mut self.blob, *word);
        }
        Ok(offset)
    }

    /// Offset of a NUL-terminated copy of `value`, shared between identical strings.
    pub fn string(&mut self, value: &str) -> Result<u32> {
        if let Some(offset) = self.string_offsets.get(value) {
            return Ok(*offset);
        }
        let offset = self.raw_blob(value.as_bytes())?;
        self.blob.push(0);
        self.string_offsets.insert(value.to_owned(), offset);
        Ok(offset)
    }

    fn optional_string(&mut self, value: Option<&str>) -> Result<u32> {
        value.map_or(Ok(NONE), |value| self.string(value))
    }

    /// Offset of a length-prefixed payload.
    pub fn payload(&mut self, bytes: &[u8]) -> Result<u32> {
        let offset = self.raw_words(&[len_u32(bytes.len(), "payload length")?])?;
        self.blob.extend_from_slice(bytes);
        Ok(offset)
    }

    fn type_record(&mut self, kind: u32, name: &str, descriptor: &TypeDescriptor, payload: &[u32]) -> Result<u32> {
        let name = self.string(name)?;
        let mut words = vec![
            kind,
            name,
            descriptor.elements,
            descriptor.total_size,
            descriptor.stride,
            descriptor.packed_size,
        ];
        words.extend_from_slice(payload);
        self.raw_words(&words)
    }

    pub fn numeric_type(&mut self, name: &str, ty: NumericType, elements: u32) -> Result<BuilderType> {
        let descriptor = TypeDescriptor::numeric(StrRef::from_index(0), ty, elements)?;
        let offset = self.type_record(1, name, &descriptor, &[ty.pack()])?;
        Ok(BuilderType { offset, descriptor })
    }

    pub fn object_type(&mut self, name: &str, kind: ObjectKind, elements: u32) -> Result<BuilderType> {
        let descriptor = TypeDescriptor::object(StrRef::from_index(0), kind, elements);
        let offset = self.type_record(2, name, &descriptor, &[kind.to_raw()])?;
        Ok(BuilderType { offset, descriptor })
    }

    /// Declares a struct. Members are `(name, semantic, offset, type)`.
    pub fn struct_type(
        &mut self,
        name: &str,
        members: &[(&str, Option<&str>, u32, &BuilderType)],
        elements: u32,
        base: Option<&BuilderType>,
        implements_interface: bool,
    ) -> Result<BuilderType> {
        let placeholder = |offset| Member {
            name: StrRef::from_index(0),
            semantic: None,
            offset,
            ty: TypeRef::from_index(0),
        };
        let placed: Vec<(Member, &TypeDescriptor)> = members
            .iter()
            .map(|(_, _, offset, ty)| (placeholder(*offset), &ty.descriptor))
            .collect();
        let sizes = Sizes::structure(&placed, elements)?;
        let descriptor = TypeDescriptor::with_sizes(
            TypeKind::Struct {
                members: members.iter().map(|(_, _, offset, _)| placeholder(*offset)).collect(),
                base: None,
                implements_interface,
            },
            StrRef::from_index(0),
            elements,
            sizes,
        );
        let mut payload = vec![len_u32(members.len(), "member count")?];
        for (member_name, semantic, offset, ty) in members {
            payload.push(self.string(member_name)?);
            payload.push(self.optional_string(*semantic)?);
            payload.push(*offset);
            payload.push(ty.offset);
        }
        payload.push(base.map_or(NONE, |base| base.offset));
        payload.push(implements_interface as u32);
        let offset = self.type_record(3, name, &descriptor, &payload)?;
        Ok(BuilderType { offset, descriptor })
    }

    pub fn interface_type(&mut self, name: &str, elements: u32) -> Result<BuilderType> {
        let descriptor = TypeDescriptor::interface(StrRef::from_index(0), elements);
        let offset = self.type_record(4, name, &descriptor, &[])?;
        Ok(BuilderType { offset, descriptor })
    }

    /// Writes arbitrary words as a type record, for containers that break the layout rules.
    ///
    /// The returned type behaves like `like` for the builder's own bookkeeping.
    pub fn raw_type(&mut self, words: &[u32], like: &BuilderType) -> Result<BuilderType> {
        let offset = self.raw_words(words)?;
        Ok(BuilderType {
            offset,
            descriptor: like.descriptor.clone(),
        })
    }

    pub fn constant_buffer(&mut self, buffer: BufferSpec) -> &mut Self {
        self.buffers.push(buffer);
        self
    }

    pub fn object_variable(&mut self, object: ObjectSpec) -> &mut Self {
        self.objects.push(object);
        self
    }

    pub fn interface_variable(&mut self, interface: InterfaceSpec) -> &mut Self {
        self.interfaces.push(interface);
        self
    }

    pub fn group(&mut self, group: GroupSpec) -> &mut Self {
        self.groups.push(group);
        self
    }

    /// Adds a technique to the trailing anonymous group, creating it if needed.
    pub fn technique(&mut self, technique: TechniqueSpec) -> &mut Self {
        match self.groups.last_mut() {
            Some(group) if group.name.is_none() => group.techniques.push(technique),
            _ => self.groups.push(GroupSpec::new(None).technique(technique)),
        }
        self
    }

    fn write_annotations(&mut self, out: &mut Vec<u8>, annotations: &[AnnotationSpec]) -> Result<()> {
        put(out, len_u32(annotations.len(), "annotation count")?);
        for annotation in annotations {
            put(out, self.string(&annotation.name)?);
            put(out, annotation.ty.offset);
            match &annotation.value {
                AnnotationData::Numeric(bytes) => {
                    let offset = self.payload(bytes)?;
                    put(out, offset);
                }
                AnnotationData::Strings(values) => {
                    for value in values {
                        put(out, self.string(value)?);
                    }
                }
            }
        }
        Ok(())
    }

    fn write_assignments(&mut self, out: &mut Vec<u8>, assignments: &[AssignmentSpec], counts: &mut HeaderCounts) -> Result<()> {
        put(out, len_u32(assignments.len(), "assignment count")?);
        for assignment in assignments {
            let (kind, offset) = match &assignment.rhs {
                Rhs::Constant(values) => {
                    let mut words = vec![len_u32(values.len(), "constant count")?];
                    for (scalar, bits) in values {
                        words.push(scalar.to_raw());
                        words.push(*bits);
                    }
                    (RhsKind::Constant, self.raw_words(&words)?)
                }
                Rhs::Variable(name) => (RhsKind::Variable, self.string(name)?),
                Rhs::ConstIndex(array, index) => {
                    let array = self.string(array)?;
                    (RhsKind::ConstIndex, self.raw_words(&[array, *index])?)
                }
                Rhs::VariableIndex(array, index) => {
                    let array = self.string(array)?;
                    let index = self.string(index)?;
                    (RhsKind::VariableIndex, self.raw_words(&[array, index])?)
                }
                Rhs::InlineShader(bytecode) => {
                    counts.shaders = bittricks::checked_add(counts.shaders, 1, "shader count")?;
                    let offset = match bytecode {
                        Some(bytecode) => self.payload(bytecode)?,
                        None => NONE,
                    };
                    (RhsKind::InlineShader, offset)
                }
            };
            put(out, assignment.lhs);
            put(out, assignment.index);
            put(out, kind as u32);
            put(out, offset);
        }
        Ok(())
    }

    fn write_buffers(&mut self, out: &mut Vec<u8>, counts: &mut HeaderCounts) -> Result<()> {
        for buffer in std::mem::take(&mut self.buffers) {
            put(out, self.string(&buffer.name)?);
            put(out, buffer.size);
            put(out, buffer.tbuffer as u32);
            put(out, len_u32(buffer.variables.len(), "variable count")?);
            put(out, buffer.bind_point.unwrap_or(NONE));
            self.write_annotations(out, &buffer.annotations)?;
            for variable in &buffer.variables {
                put(out, self.string(&variable.name)?);
                put(out, variable.ty.offset);
                let semantic = self.optional_string(variable.semantic.as_deref())?;
                put(out, semantic);
                put(out, variable.offset);
                let default = match &variable.default_value {
                    Some(bytes) => self.payload(bytes)?,
                    None => NONE,
                };
                put(out, default);
                put(out, variable.flags);
                self.write_annotations(out, &variable.annotations)?;
            }
            counts.constant_buffers += 1;
            counts.numeric_variables += len_u32(buffer.variables.len(), "variable count")?;
        }
        Ok(())
    }

    fn write_objects(&mut self, out: &mut Vec<u8>, counts: &mut HeaderCounts) -> Result<()> {
        for object in std::mem::take(&mut self.objects) {
            put(out, self.string(&object.name)?);
            put(out, object.ty.offset);
            let semantic = self.optional_string(object.semantic.as_deref())?;
            put(out, semantic);
            put(out, object.bind_point.unwrap_or(NONE));
            let kind = object.ty.descriptor.object_kind();
            for init in &object.elements {
                match init {
                    ObjectInit::String(value) => {
                        put(out, self.string(value)?);
                        counts.strings += 1;
                    }
                    ObjectInit::State(assignments) => {
                        self.write_assignments(out, assignments, counts)?;
                        match kind {
                            Some(ObjectKind::Blend) => counts.blend_states += 1,
                            Some(ObjectKind::DepthStencil) => counts.depth_stencil_states += 1,
                            Some(ObjectKind::Rasterizer) => counts.rasterizer_states += 1,
                            Some(ObjectKind::Sampler) => counts.samplers += 1,
                            _ => {}
                        }
                    }
                    ObjectInit::Shader(bytecode) => {
                        let offset = match bytecode {
                            Some(bytecode) => self.payload(bytecode)?,
                            None => NONE,
                        };
                        put(out, offset);
                        counts.shaders += 1;
                    }
                    ObjectInit::Resource => {}
                }
            }
            self.write_annotations(out, &object.annotations)?;
            counts.object_variables += 1;
        }
        Ok(())
    }

    fn write_interfaces(&mut self, out: &mut Vec<u8>, counts: &mut HeaderCounts) -> Result<()> {
        for interface in std::mem::take(&mut self.interfaces) {
            put(out, self.string(&interface.name)?);
            put(out, interface.ty.offset);
            let binding = self.optional_string(interface.default_binding.as_deref())?;
            put(out, binding);
            self.write_annotations(out, &interface.annotations)?;
            counts.interface_variables += 1;
        }
        Ok(())
    }

    fn write_technique(&mut self, out: &mut Vec<u8>, technique: &TechniqueSpec, counts: &mut HeaderCounts) -> Result<()> {
        put(out, self.string(&technique.name)?);
        put(out, len_u32(technique.passes.len(), "pass count")?);
        self.write_annotations(out, &technique.annotations)?;
        for pass in &technique.passes {
            put(out, self.string(&pass.name)?);
            put(out, len_u32(pass.assignments.len(), "assignment count")?);
            self.write_annotations(out, &pass.annotations)?;
            // the count is repeated by write_assignments, so drop the first copy
            let mut assignments = Vec::new();
            self.write_assignments(&mut assignments, &pass.assignments, counts)?;
            out.extend_from_slice(&assignments[4..]);
            counts.passes += 1;
        }
        counts.techniques += 1;
        Ok(())
    }

    fn write_groups(&mut self, out: &mut Vec<u8>, counts: &mut HeaderCounts) -> Result<()> {
        let groups = std::mem::take(&mut self.groups);
        if !self.format.has_groups() {
            if groups.len() > 1 || groups.iter().any(|g| g.name.is_some()) {
                return Err(Error::argument(format!(
                    "{} containers have one anonymous group",
                    self.format.name()
                )));
            }
            for technique in groups.iter().flat_map(|g| &g.techniques) {
                self.write_technique(out, technique, counts)?;
            }
            counts.groups = 1;
            return Ok(());
        }
        for group in &groups {
            let name = self.optional_string(group.name.as_deref())?;
            put(out, name);
            put(out, len_u32(group.techniques.len(), "technique count")?);
            self.write_annotations(out, &group.annotations)?;
            for technique in &group.techniques {
                self.write_technique(out, technique, counts)?;
            }
            counts.groups += 1;
        }
        Ok(())
    }

    /// Serializes everything declared so far.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        let mut counts = HeaderCounts::default();
        let mut structured = Vec::new();
        self.write_buffers(&mut structured, &mut counts)?;
        self.write_objects(&mut structured, &mut counts)?;
        if self.format.has_groups() {
            self.write_interfaces(&mut structured, &mut counts)?;
        } else if !self.interfaces.is_empty() {
            return Err(Error::argument("interface variables need fx_5_0"));
        }
        self.write_groups(&mut structured, &mut counts)?;

        let header = Header {
            format: self.format,
            cb_unstructured: len_u32(self.blob.len(), "blob length")?,
            counts,
        };
        let (raw, extension) = header.to_raw();
        let mut out = Vec::with_capacity(self.format.header_size() + self.blob.len() + structured.len());
        // byte swapping is its own inverse, so from_le also produces little-endian words
        out.extend_from_slice(bytemuck::bytes_of(&raw.from_le()));
        if let Some(extension) = extension {
            out.extend_from_slice(bytemuck::bytes_of(&extension.from_le()));
        }
        out.extend_from_slice(&self.blob);
        out.extend_from_slice(&structured);
        Ok(out)
    }
}
