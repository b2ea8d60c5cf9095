// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Walks a container front to back and builds its [`Scratch`] image.

Variables are declared before anything that names them (numeric variables, then object
variables, then interfaces, then passes), so every name an assignment mentions resolves the
moment it is read. Constant assignments are written straight into their record and never
reach the runtime graph; binding assignments with a fixed target become a fixed binding.
*/

use rustc_hash::FxHashMap;

use super::LoadOptions;
use super::scratch::{
    Scratch, ScratchAnnotation, ScratchAnnotationValue, ScratchAssignment, ScratchBlock, ScratchBuffer,
    ScratchBufferInfo, ScratchGroup, ScratchNamedInfo, ScratchPass, ScratchPayload, ScratchReflection,
    ScratchRuntime, ScratchSource, ScratchTechnique, ScratchVariable, ScratchVariableData, ScratchVariableInfo,
};
use crate::arena::{Offset, ScratchIndex, ScratchRange};
use crate::bittricks::{self, REGISTER_SIZE};
use crate::container::reader::Reader;
use crate::container::{Header, HeaderCounts, NONE, RhsKind};
use crate::error::{Error, Result};
use crate::evaluate::Destination;
use crate::graph::{Block, Technique, Variable};
use crate::pool::{StrRef, TypeRef};
use crate::reflection::Annotation;
use crate::state::{BindingSlot, FieldInfo, Lhs, PassBindings, PassRecord, RecordKind, StateRecord};
use crate::types::{
    BlockKind, Layout, LayoutClass, Member, NumericType, ObjectKind, ScalarKind, Sizes, TypeDescriptor, TypeKind,
    check_register_placement,
};
use crate::value::ScalarValue;

/// Size of the fixed part of a type record.
const TYPE_RECORD_WORDS: u32 = 6;

/// The record an assignment list writes into.
enum Owner<'r> {
    Block(&'r mut StateRecord),
    Pass {
        record: &'r mut PassRecord,
        bindings: &'r mut PassBindings<ScratchIndex<Block>>,
    },
}

impl Owner<'_> {
    fn record_kind(&self) -> RecordKind {
        match self {
            Owner::Block(record) => record.record_kind(),
            Owner::Pass { .. } => RecordKind::Pass,
        }
    }

    fn record_bytes(&mut self) -> &mut [u8] {
        match self {
            Owner::Block(record) => record.bytes_mut(),
            Owner::Pass { record, .. } => bytemuck::bytes_of_mut(&mut **record),
        }
    }
}

fn words_at<const N: usize>(reader: &Reader<'_>, offset: u32) -> Result<[u32; N]> {
    let words = reader.read_words_at(offset, N as u32)?;
    words
        .try_into()
        .map_err(|_| Error::inconsistency("unstructured word run has the wrong length"))
}

fn optional(value: u32) -> Option<u32> {
    (value != NONE).then_some(value)
}

fn bump(count: &mut u32, by: u32, what: &'static str) -> Result<()> {
    *count = bittricks::checked_add(*count, by, what)?;
    Ok(())
}

struct Loader<'a, 'o> {
    reader: Reader<'a>,
    header: Header,
    options: &'o LoadOptions,
    runtime: ScratchRuntime,
    reflection: ScratchReflection,
    /// Type records already parsed, by blob offset.
    types: FxHashMap<u32, TypeRef>,
    names: FxHashMap<&'a str, ScratchIndex<Variable>>,
    seen: HeaderCounts,
}

/// Parses `bytes` into a scratch image, validating every record on the way.
pub(crate) fn parse(bytes: &[u8], options: &LoadOptions) -> Result<Scratch> {
    let (header, reader) = Reader::open(bytes)?;
    let mut loader = Loader {
        reader,
        header,
        options,
        runtime: ScratchRuntime::default(),
        reflection: ScratchReflection::default(),
        types: FxHashMap::default(),
        names: FxHashMap::default(),
        seen: HeaderCounts::default(),
    };
    for _ in 0..header.counts.constant_buffers {
        loader.parse_buffer()?;
    }
    for _ in 0..header.counts.object_variables {
        loader.parse_object_variable()?;
    }
    for _ in 0..header.counts.interface_variables {
        loader.parse_interface_variable()?;
    }
    loader.parse_groups()?;
    loader.check_counts()?;
    Ok(Scratch {
        format: header.format,
        expected: header.counts,
        runtime: loader.runtime,
        reflection: Some(loader.reflection),
    })
}

impl<'a> Loader<'a, '_> {
    fn string(&mut self, offset: u32) -> Result<StrRef> {
        let value = self.reader.read_cstring(offset)?;
        self.reflection.strings.intern(value)
    }

    fn optional_string(&mut self, offset: u32) -> Result<Option<StrRef>> {
        optional(offset).map(|offset| self.string(offset)).transpose()
    }

    fn descriptor(&self, ty: TypeRef) -> Result<&TypeDescriptor> {
        self.reflection
            .types
            .get(ty)
            .ok_or_else(|| Error::inconsistency(format!("type {} was never interned", ty.index())))
    }

    fn parse_type(&mut self, offset: u32, depth: u32) -> Result<TypeRef> {
        if let Some(ty) = self.types.get(&offset) {
            return Ok(*ty);
        }
        if depth > self.options.max_type_depth {
            return Err(Error::format(format!(
                "type at {offset} nests deeper than {} levels",
                self.options.max_type_depth
            )));
        }
        let [kind, name, elements, total_size, stride, packed_size] = words_at::<6>(&self.reader, offset)?;
        let name = self.string(name)?;
        let payload = bittricks::checked_add(offset, TYPE_RECORD_WORDS * 4, "type record offset")?;
        let descriptor = match kind {
            1 => {
                let ty = NumericType::unpack(self.reader.read_u32_at(payload)?)?;
                TypeDescriptor::numeric(name, ty, elements)?
            }
            2 => TypeDescriptor::object(name, ObjectKind::from_raw(self.reader.read_u32_at(payload)?)?, elements),
            3 => self.parse_struct(payload, name, elements, depth)?,
            4 => TypeDescriptor::interface(name, elements),
            other => return Err(Error::format(format!("type at {offset} has unknown kind {other}"))),
        };
        descriptor.check_declared(Sizes {
            element_size: descriptor.element_size,
            stride,
            total_size,
            packed_size,
        })?;
        let ty = self.reflection.types.intern(descriptor)?;
        self.types.insert(offset, ty);
        Ok(ty)
    }

    fn parse_struct(&mut self, payload: u32, name: StrRef, elements: u32, depth: u32) -> Result<TypeDescriptor> {
        let member_count = self.reader.read_u32_at(payload)?;
        let mut cursor = bittricks::checked_add(payload, 4, "struct record offset")?;
        let mut members = Vec::new();
        for _ in 0..member_count {
            let [member_name, semantic, offset, ty] = words_at::<4>(&self.reader, cursor)?;
            cursor = bittricks::checked_add(cursor, 16, "struct record offset")?;
            let member = Member {
                name: self.string(member_name)?,
                semantic: self.optional_string(semantic)?,
                offset,
                ty: self.parse_type(ty, depth + 1)?,
            };
            members
                .try_reserve(1)
                .map_err(Error::out_of_memory("struct members"))?;
            members.push(member);
        }
        let [base, implements] = words_at::<2>(&self.reader, cursor)?;
        let base = optional(base).map(|base| self.parse_type(base, depth + 1)).transpose()?;
        let implements_interface = match implements {
            0 => false,
            1 => true,
            other => return Err(Error::format(format!("struct interface flag {other} is not 0 or 1"))),
        };
        let placed = members
            .iter()
            .map(|member| Ok((*member, self.descriptor(member.ty)?)))
            .collect::<Result<Vec<_>>>()?;
        let sizes = Sizes::structure(&placed, elements)?;
        Ok(TypeDescriptor::with_sizes(
            TypeKind::Struct {
                members: members.into_boxed_slice(),
                base,
                implements_interface,
            },
            name,
            elements,
            sizes,
        ))
    }

    fn parse_annotations(&mut self) -> Result<ScratchRange<Annotation>> {
        let count = self.reader.read_u32()?;
        let first = self.reflection.annotations.mark()?;
        for _ in 0..count {
            let [name, ty] = self.reader.read_words::<2>()?;
            let name = self.string(name)?;
            let ty = self.parse_type(ty, 0)?;
            let descriptor = self.descriptor(ty)?;
            let (numeric, strings) = (
                descriptor.as_numeric().is_some(),
                descriptor.object_kind() == Some(ObjectKind::String),
            );
            let (packed_size, elements) = (descriptor.packed_size, descriptor.count());
            let value = if numeric {
                let offset = self.reader.read_u32()?;
                let bytes = self.reader.read_payload(offset)?;
                if bytes.len() != packed_size as usize {
                    return Err(Error::format(format!(
                        "annotation value has {} bytes, its type packs to {packed_size}",
                        bytes.len()
                    )));
                }
                ScratchAnnotationValue::Numeric(self.reflection.bytes.alloc(bytes, 4)?)
            } else if strings {
                ScratchAnnotationValue::Strings(self.parse_string_values(elements)?)
            } else {
                return Err(Error::format("annotations must be numeric or string typed"));
            };
            self.reflection
                .annotations
                .push(ScratchAnnotation { name, ty, value })?;
        }
        self.reflection.annotations.range_since(first)
    }

    /// Reads `count` string offsets from the structured section.
    fn parse_string_values(&mut self, count: u32) -> Result<ScratchRange<StrRef>> {
        let first = self.reflection.string_values.mark()?;
        for _ in 0..count {
            let offset = self.reader.read_u32()?;
            let value = self.string(offset)?;
            self.reflection.string_values.push(value)?;
        }
        self.reflection.string_values.range_since(first)
    }

    fn register_name(&mut self, name: &'a str, variable: ScratchIndex<Variable>) -> Result<()> {
        if self.names.insert(name, variable).is_some() {
            return Err(Error::format(format!("variable name {name} is declared twice")));
        }
        Ok(())
    }

    fn parse_buffer(&mut self) -> Result<()> {
        let [name, size, flags, variable_count, bind_point] = self.reader.read_words::<5>()?;
        let name_text = self.reader.read_cstring(name)?;
        if size % REGISTER_SIZE != 0 {
            return Err(Error::format(format!(
                "constant buffer {name_text} size {size} is not a multiple of {REGISTER_SIZE}"
            )));
        }
        if flags & !1 != 0 {
            return Err(Error::format(format!("constant buffer {name_text} has unknown flags {flags:#x}")));
        }
        let name = self.reflection.strings.intern(name_text)?;
        let annotations = self.parse_annotations()?;
        let data = self.runtime.buffer_bytes.alloc_zeroed(size, REGISTER_SIZE)?;
        let buffer = ScratchIndex::new(self.runtime.buffers.mark()?);
        let first = self.runtime.variables.mark()?;
        for _ in 0..variable_count {
            self.parse_numeric_variable(buffer, data)?;
        }
        let variables = self.runtime.variables.range_since(first)?;
        self.runtime.buffers.push(ScratchBuffer {
            data,
            variables,
            bind_point: optional(bind_point),
            // defaults have never been uploaded
            dirty: true,
        })?;
        self.reflection.buffers.push(ScratchBufferInfo {
            name,
            tbuffer: flags & 1 != 0,
            annotations,
        })?;
        bump(&mut self.seen.constant_buffers, 1, "constant buffer count")?;
        bump(&mut self.seen.numeric_variables, variable_count, "numeric variable count")
    }

    fn parse_numeric_variable(&mut self, buffer: ScratchIndex<crate::graph::ConstantBuffer>, data: Offset) -> Result<()> {
        let [name, ty, semantic, offset, default, flags] = self.reader.read_words::<6>()?;
        let name_text = self.reader.read_cstring(name)?;
        let ty = self.parse_type(ty, 0)?;
        let descriptor = self.descriptor(ty)?;
        if !matches!(descriptor.kind, TypeKind::Numeric(_) | TypeKind::Struct { .. }) {
            return Err(Error::format(format!(
                "{name_text} lives in a constant buffer but is not numeric"
            )));
        }
        let footprint = descriptor.footprint()?;
        let layout = Layout::of(descriptor);
        let end = bittricks::checked_add(offset, footprint, "variable extent")?;
        if end > data.len {
            return Err(Error::format(format!(
                "{name_text} at {offset} with footprint {footprint} overflows its {}-byte buffer",
                data.len
            )));
        }
        check_register_placement(offset, footprint, name_text)?;
        if flags != 0 {
            return Err(Error::format(format!("{name_text} sets reserved flags {flags:#x}")));
        }
        if let Some(default) = optional(default) {
            let bytes = self.reader.read_payload(default)?;
            if bytes.len() != footprint as usize {
                return Err(Error::format(format!(
                    "default value of {name_text} has {} bytes, expected {footprint}",
                    bytes.len()
                )));
            }
            let start = bittricks::checked_add(data.start, offset, "variable offset")?;
            self.runtime
                .buffer_bytes
                .get_mut(Offset { start, len: footprint })
                .ok_or_else(|| Error::inconsistency("variable outside its buffer bytes"))?
                .copy_from_slice(bytes);
        }
        let name = self.reflection.strings.intern(name_text)?;
        let semantic = self.optional_string(semantic)?;
        let annotations = self.parse_annotations()?;
        let variable = self.runtime.variables.push(ScratchVariable {
            layout,
            data: ScratchVariableData::Numeric { buffer, offset },
            last_modified: 0,
        })?;
        self.reflection.variables.push(ScratchVariableInfo {
            name,
            semantic,
            ty,
            bind_point: None,
            annotations,
            strings: ScratchRange::empty(),
        })?;
        self.register_name(name_text, variable)
    }

    fn parse_object_variable(&mut self) -> Result<()> {
        let [name, ty, semantic, bind_point] = self.reader.read_words::<4>()?;
        let name_text = self.reader.read_cstring(name)?;
        let ty = self.parse_type(ty, 0)?;
        let descriptor = self.descriptor(ty)?;
        let kind = descriptor
            .object_kind()
            .ok_or_else(|| Error::format(format!("object variable {name_text} has a non-object type")))?;
        let (layout, count) = (Layout::of(descriptor), descriptor.count());

        let first_block = self.runtime.blocks.mark()?;
        let mut strings = ScratchRange::empty();
        if kind == ObjectKind::String {
            strings = self.parse_string_values(count)?;
            bump(&mut self.seen.strings, count, "string count")?;
        } else if let Some(block_kind) = kind.block_kind() {
            for _ in 0..count {
                self.parse_object_element(block_kind)?;
            }
        }
        let blocks = self.runtime.blocks.range_since(first_block)?;

        let name = self.reflection.strings.intern(name_text)?;
        let semantic = self.optional_string(semantic)?;
        let annotations = self.parse_annotations()?;
        let variable = self.runtime.variables.push(ScratchVariable {
            layout,
            data: ScratchVariableData::Object { blocks },
            last_modified: 0,
        })?;
        self.reflection.variables.push(ScratchVariableInfo {
            name,
            semantic,
            ty,
            bind_point: optional(bind_point),
            annotations,
            strings,
        })?;
        bump(&mut self.seen.object_variables, 1, "object variable count")?;
        self.register_name(name_text, variable)
    }

    fn parse_object_element(&mut self, kind: BlockKind) -> Result<()> {
        let block = match StateRecord::default_for(kind) {
            Some(mut record) => {
                let count = self.reader.read_u32()?;
                let assignments = self.parse_assignments(count, &mut Owner::Block(&mut record))?;
                let seen = match kind {
                    BlockKind::Blend => &mut self.seen.blend_states,
                    BlockKind::DepthStencil => &mut self.seen.depth_stencil_states,
                    BlockKind::Rasterizer => &mut self.seen.rasterizer_states,
                    _ => &mut self.seen.samplers,
                };
                bump(seen, 1, "state block count")?;
                ScratchBlock {
                    kind,
                    payload: ScratchPayload::State(record),
                    assignments,
                }
            }
            None => {
                let offset = self.reader.read_u32()?;
                ScratchBlock {
                    kind,
                    payload: ScratchPayload::Shader {
                        bytecode: self.shader_bytecode(offset)?,
                    },
                    assignments: ScratchRange::empty(),
                }
            }
        };
        self.push_block(block)?;
        Ok(())
    }

    fn push_block(&mut self, block: ScratchBlock) -> Result<ScratchIndex<Block>> {
        if matches!(block.payload, ScratchPayload::Shader { .. }) {
            bump(&mut self.seen.shaders, 1, "shader count")?;
        }
        self.runtime.blocks.push(block)
    }

    fn shader_bytecode(&mut self, offset: u32) -> Result<Option<Offset>> {
        let Some(offset) = optional(offset) else {
            return Ok(None);
        };
        let bytes = self.reader.read_payload(offset)?;
        Ok(Some(self.runtime.bytecode.alloc(bytes, 4)?))
    }

    fn parse_interface_variable(&mut self) -> Result<()> {
        let [name, ty, binding] = self.reader.read_words::<3>()?;
        let name_text = self.reader.read_cstring(name)?;
        let ty = self.parse_type(ty, 0)?;
        let descriptor = self.descriptor(ty)?;
        if !matches!(descriptor.kind, TypeKind::Interface) {
            return Err(Error::format(format!("interface variable {name_text} has a non-interface type")));
        }
        let layout = Layout::of(descriptor);
        let binding = match optional(binding) {
            Some(target) => {
                let target = self.variable_named(target)?;
                self.check_implements_interface(target)?;
                Some(target)
            }
            None => None,
        };
        let name = self.reflection.strings.intern(name_text)?;
        let annotations = self.parse_annotations()?;
        let variable = self.runtime.variables.push(ScratchVariable {
            layout,
            data: ScratchVariableData::Interface { binding },
            last_modified: 0,
        })?;
        self.reflection.variables.push(ScratchVariableInfo {
            name,
            semantic: None,
            ty,
            bind_point: None,
            annotations,
            strings: ScratchRange::empty(),
        })?;
        bump(&mut self.seen.interface_variables, 1, "interface variable count")?;
        self.register_name(name_text, variable)
    }

    fn check_implements_interface(&self, variable: ScratchIndex<Variable>) -> Result<()> {
        match self.scratch_variable(variable)?.layout.class {
            LayoutClass::Struct {
                implements_interface: true,
            } => Ok(()),
            _ => Err(Error::format("interface bound to a variable that does not implement an interface")),
        }
    }

    fn parse_groups(&mut self) -> Result<()> {
        if !self.header.format.has_groups() {
            let techniques = self.parse_techniques(self.header.counts.techniques)?;
            return self.push_group(None, ScratchRange::empty(), techniques);
        }
        for _ in 0..self.header.counts.groups {
            let [name, technique_count] = self.reader.read_words::<2>()?;
            let name = self.optional_string(name)?;
            let annotations = self.parse_annotations()?;
            let techniques = self.parse_techniques(technique_count)?;
            self.push_group(name, annotations, techniques)?;
        }
        Ok(())
    }

    fn push_group(
        &mut self,
        name: Option<StrRef>,
        annotations: ScratchRange<Annotation>,
        techniques: ScratchRange<Technique>,
    ) -> Result<()> {
        self.runtime.groups.push(ScratchGroup { techniques })?;
        self.reflection
            .groups
            .push(ScratchNamedInfo { name, annotations })?;
        bump(&mut self.seen.groups, 1, "group count")
    }

    fn parse_techniques(&mut self, count: u32) -> Result<ScratchRange<Technique>> {
        let first = self.runtime.techniques.mark()?;
        for _ in 0..count {
            let [name, pass_count] = self.reader.read_words::<2>()?;
            let name = self.optional_string(name)?;
            let annotations = self.parse_annotations()?;
            let first_pass = self.runtime.passes.mark()?;
            for _ in 0..pass_count {
                self.parse_pass()?;
            }
            let passes = self.runtime.passes.range_since(first_pass)?;
            self.runtime.techniques.push(ScratchTechnique { passes })?;
            self.reflection
                .techniques
                .push(ScratchNamedInfo { name, annotations })?;
            bump(&mut self.seen.techniques, 1, "technique count")?;
        }
        self.runtime.techniques.range_since(first)
    }

    fn parse_pass(&mut self) -> Result<()> {
        let [name, assignment_count] = self.reader.read_words::<2>()?;
        let name = self.optional_string(name)?;
        let annotations = self.parse_annotations()?;
        let mut record = PassRecord::default();
        let mut bindings = PassBindings::empty();
        let assignments = self.parse_assignments(
            assignment_count,
            &mut Owner::Pass {
                record: &mut record,
                bindings: &mut bindings,
            },
        )?;
        self.runtime.passes.push(ScratchPass {
            record,
            bindings,
            assignments,
        })?;
        self.reflection
            .passes
            .push(ScratchNamedInfo { name, annotations })?;
        bump(&mut self.seen.passes, 1, "pass count")
    }

    fn parse_assignments(&mut self, count: u32, owner: &mut Owner<'_>) -> Result<ScratchRange<crate::evaluate::Assignment>> {
        let first = self.runtime.assignments.mark()?;
        let mut independent_blend = false;
        for _ in 0..count {
            let [lhs, index, rhs_kind, rhs_offset] = self.reader.read_words::<4>()?;
            let lhs = Lhs::from_id(lhs)?;
            let rhs = RhsKind::from_raw(rhs_kind)?;
            match lhs {
                Lhs::Field(field) => {
                    if field.record != owner.record_kind() {
                        return Err(Error::format(format!(
                            "destination {:?} does not belong in a {:?} record",
                            field.record,
                            owner.record_kind()
                        )));
                    }
                    let offset = field.byte_offset(index)?;
                    independent_blend |= field.record == RecordKind::Blend && index > 0;
                    if rhs == RhsKind::Constant {
                        self.apply_constant(rhs_offset, &field, offset, owner.record_bytes())?;
                    } else {
                        let (source, dependencies) = self.resolve_field_source(rhs, rhs_offset, field.components)?;
                        let destination = Destination::Field {
                            offset,
                            scalar: field.scalar,
                            components: field.components,
                        };
                        self.push_assignment(destination, source, &dependencies)?;
                    }
                }
                Lhs::Binding(slot) => {
                    let Owner::Pass { bindings, .. } = owner else {
                        return Err(Error::format("binding destination inside a state block"));
                    };
                    if index != 0 {
                        return Err(Error::format(format!("binding destination with index {index}")));
                    }
                    self.resolve_binding(slot, rhs, rhs_offset, bindings)?;
                }
            }
        }
        if independent_blend && let Owner::Block(StateRecord::Blend(record)) = owner {
            record.independent_blend = 1;
        }
        self.runtime.assignments.range_since(first)
    }

    /// Reads a constant payload as `(kind, bits)` pairs.
    fn constant_values(&self, offset: u32) -> Result<Vec<ScalarValue>> {
        let count = self.reader.read_u32_at(offset)?;
        let start = bittricks::checked_add(offset, 4, "constant offset")?;
        let words = self
            .reader
            .read_words_at(start, bittricks::checked_mul(count, 2, "constant length")?)?;
        words
            .chunks_exact(2)
            .map(|pair| Ok(ScalarValue::from_bits(ScalarKind::from_raw(pair[0])?, pair[1])))
            .collect()
    }

    fn apply_constant(&self, rhs_offset: u32, field: &FieldInfo, offset: u32, record: &mut [u8]) -> Result<()> {
        let values = self.constant_values(rhs_offset)?;
        if values.len() < field.components as usize {
            return Err(Error::format(format!(
                "constant has {} components, destination needs {}",
                values.len(),
                field.components
            )));
        }
        let width = field.scalar.component_size() as usize;
        let out = record
            .get_mut(offset as usize..)
            .ok_or_else(|| Error::inconsistency("destination outside its record"))?;
        for (component, value) in values.iter().take(field.components as usize).enumerate() {
            out.get_mut(component * width..)
                .and_then(|slot| value.write(field.scalar, slot))
                .ok_or_else(|| Error::inconsistency("destination component outside its record"))?;
        }
        Ok(())
    }

    fn variable_named(&self, name_offset: u32) -> Result<ScratchIndex<Variable>> {
        let name = self.reader.read_cstring(name_offset)?;
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| Error::format(format!("assignment refers to unknown variable {name}")))
    }

    fn scratch_variable(&self, variable: ScratchIndex<Variable>) -> Result<&ScratchVariable> {
        self.runtime
            .variables
            .get(variable)
            .ok_or_else(|| Error::inconsistency("named variable missing from scratch"))
    }

    /// Checks a value source and returns its element count.
    fn check_numeric_source(&self, variable: ScratchIndex<Variable>, components: u32) -> Result<u32> {
        let layout = self.scratch_variable(variable)?.layout;
        let numeric = layout
            .numeric()
            .ok_or_else(|| Error::format("assignment source is not numeric"))?;
        if numeric.components() < components {
            return Err(Error::format(format!(
                "assignment source has {} components, destination needs {components}",
                numeric.components()
            )));
        }
        Ok(layout.count())
    }

    fn check_index_variable(&self, variable: ScratchIndex<Variable>) -> Result<()> {
        let layout = self.scratch_variable(variable)?.layout;
        let is_index = layout.scalar().is_some_and(ScalarKind::is_index) && layout.components() == 1;
        if !is_index || layout.elements != 0 {
            return Err(Error::format("array index variable must be a scalar int or uint"));
        }
        Ok(())
    }

    fn resolve_field_source(
        &self,
        rhs: RhsKind,
        offset: u32,
        components: u32,
    ) -> Result<(ScratchSource, Vec<ScratchIndex<Variable>>)> {
        Ok(match rhs {
            RhsKind::Variable => {
                let variable = self.variable_named(offset)?;
                self.check_numeric_source(variable, components)?;
                (ScratchSource::DirectVariable { variable }, vec![variable])
            }
            RhsKind::ConstIndex => {
                let [array, index] = words_at::<2>(&self.reader, offset)?;
                let array = self.variable_named(array)?;
                let count = self.check_numeric_source(array, components)?;
                if index >= count {
                    return Err(Error::format(format!("constant index {index} outside {count} elements")));
                }
                (ScratchSource::ConstIndexed { array, index }, vec![array])
            }
            RhsKind::VariableIndex => {
                let [array, index] = words_at::<2>(&self.reader, offset)?;
                let (array, index) = (self.variable_named(array)?, self.variable_named(index)?);
                self.check_index_variable(index)?;
                self.check_numeric_source(array, components)?;
                (ScratchSource::VariableIndexed { index, array }, vec![index, array])
            }
            RhsKind::InlineShader => return Err(Error::format("inline shader assigned to a scalar field")),
            RhsKind::Constant => return Err(Error::inconsistency("constant reached source resolution")),
        })
    }

    /// The block run of an object variable that may be bound to `slot`.
    fn object_blocks(&self, name_offset: u32, slot: BindingSlot) -> Result<(ScratchIndex<Variable>, ScratchRange<Block>)> {
        let variable = self.variable_named(name_offset)?;
        let scratch = self.scratch_variable(variable)?;
        match scratch.data {
            ScratchVariableData::Object { blocks } if scratch.layout.object_kind() == Some(slot.object_kind()) => {
                Ok((variable, blocks))
            }
            _ => Err(Error::format(format!(
                "variable bound to the {slot:?} slot is not a {:?}",
                slot.object_kind()
            ))),
        }
    }

    fn resolve_binding(
        &mut self,
        slot: BindingSlot,
        rhs: RhsKind,
        offset: u32,
        bindings: &mut PassBindings<ScratchIndex<Block>>,
    ) -> Result<()> {
        let out_of_range = |index| Error::format(format!("block index {index} outside the bound variable"));
        match rhs {
            RhsKind::Constant => {
                if self.constant_values(offset)?.iter().any(|value| value.as_u32() != 0) {
                    return Err(Error::format("constant bindings must be zero"));
                }
                bindings.set(slot, None);
            }
            RhsKind::Variable => {
                let (_, blocks) = self.object_blocks(offset, slot)?;
                bindings.set(slot, Some(blocks.get(0).ok_or_else(|| out_of_range(0))?));
            }
            RhsKind::ConstIndex => {
                let [array, index] = words_at::<2>(&self.reader, offset)?;
                let (_, blocks) = self.object_blocks(array, slot)?;
                bindings.set(slot, Some(blocks.get(index).ok_or_else(|| out_of_range(index))?));
            }
            RhsKind::VariableIndex => {
                let [array, index] = words_at::<2>(&self.reader, offset)?;
                let (_, blocks) = self.object_blocks(array, slot)?;
                let index = self.variable_named(index)?;
                self.check_index_variable(index)?;
                bindings.set(slot, Some(blocks.get(0).ok_or_else(|| out_of_range(0))?));
                self.push_assignment(
                    Destination::Binding(slot),
                    ScratchSource::ObjectVariableIndexed { index, blocks },
                    &[index],
                )?;
            }
            RhsKind::InlineShader => {
                let BindingSlot::Shader(stage) = slot else {
                    return Err(Error::format(format!("inline shader assigned to the {slot:?} slot")));
                };
                let bytecode = self.shader_bytecode(offset)?;
                let block = self.push_block(ScratchBlock {
                    kind: BlockKind::Shader(stage),
                    payload: ScratchPayload::Shader { bytecode },
                    assignments: ScratchRange::empty(),
                })?;
                bindings.set(slot, Some(block));
            }
        }
        Ok(())
    }

    fn push_assignment(
        &mut self,
        destination: Destination,
        source: ScratchSource,
        dependencies: &[ScratchIndex<Variable>],
    ) -> Result<()> {
        let first = self.runtime.dependencies.mark()?;
        for dependency in dependencies {
            self.runtime.dependencies.push(*dependency)?;
        }
        let dependencies = self.runtime.dependencies.range_since(first)?;
        self.runtime.assignments.push(ScratchAssignment {
            destination,
            source,
            dependencies,
            last_recomputed: 0,
        })?;
        Ok(())
    }

    fn check_counts(&self) -> Result<()> {
        let (declared, seen) = (self.header.counts, self.seen);
        let categories = [
            ("constant buffers", declared.constant_buffers, seen.constant_buffers),
            ("numeric variables", declared.numeric_variables, seen.numeric_variables),
            ("object variables", declared.object_variables, seen.object_variables),
            ("interface variables", declared.interface_variables, seen.interface_variables),
            ("groups", declared.groups, seen.groups),
            ("techniques", declared.techniques, seen.techniques),
            ("passes", declared.passes, seen.passes),
            ("strings", declared.strings, seen.strings),
            ("shaders", declared.shaders, seen.shaders),
            ("blend states", declared.blend_states, seen.blend_states),
            ("depth-stencil states", declared.depth_stencil_states, seen.depth_stencil_states),
            ("rasterizer states", declared.rasterizer_states, seen.rasterizer_states),
            ("samplers", declared.samplers, seen.samplers),
        ];
        for (what, declared, seen) in categories {
            if declared != seen {
                return Err(Error::format(format!(
                    "header declares {declared} {what} but the container holds {seen}"
                )));
            }
        }
        if self.reader.remaining() != 0 {
            return Err(Error::format(format!(
                "{} trailing bytes after the last record",
                self.reader.remaining()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::FormatVersion;
    use crate::container::builder::{
        AssignmentSpec, BufferSpec, ContainerBuilder, ObjectInit, ObjectSpec, PassSpec, TechniqueSpec, VariableSpec,
    };
    use crate::state::blend;

    fn parse_default(bytes: &[u8]) -> Result<Scratch> {
        parse(bytes, &LoadOptions::default())
    }

    #[test]
    fn defaults_land_in_buffer_bytes() {
        let mut builder = ContainerBuilder::new(FormatVersion::Fx5_0);
        let float2 = builder.numeric_type("float2", NumericType::vector(ScalarKind::Float, 2), 0).unwrap();
        let mut default = Vec::new();
        default.extend_from_slice(&1.5f32.to_le_bytes());
        default.extend_from_slice(&(-2.0f32).to_le_bytes());
        builder.constant_buffer(
            BufferSpec::new("cb", 32).variable(VariableSpec::new("uv", float2, 16).default_value(&default)),
        );
        let scratch = parse_default(&builder.finish().unwrap()).unwrap();
        let buffer = scratch.runtime.buffers.get(ScratchIndex::new(0)).unwrap();
        let bytes = scratch.runtime.buffer_bytes.get(buffer.data).unwrap();
        assert_eq!(&bytes[16..24], default.as_slice());
        assert!(bytes[..16].iter().all(|b| *b == 0));
        assert!(buffer.dirty);
    }

    #[test]
    fn constants_are_applied_and_discarded() {
        let mut builder = ContainerBuilder::new(FormatVersion::Fx4_0);
        let blend_type = builder.object_type("BlendState", ObjectKind::Blend, 0).unwrap();
        builder.object_variable(ObjectSpec::new("additive", blend_type).element(ObjectInit::State(vec![
            AssignmentSpec::constant_bool(61, true).at(2),
            AssignmentSpec::constant_uint(63, blend::ONE).at(2),
        ])));
        let scratch = parse_default(&builder.finish().unwrap()).unwrap();
        assert_eq!(scratch.runtime.assignments.len(), 0);
        let block = scratch.runtime.blocks.get(ScratchIndex::new(0)).unwrap();
        let ScratchPayload::State(StateRecord::Blend(record)) = &block.payload else {
            panic!("not a blend block");
        };
        assert_eq!(record.render_targets[2].blend_enable, 1);
        assert_eq!(record.render_targets[2].dest_blend, blend::ONE);
        assert_eq!(record.render_targets[0].blend_enable, 0);
        assert_eq!(record.independent_blend, 1);
    }

    #[test]
    fn inline_shader_becomes_a_bound_block() {
        let mut builder = ContainerBuilder::new(FormatVersion::Fx5_0);
        builder.technique(
            TechniqueSpec::new("t").pass(PassSpec::new("p").assign(AssignmentSpec::inline_shader(5, Some(b"ps")))),
        );
        let scratch = parse_default(&builder.finish().unwrap()).unwrap();
        let pass = scratch.runtime.passes.get(ScratchIndex::new(0)).unwrap();
        let block = pass.bindings.get(BindingSlot::Shader(crate::types::ShaderStage::Pixel)).unwrap();
        assert_eq!(block.index(), 0);
        assert_eq!(scratch.expected.shaders, 1);
    }

    #[test]
    fn unknown_variable_name_is_invalid() {
        let mut builder = ContainerBuilder::new(FormatVersion::Fx5_0);
        builder.technique(
            TechniqueSpec::new("t").pass(PassSpec::new("p").assign(AssignmentSpec::variable(10, "missing"))),
        );
        assert!(matches!(
            parse_default(&builder.finish().unwrap()),
            Err(Error::InvalidFormat { .. })
        ));
    }

    #[test]
    fn type_depth_is_bounded() {
        let mut builder = ContainerBuilder::new(FormatVersion::Fx5_0);
        let float = builder.numeric_type("float", NumericType::scalar(ScalarKind::Float), 0).unwrap();
        let inner = builder.struct_type("Inner", &[("x", None, 0, &float)], 0, None, false).unwrap();
        let outer = builder.struct_type("Outer", &[("inner", None, 0, &inner)], 0, None, false).unwrap();
        builder.constant_buffer(BufferSpec::new("cb", 16).variable(VariableSpec::new("o", outer, 0)));
        let bytes = builder.finish().unwrap();
        // Outer, Inner and float sit at depths 0, 1 and 2
        assert!(parse(&bytes, &LoadOptions::default().max_type_depth(2)).is_ok());
        assert!(matches!(
            parse(&bytes, &LoadOptions::default().max_type_depth(1)),
            Err(Error::InvalidFormat { .. })
        ));
    }
}
