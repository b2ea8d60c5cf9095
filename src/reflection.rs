// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The reflection half of a loaded effect: names, semantics, types, annotations and string values.

Nothing in here is needed for evaluation, so an [`Effect`](crate::Effect) can release all of it
with [`drop_reflection`](crate::Effect::drop_reflection).
*/

use rustc_hash::FxHashMap;

use crate::arena::{Ref, Span};
use crate::error::{Error, Result};
use crate::graph::{ConstantBuffer, Group, Pass, Technique, Variable};
use crate::pool::{StrRef, StringPool, TypePool, TypeRef};
use crate::types::TypeDescriptor;
use crate::value::ScalarValue;

#[derive(Debug, Clone)]
pub(crate) enum AnnotationValue {
    Numeric(Span<u8>),
    Strings(Span<StrRef>),
}

#[derive(Debug, Clone)]
pub struct Annotation {
    pub(crate) name: StrRef,
    pub(crate) ty: TypeRef,
    pub(crate) value: AnnotationValue,
}

#[derive(Debug, Clone)]
pub struct BufferInfo {
    pub(crate) name: StrRef,
    pub(crate) tbuffer: bool,
    pub(crate) annotations: Span<Annotation>,
}

#[derive(Debug, Clone)]
pub struct VariableInfo {
    pub(crate) name: StrRef,
    pub(crate) semantic: Option<StrRef>,
    pub(crate) ty: TypeRef,
    pub(crate) bind_point: Option<u32>,
    pub(crate) annotations: Span<Annotation>,
    pub(crate) strings: Span<StrRef>,
}

/// Name and annotations of a group, technique or pass.
#[derive(Debug, Clone)]
pub struct NamedInfo {
    pub(crate) name: Option<StrRef>,
    pub(crate) annotations: Span<Annotation>,
}

/// Anything annotations can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationOwner {
    Buffer(Ref<ConstantBuffer>),
    Variable(Ref<Variable>),
    Group(Ref<Group>),
    Technique(Ref<Technique>),
    Pass(Ref<Pass>),
}

/// The reflection arena.
#[derive(Debug)]
pub struct Reflection {
    pub(crate) strings: StringPool,
    pub(crate) types: TypePool,
    pub(crate) buffers: Box<[BufferInfo]>,
    pub(crate) variables: Box<[VariableInfo]>,
    pub(crate) groups: Box<[NamedInfo]>,
    pub(crate) techniques: Box<[NamedInfo]>,
    pub(crate) passes: Box<[NamedInfo]>,
    pub(crate) annotations: Box<[Annotation]>,
    pub(crate) string_values: Box<[StrRef]>,
    pub(crate) bytes: Box<[u8]>,
    pub(crate) variable_names: FxHashMap<StrRef, Ref<Variable>>,
    pub(crate) technique_names: FxHashMap<StrRef, Ref<Technique>>,
    pub(crate) group_names: FxHashMap<StrRef, Ref<Group>>,
}

fn missing(what: &str, index: usize) -> Error {
    Error::argument(format!("no {what} at index {index}"))
}

impl Reflection {
    fn string(&self, reference: StrRef) -> &str {
        self.strings.get(reference).unwrap_or_default()
    }

    pub(crate) fn variable_info(&self, variable: Ref<Variable>) -> Result<&VariableInfo> {
        self.variables
            .get(variable.index())
            .ok_or_else(|| missing("variable", variable.index()))
    }

    pub fn variable_by_name(&self, name: &str) -> Option<Ref<Variable>> {
        self.variable_names.get(&self.strings.find(name)?).copied()
    }

    pub fn technique_by_name(&self, name: &str) -> Option<Ref<Technique>> {
        self.technique_names.get(&self.strings.find(name)?).copied()
    }

    pub fn group_by_name(&self, name: &str) -> Option<Ref<Group>> {
        self.group_names.get(&self.strings.find(name)?).copied()
    }

    pub fn variable_name(&self, variable: Ref<Variable>) -> Result<&str> {
        Ok(self.string(self.variable_info(variable)?.name))
    }

    pub fn variable_semantic(&self, variable: Ref<Variable>) -> Result<Option<&str>> {
        Ok(self.variable_info(variable)?.semantic.map(|s| self.string(s)))
    }

    pub fn variable_bind_point(&self, variable: Ref<Variable>) -> Result<Option<u32>> {
        Ok(self.variable_info(variable)?.bind_point)
    }

    pub fn variable_type(&self, variable: Ref<Variable>) -> Result<&TypeDescriptor> {
        let ty = self.variable_info(variable)?.ty;
        self.type_descriptor(ty)
    }

    pub fn type_descriptor(&self, ty: TypeRef) -> Result<&TypeDescriptor> {
        self.types
            .get(ty)
            .ok_or_else(|| missing("type", ty.index()))
    }

    pub fn type_name(&self, ty: TypeRef) -> Result<&str> {
        Ok(self.string(self.type_descriptor(ty)?.name))
    }

    /// Resolves a string reference held by a type descriptor, such as a member name.
    pub fn resolve(&self, reference: StrRef) -> Option<&str> {
        self.strings.get(reference)
    }

    pub fn buffer_name(&self, buffer: Ref<ConstantBuffer>) -> Result<&str> {
        let info = self
            .buffers
            .get(buffer.index())
            .ok_or_else(|| missing("constant buffer", buffer.index()))?;
        Ok(self.string(info.name))
    }

    pub fn is_tbuffer(&self, buffer: Ref<ConstantBuffer>) -> Result<bool> {
        self.buffers
            .get(buffer.index())
            .map(|info| info.tbuffer)
            .ok_or_else(|| missing("constant buffer", buffer.index()))
    }

    fn named(&self, infos: &[NamedInfo], index: usize, what: &str) -> Result<Option<&str>> {
        let info = infos.get(index).ok_or_else(|| missing(what, index))?;
        Ok(info.name.map(|name| self.string(name)))
    }

    pub fn group_name(&self, group: Ref<Group>) -> Result<Option<&str>> {
        self.named(&self.groups, group.index(), "group")
    }

    pub fn technique_name(&self, technique: Ref<Technique>) -> Result<Option<&str>> {
        self.named(&self.techniques, technique.index(), "technique")
    }

    pub fn pass_name(&self, pass: Ref<Pass>) -> Result<Option<&str>> {
        self.named(&self.passes, pass.index(), "pass")
    }

    /// Element `element` of a string variable.
    pub fn string_value(&self, variable: Ref<Variable>, element: u32) -> Result<&str> {
        let info = self.variable_info(variable)?;
        let reference = info
            .strings
            .get(element)
            .and_then(|slot| self.string_values.get(slot.index()))
            .ok_or_else(|| Error::argument(format!("string variable has no element {element}")))?;
        Ok(self.string(*reference))
    }

    fn annotation_span(&self, owner: AnnotationOwner) -> Result<Span<Annotation>> {
        Ok(match owner {
            AnnotationOwner::Buffer(r) => {
                self.buffers
                    .get(r.index())
                    .ok_or_else(|| missing("constant buffer", r.index()))?
                    .annotations
            }
            AnnotationOwner::Variable(r) => self.variable_info(r)?.annotations,
            AnnotationOwner::Group(r) => self.groups.get(r.index()).ok_or_else(|| missing("group", r.index()))?.annotations,
            AnnotationOwner::Technique(r) => {
                self.techniques
                    .get(r.index())
                    .ok_or_else(|| missing("technique", r.index()))?
                    .annotations
            }
            AnnotationOwner::Pass(r) => self.passes.get(r.index()).ok_or_else(|| missing("pass", r.index()))?.annotations,
        })
    }

    pub fn annotations(&self, owner: AnnotationOwner) -> Result<impl Iterator<Item = AnnotationView<'_>>> {
        let span = self.annotation_span(owner)?;
        let annotations = self.annotations.get(span.range()).unwrap_or_default();
        Ok(annotations.iter().map(move |annotation| AnnotationView {
            reflection: self,
            annotation,
        }))
    }

    pub fn annotation(&self, owner: AnnotationOwner, name: &str) -> Result<Option<AnnotationView<'_>>> {
        Ok(self.annotations(owner)?.find(|a| a.name() == name))
    }

    /// Approximate bytes held by the reflection arena.
    pub(crate) fn byte_size(&self) -> Result<usize> {
        use crate::arena::footprint_of;
        let parts = [
            self.strings.byte_size()?,
            self.types.byte_size()?,
            footprint_of::<BufferInfo>(self.buffers.len(), "reflection buffers")?,
            footprint_of::<VariableInfo>(self.variables.len(), "reflection variables")?,
            footprint_of::<NamedInfo>(
                self.groups.len() + self.techniques.len() + self.passes.len(),
                "reflection names",
            )?,
            footprint_of::<Annotation>(self.annotations.len(), "reflection annotations")?,
            footprint_of::<StrRef>(self.string_values.len(), "reflection strings")?,
            self.bytes.len(),
            footprint_of::<(StrRef, Ref<Variable>)>(
                self.variable_names.len() + self.technique_names.len() + self.group_names.len(),
                "reflection name index",
            )?,
        ];
        parts.into_iter().try_fold(0usize, |sum, part| {
            crate::bittricks::checked_usize_add(sum, part, "reflection size")
        })
    }
}

/// A borrowed annotation with its name and value resolved against the owning reflection.
#[derive(Debug, Clone, Copy)]
pub struct AnnotationView<'a> {
    reflection: &'a Reflection,
    annotation: &'a Annotation,
}

impl<'a> AnnotationView<'a> {
    pub fn name(&self) -> &'a str {
        self.reflection.string(self.annotation.name)
    }

    pub fn type_descriptor(&self) -> Option<&'a TypeDescriptor> {
        self.reflection.types.get(self.annotation.ty)
    }

    /// Packed bytes of a numeric annotation.
    pub fn numeric_bytes(&self) -> Option<&'a [u8]> {
        match &self.annotation.value {
            AnnotationValue::Numeric(span) => self.reflection.bytes.get(span.range()),
            AnnotationValue::Strings(_) => None,
        }
    }

    /// Packed components of a numeric annotation, in order.
    pub fn scalars(&self) -> Option<Vec<ScalarValue>> {
        let bytes = self.numeric_bytes()?;
        let scalar = self.type_descriptor()?.as_numeric()?.scalar;
        let width = scalar.component_size() as usize;
        bytes
            .chunks_exact(width)
            .map(|chunk| ScalarValue::read(scalar, chunk))
            .collect()
    }

    pub fn strings(&self) -> Option<Vec<&'a str>> {
        match &self.annotation.value {
            AnnotationValue::Strings(span) => Some(
                self.reflection
                    .string_values
                    .get(span.range())?
                    .iter()
                    .map(|s| self.reflection.string(*s))
                    .collect(),
            ),
            AnnotationValue::Numeric(_) => None,
        }
    }
}
