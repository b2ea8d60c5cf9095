// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Moves a [`Scratch`] image into its two fixed arenas.

Each category is checked against the count the header promised, compacted in order, and every
stored scratch index is resolved through a [`Relocator`] sized to its category. A failure here
means the scratch image itself is inconsistent, so every error is an
[`InternalInconsistency`](crate::Error::InternalInconsistency).
*/

use rustc_hash::FxHashMap;

use super::MemoryReport;
use super::scratch::{
    Scratch, ScratchAnnotationValue, ScratchNamedInfo, ScratchPayload, ScratchReflection, ScratchRuntime, ScratchSource,
    ScratchVariableData,
};
use crate::arena::{self, ByteRelocator, Ref, Relocator};
use crate::container::HeaderCounts;
use crate::error::{Error, Result};
use crate::evaluate::{Assignment, Source};
use crate::graph::{
    Block, BlockPayload, ConstantBuffer, Group, Pass, Runtime, Technique, Variable, VariableData,
};
use crate::pool::StrRef;
use crate::reflection::{Annotation, AnnotationValue, BufferInfo, NamedInfo, Reflection, VariableInfo};

/// The result of compacting one scratch image.
#[derive(Debug)]
pub(crate) struct Compacted {
    pub(crate) runtime: Runtime,
    pub(crate) reflection: Option<Reflection>,
    pub(crate) memory: MemoryReport,
}

fn expect_len(what: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(Error::inconsistency(format!(
            "{what}: scratch holds {actual}, header declares {expected}"
        )));
    }
    Ok(())
}

/// Relocators for every runtime category, sized to the final lengths.
struct Relocators {
    buffers: Relocator<ConstantBuffer>,
    variables: Relocator<Variable>,
    blocks: Relocator<Block>,
    assignments: Relocator<Assignment>,
    dependencies: Relocator<Ref<Variable>>,
    passes: Relocator<Pass>,
    techniques: Relocator<Technique>,
}

pub(crate) fn compact(scratch: Scratch) -> Result<Compacted> {
    let Scratch {
        expected,
        runtime,
        reflection,
        ..
    } = scratch;
    let runtime = compact_runtime(runtime, expected)?;
    let reflection = reflection
        .map(|reflection| compact_reflection(reflection, &runtime))
        .transpose()?;
    let memory = MemoryReport {
        runtime_bytes: runtime.byte_size()?,
        reflection_bytes: reflection.as_ref().map(Reflection::byte_size).transpose()?.unwrap_or(0),
    };
    Ok(Compacted {
        runtime,
        reflection,
        memory,
    })
}

fn compact_runtime(scratch: ScratchRuntime, counts: HeaderCounts) -> Result<Runtime> {
    expect_len("constant buffers", scratch.buffers.len(), counts.constant_buffers as usize)?;
    expect_len("variables", scratch.variables.len(), counts.variables()? as usize)?;
    expect_len("blocks", scratch.blocks.len(), counts.blocks()? as usize)?;
    expect_len("passes", scratch.passes.len(), counts.passes as usize)?;
    expect_len("techniques", scratch.techniques.len(), counts.techniques as usize)?;
    expect_len("groups", scratch.groups.len(), counts.groups as usize)?;

    let relocate = Relocators {
        buffers: Relocator::new(scratch.buffers.len(), "constant buffer")?,
        variables: Relocator::new(scratch.variables.len(), "variable")?,
        blocks: Relocator::new(scratch.blocks.len(), "block")?,
        assignments: Relocator::new(scratch.assignments.len(), "assignment")?,
        dependencies: Relocator::new(scratch.dependencies.len(), "dependency")?,
        passes: Relocator::new(scratch.passes.len(), "pass")?,
        techniques: Relocator::new(scratch.techniques.len(), "technique")?,
    };

    let buffer_bytes = scratch.buffer_bytes.compact("constant buffer bytes")?;
    let bytecode = scratch.bytecode.compact("shader bytecode")?;
    let buffer_span = ByteRelocator::new(&buffer_bytes, "constant buffer");
    let bytecode_span = ByteRelocator::new(&bytecode, "shader bytecode");

    let buffers = arena::compact(scratch.buffers, "constant buffers", |buffer| {
        Ok(ConstantBuffer {
            data: buffer_span.span(buffer.data)?,
            variables: relocate.variables.range(buffer.variables)?,
            bind_point: buffer.bind_point,
            dirty: buffer.dirty,
        })
    })?;
    let variables = arena::compact(scratch.variables, "variables", |variable| {
        let data = match variable.data {
            ScratchVariableData::Numeric { buffer, offset } => VariableData::Numeric {
                buffer: relocate.buffers.index(buffer)?,
                offset,
            },
            ScratchVariableData::Object { blocks } => VariableData::Object {
                blocks: relocate.blocks.range(blocks)?,
            },
            ScratchVariableData::Interface { binding } => VariableData::Interface {
                binding: relocate.variables.optional(binding)?,
            },
        };
        Ok(Variable {
            layout: variable.layout,
            data,
            last_modified: variable.last_modified,
        })
    })?;
    let blocks = arena::compact(scratch.blocks, "blocks", |block| {
        let payload = match block.payload {
            ScratchPayload::State(record) => BlockPayload::State(record),
            ScratchPayload::Shader { bytecode } => BlockPayload::Shader {
                bytecode: bytecode.map(|offset| bytecode_span.span(offset)).transpose()?,
            },
        };
        Ok(Block::new(block.kind, payload, relocate.assignments.range(block.assignments)?))
    })?;
    let assignments = arena::compact(scratch.assignments, "assignments", |assignment| {
        let source = match assignment.source {
            ScratchSource::DirectVariable { variable } => Source::DirectVariable {
                variable: relocate.variables.index(variable)?,
            },
            ScratchSource::ConstIndexed { array, index } => Source::ConstIndexed {
                array: relocate.variables.index(array)?,
                index,
            },
            ScratchSource::VariableIndexed { index, array } => Source::VariableIndexed {
                index: relocate.variables.index(index)?,
                array: relocate.variables.index(array)?,
            },
            ScratchSource::ObjectVariableIndexed { index, blocks } => Source::ObjectVariableIndexed {
                index: relocate.variables.index(index)?,
                blocks: relocate.blocks.range(blocks)?,
            },
        };
        Ok(Assignment {
            destination: assignment.destination,
            source,
            dependencies: relocate.dependencies.range(assignment.dependencies)?,
            last_recomputed: assignment.last_recomputed,
        })
    })?;
    let dependencies = arena::compact(scratch.dependencies, "dependencies", |dependency| {
        relocate.variables.index(dependency)
    })?;
    let passes = arena::compact(scratch.passes, "passes", |pass| {
        Ok(Pass {
            record: pass.record,
            bindings: pass.bindings.try_map(|block| relocate.blocks.index(block))?,
            assignments: relocate.assignments.range(pass.assignments)?,
            valid: true,
        })
    })?;
    let techniques = arena::compact(scratch.techniques, "techniques", |technique| {
        Ok(Technique {
            passes: relocate.passes.range(technique.passes)?,
        })
    })?;
    let groups = arena::compact(scratch.groups, "groups", |group| {
        Ok(Group {
            techniques: relocate.techniques.range(group.techniques)?,
        })
    })?;

    Ok(Runtime {
        counts,
        buffers,
        variables,
        blocks,
        assignments,
        dependencies,
        passes,
        techniques,
        groups,
        buffer_bytes,
        bytecode,
    })
}

/// Builds a name index where the first declaration of a name wins.
fn name_index<T>(names: impl Iterator<Item = Option<StrRef>>, what: &'static str) -> Result<FxHashMap<StrRef, Ref<T>>> {
    let mut index = FxHashMap::default();
    for (slot, name) in names.enumerate() {
        let Some(name) = name else { continue };
        let slot = u32::try_from(slot).map_err(|_| Error::overflow(what))?;
        index.entry(name).or_insert(Ref::new(slot));
    }
    Ok(index)
}

fn compact_reflection(scratch: ScratchReflection, runtime: &Runtime) -> Result<Reflection> {
    expect_len("buffer names", scratch.buffers.len(), runtime.buffers.len())?;
    expect_len("variable names", scratch.variables.len(), runtime.variables.len())?;
    expect_len("group names", scratch.groups.len(), runtime.groups.len())?;
    expect_len("technique names", scratch.techniques.len(), runtime.techniques.len())?;
    expect_len("pass names", scratch.passes.len(), runtime.passes.len())?;

    let annotation_range = Relocator::<Annotation>::new(scratch.annotations.len(), "annotation")?;
    let string_range = Relocator::<StrRef>::new(scratch.string_values.len(), "string value")?;
    let bytes = scratch.bytes.compact("annotation bytes")?;
    let byte_span = ByteRelocator::new(&bytes, "annotation");

    let annotations = arena::compact(scratch.annotations, "annotations", |annotation| {
        let value = match annotation.value {
            ScratchAnnotationValue::Numeric(offset) => AnnotationValue::Numeric(byte_span.span(offset)?),
            ScratchAnnotationValue::Strings(range) => AnnotationValue::Strings(string_range.range(range)?),
        };
        Ok(Annotation {
            name: annotation.name,
            ty: annotation.ty,
            value,
        })
    })?;
    let string_values = arena::compact(scratch.string_values, "string values", Ok)?;
    let buffers = arena::compact(scratch.buffers, "buffer names", |info| {
        Ok(BufferInfo {
            name: info.name,
            tbuffer: info.tbuffer,
            annotations: annotation_range.range(info.annotations)?,
        })
    })?;
    let variables = arena::compact(scratch.variables, "variable names", |info| {
        Ok(VariableInfo {
            name: info.name,
            semantic: info.semantic,
            ty: info.ty,
            bind_point: info.bind_point,
            annotations: annotation_range.range(info.annotations)?,
            strings: string_range.range(info.strings)?,
        })
    })?;
    let named = |info: ScratchNamedInfo| -> Result<NamedInfo> {
        Ok(NamedInfo {
            name: info.name,
            annotations: annotation_range.range(info.annotations)?,
        })
    };
    let groups = arena::compact(scratch.groups, "group names", named)?;
    let techniques = arena::compact(scratch.techniques, "technique names", named)?;
    let passes = arena::compact(scratch.passes, "pass names", named)?;

    let variable_names = name_index(variables.iter().map(|info| Some(info.name)), "variable name index")?;
    let technique_names = name_index(techniques.iter().map(|info| info.name), "technique name index")?;
    let group_names = name_index(groups.iter().map(|info| info.name), "group name index")?;

    Ok(Reflection {
        strings: scratch.strings,
        types: scratch.types,
        buffers,
        variables,
        groups,
        techniques,
        passes,
        annotations,
        string_values,
        bytes,
        variable_names,
        technique_names,
        group_names,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{ScratchIndex, ScratchRange};
    use crate::container::FormatVersion;
    use crate::container::builder::{
        AssignmentSpec, BufferSpec, ContainerBuilder, ObjectInit, ObjectSpec, PassSpec, TechniqueSpec, VariableSpec,
    };
    use crate::effect::LoadOptions;
    use crate::effect::load::parse;
    use crate::effect::scratch::ScratchGroup;
    use crate::types::{NumericType, ObjectKind, ScalarKind};

    fn scratch() -> Scratch {
        let mut builder = ContainerBuilder::new(FormatVersion::Fx5_0);
        let int = builder.numeric_type("int", NumericType::scalar(ScalarKind::Int), 0).unwrap();
        let vs = builder.object_type("VertexShader", ObjectKind::VertexShader, 2).unwrap();
        builder.constant_buffer(BufferSpec::new("cb", 16).variable(VariableSpec::new("n", int, 0)));
        builder.object_variable(
            ObjectSpec::new("shaders", vs)
                .element(ObjectInit::Shader(Some(b"a".to_vec())))
                .element(ObjectInit::Shader(Some(b"b".to_vec()))),
        );
        builder.technique(
            TechniqueSpec::new("t").pass(PassSpec::new("p").assign(AssignmentSpec::variable_index(4, "shaders", "n"))),
        );
        parse(&builder.finish().unwrap(), &LoadOptions::default()).unwrap()
    }

    #[test]
    fn references_resolve_into_their_categories() {
        let compacted = compact(scratch()).unwrap();
        let runtime = &compacted.runtime;
        assert_eq!(runtime.variables.len(), 2);
        assert_eq!(runtime.blocks.len(), 2);
        let assignment = &runtime.assignments[0];
        let Source::ObjectVariableIndexed { index, blocks } = assignment.source else {
            panic!("unexpected source {:?}", assignment.source);
        };
        assert_eq!(index.index(), 0);
        assert_eq!(blocks.range(), 0..2);
        assert_eq!(&runtime.dependencies[assignment.dependencies.range()], &[Ref::new(0)]);
        let bytes = runtime.blocks[1].payload.clone();
        let BlockPayload::Shader { bytecode: Some(span) } = bytes else {
            panic!("not a shader");
        };
        assert_eq!(&runtime.bytecode[span.range()], b"b");
        let reflection = compacted.reflection.unwrap();
        assert_eq!(reflection.variable_by_name("shaders"), Some(Ref::new(1)));
        assert!(compacted.memory.runtime_bytes > 0 && compacted.memory.reflection_bytes > 0);
    }

    #[test]
    fn count_mismatch_is_an_inconsistency() {
        let mut scratch = scratch();
        scratch
            .runtime
            .groups
            .push(ScratchGroup {
                techniques: ScratchRange::empty(),
            })
            .unwrap();
        assert!(matches!(compact(scratch), Err(Error::InternalInconsistency { .. })));
    }

    #[test]
    fn dangling_index_is_an_inconsistency() {
        let mut scratch = scratch();
        let pass = scratch.runtime.passes.get_mut(ScratchIndex::new(0)).unwrap();
        pass.bindings
            .set(crate::state::BindingSlot::Blend, Some(ScratchIndex::new(40)));
        assert!(matches!(compact(scratch), Err(Error::InternalInconsistency { .. })));
    }
}
