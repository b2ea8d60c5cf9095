// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Rebuilds a [`Scratch`] image from a compacted effect, so a clone goes through the same
compaction as a fresh load.

Byte payloads are copied whole into fresh scratch buffers starting at offset 0, so every byte
span carries over unchanged. Strings and types are re-interned in their original order, which
reproduces the same canonical references.
*/

use super::scratch::{
    Scratch, ScratchAnnotation, ScratchAnnotationValue, ScratchAssignment, ScratchBlock, ScratchBuffer,
    ScratchBufferInfo, ScratchGroup, ScratchNamedInfo, ScratchPass, ScratchPayload, ScratchReflection,
    ScratchRuntime, ScratchSource, ScratchTechnique, ScratchVariable, ScratchVariableData, ScratchVariableInfo,
};
use crate::arena::{Offset, ScratchBytes, ScratchIndex, ScratchRange};
use crate::bittricks::REGISTER_SIZE;
use crate::container::FormatVersion;
use crate::error::{Error, Result};
use crate::evaluate::Source;
use crate::graph::{BlockPayload, Runtime, VariableData};
use crate::reflection::{AnnotationValue, NamedInfo, Reflection};

fn copy_bytes(bytes: &[u8], align: u32) -> Result<ScratchBytes> {
    let mut scratch = ScratchBytes::new();
    if !bytes.is_empty() {
        let offset = scratch.alloc(bytes, align)?;
        if offset.start != 0 {
            return Err(Error::inconsistency("copied payload did not start at offset 0"));
        }
    }
    Ok(scratch)
}

pub(crate) fn rebuild(format: FormatVersion, runtime: &Runtime, reflection: Option<&Reflection>) -> Result<Scratch> {
    Ok(Scratch {
        format,
        expected: runtime.counts,
        runtime: rebuild_runtime(runtime)?,
        reflection: reflection.map(rebuild_reflection).transpose()?,
    })
}

fn rebuild_runtime(runtime: &Runtime) -> Result<ScratchRuntime> {
    let mut scratch = ScratchRuntime {
        buffer_bytes: copy_bytes(&runtime.buffer_bytes, REGISTER_SIZE)?,
        bytecode: copy_bytes(&runtime.bytecode, 4)?,
        ..ScratchRuntime::default()
    };
    for buffer in runtime.buffers.iter() {
        scratch.buffers.push(ScratchBuffer {
            data: Offset::from_span(buffer.data),
            variables: ScratchRange::from_span(buffer.variables),
            bind_point: buffer.bind_point,
            // the clone's backend has never seen these bytes
            dirty: true,
        })?;
    }
    for variable in runtime.variables.iter() {
        let data = match variable.data {
            VariableData::Numeric { buffer, offset } => ScratchVariableData::Numeric {
                buffer: ScratchIndex::from_ref(buffer),
                offset,
            },
            VariableData::Object { blocks } => ScratchVariableData::Object {
                blocks: ScratchRange::from_span(blocks),
            },
            VariableData::Interface { binding } => ScratchVariableData::Interface {
                binding: binding.map(ScratchIndex::from_ref),
            },
        };
        scratch.variables.push(ScratchVariable {
            layout: variable.layout,
            data,
            last_modified: variable.last_modified,
        })?;
    }
    for block in runtime.blocks.iter() {
        let payload = match &block.payload {
            BlockPayload::State(record) => ScratchPayload::State(*record),
            BlockPayload::Shader { bytecode } => ScratchPayload::Shader {
                bytecode: bytecode.map(Offset::from_span),
            },
        };
        scratch.blocks.push(ScratchBlock {
            kind: block.kind,
            payload,
            assignments: ScratchRange::from_span(block.assignments),
        })?;
    }
    for assignment in runtime.assignments.iter() {
        let source = match assignment.source {
            Source::DirectVariable { variable } => ScratchSource::DirectVariable {
                variable: ScratchIndex::from_ref(variable),
            },
            Source::ConstIndexed { array, index } => ScratchSource::ConstIndexed {
                array: ScratchIndex::from_ref(array),
                index,
            },
            Source::VariableIndexed { index, array } => ScratchSource::VariableIndexed {
                index: ScratchIndex::from_ref(index),
                array: ScratchIndex::from_ref(array),
            },
            Source::ObjectVariableIndexed { index, blocks } => ScratchSource::ObjectVariableIndexed {
                index: ScratchIndex::from_ref(index),
                blocks: ScratchRange::from_span(blocks),
            },
        };
        scratch.assignments.push(ScratchAssignment {
            destination: assignment.destination,
            source,
            dependencies: ScratchRange::from_span(assignment.dependencies),
            last_recomputed: assignment.last_recomputed,
        })?;
    }
    for dependency in runtime.dependencies.iter() {
        scratch.dependencies.push(ScratchIndex::from_ref(*dependency))?;
    }
    for pass in runtime.passes.iter() {
        scratch.passes.push(ScratchPass {
            record: pass.record,
            bindings: pass.bindings.map(ScratchIndex::from_ref),
            assignments: ScratchRange::from_span(pass.assignments),
        })?;
    }
    for technique in runtime.techniques.iter() {
        scratch.techniques.push(ScratchTechnique {
            passes: ScratchRange::from_span(technique.passes),
        })?;
    }
    for group in runtime.groups.iter() {
        scratch.groups.push(ScratchGroup {
            techniques: ScratchRange::from_span(group.techniques),
        })?;
    }
    Ok(scratch)
}

fn named(info: &NamedInfo) -> ScratchNamedInfo {
    ScratchNamedInfo {
        name: info.name,
        annotations: ScratchRange::from_span(info.annotations),
    }
}

fn rebuild_reflection(reflection: &Reflection) -> Result<ScratchReflection> {
    let mut scratch = ScratchReflection {
        bytes: copy_bytes(&reflection.bytes, 1)?,
        ..ScratchReflection::default()
    };
    for (index, value) in reflection.strings.iter().enumerate() {
        let reference = scratch.strings.intern(value)?;
        if reference.index() != index {
            return Err(Error::inconsistency(format!("string {index} re-interned at {}", reference.index())));
        }
    }
    for (index, descriptor) in reflection.types.iter().enumerate() {
        let reference = scratch.types.intern(descriptor.clone())?;
        if reference.index() != index {
            return Err(Error::inconsistency(format!("type {index} re-interned at {}", reference.index())));
        }
    }
    for info in reflection.buffers.iter() {
        scratch.buffers.push(ScratchBufferInfo {
            name: info.name,
            tbuffer: info.tbuffer,
            annotations: ScratchRange::from_span(info.annotations),
        })?;
    }
    for info in reflection.variables.iter() {
        scratch.variables.push(ScratchVariableInfo {
            name: info.name,
            semantic: info.semantic,
            ty: info.ty,
            bind_point: info.bind_point,
            annotations: ScratchRange::from_span(info.annotations),
            strings: ScratchRange::from_span(info.strings),
        })?;
    }
    for info in reflection.groups.iter() {
        scratch.groups.push(named(info))?;
    }
    for info in reflection.techniques.iter() {
        scratch.techniques.push(named(info))?;
    }
    for info in reflection.passes.iter() {
        scratch.passes.push(named(info))?;
    }
    for annotation in reflection.annotations.iter() {
        let value = match &annotation.value {
            AnnotationValue::Numeric(span) => ScratchAnnotationValue::Numeric(Offset::from_span(*span)),
            AnnotationValue::Strings(span) => ScratchAnnotationValue::Strings(ScratchRange::from_span(*span)),
        };
        scratch.annotations.push(ScratchAnnotation {
            name: annotation.name,
            ty: annotation.ty,
            value,
        })?;
    }
    for value in reflection.string_values.iter() {
        scratch.string_values.push(*value)?;
    }
    Ok(scratch)
}
