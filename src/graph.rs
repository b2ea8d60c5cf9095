// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The runtime half of a loaded effect.

Everything evaluation touches lives here: constant buffer backing stores, the per-variable
layout copies, blocks with their configuration records, assignments and dependency lists, and
the group/technique/pass containment. Each category is one fixed allocation, and objects refer
to each other through [`Ref`]s and [`Span`]s into those allocations.
*/

use crate::arena::{Ref, Span, footprint_of};
use crate::bittricks::checked_usize_add;
use crate::container::HeaderCounts;
use crate::error::Result;
use crate::evaluate::Assignment;
use crate::imp::ObjectHandle;
use crate::state::{PassBindings, PassRecord, StateRecord};
use crate::types::{BlockKind, Layout};

/// A constant buffer and the bytes it pushes to the backend.
#[derive(Debug, Clone)]
pub struct ConstantBuffer {
    pub(crate) data: Span<u8>,
    pub(crate) variables: Span<Variable>,
    pub(crate) bind_point: Option<u32>,
    pub(crate) dirty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VariableData {
    /// Byte offset within the owning buffer.
    Numeric { buffer: Ref<ConstantBuffer>, offset: u32 },
    /// Consecutive blocks, one per element. Empty for strings and resources.
    Object { blocks: Span<Block> },
    Interface { binding: Option<Ref<Variable>> },
}

impl VariableData {
    pub(crate) fn blocks(&self) -> Option<Span<Block>> {
        match self {
            VariableData::Object { blocks } => Some(*blocks),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub(crate) layout: Layout,
    pub(crate) data: VariableData,
    pub(crate) last_modified: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BlockPayload {
    State(StateRecord),
    /// `None` is the null shader, which binds nothing.
    Shader { bytecode: Option<Span<u8>> },
}

/// A render-state or shader block.
#[derive(Debug, Clone)]
pub struct Block {
    pub(crate) kind: BlockKind,
    pub(crate) payload: BlockPayload,
    pub(crate) assignments: Span<Assignment>,
    pub(crate) handle: Option<ObjectHandle>,
    pub(crate) valid: bool,
    /// Whether the backend has been asked for an object since the last reset.
    pub(crate) created: bool,
}

impl Block {
    pub(crate) fn new(kind: BlockKind, payload: BlockPayload, assignments: Span<Assignment>) -> Self {
        Block {
            kind,
            payload,
            assignments,
            handle: None,
            valid: true,
            created: false,
        }
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    pub fn state(&self) -> Option<&StateRecord> {
        match &self.payload {
            BlockPayload::State(record) => Some(record),
            BlockPayload::Shader { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Pass {
    pub(crate) record: PassRecord,
    pub(crate) bindings: PassBindings<Ref<Block>>,
    pub(crate) assignments: Span<Assignment>,
    pub(crate) valid: bool,
}

#[derive(Debug, Clone)]
pub struct Technique {
    pub(crate) passes: Span<Pass>,
}

#[derive(Debug, Clone)]
pub struct Group {
    pub(crate) techniques: Span<Technique>,
}

/// The runtime arena: one fixed allocation per category.
#[derive(Debug)]
pub(crate) struct Runtime {
    pub(crate) counts: HeaderCounts,
    pub(crate) buffers: Box<[ConstantBuffer]>,
    pub(crate) variables: Box<[Variable]>,
    pub(crate) blocks: Box<[Block]>,
    pub(crate) assignments: Box<[Assignment]>,
    pub(crate) dependencies: Box<[Ref<Variable>]>,
    pub(crate) passes: Box<[Pass]>,
    pub(crate) techniques: Box<[Technique]>,
    pub(crate) groups: Box<[Group]>,
    pub(crate) buffer_bytes: Box<[u8]>,
    pub(crate) bytecode: Box<[u8]>,
}

impl Runtime {
    pub(crate) fn variable(&self, variable: Ref<Variable>) -> Option<&Variable> {
        self.variables.get(variable.index())
    }

    /// Bytes of `element` of a numeric variable.
    pub(crate) fn element_bytes(&self, variable: &Variable, element: u32) -> Option<&[u8]> {
        element_bytes(&self.buffers, &self.buffer_bytes, variable, element)
    }

    /// Bytes covered by every element of a numeric variable.
    pub(crate) fn footprint_bytes(&self, variable: &Variable) -> Option<&[u8]> {
        let start = numeric_start(&self.buffers, variable)?;
        self.buffer_bytes.get(start..start + variable.layout.footprint() as usize)
    }

    pub(crate) fn footprint_bytes_mut(&mut self, variable: Ref<Variable>) -> Option<&mut [u8]> {
        let variable = self.variables.get(variable.index())?;
        let start = numeric_start(&self.buffers, variable)?;
        self.buffer_bytes
            .get_mut(start..start + variable.layout.footprint() as usize)
    }

    /// Bytes held by the runtime arena.
    pub(crate) fn byte_size(&self) -> Result<usize> {
        let parts = [
            footprint_of::<ConstantBuffer>(self.buffers.len(), "runtime buffers")?,
            footprint_of::<Variable>(self.variables.len(), "runtime variables")?,
            footprint_of::<Block>(self.blocks.len(), "runtime blocks")?,
            footprint_of::<Assignment>(self.assignments.len(), "runtime assignments")?,
            footprint_of::<Ref<Variable>>(self.dependencies.len(), "runtime dependencies")?,
            footprint_of::<Pass>(self.passes.len(), "runtime passes")?,
            footprint_of::<Technique>(self.techniques.len(), "runtime techniques")?,
            footprint_of::<Group>(self.groups.len(), "runtime groups")?,
            self.buffer_bytes.len(),
            self.bytecode.len(),
        ];
        parts
            .into_iter()
            .try_fold(0usize, |sum, part| checked_usize_add(sum, part, "runtime size"))
    }

    /// Marks a variable as modified at `now` and its owning buffer as dirty.
    pub(crate) fn touch(&mut self, variable: Ref<Variable>, now: u32) {
        let Some(variable) = self.variables.get_mut(variable.index()) else {
            return;
        };
        variable.last_modified = now;
        if let VariableData::Numeric { buffer, .. } = variable.data
            && let Some(buffer) = self.buffers.get_mut(buffer.index())
        {
            buffer.dirty = true;
        }
    }
}

fn numeric_start(buffers: &[ConstantBuffer], variable: &Variable) -> Option<usize> {
    let VariableData::Numeric { buffer, offset } = variable.data else {
        return None;
    };
    let buffer = buffers.get(buffer.index())?;
    Some(buffer.data.start() as usize + offset as usize)
}

pub(crate) fn element_bytes<'a>(
    buffers: &[ConstantBuffer],
    bytes: &'a [u8],
    variable: &Variable,
    element: u32,
) -> Option<&'a [u8]> {
    let layout = &variable.layout;
    if element >= layout.count() {
        return None;
    }
    let start = numeric_start(buffers, variable)? + element as usize * layout.stride as usize;
    bytes.get(start..start + layout.element_size as usize)
}
