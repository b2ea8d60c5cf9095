//! The growable image of an effect, built by the loader or by cloning and consumed by compaction.

use crate::arena::{Offset, ScratchBuf, ScratchBytes, ScratchIndex, ScratchRange, Staged};
use crate::container::{FormatVersion, HeaderCounts};
use crate::evaluate::{Assignment, Destination};
use crate::graph::{Block, ConstantBuffer, Group, Pass, Technique, Variable};
use crate::pool::{StrRef, StringPool, TypePool, TypeRef};
use crate::reflection::{Annotation, BufferInfo, NamedInfo, VariableInfo};
use crate::state::{PassBindings, PassRecord, StateRecord};
use crate::types::{BlockKind, Layout};

#[derive(Debug)]
pub(crate) struct ScratchBuffer {
    pub(crate) data: Offset,
    pub(crate) variables: ScratchRange<Variable>,
    pub(crate) bind_point: Option<u32>,
    pub(crate) dirty: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum ScratchVariableData {
    Numeric {
        buffer: ScratchIndex<ConstantBuffer>,
        offset: u32,
    },
    Object {
        blocks: ScratchRange<Block>,
    },
    Interface {
        binding: Option<ScratchIndex<Variable>>,
    },
}

#[derive(Debug)]
pub(crate) struct ScratchVariable {
    pub(crate) layout: Layout,
    pub(crate) data: ScratchVariableData,
    pub(crate) last_modified: u32,
}

#[derive(Debug)]
pub(crate) enum ScratchPayload {
    State(StateRecord),
    Shader { bytecode: Option<Offset> },
}

#[derive(Debug)]
pub(crate) struct ScratchBlock {
    pub(crate) kind: BlockKind,
    pub(crate) payload: ScratchPayload,
    pub(crate) assignments: ScratchRange<Assignment>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum ScratchSource {
    DirectVariable {
        variable: ScratchIndex<Variable>,
    },
    ConstIndexed {
        array: ScratchIndex<Variable>,
        index: u32,
    },
    VariableIndexed {
        index: ScratchIndex<Variable>,
        array: ScratchIndex<Variable>,
    },
    ObjectVariableIndexed {
        index: ScratchIndex<Variable>,
        blocks: ScratchRange<Block>,
    },
}

#[derive(Debug)]
pub(crate) struct ScratchAssignment {
    pub(crate) destination: Destination,
    pub(crate) source: ScratchSource,
    pub(crate) dependencies: ScratchRange<crate::arena::Ref<Variable>>,
    pub(crate) last_recomputed: u32,
}

#[derive(Debug)]
pub(crate) struct ScratchPass {
    pub(crate) record: PassRecord,
    pub(crate) bindings: PassBindings<ScratchIndex<Block>>,
    pub(crate) assignments: ScratchRange<Assignment>,
}

#[derive(Debug)]
pub(crate) struct ScratchTechnique {
    pub(crate) passes: ScratchRange<Pass>,
}

#[derive(Debug)]
pub(crate) struct ScratchGroup {
    pub(crate) techniques: ScratchRange<Technique>,
}

impl Staged for ScratchBuffer {
    type Final = ConstantBuffer;
}
impl Staged for ScratchVariable {
    type Final = Variable;
}
impl Staged for ScratchBlock {
    type Final = Block;
}
impl Staged for ScratchAssignment {
    type Final = Assignment;
}
impl<T> Staged for ScratchIndex<T> {
    type Final = crate::arena::Ref<T>;
}
impl Staged for ScratchPass {
    type Final = Pass;
}
impl Staged for ScratchTechnique {
    type Final = Technique;
}
impl Staged for ScratchGroup {
    type Final = Group;
}

/// Everything evaluation will need, before compaction.
#[derive(Debug, Default)]
pub(crate) struct ScratchRuntime {
    pub(crate) buffers: ScratchBuf<ScratchBuffer>,
    pub(crate) variables: ScratchBuf<ScratchVariable>,
    pub(crate) blocks: ScratchBuf<ScratchBlock>,
    pub(crate) assignments: ScratchBuf<ScratchAssignment>,
    pub(crate) dependencies: ScratchBuf<ScratchIndex<Variable>>,
    pub(crate) passes: ScratchBuf<ScratchPass>,
    pub(crate) techniques: ScratchBuf<ScratchTechnique>,
    pub(crate) groups: ScratchBuf<ScratchGroup>,
    pub(crate) buffer_bytes: ScratchBytes,
    pub(crate) bytecode: ScratchBytes,
}

#[derive(Debug, Clone)]
pub(crate) enum ScratchAnnotationValue {
    Numeric(Offset),
    Strings(ScratchRange<StrRef>),
}

#[derive(Debug)]
pub(crate) struct ScratchAnnotation {
    pub(crate) name: StrRef,
    pub(crate) ty: TypeRef,
    pub(crate) value: ScratchAnnotationValue,
}

#[derive(Debug)]
pub(crate) struct ScratchBufferInfo {
    pub(crate) name: StrRef,
    pub(crate) tbuffer: bool,
    pub(crate) annotations: ScratchRange<Annotation>,
}

#[derive(Debug)]
pub(crate) struct ScratchVariableInfo {
    pub(crate) name: StrRef,
    pub(crate) semantic: Option<StrRef>,
    pub(crate) ty: TypeRef,
    pub(crate) bind_point: Option<u32>,
    pub(crate) annotations: ScratchRange<Annotation>,
    pub(crate) strings: ScratchRange<StrRef>,
}

#[derive(Debug)]
pub(crate) struct ScratchNamedInfo {
    pub(crate) name: Option<StrRef>,
    pub(crate) annotations: ScratchRange<Annotation>,
}

impl Staged for ScratchAnnotation {
    type Final = Annotation;
}
impl Staged for ScratchBufferInfo {
    type Final = BufferInfo;
}
impl Staged for ScratchVariableInfo {
    type Final = VariableInfo;
}
impl Staged for ScratchNamedInfo {
    type Final = NamedInfo;
}
impl Staged for StrRef {
    type Final = StrRef;
}

/// Names, types and annotations, before compaction.
#[derive(Debug, Default)]
pub(crate) struct ScratchReflection {
    pub(crate) strings: StringPool,
    pub(crate) types: TypePool,
    pub(crate) buffers: ScratchBuf<ScratchBufferInfo>,
    pub(crate) variables: ScratchBuf<ScratchVariableInfo>,
    pub(crate) groups: ScratchBuf<ScratchNamedInfo>,
    pub(crate) techniques: ScratchBuf<ScratchNamedInfo>,
    pub(crate) passes: ScratchBuf<ScratchNamedInfo>,
    pub(crate) annotations: ScratchBuf<ScratchAnnotation>,
    pub(crate) string_values: ScratchBuf<StrRef>,
    pub(crate) bytes: ScratchBytes,
}

/// A complete scratch image of one effect.
#[derive(Debug)]
pub(crate) struct Scratch {
    pub(crate) format: FormatVersion,
    /// Counts every category must have once compacted.
    pub(crate) expected: HeaderCounts,
    pub(crate) runtime: ScratchRuntime,
    pub(crate) reflection: Option<ScratchReflection>,
}
