/*!
Applying passes and blocks: assignments into records, records into backend objects.

A block whose assignments changed its record, or that has never been created, releases its old
handle and asks the [`Backend`] for a new one. A failure marks only that block invalid; the
pass reports itself invalid while any bound block is, and every other pass keeps working.
*/

use crate::arena::Ref;
use crate::error::{Error, Result};
use crate::evaluate::{Assignment, Destination, Sources, Target, apply_assignments};
use crate::graph::{Block, BlockPayload, ConstantBuffer, Pass, Runtime};
use crate::imp::{Backend, BackendError, ConstantBufferUpload, ObjectHandle};
use crate::state::{BindingSlot, PassBindings, PassRecord};
use crate::types::{BlockKind, ShaderStage};

/// What a pass resolved to after it was applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassState {
    /// The block bound in each slot.
    pub blocks: PassBindings<Ref<Block>>,
    /// Backend objects of the bound blocks. Null shaders and failed blocks have none.
    pub handles: PassBindings<ObjectHandle>,
    pub record: PassRecord,
    pub valid: bool,
}

impl PassState {
    pub fn handle(&self, slot: BindingSlot) -> Option<ObjectHandle> {
        self.handles.get(slot)
    }

    pub fn shader(&self, stage: ShaderStage) -> Option<ObjectHandle> {
        self.handles.get(BindingSlot::Shader(stage))
    }

    pub fn block(&self, slot: BindingSlot) -> Option<Ref<Block>> {
        self.blocks.get(slot)
    }
}

fn block_assignments<'a>(assignments: &'a mut [Assignment], block: &Block) -> Result<&'a mut [Assignment]> {
    assignments
        .get_mut(block.assignments.range())
        .ok_or_else(|| Error::inconsistency("block assignments outside the runtime arena"))
}

/// Evaluates a block's assignments and recreates its object if needed. Returns its validity.
fn refresh_block<B: Backend + ?Sized>(
    block: &mut Block,
    assignments: &mut [Assignment],
    sources: &Sources<'_>,
    bytecode: &[u8],
    now: u32,
    backend: &mut B,
) -> Result<bool> {
    let assignments = block_assignments(assignments, block)?;
    let changed = match &mut block.payload {
        BlockPayload::State(record) => apply_assignments(
            assignments,
            sources,
            now,
            Target {
                record: record.bytes_mut(),
                bindings: None,
            },
        ),
        BlockPayload::Shader { .. } => false,
    };
    if changed || !block.created {
        recreate(block, bytecode, backend);
    }
    Ok(block.valid)
}

fn recreate<B: Backend + ?Sized>(block: &mut Block, bytecode: &[u8], backend: &mut B) {
    if let Some(old) = block.handle.take() {
        backend.release(old);
    }
    block.created = true;
    let created = match (&block.payload, block.kind) {
        (BlockPayload::State(record), _) => backend.create_state_object(record).map(Some),
        (BlockPayload::Shader { bytecode: None }, _) => Ok(None),
        (BlockPayload::Shader { bytecode: Some(span) }, BlockKind::Shader(stage)) => match bytecode.get(span.range()) {
            Some(bytes) => backend.create_shader(stage, bytes).map(Some),
            None => Err(BackendError::InvalidShader("bytecode outside the effect".to_owned())),
        },
        (BlockPayload::Shader { .. }, kind) => Err(BackendError::InvalidShader(format!("{kind:?} block holds bytecode"))),
    };
    match created {
        Ok(handle) => {
            block.handle = handle;
            block.valid = true;
        }
        Err(error) => {
            block.valid = false;
            logwise::warn_sync!(
                "could not create {kind} object: {error}",
                kind = logwise::privacy::LogIt(&block.kind),
                error = logwise::privacy::LogIt(&error)
            );
        }
    }
}

/// Pushes every dirty buffer to the backend, keeping it dirty if the upload fails.
fn upload_dirty<B: Backend + ?Sized>(buffers: &mut [ConstantBuffer], bytes: &[u8], backend: &mut B) -> Result<()> {
    for (index, buffer) in buffers.iter_mut().enumerate() {
        if !buffer.dirty {
            continue;
        }
        let data = bytes
            .get(buffer.data.range())
            .ok_or_else(|| Error::inconsistency("constant buffer outside its bytes"))?;
        let reference = Ref::new(u32::try_from(index).map_err(|_| Error::overflow("constant buffer index"))?);
        let upload = ConstantBufferUpload {
            buffer: reference,
            bind_point: buffer.bind_point,
            bytes: data,
        };
        match backend.upload_constant_buffer(upload) {
            Ok(()) => buffer.dirty = false,
            Err(error) => {
                logwise::warn_sync!(
                    "constant buffer {index} upload failed: {error}",
                    index = index,
                    error = logwise::privacy::LogIt(&error)
                );
            }
        }
    }
    Ok(())
}

impl Runtime {
    /// Applies one pass at clock value `now`.
    ///
    /// Binding assignments run first so the bound blocks are known, then every bound block in
    /// slot order, then the pass's own scalar assignments. Dirty constant buffers are uploaded
    /// last.
    pub(crate) fn apply_pass<B: Backend + ?Sized>(&mut self, pass: Ref<Pass>, now: u32, backend: &mut B) -> Result<PassState> {
        let entry = self
            .passes
            .get_mut(pass.index())
            .ok_or_else(|| Error::argument(format!("no pass at index {}", pass.index())))?;
        let span = entry.assignments;
        let sources = Sources {
            variables: &self.variables,
            buffers: &self.buffers,
            bytes: &self.buffer_bytes,
            dependencies: &self.dependencies,
        };
        let own = self
            .assignments
            .get_mut(span.range())
            .ok_or_else(|| Error::inconsistency("pass assignments outside the runtime arena"))?;
        for assignment in own
            .iter_mut()
            .filter(|assignment| matches!(assignment.destination, Destination::Binding(_)))
        {
            assignment.evaluate(
                &sources,
                now,
                Target {
                    record: &mut [],
                    bindings: Some(&mut entry.bindings),
                },
            );
        }

        let mut valid = true;
        let mut handles = PassBindings::empty();
        for slot in BindingSlot::ALL {
            let Some(block) = entry.bindings.get(slot) else {
                continue;
            };
            let block_entry = self
                .blocks
                .get_mut(block.index())
                .ok_or_else(|| Error::inconsistency("bound block outside the runtime arena"))?;
            valid &= refresh_block(block_entry, &mut self.assignments, &sources, &self.bytecode, now, backend)?;
            handles.set(slot, block_entry.handle);
        }

        let own = self
            .assignments
            .get_mut(span.range())
            .ok_or_else(|| Error::inconsistency("pass assignments outside the runtime arena"))?;
        for assignment in own
            .iter_mut()
            .filter(|assignment| matches!(assignment.destination, Destination::Field { .. }))
        {
            assignment.evaluate(
                &sources,
                now,
                Target {
                    record: bytemuck::bytes_of_mut(&mut entry.record),
                    bindings: None,
                },
            );
        }

        upload_dirty(&mut self.buffers, &self.buffer_bytes, backend)?;
        entry.valid = valid;
        logwise::trace_sync!(
            "applied pass {pass} (valid: {valid})",
            pass = pass.index(),
            valid = valid
        );
        Ok(PassState {
            blocks: entry.bindings,
            handles,
            record: entry.record,
            valid,
        })
    }

    /// Brings a standalone block, such as a sampler, up to date and returns its object.
    pub(crate) fn refresh_object<B: Backend + ?Sized>(
        &mut self,
        block: Ref<Block>,
        now: u32,
        backend: &mut B,
    ) -> Result<Option<ObjectHandle>> {
        let sources = Sources {
            variables: &self.variables,
            buffers: &self.buffers,
            bytes: &self.buffer_bytes,
            dependencies: &self.dependencies,
        };
        let entry = self
            .blocks
            .get_mut(block.index())
            .ok_or_else(|| Error::argument(format!("no block at index {}", block.index())))?;
        refresh_block(entry, &mut self.assignments, &sources, &self.bytecode, now, backend)?;
        Ok(entry.handle)
    }

    /// Returns every live object to the backend. Blocks are recreated on their next use.
    pub(crate) fn release_objects<B: Backend + ?Sized>(&mut self, backend: &mut B) {
        for block in self.blocks.iter_mut() {
            if let Some(handle) = block.handle.take() {
                backend.release(handle);
            }
            block.created = false;
            block.valid = true;
        }
        for pass in self.passes.iter_mut() {
            pass.valid = true;
        }
        for buffer in self.buffers.iter_mut() {
            buffer.dirty = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::FormatVersion;
    use crate::container::builder::{
        AssignmentSpec, BufferSpec, ContainerBuilder, ObjectInit, ObjectSpec, PassSpec, TechniqueSpec, VariableSpec,
    };
    use crate::effect::{Effect, LoadOptions};
    use crate::imp::{NopBackend, NopObject};
    use crate::state::StateRecord;
    use crate::types::{NumericType, ObjectKind, ScalarKind};

    /// Creates shaders normally and refuses every state object.
    #[derive(Default)]
    struct RefusingStates {
        inner: NopBackend,
    }

    impl Backend for RefusingStates {
        fn create_state_object(&mut self, _record: &StateRecord) -> std::result::Result<ObjectHandle, BackendError> {
            Err(BackendError::UnsupportedState("refused".to_owned()))
        }

        fn create_shader(&mut self, stage: ShaderStage, bytecode: &[u8]) -> std::result::Result<ObjectHandle, BackendError> {
            self.inner.create_shader(stage, bytecode)
        }

        fn release(&mut self, handle: ObjectHandle) {
            self.inner.release(handle)
        }

        fn upload_constant_buffer(&mut self, upload: ConstantBufferUpload<'_>) -> std::result::Result<(), BackendError> {
            self.inner.upload_constant_buffer(upload)
        }
    }

    /// One pass binding a pixel shader and a rasterizer whose cull mode follows `cull`.
    fn effect() -> Effect {
        let mut builder = ContainerBuilder::new(FormatVersion::Fx5_0);
        let uint = builder.numeric_type("uint", NumericType::scalar(ScalarKind::UInt), 0).unwrap();
        let raster = builder.object_type("RasterizerState", ObjectKind::Rasterizer, 0).unwrap();
        let ps = builder.object_type("PixelShader", ObjectKind::PixelShader, 0).unwrap();
        builder.constant_buffer(BufferSpec::new("cb", 16).variable(VariableSpec::new("cull", uint, 0)));
        builder.object_variable(
            ObjectSpec::new("raster", raster).element(ObjectInit::State(vec![AssignmentSpec::variable(21, "cull")])),
        );
        builder.object_variable(ObjectSpec::new("ps", ps).element(ObjectInit::Shader(Some(b"ps".to_vec()))));
        builder.technique(
            TechniqueSpec::new("t").pass(
                PassSpec::new("p")
                    .assign(AssignmentSpec::variable(3, "raster"))
                    .assign(AssignmentSpec::variable(5, "ps"))
                    .assign(AssignmentSpec::constant_uint(12, 7)),
            ),
        );
        Effect::load(&builder.finish().unwrap(), &LoadOptions::default()).unwrap()
    }

    #[test]
    fn objects_are_created_once_and_recreated_on_change() {
        let mut effect = effect();
        let mut backend = NopBackend::new();
        let pass = Ref::new(0);
        let first = effect.apply_pass(pass, &mut backend).unwrap();
        assert!(first.valid);
        assert_eq!(first.record.stencil_ref, 7);
        assert_eq!((backend.states_created(), backend.shaders_created()), (1, 1));
        assert_eq!(backend.upload_count(), 1);

        let again = effect.apply_pass(pass, &mut backend).unwrap();
        assert_eq!(again.handles, first.handles);
        assert_eq!((backend.states_created(), backend.upload_count()), (1, 1));

        let cull = effect.variable_by_name("cull").unwrap();
        effect.set_uint(cull, crate::state::raster::CULL_NONE).unwrap();
        let changed = effect.apply_pass(pass, &mut backend).unwrap();
        assert_eq!(backend.states_created(), 2);
        assert_eq!(backend.released(), 1);
        assert_ne!(changed.handle(BindingSlot::Rasterizer), first.handle(BindingSlot::Rasterizer));
        assert_eq!(changed.shader(ShaderStage::Pixel), first.shader(ShaderStage::Pixel));
        let Some(NopObject::State(StateRecord::Rasterizer(record))) =
            changed.handle(BindingSlot::Rasterizer).and_then(|h| backend.object(h))
        else {
            panic!("rasterizer object missing");
        };
        assert_eq!(record.cull_mode, crate::state::raster::CULL_NONE);
    }

    #[test]
    fn failed_state_marks_only_its_pass_invalid() {
        let mut effect = effect();
        let mut backend = RefusingStates::default();
        let state = effect.apply_pass(Ref::new(0), &mut backend).unwrap();
        assert!(!state.valid);
        assert_eq!(state.handle(BindingSlot::Rasterizer), None);
        assert!(state.shader(ShaderStage::Pixel).is_some());
        assert!(!effect.is_pass_valid(Ref::new(0)).unwrap());
        assert!(!effect.is_technique_valid(Ref::new(0)).unwrap());

        let mut working = NopBackend::new();
        effect.release_objects(&mut backend);
        assert!(effect.apply_pass(Ref::new(0), &mut working).unwrap().valid);
    }
}
