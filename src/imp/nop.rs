// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! A backend that creates no device objects and never fails.

use rustc_hash::FxHashMap;

use super::{Backend, BackendError, ConstantBufferUpload, ObjectHandle};
use crate::arena::Ref;
use crate::graph::ConstantBuffer;
use crate::state::StateRecord;
use crate::types::ShaderStage;

/// What a [`NopBackend`] handle stands for.
#[derive(Debug, Clone, PartialEq)]
pub enum NopObject {
    State(StateRecord),
    Shader { stage: ShaderStage, bytecode: Vec<u8> },
}

/// Issues sequential handles and remembers what each one was created from.
#[derive(Debug, Default)]
pub struct NopBackend {
    next_handle: u64,
    live: FxHashMap<ObjectHandle, NopObject>,
    uploads: FxHashMap<Ref<ConstantBuffer>, Vec<u8>>,
    states_created: usize,
    shaders_created: usize,
    released: usize,
    upload_count: usize,
}

impl NopBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue(&mut self, object: NopObject) -> ObjectHandle {
        self.next_handle += 1;
        let handle = ObjectHandle(self.next_handle);
        self.live.insert(handle, object);
        handle
    }

    /// The object behind a live handle.
    pub fn object(&self, handle: ObjectHandle) -> Option<&NopObject> {
        self.live.get(&handle)
    }

    /// Bytes most recently uploaded for `buffer`.
    pub fn uploaded(&self, buffer: Ref<ConstantBuffer>) -> Option<&[u8]> {
        self.uploads.get(&buffer).map(Vec::as_slice)
    }

    pub fn states_created(&self) -> usize {
        self.states_created
    }

    pub fn shaders_created(&self) -> usize {
        self.shaders_created
    }

    pub fn released(&self) -> usize {
        self.released
    }

    pub fn upload_count(&self) -> usize {
        self.upload_count
    }

    pub fn live_objects(&self) -> usize {
        self.live.len()
    }
}

impl Backend for NopBackend {
    fn create_state_object(&mut self, record: &StateRecord) -> Result<ObjectHandle, BackendError> {
        self.states_created += 1;
        Ok(self.issue(NopObject::State(*record)))
    }

    fn create_shader(&mut self, stage: ShaderStage, bytecode: &[u8]) -> Result<ObjectHandle, BackendError> {
        self.shaders_created += 1;
        Ok(self.issue(NopObject::Shader {
            stage,
            bytecode: bytecode.to_vec(),
        }))
    }

    fn release(&mut self, handle: ObjectHandle) {
        if self.live.remove(&handle).is_some() {
            self.released += 1;
        }
    }

    fn upload_constant_buffer(&mut self, upload: ConstantBufferUpload<'_>) -> Result<(), BackendError> {
        self.upload_count += 1;
        self.uploads.insert(upload.buffer, upload.bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockKind;

    #[test]
    fn handles_are_sequential_and_released() {
        let mut backend = NopBackend::new();
        let record = StateRecord::default_for(BlockKind::Sampler).unwrap();
        let a = backend.create_state_object(&record).unwrap();
        let b = backend.create_shader(ShaderStage::Pixel, b"ps").unwrap();
        assert_eq!((a, b), (ObjectHandle(1), ObjectHandle(2)));
        assert_eq!(backend.object(a), Some(&NopObject::State(record)));
        backend.release(a);
        backend.release(a);
        assert_eq!(backend.released(), 1);
        assert_eq!(backend.live_objects(), 1);
        assert_eq!(backend.shaders_created(), 1);
    }
}
