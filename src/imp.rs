// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The rendering backend seam.

The core never touches a device. It produces configuration records and dirty signals, and a
[`Backend`] turns them into device objects. Failure to create an object is reported per object:
the owning block is marked invalid and everything else keeps working.
*/

use crate::arena::Ref;
use crate::graph::ConstantBuffer;
use crate::state::StateRecord;
use crate::types::ShaderStage;

mod nop;
pub use nop::{NopBackend, NopObject};

#[cfg(feature = "backend_wgpu")]
mod wgpu;
#[cfg(feature = "backend_wgpu")]
pub use self::wgpu::{WgpuBackend, WgpuObject};

/// An opaque object issued by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum BackendError {
    #[error("state record is not supported by this backend: {0}")]
    UnsupportedState(String),
    #[error("shader could not be created: {0}")]
    InvalidShader(String),
    #[error("device error: {0}")]
    Device(String),
}

/// The bytes of one dirty constant buffer.
#[derive(Debug, Clone, Copy)]
pub struct ConstantBufferUpload<'a> {
    pub buffer: Ref<ConstantBuffer>,
    pub bind_point: Option<u32>,
    pub bytes: &'a [u8],
}

pub trait Backend {
    fn create_state_object(&mut self, record: &StateRecord) -> Result<ObjectHandle, BackendError>;

    fn create_shader(&mut self, stage: ShaderStage, bytecode: &[u8]) -> Result<ObjectHandle, BackendError>;

    /// Releases an object that will no longer be used.
    fn release(&mut self, handle: ObjectHandle);

    fn upload_constant_buffer(&mut self, upload: ConstantBufferUpload<'_>) -> Result<(), BackendError>;
}

impl<B: Backend + ?Sized> Backend for &mut B {
    fn create_state_object(&mut self, record: &StateRecord) -> Result<ObjectHandle, BackendError> {
        (**self).create_state_object(record)
    }

    fn create_shader(&mut self, stage: ShaderStage, bytecode: &[u8]) -> Result<ObjectHandle, BackendError> {
        (**self).create_shader(stage, bytecode)
    }

    fn release(&mut self, handle: ObjectHandle) {
        (**self).release(handle)
    }

    fn upload_constant_buffer(&mut self, upload: ConstantBufferUpload<'_>) -> Result<(), BackendError> {
        (**self).upload_constant_buffer(upload)
    }
}
