//! Per-component scalar conversion between the numeric kinds a buffer or record can hold.

use crate::types::ScalarKind;

/// One component read out of a buffer or record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    Float(f32),
    Int(i32),
    UInt(u32),
    Bool(bool),
    Double(f64),
}

impl ScalarValue {
    /// Decodes a component of `kind` from the start of `bytes`.
    ///
    /// Returns `None` when `bytes` is too short.
    pub fn read(kind: ScalarKind, bytes: &[u8]) -> Option<Self> {
        let word = || -> Option<u32> { Some(u32::from_le_bytes(bytes.get(..4)?.try_into().ok()?)) };
        Some(match kind {
            ScalarKind::Float => ScalarValue::Float(f32::from_bits(word()?)),
            ScalarKind::Int => ScalarValue::Int(word()? as i32),
            ScalarKind::UInt => ScalarValue::UInt(word()?),
            ScalarKind::Bool => ScalarValue::Bool(word()? != 0),
            ScalarKind::Double => ScalarValue::Double(f64::from_le_bytes(bytes.get(..8)?.try_into().ok()?)),
        })
    }

    /// Encodes the value as `kind` at the start of `out`, returning the bytes written.
    pub fn write(self, kind: ScalarKind, out: &mut [u8]) -> Option<usize> {
        match kind {
            ScalarKind::Double => {
                out.get_mut(..8)?.copy_from_slice(&self.as_f64().to_le_bytes());
                Some(8)
            }
            _ => {
                let word = match kind {
                    ScalarKind::Float => self.as_f32().to_bits(),
                    ScalarKind::Int => self.as_i32() as u32,
                    ScalarKind::UInt => self.as_u32(),
                    _ => self.as_bool() as u32,
                };
                out.get_mut(..4)?.copy_from_slice(&word.to_le_bytes());
                Some(4)
            }
        }
    }

    /// Builds a value from a constant stored as a kind tag plus a raw 32-bit pattern.
    pub fn from_bits(kind: ScalarKind, bits: u32) -> Self {
        match kind {
            ScalarKind::Float => ScalarValue::Float(f32::from_bits(bits)),
            ScalarKind::Int => ScalarValue::Int(bits as i32),
            ScalarKind::UInt => ScalarValue::UInt(bits),
            ScalarKind::Bool => ScalarValue::Bool(bits != 0),
            // constants carry 32 bits, doubles arrive as their float value
            ScalarKind::Double => ScalarValue::Double(f32::from_bits(bits) as f64),
        }
    }

    pub fn as_f32(self) -> f32 {
        match self {
            ScalarValue::Float(v) => v,
            ScalarValue::Int(v) => v as f32,
            ScalarValue::UInt(v) => v as f32,
            ScalarValue::Bool(v) => v as u32 as f32,
            ScalarValue::Double(v) => v as f32,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            ScalarValue::Double(v) => v,
            other => other.as_f32() as f64,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            ScalarValue::Float(v) => v as i32,
            ScalarValue::Int(v) => v,
            ScalarValue::UInt(v) => v as i32,
            ScalarValue::Bool(v) => v as i32,
            ScalarValue::Double(v) => v as i32,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            ScalarValue::Float(v) => v as u32,
            ScalarValue::Int(v) => v as u32,
            ScalarValue::UInt(v) => v,
            ScalarValue::Bool(v) => v as u32,
            ScalarValue::Double(v) => v as u32,
        }
    }

    pub fn as_bool(self) -> bool {
        match self {
            ScalarValue::Float(v) => v != 0.0,
            ScalarValue::Int(v) => v != 0,
            ScalarValue::UInt(v) => v != 0,
            ScalarValue::Bool(v) => v,
            ScalarValue::Double(v) => v != 0.0,
        }
    }
}
