/*!
bit packing and overflow-checked size math.

Every size or offset derived from container data goes through these helpers, so
a hostile container can produce an error but never a silently wrapped value.
*/

use crate::error::{Error, Result};

/// Size of one shader constant register, in bytes.
pub const REGISTER_SIZE: u32 = 16;

pub fn checked_add(a: u32, b: u32, context: &'static str) -> Result<u32> {
    a.checked_add(b).ok_or(Error::overflow(context))
}

pub fn checked_mul(a: u32, b: u32, context: &'static str) -> Result<u32> {
    a.checked_mul(b).ok_or(Error::overflow(context))
}

pub fn checked_usize_add(a: usize, b: usize, context: &'static str) -> Result<usize> {
    a.checked_add(b).ok_or(Error::overflow(context))
}

pub fn checked_usize_mul(a: usize, b: usize, context: &'static str) -> Result<usize> {
    a.checked_mul(b).ok_or(Error::overflow(context))
}

/// Rounds `value` up to the next multiple of `alignment` (a power of two).
pub fn align_up(value: u32, alignment: u32, context: &'static str) -> Result<u32> {
    debug_assert!(alignment.is_power_of_two());
    let bumped = checked_add(value, alignment - 1, context)?;
    Ok(bumped & !(alignment - 1))
}

pub fn align_up_usize(value: usize, alignment: usize, context: &'static str) -> Result<usize> {
    debug_assert!(alignment.is_power_of_two());
    let bumped = checked_usize_add(value, alignment - 1, context)?;
    Ok(bumped & !(alignment - 1))
}

pub fn align_to_register(value: u32, context: &'static str) -> Result<u32> {
    align_up(value, REGISTER_SIZE, context)
}

/// Whether a value of `size` bytes placed at `offset` straddles a register boundary.
pub const fn crosses_register(offset: u32, size: u32) -> bool {
    (offset % REGISTER_SIZE) as u64 + size as u64 > REGISTER_SIZE as u64
}

/// Extracts `width` bits starting at `shift`.
pub const fn bits(packed: u32, shift: u32, width: u32) -> u32 {
    (packed >> shift) & ((1 << width) - 1)
}

pub const fn put_bits(value: u32, shift: u32, width: u32) -> u32 {
    (value & ((1 << width) - 1)) << shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_rounds_to_register() {
        assert_eq!(align_to_register(0, "t").unwrap(), 0);
        assert_eq!(align_to_register(1, "t").unwrap(), 16);
        assert_eq!(align_to_register(16, "t").unwrap(), 16);
        assert_eq!(align_to_register(17, "t").unwrap(), 32);
    }

    #[test]
    fn align_reports_overflow() {
        assert_eq!(
            align_to_register(u32::MAX, "huge"),
            Err(Error::Overflow { context: "huge" })
        );
    }

    #[test]
    fn register_crossing() {
        assert!(!crosses_register(0, 16));
        assert!(!crosses_register(12, 4));
        assert!(crosses_register(12, 8));
        assert!(crosses_register(4, 16));
    }

    #[test]
    fn bit_fields_roundtrip() {
        let packed = put_bits(3, 0, 3) | put_bits(2, 3, 5) | put_bits(4, 8, 3);
        assert_eq!(bits(packed, 0, 3), 3);
        assert_eq!(bits(packed, 3, 5), 2);
        assert_eq!(bits(packed, 8, 3), 4);
    }
}
