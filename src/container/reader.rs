//! Bounds-checked access to a container's two sections.
//!
//! The structured section is read sequentially; the unstructured blob is addressed only by
//! offset, so any structured record may reference a shared payload out of order. No
//! operation mutates the buffer, and every `offset + size` is checked for overflow before
//! it is compared against the section length.

use bytemuck::Pod;

use super::{FormatVersion, Header, RawHeader, RawHeaderExtension};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Reader<'a> {
    structured: &'a [u8],
    position: usize,
    unstructured: &'a [u8],
}

fn checked_range(len: usize, offset: usize, size: usize, what: &str) -> Result<std::ops::Range<usize>> {
    let end = offset
        .checked_add(size)
        .ok_or_else(|| Error::format(format!("{what}: offset {offset} + size {size} overflows")))?;
    if end > len {
        return Err(Error::format(format!(
            "{what}: range {offset}..{end} exceeds section length {len}"
        )));
    }
    Ok(offset..end)
}

impl<'a> Reader<'a> {
    /// Validates the header and splits `bytes` into its sections.
    pub fn open(bytes: &'a [u8]) -> Result<(Header, Reader<'a>)> {
        let mut header_reader = Reader {
            structured: bytes,
            position: 0,
            unstructured: &[],
        };
        let raw = header_reader.read_fixed::<RawHeader>()?.from_le();
        let format = FormatVersion::from_tag(raw.tag)?;
        let extension = if format.has_groups() {
            Some(header_reader.read_fixed::<RawHeaderExtension>()?.from_le())
        } else {
            None
        };
        let header = Header::from_raw(raw, extension)?;
        let blob = checked_range(
            bytes.len(),
            header_reader.position,
            header.cb_unstructured as usize,
            "unstructured section",
        )?;
        let reader = Reader {
            unstructured: &bytes[blob.clone()],
            structured: &bytes[blob.end..],
            position: 0,
        };
        Ok((header, reader))
    }

    fn take(&mut self, size: usize, what: &str) -> Result<&'a [u8]> {
        let range = checked_range(self.structured.len(), self.position, size, what)?;
        self.position = range.end;
        Ok(&self.structured[range])
    }

    /// Reads the next fixed-size record from the structured section.
    pub fn read_fixed<T: Pod>(&mut self) -> Result<T> {
        let bytes = self.take(size_of::<T>(), std::any::type_name::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4, "u32 field")?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads `N` consecutive little-endian words.
    pub fn read_words<const N: usize>(&mut self) -> Result<[u32; N]> {
        let mut words = [0; N];
        for word in &mut words {
            *word = self.read_u32()?;
        }
        Ok(words)
    }

    /// Returns `size` bytes of the unstructured blob starting at `offset`.
    pub fn read_at(&self, offset: u32, size: u32) -> Result<&'a [u8]> {
        let range = checked_range(
            self.unstructured.len(),
            offset as usize,
            size as usize,
            "unstructured read",
        )?;
        Ok(&self.unstructured[range])
    }

    pub fn read_u32_at(&self, offset: u32) -> Result<u32> {
        let bytes = self.read_at(offset, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads `count` consecutive words from the unstructured blob.
    pub fn read_words_at(&self, offset: u32, count: u32) -> Result<Vec<u32>> {
        let size = count
            .checked_mul(4)
            .ok_or(Error::overflow("unstructured word run"))?;
        let bytes = self.read_at(offset, size)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    /// Reads a NUL-terminated UTF-8 string from the unstructured blob.
    pub fn read_cstring(&self, offset: u32) -> Result<&'a str> {
        let tail = self
            .unstructured
            .get(offset as usize..)
            .filter(|tail| !tail.is_empty())
            .ok_or_else(|| Error::format(format!("string offset {offset} out of range")))?;
        let len = tail
            .iter()
            .position(|&byte| byte == 0)
            .ok_or_else(|| Error::format(format!("string at {offset} is not terminated")))?;
        std::str::from_utf8(&tail[..len])
            .map_err(|_| Error::format(format!("string at {offset} is not UTF-8")))
    }

    /// Reads a length-prefixed byte payload from the unstructured blob.
    pub fn read_payload(&self, offset: u32) -> Result<&'a [u8]> {
        let len = self.read_u32_at(offset)?;
        let start = offset
            .checked_add(4)
            .ok_or(Error::overflow("payload offset"))?;
        self.read_at(start, len)
    }

    /// Bytes of the structured section not yet consumed.
    pub fn remaining(&self) -> usize {
        self.structured.len() - self.position
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::builder::ContainerBuilder;

    fn reader_over<'a>(unstructured: &'a [u8], structured: &'a [u8]) -> Reader<'a> {
        Reader {
            structured,
            position: 0,
            unstructured,
        }
    }

    #[test]
    fn sequential_reads_advance() {
        let structured = [1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0];
        let mut reader = reader_over(&[], &structured);
        assert_eq!(reader.read_words::<2>().unwrap(), [1, 2]);
        assert_eq!(reader.remaining(), 4);
        assert_eq!(reader.read_u32().unwrap(), 3);
        assert!(matches!(reader.read_u32(), Err(Error::InvalidFormat { .. })));
    }

    #[test]
    fn read_at_rejects_overflowing_ranges() {
        let blob = [0u8; 8];
        let reader = reader_over(&blob, &[]);
        assert!(reader.read_at(4, 4).is_ok());
        assert!(matches!(reader.read_at(4, 5), Err(Error::InvalidFormat { .. })));
        assert!(matches!(
            reader.read_at(u32::MAX, u32::MAX),
            Err(Error::InvalidFormat { .. })
        ));
    }

    #[test]
    fn cstrings() {
        let blob = b"abc\0de\0fg";
        let reader = reader_over(blob, &[]);
        assert_eq!(reader.read_cstring(0).unwrap(), "abc");
        assert_eq!(reader.read_cstring(4).unwrap(), "de");
        assert_eq!(reader.read_cstring(5).unwrap(), "e");
        assert!(matches!(reader.read_cstring(7), Err(Error::InvalidFormat { .. })));
        assert!(matches!(reader.read_cstring(100), Err(Error::InvalidFormat { .. })));
    }

    #[test]
    fn payloads_are_length_prefixed() {
        let blob = [3, 0, 0, 0, 9, 8, 7, 6];
        let reader = reader_over(&blob, &[]);
        assert_eq!(reader.read_payload(0).unwrap(), &[9, 8, 7]);
        assert!(reader.read_payload(4).is_err());
    }

    #[test]
    fn open_splits_sections() {
        let bytes = ContainerBuilder::new(FormatVersion::Fx5_0).finish().unwrap();
        let (header, reader) = Reader::open(&bytes).unwrap();
        assert_eq!(header.format, FormatVersion::Fx5_0);
        assert_eq!(reader.unstructured.len(), header.cb_unstructured as usize);
    }

    #[test]
    fn open_rejects_truncated_header() {
        let bytes = ContainerBuilder::new(FormatVersion::Fx4_0).finish().unwrap();
        assert!(matches!(
            Reader::open(&bytes[..20]),
            Err(Error::InvalidFormat { .. })
        ));
    }
}
