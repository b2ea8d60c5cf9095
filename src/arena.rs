// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Two-phase storage for the loaded graph.

While a container is walked, objects are appended to growable [`ScratchBuf`]s and byte
payloads to [`ScratchBytes`]. Cross-references between objects are stored as
[`ScratchIndex`]/[`ScratchRange`] values, and byte payloads as [`Offset`]s, which stay valid
however often the buffers grow.

Compaction then moves every category into a single fixed allocation and turns each stored
index into a [`Ref`] or [`Span`] through a [`Relocator`], which checks the index against the
final category length. Scratch indices and final references are distinct types, so an
unrelocated index can never be mistaken for a resolved one.
*/

use std::fmt::Debug;
use std::marker::PhantomData;
use std::ops::Range;

use crate::bittricks;
use crate::error::{Error, Result};

/// A resolved reference into one category of a loaded graph.
pub struct Ref<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

/// A resolved run of consecutive objects of one category.
pub struct Span<T> {
    start: u32,
    len: u32,
    _marker: PhantomData<fn() -> T>,
}

/// An index into a category's scratch buffer. Only meaningful before compaction.
pub struct ScratchIndex<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

/// A run of consecutive scratch objects.
pub struct ScratchRange<T> {
    start: u32,
    len: u32,
    _marker: PhantomData<fn() -> T>,
}

/// A byte position inside a [`ScratchBytes`] buffer, paired with a length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Offset {
    pub start: u32,
    pub len: u32,
}

macro_rules! handle_traits {
    ($name:ident { $($field:ident),* }) => {
        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                *self
            }
        }
        impl<T> Copy for $name<T> {}
        impl<T> PartialEq for $name<T> {
            fn eq(&self, other: &Self) -> bool {
                true $(&& self.$field == other.$field)*
            }
        }
        impl<T> Eq for $name<T> {}
        impl<T> std::hash::Hash for $name<T> {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                $(self.$field.hash(state);)*
            }
        }
        impl<T> Debug for $name<T> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut s = f.debug_struct(stringify!($name));
                $(s.field(stringify!($field), &self.$field);)*
                s.finish()
            }
        }
    };
}

handle_traits!(Ref { index });
handle_traits!(Span { start, len });
handle_traits!(ScratchIndex { index });
handle_traits!(ScratchRange { start, len });

impl<T> Ref<T> {
    pub(crate) const fn new(index: u32) -> Self {
        Ref {
            index,
            _marker: PhantomData,
        }
    }

    pub const fn index(self) -> usize {
        self.index as usize
    }

    pub(crate) const fn raw(self) -> u32 {
        self.index
    }
}

impl<T> Span<T> {
    pub(crate) const fn new(start: u32, len: u32) -> Self {
        Span {
            start,
            len,
            _marker: PhantomData,
        }
    }

    pub const fn empty() -> Self {
        Span::new(0, 0)
    }

    pub const fn len(self) -> u32 {
        self.len
    }

    pub const fn is_empty(self) -> bool {
        self.len == 0
    }

    pub const fn start(self) -> u32 {
        self.start
    }

    /// The `n`th reference of the run, if it exists.
    pub fn get(self, n: u32) -> Option<Ref<T>> {
        (n < self.len).then(|| Ref::new(self.start + n))
    }

    pub fn contains(self, reference: Ref<T>) -> bool {
        reference.index >= self.start && reference.index - self.start < self.len
    }

    pub fn range(self) -> Range<usize> {
        self.start as usize..self.start as usize + self.len as usize
    }

    pub fn iter(self) -> impl Iterator<Item = Ref<T>> {
        (self.start..self.start + self.len).map(Ref::new)
    }
}

impl<T> ScratchIndex<T> {
    pub(crate) const fn new(index: u32) -> Self {
        ScratchIndex {
            index,
            _marker: PhantomData,
        }
    }

    pub const fn index(self) -> usize {
        self.index as usize
    }

    /// Re-expresses a resolved reference as a scratch index, for rebuilding a graph.
    pub(crate) const fn from_ref(reference: Ref<T>) -> Self {
        ScratchIndex::new(reference.index)
    }
}

impl<T> ScratchRange<T> {
    pub(crate) const fn new(start: u32, len: u32) -> Self {
        ScratchRange {
            start,
            len,
            _marker: PhantomData,
        }
    }

    pub const fn empty() -> Self {
        ScratchRange::new(0, 0)
    }

    pub const fn len(self) -> u32 {
        self.len
    }

    pub fn get(self, n: u32) -> Option<ScratchIndex<T>> {
        (n < self.len).then(|| ScratchIndex::new(self.start + n))
    }

    pub(crate) const fn from_span(span: Span<T>) -> Self {
        ScratchRange::new(span.start, span.len)
    }
}

/// An object that lives in a scratch buffer and becomes a `Final` after compaction.
pub trait Staged {
    type Final;
}

/// A growable per-category buffer used before compaction.
#[derive(Debug)]
pub struct ScratchBuf<S: Staged> {
    items: Vec<S>,
}

impl<S: Staged> Default for ScratchBuf<S> {
    fn default() -> Self {
        ScratchBuf { items: Vec::new() }
    }
}

impl<S: Staged> ScratchBuf<S> {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_index(&self) -> Result<u32> {
        u32::try_from(self.items.len()).map_err(|_| Error::overflow("scratch category length"))
    }

    pub fn push(&mut self, item: S) -> Result<ScratchIndex<S::Final>> {
        let index = self.next_index()?;
        self.items
            .try_reserve(1)
            .map_err(Error::out_of_memory("scratch category"))?;
        self.items.push(item);
        Ok(ScratchIndex::new(index))
    }

    /// The range of objects pushed since `start`.
    pub fn range_since(&self, start: u32) -> Result<ScratchRange<S::Final>> {
        let end = self.next_index()?;
        let len = end
            .checked_sub(start)
            .ok_or_else(|| Error::inconsistency("scratch range starts past the end"))?;
        Ok(ScratchRange::new(start, len))
    }

    pub fn mark(&self) -> Result<u32> {
        self.next_index()
    }

    pub fn get(&self, index: ScratchIndex<S::Final>) -> Option<&S> {
        self.items.get(index.index())
    }

    pub fn get_mut(&mut self, index: ScratchIndex<S::Final>) -> Option<&mut S> {
        self.items.get_mut(index.index())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &S> {
        self.items.iter()
    }
}

/// A bump allocator for byte payloads.
#[derive(Debug, Default)]
pub struct ScratchBytes {
    bytes: Vec<u8>,
}

impl ScratchBytes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `len` zero bytes starting at a multiple of `align`.
    pub fn alloc_zeroed(&mut self, len: u32, align: u32) -> Result<Offset> {
        let start = bittricks::align_up_usize(self.bytes.len(), align as usize, "scratch byte offset")?;
        let end = bittricks::checked_usize_add(start, len as usize, "scratch byte length")?;
        let start_u32 = u32::try_from(start).map_err(|_| Error::overflow("scratch byte offset"))?;
        u32::try_from(end).map_err(|_| Error::overflow("scratch byte length"))?;
        self.bytes
            .try_reserve(end - self.bytes.len())
            .map_err(Error::out_of_memory("scratch bytes"))?;
        self.bytes.resize(end, 0);
        Ok(Offset { start: start_u32, len })
    }

    pub fn alloc(&mut self, data: &[u8], align: u32) -> Result<Offset> {
        let len = u32::try_from(data.len()).map_err(|_| Error::overflow("scratch payload length"))?;
        let offset = self.alloc_zeroed(len, align)?;
        self.bytes[offset.start as usize..].copy_from_slice(data);
        Ok(offset)
    }

    pub fn get(&self, offset: Offset) -> Option<&[u8]> {
        self.bytes.get(offset.start as usize..offset.start as usize + offset.len as usize)
    }

    pub fn get_mut(&mut self, offset: Offset) -> Option<&mut [u8]> {
        self.bytes
            .get_mut(offset.start as usize..offset.start as usize + offset.len as usize)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Moves the payload bytes into one fixed allocation.
    pub fn compact(self, what: &'static str) -> Result<Box<[u8]>> {
        let mut fixed = Vec::new();
        fixed
            .try_reserve_exact(self.bytes.len())
            .map_err(Error::out_of_memory(what))?;
        fixed.extend_from_slice(&self.bytes);
        Ok(fixed.into_boxed_slice())
    }
}

/// Resolves scratch indices of one category once its final length is known.
#[derive(Debug, Clone, Copy)]
pub struct Relocator<T> {
    len: u32,
    what: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Relocator<T> {
    pub fn new(len: usize, what: &'static str) -> Result<Self> {
        let len = u32::try_from(len).map_err(|_| Error::overflow(what))?;
        Ok(Relocator {
            len,
            what,
            _marker: PhantomData,
        })
    }

    pub fn index(&self, index: ScratchIndex<T>) -> Result<Ref<T>> {
        if index.index >= self.len {
            return Err(Error::inconsistency(format!(
                "{} index {} outside [0, {})",
                self.what, index.index, self.len
            )));
        }
        Ok(Ref::new(index.index))
    }

    pub fn range(&self, range: ScratchRange<T>) -> Result<Span<T>> {
        let end = range.start.checked_add(range.len);
        match end {
            Some(end) if end <= self.len => Ok(Span::new(range.start, range.len)),
            _ => Err(Error::inconsistency(format!(
                "{} range {}+{} outside [0, {})",
                self.what, range.start, range.len, self.len
            ))),
        }
    }

    pub fn optional(&self, index: Option<ScratchIndex<T>>) -> Result<Option<Ref<T>>> {
        index.map(|index| self.index(index)).transpose()
    }
}

/// Resolves scratch byte offsets against a compacted byte allocation.
#[derive(Debug, Clone, Copy)]
pub struct ByteRelocator {
    len: usize,
    what: &'static str,
}

impl ByteRelocator {
    pub fn new(bytes: &[u8], what: &'static str) -> Self {
        ByteRelocator {
            len: bytes.len(),
            what,
        }
    }

    pub fn span(&self, offset: Offset) -> Result<Span<u8>> {
        let end = offset.start as usize + offset.len as usize;
        if end > self.len {
            return Err(Error::inconsistency(format!(
                "{} bytes {}+{} outside [0, {})",
                self.what, offset.start, offset.len, self.len
            )));
        }
        Ok(Span::new(offset.start, offset.len))
    }
}

impl Offset {
    pub(crate) const fn from_span(span: Span<u8>) -> Self {
        Offset {
            start: span.start,
            len: span.len,
        }
    }
}

/// Moves a scratch category into one fixed allocation, converting each object in order.
///
/// Order is preserved, so scratch index `i` becomes final slot `i`.
pub fn compact<S, F>(scratch: ScratchBuf<S>, what: &'static str, mut convert: F) -> Result<Box<[S::Final]>>
where
    S: Staged,
    F: FnMut(S) -> Result<S::Final>,
{
    let mut fixed = Vec::new();
    fixed
        .try_reserve_exact(scratch.items.len())
        .map_err(Error::out_of_memory(what))?;
    for item in scratch.items {
        fixed.push(convert(item)?);
    }
    Ok(fixed.into_boxed_slice())
}

/// Bytes held by a fixed allocation of `len` objects of `T`.
pub fn footprint_of<T>(len: usize, context: &'static str) -> Result<usize> {
    bittricks::checked_usize_mul(len, size_of::<T>(), context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Node {
        payload: u32,
        next: Option<ScratchIndex<Node>>,
        children: ScratchRange<Node>,
    }

    #[derive(Debug, PartialEq)]
    struct FinalNode {
        payload: u32,
        next: Option<Ref<Node>>,
        children: Span<Node>,
    }

    impl Staged for Node {
        type Final = FinalNode;
    }

    #[test]
    fn relocator_rejects_out_of_range() {
        let relocator = Relocator::<Node>::new(3, "node").unwrap();
        assert_eq!(relocator.index(ScratchIndex::new(2)).unwrap().index(), 2);
        assert!(matches!(
            relocator.index(ScratchIndex::new(3)),
            Err(Error::InternalInconsistency { .. })
        ));
        assert!(relocator.range(ScratchRange::new(1, 2)).is_ok());
        assert!(relocator.range(ScratchRange::new(2, 2)).is_err());
        assert!(relocator.range(ScratchRange::new(u32::MAX, 2)).is_err());
    }

    #[test]
    fn scratch_bytes_align_and_compact() {
        let mut bytes = ScratchBytes::new();
        let a = bytes.alloc(&[1, 2, 3], 1).unwrap();
        let b = bytes.alloc_zeroed(16, 16).unwrap();
        assert_eq!(a, Offset { start: 0, len: 3 });
        assert_eq!(b.start, 16);
        let fixed = bytes.compact("bytes").unwrap();
        assert_eq!(fixed.len(), 32);
        let relocator = ByteRelocator::new(&fixed, "bytes");
        assert_eq!(relocator.span(a).unwrap().range(), 0..3);
        assert!(relocator.span(Offset { start: 30, len: 3 }).is_err());
    }

    #[test]
    fn spans_iterate_and_contain() {
        let span = Span::<Node>::new(4, 3);
        let refs: Vec<usize> = span.iter().map(Ref::index).collect();
        assert_eq!(refs, vec![4, 5, 6]);
        assert!(span.contains(Ref::new(6)));
        assert!(!span.contains(Ref::new(7)));
        assert!(!span.contains(Ref::new(3)));
        assert_eq!(span.get(1), Some(Ref::new(5)));
        assert_eq!(span.get(3), None);
    }

    proptest! {
        #[test]
        fn prop_relocation_is_a_bijection(links in proptest::collection::vec((any::<u32>(), any::<bool>(), 0u32..4), 1..64)) {
            let len = links.len() as u32;
            let mut scratch = ScratchBuf::<Node>::new();
            let mut expected = Vec::new();
            for (i, &(payload, has_next, children)) in links.iter().enumerate() {
                let next = has_next.then(|| ScratchIndex::new((i as u32 * 7 + 3) % len));
                let start = (i as u32) % len;
                let children = ScratchRange::new(start, children.min(len - start));
                let node = Node { payload, next, children };
                expected.push(node.clone());
                let index = scratch.push(node).unwrap();
                prop_assert_eq!(index.index(), i);
            }

            let relocator = Relocator::<Node>::new(scratch.len(), "node").unwrap();
            let fixed = compact(scratch, "node", |node| {
                Ok(FinalNode {
                    payload: node.payload,
                    next: relocator.optional(node.next)?,
                    children: relocator.range(node.children)?,
                })
            })
            .unwrap();

            prop_assert_eq!(fixed.len(), expected.len());
            let mut seen = vec![false; fixed.len()];
            for (slot, (node, original)) in fixed.iter().zip(&expected).enumerate() {
                // scratch index i lands in slot i, and each slot is filled exactly once
                prop_assert_eq!(node.payload, original.payload);
                prop_assert!(!seen[slot]);
                seen[slot] = true;
                if let (Some(next), Some(scratch_next)) = (node.next, original.next) {
                    prop_assert!(next.index() < fixed.len());
                    prop_assert_eq!(next.index(), scratch_next.index());
                    prop_assert_eq!(fixed[next.index()].payload, expected[scratch_next.index()].payload);
                }
                prop_assert_eq!(node.next.is_some(), original.next.is_some());
                prop_assert!(node.children.range().end <= fixed.len());
                prop_assert_eq!(node.children.start(), original.children.start);
            }
            prop_assert!(seen.into_iter().all(|s| s));
        }
    }
}
