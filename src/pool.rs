// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Interning pools for type descriptors and strings.

Both pools hand out small copyable references. Interning the same content twice yields the
same reference; different content never shares one. Types are interned bottom-up, so a struct's
members are already canonical [`TypeRef`]s and structural equality is a shallow comparison.
*/

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::bittricks::{checked_usize_add, checked_usize_mul};
use crate::error::{Error, Result};
use crate::types::TypeDescriptor;

/// Canonical reference to an interned string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrRef(u32);

/// Canonical reference to an interned [`TypeDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef(u32);

impl StrRef {
    pub const fn from_index(index: u32) -> Self {
        StrRef(index)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl TypeRef {
    pub const fn from_index(index: u32) -> Self {
        TypeRef(index)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

fn next_index(len: usize, what: &'static str) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::overflow(what))
}

#[derive(Debug, Clone, Default)]
pub struct StringPool {
    lookup: FxHashMap<Arc<str>, StrRef>,
    strings: Vec<Arc<str>>,
    content_bytes: usize,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, value: &str) -> Result<StrRef> {
        if let Some(existing) = self.lookup.get(value) {
            return Ok(*existing);
        }
        let reference = StrRef(next_index(self.strings.len(), "string pool size")?);
        let shared: Arc<str> = Arc::from(value);
        self.strings
            .try_reserve(1)
            .map_err(Error::out_of_memory("string pool"))?;
        let content_bytes = checked_usize_add(self.content_bytes, value.len(), "string pool bytes")?;
        self.strings.push(shared.clone());
        self.lookup.insert(shared, reference);
        self.content_bytes = content_bytes;
        Ok(reference)
    }

    pub fn get(&self, reference: StrRef) -> Option<&str> {
        self.strings.get(reference.index()).map(|s| &**s)
    }

    pub fn find(&self, value: &str) -> Option<StrRef> {
        self.lookup.get(value).copied()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(|s| &**s)
    }

    /// Approximate heap footprint of the pool.
    pub fn byte_size(&self) -> Result<usize> {
        let entry = size_of::<Arc<str>>() * 2 + size_of::<StrRef>();
        pool_bytes(self.content_bytes, self.strings.len(), entry, "string pool bytes")
    }
}

#[derive(Debug, Clone, Default)]
pub struct TypePool {
    lookup: FxHashMap<TypeDescriptor, TypeRef>,
    types: Vec<TypeDescriptor>,
}

impl TypePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the canonical reference for `candidate`, storing it if it is new.
    pub fn intern(&mut self, candidate: TypeDescriptor) -> Result<TypeRef> {
        if let Some(existing) = self.lookup.get(&candidate) {
            return Ok(*existing);
        }
        let reference = TypeRef(next_index(self.types.len(), "type pool size")?);
        self.types
            .try_reserve(1)
            .map_err(Error::out_of_memory("type pool"))?;
        self.types.push(candidate.clone());
        self.lookup.insert(candidate, reference);
        Ok(reference)
    }

    pub fn get(&self, reference: TypeRef) -> Option<&TypeDescriptor> {
        self.types.get(reference.index())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Types in interning order. Every struct appears after its members.
    pub fn iter(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.iter()
    }

    pub fn byte_size(&self) -> Result<usize> {
        let members = self.types.iter().try_fold(0usize, |sum, ty| {
            let members = match &ty.kind {
                crate::types::TypeKind::Struct { members, .. } => size_of_val(&**members),
                _ => 0,
            };
            checked_usize_add(sum, members, "type pool bytes")
        })?;
        // stored once in the list and once as a lookup key
        let doubled = checked_usize_mul(members, 2, "type pool bytes")?;
        let entry = 2 * size_of::<TypeDescriptor>() + size_of::<TypeRef>();
        pool_bytes(doubled, self.types.len(), entry, "type pool bytes")
    }
}

/// `content + entries * per_entry`, checked.
fn pool_bytes(content: usize, entries: usize, per_entry: usize, context: &'static str) -> Result<usize> {
    checked_usize_add(content, checked_usize_mul(entries, per_entry, context)?, context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Member, NumericType, ScalarKind, Sizes, TypeKind};
    use proptest::prelude::*;

    fn float_type(pool: &mut StringPool, name: &str, elements: u32) -> TypeDescriptor {
        let name = pool.intern(name).unwrap();
        TypeDescriptor::numeric(name, NumericType::scalar(ScalarKind::Float), elements).unwrap()
    }

    #[test]
    fn strings_intern_by_content() {
        let mut pool = StringPool::new();
        let a = pool.intern("World").unwrap();
        let b = pool.intern("View").unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.intern("World").unwrap(), a);
        assert_eq!(pool.get(b), Some("View"));
        assert_eq!(pool.find("View"), Some(b));
        assert_eq!(pool.find("Projection"), None);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn structs_compare_by_canonical_members() {
        let mut strings = StringPool::new();
        let mut types = TypePool::new();
        let float = types.intern(float_type(&mut strings, "float", 0)).unwrap();
        let again = types.intern(float_type(&mut strings, "float", 0)).unwrap();
        assert_eq!(float, again);
        let array = types.intern(float_type(&mut strings, "float", 4)).unwrap();
        assert_ne!(float, array);

        let make_struct = |strings: &mut StringPool, types: &TypePool, member_ty: TypeRef| {
            let member = Member {
                name: strings.intern("x").unwrap(),
                semantic: None,
                offset: 0,
                ty: member_ty,
            };
            let resolved = types.get(member_ty).unwrap();
            let sizes = Sizes::structure(&[(member, resolved)], 0).unwrap();
            TypeDescriptor::with_sizes(
                TypeKind::Struct {
                    members: Box::new([member]),
                    base: None,
                    implements_interface: false,
                },
                strings.intern("S").unwrap(),
                0,
                sizes,
            )
        };
        let first = make_struct(&mut strings, &types, float);
        let second = make_struct(&mut strings, &types, float);
        let third = make_struct(&mut strings, &types, array);
        let first = types.intern(first).unwrap();
        assert_eq!(types.intern(second).unwrap(), first);
        assert_ne!(types.intern(third).unwrap(), first);
    }

    #[test]
    fn byte_accounting_is_checked() {
        let mut strings = StringPool::new();
        let mut types = TypePool::new();
        let empty = strings.byte_size().unwrap();
        strings.intern("World").unwrap();
        strings.intern("World").unwrap();
        assert!(strings.byte_size().unwrap() >= empty + "World".len());
        assert_eq!(types.byte_size().unwrap(), 0);
        types.intern(float_type(&mut strings, "float", 0)).unwrap();
        assert!(types.byte_size().unwrap() > 0);

        assert_eq!(pool_bytes(3, 2, 8, "test").unwrap(), 19);
        assert!(matches!(pool_bytes(usize::MAX, 1, 1, "test"), Err(Error::Overflow { .. })));
        assert!(matches!(pool_bytes(0, usize::MAX, 2, "test"), Err(Error::Overflow { .. })));
    }

    proptest! {
        #[test]
        fn prop_string_interning_is_idempotent(values in proptest::collection::vec("[a-c]{0,3}", 0..40)) {
            let mut pool = StringPool::new();
            let refs: Vec<StrRef> = values.iter().map(|v| pool.intern(v).unwrap()).collect();
            for (i, a) in values.iter().enumerate() {
                for (j, b) in values.iter().enumerate() {
                    prop_assert_eq!(a == b, refs[i] == refs[j]);
                }
                prop_assert_eq!(pool.get(refs[i]), Some(a.as_str()));
            }
        }

        #[test]
        fn prop_type_interning_is_idempotent(shapes in proptest::collection::vec((1u32..=4, 0u32..4, 0u32..3), 0..30)) {
            let mut strings = StringPool::new();
            let mut types = TypePool::new();
            let name = strings.intern("t").unwrap();
            let descriptors: Vec<TypeDescriptor> = shapes
                .iter()
                .map(|&(columns, elements, scalar)| {
                    let scalar = [ScalarKind::Float, ScalarKind::Int, ScalarKind::Bool][scalar as usize];
                    TypeDescriptor::numeric(name, NumericType::vector(scalar, columns), elements).unwrap()
                })
                .collect();
            let refs: Vec<TypeRef> = descriptors.iter().map(|d| types.intern(d.clone()).unwrap()).collect();
            for i in 0..descriptors.len() {
                for j in 0..descriptors.len() {
                    prop_assert_eq!(descriptors[i] == descriptors[j], refs[i] == refs[j]);
                }
            }
        }
    }
}
