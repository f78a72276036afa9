use crate::ty::{common::CommonInfo, Field, TypeId};
use std::ops::RangeInclusive;

#[derive(Debug, Clone)]
pub struct ArrayType {
    pub(crate) comm: CommonInfo,
    elem: TypeId,
    range: Option<RangeInclusive<u64>>,
}

impl ArrayType {
    comm_getters!();

    pub fn new(comm: CommonInfo, elem: TypeId, range: Option<RangeInclusive<u64>>) -> Self {
        Self { comm, elem, range }
    }

    #[inline(always)]
    pub fn elem(&self) -> TypeId {
        self.elem
    }

    #[inline(always)]
    pub fn range(&self) -> Option<&RangeInclusive<u64>> {
        self.range.as_ref()
    }

    #[inline]
    pub fn is_fixed_len(&self) -> bool {
        self.range
            .as_ref()
            .map(|r| r.start() == r.end())
            .unwrap_or(false)
    }
}

impl_eq_by_id!(ArrayType);

#[derive(Debug, Clone)]
pub struct StructType {
    pub(crate) comm: CommonInfo,
    fields: Box<[Field]>,
}

impl StructType {
    comm_getters!();

    pub fn new(comm: CommonInfo, fields: Vec<Field>) -> Self {
        Self {
            comm,
            fields: fields.into_boxed_slice(),
        }
    }

    #[inline(always)]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
}

impl_eq_by_id!(StructType);

#[derive(Debug, Clone)]
pub struct UnionType {
    pub(crate) comm: CommonInfo,
    fields: Box<[Field]>,
}

impl UnionType {
    comm_getters!();

    pub fn new(comm: CommonInfo, fields: Vec<Field>) -> Self {
        Self {
            comm,
            fields: fields.into_boxed_slice(),
        }
    }

    #[inline(always)]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }
}

impl_eq_by_id!(UnionType);
