use crate::ty::{common::CommonInfo, Dir, TypeId};
use std::ops::RangeInclusive;

#[derive(Debug, Clone)]
pub struct PtrType {
    pub(crate) comm: CommonInfo,
    elem: TypeId,
    dir: Dir,
}

impl PtrType {
    pub const MAX_SPECIAL_POINTERS: u64 = 16;

    comm_getters!();

    pub fn new(comm: CommonInfo, elem: TypeId, dir: Dir) -> Self {
        Self { comm, elem, dir }
    }

    #[inline(always)]
    pub fn elem(&self) -> TypeId {
        self.elem
    }

    /// Direction of the pointee.
    #[inline(always)]
    pub fn dir(&self) -> Dir {
        self.dir
    }
}

impl_eq_by_id!(PtrType);

/// Pointer to a range of whole pages.
#[derive(Debug, Clone)]
pub struct VmaType {
    pub(crate) comm: CommonInfo,
    range: Option<RangeInclusive<u64>>,
}

impl VmaType {
    comm_getters!();

    pub fn new(comm: CommonInfo, range: Option<RangeInclusive<u64>>) -> Self {
        Self { comm, range }
    }

    /// Number of pages.
    #[inline(always)]
    pub fn range(&self) -> Option<&RangeInclusive<u64>> {
        self.range.as_ref()
    }
}

impl_eq_by_id!(VmaType);
