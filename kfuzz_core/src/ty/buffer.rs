use crate::ty::common::CommonInfo;
use std::ops::RangeInclusive;

#[derive(Debug, Clone)]
pub struct BufferBlobType {
    pub(crate) comm: CommonInfo,
    range: Option<RangeInclusive<u64>>,
}

impl BufferBlobType {
    comm_getters!();

    pub fn new(comm: CommonInfo, range: Option<RangeInclusive<u64>>) -> Self {
        Self { comm, range }
    }

    #[inline(always)]
    pub fn range(&self) -> Option<&RangeInclusive<u64>> {
        self.range.as_ref()
    }
}

impl_eq_by_id!(BufferBlobType);

#[derive(Debug, Clone)]
pub struct BufferStringType {
    pub(crate) comm: CommonInfo,
    vals: Box<[Box<[u8]>]>,
    noz: bool,
}

impl BufferStringType {
    comm_getters!();

    pub fn new(comm: CommonInfo, vals: Vec<Vec<u8>>, noz: bool) -> Self {
        Self {
            comm,
            vals: vals.into_iter().map(Vec::into_boxed_slice).collect(),
            noz,
        }
    }

    #[inline(always)]
    pub fn vals(&self) -> &[Box<[u8]>] {
        &self.vals
    }

    /// Strings are zero-terminated unless `noz` is set.
    #[inline(always)]
    pub fn noz(&self) -> bool {
        self.noz
    }
}

impl_eq_by_id!(BufferStringType);

#[derive(Debug, Clone)]
pub struct BufferFilenameType {
    pub(crate) comm: CommonInfo,
    vals: Box<[Box<[u8]>]>,
    noz: bool,
}

impl BufferFilenameType {
    comm_getters!();

    pub fn new(comm: CommonInfo, vals: Vec<Vec<u8>>, noz: bool) -> Self {
        Self {
            comm,
            vals: vals.into_iter().map(Vec::into_boxed_slice).collect(),
            noz,
        }
    }

    #[inline(always)]
    pub fn vals(&self) -> &[Box<[u8]>] {
        &self.vals
    }

    #[inline(always)]
    pub fn noz(&self) -> bool {
        self.noz
    }
}

impl_eq_by_id!(BufferFilenameType);
