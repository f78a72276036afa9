//! Integer-like types, all encoded as plain integers of `size` bytes.

use crate::ty::common::CommonInfo;
use std::ops::RangeInclusive;

#[derive(Debug, Clone)]
pub struct ConstType {
    pub(crate) comm: CommonInfo,
    val: u64,
}

impl ConstType {
    comm_getters!();

    pub fn new(comm: CommonInfo, val: u64) -> Self {
        Self { comm, val }
    }

    #[inline(always)]
    pub fn const_val(&self) -> u64 {
        self.val
    }

    #[inline(always)]
    pub fn bit_size(&self) -> u64 {
        self.size() * 8
    }
}

impl_eq_by_id!(ConstType);

#[derive(Debug, Clone)]
pub struct IntType {
    pub(crate) comm: CommonInfo,
    range: Option<RangeInclusive<u64>>,
    val_align: u64,
}

impl IntType {
    comm_getters!();

    pub fn new(comm: CommonInfo, range: Option<RangeInclusive<u64>>, val_align: u64) -> Self {
        Self {
            comm,
            range,
            val_align,
        }
    }

    #[inline(always)]
    pub fn range(&self) -> Option<&RangeInclusive<u64>> {
        self.range.as_ref()
    }

    /// Step of valid values within the range, 0 means any value.
    #[inline(always)]
    pub fn val_align(&self) -> u64 {
        self.val_align
    }

    #[inline(always)]
    pub fn bit_size(&self) -> u64 {
        self.size() * 8
    }

    /// Number of distinct values this type admits, `None` for unranged ints.
    pub fn range_size(&self) -> Option<u64> {
        let range = self.range.as_ref()?;
        let (start, end) = (*range.start(), *range.end());
        let size = if self.val_align != 0 {
            if start == 0 && end == u64::MAX {
                let max = if self.bit_size() >= 64 {
                    u64::MAX
                } else {
                    (1 << self.bit_size()) - 1
                };
                max / self.val_align + 1
            } else {
                (end - start) / self.val_align + 1
            }
        } else {
            (end - start).wrapping_add(1)
        };
        Some(size)
    }
}

impl_eq_by_id!(IntType);

#[derive(Debug, Clone)]
pub struct FlagsType {
    pub(crate) comm: CommonInfo,
    vals: Box<[u64]>,
    bit_mask: bool,
}

impl FlagsType {
    comm_getters!();

    pub fn new(comm: CommonInfo, vals: Vec<u64>, bit_mask: bool) -> Self {
        Self {
            comm,
            vals: vals.into_boxed_slice(),
            bit_mask,
        }
    }

    #[inline(always)]
    pub fn vals(&self) -> &[u64] {
        &self.vals
    }

    #[inline(always)]
    pub fn bit_mask(&self) -> bool {
        self.bit_mask
    }

    #[inline(always)]
    pub fn bit_size(&self) -> u64 {
        self.size() * 8
    }
}

impl_eq_by_id!(FlagsType);

/// Length of a sibling field, named by `path`.
///
/// The special path `parent` refers to the enclosing struct. A `byte_unit` of 0
/// counts array elements for arrays and bytes otherwise.
#[derive(Debug, Clone)]
pub struct LenType {
    pub(crate) comm: CommonInfo,
    path: Box<str>,
    byte_unit: u64,
}

impl LenType {
    comm_getters!();

    pub fn new<T: Into<String>>(comm: CommonInfo, path: T, byte_unit: u64) -> Self {
        Self {
            comm,
            path: path.into().into_boxed_str(),
            byte_unit,
        }
    }

    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline(always)]
    pub fn byte_unit(&self) -> u64 {
        self.byte_unit
    }

    #[inline(always)]
    pub fn bit_size(&self) -> u64 {
        self.size() * 8
    }
}

impl_eq_by_id!(LenType);

/// Per-process value, the final value is `start + pid * per_proc + val`.
#[derive(Debug, Clone)]
pub struct ProcType {
    pub(crate) comm: CommonInfo,
    values_start: u64,
    values_per_proc: u64,
}

impl ProcType {
    comm_getters!();

    pub fn new(comm: CommonInfo, values_start: u64, values_per_proc: u64) -> Self {
        Self {
            comm,
            values_start,
            values_per_proc,
        }
    }

    #[inline(always)]
    pub fn values_start(&self) -> u64 {
        self.values_start
    }

    #[inline(always)]
    pub fn values_per_proc(&self) -> u64 {
        self.values_per_proc
    }
}

impl_eq_by_id!(ProcType);

/// Checksum computed by the worker, the program always carries 0.
#[derive(Debug, Clone)]
pub struct CsumType {
    pub(crate) comm: CommonInfo,
    buf: Box<str>,
}

impl CsumType {
    comm_getters!();

    pub fn new<T: Into<String>>(comm: CommonInfo, buf: T) -> Self {
        Self {
            comm,
            buf: buf.into().into_boxed_str(),
        }
    }

    #[inline(always)]
    pub fn buf(&self) -> &str {
        &self.buf
    }
}

impl_eq_by_id!(CsumType);
