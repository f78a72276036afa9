use crate::ty::common::CommonInfo;

/// Name of a resource kind, such as `fd` or `sock`.
pub type ResKind = Box<str>;

/// Kernel object handle passed between calls.
///
/// `kinds` is the chain of kinds from the most general to the most specific one,
/// the last element is the kind of this resource.
#[derive(Debug, Clone)]
pub struct ResType {
    pub(crate) comm: CommonInfo,
    kinds: Box<[ResKind]>,
    special_vals: Box<[u64]>,
}

impl ResType {
    comm_getters!();

    pub fn new(comm: CommonInfo, kinds: Vec<&str>, special_vals: Vec<u64>) -> Self {
        assert!(!kinds.is_empty(), "resource without kind: {}", comm.name());
        Self {
            comm,
            kinds: kinds.into_iter().map(|k| k.into()).collect(),
            special_vals: special_vals.into_boxed_slice(),
        }
    }

    #[inline(always)]
    pub fn kinds(&self) -> &[ResKind] {
        &self.kinds
    }

    /// The most specific kind.
    #[inline(always)]
    pub fn res_name(&self) -> &ResKind {
        &self.kinds[self.kinds.len() - 1]
    }

    #[inline(always)]
    pub fn special_vals(&self) -> &[u64] {
        &self.special_vals
    }

    /// Whether a resource of kind chain `src` can be used where `self` is expected.
    #[inline]
    pub fn compatible(&self, src: &[ResKind]) -> bool {
        src.starts_with(&self.kinds)
    }

    pub fn default_val(&self) -> u64 {
        self.special_vals.first().copied().unwrap_or(0)
    }
}

impl_eq_by_id!(ResType);
