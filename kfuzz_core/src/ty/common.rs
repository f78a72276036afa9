//! Attributes every catalog type carries, plus the macros that expose them.

use super::TypeId;

/// Accessors forwarding to the `comm` field of a concrete type.
macro_rules! comm_getters {
    () => {
        comm_getters!(@copy id: crate::ty::TypeId, size: u64, align: u64, optional: bool, varlen: bool);

        #[inline(always)]
        pub fn name(&self) -> &str {
            self.comm.name()
        }

        #[inline(always)]
        pub fn comm(&self) -> &crate::ty::common::CommonInfo {
            &self.comm
        }
    };
    (@copy $($attr: ident: $attr_ty: ty),*) => {
        $(
            #[inline(always)]
            pub fn $attr(&self) -> $attr_ty {
                self.comm.$attr()
            }
        )*
    };
}

/// Types are identified by their id alone.
macro_rules! impl_eq_by_id {
    ($($impl_ty: ty),*) => {
        $(
            impl PartialEq for $impl_ty {
                fn eq(&self, other: &Self) -> bool {
                    self.id() == other.id()
                }
            }

            impl Eq for $impl_ty {}

            impl PartialOrd for $impl_ty {
                fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                    Some(self.cmp(other))
                }
            }

            impl Ord for $impl_ty {
                fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                    self.id().cmp(&other.id())
                }
            }

            impl std::hash::Hash for $impl_ty {
                fn hash<H: std::hash::Hasher>(&self, hasher: &mut H) {
                    self.id().hash(hasher)
                }
            }
        )*
    };
}

#[derive(Debug, Clone)]
pub struct CommonInfo {
    id: TypeId, // index into `Target::tys`
    name: Box<str>,
    /// Static size in bytes, 0 for varlen types.
    size: u64,
    align: u64,
    optional: bool,
    varlen: bool,
}

impl CommonInfo {
    #[inline(always)]
    pub fn id(&self) -> TypeId {
        self.id
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline(always)]
    pub fn align(&self) -> u64 {
        self.align
    }

    #[inline(always)]
    pub fn optional(&self) -> bool {
        self.optional
    }

    #[inline(always)]
    pub fn varlen(&self) -> bool {
        self.varlen
    }

    pub(crate) fn set_id(&mut self, id: TypeId) {
        self.id = id;
    }
}

impl_eq_by_id!(CommonInfo);

/// Builder of `CommonInfo`. A type built without a size is varlen, the id is assigned
/// when the type joins a target.
#[derive(Debug, Clone, Default)]
pub struct CommonInfoBuilder {
    name: String,
    size: Option<u64>,
    align: Option<u64>,
    optional: bool,
}

impl CommonInfoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name<T: Into<String>>(&mut self, name: T) -> &mut Self {
        self.name = name.into();
        self
    }

    pub fn size(&mut self, size: u64) -> &mut Self {
        self.size = Some(size);
        self
    }

    pub fn align(&mut self, align: u64) -> &mut Self {
        self.align = Some(align);
        self
    }

    pub fn optional(&mut self, optional: bool) -> &mut Self {
        self.optional = optional;
        self
    }

    pub fn build(&self) -> CommonInfo {
        CommonInfo {
            id: TypeId::MAX,
            name: self.name.as_str().into(),
            size: self.size.unwrap_or(0),
            align: self.align.unwrap_or(1),
            optional: self.optional,
            varlen: self.size.is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varlen_without_size() {
        let comm = CommonInfoBuilder::new().name("buf").build();
        assert!(comm.varlen());
        assert_eq!(comm.size(), 0);
        assert_eq!(comm.align(), 1);

        let comm = CommonInfoBuilder::new().name("int32").size(4).align(4).build();
        assert!(!comm.varlen());
        assert_eq!(comm.size(), 4);
    }
}
