//! Type catalog of the target.
//!
//! Every syscall argument is described by one of 15 kinds of types, wrapped by `Type`.
//! Types are immutable once the target is built and refer to each other by `TypeId`.

#[macro_use]
pub mod common;
pub mod buffer;
pub mod group;
pub mod int;
pub mod ptr;
pub mod res;

use std::fmt::Display;

pub use buffer::*;
pub use common::*;
pub use group::*;
pub use int::*;
pub use ptr::*;
pub use res::*;

/// Declares the closed set of type kinds once and derives the wrapper, conversions
/// and accessors of `Type` from it. Variant order is the `TypeKind` index.
macro_rules! type_kinds {
    ($($kind: ident($inner: ident): $as: ident, $checked_as: ident;)*) => {
        #[derive(Debug, Clone)]
        enum TypeKindInner {
            $($kind($inner),)*
        }

        /// Type kind, also the index of per-kind function tables.
        #[repr(C)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum TypeKind {
            $($kind,)*
        }

        $(
            impl From<$inner> for Type {
                fn from(ty: $inner) -> Self {
                    Self {
                        inner: TypeKindInner::$kind(ty),
                    }
                }
            }
        )*

        impl Type {
            $(
                pub fn $as(&self) -> Option<&$inner> {
                    match &self.inner {
                        TypeKindInner::$kind(ty) => Some(ty),
                        _ => None,
                    }
                }

                pub fn $checked_as(&self) -> &$inner {
                    match self.$as() {
                        Some(ty) => ty,
                        None => panic!("{} is not {}", self.name(), stringify!($kind)),
                    }
                }
            )*

            #[inline]
            pub fn kind(&self) -> TypeKind {
                match &self.inner {
                    $(TypeKindInner::$kind(_) => TypeKind::$kind,)*
                }
            }

            pub fn comm(&self) -> &CommonInfo {
                match &self.inner {
                    $(TypeKindInner::$kind(ty) => &ty.comm,)*
                }
            }

            pub(crate) fn set_id(&mut self, id: TypeId) {
                match &mut self.inner {
                    $(TypeKindInner::$kind(ty) => ty.comm.set_id(id),)*
                }
            }
        }
    };
}

type_kinds! {
    Res(ResType): as_res, checked_as_res;
    Const(ConstType): as_const, checked_as_const;
    Int(IntType): as_int, checked_as_int;
    Flags(FlagsType): as_flags, checked_as_flags;
    Len(LenType): as_len, checked_as_len;
    Proc(ProcType): as_proc, checked_as_proc;
    Csum(CsumType): as_csum, checked_as_csum;
    Vma(VmaType): as_vma, checked_as_vma;
    BufferBlob(BufferBlobType): as_buffer_blob, checked_as_buffer_blob;
    BufferString(BufferStringType): as_buffer_string, checked_as_buffer_string;
    BufferFilename(BufferFilenameType): as_buffer_filename, checked_as_buffer_filename;
    Array(ArrayType): as_array, checked_as_array;
    Ptr(PtrType): as_ptr, checked_as_ptr;
    Struct(StructType): as_struct, checked_as_struct;
    Union(UnionType): as_union, checked_as_union;
}

#[derive(Debug, Clone)]
pub struct Type {
    inner: TypeKindInner,
}

impl Type {
    #[inline(always)]
    pub fn id(&self) -> TypeId {
        self.comm().id()
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        self.comm().name()
    }

    #[inline(always)]
    pub fn size(&self) -> u64 {
        self.comm().size()
    }

    #[inline(always)]
    pub fn align(&self) -> u64 {
        self.comm().align()
    }

    #[inline(always)]
    pub fn optional(&self) -> bool {
        self.comm().optional()
    }

    #[inline(always)]
    pub fn varlen(&self) -> bool {
        self.comm().varlen()
    }

    /// Whether values of this type are plain integers in the exec format.
    pub fn is_scalar(&self) -> bool {
        use TypeKind::*;
        matches!(self.kind(), Const | Int | Flags | Len | Proc | Csum)
    }

    /// Whether values of this type are byte buffers.
    pub fn is_buffer(&self) -> bool {
        use TypeKind::*;
        matches!(self.kind(), BufferBlob | BufferString | BufferFilename)
    }

    /// Whether a pointee of this type can be squashed into a blob.
    pub fn is_complex(&self) -> bool {
        use TypeKind::*;
        matches!(self.kind(), Array | Struct | Union)
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:?})", self.name(), self.kind())
    }
}

impl_eq_by_id!(Type);

pub type TypeId = usize;

#[derive(Eq, PartialEq, Ord, PartialOrd, Debug, Clone, Copy, Hash)]
pub enum Dir {
    In = 0,
    Out,
    InOut,
}

impl From<u64> for Dir {
    fn from(val: u64) -> Self {
        match val {
            0 => Dir::In,
            1 => Dir::Out,
            2 => Dir::InOut,
            _ => panic!("bad dir value: {}", val),
        }
    }
}

impl std::fmt::Display for Dir {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let p = match self {
            Self::In => "In",
            Self::Out => "Out",
            Self::InOut => "InOut",
        };
        write!(f, "{}", p)
    }
}

/// Named field of a struct, union or syscall parameter list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    name: Box<str>,
    ty: TypeId,
    dir: Option<Dir>,
}

impl Field {
    pub fn new<T: Into<String>>(name: T, ty: TypeId) -> Self {
        Self {
            name: name.into().into_boxed_str(),
            ty,
            dir: None,
        }
    }

    pub fn with_dir<T: Into<String>>(name: T, ty: TypeId, dir: Dir) -> Self {
        Self {
            name: name.into().into_boxed_str(),
            ty,
            dir: Some(dir),
        }
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    pub fn ty(&self) -> TypeId {
        self.ty
    }

    /// Direction of the field, inherited from the parent if not specified.
    #[inline(always)]
    pub fn dir(&self) -> Option<Dir> {
        self.dir
    }

    #[inline(always)]
    pub fn dir_or(&self, parent: Dir) -> Dir {
        self.dir.unwrap_or(parent)
    }
}
