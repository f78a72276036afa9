//! Argument values of a call.
//!
//! Every value records the type it was generated for and its direction. Result values
//! are linked through `ResId` handles: a consumer keeps the id of its producer in `src`,
//! the producer side of the edge is tracked by `Prog`.

use crate::{
    target::Target,
    ty::{Dir, PtrType, Type, TypeId, TypeKind},
    HashMap,
};
use std::{ascii::escape_default, fmt::Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueCommon {
    pub ty_id: TypeId,
    pub dir: Dir,
}

impl ValueCommon {
    pub fn new(ty_id: TypeId, dir: Dir) -> Self {
        Self { ty_id, dir }
    }

    pub fn ty<'a>(&self, target: &'a Target) -> &'a Type {
        target.ty_of(self.ty_id)
    }

    pub fn ty_id(&self) -> TypeId {
        self.ty_id
    }
}

/// `ty`, `ty_id` and `dir` of a concrete value, read from its `comm`.
macro_rules! value_comm_getters {
    () => {
        #[inline(always)]
        pub fn ty<'a>(&self, target: &'a Target) -> &'a Type {
            self.comm.ty(target)
        }

        #[inline(always)]
        pub fn ty_id(&self) -> TypeId {
            self.comm.ty_id()
        }

        #[inline(always)]
        pub fn dir(&self) -> Dir {
            self.comm.dir
        }
    };
}

/// Declares the value variants once: the inner enum, `ValueKind`, conversions into
/// `Value`, the shared/mutable/checked accessors and `Value::size`.
macro_rules! value_kinds {
    ($($kind: ident($inner: ident): $as: ident, $as_mut: ident, $checked_as: ident, $checked_as_mut: ident;)*) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        enum ValueKindInner {
            $($kind($inner),)*
        }

        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum ValueKind {
            $($kind,)*
        }

        $(
            impl From<$inner> for Value {
                fn from(val: $inner) -> Self {
                    Self {
                        comm: val.comm,
                        inner: ValueKindInner::$kind(val),
                    }
                }
            }
        )*

        impl Value {
            $(
                #[inline]
                pub fn $as(&self) -> Option<&$inner> {
                    match &self.inner {
                        ValueKindInner::$kind(v) => Some(v),
                        _ => None,
                    }
                }

                #[inline]
                pub fn $as_mut(&mut self) -> Option<&mut $inner> {
                    match &mut self.inner {
                        ValueKindInner::$kind(v) => Some(v),
                        _ => None,
                    }
                }

                #[inline(always)]
                pub fn $checked_as(&self) -> &$inner {
                    let kind = self.kind();
                    self.$as()
                        .unwrap_or_else(|| panic!("{:?} value is not {}", kind, stringify!($kind)))
                }

                #[inline(always)]
                pub fn $checked_as_mut(&mut self) -> &mut $inner {
                    let kind = self.kind();
                    self.$as_mut()
                        .unwrap_or_else(|| panic!("{:?} value is not {}", kind, stringify!($kind)))
                }
            )*

            #[inline]
            pub fn kind(&self) -> ValueKind {
                match &self.inner {
                    $(ValueKindInner::$kind(_) => ValueKind::$kind,)*
                }
            }

            /// Size in bytes the value occupies in the worker's memory.
            pub fn size(&self, target: &Target) -> u64 {
                match &self.inner {
                    $(ValueKindInner::$kind(v) => v.size(target),)*
                }
            }
        }
    };
}

value_kinds! {
    Integer(IntegerValue): as_int, as_int_mut, checked_as_int, checked_as_int_mut;
    Ptr(PtrValue): as_ptr, as_ptr_mut, checked_as_ptr, checked_as_ptr_mut;
    Vma(VmaValue): as_vma, as_vma_mut, checked_as_vma, checked_as_vma_mut;
    Data(DataValue): as_data, as_data_mut, checked_as_data, checked_as_data_mut;
    Group(GroupValue): as_group, as_group_mut, checked_as_group, checked_as_group_mut;
    Union(UnionValue): as_union, as_union_mut, checked_as_union, checked_as_union_mut;
    Res(ResValue): as_res, as_res_mut, checked_as_res, checked_as_res_mut;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Value {
    pub comm: ValueCommon,
    inner: ValueKindInner,
}

impl Value {
    #[inline(always)]
    pub fn ty<'a>(&self, target: &'a Target) -> &'a Type {
        self.comm.ty(target)
    }

    #[inline(always)]
    pub fn ty_id(&self) -> TypeId {
        self.comm.ty_id()
    }

    #[inline(always)]
    pub fn dir(&self) -> Dir {
        self.comm.dir
    }

    /// Display the value, results are named by their raw ids.
    pub fn display<'a, 'b>(&'a self, target: &'b Target) -> ValueDisplay<'a, 'b> {
        ValueDisplay {
            val: self,
            target,
            names: None,
        }
    }

    pub(crate) fn display_with<'a, 'b>(
        &'a self,
        target: &'b Target,
        names: &'b HashMap<ResId, usize>,
    ) -> ValueDisplay<'a, 'b> {
        ValueDisplay {
            val: self,
            target,
            names: Some(names),
        }
    }

    /// Native-endian byte image of the value, as the worker would lay it out in memory.
    ///
    /// Pointers and results are written as their plain integer value.
    pub fn byte_image(&self, target: &Target, buf: &mut Vec<u8>) {
        let start = buf.len();
        match &self.inner {
            ValueKindInner::Integer(v) => {
                let (val, _) = v.value(target);
                write_int(buf, val, v.size(target));
            }
            ValueKindInner::Ptr(v) => {
                write_int(buf, v.encoded_addr(target), v.size(target))
            }
            ValueKindInner::Vma(v) => {
                write_int(buf, v.encoded_addr(target), v.size(target))
            }
            ValueKindInner::Res(v) => write_int(buf, v.val, v.size(target)),
            ValueKindInner::Data(v) => {
                if v.dir() == Dir::Out {
                    buf.resize(buf.len() + v.size as usize, 0);
                } else {
                    buf.extend_from_slice(&v.data);
                }
            }
            ValueKindInner::Group(v) => {
                for f in v.inner.iter() {
                    f.byte_image(target, buf);
                }
            }
            ValueKindInner::Union(v) => v.option.byte_image(target, buf),
        }
        let sz = self.size(target) as usize;
        if buf.len() - start < sz {
            buf.resize(start + sz, 0);
        }
    }
}

fn write_int(buf: &mut Vec<u8>, val: u64, size: u64) {
    let size = std::cmp::min(size as usize, 8);
    if cfg!(target_endian = "big") {
        buf.extend_from_slice(&val.to_be_bytes()[8 - size..]);
    } else {
        buf.extend_from_slice(&val.to_le_bytes()[..size]);
    }
}

#[derive(Debug, Clone)]
pub struct ValueDisplay<'a, 'b> {
    val: &'a Value,
    target: &'b Target,
    names: Option<&'b HashMap<ResId, usize>>,
}

impl<'a, 'b> ValueDisplay<'a, 'b> {
    fn nested<'c>(&self, val: &'c Value) -> ValueDisplay<'c, 'b> {
        ValueDisplay {
            val,
            target: self.target,
            names: self.names,
        }
    }

    fn res_name(&self, id: ResId) -> u64 {
        self.names
            .and_then(|names| names.get(&id))
            .map(|&n| n as u64)
            .unwrap_or(id)
    }
}

impl<'a, 'b> Display for ValueDisplay<'a, 'b> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.val.inner {
            ValueKindInner::Integer(inner) => write!(f, "{}", inner),
            ValueKindInner::Ptr(inner) => {
                if inner.is_special() {
                    return write!(f, "{:#x}", inner.encoded_addr(self.target));
                }
                let addr = inner.encoded_addr(self.target);
                write!(f, "&({:#x})=", addr)?;
                if let Some(pointee) = inner.pointee.as_ref() {
                    write!(f, "{}", self.nested(pointee))
                } else {
                    write!(f, "nil")
                }
            }
            ValueKindInner::Vma(inner) => {
                if inner.is_special() {
                    return write!(f, "{:#x}", inner.encoded_addr(self.target));
                }
                let addr = inner.encoded_addr(self.target);
                write!(f, "&({:#x}/{:#x})=nil", addr, inner.vma_size)
            }
            ValueKindInner::Data(inner) => write!(f, "{}", inner.display(self.target)),
            ValueKindInner::Group(inner) => {
                let ty = inner.ty(self.target);
                let delims = if ty.kind() == TypeKind::Array {
                    ['[', ']']
                } else {
                    ['{', '}']
                };
                write!(f, "{}", delims[0])?;
                for (i, v) in inner.inner.iter().enumerate() {
                    write!(f, "{}", self.nested(v))?;
                    if i != inner.inner.len() - 1 {
                        write!(f, ", ")?;
                    }
                }
                write!(f, "{}", delims[1])
            }
            ValueKindInner::Union(inner) => {
                let ty = inner.ty(self.target).checked_as_union();
                let field = &ty.fields()[inner.index as usize];
                write!(f, "@{}={}", field.name(), self.nested(&inner.option))
            }
            ValueKindInner::Res(inner) => {
                let used = self
                    .names
                    .map(|names| names.contains_key(&inner.id))
                    .unwrap_or(false);
                if used {
                    write!(f, "<r{}=>", self.res_name(inner.id))?;
                }
                match inner.src {
                    Some(src) => write!(f, "r{}", self.res_name(src)),
                    None => write!(f, "{:#x}", inner.val),
                }
            }
        }
    }
}

/// Value of const, int, flags, len, proc and csum types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntegerValue {
    pub comm: ValueCommon,
    pub val: u64,
}

impl IntegerValue {
    value_comm_getters!();

    pub fn new(ty: TypeId, dir: Dir, val: u64) -> Self {
        Self {
            comm: ValueCommon::new(ty, dir),
            val,
        }
    }

    #[inline(always)]
    pub fn size(&self, target: &Target) -> u64 {
        self.ty(target).size()
    }

    /// Value to write and the per-process stride of it.
    pub fn value(&self, target: &Target) -> (u64, u64) {
        let ty = self.ty(target);
        match ty.kind() {
            TypeKind::Proc => {
                let ty = ty.checked_as_proc();
                (ty.values_start() + self.val, ty.values_per_proc())
            }
            _ => (self.val, 0),
        }
    }
}

impl Display for IntegerValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.val)
    }
}

/// Offset from the start of the data area of the target.
pub type PtrAddress = u64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PtrValue {
    pub comm: ValueCommon,
    pub addr: PtrAddress, // index of the special pointer if `pointee` is none
    pub pointee: Option<Box<Value>>,
}

impl PtrValue {
    value_comm_getters!();

    pub fn new(ty: TypeId, dir: Dir, addr: PtrAddress, data: Value) -> Self {
        Self {
            comm: ValueCommon::new(ty, dir),
            addr,
            pointee: Some(Box::new(data)),
        }
    }

    #[inline(always)]
    pub fn size(&self, target: &Target) -> u64 {
        self.ty(target).size()
    }

    pub fn new_special(ty: TypeId, dir: Dir, index: u64) -> Self {
        assert!(index < PtrType::MAX_SPECIAL_POINTERS);

        Self {
            comm: ValueCommon::new(ty, dir),
            addr: index,
            pointee: None,
        }
    }

    #[inline(always)]
    pub fn is_special(&self) -> bool {
        self.pointee.is_none()
    }

    /// Address seen by the kernel.
    pub fn encoded_addr(&self, target: &Target) -> u64 {
        if self.is_special() {
            target.special_ptrs()[self.addr as usize]
        } else {
            target.data_offset() + self.addr
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VmaValue {
    pub comm: ValueCommon,
    pub addr: PtrAddress,
    pub vma_size: u64,
}

impl VmaValue {
    value_comm_getters!();

    pub fn new(ty: TypeId, dir: Dir, addr: u64, vma_size: u64) -> Self {
        assert_ne!(vma_size, 0);

        Self {
            comm: ValueCommon::new(ty, dir),
            addr,
            vma_size,
        }
    }

    #[inline(always)]
    pub fn size(&self, target: &Target) -> u64 {
        self.ty(target).size()
    }

    pub fn new_special(ty: TypeId, dir: Dir, index: u64) -> Self {
        assert!(index < PtrType::MAX_SPECIAL_POINTERS);

        Self {
            comm: ValueCommon::new(ty, dir),
            addr: index,
            vma_size: 0,
        }
    }

    #[inline(always)]
    pub fn is_special(&self) -> bool {
        self.vma_size == 0
    }

    pub fn encoded_addr(&self, target: &Target) -> u64 {
        if self.is_special() {
            target.special_ptrs()[self.addr as usize]
        } else {
            target.data_offset() + self.addr
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataValue {
    pub comm: ValueCommon,
    pub data: Vec<u8>,
    pub size: u64, // for out args
}

impl DataValue {
    value_comm_getters!();

    pub fn new(ty: TypeId, dir: Dir, data: Vec<u8>) -> Self {
        Self {
            comm: ValueCommon::new(ty, dir),
            data,
            size: 0,
        }
    }

    pub fn new_out_data(ty: TypeId, dir: Dir, size: u64) -> Self {
        Self {
            comm: ValueCommon::new(ty, dir),
            data: Vec::new(),
            size,
        }
    }

    pub fn size(&self, _target: &Target) -> u64 {
        if self.dir() == Dir::Out {
            self.size
        } else {
            self.data.len() as u64
        }
    }

    pub fn display<'a, 'b>(&'a self, target: &'b Target) -> DataValueDisplay<'a, 'b> {
        DataValueDisplay { val: self, target }
    }
}

#[derive(Debug, Clone)]
pub struct DataValueDisplay<'a, 'b> {
    val: &'a DataValue,
    target: &'b Target,
}

impl<'a, 'b> Display for DataValueDisplay<'a, 'b> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let val = self.val;
        let ty = val.ty(self.target);
        let mut data = &val.data[..];

        // mark size for output data
        if val.dir() == Dir::Out {
            return write!(f, "\"\"/{:#x}", val.size);
        }
        // try to shrink
        while data.len() >= 2 && data[data.len() - 1] == 0 && data[data.len() - 2] == 0 {
            data = &data[..data.len() - 1];
        }
        if ty.varlen() && data.len() + 8 >= val.data.len() {
            data = &val.data[..];
        }
        // display
        if !matches!(ty.kind(), TypeKind::BufferString | TypeKind::BufferFilename)
            && (data.is_empty() || !is_readable(data))
        {
            write!(f, "\"{}\"", hex::encode(data))?;
        } else {
            let escaped = data
                .iter()
                .copied()
                .flat_map(escape_default)
                .map(char::from)
                .collect::<String>();
            write!(f, "\'{}\'", escaped)?;
        }
        // mark size if we dropped zeros of varlen type
        if ty.varlen() && data.len() != val.data.len() {
            write!(f, "/{:#x}", val.data.len())?;
        }
        Ok(())
    }
}

#[allow(clippy::match_like_matches_macro)]
fn is_readable(data: &[u8]) -> bool {
    data.iter().all(|v| match *v {
        0 | 0x7 | 0x8 | 0xC | 0xA | 0xD | b'\t' | 0xB => true,
        0x20..=0x7e => true,
        _ => false,
    })
}

/// Value of struct and array types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupValue {
    pub comm: ValueCommon,
    pub inner: Vec<Value>,
}

impl GroupValue {
    value_comm_getters!();

    pub fn new(ty: TypeId, dir: Dir, data: Vec<Value>) -> Self {
        Self {
            comm: ValueCommon::new(ty, dir),
            inner: data,
        }
    }

    pub fn size(&self, target: &Target) -> u64 {
        let ty = self.ty(target);
        if !ty.varlen() {
            return ty.size();
        }
        self.inner.iter().map(|v| v.size(target)).sum()
    }

    pub fn fixed_inner_size(&self, target: &Target) -> bool {
        let ty = self.ty(target);
        match ty.kind() {
            TypeKind::Struct => true,
            TypeKind::Array => ty.checked_as_array().is_fixed_len(),
            _ => unreachable!(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnionValue {
    pub comm: ValueCommon,
    pub option: Box<Value>,
    pub index: u64,
}

impl UnionValue {
    value_comm_getters!();

    pub fn new(ty: TypeId, dir: Dir, index: u64, option: Value) -> Self {
        Self {
            comm: ValueCommon::new(ty, dir),
            option: Box::new(option),
            index,
        }
    }

    pub fn size(&self, target: &Target) -> u64 {
        let ty = self.ty(target);
        if !ty.varlen() {
            ty.size()
        } else {
            self.option.size(target)
        }
    }
}

/// Program-unique identity of a result value.
pub type ResId = u64;

/// Value of resource types.
///
/// Values of direction `Out` and `InOut` are producers, `src` links a consumer to the
/// producer it reads. Without a producer, `val` is passed as is.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResValue {
    pub comm: ValueCommon,
    pub id: ResId,
    pub src: Option<ResId>,
    pub val: u64,
    /// Applied to the produced value as `v / op_div + op_add` when consumed.
    pub op_div: u64,
    pub op_add: u64,
}

impl ResValue {
    value_comm_getters!();

    #[inline(always)]
    pub fn size(&self, target: &Target) -> u64 {
        self.ty(target).size()
    }

    /// Consumer of `src`.
    pub fn new_ref(ty: TypeId, dir: Dir, id: ResId, src: ResId) -> Self {
        Self {
            comm: ValueCommon::new(ty, dir),
            id,
            src: Some(src),
            val: 0,
            op_div: 0,
            op_add: 0,
        }
    }

    /// Producer, `val` is used by consumers if the call fails.
    pub fn new_res(ty: TypeId, id: ResId, val: u64) -> Self {
        Self {
            comm: ValueCommon::new(ty, Dir::Out),
            id,
            src: None,
            val,
            op_div: 0,
            op_add: 0,
        }
    }

    /// Plain value without producer.
    pub fn new_null(ty: TypeId, dir: Dir, id: ResId, val: u64) -> Self {
        Self {
            comm: ValueCommon::new(ty, dir),
            id,
            src: None,
            val,
            op_div: 0,
            op_add: 0,
        }
    }

    #[inline(always)]
    pub fn is_producer(&self) -> bool {
        self.dir() != Dir::In
    }

    #[inline(always)]
    pub fn is_consumer(&self) -> bool {
        self.src.is_some()
    }
}

/// Control flow of value traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Visit children of current value.
    Continue,
    /// Skip children of current value.
    Skip,
    /// Stop the whole traversal.
    Stop,
}

/// Pre-order traversal of `val`, returns true if stopped.
pub fn foreach_value<'a, F>(val: &'a Value, f: &mut F) -> bool
where
    F: FnMut(&'a Value) -> Visit,
{
    match f(val) {
        Visit::Stop => return true,
        Visit::Skip => return false,
        Visit::Continue => (),
    }
    match &val.inner {
        ValueKindInner::Ptr(v) => {
            if let Some(pointee) = v.pointee.as_ref() {
                return foreach_value(pointee, f);
            }
        }
        ValueKindInner::Group(v) => {
            for inner in v.inner.iter() {
                if foreach_value(inner, f) {
                    return true;
                }
            }
        }
        ValueKindInner::Union(v) => return foreach_value(&v.option, f),
        _ => (),
    }
    false
}

/// Mutable pre-order traversal of `val`, returns true if stopped.
pub fn foreach_value_mut<F>(val: &mut Value, f: &mut F) -> bool
where
    F: FnMut(&mut Value) -> Visit,
{
    match f(val) {
        Visit::Stop => return true,
        Visit::Skip => return false,
        Visit::Continue => (),
    }
    match &mut val.inner {
        ValueKindInner::Ptr(v) => {
            if let Some(pointee) = v.pointee.as_mut() {
                return foreach_value_mut(pointee, f);
            }
        }
        ValueKindInner::Group(v) => {
            for inner in v.inner.iter_mut() {
                if foreach_value_mut(inner, f) {
                    return true;
                }
            }
        }
        ValueKindInner::Union(v) => return foreach_value_mut(&mut v.option, f),
        _ => (),
    }
    false
}

/// Children of `val`, in traversal order.
pub fn children(val: &Value) -> Vec<&Value> {
    match &val.inner {
        ValueKindInner::Ptr(v) => v.pointee.iter().map(|p| &**p).collect(),
        ValueKindInner::Group(v) => v.inner.iter().collect(),
        ValueKindInner::Union(v) => vec![&*v.option],
        _ => Vec::new(),
    }
}

/// The n-th value of `vals` in pre-order, counting every nested value.
pub fn nth_value_mut<'a>(vals: &'a mut [Value], n: usize) -> Option<&'a mut Value> {
    let mut n = n;
    for val in vals.iter_mut() {
        if let Some(v) = nth_value_mut_inner(val, &mut n) {
            return Some(v);
        }
    }
    None
}

fn nth_value_mut_inner<'a>(val: &'a mut Value, n: &mut usize) -> Option<&'a mut Value> {
    if *n == 0 {
        return Some(val);
    }
    *n -= 1;
    match &mut val.inner {
        ValueKindInner::Ptr(v) => match v.pointee.as_mut() {
            Some(pointee) => nth_value_mut_inner(pointee, n),
            None => None,
        },
        ValueKindInner::Group(v) => {
            for inner in v.inner.iter_mut() {
                if let Some(found) = nth_value_mut_inner(inner, n) {
                    return Some(found);
                }
            }
            None
        }
        ValueKindInner::Union(v) => nth_value_mut_inner(&mut v.option, n),
        _ => None,
    }
}

/// The n-th value of `vals` in pre-order.
pub fn nth_value(vals: &[Value], n: usize) -> Option<&Value> {
    let mut i = 0;
    let mut found = None;
    for val in vals {
        let stopped = foreach_value(val, &mut |v| {
            if i == n {
                found = Some(v);
                return Visit::Stop;
            }
            i += 1;
            Visit::Continue
        });
        if stopped {
            break;
        }
    }
    found
}

/// Number of values in `vals`, nested ones included.
pub fn count_values(vals: &[Value]) -> usize {
    let mut n = 0;
    for val in vals {
        foreach_value(val, &mut |_| {
            n += 1;
            Visit::Continue
        });
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::test_target;

    #[test]
    fn nth_value_matches_traversal_order() {
        let target = test_target();
        let int = target.ty_of_name("int32").unwrap().id();
        let arr = target.ty_of_name("array_int32").unwrap().id();
        let vals: Vec<Value> = vec![
            IntegerValue::new(int, Dir::In, 1).into(),
            GroupValue::new(
                arr,
                Dir::In,
                vec![
                    IntegerValue::new(int, Dir::In, 2).into(),
                    IntegerValue::new(int, Dir::In, 3).into(),
                ],
            )
            .into(),
        ];
        assert_eq!(count_values(&vals), 4);
        assert_eq!(nth_value(&vals, 3).unwrap().checked_as_int().val, 3);
        let mut vals = vals;
        let v = nth_value_mut(&mut vals, 2).unwrap();
        v.checked_as_int_mut().val = 42;
        assert_eq!(nth_value(&vals, 2).unwrap().checked_as_int().val, 42);
        assert!(nth_value(&vals, 4).is_none());
    }

    #[test]
    fn data_display() {
        let target = test_target();
        let blob = target.ty_of_name("blob").unwrap().id();
        let v: Value = DataValue::new(blob, Dir::In, vec![0xde, 0xad]).into();
        assert_eq!(v.display(&target).to_string(), "\"dead\"");
        let v: Value = DataValue::new(blob, Dir::In, b"hello".to_vec()).into();
        assert_eq!(v.display(&target).to_string(), "'hello'");
        let v: Value = DataValue::new_out_data(blob, Dir::Out, 16).into();
        assert_eq!(v.display(&target).to_string(), "\"\"/0x10");
    }

    #[test]
    fn byte_image_is_native_endian() {
        let target = test_target();
        let int = target.ty_of_name("int32").unwrap().id();
        let v: Value = IntegerValue::new(int, Dir::In, 0x01020304).into();
        let mut buf = Vec::new();
        v.byte_image(&target, &mut buf);
        assert_eq!(buf, vec![4, 3, 2, 1]);
    }
}
