//! Size calculation of `len` fields.
use crate::{
    prog::Call,
    target::Target,
    ty::{Field, TypeKind},
    value::Value,
};

/// Path of a len field that measures the enclosing struct.
pub const PARENT_PATH: &str = "parent";

/// What a len field measures, used by size mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LenTarget {
    /// Size of data in units of `elem_size`.
    Units(u64),
    /// Size of a vma, never mutated.
    Vma,
    /// Elements of varlen types or an unknown sibling, never mutated.
    Unknown,
}

/// Recalculate all len fields of `call`.
pub fn assign_sizes_call(target: &Target, call: &mut Call) {
    let syscall = target.syscall_of(call.sid());
    assign_sizes(target, syscall.params(), call.args_mut(), None);
}

/// Recalculate len fields of `vals`, described by `fields`, and their children.
///
/// `parent_size` is the size of the struct holding `vals`.
pub fn assign_sizes(
    target: &Target,
    fields: &[Field],
    vals: &mut [Value],
    parent_size: Option<u64>,
) {
    let mut sizes = Vec::new();
    for (i, val) in vals.iter().enumerate() {
        let ty = val.ty(target);
        if let Some(len_ty) = ty.as_len() {
            if let Some(sz) = calc_len(target, fields, vals, len_ty.path(), len_ty.byte_unit(), parent_size) {
                sizes.push((i, sz));
            }
        }
    }
    for (i, sz) in sizes {
        vals[i].checked_as_int_mut().val = sz;
    }
    for val in vals.iter_mut() {
        assign_sizes_value(target, val);
    }
}

fn assign_sizes_value(target: &Target, val: &mut Value) {
    let ty = val.ty(target);
    match ty.kind() {
        TypeKind::Ptr => {
            if let Some(pointee) = val.checked_as_ptr_mut().pointee.as_mut() {
                assign_sizes_value(target, pointee);
            }
        }
        TypeKind::Struct => {
            let size = val.size(target);
            let fields = ty.checked_as_struct().fields();
            assign_sizes(target, fields, &mut val.checked_as_group_mut().inner, Some(size));
        }
        TypeKind::Array => {
            for elem in val.checked_as_group_mut().inner.iter_mut() {
                assign_sizes_value(target, elem);
            }
        }
        TypeKind::Union => {
            assign_sizes_value(target, &mut val.checked_as_union_mut().option);
        }
        _ => (),
    }
}

fn calc_len(
    target: &Target,
    fields: &[Field],
    vals: &[Value],
    path: &str,
    byte_unit: u64,
    parent_size: Option<u64>,
) -> Option<u64> {
    if path == PARENT_PATH {
        return parent_size.map(|sz| div_unit(sz, byte_unit));
    }
    let idx = fields.iter().position(|f| f.name() == path)?;
    let sibling = vals.get(idx)?;
    let sz = match sibling.ty(target).kind() {
        TypeKind::Ptr => {
            let p = sibling.checked_as_ptr();
            match p.pointee.as_ref() {
                Some(pointee) => measure(target, pointee, byte_unit),
                None => 0,
            }
        }
        TypeKind::Vma => {
            let v = sibling.checked_as_vma();
            if v.is_special() {
                0
            } else {
                div_unit(v.vma_size, byte_unit)
            }
        }
        _ => measure(target, sibling, byte_unit),
    };
    Some(sz)
}

fn measure(target: &Target, val: &Value, byte_unit: u64) -> u64 {
    if let Some(g) = val.as_group() {
        if byte_unit == 0 && val.ty(target).kind() == TypeKind::Array {
            return g.inner.len() as u64;
        }
    }
    div_unit(val.size(target), byte_unit)
}

#[inline]
fn div_unit(sz: u64, byte_unit: u64) -> u64 {
    if byte_unit == 0 {
        sz
    } else {
        sz / byte_unit
    }
}

/// What the len field `len_field` of `fields` measures.
pub fn len_target(target: &Target, fields: &[Field], len_field: &Field) -> LenTarget {
    let len_ty = target.ty_of(len_field.ty()).checked_as_len();
    let unit = |sz: u64| {
        if len_ty.byte_unit() != 0 {
            LenTarget::Units(std::cmp::max(sz / len_ty.byte_unit(), 1))
        } else {
            LenTarget::Units(sz)
        }
    };
    if len_ty.path() == PARENT_PATH {
        return unit(1);
    }
    let sibling = match fields.iter().find(|f| f.name() == len_ty.path()) {
        Some(f) => target.ty_of(f.ty()),
        None => return LenTarget::Unknown,
    };
    let measured = match sibling.as_ptr() {
        Some(ptr) => target.ty_of(ptr.elem()),
        None => sibling,
    };
    match measured.kind() {
        TypeKind::Vma => LenTarget::Vma,
        TypeKind::Array => {
            let elem = target.ty_of(measured.checked_as_array().elem());
            if elem.varlen() {
                LenTarget::Unknown
            } else if len_ty.byte_unit() == 0 {
                LenTarget::Units(elem.size())
            } else {
                unit(1)
            }
        }
        _ => unit(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse::parse_prog, target::test_target};

    #[test]
    fn sizes_of_siblings() {
        let target = test_target();
        let mut p = parse_prog(
            &target,
            "write(0xffffffffffffffff, &(0x20000000)=\"0011223344\", 0x0)\n\
             poll(&(0x20000040)=[0x1, 0x2, 0x3], 0x0, 0x0)\n\
             mmap(&(0x20001000/0x2000)=nil, 0x0, 0x0, 0xffffffffffffffff, 0x0)\n",
        )
        .unwrap();
        for i in 0..p.len() {
            p.edit_call(i, |call| assign_sizes_call(&target, call));
        }
        assert_eq!(p.calls()[0].args()[2].checked_as_int().val, 5);
        assert_eq!(p.calls()[1].args()[1].checked_as_int().val, 3);
        assert_eq!(p.calls()[2].args()[1].checked_as_int().val, 0x2000);
    }

    #[test]
    fn sizes_of_parent_and_nested() {
        let target = test_target();
        let mut p = parse_prog(
            &target,
            "bind$inet(0xffffffffffffffff, 0x0, &(0x20000000)={0x0, 0x1})\n\
             setxattr(&(0x20000040)='./file0\\x00', &(0x20000080)='ext4\\x00', &(0x200000c0)={0x0, 0x0, 0x6, 0x0, \"00112233445566\"})\n",
        )
        .unwrap();
        for i in 0..p.len() {
            p.edit_call(i, |call| assign_sizes_call(&target, call));
        }
        let hdr = p.calls()[0].args()[2].checked_as_ptr().pointee.as_ref().unwrap();
        assert_eq!(hdr.checked_as_group().inner[0].checked_as_int().val, 8);
        let pkt = p.calls()[1].args()[2].checked_as_ptr().pointee.as_ref().unwrap();
        assert_eq!(pkt.checked_as_group().inner[1].checked_as_int().val, 7);
    }

    #[test]
    fn len_targets() {
        let target = test_target();
        let poll = target.syscall_of_name("poll").unwrap();
        let mmap = target.syscall_of_name("mmap").unwrap();
        let write = target.syscall_of_name("write").unwrap();
        assert_eq!(len_target(&target, poll.params(), &poll.params()[1]), LenTarget::Units(4));
        assert_eq!(len_target(&target, mmap.params(), &mmap.params()[1]), LenTarget::Vma);
        assert_eq!(len_target(&target, write.params(), &write.params()[2]), LenTarget::Units(1));
    }
}
