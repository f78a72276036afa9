//! Prog minimization.
use crate::{
    len::assign_sizes_call,
    prog::Prog,
    target::Target,
    ty::{Dir, TypeKind},
    value::{count_values, nth_value, nth_value_mut, IntegerValue, PtrValue, Value},
    HashSet,
};

/// Minimize `p` while `pred` holds.
///
/// Calls other than `call_index` are removed from the end, then args of the remaining
/// calls are simplified one by one. `pred` receives each candidate and the index of the
/// tracked call in it. Ints are only reset when minimizing a crash.
pub fn minimize<F>(
    target: &Target,
    p: &Prog,
    call_index: Option<usize>,
    crash: bool,
    mut pred: F,
) -> (Prog, Option<usize>)
where
    F: FnMut(&Prog, Option<usize>) -> bool,
{
    let (mut p0, call_index) = remove_calls(p, call_index, &mut pred);
    for i in 0..p0.len() {
        minimize_call(target, &mut p0, i, call_index, crash, &mut pred);
    }
    p0.debug_validate(target);
    (p0, call_index)
}

fn remove_calls<F>(p: &Prog, mut call_index: Option<usize>, pred: &mut F) -> (Prog, Option<usize>)
where
    F: FnMut(&Prog, Option<usize>) -> bool,
{
    let mut p0 = p.clone();
    for i in (0..p0.len()).rev() {
        if call_index == Some(i) {
            continue;
        }
        let new_index = call_index.map(|idx| if i < idx { idx - 1 } else { idx });
        let candidate = p0.remove_call(i);
        if pred(&candidate, new_index) {
            debug_info!("minimize: call-{} removed", i);
            p0 = candidate;
            call_index = new_index;
        }
    }
    (p0, call_index)
}

fn minimize_call<F>(
    target: &Target,
    p0: &mut Prog,
    i: usize,
    call_index: Option<usize>,
    crash: bool,
    pred: &mut F,
) where
    F: FnMut(&Prog, Option<usize>) -> bool,
{
    let mut tried = HashSet::new();
    'again: loop {
        let n = count_values(p0.calls()[i].args());
        for nth in 0..n {
            if !tried.insert(nth) {
                continue;
            }
            let val = match nth_value(p0.calls()[i].args(), nth) {
                Some(val) => val,
                None => break,
            };
            for new in simplify(target, val, crash) {
                let mut candidate = p0.clone();
                candidate.edit_call(i, |call| {
                    if let Some(slot) = nth_value_mut(call.args_mut(), nth) {
                        *slot = new;
                    }
                    assign_sizes_call(target, call);
                });
                if pred(&candidate, call_index) {
                    debug_info!("minimize: call-{} value-{} simplified", i, nth);
                    *p0 = candidate;
                    tried.clear();
                    continue 'again;
                }
            }
        }
        break;
    }
}

/// Simpler versions of `val`, most preferred first.
fn simplify(target: &Target, val: &Value, crash: bool) -> Vec<Value> {
    let ty = val.ty(target);
    let mut ret = Vec::new();
    match ty.kind() {
        TypeKind::Ptr => {
            let ptr = val.checked_as_ptr();
            if !ptr.is_special() && !target.special_ptrs().is_empty() {
                ret.push(PtrValue::new_special(val.ty_id(), val.dir(), 0).into());
            }
        }
        TypeKind::Array => {
            let min_len = ty
                .checked_as_array()
                .range()
                .map(|r| *r.start())
                .unwrap_or(0);
            let elems = &val.checked_as_group().inner;
            if elems.len() as u64 > min_len {
                for i in (0..elems.len()).rev() {
                    let mut new = val.clone();
                    new.checked_as_group_mut().inner.remove(i);
                    ret.push(new);
                }
            }
        }
        TypeKind::BufferBlob if val.dir() != Dir::Out => {
            let min_len = ty
                .checked_as_buffer_blob()
                .range()
                .map(|r| *r.start())
                .unwrap_or(0) as usize;
            let len = val.checked_as_data().data.len();
            if ty.varlen() && len > min_len {
                let mut new = val.clone();
                new.checked_as_data_mut()
                    .data
                    .truncate(std::cmp::max(len / 2, min_len));
                ret.push(new);
            }
        }
        TypeKind::Int | TypeKind::Flags if crash && val.dir() != Dir::Out => {
            if val.checked_as_int().val != 0 {
                ret.push(IntegerValue::new(val.ty_id(), val.dir(), 0).into());
            }
        }
        _ => (),
    }
    ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse::parse_prog, target::test_target};

    #[test]
    fn remove_unrelated_calls() {
        let target = test_target();
        let p = parse_prog(
            &target,
            "getpid()\n\
             r0 = open(&(0x20000000)='./file0\\x00', 0x2, 0x0)\n\
             getpid()\n\
             close(r0)\n",
        )
        .unwrap();
        let close = target.syscall_of_name("close").unwrap().id();
        let open = target.syscall_of_name("open").unwrap().id();
        // the close call only matters with its producer
        let (p0, idx) = minimize(&target, &p, Some(3), false, |p, idx| {
            let idx = idx.unwrap();
            p.calls()[idx].sid() == close
                && p.calls()[..idx].iter().any(|c| c.sid() == open)
                && p.calls()[idx].args()[0].checked_as_res().src.is_some()
        });
        assert_eq!(idx, Some(1));
        assert_eq!(p0.len(), 2);
        p0.validate(&target);
    }

    #[test]
    fn simplify_args() {
        let target = test_target();
        let p = parse_prog(
            &target,
            "poll(&(0x20000000)=[0x1, 0x2, 0x3], 0x3, 0x10)\n\
             write(0xffffffffffffffff, &(0x20000040)=\"0011223344556677\", 0x8)\n",
        )
        .unwrap();
        let (p0, _) = minimize(&target, &p, None, true, |p, _| {
            // keep both calls, poll must keep a pointer to at least one element
            p.len() == 2
                && p.calls()[0].args()[0]
                    .checked_as_ptr()
                    .pointee
                    .as_ref()
                    .map(|v| !v.checked_as_group().inner.is_empty())
                    .unwrap_or(false)
        });
        p0.validate(&target);
        let arr = p0.calls()[0].args()[0].checked_as_ptr().pointee.as_ref().unwrap();
        assert_eq!(arr.checked_as_group().inner.len(), 1);
        assert_eq!(p0.calls()[0].args()[1].checked_as_int().val, 1);
        assert_eq!(p0.calls()[0].args()[2].checked_as_int().val, 0);
        assert!(p0.calls()[1].args()[1].checked_as_ptr().is_special());
    }
}
