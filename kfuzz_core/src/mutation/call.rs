//! Call level mutation.
use super::{
    buffer::{mutate_buffer_blob, mutate_buffer_filename, mutate_buffer_string},
    group::{mutate_array, mutate_struct, mutate_union},
    int::{mutate_const, mutate_csum, mutate_flags, mutate_int, mutate_len, mutate_proc},
    ptr::{mutate_ptr, mutate_vma},
    res::mutate_res,
    ArgCtx, ArgMutation,
};
use crate::{
    context::Context,
    gen::choose_weighted,
    len::{assign_sizes_call, len_target},
    prog::{Call, Prog},
    select::ChoiceTable,
    target::Target,
    ty::{Dir, Field, Type, TypeKind},
    value::{count_values, nth_value, nth_value_mut, Value},
    RngType,
};
use rand::prelude::*;

/// Select a call of `p` and mutate its args, producers needed by new values are
/// inserted in front of it.
pub fn mutate_call_args(
    target: &Target,
    choice: &ChoiceTable,
    rng: &mut RngType,
    p: &mut Prog,
    ncalls: usize,
) -> bool {
    if p.is_empty() {
        return false;
    }
    let mut idx = match select_call(target, rng, p) {
        Some(idx) => idx,
        None => return false,
    };

    let mut update_sizes = true;
    let mut mutated = false;
    let mut tries = 0;
    let mut stop = false;
    while !stop && tries < 128 {
        tries += 1;
        let (args, prios) = collect_args(target, &p.calls()[idx]);
        if args.is_empty() {
            break;
        }
        let arg = &args[choose_weighted(rng, &prios)];
        let call = &p.calls()[idx];
        let mut val = match nth_value(call.args(), arg.nth) {
            Some(val) => val.clone(),
            None => break,
        };
        let base_size = arg.base.and_then(|b| pointee_size(target, call.args(), b));

        let mut ctx = Context::for_prog(target, choice, p, idx);
        let outcome = mutate_value(&mut ctx, rng, &mut val, &arg.ctx);
        let ok = outcome != ArgMutation::Retry;
        if ok {
            mutated = true;
            if outcome == ArgMutation::Preserve {
                update_sizes = false;
            }
            let (nth, base) = (arg.nth, arg.base);
            p.edit_call(idx, |call| {
                if let Some(slot) = nth_value_mut(call.args_mut(), nth) {
                    *slot = val;
                }
                if let (Some(base), Some(old_size)) = (base, base_size) {
                    realloc_if_grown(&mut ctx, call.args_mut(), base, old_size);
                }
            });
            let new_calls = ctx.take_calls();
            let n = new_calls.len();
            p.insert_calls(idx, new_calls);
            idx += n;
            while p.len() > ncalls && idx > 0 {
                idx -= 1;
                p.remove_call_inplace(idx);
            }
            if update_sizes {
                p.edit_call(idx, |call| assign_sizes_call(target, call));
            }
        }
        stop = ok && rng.gen_ratio(1, 3);
    }
    mutated
}

fn pointee_size(target: &Target, args: &[Value], nth: usize) -> Option<u64> {
    let ptr = nth_value(args, nth)?.as_ptr()?;
    ptr.pointee.as_ref().map(|pointee| pointee.size(target))
}

/// Move the pointee of the `nth` pointer to a new address if it outgrew `old_size`.
pub(crate) fn realloc_if_grown(ctx: &mut Context, args: &mut [Value], nth: usize, old_size: u64) {
    let target = ctx.target();
    let val = match nth_value_mut(args, nth) {
        Some(val) => val,
        None => return,
    };
    let align = target.ty_of(val.ty(target).checked_as_ptr().elem()).align();
    let ptr = val.checked_as_ptr_mut();
    if let Some(new_size) = ptr.pointee.as_ref().map(|pointee| pointee.size(target)) {
        if new_size > old_size {
            ptr.addr = ctx.mem_allocator().alloc(new_size, align);
        }
    }
}

type TypeMutator = fn(&mut Context, &mut RngType, &mut Value, &ArgCtx) -> ArgMutation;
const TYPE_MUTATORS: [TypeMutator; 15] = [
    mutate_res,
    mutate_const,
    mutate_int,
    mutate_flags,
    mutate_len,
    mutate_proc,
    mutate_csum,
    mutate_vma,
    mutate_buffer_blob,
    mutate_buffer_string,
    mutate_buffer_filename,
    mutate_array,
    mutate_ptr,
    mutate_struct,
    mutate_union,
];

/// Mutate the given value
pub fn mutate_value(
    ctx: &mut Context,
    rng: &mut RngType,
    val: &mut Value,
    arg_ctx: &ArgCtx,
) -> ArgMutation {
    let ty = val.ty(ctx.target());
    TYPE_MUTATORS[ty.kind() as usize](ctx, rng, val, arg_ctx)
}

/// Select a call of `p` based on the prio of its args, none if nothing can be mutated.
pub fn select_call(target: &Target, rng: &mut RngType, p: &Prog) -> Option<usize> {
    let mut prios = Vec::with_capacity(p.len());
    let mut prio_sum = 0;
    for call in p.calls() {
        let (_, call_prios) = collect_args(target, call);
        prio_sum += call_prios.last().copied().unwrap_or(0);
        prios.push(prio_sum);
    }
    if prio_sum == 0 {
        None
    } else {
        Some(choose_weighted(rng, &prios))
    }
}

/// A mutable value of a call.
#[derive(Debug, Clone)]
pub struct ArgChoice {
    /// Index of the value in pre-order traversal of the call args.
    pub nth: usize,
    /// Index of the nearest pointer holding the value.
    pub base: Option<usize>,
    pub ctx: ArgCtx,
}

/// Collect mutable values of `call` and their cumulative prios.
pub fn collect_args(target: &Target, call: &Call) -> (Vec<ArgChoice>, Vec<u64>) {
    let mut c = Collector {
        target,
        n: 0,
        sum: 0,
        args: Vec::new(),
        prios: Vec::new(),
    };
    let params = target.syscall_of(call.sid()).params();
    c.collect_fields(Some(params), call.args(), None);
    (c.args, c.prios)
}

struct Collector<'a> {
    target: &'a Target,
    n: usize,
    sum: u64,
    args: Vec<ArgChoice>,
    prios: Vec<u64>,
}

impl<'a> Collector<'a> {
    fn collect_fields(&mut self, fields: Option<&[Field]>, vals: &[Value], base: Option<usize>) {
        for (i, val) in vals.iter().enumerate() {
            let mut ctx = ArgCtx::default();
            if val.ty(self.target).kind() == TypeKind::Len {
                ctx.len_target = fields
                    .and_then(|fs| fs.get(i).map(|f| len_target(self.target, fs, f)));
            }
            self.collect(val, ctx, base);
        }
    }

    fn collect(&mut self, val: &Value, ctx: ArgCtx, base: Option<usize>) {
        let nth = self.n;
        self.n += 1;
        let ty = val.ty(self.target);
        let (prio, stop) = value_prio(self.target, ty, val);
        if prio != NEVER_MUTATE && !ignored(ty, val.dir()) {
            self.sum += prio;
            self.prios.push(self.sum);
            self.args.push(ArgChoice { nth, base, ctx });
        }
        if stop {
            self.n += count_values(std::slice::from_ref(val)) - 1;
            return;
        }
        match ty.kind() {
            TypeKind::Ptr => {
                if let Some(pointee) = val.checked_as_ptr().pointee.as_ref() {
                    self.collect(pointee, ArgCtx::default(), Some(nth));
                }
            }
            TypeKind::Struct => {
                let fields = ty.checked_as_struct().fields();
                self.collect_fields(Some(fields), &val.checked_as_group().inner, base);
            }
            TypeKind::Array => self.collect_fields(None, &val.checked_as_group().inner, base),
            TypeKind::Union => {
                self.collect(&val.checked_as_union().option, ArgCtx::default(), base)
            }
            _ => (),
        }
    }
}

/// Output scalars and zero sized values are not worth mutating.
#[inline]
fn ignored(ty: &Type, dir: Dir) -> bool {
    (!ty.is_buffer() && ty.kind() != TypeKind::Array && dir == Dir::Out)
        || (!ty.varlen() && ty.size() == 0)
}

const NEVER_MUTATE: u64 = 0;
const MIN_PRIO: u64 = 1;
const MID_PRIO: u64 = 5;
const MAX_PRIO: u64 = 10;

/// Prio of mutating `val`, and whether its children should be skipped.
fn value_prio(target: &Target, ty: &Type, val: &Value) -> (u64, bool) {
    use TypeKind::*;

    match ty.kind() {
        Res | Vma | Proc => (MID_PRIO, false),
        Const | Csum => (NEVER_MUTATE, false),
        Len => (MIN_PRIO, false),
        Int => (int_prio(ty), false),
        Flags => {
            let flags_ty = ty.checked_as_flags();
            let mut prio = range_size_prio(flags_ty.vals().len() as u64);
            if flags_ty.bit_mask() {
                prio += 1;
            }
            (prio, false)
        }
        BufferBlob | BufferFilename => (8, false),
        BufferString => {
            let str_ty = ty.checked_as_buffer_string();
            if str_ty.vals().len() == 1 {
                (NEVER_MUTATE, false)
            } else {
                (8, false)
            }
        }
        Array => match ty.checked_as_array().range() {
            Some(r) if r.start() == r.end() => (NEVER_MUTATE, false),
            _ => (MAX_PRIO, false),
        },
        Ptr => {
            if val.checked_as_ptr().is_special() {
                (NEVER_MUTATE, false)
            } else {
                (3, false)
            }
        }
        Struct => {
            if target.special_gen(ty).is_some() {
                (MAX_PRIO, true)
            } else {
                (NEVER_MUTATE, false)
            }
        }
        Union => {
            if target.special_gen(ty).is_some() {
                (MAX_PRIO, true)
            } else if ty.checked_as_union().fields().len() > 1 {
                (MAX_PRIO, false)
            } else {
                (NEVER_MUTATE, false)
            }
        }
    }
}

fn int_prio(ty: &Type) -> u64 {
    let int_ty = ty.checked_as_int();
    let bit_sz = int_ty.bit_size();
    let plain = 64 - bit_sz.leading_zeros() as u64;
    match int_ty.range_size() {
        None | Some(0) => plain,
        Some(size) if size <= 15 => range_size_prio(size),
        Some(size) if size <= 256 => MAX_PRIO,
        Some(_) => plain,
    }
}

#[inline]
fn range_size_prio(size: u64) -> u64 {
    match size {
        0 => NEVER_MUTATE,
        1 => MIN_PRIO,
        _ => std::cmp::min(size / 3 + 4, 9),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{len::LenTarget, parse::parse_prog, target::test_target};

    #[test]
    fn collect_skips_const_and_out() {
        let target = test_target();
        let p = parse_prog(
            &target,
            "r0 = open(&(0x20000000)='./file0\\x00', 0x2, 0x0)\n\
             read(r0, &(0x20000040)=\"\"/0x10, 0x10)\n",
        )
        .unwrap();
        let (args, prios) = collect_args(&target, &p.calls()[0]);
        // ptr, filename, flags, mode
        assert_eq!(args.iter().map(|a| a.nth).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(prios.len(), 4);

        let (args, _) = collect_args(&target, &p.calls()[1]);
        // fd, ptr, out blob, len
        assert_eq!(args.len(), 4);
        assert_eq!(args[3].ctx.len_target, Some(LenTarget::Units(1)));
    }

    #[test]
    fn special_struct_children_are_skipped() {
        let target = test_target();
        let p = parse_prog(&target, "nanosleep(&(0x20000000)={0x0, 0x0})\n").unwrap();
        let (args, _) = collect_args(&target, &p.calls()[0]);
        assert_eq!(args.iter().map(|a| a.nth).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn calls_without_mutable_args_are_never_selected() {
        let target = test_target();
        let p = parse_prog(&target, "getpid()\nclose(0xffffffffffffffff)\n").unwrap();
        let mut rng = SmallRng::seed_from_u64(81);
        for _ in 0..32 {
            assert_eq!(select_call(&target, &mut rng, &p), Some(1));
        }
        let p = parse_prog(&target, "getpid()\n").unwrap();
        assert_eq!(select_call(&target, &mut rng, &p), None);
    }

    #[test]
    fn mutate_args_keeps_prog_valid() {
        let target = test_target();
        let ct = ChoiceTable::new(&target, None);
        let mut rng = SmallRng::seed_from_u64(82);
        let mut p = parse_prog(
            &target,
            "r0 = socket(0x2, 0x1, 0x0)\n\
             connect(r0, &(0x20000000)=@ipv4=0x100007f, 0x4)\n\
             bind$inet(r0, 0x0, &(0x20000040)={0x8, 0x0})\n",
        )
        .unwrap();
        for _ in 0..200 {
            mutate_call_args(&target, &ct, &mut rng, &mut p, 10);
            p.validate(&target);
            assert!(p.len() <= 10);
        }
    }
}
