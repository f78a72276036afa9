//! Mutate value of `integer` like types.
use super::{ArgCtx, ArgMutation};
use crate::{
    context::Context,
    gen::{
        biased_rand,
        int::{gen_int, gen_proc, rand_flags, rand_int64, rand_range_int, truncate},
    },
    len::LenTarget,
    ty::IntType,
    value::Value,
    RngType,
};
use rand::prelude::*;

pub fn mutate_int(
    ctx: &mut Context,
    rng: &mut RngType,
    val: &mut Value,
    _arg_ctx: &ArgCtx,
) -> ArgMutation {
    let ty = val.ty(ctx.target());
    if rng.gen() {
        let new_val = gen_int(ctx, rng, ty, val.dir());
        debug_info!(
            "mutate_int(gen): {:#x} -> {:#x}",
            val.checked_as_int().val,
            new_val.checked_as_int().val
        );
        *val = new_val;
        return ArgMutation::Changed;
    }

    let int_ty = ty.checked_as_int();
    let val = val.checked_as_int_mut();
    let new_val = if int_ty.val_align() == 0 {
        nudge(rng, val.val, int_ty.bit_size())
    } else {
        nudge_aligned(rng, val.val, int_ty)
    };
    let new_val = truncate(new_val, int_ty.bit_size());
    debug_info!("mutate_int: {:#x} -> {:#x}", val.val, new_val);
    val.val = new_val;
    ArgMutation::Changed
}

/// Add or sub a small value, or flip one bit.
fn nudge(rng: &mut RngType, old: u64, bit_sz: u64) -> u64 {
    if rng.gen_ratio(1, 3) {
        old.wrapping_add(rng.gen_range(1..=4))
    } else if rng.gen_ratio(1, 2) {
        old.wrapping_sub(rng.gen_range(1..=4))
    } else {
        old ^ (1 << rng.gen_range(0..std::cmp::max(bit_sz, 1)))
    }
}

/// Nudge the index of `old` in the aligned range, wrapping within the range.
fn nudge_aligned(rng: &mut RngType, old: u64, ty: &IntType) -> u64 {
    let (start, mut end) = ty
        .range()
        .map(|r| (*r.start(), *r.end()))
        .unwrap_or((0, u64::MAX));
    if start == 0 && end == u64::MAX {
        end = truncate(u64::MAX, ty.bit_size());
    }
    let align = ty.val_align();
    let index = old.wrapping_sub(start) / align;
    let miss = old.wrapping_sub(start) % align;
    let mut index = nudge(rng, index, ty.bit_size());
    let last_index = end.wrapping_sub(start) / align;
    if last_index != u64::MAX {
        index %= last_index + 1;
    }
    start
        .wrapping_add(index.wrapping_mul(align))
        .wrapping_add(miss)
}

pub fn mutate_flags(
    ctx: &mut Context,
    rng: &mut RngType,
    val: &mut Value,
    _arg_ctx: &ArgCtx,
) -> ArgMutation {
    let ty = val.ty(ctx.target()).checked_as_flags();
    let val = val.checked_as_int_mut();
    let old = val.val;
    let mut new_val = old;
    let mut tries = 0;
    while new_val == old && tries < 128 {
        new_val = truncate(rand_flags(rng, ty.vals(), ty.bit_mask(), old), ty.bit_size());
        tries += 1;
    }
    debug_info!("mutate_flags: {:#x} -> {:#x}", old, new_val);
    val.val = new_val;
    if new_val == old {
        ArgMutation::Retry
    } else {
        ArgMutation::Changed
    }
}

/// Mutate a len field, provoking missed size checks and overflows.
///
/// Sizes are kept as is after this.
pub fn mutate_len(
    ctx: &mut Context,
    rng: &mut RngType,
    val: &mut Value,
    arg_ctx: &ArgCtx,
) -> ArgMutation {
    let elem_size = match arg_ctx.len_target {
        Some(LenTarget::Units(sz)) => std::cmp::max(sz, 1),
        _ => return ArgMutation::Retry,
    };
    let bit_sz = val.ty(ctx.target()).checked_as_len().bit_size();
    let val = val.checked_as_int_mut();
    let old = val.val;
    val.val = mutate_size(rng, old, elem_size, bit_sz);
    debug_info!("mutate_len: {:#x} -> {:#x}", old, val.val);
    ArgMutation::Preserve
}

fn mutate_size(rng: &mut RngType, old: u64, elem_size: u64, bit_sz: u64) -> u64 {
    if rng.gen_ratio(1, 100) {
        return rand_int64(rng);
    }
    if rng.gen() {
        // small adjustment to trigger missed size checks
        return if old != 0 && rng.gen() {
            rand_range_int(rng, 0, old - 1, bit_sz, 0)
        } else {
            rand_range_int(rng, old.saturating_add(1), old.saturating_add(100), bit_sz, 0)
        };
    }
    // try to provoke int overflows
    let mut max = u64::MAX;
    if rng.gen_ratio(1, 3) {
        max = (1 << 32) - 1;
        if rng.gen() {
            max = (1 << 16) - 1;
            if rng.gen() {
                max = (1 << 8) - 1;
            }
        }
    }
    let n = max / elem_size;
    let delta = 1000 - biased_rand(rng, 1000, 10);
    if elem_size == 1 || rng.gen_ratio(1, 10) {
        n.wrapping_sub(delta)
    } else {
        n.wrapping_add(delta)
    }
}

pub fn mutate_proc(
    ctx: &mut Context,
    rng: &mut RngType,
    val: &mut Value,
    _arg_ctx: &ArgCtx,
) -> ArgMutation {
    let ty = val.ty(ctx.target());
    let new_val = gen_proc(ctx, rng, ty, val.dir());
    debug_info!(
        "mutate_proc: {:#x} -> {:#x}",
        val.checked_as_int().val,
        new_val.checked_as_int().val
    );
    *val = new_val;
    ArgMutation::Changed
}

pub fn mutate_const(
    ctx: &mut Context,
    _rng: &mut RngType,
    val: &mut Value,
    _arg_ctx: &ArgCtx,
) -> ArgMutation {
    panic!("mutating const value: {}", val.ty(ctx.target()))
}

pub fn mutate_csum(
    ctx: &mut Context,
    _rng: &mut RngType,
    val: &mut Value,
    _arg_ctx: &ArgCtx,
) -> ArgMutation {
    panic!("mutating checksum value: {}", val.ty(ctx.target()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{select::ChoiceTable, target::test_target, ty::Dir, value::IntegerValue};

    #[test]
    fn aligned_int_stays_aligned() {
        let target = test_target();
        let ty = target.ty_of_name("int16_aligned").unwrap().checked_as_int();
        let mut rng = SmallRng::seed_from_u64(61);
        for _ in 0..1000 {
            let v = nudge_aligned(&mut rng, 0x40, ty);
            assert_eq!(v % 4, 0);
            assert!(v <= 0x100);
        }
    }

    #[test]
    fn flags_always_change() {
        let target = test_target();
        let ct = ChoiceTable::new(&target, None);
        let mut ctx = Context::new(&target, &ct);
        let ty = target.ty_of_name("mmap_prot").unwrap().id();
        let mut rng = SmallRng::seed_from_u64(62);
        for _ in 0..100 {
            let mut v: Value = IntegerValue::new(ty, Dir::In, 2).into();
            let r = mutate_flags(&mut ctx, &mut rng, &mut v, &ArgCtx::default());
            assert_eq!(r, ArgMutation::Changed);
            assert_ne!(v.checked_as_int().val, 2);
        }
    }

    #[test]
    fn len_of_vma_is_not_mutated() {
        let target = test_target();
        let ct = ChoiceTable::new(&target, None);
        let mut ctx = Context::new(&target, &ct);
        let ty = target.ty_of_name("len_vma").unwrap().id();
        let mut rng = SmallRng::seed_from_u64(63);
        let mut v: Value = IntegerValue::new(ty, Dir::In, 0x1000).into();
        let arg_ctx = ArgCtx {
            len_target: Some(LenTarget::Vma),
        };
        assert_eq!(mutate_len(&mut ctx, &mut rng, &mut v, &arg_ctx), ArgMutation::Retry);
        let arg_ctx = ArgCtx {
            len_target: Some(LenTarget::Units(4)),
        };
        assert_eq!(mutate_len(&mut ctx, &mut rng, &mut v, &arg_ctx), ArgMutation::Preserve);
    }
}
