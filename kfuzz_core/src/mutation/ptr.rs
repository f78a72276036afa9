//! Mutate value of `ptr`, `vma` type.
use super::{ArgCtx, ArgMutation};
use crate::{
    context::Context,
    gen::ptr::gen_vma,
    value::{PtrValue, Value},
    RngType,
};
use rand::Rng;

pub fn mutate_ptr(
    ctx: &mut Context,
    rng: &mut RngType,
    val: &mut Value,
    _arg_ctx: &ArgCtx,
) -> ArgMutation {
    let target = ctx.target();
    if !target.special_ptrs().is_empty() && rng.gen_ratio(1, 1000) {
        let index = rng.gen_range(0..target.special_ptrs().len()) as u64;
        debug_info!("mutate_ptr: special pointer {}", index);
        *val = PtrValue::new_special(val.ty_id(), val.dir(), index).into();
        return ArgMutation::Changed;
    }

    let align = target.ty_of(val.ty(target).checked_as_ptr().elem()).align();
    let ptr = val.checked_as_ptr_mut();
    let size = match ptr.pointee.as_ref() {
        Some(pointee) => pointee.size(target),
        None => return ArgMutation::Retry,
    };
    let addr = ctx.mem_allocator().alloc(size, align);
    debug_info!("mutate_ptr: addr {:#x} -> {:#x}", ptr.addr, addr);
    ptr.addr = addr;
    ArgMutation::Changed
}

pub fn mutate_vma(
    ctx: &mut Context,
    rng: &mut RngType,
    val: &mut Value,
    _arg_ctx: &ArgCtx,
) -> ArgMutation {
    let ty = val.ty(ctx.target());
    let new_val = gen_vma(ctx, rng, ty, val.dir());
    *val = new_val;
    ArgMutation::Changed
}
