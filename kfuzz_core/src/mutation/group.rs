//! Mutate value of `array`, `struct`, `union` type.
use super::{ArgCtx, ArgMutation};
use crate::{
    context::Context,
    gen::{gen_ty_value, group::rand_array_len},
    value::{UnionValue, Value},
    RngType,
};
use rand::prelude::*;

pub fn mutate_array(
    ctx: &mut Context,
    rng: &mut RngType,
    val: &mut Value,
    _arg_ctx: &ArgCtx,
) -> ArgMutation {
    let ty = val.ty(ctx.target()).checked_as_array();
    let dir = val.dir();
    let val = val.checked_as_group_mut();
    let old_len = val.inner.len() as u64;

    let mut new_len = old_len;
    let mut tries = 0;
    match ty.range() {
        Some(r) => {
            assert_ne!(r.start(), r.end(), "mutating fixed length array");
            while new_len == old_len && tries < 128 {
                new_len = rng.gen_range(r.clone());
                tries += 1;
            }
        }
        None if rng.gen() => {
            // grow without bound
            while rng.gen() {
                new_len += 1;
            }
        }
        None => {
            while new_len == old_len && tries < 128 {
                new_len = rand_array_len(rng);
                tries += 1;
            }
        }
    }
    debug_info!("mutate_array: len {} -> {}", old_len, new_len);

    if new_len > old_len {
        for _ in old_len..new_len {
            let elem = gen_ty_value(ctx, rng, ty.elem(), dir);
            val.inner.push(elem);
        }
    } else {
        val.inner.truncate(new_len as usize);
    }
    ArgMutation::Changed
}

pub fn mutate_struct(
    ctx: &mut Context,
    rng: &mut RngType,
    val: &mut Value,
    _arg_ctx: &ArgCtx,
) -> ArgMutation {
    let ty = val.ty(ctx.target());
    let gen = match ctx.target().special_gen(ty) {
        Some(gen) => gen,
        None => panic!("mutating plain struct: {}", ty),
    };
    let new_val = gen(ctx, rng, ty.id(), val.dir(), Some(&*val));
    *val = new_val;
    ArgMutation::Changed
}

pub fn mutate_union(
    ctx: &mut Context,
    rng: &mut RngType,
    val: &mut Value,
    _arg_ctx: &ArgCtx,
) -> ArgMutation {
    let ty = val.ty(ctx.target());
    if let Some(gen) = ctx.target().special_gen(ty) {
        let new_val = gen(ctx, rng, ty.id(), val.dir(), Some(&*val));
        *val = new_val;
        return ArgMutation::Changed;
    }

    let union_ty = ty.checked_as_union();
    if union_ty.fields().len() <= 1 {
        return ArgMutation::Retry;
    }
    let dir = val.dir();
    let old_index = val.checked_as_union().index as usize;
    let mut new_index = rng.gen_range(0..union_ty.fields().len() - 1);
    if new_index >= old_index {
        new_index += 1;
    }
    let field = &union_ty.fields()[new_index];
    let option = gen_ty_value(ctx, rng, field.ty(), field.dir_or(dir));
    debug_info!("mutate_union: option {} -> {}", old_index, new_index);
    *val = UnionValue::new(ty.id(), dir, new_index as u64, option).into();
    ArgMutation::Changed
}
