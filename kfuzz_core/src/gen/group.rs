//! Generate value for `array`, `struct`, `union` type.
use crate::{
    context::Context,
    gen::{biased_rand, gen_ty_value},
    ty::{Dir, Type},
    value::{GroupValue, UnionValue, Value},
    RngType,
};
use rand::prelude::*;

/// Max length of arrays without range.
pub(crate) const MAX_ARRAY_LEN: u64 = 10;

pub fn gen_array(ctx: &mut Context, rng: &mut RngType, ty: &Type, dir: Dir) -> Value {
    let arr_ty = ty.checked_as_array();
    let len = match arr_ty.range() {
        Some(range) => rng.gen_range(range.clone()),
        None => rand_array_len(rng),
    };
    let elems = (0..len)
        .map(|_| gen_ty_value(ctx, rng, arr_ty.elem(), dir))
        .collect::<Vec<_>>();
    GroupValue::new(ty.id(), dir, elems).into()
}

/// Length of arrays without range, short ones are more likely.
pub(crate) fn rand_array_len(rng: &mut RngType) -> u64 {
    MAX_ARRAY_LEN - biased_rand(rng, MAX_ARRAY_LEN + 1, 10)
}

pub fn gen_struct(ctx: &mut Context, rng: &mut RngType, ty: &Type, dir: Dir) -> Value {
    if let Some(gen) = ctx.target().special_gen(ty) {
        return gen(ctx, rng, ty.id(), dir, None);
    }
    let struct_ty = ty.checked_as_struct();
    let mut fields = Vec::with_capacity(struct_ty.fields().len());
    for field in struct_ty.fields() {
        fields.push(gen_ty_value(ctx, rng, field.ty(), field.dir_or(dir)));
    }
    GroupValue::new(ty.id(), dir, fields).into()
}

pub fn gen_union(ctx: &mut Context, rng: &mut RngType, ty: &Type, dir: Dir) -> Value {
    if let Some(gen) = ctx.target().special_gen(ty) {
        return gen(ctx, rng, ty.id(), dir, None);
    }
    let union_ty = ty.checked_as_union();
    let idx = rng.gen_range(0..union_ty.fields().len());
    let field = &union_ty.fields()[idx];
    let option = gen_ty_value(ctx, rng, field.ty(), field.dir_or(dir));
    UnionValue::new(ty.id(), dir, idx as u64, option).into()
}
