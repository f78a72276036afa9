//! Prog generation.
use self::{
    buffer::{gen_buffer_blob, gen_buffer_filename, gen_buffer_string},
    group::{gen_array, gen_struct, gen_union},
    int::{gen_const, gen_csum, gen_flags, gen_int, gen_len, gen_proc},
    ptr::{gen_ptr, gen_vma},
    res::gen_res,
};
use crate::{
    context::Context,
    len::assign_sizes_call,
    prog::{CallBuilder, Prog},
    select::ChoiceTable,
    syscall::SyscallId,
    target::Target,
    ty::{Dir, Type, TypeId, TypeKind},
    value::{DataValue, GroupValue, IntegerValue, PtrValue, ResValue, UnionValue, Value, VmaValue},
    RngType,
};
use rand::prelude::*;

pub mod buffer;
pub mod group;
pub mod int;
pub mod ptr;
pub mod res;

/// Generate prog based on `target` and `choice`, with at most `ncalls` calls.
pub fn gen_prog(target: &Target, choice: &ChoiceTable, rng: &mut RngType, ncalls: usize) -> Prog {
    let mut ctx = Context::new(target, choice);
    while ctx.calls().len() < ncalls {
        gen_call(&mut ctx, rng);
    }
    debug_info!("Context:\n{}", ctx);
    let mut p = ctx.to_prog();
    // producers generated for the last call may exceed the limit
    while p.len() > ncalls {
        p.remove_call_inplace(p.len() - 1);
    }
    p.debug_validate(target);
    p
}

/// Add a syscall to `context`, biased by one of the calls generated so far.
#[inline]
pub fn gen_call(ctx: &mut Context, rng: &mut RngType) {
    let bias = ctx.calls().choose(rng).map(|c| c.sid());
    let sid = ctx.choice().choose(rng, bias);
    gen_syscall(ctx, rng, sid)
}

/// Generate syscall `sid` to `context`.
///
/// Producers of the resources it needs may be generated before it.
pub fn gen_syscall(ctx: &mut Context, rng: &mut RngType, sid: SyscallId) {
    let target = ctx.target();
    let syscall = target.syscall_of(sid);
    debug_info!("generating: {}", syscall.name());
    let mut args = Vec::with_capacity(syscall.params().len());
    for param in syscall.params() {
        args.push(gen_ty_value(ctx, rng, param.ty(), param.dir_or(Dir::In)));
    }
    let ret = syscall.ret().map(|tid| {
        let ty = target.ty_of(tid).checked_as_res();
        let id = ctx.next_res_id();
        ResValue::new_res(tid, id, ty.default_val()).into()
    });
    let mut call = CallBuilder::new(sid).args(args).ret(ret).build();
    assign_sizes_call(target, &mut call);
    ctx.append_call(call);
}

pub type Generator = fn(&mut Context, &mut RngType, &Type, Dir) -> Value;
pub const GENERATOR: [Generator; 15] = [
    gen_res,
    gen_const,
    gen_int,
    gen_flags,
    gen_len,
    gen_proc,
    gen_csum,
    gen_vma,
    gen_buffer_blob,
    gen_buffer_string,
    gen_buffer_filename,
    gen_array,
    gen_ptr,
    gen_struct,
    gen_union,
];

/// Generate a value of type `tid`.
pub fn gen_ty_value(ctx: &mut Context, rng: &mut RngType, tid: TypeId, dir: Dir) -> Value {
    use TypeKind::*;

    let ty = ctx.target().ty_of(tid);
    // output scalars are never interesting, resources are kept for later calls.
    if dir == Dir::Out && matches!(ty.kind(), Const | Int | Flags | Proc | Vma | Res) {
        default_value(ctx, tid, dir)
    } else if ty.optional() && rng.gen_ratio(1, 5) {
        if let Some(res_ty) = ty.as_res() {
            let val = res_ty.special_vals().choose(rng).copied().unwrap_or(0);
            let id = ctx.next_res_id();
            return ResValue::new_null(tid, dir, id, val).into();
        }
        default_value(ctx, tid, dir)
    } else {
        GENERATOR[ty.kind() as usize](ctx, rng, ty, dir)
    }
}

/// The simplest value of type `tid`.
pub fn default_value(ctx: &mut Context, tid: TypeId, dir: Dir) -> Value {
    let target = ctx.target();
    let ty = target.ty_of(tid);
    match ty.kind() {
        TypeKind::Res => {
            let res_ty = ty.checked_as_res();
            let id = ctx.next_res_id();
            if dir == Dir::Out {
                ResValue::new_res(tid, id, res_ty.default_val()).into()
            } else {
                ResValue::new_null(tid, dir, id, res_ty.default_val()).into()
            }
        }
        TypeKind::Const => IntegerValue::new(tid, dir, ty.checked_as_const().const_val()).into(),
        TypeKind::Int => {
            let val = ty
                .checked_as_int()
                .range()
                .map(|r| if r.contains(&0) { 0 } else { *r.start() })
                .unwrap_or(0);
            IntegerValue::new(tid, dir, val).into()
        }
        TypeKind::Flags | TypeKind::Len | TypeKind::Proc | TypeKind::Csum => {
            IntegerValue::new(tid, dir, 0).into()
        }
        TypeKind::Vma => VmaValue::new_special(tid, dir, 0).into(),
        TypeKind::Ptr => PtrValue::new_special(tid, dir, 0).into(),
        TypeKind::BufferBlob | TypeKind::BufferString | TypeKind::BufferFilename => {
            let len = default_data_len(ty);
            if dir == Dir::Out {
                DataValue::new_out_data(tid, dir, len).into()
            } else {
                let data = ty
                    .as_buffer_string()
                    .and_then(|s| s.vals().first())
                    .map(|v| v.to_vec())
                    .unwrap_or_else(|| vec![0; len as usize]);
                DataValue::new(tid, dir, data).into()
            }
        }
        TypeKind::Array => {
            let arr = ty.checked_as_array();
            let len = arr.range().map(|r| *r.start()).unwrap_or(0);
            let elems = (0..len)
                .map(|_| default_value(ctx, arr.elem(), dir))
                .collect();
            GroupValue::new(tid, dir, elems).into()
        }
        TypeKind::Struct => {
            let fields = ty
                .checked_as_struct()
                .fields()
                .iter()
                .map(|f| default_value(ctx, f.ty(), f.dir_or(dir)))
                .collect();
            GroupValue::new(tid, dir, fields).into()
        }
        TypeKind::Union => {
            let field = &ty.checked_as_union().fields()[0];
            let option = default_value(ctx, field.ty(), field.dir_or(dir));
            UnionValue::new(tid, dir, 0, option).into()
        }
    }
}

fn default_data_len(ty: &Type) -> u64 {
    if !ty.varlen() {
        return ty.size();
    }
    if let Some(s) = ty.as_buffer_string() {
        return s.vals().first().map(|v| v.len() as u64).unwrap_or(0);
    }
    ty.as_buffer_blob()
        .and_then(|b| b.range())
        .map(|r| *r.start())
        .unwrap_or(0)
}

/// Return chosen index based on `weights`.
///
/// Weight is accumulated value. For example, [10, 35, 50] means each item has
/// 10%, 25%, 15% to be chosen. Items of zero weight are never chosen.
pub(crate) fn choose_weighted(rng: &mut RngType, weights: &[u64]) -> usize {
    let max = weights[weights.len() - 1];
    let n = rng.gen_range(0..max);
    weights.partition_point(|&w| w <= n)
}

/// Random number in `[0, n)`, `n - 1` is `k` times as likely as 0.
pub fn biased_rand(rng: &mut RngType, n: u64, k: u64) -> u64 {
    let (nf, kf) = (n as f64, k as f64);
    let rf = nf * (kf / 2.0 + 1.0) * rng.gen::<f64>();
    let bf = (-1.0 + (1.0 + 2.0 * kf * rf / nf).sqrt()) * nf / kf;
    std::cmp::min(bf as u64, n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::test_target;

    #[test]
    fn choose_weighted() {
        let mut rng = SmallRng::from_entropy();
        let weight = [100];
        assert_eq!(super::choose_weighted(&mut rng, &weight), 0);
        let weights = [10, 20, 100];
        for _ in 0..10 {
            let idx = super::choose_weighted(&mut rng, &weights);
            assert!(idx < weights.len());
        }
        let weights = [0, 5, 5, 8];
        for _ in 0..100 {
            let idx = super::choose_weighted(&mut rng, &weights);
            assert!(idx == 1 || idx == 3);
        }
    }

    #[test]
    fn biased_rand_in_range() {
        let mut rng = SmallRng::seed_from_u64(11);
        let mut small = 0;
        for _ in 0..10000 {
            let v = biased_rand(&mut rng, 10, 5);
            assert!(v < 10);
            if v < 5 {
                small += 1;
            }
        }
        assert!(small < 5000);
    }

    #[test]
    fn gen_prog_respects_len() {
        let target = test_target();
        let ct = ChoiceTable::new(&target, None);
        let mut rng = SmallRng::seed_from_u64(17);
        for len in 1..32 {
            let p = gen_prog(&target, &ct, &mut rng, len);
            assert!(p.len() <= len);
            assert!(!p.is_empty());
            p.validate(&target);
        }
    }

    #[test]
    fn default_values_are_valid() {
        let target = test_target();
        let ct = ChoiceTable::new(&target, None);
        let mut ctx = Context::new(&target, &ct);
        for sid in target.enabled_syscalls() {
            let syscall = target.syscall_of(sid);
            let args = syscall
                .params()
                .iter()
                .map(|f| default_value(&mut ctx, f.ty(), f.dir_or(Dir::In)))
                .collect::<Vec<_>>();
            let ret = syscall.ret().map(|tid| default_value(&mut ctx, tid, Dir::Out));
            let call = CallBuilder::new(sid).args(args).ret(ret).build();
            ctx.append_call(call);
        }
        ctx.to_prog().validate(&target);
    }
}
