//! Generate value for `resource` type.
use crate::{
    context::Context,
    gen::gen_syscall,
    ty::{Dir, ResType, Type},
    value::{ResId, ResValue, Value, Visit},
    RngType,
};
use rand::prelude::*;

/// Max depth of producer calls generated for a resource.
const MAX_RES_DEPTH: usize = 2;

pub fn gen_res(ctx: &mut Context, rng: &mut RngType, ty: &Type, dir: Dir) -> Value {
    let res_ty = ty.checked_as_res();

    if dir == Dir::Out {
        let id = ctx.next_res_id();
        return ResValue::new_res(ty.id(), id, res_ty.default_val()).into();
    }

    if rng.gen_ratio(1000, 1011) {
        if let Some(src) = reuse_res(ctx, rng, res_ty) {
            return new_consumer(ctx, ty, dir, src);
        }
    }
    if rng.gen_ratio(10, 11) && ctx.res_depth < MAX_RES_DEPTH {
        if let Some(src) = create_res(ctx, rng, res_ty) {
            return new_consumer(ctx, ty, dir, src);
        }
    }

    let val = res_ty.special_vals().choose(rng).copied().unwrap_or(0);
    let id = ctx.next_res_id();
    ResValue::new_null(ty.id(), dir, id, val).into()
}

fn new_consumer(ctx: &mut Context, ty: &Type, dir: Dir, src: ResId) -> Value {
    let id = ctx.next_res_id();
    ResValue::new_ref(ty.id(), dir, id, src).into()
}

/// Pick a compatible resource produced by previous calls.
fn reuse_res(ctx: &mut Context, rng: &mut RngType, ty: &ResType) -> Option<ResId> {
    let target = ctx.target();
    let res_ids = ctx.res_ids();
    let candidates = ctx
        .res()
        .iter()
        .filter(|kind| target.res_compatible(ty, kind))
        .flat_map(|kind| res_ids[kind].iter().copied())
        .collect::<Vec<_>>();
    candidates.choose(rng).copied()
}

/// Generate a call producing `ty` in front of the current one.
fn create_res(ctx: &mut Context, rng: &mut RngType, ty: &ResType) -> Option<ResId> {
    let target = ctx.target();
    let choice = ctx.choice();
    let candidates = target
        .res_output_syscall(ty.res_name())
        .iter()
        .copied()
        .filter(|&sid| choice.enabled(sid))
        .collect::<Vec<_>>();
    let sid = candidates.choose(rng).copied()?;
    debug_info!("generating producer of {}: {}", ty.res_name(), target.syscall_of(sid).name());

    let ncalls = ctx.calls().len();
    ctx.res_depth += 1;
    gen_syscall(ctx, rng, sid);
    ctx.res_depth -= 1;

    let mut produced = Vec::new();
    for call in &ctx.calls()[ncalls..] {
        call.foreach_value(|v| {
            if let Some(r) = v.as_res() {
                let kind = v.ty(target).checked_as_res().res_name();
                if r.is_producer() && target.res_compatible(ty, kind) {
                    produced.push(r.id);
                }
            }
            Visit::Continue
        });
    }
    produced.choose(rng).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{select::ChoiceTable, target::test_target};

    #[test]
    fn consumers_refer_to_producers() {
        let target = test_target();
        let ct = ChoiceTable::new(&target, None);
        let mut ctx = Context::new(&target, &ct);
        let sock = target.ty_of_name("sock").unwrap();
        let mut rng = SmallRng::seed_from_u64(31);
        let mut refs = 0;
        for _ in 0..32 {
            let v = gen_res(&mut ctx, &mut rng, sock, Dir::In);
            let r = v.checked_as_res();
            if let Some(src) = r.src {
                refs += 1;
                assert!(ctx.res_ids()["sock"].contains(&src));
            }
        }
        assert!(refs > 0);
        assert!(!ctx.calls().is_empty());
        assert!(ctx.calls().iter().all(|c| ct.enabled(c.sid())));
    }

    #[test]
    fn out_res_is_producer() {
        let target = test_target();
        let ct = ChoiceTable::new(&target, None);
        let mut ctx = Context::new(&target, &ct);
        let fd = target.ty_of_name("fd").unwrap();
        let mut rng = SmallRng::seed_from_u64(32);
        let v = gen_res(&mut ctx, &mut rng, fd, Dir::Out);
        assert!(v.checked_as_res().is_producer());
        assert!(ctx.calls().is_empty());
    }
}
