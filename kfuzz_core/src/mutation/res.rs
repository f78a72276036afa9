//! Mutate value of `resource` type.
use super::{ArgCtx, ArgMutation};
use crate::{context::Context, gen::res::gen_res, value::Value, RngType};

/// Regenerate a resource, producers of it may be created in front of the call.
pub fn mutate_res(
    ctx: &mut Context,
    rng: &mut RngType,
    val: &mut Value,
    _arg_ctx: &ArgCtx,
) -> ArgMutation {
    let ty = val.ty(ctx.target());
    let mut new_val = gen_res(ctx, rng, ty, val.dir());
    let old = val.checked_as_res();
    if old.is_producer() {
        // consumers of an inout resource are kept
        new_val.checked_as_res_mut().id = old.id;
    }
    debug_info!(
        "mutate_res: {} -> {}",
        val.display(ctx.target()),
        new_val.display(ctx.target())
    );
    *val = new_val;
    ArgMutation::Changed
}
