//! Generate value for `ptr`, `vma` type.
use crate::{
    context::Context,
    gen::gen_ty_value,
    target::Target,
    ty::{Dir, Type, TypeKind},
    value::{PtrValue, Value, VmaValue},
    RngType,
};
use rand::prelude::*;

/// Max recursion depth of optional pointers to the same complex type.
const MAX_REC_DEPTH: usize = 2;

pub fn gen_ptr(ctx: &mut Context, rng: &mut RngType, ty: &Type, dir: Dir) -> Value {
    use TypeKind::*;

    let ptr_ty = ty.checked_as_ptr();
    let target = ctx.target();
    let elem_ty = target.ty_of(ptr_ty.elem());
    let mut rec = None;

    if ty.optional() && matches!(elem_ty.kind(), Struct | Union | Array) {
        let depth = ctx.rec_depth.entry(elem_ty.id()).or_insert(0);
        if *depth >= MAX_REC_DEPTH {
            return PtrValue::new_special(ty.id(), dir, 0).into();
        }
        *depth += 1;
        rec = Some(elem_ty.id());
    }

    let val = if !target.special_ptrs().is_empty() && rng.gen_ratio(1, 1000) {
        let index = rng.gen_range(0..target.special_ptrs().len());
        PtrValue::new_special(ty.id(), dir, index as u64)
    } else {
        let elem_val = gen_ty_value(ctx, rng, elem_ty.id(), ptr_ty.dir());
        let addr = ctx
            .mem_allocator()
            .alloc(elem_val.size(target), elem_ty.align());
        PtrValue::new(ty.id(), dir, addr, elem_val)
    };

    if let Some(tid) = rec {
        if let Some(depth) = ctx.rec_depth.get_mut(&tid) {
            *depth -= 1;
            if *depth == 0 {
                ctx.rec_depth.remove(&tid);
            }
        }
    }
    val.into()
}

pub fn gen_vma(ctx: &mut Context, rng: &mut RngType, ty: &Type, dir: Dir) -> Value {
    let target = ctx.target();
    let vma_ty = ty.checked_as_vma();
    let npages = match vma_ty.range() {
        Some(range) => rng.gen_range(range.clone()),
        None => rand_page_count(target, rng),
    };
    let npages = std::cmp::max(std::cmp::min(npages, target.page_num()), 1);
    let page = ctx.vma_allocator().alloc(rng, npages);
    VmaValue::new(
        ty.id(),
        dir,
        page * target.page_sz(),
        npages * target.page_sz(),
    )
    .into()
}

/// Number of pages of a vma without range, mostly small.
fn rand_page_count(target: &Target, rng: &mut RngType) -> u64 {
    if rng.gen_ratio(100, 106) {
        rng.gen_range(1..=4)
    } else if rng.gen_ratio(5, 6) {
        rng.gen_range(1..=20)
    } else {
        (rng.gen_range(0..3) + 1) * target.page_num() / 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{select::ChoiceTable, target::test_target};

    #[test]
    fn vma_in_data_area() {
        let target = test_target();
        let ct = ChoiceTable::new(&target, None);
        let mut ctx = Context::new(&target, &ct);
        let ty = target.ty_of_name("vma").unwrap();
        let mut rng = SmallRng::seed_from_u64(21);
        for _ in 0..64 {
            let v = gen_vma(&mut ctx, &mut rng, ty, Dir::In);
            let v = v.checked_as_vma();
            assert!(v.vma_size >= target.page_sz() && v.vma_size <= 4 * target.page_sz());
            assert!(v.addr + v.vma_size <= target.page_num() * target.page_sz());
        }
    }

    #[test]
    fn optional_ptr_recursion_is_bounded() {
        let target = test_target();
        let ct = ChoiceTable::new(&target, None);
        let mut ctx = Context::new(&target, &ct);
        let ty = target.ty_of_name("ptr_hdr").unwrap();
        let hdr = target.ty_of_name("hdr").unwrap().id();
        ctx.rec_depth.insert(hdr, MAX_REC_DEPTH);
        let mut rng = SmallRng::seed_from_u64(22);
        let v = gen_ptr(&mut ctx, &mut rng, ty, Dir::In);
        assert!(v.checked_as_ptr().is_special());

        ctx.rec_depth.clear();
        let v = gen_ptr(&mut ctx, &mut rng, ty, Dir::In);
        assert!(ctx.rec_depth.is_empty());
        if let Some(pointee) = v.checked_as_ptr().pointee.as_ref() {
            assert_eq!(pointee.ty_id(), hdr);
        }
    }
}
