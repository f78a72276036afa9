//! Prog mutation.
use crate::{
    context::Context,
    corpus::CorpusWrapper,
    len::LenTarget,
    prog::Prog,
    select::ChoiceTable,
    target::Target,
    ty::Dir,
    value::{foreach_value, nth_value, nth_value_mut, DataValue, Value, ValueKind, Visit},
    RngType,
};
use rand::prelude::*;

pub mod buffer;
pub mod call;
pub mod group;
pub mod int;
pub mod ptr;
pub mod res;
pub mod seq;

use buffer::{mutate_data, MAX_BLOB_LEN};
use call::{mutate_call_args, realloc_if_grown};
use seq::{insert_call, remove_call, splice};

/// Outcome of mutating one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgMutation {
    /// Nothing changed, pick another value.
    Retry,
    /// Changed, len fields of the call should be recalculated.
    Changed,
    /// Changed, len fields of the call should be kept as is.
    Preserve,
}

/// Extra information of the value being mutated.
#[derive(Debug, Clone, Default)]
pub struct ArgCtx {
    /// What the value measures, for len values.
    pub len_target: Option<LenTarget>,
}

/// Counters of applied operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutateStats {
    pub squash: u64,
    pub splice: u64,
    pub insert_call: u64,
    pub mutate_arg: u64,
    pub remove_call: u64,
}

impl MutateStats {
    #[inline]
    pub fn mutated(&self) -> bool {
        self.squash + self.splice + self.insert_call + self.mutate_arg + self.remove_call != 0
    }
}

/// Mutate prog `p` in place, keeping at most `ncalls` calls.
pub fn mutate(
    target: &Target,
    choice: &ChoiceTable,
    corpus: &CorpusWrapper,
    rng: &mut RngType,
    p: &mut Prog,
    ncalls: usize,
) -> MutateStats {
    let mut stats = MutateStats::default();
    let mut tries = 0;
    let mut stop = false;
    while !stop && tries < 128 {
        tries += 1;
        let ok = if rng.gen_ratio(1, 5) {
            let ok = squash_any(target, choice, rng, p);
            stats.squash += ok as u64;
            ok
        } else if rng.gen_ratio(1, 100) {
            let ok = splice(corpus, rng, p, ncalls);
            stats.splice += ok as u64;
            ok
        } else if rng.gen_ratio(20, 31) {
            let ok = insert_call(target, choice, rng, p, ncalls);
            stats.insert_call += ok as u64;
            ok
        } else if rng.gen_ratio(10, 11) {
            let ok = mutate_call_args(target, choice, rng, p, ncalls);
            stats.mutate_arg += ok as u64;
            ok
        } else {
            let ok = remove_call(rng, p);
            stats.remove_call += ok as u64;
            ok
        };
        stop = ok && !p.is_empty() && rng.gen_ratio(1, 3);
    }
    debug_info!("mutate: {:?}", stats);
    p.debug_validate(target);
    stats
}

/// Collapse the pointee of a random complex pointer into a blob and mutate the blob.
pub fn squash_any(target: &Target, choice: &ChoiceTable, rng: &mut RngType, p: &mut Prog) -> bool {
    let ptrs = complex_ptrs(target, p);
    let (idx, nth) = match ptrs.choose(rng) {
        Some(&ptr) => ptr,
        None => return false,
    };
    let pointee = match nth_value(p.calls()[idx].args(), nth).and_then(|v| v.as_ptr()) {
        Some(ptr) => match ptr.pointee.as_ref() {
            Some(pointee) => pointee,
            None => return false,
        },
        None => return false,
    };
    let old_size = pointee.size(target);
    let dir = pointee.dir();
    let mut data = if pointee.ty_id() == target.any_blob() {
        pointee.checked_as_data().data.clone()
    } else {
        let mut buf = Vec::new();
        pointee.byte_image(target, &mut buf);
        buf
    };
    mutate_data(rng, &mut data, 0, MAX_BLOB_LEN);
    debug_info!("squash_any: call-{} value-{}, {} bytes", idx, nth, data.len());
    let blob: Value = DataValue::new(target.any_blob(), dir, data).into();

    let mut ctx = Context::for_prog(target, choice, p, idx);
    p.edit_call(idx, |call| {
        if let Some(ptr) = nth_value_mut(call.args_mut(), nth).and_then(|v| v.as_ptr_mut()) {
            ptr.pointee = Some(Box::new(blob));
        }
        realloc_if_grown(&mut ctx, call.args_mut(), nth, old_size);
    });
    true
}

/// Pointers whose pointee can be squashed, as `(call index, value index)`.
///
/// The pointee must be a struct, union or array holding no pointers and resources, or
/// an already squashed blob.
pub fn complex_ptrs(target: &Target, p: &Prog) -> Vec<(usize, usize)> {
    let mut ptrs = Vec::new();
    for (i, call) in p.calls().iter().enumerate() {
        let mut n = 0;
        for arg in call.args() {
            foreach_value(arg, &mut |v| {
                let nth = n;
                n += 1;
                if let Some(pointee) = v.as_ptr().and_then(|ptr| ptr.pointee.as_ref()) {
                    if squashable(target, pointee) {
                        ptrs.push((i, nth));
                    }
                }
                Visit::Continue
            });
        }
    }
    ptrs
}

fn squashable(target: &Target, pointee: &Value) -> bool {
    if pointee.dir() == Dir::Out {
        return false;
    }
    if pointee.ty_id() == target.any_blob() {
        return true;
    }
    if !pointee.ty(target).is_complex() {
        return false;
    }
    let nested = foreach_value(pointee, &mut |v| match v.kind() {
        ValueKind::Ptr | ValueKind::Vma | ValueKind::Res => Visit::Stop,
        _ => Visit::Continue,
    });
    !nested
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        corpus::prog_sig, gen::gen_prog, parse::parse_prog, signal::Signal,
        target::test_target,
    };

    #[test]
    fn squash_complex_pointee() {
        let target = test_target();
        let ct = ChoiceTable::new(&target, None);
        let mut rng = SmallRng::seed_from_u64(91);
        let mut p = parse_prog(
            &target,
            "poll(&(0x20000000)=[0x1, 0x2], 0x2, 0x0)\n\
             pipe(&(0x20000040)=[<r0=>0xffffffffffffffff, <r1=>0xffffffffffffffff])\n",
        )
        .unwrap();
        assert_eq!(complex_ptrs(&target, &p), vec![(0, 0)]);
        assert!(squash_any(&target, &ct, &mut rng, &mut p));
        p.validate(&target);
        let ptr = p.calls()[0].args()[0].checked_as_ptr();
        let pointee = ptr.pointee.as_ref().unwrap();
        assert_eq!(pointee.ty_id(), target.any_blob());
        // squashed blobs can be squashed again
        assert_eq!(complex_ptrs(&target, &p), vec![(0, 0)]);
        assert!(squash_any(&target, &ct, &mut rng, &mut p));
        p.validate(&target);
    }

    #[test]
    fn nothing_to_squash() {
        let target = test_target();
        let ct = ChoiceTable::new(&target, None);
        let mut rng = SmallRng::seed_from_u64(92);
        let mut p = parse_prog(&target, "getpid()\nclose(0xffffffffffffffff)\n").unwrap();
        assert!(!squash_any(&target, &ct, &mut rng, &mut p));
    }

    #[test]
    fn mutate_keeps_prog_valid() {
        let target = test_target();
        let ct = ChoiceTable::new(&target, None);
        let corpus = CorpusWrapper::new();
        let mut rng = SmallRng::seed_from_u64(93);
        let seed = parse_prog(
            &target,
            "r0 = open(&(0x20000000)='./file0\\x00', 0x2, 0x0)\n\
             write(r0, &(0x20000040)=\"0011\", 0x2)\n",
        )
        .unwrap();
        let other = gen_prog(&target, &ct, &mut rng, 5);
        corpus.add(other.clone(), Signal::new(), prog_sig(&target, &other));

        let mut total = MutateStats::default();
        let mut p = seed.clone();
        for i in 0..1000 {
            if i % 50 == 0 {
                p = seed.clone();
            }
            let stats = mutate(&target, &ct, &corpus, &mut rng, &mut p, 10);
            p.validate(&target);
            assert!(p.len() <= 10);
            total.squash += stats.squash;
            total.insert_call += stats.insert_call;
            total.mutate_arg += stats.mutate_arg;
            total.remove_call += stats.remove_call;
        }
        assert!(total.insert_call > 0);
        assert!(total.mutate_arg > 0);
        assert!(total.remove_call > 0);
    }
}
