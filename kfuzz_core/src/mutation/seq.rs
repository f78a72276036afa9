//! Sequence level mutation.
use crate::{
    context::Context,
    corpus::CorpusWrapper,
    gen::{biased_rand, gen_syscall},
    prog::Prog,
    select::ChoiceTable,
    target::Target,
    RngType,
};
use rand::prelude::*;

/// Splice a random prog of `corpus` into `p` at a random location.
pub fn splice(corpus: &CorpusWrapper, rng: &mut RngType, p: &mut Prog, ncalls: usize) -> bool {
    if p.is_empty() || p.len() >= ncalls {
        return false;
    }
    let other = match corpus.random_prog(rng) {
        Some(other) => other,
        None => return false,
    };
    let idx = rng.gen_range(0..p.len());
    debug_info!("splice: {} call(s) to location {}", other.len(), idx);
    p.splice(idx, other);
    while p.len() > ncalls {
        p.remove_call_inplace(p.len() - 1);
    }
    true
}

/// Generate a new call and insert it to a random location, biased toward the end.
pub fn insert_call(
    target: &Target,
    choice: &ChoiceTable,
    rng: &mut RngType,
    p: &mut Prog,
    ncalls: usize,
) -> bool {
    if p.len() >= ncalls {
        return false;
    }
    let idx = biased_rand(rng, p.len() as u64 + 1, 5) as usize;
    let bias = if idx > 0 {
        Some(p.calls()[rng.gen_range(0..idx)].sid())
    } else {
        None
    };
    let sid = choice.choose(rng, bias);
    debug_info!(
        "insert_call: inserting {} to location {}",
        target.syscall_of(sid).name(),
        idx
    );
    let mut ctx = Context::for_prog(target, choice, p, idx);
    gen_syscall(&mut ctx, rng, sid);
    let new_calls = ctx.take_calls();
    debug_info!("insert_call: {} call(s) inserted", new_calls.len());
    p.insert_calls(idx, new_calls);
    while p.len() > ncalls {
        p.remove_call_inplace(idx);
    }
    true
}

/// Remove a random call, consumers of its results are severed.
pub fn remove_call(rng: &mut RngType, p: &mut Prog) -> bool {
    if p.is_empty() {
        return false;
    }
    let idx = rng.gen_range(0..p.len());
    debug_info!("remove_call: removing call-{}", idx);
    p.remove_call_inplace(idx);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{corpus::prog_sig, parse::parse_prog, signal::Signal, target::test_target};

    #[test]
    fn insert_respects_limit() {
        let target = test_target();
        let ct = ChoiceTable::new(&target, None);
        let mut rng = SmallRng::seed_from_u64(101);
        let mut p = parse_prog(&target, "getpid()\n").unwrap();
        for _ in 0..100 {
            insert_call(&target, &ct, &mut rng, &mut p, 8);
            p.validate(&target);
            assert!(p.len() <= 8);
        }
        assert_eq!(p.len(), 8);
        assert!(!insert_call(&target, &ct, &mut rng, &mut p, 8));
    }

    #[test]
    fn remove_severs_consumers() {
        let target = test_target();
        let mut rng = SmallRng::seed_from_u64(102);
        let mut p = parse_prog(
            &target,
            "r0 = open(&(0x20000000)='./file0\\x00', 0x2, 0x0)\nclose(r0)\n",
        )
        .unwrap();
        while p.len() > 1 {
            remove_call(&mut rng, &mut p);
            p.validate(&target);
        }
        assert!(remove_call(&mut rng, &mut p));
        assert!(!remove_call(&mut rng, &mut p));
    }

    #[test]
    fn splice_renumbers_results() {
        let target = test_target();
        let corpus = CorpusWrapper::new();
        let mut rng = SmallRng::seed_from_u64(103);
        let text = "r0 = open(&(0x20000000)='./file0\\x00', 0x2, 0x0)\nclose(r0)\n";
        let other = parse_prog(&target, text).unwrap();
        corpus.add(other.clone(), Signal::new(), prog_sig(&target, &other));
        let mut p = parse_prog(&target, text).unwrap();
        assert!(splice(&corpus, &mut rng, &mut p, 10));
        p.validate(&target);
        assert_eq!(p.len(), 4);
        assert!(!splice(&corpus, &mut rng, &mut p, 4));
    }
}
