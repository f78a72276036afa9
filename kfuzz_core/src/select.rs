//! Call Selection.
//!
//! Static priorities between syscalls, derived from the resources one call produces and
//! another consumes.
use crate::{syscall::SyscallId, target::Target, ty::ResKind, HashSet, RngType};
use rand::prelude::*;

/// Weight of a syscall pair sharing nothing.
const BASE_PRIO: u64 = 1;
/// Weight added for every resource kind passed from one call to the other.
const RES_PRIO: u64 = 10;

#[derive(Debug, Clone)]
pub struct ChoiceTable {
    /// Enabled syscalls, sorted.
    enabled: Vec<SyscallId>,
    /// Whether syscall is enabled, indexed by `SyscallId`.
    enabled_mask: Vec<bool>,
    /// Cumulative prios of enabled syscalls for each enabled bias call, indexed by `SyscallId`.
    runs: Vec<Option<Box<[u64]>>>,
}

impl ChoiceTable {
    /// Build the table for `enabled` syscalls, all syscalls not disabled by the target if none.
    pub fn new(target: &Target, enabled: Option<&[SyscallId]>) -> Self {
        let mut enabled = match enabled {
            Some(sids) => sids
                .iter()
                .copied()
                .filter(|&sid| sid < target.all_syscalls().len())
                .collect::<Vec<_>>(),
            None => target.enabled_syscalls(),
        };
        enabled.sort_unstable();
        enabled.dedup();
        assert!(!enabled.is_empty(), "no syscall enabled");

        let mut enabled_mask = vec![false; target.all_syscalls().len()];
        for &sid in enabled.iter() {
            enabled_mask[sid] = true;
        }
        let mut runs = vec![None; target.all_syscalls().len()];
        for &bias in enabled.iter() {
            let mut sum = 0;
            let run = enabled
                .iter()
                .map(|&sid| {
                    sum += static_prio(target, bias, sid);
                    sum
                })
                .collect::<Vec<_>>();
            runs[bias] = Some(run.into_boxed_slice());
        }

        Self {
            enabled,
            enabled_mask,
            runs,
        }
    }

    #[inline(always)]
    pub fn enabled_calls(&self) -> &[SyscallId] {
        &self.enabled
    }

    #[inline]
    pub fn enabled(&self, sid: SyscallId) -> bool {
        self.enabled_mask.get(sid).copied().unwrap_or(false)
    }

    /// Choose a syscall, favoring the ones related to `bias`.
    pub fn choose(&self, rng: &mut RngType, bias: Option<SyscallId>) -> SyscallId {
        let run = match bias.and_then(|sid| self.runs.get(sid)).and_then(|r| r.as_ref()) {
            Some(run) => run,
            None => return *self.enabled.choose(rng).unwrap(),
        };
        let total = run[run.len() - 1];
        let x = rng.gen_range(1..=total);
        let idx = match run.binary_search(&x) {
            Ok(idx) => idx,
            Err(idx) => idx,
        };
        self.enabled[idx]
    }
}

/// Prio of calling `sid` after `bias`.
fn static_prio(target: &Target, bias: SyscallId, sid: SyscallId) -> u64 {
    let shared = |producer: SyscallId, consumer: SyscallId| {
        let inputs = target.syscall_input_res(consumer);
        target
            .syscall_output_res(producer)
            .iter()
            .flat_map(|kind| target.res_chain(kind).iter())
            .filter(|kind| inputs.contains(kind))
            .collect::<HashSet<&ResKind>>()
            .len() as u64
    };
    BASE_PRIO + RES_PRIO * (shared(bias, sid) + shared(sid, bias))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{target::test_target, HashMap};

    #[test]
    fn choose_enabled_only() {
        let target = test_target();
        let open = target.syscall_of_name("open").unwrap().id();
        let close = target.syscall_of_name("close").unwrap().id();
        let ct = ChoiceTable::new(&target, Some(&[open, close]));
        assert!(ct.enabled(open));
        assert!(!ct.enabled(0xffff));
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..100 {
            let sid = ct.choose(&mut rng, Some(open));
            assert!(sid == open || sid == close);
            let sid = ct.choose(&mut rng, None);
            assert!(sid == open || sid == close);
        }
    }

    #[test]
    fn related_calls_are_favored() {
        let target = test_target();
        let ct = ChoiceTable::new(&target, None);
        let socket = target.syscall_of_name("socket").unwrap().id();
        let connect = target.syscall_of_name("connect").unwrap().id();
        let getpid = target.syscall_of_name("getpid").unwrap().id();
        let mut rng = SmallRng::seed_from_u64(5);
        let mut hits: HashMap<SyscallId, usize> = HashMap::default();
        for _ in 0..10000 {
            *hits.entry(ct.choose(&mut rng, Some(socket))).or_default() += 1;
        }
        let connect_hits = hits.get(&connect).copied().unwrap_or(0);
        let getpid_hits = hits.get(&getpid).copied().unwrap_or(0);
        assert!(connect_hits > getpid_hits * 3);
    }
}
