use crate::util::stop_soon;
use kfuzz_core::mutation::MutateStats;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    thread::sleep,
    time::Duration,
};

/// Per-operation counters, reported to the manager by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
    ExecGenerate,
    ExecFuzz,
    ExecCandidate,
    ExecTriage,
    ExecMinimize,
    ExecSmash,
    ExecHint,
    ExecSeed,
    MutateSquash,
    MutateSplice,
    MutateInsertCall,
    MutateArg,
    MutateRemoveCall,
}

pub const STAT_COUNT: usize = 13;

pub const STAT_NAMES: [&str; STAT_COUNT] = [
    "exec gen",
    "exec fuzz",
    "exec candidate",
    "exec triage",
    "exec minimize",
    "exec smash",
    "exec hints",
    "exec seeds",
    "mutate squash",
    "mutate splice",
    "mutate insert call",
    "mutate mutate arg",
    "mutate remove call",
];

#[derive(Debug, Default)]
pub struct Stats {
    counters: [AtomicU64; STAT_COUNT],
    // values already sent to the manager
    polled: Mutex<[u64; STAT_COUNT]>,
    exec_total: AtomicU64,
    corpus_size: AtomicU64,
    corpus_signal: AtomicU64,
    max_signal: AtomicU64,
    crashes: AtomicU64,
    hangs: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc(&self, stat: Stat) {
        self.add(stat, 1);
    }

    #[inline]
    pub fn add(&self, stat: Stat, n: u64) {
        if n != 0 {
            self.counters[stat as usize].fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn get(&self, stat: Stat) -> u64 {
        self.counters[stat as usize].load(Ordering::Relaxed)
    }

    pub fn add_mutate(&self, ms: &MutateStats) {
        self.add(Stat::MutateSquash, ms.squash);
        self.add(Stat::MutateSplice, ms.splice);
        self.add(Stat::MutateInsertCall, ms.insert_call);
        self.add(Stat::MutateArg, ms.mutate_arg);
        self.add(Stat::MutateRemoveCall, ms.remove_call);
    }

    pub fn inc_exec_total(&self) {
        self.exec_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_crashes(&self) {
        self.crashes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_hangs(&self) {
        self.hangs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_corpus_size(&self, n: u64) {
        self.corpus_size.store(n, Ordering::Relaxed);
    }

    pub fn set_corpus_signal(&self, n: u64) {
        self.corpus_signal.store(n, Ordering::Relaxed);
    }

    pub fn set_max_signal(&self, n: u64) {
        self.max_signal.store(n, Ordering::Relaxed);
    }

    /// Counter increments since last call, keyed by stat name. Zero deltas are omitted.
    pub fn poll_delta(&self) -> BTreeMap<String, u64> {
        let mut polled = self.polled.lock().unwrap();
        let mut delta = BTreeMap::new();
        for (i, c) in self.counters.iter().enumerate() {
            let v = c.load(Ordering::Relaxed);
            if v > polled[i] {
                delta.insert(STAT_NAMES[i].to_string(), v - polled[i]);
            }
            polled[i] = v;
        }
        delta
    }

    pub fn report(&self, duration: Duration) {
        while !stop_soon() {
            sleep(duration);

            let exec_total = self.exec_total.load(Ordering::Relaxed);
            let corpus_size = self.corpus_size.load(Ordering::Relaxed);
            let corpus_signal = self.corpus_signal.load(Ordering::Relaxed);
            let max_signal = self.max_signal.load(Ordering::Relaxed);
            let crashes = self.crashes.load(Ordering::Relaxed);
            let hangs = self.hangs.load(Ordering::Relaxed);
            log::info!(
                "exec: {}, corpus: {}, signal {}/{}, crashes/hangs {}/{}, gen/fuzz/cand/triage/min/smash/hint/seed {}/{}/{}/{}/{}/{}/{}/{}",
                exec_total,
                corpus_size,
                corpus_signal,
                max_signal,
                crashes,
                hangs,
                self.get(Stat::ExecGenerate),
                self.get(Stat::ExecFuzz),
                self.get(Stat::ExecCandidate),
                self.get(Stat::ExecTriage),
                self.get(Stat::ExecMinimize),
                self.get(Stat::ExecSmash),
                self.get(Stat::ExecHint),
                self.get(Stat::ExecSeed),
            );
            log::debug!(
                "mutate squash/splice/insert/arg/remove {}/{}/{}/{}/{}",
                self.get(Stat::MutateSquash),
                self.get(Stat::MutateSplice),
                self.get(Stat::MutateInsertCall),
                self.get(Stat::MutateArg),
                self.get(Stat::MutateRemoveCall),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_reports_delta() {
        let stats = Stats::new();
        stats.inc(Stat::ExecFuzz);
        stats.add(Stat::ExecSmash, 3);
        let d = stats.poll_delta();
        assert_eq!(d.len(), 2);
        assert_eq!(d["exec fuzz"], 1);
        assert_eq!(d["exec smash"], 3);
        assert!(stats.poll_delta().is_empty());

        stats.add_mutate(&MutateStats {
            splice: 2,
            ..Default::default()
        });
        let d = stats.poll_delta();
        assert_eq!(d["mutate splice"], 2);
        assert_eq!(stats.get(Stat::ExecSmash), 3);
    }
}
