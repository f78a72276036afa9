use kfuzz_core::signal::{Signal, SignalPrio};
use std::sync::RwLock;

/// Signal sets shared by all fuzzers.
///
/// `max` is every signal seen, `corpus` the signal of committed inputs, and `new` the part of
/// `max` not yet sent to the manager.
#[derive(Debug, Default)]
pub struct Feedback {
    inner: RwLock<Signals>,
}

#[derive(Debug, Default)]
struct Signals {
    corpus: Signal,
    max: Signal,
    new: Signal,
}

impl Feedback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the raw signal of one call, returns true if it contains anything new.
    pub fn check_new_call_signal(&self, raw: &[u32], prio: SignalPrio) -> bool {
        let diff = {
            let signals = self.inner.read().unwrap();
            signals.max.diff_raw(raw, prio)
        };
        if diff.is_empty() {
            return false;
        }
        let mut signals = self.inner.write().unwrap();
        signals.max.merge_ref(&diff);
        signals.new.merge(diff);
        true
    }

    pub fn add_max_signal(&self, signal: Signal) {
        let mut signals = self.inner.write().unwrap();
        signals.max.merge(signal);
    }

    /// Take the signal gathered since last call.
    pub fn grab_new_signal(&self) -> Signal {
        let mut signals = self.inner.write().unwrap();
        signals.new.take()
    }

    /// Elems of `signal` not in corpus signal yet.
    pub fn corpus_signal_diff(&self, signal: &Signal) -> Signal {
        let signals = self.inner.read().unwrap();
        signals.corpus.diff(signal)
    }

    pub fn add_corpus_signal(&self, signal: &Signal) {
        let mut signals = self.inner.write().unwrap();
        signals.corpus.merge_ref(signal);
        signals.max.merge_ref(signal);
    }

    pub fn corpus_len(&self) -> usize {
        self.inner.read().unwrap().corpus.len()
    }

    pub fn max_len(&self) -> usize {
        self.inner.read().unwrap().max.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_call_signal() {
        let fb = Feedback::new();
        assert!(fb.check_new_call_signal(&[1, 2, 3], 1));
        assert!(!fb.check_new_call_signal(&[1, 2], 1));
        assert!(!fb.check_new_call_signal(&[1, 2], 0));
        // same elem with higher prio is new
        assert!(fb.check_new_call_signal(&[2], 3));
        assert!(!fb.check_new_call_signal(&[], 3));
        assert_eq!(fb.max_len(), 3);

        let new = fb.grab_new_signal();
        assert_eq!(new.len(), 3);
        assert!(fb.grab_new_signal().is_empty());
    }

    #[test]
    fn corpus_signal() {
        let fb = Feedback::new();
        let s = Signal::from_raw(&[10, 11], 2);
        assert_eq!(fb.corpus_signal_diff(&s).len(), 2);
        fb.add_corpus_signal(&s);
        assert!(fb.corpus_signal_diff(&s).is_empty());
        assert_eq!(fb.corpus_len(), 2);
        assert_eq!(fb.max_len(), 2);
        // corpus signal counts as seen
        assert!(!fb.check_new_call_signal(&[10], 1));

        fb.add_max_signal(Signal::from_raw(&[12], 0));
        assert_eq!(fb.max_len(), 3);
        assert_eq!(fb.corpus_len(), 2);
        assert!(fb.grab_new_signal().is_empty());
    }
}
