//! Corpus of interesting progs.
use crate::{prog::Prog, signal::Signal, target::Target, HashSet, RngType};
use rand::prelude::*;
use sha1::{Digest, Sha1};
use std::sync::RwLock;

/// SHA-1 of the text form of a prog.
pub type ProgSig = [u8; 20];

pub fn prog_sig(target: &Target, p: &Prog) -> ProgSig {
    let text = p.display(target).to_string();
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    let mut sig = [0; 20];
    sig.copy_from_slice(&hasher.finalize());
    sig
}

#[derive(Debug, Default)]
pub struct CorpusWrapper {
    pub inner: RwLock<Corpus>,
}

impl CorpusWrapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap();
        inner.len()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.read().unwrap();
        inner.is_empty()
    }

    pub fn contains(&self, sig: &ProgSig) -> bool {
        let inner = self.inner.read().unwrap();
        inner.contains(sig)
    }

    pub fn add(&self, prog: Prog, signal: Signal, sig: ProgSig) -> bool {
        let mut inner = self.inner.write().unwrap();
        inner.add(prog, signal, sig)
    }

    /// Prio weighted choice, cloned.
    pub fn choose_program(&self, rng: &mut RngType) -> Option<Prog> {
        let inner = self.inner.read().unwrap();
        inner.choose_program(rng).cloned()
    }

    /// Uniform choice, cloned.
    pub fn random_prog(&self, rng: &mut RngType) -> Option<Prog> {
        let inner = self.inner.read().unwrap();
        inner.random_prog(rng).cloned()
    }
}

#[derive(Debug, Clone)]
pub struct CorpusEntry {
    pub prog: Prog,
    pub signal: Signal,
    pub sig: ProgSig,
    pub prio: u64,
}

/// Append-only, deduplicated by prog sig.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    entries: Vec<CorpusEntry>,
    hashes: HashSet<ProgSig>,
    prios: Vec<u64>,
    sum_prios: u64,
}

impl Corpus {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn contains(&self, sig: &ProgSig) -> bool {
        self.hashes.contains(sig)
    }

    pub fn entries(&self) -> &[CorpusEntry] {
        &self.entries
    }

    /// Add `prog` to corpus, false if a prog with the same sig exists.
    pub fn add(&mut self, prog: Prog, signal: Signal, sig: ProgSig) -> bool {
        if !self.hashes.insert(sig) {
            return false;
        }
        let prio = std::cmp::max(signal.len() as u64, 1);
        self.sum_prios += prio;
        self.prios.push(self.sum_prios);
        self.entries.push(CorpusEntry {
            prog,
            signal,
            sig,
            prio,
        });
        true
    }

    pub fn choose_program(&self, rng: &mut RngType) -> Option<&Prog> {
        if self.is_empty() {
            return None;
        }
        let n = rng.gen_range(0..=self.sum_prios);
        let idx = self.prios.partition_point(|&p| p < n);
        Some(&self.entries[idx].prog)
    }

    pub fn random_prog(&self, rng: &mut RngType) -> Option<&Prog> {
        self.entries.choose(rng).map(|e| &e.prog)
    }
}
