//! Coverage signal and raw coverage.
use crate::HashMap;

pub type SignalElem = u32;
pub type SignalPrio = u8;

/// Set of unique signal elems, each with a prio.
///
/// Elem with higher prio wins when two signals are merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signal {
    elems: HashMap<SignalElem, SignalPrio>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_raw(raw: &[u32], prio: SignalPrio) -> Self {
        let mut elems = HashMap::with_capacity(raw.len());
        for &e in raw {
            elems.insert(e, prio);
        }
        Self { elems }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    #[inline]
    pub fn contains(&self, e: SignalElem) -> bool {
        self.elems.contains_key(&e)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SignalElem, SignalPrio)> + '_ {
        self.elems.iter().map(|(e, p)| (*e, *p))
    }

    /// Elems of `other` that are absent from `self` or present with lower prio.
    pub fn diff(&self, other: &Signal) -> Signal {
        let elems = other
            .elems
            .iter()
            .filter(|(e, p)| !self.covers(**e, **p))
            .map(|(e, p)| (*e, *p))
            .collect();
        Signal { elems }
    }

    /// Same as `diff`, with `raw` elems of prio `prio`.
    pub fn diff_raw(&self, raw: &[u32], prio: SignalPrio) -> Signal {
        let mut elems = HashMap::new();
        for &e in raw {
            if !self.covers(e, prio) {
                elems.insert(e, prio);
            }
        }
        Signal { elems }
    }

    /// Elems of `self` that `other` holds with the same or higher prio.
    pub fn intersection(&self, other: &Signal) -> Signal {
        let elems = self
            .elems
            .iter()
            .filter(|(e, p)| other.covers(**e, **p))
            .map(|(e, p)| (*e, *p))
            .collect();
        Signal { elems }
    }

    pub fn merge(&mut self, other: Signal) {
        if self.elems.is_empty() {
            self.elems = other.elems;
            return;
        }
        for (e, p) in other.elems {
            self.insert(e, p);
        }
    }

    pub fn merge_ref(&mut self, other: &Signal) {
        for (e, p) in other.iter() {
            self.insert(e, p);
        }
    }

    #[inline]
    fn insert(&mut self, e: SignalElem, p: SignalPrio) {
        let old = self.elems.entry(e).or_insert(p);
        if *old < p {
            *old = p;
        }
    }

    #[inline]
    fn covers(&self, e: SignalElem, p: SignalPrio) -> bool {
        matches!(self.elems.get(&e), Some(&old) if old >= p)
    }

    /// Drain all elems, leaving `self` empty.
    pub fn take(&mut self) -> Signal {
        std::mem::take(self)
    }

    pub fn serialize(&self) -> SerialSignal {
        let mut elems = Vec::with_capacity(self.len());
        let mut prios = Vec::with_capacity(self.len());
        for (e, p) in self.iter() {
            elems.push(e);
            prios.push(p);
        }
        SerialSignal { elems, prios }
    }

    pub fn deserialize(s: &SerialSignal) -> Signal {
        assert_eq!(s.elems.len(), s.prios.len(), "corrupted serial signal");
        let mut signal = Signal::new();
        for (e, p) in s.elems.iter().zip(s.prios.iter()) {
            signal.insert(*e, *p);
        }
        signal
    }
}

/// Flat form of signal for transferring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerialSignal {
    pub elems: Vec<SignalElem>,
    pub prios: Vec<SignalPrio>,
}

/// Raw coverage, sorted and deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cover {
    pcs: Vec<u32>,
}

impl Cover {
    pub fn from_raw(raw: &[u32]) -> Self {
        let mut pcs = raw.to_vec();
        pcs.sort_unstable();
        pcs.dedup();
        Self { pcs }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pcs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pcs.is_empty()
    }

    pub fn merge(&mut self, raw: &[u32]) {
        self.pcs.extend_from_slice(raw);
        self.pcs.sort_unstable();
        self.pcs.dedup();
    }

    pub fn pcs(&self) -> &[u32] {
        &self.pcs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_respects_prio() {
        let base = Signal::from_raw(&[1, 2, 3], 1);
        let other = Signal::from_raw(&[2, 3, 4], 2);
        let d = base.diff(&other);
        assert_eq!(d.len(), 3);
        let other = Signal::from_raw(&[2, 3, 4], 1);
        let d = base.diff(&other);
        assert_eq!(d.len(), 1);
        assert!(d.contains(4));
        assert_eq!(base.diff_raw(&[1, 5], 0).len(), 1);
    }

    #[test]
    fn merge_keeps_max_prio() {
        let mut s = Signal::from_raw(&[1, 2], 0);
        s.merge(Signal::from_raw(&[2, 3], 3));
        s.merge_ref(&Signal::from_raw(&[3], 1));
        let mut elems = s.iter().collect::<Vec<_>>();
        elems.sort_unstable();
        assert_eq!(elems, vec![(1, 0), (2, 3), (3, 3)]);
    }

    #[test]
    fn intersection_and_serialize() {
        let a = Signal::from_raw(&[1, 2, 3], 1);
        let b = Signal::from_raw(&[2, 3, 4], 2);
        assert_eq!(a.intersection(&b).len(), 2);
        assert_eq!(b.intersection(&a).len(), 0);
        let s = a.serialize();
        assert_eq!(Signal::deserialize(&s), a);
    }

    fn random_signal(rng: &mut rand::rngs::SmallRng) -> Signal {
        use rand::Rng;

        let mut s = Signal::new();
        for _ in 0..rng.gen_range(0..64) {
            let raw = [rng.gen_range(0..128)];
            s.merge(Signal::from_raw(&raw, rng.gen_range(0..4)));
        }
        s
    }

    #[test]
    fn signal_laws() {
        use rand::SeedableRng;

        let mut rng = rand::rngs::SmallRng::seed_from_u64(0x5eed);
        for _ in 0..256 {
            let a = random_signal(&mut rng);
            let b = random_signal(&mut rng);
            let c = random_signal(&mut rng);

            let mut aa = a.clone();
            aa.merge_ref(&a);
            assert_eq!(aa, a);
            assert!(a.diff(&a).is_empty());

            let mut ab_c = a.clone();
            ab_c.merge_ref(&b);
            ab_c.merge_ref(&c);
            let mut bc = b.clone();
            bc.merge_ref(&c);
            let mut a_bc = a.clone();
            a_bc.merge(bc);
            assert_eq!(ab_c, a_bc);

            let mut ba = b.clone();
            ba.merge_ref(&a);
            let mut ab = a.clone();
            ab.merge_ref(&b);
            assert_eq!(ab, ba);
            assert!(ab.diff(&a).is_empty());
        }
    }

    #[test]
    fn cover_is_sorted_set() {
        let mut c = Cover::from_raw(&[5, 1, 5, 3]);
        c.merge(&[2, 3]);
        assert_eq!(c.pcs(), &[1, 2, 3, 5]);
    }
}
