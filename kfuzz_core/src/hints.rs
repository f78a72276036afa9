//! Comparison operand guided mutation.
//!
//! Operands the kernel compared against values of a call are substituted into the
//! call, hoping to pass the comparison.
use crate::{
    gen::int::truncate,
    prog::Prog,
    target::Target,
    ty::{Dir, TypeKind},
    value::{count_values, nth_value, nth_value_mut, Value},
    HashMap, HashSet,
};

/// Max number of leading bytes of a buffer probed for hints.
pub const MAX_DATA_LEN: usize = 100;

/// Operand pairs collected from comparisons: `arg -> {operands compared with arg}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompMap {
    inner: HashMap<u64, HashSet<u64>>,
}

impl CompMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_comp(&mut self, arg: u64, operand: u64) {
        self.inner.entry(arg).or_default().insert(operand);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[inline]
    pub fn get(&self, arg: u64) -> Option<&HashSet<u64>> {
        self.inner.get(&arg)
    }
}

/// Values that are generated often enough, replacing with them is useless.
const SPECIAL_INTS: [u64; 21] = [
    0, 1, 31, 32, 63, 64, 127, 128, 129, 255, 256, 257, 511, 512, 1023, 1024, 1025, 2047,
    2048, 4095, 4096,
];

/// Call `exec` with every variant of `p` whose value of call `call_idx` is replaced
/// by a matching comparison operand.
pub fn mutate_with_hints<F>(target: &Target, p: &Prog, call_idx: usize, comps: &CompMap, mut exec: F)
where
    F: FnMut(&Prog),
{
    let n = count_values(p.calls()[call_idx].args());
    for nth in 0..n {
        let val = match nth_value(p.calls()[call_idx].args(), nth) {
            Some(val) if hintable(target, val) => val,
            _ => continue,
        };
        for new in replacers(target, val, comps) {
            let mut p0 = p.clone();
            p0.edit_call(call_idx, |call| {
                if let Some(slot) = nth_value_mut(call.args_mut(), nth) {
                    *slot = new;
                }
            });
            p0.debug_validate(target);
            exec(&p0);
        }
    }
}

fn hintable(target: &Target, val: &Value) -> bool {
    use TypeKind::*;
    if val.dir() == Dir::Out {
        return false;
    }
    matches!(val.ty(target).kind(), Int | Flags | BufferBlob | BufferString)
}

fn replacers(target: &Target, val: &Value, comps: &CompMap) -> Vec<Value> {
    let mut ret = Vec::new();
    if let Some(int) = val.as_int() {
        let bit_sz = val.ty(target).size() * 8;
        let mut new_vals = shrink_expand(int.val, comps, bit_sz)
            .into_iter()
            .map(|v| truncate(v, bit_sz))
            .filter(|v| *v != int.val)
            .collect::<Vec<_>>();
        new_vals.sort_unstable();
        new_vals.dedup();
        for v in new_vals {
            let mut new = val.clone();
            new.checked_as_int_mut().val = v;
            ret.push(new);
        }
    } else if let Some(data) = val.as_data() {
        let len = std::cmp::min(data.data.len(), MAX_DATA_LEN);
        for i in 0..len {
            let mut original = [0u8; 8];
            let width = std::cmp::min(8, data.data.len() - i);
            original[..width].copy_from_slice(&data.data[i..i + width]);
            let v = u64::from_le_bytes(original);
            let mut new_vals = shrink_expand(v, comps, 64).into_iter().collect::<Vec<_>>();
            new_vals.sort_unstable();
            for replacer in new_vals {
                let bytes = replacer.to_le_bytes();
                if bytes[..width] == data.data[i..i + width] {
                    continue;
                }
                let mut new = val.clone();
                new.checked_as_data_mut().data[i..i + width].copy_from_slice(&bytes[..width]);
                ret.push(new);
            }
        }
    }
    ret
}

/// Replacers of `v` whose low bytes, possibly sign extended or byte swapped, match
/// a compared operand.
fn shrink_expand(v: u64, comps: &CompMap, bit_sz: u64) -> HashSet<u64> {
    let mut replacers = HashSet::new();
    for &iwidth in [8i64, 4, 2, 1, -4, -2, -1].iter() {
        let width = iwidth.unsigned_abs();
        let size = std::cmp::min(width * 8, std::cmp::max(bit_sz, 8));
        let mask = if size >= 64 { u64::MAX } else { (1 << size) - 1 };
        let mutant = if iwidth > 0 { v & mask } else { v | !mask };
        for &big_endian in [false, true].iter() {
            let mutant = if big_endian {
                if width == 1 {
                    continue;
                }
                swap_int(mutant, width)
            } else {
                mutant
            };
            let operands = match comps.get(mutant) {
                Some(operands) => operands,
                None => continue,
            };
            for &operand in operands.iter() {
                let hi = operand & !mask;
                if hi != 0 && hi ^ !mask != 0 {
                    // does not fit into the width
                    continue;
                }
                let mut new_v = operand & mask;
                if big_endian {
                    new_v = swap_int(new_v, width);
                }
                if SPECIAL_INTS.contains(&new_v) {
                    continue;
                }
                let replacer = (v & !mask) | new_v;
                if replacer != v {
                    replacers.insert(replacer);
                }
            }
        }
    }
    replacers
}

fn swap_int(v: u64, width: u64) -> u64 {
    match width {
        2 => (v as u16).swap_bytes() as u64,
        4 => (v as u32).swap_bytes() as u64,
        8 => v.swap_bytes(),
        _ => v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse::parse_prog, target::test_target};

    #[test]
    fn shrink_expand_widths() {
        let mut comps = CompMap::new();
        comps.add_comp(0x1234, 0xabcd);
        // low 2 bytes match
        let r = shrink_expand(0xffff_0000_0000_1234, &comps, 64);
        assert!(r.contains(&0xffff_0000_0000_abcd));
        // big endian match
        let mut comps = CompMap::new();
        comps.add_comp(0x3412, 0x7856);
        let r = shrink_expand(0x1234, &comps, 16);
        assert!(r.contains(&0x5678));
        // special ints are skipped
        let mut comps = CompMap::new();
        comps.add_comp(0x1234, 0x1);
        assert!(shrink_expand(0x1234, &comps, 64).is_empty());
    }

    #[test]
    fn hints_replace_int_args() {
        let target = test_target();
        let p = parse_prog(&target, "socket(0x2, 0x1234, 0x0)\n").unwrap();
        let mut comps = CompMap::new();
        comps.add_comp(0x1234, 0xdead);
        comps.add_comp(0x1234, 0x1234);
        let mut got = Vec::new();
        mutate_with_hints(&target, &p, 0, &comps, |p| {
            got.push(p.calls()[0].args()[1].checked_as_int().val);
        });
        assert_eq!(got, vec![0xdead]);
    }

    #[test]
    fn hints_replace_data_window() {
        let target = test_target();
        let p = parse_prog(
            &target,
            "write(0xffffffffffffffff, &(0x20000000)=\"00aabbccdd00\", 0x6)\n",
        )
        .unwrap();
        let mut comps = CompMap::new();
        comps.add_comp(0xddccbbaa, 0x44332211);
        let mut found = false;
        mutate_with_hints(&target, &p, 0, &comps, |p| {
            let ptr = p.calls()[0].args()[1].checked_as_ptr();
            let data = &ptr.pointee.as_ref().unwrap().checked_as_data().data;
            if data == &[0x00, 0x11, 0x22, 0x33, 0x44, 0x00] {
                found = true;
            }
        });
        assert!(found);
    }
}
