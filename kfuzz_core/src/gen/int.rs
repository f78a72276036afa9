//! Generate value for `const`, `int`, `flags`, `len`, `proc`, `csum` type.
use crate::{
    context::Context,
    ty::{Dir, Type},
    value::{IntegerValue, Value},
    RngType,
};
use rand::prelude::*;

/// Interesting integers, neighbours of `SPECIAL_POWERS` are interesting as well.
const SPECIAL_INTS: [u64; 21] = [
    0, 1, 31, 32, 63, 64, 127, 128, 129, 255, 256, 257, 511, 512, 1023, 1024, 1025, 2047, 2048,
    4095, 4096,
];

const SPECIAL_POWERS: [u32; 6] = [15, 16, 31, 32, 63, 64];

pub fn gen_const(_ctx: &mut Context, _rng: &mut RngType, ty: &Type, dir: Dir) -> Value {
    let val = ty.checked_as_const().const_val();
    IntegerValue::new(ty.id(), dir, val).into()
}

pub fn gen_int(_ctx: &mut Context, rng: &mut RngType, ty: &Type, dir: Dir) -> Value {
    let int_ty = ty.checked_as_int();
    let bit_sz = int_ty.bit_size();
    let val = match int_ty.range() {
        Some(range) => rand_range_int(rng, *range.start(), *range.end(), bit_sz, int_ty.val_align()),
        None => rand_int(rng, bit_sz),
    };
    IntegerValue::new(ty.id(), dir, val).into()
}

pub fn gen_flags(_ctx: &mut Context, rng: &mut RngType, ty: &Type, dir: Dir) -> Value {
    let flags_ty = ty.checked_as_flags();
    let val = rand_flags(rng, flags_ty.vals(), flags_ty.bit_mask(), 0);
    IntegerValue::new(ty.id(), dir, truncate(val, flags_ty.bit_size())).into()
}

/// Len is calculated after the whole call is generated.
pub fn gen_len(_ctx: &mut Context, _rng: &mut RngType, ty: &Type, dir: Dir) -> Value {
    IntegerValue::new(ty.id(), dir, 0).into()
}

pub fn gen_proc(_ctx: &mut Context, rng: &mut RngType, ty: &Type, dir: Dir) -> Value {
    let proc_ty = ty.checked_as_proc();
    let val = rng.gen_range(0..std::cmp::max(proc_ty.values_per_proc(), 1));
    IntegerValue::new(ty.id(), dir, val).into()
}

/// Checksum is calculated by the executor.
pub fn gen_csum(_ctx: &mut Context, _rng: &mut RngType, ty: &Type, dir: Dir) -> Value {
    IntegerValue::new(ty.id(), dir, 0).into()
}

/// Keep the lowest `bit_sz` bits of `val`.
#[inline]
pub fn truncate(val: u64, bit_sz: u64) -> u64 {
    if bit_sz >= 64 {
        val
    } else {
        val & ((1 << bit_sz) - 1)
    }
}

/// Random interesting 64-bit value.
pub fn rand_int64(rng: &mut RngType) -> u64 {
    let mut v = if rng.gen_ratio(100, 182) {
        rng.gen_range(0..10)
    } else if rng.gen_ratio(50, 82) {
        special_int(rng)
    } else if rng.gen_ratio(10, 32) {
        rng.gen_range(0..256)
    } else if rng.gen_ratio(10, 22) {
        rng.gen_range(0..4 << 10)
    } else if rng.gen_ratio(10, 12) {
        rng.gen_range(0..64 << 10)
    } else {
        rng.gen_range(0..0x8000)
    };
    if rng.gen_ratio(100, 107) {
        // keep
    } else if rng.gen_ratio(5, 7) {
        v = v.wrapping_neg();
    } else {
        v <<= rng.gen_range(0..63u32);
    }
    v
}

fn special_int(rng: &mut RngType) -> u64 {
    let n = SPECIAL_INTS.len() + SPECIAL_POWERS.len() * 3;
    let idx = rng.gen_range(0..n);
    if idx < SPECIAL_INTS.len() {
        return SPECIAL_INTS[idx];
    }
    let idx = idx - SPECIAL_INTS.len();
    let p = SPECIAL_POWERS[idx / 3];
    let base = if p == 64 { 0 } else { 1u64 << p };
    match idx % 3 {
        0 => base.wrapping_sub(1),
        1 => base,
        _ => base.wrapping_add(1),
    }
}

/// Random interesting value of `bit_sz` bits.
pub fn rand_int(rng: &mut RngType, bit_sz: u64) -> u64 {
    let mut v = rand_int64(rng);
    if rng.gen_ratio(1, 20) {
        v = v.wrapping_sub(1);
    } else if rng.gen_ratio(1, 20) {
        v = v.wrapping_add(1);
    }
    truncate(v, bit_sz)
}

/// Random value in `[begin, end]` that is a multiple of `align` away from `begin`.
pub fn rand_range_int(rng: &mut RngType, begin: u64, mut end: u64, bit_sz: u64, align: u64) -> u64 {
    if rng.gen_ratio(1, 100) {
        return rand_int(rng, bit_sz);
    }
    if align != 0 {
        if begin == 0 && end == u64::MAX {
            end = truncate(u64::MAX, bit_sz);
        }
        let end_align = (end - begin) / align;
        return begin + rng.gen_range(0..=end_align) * align;
    }
    if begin == 0 && end == u64::MAX {
        return rng.gen();
    }
    rng.gen_range(begin..=end)
}

/// Random value of flags `vals`, `old` is the value being mutated.
pub fn rand_flags(rng: &mut RngType, vals: &[u64], bit_mask: bool, old: u64) -> u64 {
    if vals.is_empty() {
        return old;
    }
    if rng.gen_ratio(1, 100) {
        return rng.gen();
    }
    if rng.gen_ratio(1, 50) {
        return 0;
    }
    if !bit_mask && old != 0 && rng.gen_ratio(1, 100) {
        // slightly increase or decrease the old value
        let inc = if rng.gen() { 1 } else { u64::MAX };
        let mut v = old.wrapping_add(inc);
        while rng.gen() {
            v = v.wrapping_add(inc);
        }
        return v;
    }
    if vals.len() == 1 {
        return if rng.gen() { 0 } else { vals[0] };
    }
    if !bit_mask && !rng.gen_ratio(1, 10) {
        return *vals.choose(rng).unwrap();
    }
    if rng.gen_ratio(1, vals.len() as u32 + 4) {
        return 0;
    }
    let mut v = old;
    if v != 0 && rng.gen_ratio(1, 10) {
        v = 0;
    }
    let mut tries = 0;
    while tries < 10 && (v == 0 || rng.gen_ratio(2, 3)) {
        let mut flag = *vals.choose(rng).unwrap();
        if rng.gen_ratio(1, 20) {
            // adjacent bits, in case some flags are missing
            if rng.gen() {
                flag >>= 1;
            } else {
                flag <<= 1;
            }
        }
        v ^= flag;
        tries += 1;
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_int_in_range() {
        let mut rng = SmallRng::seed_from_u64(1);
        let mut in_range = 0;
        for _ in 0..1000 {
            let v = rand_range_int(&mut rng, 0, 0x100, 16, 4);
            if v <= 0x100 && v % 4 == 0 {
                in_range += 1;
            }
        }
        assert!(in_range > 900);
    }

    #[test]
    fn truncate_bits() {
        assert_eq!(truncate(0x1ff, 8), 0xff);
        assert_eq!(truncate(u64::MAX, 64), u64::MAX);
        assert_eq!(truncate(0x12345, 16), 0x2345);
    }

    #[test]
    fn flags_from_vals() {
        let mut rng = SmallRng::seed_from_u64(2);
        let vals = [1, 2, 4, 8];
        let mut hits = 0;
        for _ in 0..1000 {
            let v = rand_flags(&mut rng, &vals, false, 0);
            if vals.contains(&v) {
                hits += 1;
            }
        }
        assert!(hits > 800);
        assert_eq!(rand_flags(&mut rng, &[], true, 42), 42);
    }
}
