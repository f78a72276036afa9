//! Mutate value of `blob`, `string`, `filename` type.
use super::{ArgCtx, ArgMutation};
use crate::{
    context::Context,
    gen::{
        biased_rand,
        buffer::{gen_buffer_string, rand_filename},
        int::rand_int64,
    },
    ty::Dir,
    value::Value,
    RngType,
};
use rand::prelude::*;

/// Max length of blobs without range.
pub const MAX_BLOB_LEN: u64 = 100 << 10;
/// Max delta of integers added to the buffer.
const MAX_INC: u64 = 35;

pub fn mutate_buffer_blob(
    ctx: &mut Context,
    rng: &mut RngType,
    val: &mut Value,
    _arg_ctx: &ArgCtx,
) -> ArgMutation {
    let ty = val.ty(ctx.target()).checked_as_buffer_blob();
    let (min_len, max_len) = match ty.range() {
        Some(r) => (*r.start(), *r.end()),
        None => (0, MAX_BLOB_LEN),
    };
    let dir = val.dir();
    let data = val.checked_as_data_mut();
    if dir == Dir::Out {
        data.size = mutate_buffer_size(rng, data.size, min_len, max_len);
    } else {
        mutate_data(rng, &mut data.data, min_len, max_len);
    }
    ArgMutation::Changed
}

pub fn mutate_buffer_string(
    ctx: &mut Context,
    rng: &mut RngType,
    val: &mut Value,
    _arg_ctx: &ArgCtx,
) -> ArgMutation {
    let ty = val.ty(ctx.target());
    let str_ty = ty.checked_as_buffer_string();
    let dir = val.dir();
    if dir == Dir::Out {
        let data = val.checked_as_data_mut();
        data.size = mutate_buffer_size(rng, data.size, 0, MAX_BLOB_LEN);
    } else if !str_ty.vals().is_empty() {
        *val = gen_buffer_string(ctx, rng, ty, dir);
    } else {
        let (min_len, max_len) = if ty.varlen() {
            (0, MAX_BLOB_LEN)
        } else {
            (ty.size(), ty.size())
        };
        mutate_data(rng, &mut val.checked_as_data_mut().data, min_len, max_len);
    }
    ArgMutation::Changed
}

pub fn mutate_buffer_filename(
    ctx: &mut Context,
    rng: &mut RngType,
    val: &mut Value,
    _arg_ctx: &ArgCtx,
) -> ArgMutation {
    let ty = val.ty(ctx.target());
    let fname_ty = ty.checked_as_buffer_filename();
    if val.dir() == Dir::Out {
        let data = val.checked_as_data_mut();
        data.size = mutate_buffer_size(rng, data.size, 0, MAX_BLOB_LEN);
    } else {
        let new = rand_filename(ctx, rng, ty, fname_ty.noz());
        val.checked_as_data_mut().data = new;
    }
    ArgMutation::Changed
}

/// Move size of output buffer by at most 16 bytes, clamped to `[min_len, max_len]`.
fn mutate_buffer_size(rng: &mut RngType, old: u64, min_len: u64, max_len: u64) -> u64 {
    if min_len >= max_len {
        return min_len;
    }
    let mut new = old;
    let mut tries = 0;
    while new == old && tries < 16 {
        let delta = rng.gen_range(0..=32i64) - 16;
        new = if delta < 0 {
            old.saturating_sub(delta.unsigned_abs())
        } else {
            old.saturating_add(delta as u64)
        };
        new = new.max(min_len).min(max_len);
        tries += 1;
    }
    new
}

type DataMutator = fn(&mut RngType, &mut Vec<u8>, u64, u64) -> bool;
const DATA_MUTATORS: [DataMutator; 7] = [
    flip_bit,
    insert_bytes,
    remove_bytes,
    append_bytes,
    replace_int,
    add_sub_int,
    set_interesting_int,
];

/// Mutate `data` in place, keeping its length within `[min_len, max_len]`.
pub fn mutate_data(rng: &mut RngType, data: &mut Vec<u8>, min_len: u64, max_len: u64) {
    let mut tries = 0;
    let mut stop = false;
    while !stop && tries < 128 {
        let mutator = DATA_MUTATORS.choose(rng).unwrap();
        stop = mutator(rng, data, min_len, max_len);
        stop = stop && rng.gen_ratio(1, 3);
        tries += 1;
    }
}

fn flip_bit(rng: &mut RngType, data: &mut Vec<u8>, _min_len: u64, _max_len: u64) -> bool {
    if data.is_empty() {
        return false;
    }
    let idx = rng.gen_range(0..data.len());
    data[idx] ^= 1 << rng.gen_range(0..8);
    true
}

fn insert_bytes(rng: &mut RngType, data: &mut Vec<u8>, _min_len: u64, max_len: u64) -> bool {
    if data.is_empty() || data.len() as u64 >= max_len {
        return false;
    }
    let n = std::cmp::min(rng.gen_range(1..=16), (max_len - data.len() as u64) as usize);
    let pos = rng.gen_range(0..data.len());
    let bytes = (0..n).map(|_| rng.gen::<u8>()).collect::<Vec<_>>();
    data.splice(pos..pos, bytes);
    if rng.gen() {
        // keep the original length
        data.truncate(data.len() - n);
    }
    true
}

fn remove_bytes(rng: &mut RngType, data: &mut Vec<u8>, min_len: u64, _max_len: u64) -> bool {
    if data.is_empty() {
        return false;
    }
    let n = std::cmp::min(rng.gen_range(1..=16), data.len());
    let pos = if n < data.len() {
        rng.gen_range(0..data.len() - n)
    } else {
        0
    };
    data.drain(pos..pos + n);
    if (data.len() as u64) < min_len || rng.gen() {
        // keep the original length
        data.extend((0..n).map(|_| rng.gen::<u8>()));
    }
    true
}

fn append_bytes(rng: &mut RngType, data: &mut Vec<u8>, _min_len: u64, max_len: u64) -> bool {
    const MAX: u64 = 256;
    if data.len() as u64 >= max_len {
        return false;
    }
    let n = MAX - biased_rand(rng, MAX, 10);
    let n = std::cmp::min(n, max_len - data.len() as u64);
    data.extend((0..n).map(|_| rng.gen::<u8>()));
    true
}

#[inline]
fn rand_width(rng: &mut RngType) -> usize {
    1 << rng.gen_range(0..4)
}

fn replace_int(rng: &mut RngType, data: &mut Vec<u8>, _min_len: u64, _max_len: u64) -> bool {
    let width = rand_width(rng);
    if data.len() < width {
        return false;
    }
    let pos = rng.gen_range(0..=data.len() - width);
    store_int(&mut data[pos..], rng.gen(), width);
    true
}

fn add_sub_int(rng: &mut RngType, data: &mut Vec<u8>, _min_len: u64, _max_len: u64) -> bool {
    let width = rand_width(rng);
    if data.len() < width {
        return false;
    }
    let pos = rng.gen_range(0..=data.len() - width);
    let mut v = load_int(&data[pos..], width);
    let mut delta = rng.gen_range(0..=2 * MAX_INC).wrapping_sub(MAX_INC);
    if delta == 0 {
        delta = 1;
    }
    if rng.gen_ratio(1, 10) {
        v = swap_int(swap_int(v, width).wrapping_add(delta), width);
    } else {
        v = v.wrapping_add(delta);
    }
    store_int(&mut data[pos..], v, width);
    true
}

fn set_interesting_int(
    rng: &mut RngType,
    data: &mut Vec<u8>,
    _min_len: u64,
    _max_len: u64,
) -> bool {
    let width = rand_width(rng);
    if data.len() < width {
        return false;
    }
    let pos = rng.gen_range(0..=data.len() - width);
    let mut v = rand_int64(rng);
    if rng.gen_ratio(1, 10) {
        v = v.swap_bytes();
    }
    store_int(&mut data[pos..], v, width);
    true
}

fn load_int(buf: &[u8], width: usize) -> u64 {
    match width {
        1 => buf[0] as u64,
        2 => u16::from_ne_bytes([buf[0], buf[1]]) as u64,
        4 => u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]) as u64,
        _ => {
            let mut b = [0; 8];
            b.copy_from_slice(&buf[..8]);
            u64::from_ne_bytes(b)
        }
    }
}

fn store_int(buf: &mut [u8], v: u64, width: usize) {
    match width {
        1 => buf[0] = v as u8,
        2 => buf[..2].copy_from_slice(&(v as u16).to_ne_bytes()),
        4 => buf[..4].copy_from_slice(&(v as u32).to_ne_bytes()),
        _ => buf[..8].copy_from_slice(&v.to_ne_bytes()),
    }
}

fn swap_int(v: u64, width: usize) -> u64 {
    match width {
        1 => v,
        2 => (v as u16).swap_bytes() as u64,
        4 => (v as u32).swap_bytes() as u64,
        _ => v.swap_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_len_in_bounds() {
        let mut rng = SmallRng::from_entropy();
        for _ in 0..1000 {
            let mut data = vec![0u8; 8];
            mutate_data(&mut rng, &mut data, 4, 16);
            assert!(data.len() >= 4 && data.len() <= 16, "len {}", data.len());
        }
        for _ in 0..100 {
            let mut data = vec![0u8; 16];
            mutate_data(&mut rng, &mut data, 16, 16);
            assert_eq!(data.len(), 16);
        }
    }

    #[test]
    fn data_changes() {
        let mut rng = SmallRng::seed_from_u64(51);
        let mut changed = 0;
        for _ in 0..100 {
            let mut data = vec![0x55u8; 32];
            mutate_data(&mut rng, &mut data, 0, MAX_BLOB_LEN);
            if data != vec![0x55u8; 32] {
                changed += 1;
            }
        }
        assert!(changed > 80);
    }

    #[test]
    fn int_load_store() {
        let mut buf = [0u8; 8];
        store_int(&mut buf, 0x1122_3344, 4);
        assert_eq!(load_int(&buf, 4), 0x1122_3344);
        assert_eq!(load_int(&buf, 8), 0x1122_3344);
        assert_eq!(swap_int(0x1122, 2), 0x2211);
    }

    #[test]
    fn out_size_moves() {
        let mut rng = SmallRng::seed_from_u64(52);
        for _ in 0..100 {
            let new = mutate_buffer_size(&mut rng, 10, 4, 64);
            assert!(new != 10 && (4..=64).contains(&new));
        }
        assert_eq!(mutate_buffer_size(&mut rng, 8, 8, 8), 8);
    }
}
