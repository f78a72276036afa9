//! Generate value for `blob`, `string`, `filename` type.
use rand::prelude::*;

use crate::{
    context::Context,
    ty::{BufferStringType, Dir, Type},
    value::{DataValue, Value},
    RngType,
};

pub fn gen_buffer_blob(_ctx: &mut Context, rng: &mut RngType, ty: &Type, dir: Dir) -> Value {
    let blob_ty = ty.checked_as_buffer_blob();
    let len = match blob_ty.range() {
        Some(range) => rng.gen_range(range.clone()),
        None => rand_buf_len(rng),
    };
    if dir == Dir::Out {
        DataValue::new_out_data(ty.id(), dir, len).into()
    } else {
        DataValue::new(ty.id(), dir, rand_blob(rng, len as usize)).into()
    }
}

/// Length of blobs without range: mostly short, sometimes a page.
pub(crate) fn rand_buf_len(rng: &mut RngType) -> u64 {
    if rng.gen_ratio(50, 56) {
        rng.gen_range(0..256)
    } else if rng.gen_ratio(5, 6) {
        4 << 10
    } else {
        0
    }
}

pub(crate) fn rand_blob(rng: &mut RngType, len: usize) -> Vec<u8> {
    let mut buf = vec![0; len];
    rng.fill_bytes(&mut buf);
    buf
}

pub fn gen_buffer_string(ctx: &mut Context, rng: &mut RngType, ty: &Type, dir: Dir) -> Value {
    let str_ty = ty.checked_as_buffer_string();
    if dir == Dir::Out {
        let len = if !ty.varlen() {
            ty.size()
        } else if let Some(val) = str_ty.vals().choose(rng) {
            val.len() as u64
        } else {
            rand_buf_len(rng)
        };
        DataValue::new_out_data(ty.id(), dir, len).into()
    } else {
        let mut val = rand_buffer_string(ctx, rng, str_ty);
        if !ty.varlen() {
            val.resize(ty.size() as usize, 0);
        }
        DataValue::new(ty.id(), dir, val).into()
    }
}

fn rand_buffer_string(ctx: &mut Context, rng: &mut RngType, ty: &BufferStringType) -> Vec<u8> {
    if let Some(val) = ty.vals().choose(rng) {
        return Vec::from(&val[..]);
    }

    if !ctx.strs().is_empty() && rng.gen() {
        return ctx.strs().choose(rng).cloned().unwrap();
    }

    let mut val = gen_rand_string(rng);
    // terminate with zero, except for a few strings
    if rng.gen_ratio(1, 100) == ty.noz() {
        val.push(0);
    }
    ctx.record_str(val.clone());
    val
}

fn gen_rand_string(rng: &mut RngType) -> Vec<u8> {
    const PUNCT: [u8; 23] = [
        b'!', b'@', b'#', b'$', b'%', b'^', b'&', b'*', b'(', b')', b'-', b'+', b'\\', b'/', b':',
        b'.', b',', b'-', b'\'', b'[', b']', b'{', b'}',
    ];

    let mut buf = Vec::new();
    while rng.gen_ratio(3, 4) {
        if rng.gen_ratio(10, 11) {
            buf.push(PUNCT.choose(rng).copied().unwrap());
        } else {
            buf.push(rng.gen());
        }
    }
    buf
}

pub fn gen_buffer_filename(ctx: &mut Context, rng: &mut RngType, ty: &Type, dir: Dir) -> Value {
    if dir == Dir::Out {
        let len = if !ty.varlen() {
            ty.size()
        } else {
            rand_filename_len(rng)
        };
        DataValue::new_out_data(ty.id(), dir, len).into()
    } else {
        let fname_ty = ty.checked_as_buffer_filename();
        let val = match fname_ty.vals().choose(rng) {
            Some(val) => val.to_vec(),
            None => rand_filename(ctx, rng, ty, fname_ty.noz()),
        };
        DataValue::new(ty.id(), dir, val).into()
    }
}

pub const UNIX_PATH_MAX: u64 = 108;
pub const PATH_MAX: u64 = 4096;

#[inline]
fn rand_filename_len(rng: &mut RngType) -> u64 {
    match rng.gen_range(0..=2) {
        0 => rng.gen_range(0..100),
        1 => UNIX_PATH_MAX,
        _ => PATH_MAX,
    }
}

/// Random filename, existing ones are reused mostly.
pub(crate) fn rand_filename(ctx: &mut Context, rng: &mut RngType, ty: &Type, noz: bool) -> Vec<u8> {
    let mut val = if rng.gen_ratio(1, 100) {
        rand_special_file(rng)
    } else if ctx.filenames().is_empty() || rng.gen_ratio(1, 10) {
        gen_rand_filename(ctx, rng)
    } else {
        ctx.filenames().choose(rng).cloned().unwrap()
    };
    if !ty.varlen() {
        val.resize(ty.size() as usize, 0);
    } else if !noz {
        val.push(0);
    }
    val.shrink_to_fit();
    val
}

fn rand_special_file(rng: &mut RngType) -> Vec<u8> {
    const SPECIAL_FILES: [&[u8]; 2] = [b"", b"."];
    SPECIAL_FILES.choose(rng).map(|v| Vec::from(*v)).unwrap()
}

fn gen_rand_filename(ctx: &mut Context, rng: &mut RngType) -> Vec<u8> {
    let mut fname = b".".to_vec();
    if !ctx.filenames().is_empty() && rng.gen() {
        let base = ctx.filenames().choose(rng).cloned().unwrap();
        if !base.is_empty() {
            fname = base;
        }
        if fname[0] != b'.' && rng.gen_ratio(1, 10) {
            fname.extend_from_slice(b"/..");
        }
    }
    let mut i = 0;
    loop {
        let mut f = fname.clone();
        f.extend_from_slice(b"/file");
        f.extend_from_slice(i.to_string().as_bytes());
        if ctx.record_filename(&f) {
            return f;
        }
        i += 1;
    }
}
