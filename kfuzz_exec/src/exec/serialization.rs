//! Encoding of progs into the exec format interpreted by the executor.
//!
//! A prog is a stream of native-endian u64 words. Each call is preceded by the
//! copyin instructions of its pointees and followed by the copyout instructions of
//! its used results, the stream ends with `EXEC_INSTR_EOF`.
use crate::HashMap;
use bytes::BufMut;
use iota::iota;
use kfuzz_core::{
    prog::{Call, Prog},
    target::Target,
    ty::{Dir, TypeKind},
    value::{ResId, Value, ValueKind},
};
use thiserror::Error;

iota! {
    pub const EXEC_INSTR_EOF : u64 = (u64::MAX) ^ (iota);
        , EXEC_INSTR_COPY_IN
        , EXEC_INSTR_COPY_OUT
}

iota! {
    pub const EXEC_ARG_CONST: u64 = iota;
        , EXEC_ARG_RESULT
        , EXEC_ARG_DATA
        , EXEC_ARG_CSUM
}

pub const EXEC_ARG_DATA_READABLE: u64 = 1 << 63;
pub const EXEC_NO_COPYOUT: u64 = u64::MAX;
pub const EXEC_MAX_COMMANDS: u64 = 1000;

#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("buffer too small to serialize the prog, provided size: {provided} bytes")]
    BufferTooSmall { provided: usize },
    #[error("too many copyout results: {0}")]
    TooManyCommands(u64),
}

/// Serialize `p` into `buf`, returns the number of bytes written.
pub fn serialize(target: &Target, p: &Prog, buf: &mut [u8]) -> Result<usize, SerializeError> {
    let provided = buf.len();
    let mut ctx = ExecCtx {
        target,
        prog: p,
        buf,
        res_args: HashMap::default(),
        copyout_seq: 0,
        eof: false,
    };

    for call in p.calls() {
        ctx.serialize_call(call);
    }
    ctx.write_u64(EXEC_INSTR_EOF);

    if ctx.eof {
        Err(SerializeError::BufferTooSmall { provided })
    } else if ctx.copyout_seq > EXEC_MAX_COMMANDS {
        Err(SerializeError::TooManyCommands(ctx.copyout_seq))
    } else {
        Ok(provided - ctx.buf.len())
    }
}

struct ExecCtx<'a, 'b> {
    target: &'a Target,
    prog: &'a Prog,
    buf: &'b mut [u8],
    res_args: HashMap<ResId, ArgInfo>,
    copyout_seq: u64,
    eof: bool,
}

#[derive(Debug, Clone, Copy)]
struct ArgInfo {
    addr: u64,
    idx: Option<u64>,
    ret: bool,
}

impl ArgInfo {
    fn with_idx(idx: u64) -> Self {
        Self {
            addr: 0,
            idx: Some(idx),
            ret: true,
        }
    }

    fn with_addr(addr: u64) -> Self {
        Self {
            addr,
            idx: None,
            ret: false,
        }
    }
}

impl ExecCtx<'_, '_> {
    fn serialize_call(&mut self, c: &Call) {
        self.write_copyin(c);
        self.write_u64(c.sid() as u64);
        match c.ret().and_then(|r| r.as_res()) {
            Some(ret) if self.used(ret.id) => {
                let idx = self.copyout_seq;
                self.copyout_seq += 1;
                self.res_args.insert(ret.id, ArgInfo::with_idx(idx));
                self.write_u64(idx);
            }
            _ => self.write_u64(EXEC_NO_COPYOUT),
        }
        self.write_u64(c.args().len() as u64);
        for val in c.args() {
            self.write_arg(val);
        }
        self.write_copyout(c);
    }

    fn used(&self, id: ResId) -> bool {
        self.prog.uses(id).map(|u| !u.is_empty()).unwrap_or(false)
    }

    fn write_copyin(&mut self, c: &Call) {
        let target = self.target;
        foreach_call_args(target, c, |val, ctx| {
            let base = match ctx.base {
                Some(base) => base,
                None => return,
            };
            let addr = base + ctx.offset;
            if let Some(res) = val.as_res() {
                if res.is_producer() {
                    self.res_args.insert(res.id, ArgInfo::with_addr(addr));
                }
            }
            if matches!(val.kind(), ValueKind::Group | ValueKind::Union) {
                return;
            }
            if val.dir() == Dir::Out || val.size(target) == 0 {
                return;
            }
            self.write_u64(EXEC_INSTR_COPY_IN);
            self.write_u64(addr);
            self.write_arg(val);
        })
    }

    fn write_copyout(&mut self, c: &Call) {
        let target = self.target;
        let mut outs = Vec::new();
        foreach_call_args(target, c, |val, _| {
            if let Some(res) = val.as_res() {
                if res.is_producer() && self.used(res.id) {
                    outs.push((res.id, res.size(target)));
                }
            }
        });
        for (id, size) in outs {
            let info = match self.res_args.get_mut(&id) {
                Some(info) if !info.ret => info,
                _ => continue,
            };
            let idx = self.copyout_seq;
            self.copyout_seq += 1;
            info.idx = Some(idx);
            let addr = info.addr;
            self.write_u64(EXEC_INSTR_COPY_OUT);
            self.write_u64(idx);
            self.write_u64(addr);
            self.write_u64(size);
        }
    }

    fn write_arg(&mut self, val: &Value) {
        let target = self.target;
        match val.kind() {
            ValueKind::Integer => {
                let val = val.checked_as_int();
                let (int_val, pid_stride) = val.value(target);
                self.write_const_arg(val.size(target), int_val, pid_stride);
            }
            ValueKind::Res => {
                let val = val.checked_as_res();
                let src_idx = val
                    .src
                    .and_then(|src| self.res_args.get(&src))
                    .and_then(|info| info.idx);
                match src_idx {
                    Some(idx) => {
                        self.write_u64(EXEC_ARG_RESULT);
                        self.write_u64(val.size(target));
                        self.write_u64(idx);
                        self.write_u64(val.op_div);
                        self.write_u64(val.op_add);
                        self.write_u64(val.val);
                    }
                    None => self.write_const_arg(val.size(target), val.val, 0),
                }
            }
            ValueKind::Ptr => {
                let val = val.checked_as_ptr();
                self.write_const_arg(val.size(target), val.encoded_addr(target), 0);
            }
            ValueKind::Vma => {
                let val = val.checked_as_vma();
                self.write_const_arg(val.size(target), val.encoded_addr(target), 0);
            }
            ValueKind::Data => {
                let val = val.checked_as_data();
                let bs = &val.data;
                if bs.is_empty() {
                    return;
                }
                self.write_u64(EXEC_ARG_DATA);
                let mut flags = bs.len() as u64;
                if matches!(
                    val.ty(target).kind(),
                    TypeKind::BufferFilename | TypeKind::BufferString
                ) {
                    flags |= EXEC_ARG_DATA_READABLE;
                }
                self.write_u64(flags);
                self.write_slice(bs);
                let pad = (8 - bs.len() % 8) % 8;
                if pad != 0 {
                    static PAD: [u8; 8] = [0; 8];
                    self.write_slice(&PAD[..pad]);
                }
            }
            ValueKind::Union => {
                let val = val.checked_as_union();
                self.write_arg(&val.option)
            }
            ValueKind::Group => {
                // struct args are passed by pointer, only pointees are groups
                let val = val.checked_as_group();
                for inner in val.inner.iter() {
                    self.write_arg(inner);
                }
            }
        }
    }

    fn write_const_arg(&mut self, sz: u64, val: u64, pid_stride: u64) {
        self.write_u64(EXEC_ARG_CONST);
        let meta = sz | pid_stride << 32;
        self.write_u64(meta);
        self.write_u64(val);
    }

    fn write_u64(&mut self, val: u64) {
        if self.buf.remaining_mut() >= 8 {
            if cfg!(target_endian = "little") {
                self.buf.put_u64_le(val);
            } else {
                self.buf.put_u64(val);
            }
        } else {
            self.eof = true;
        }
    }

    fn write_slice(&mut self, slice: &[u8]) {
        if self.buf.remaining_mut() >= slice.len() {
            self.buf.put_slice(slice);
        } else {
            self.eof = true;
        }
    }
}

#[derive(Clone)]
struct ArgCtx {
    base: Option<u64>,
    offset: u64,
}

fn foreach_call_args(target: &Target, call: &Call, mut f: impl FnMut(&Value, &ArgCtx)) {
    let mut ctx = ArgCtx {
        base: None,
        offset: 0,
    };
    if let Some(ret) = call.ret() {
        foreach_arg(target, ret, &mut ctx, &mut f)
    }
    for val in call.args() {
        foreach_arg(target, val, &mut ctx, &mut f)
    }
}

fn foreach_arg(
    target: &Target,
    val: &Value,
    ctx: &mut ArgCtx,
    f: &mut dyn FnMut(&Value, &ArgCtx),
) {
    let ctx_backup = ctx.clone();

    f(val, ctx);

    match val.kind() {
        ValueKind::Group => {
            let val = val.checked_as_group();
            for inner in &val.inner {
                foreach_arg(target, inner, ctx, f);
                ctx.offset += inner.size(target);
            }
        }
        ValueKind::Union => {
            let val = val.checked_as_union();
            foreach_arg(target, &val.option, ctx, f);
        }
        ValueKind::Ptr => {
            let val = val.checked_as_ptr();
            if let Some(pointee) = val.pointee.as_ref() {
                ctx.base = Some(val.encoded_addr(target));
                ctx.offset = 0;
                foreach_arg(target, pointee, ctx, f);
            }
        }
        _ => {}
    }

    *ctx = ctx_backup;
}

#[cfg(test)]
mod tests {
    use super::*;
    use kfuzz_core::{
        gen::gen_prog, parse::parse_prog, select::ChoiceTable, target::test_target, RngType,
    };
    use rand::SeedableRng;

    fn words(buf: &[u8]) -> Vec<u64> {
        buf.chunks(8)
            .map(|c| {
                let mut w = [0; 8];
                w.copy_from_slice(c);
                u64::from_ne_bytes(w)
            })
            .collect()
    }

    #[test]
    fn serialize_simple_call() {
        let target = test_target();
        let p = parse_prog(&target, "getpid()\n").unwrap();
        let mut buf = vec![0; 64];
        let n = serialize(&target, &p, &mut buf).unwrap();
        let sid = target.syscall_of_name("getpid").unwrap().id() as u64;
        assert_eq!(words(&buf[..n]), vec![sid, EXEC_NO_COPYOUT, 0, EXEC_INSTR_EOF]);
    }

    #[test]
    fn serialize_result_and_data() {
        let target = test_target();
        let p = parse_prog(
            &target,
            "r0 = open(&(0x20000000)='./file0\\x00', 0x2, 0x0)\nclose(r0)\n",
        )
        .unwrap();
        let mut buf = vec![0; 512];
        let n = serialize(&target, &p, &mut buf).unwrap();
        let open = target.syscall_of_name("open").unwrap().id() as u64;
        let close = target.syscall_of_name("close").unwrap().id() as u64;
        let name = u64::from_ne_bytes(*b"./file0\0");
        let expected = vec![
            // copyin of the filename
            EXEC_INSTR_COPY_IN,
            0x2000_0000,
            EXEC_ARG_DATA,
            8 | EXEC_ARG_DATA_READABLE,
            name,
            // open
            open,
            0,
            3,
            EXEC_ARG_CONST,
            8,
            0x2000_0000,
            EXEC_ARG_CONST,
            4,
            0x2,
            EXEC_ARG_CONST,
            4,
            0x0,
            // close(r0)
            close,
            EXEC_NO_COPYOUT,
            1,
            EXEC_ARG_RESULT,
            4,
            0,
            0,
            0,
            u64::MAX,
            EXEC_INSTR_EOF,
        ];
        assert_eq!(words(&buf[..n]), expected);
    }

    #[test]
    fn serialize_copyout_of_pointee_results() {
        let target = test_target();
        let p = parse_prog(
            &target,
            "pipe(&(0x20000000)=[<r0=>0xffffffffffffffff, <r1=>0xffffffffffffffff])\nclose(r1)\n",
        )
        .unwrap();
        let mut buf = vec![0; 512];
        let n = serialize(&target, &p, &mut buf).unwrap();
        let w = words(&buf[..n]);
        // only the used result is copied out, from the second slot
        let pos = w.iter().position(|w| *w == EXEC_INSTR_COPY_OUT).unwrap();
        assert_eq!(&w[pos..pos + 4], &[EXEC_INSTR_COPY_OUT, 0, 0x2000_0004, 4]);
        assert_eq!(w.iter().filter(|w| **w == EXEC_INSTR_COPY_OUT).count(), 1);
    }

    #[test]
    fn serialize_buffer_too_small() {
        let target = test_target();
        let ct = ChoiceTable::new(&target, None);
        let mut rng = RngType::seed_from_u64(7);
        let p = gen_prog(&target, &ct, &mut rng, 8);
        let mut buf = vec![0; 16];
        assert!(matches!(
            serialize(&target, &p, &mut buf),
            Err(SerializeError::BufferTooSmall { provided: 16 })
        ));
        let mut buf = vec![0; 1 << 20];
        assert!(serialize(&target, &p, &mut buf).is_ok());
    }
}
