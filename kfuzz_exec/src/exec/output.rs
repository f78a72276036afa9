//! Parsing of the executor output buffer.
//!
//! Layout: `u32` number of replies, then for each reply a `CallReply` followed by
//! its signal, cover and comparison records.
use super::{message::*, CallFlags, CALL_EXECUTED};
use crate::HashSet;
use bytes::Buf;
use kfuzz_core::{hints::CompMap, prog::Prog, signal::Cover};
use thiserror::Error;

const COMP_CONST_MASK: u32 = 1;
const COMP_SIZE_MASK: u32 = 6;
const COMP_SIZE8: u32 = 6;

/// Execution of one call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallExecInfo {
    pub flags: CallFlags,
    /// Feedback signal.
    pub signal: Vec<u32>,
    /// Raw coverage trace.
    pub cover: Vec<u32>,
    /// Comparison operands.
    pub comps: CompMap,
    /// Syscall errno, indicating the success or failure.
    pub errno: i32,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProgExecInfo {
    pub call_infos: Vec<CallExecInfo>,
    /// Signal and cover not attributable to any call, merged over all fragments.
    pub extra: Option<CallExecInfo>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseOutputError {
    #[error("failed to read number of calls")]
    NumCalls,
    #[error("failed to read call {0} reply")]
    CallReply(u32),
    #[error("bad call {i} index {index}/{ncalls}")]
    BadIndex { i: u32, index: u32, ncalls: usize },
    #[error("wrong call {i} num {num}/{expected}")]
    WrongNum { i: u32, num: u32, expected: usize },
    #[error("duplicate reply for call {i}/{index}/{num}")]
    Duplicate { i: u32, index: u32, num: u32 },
    #[error("call {i}/{index}/{num}: {what} overflow: {size}/{left}")]
    Overflow {
        i: u32,
        index: u32,
        num: u32,
        what: &'static str,
        size: u32,
        left: usize,
    },
    #[error("failed to read comp {0}")]
    CompRead(u32),
    #[error("bad comp {i} type {typ}")]
    BadCompType { i: u32, typ: u32 },
}

/// Parse the replies of executing `p` from `out`.
pub fn parse_output(p: &Prog, mut out: &[u8]) -> Result<ProgExecInfo, ParseOutputError> {
    let ncmd = read_u32(&mut out).ok_or(ParseOutputError::NumCalls)?;
    let mut call_infos = vec![CallExecInfo::default(); p.len()];
    let mut seen = vec![false; p.len()];
    let mut extra = Vec::new();

    for i in 0..ncmd {
        let reply = CallReply::decode(&mut out).ok_or(ParseOutputError::CallReply(i))?;
        let info = if reply.index != EXTRA_REPLY_INDEX {
            let idx = reply.index as usize;
            if idx >= call_infos.len() {
                return Err(ParseOutputError::BadIndex {
                    i,
                    index: reply.index,
                    ncalls: call_infos.len(),
                });
            }
            let sid = p.calls()[idx].sid();
            if sid != reply.num as usize {
                return Err(ParseOutputError::WrongNum {
                    i,
                    num: reply.num,
                    expected: sid,
                });
            }
            if seen[idx] {
                return Err(ParseOutputError::Duplicate {
                    i,
                    index: reply.index,
                    num: reply.num,
                });
            }
            seen[idx] = true;
            let info = &mut call_infos[idx];
            info.errno = reply.errno as i32;
            info.flags = reply.flags;
            info
        } else {
            extra.push(CallExecInfo::default());
            extra.last_mut().unwrap()
        };

        let overflow = |what, size, left| ParseOutputError::Overflow {
            i,
            index: reply.index,
            num: reply.num,
            what,
            size,
            left,
        };
        let left = out.len();
        info.signal = read_u32_array(&mut out, reply.signal_size)
            .ok_or_else(|| overflow("signal", reply.signal_size, left))?;
        let left = out.len();
        info.cover = read_u32_array(&mut out, reply.cover_size)
            .ok_or_else(|| overflow("cover", reply.cover_size, left))?;
        info.comps = read_comps(&mut out, reply.comps_size)?;
    }

    Ok(ProgExecInfo {
        call_infos,
        extra: if extra.is_empty() {
            None
        } else {
            Some(merge_extra(extra))
        },
    })
}

/// Synthesize signal from syscall ids and errnos, for runs without coverage.
pub fn add_fallback_signal(p: &Prog, info: &mut ProgExecInfo) {
    for (call, info) in p.calls().iter().zip(info.call_infos.iter_mut()) {
        if info.flags & CALL_EXECUTED == 0 {
            continue;
        }
        let elem = ((call.sid() as u32) << 16) | (info.errno as u32 & 0xffff);
        info.signal = vec![elem];
    }
}

fn merge_extra(extras: Vec<CallExecInfo>) -> CallExecInfo {
    let mut signal = HashSet::new();
    let mut cover = Cover::default();
    for e in extras {
        signal.extend(e.signal);
        cover.merge(&e.cover);
    }
    let mut signal = signal.into_iter().collect::<Vec<_>>();
    signal.sort_unstable();
    CallExecInfo {
        signal,
        cover: cover.pcs().to_vec(),
        ..CallExecInfo::default()
    }
}

fn read_comps(out: &mut &[u8], comps_size: u32) -> Result<CompMap, ParseOutputError> {
    let mut comps = CompMap::new();
    for i in 0..comps_size {
        let typ = read_u32(out).ok_or(ParseOutputError::CompRead(i))?;
        if typ > COMP_CONST_MASK | COMP_SIZE_MASK {
            return Err(ParseOutputError::BadCompType { i, typ });
        }
        let (op1, op2) = if typ & COMP_SIZE_MASK == COMP_SIZE8 {
            (read_u64(out), read_u64(out))
        } else {
            (
                read_u32(out).map(u64::from),
                read_u32(out).map(u64::from),
            )
        };
        let (op1, op2) = match (op1, op2) {
            (Some(op1), Some(op2)) => (op1, op2),
            _ => return Err(ParseOutputError::CompRead(i)),
        };
        if op1 == op2 {
            continue;
        }
        comps.add_comp(op2, op1);
        // const operands can not be args of calls
        if typ & COMP_CONST_MASK == 0 {
            comps.add_comp(op1, op2);
        }
    }
    Ok(comps)
}

fn read_u32(out: &mut &[u8]) -> Option<u32> {
    if out.remaining() < 4 {
        return None;
    }
    Some(out.get_u32_le())
}

fn read_u64(out: &mut &[u8]) -> Option<u64> {
    if out.remaining() < 8 {
        return None;
    }
    Some(out.get_u64_le())
}

fn read_u32_array(out: &mut &[u8], size: u32) -> Option<Vec<u32>> {
    let n = size as usize;
    if n.checked_mul(4)? > out.remaining() {
        return None;
    }
    Some((0..n).map(|_| out.get_u32_le()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use kfuzz_core::{parse::parse_prog, target::test_target};

    fn reply(buf: &mut Vec<u8>, index: u32, num: u32, signal: &[u32], cover: &[u32]) {
        CallReply {
            index,
            num,
            errno: 0,
            flags: CALL_EXECUTED,
            signal_size: signal.len() as u32,
            cover_size: cover.len() as u32,
            comps_size: 0,
        }
        .encode(buf);
        signal.iter().for_each(|s| buf.put_u32_le(*s));
        cover.iter().for_each(|c| buf.put_u32_le(*c));
    }

    fn two_calls() -> (kfuzz_core::target::Target, Prog) {
        let target = test_target();
        let p = parse_prog(&target, "getpid()\nclose(0x3)\n").unwrap();
        (target, p)
    }

    #[test]
    fn parse_calls_and_extra() {
        let (target, p) = two_calls();
        let getpid = target.syscall_of_name("getpid").unwrap().id() as u32;
        let close = target.syscall_of_name("close").unwrap().id() as u32;
        let mut buf = Vec::new();
        buf.put_u32_le(4);
        reply(&mut buf, 1, close, &[10, 11], &[100]);
        reply(&mut buf, EXTRA_REPLY_INDEX, 0, &[7, 8], &[300, 200]);
        reply(&mut buf, 0, getpid, &[1], &[]);
        reply(&mut buf, EXTRA_REPLY_INDEX, 0, &[8, 9], &[200]);

        let info = parse_output(&p, &buf).unwrap();
        assert_eq!(info.call_infos.len(), 2);
        assert_eq!(info.call_infos[0].signal, vec![1]);
        assert_eq!(info.call_infos[1].signal, vec![10, 11]);
        assert_eq!(info.call_infos[1].cover, vec![100]);
        let extra = info.extra.unwrap();
        assert_eq!(extra.signal, vec![7, 8, 9]);
        assert_eq!(extra.cover, vec![200, 300]);
    }

    #[test]
    fn reject_bad_replies() {
        let (target, p) = two_calls();
        let close = target.syscall_of_name("close").unwrap().id() as u32;
        assert_eq!(parse_output(&p, &[1, 0]), Err(ParseOutputError::NumCalls));

        let mut buf = Vec::new();
        buf.put_u32_le(1);
        reply(&mut buf, 2, close, &[], &[]);
        assert!(matches!(
            parse_output(&p, &buf),
            Err(ParseOutputError::BadIndex { index: 2, .. })
        ));

        let mut buf = Vec::new();
        buf.put_u32_le(1);
        reply(&mut buf, 0, close, &[], &[]);
        assert!(matches!(
            parse_output(&p, &buf),
            Err(ParseOutputError::WrongNum { .. })
        ));

        let mut buf = Vec::new();
        buf.put_u32_le(2);
        reply(&mut buf, 1, close, &[], &[]);
        reply(&mut buf, 1, close, &[], &[]);
        assert!(matches!(
            parse_output(&p, &buf),
            Err(ParseOutputError::Duplicate { index: 1, .. })
        ));

        // reply count larger than the replies present
        let mut buf = Vec::new();
        buf.put_u32_le(2);
        reply(&mut buf, 1, close, &[], &[]);
        assert_eq!(parse_output(&p, &buf), Err(ParseOutputError::CallReply(1)));
    }

    #[test]
    fn length_overflow_is_an_error() {
        let (target, p) = two_calls();
        let close = target.syscall_of_name("close").unwrap().id() as u32;
        let mut buf = Vec::new();
        buf.put_u32_le(1);
        CallReply {
            index: 1,
            num: close,
            signal_size: 2,
            cover_size: u32::MAX,
            ..CallReply::default()
        }
        .encode(&mut buf);
        buf.put_u32_le(1);
        buf.put_u32_le(2);
        buf.put_u32_le(3);
        assert_eq!(
            parse_output(&p, &buf),
            Err(ParseOutputError::Overflow {
                i: 0,
                index: 1,
                num: close,
                what: "cover",
                size: u32::MAX,
                left: 4,
            })
        );

        let mut buf = Vec::new();
        buf.put_u32_le(1);
        CallReply {
            index: 1,
            num: close,
            signal_size: 3,
            ..CallReply::default()
        }
        .encode(&mut buf);
        buf.put_u32_le(1);
        assert!(matches!(
            parse_output(&p, &buf),
            Err(ParseOutputError::Overflow { what: "signal", .. })
        ));
    }

    #[test]
    fn parse_comparisons() {
        let (target, p) = two_calls();
        let close = target.syscall_of_name("close").unwrap().id() as u32;
        let mut buf = Vec::new();
        buf.put_u32_le(1);
        CallReply {
            index: 1,
            num: close,
            comps_size: 4,
            ..CallReply::default()
        }
        .encode(&mut buf);
        // 4-byte pair
        buf.put_u32_le(0);
        buf.put_u32_le(3);
        buf.put_u32_le(0x10);
        // equal pair, dropped
        buf.put_u32_le(0);
        buf.put_u32_le(5);
        buf.put_u32_le(5);
        // 8-byte pair with const operand
        buf.put_u32_le(COMP_SIZE8 | COMP_CONST_MASK);
        buf.put_u64_le(0xdead_beef_0000);
        buf.put_u64_le(0x42);
        // bad type
        buf.put_u32_le(8);

        let err = parse_output(&p, &buf).unwrap_err();
        assert_eq!(err, ParseOutputError::BadCompType { i: 3, typ: 8 });

        let len = buf.len();
        buf[4 + 6 * 4..8 + 6 * 4].copy_from_slice(&3u32.to_le_bytes());
        let info = parse_output(&p, &buf[..len - 4]).unwrap();
        let comps = &info.call_infos[1].comps;
        assert!(comps.get(3).unwrap().contains(&0x10));
        assert!(comps.get(0x10).unwrap().contains(&3));
        assert!(comps.get(5).is_none());
        assert!(comps.get(0x42).unwrap().contains(&0xdead_beef_0000));
        assert!(comps.get(0xdead_beef_0000).is_none());
    }

    #[test]
    fn fallback_signal_from_errno() {
        let (target, p) = two_calls();
        let close = target.syscall_of_name("close").unwrap().id() as u32;
        let mut info = ProgExecInfo {
            call_infos: vec![
                CallExecInfo::default(),
                CallExecInfo {
                    flags: CALL_EXECUTED,
                    errno: 9,
                    ..CallExecInfo::default()
                },
            ],
            extra: None,
        };
        add_fallback_signal(&p, &mut info);
        assert!(info.call_infos[0].signal.is_empty());
        assert_eq!(info.call_infos[1].signal, vec![(close << 16) | 9]);
    }
}
