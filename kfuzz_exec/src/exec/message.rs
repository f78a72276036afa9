//! Communication messages with the executor.
//!
//! Every record is a sequence of little-endian fixed width fields.

use bytes::{Buf, BufMut};

pub const IN_MAGIC: u64 = 0xBADC_0FFE_EBAD_FACE;
pub const OUT_MAGIC: u32 = 0x0BAD_F00D;
/// Reply magic of a run that crashed the kernel.
pub const CRASH_MAGIC: u32 = 0xBADC_BADC;
/// Index of replies that carry signal of no specific call.
pub const EXTRA_REPLY_INDEX: u32 = 0xFFFF_FFFF;

macro_rules! wire_record {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $($field:ident : $ty:ident),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            $(pub $field: $ty),*
        }

        impl $name {
            pub const SIZE: usize = 0 $(+ std::mem::size_of::<$ty>())*;

            pub fn encode<B: BufMut>(&self, buf: &mut B) {
                $(wire_record!(@put buf, self.$field, $ty);)*
            }

            /// Decode one record, `None` if `buf` is too short.
            pub fn decode<B: Buf>(buf: &mut B) -> Option<Self> {
                if buf.remaining() < Self::SIZE {
                    return None;
                }
                Some(Self {
                    $($field: wire_record!(@get buf, $ty)),*
                })
            }

            pub fn to_bytes(&self) -> Vec<u8> {
                let mut ret = Vec::with_capacity(Self::SIZE);
                self.encode(&mut ret);
                ret
            }
        }
    };
    (@put $buf:ident, $val:expr, u64) => { $buf.put_u64_le($val) };
    (@put $buf:ident, $val:expr, u32) => { $buf.put_u32_le($val) };
    (@get $buf:ident, u64) => { $buf.get_u64_le() };
    (@get $buf:ident, u32) => { $buf.get_u32_le() };
}

wire_record! {
    pub struct HandshakeReq {
        magic: u64,
        env_flags: u64,
        pid: u64,
    }
}

wire_record! {
    pub struct HandshakeReply {
        magic: u32,
    }
}

wire_record! {
    /// Followed by the encoded prog on the pipe, unless it is staged in shared memory.
    pub struct ExecuteReq {
        magic: u64,
        env_flags: u64,
        exec_flags: u64,
        pid: u64,
        fault_call: u64,
        fault_nth: u64,
        prog_size: u64,
    }
}

wire_record! {
    /// If `done` is zero, a `CallReply` follows.
    pub struct ExecuteReply {
        magic: u32,
        done: u32,
        status: u32,
    }
}

wire_record! {
    /// Followed by `signal_size` and `cover_size` u32s and `comps_size` comparisons.
    pub struct CallReply {
        index: u32,
        num: u32,
        errno: u32,
        flags: u32,
        signal_size: u32,
        cover_size: u32,
        comps_size: u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_layout() {
        assert_eq!(HandshakeReq::SIZE, 24);
        assert_eq!(HandshakeReply::SIZE, 4);
        assert_eq!(ExecuteReq::SIZE, 56);
        assert_eq!(ExecuteReply::SIZE, 12);
        assert_eq!(CallReply::SIZE, 28);

        let reply = ExecuteReply {
            magic: OUT_MAGIC,
            done: 1,
            status: 67,
        };
        assert_eq!(
            reply.to_bytes(),
            [0x0d, 0xf0, 0xad, 0x0b, 1, 0, 0, 0, 67, 0, 0, 0]
        );
        let req = HandshakeReq {
            magic: IN_MAGIC,
            env_flags: 0x3,
            pid: 7,
        };
        let bytes = req.to_bytes();
        assert_eq!(&bytes[..8], &[0xce, 0xfa, 0xad, 0xeb, 0xfe, 0x0f, 0xdc, 0xba]);
        assert_eq!(HandshakeReq::decode(&mut &bytes[..]), Some(req));
    }

    #[test]
    fn decode_short_buffer() {
        let bytes = CallReply::default().to_bytes();
        let mut short = &bytes[..CallReply::SIZE - 1];
        assert!(CallReply::decode(&mut short).is_none());
        // nothing consumed
        assert_eq!(short.len(), CallReply::SIZE - 1);
    }
}
