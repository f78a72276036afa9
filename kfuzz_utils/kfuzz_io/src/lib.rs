//! Background reading of worker diagnostic output.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

pub mod thread;

/// Default capacity of the output ring, 128 KiB.
pub const DEFAULT_RING_CAP: usize = 128 << 10;

/// Byte ring that only keeps the most recent output.
///
/// Once the ring is 3/4 full, everything but the last half of the capacity is dropped.
#[derive(Debug, Clone)]
pub struct RingBuf {
    cap: usize,
    data: Vec<u8>,
}

impl RingBuf {
    pub fn new(cap: usize) -> Self {
        assert!(cap >= 2);
        Self {
            cap,
            data: Vec::with_capacity(cap),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        let bytes = if bytes.len() > self.cap {
            &bytes[bytes.len() - self.cap..]
        } else {
            bytes
        };
        self.data.extend_from_slice(bytes);
        if self.data.len() >= self.cap / 4 * 3 {
            let keep = self.cap / 2;
            if self.data.len() > keep {
                let drop_len = self.data.len() - keep;
                self.data.drain(..drop_len);
            }
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

#[derive(Debug)]
pub struct BackgroundIoHandle {
    buf: Arc<Mutex<RingBuf>>,
    finished: Arc<AtomicBool>,
}

impl BackgroundIoHandle {
    fn new(buf: Arc<Mutex<RingBuf>>, finished: Arc<AtomicBool>) -> Self {
        Self { buf, finished }
    }

    /// Take the buffered output.
    pub fn current_data(&self) -> Vec<u8> {
        let mut buf = self.buf.lock().unwrap();
        buf.take()
    }

    pub fn clear_current(&self) {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
    }

    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Wait until the reader hits eof or `timeout` passed, then take the buffered output.
    pub fn wait_finish(self, timeout: Duration) -> Vec<u8> {
        let start = std::time::Instant::now();
        while !self.finished() && start.elapsed() < timeout {
            std::thread::sleep(Duration::from_millis(10));
        }
        self.current_data()
    }
}

impl Clone for BackgroundIoHandle {
    fn clone(&self) -> Self {
        BackgroundIoHandle {
            buf: Arc::clone(&self.buf),
            finished: Arc::clone(&self.finished),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_keeps_tail() {
        let mut r = RingBuf::new(16);
        r.push(b"0123456789");
        assert_eq!(r.as_slice(), b"0123456789");
        r.push(b"ab");
        // 12 bytes hit 3/4 of 16, keep the last 8
        assert_eq!(r.as_slice(), b"456789ab");
        r.push(&[b'x'; 40]);
        assert_eq!(r.as_slice(), &[b'x'; 8][..]);
        assert_eq!(r.take().len(), 8);
        assert!(r.is_empty());
    }
}
