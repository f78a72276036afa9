use crate::{BackgroundIoHandle, RingBuf, DEFAULT_RING_CAP};
use std::{
    fs::File,
    io::Read,
    os::unix::prelude::{FromRawFd, IntoRawFd},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

/// Read `f` in a background thread until eof, keeping the last bytes in a ring.
pub fn read_background<T: IntoRawFd>(f: T) -> BackgroundIoHandle {
    read_background_with_cap(f, DEFAULT_RING_CAP)
}

pub fn read_background_with_cap<T: IntoRawFd>(f: T, cap: usize) -> BackgroundIoHandle {
    let fd = f.into_raw_fd();
    // SAFETY: ownership of the fd is moved from `f`.
    let mut f = unsafe { File::from_raw_fd(fd) };
    let buf = Arc::new(Mutex::new(RingBuf::new(cap)));
    let finished = Arc::new(AtomicBool::new(false));
    let buf1 = Arc::clone(&buf);
    let finished1 = Arc::clone(&finished);

    let ret = std::thread::Builder::new()
        .name("kfuzz-bg-reader".into())
        .spawn(move || {
            let mut tmp = vec![0_u8; 1024 * 128].into_boxed_slice();
            while let Ok(sz) = f.read(&mut tmp[..]) {
                if sz == 0 {
                    break;
                }
                let mut shared_buf = buf1.lock().unwrap();
                shared_buf.push(&tmp[..sz]);
            }
            finished1.store(true, Ordering::Release);
        });
    if let Err(e) = ret {
        log::warn!("failed to spawn background reader: {}", e);
        finished.store(true, Ordering::Release);
    }

    BackgroundIoHandle::new(buf, finished)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};
    use std::time::Duration;

    #[test]
    fn read_child_output() {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("printf hello; printf ' world' 1>&2")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let out = read_background(child.stdout.take().unwrap());
        let err = read_background(child.stderr.take().unwrap());
        child.wait().unwrap();
        assert_eq!(out.wait_finish(Duration::from_secs(5)), b"hello");
        assert_eq!(err.wait_finish(Duration::from_secs(5)), b" world");
    }
}
