//! Hang detection of running progs.
use nix::{
    sys::signal::{kill, Signal::SIGKILL},
    unistd::Pid,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

enum WatchCmd {
    Arm { pid: i32, timeout: Duration },
    Disarm,
}

/// Timer thread that kills the worker if a run does not finish in time.
///
/// `arm` and `disarm` must be paired, `disarm` returns once the timer is idle again,
/// so a late timeout can not hit the next run.
pub struct Watchdog {
    cmd_tx: Option<Sender<WatchCmd>>,
    ack_rx: Receiver<()>,
    fired: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn new() -> std::io::Result<Self> {
        let (cmd_tx, cmd_rx) = channel();
        let (ack_tx, ack_rx) = channel();
        let fired = Arc::new(AtomicBool::new(false));
        let fired1 = Arc::clone(&fired);
        let handle = std::thread::Builder::new()
            .name("kfuzz-watchdog".into())
            .spawn(move || watch(cmd_rx, ack_tx, fired1))?;
        Ok(Self {
            cmd_tx: Some(cmd_tx),
            ack_rx,
            fired,
            handle: Some(handle),
        })
    }

    pub fn arm(&self, pid: u32, timeout: Duration) {
        self.fired.store(false, Ordering::SeqCst);
        if let Some(tx) = self.cmd_tx.as_ref() {
            let _ = tx.send(WatchCmd::Arm {
                pid: pid as i32,
                timeout,
            });
        }
    }

    /// Stop the timer, returns whether it fired.
    pub fn disarm(&self) -> bool {
        if let Some(tx) = self.cmd_tx.as_ref() {
            if tx.send(WatchCmd::Disarm).is_ok() {
                let _ = self.ack_rx.recv();
            }
        }
        self.fired.load(Ordering::SeqCst)
    }
}

fn watch(cmd_rx: Receiver<WatchCmd>, ack_tx: Sender<()>, fired: Arc<AtomicBool>) {
    while let Ok(cmd) = cmd_rx.recv() {
        let (pid, timeout) = match cmd {
            WatchCmd::Arm { pid, timeout } => (pid, timeout),
            WatchCmd::Disarm => {
                let _ = ack_tx.send(());
                continue;
            }
        };
        match cmd_rx.recv_timeout(timeout) {
            Ok(WatchCmd::Disarm) => {
                let _ = ack_tx.send(());
            }
            Ok(WatchCmd::Arm { .. }) => {
                log::warn!("watchdog armed twice");
            }
            Err(RecvTimeoutError::Timeout) => {
                fired.store(true, Ordering::SeqCst);
                let _ = kill(Pid::from_raw(pid), SIGKILL);
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.cmd_tx = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn kill_on_timeout() {
        let dog = Watchdog::new().unwrap();
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("exec sleep 30")
            .spawn()
            .unwrap();
        dog.arm(child.id(), Duration::from_millis(100));
        let status = child.wait().unwrap();
        assert!(!status.success());
        assert!(dog.disarm());

        let mut child = Command::new("/bin/sh").arg("-c").arg("exit 0").spawn().unwrap();
        dog.arm(child.id(), Duration::from_secs(30));
        assert!(child.wait().unwrap().success());
        assert!(!dog.disarm());
    }
}
