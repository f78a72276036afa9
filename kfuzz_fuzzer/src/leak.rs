//! Memory leak checking, run from the gate while no prog is executing.
use crate::util::stop_req;
use anyhow::Context;
use kfuzz_exec::gate::GateCallback;
use kfuzz_io::thread::read_background;
use std::{
    path::PathBuf,
    process::{Command, Stdio},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    thread::sleep,
    time::{Duration, Instant},
};

pub const LEAK_CHECK_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Initial candidates not triaged yet, checking is skipped.
pub const STAGE_WAIT: u32 = 0;
/// Next check only flushes leaks of the initial triage.
pub const STAGE_FLUSH: u32 = 1;
/// Found leaks are reported.
pub const STAGE_REPORT: u32 = 2;

pub struct LeakChecker {
    executor: PathBuf,
    frames: Vec<String>,
    timeout: Duration,
    stage: Arc<AtomicU32>,
}

impl LeakChecker {
    pub fn new(executor: PathBuf, frames: Vec<String>, stage: Arc<AtomicU32>) -> Self {
        Self {
            executor,
            frames,
            timeout: LEAK_CHECK_TIMEOUT,
            stage,
        }
    }

    /// Run one check, returns the executor output if a leak should be reported.
    pub fn check(&self) -> Option<String> {
        let stage = self.stage.load(Ordering::Acquire);
        if stage == STAGE_WAIT {
            return None;
        }
        let ret = self.run();
        if stage == STAGE_FLUSH {
            log::info!("leak checking enabled");
            self.stage.store(STAGE_REPORT, Ordering::Release);
            return None;
        }
        match ret {
            Ok(None) => None,
            Ok(Some(output)) => Some(output),
            Err(e) => Some(format!("{:?}", e)),
        }
    }

    fn run(&self) -> anyhow::Result<Option<String>> {
        let mut child = Command::new(&self.executor)
            .arg("leak")
            .args(&self.frames)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.executor.display()))?;
        let stdout = child.stdout.take().map(read_background);
        let stderr = child.stderr.take().map(read_background);

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if start.elapsed() > self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                anyhow::bail!("leak checking timeout ({:?})", self.timeout);
            }
            sleep(Duration::from_millis(100));
        };
        if status.success() {
            return Ok(None);
        }

        let mut output = Vec::new();
        for h in stdout.into_iter().chain(stderr) {
            output.extend(h.wait_finish(Duration::from_secs(1)));
        }
        Ok(Some(String::from_utf8_lossy(&output).into_owned()))
    }

    /// Gate callback, a reported leak stops fuzzing and is recorded in `fatal`.
    pub fn into_callback(self, fatal: Arc<Mutex<Option<String>>>) -> GateCallback {
        Box::new(move || {
            if let Some(output) = self.check() {
                log::error!("{}", output);
                println!("BUG: leak checking failed");
                let mut fatal = fatal.lock().unwrap();
                if fatal.is_none() {
                    *fatal = Some(format!("BUG: leak checking failed\n{}", output));
                }
                stop_req();
            }
        })
    }
}
