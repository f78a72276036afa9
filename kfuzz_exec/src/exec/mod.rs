//! Executor driver.
//!
//! One `Executor` owns one worker process. Progs are serialized into the input buffer,
//! announced with an `ExecuteReq` and the worker answers with a stream of `ExecuteReply`
//! frames on its stdout. Per-call results are read from the output buffer, which is either
//! shared memory filled by the worker or a local buffer rebuilt from the pipe frames.

pub mod features;
pub mod message;
pub mod output;
pub mod serialization;
pub mod watchdog;

use crate::exec::{message::*, output::*, serialization::*, watchdog::Watchdog};
use iota::iota;
use kfuzz_core::{prog::Prog, target::Target};
use kfuzz_io::{thread::read_background, BackgroundIoHandle};
use shared_memory::Shmem;
use std::{
    fs::{File, OpenOptions},
    io::{ErrorKind, Read, Write},
    os::unix::{
        io::{AsRawFd, FromRawFd, IntoRawFd},
        process::CommandExt,
    },
    path::PathBuf,
    process::{Child, Command, Stdio},
    time::Duration,
};
use thiserror::Error;
use timeout_readwrite::TimeoutReader;

/// Env flags to executor.
pub type EnvFlags = u64;

iota! {
    pub const FLAG_DEBUG: EnvFlags = 1 << (iota);         // debug output from executor
    , FLAG_SIGNAL                                    // collect feedback signals (coverage)
    , FLAG_SANDBOX_SETUID                            // impersonate nobody user
    , FLAG_SANDBOX_NAMESPACE                         // use namespaces for sandboxing
    , FLAG_SANDBOX_ANDROID                           // use Android sandboxing for the untrusted_app domain
    , FLAG_EXTRA_COVER                               // collect extra coverage
    , FLAG_ENABLE_TUN                                // setup and use /dev/tun for packet injection
    , FLAG_ENABLE_NETDEV                             // setup more network devices for testing
    , FLAG_ENABLE_NETRESET                           // reset network namespace between programs
    , FLAG_ENABLE_CGROUPS                            // setup cgroups for testing
    , FLAG_ENABLE_CLOSEFDS                           // close fds after each program
    , FLAG_ENABLE_DEVLINKPCI                         // setup devlink PCI device
    , FLAG_ENABLE_VHCI_INJECTION                     // setup and use /dev/vhci for hci packet injection
    , FLAG_ENABLE_WIFI                               // setup and use mac80211_hwsim for wifi emulation
}

pub fn default_env_flags(debug: bool, sandbox: &str) -> EnvFlags {
    let mut env = FLAG_SIGNAL;
    env |= sandbox_to_flags(sandbox);
    if debug {
        env |= FLAG_DEBUG;
    }
    env
}

pub fn sandbox_to_flags(sandbox: &str) -> EnvFlags {
    match sandbox {
        "setuid" => FLAG_SANDBOX_SETUID,
        "namespace" => FLAG_SANDBOX_NAMESPACE,
        "android" => FLAG_SANDBOX_ANDROID,
        _ => 0,
    }
}

pub fn flags_to_sandbox(env: EnvFlags) -> &'static str {
    if env & FLAG_SANDBOX_SETUID != 0 {
        "setuid"
    } else if env & FLAG_SANDBOX_NAMESPACE != 0 {
        "namespace"
    } else if env & FLAG_SANDBOX_ANDROID != 0 {
        "android"
    } else {
        "none"
    }
}

/// Flag for controlling execution behavior.
pub type ExecFlags = u64;

iota! {
    pub const FLAG_COLLECT_COVER : ExecFlags = 1 << (iota);       // collect coverage
    , FLAG_DEDUP_COVER                                 // deduplicate coverage in executor
    , FLAG_INJECT_FAULT                                // inject a fault in this execution (see ExecOpt)
    , FLAG_COLLECT_COMPS                               // collect KCOV comparisons
    , FLAG_THREADED                                    // use multiple threads to mitigate blocked syscalls
    , FLAG_COLLIDE                                     // collide syscalls to provoke data races
}

/// Option for controlling execution behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOpt {
    /// Options for this execution.
    pub flags: ExecFlags,
    /// Inject fault for 'fault_call'.
    pub fault_call: i32,
    /// Inject fault 'nth' for 'fault_call'
    pub fault_nth: i32,
}

impl Default for ExecOpt {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecOpt {
    pub const fn new() -> Self {
        Self {
            flags: FLAG_DEDUP_COVER | FLAG_THREADED | FLAG_COLLIDE,
            fault_call: 0,
            fault_nth: 0,
        }
    }

    #[inline]
    pub fn disable(&mut self, flag: u64) {
        self.flags &= u64::MAX ^ flag;
    }

    #[inline]
    pub fn enable(&mut self, flag: u64) {
        self.flags |= flag;
    }
}

/// Flag for execution result of one call.
pub type CallFlags = u32;

iota! {
    pub const CALL_EXECUTED : CallFlags = 1 << (iota); // started at all
    , CALL_FINISHED                                // finished executing (rather than blocked forever)
    , CALL_BLOCKED                                 // finished but blocked during execution
    , CALL_FAULT_INJECTED                          // fault was injected into this call
}

/// Size of executor input buffer.
pub const IN_SHM_SZ: usize = 4 << 20;
/// Size of executor output buffer.
pub const OUT_SHM_SZ: usize = 16 << 20;
/// Exit status of executor for internal failures.
pub const STATUS_FAIL: i32 = 67;
/// Deadline of the handshake reply.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);
/// Default timeout of one run without fork server.
pub const EXECUTOR_TIMEOUT: Duration = Duration::from_secs(5);
/// Default timeout of one run with fork server.
pub const DEFAULT_FORKSRV_TIMEOUT: Duration = Duration::from_secs(60);
/// The fork server needs some time to recover from a hung child.
pub const MIN_FORKSRV_TIMEOUT: Duration = Duration::from_secs(7);
pub const DEFAULT_RETRY_BOUND: usize = 10;
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Pipes to a worker that is not started by us.
#[derive(Debug)]
pub struct WorkerPipes {
    pub stdin: File,
    pub stdout: File,
    pub stderr: Option<File>,
}

#[derive(Debug)]
pub struct ExecConfig {
    /// Path of executor binary.
    pub executor: PathBuf,
    /// Args passed to executor.
    pub args: Vec<String>,
    pub pid: u64,
    pub env: EnvFlags,
    pub use_forksrv: bool,
    /// Per run timeout, sanitized by `Executor::new`.
    pub timeout: Option<Duration>,
    /// Max attempts of `exec_with_retry` for spawned workers.
    pub retry_bound: usize,
    /// Max attempts of `exec_with_retry` over pre-established pipes.
    pub pipe_retry_bound: usize,
    /// Talk to an existing worker instead of spawning one.
    pub pipes: Option<WorkerPipes>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            executor: PathBuf::from("./kfuzz-executor"),
            args: Vec::new(),
            pid: 0,
            env: FLAG_SIGNAL,
            use_forksrv: true,
            timeout: None,
            retry_bound: DEFAULT_RETRY_BOUND,
            pipe_retry_bound: 0,
            pipes: None,
        }
    }
}

fn sanitize_timeout(config: &ExecConfig) -> Duration {
    let mut timeout = config.timeout.unwrap_or(if config.use_forksrv {
        DEFAULT_FORKSRV_TIMEOUT
    } else {
        EXECUTOR_TIMEOUT
    });
    if config.use_forksrv && timeout < MIN_FORKSRV_TIMEOUT {
        timeout = MIN_FORKSRV_TIMEOUT;
    }
    timeout
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("prog serialization: {0}")]
    ProgSerialization(#[from] SerializeError),
    #[error("handshake with executor {pid}: {reason}\n{output}")]
    Handshake {
        pid: u64,
        reason: String,
        output: String,
    },
    #[error("bad reply magic: {0:#x}")]
    BadReplyMagic(u32),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("executor internal failure")]
    ExecInternal,
    #[error("output parse: {0}")]
    OutputParse(#[from] ParseOutputError),
    #[error("failed after {tries} attempts, last error: {last}")]
    RetryExhausted { tries: usize, last: Box<ExecError> },
}

impl ExecError {
    /// Errors caused by the prog itself, retrying does not help.
    pub fn is_prog_error(&self) -> bool {
        matches!(self, ExecError::ProgSerialization(_))
    }
}

/// Result of one run.
#[derive(Debug, Default)]
pub struct ExecResult {
    /// Per-call results, `None` if the run hanged.
    pub info: Option<ProgExecInfo>,
    pub hanged: bool,
    /// Worker reported a kernel crash.
    pub crashed: bool,
    /// Stderr of the worker, collected after a hang.
    pub output: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Spawned,
    Handshaking,
    Ready,
    Executing,
    Dead,
}

pub struct Executor {
    config: ExecConfig,
    timeout: Duration,
    state: ExecutorState,

    shms: Option<(Shmem, Shmem)>,
    in_mem: Option<Box<[u8]>>,
    out_mem: Option<Box<[u8]>>,

    child: Option<Child>,
    stdin: Option<File>,
    stdout: Option<File>,
    stderr: Option<BackgroundIoHandle>,

    watchdog: Watchdog,
}

// Shared memory mappings are only touched by the owning executor.
unsafe impl Send for Executor {}

impl Executor {
    pub fn new(config: ExecConfig, shms: Option<(Shmem, Shmem)>) -> Result<Self, ExecError> {
        let timeout = sanitize_timeout(&config);
        let stderr = match config.pipes.as_ref().and_then(|p| p.stderr.as_ref()) {
            Some(f) => Some(read_background(f.try_clone()?)),
            None => None,
        };
        Ok(Self {
            config,
            timeout,
            state: ExecutorState::Idle,
            shms,
            in_mem: None,
            out_mem: None,
            child: None,
            stdin: None,
            stdout: None,
            stderr,
            watchdog: Watchdog::new()?,
        })
    }

    #[inline]
    pub fn state(&self) -> ExecutorState {
        self.state
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[inline]
    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    #[inline]
    fn use_shm(&self) -> bool {
        self.shms.is_some()
    }

    /// Start the worker, or attach to the configured pipes, and handshake if needed.
    pub fn spawn(&mut self) -> Result<(), ExecError> {
        self.teardown();

        if let Some(pipes) = self.config.pipes.as_ref() {
            self.stdin = Some(pipes.stdin.try_clone()?);
            self.stdout = Some(pipes.stdout.try_clone()?);
        } else {
            let mut cmd = Command::new(&self.config.executor);
            cmd.args(&self.config.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            let shm_files = self.open_shm_files()?;
            if let Some((in_file, out_file)) = shm_files.as_ref() {
                let (in_fd, out_fd) = (in_file.as_raw_fd(), out_file.as_raw_fd());
                // SAFETY: only async-signal-safe dup2 calls between fork and exec.
                unsafe {
                    cmd.pre_exec(move || {
                        nix::unistd::dup2(in_fd, 3).map_err(to_io_error)?;
                        nix::unistd::dup2(out_fd, 4).map_err(to_io_error)?;
                        Ok(())
                    });
                }
            }
            let mut child = cmd.spawn()?;
            self.stdin = child.stdin.take().map(into_file);
            self.stdout = child.stdout.take().map(into_file);
            self.stderr = child.stderr.take().map(read_background);
            self.child = Some(child);
        }
        self.state = ExecutorState::Spawned;

        if self.config.use_forksrv {
            self.state = ExecutorState::Handshaking;
            if let Err(reason) = self.handshake() {
                self.kill();
                let output = self
                    .stderr
                    .take()
                    .map(|h| h.wait_finish(Duration::from_secs(1)))
                    .unwrap_or_default();
                self.teardown();
                return Err(ExecError::Handshake {
                    pid: self.config.pid,
                    reason,
                    output: String::from_utf8_lossy(&output).into_owned(),
                });
            }
        }
        self.state = ExecutorState::Ready;
        Ok(())
    }

    fn open_shm_files(&self) -> Result<Option<(File, File)>, std::io::Error> {
        if let Some((in_shm, out_shm)) = self.shms.as_ref() {
            let open = |id: &str| {
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(format!("/dev/shm/{}", id.trim_start_matches('/')))
            };
            Ok(Some((open(in_shm.get_os_id())?, open(out_shm.get_os_id())?)))
        } else {
            Ok(None)
        }
    }

    fn handshake(&mut self) -> Result<(), String> {
        let req = HandshakeReq {
            magic: IN_MAGIC,
            env_flags: self.config.env,
            pid: self.config.pid,
        };
        let (stdin, stdout) = match (self.stdin.as_mut(), self.stdout.as_ref()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => return Err("executor pipes missing".to_string()),
        };
        stdin
            .write_all(&req.to_bytes())
            .map_err(|e| format!("failed to write handshake: {}", e))?;

        let stdout = stdout.try_clone().map_err(|e| e.to_string())?;
        let mut reader = TimeoutReader::new(stdout, HANDSHAKE_TIMEOUT);
        let mut buf = [0; HandshakeReply::SIZE];
        if let Err(e) = reader.read_exact(&mut buf) {
            return Err(if e.kind() == ErrorKind::TimedOut {
                "executor is not serving".to_string()
            } else {
                format!("failed to read handshake reply: {}", e)
            });
        }
        match HandshakeReply::decode(&mut &buf[..]) {
            Some(reply) if reply.magic == OUT_MAGIC => Ok(()),
            Some(reply) => Err(format!(
                "bad handshake reply magic: required {:#x}, got {:#x}",
                OUT_MAGIC, reply.magic
            )),
            None => Err("short handshake reply".to_string()),
        }
    }

    /// Execute `p` once.
    ///
    /// A hang is not an error: the worker is killed and the result is marked `hanged`.
    /// On error the worker is torn down, the next call respawns it.
    pub fn exec(&mut self, target: &Target, p: &Prog, opt: &ExecOpt) -> Result<ExecResult, ExecError> {
        if matches!(self.state, ExecutorState::Idle | ExecutorState::Dead) {
            self.spawn()?;
        }

        let ret = self.exec_inner(target, p, opt);
        match &ret {
            Ok(r) if !r.hanged && self.config.use_forksrv => self.state = ExecutorState::Ready,
            Ok(r) if r.hanged => self.state = ExecutorState::Dead,
            Ok(_) => self.teardown(),
            Err(_) => {
                if self.config.pipes.is_none() {
                    self.kill();
                }
                self.state = ExecutorState::Dead;
            }
        }
        ret
    }

    fn exec_inner(&mut self, target: &Target, p: &Prog, opt: &ExecOpt) -> Result<ExecResult, ExecError> {
        let use_shm = self.use_shm();
        let prog_sz = serialize(target, p, self.in_buf())?;

        let req = ExecuteReq {
            magic: IN_MAGIC,
            env_flags: self.config.env,
            exec_flags: opt.flags,
            pid: self.config.pid,
            fault_call: opt.fault_call as u64,
            fault_nth: opt.fault_nth as u64,
            prog_size: if use_shm { 0 } else { prog_sz as u64 },
        };
        let mut req_buf = req.to_bytes();
        if !use_shm {
            req_buf.extend_from_slice(&self.in_buf()[..prog_sz]);
        }
        self.out_buf()[0..4].iter_mut().for_each(|v| *v = 0);

        self.state = ExecutorState::Executing;
        self.stdin_mut()?.write_all(&req_buf)?;

        if let Some(child) = self.child.as_ref() {
            self.watchdog.arm(child.id(), self.timeout);
        }
        let status = self.wait_finish(use_shm);
        let hanged = self.watchdog.disarm();

        let (exit_status, crashed) = match status {
            Ok(s) => s,
            Err(e) if hanged => {
                log::debug!("executor-{}: hanged: {}", self.config.pid, e);
                return Ok(self.hanged_result(false));
            }
            Err(e) => return Err(e),
        };
        if hanged {
            return Ok(self.hanged_result(crashed));
        }
        // the prog itself may exit the worker, e.g. through exit_group
        match exit_status {
            STATUS_FAIL => return Err(ExecError::ExecInternal),
            0 => (),
            s => log::debug!("executor-{}: exit status {}", self.config.pid, s),
        }

        let mut info = parse_output(p, self.out_buf())?;
        if self.config.env & FLAG_SIGNAL == 0 {
            add_fallback_signal(p, &mut info);
        }
        Ok(ExecResult {
            info: Some(info),
            hanged: false,
            crashed,
            output: Vec::new(),
        })
    }

    /// Read reply frames until the done frame, returns the exit status and the crash mark.
    fn wait_finish(&mut self, use_shm: bool) -> Result<(i32, bool), ExecError> {
        let mut stdout = match self.stdout.take() {
            Some(f) => f,
            None => return Err(ExecError::Protocol("executor stdout missing".to_string())),
        };
        let ret = self.read_replies(&mut stdout, use_shm);
        self.stdout = Some(stdout);
        ret
    }

    fn read_replies(&mut self, stdout: &mut File, use_shm: bool) -> Result<(i32, bool), ExecError> {
        let mut crashed = false;
        let mut ncalls: u32 = 0;
        let mut pos = 4;
        let mut buf = [0; ExecuteReply::SIZE];
        loop {
            stdout.read_exact(&mut buf)?;
            let reply = ExecuteReply::decode(&mut &buf[..])
                .ok_or_else(|| ExecError::Protocol("short execute reply".to_string()))?;
            match reply.magic {
                OUT_MAGIC => (),
                CRASH_MAGIC => crashed = true,
                m => return Err(ExecError::BadReplyMagic(m)),
            }
            if reply.done != 0 {
                return Ok((reply.status as i32, crashed));
            }

            let mut call_buf = [0; CallReply::SIZE];
            stdout.read_exact(&mut call_buf)?;
            let call = CallReply::decode(&mut &call_buf[..])
                .ok_or_else(|| ExecError::Protocol("short call reply".to_string()))?;
            if call.comps_size != 0 {
                return Err(ExecError::Protocol(format!(
                    "comparisons of call {}/{} on pipe",
                    call.index, call.num
                )));
            }
            let trailing = (call.signal_size as u64 + call.cover_size as u64) * 4;
            if use_shm {
                if trailing != 0 {
                    return Err(ExecError::Protocol(format!(
                        "signal of call {}/{} on pipe with shared memory",
                        call.index, call.num
                    )));
                }
                continue;
            }

            let out = self.out_buf();
            let end = (pos as u64)
                .checked_add(CallReply::SIZE as u64 + trailing)
                .filter(|&end| end <= out.len() as u64)
                .ok_or_else(|| {
                    ExecError::Protocol(format!(
                        "call {}/{} overflows output buffer: {} signal, {} cover",
                        call.index, call.num, call.signal_size, call.cover_size
                    ))
                })? as usize;
            out[pos..pos + CallReply::SIZE].copy_from_slice(&call_buf);
            stdout.read_exact(&mut out[pos + CallReply::SIZE..end])?;
            pos = end;
            ncalls += 1;
            out[0..4].copy_from_slice(&ncalls.to_le_bytes());
        }
    }

    fn hanged_result(&mut self, crashed: bool) -> ExecResult {
        self.kill();
        let output = self
            .stderr
            .as_ref()
            .map(|h| h.current_data())
            .unwrap_or_default();
        ExecResult {
            info: None,
            hanged: true,
            crashed,
            output,
        }
    }

    /// Execute with bounded retries on transport failures.
    ///
    /// Between attempts the worker is torn down, the pipe buffers are dropped and
    /// the caller sleeps for a second.
    pub fn exec_with_retry(
        &mut self,
        target: &Target,
        p: &Prog,
        opt: &ExecOpt,
    ) -> Result<ExecResult, ExecError> {
        let bound = if self.config.pipes.is_some() {
            self.config.pipe_retry_bound
        } else {
            self.config.retry_bound
        };
        let mut tries = 0;
        loop {
            match self.exec(target, p, opt) {
                Ok(ret) => return Ok(ret),
                Err(e) if e.is_prog_error() => return Err(e),
                Err(e) => {
                    tries += 1;
                    if tries > bound {
                        return Err(ExecError::RetryExhausted {
                            tries,
                            last: Box::new(e),
                        });
                    }
                    log::warn!(
                        "executor-{}: exec failed ({}/{}): {}",
                        self.config.pid,
                        tries,
                        bound,
                        e
                    );
                    self.reclaim();
                    std::thread::sleep(RETRY_BACKOFF);
                }
            }
        }
    }

    /// Release memory that is reallocated on demand.
    pub fn reclaim(&mut self) {
        self.in_mem = None;
        self.out_mem = None;
        if let Some(stderr) = self.stderr.as_ref() {
            stderr.clear_current();
        }
    }

    fn in_buf(&mut self) -> &mut [u8] {
        if let Some((in_shm, _)) = self.shms.as_mut() {
            // SAFETY: the worker only reads the input buffer while a request is pending.
            return unsafe { in_shm.as_slice_mut() };
        }
        self.in_mem
            .get_or_insert_with(|| vec![0; IN_SHM_SZ].into_boxed_slice())
    }

    fn out_buf(&mut self) -> &mut [u8] {
        if let Some((_, out_shm)) = self.shms.as_mut() {
            // SAFETY: the worker only writes the output buffer while a request is pending.
            return unsafe { out_shm.as_slice_mut() };
        }
        self.out_mem
            .get_or_insert_with(|| vec![0; OUT_SHM_SZ].into_boxed_slice())
    }

    fn stdin_mut(&mut self) -> Result<&mut File, ExecError> {
        self.stdin
            .as_mut()
            .ok_or_else(|| ExecError::Protocol("executor stdin missing".to_string()))
    }

    fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.child = None;
        self.state = ExecutorState::Dead;
    }

    /// Drop the worker and its pipes.
    fn teardown(&mut self) {
        self.kill();
        self.stdin = None;
        self.stdout = None;
        if self.config.pipes.is_none() {
            self.stderr = None;
        }
        self.state = ExecutorState::Idle;
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.kill();
    }
}

fn into_file<T: IntoRawFd>(f: T) -> File {
    // SAFETY: the fd is owned by `f` and moved into the file.
    unsafe { File::from_raw_fd(f.into_raw_fd()) }
}

fn to_io_error(e: nix::Error) -> std::io::Error {
    std::io::Error::from_raw_os_error(e as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kfuzz_core::{parse::parse_prog, target::test_target};

    fn octal(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("\\{:03o}", b)).collect()
    }

    fn req_len(target: &Target, p: &Prog) -> usize {
        let mut buf = vec![0; 4096];
        ExecuteReq::SIZE + serialize(target, p, &mut buf).unwrap()
    }

    fn done(magic: u32, status: u32) -> Vec<u8> {
        ExecuteReply {
            magic,
            done: 1,
            status,
        }
        .to_bytes()
    }

    fn stub(script: String, use_forksrv: bool, timeout: Option<Duration>) -> Executor {
        let config = ExecConfig {
            executor: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), script],
            use_forksrv,
            timeout,
            retry_bound: 1,
            ..ExecConfig::default()
        };
        Executor::new(config, None).unwrap()
    }

    #[test]
    fn timeout_sanitize() {
        let mut config = ExecConfig {
            use_forksrv: false,
            ..ExecConfig::default()
        };
        assert_eq!(sanitize_timeout(&config), EXECUTOR_TIMEOUT);
        config.use_forksrv = true;
        assert_eq!(sanitize_timeout(&config), DEFAULT_FORKSRV_TIMEOUT);
        config.timeout = Some(Duration::from_secs(1));
        assert_eq!(sanitize_timeout(&config), MIN_FORKSRV_TIMEOUT);
        config.use_forksrv = false;
        assert_eq!(sanitize_timeout(&config), Duration::from_secs(1));
    }

    #[test]
    fn exec_stub_worker() {
        let target = test_target();
        let p = parse_prog(&target, "getpid()").unwrap();
        let script = format!(
            "head -c {} >/dev/null; printf '{}'",
            req_len(&target, &p),
            octal(&done(OUT_MAGIC, 0))
        );
        let mut exec = stub(script, false, None);
        let ret = exec.exec(&target, &p, &ExecOpt::new()).unwrap();
        assert!(!ret.hanged);
        assert!(!ret.crashed);
        let info = ret.info.unwrap();
        assert_eq!(info.call_infos.len(), 1);
        assert_eq!(info.call_infos[0].flags, 0);
        assert!(info.call_infos[0].signal.is_empty());
        assert_eq!(exec.state(), ExecutorState::Idle);
    }

    #[test]
    fn call_replies_over_pipe() {
        let target = test_target();
        let p = parse_prog(&target, "getpid()").unwrap();
        let mut reply = ExecuteReply {
            magic: OUT_MAGIC,
            done: 0,
            status: 0,
        }
        .to_bytes();
        reply.extend(
            CallReply {
                index: 0,
                num: p.calls()[0].sid() as u32,
                errno: 0,
                flags: CALL_EXECUTED | CALL_FINISHED,
                signal_size: 2,
                cover_size: 0,
                comps_size: 0,
            }
            .to_bytes(),
        );
        reply.extend(&7u32.to_le_bytes());
        reply.extend(&9u32.to_le_bytes());
        reply.extend(done(OUT_MAGIC, 0));
        let script = format!(
            "head -c {} >/dev/null; printf '{}'",
            req_len(&target, &p),
            octal(&reply)
        );
        let mut exec = stub(script, false, None);
        let info = exec.exec(&target, &p, &ExecOpt::new()).unwrap().info.unwrap();
        assert_eq!(info.call_infos[0].flags, CALL_EXECUTED | CALL_FINISHED);
        assert_eq!(info.call_infos[0].signal, vec![7, 9]);
    }

    #[test]
    fn fallback_signal_without_coverage() {
        let target = test_target();
        let p = parse_prog(&target, "getpid()").unwrap();
        let mut reply = ExecuteReply {
            magic: OUT_MAGIC,
            done: 0,
            status: 0,
        }
        .to_bytes();
        let sid = p.calls()[0].sid() as u32;
        reply.extend(
            CallReply {
                index: 0,
                num: sid,
                errno: 2,
                flags: CALL_EXECUTED,
                signal_size: 0,
                cover_size: 0,
                comps_size: 0,
            }
            .to_bytes(),
        );
        reply.extend(done(OUT_MAGIC, 0));
        let script = format!(
            "head -c {} >/dev/null; printf '{}'",
            req_len(&target, &p),
            octal(&reply)
        );
        let mut exec = stub(script, false, None);
        exec.config.env = 0;
        let info = exec.exec(&target, &p, &ExecOpt::new()).unwrap().info.unwrap();
        assert_eq!(info.call_infos[0].signal, vec![(sid << 16) | 2]);
    }

    #[test]
    fn crash_magic() {
        let target = test_target();
        let p = parse_prog(&target, "getpid()").unwrap();
        let script = format!(
            "head -c {} >/dev/null; printf '{}'",
            req_len(&target, &p),
            octal(&done(CRASH_MAGIC, 0))
        );
        let mut exec = stub(script, false, None);
        let ret = exec.exec(&target, &p, &ExecOpt::new()).unwrap();
        assert!(ret.crashed);
        assert!(ret.info.is_some());
    }

    #[test]
    fn internal_failure_status() {
        let target = test_target();
        let p = parse_prog(&target, "getpid()").unwrap();
        let script = format!(
            "head -c {} >/dev/null; printf '{}'",
            req_len(&target, &p),
            octal(&done(OUT_MAGIC, STATUS_FAIL as u32))
        );
        let mut exec = stub(script, false, None);
        let ret = exec.exec(&target, &p, &ExecOpt::new());
        assert!(matches!(ret, Err(ExecError::ExecInternal)));
        assert_eq!(exec.state(), ExecutorState::Dead);
    }

    #[test]
    fn prog_exit_status_is_not_an_error() {
        let target = test_target();
        let p = parse_prog(&target, "getpid()").unwrap();
        let script = format!(
            "head -c {} >/dev/null; printf '{}'",
            req_len(&target, &p),
            octal(&done(OUT_MAGIC, 5))
        );
        let mut exec = stub(script, false, None);
        let ret = exec.exec_with_retry(&target, &p, &ExecOpt::new()).unwrap();
        assert!(!ret.hanged);
        assert_eq!(ret.info.unwrap().call_infos.len(), 1);
    }

    fn oversized_call_reply(p: &Prog) -> Vec<u8> {
        let mut reply = ExecuteReply {
            magic: OUT_MAGIC,
            done: 0,
            status: 0,
        }
        .to_bytes();
        reply.extend(
            CallReply {
                index: 0,
                num: p.calls()[0].sid() as u32,
                errno: 0,
                flags: CALL_EXECUTED,
                signal_size: u32::MAX,
                cover_size: u32::MAX,
                comps_size: 0,
            }
            .to_bytes(),
        );
        reply
    }

    #[test]
    fn oversized_reply_is_rejected() {
        let target = test_target();
        let p = parse_prog(&target, "getpid()").unwrap();
        let script = format!(
            "head -c {} >/dev/null; printf '{}'; sleep 1",
            req_len(&target, &p),
            octal(&oversized_call_reply(&p))
        );
        let mut exec = stub(script, false, None);
        match exec.exec(&target, &p, &ExecOpt::new()) {
            Err(ExecError::Protocol(msg)) => assert!(msg.contains("overflows")),
            r => panic!("unexpected exec result: {:?}", r.map(|r| r.hanged)),
        }
        assert_eq!(exec.state(), ExecutorState::Dead);
    }

    #[test]
    fn shm_reply_with_pipe_signal_is_rejected() {
        let target = test_target();
        let p = parse_prog(&target, "getpid()").unwrap();
        let mut exec = stub(String::new(), false, None);
        let mut stdout = tempfile_with(&oversized_call_reply(&p));
        match exec.read_replies(&mut stdout, true) {
            Err(ExecError::Protocol(msg)) => assert!(msg.contains("shared memory")),
            r => panic!("unexpected reply result: {:?}", r),
        }
    }

    fn tempfile_with(content: &[u8]) -> File {
        let path = std::env::temp_dir().join(format!(
            "kfuzz-replies-{}-{}",
            std::process::id(),
            content.len()
        ));
        std::fs::write(&path, content).unwrap();
        let f = File::open(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        f
    }

    #[test]
    fn hang_is_reported() {
        let target = test_target();
        let p = parse_prog(&target, "getpid()").unwrap();
        let mut exec = stub(
            "exec sleep 30".to_string(),
            false,
            Some(Duration::from_millis(200)),
        );
        let ret = exec.exec(&target, &p, &ExecOpt::new()).unwrap();
        assert!(ret.hanged);
        assert!(ret.info.is_none());
        assert_eq!(exec.state(), ExecutorState::Dead);
    }

    #[test]
    fn forksrv_handshake() {
        let target = test_target();
        let p = parse_prog(&target, "getpid()").unwrap();
        let len = req_len(&target, &p);
        let reply = octal(&done(OUT_MAGIC, 0));
        let script = format!(
            "head -c {} >/dev/null; printf '{}'; head -c {} >/dev/null; printf '{}'; head -c {} >/dev/null; printf '{}'",
            HandshakeReq::SIZE,
            octal(&HandshakeReply { magic: OUT_MAGIC }.to_bytes()),
            len,
            reply,
            len,
            reply,
        );
        let mut exec = stub(script, true, None);
        exec.spawn().unwrap();
        assert_eq!(exec.state(), ExecutorState::Ready);
        for _ in 0..2 {
            let ret = exec.exec(&target, &p, &ExecOpt::new()).unwrap();
            assert!(ret.info.is_some());
            assert_eq!(exec.state(), ExecutorState::Ready);
        }
    }

    #[test]
    fn bad_handshake_keeps_output() {
        let script = format!(
            "head -c {} >/dev/null; echo setup failed >&2; printf '{}'",
            HandshakeReq::SIZE,
            octal(&HandshakeReply { magic: 0x1234 }.to_bytes()),
        );
        let mut exec = stub(script, true, None);
        match exec.spawn() {
            Err(ExecError::Handshake { output, .. }) => assert!(output.contains("setup failed")),
            r => panic!("unexpected handshake result: {:?}", r.map(|_| ())),
        }
        assert_eq!(exec.state(), ExecutorState::Idle);
    }

    #[test]
    fn retry_bound_exhausted() {
        let target = test_target();
        let p = parse_prog(&target, "getpid()").unwrap();
        let script = format!("head -c {} >/dev/null", req_len(&target, &p));
        let mut exec = stub(script, false, None);
        match exec.exec_with_retry(&target, &p, &ExecOpt::new()) {
            Err(ExecError::RetryExhausted { tries, .. }) => assert_eq!(tries, 2),
            r => panic!("unexpected exec result: {:?}", r.map(|r| r.hanged)),
        }
    }
}
