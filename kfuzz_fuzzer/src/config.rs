use anyhow::Context;
use kfuzz_exec::exec::{EnvFlags, ExecConfig};
use std::{
    env::current_dir,
    fs::{canonicalize, create_dir_all},
    path::PathBuf,
    time::Duration,
};

pub const MAX_JOB: usize = 256;
pub const MAX_PROG_LEN: usize = 1024;
const SANDBOXES: [&str; 4] = ["none", "setuid", "namespace", "android"];

#[derive(Debug, Clone)]
pub struct Config {
    /// Name reported to the manager.
    pub name: String,
    pub executor: PathBuf,
    /// Json syscall catalog.
    pub catalog: PathBuf,
    pub job: usize,
    pub output: PathBuf,
    pub input: Option<PathBuf>,
    pub sandbox: String,
    pub debug: bool,
    /// Log generation and mutation decisions of the core.
    pub verbose: bool,
    pub use_shm: bool,
    pub use_forksrv: bool,
    pub timeout: Option<Duration>,
    pub prog_len: usize,
    pub pipe_retry_bound: usize,
    pub enabled_calls: Option<PathBuf>,
    pub disabled_calls: Option<PathBuf>,
    pub fault_injection: bool,
    pub comparisons: bool,
    pub leak_check: bool,
    pub leak_frames: Vec<String>,
    /// Fixed rng seed, entropy if absent.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let cwd = current_dir().unwrap_or_default();
        Self {
            name: "kfuzz-0".to_string(),
            executor: cwd.join("kfuzz-executor"),
            catalog: cwd.join("sys.json"),
            job: 1,
            output: cwd.join("output"),
            input: None,
            sandbox: "none".to_string(),
            debug: false,
            verbose: false,
            use_shm: true,
            use_forksrv: true,
            timeout: None,
            prog_len: 150,
            pipe_retry_bound: 0,
            enabled_calls: None,
            disabled_calls: None,
            fault_injection: true,
            comparisons: true,
            leak_check: false,
            leak_frames: Vec::new(),
            seed: None,
        }
    }
}

impl Config {
    pub fn check(&self) -> anyhow::Result<()> {
        if !self.executor.is_file() {
            anyhow::bail!("bad executor: {}", self.executor.display());
        }
        if !self.catalog.is_file() {
            anyhow::bail!("bad syscall catalog: {}", self.catalog.display());
        }
        if self.job == 0 || self.job > MAX_JOB {
            anyhow::bail!("bad job number: {}, expected 1..={}", self.job, MAX_JOB);
        }
        if self.prog_len == 0 || self.prog_len > MAX_PROG_LEN {
            anyhow::bail!(
                "bad prog len: {}, expected 1..={}",
                self.prog_len,
                MAX_PROG_LEN
            );
        }
        if !SANDBOXES.contains(&self.sandbox.as_str()) {
            anyhow::bail!("unknown sandbox: {}", self.sandbox);
        }
        if self.output.exists() && !self.output.is_dir() {
            anyhow::bail!("output is not a dir: {}", self.output.display());
        }
        if let Some(i) = self.input.as_ref() {
            if !i.is_dir() {
                anyhow::bail!("bad input progs dir: {}", i.display());
            }
        }
        if let Some(f) = self.enabled_calls.as_ref() {
            if !f.is_file() {
                anyhow::bail!("bad enabled calls file: {}", f.display());
            }
        }
        if let Some(f) = self.disabled_calls.as_ref() {
            if !f.is_file() {
                anyhow::bail!("bad disabled calls file: {}", f.display());
            }
        }
        if self.name.is_empty() {
            anyhow::bail!("empty fuzzer name");
        }
        Ok(())
    }

    /// Create output dir and make all paths absolute.
    pub fn fixup(&mut self) -> anyhow::Result<()> {
        create_dir_all(&self.output)
            .with_context(|| format!("failed to create output dir: {}", self.output.display()))?;
        self.output = canonicalize(&self.output)?;
        self.executor = canonicalize(&self.executor)?;
        self.catalog = canonicalize(&self.catalog)?;
        if let Some(i) = self.input.as_mut() {
            *i = canonicalize(&*i)?;
        }
        Ok(())
    }

    /// Transport config of fuzzer `pid`.
    pub fn exec_config(&self, pid: u64, env: EnvFlags) -> ExecConfig {
        ExecConfig {
            executor: self.executor.clone(),
            pid,
            env,
            use_forksrv: self.use_forksrv,
            timeout: self.timeout,
            pipe_retry_bound: self.pipe_retry_bound,
            ..ExecConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        let exe = std::env::current_exe().unwrap();
        Config {
            executor: exe.clone(),
            catalog: exe,
            output: std::env::temp_dir(),
            ..Config::default()
        }
    }

    #[test]
    fn check_config() {
        assert!(valid().check().is_ok());

        let bad = [
            Config { job: 0, ..valid() },
            Config {
                job: MAX_JOB + 1,
                ..valid()
            },
            Config {
                prog_len: 0,
                ..valid()
            },
            Config {
                sandbox: "chroot".to_string(),
                ..valid()
            },
            Config {
                input: Some(PathBuf::from("/nonexistent/kfuzz/input")),
                ..valid()
            },
            Config {
                executor: PathBuf::from("/nonexistent/kfuzz-executor"),
                ..valid()
            },
        ];
        for c in bad.iter() {
            assert!(c.check().is_err());
        }
    }

    #[test]
    fn exec_config_of_fuzzer() {
        let config = Config {
            timeout: Some(Duration::from_secs(10)),
            pipe_retry_bound: 2,
            ..valid()
        };
        let ec = config.exec_config(3, 0);
        assert_eq!(ec.pid, 3);
        assert_eq!(ec.executor, config.executor);
        assert_eq!(ec.timeout, Some(Duration::from_secs(10)));
        assert_eq!(ec.pipe_retry_bound, 2);
        assert!(ec.pipes.is_none());
    }
}
