use env_logger::{Env, TimestampPrecision};
use kfuzz_fuzzer::{boot, config::Config};
use std::{path::PathBuf, time::Duration};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
struct Settings {
    /// Name reported to the manager.
    #[structopt(long, short = "n", default_value = "kfuzz-0")]
    name: String,
    /// Path to executor.
    #[structopt(long, short = "e", default_value = "./kfuzz-executor")]
    executor: PathBuf,
    /// Path to json syscall catalog.
    #[structopt(long, short = "s", default_value = "./sys.json")]
    catalog: PathBuf,
    /// Parallel fuzzing jobs.
    #[structopt(long, short = "j", default_value = "4")]
    job: usize,
    /// Directory to input prog.
    #[structopt(long, short = "i")]
    input: Option<PathBuf>,
    /// Directory to write kinds of output data.
    #[structopt(long, short = "o", default_value = "output")]
    output: PathBuf,
    /// Sandbox of executor: none, setuid, namespace or android.
    #[structopt(long, default_value = "none")]
    sandbox: String,
    /// Enable debug output of executor.
    #[structopt(long)]
    debug: bool,
    /// Log generation and mutation decisions, debug build only.
    #[structopt(long, short = "v")]
    verbose: bool,
    /// Pass progs through pipes instead of shared memory.
    #[structopt(long)]
    disable_shm: bool,
    /// Spawn one executor per prog.
    #[structopt(long)]
    disable_forksrv: bool,
    /// Per prog timeout in seconds.
    #[structopt(long, short = "t")]
    timeout: Option<u64>,
    /// Max number of calls in one prog.
    #[structopt(long, default_value = "150")]
    prog_len: usize,
    /// Retries of executor over pre-established pipes.
    #[structopt(long, default_value = "0")]
    pipe_retry_bound: usize,
    /// Path to enabled syscalls.
    #[structopt(long)]
    enable_syscalls: Option<PathBuf>,
    /// Path to disabled syscalls.
    #[structopt(long)]
    disable_syscalls: Option<PathBuf>,
    /// Disable call fault injection.
    #[structopt(long)]
    disable_fault_injection: bool,
    /// Disable comparison hints.
    #[structopt(long)]
    disable_comparisons: bool,
    /// Check memory leaks.
    #[structopt(long)]
    leak: bool,
    /// Frames ignored by leak checking.
    #[structopt(long)]
    leak_frames: Vec<String>,
    /// Seed of the fuzzers' rng, fuzzer i starts from seed + i.
    #[structopt(long)]
    seed: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let settings = Settings::from_args();

    let log_env = Env::new()
        .filter_or("KFUZZ_LOG", "info")
        .default_write_style_or("auto");
    env_logger::Builder::from_env(log_env)
        .format_timestamp(Some(TimestampPrecision::Seconds))
        .init();

    let config = Config {
        name: settings.name,
        executor: settings.executor,
        catalog: settings.catalog,
        job: settings.job,
        output: settings.output,
        input: settings.input,
        sandbox: settings.sandbox,
        debug: settings.debug,
        verbose: settings.verbose,
        use_shm: !settings.disable_shm,
        use_forksrv: !settings.disable_forksrv,
        timeout: settings.timeout.map(Duration::from_secs),
        prog_len: settings.prog_len,
        pipe_retry_bound: settings.pipe_retry_bound,
        enabled_calls: settings.enable_syscalls,
        disabled_calls: settings.disable_syscalls,
        fault_injection: !settings.disable_fault_injection,
        comparisons: !settings.disable_comparisons,
        leak_check: settings.leak,
        leak_frames: settings.leak_frames,
        seed: settings.seed,
    };

    boot(config)
}
