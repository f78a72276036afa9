//! Kfuzz fuzz

#[macro_use]
pub mod fuzzer_log;
pub mod config;
pub mod feedback;
pub mod fuzzer;
pub mod leak;
pub mod manager;
pub mod poll;
pub mod queue;
pub mod stats;
pub mod util;

use crate::{
    config::Config,
    feedback::Feedback,
    fuzzer::{seeded_rng, ExecOpts, Fuzzer, FuzzerConfig, SharedState},
    leak::{LeakChecker, STAGE_WAIT},
    manager::LocalManager,
    poll::Poller,
    queue::WorkQueue,
    stats::Stats,
    util::stop_req,
};
use anyhow::Context;
use kfuzz_core::{corpus::CorpusWrapper, select::ChoiceTable, syscall::SyscallId, target::Target};
use kfuzz_exec::{
    exec::{
        default_env_flags,
        features::{
            detect_features, features_names, features_to_env_flags, setup_features,
            FEATURE_COMPARISONS, FEATURE_COVERAGE, FEATURE_FAULT, FEATURE_LEAK,
        },
        ExecConfig, ExecOpt, Executor, FLAG_SIGNAL, IN_SHM_SZ, OUT_SHM_SZ,
    },
    gate::Gate,
    sys::load_catalog,
};
use shared_memory::{Shmem, ShmemConf, ShmemError};
use std::{
    fs::read_to_string,
    os::raw::c_int,
    path::Path,
    process::Command,
    sync::{atomic::AtomicU32, mpsc::sync_channel, Arc, Mutex},
    thread,
    time::Duration,
};

pub fn boot(mut config: Config) -> anyhow::Result<()> {
    config.check().context("config error")?;
    config.fixup().context("failed to setup output")?;
    println!("{}", KFUZZ);

    log::info!("loading syscall catalog {}...", config.catalog.display());
    let catalog = load_catalog(&config.catalog).context("failed to load syscall catalog")?;
    let target = catalog.build().context("failed to build target")?;
    let enabled = enabled_calls(&target, &config)?;
    log::info!(
        "target {}/{}: {} syscalls enabled",
        target.os(),
        target.arch(),
        enabled.len()
    );
    let choice = ChoiceTable::new(&target, Some(&enabled));

    log::info!("detecting features...");
    let features = detect_features(Command::new(&config.executor))
        .context("failed to detect features")?;
    for name in features_names(features) {
        log::info!("{:<28}: enabled", name);
    }
    setup_features(Command::new(&config.executor), features)
        .context("failed to setup features")?;
    let mut env = default_env_flags(config.debug, &config.sandbox);
    features_to_env_flags(features, &mut env);
    let signal = features & FEATURE_COVERAGE != 0;
    if !signal {
        log::warn!("coverage is not supported, using fallback signal");
        env &= !FLAG_SIGNAL;
    }
    let use_shm = config.use_shm && catalog.executor_uses_shmem;
    config.use_forksrv = config.use_forksrv && catalog.executor_uses_fork_server;
    let fuzzer_config = FuzzerConfig {
        name: config.name.clone(),
        prog_len: config.prog_len,
        signal,
        fault_injection: config.fault_injection && features & FEATURE_FAULT != 0,
        comparisons: config.comparisons && features & FEATURE_COMPARISONS != 0,
        verbose: config.verbose,
        seed: config.seed,
    };
    if let Some(seed) = config.seed {
        log::info!("fuzzers seeded from {}", seed);
    }

    let manager = LocalManager::new(&config.output, config.input.as_deref())
        .context("failed to setup manager")?;
    let (need_poll_tx, need_poll_rx) = sync_channel(1);
    let leak_stage = Arc::new(AtomicU32::new(STAGE_WAIT));
    let fatal = Arc::new(Mutex::new(None));
    let mut leak_callback = None;
    if config.leak_check && features & FEATURE_LEAK != 0 {
        let checker = LeakChecker::new(
            config.executor.clone(),
            config.leak_frames.clone(),
            Arc::clone(&leak_stage),
        );
        leak_callback = Some(checker.into_callback(Arc::clone(&fatal)));
    } else if config.leak_check {
        log::warn!("leak checking is not supported");
    }
    let shared_state = SharedState {
        target: Arc::new(target),
        choice: Arc::new(choice),
        corpus: Arc::new(CorpusWrapper::new()),
        feedback: Arc::new(Feedback::new()),
        queue: Arc::new(WorkQueue::new(config.job, Some(need_poll_tx))),
        stats: Arc::new(Stats::new()),
        gate: Arc::new(Gate::new(2 * config.job, leak_callback)),
        manager: Arc::new(manager),
    };

    let poller = Poller::new(
        SharedState::clone(&shared_state),
        config.name.clone(),
        leak_stage,
    );
    poller
        .poll(true)
        .context("failed to poll initial candidates")?;

    setup_signal_handler();
    let stats = Arc::clone(&shared_state.stats);
    thread::spawn(move || {
        stats.report(Duration::from_secs(10));
    });
    let poll_handle = thread::spawn(move || {
        let ret = poller.poll_loop(need_poll_rx);
        if ret.is_err() {
            stop_req();
        }
        ret
    });

    let mut fuzzers = Vec::with_capacity(config.job);
    for id in 0..config.job as u64 {
        let shared_state = SharedState::clone(&shared_state);
        let exec_config = config.exec_config(id, env);
        let fuzzer_config = fuzzer_config.clone();
        let handle = thread::Builder::new()
            .name(format!("fuzzer-{}", id))
            .spawn(move || {
                let ret = run_fuzzer(id, shared_state, exec_config, use_shm, fuzzer_config);
                if ret.is_err() {
                    stop_req();
                }
                ret
            })
            .with_context(|| format!("failed to spawn fuzzer-{}", id))?;
        fuzzers.push(handle);
    }

    let mut err = None;
    let poller = std::iter::once(("poller".to_string(), poll_handle));
    let fuzzers = fuzzers
        .into_iter()
        .enumerate()
        .map(|(i, h)| (format!("fuzzer-{}", i), h));
    for (name, h) in fuzzers.chain(poller) {
        let e = match h.join() {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(_) => anyhow::anyhow!("panicked"),
        };
        let mut info = format!("\n\t{}: {}", name, e);
        for (i, cause) in e.chain().enumerate() {
            let cause = format!("\n\t\t{}. {}", i, cause);
            info.push_str(&cause);
        }
        err.get_or_insert_with(|| "fuzzer exits with errors:".to_string())
            .push_str(&info);
    }
    if let Some(bug) = fatal.lock().unwrap().take() {
        err.get_or_insert_with(String::new).push_str(&bug);
    }
    match err {
        None => {
            log::info!("All done");
            Ok(())
        }
        Some(err) => Err(anyhow::anyhow!(err)),
    }
}

fn run_fuzzer(
    id: u64,
    shared_state: SharedState,
    exec_config: ExecConfig,
    use_shm: bool,
    config: FuzzerConfig,
) -> anyhow::Result<()> {
    let shms = if use_shm {
        let shms = setup_fuzzer_shm(id)
            .with_context(|| format!("failed to setup shm for fuzzer-{}", id))?;
        Some(shms)
    } else {
        None
    };
    let executor = Executor::new(exec_config, shms)
        .with_context(|| format!("failed to setup executor for fuzzer-{}", id))?;
    let seed = config.seed.map(|s| s.wrapping_add(id));
    let mut fuzzer = Fuzzer {
        shared_state,
        id,
        rng: seeded_rng(seed),
        seed,
        executor,
        config,
        opts: ExecOpts::new(ExecOpt::new()),
    };
    fuzzer.fuzz_loop()
}

fn setup_signal_handler() {
    use signal_hook::consts::*;
    use signal_hook::iterator::exfiltrator::WithOrigin;
    use signal_hook::iterator::SignalsInfo;

    fn named_signal(sig: c_int) -> String {
        signal_hook::low_level::signal_name(sig)
            .map(|n| format!("{}({})", n, sig))
            .unwrap_or_else(|| sig.to_string())
    }

    std::thread::spawn(move || {
        let mut signals = match SignalsInfo::<WithOrigin>::new(TERM_SIGNALS) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("failed to setup signal handler: {}", e);
                return;
            }
        };

        if let Some(info) = signals.into_iter().next() {
            let from = if let Some(p) = info.process {
                format!("(pid: {}, uid: {})", p.pid, p.uid)
            } else {
                "unknown".to_string()
            };
            log::info!(
                "{} recved, from: {}, cause: {:?}",
                named_signal(info.signal),
                from,
                info.cause
            );
            println!("please waiting fuzzers to exit...");
        }

        stop_req();
    });
}

/// Syscalls to fuzz: the enabled list if given, else all calls of the catalog, minus the
/// disabled list.
fn enabled_calls(target: &Target, config: &Config) -> anyhow::Result<Vec<SyscallId>> {
    let mut enabled = match config.enabled_calls.as_ref() {
        Some(f) => load_call_list(target, f)?,
        None => target.enabled_syscalls(),
    };
    if let Some(f) = config.disabled_calls.as_ref() {
        let disabled = load_call_list(target, f)?;
        enabled.retain(|sid| !disabled.contains(sid));
    }
    if enabled.is_empty() {
        anyhow::bail!("no syscall enabled");
    }
    Ok(enabled)
}

fn load_call_list(target: &Target, path: &Path) -> anyhow::Result<Vec<SyscallId>> {
    let content = read_to_string(path)
        .with_context(|| format!("failed to read syscall list {}", path.display()))?;
    let mut calls = Vec::new();
    for l in content.lines().map(|l| l.trim()) {
        if l.is_empty() || l.starts_with('#') {
            continue;
        }
        match target.syscall_of_name(l) {
            Some(s) if !calls.contains(&s.id()) => calls.push(s.id()),
            Some(_) => (),
            None => anyhow::bail!("unknown syscall in {}: {}", path.display(), l),
        }
    }
    Ok(calls)
}

fn setup_fuzzer_shm(fuzzer_id: u64) -> anyhow::Result<(Shmem, Shmem)> {
    let in_shm_id = format!("kfuzz-in_shm-{}-{}", fuzzer_id, std::process::id());
    let out_shm_id = format!("kfuzz-out_shm-{}-{}", fuzzer_id, std::process::id());
    let in_shm = create_shm(&in_shm_id, IN_SHM_SZ).context("failed to create input shm")?;
    let out_shm = create_shm(&out_shm_id, OUT_SHM_SZ).context("failed to create output shm")?;
    Ok((in_shm, out_shm))
}

fn create_shm(id: &str, sz: usize) -> anyhow::Result<Shmem> {
    match ShmemConf::new().os_id(id).size(sz).create() {
        Ok(mut shm) => {
            shm.set_owner(true);
            Ok(shm)
        }
        Err(ShmemError::MappingIdExists) => {
            let mut shm = ShmemConf::new().os_id(id).size(sz).open()?;
            shm.set_owner(true);
            Ok(shm)
        }
        Err(e) => Err(e.into()),
    }
}

const KFUZZ: &str = r"
 _    __
| | _/ _|_   _ ________
| |/ / |_| | | |_  /_  /
|   <|  _| |_| |/ / / /
|_|\_\_|  \__,_/___/___|
";

#[cfg(test)]
mod tests {
    use super::*;
    use kfuzz_core::target::test_target;
    use std::fs::{remove_file, write};

    #[test]
    fn enabled_and_disabled_calls() {
        let target = test_target();
        let dir = std::env::temp_dir();
        let enabled_f = dir.join(format!("kfuzz-enabled-{}", std::process::id()));
        let disabled_f = dir.join(format!("kfuzz-disabled-{}", std::process::id()));
        write(&enabled_f, "# fd calls\nopen\nread\nclose\nread\n").unwrap();
        write(&disabled_f, "read\n").unwrap();

        let mut config = Config {
            enabled_calls: Some(enabled_f.clone()),
            ..Config::default()
        };
        assert_eq!(enabled_calls(&target, &config).unwrap(), vec![0, 1, 3]);
        config.disabled_calls = Some(disabled_f.clone());
        assert_eq!(enabled_calls(&target, &config).unwrap(), vec![0, 3]);

        config.enabled_calls = None;
        let all = enabled_calls(&target, &config).unwrap();
        assert!(!all.contains(&1));
        assert_eq!(all.len(), target.enabled_syscalls().len() - 1);

        write(&disabled_f, "no_such_call\n").unwrap();
        assert!(enabled_calls(&target, &config).is_err());
        write(&enabled_f, "read\n").unwrap();
        write(&disabled_f, "read\n").unwrap();
        config.enabled_calls = Some(enabled_f.clone());
        assert!(enabled_calls(&target, &config).is_err());

        remove_file(&enabled_f).unwrap();
        remove_file(&disabled_f).unwrap();
    }
}
