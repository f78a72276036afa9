use crate::{
    feedback::Feedback,
    fuzzer_log::set_fuzzer_id,
    manager::{Manager, NewInputArgs, RpcInput, RpcSignal},
    queue::{
        ProgFlags, WorkCandidate, WorkItem, WorkQueue, WorkSmash, WorkTriage, PROG_MINIMIZED,
        PROG_SMASHED,
    },
    stats::{Stat, Stats},
    util::stop_soon,
};
use anyhow::Context;
use kfuzz_core::{
    corpus::{prog_sig, CorpusWrapper},
    gen::gen_prog,
    hints::mutate_with_hints,
    minimize::minimize,
    mutation::mutate,
    prog::{Call, Prog},
    select::ChoiceTable,
    signal::{Cover, Signal, SignalPrio},
    target::Target,
    value::Visit,
    set_verbose, RngType,
};
use kfuzz_exec::{
    exec::{
        output::{CallExecInfo, ProgExecInfo},
        ExecOpt, ExecResult, Executor, CALL_FAULT_INJECTED, FLAG_COLLECT_COMPS,
        FLAG_COLLECT_COVER, FLAG_COLLIDE, FLAG_DEDUP_COVER, FLAG_INJECT_FAULT,
    },
    gate::Gate,
};
use rand::SeedableRng;
use std::sync::Arc;

pub const GENERATE_PERIOD: u64 = 100;
/// Generate period when the kernel provides no coverage.
pub const GENERATE_PERIOD_NO_SIGNAL: u64 = 2;
pub const SIGNAL_RUNS: usize = 3;
pub const MINIMIZE_ATTEMPTS: usize = 3;
pub const FAULT_INJECTION_BOUND: i32 = 100;
pub const SMASH_MUTATIONS: usize = 100;
const EXTRA_CALL_NAME: &str = ".extra";

pub struct SharedState {
    pub target: Arc<Target>,
    pub choice: Arc<ChoiceTable>,
    pub corpus: Arc<CorpusWrapper>,
    pub feedback: Arc<Feedback>,
    pub queue: Arc<WorkQueue>,
    pub stats: Arc<Stats>,
    pub gate: Arc<Gate>,
    pub manager: Arc<dyn Manager>,
}

impl Clone for SharedState {
    fn clone(&self) -> Self {
        Self {
            target: Arc::clone(&self.target),
            choice: Arc::clone(&self.choice),
            corpus: Arc::clone(&self.corpus),
            feedback: Arc::clone(&self.feedback),
            queue: Arc::clone(&self.queue),
            stats: Arc::clone(&self.stats),
            gate: Arc::clone(&self.gate),
            manager: Arc::clone(&self.manager),
        }
    }
}

impl SharedState {
    /// Add an accepted input to the corpus, returns false if it is already there.
    pub fn add_input_to_corpus(&self, p: Prog, signal: Signal) -> bool {
        let sig = prog_sig(&self.target, &p);
        if !self.corpus.add(p, signal.clone(), sig) {
            return false;
        }
        if !signal.is_empty() {
            self.feedback.add_corpus_signal(&signal);
        }
        self.stats.set_corpus_size(self.corpus.len() as u64);
        self.stats
            .set_corpus_signal(self.feedback.corpus_len() as u64);
        self.stats.set_max_signal(self.feedback.max_len() as u64);
        true
    }
}

#[derive(Debug, Clone)]
pub struct FuzzerConfig {
    /// Name reported to the manager.
    pub name: String,
    pub prog_len: usize,
    /// Whether the kernel provides coverage.
    pub signal: bool,
    pub fault_injection: bool,
    pub comparisons: bool,
    pub verbose: bool,
    pub seed: Option<u64>,
}

/// Options of the different kinds of runs.
#[derive(Debug, Clone)]
pub struct ExecOpts {
    pub base: ExecOpt,
    pub cover: ExecOpt,
    pub comps: ExecOpt,
    pub no_collide: ExecOpt,
}

impl ExecOpts {
    pub fn new(base: ExecOpt) -> Self {
        let mut no_collide = base.clone();
        no_collide.disable(FLAG_COLLIDE);
        let mut cover = no_collide.clone();
        cover.enable(FLAG_COLLECT_COVER);
        let mut comps = no_collide.clone();
        comps.enable(FLAG_COLLECT_COMPS);
        Self {
            base,
            cover,
            comps,
            no_collide,
        }
    }
}

const CRASH_RESEED_STEP: u64 = 128;

pub fn seeded_rng(seed: Option<u64>) -> RngType {
    match seed {
        Some(s) => RngType::seed_from_u64(s),
        None => RngType::from_entropy(),
    }
}

/// Rng for the runs after a crash, keeps seeded fuzzers reproducible.
fn reseed(seed: &mut Option<u64>) -> RngType {
    if let Some(s) = seed.as_mut() {
        *s = s.wrapping_add(CRASH_RESEED_STEP);
    }
    seeded_rng(*seed)
}

pub struct Fuzzer {
    pub shared_state: SharedState,

    // local
    pub id: u64,
    pub rng: RngType,
    /// Seed of `rng`, moved forward on every crash.
    pub seed: Option<u64>,
    pub executor: Executor,
    pub config: FuzzerConfig,
    pub opts: ExecOpts,
}

impl Fuzzer {
    pub fn fuzz_loop(&mut self) -> anyhow::Result<()> {
        set_fuzzer_id(self.id);
        set_verbose(self.config.verbose);
        let period = if self.config.signal {
            GENERATE_PERIOD
        } else {
            GENERATE_PERIOD_NO_SIGNAL
        };
        fuzzer_info!("started");

        for i in 0_u64.. {
            if stop_soon() {
                break;
            }
            if let Some(item) = self.shared_state.queue.dequeue() {
                match item {
                    WorkItem::Triage(t) => self.triage_input(t).context("failed to triage input")?,
                    WorkItem::Candidate(c) => self
                        .execute_candidate(c)
                        .context("failed to execute candidate")?,
                    WorkItem::Smash(s) => self.smash_input(s).context("failed to smash input")?,
                }
                continue;
            }

            let opt = self.opts.base.clone();
            if self.shared_state.corpus.is_empty() || i % period == 0 {
                let p = gen_prog(
                    &self.shared_state.target,
                    &self.shared_state.choice,
                    &mut self.rng,
                    self.config.prog_len,
                );
                self.execute(&opt, &p, 0, Stat::ExecGenerate)
                    .context("failed to execute generated prog")?;
            } else if let Some(mut p) = self.shared_state.corpus.choose_program(&mut self.rng) {
                let ms = mutate(
                    &self.shared_state.target,
                    &self.shared_state.choice,
                    &self.shared_state.corpus,
                    &mut self.rng,
                    &mut p,
                    self.config.prog_len,
                );
                self.shared_state.stats.add_mutate(&ms);
                self.execute(&opt, &p, 0, Stat::ExecFuzz)
                    .context("failed to execute mutated prog")?;
            }
        }

        fuzzer_info!("exited");
        Ok(())
    }

    fn execute_candidate(&mut self, c: WorkCandidate) -> anyhow::Result<()> {
        let opt = self.opts.base.clone();
        self.execute(&opt, &c.p, c.flags, Stat::ExecCandidate)?;
        Ok(())
    }

    /// Verify the new signal of one call, minimize the prog and commit it to the corpus.
    pub fn triage_input(&mut self, item: WorkTriage) -> anyhow::Result<()> {
        let target = Arc::clone(&self.shared_state.target);
        let prio = signal_prio(&target, &item.p, &item.info, item.call);
        let input_signal = Signal::from_raw(&item.info.signal, prio);
        let mut new_signal = self.shared_state.feedback.corpus_signal_diff(&input_signal);
        if new_signal.is_empty() {
            return Ok(());
        }
        let call_name = call_name(&target, &item.p, item.call);
        fuzzer_debug!(
            "triaging input for {} (new signal={})",
            call_name,
            new_signal.len()
        );

        // signal of flaky edges is dropped
        let opt = self.opts.cover.clone();
        let mut input_cover = Cover::default();
        let mut notexecuted = 0;
        for _ in 0..SIGNAL_RUNS {
            let ret = self.execute_raw(&opt, &item.p, Stat::ExecTriage)?;
            let info = match ret.info {
                Some(info) if reexecution_success(Some(&info), &item.info, item.call) => info,
                _ => {
                    notexecuted += 1;
                    if notexecuted > SIGNAL_RUNS / 2 {
                        return Ok(());
                    }
                    continue;
                }
            };
            let (this_signal, this_cover) = signal_and_cover(&target, &item.p, &info, item.call);
            new_signal = new_signal.intersection(&this_signal);
            // without minimization the input must keep some new signal
            if new_signal.is_empty() && item.flags & PROG_MINIMIZED == 0 {
                return Ok(());
            }
            input_cover.merge(this_cover);
        }

        let (p, call) = if item.flags & PROG_MINIMIZED == 0 {
            let mut err = None;
            let ret = minimize(&target, &item.p, item.call, false, |p1, call1| {
                if err.is_some() {
                    return false;
                }
                match self.minimize_pred(p1, call1, &item.info, &new_signal) {
                    Ok(ok) => ok,
                    Err(e) => {
                        err = Some(e);
                        false
                    }
                }
            });
            if let Some(e) = err {
                return Err(e).context("failed to minimize input");
            }
            ret
        } else {
            (item.p, item.call)
        };

        let data = p.display(&target).to_string();
        fuzzer_debug!("added new input for {} to corpus:\n{}", call_name, data);
        let input = RpcInput {
            call: call_name,
            prog: data.into_bytes(),
            signal: RpcSignal::from(&input_signal),
            cover: input_cover.pcs().to_vec(),
        };
        self.shared_state
            .manager
            .new_input(NewInputArgs {
                name: self.config.name.clone(),
                input,
            })
            .context("failed to report new input")?;

        self.shared_state.add_input_to_corpus(p.clone(), input_signal);
        if item.flags & PROG_SMASHED == 0 {
            self.shared_state
                .queue
                .enqueue(WorkItem::Smash(WorkSmash { p, call }));
        }
        Ok(())
    }

    fn minimize_pred(
        &mut self,
        p: &Prog,
        call: Option<usize>,
        old: &CallExecInfo,
        new_signal: &Signal,
    ) -> anyhow::Result<bool> {
        let target = Arc::clone(&self.shared_state.target);
        let opt = self.opts.no_collide.clone();
        for _ in 0..MINIMIZE_ATTEMPTS {
            let info = self.execute(&opt, p, 0, Stat::ExecMinimize)?;
            let info = match info {
                Some(info) if reexecution_success(Some(&info), old, call) => info,
                // the call may not be executed for reasons unrelated to minimization
                _ => continue,
            };
            let (this_signal, _) = signal_and_cover(&target, p, &info, call);
            if new_signal.intersection(&this_signal).len() == new_signal.len() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Fault injection, hint mutation and a round of extra mutations of a corpus entry.
    pub fn smash_input(&mut self, item: WorkSmash) -> anyhow::Result<()> {
        if let Some(call) = item.call {
            if self.config.fault_injection {
                self.fail_call(&item.p, call)?;
            }
            if self.config.comparisons {
                self.execute_hint_seed(&item.p, call)?;
            }
        }

        let opt = self.opts.base.clone();
        for _ in 0..SMASH_MUTATIONS {
            if stop_soon() {
                break;
            }
            let mut p = item.p.clone();
            let ms = mutate(
                &self.shared_state.target,
                &self.shared_state.choice,
                &self.shared_state.corpus,
                &mut self.rng,
                &mut p,
                self.config.prog_len,
            );
            self.shared_state.stats.add_mutate(&ms);
            self.execute(&opt, &p, 0, Stat::ExecSmash)?;
        }
        Ok(())
    }

    /// Inject a fault into the nth operation of `call`, for increasing nth.
    pub fn fail_call(&mut self, p: &Prog, call: usize) -> anyhow::Result<()> {
        let mut opt = self.opts.base.clone();
        opt.enable(FLAG_INJECT_FAULT);
        opt.fault_call = call as i32;
        for nth in 0..FAULT_INJECTION_BOUND {
            opt.fault_nth = nth;
            let ret = self.execute_raw(&opt, p, Stat::ExecSmash)?;
            let injected = ret
                .info
                .as_ref()
                .and_then(|info| info.call_infos.get(call))
                .map(|ci| ci.flags & CALL_FAULT_INJECTED != 0)
                .unwrap_or(false);
            if !injected {
                break;
            }
        }
        Ok(())
    }

    /// Collect comparison operands of `call`, then try each hint mutation.
    pub fn execute_hint_seed(&mut self, p: &Prog, call: usize) -> anyhow::Result<()> {
        let opt = self.opts.comps.clone();
        let info = match self.execute(&opt, p, 0, Stat::ExecSeed)? {
            Some(info) => info,
            None => return Ok(()),
        };
        let comps = match info.call_infos.get(call) {
            Some(ci) if !ci.comps.is_empty() => &ci.comps,
            _ => return Ok(()),
        };

        let target = Arc::clone(&self.shared_state.target);
        let opt = self.opts.base.clone();
        let mut err = None;
        mutate_with_hints(&target, p, call, comps, |p1| {
            if err.is_some() || stop_soon() {
                return;
            }
            if let Err(e) = self.execute(&opt, p1, 0, Stat::ExecHint) {
                err = Some(e);
            }
        });
        match err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run `p`, queue every call that gave new signal for triage.
    pub fn execute(
        &mut self,
        opt: &ExecOpt,
        p: &Prog,
        flags: ProgFlags,
        stat: Stat,
    ) -> anyhow::Result<Option<ProgExecInfo>> {
        let ret = self.execute_raw(opt, p, stat)?;
        if ret.crashed {
            self.shared_state.stats.inc_crashes();
            fuzzer_warn!(
                "kernel crashed while executing:\n{}",
                p.display(&self.shared_state.target)
            );
            self.rng = reseed(&mut self.seed);
            return Ok(None);
        }
        let info = match ret.info {
            Some(info) => info,
            None => return Ok(None),
        };

        let target = Arc::clone(&self.shared_state.target);
        for (i, ci) in info.call_infos.iter().enumerate() {
            let prio = signal_prio(&target, p, ci, Some(i));
            if self
                .shared_state
                .feedback
                .check_new_call_signal(&ci.signal, prio)
            {
                self.enqueue_call_triage(p, flags, Some(i), ci);
            }
        }
        if let Some(extra) = info.extra.as_ref() {
            if self
                .shared_state
                .feedback
                .check_new_call_signal(&extra.signal, 0)
            {
                self.enqueue_call_triage(p, flags, None, extra);
            }
        }
        Ok(Some(info))
    }

    fn enqueue_call_triage(
        &self,
        p: &Prog,
        flags: ProgFlags,
        call: Option<usize>,
        info: &CallExecInfo,
    ) {
        // cover is collected again while triaging
        let info = CallExecInfo {
            cover: Vec::new(),
            ..info.clone()
        };
        self.shared_state.queue.enqueue(WorkItem::Triage(WorkTriage {
            p: p.clone(),
            call,
            info,
            flags,
        }));
    }

    /// Run `p` once while holding a gate ticket.
    pub fn execute_raw(
        &mut self,
        opt: &ExecOpt,
        p: &Prog,
        stat: Stat,
    ) -> anyhow::Result<ExecResult> {
        assert!(
            opt.flags & FLAG_DEDUP_COVER != 0,
            "dedup cover is not enabled"
        );
        let gate = Arc::clone(&self.shared_state.gate);
        let _ticket = gate.enter();

        let target = &self.shared_state.target;
        self.shared_state.stats.inc(stat);
        self.shared_state.stats.inc_exec_total();
        fuzzer_trace!(
            "executing (flags: {:#x}, fault: {}/{}):\n{}",
            opt.flags,
            opt.fault_call,
            opt.fault_nth,
            p.display(target)
        );
        match self.executor.exec_with_retry(target, p, opt) {
            Ok(ret) => {
                if ret.hanged {
                    self.shared_state.stats.inc_hangs();
                    fuzzer_debug!("hanged:\n{}", String::from_utf8_lossy(&ret.output));
                }
                Ok(ret)
            }
            Err(e) if e.is_prog_error() => {
                fuzzer_warn!("skip prog: {}", e);
                Ok(ExecResult::default())
            }
            Err(e) => Err(e).with_context(|| format!("executor of fuzzer-{} failed", self.id)),
        }
    }
}

fn call_name(target: &Target, p: &Prog, call: Option<usize>) -> String {
    match call {
        Some(i) => target.syscall_of(p.calls()[i].sid()).name().to_string(),
        None => EXTRA_CALL_NAME.to_string(),
    }
}

/// Prio of the signal of `call`: successful calls and calls without squashed args rank higher.
pub fn signal_prio(
    target: &Target,
    p: &Prog,
    info: &CallExecInfo,
    call: Option<usize>,
) -> SignalPrio {
    let call = match call {
        Some(call) => call,
        None => return 0,
    };
    let mut prio = 0;
    if info.errno == 0 {
        prio |= 1 << 1;
    }
    if !contains_any(target, &p.calls()[call]) {
        prio |= 1;
    }
    prio
}

fn contains_any(target: &Target, call: &Call) -> bool {
    let any_blob = target.any_blob();
    call.foreach_value(|v| match v.as_ptr().and_then(|ptr| ptr.pointee.as_ref()) {
        Some(pointee) if pointee.ty_id() == any_blob => Visit::Stop,
        _ => Visit::Continue,
    })
}

/// Whether a rerun executed the triaged call as before.
pub fn reexecution_success(
    info: Option<&ProgExecInfo>,
    old: &CallExecInfo,
    call: Option<usize>,
) -> bool {
    let info = match info {
        Some(info) if !info.call_infos.is_empty() => info,
        _ => return false,
    };
    match call {
        Some(call) => match info.call_infos.get(call) {
            // the call should not fail if it succeeded before
            Some(ci) if old.errno == 0 && ci.errno != 0 => false,
            Some(ci) => !ci.signal.is_empty(),
            None => false,
        },
        None => info
            .extra
            .as_ref()
            .map(|extra| !extra.signal.is_empty())
            .unwrap_or(false),
    }
}

/// Signal and raw cover of `call` (the extra bucket if `None`).
pub fn signal_and_cover<'a>(
    target: &Target,
    p: &Prog,
    info: &'a ProgExecInfo,
    call: Option<usize>,
) -> (Signal, &'a [u32]) {
    let ci = match call {
        Some(i) => info.call_infos.get(i),
        None => info.extra.as_ref(),
    };
    match ci {
        Some(ci) => {
            let prio = signal_prio(target, p, ci, call);
            (Signal::from_raw(&ci.signal, prio), ci.cover.as_slice())
        }
        None => (Signal::new(), &[][..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kfuzz_core::{parse::parse_prog, target::test_target};

    fn call_info(errno: i32, signal: &[u32]) -> CallExecInfo {
        CallExecInfo {
            errno,
            signal: signal.to_vec(),
            cover: signal.to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn crash_reseed_is_deterministic() {
        use rand::RngCore;

        let mut a = Some(7);
        let mut b = Some(7);
        let mut rng_a = reseed(&mut a);
        let mut rng_b = reseed(&mut b);
        assert_eq!(a, Some(7 + CRASH_RESEED_STEP));
        assert_eq!(rng_a.next_u64(), rng_b.next_u64());
        assert_eq!(
            seeded_rng(a).next_u64(),
            RngType::seed_from_u64(135).next_u64()
        );

        let mut unseeded = None;
        reseed(&mut unseeded);
        assert_eq!(unseeded, None);
    }

    #[test]
    fn signal_prio_of_calls() {
        let target = test_target();
        let p = parse_prog(&target, "getpid()\ngetpid()\n").unwrap();
        assert_eq!(signal_prio(&target, &p, &call_info(0, &[1]), Some(0)), 3);
        assert_eq!(signal_prio(&target, &p, &call_info(22, &[1]), Some(1)), 1);
        assert_eq!(signal_prio(&target, &p, &call_info(0, &[1]), None), 0);
    }

    #[test]
    fn reexecution() {
        let ok = call_info(0, &[1, 2]);
        let info = ProgExecInfo {
            call_infos: vec![ok.clone(), call_info(9, &[3])],
            extra: Some(call_info(0, &[4])),
        };
        assert!(reexecution_success(Some(&info), &ok, Some(0)));
        assert!(!reexecution_success(Some(&info), &ok, Some(1)));
        assert!(reexecution_success(Some(&info), &call_info(9, &[]), Some(1)));
        assert!(!reexecution_success(Some(&info), &ok, Some(2)));
        assert!(reexecution_success(Some(&info), &ok, None));
        assert!(!reexecution_success(None, &ok, Some(0)));

        let no_signal = ProgExecInfo {
            call_infos: vec![call_info(0, &[])],
            extra: None,
        };
        assert!(!reexecution_success(Some(&no_signal), &ok, Some(0)));
        assert!(!reexecution_success(Some(&no_signal), &ok, None));
        assert!(!reexecution_success(
            Some(&ProgExecInfo::default()),
            &ok,
            None
        ));
    }

    #[test]
    fn signal_and_cover_of_call() {
        let target = test_target();
        let p = parse_prog(&target, "getpid()\n").unwrap();
        let info = ProgExecInfo {
            call_infos: vec![call_info(0, &[5, 6])],
            extra: None,
        };
        let (signal, cover) = signal_and_cover(&target, &p, &info, Some(0));
        assert_eq!(signal.len(), 2);
        assert!(signal.iter().all(|(_, prio)| prio == 3));
        assert_eq!(cover, &[5, 6]);
        let (signal, cover) = signal_and_cover(&target, &p, &info, None);
        assert!(signal.is_empty() && cover.is_empty());
    }

    #[test]
    fn exec_opts_variants() {
        let opts = ExecOpts::new(ExecOpt::new());
        assert!(opts.base.flags & FLAG_COLLIDE != 0);
        assert!(opts.no_collide.flags & FLAG_COLLIDE == 0);
        assert!(opts.cover.flags & FLAG_COLLECT_COVER != 0);
        assert!(opts.cover.flags & FLAG_COLLIDE == 0);
        assert!(opts.comps.flags & FLAG_COLLECT_COMPS != 0);
        assert!(opts.comps.flags & FLAG_DEDUP_COVER != 0);
    }
}
