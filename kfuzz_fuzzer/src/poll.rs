//! Periodic exchange of signal, inputs and candidates with the manager.
use crate::{
    fuzzer::SharedState,
    leak::{STAGE_FLUSH, STAGE_WAIT},
    manager::{PollArgs, RpcSignal},
    queue::{WorkCandidate, WorkItem, PROG_CANDIDATE, PROG_MINIMIZED, PROG_SMASHED},
    util::stop_soon,
};
use anyhow::Context;
use kfuzz_core::parse::parse_prog;
use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        mpsc::{Receiver, RecvTimeoutError},
        Arc,
    },
    time::{Duration, Instant},
};

pub const POLL_TICK: Duration = Duration::from_secs(3);
pub const POLL_PERIOD: Duration = Duration::from_secs(10);

pub struct Poller {
    shared_state: SharedState,
    name: String,
    leak_stage: Arc<AtomicU32>,
}

impl Poller {
    pub fn new(shared_state: SharedState, name: String, leak_stage: Arc<AtomicU32>) -> Self {
        Self {
            shared_state,
            name,
            leak_stage,
        }
    }

    /// Poll whenever a fuzzer runs out of candidates or `POLL_PERIOD` passed.
    pub fn poll_loop(&self, need_poll: Receiver<()>) -> anyhow::Result<()> {
        let mut last_poll = Instant::now();
        while !stop_soon() {
            let requested = match need_poll.recv_timeout(POLL_TICK) {
                Ok(()) => true,
                Err(RecvTimeoutError::Timeout) => false,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            if stop_soon() {
                break;
            }
            if !requested && last_poll.elapsed() < POLL_PERIOD {
                continue;
            }
            let need_candidates = self.shared_state.queue.want_candidates();
            if requested && !need_candidates {
                continue;
            }
            // poll again soon while the manager has more to give
            if !self.poll(need_candidates)? {
                last_poll = Instant::now();
            }
        }
        Ok(())
    }

    /// One round trip to the manager, returns whether anything came back.
    pub fn poll(&self, need_candidates: bool) -> anyhow::Result<bool> {
        let shared = &self.shared_state;
        let args = PollArgs {
            name: self.name.clone(),
            need_candidates,
            max_signal: RpcSignal::from(&shared.feedback.grab_new_signal()),
            stats: shared.stats.poll_delta(),
        };
        let res = shared.manager.poll(args).context("failed to poll manager")?;

        let max_signal = res
            .max_signal
            .to_signal()
            .context("bad max signal from manager")?;
        let got_signal = !max_signal.is_empty();
        shared.feedback.add_max_signal(max_signal);
        shared
            .stats
            .set_max_signal(shared.feedback.max_len() as u64);

        let got_inputs = !res.new_inputs.is_empty();
        for input in res.new_inputs {
            let text = String::from_utf8_lossy(&input.prog);
            let p = parse_prog(&shared.target, &text)
                .with_context(|| format!("failed to parse input from manager:\n{}", text))?;
            let signal = input.signal.to_signal()?;
            shared.add_input_to_corpus(p, signal);
        }

        let got_candidates = !res.candidates.is_empty();
        for c in res.candidates {
            let text = String::from_utf8_lossy(&c.prog);
            let p = match parse_prog(&shared.target, &text) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("skip bad candidate: {}", e);
                    continue;
                }
            };
            let mut flags = PROG_CANDIDATE;
            if c.minimized {
                flags |= PROG_MINIMIZED;
            }
            if c.smashed {
                flags |= PROG_SMASHED;
            }
            shared
                .queue
                .enqueue(WorkItem::Candidate(WorkCandidate { p, flags }));
        }

        if need_candidates
            && !got_candidates
            && shared.queue.is_empty()
            && self
                .leak_stage
                .compare_exchange(STAGE_WAIT, STAGE_FLUSH, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            log::info!("candidates triaged, corpus: {}", shared.corpus.len());
        }
        Ok(got_signal || got_inputs || got_candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        feedback::Feedback,
        manager::{LocalManager, Manager, NewInputArgs, RpcInput},
        queue::WorkQueue,
        stats::Stats,
    };
    use kfuzz_core::{
        corpus::CorpusWrapper, select::ChoiceTable, signal::Signal, target::test_target,
    };
    use kfuzz_exec::gate::Gate;
    use std::fs::{create_dir_all, remove_dir_all, write};

    fn shared_state(manager: Arc<dyn Manager>) -> SharedState {
        let target = test_target();
        let choice = ChoiceTable::new(&target, None);
        SharedState {
            target: Arc::new(target),
            choice: Arc::new(choice),
            corpus: Arc::new(CorpusWrapper::new()),
            feedback: Arc::new(Feedback::new()),
            queue: Arc::new(WorkQueue::new(1, None)),
            stats: Arc::new(Stats::new()),
            gate: Arc::new(Gate::new(2, None)),
            manager,
        }
    }

    #[test]
    fn poll_candidates_and_inputs() {
        let dir = std::env::temp_dir().join(format!("kfuzz-poll-{}", std::process::id()));
        let _ = remove_dir_all(&dir);
        let input = dir.join("input");
        create_dir_all(&input).unwrap();
        write(input.join("a"), "getpid()\n").unwrap();
        write(input.join("b"), "not_a_call(\n").unwrap();

        let manager = Arc::new(LocalManager::new(&dir.join("out"), Some(&input)).unwrap());
        manager
            .new_input(NewInputArgs {
                name: "other".to_string(),
                input: RpcInput {
                    call: "getpid".to_string(),
                    prog: b"getpid()\n".to_vec(),
                    signal: RpcSignal::from(&Signal::from_raw(&[1, 2, 3], 3)),
                    cover: Vec::new(),
                },
            })
            .unwrap();

        let stage = Arc::new(AtomicU32::new(STAGE_WAIT));
        let shared = shared_state(manager);
        let poller = Poller::new(shared.clone(), "f0".to_string(), stage.clone());
        assert!(poller.poll(true).unwrap());
        // the other fuzzer's input is committed, the bad candidate is skipped
        assert_eq!(shared.corpus.len(), 1);
        assert_eq!(shared.feedback.corpus_len(), 3);
        assert!(matches!(
            shared.queue.dequeue(),
            Some(WorkItem::Candidate(c)) if c.flags == PROG_CANDIDATE
        ));
        assert!(shared.queue.is_empty());
        assert_eq!(stage.load(Ordering::SeqCst), STAGE_WAIT);

        assert!(!poller.poll(true).unwrap());
        assert_eq!(stage.load(Ordering::SeqCst), STAGE_FLUSH);

        remove_dir_all(&dir).unwrap();
    }
}
