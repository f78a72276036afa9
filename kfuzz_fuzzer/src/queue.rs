//! Work shared between fuzzer threads.
use kfuzz_core::prog::Prog;
use kfuzz_exec::exec::output::CallExecInfo;
use std::{
    collections::VecDeque,
    sync::{mpsc::SyncSender, Mutex},
};

pub type ProgFlags = u8;
pub const PROG_CANDIDATE: ProgFlags = 1;
pub const PROG_MINIMIZED: ProgFlags = 1 << 1;
pub const PROG_SMASHED: ProgFlags = 1 << 2;

/// Prog that gave new signal on `call` (`None` for the extra signal) and needs verification.
#[derive(Debug, Clone)]
pub struct WorkTriage {
    pub p: Prog,
    pub call: Option<usize>,
    pub info: CallExecInfo,
    pub flags: ProgFlags,
}

/// Prog from the manager, either an input or a corpus entry of another fuzzer.
#[derive(Debug, Clone)]
pub struct WorkCandidate {
    pub p: Prog,
    pub flags: ProgFlags,
}

/// Corpus entry that deserves heavier mutation.
#[derive(Debug, Clone)]
pub struct WorkSmash {
    pub p: Prog,
    pub call: Option<usize>,
}

#[derive(Debug, Clone)]
pub enum WorkItem {
    Triage(WorkTriage),
    Candidate(WorkCandidate),
    Smash(WorkSmash),
}

/// Prioritized work queue.
///
/// Items are dequeued in order: triage of candidates, triage, candidates, smash.
pub struct WorkQueue {
    procs: usize,
    triage_candidate: Mutex<VecDeque<WorkTriage>>,
    triage: Mutex<VecDeque<WorkTriage>>,
    candidate: Mutex<VecDeque<WorkCandidate>>,
    smash: Mutex<VecDeque<WorkSmash>>,
    need_poll: Option<SyncSender<()>>,
}

impl WorkQueue {
    pub fn new(procs: usize, need_poll: Option<SyncSender<()>>) -> Self {
        Self {
            procs,
            triage_candidate: Mutex::new(VecDeque::new()),
            triage: Mutex::new(VecDeque::new()),
            candidate: Mutex::new(VecDeque::new()),
            smash: Mutex::new(VecDeque::new()),
            need_poll,
        }
    }

    pub fn enqueue(&self, item: WorkItem) {
        match item {
            WorkItem::Triage(t) if t.flags & PROG_CANDIDATE != 0 => {
                self.triage_candidate.lock().unwrap().push_back(t)
            }
            WorkItem::Triage(t) => self.triage.lock().unwrap().push_back(t),
            WorkItem::Candidate(c) => self.candidate.lock().unwrap().push_back(c),
            WorkItem::Smash(s) => self.smash.lock().unwrap().push_back(s),
        }
    }

    pub fn dequeue(&self) -> Option<WorkItem> {
        if let Some(t) = self.triage_candidate.lock().unwrap().pop_front() {
            return Some(WorkItem::Triage(t));
        }
        if let Some(t) = self.triage.lock().unwrap().pop_front() {
            return Some(WorkItem::Triage(t));
        }
        let (c, remain) = {
            let mut candidate = self.candidate.lock().unwrap();
            (candidate.pop_front(), candidate.len())
        };
        if let Some(c) = c {
            if remain < self.procs {
                self.notify_need_poll();
            }
            return Some(WorkItem::Candidate(c));
        }
        self.smash.lock().unwrap().pop_front().map(WorkItem::Smash)
    }

    /// Whether the poller should ask the manager for more candidates.
    pub fn want_candidates(&self) -> bool {
        self.candidate.lock().unwrap().len() < self.procs
    }

    pub fn len(&self) -> usize {
        self.triage_candidate.lock().unwrap().len()
            + self.triage.lock().unwrap().len()
            + self.candidate.lock().unwrap().len()
            + self.smash.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify_need_poll(&self) {
        if let Some(tx) = self.need_poll.as_ref() {
            // a pending notification is enough
            let _ = tx.try_send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kfuzz_core::{parse::parse_prog, target::test_target};
    use std::sync::mpsc::sync_channel;

    fn prog(text: &str) -> Prog {
        let target = test_target();
        parse_prog(&target, text).unwrap()
    }

    fn triage(p: &Prog, flags: ProgFlags) -> WorkItem {
        WorkItem::Triage(WorkTriage {
            p: p.clone(),
            call: Some(0),
            info: CallExecInfo::default(),
            flags,
        })
    }

    #[test]
    fn dequeue_by_priority() {
        let p = prog("getpid()\n");
        let q = WorkQueue::new(1, None);
        q.enqueue(WorkItem::Smash(WorkSmash {
            p: p.clone(),
            call: None,
        }));
        q.enqueue(WorkItem::Candidate(WorkCandidate {
            p: p.clone(),
            flags: PROG_CANDIDATE,
        }));
        q.enqueue(triage(&p, 0));
        q.enqueue(triage(&p, PROG_CANDIDATE));
        assert_eq!(q.len(), 4);

        assert!(matches!(q.dequeue(), Some(WorkItem::Triage(t)) if t.flags == PROG_CANDIDATE));
        assert!(matches!(q.dequeue(), Some(WorkItem::Triage(t)) if t.flags == 0));
        assert!(matches!(q.dequeue(), Some(WorkItem::Candidate(_))));
        assert!(matches!(q.dequeue(), Some(WorkItem::Smash(_))));
        assert!(q.dequeue().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn want_candidates_and_poll() {
        let p = prog("getpid()\n");
        let (tx, rx) = sync_channel(1);
        let q = WorkQueue::new(2, Some(tx));
        assert!(q.want_candidates());
        for _ in 0..3 {
            q.enqueue(WorkItem::Candidate(WorkCandidate {
                p: p.clone(),
                flags: PROG_CANDIDATE | PROG_MINIMIZED,
            }));
        }
        assert!(!q.want_candidates());

        q.dequeue();
        assert!(rx.try_recv().is_err());
        q.dequeue();
        assert!(rx.try_recv().is_ok());
        q.dequeue();
        assert!(q.want_candidates());
    }
}
