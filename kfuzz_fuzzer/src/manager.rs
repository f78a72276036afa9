//! Upstream coordination: poll for candidates and report new inputs.
use anyhow::Context;
use kfuzz_core::{
    signal::{SerialSignal, Signal},
    HashMap, HashSet,
};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::{
    collections::{BTreeMap, VecDeque},
    fs::{create_dir_all, read, read_dir, write},
    path::{Path, PathBuf},
    sync::Mutex,
};

/// Inputs of other fuzzers returned by one poll at most.
pub const MAX_POLL_INPUTS: usize = 100;
/// Candidates returned by one poll at most.
pub const CANDIDATE_BATCH: usize = 32;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcSignal {
    pub elems: Vec<u32>,
    pub prios: Vec<u8>,
}

impl From<&Signal> for RpcSignal {
    fn from(s: &Signal) -> Self {
        let SerialSignal { elems, prios } = s.serialize();
        Self { elems, prios }
    }
}

impl RpcSignal {
    pub fn to_signal(&self) -> anyhow::Result<Signal> {
        if self.elems.len() != self.prios.len() {
            anyhow::bail!(
                "signal with {} elems but {} prios",
                self.elems.len(),
                self.prios.len()
            );
        }
        Ok(Signal::deserialize(&SerialSignal {
            elems: self.elems.clone(),
            prios: self.prios.clone(),
        }))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcInput {
    pub call: String,
    pub prog: Vec<u8>,
    pub signal: RpcSignal,
    pub cover: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcCandidate {
    pub prog: Vec<u8>,
    pub minimized: bool,
    pub smashed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollArgs {
    pub name: String,
    pub need_candidates: bool,
    pub max_signal: RpcSignal,
    pub stats: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollRes {
    pub candidates: Vec<RpcCandidate>,
    pub new_inputs: Vec<RpcInput>,
    pub max_signal: RpcSignal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewInputArgs {
    pub name: String,
    pub input: RpcInput,
}

pub trait Manager: Send + Sync {
    fn poll(&self, args: PollArgs) -> anyhow::Result<PollRes>;

    fn new_input(&self, args: NewInputArgs) -> anyhow::Result<()>;
}

/// In-process manager keeping the corpus and a stats snapshot on disk.
pub struct LocalManager {
    corpus_dir: PathBuf,
    stats_file: PathBuf,
    inner: Mutex<LocalState>,
}

/// Content of `<output>/stats.json`.
#[derive(Debug, Serialize)]
struct StatsSnapshot<'a> {
    corpus: usize,
    max_signal: usize,
    fuzzers: usize,
    stats: &'a BTreeMap<String, u64>,
}

#[derive(Default)]
struct LocalState {
    candidates: VecDeque<RpcCandidate>,
    corpus: HashSet<String>,
    inputs: Vec<(String, RpcInput)>,
    max_signal: Signal,
    // per fuzzer: next input to send and the max signal already sent
    fuzzers: HashMap<String, FuzzerState>,
    stats: BTreeMap<String, u64>,
}

#[derive(Default)]
struct FuzzerState {
    next_input: usize,
    max_signal: Signal,
}

impl LocalManager {
    /// Create manager persisting to `<output>/corpus` and `<output>/stats.json`, existing
    /// corpus and `input` progs become candidates.
    pub fn new(output: &Path, input: Option<&Path>) -> anyhow::Result<Self> {
        let corpus_dir = output.join("corpus");
        create_dir_all(&corpus_dir)
            .with_context(|| format!("failed to create corpus dir: {}", corpus_dir.display()))?;

        let mut state = LocalState::default();
        for (hash, prog) in load_dir(&corpus_dir)? {
            state.corpus.insert(hash);
            state.candidates.push_back(RpcCandidate {
                prog,
                minimized: true,
                smashed: true,
            });
        }
        let mut n = 0;
        if let Some(input) = input {
            for (hash, prog) in load_dir(input)? {
                if state.corpus.contains(&hash) {
                    continue;
                }
                state.candidates.push_back(RpcCandidate {
                    prog,
                    minimized: false,
                    smashed: false,
                });
                n += 1;
            }
        }
        log::info!(
            "candidates: {} (corpus: {}, input: {})",
            state.candidates.len(),
            state.corpus.len(),
            n
        );

        Ok(Self {
            corpus_dir,
            stats_file: output.join("stats.json"),
            inner: Mutex::new(state),
        })
    }

    pub fn corpus_len(&self) -> usize {
        self.inner.lock().unwrap().corpus.len()
    }

    pub fn stats(&self) -> BTreeMap<String, u64> {
        self.inner.lock().unwrap().stats.clone()
    }
}

impl Manager for LocalManager {
    fn poll(&self, args: PollArgs) -> anyhow::Result<PollRes> {
        let new_signal = args.max_signal.to_signal()?;
        let mut state = self.inner.lock().unwrap();
        let state = &mut *state;
        state.max_signal.merge(new_signal);
        if !args.stats.is_empty() {
            for (name, v) in args.stats {
                *state.stats.entry(name).or_default() += v;
            }
            self.dump_stats(state)?;
        }

        let mut res = PollRes::default();
        if args.need_candidates {
            let n = CANDIDATE_BATCH.min(state.candidates.len());
            res.candidates = state.candidates.drain(..n).collect();
        }

        let fuzzer = state.fuzzers.entry(args.name.clone()).or_default();
        while fuzzer.next_input < state.inputs.len() && res.new_inputs.len() < MAX_POLL_INPUTS {
            let (from, input) = &state.inputs[fuzzer.next_input];
            fuzzer.next_input += 1;
            if from != &args.name {
                res.new_inputs.push(input.clone());
            }
        }
        let diff = fuzzer.max_signal.diff(&state.max_signal);
        if !diff.is_empty() {
            res.max_signal = RpcSignal::from(&diff);
            fuzzer.max_signal.merge(diff);
        }
        Ok(res)
    }

    fn new_input(&self, args: NewInputArgs) -> anyhow::Result<()> {
        let signal = args.input.signal.to_signal()?;
        let hash = hex::encode(Sha1::digest(&args.input.prog));
        let mut state = self.inner.lock().unwrap();
        if !state.corpus.insert(hash.clone()) {
            return Ok(());
        }
        let f = self.corpus_dir.join(&hash);
        write(&f, &args.input.prog)
            .with_context(|| format!("failed to persist input: {}", f.display()))?;
        log::debug!("new input from {}: {} ({})", args.name, args.input.call, hash);
        state.max_signal.merge(signal);
        state.inputs.push((args.name, args.input));
        Ok(())
    }
}

impl LocalManager {
    fn dump_stats(&self, state: &LocalState) -> anyhow::Result<()> {
        let snapshot = StatsSnapshot {
            corpus: state.corpus.len(),
            max_signal: state.max_signal.len(),
            fuzzers: state.fuzzers.len(),
            stats: &state.stats,
        };
        let content = serde_json::to_string_pretty(&snapshot)?;
        write(&self.stats_file, content)
            .with_context(|| format!("failed to dump stats: {}", self.stats_file.display()))
    }
}

fn load_dir(dir: &Path) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
    let dir_iter =
        read_dir(dir).with_context(|| format!("failed to read_dir: {}", dir.display()))?;
    let mut progs = Vec::new();
    for f in dir_iter.filter_map(|f| f.ok()) {
        let path = f.path();
        if !path.is_file() {
            continue;
        }
        let content = match read(&path) {
            Ok(c) if !c.is_empty() => c,
            _ => continue, // skip
        };
        progs.push((hex::encode(Sha1::digest(&content)), content));
    }
    Ok(progs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::remove_dir_all;

    fn tmp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kfuzz-{}-{}", name, std::process::id()));
        let _ = remove_dir_all(&dir);
        create_dir_all(&dir).unwrap();
        dir
    }

    fn input(prog: &str, signal: &[u32]) -> RpcInput {
        RpcInput {
            call: "getpid".to_string(),
            prog: prog.as_bytes().to_vec(),
            signal: RpcSignal::from(&Signal::from_raw(signal, 3)),
            cover: signal.to_vec(),
        }
    }

    #[test]
    fn persist_and_reload() {
        let out = tmp_dir("manager-out");
        let in_dir = tmp_dir("manager-in");
        write(in_dir.join("a"), "getpid()\n").unwrap();
        write(in_dir.join("b"), "").unwrap();

        let mgr = LocalManager::new(&out, Some(&in_dir)).unwrap();
        let res = mgr
            .poll(PollArgs {
                name: "f0".to_string(),
                need_candidates: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(res.candidates.len(), 1);
        assert!(!res.candidates[0].minimized);

        let prog = "pipe(&(0x7f0000000000)={<r0=>0x0, <r1=>0x0})\nclose(r0)\n";
        for _ in 0..2 {
            mgr.new_input(NewInputArgs {
                name: "f0".to_string(),
                input: input(prog, &[1, 2]),
            })
            .unwrap();
        }
        assert_eq!(mgr.corpus_len(), 1);
        let hash = hex::encode(Sha1::digest(prog.as_bytes()));
        assert!(out.join("corpus").join(&hash).is_file());

        let mgr = LocalManager::new(&out, Some(&in_dir)).unwrap();
        let res = mgr
            .poll(PollArgs {
                name: "f0".to_string(),
                need_candidates: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(res.candidates.len(), 2);
        assert!(res
            .candidates
            .iter()
            .any(|c| c.minimized && c.smashed && c.prog == prog.as_bytes()));

        remove_dir_all(&out).unwrap();
        remove_dir_all(&in_dir).unwrap();
    }

    #[test]
    fn share_inputs_between_fuzzers() {
        let out = tmp_dir("manager-share");
        let mgr = LocalManager::new(&out, None).unwrap();
        mgr.new_input(NewInputArgs {
            name: "f0".to_string(),
            input: input("getpid()\n", &[7]),
        })
        .unwrap();

        let poll = |name: &str| {
            mgr.poll(PollArgs {
                name: name.to_string(),
                stats: vec![("exec fuzz".to_string(), 5)].into_iter().collect(),
                ..Default::default()
            })
            .unwrap()
        };
        let res = poll("f0");
        assert!(res.new_inputs.is_empty());
        assert_eq!(res.max_signal.elems, vec![7]);
        let res = poll("f1");
        assert_eq!(res.new_inputs.len(), 1);
        assert_eq!(res.new_inputs[0].prog, b"getpid()\n");
        assert!(poll("f1").new_inputs.is_empty());
        assert!(poll("f1").max_signal.elems.is_empty());
        assert_eq!(mgr.stats()["exec fuzz"], 20);
        let dumped: serde_json::Value =
            serde_json::from_slice(&read(out.join("stats.json")).unwrap()).unwrap();
        assert_eq!(dumped["stats"]["exec fuzz"], 20);
        assert_eq!(dumped["corpus"], 1);

        let bad = PollArgs {
            max_signal: RpcSignal {
                elems: vec![1],
                prios: Vec::new(),
            },
            ..Default::default()
        };
        assert!(mgr.poll(bad).is_err());

        remove_dir_all(&out).unwrap();
    }
}
