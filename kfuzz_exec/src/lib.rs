//! Worker transport of kfuzz.
//!
//! Programs are encoded into the exec format, handed to an executor process over
//! pipes or shared memory, and the per-call results are parsed back.

use ahash::{AHashMap, AHashSet};

pub mod exec;
pub mod gate;
pub mod sys;

pub type HashMap<K, V> = AHashMap<K, V>;
pub type HashSet<V> = AHashSet<V>;
