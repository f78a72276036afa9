//! Core algorithms and data structures of kfuzz: program model, generation,
//! mutation, minimization and coverage signal.

use ahash::{AHashMap, AHashSet};

#[macro_use]
pub mod verbose;
pub mod alloc;
pub mod context;
pub mod corpus;
pub mod gen;
pub mod hints;
pub mod len;
pub mod minimize;
pub mod mutation;
pub mod parse;
pub mod prog;
pub mod select;
pub mod signal;
pub mod syscall;
pub mod target;
pub mod ty;
pub mod value;

pub type HashMap<K, V> = AHashMap<K, V>;
pub type HashSet<V> = AHashSet<V>;
pub type RngType = rand::rngs::SmallRng;

pub use verbose::set_verbose;
