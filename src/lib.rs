//! A minimal, fault-tolerant MapReduce system for a single host.
//!
//! A coordinator splits a job into one map task per input file and
//! `n_reduce` reduce tasks, and hands them out to worker processes over
//! gRPC on a user-scoped Unix socket. Workers shuffle intermediate data
//! through the filesystem. A worker that stalls or crashes is detected
//! purely by elapsed time and its task is handed to someone else.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod cmd;
pub mod codec;
pub mod coordinator;
pub mod error;
pub mod rpc;
pub mod standalone;
pub mod utils;
pub mod worker;
pub mod workload;

pub use codec::ihash;
pub use error::{MrError, Result};

/// Reduce partition count used when none is given.
pub const DEFAULT_N_REDUCE: u32 = 10;

/// Seconds a task may stay in progress before it is handed out again.
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 10;

/////////////////////////////////////////////////////////////////////////////
// MapReduce application types
/////////////////////////////////////////////////////////////////////////////

/// A map function takes an input file name and its whole contents.
///
/// It returns every intermediate key-value pair for that file. Order and
/// volume are up to the application.
pub type MapFn = fn(filename: &str, contents: &str) -> anyhow::Result<Vec<KeyValue>>;

/// A reduce function takes in a key and every value emitted for that key,
/// in the order the values were read. It returns a single output value.
pub type ReduceFn = fn(key: &str, values: &[String]) -> anyhow::Result<String>;

/// A map reduce application.
#[derive(Copy, Clone)]
pub struct Workload {
    pub map_fn: MapFn,
    pub reduce_fn: ReduceFn,
}

impl fmt::Debug for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workload").finish_non_exhaustive()
    }
}

/////////////////////////////////////////////////////////////////////////////
// Key-value pairs
/////////////////////////////////////////////////////////////////////////////

/// A single key-value pair.
///
/// Serialized with capitalized field names so intermediate files stay
/// readable by workers written in other languages.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct KeyValue {
    /// The key.
    #[serde(rename = "Key")]
    pub key: String,
    /// The value.
    #[serde(rename = "Value")]
    pub value: String,
}

impl KeyValue {
    /// Construct a new key-value pair from the given key and value.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Consumes the key-value pair and returns the value.
    #[inline]
    pub fn into_value(self) -> String {
        self.value
    }
}

/////////////////////////////////////////////////////////////////////////////
// Tasks
/////////////////////////////////////////////////////////////////////////////

/// The two kinds of task in a job. Map and reduce tasks are disjoint.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TaskKind {
    Map,
    Reduce,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Map => f.write_str("map"),
            TaskKind::Reduce => f.write_str("reduce"),
        }
    }
}

/// A task handed to a worker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Assignment {
    /// Map: the input file name. Reduce: the partition number as a string.
    pub name: String,
    /// Map: index into the input file list. Reduce: the partition number.
    pub ordinal: u32,
    pub kind: TaskKind,
    /// Number of reduce partitions in the job.
    pub n_reduce: u32,
}
