//! Registry of the workloads a worker can be started with.
//!
//! Workers and the sequential runner pick their map and reduce functions
//! by name on the command line:
//! ```
//! # fn main() -> anyhow::Result<()> {
//! let wc = minimr::workload::named("wc")?;
//! let pairs = (wc.map_fn)("pg-0.txt", "to be or not to be")?;
//! assert_eq!(pairs.len(), 6);
//! # Ok(())
//! # }
//! ```

use crate::Workload;
use anyhow::{anyhow, Result};

pub mod wc;

const REGISTRY: &[(&str, Workload)] = &[(
    "wc",
    Workload {
        map_fn: wc::map,
        reduce_fn: wc::reduce,
    },
)];

/// Names of every registered workload.
pub fn names() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(name, _)| *name)
}

/// Looks up a workload, or [`None`] if `name` is not registered.
pub fn try_named(name: &str) -> Option<Workload> {
    REGISTRY
        .iter()
        .find(|(registered, _)| *registered == name)
        .map(|(_, workload)| *workload)
}

/// Like [`try_named`], but the error lists what is available.
pub fn named(name: &str) -> Result<Workload> {
    try_named(name).ok_or_else(|| {
        let available: Vec<_> = names().collect();
        anyhow!("unknown workload `{name}` (available: {})", available.join(", "))
    })
}
