//! Command-line arguments of the binaries.

pub mod coordinator;
pub mod worker;
