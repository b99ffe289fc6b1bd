//! Single-process MapReduce, used as the reference output of a job.

use clap::Parser;
use std::path::PathBuf;

pub mod engine;

#[derive(Parser, Debug)]
#[command(version, about = "Run a MapReduce job serially in one process", long_about = None)]
pub struct Args {
    /// Name of the workload
    #[arg(short, long, default_value = "wc")]
    pub workload: String,

    /// Output file
    #[arg(short, long, default_value = "mr-out-0")]
    pub output: PathBuf,

    /// Input files or glob specs for the input files
    #[arg(required = true)]
    pub input: Vec<String>,
}
