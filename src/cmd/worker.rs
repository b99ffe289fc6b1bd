use std::path::PathBuf;

use clap::Parser;

use crate::rpc::SOCKET_ENV;
use crate::worker::WorkerConfig;

#[derive(Parser, Debug)]
#[command(version, about = "Run MapReduce tasks until the job is done", long_about = None)]
pub struct Args {
    /// Name of the workload to bind
    #[clap(short, long, default_value = "wc")]
    pub workload: String,
    /// Connect to the coordinator listening on this Unix socket
    #[clap(short, long, default_value = None, env = SOCKET_ENV)]
    pub socket: Option<PathBuf>,
    /// Directory for intermediate and output files
    #[clap(short = 'd', long, default_value = ".")]
    pub work_dir: PathBuf,
}

impl Args {
    pub fn to_config(&self) -> WorkerConfig {
        let mut config = WorkerConfig {
            work_dir: self.work_dir.clone(),
            ..WorkerConfig::default()
        };
        if let Some(socket) = &self.socket {
            config.socket = socket.clone();
        }
        config
    }
}
