use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::coordinator::CoordinatorConfig;
use crate::rpc::SOCKET_ENV;

#[derive(Parser, Debug)]
#[command(version, about = "Serve one MapReduce job to workers", long_about = None)]
pub struct Args {
    /// Input files, one map task each
    #[arg(required = true)]
    pub files: Vec<String>,
    /// [OPT] Number of reduce partitions (default 10)
    #[clap(short, long, default_value = None)]
    pub n_reduce: Option<u32>,
    /// [OPT] Unix socket to listen on (default /var/tmp/mr-<user>)
    #[clap(short, long, default_value = None, env = SOCKET_ENV)]
    pub socket: Option<PathBuf>,
    /// Timeout period for a task to count as straggling (default 10s)
    #[clap(short, long, default_value = None)]
    pub timeout: Option<u64>,
    /// [OPT] Directory the workers write intermediate files to (default .)
    #[clap(short = 'd', long, default_value = None)]
    pub work_dir: Option<PathBuf>,
}

impl Args {
    /// Splits the arguments into the coordinator config and the input files.
    pub fn into_config(self) -> (CoordinatorConfig, Vec<String>) {
        let mut config = CoordinatorConfig::default();
        if let Some(n_reduce) = self.n_reduce {
            config.n_reduce = n_reduce;
        }
        if let Some(socket) = self.socket {
            config.socket = socket;
        }
        if let Some(work_dir) = self.work_dir {
            config.work_dir = work_dir;
        }
        if let Some(secs) = self.timeout {
            config.task_timeout = Duration::from_secs(secs);
        }
        (config, self.files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_options_are_absent() {
        let args = Args::try_parse_from(["minimr-coordinator", "a.txt", "b.txt"]).unwrap();
        let (config, files) = args.into_config();
        assert_eq!(files, vec!["a.txt", "b.txt"]);
        assert_eq!(config.n_reduce, crate::DEFAULT_N_REDUCE);
        assert_eq!(config.task_timeout, Duration::from_secs(10));
        assert_eq!(config.work_dir, PathBuf::from("."));
    }

    #[test]
    fn options_override_defaults() {
        let args = Args::try_parse_from([
            "minimr-coordinator",
            "--n-reduce",
            "3",
            "--socket",
            "/tmp/mr-test",
            "-t",
            "2",
            "-d",
            "/tmp/jobs",
            "a.txt",
        ])
        .unwrap();
        let (config, _) = args.into_config();
        assert_eq!(config.n_reduce, 3);
        assert_eq!(config.socket, PathBuf::from("/tmp/mr-test"));
        assert_eq!(config.task_timeout, Duration::from_secs(2));
        assert_eq!(config.work_dir, PathBuf::from("/tmp/jobs"));
    }

    #[test]
    fn inputs_are_required() {
        assert!(Args::try_parse_from(["minimr-coordinator"]).is_err());
    }
}
