//! The MapReduce worker.
//!
//! A worker asks the coordinator for a task, runs it, reports it and asks
//! again, until the coordinator says there is nothing left. Any other
//! failure ends the worker; the coordinator notices through the task
//! timeout and hands the task to someone else.

use std::path::PathBuf;

use tracing::{error, info, info_span, Instrument, Span};
use uuid::Uuid;

use crate::rpc::{self, RpcClient};
use crate::{Assignment, MrError, Result, TaskKind, Workload};

pub mod engine;

/// Configuration for a worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Coordinator socket
    pub socket: PathBuf,
    /// Where intermediate and output files live
    pub work_dir: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            socket: rpc::coordinator_sock(),
            work_dir: PathBuf::from("."),
        }
    }
}

/// Tasks a worker completed before it stopped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub maps: usize,
    pub reduces: usize,
}

pub struct Worker {
    id: Uuid,
    workload: Workload,
    work_dir: PathBuf,
    client: RpcClient,
}

impl Worker {
    /// Connects to the coordinator at `config.socket`.
    pub async fn connect(config: WorkerConfig, workload: Workload) -> Result<Self> {
        let client = RpcClient::connect(&config.socket).await?;
        Ok(Self::with_client(client, workload, config.work_dir))
    }

    pub fn with_client(client: RpcClient, workload: Workload, work_dir: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            workload,
            work_dir,
            client,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Runs tasks until the job is complete.
    ///
    /// Returns `Ok` only when the coordinator reports there are no more
    /// tasks; transport, I/O and decode failures are returned as errors.
    pub async fn run(mut self) -> Result<WorkerStats> {
        let span = info_span!("worker", id = %self.id);
        async move {
            info!(work_dir = %self.work_dir.display(), "worker started");
            let mut stats = WorkerStats::default();
            loop {
                let task = match self.client.get_task().await {
                    Ok(task) => task,
                    Err(MrError::NoMoreTasks) => {
                        info!(maps = stats.maps, reduces = stats.reduces, "no more tasks, exiting");
                        return Ok(stats);
                    }
                    Err(err) => {
                        error!("cannot get a task: {err}");
                        return Err(err);
                    }
                };
                info!(task = %task.name, kind = %task.kind, ordinal = task.ordinal, "received task");

                if let Err(err) = Self::execute(self.workload, self.work_dir.clone(), &task).await {
                    error!(task = %task.name, kind = %task.kind, "task failed: {err}");
                    return Err(err);
                }
                self.client.update_task_status(&task.name, task.kind).await?;
                match task.kind {
                    TaskKind::Map => stats.maps += 1,
                    TaskKind::Reduce => stats.reduces += 1,
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Runs the task on the blocking pool; map and reduce functions and
    /// their file I/O are synchronous.
    async fn execute(workload: Workload, work_dir: PathBuf, task: &Assignment) -> Result<()> {
        let assignment = task.clone();
        let span = Span::current();
        let joined = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            match assignment.kind {
                TaskKind::Map => engine::perform_map(
                    &assignment.name,
                    assignment.ordinal,
                    assignment.n_reduce,
                    &workload,
                    &work_dir,
                ),
                TaskKind::Reduce => engine::perform_reduce(assignment.ordinal, &workload, &work_dir),
            }
        })
        .await;

        match joined {
            Ok(res) => res.map(|_| ()),
            Err(e) => Err(MrError::Aborted {
                kind: task.kind,
                name: task.name.clone(),
                reason: e.to_string(),
            }),
        }
    }
}
