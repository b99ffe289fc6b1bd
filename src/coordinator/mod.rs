//! The MapReduce coordinator.
//!

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use crate::rpc::mapreduce::{
    GetTaskReply, GetTaskRequest, UpdateTaskStatusReply, UpdateTaskStatusRequest,
};
use crate::rpc::{self, CoordinatorServer};
use crate::worker::engine::remove_intermediate_files;
use crate::{MrError, Result, DEFAULT_N_REDUCE, DEFAULT_TASK_TIMEOUT_SECS};

pub mod scheduler;

pub use scheduler::{Phase, Progress, Scheduler, TaskStatus};

/// Configuration for the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Unix socket to listen on
    pub socket: PathBuf,
    /// Directory the workers write intermediate files to
    pub work_dir: PathBuf,
    /// Number of reduce partitions
    pub n_reduce: u32,
    /// How long a task may stay in progress before it is handed out again
    pub task_timeout: Duration,
    /// Period of the stalled-task scan
    pub scan_interval: Duration,
    /// Upper bound on a single suspend inside `GetTask`
    pub wait_recheck: Duration,
    /// How often the driver checks whether the job is done
    pub done_poll: Duration,
    /// How long to keep serving after the job is done
    pub linger: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            socket: rpc::coordinator_sock(),
            work_dir: PathBuf::from("."),
            n_reduce: DEFAULT_N_REDUCE,
            task_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
            scan_interval: Duration::from_millis(500),
            wait_recheck: Duration::from_secs(1),
            done_poll: Duration::from_secs(1),
            linger: Duration::from_secs(1),
        }
    }
}

/// gRPC front of the [`Scheduler`].
pub struct CoordinatorService {
    scheduler: Arc<Scheduler>,
}

impl CoordinatorService {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

#[tonic::async_trait]
impl rpc::Coordinator for CoordinatorService {
    async fn get_task(
        &self,
        _request: Request<GetTaskRequest>,
    ) -> std::result::Result<Response<GetTaskReply>, Status> {
        let task = self.scheduler.get_task().await?;
        Ok(Response::new(task.into()))
    }

    async fn update_task_status(
        &self,
        request: Request<UpdateTaskStatusRequest>,
    ) -> std::result::Result<Response<UpdateTaskStatusReply>, Status> {
        let request = request.into_inner();
        let kind = rpc::task_kind_from_wire(request.kind)?;
        if let Err(err) = self.scheduler.update_task_status(&request.name, kind) {
            warn!(task = %request.name, %kind, "rejected completion report: {err}");
            return Err(err.into());
        }
        Ok(Response::new(UpdateTaskStatusReply {}))
    }
}

/// A coordinator serving one job.
pub struct CoordinatorHandle {
    config: CoordinatorConfig,
    scheduler: Arc<Scheduler>,
    server: JoinHandle<std::result::Result<(), tonic::transport::Error>>,
    stall_detector: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

/// Builds the job from `files` and starts serving it on `config.socket`.
///
/// Intermediate files left in `config.work_dir` by an earlier job are
/// removed first. The stall detector runs in the background until the job
/// is done or the coordinator shuts down.
pub async fn start(config: CoordinatorConfig, files: Vec<String>) -> Result<CoordinatorHandle> {
    let scheduler = Arc::new(Scheduler::new(
        files,
        config.n_reduce,
        config.task_timeout,
        config.wait_recheck,
    )?);

    let stale = remove_intermediate_files(&config.work_dir)?;
    if stale > 0 {
        info!(work_dir = %config.work_dir.display(), files = stale, "removed stale intermediate files");
    }

    match std::fs::remove_file(&config.socket) {
        Ok(()) => debug!(socket = %config.socket.display(), "removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(MrError::io(&config.socket, e)),
    }
    let listener = UnixListener::bind(&config.socket).map_err(|e| MrError::io(&config.socket, e))?;
    info!(socket = %config.socket.display(), n_reduce = config.n_reduce, "coordinator listening");

    let stall_detector = tokio::spawn(scheduler.clone().run_stall_detector(config.scan_interval));

    let (shutdown, stop) = oneshot::channel::<()>();
    let service = CoordinatorServer::new(CoordinatorService::new(scheduler.clone()));
    let server = tokio::spawn(async move {
        Server::builder()
            .add_service(service)
            .serve_with_incoming_shutdown(UnixListenerStream::new(listener), async move {
                let _ = stop.await;
            })
            .await
    });

    Ok(CoordinatorHandle {
        config,
        scheduler,
        server,
        stall_detector,
        shutdown,
    })
}

/// Serves one job on the configured socket until it is done.
pub async fn run(config: CoordinatorConfig, files: Vec<String>) -> Result<()> {
    start(config, files).await?.wait().await
}

impl CoordinatorHandle {
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn done(&self) -> bool {
        self.scheduler.done()
    }

    /// Polls until the job is done, keeps serving for the linger period
    /// so blocked workers learn there is nothing left, then shuts down.
    pub async fn wait(mut self) -> Result<()> {
        let mut ticker = interval(self.config.done_poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while !self.scheduler.done() {
            tokio::select! {
                _ = ticker.tick() => {}
                res = &mut self.server => {
                    // The server only stops on its own when it fails.
                    let reason = match res {
                        Ok(Ok(())) => "server stopped".to_string(),
                        Ok(Err(e)) => e.to_string(),
                        Err(e) => e.to_string(),
                    };
                    self.stall_detector.abort();
                    self.remove_socket();
                    return Err(MrError::Transport { socket: self.config.socket.clone(), reason });
                }
            }
        }
        info!("job done, shutting down in {:?}", self.config.linger);
        sleep(self.config.linger).await;
        self.shutdown().await
    }

    /// Stops serving and removes the socket file.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.stall_detector.abort();
        let socket = self.config.socket.clone();
        let grace = self.config.linger.max(Duration::from_millis(100));
        let abort = self.server.abort_handle();
        let res = match timeout(grace, self.server).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(MrError::Transport {
                socket: socket.clone(),
                reason: e.to_string(),
            }),
            Ok(Err(e)) if e.is_cancelled() => Ok(()),
            Ok(Err(e)) => Err(MrError::Transport {
                socket: socket.clone(),
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!("connections still open after {grace:?}, closing them");
                abort.abort();
                Ok(())
            }
        };
        remove_socket(&socket);
        res
    }

    fn remove_socket(&self) {
        remove_socket(&self.config.socket);
    }
}

fn remove_socket(socket: &std::path::Path) {
    if let Err(e) = std::fs::remove_file(socket) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(socket = %socket.display(), "could not remove socket: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> CoordinatorConfig {
        CoordinatorConfig {
            socket: dir.path().join("mr.sock"),
            work_dir: dir.path().to_path_buf(),
            n_reduce: 2,
            task_timeout: Duration::from_secs(10),
            scan_interval: Duration::from_millis(10),
            wait_recheck: Duration::from_millis(50),
            done_poll: Duration::from_millis(10),
            linger: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn start_clears_intermediate_files_of_an_earlier_job() {
        let dir = TempDir::new().unwrap();
        for name in ["mr-0-0", "mr-3-1", "mr-out-0"] {
            std::fs::write(dir.path().join(name), "{\"Key\":\"old\",\"Value\":\"1\"}\n").unwrap();
        }
        let handle = start(config(&dir), vec!["pg-0.txt".into()]).await.unwrap();
        assert!(!dir.path().join("mr-0-0").exists());
        assert!(!dir.path().join("mr-3-1").exists());
        assert!(dir.path().join("mr-out-0").exists());
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn early_shutdown_stops_the_stall_detector() {
        let dir = TempDir::new().unwrap();
        let handle = start(config(&dir), vec!["pg-0.txt".into()]).await.unwrap();
        let scheduler = Arc::downgrade(handle.scheduler());
        assert!(!handle.done());
        handle.shutdown().await.unwrap();

        // The detector and the server are the only other owners.
        let released = timeout(Duration::from_secs(2), async {
            while scheduler.strong_count() > 0 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(released.is_ok(), "scheduler still referenced after shutdown");
        assert!(!dir.path().join("mr.sock").exists());
    }
}
