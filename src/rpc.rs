//! The coordinator RPC: generated gRPC types, the Unix socket the
//! coordinator listens on and a client for workers.

use std::path::{Path, PathBuf};

use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tonic::{Code, Request, Status};
use tower::service_fn;

use crate::{Assignment, MrError, Result, TaskKind};

pub mod mapreduce {
    tonic::include_proto!("mapreduce");
}

pub use mapreduce::coordinator_client::CoordinatorClient;
pub use mapreduce::coordinator_server::{Coordinator, CoordinatorServer};
use mapreduce::{GetTaskReply, GetTaskRequest, UpdateTaskStatusRequest};

/// Environment variable overriding the coordinator socket path.
pub const SOCKET_ENV: &str = "MINIMR_SOCKET";

/// The well-known socket of the invoking user's coordinator.
///
/// Scoped by login name so that users sharing a host never talk to each
/// other's coordinator.
pub fn coordinator_sock() -> PathBuf {
    PathBuf::from(format!("/var/tmp/mr-{}", whoami::username()))
}

impl From<TaskKind> for mapreduce::TaskKind {
    fn from(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Map => mapreduce::TaskKind::Map,
            TaskKind::Reduce => mapreduce::TaskKind::Reduce,
        }
    }
}

impl From<mapreduce::TaskKind> for TaskKind {
    fn from(kind: mapreduce::TaskKind) -> Self {
        match kind {
            mapreduce::TaskKind::Map => TaskKind::Map,
            mapreduce::TaskKind::Reduce => TaskKind::Reduce,
        }
    }
}

/// Decodes the wire `kind` field, rejecting values this build does not know.
pub fn task_kind_from_wire(kind: i32) -> std::result::Result<TaskKind, Status> {
    mapreduce::TaskKind::try_from(kind)
        .map(TaskKind::from)
        .map_err(|_| Status::invalid_argument(format!("unknown task kind {kind}")))
}

impl From<Assignment> for GetTaskReply {
    fn from(task: Assignment) -> Self {
        GetTaskReply {
            name: task.name,
            ordinal: task.ordinal,
            kind: mapreduce::TaskKind::from(task.kind) as i32,
            n_reduce: task.n_reduce,
        }
    }
}

/// A worker's connection to the coordinator.
///
/// Holds one channel for the worker's lifetime instead of dialing per
/// call; the channel reconnects by itself if the connection drops.
#[derive(Debug, Clone)]
pub struct RpcClient {
    socket: PathBuf,
    inner: CoordinatorClient<Channel>,
}

impl RpcClient {
    /// Connects to the coordinator listening on `socket`.
    pub async fn connect(socket: impl AsRef<Path>) -> Result<Self> {
        let socket = socket.as_ref().to_path_buf();
        let path = socket.clone();
        // The URI is required by the endpoint builder but never dialed.
        let channel = Endpoint::try_from("http://[::]:50051")
            .map_err(|e| transport(&socket, e))?
            .connect_with_connector(service_fn(move |_: Uri| UnixStream::connect(path.clone())))
            .await
            .map_err(|e| transport(&socket, e))?;
        Ok(Self {
            socket,
            inner: CoordinatorClient::new(channel),
        })
    }

    /// Asks for the next task.
    ///
    /// Fails with [`MrError::NoMoreTasks`] once the job is complete.
    pub async fn get_task(&mut self) -> Result<Assignment> {
        let reply = self
            .inner
            .get_task(Request::new(GetTaskRequest {}))
            .await
            .map_err(|status| self.classify(status))?
            .into_inner();
        Ok(Assignment {
            kind: task_kind_from_wire(reply.kind).map_err(MrError::Rpc)?,
            name: reply.name,
            ordinal: reply.ordinal,
            n_reduce: reply.n_reduce,
        })
    }

    /// Reports that the task `name` of the given kind is complete.
    pub async fn update_task_status(&mut self, name: &str, kind: TaskKind) -> Result<()> {
        let request = UpdateTaskStatusRequest {
            name: name.to_string(),
            kind: mapreduce::TaskKind::from(kind) as i32,
        };
        self.inner
            .update_task_status(Request::new(request))
            .await
            .map_err(|status| self.classify(status))?;
        Ok(())
    }

    fn classify(&self, status: Status) -> MrError {
        if status.code() == Code::Unavailable {
            MrError::Transport {
                socket: self.socket.clone(),
                reason: status.message().to_string(),
            }
        } else {
            status.into()
        }
    }
}

fn transport(socket: &Path, err: impl std::fmt::Display) -> MrError {
    MrError::Transport {
        socket: socket.to_path_buf(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_is_scoped_to_the_user() {
        let sock = coordinator_sock();
        let name = sock.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("mr-"));
        assert!(name.ends_with(&whoami::username()));
    }

    #[test]
    fn unknown_wire_kind_is_rejected() {
        assert_eq!(task_kind_from_wire(0).unwrap(), TaskKind::Map);
        assert_eq!(task_kind_from_wire(1).unwrap(), TaskKind::Reduce);
        let status = task_kind_from_wire(7).unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn connecting_to_a_missing_socket_is_a_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RpcClient::connect(dir.path().join("absent.sock"))
            .await
            .unwrap_err();
        assert!(matches!(err, MrError::Transport { .. }));
        assert!(err.is_fatal());
    }
}
