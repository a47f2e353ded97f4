use nimbus_common::geometry::GeometricRegion;
use nimbus_common::id::{CheckpointId, JobId, LogicalDataId, PartitionId, WorkerId};
use nimbus_proto::Command;
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use crate::error::ControllerResult;
use crate::job_graph::JobSpec;

pub enum ControllerEvent {
    ServerReady {
        /// The local port the command server listens on.
        port: u16,
        signal: oneshot::Sender<()>,
    },
    NewConnection {
        stream: TcpStream,
    },
    CommandReceived {
        worker_id: WorkerId,
        command: Command,
    },
    ConnectionLost {
        worker_id: WorkerId,
    },
    // The application surface, reached through `ControllerHandle`.
    NewJobIds {
        count: usize,
        result: oneshot::Sender<ControllerResult<Vec<JobId>>>,
    },
    NewLogicalIds {
        count: usize,
        result: oneshot::Sender<ControllerResult<Vec<LogicalDataId>>>,
    },
    RegisterPartition {
        partition: PartitionId,
        region: GeometricRegion,
        result: oneshot::Sender<ControllerResult<()>>,
    },
    RegisterData {
        logical: LogicalDataId,
        variable: String,
        partition: PartitionId,
        result: oneshot::Sender<ControllerResult<()>>,
    },
    DefineData {
        parent: JobId,
        logical: LogicalDataId,
        result: oneshot::Sender<ControllerResult<()>>,
    },
    SpawnJob {
        spec: JobSpec,
        result: oneshot::Sender<ControllerResult<()>>,
    },
    /// Resolved once every application job in the graph is done.
    WaitJobsDone {
        result: oneshot::Sender<()>,
    },
    /// The port the command server is bound to, once it is up.
    ListenPort {
        result: oneshot::Sender<Option<u16>>,
    },
    /// Quiesce all workers, then resolve the result so the caller can
    /// reload from its checkpoint.
    PrepareRewind {
        checkpoint: CheckpointId,
        result: oneshot::Sender<ControllerResult<()>>,
    },
    Terminate {
        exit_status: i32,
    },
    Shutdown,
}
