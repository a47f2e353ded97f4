//! The in-process surface the application DSL drives: id allocation,
//! data registration, job spawning, and the rewind and terminate
//! controls. Every call is a message to the controller actor.

use nimbus_common::geometry::GeometricRegion;
use nimbus_common::id::{CheckpointId, JobId, LogicalDataId, PartitionId};
use nimbus_server::actor::ActorHandle;
use tokio::sync::oneshot;

use crate::actor::ControllerActor;
use crate::error::{ControllerError, ControllerResult};
use crate::event::ControllerEvent;
use crate::job_graph::JobSpec;

#[derive(Clone)]
pub struct ControllerHandle {
    inner: ActorHandle<ControllerActor>,
}

impl ControllerHandle {
    pub(crate) fn new(inner: ActorHandle<ControllerActor>) -> Self {
        Self { inner }
    }

    pub async fn new_job_ids(&self, count: usize) -> ControllerResult<Vec<JobId>> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .send(ControllerEvent::NewJobIds { count, result: tx })
            .await?;
        rx.await.map_err(|_| ControllerError::ChannelClosed)?
    }

    pub async fn new_logical_ids(&self, count: usize) -> ControllerResult<Vec<LogicalDataId>> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .send(ControllerEvent::NewLogicalIds { count, result: tx })
            .await?;
        rx.await.map_err(|_| ControllerError::ChannelClosed)?
    }

    pub async fn register_partition(
        &self,
        partition: PartitionId,
        region: GeometricRegion,
    ) -> ControllerResult<()> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .send(ControllerEvent::RegisterPartition {
                partition,
                region,
                result: tx,
            })
            .await?;
        rx.await.map_err(|_| ControllerError::ChannelClosed)?
    }

    pub async fn register_data(
        &self,
        logical: LogicalDataId,
        variable: impl Into<String>,
        partition: PartitionId,
    ) -> ControllerResult<()> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .send(ControllerEvent::RegisterData {
                logical,
                variable: variable.into(),
                partition,
                result: tx,
            })
            .await?;
        rx.await.map_err(|_| ControllerError::ChannelClosed)?
    }

    /// Extends `parent`'s output context with a fresh logical id at
    /// version zero, making the data readable by `parent`'s descendants.
    pub async fn define_data(&self, parent: JobId, logical: LogicalDataId) -> ControllerResult<()> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .send(ControllerEvent::DefineData {
                parent,
                logical,
                result: tx,
            })
            .await?;
        rx.await.map_err(|_| ControllerError::ChannelClosed)?
    }

    pub async fn spawn_job(&self, spec: JobSpec) -> ControllerResult<()> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .send(ControllerEvent::SpawnJob { spec, result: tx })
            .await?;
        rx.await.map_err(|_| ControllerError::ChannelClosed)?
    }

    /// The command server's bound port, or `None` while it is starting.
    pub async fn listen_port(&self) -> ControllerResult<Option<u16>> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .send(ControllerEvent::ListenPort { result: tx })
            .await?;
        rx.await.map_err(|_| ControllerError::ChannelClosed)
    }

    /// Resolves once every application job spawned so far is done.
    pub async fn wait_jobs_done(&self) -> ControllerResult<()> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .send(ControllerEvent::WaitJobsDone { result: tx })
            .await?;
        rx.await.map_err(|_| ControllerError::ChannelClosed)
    }

    /// Quiesces every worker, resolving once all of them have drained,
    /// so the application can reload from `checkpoint`.
    pub async fn prepare_rewind(&self, checkpoint: CheckpointId) -> ControllerResult<()> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .send(ControllerEvent::PrepareRewind {
                checkpoint,
                result: tx,
            })
            .await?;
        rx.await.map_err(|_| ControllerError::ChannelClosed)?
    }

    pub async fn terminate(&self, exit_status: i32) -> ControllerResult<()> {
        self.inner
            .send(ControllerEvent::Terminate { exit_status })
            .await
    }

    pub async fn wait_for_stop(self) {
        self.inner.wait_for_stop().await
    }
}
