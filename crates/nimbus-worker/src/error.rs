use nimbus_common::id::{JobId, PhysicalDataId};
use nimbus_proto::ProtoError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("job {job} violates exclusivity on physical instance {physical}")]
    AccessConflict {
        job: JobId,
        physical: PhysicalDataId,
    },
    #[error("data arrived for unknown receive job {0}")]
    UnknownReceive(JobId),
    #[error("unknown physical instance {0}")]
    UnknownPhysical(PhysicalDataId),
    #[error("duplicate command for job {0}")]
    DuplicateJob(JobId),
    #[error("application job failed: {0}")]
    Application(String),
    #[error(transparent)]
    Transport(#[from] ProtoError),
    #[error("worker event channel closed")]
    ChannelClosed,
    #[error("internal error: {0}")]
    Internal(String),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for WorkerError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::ChannelClosed
    }
}
