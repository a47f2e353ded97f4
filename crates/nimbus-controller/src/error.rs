use nimbus_common::error::CommonError;
use nimbus_common::id::{JobId, LogicalDataId, PartitionId, PhysicalDataId};
use nimbus_proto::ProtoError;
use thiserror::Error;

pub type ControllerResult<T> = Result<T, ControllerError>;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("duplicate job id {0}")]
    DuplicateJob(JobId),
    #[error("unknown job id {0}")]
    UnknownJob(JobId),
    #[error("job {job} has no resolvable version for logical id {logical}")]
    UnresolvedVersion { job: JobId, logical: LogicalDataId },
    #[error("version {version} of logical id {logical} needed by job {job} no longer exists")]
    UnreachableVersion {
        job: JobId,
        logical: LogicalDataId,
        version: u64,
    },
    #[error("stale update for physical instance {0}")]
    StaleInstance(PhysicalDataId),
    #[error("unknown logical data id {0}")]
    UnknownLdo(LogicalDataId),
    #[error("logical data id {0} is already defined")]
    DuplicateLdo(LogicalDataId),
    #[error("unknown partition id {0}")]
    UnknownPartition(PartitionId),
    #[error("no subdomain split for a cluster of {0} workers")]
    UnsupportedClusterSize(usize),
    #[error(transparent)]
    Common(#[from] CommonError),
    #[error(transparent)]
    Transport(#[from] ProtoError),
    #[error("controller event channel closed")]
    ChannelClosed,
    #[error("internal error: {0}")]
    Internal(String),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ControllerError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::ChannelClosed
    }
}
