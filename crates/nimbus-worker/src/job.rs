//! The closed set of jobs a worker executes. Only the compute variant
//! carries user code; the rest are data-motion jobs the controller
//! synthesized.

use std::collections::HashMap;

use bytes::Bytes;
use nimbus_common::id::{DataVersion, IdSet, JobId, LogicalDataId, PhysicalDataId, WorkerId};

#[derive(Debug, Clone)]
pub enum WorkerJob {
    Compute(ComputeJob),
    CreateData(CreateDataJob),
    LocalCopy(LocalCopyJob),
    RemoteCopySend(RemoteCopySendJob),
    RemoteCopyReceive(RemoteCopyReceiveJob),
    MegaReceive(MegaReceiveJob),
}

impl WorkerJob {
    /// Receive vertices are gated by the control edge until their payload
    /// arrives.
    pub fn is_receive(&self) -> bool {
        matches!(
            self,
            WorkerJob::RemoteCopyReceive(_) | WorkerJob::MegaReceive(_)
        )
    }

    pub fn name(&self) -> &str {
        match self {
            WorkerJob::Compute(job) => &job.name,
            WorkerJob::CreateData(_) => "create-data",
            WorkerJob::LocalCopy(_) => "local-copy",
            WorkerJob::RemoteCopySend(_) => "remote-copy-send",
            WorkerJob::RemoteCopyReceive(_) => "remote-copy-receive",
            WorkerJob::MegaReceive(_) => "mega-receive",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComputeJob {
    pub name: String,
    pub read_set: IdSet<PhysicalDataId>,
    pub write_set: IdSet<PhysicalDataId>,
    pub scratch_set: IdSet<PhysicalDataId>,
    pub reduce_set: IdSet<PhysicalDataId>,
    pub params: Bytes,
    pub sterile: bool,
    pub future_id: JobId,
}

#[derive(Debug, Clone)]
pub struct CreateDataJob {
    pub variable: String,
    pub logical_id: LogicalDataId,
    pub physical_id: PhysicalDataId,
}

#[derive(Debug, Clone)]
pub struct LocalCopyJob {
    pub from: PhysicalDataId,
    pub to: PhysicalDataId,
}

#[derive(Debug, Clone)]
pub struct RemoteCopySendJob {
    pub receive_job_id: JobId,
    pub from: PhysicalDataId,
    pub to_worker: WorkerId,
    pub to_ip: String,
    pub to_port: u16,
}

#[derive(Debug, Clone)]
pub struct RemoteCopyReceiveJob {
    pub to: PhysicalDataId,
    /// Attached by the data exchanger when the payload lands.
    pub payload: Option<ReceivedPayload>,
}

#[derive(Debug, Clone)]
pub struct MegaReceiveJob {
    /// Constituent receive id -> destination instance.
    pub receives: Vec<(JobId, PhysicalDataId)>,
    pub payloads: HashMap<JobId, ReceivedPayload>,
}

impl MegaReceiveJob {
    pub fn all_data_received(&self) -> bool {
        self.receives
            .iter()
            .all(|(receive_id, _)| self.payloads.contains_key(receive_id))
    }
}

#[derive(Debug, Clone)]
pub struct ReceivedPayload {
    pub version: DataVersion,
    pub bytes: Bytes,
}
