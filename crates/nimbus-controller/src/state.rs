//! All scheduling-plane state owned by the controller actor: the
//! identifier service, the logical and physical data catalogs, the job
//! graph, the selector, and the registry of connected workers.

use std::collections::BTreeMap;

use nimbus_common::geometry::GeometricRegion;
use nimbus_common::id::{IdGenerator, IdMaker, JobId, WorkerId};

use crate::data_manager::DataManager;
use crate::error::{ControllerError, ControllerResult};
use crate::job_graph::{JobEntry, JobManager, JobSpec};
use crate::ldo_map::LogicalDataMap;
use crate::selector::WorkerSelector;
use crate::version;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    /// Connected, handshake not yet answered.
    Pending,
    /// Handshake complete; the worker's data-exchange endpoint is known.
    Active { data_ip: String, data_port: u16 },
}

#[derive(Debug, Clone)]
pub struct WorkerDescriptor {
    pub id: WorkerId,
    pub state: WorkerState,
}

impl WorkerDescriptor {
    pub fn data_endpoint(&self) -> ControllerResult<(String, u16)> {
        match &self.state {
            WorkerState::Active { data_ip, data_port } => Ok((data_ip.clone(), *data_port)),
            WorkerState::Pending => Err(ControllerError::Internal(format!(
                "worker {} has not completed the handshake",
                self.id
            ))),
        }
    }
}

#[derive(Debug)]
pub struct ControllerState {
    pub id_maker: IdMaker,
    pub ldo_map: LogicalDataMap,
    pub data_manager: DataManager,
    pub job_manager: JobManager,
    pub selector: WorkerSelector,
    pub workers: BTreeMap<WorkerId, WorkerDescriptor>,
    worker_ids: IdGenerator<WorkerId>,
}

impl ControllerState {
    pub fn new(domain: GeometricRegion) -> Self {
        Self {
            id_maker: IdMaker::new(),
            ldo_map: LogicalDataMap::new(),
            data_manager: DataManager::new(),
            job_manager: JobManager::new(),
            selector: WorkerSelector::new(domain),
            workers: BTreeMap::new(),
            worker_ids: IdGenerator::new(),
        }
    }

    /// Registers a new connection and hands out its worker id.
    pub fn register_worker(&mut self) -> ControllerResult<WorkerId> {
        let id = self.worker_ids.next()?;
        self.workers.insert(
            id,
            WorkerDescriptor {
                id,
                state: WorkerState::Pending,
            },
        );
        Ok(id)
    }

    /// Records the data endpoint the worker reported in its handshake.
    /// Rebuilds the subdomain assignment whenever the active set grows.
    pub fn activate_worker(
        &mut self,
        id: WorkerId,
        data_ip: String,
        data_port: u16,
    ) -> ControllerResult<()> {
        let worker = self
            .workers
            .get_mut(&id)
            .ok_or_else(|| ControllerError::Internal(format!("unknown worker {id}")))?;
        worker.state = WorkerState::Active { data_ip, data_port };
        let active = self.active_workers();
        self.selector.rebuild(&active)
    }

    pub fn active_workers(&self) -> Vec<WorkerId> {
        self.workers
            .values()
            .filter(|w| matches!(w.state, WorkerState::Active { .. }))
            .map(|w| w.id)
            .collect()
    }

    pub fn worker(&self, id: WorkerId) -> ControllerResult<&WorkerDescriptor> {
        self.workers
            .get(&id)
            .ok_or_else(|| ControllerError::Internal(format!("unknown worker {id}")))
    }

    pub fn spawn_job(&mut self, spec: JobSpec) -> ControllerResult<()> {
        self.job_manager.add_job(JobEntry::from_spec(spec))
    }

    /// Runs the version-resolution sweep, then returns jobs whose
    /// before-sets are fully done, bounded by `max`.
    pub fn jobs_ready_to_assign(&mut self, max: usize) -> ControllerResult<Vec<JobId>> {
        version::resolve_all(&mut self.job_manager)?;
        Ok(self.job_manager.jobs_ready_to_assign(max))
    }
}
