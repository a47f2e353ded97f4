//! The controller's graph of every spawned job, keyed by id. Edges are
//! id sets rather than references; entries are created on spawn and kept
//! after completion so late lookups against done predecessors still
//! resolve.

use std::collections::HashMap;

use bytes::Bytes;
use log::debug;
use nimbus_common::id::{
    DataVersion, IdSet, JobId, LogicalDataId, PhysicalDataId, WorkerId, INIT_DATA_VERSION,
    KERNEL_JOB_ID,
};

use crate::data_manager::PhysicalInstance;
use crate::error::{ControllerError, ControllerResult};
use crate::version::VersionMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// The synthetic root, id 0, parent of everything the application and
    /// the scheduler spawn.
    Kernel,
    Compute,
    CreateData,
    LocalCopy,
    RemoteCopySend,
    RemoteCopyReceive,
}

impl JobKind {
    pub fn is_copy(self) -> bool {
        matches!(
            self,
            JobKind::CreateData | JobKind::LocalCopy | JobKind::RemoteCopySend | JobKind::RemoteCopyReceive
        )
    }
}

/// What the application hands the controller when spawning a compute job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: JobId,
    pub name: String,
    pub read_set: IdSet<LogicalDataId>,
    pub write_set: IdSet<LogicalDataId>,
    pub before_set: IdSet<JobId>,
    pub after_set: IdSet<JobId>,
    pub parent: JobId,
    pub params: Bytes,
    pub sterile: bool,
    pub future_id: JobId,
}

#[derive(Debug, Clone)]
pub struct JobEntry {
    pub id: JobId,
    pub kind: JobKind,
    pub name: String,
    pub read_set: IdSet<LogicalDataId>,
    pub write_set: IdSet<LogicalDataId>,
    pub before_set: IdSet<JobId>,
    pub after_set: IdSet<JobId>,
    pub parent: JobId,
    pub params: Bytes,
    pub sterile: bool,
    pub future_id: JobId,
    pub vmap_in: VersionMap,
    pub vmap_out: VersionMap,
    /// logical id -> chosen physical instance, filled in at assignment.
    pub physical_map: HashMap<LogicalDataId, PhysicalDataId>,
    pub assigned_worker: Option<WorkerId>,
    pub versioned: bool,
    pub assigned: bool,
    pub done: bool,
}

impl JobEntry {
    pub fn from_spec(spec: JobSpec) -> Self {
        Self {
            id: spec.id,
            kind: JobKind::Compute,
            name: spec.name,
            read_set: spec.read_set,
            write_set: spec.write_set,
            before_set: spec.before_set,
            after_set: spec.after_set,
            parent: spec.parent,
            params: spec.params,
            sterile: spec.sterile,
            future_id: spec.future_id,
            vmap_in: VersionMap::new(),
            vmap_out: VersionMap::new(),
            physical_map: HashMap::new(),
            assigned_worker: None,
            versioned: false,
            assigned: false,
            done: false,
        }
    }

    /// A controller-synthesized create/copy entry. These enter the graph
    /// versioned and assigned so readiness scans skip them; their ordering
    /// is enforced worker-side through the before-sets they ride in.
    pub fn synthesized(id: JobId, kind: JobKind, worker: WorkerId) -> Self {
        Self {
            id,
            kind,
            name: String::new(),
            read_set: IdSet::new(),
            write_set: IdSet::new(),
            before_set: IdSet::new(),
            after_set: IdSet::new(),
            parent: KERNEL_JOB_ID,
            params: Bytes::new(),
            sterile: true,
            future_id: KERNEL_JOB_ID,
            vmap_in: VersionMap::new(),
            vmap_out: VersionMap::new(),
            physical_map: HashMap::new(),
            assigned_worker: Some(worker),
            versioned: true,
            assigned: true,
            done: false,
        }
    }

    pub fn union_set(&self) -> IdSet<LogicalDataId> {
        self.read_set.union(&self.write_set).copied().collect()
    }
}

#[derive(Debug)]
pub struct JobManager {
    jobs: HashMap<JobId, JobEntry>,
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new()
    }
}

impl JobManager {
    /// Starts with the kernel job, the versioned and completed root that
    /// parents application main jobs and scheduler-inserted jobs.
    pub fn new() -> Self {
        let mut kernel = JobEntry::synthesized(KERNEL_JOB_ID, JobKind::Kernel, WorkerId(0));
        kernel.name = "kernel".to_string();
        kernel.assigned_worker = None;
        kernel.done = true;
        let mut jobs = HashMap::new();
        jobs.insert(KERNEL_JOB_ID, kernel);
        Self { jobs }
    }

    pub fn add_job(&mut self, entry: JobEntry) -> ControllerResult<()> {
        if self.jobs.contains_key(&entry.id) {
            return Err(ControllerError::DuplicateJob(entry.id));
        }
        self.jobs.insert(entry.id, entry);
        Ok(())
    }

    pub fn get(&self, id: JobId) -> ControllerResult<&JobEntry> {
        self.jobs.get(&id).ok_or(ControllerError::UnknownJob(id))
    }

    pub fn get_mut(&mut self, id: JobId) -> ControllerResult<&mut JobEntry> {
        self.jobs.get_mut(&id).ok_or(ControllerError::UnknownJob(id))
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.jobs.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &JobEntry> {
        self.jobs.values()
    }

    /// Extends `parent`'s output version map with a fresh logical id at
    /// version zero. Redefinition is an application error.
    pub fn define_data(&mut self, parent: JobId, logical: LogicalDataId) -> ControllerResult<()> {
        let entry = self.get_mut(parent)?;
        if entry.vmap_out.contains(logical) {
            return Err(ControllerError::DuplicateLdo(logical));
        }
        entry.vmap_out.insert(logical, INIT_DATA_VERSION);
        Ok(())
    }

    /// Jobs that are versioned, unassigned, and whose before-set consists
    /// entirely of known done jobs, in deterministic id order, up to `max`.
    pub fn jobs_ready_to_assign(&self, max: usize) -> Vec<JobId> {
        let mut candidates: Vec<&JobEntry> = self
            .jobs
            .values()
            .filter(|job| job.versioned && !job.assigned)
            .collect();
        candidates.sort_by_key(|job| job.id);
        candidates
            .iter()
            .filter(|job| {
                job.before_set.iter().all(|id| match self.jobs.get(id) {
                    Some(entry) => entry.done,
                    None => {
                        debug!("job {} waits for unknown predecessor {id}", job.id);
                        false
                    }
                })
            })
            .take(max)
            .map(|job| job.id)
            .collect()
    }

    /// Versioned, unassigned jobs whose input version map pins `logical`
    /// at `version`. A job counts even when it neither reads nor writes
    /// the id: its input context still depends on that version existing.
    pub fn jobs_need_version(&self, logical: LogicalDataId, version: DataVersion) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|job| job.versioned && !job.assigned)
            .filter(|job| job.vmap_in.get(logical) == Some(version))
            .map(|job| job.id)
            .collect()
    }

    pub fn mark_done(&mut self, id: JobId) -> bool {
        match self.jobs.get_mut(&id) {
            Some(entry) => {
                entry.done = true;
                true
            }
            None => false,
        }
    }

    /// True when every application compute job is done. Copy entries are
    /// acknowledged implicitly and may trail behind (a final send with no
    /// later writer is never observed done).
    pub fn all_jobs_done(&self) -> bool {
        self.jobs
            .values()
            .filter(|job| job.kind == JobKind::Compute)
            .all(|job| job.done)
    }

    /// Drops done predecessors (and the kernel) from a before-set about to
    /// go on the wire; unknown ids are kept and resolved worker-side.
    pub fn prune_before_set(&self, before_set: &mut IdSet<JobId>) {
        before_set.retain(|id| {
            *id != KERNEL_JOB_ID
                && match self.jobs.get(id) {
                    Some(entry) => !entry.done,
                    None => true,
                }
        });
    }

    /// True when `candidate` is reachable from `job`'s before-set through
    /// before-edges, meaning `job` is already ordered after it.
    pub fn is_transitive_predecessor(&self, job: JobId, candidate: JobId) -> bool {
        let Ok(entry) = self.get(job) else {
            return false;
        };
        let mut stack: Vec<JobId> = entry.before_set.iter().copied().collect();
        let mut seen: IdSet<JobId> = stack.iter().copied().collect();
        while let Some(id) = stack.pop() {
            if id == candidate {
                return true;
            }
            if let Some(entry) = self.jobs.get(&id) {
                for before in &entry.before_set {
                    if seen.insert(*before) {
                        stack.push(*before);
                    }
                }
            }
        }
        false
    }

    /// Would handing `instance` to `job` force it into an after-chain
    /// behind a job that is not already among its transitive
    /// predecessors? Only writes serialize: the writer must wait for every
    /// outstanding application reader of the instance.
    pub fn causing_unwanted_serialization(
        &self,
        job: JobId,
        logical: LogicalDataId,
        instance: &PhysicalInstance,
    ) -> bool {
        let Ok(entry) = self.get(job) else {
            return false;
        };
        if !entry.write_set.contains(&logical) {
            return false;
        }
        instance.readers.iter().any(|reader| {
            *reader != job
                && !reader.is_scheduler_produced()
                && !self.jobs.get(reader).is_some_and(|r| r.done)
                && !self.is_transitive_predecessor(job, *reader)
        })
    }
}

#[cfg(test)]
mod tests {
    use nimbus_common::id::WorkerId;

    use super::*;

    fn spec(id: u64, before: &[u64]) -> JobSpec {
        JobSpec {
            id: JobId(id),
            name: format!("job-{id}"),
            read_set: IdSet::new(),
            write_set: IdSet::new(),
            before_set: before.iter().map(|&b| JobId(b)).collect(),
            after_set: IdSet::new(),
            parent: KERNEL_JOB_ID,
            params: Bytes::new(),
            sterile: false,
            future_id: KERNEL_JOB_ID,
        }
    }

    #[test]
    fn test_duplicate_job_rejected() {
        let mut jobs = JobManager::new();
        jobs.add_job(JobEntry::from_spec(spec(1, &[]))).unwrap();
        let err = jobs.add_job(JobEntry::from_spec(spec(1, &[])));
        assert!(matches!(err, Err(ControllerError::DuplicateJob(_))));
    }

    #[test]
    fn test_ready_requires_versioned_and_done_predecessors() {
        let mut jobs = JobManager::new();
        jobs.add_job(JobEntry::from_spec(spec(1, &[]))).unwrap();
        jobs.add_job(JobEntry::from_spec(spec(2, &[1]))).unwrap();
        assert!(jobs.jobs_ready_to_assign(10).is_empty());

        jobs.get_mut(JobId(1)).unwrap().versioned = true;
        jobs.get_mut(JobId(2)).unwrap().versioned = true;
        assert_eq!(jobs.jobs_ready_to_assign(10), vec![JobId(1)]);

        jobs.get_mut(JobId(1)).unwrap().assigned = true;
        jobs.mark_done(JobId(1));
        assert_eq!(jobs.jobs_ready_to_assign(10), vec![JobId(2)]);
    }

    #[test]
    fn test_define_data_rejects_redefinition() {
        let mut jobs = JobManager::new();
        jobs.define_data(KERNEL_JOB_ID, LogicalDataId(1)).unwrap();
        let err = jobs.define_data(KERNEL_JOB_ID, LogicalDataId(1));
        assert!(matches!(err, Err(ControllerError::DuplicateLdo(_))));
    }

    #[test]
    fn test_prune_before_set_drops_done_and_kernel() {
        let mut jobs = JobManager::new();
        jobs.add_job(JobEntry::from_spec(spec(1, &[]))).unwrap();
        jobs.add_job(JobEntry::from_spec(spec(2, &[]))).unwrap();
        jobs.mark_done(JobId(1));
        let mut set: IdSet<JobId> = [KERNEL_JOB_ID, JobId(1), JobId(2), JobId(99)].into();
        jobs.prune_before_set(&mut set);
        assert_eq!(set, [JobId(2), JobId(99)].into());
    }

    #[test]
    fn test_unwanted_serialization_spares_transitive_predecessors() {
        let mut jobs = JobManager::new();
        jobs.add_job(JobEntry::from_spec(spec(1, &[]))).unwrap();
        jobs.add_job(JobEntry::from_spec(spec(2, &[1]))).unwrap();
        let mut writer = JobEntry::from_spec(spec(3, &[2]));
        writer.write_set.insert(LogicalDataId(7));
        jobs.add_job(writer).unwrap();

        // Job 1 is reachable from job 3 through job 2, job 5 is not.
        let mut instance =
            PhysicalInstance::created(PhysicalDataId(1), WorkerId(1), KERNEL_JOB_ID);
        instance.readers = [JobId(1)].into();
        assert!(!jobs.causing_unwanted_serialization(JobId(3), LogicalDataId(7), &instance));

        instance.readers = [JobId(5)].into();
        assert!(jobs.causing_unwanted_serialization(JobId(3), LogicalDataId(7), &instance));

        // Readers only matter to writers.
        assert!(!jobs.causing_unwanted_serialization(JobId(3), LogicalDataId(8), &instance));
    }
}
