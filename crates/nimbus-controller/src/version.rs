//! Version maps and the resolver that derives them. A job's input map is
//! its parent's output map merged (by max) with the output maps of its
//! before-set; the output map adds one on every write-set entry.

use std::collections::BTreeMap;

use log::debug;
use nimbus_common::id::{DataVersion, JobId, LogicalDataId};

use crate::error::{ControllerError, ControllerResult};
use crate::job_graph::JobManager;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionMap {
    entries: BTreeMap<LogicalDataId, DataVersion>,
}

impl VersionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, logical: LogicalDataId) -> Option<DataVersion> {
        self.entries.get(&logical).copied()
    }

    pub fn contains(&self, logical: LogicalDataId) -> bool {
        self.entries.contains_key(&logical)
    }

    pub fn insert(&mut self, logical: LogicalDataId, version: DataVersion) {
        self.entries.insert(logical, version);
    }

    pub fn increment(&mut self, logical: LogicalDataId) {
        if let Some(version) = self.entries.get_mut(&logical) {
            *version += 1;
        }
    }

    /// Folds `other` in, keeping the larger version where both sides hold
    /// an entry. Max is the write tie-break policy: ordering conflicting
    /// writes is the application's job, through the before-set.
    pub fn merge_max(&mut self, other: &VersionMap) {
        for (&logical, &version) in &other.entries {
            self.entries
                .entry(logical)
                .and_modify(|v| *v = (*v).max(version))
                .or_insert(version);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (LogicalDataId, DataVersion)> + '_ {
        self.entries.iter().map(|(&l, &v)| (l, v))
    }
}

/// The outcome of one resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Versioned,
    /// The parent or a before-set peer is not versioned yet; try again
    /// after the next sweep makes progress.
    Deferred,
}

/// Computes the input and output version maps of one job. Defers while
/// any context job is unversioned; fails with `UnresolvedVersion` when the
/// context is complete but a read or write id has no version, which means
/// no ancestor ever defined or produced that data.
pub fn resolve_job(jobs: &mut JobManager, id: JobId) -> ControllerResult<Resolution> {
    let entry = jobs.get(id)?;
    if entry.versioned {
        return Ok(Resolution::Versioned);
    }
    let parent_id = entry.parent;

    let mut vmap_in = match jobs.get(parent_id) {
        Ok(parent) if parent.versioned => parent.vmap_out.clone(),
        _ => {
            debug!("job {id} defers versioning: parent {parent_id} is not versioned");
            return Ok(Resolution::Deferred);
        }
    };

    let before_set = jobs.get(id)?.before_set.clone();
    for before_id in &before_set {
        match jobs.get(*before_id) {
            Ok(before) if before.versioned => vmap_in.merge_max(&before.vmap_out),
            _ => {
                debug!("job {id} defers versioning: predecessor {before_id} is not versioned");
                return Ok(Resolution::Deferred);
            }
        }
    }

    let entry = jobs.get(id)?;
    for logical in entry.union_set() {
        if !vmap_in.contains(logical) {
            return Err(ControllerError::UnresolvedVersion { job: id, logical });
        }
    }

    let mut vmap_out = vmap_in.clone();
    let write_set = entry.write_set.clone();
    for logical in &write_set {
        vmap_out.increment(*logical);
    }

    let entry = jobs.get_mut(id)?;
    entry.vmap_in = vmap_in;
    entry.vmap_out = vmap_out;
    entry.versioned = true;
    Ok(Resolution::Versioned)
}

/// Sweeps every unversioned job until a fixed point, returning how many
/// became versioned. Re-running on an already-versioned graph is the
/// identity.
pub fn resolve_all(jobs: &mut JobManager) -> ControllerResult<usize> {
    let mut total = 0;
    loop {
        let unversioned: Vec<JobId> = jobs
            .iter()
            .filter(|job| !job.versioned)
            .map(|job| job.id)
            .collect();
        let mut progressed = 0;
        for id in unversioned {
            if resolve_job(jobs, id)? == Resolution::Versioned {
                progressed += 1;
            }
        }
        if progressed == 0 {
            return Ok(total);
        }
        total += progressed;
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use nimbus_common::id::{IdSet, KERNEL_JOB_ID};

    use super::*;
    use crate::job_graph::{JobEntry, JobSpec};

    fn spawn(
        jobs: &mut JobManager,
        id: u64,
        read: &[u64],
        write: &[u64],
        before: &[u64],
    ) {
        jobs.add_job(JobEntry::from_spec(JobSpec {
            id: JobId(id),
            name: format!("job-{id}"),
            read_set: read.iter().map(|&l| LogicalDataId(l)).collect(),
            write_set: write.iter().map(|&l| LogicalDataId(l)).collect(),
            before_set: before.iter().map(|&b| JobId(b)).collect(),
            after_set: IdSet::new(),
            parent: KERNEL_JOB_ID,
            params: Bytes::new(),
            sterile: false,
            future_id: KERNEL_JOB_ID,
        }))
        .unwrap();
    }

    #[test]
    fn test_write_increments_output_only() {
        let mut jobs = JobManager::new();
        jobs.define_data(KERNEL_JOB_ID, LogicalDataId(1)).unwrap();
        spawn(&mut jobs, 1, &[], &[1], &[]);
        spawn(&mut jobs, 2, &[1], &[], &[1]);

        assert_eq!(resolve_all(&mut jobs).unwrap(), 2);
        let a = jobs.get(JobId(1)).unwrap();
        assert_eq!(a.vmap_in.get(LogicalDataId(1)), Some(0));
        assert_eq!(a.vmap_out.get(LogicalDataId(1)), Some(1));
        let b = jobs.get(JobId(2)).unwrap();
        assert_eq!(b.vmap_in.get(LogicalDataId(1)), Some(1));
        assert_eq!(b.vmap_out.get(LogicalDataId(1)), Some(1));
    }

    #[test]
    fn test_merge_takes_max_across_predecessors() {
        let mut jobs = JobManager::new();
        jobs.define_data(KERNEL_JOB_ID, LogicalDataId(1)).unwrap();
        // Two writers ordered by the application, then a reader of both.
        spawn(&mut jobs, 1, &[], &[1], &[]);
        spawn(&mut jobs, 2, &[], &[1], &[1]);
        spawn(&mut jobs, 3, &[1], &[], &[1, 2]);

        resolve_all(&mut jobs).unwrap();
        assert_eq!(jobs.get(JobId(3)).unwrap().vmap_in.get(LogicalDataId(1)), Some(2));
    }

    #[test]
    fn test_deferral_until_predecessor_versioned() {
        let mut jobs = JobManager::new();
        jobs.define_data(KERNEL_JOB_ID, LogicalDataId(1)).unwrap();
        // The reader arrives before its predecessor exists at all.
        spawn(&mut jobs, 2, &[1], &[], &[1]);
        assert_eq!(resolve_all(&mut jobs).unwrap(), 0);
        assert!(!jobs.get(JobId(2)).unwrap().versioned);
        assert!(jobs.jobs_ready_to_assign(10).is_empty());

        spawn(&mut jobs, 1, &[], &[1], &[]);
        assert_eq!(resolve_all(&mut jobs).unwrap(), 2);
        assert!(jobs.get(JobId(2)).unwrap().versioned);
    }

    #[test]
    fn test_unresolved_read_is_an_error() {
        let mut jobs = JobManager::new();
        spawn(&mut jobs, 1, &[42], &[], &[]);
        let err = resolve_all(&mut jobs);
        assert!(matches!(
            err,
            Err(ControllerError::UnresolvedVersion { job: JobId(1), .. })
        ));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut jobs = JobManager::new();
        jobs.define_data(KERNEL_JOB_ID, LogicalDataId(1)).unwrap();
        spawn(&mut jobs, 1, &[], &[1], &[]);
        resolve_all(&mut jobs).unwrap();
        let before: Vec<_> = jobs.iter().map(|j| (j.id, j.vmap_in.clone(), j.vmap_out.clone())).collect();
        assert_eq!(resolve_all(&mut jobs).unwrap(), 0);
        let after: Vec<_> = jobs.iter().map(|j| (j.id, j.vmap_in.clone(), j.vmap_out.clone())).collect();
        let sorted = |mut v: Vec<(JobId, VersionMap, VersionMap)>| {
            v.sort_by_key(|x| x.0);
            v
        };
        assert_eq!(sorted(before), sorted(after));
    }
}
