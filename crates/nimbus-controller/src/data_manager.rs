//! The controller's view of every physical instance in the system: which
//! worker holds it, at what version, who wrote it last, and who is
//! currently reading it. Instances are value types; an update replaces an
//! instance wholesale and fails when the caller's snapshot is stale.

use std::collections::HashMap;

use nimbus_common::id::{
    DataVersion, IdSet, JobId, LogicalDataId, PhysicalDataId, WorkerId, INIT_DATA_VERSION,
};

use crate::error::{ControllerError, ControllerResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalInstance {
    pub id: PhysicalDataId,
    pub worker: WorkerId,
    pub version: DataVersion,
    pub last_writer: JobId,
    pub readers: IdSet<JobId>,
}

impl PhysicalInstance {
    /// A freshly created instance: version zero, written and read by the
    /// creating job, so a subsequent writer serializes behind creation.
    pub fn created(id: PhysicalDataId, worker: WorkerId, creator: JobId) -> Self {
        Self {
            id,
            worker,
            version: INIT_DATA_VERSION,
            last_writer: creator,
            readers: IdSet::from([creator]),
        }
    }
}

#[derive(Debug, Default)]
pub struct DataManager {
    instances: HashMap<LogicalDataId, Vec<PhysicalInstance>>,
}

impl DataManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instance(&mut self, logical: LogicalDataId, instance: PhysicalInstance) {
        self.instances.entry(logical).or_default().push(instance);
    }

    pub fn instances(&self, logical: LogicalDataId) -> &[PhysicalInstance] {
        self.instances.get(&logical).map_or(&[], Vec::as_slice)
    }

    pub fn instances_by_worker(
        &self,
        logical: LogicalDataId,
        worker: WorkerId,
    ) -> Vec<PhysicalInstance> {
        self.instances(logical)
            .iter()
            .filter(|i| i.worker == worker)
            .cloned()
            .collect()
    }

    pub fn instances_by_worker_and_version(
        &self,
        logical: LogicalDataId,
        worker: WorkerId,
        version: DataVersion,
    ) -> Vec<PhysicalInstance> {
        self.instances(logical)
            .iter()
            .filter(|i| i.worker == worker && i.version == version)
            .cloned()
            .collect()
    }

    pub fn instances_by_version(
        &self,
        logical: LogicalDataId,
        version: DataVersion,
    ) -> Vec<PhysicalInstance> {
        self.instances(logical)
            .iter()
            .filter(|i| i.version == version)
            .cloned()
            .collect()
    }

    /// Replaces `old` with `new`. The caller's `old` snapshot must match
    /// the stored instance exactly; a concurrent conflicting update
    /// surfaces as [`ControllerError::StaleInstance`].
    pub fn update_instance(
        &mut self,
        logical: LogicalDataId,
        old: &PhysicalInstance,
        new: PhysicalInstance,
    ) -> ControllerResult<()> {
        let instances = self
            .instances
            .get_mut(&logical)
            .ok_or(ControllerError::UnknownLdo(logical))?;
        let slot = instances
            .iter_mut()
            .find(|i| **i == *old)
            .ok_or(ControllerError::StaleInstance(old.id))?;
        *slot = new;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queries_partition_by_worker_and_version() {
        let mut table = DataManager::new();
        let logical = LogicalDataId(1);
        table.add_instance(logical, PhysicalInstance::created(PhysicalDataId(1), WorkerId(1), JobId(9)));
        let mut second = PhysicalInstance::created(PhysicalDataId(2), WorkerId(2), JobId(9));
        second.version = 3;
        table.add_instance(logical, second);

        assert_eq!(table.instances_by_worker(logical, WorkerId(1)).len(), 1);
        assert_eq!(
            table
                .instances_by_worker_and_version(logical, WorkerId(2), 3)
                .len(),
            1
        );
        assert_eq!(table.instances_by_version(logical, 0).len(), 1);
        assert!(table
            .instances_by_worker_and_version(logical, WorkerId(1), 3)
            .is_empty());
    }

    #[test]
    fn test_update_instance_rejects_stale_snapshot() {
        let mut table = DataManager::new();
        let logical = LogicalDataId(1);
        let instance = PhysicalInstance::created(PhysicalDataId(1), WorkerId(1), JobId(9));
        table.add_instance(logical, instance.clone());

        let mut updated = instance.clone();
        updated.version = 1;
        table.update_instance(logical, &instance, updated).unwrap();

        // The first snapshot no longer matches the stored instance.
        let mut conflicting = instance.clone();
        conflicting.version = 2;
        let err = table.update_instance(logical, &instance, conflicting);
        assert!(matches!(err, Err(ControllerError::StaleInstance(_))));
    }
}
