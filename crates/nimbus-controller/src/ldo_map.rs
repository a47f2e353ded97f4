//! The catalog of logical data objects: id, variable name, owning
//! partition, and the partition's region, with region-predicate queries.

use std::collections::HashMap;

use nimbus_common::geometry::GeometricRegion;
use nimbus_common::id::{LogicalDataId, PartitionId};

use crate::error::{ControllerError, ControllerResult};

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalObject {
    pub id: LogicalDataId,
    pub variable: String,
    pub partition: PartitionId,
    pub region: GeometricRegion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionQuery {
    /// Objects entirely inside the query region.
    Covered,
    /// Objects touching the query region, shared boundaries included.
    Adjacent,
    /// Objects sharing interior volume with the query region.
    Intersecting,
}

#[derive(Debug, Default)]
pub struct LogicalDataMap {
    objects: HashMap<LogicalDataId, LogicalObject>,
    partitions: HashMap<PartitionId, GeometricRegion>,
}

impl LogicalDataMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_partition(
        &mut self,
        partition: PartitionId,
        region: GeometricRegion,
    ) -> ControllerResult<()> {
        self.partitions.insert(partition, region);
        Ok(())
    }

    pub fn remove_partition(&mut self, partition: PartitionId) -> ControllerResult<()> {
        self.partitions
            .remove(&partition)
            .map(|_| ())
            .ok_or(ControllerError::UnknownPartition(partition))
    }

    pub fn partition_region(&self, partition: PartitionId) -> ControllerResult<GeometricRegion> {
        self.partitions
            .get(&partition)
            .copied()
            .ok_or(ControllerError::UnknownPartition(partition))
    }

    /// Registers a logical object under an already-registered partition.
    /// Redefining an id is an application error.
    pub fn add_logical(
        &mut self,
        id: LogicalDataId,
        variable: impl Into<String>,
        partition: PartitionId,
    ) -> ControllerResult<()> {
        if self.objects.contains_key(&id) {
            return Err(ControllerError::DuplicateLdo(id));
        }
        let region = self.partition_region(partition)?;
        self.objects.insert(
            id,
            LogicalObject {
                id,
                variable: variable.into(),
                partition,
                region,
            },
        );
        Ok(())
    }

    pub fn remove_logical(&mut self, id: LogicalDataId) -> ControllerResult<()> {
        self.objects
            .remove(&id)
            .map(|_| ())
            .ok_or(ControllerError::UnknownLdo(id))
    }

    pub fn find_by_id(&self, id: LogicalDataId) -> ControllerResult<&LogicalObject> {
        self.objects.get(&id).ok_or(ControllerError::UnknownLdo(id))
    }

    pub fn find_by_region(
        &self,
        variable: &str,
        region: &GeometricRegion,
        query: RegionQuery,
    ) -> Vec<&LogicalObject> {
        let mut found: Vec<&LogicalObject> = self
            .objects
            .values()
            .filter(|ldo| ldo.variable == variable)
            .filter(|ldo| match query {
                RegionQuery::Covered => region.covers(&ldo.region),
                RegionQuery::Adjacent => region.adjacent_or_intersects(&ldo.region),
                RegionQuery::Intersecting => region.intersects(&ldo.region),
            })
            .collect();
        found.sort_by_key(|ldo| ldo.id);
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with_two_tiles() -> LogicalDataMap {
        let mut map = LogicalDataMap::new();
        map.add_partition(PartitionId(1), GeometricRegion::new(0, 0, 0, 10, 10, 10))
            .unwrap();
        map.add_partition(PartitionId(2), GeometricRegion::new(10, 0, 0, 10, 10, 10))
            .unwrap();
        map.add_logical(LogicalDataId(1), "phi", PartitionId(1)).unwrap();
        map.add_logical(LogicalDataId(2), "phi", PartitionId(2)).unwrap();
        map.add_logical(LogicalDataId(3), "velocity", PartitionId(1))
            .unwrap();
        map
    }

    #[test]
    fn test_redefinition_is_an_error() {
        let mut map = map_with_two_tiles();
        let err = map.add_logical(LogicalDataId(1), "phi", PartitionId(1));
        assert!(matches!(err, Err(ControllerError::DuplicateLdo(_))));
    }

    #[test]
    fn test_unknown_partition_is_an_error() {
        let mut map = map_with_two_tiles();
        let err = map.add_logical(LogicalDataId(9), "phi", PartitionId(9));
        assert!(matches!(err, Err(ControllerError::UnknownPartition(_))));
    }

    #[test]
    fn test_find_by_region_filters_variable_and_predicate() {
        let map = map_with_two_tiles();
        let query = GeometricRegion::new(0, 0, 0, 10, 10, 10);
        let covered = map.find_by_region("phi", &query, RegionQuery::Covered);
        assert_eq!(
            covered.iter().map(|l| l.id).collect::<Vec<_>>(),
            vec![LogicalDataId(1)]
        );
        let adjacent = map.find_by_region("phi", &query, RegionQuery::Adjacent);
        assert_eq!(adjacent.len(), 2);
        let intersecting = map.find_by_region("velocity", &query, RegionQuery::Intersecting);
        assert_eq!(
            intersecting.iter().map(|l| l.id).collect::<Vec<_>>(),
            vec![LogicalDataId(3)]
        );
    }
}
