use std::marker::PhantomData;

use crate::error::{CommonError, CommonResult};

pub trait IdValueType: Sized {
    fn first() -> Self;
    fn next(v: Self) -> CommonResult<Self>;
}

macro_rules! impl_integer_id_value_type {
    ($type:ty) => {
        impl IdValueType for $type {
            fn first() -> Self {
                1
            }

            fn next(v: Self) -> CommonResult<Self> {
                v.checked_add(1)
                    .ok_or_else(|| CommonError::ExhaustedId(stringify!($type).to_string()))
            }
        }
    };
}

impl_integer_id_value_type!(u32);
impl_integer_id_value_type!(u64);

pub trait IdType: Sized {
    type Value: IdValueType + From<Self> + Into<Self>;
}

macro_rules! define_id_type {
    ($name:ident, $value_type:ty) => {
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(pub $value_type);

        impl IdType for $name {
            type Value = $value_type;
        }

        impl From<$value_type> for $name {
            fn from(id: $value_type) -> Self {
                Self(id)
            }
        }

        impl From<$name> for $value_type {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id_type!(JobId, u64);
define_id_type!(LogicalDataId, u64);
define_id_type!(PhysicalDataId, u64);
define_id_type!(PartitionId, u64);
define_id_type!(WorkerId, u32);
define_id_type!(CheckpointId, u64);

/// A per-object version counter. Versions start at [`INIT_DATA_VERSION`]
/// and only ever grow.
pub type DataVersion = u64;

pub const INIT_DATA_VERSION: DataVersion = 0;

/// An ordered id set, so that wire encodings are deterministic.
pub type IdSet<T> = std::collections::BTreeSet<T>;

/// The synthetic root job every application job descends from.
pub const KERNEL_JOB_ID: JobId = JobId(0);

/// The worker-local control vertex that gates remote-copy-receive jobs
/// until their payload has arrived. Never a real job id.
pub const DUMB_JOB_ID: JobId = JobId(u64::MAX);

/// Controller-synthesized job ids carry the top bit, so either side of the
/// wire can classify an id without a table lookup.
const SCHEDULER_JOB_ID_BIT: u64 = 1 << 63;

impl JobId {
    pub fn is_scheduler_produced(self) -> bool {
        self.0 & SCHEDULER_JOB_ID_BIT != 0 && self != DUMB_JOB_ID
    }
}

#[derive(Debug)]
pub struct IdGenerator<T: IdType> {
    next_value: T::Value,
    phantom: PhantomData<T>,
}

impl<T: IdType> IdGenerator<T>
where
    T::Value: Copy,
{
    pub fn new() -> Self {
        Self {
            next_value: T::Value::first(),
            phantom: PhantomData,
        }
    }

    pub fn next(&mut self) -> CommonResult<T> {
        let value = self.next_value;
        self.next_value = T::Value::next(value)?;
        Ok(value.into())
    }
}

impl<T: IdType> Default for IdGenerator<T>
where
    T::Value: Copy,
{
    fn default() -> Self {
        Self::new()
    }
}

/// The identifier service. Job ids come in two disjoint spaces: ids the
/// controller synthesizes for the create/copy jobs it inserts, and ids the
/// application spawns compute jobs with. Logical and physical data ids
/// have a single space each.
#[derive(Debug, Default)]
pub struct IdMaker {
    scheduler_job_ids: IdGenerator<JobId>,
    application_job_ids: IdGenerator<JobId>,
    logical_ids: IdGenerator<LogicalDataId>,
    physical_ids: IdGenerator<PhysicalDataId>,
}

impl IdMaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh controller-synthesized job ids, tagged with the scheduler bit.
    pub fn new_job_ids(&mut self, count: usize) -> CommonResult<Vec<JobId>> {
        (0..count)
            .map(|_| {
                let id = self.scheduler_job_ids.next()?;
                let tagged = JobId(id.0 | SCHEDULER_JOB_ID_BIT);
                if tagged == DUMB_JOB_ID {
                    return Err(CommonError::ExhaustedId("scheduler job id".to_string()));
                }
                Ok(tagged)
            })
            .collect()
    }

    /// Fresh application job ids, never carrying the scheduler bit.
    pub fn new_application_job_ids(&mut self, count: usize) -> CommonResult<Vec<JobId>> {
        (0..count)
            .map(|_| {
                let id = self.application_job_ids.next()?;
                if id.0 & SCHEDULER_JOB_ID_BIT != 0 {
                    return Err(CommonError::ExhaustedId("application job id".to_string()));
                }
                Ok(id)
            })
            .collect()
    }

    pub fn new_logical_ids(&mut self, count: usize) -> CommonResult<Vec<LogicalDataId>> {
        (0..count).map(|_| self.logical_ids.next()).collect()
    }

    pub fn new_physical_ids(&mut self, count: usize) -> CommonResult<Vec<PhysicalDataId>> {
        (0..count).map(|_| self.physical_ids.next()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_spaces_are_disjoint() {
        let mut ids = IdMaker::new();
        let scheduler = ids.new_job_ids(3).unwrap();
        let application = ids.new_application_job_ids(3).unwrap();
        for id in &scheduler {
            assert!(id.is_scheduler_produced());
        }
        for id in &application {
            assert!(!id.is_scheduler_produced());
        }
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let mut ids = IdMaker::new();
        let a = ids.new_logical_ids(2).unwrap();
        let b = ids.new_logical_ids(1).unwrap();
        assert_eq!(a, vec![LogicalDataId(1), LogicalDataId(2)]);
        assert_eq!(b, vec![LogicalDataId(3)]);
    }

    #[test]
    fn test_sentinels_are_not_application_ids() {
        assert!(!KERNEL_JOB_ID.is_scheduler_produced());
        assert!(!DUMB_JOB_ID.is_scheduler_produced());
    }
}
