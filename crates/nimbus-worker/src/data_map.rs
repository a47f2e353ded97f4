//! The worker-resident physical data map. Each instance is a byte buffer
//! plus a version stamp; the execution pool acquires instances in the
//! access mode a job declared and releases them on completion. Exclusivity
//! violations mean the controller scheduled conflicting jobs, which is a
//! bug, not a condition to wait out.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use nimbus_common::id::{DataVersion, JobId, PhysicalDataId, INIT_DATA_VERSION};

use crate::error::{WorkerError, WorkerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// First write by the create-data job; brings the instance into being.
    Init,
    /// Shared with other readers.
    Read,
    /// Exclusive.
    Write,
    /// Exclusive temporary storage.
    Scratch,
    /// Shared with other reducers, exclusive against readers and writers.
    Reduce,
}

#[derive(Debug, Default)]
pub struct DataBuffer {
    pub bytes: Vec<u8>,
    pub version: DataVersion,
}

/// A handle to an acquired instance. The buffer lock is per instance and
/// held only inside [`DataHandle::with`]; the scheduler's before-sets are
/// what actually keep conflicting jobs apart.
#[derive(Debug, Clone)]
pub struct DataHandle {
    pub physical_id: PhysicalDataId,
    pub access: Access,
    buffer: Arc<Mutex<DataBuffer>>,
}

impl DataHandle {
    pub fn with<R>(&self, f: impl FnOnce(&mut DataBuffer) -> R) -> R {
        let mut buffer = self.buffer.lock().expect("data buffer lock");
        f(&mut buffer)
    }
}

#[derive(Debug, Default)]
struct DataEntry {
    buffer: Arc<Mutex<DataBuffer>>,
    readers: HashSet<JobId>,
    reducers: HashSet<JobId>,
    writer: Option<JobId>,
}

#[derive(Debug, Default)]
pub struct PhysicalDataMap {
    entries: HashMap<PhysicalDataId, DataEntry>,
}

impl PhysicalDataMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, physical: PhysicalDataId) -> bool {
        self.entries.contains_key(&physical)
    }

    pub fn acquire(
        &mut self,
        physical: PhysicalDataId,
        job: JobId,
        access: Access,
    ) -> WorkerResult<DataHandle> {
        if access == Access::Init {
            let entry = self.entries.entry(physical).or_default();
            if entry.writer.is_some() || !entry.readers.is_empty() || !entry.reducers.is_empty() {
                return Err(WorkerError::AccessConflict { job, physical });
            }
            entry.writer = Some(job);
            entry
                .buffer
                .lock()
                .expect("data buffer lock")
                .version = INIT_DATA_VERSION;
            return Ok(DataHandle {
                physical_id: physical,
                access,
                buffer: entry.buffer.clone(),
            });
        }

        let entry = self
            .entries
            .get_mut(&physical)
            .ok_or(WorkerError::UnknownPhysical(physical))?;
        let conflict = match access {
            Access::Init => unreachable!(),
            Access::Read => entry.writer.is_some() || !entry.reducers.is_empty(),
            Access::Write | Access::Scratch => {
                entry.writer.is_some() || !entry.readers.is_empty() || !entry.reducers.is_empty()
            }
            Access::Reduce => entry.writer.is_some() || !entry.readers.is_empty(),
        };
        if conflict {
            return Err(WorkerError::AccessConflict { job, physical });
        }
        match access {
            Access::Read => {
                entry.readers.insert(job);
            }
            Access::Reduce => {
                entry.reducers.insert(job);
            }
            Access::Write | Access::Scratch => entry.writer = Some(job),
            Access::Init => unreachable!(),
        }
        Ok(DataHandle {
            physical_id: physical,
            access,
            buffer: entry.buffer.clone(),
        })
    }

    /// Drops every acquisition `job` holds.
    pub fn release(&mut self, job: JobId) {
        for entry in self.entries.values_mut() {
            entry.readers.remove(&job);
            entry.reducers.remove(&job);
            if entry.writer == Some(job) {
                entry.writer = None;
            }
        }
    }
}
