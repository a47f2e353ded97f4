//! Binding a ready job to a worker: pick the worker, make every logical
//! id in the job's read and write sets resident there at the right
//! version (creating instances and inserting copy jobs as needed), extend
//! the job's before-set with the data dependencies this introduces, and
//! emit the execute-compute command.
//!
//! Emitted commands are collected into an outbox of (worker, command)
//! pairs; the caller owns delivery. Per-worker emission order matters and
//! is preserved by the per-connection command stream.

use log::debug;
use nimbus_common::id::{IdSet, JobId, LogicalDataId, WorkerId, INIT_DATA_VERSION};
use nimbus_proto::command::{
    Command, CreateDataCommand, ExecuteComputeCommand, LocalCopyCommand, RemoteCopyReceiveCommand,
    RemoteCopySendCommand,
};

use crate::data_manager::PhysicalInstance;
use crate::error::{ControllerError, ControllerResult};
use crate::job_graph::{JobEntry, JobKind};
use crate::ldo_map::LogicalObject;
use crate::state::ControllerState;
use crate::version::{self, Resolution};

pub type CommandOutbox = Vec<(WorkerId, Command)>;

/// Assigns one ready job end to end. Fails only on controller bugs or
/// lost versions; every failure is fatal to the session.
pub fn assign_job(
    state: &mut ControllerState,
    job_id: JobId,
    out: &mut CommandOutbox,
) -> ControllerResult<()> {
    if version::resolve_job(&mut state.job_manager, job_id)? != Resolution::Versioned {
        return Err(ControllerError::Internal(format!(
            "job {job_id} reached assignment without being versioned"
        )));
    }

    let union = state.job_manager.get(job_id)?.union_set();
    let worker_id = select_worker(state, &union)?;

    for logical in union {
        prepare_data_at_worker(state, job_id, worker_id, logical, out)?;
    }

    let entry = state.job_manager.get(job_id)?;
    let mut before_set = entry.before_set.clone();
    state.job_manager.prune_before_set(&mut before_set);

    let entry = state.job_manager.get_mut(job_id)?;
    entry.before_set = before_set.clone();
    entry.assigned = true;
    entry.assigned_worker = Some(worker_id);

    if entry.kind == JobKind::Compute {
        let command = compute_command(entry, before_set);
        debug!("sending compute job {job_id} to worker {worker_id}");
        out.push((worker_id, command));
    }
    Ok(())
}

fn compute_command(entry: &JobEntry, before_set: IdSet<JobId>) -> Command {
    let physical = |set: &IdSet<LogicalDataId>| {
        set.iter()
            .filter_map(|l| entry.physical_map.get(l).copied())
            .collect()
    };
    Command::ExecuteCompute(ExecuteComputeCommand {
        job_id: entry.id,
        name: entry.name.clone(),
        read_set: physical(&entry.read_set),
        write_set: physical(&entry.write_set),
        before_set,
        after_set: entry.after_set.clone(),
        future_id: entry.future_id,
        sterile: entry.sterile,
        params: entry.params.clone(),
    })
}

fn select_worker(
    state: &ControllerState,
    union: &IdSet<LogicalDataId>,
) -> ControllerResult<WorkerId> {
    let mut regions = Vec::with_capacity(union.len());
    for logical in union {
        regions.push(state.ldo_map.find_by_id(*logical)?.region);
    }
    state
        .selector
        .select(&regions)
        .ok_or_else(|| ControllerError::Internal("no active workers to assign to".to_string()))
}

/// Ensures an instance of the version `job` needs for `logical` exists at
/// `worker` and is allocated to the job, following the first matching
/// clause of the placement table.
fn prepare_data_at_worker(
    state: &mut ControllerState,
    job_id: JobId,
    worker: WorkerId,
    logical: LogicalDataId,
    out: &mut CommandOutbox,
) -> ControllerResult<()> {
    let entry = state.job_manager.get(job_id)?;
    let reading = entry.read_set.contains(&logical);
    let writing = entry.write_set.contains(&logical);
    let version = entry.vmap_in.get(logical);
    let ldo = state.ldo_map.find_by_id(logical)?.clone();

    if !reading {
        let target = free_instance_at_worker(state, worker, &ldo, out)?;
        return allocate_instance(state, job_id, &ldo, target);
    }

    let version = version.ok_or(ControllerError::UnresolvedVersion {
        job: job_id,
        logical,
    })?;
    // Does any other unassigned job still pin this exact version?
    let needed_by = state.job_manager.jobs_need_version(logical, version);
    let writing_needed_version = writing && needed_by.len() > 1;

    let at_worker = state
        .data_manager
        .instances_by_worker_and_version(logical, worker, version);

    if at_worker.len() > 1 {
        let reusable = at_worker
            .iter()
            .find(|i| {
                !state
                    .job_manager
                    .causing_unwanted_serialization(job_id, logical, i)
            })
            .cloned();
        let target = match reusable {
            Some(instance) => instance,
            None => {
                debug!("avoiding unwanted serialization for logical id {logical}");
                let target = free_instance_at_worker(state, worker, &ldo, out)?;
                let (_, target) = local_copy(state, worker, &ldo, at_worker[0].clone(), target, out)?;
                target
            }
        };
        return allocate_instance(state, job_id, &ldo, target);
    }

    if at_worker.len() == 1 && !writing_needed_version {
        let current = at_worker[0].clone();
        let target = if !state
            .job_manager
            .causing_unwanted_serialization(job_id, logical, &current)
        {
            current
        } else {
            debug!("avoiding unwanted serialization for logical id {logical}");
            let target = free_instance_at_worker(state, worker, &ldo, out)?;
            let (_, target) = local_copy(state, worker, &ldo, current, target, out)?;
            target
        };
        return allocate_instance(state, job_id, &ldo, target);
    }

    if at_worker.len() == 1 && writing_needed_version {
        let current = at_worker[0].clone();
        let target = if !state
            .job_manager
            .causing_unwanted_serialization(job_id, logical, &current)
        {
            // Back up the version other jobs still need, then let the
            // writer consume the original in place.
            let backup = free_instance_at_worker(state, worker, &ldo, out)?;
            let (current, _) = local_copy(state, worker, &ldo, current, backup, out)?;
            current
        } else {
            debug!("avoiding unwanted serialization for logical id {logical}");
            let target = free_instance_at_worker(state, worker, &ldo, out)?;
            let (_, target) = local_copy(state, worker, &ldo, current, target, out)?;
            target
        };
        return allocate_instance(state, job_id, &ldo, target);
    }

    if at_worker.is_empty() && version == INIT_DATA_VERSION {
        let created = create_data_at_worker(state, worker, &ldo, out)?;
        return allocate_instance(state, job_id, &ldo, created);
    }

    let in_system = state.data_manager.instances_by_version(logical, version);
    if let Some(from) = in_system.first().cloned() {
        let target = free_instance_at_worker(state, worker, &ldo, out)?;
        let (_, target) = remote_copy(state, &ldo, from, target, out)?;
        return allocate_instance(state, job_id, &ldo, target);
    }

    Err(ControllerError::UnreachableVersion {
        job: job_id,
        logical,
        version,
    })
}

/// Binds `instance` to the job: updates the reader/writer relations on
/// the physical table and pulls the instance's previous users into the
/// job's before-set so the write never overtakes outstanding reads.
fn allocate_instance(
    state: &mut ControllerState,
    job_id: JobId,
    ldo: &LogicalObject,
    instance: PhysicalInstance,
) -> ControllerResult<()> {
    let entry = state.job_manager.get(job_id)?;
    let mut updated = instance.clone();
    let mut promoted: IdSet<JobId> = IdSet::new();

    if entry.write_set.contains(&ldo.id) {
        let version = entry.vmap_out.get(ldo.id).ok_or(ControllerError::UnresolvedVersion {
            job: job_id,
            logical: ldo.id,
        })?;
        updated.version = version;
        updated.last_writer = job_id;
        updated.readers.clear();
        promoted.extend(instance.readers.iter().copied());
        promoted.insert(instance.last_writer);
    }

    if entry.read_set.contains(&ldo.id) {
        let version = entry.vmap_in.get(ldo.id).ok_or(ControllerError::UnresolvedVersion {
            job: job_id,
            logical: ldo.id,
        })?;
        if version != instance.version {
            return Err(ControllerError::Internal(format!(
                "job {job_id} expects version {version} of logical id {} but instance {} holds {}",
                ldo.id, instance.id, instance.version
            )));
        }
        updated.readers.insert(job_id);
        promoted.insert(instance.last_writer);
    }

    let entry = state.job_manager.get_mut(job_id)?;
    entry.physical_map.insert(ldo.id, instance.id);
    entry.before_set.extend(promoted);
    entry.before_set.remove(&job_id);

    state.data_manager.update_instance(ldo.id, &instance, updated)
}

/// An instance at the worker free to be overwritten: one holding a
/// version no unassigned job still requires, or failing that a brand-new
/// instance via create-data.
fn free_instance_at_worker(
    state: &mut ControllerState,
    worker: WorkerId,
    ldo: &LogicalObject,
    out: &mut CommandOutbox,
) -> ControllerResult<PhysicalInstance> {
    let obsolete = state
        .data_manager
        .instances_by_worker(ldo.id, worker)
        .into_iter()
        .find(|i| state.job_manager.jobs_need_version(ldo.id, i.version).is_empty());
    match obsolete {
        Some(instance) => Ok(instance),
        None => create_data_at_worker(state, worker, ldo, out),
    }
}

fn create_data_at_worker(
    state: &mut ControllerState,
    worker: WorkerId,
    ldo: &LogicalObject,
    out: &mut CommandOutbox,
) -> ControllerResult<PhysicalInstance> {
    let job_id = state.id_maker.new_job_ids(1)?[0];
    let physical_id = state.id_maker.new_physical_ids(1)?[0];

    state
        .job_manager
        .add_job(JobEntry::synthesized(job_id, JobKind::CreateData, worker))?;

    let instance = PhysicalInstance::created(physical_id, worker, job_id);
    state.data_manager.add_instance(ldo.id, instance.clone());

    out.push((
        worker,
        Command::CreateData(CreateDataCommand {
            job_id,
            variable: ldo.variable.clone(),
            logical_id: ldo.id,
            physical_id,
            before_set: IdSet::new(),
        }),
    ));
    Ok(instance)
}

/// Copies `from` into `to` on one worker. Returns the updated snapshots
/// of both instances.
fn local_copy(
    state: &mut ControllerState,
    worker: WorkerId,
    ldo: &LogicalObject,
    from: PhysicalInstance,
    to: PhysicalInstance,
    out: &mut CommandOutbox,
) -> ControllerResult<(PhysicalInstance, PhysicalInstance)> {
    let job_id = state.id_maker.new_job_ids(1)?[0];
    state
        .job_manager
        .add_job(JobEntry::synthesized(job_id, JobKind::LocalCopy, worker))?;

    let mut from_new = from.clone();
    from_new.readers.insert(job_id);
    state.data_manager.update_instance(ldo.id, &from, from_new.clone())?;

    let mut to_new = to.clone();
    to_new.version = from.version;
    to_new.last_writer = job_id;
    to_new.readers.clear();
    state.data_manager.update_instance(ldo.id, &to, to_new.clone())?;

    let mut before_set: IdSet<JobId> = to.readers.clone();
    before_set.insert(to.last_writer);
    before_set.insert(from.last_writer);
    state.job_manager.prune_before_set(&mut before_set);

    out.push((
        worker,
        Command::LocalCopy(LocalCopyCommand {
            job_id,
            from_physical_id: from.id,
            to_physical_id: to.id,
            before_set,
        }),
    ));
    Ok((from_new, to_new))
}

/// Moves a version across workers with a paired send and receive. The
/// receive carries the destination instance's old users in its before-set
/// and the send carries the source's writer, so the transfer serializes
/// correctly without any cross-worker command ordering.
fn remote_copy(
    state: &mut ControllerState,
    ldo: &LogicalObject,
    from: PhysicalInstance,
    to: PhysicalInstance,
    out: &mut CommandOutbox,
) -> ControllerResult<(PhysicalInstance, PhysicalInstance)> {
    let ids = state.id_maker.new_job_ids(2)?;
    let (receive_id, send_id) = (ids[0], ids[1]);
    let (to_ip, to_port) = state.worker(to.worker)?.data_endpoint()?;

    state.job_manager.add_job(JobEntry::synthesized(
        receive_id,
        JobKind::RemoteCopyReceive,
        to.worker,
    ))?;
    state.job_manager.add_job(JobEntry::synthesized(
        send_id,
        JobKind::RemoteCopySend,
        from.worker,
    ))?;

    let mut to_new = to.clone();
    to_new.version = from.version;
    to_new.last_writer = receive_id;
    to_new.readers.clear();
    state.data_manager.update_instance(ldo.id, &to, to_new.clone())?;

    let mut receive_before: IdSet<JobId> = to.readers.clone();
    receive_before.insert(to.last_writer);
    state.job_manager.prune_before_set(&mut receive_before);
    out.push((
        to.worker,
        Command::RemoteCopyReceive(RemoteCopyReceiveCommand {
            job_id: receive_id,
            to_physical_id: to.id,
            before_set: receive_before,
        }),
    ));

    let mut from_new = from.clone();
    from_new.readers.insert(send_id);
    state.data_manager.update_instance(ldo.id, &from, from_new.clone())?;

    let mut send_before: IdSet<JobId> = IdSet::from([from.last_writer]);
    state.job_manager.prune_before_set(&mut send_before);
    out.push((
        from.worker,
        Command::RemoteCopySend(RemoteCopySendCommand {
            job_id: send_id,
            receive_job_id: receive_id,
            from_physical_id: from.id,
            to_worker_id: to.worker,
            to_ip,
            to_port,
            before_set: send_before,
        }),
    ));

    Ok((from_new, to_new))
}

#[cfg(test)]
mod tests;
