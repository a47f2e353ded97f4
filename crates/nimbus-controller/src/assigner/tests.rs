use bytes::Bytes;
use nimbus_common::geometry::GeometricRegion;
use nimbus_common::id::{IdSet, JobId, LogicalDataId, PartitionId, WorkerId, KERNEL_JOB_ID};
use nimbus_proto::command::Command;

use super::*;
use crate::job_graph::JobSpec;

fn state_with_workers(count: usize) -> ControllerState {
    let mut state = ControllerState::new(GeometricRegion::new(0, 0, 0, 100, 100, 100));
    for i in 0..count {
        let id = state.register_worker().unwrap();
        state
            .activate_worker(id, "127.0.0.1".to_string(), 7000 + i as u16)
            .unwrap();
    }
    state
}

fn define(state: &mut ControllerState, logical: u64, region: GeometricRegion) {
    let partition = PartitionId(logical);
    state.ldo_map.add_partition(partition, region).unwrap();
    state
        .ldo_map
        .add_logical(LogicalDataId(logical), format!("d{logical}"), partition)
        .unwrap();
    state
        .job_manager
        .define_data(KERNEL_JOB_ID, LogicalDataId(logical))
        .unwrap();
}

fn spawn(state: &mut ControllerState, id: u64, read: &[u64], write: &[u64], before: &[u64]) {
    state
        .spawn_job(JobSpec {
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
        })
        .unwrap();
}

fn assign_ready(state: &mut ControllerState) -> CommandOutbox {
    let mut out = CommandOutbox::new();
    let ready = state.jobs_ready_to_assign(64).unwrap();
    for job_id in ready {
        assign_job(state, job_id, &mut out).unwrap();
    }
    out
}

fn command_names(out: &CommandOutbox, worker: WorkerId) -> Vec<&'static str> {
    out.iter()
        .filter(|(w, _)| *w == worker)
        .map(|(_, c)| c.name())
        .collect()
}

/// Single worker, read-after-write: create the data once, no copies.
#[test]
fn test_read_after_write_on_one_worker() {
    let mut state = state_with_workers(1);
    define(&mut state, 1, GeometricRegion::new(0, 0, 0, 10, 10, 10));
    spawn(&mut state, 1, &[], &[1], &[]);
    spawn(&mut state, 2, &[1], &[], &[1]);

    let out = assign_ready(&mut state);
    assert_eq!(
        command_names(&out, WorkerId(1)),
        vec!["create-data", "execute-compute"]
    );

    let a = state.job_manager.get(JobId(1)).unwrap();
    assert_eq!(a.vmap_in.get(LogicalDataId(1)), Some(0));
    assert_eq!(a.vmap_out.get(LogicalDataId(1)), Some(1));

    state.job_manager.mark_done(JobId(1));
    let out = assign_ready(&mut state);
    assert_eq!(command_names(&out, WorkerId(1)), vec!["execute-compute"]);

    let b = state.job_manager.get(JobId(2)).unwrap();
    assert_eq!(b.vmap_in.get(LogicalDataId(1)), Some(1));
    assert_eq!(b.vmap_out.get(LogicalDataId(1)), Some(1));

    // Both jobs use the one instance; the reader reuses the writer's copy.
    assert_eq!(
        state.job_manager.get(JobId(1)).unwrap().physical_map[&LogicalDataId(1)],
        b.physical_map[&LogicalDataId(1)]
    );
    let instances = state.data_manager.instances(LogicalDataId(1));
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].version, 1);
}

/// Two workers: the reader lands remotely and the version moves with a
/// paired send and receive referencing a fresh instance at the
/// destination.
#[test]
fn test_remote_copy_between_workers() {
    let mut state = state_with_workers(2);
    // Worker 1 owns low y, worker 2 high y.
    define(&mut state, 1, GeometricRegion::new(0, 0, 0, 10, 10, 10));
    define(&mut state, 2, GeometricRegion::new(0, 90, 0, 10, 10, 10));
    define(&mut state, 3, GeometricRegion::new(0, 80, 0, 10, 10, 10));

    spawn(&mut state, 1, &[], &[1], &[]);
    spawn(&mut state, 2, &[1], &[2, 3], &[1]);

    let out = assign_ready(&mut state);
    assert_eq!(
        command_names(&out, WorkerId(1)),
        vec!["create-data", "execute-compute"]
    );
    assert!(command_names(&out, WorkerId(2)).is_empty());

    state.job_manager.mark_done(JobId(1));
    let out = assign_ready(&mut state);
    assert_eq!(command_names(&out, WorkerId(1)), vec!["remote-copy-send"]);
    assert_eq!(
        command_names(&out, WorkerId(2)),
        vec![
            "create-data",
            "remote-copy-receive",
            "create-data",
            "create-data",
            "execute-compute",
        ]
    );

    let (send, receive) = {
        let mut send = None;
        let mut receive = None;
        for (_, command) in &out {
            match command {
                Command::RemoteCopySend(c) => send = Some(c.clone()),
                Command::RemoteCopyReceive(c) => receive = Some(c.clone()),
                _ => {}
            }
        }
        (send.unwrap(), receive.unwrap())
    };
    assert_eq!(send.receive_job_id, receive.job_id);
    assert_eq!(send.to_worker_id, WorkerId(2));
    assert_eq!(send.to_port, 7001);
    // The receive waits for the instance creation it writes into.
    assert!(!receive.before_set.is_empty());

    // The reader's before-set gained the receive job, so the compute
    // cannot run before the data has landed.
    let b = state.job_manager.get(JobId(2)).unwrap();
    assert!(b.before_set.contains(&receive.job_id));
}

/// A writer must not overwrite a version other pending jobs still need:
/// it gets a fresh instance while the readers keep the original.
#[test]
fn test_write_while_readers_pending_takes_fresh_instance() {
    let mut state = state_with_workers(1);
    define(&mut state, 1, GeometricRegion::new(0, 0, 0, 10, 10, 10));
    spawn(&mut state, 1, &[], &[1], &[]);

    let out = assign_ready(&mut state);
    assert_eq!(
        command_names(&out, WorkerId(1)),
        vec!["create-data", "execute-compute"]
    );
    state.job_manager.mark_done(JobId(1));

    spawn(&mut state, 2, &[1], &[], &[1]);
    spawn(&mut state, 3, &[1], &[], &[1]);
    spawn(&mut state, 4, &[], &[1], &[2, 3]);

    let out = assign_ready(&mut state);
    assert_eq!(
        command_names(&out, WorkerId(1)),
        vec!["execute-compute", "execute-compute"]
    );
    let original = state.job_manager.get(JobId(2)).unwrap().physical_map[&LogicalDataId(1)];
    assert_eq!(
        state.job_manager.get(JobId(3)).unwrap().physical_map[&LogicalDataId(1)],
        original
    );

    // Readers were added to the instance without disturbing anything else.
    let instance = state
        .data_manager
        .instances(LogicalDataId(1))
        .iter()
        .find(|i| i.id == original)
        .cloned()
        .unwrap();
    assert_eq!(instance.version, 1);
    assert_eq!(instance.last_writer, JobId(1));
    assert_eq!(instance.readers, [JobId(2), JobId(3)].into());

    state.job_manager.mark_done(JobId(2));
    state.job_manager.mark_done(JobId(3));
    let out = assign_ready(&mut state);
    assert_eq!(
        command_names(&out, WorkerId(1)),
        vec!["create-data", "execute-compute"]
    );

    // The writer got a fresh instance, preserving the readers' version.
    let writer = state.job_manager.get(JobId(4)).unwrap();
    assert!(writer.assigned);
    assert_ne!(writer.physical_map[&LogicalDataId(1)], original);
    let kept = state
        .data_manager
        .instances(LogicalDataId(1))
        .iter()
        .find(|i| i.id == original)
        .cloned()
        .unwrap();
    assert_eq!(kept.version, 1);
}

/// Reading a version that exists nowhere in the system is a lost-version
/// controller bug.
#[test]
fn test_lost_version_is_unreachable() {
    let mut state = state_with_workers(1);
    define(&mut state, 1, GeometricRegion::new(0, 0, 0, 10, 10, 10));
    spawn(&mut state, 1, &[], &[1], &[]);
    assign_ready(&mut state);
    state.job_manager.mark_done(JobId(1));

    // Corrupt the table: drop every instance of the logical id.
    let instances: Vec<_> = state.data_manager.instances(LogicalDataId(1)).to_vec();
    for instance in instances {
        let mut gone = instance.clone();
        gone.version = 999;
        state
            .data_manager
            .update_instance(LogicalDataId(1), &instance, gone)
            .unwrap();
    }

    spawn(&mut state, 2, &[1], &[], &[1]);
    let ready = state.jobs_ready_to_assign(64).unwrap();
    let mut out = CommandOutbox::new();
    let err = assign_job(&mut state, ready[0], &mut out);
    assert!(matches!(
        err,
        Err(ControllerError::UnreachableVersion { job: JobId(2), .. })
    ));
}

/// Backing up before an in-place overwrite: a reader-writer that shares
/// its version with other pending jobs copies the instance aside first.
#[test]
fn test_backup_before_overwrite_preserves_version() {
    let mut state = state_with_workers(1);
    define(&mut state, 1, GeometricRegion::new(0, 0, 0, 10, 10, 10));
    spawn(&mut state, 1, &[], &[1], &[]);
    assign_ready(&mut state);
    state.job_manager.mark_done(JobId(1));

    // Job 2 reads and writes version 1; job 3 reads the same version
    // independently, so overwriting it in place would lose it.
    spawn(&mut state, 2, &[1], &[1], &[1]);
    spawn(&mut state, 3, &[1], &[], &[1]);

    let out = assign_ready(&mut state);
    // The writer consumes the original in place after a backup local-copy
    // into a fresh instance; the second reader then uses the backup.
    assert_eq!(
        command_names(&out, WorkerId(1)),
        vec![
            "create-data",
            "local-copy",
            "execute-compute",
            "execute-compute",
        ]
    );
    let versions: Vec<_> = state
        .data_manager
        .instances(LogicalDataId(1))
        .iter()
        .map(|i| i.version)
        .collect();
    // One instance advanced to version 2, the backup still holds 1.
    assert!(versions.contains(&2));
    assert!(versions.contains(&1));
}
