use bytes::Bytes;
use nimbus_common::id::PhysicalDataId;

use super::*;
use crate::job::{ComputeJob, LocalCopyJob, MegaReceiveJob, RemoteCopyReceiveJob};

const SCHED: u64 = 1 << 63;

fn compute(name: &str) -> WorkerJob {
    WorkerJob::Compute(ComputeJob {
        name: name.to_string(),
        read_set: IdSet::new(),
        write_set: IdSet::new(),
        scratch_set: IdSet::new(),
        reduce_set: IdSet::new(),
        params: Bytes::new(),
        sterile: false,
        future_id: JobId(0),
    })
}

fn receive(to: u64) -> WorkerJob {
    WorkerJob::RemoteCopyReceive(RemoteCopyReceiveJob {
        to: PhysicalDataId(to),
        payload: None,
    })
}

fn mega(receives: &[(u64, u64)]) -> WorkerJob {
    WorkerJob::MegaReceive(MegaReceiveJob {
        receives: receives
            .iter()
            .map(|&(r, p)| (JobId(r), PhysicalDataId(p)))
            .collect(),
        payloads: HashMap::new(),
    })
}

fn frame(receive_id: u64, mega_id: Option<u64>, payload: &'static [u8]) -> DataFrame {
    DataFrame {
        receive_job_id: JobId(receive_id),
        mega_receive_job_id: mega_id.map(JobId),
        version: 1,
        template_generation_id: 0,
        payload: Bytes::from_static(payload),
    }
}

fn ids(ready: &[ReadyJob]) -> Vec<JobId> {
    ready.iter().map(|r| r.job_id).collect()
}

#[test]
fn test_jobs_release_in_dependency_order() {
    let mut graph = WorkerJobGraph::new(16);
    let ready = graph
        .add_job(JobId(1), &IdSet::new(), compute("a"))
        .unwrap();
    assert_eq!(ids(&ready), vec![JobId(1)]);
    graph.mark_running(JobId(1));

    let ready = graph
        .add_job(JobId(2), &[JobId(1)].into(), compute("b"))
        .unwrap();
    assert!(ready.is_empty());
    assert_eq!(graph.state(JobId(2)), Some(VertexState::Blocked));

    let ready = graph.job_finished(JobId(1));
    assert_eq!(ids(&ready), vec![JobId(2)]);
}

#[test]
fn test_unknown_application_predecessor_leaves_placeholder() {
    let mut graph = WorkerJobGraph::new(16);
    // Job 7 ran on another worker; its command never reaches us.
    let ready = graph
        .add_job(JobId(2), &[JobId(7)].into(), compute("b"))
        .unwrap();
    assert!(ready.is_empty());
    assert_eq!(graph.state(JobId(7)), Some(VertexState::Pending));

    let ready = graph.controller_job_done(JobId(7));
    assert_eq!(ids(&ready), vec![JobId(2)]);
}

#[test]
fn test_unknown_copy_predecessor_is_already_done() {
    let mut graph = WorkerJobGraph::new(16);
    // A copy job id we have never seen must not block the newcomer.
    let ready = graph
        .add_job(JobId(2), &[JobId(SCHED | 9)].into(), compute("b"))
        .unwrap();
    assert_eq!(ids(&ready), vec![JobId(2)]);
}

#[test]
fn test_finish_hint_prevents_stale_edges() {
    let mut graph = WorkerJobGraph::new(16);
    graph.add_job(JobId(1), &IdSet::new(), compute("a")).unwrap();
    graph.mark_running(JobId(1));
    graph.job_finished(JobId(1));

    // Job 1 is gone from the graph, but the hint remembers it finished.
    let ready = graph
        .add_job(JobId(2), &[JobId(1)].into(), compute("b"))
        .unwrap();
    assert_eq!(ids(&ready), vec![JobId(2)]);
}

#[test]
fn test_receive_waits_for_both_command_and_data() {
    let mut graph = WorkerJobGraph::new(16);
    let receive_id = JobId(SCHED | 1);
    let ready = graph
        .add_job(receive_id, &IdSet::new(), receive(10))
        .unwrap();
    // Gated by the control vertex until the payload arrives.
    assert!(ready.is_empty());
    assert_eq!(graph.state(receive_id), Some(VertexState::Blocked));

    let ready = graph.data_received(frame(SCHED | 1, None, b"phi")).unwrap();
    assert_eq!(ids(&ready), vec![receive_id]);
    match &ready[0].job {
        WorkerJob::RemoteCopyReceive(job) => {
            assert_eq!(job.payload.as_ref().unwrap().bytes, Bytes::from_static(b"phi"));
        }
        other => panic!("unexpected job {other:?}"),
    }
}

#[test]
fn test_data_before_command_creates_placeholder() {
    let mut graph = WorkerJobGraph::new(16);
    let receive_id = JobId(SCHED | 1);
    graph.data_received(frame(SCHED | 1, None, b"phi")).unwrap();
    assert_eq!(
        graph.state(receive_id),
        Some(VertexState::PendingDataReceived)
    );

    let ready = graph
        .add_job(receive_id, &IdSet::new(), receive(10))
        .unwrap();
    assert_eq!(ids(&ready), vec![receive_id]);
}

/// Mega-receive with one payload racing ahead of the command: the early
/// payload is attached on command arrival and the vertex only becomes
/// ready when the last constituent lands.
#[test]
fn test_mega_receive_data_before_command() {
    let mut graph = WorkerJobGraph::new(16);
    let mega_id = JobId(SCHED | 3);

    let ready = graph
        .data_received(frame(SCHED | 1, Some(SCHED | 3), b"r1"))
        .unwrap();
    assert!(ready.is_empty());
    assert_eq!(
        graph.state(mega_id),
        Some(VertexState::PendingMegaDataReceived)
    );

    let ready = graph
        .add_job(
            mega_id,
            &IdSet::new(),
            mega(&[(SCHED | 1, 10), (SCHED | 2, 11)]),
        )
        .unwrap();
    assert!(ready.is_empty());
    assert_eq!(graph.state(mega_id), Some(VertexState::Blocked));

    let ready = graph
        .data_received(frame(SCHED | 2, Some(SCHED | 3), b"r2"))
        .unwrap();
    assert_eq!(ids(&ready), vec![mega_id]);
    match &ready[0].job {
        WorkerJob::MegaReceive(job) => {
            assert!(job.all_data_received());
            assert_eq!(job.payloads.len(), 2);
        }
        other => panic!("unexpected job {other:?}"),
    }
}

#[test]
fn test_data_for_running_job_is_fatal() {
    let mut graph = WorkerJobGraph::new(16);
    let receive_id = JobId(SCHED | 1);
    graph.add_job(receive_id, &IdSet::new(), receive(10)).unwrap();
    graph.data_received(frame(SCHED | 1, None, b"phi")).unwrap();
    graph.mark_running(receive_id);

    let err = graph.data_received(frame(SCHED | 1, None, b"again"));
    assert!(matches!(err, Err(WorkerError::UnknownReceive(_))));
}

#[test]
fn test_data_for_non_receive_job_is_fatal() {
    let mut graph = WorkerJobGraph::new(16);
    graph
        .add_job(
            JobId(SCHED | 4),
            &IdSet::new(),
            WorkerJob::LocalCopy(LocalCopyJob {
                from: PhysicalDataId(1),
                to: PhysicalDataId(2),
            }),
        )
        .unwrap();
    let err = graph.data_received(frame(SCHED | 4, None, b"oops"));
    assert!(matches!(err, Err(WorkerError::UnknownReceive(_))));
}

/// Prepare-rewind: blocked jobs are dropped, running jobs drain, and the
/// graph ends quiesced.
#[test]
fn test_clear_blocked_then_quiesce() {
    let mut graph = WorkerJobGraph::new(16);
    graph.add_job(JobId(1), &IdSet::new(), compute("a")).unwrap();
    graph.mark_running(JobId(1));
    graph.add_job(JobId(2), &[JobId(1)].into(), compute("b")).unwrap();
    graph
        .add_job(JobId(3), &[JobId(2)].into(), compute("c"))
        .unwrap();
    assert_eq!(graph.blocked_count(), 2);

    graph.clear_blocked();
    assert_eq!(graph.blocked_count(), 0);
    assert!(!graph.quiesced());

    let ready = graph.job_finished(JobId(1));
    assert!(ready.is_empty());
    assert!(graph.quiesced());
}
