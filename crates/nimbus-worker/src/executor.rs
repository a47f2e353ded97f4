//! The execution pool: a bounded set of slots draining the ready queue.
//! Each job acquires its physical instances at dispatch, runs, releases
//! them, and reports an outcome on the done channel the job-graph owner
//! consumes.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use log::debug;
use nimbus_common::id::JobId;
use nimbus_proto::DataFrame;
use tokio::sync::{mpsc, Semaphore};

use crate::application::Application;
use crate::data_map::{Access, DataHandle, PhysicalDataMap};
use crate::error::{WorkerError, WorkerResult};
use crate::exchanger::DataExchanger;
use crate::graph::ReadyJob;
use crate::job::WorkerJob;

pub struct JobOutcome {
    pub job_id: JobId,
    pub run_ns: u64,
    pub wait_ns: u64,
    pub result: WorkerResult<()>,
}

#[derive(Clone)]
pub(crate) struct PoolContext {
    pub data_map: Arc<Mutex<PhysicalDataMap>>,
    pub application: Arc<dyn Application>,
    pub exchanger: DataExchanger,
    pub done: mpsc::UnboundedSender<JobOutcome>,
}

struct QueuedJob {
    ready: ReadyJob,
    queued_at: Instant,
}

pub(crate) struct ExecutionPool {
    queue: mpsc::UnboundedSender<QueuedJob>,
}

impl ExecutionPool {
    /// Spawns the dispatcher and its slot semaphore. `slots` bounds how
    /// many jobs execute at once across the worker.
    pub fn start(slots: usize, ctx: PoolContext) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedJob>();
        tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(slots));
            while let Some(queued) = rx.recv().await {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let job_id = queued.ready.job_id;
                    let wait_ns = queued.queued_at.elapsed().as_nanos() as u64;
                    let started = Instant::now();
                    let result = execute(&ctx, job_id, queued.ready.job).await;
                    ctx.data_map.lock().expect("data map lock").release(job_id);
                    let outcome = JobOutcome {
                        job_id,
                        run_ns: started.elapsed().as_nanos() as u64,
                        wait_ns,
                        result,
                    };
                    let _ = ctx.done.send(outcome);
                    drop(permit);
                });
            }
        });
        Self { queue: tx }
    }

    pub fn submit(&self, ready: ReadyJob) -> WorkerResult<()> {
        debug!("dispatching job {} ({})", ready.job_id, ready.job.name());
        self.queue
            .send(QueuedJob {
                ready,
                queued_at: Instant::now(),
            })
            .map_err(|_| WorkerError::ChannelClosed)
    }
}

async fn execute(ctx: &PoolContext, job_id: JobId, job: WorkerJob) -> WorkerResult<()> {
    match job {
        WorkerJob::CreateData(create) => {
            ctx.data_map
                .lock()
                .expect("data map lock")
                .acquire(create.physical_id, job_id, Access::Init)?;
            Ok(())
        }
        WorkerJob::LocalCopy(copy) => {
            let (from, to) = {
                let mut map = ctx.data_map.lock().expect("data map lock");
                let from = map.acquire(copy.from, job_id, Access::Read)?;
                let to = map.acquire(copy.to, job_id, Access::Write)?;
                (from, to)
            };
            let (bytes, version) = from.with(|b| (b.bytes.clone(), b.version));
            to.with(|b| {
                b.bytes = bytes;
                b.version = version;
            });
            Ok(())
        }
        WorkerJob::RemoteCopySend(send) => {
            let from = ctx
                .data_map
                .lock()
                .expect("data map lock")
                .acquire(send.from, job_id, Access::Read)?;
            let (bytes, version) = from.with(|b| (b.bytes.clone(), b.version));
            let frame = DataFrame {
                receive_job_id: send.receive_job_id,
                mega_receive_job_id: None,
                version,
                template_generation_id: 0,
                payload: Bytes::from(bytes),
            };
            ctx.exchanger
                .send(send.to_worker, (send.to_ip.clone(), send.to_port), frame)
                .await
        }
        WorkerJob::RemoteCopyReceive(receive) => {
            let payload = receive.payload.ok_or_else(|| {
                WorkerError::Internal(format!("receive job {job_id} ran without its payload"))
            })?;
            let to = ctx
                .data_map
                .lock()
                .expect("data map lock")
                .acquire(receive.to, job_id, Access::Write)?;
            to.with(|b| {
                b.bytes = payload.bytes.to_vec();
                b.version = payload.version;
            });
            Ok(())
        }
        WorkerJob::MegaReceive(mega) => {
            for (receive_id, physical_id) in &mega.receives {
                let payload = mega.payloads.get(receive_id).ok_or_else(|| {
                    WorkerError::Internal(format!(
                        "mega receive {job_id} ran without payload for {receive_id}"
                    ))
                })?;
                let to = ctx
                    .data_map
                    .lock()
                    .expect("data map lock")
                    .acquire(*physical_id, job_id, Access::Write)?;
                to.with(|b| {
                    b.bytes = payload.bytes.to_vec();
                    b.version = payload.version;
                });
            }
            Ok(())
        }
        WorkerJob::Compute(compute) => {
            let mut handles: Vec<DataHandle> = {
                let mut map = ctx.data_map.lock().expect("data map lock");
                let mut handles = Vec::new();
                for id in &compute.read_set {
                    handles.push(map.acquire(*id, job_id, Access::Read)?);
                }
                for id in &compute.reduce_set {
                    handles.push(map.acquire(*id, job_id, Access::Reduce)?);
                }
                for id in &compute.write_set {
                    handles.push(map.acquire(*id, job_id, Access::Write)?);
                }
                for id in &compute.scratch_set {
                    handles.push(map.acquire(*id, job_id, Access::Scratch)?);
                }
                handles
            };
            let application = ctx.application.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                let result = application.execute(&compute.name, &compute.params, &mut handles);
                if result.is_ok() {
                    for handle in &handles {
                        if handle.access == Access::Write {
                            handle.with(|b| b.version += 1);
                        }
                    }
                }
                result
            })
            .await
            .map_err(|e| WorkerError::Internal(format!("compute task panicked: {e}")))?;
            outcome.map_err(WorkerError::Application)
        }
    }
}
