use std::mem;
use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};
use nimbus_common::id::{IdSet, JobId, WorkerId};
use nimbus_proto::command::{
    Command, CreateDataCommand, ExecuteComputeCommand, HandshakeCommand, JobDoneCommand,
    LocalCopyCommand, MegaRemoteCopyReceiveCommand, PrepareRewindCommand,
    RemoteCopyReceiveCommand, RemoteCopySendCommand,
};
use nimbus_proto::DataFrame;
use nimbus_server::actor::{ActorAction, ActorContext};
use tokio::sync::oneshot;

use crate::actor::WorkerActor;
use crate::error::WorkerError;
use crate::executor::JobOutcome;
use crate::graph::ReadyJob;
use crate::job::{
    ComputeJob, CreateDataJob, LocalCopyJob, MegaReceiveJob, RemoteCopyReceiveJob,
    RemoteCopySendJob, WorkerJob,
};

impl WorkerActor {
    pub(super) fn handle_exchange_ready(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        port: u16,
        signal: oneshot::Sender<()>,
    ) -> Result<ActorAction, WorkerError> {
        let exchange = mem::take(&mut self.exchange);
        self.exchange = match exchange.ready(signal, port) {
            Ok(exchange) => exchange,
            Err(_) => {
                error!("data listener readiness reported in an unexpected state");
                return Ok(ActorAction::Stop);
            }
        };
        info!("data exchange is listening on port {port}");
        self.data_port = Some(port);
        if let Some(handshake) = self.pending_handshake.take() {
            self.answer_handshake(handshake);
        }
        Ok(ActorAction::Continue)
    }

    pub(super) fn handle_controller_disconnected(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<ActorAction, WorkerError> {
        error!("controller connection lost; worker cannot continue");
        Ok(ActorAction::Stop)
    }

    pub(super) fn handle_controller_command(
        &mut self,
        ctx: &mut ActorContext<Self>,
        command: Command,
    ) -> Result<ActorAction, WorkerError> {
        match command {
            Command::Handshake(c) => {
                if self.data_port.is_some() {
                    self.answer_handshake(c);
                } else {
                    self.pending_handshake = Some(c);
                }
                Ok(ActorAction::Continue)
            }
            Command::ExecuteCompute(c) => self.add_compute_job(ctx, c),
            Command::CreateData(c) => self.add_create_data_job(ctx, c),
            Command::LocalCopy(c) => self.add_local_copy_job(ctx, c),
            Command::RemoteCopySend(c) => self.add_remote_send_job(ctx, c),
            Command::RemoteCopyReceive(c) => self.add_remote_receive_job(ctx, c),
            Command::MegaRemoteCopyReceive(c) => self.add_mega_receive_job(ctx, c),
            Command::JobDone(c) => {
                let ready = self.graph.controller_job_done(c.job_id);
                self.dispatch(ready)
            }
            Command::PrepareRewind(c) => self.handle_prepare_rewind(ctx, c),
            Command::Terminate(c) => {
                info!("terminating with status {}", c.exit_status);
                self.options
                    .exit_status
                    .store(c.exit_status, Ordering::Relaxed);
                Ok(ActorAction::Stop)
            }
        }
    }

    fn answer_handshake(&mut self, handshake: HandshakeCommand) {
        self.worker_id = Some(handshake.worker_id);
        info!("controller assigned worker id {}", handshake.worker_id);
        let reply = Command::Handshake(HandshakeCommand {
            worker_id: handshake.worker_id,
            ip: self.options.data_external_host.clone(),
            port: self.data_port.unwrap_or_default(),
            time: wall_clock(),
        });
        self.send_to_controller(reply);
    }

    fn add_compute_job(
        &mut self,
        ctx: &mut ActorContext<Self>,
        command: ExecuteComputeCommand,
    ) -> Result<ActorAction, WorkerError> {
        let job = WorkerJob::Compute(ComputeJob {
            name: command.name,
            read_set: command.read_set,
            write_set: command.write_set,
            scratch_set: Default::default(),
            reduce_set: Default::default(),
            params: command.params,
            sterile: command.sterile,
            future_id: command.future_id,
        });
        self.add_job(ctx, command.job_id, &command.before_set, job)
    }

    fn add_create_data_job(
        &mut self,
        ctx: &mut ActorContext<Self>,
        command: CreateDataCommand,
    ) -> Result<ActorAction, WorkerError> {
        let job = WorkerJob::CreateData(CreateDataJob {
            variable: command.variable,
            logical_id: command.logical_id,
            physical_id: command.physical_id,
        });
        self.add_job(ctx, command.job_id, &command.before_set, job)
    }

    fn add_local_copy_job(
        &mut self,
        ctx: &mut ActorContext<Self>,
        command: LocalCopyCommand,
    ) -> Result<ActorAction, WorkerError> {
        let job = WorkerJob::LocalCopy(LocalCopyJob {
            from: command.from_physical_id,
            to: command.to_physical_id,
        });
        self.add_job(ctx, command.job_id, &command.before_set, job)
    }

    fn add_remote_send_job(
        &mut self,
        ctx: &mut ActorContext<Self>,
        command: RemoteCopySendCommand,
    ) -> Result<ActorAction, WorkerError> {
        let job = WorkerJob::RemoteCopySend(RemoteCopySendJob {
            receive_job_id: command.receive_job_id,
            from: command.from_physical_id,
            to_worker: command.to_worker_id,
            to_ip: command.to_ip,
            to_port: command.to_port,
        });
        self.add_job(ctx, command.job_id, &command.before_set, job)
    }

    fn add_remote_receive_job(
        &mut self,
        ctx: &mut ActorContext<Self>,
        command: RemoteCopyReceiveCommand,
    ) -> Result<ActorAction, WorkerError> {
        let job = WorkerJob::RemoteCopyReceive(RemoteCopyReceiveJob {
            to: command.to_physical_id,
            payload: None,
        });
        self.add_job(ctx, command.job_id, &command.before_set, job)
    }

    fn add_mega_receive_job(
        &mut self,
        ctx: &mut ActorContext<Self>,
        command: MegaRemoteCopyReceiveCommand,
    ) -> Result<ActorAction, WorkerError> {
        let job = WorkerJob::MegaReceive(MegaReceiveJob {
            receives: command.receives,
            payloads: Default::default(),
        });
        self.add_job(ctx, command.job_id, &command.before_set, job)
    }

    fn add_job(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        job_id: JobId,
        before_set: &IdSet<JobId>,
        job: WorkerJob,
    ) -> Result<ActorAction, WorkerError> {
        if self.rewinding.is_some() {
            warn!("dropping job {job_id} while draining for rewind");
            return Ok(ActorAction::Continue);
        }
        debug!("job {job_id} ({}) added to the local graph", job.name());
        match self.graph.add_job(job_id, before_set, job) {
            Ok(ready) => self.dispatch(ready),
            Err(e) => {
                error!("failed to add job {job_id}: {e}");
                Ok(ActorAction::Stop)
            }
        }
    }

    pub(super) fn handle_data_received(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        frame: DataFrame,
    ) -> Result<ActorAction, WorkerError> {
        if self.rewinding.is_some() {
            debug!(
                "dropping payload for receive {} while draining for rewind",
                frame.receive_job_id
            );
            return Ok(ActorAction::Continue);
        }
        match self.graph.data_received(frame) {
            Ok(ready) => self.dispatch(ready),
            Err(e) => {
                error!("data exchange failed: {e}");
                Ok(ActorAction::Stop)
            }
        }
    }

    pub(super) fn handle_job_finished(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        outcome: JobOutcome,
    ) -> Result<ActorAction, WorkerError> {
        self.running = self.running.saturating_sub(1);
        if let Err(e) = outcome.result {
            error!("job {} failed: {e}", outcome.job_id);
            return Ok(ActorAction::Stop);
        }
        let ready = self.graph.job_finished(outcome.job_id);
        debug!(
            "job {} finished, {} running, {} blocked",
            outcome.job_id,
            self.running,
            self.graph.blocked_count()
        );

        if self.rewinding.is_some() {
            // No progress reporting while draining; the controller only
            // hears the rewind acknowledgement.
            self.try_ack_rewind();
            return Ok(ActorAction::Continue);
        }

        if !outcome.job_id.is_scheduler_produced() {
            self.send_to_controller(Command::JobDone(JobDoneCommand {
                job_id: outcome.job_id,
                final_: false,
                run_ns: outcome.run_ns,
                wait_ns: outcome.wait_ns,
                max_alloc: 0,
            }));
        }
        self.dispatch(ready)
    }

    fn handle_prepare_rewind(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        command: PrepareRewindCommand,
    ) -> Result<ActorAction, WorkerError> {
        info!(
            "prepare-rewind for checkpoint {}: draining {} running jobs",
            command.checkpoint_id, self.running
        );
        self.rewinding = Some(command.checkpoint_id);
        self.graph.clear_blocked();
        self.try_ack_rewind();
        Ok(ActorAction::Continue)
    }

    fn try_ack_rewind(&mut self) {
        let Some(checkpoint) = self.rewinding else {
            return;
        };
        if self.running > 0 || !self.graph.quiesced() {
            return;
        }
        let worker_id = self.worker_id.unwrap_or(WorkerId(0));
        info!("drained; acknowledging rewind to checkpoint {checkpoint}");
        self.send_to_controller(Command::PrepareRewind(PrepareRewindCommand {
            worker_id,
            checkpoint_id: checkpoint,
        }));
        self.rewinding = None;
    }

    fn dispatch(&mut self, ready: Vec<ReadyJob>) -> Result<ActorAction, WorkerError> {
        for job in ready {
            if self.rewinding.is_some() {
                warn!("not admitting job {} during rewind drain", job.job_id);
                continue;
            }
            self.graph.mark_running(job.job_id);
            self.running += 1;
            self.pool.submit(job)?;
        }
        Ok(ActorAction::Continue)
    }

    fn send_to_controller(&mut self, command: Command) {
        if self.controller_tx.send(command).is_err() {
            warn!("controller link is gone; command dropped");
        }
    }
}

fn wall_clock() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
