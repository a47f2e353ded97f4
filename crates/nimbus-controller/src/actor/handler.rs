use std::mem;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};
use nimbus_common::id::{CheckpointId, WorkerId};
use nimbus_proto::command::{
    Command, HandshakeCommand, JobDoneCommand, PrepareRewindCommand, TerminateCommand,
};
use nimbus_server::actor::{ActorAction, ActorContext};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::actor::{ControllerActor, RewindBarrier};
use crate::assigner::{self, CommandOutbox};
use crate::error::{ControllerError, ControllerResult};
use crate::event::ControllerEvent;
use crate::job_graph::JobSpec;
use crate::server;

/// Delay between queueing terminate commands and stopping the actor, so
/// the writer tasks can flush their queues.
const TERMINATE_DRAIN: Duration = Duration::from_millis(200);

impl ControllerActor {
    pub(super) fn handle_server_ready(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        port: u16,
        signal: oneshot::Sender<()>,
    ) -> Result<ActorAction, ControllerError> {
        let server = mem::take(&mut self.server);
        self.server = match server.ready(signal, port) {
            Ok(server) => server,
            Err(_) => {
                error!("command server readiness reported in an unexpected state");
                return Ok(ActorAction::Stop);
            }
        };
        info!("controller is listening on port {port}");
        Ok(ActorAction::Continue)
    }

    pub(super) fn handle_new_connection(
        &mut self,
        ctx: &mut ActorContext<Self>,
        stream: TcpStream,
    ) -> Result<ActorAction, ControllerError> {
        let worker_id = match self.state.register_worker() {
            Ok(id) => id,
            Err(e) => return Ok(self.fail_session(&e)),
        };
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        self.links.insert(worker_id, tx);
        ctx.spawn(server::write_loop(worker_id, writer, rx));
        ctx.spawn(server::read_loop(worker_id, reader, ctx.handle().clone()));

        // Assign the id; the worker answers with its data endpoint.
        self.send_command(
            worker_id,
            Command::Handshake(HandshakeCommand {
                worker_id,
                ip: String::new(),
                port: 0,
                time: wall_clock(),
            }),
        );
        Ok(ActorAction::Continue)
    }

    pub(super) fn handle_connection_lost(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        worker_id: WorkerId,
    ) -> Result<ActorAction, ControllerError> {
        self.links.remove(&worker_id);
        if self.terminating {
            debug!("worker {worker_id} disconnected during termination");
            return Ok(ActorAction::Continue);
        }
        // A lost worker ends the session; recovery is the application's
        // prepare-rewind plus reload from its last checkpoint.
        error!("lost connection to worker {worker_id}; session cannot continue");
        Ok(ActorAction::Stop)
    }

    pub(super) fn handle_command_received(
        &mut self,
        ctx: &mut ActorContext<Self>,
        worker_id: WorkerId,
        command: Command,
    ) -> Result<ActorAction, ControllerError> {
        match command {
            Command::Handshake(c) => self.handle_worker_handshake(ctx, worker_id, c),
            Command::JobDone(c) => self.handle_job_done(ctx, worker_id, c),
            Command::PrepareRewind(c) => self.handle_rewind_ack(ctx, c),
            other => {
                warn!(
                    "unexpected {} command from worker {worker_id}",
                    other.name()
                );
                Ok(ActorAction::Continue)
            }
        }
    }

    fn handle_worker_handshake(
        &mut self,
        ctx: &mut ActorContext<Self>,
        worker_id: WorkerId,
        command: HandshakeCommand,
    ) -> Result<ActorAction, ControllerError> {
        if let Err(e) = self
            .state
            .activate_worker(worker_id, command.ip.clone(), command.port)
        {
            return Ok(self.fail_session(&e));
        }
        info!(
            "worker {worker_id} is ready, data exchange at {}:{}",
            command.ip, command.port
        );
        self.run_scheduler(ctx)
    }

    fn handle_job_done(
        &mut self,
        ctx: &mut ActorContext<Self>,
        origin: WorkerId,
        command: JobDoneCommand,
    ) -> Result<ActorAction, ControllerError> {
        let job_id = command.job_id;
        if job_id.is_scheduler_produced() {
            warn!("worker {origin} reported job-done for copy job {job_id}");
            return Ok(ActorAction::Continue);
        }
        if !self.state.job_manager.mark_done(job_id) {
            warn!("job-done for unknown job {job_id}");
            return Ok(ActorAction::Continue);
        }

        // Copy jobs are acknowledged implicitly: a finished job accounts
        // for every controller-synthesized predecessor it waited on.
        let copies: Vec<_> = self
            .state
            .job_manager
            .get(job_id)
            .map(|entry| {
                entry
                    .before_set
                    .iter()
                    .copied()
                    .filter(|id| id.is_scheduler_produced())
                    .collect()
            })
            .unwrap_or_default();
        for copy in copies {
            self.state.job_manager.mark_done(copy);
        }

        // Other workers may hold this job in their local before-sets.
        let broadcast: Vec<WorkerId> = self
            .links
            .keys()
            .copied()
            .filter(|id| *id != origin)
            .collect();
        for worker in broadcast {
            self.send_command(worker, Command::JobDone(command.clone()));
        }

        if self.state.job_manager.all_jobs_done() {
            for waiter in self.idle_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
        self.run_scheduler(ctx)
    }

    pub(super) fn handle_spawn_job(
        &mut self,
        ctx: &mut ActorContext<Self>,
        spec: JobSpec,
        result: oneshot::Sender<ControllerResult<()>>,
    ) -> Result<ActorAction, ControllerError> {
        let spawned = self.state.spawn_job(spec);
        let failed = spawned.is_err();
        let _ = result.send(spawned);
        if failed {
            return Ok(ActorAction::Continue);
        }
        self.run_scheduler(ctx)
    }

    pub(super) fn handle_prepare_rewind(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        checkpoint: CheckpointId,
        result: oneshot::Sender<ControllerResult<()>>,
    ) -> Result<ActorAction, ControllerError> {
        if self.rewind.is_some() {
            let _ = result.send(Err(ControllerError::Internal(
                "a prepare-rewind is already in flight".to_string(),
            )));
            return Ok(ActorAction::Continue);
        }
        let pending: std::collections::HashSet<WorkerId> =
            self.state.active_workers().into_iter().collect();
        if pending.is_empty() {
            let _ = result.send(Ok(()));
            return Ok(ActorAction::Continue);
        }
        for worker in &pending {
            self.send_command(
                *worker,
                Command::PrepareRewind(PrepareRewindCommand {
                    worker_id: *worker,
                    checkpoint_id: checkpoint,
                }),
            );
        }
        self.rewind = Some(RewindBarrier {
            checkpoint,
            pending,
            result,
        });
        Ok(ActorAction::Continue)
    }

    fn handle_rewind_ack(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        command: PrepareRewindCommand,
    ) -> Result<ActorAction, ControllerError> {
        let Some(barrier) = &mut self.rewind else {
            warn!("rewind acknowledgement without a rewind in flight");
            return Ok(ActorAction::Continue);
        };
        if barrier.checkpoint != command.checkpoint_id {
            warn!(
                "rewind acknowledgement for checkpoint {} while draining {}",
                command.checkpoint_id, barrier.checkpoint
            );
            return Ok(ActorAction::Continue);
        }
        barrier.pending.remove(&command.worker_id);
        if barrier.pending.is_empty() {
            let barrier = self.rewind.take().expect("rewind barrier present");
            info!(
                "all workers drained for checkpoint {}",
                barrier.checkpoint
            );
            let _ = barrier.result.send(Ok(()));
        }
        Ok(ActorAction::Continue)
    }

    pub(super) fn handle_terminate(
        &mut self,
        ctx: &mut ActorContext<Self>,
        exit_status: i32,
    ) -> Result<ActorAction, ControllerError> {
        self.terminating = true;
        let workers: Vec<WorkerId> = self.links.keys().copied().collect();
        for worker in workers {
            self.send_command(worker, Command::Terminate(TerminateCommand { exit_status }));
        }
        let handle = ctx.handle().clone();
        ctx.spawn(async move {
            tokio::time::sleep(TERMINATE_DRAIN).await;
            handle.send(ControllerEvent::Shutdown).await
        });
        Ok(ActorAction::Continue)
    }

    /// One scheduling pass: resolve versions, then assign every ready job
    /// and flush the emitted commands. Scheduling pauses while the
    /// cluster is incomplete or a rewind barrier is draining.
    fn run_scheduler(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<ActorAction, ControllerError> {
        if self.rewind.is_some() || self.state.active_workers().len() < self.options.worker_count {
            return Ok(ActorAction::Continue);
        }
        loop {
            let ready = match self.state.jobs_ready_to_assign(self.options.assign_batch) {
                Ok(ready) => ready,
                Err(e) => return Ok(self.fail_job(&e)),
            };
            if ready.is_empty() {
                return Ok(ActorAction::Continue);
            }
            let mut out = CommandOutbox::new();
            for job_id in ready {
                if let Err(e) = assigner::assign_job(&mut self.state, job_id, &mut out) {
                    return Ok(self.fail_job(&e));
                }
            }
            for (worker, command) in out {
                self.send_command(worker, command);
            }
        }
    }

    /// Logs the failing job and its predecessor chain, then ends the
    /// session; every scheduling failure is a controller or protocol bug.
    fn fail_job(&self, error: &ControllerError) -> ActorAction {
        let job = match error {
            ControllerError::UnresolvedVersion { job, .. }
            | ControllerError::UnreachableVersion { job, .. }
            | ControllerError::DuplicateJob(job)
            | ControllerError::UnknownJob(job) => Some(*job),
            _ => None,
        };
        if let Some(job) = job {
            if let Ok(entry) = self.state.job_manager.get(job) {
                error!(
                    "job {job} ({}) failed with predecessors {:?}",
                    entry.name, entry.before_set
                );
            }
        }
        self.fail_session(error)
    }

    fn send_command(&mut self, worker: WorkerId, command: Command) {
        let name = command.name();
        if let Some(link) = self.links.get(&worker) {
            if link.send(command).is_err() {
                warn!("dropped {name} command for disconnected worker {worker}");
            }
        } else {
            warn!("no connection for worker {worker}");
        }
    }
}

fn wall_clock() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
