use std::collections::HashMap;

use log::{error, info};
use nimbus_server::actor::{Actor, ActorAction, ActorContext};
use nimbus_server::monitor::ServerMonitor;

use crate::actor::ControllerActor;
use crate::error::ControllerError;
use crate::event::ControllerEvent;
use crate::options::ControllerOptions;
use crate::server;
use crate::state::ControllerState;

impl Actor for ControllerActor {
    type Message = ControllerEvent;
    type Options = ControllerOptions;
    type Error = ControllerError;

    fn name() -> &'static str {
        "ControllerActor"
    }

    fn new(options: ControllerOptions) -> Self {
        let state = ControllerState::new(options.domain);
        Self {
            options,
            server: ServerMonitor::new(),
            state,
            links: HashMap::new(),
            rewind: None,
            idle_waiters: Vec::new(),
            terminating: false,
        }
    }

    fn start(&mut self, ctx: &mut ActorContext<Self>) -> Result<(), Self::Error> {
        let addr = (
            self.options.listen_host.clone(),
            self.options.listen_port,
        );
        self.server = ServerMonitor::launch(server::serve(ctx.handle().clone(), addr));
        Ok(())
    }

    fn receive(
        &mut self,
        ctx: &mut ActorContext<Self>,
        message: Self::Message,
    ) -> Result<ActorAction, Self::Error> {
        match message {
            ControllerEvent::ServerReady { port, signal } => {
                self.handle_server_ready(ctx, port, signal)
            }
            ControllerEvent::NewConnection { stream } => self.handle_new_connection(ctx, stream),
            ControllerEvent::CommandReceived { worker_id, command } => {
                self.handle_command_received(ctx, worker_id, command)
            }
            ControllerEvent::ConnectionLost { worker_id } => {
                self.handle_connection_lost(ctx, worker_id)
            }
            ControllerEvent::NewJobIds { count, result } => {
                let _ = result.send(
                    self.state
                        .id_maker
                        .new_application_job_ids(count)
                        .map_err(Into::into),
                );
                Ok(ActorAction::Continue)
            }
            ControllerEvent::NewLogicalIds { count, result } => {
                let _ = result.send(self.state.id_maker.new_logical_ids(count).map_err(Into::into));
                Ok(ActorAction::Continue)
            }
            ControllerEvent::RegisterPartition {
                partition,
                region,
                result,
            } => {
                let _ = result.send(self.state.ldo_map.add_partition(partition, region));
                Ok(ActorAction::Continue)
            }
            ControllerEvent::RegisterData {
                logical,
                variable,
                partition,
                result,
            } => {
                let _ = result.send(self.state.ldo_map.add_logical(logical, variable, partition));
                Ok(ActorAction::Continue)
            }
            ControllerEvent::DefineData {
                parent,
                logical,
                result,
            } => {
                let _ = result.send(self.state.job_manager.define_data(parent, logical));
                Ok(ActorAction::Continue)
            }
            ControllerEvent::SpawnJob { spec, result } => self.handle_spawn_job(ctx, spec, result),
            ControllerEvent::ListenPort { result } => {
                let _ = result.send(self.server.port());
                Ok(ActorAction::Continue)
            }
            ControllerEvent::WaitJobsDone { result } => {
                if self.state.job_manager.all_jobs_done() {
                    let _ = result.send(());
                } else {
                    self.idle_waiters.push(result);
                }
                Ok(ActorAction::Continue)
            }
            ControllerEvent::PrepareRewind { checkpoint, result } => {
                self.handle_prepare_rewind(ctx, checkpoint, result)
            }
            ControllerEvent::Terminate { exit_status } => self.handle_terminate(ctx, exit_status),
            ControllerEvent::Shutdown => Ok(ActorAction::Stop),
        }
    }

    fn stop(self) -> Result<(), Self::Error> {
        info!("controller is shutting down");
        tokio::spawn(self.server.stop());
        Ok(())
    }
}

impl ControllerActor {
    /// Fatal scheduling-plane failures end the session: log the failing
    /// job context and stop the actor.
    pub(crate) fn fail_session(&self, error: &ControllerError) -> ActorAction {
        error!("fatal controller error: {error}");
        ActorAction::Stop
    }
}
