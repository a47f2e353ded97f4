use std::sync::{Arc, Mutex};

use log::info;
use nimbus_server::actor::{Actor, ActorAction, ActorContext};
use nimbus_server::monitor::ServerMonitor;
use tokio::sync::mpsc;

use crate::actor::{link, WorkerActor};
use crate::data_map::PhysicalDataMap;
use crate::error::WorkerError;
use crate::event::WorkerEvent;
use crate::exchanger::{self, DataExchanger};
use crate::executor::{ExecutionPool, PoolContext};
use crate::graph::WorkerJobGraph;
use crate::options::WorkerOptions;

impl Actor for WorkerActor {
    type Message = WorkerEvent;
    type Options = WorkerOptions;
    type Error = WorkerError;

    fn name() -> &'static str {
        "WorkerActor"
    }

    fn new(options: WorkerOptions) -> Self {
        let (controller_tx, controller_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let data_map = Arc::new(Mutex::new(PhysicalDataMap::new()));
        let exchanger = DataExchanger::new();
        let pool = ExecutionPool::start(
            options.task_slots,
            PoolContext {
                data_map: data_map.clone(),
                application: options.application.clone(),
                exchanger: exchanger.clone(),
                done: done_tx,
            },
        );
        let graph = WorkerJobGraph::new(options.finish_hint_capacity);
        Self {
            options,
            worker_id: None,
            exchange: ServerMonitor::new(),
            data_port: None,
            pending_handshake: None,
            controller_tx,
            controller_rx: Some(controller_rx),
            data_map,
            graph,
            pool,
            done_rx: Some(done_rx),
            exchanger,
            rewinding: None,
            running: 0,
        }
    }

    fn start(&mut self, ctx: &mut ActorContext<Self>) -> Result<(), Self::Error> {
        let addr = (
            self.options.data_listen_host.clone(),
            self.options.data_port,
        );
        self.exchange = ServerMonitor::launch(exchanger::serve(ctx.handle().clone(), addr));

        let commands = self
            .controller_rx
            .take()
            .ok_or_else(|| WorkerError::Internal("controller link already started".into()))?;
        let controller = (
            self.options.controller_host.clone(),
            self.options.controller_port,
        );
        ctx.spawn(link::run(ctx.handle().clone(), controller, commands));

        let mut done = self
            .done_rx
            .take()
            .ok_or_else(|| WorkerError::Internal("done channel already taken".into()))?;
        let handle = ctx.handle().clone();
        ctx.spawn(async move {
            while let Some(outcome) = done.recv().await {
                handle.send(WorkerEvent::JobFinished(outcome)).await?;
            }
            Ok(())
        });
        Ok(())
    }

    fn receive(
        &mut self,
        ctx: &mut ActorContext<Self>,
        message: Self::Message,
    ) -> Result<ActorAction, Self::Error> {
        match message {
            WorkerEvent::ExchangeReady { port, signal } => {
                self.handle_exchange_ready(ctx, port, signal)
            }
            WorkerEvent::ControllerCommand(command) => {
                self.handle_controller_command(ctx, command)
            }
            WorkerEvent::ControllerDisconnected => self.handle_controller_disconnected(ctx),
            WorkerEvent::DataReceived(frame) => self.handle_data_received(ctx, frame),
            WorkerEvent::JobFinished(outcome) => self.handle_job_finished(ctx, outcome),
            WorkerEvent::Shutdown => Ok(ActorAction::Stop),
        }
    }

    fn stop(self) -> Result<(), Self::Error> {
        info!(
            "worker {} has stopped",
            self.worker_id.map(|id| id.to_string()).unwrap_or_else(|| "?".to_string())
        );
        tokio::spawn(self.exchange.stop());
        Ok(())
    }
}
