mod core;
mod handler;
mod link;

use std::sync::{Arc, Mutex};

use nimbus_common::id::{CheckpointId, WorkerId};
use nimbus_proto::command::HandshakeCommand;
use nimbus_proto::Command;
use nimbus_server::monitor::ServerMonitor;
use tokio::sync::mpsc;

use crate::data_map::PhysicalDataMap;
use crate::error::WorkerError;
use crate::exchanger::DataExchanger;
use crate::executor::{ExecutionPool, JobOutcome};
use crate::graph::WorkerJobGraph;
use crate::options::WorkerOptions;

pub struct WorkerActor {
    pub(crate) options: WorkerOptions,
    /// Assigned by the controller's handshake.
    pub(crate) worker_id: Option<WorkerId>,
    pub(crate) exchange: ServerMonitor<WorkerError>,
    /// The bound data-exchange port, once the listener is up.
    pub(crate) data_port: Option<u16>,
    /// A handshake that arrived before the data listener reported its
    /// port; answered as soon as the port is known.
    pub(crate) pending_handshake: Option<HandshakeCommand>,
    pub(crate) controller_tx: mpsc::UnboundedSender<Command>,
    pub(crate) controller_rx: Option<mpsc::UnboundedReceiver<Command>>,
    pub(crate) data_map: Arc<Mutex<PhysicalDataMap>>,
    pub(crate) graph: WorkerJobGraph,
    pub(crate) pool: ExecutionPool,
    pub(crate) done_rx: Option<mpsc::UnboundedReceiver<JobOutcome>>,
    pub(crate) exchanger: DataExchanger,
    /// The checkpoint being drained toward, while a rewind is in flight.
    pub(crate) rewinding: Option<CheckpointId>,
    /// Jobs currently on the execution pool.
    pub(crate) running: usize,
}
