mod core;
mod handler;

use std::collections::{HashMap, HashSet};

use nimbus_common::id::{CheckpointId, WorkerId};
use nimbus_proto::Command;
use nimbus_server::monitor::ServerMonitor;
use tokio::sync::{mpsc, oneshot};

use crate::error::{ControllerError, ControllerResult};
use crate::options::ControllerOptions;
use crate::state::ControllerState;

pub struct ControllerActor {
    pub(crate) options: ControllerOptions,
    pub(crate) server: ServerMonitor<ControllerError>,
    pub(crate) state: ControllerState,
    /// Outbound command queues, one per connected worker.
    pub(crate) links: HashMap<WorkerId, mpsc::UnboundedSender<Command>>,
    pub(crate) rewind: Option<RewindBarrier>,
    pub(crate) idle_waiters: Vec<oneshot::Sender<()>>,
    /// Set once terminate commands have gone out; connection losses are
    /// expected from then on.
    pub(crate) terminating: bool,
}

/// Tracks an in-flight prepare-rewind: the barrier completes when every
/// worker has acknowledged the drain.
pub(crate) struct RewindBarrier {
    pub checkpoint: CheckpointId,
    pub pending: HashSet<WorkerId>,
    pub result: oneshot::Sender<ControllerResult<()>>,
}
