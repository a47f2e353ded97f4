use nimbus_proto::{Command, DataFrame};
use tokio::sync::oneshot;

use crate::executor::JobOutcome;

pub enum WorkerEvent {
    /// The data-exchange listener is bound; `port` is the actual port
    /// when an ephemeral one was requested.
    ExchangeReady {
        port: u16,
        signal: oneshot::Sender<()>,
    },
    /// A command arrived on the controller connection.
    ControllerCommand(Command),
    /// The controller connection closed or failed; fatal to the session.
    ControllerDisconnected,
    /// A payload arrived on the data-exchange plane.
    DataReceived(DataFrame),
    /// The execution pool finished a job.
    JobFinished(JobOutcome),
    Shutdown,
}
