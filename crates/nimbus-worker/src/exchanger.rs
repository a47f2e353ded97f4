//! Worker-to-worker data movement. Each worker listens on its data port;
//! senders open (or reuse) one connection per destination and stream
//! self-delimiting frames. Arriving frames become events for the worker
//! actor, which reconciles them with the job graph.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use nimbus_common::id::WorkerId;
use nimbus_proto::{transport, DataFrame};
use nimbus_server::actor::ActorHandle;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::actor::WorkerActor;
use crate::error::{WorkerError, WorkerResult};
use crate::event::WorkerEvent;

/// Shared handle to the outgoing-connection pool.
#[derive(Clone)]
pub(crate) struct DataExchanger {
    peers: Arc<Mutex<HashMap<WorkerId, mpsc::UnboundedSender<DataFrame>>>>,
}

impl DataExchanger {
    pub fn new() -> Self {
        Self {
            peers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Sends one frame to a peer, connecting on first use. The connection
    /// is kept for reuse; a send failure drops it and surfaces as a
    /// transport error.
    pub async fn send(
        &self,
        worker: WorkerId,
        endpoint: (String, u16),
        frame: DataFrame,
    ) -> WorkerResult<()> {
        let mut peers = self.peers.lock().await;
        if !peers.contains_key(&worker) {
            let stream = TcpStream::connect(endpoint.clone())
                .await
                .map_err(nimbus_proto::ProtoError::from)?;
            debug!("data connection to worker {worker} at {}:{}", endpoint.0, endpoint.1);
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(write_frames(worker, stream, rx));
            peers.insert(worker, tx);
        }
        let sender = peers.get(&worker).expect("peer just ensured");
        if sender.send(frame).is_err() {
            peers.remove(&worker);
            return Err(WorkerError::Internal(format!(
                "data connection to worker {worker} is gone"
            )));
        }
        Ok(())
    }
}

async fn write_frames(
    worker: WorkerId,
    mut stream: TcpStream,
    mut frames: mpsc::UnboundedReceiver<DataFrame>,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = transport::write_data_frame(&mut stream, &frame).await {
            warn!("failed to send data frame to worker {worker}: {e}");
            break;
        }
    }
}

/// The inbound side: accept peer connections and turn their frames into
/// actor events.
pub(crate) async fn serve(
    handle: ActorHandle<WorkerActor>,
    addr: (String, u16),
) -> WorkerResult<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(nimbus_proto::ProtoError::from)?;
    let port = listener
        .local_addr()
        .map_err(nimbus_proto::ProtoError::from)?
        .port();
    let (signal_tx, mut signal_rx) = oneshot::channel();
    handle
        .send(WorkerEvent::ExchangeReady {
            port,
            signal: signal_tx,
        })
        .await?;
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!("accepted data connection from {peer}");
                        tokio::spawn(read_frames(handle.clone(), stream));
                    }
                    Err(e) => warn!("failed to accept data connection: {e}"),
                }
            }
            _ = &mut signal_rx => break,
        }
    }
    Ok(())
}

async fn read_frames(handle: ActorHandle<WorkerActor>, mut stream: TcpStream) {
    loop {
        match transport::read_data_frame(&mut stream).await {
            Ok(Some(frame)) => {
                if handle.send(WorkerEvent::DataReceived(frame)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("error reading data frame: {e}");
                break;
            }
        }
    }
}
