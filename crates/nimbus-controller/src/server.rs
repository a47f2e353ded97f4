//! The controller's command server: accepts worker connections and runs
//! the per-connection reader and writer loops. Frames are decoded here;
//! everything stateful happens in the actor.

use log::{debug, warn};
use nimbus_common::id::WorkerId;
use nimbus_proto::{transport, Command};
use nimbus_server::actor::ActorHandle;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use crate::actor::ControllerActor;
use crate::error::{ControllerError, ControllerResult};
use crate::event::ControllerEvent;

pub(crate) async fn serve(
    handle: ActorHandle<ControllerActor>,
    addr: (String, u16),
) -> ControllerResult<()> {
    let listener = TcpListener::bind(addr).await.map_err(nimbus_proto::ProtoError::from)?;
    let port = listener
        .local_addr()
        .map_err(nimbus_proto::ProtoError::from)?
        .port();
    let (signal_tx, mut signal_rx) = oneshot::channel();
    handle
        .send(ControllerEvent::ServerReady {
            port,
            signal: signal_tx,
        })
        .await?;
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!("accepted worker connection from {peer}");
                        handle.send(ControllerEvent::NewConnection { stream }).await?;
                    }
                    Err(e) => {
                        warn!("failed to accept worker connection: {e}");
                    }
                }
            }
            _ = &mut signal_rx => break,
        }
    }
    Ok(())
}

/// Decodes commands off one worker connection and feeds them to the
/// actor. A clean close or a read error both surface as a lost
/// connection, which is fatal to the session.
pub(crate) async fn read_loop(
    worker_id: WorkerId,
    mut reader: OwnedReadHalf,
    handle: ActorHandle<ControllerActor>,
) -> ControllerResult<()> {
    loop {
        match transport::read_command(&mut reader).await {
            Ok(Some(command)) => {
                handle
                    .send(ControllerEvent::CommandReceived { worker_id, command })
                    .await?;
            }
            Ok(None) => break,
            Err(e) => {
                warn!("read error on worker {worker_id} connection: {e}");
                break;
            }
        }
    }
    handle
        .send(ControllerEvent::ConnectionLost { worker_id })
        .await?;
    Ok(())
}

/// Drains the outbound queue of one worker connection in order.
pub(crate) async fn write_loop(
    worker_id: WorkerId,
    mut writer: OwnedWriteHalf,
    mut commands: mpsc::UnboundedReceiver<Command>,
) -> ControllerResult<()> {
    while let Some(command) = commands.recv().await {
        debug!("sending {} to worker {worker_id}", command.name());
        transport::write_command(&mut writer, &command)
            .await
            .map_err(ControllerError::from)?;
    }
    Ok(())
}
