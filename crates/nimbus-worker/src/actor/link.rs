//! The worker's side of the controller connection: one reader turning
//! frames into events, one writer draining the outbound queue.

use log::{info, warn};
use nimbus_proto::{transport, Command};
use nimbus_server::actor::ActorHandle;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::actor::WorkerActor;
use crate::error::WorkerResult;
use crate::event::WorkerEvent;

pub(crate) async fn run(
    handle: ActorHandle<WorkerActor>,
    addr: (String, u16),
    mut commands: mpsc::UnboundedReceiver<Command>,
) -> WorkerResult<()> {
    let stream = match TcpStream::connect(addr.clone()).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("cannot reach controller at {}:{}: {e}", addr.0, addr.1);
            handle.send(WorkerEvent::ControllerDisconnected).await?;
            return Ok(());
        }
    };
    info!("connected to controller at {}:{}", addr.0, addr.1);
    let (mut reader, mut writer) = stream.into_split();

    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            if let Err(e) = transport::write_command(&mut writer, &command).await {
                warn!("failed to send {} to controller: {e}", command.name());
                break;
            }
        }
    });

    loop {
        match transport::read_command(&mut reader).await {
            Ok(Some(command)) => {
                handle.send(WorkerEvent::ControllerCommand(command)).await?;
            }
            Ok(None) => break,
            Err(e) => {
                warn!("read error on controller connection: {e}");
                break;
            }
        }
    }
    handle.send(WorkerEvent::ControllerDisconnected).await?;
    Ok(())
}
