//! Async framing over a byte stream: length-prefixed commands on the
//! control plane and self-delimiting data frames on the exchange plane.
//! Reading returns `Ok(None)` on a clean end of stream before any frame
//! byte; a disconnect in the middle of a frame is an error.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{decode_command, encode_command, MAX_COMMAND_LENGTH};
use crate::command::Command;
use crate::error::{ProtoError, ProtoResult};
use crate::exchange::{DataFrame, DATA_FRAME_HEADER_LEN};

pub async fn read_command<R>(reader: &mut R) -> ProtoResult<Option<Command>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let length = u32::from_be_bytes(prefix) as usize;
    if length == 0 || length > MAX_COMMAND_LENGTH {
        return Err(ProtoError::FrameTooLarge(length, MAX_COMMAND_LENGTH));
    }
    let mut frame = vec![0u8; length];
    reader.read_exact(&mut frame).await?;
    decode_command(&frame).map(Some)
}

pub async fn write_command<W>(writer: &mut W, command: &Command) -> ProtoResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_command(command)).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_data_frame<R>(reader: &mut R) -> ProtoResult<Option<DataFrame>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; DATA_FRAME_HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let (mut frame, payload_len) = DataFrame::decode_header(&header)?;
    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload).await?;
    frame.payload = Bytes::from(payload);
    Ok(Some(frame))
}

pub async fn write_data_frame<W>(writer: &mut W, frame: &DataFrame) -> ProtoResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use nimbus_common::id::JobId;

    use super::*;
    use crate::command::TerminateCommand;

    #[tokio::test]
    async fn test_command_stream_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let command = Command::Terminate(TerminateCommand { exit_status: 7 });
        write_command(&mut client, &command).await.unwrap();
        drop(client);
        assert_eq!(read_command(&mut server).await.unwrap(), Some(command));
        assert_eq!(read_command(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_data_frame_stream_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let frame = DataFrame {
            receive_job_id: JobId(5),
            mega_receive_job_id: None,
            version: 2,
            template_generation_id: 0,
            payload: Bytes::from_static(b"phi"),
        };
        write_data_frame(&mut client, &frame).await.unwrap();
        drop(client);
        assert_eq!(read_data_frame(&mut server).await.unwrap(), Some(frame));
        assert_eq!(read_data_frame(&mut server).await.unwrap(), None);
    }
}
