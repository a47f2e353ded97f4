//! Binary encoding of the command stream. Each frame on the wire is
//! `u32 length | u8 kind | body`, where `length` counts the kind byte and
//! the body. Sets are `u32 count | elem[count]` in ascending id order,
//! strings and byte blobs are `u32 length | bytes`. All integers are
//! big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use nimbus_common::id::{IdSet, JobId, LogicalDataId, PhysicalDataId, WorkerId};

use crate::command::{
    Command, CreateDataCommand, ExecuteComputeCommand, HandshakeCommand, JobDoneCommand,
    LocalCopyCommand, MegaRemoteCopyReceiveCommand, PrepareRewindCommand, RemoteCopyReceiveCommand,
    RemoteCopySendCommand, TerminateCommand,
};
use crate::error::{ProtoError, ProtoResult};

/// Upper bound on a single command frame. Anything larger indicates a
/// corrupt stream rather than a legitimate command.
pub const MAX_COMMAND_LENGTH: usize = 64 * 1024 * 1024;

const KIND_HANDSHAKE: u8 = 1;
const KIND_EXECUTE_COMPUTE: u8 = 2;
const KIND_CREATE_DATA: u8 = 3;
const KIND_LOCAL_COPY: u8 = 4;
const KIND_REMOTE_COPY_SEND: u8 = 5;
const KIND_REMOTE_COPY_RECEIVE: u8 = 6;
const KIND_MEGA_REMOTE_COPY_RECEIVE: u8 = 7;
const KIND_JOB_DONE: u8 = 8;
const KIND_PREPARE_REWIND: u8 = 9;
const KIND_TERMINATE: u8 = 10;

/// Encodes a command as one complete frame, including the length prefix.
pub fn encode_command(command: &Command) -> Bytes {
    let mut body = BytesMut::new();
    let kind = match command {
        Command::Handshake(c) => {
            body.put_u32(u32::from(c.worker_id.0));
            put_string(&mut body, &c.ip);
            body.put_u16(c.port);
            body.put_f64(c.time);
            KIND_HANDSHAKE
        }
        Command::ExecuteCompute(c) => {
            body.put_u64(c.job_id.0);
            put_string(&mut body, &c.name);
            put_id_set(&mut body, &c.read_set, |id: &PhysicalDataId| id.0);
            put_id_set(&mut body, &c.write_set, |id: &PhysicalDataId| id.0);
            put_id_set(&mut body, &c.before_set, |id: &JobId| id.0);
            put_id_set(&mut body, &c.after_set, |id: &JobId| id.0);
            body.put_u64(c.future_id.0);
            body.put_u8(c.sterile as u8);
            put_bytes(&mut body, &c.params);
            KIND_EXECUTE_COMPUTE
        }
        Command::CreateData(c) => {
            body.put_u64(c.job_id.0);
            put_string(&mut body, &c.variable);
            body.put_u64(c.logical_id.0);
            body.put_u64(c.physical_id.0);
            put_id_set(&mut body, &c.before_set, |id: &JobId| id.0);
            KIND_CREATE_DATA
        }
        Command::LocalCopy(c) => {
            body.put_u64(c.job_id.0);
            body.put_u64(c.from_physical_id.0);
            body.put_u64(c.to_physical_id.0);
            put_id_set(&mut body, &c.before_set, |id: &JobId| id.0);
            KIND_LOCAL_COPY
        }
        Command::RemoteCopySend(c) => {
            body.put_u64(c.job_id.0);
            body.put_u64(c.receive_job_id.0);
            body.put_u64(c.from_physical_id.0);
            body.put_u32(c.to_worker_id.0);
            put_string(&mut body, &c.to_ip);
            body.put_u16(c.to_port);
            put_id_set(&mut body, &c.before_set, |id: &JobId| id.0);
            KIND_REMOTE_COPY_SEND
        }
        Command::RemoteCopyReceive(c) => {
            body.put_u64(c.job_id.0);
            body.put_u64(c.to_physical_id.0);
            put_id_set(&mut body, &c.before_set, |id: &JobId| id.0);
            KIND_REMOTE_COPY_RECEIVE
        }
        Command::MegaRemoteCopyReceive(c) => {
            body.put_u64(c.job_id.0);
            body.put_u32(c.receives.len() as u32);
            for (receive_id, physical_id) in &c.receives {
                body.put_u64(receive_id.0);
                body.put_u64(physical_id.0);
            }
            put_id_set(&mut body, &c.before_set, |id: &JobId| id.0);
            KIND_MEGA_REMOTE_COPY_RECEIVE
        }
        Command::JobDone(c) => {
            body.put_u64(c.job_id.0);
            body.put_u8(c.final_ as u8);
            body.put_u64(c.run_ns);
            body.put_u64(c.wait_ns);
            body.put_u64(c.max_alloc);
            KIND_JOB_DONE
        }
        Command::PrepareRewind(c) => {
            body.put_u32(c.worker_id.0);
            body.put_u64(c.checkpoint_id.0);
            KIND_PREPARE_REWIND
        }
        Command::Terminate(c) => {
            body.put_i32(c.exit_status);
            KIND_TERMINATE
        }
    };
    let mut frame = BytesMut::with_capacity(4 + 1 + body.len());
    frame.put_u32((1 + body.len()) as u32);
    frame.put_u8(kind);
    frame.put_slice(&body);
    frame.freeze()
}

/// Decodes one frame, excluding the length prefix (the transport strips
/// it). Rejects trailing garbage so a framing slip is caught immediately.
pub fn decode_command(frame: &[u8]) -> ProtoResult<Command> {
    let mut buf = frame;
    let kind = get_u8(&mut buf, "command kind")?;
    let command = match kind {
        KIND_HANDSHAKE => Command::Handshake(HandshakeCommand {
            worker_id: WorkerId(get_u32(&mut buf, "worker id")?),
            ip: get_string(&mut buf)?,
            port: get_u16(&mut buf, "port")?,
            time: get_f64(&mut buf, "time")?,
        }),
        KIND_EXECUTE_COMPUTE => Command::ExecuteCompute(ExecuteComputeCommand {
            job_id: JobId(get_u64(&mut buf, "job id")?),
            name: get_string(&mut buf)?,
            read_set: get_id_set(&mut buf, PhysicalDataId)?,
            write_set: get_id_set(&mut buf, PhysicalDataId)?,
            before_set: get_id_set(&mut buf, JobId)?,
            after_set: get_id_set(&mut buf, JobId)?,
            future_id: JobId(get_u64(&mut buf, "future id")?),
            sterile: get_u8(&mut buf, "sterile")? != 0,
            params: get_bytes(&mut buf)?,
        }),
        KIND_CREATE_DATA => Command::CreateData(CreateDataCommand {
            job_id: JobId(get_u64(&mut buf, "job id")?),
            variable: get_string(&mut buf)?,
            logical_id: LogicalDataId(get_u64(&mut buf, "logical id")?),
            physical_id: PhysicalDataId(get_u64(&mut buf, "physical id")?),
            before_set: get_id_set(&mut buf, JobId)?,
        }),
        KIND_LOCAL_COPY => Command::LocalCopy(LocalCopyCommand {
            job_id: JobId(get_u64(&mut buf, "job id")?),
            from_physical_id: PhysicalDataId(get_u64(&mut buf, "from physical id")?),
            to_physical_id: PhysicalDataId(get_u64(&mut buf, "to physical id")?),
            before_set: get_id_set(&mut buf, JobId)?,
        }),
        KIND_REMOTE_COPY_SEND => Command::RemoteCopySend(RemoteCopySendCommand {
            job_id: JobId(get_u64(&mut buf, "job id")?),
            receive_job_id: JobId(get_u64(&mut buf, "receive job id")?),
            from_physical_id: PhysicalDataId(get_u64(&mut buf, "from physical id")?),
            to_worker_id: WorkerId(get_u32(&mut buf, "to worker id")?),
            to_ip: get_string(&mut buf)?,
            to_port: get_u16(&mut buf, "to port")?,
            before_set: get_id_set(&mut buf, JobId)?,
        }),
        KIND_REMOTE_COPY_RECEIVE => Command::RemoteCopyReceive(RemoteCopyReceiveCommand {
            job_id: JobId(get_u64(&mut buf, "job id")?),
            to_physical_id: PhysicalDataId(get_u64(&mut buf, "to physical id")?),
            before_set: get_id_set(&mut buf, JobId)?,
        }),
        KIND_MEGA_REMOTE_COPY_RECEIVE => {
            let job_id = JobId(get_u64(&mut buf, "job id")?);
            let count = get_u32(&mut buf, "receive count")? as usize;
            let mut receives = Vec::with_capacity(count);
            for _ in 0..count {
                let receive_id = JobId(get_u64(&mut buf, "receive job id")?);
                let physical_id = PhysicalDataId(get_u64(&mut buf, "to physical id")?);
                receives.push((receive_id, physical_id));
            }
            Command::MegaRemoteCopyReceive(MegaRemoteCopyReceiveCommand {
                job_id,
                receives,
                before_set: get_id_set(&mut buf, JobId)?,
            })
        }
        KIND_JOB_DONE => Command::JobDone(JobDoneCommand {
            job_id: JobId(get_u64(&mut buf, "job id")?),
            final_: get_u8(&mut buf, "final")? != 0,
            run_ns: get_u64(&mut buf, "run ns")?,
            wait_ns: get_u64(&mut buf, "wait ns")?,
            max_alloc: get_u64(&mut buf, "max alloc")?,
        }),
        KIND_PREPARE_REWIND => Command::PrepareRewind(PrepareRewindCommand {
            worker_id: WorkerId(get_u32(&mut buf, "worker id")?),
            checkpoint_id: nimbus_common::id::CheckpointId(get_u64(&mut buf, "checkpoint id")?),
        }),
        KIND_TERMINATE => Command::Terminate(TerminateCommand {
            exit_status: get_i32(&mut buf, "exit status")?,
        }),
        other => return Err(ProtoError::UnknownCommandKind(other)),
    };
    if !buf.is_empty() {
        return Err(ProtoError::TrailingBytes(buf.len()));
    }
    Ok(command)
}

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

fn put_bytes(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

fn put_id_set<T, F: Fn(&T) -> u64>(buf: &mut BytesMut, set: &IdSet<T>, value: F) {
    buf.put_u32(set.len() as u32);
    for id in set {
        buf.put_u64(value(id));
    }
}

fn get_u8(buf: &mut &[u8], field: &'static str) -> ProtoResult<u8> {
    if buf.remaining() < 1 {
        return Err(ProtoError::Truncated(field));
    }
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut &[u8], field: &'static str) -> ProtoResult<u16> {
    if buf.remaining() < 2 {
        return Err(ProtoError::Truncated(field));
    }
    Ok(buf.get_u16())
}

fn get_u32(buf: &mut &[u8], field: &'static str) -> ProtoResult<u32> {
    if buf.remaining() < 4 {
        return Err(ProtoError::Truncated(field));
    }
    Ok(buf.get_u32())
}

fn get_i32(buf: &mut &[u8], field: &'static str) -> ProtoResult<i32> {
    if buf.remaining() < 4 {
        return Err(ProtoError::Truncated(field));
    }
    Ok(buf.get_i32())
}

fn get_u64(buf: &mut &[u8], field: &'static str) -> ProtoResult<u64> {
    if buf.remaining() < 8 {
        return Err(ProtoError::Truncated(field));
    }
    Ok(buf.get_u64())
}

fn get_f64(buf: &mut &[u8], field: &'static str) -> ProtoResult<f64> {
    if buf.remaining() < 8 {
        return Err(ProtoError::Truncated(field));
    }
    Ok(buf.get_f64())
}

fn get_string(buf: &mut &[u8]) -> ProtoResult<String> {
    let len = get_u32(buf, "string length")? as usize;
    if buf.remaining() < len {
        return Err(ProtoError::Truncated("string bytes"));
    }
    let bytes = buf[..len].to_vec();
    buf.advance(len);
    String::from_utf8(bytes).map_err(|_| ProtoError::InvalidString)
}

fn get_bytes(buf: &mut &[u8]) -> ProtoResult<Bytes> {
    let len = get_u32(buf, "blob length")? as usize;
    if buf.remaining() < len {
        return Err(ProtoError::Truncated("blob bytes"));
    }
    let bytes = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Ok(bytes)
}

fn get_id_set<T: Ord, F: Fn(u64) -> T>(buf: &mut &[u8], wrap: F) -> ProtoResult<IdSet<T>> {
    let count = get_u32(buf, "set count")? as usize;
    let mut set = IdSet::new();
    for _ in 0..count {
        set.insert(wrap(get_u64(buf, "set element")?));
    }
    Ok(set)
}
