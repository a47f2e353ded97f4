//! The data-exchange frame carried on the worker-to-worker plane:
//! `u64 receive_job_id | u64 mega_receive_job_id_or_zero | u64 version |
//! u64 template_generation_id_or_zero | u32 payload_len | payload`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use nimbus_common::id::{DataVersion, JobId};

use crate::error::{ProtoError, ProtoResult};

pub const DATA_FRAME_HEADER_LEN: usize = 8 * 4 + 4;

/// Upper bound on one payload; larger values indicate a corrupt stream.
pub const MAX_PAYLOAD_LENGTH: usize = 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    pub receive_job_id: JobId,
    /// The coalesced receive vertex this payload belongs to, if any.
    pub mega_receive_job_id: Option<JobId>,
    pub version: DataVersion,
    /// Reserved for batched-graph instantiation; zero when unused.
    pub template_generation_id: u64,
    pub payload: Bytes,
}

impl DataFrame {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DATA_FRAME_HEADER_LEN + self.payload.len());
        buf.put_u64(self.receive_job_id.0);
        buf.put_u64(self.mega_receive_job_id.map_or(0, |id| id.0));
        buf.put_u64(self.version);
        buf.put_u64(self.template_generation_id);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decodes the fixed-size header; the payload follows on the stream.
    pub fn decode_header(header: &[u8]) -> ProtoResult<(DataFrame, usize)> {
        if header.len() < DATA_FRAME_HEADER_LEN {
            return Err(ProtoError::Truncated("data frame header"));
        }
        let mut buf = header;
        let receive_job_id = JobId(buf.get_u64());
        let mega = buf.get_u64();
        let version = buf.get_u64();
        let template_generation_id = buf.get_u64();
        let payload_len = buf.get_u32() as usize;
        if payload_len > MAX_PAYLOAD_LENGTH {
            return Err(ProtoError::FrameTooLarge(payload_len, MAX_PAYLOAD_LENGTH));
        }
        let frame = DataFrame {
            receive_job_id,
            mega_receive_job_id: (mega != 0).then_some(JobId(mega)),
            version,
            template_generation_id,
            payload: Bytes::new(),
        };
        Ok((frame, payload_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_frame_round_trip() {
        let frame = DataFrame {
            receive_job_id: JobId(1 << 63 | 12),
            mega_receive_job_id: None,
            version: 4,
            template_generation_id: 0,
            payload: Bytes::from_static(b"velocity field"),
        };
        let encoded = frame.encode();
        let (mut decoded, payload_len) =
            DataFrame::decode_header(&encoded[..DATA_FRAME_HEADER_LEN]).unwrap();
        assert_eq!(payload_len, frame.payload.len());
        decoded.payload = Bytes::copy_from_slice(&encoded[DATA_FRAME_HEADER_LEN..]);
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_mega_id_zero_means_plain_receive() {
        let frame = DataFrame {
            receive_job_id: JobId(9),
            mega_receive_job_id: Some(JobId(1 << 63 | 3)),
            version: 0,
            template_generation_id: 0,
            payload: Bytes::new(),
        };
        let encoded = frame.encode();
        let (decoded, _) = DataFrame::decode_header(&encoded).unwrap();
        assert_eq!(decoded.mega_receive_job_id, Some(JobId(1 << 63 | 3)));
    }
}
