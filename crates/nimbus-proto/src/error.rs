use thiserror::Error;

pub type ProtoResult<T> = Result<T, ProtoError>;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("truncated frame while reading {0}")]
    Truncated(&'static str),
    #[error("unknown command kind: {0}")]
    UnknownCommandKind(u8),
    #[error("{0} trailing bytes after command body")]
    TrailingBytes(usize),
    #[error("frame length {0} exceeds the {1} byte limit")]
    FrameTooLarge(usize, usize),
    #[error("invalid utf-8 in string field")]
    InvalidString,
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}
