use thiserror::Error;

pub type CommonResult<T> = Result<T, CommonError>;

#[derive(Debug, Error)]
pub enum CommonError {
    #[error("identifier space exhausted: {0}")]
    ExhaustedId(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
