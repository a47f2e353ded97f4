pub mod codec;
pub mod command;
pub mod error;
pub mod exchange;
pub mod transport;

pub use command::Command;
pub use error::{ProtoError, ProtoResult};
pub use exchange::DataFrame;
