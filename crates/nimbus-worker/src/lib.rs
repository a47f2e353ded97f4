pub mod application;
pub mod data_map;
pub mod error;
pub mod executor;
pub mod graph;
pub mod job;

mod actor;
mod event;
mod exchanger;
mod options;

pub mod entrypoint;

pub use application::{Application, NoopApplication};
pub use entrypoint::run_worker;
pub use options::WorkerOptions;
