pub mod actor;
pub mod monitor;
