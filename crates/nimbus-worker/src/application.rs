//! The seam to user code. The runtime dispatches on the job variant; only
//! application-compute jobs reach the `Application` implementation, with
//! their acquired data handles in read, reduce, write, scratch order.

use crate::data_map::DataHandle;

pub trait Application: Send + Sync + 'static {
    /// Runs the job body registered under `name`. The runtime has already
    /// acquired every handle in `data` with the declared access mode.
    fn execute(&self, name: &str, params: &[u8], data: &mut [DataHandle]) -> Result<(), String>;
}

/// An application with no kernels; every compute job is a no-op. Used by
/// plumbing tests and the bare CLI worker.
pub struct NoopApplication;

impl Application for NoopApplication {
    fn execute(&self, _name: &str, _params: &[u8], _data: &mut [DataHandle]) -> Result<(), String> {
        Ok(())
    }
}
