use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};
use crate::geometry::GeometricRegion;

const DEFAULT_CONFIG: &str = include_str!("default.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub cluster: ClusterConfig,
    pub domain: DomainConfig,
}

impl AppConfig {
    /// Loads the embedded defaults merged with `NIMBUS_`-prefixed
    /// environment variables (`NIMBUS_CLUSTER__WORKER_COUNT=4` and so on).
    pub fn load() -> CommonResult<Self> {
        Figment::from(Toml::string(DEFAULT_CONFIG))
            .merge(Env::prefixed("NIMBUS_").map(|p| p.as_str().replace("__", ".").into()))
            .extract()
            .map_err(|e| CommonError::InvalidArgument(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub controller_listen_host: String,
    pub controller_listen_port: u16,
    pub controller_external_host: String,
    /// The number of workers the controller waits for before scheduling.
    pub worker_count: usize,
    pub worker_listen_host: String,
    pub worker_external_host: String,
    /// The data-exchange listen port on each worker; 0 picks an ephemeral
    /// port that the handshake reports back to the controller.
    pub worker_data_port: u16,
    /// Execution-pool parallelism on each worker.
    pub task_slots: usize,
    /// Upper bound on jobs assigned per controller scheduling pass.
    pub assign_batch: usize,
    /// Capacity of the worker's finished-job hint set.
    pub finish_hint_capacity: usize,
}

/// The global geometric domain that logical data objects tile. The worker
/// selector subdivides this box into one cell per worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    pub x: i64,
    pub y: i64,
    pub z: i64,
    pub dx: i64,
    pub dy: i64,
    pub dz: i64,
}

impl DomainConfig {
    pub fn region(&self) -> GeometricRegion {
        GeometricRegion::new(self.x, self.y, self.z, self.dx, self.dy, self.dz)
    }
}
