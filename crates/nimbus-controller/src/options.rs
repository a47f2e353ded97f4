use nimbus_common::config::AppConfig;
use nimbus_common::geometry::GeometricRegion;

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub listen_host: String,
    pub listen_port: u16,
    /// The number of workers to wait for before scheduling starts.
    pub worker_count: usize,
    /// Upper bound on jobs assigned per scheduling pass.
    pub assign_batch: usize,
    pub domain: GeometricRegion,
}

impl ControllerOptions {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            listen_host: config.cluster.controller_listen_host.clone(),
            listen_port: config.cluster.controller_listen_port,
            worker_count: config.cluster.worker_count,
            assign_batch: config.cluster.assign_batch,
            domain: config.domain.region(),
        }
    }
}
