use std::sync::atomic::AtomicI32;
use std::sync::Arc;

use nimbus_common::config::AppConfig;

use crate::application::Application;

pub struct WorkerOptions {
    pub controller_host: String,
    pub controller_port: u16,
    pub data_listen_host: String,
    /// The host other workers reach this worker's data plane at; reported
    /// to the controller in the handshake.
    pub data_external_host: String,
    /// 0 picks an ephemeral port.
    pub data_port: u16,
    pub task_slots: usize,
    pub finish_hint_capacity: usize,
    pub application: Arc<dyn Application>,
    /// Receives the status carried by the terminate command.
    pub exit_status: Arc<AtomicI32>,
}

impl WorkerOptions {
    pub fn new(
        config: &AppConfig,
        application: Arc<dyn Application>,
        exit_status: Arc<AtomicI32>,
    ) -> Self {
        Self {
            controller_host: config.cluster.controller_external_host.clone(),
            controller_port: config.cluster.controller_listen_port,
            data_listen_host: config.cluster.worker_listen_host.clone(),
            data_external_host: config.cluster.worker_external_host.clone(),
            data_port: config.cluster.worker_data_port,
            task_slots: config.cluster.task_slots,
            finish_hint_capacity: config.cluster.finish_hint_capacity,
            application,
            exit_status,
        }
    }
}
