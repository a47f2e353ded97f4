use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use nimbus_common::config::AppConfig;
use nimbus_server::actor::ActorSystem;

use crate::actor::WorkerActor;
use crate::application::Application;
use crate::options::WorkerOptions;

/// Runs a worker until the controller terminates it or the session
/// fails. Returns the exit status carried by the terminate command.
pub async fn run_worker(
    config: &AppConfig,
    application: Arc<dyn Application>,
) -> Result<i32, Box<dyn std::error::Error>> {
    let exit_status = Arc::new(AtomicI32::new(0));
    let mut system = ActorSystem::new();
    let options = WorkerOptions::new(config, application, exit_status.clone());
    let handle = system.spawn::<WorkerActor>(options);
    handle.wait_for_stop().await;
    system.join().await;
    Ok(exit_status.load(Ordering::Relaxed))
}
