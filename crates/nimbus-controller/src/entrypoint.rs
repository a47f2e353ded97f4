use nimbus_common::config::AppConfig;
use nimbus_server::actor::ActorSystem;

use crate::actor::ControllerActor;
use crate::handle::ControllerHandle;
use crate::options::ControllerOptions;

/// Spawns the controller actor into `system` and returns the handle the
/// application drives.
pub fn start_controller(system: &mut ActorSystem, options: ControllerOptions) -> ControllerHandle {
    ControllerHandle::new(system.spawn::<ControllerActor>(options))
}

/// Runs a standalone controller until it terminates.
pub async fn run_controller(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut system = ActorSystem::new();
    let options = ControllerOptions::new(config);
    let _handle = start_controller(&mut system, options);
    system.join().await;
    Ok(())
}
