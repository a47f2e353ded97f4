//! End-to-end cluster tests: a controller and real workers over
//! loopback sockets, exercising the full command and data planes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use nimbus_common::config::{AppConfig, ClusterConfig, DomainConfig};
use nimbus_common::id::{CheckpointId, IdSet, LogicalDataId, PartitionId, KERNEL_JOB_ID};
use nimbus_controller::job_graph::JobSpec;
use nimbus_controller::{start_controller, ControllerHandle, ControllerOptions};
use nimbus_server::actor::ActorSystem;
use nimbus_worker::data_map::{Access, DataHandle};
use nimbus_worker::{run_worker, Application};

fn test_config(worker_count: usize) -> AppConfig {
    AppConfig {
        cluster: ClusterConfig {
            controller_listen_host: "127.0.0.1".to_string(),
            controller_listen_port: 0,
            controller_external_host: "127.0.0.1".to_string(),
            worker_count,
            worker_listen_host: "127.0.0.1".to_string(),
            worker_external_host: "127.0.0.1".to_string(),
            worker_data_port: 0,
            task_slots: 2,
            assign_batch: 32,
            finish_hint_capacity: 256,
        },
        domain: DomainConfig {
            x: 0,
            y: 0,
            z: 0,
            dx: 100,
            dy: 100,
            dz: 100,
        },
    }
}

/// Test kernels: `produce` writes its params into every write handle,
/// `consume` checks its read handle matches its params, `slow` stalls.
#[derive(Default)]
struct TestApplication {
    log: Mutex<Vec<String>>,
}

impl TestApplication {
    fn executed(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl Application for TestApplication {
    fn execute(&self, name: &str, params: &[u8], data: &mut [DataHandle]) -> Result<(), String> {
        match name {
            "produce" => {
                for handle in data.iter() {
                    if handle.access == Access::Write {
                        handle.with(|b| b.bytes = params.to_vec());
                    }
                }
            }
            "consume" => {
                let read = data
                    .iter()
                    .find(|h| h.access == Access::Read)
                    .ok_or("consume has no read handle")?;
                let bytes = read.with(|b| b.bytes.clone());
                if bytes != params {
                    return Err(format!("expected {params:?}, found {bytes:?}"));
                }
            }
            "slow" => std::thread::sleep(Duration::from_millis(300)),
            _ => {}
        }
        self.log.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

async fn wait_port(controller: &ControllerHandle) -> u16 {
    loop {
        if let Some(port) = controller.listen_port().await.unwrap() {
            return port;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn spec(id: u64, name: &str, read: &[u64], write: &[u64], before: &[u64], params: &[u8]) -> JobSpec {
    JobSpec {
        id: id.into(),
        name: name.to_string(),
        read_set: read.iter().map(|&l| LogicalDataId(l)).collect(),
        write_set: write.iter().map(|&l| LogicalDataId(l)).collect(),
        before_set: before.iter().map(|&b| b.into()).collect(),
        after_set: IdSet::new(),
        parent: KERNEL_JOB_ID,
        params: Bytes::copy_from_slice(params),
        sterile: false,
        future_id: KERNEL_JOB_ID,
    }
}

async fn define(
    controller: &ControllerHandle,
    logical: u64,
    x: i64,
    y: i64,
) {
    let partition = PartitionId(logical);
    controller
        .register_partition(
            partition,
            nimbus_common::geometry::GeometricRegion::new(x, y, 0, 10, 10, 10),
        )
        .await
        .unwrap();
    controller
        .register_data(LogicalDataId(logical), format!("d{logical}"), partition)
        .await
        .unwrap();
    controller
        .define_data(KERNEL_JOB_ID, LogicalDataId(logical))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_single_worker_read_after_write() {
    let mut config = test_config(1);
    let mut system = ActorSystem::new();
    let controller = start_controller(&mut system, ControllerOptions::new(&config));
    config.cluster.controller_listen_port = wait_port(&controller).await;

    let application = Arc::new(TestApplication::default());
    let worker = {
        let config = config.clone();
        let application = application.clone();
        tokio::spawn(async move { run_worker(&config, application).await.unwrap() })
    };

    define(&controller, 1, 0, 0).await;
    controller
        .spawn_job(spec(1, "produce", &[], &[1], &[], b"phi-v1"))
        .await
        .unwrap();
    controller
        .spawn_job(spec(2, "consume", &[1], &[], &[1], b"phi-v1"))
        .await
        .unwrap();

    controller.wait_jobs_done().await.unwrap();
    assert_eq!(application.executed(), vec!["produce", "consume"]);

    controller.terminate(0).await.unwrap();
    assert_eq!(worker.await.unwrap(), 0);
    controller.wait_for_stop().await;
    system.join().await;
}

#[tokio::test]
async fn test_remote_copy_moves_data_between_workers() {
    let mut config = test_config(2);
    let mut system = ActorSystem::new();
    let controller = start_controller(&mut system, ControllerOptions::new(&config));
    config.cluster.controller_listen_port = wait_port(&controller).await;

    let application = Arc::new(TestApplication::default());
    let workers: Vec<_> = (0..2)
        .map(|_| {
            let config = config.clone();
            let application = application.clone();
            tokio::spawn(async move { run_worker(&config, application).await.unwrap() })
        })
        .collect();

    // d1 sits in the low-y half of the domain, d2 and d3 in the high-y
    // half, so the producer and the consumer land on different workers.
    define(&controller, 1, 0, 0).await;
    define(&controller, 2, 0, 90).await;
    define(&controller, 3, 0, 80).await;

    controller
        .spawn_job(spec(1, "produce", &[], &[1], &[], b"pressure"))
        .await
        .unwrap();
    controller
        .spawn_job(spec(2, "consume", &[1], &[2, 3], &[1], b"pressure"))
        .await
        .unwrap();

    controller.wait_jobs_done().await.unwrap();
    assert_eq!(application.executed(), vec!["produce", "consume"]);

    controller.terminate(0).await.unwrap();
    for worker in workers {
        assert_eq!(worker.await.unwrap(), 0);
    }
    controller.wait_for_stop().await;
    system.join().await;
}

#[tokio::test]
async fn test_prepare_rewind_drains_running_jobs() {
    let mut config = test_config(1);
    let mut system = ActorSystem::new();
    let controller = start_controller(&mut system, ControllerOptions::new(&config));
    config.cluster.controller_listen_port = wait_port(&controller).await;

    let application = Arc::new(TestApplication::default());
    let worker = {
        let config = config.clone();
        let application = application.clone();
        tokio::spawn(async move { run_worker(&config, application).await.unwrap() })
    };

    define(&controller, 1, 0, 0).await;
    controller
        .spawn_job(spec(1, "slow", &[], &[1], &[], b""))
        .await
        .unwrap();
    // Let the job reach the worker and start running, then quiesce.
    tokio::time::sleep(Duration::from_millis(100)).await;
    controller.prepare_rewind(CheckpointId(7)).await.unwrap();

    // The drain must have let the running job finish.
    assert_eq!(application.executed(), vec!["slow"]);

    controller.terminate(0).await.unwrap();
    assert_eq!(worker.await.unwrap(), 0);
    controller.wait_for_stop().await;
    system.join().await;
}
