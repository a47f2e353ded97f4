use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;
use nimbus_common::config::AppConfig;
use nimbus_worker::NoopApplication;

#[derive(Parser)]
#[command(name = "nimbus", version, about = "Nimbus distributed dataflow runtime")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller and wait for workers.
    Controller,
    /// Run a worker and connect to the controller.
    Worker,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[tokio::main]
async fn main() {
    init_logger();
    let cli = Cli::parse();
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let out = match cli.command {
        Commands::Controller => nimbus_controller::entrypoint::run_controller(&config)
            .await
            .map(|()| 0),
        Commands::Worker => {
            nimbus_worker::run_worker(&config, Arc::new(NoopApplication)).await
        }
    };
    match out {
        Ok(status) => {
            info!("exiting with status {status}");
            std::process::exit(status);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
