// veil-fabric: execution-fabric core entry point.

use std::process::ExitCode;
use std::sync::Arc;

use veil_fabric::config::Config;
use veil_fabric::runtime::{init_tracing, Runtime};
use veil_fabric::scheduler::{Service, Worker};

/// A demonstration service that logs a heartbeat until interrupted.
struct HeartbeatService;

impl Service for HeartbeatService {
    fn name(&self) -> &str {
        "heartbeat"
    }

    fn run(&self, worker: &Worker) {
        let mut tick = 0u64;
        while !worker.check_if_interrupted() {
            worker.check_pause();
            tracing::debug!(tick, "heartbeat");
            tick += 1;
            if !worker.sleep(1_000) {
                break;
            }
        }
        tracing::info!("heartbeat service exiting");
    }
}

fn main() -> ExitCode {
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match Runtime::with_default_algorithm(config) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = runtime.submit_service(Arc::new(HeartbeatService)) {
        eprintln!("failed to submit startup service: {e}");
        return ExitCode::FAILURE;
    }

    runtime.run();
    ExitCode::SUCCESS
}
