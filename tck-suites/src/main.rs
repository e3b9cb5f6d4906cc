//! Runs every conformance suite with the configuration from the environment
//!
//! Exit status: 0 when every selected test passed, 1 when any failed, 2 when
//! the configuration could not be read.

use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info};
use tck_harness::{Config, Runner};
use tracing_subscriber::EnvFilter;

const LOG_LEVEL_VAR: &str = "TCK_LOG";

/// Filter from `TCK_LOG` (env-filter syntax), `warn` when unset or malformed
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"))
}

fn init_logging() {
    // Harness records arrive through the `log` bridge.
    let installed = tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var(LOG_LEVEL_VAR).ok()))
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .try_init();
    if let Err(e) = installed {
        eprintln!("tck-runner: logging disabled: {}", e);
    }
}

fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("bad harness configuration: {}", e);
            eprintln!("tck-runner: {}", e);
            return ExitCode::from(2);
        }
    };
    info!("running with {:?}", config);

    let runner = tck_suites::all_suites()
        .into_iter()
        .fold(Runner::new(config), Runner::suite);
    let report = runner.run();
    println!("{}", report);

    if report.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
