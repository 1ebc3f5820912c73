//! kilnd - the RMCP+ management daemon.
//!
//! Flag parsing belongs to the service manager environment; the only knob
//! is the configuration path, taken from the first argument or
//! `KILND_CONFIG`, with built-in defaults when neither is set.

use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use kiln_server::{DaemonConfig, Server};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("KILND_CONFIG").ok())
        .map(PathBuf::from);

    let config = match config_path {
        Some(path) => match DaemonConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!(error = %err, "cannot load configuration");
                return ExitCode::FAILURE;
            }
        },
        None => DaemonConfig::default(),
    };

    let mut server = match Server::new(&config) {
        Ok(server) => server,
        Err(err) => {
            tracing::error!(error = %err, "daemon startup failed");
            return ExitCode::FAILURE;
        }
    };

    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "event loop failed");
            ExitCode::FAILURE
        }
    }
}
