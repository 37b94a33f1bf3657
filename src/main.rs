//! fakelink: a fake server peer for poking at a line-protocol uplink
//!
//! Connects to an uplink as a server link, sends the registration
//! handshake, then lets the operator type raw protocol lines:
//! - Lines typed on stdin are sent verbatim
//! - Lines from the uplink are echoed to stdout
//! - Keepalive probes (`PING`) are answered automatically
//!
//! Configuration via CLI arguments or TOML file.

mod config;
mod console;
mod input;
mod protocol;
mod runtime;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging on stderr; stdout carries the traffic echo
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        name = %config.identity.name,
        uplink = %config.identity.uplink,
        port = config.port,
        protocol = %config.protocol,
        echo = config.echo,
        "Starting fakelink"
    );

    runtime::run(config)?;
    Ok(())
}
