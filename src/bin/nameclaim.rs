//! nameclaim: hold a well-known bus name for a fixed period
//!
//! ## Configuration
//! - NAMECLAIM_CONFIG: Path to a YAML config file (optional)
//! - NAMECLAIM__SERVICE__NAME: Name to claim (default: com.example.testservice1)
//! - NAMECLAIM__SERVICE__HOLD_MS: Hold period in milliseconds (default: 10000)
//! - NAMECLAIM__BUS__TYPE: system, session or in_process (default: system)
//! - NAMECLAIM_LOG: tracing filter (default: info)
//!
//! Exit codes: 0 after a normal hold and release, 1 when the bus is
//! unreachable, 2 when another instance owns the name.

use std::process::ExitCode;

use tracing::{error, info};

use nameclaim::bus;
use nameclaim::config::Config;
use nameclaim::process::{HostOutcome, ServiceHost};
use nameclaim::utils::bootstrap::{init_tracing, termination_signal};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None)?;
    let identifier = config.service.identifier()?;

    info!(
        name = %identifier,
        hold_ms = config.service.hold_ms,
        bus_type = %config.bus.bus_type,
        "nameclaim starting"
    );

    let bus = match bus::connect(&config.bus).await {
        Ok(bus) => bus,
        Err(e) => {
            error!(error = %e, "Failed to connect to bus");
            return Ok(ExitCode::from(HostOutcome::ConnectionFailed.exit_code()));
        }
    };

    let host = ServiceHost::new(identifier, bus, config.service.hold());
    let outcome = host.run_until(termination_signal()).await;

    info!(outcome = ?outcome, "nameclaim exiting");
    Ok(ExitCode::from(outcome.exit_code()))
}
