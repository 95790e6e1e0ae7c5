//! Logs the telemetry of a Victron charge controller.
//!
//! Usage: `vedirect_monitor [serial device]`, logging is controlled with `RUST_LOG`.

use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};
use log::info;

use gardener::executor;
use gardener::{Frame, SerialConfig, Telemetry, VictronReader};

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args();
    args.next(); // Skip program name
    let port = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());

    let mut telemetry = Telemetry::new();
    let mut reader = VictronReader::open(&SerialConfig::ve_direct(&port), |frame: Frame| {
        telemetry.apply_frame(&frame);
        info!(
            "battery {:?} mV {:?} mA, panel {:?} mV {:?} W, state {:?}, load {:?}",
            telemetry.voltage,
            telemetry.current,
            telemetry.panel_voltage,
            telemetry.panel_power,
            telemetry.operation_state,
            telemetry.load,
        );
    })
    .with_context(|| format!("Failed to open {}", port))?;

    let stop = AtomicBool::new(false);
    executor::run(&mut reader, &stop);
    Ok(())
}
