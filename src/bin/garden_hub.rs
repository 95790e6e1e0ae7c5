//! Drives the garden bed and garden shed controllers over one RS-485 line.
//!
//! Usage: `garden_hub [serial device]`, logging is controlled with `RUST_LOG`.

use std::sync::atomic::AtomicBool;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Timelike;
use log::{error, info};

use gardener::executor;
use gardener::poller::{self, DevicePoller, PollerConfig, Readings, RegisterMap};
use gardener::{registers, slave, RegisterAddress, RtuBus, SerialConfig, SharedTransport, SlaveId};

const GARDEN_BED: SlaveId = slave(2);
const GARDEN_SHED: SlaveId = slave(3);

/// Light intensity register, percent.
const LIGHT_COMMAND: RegisterAddress = 0;
/// Number of input registers the shed mirrors from its charge controller.
const SHED_INPUT_REGISTERS: u16 = 21;

const BED_LIGHT_ON: u16 = 45;
const BED_LIGHT_OFF: u16 = 0;
const SHED_LIGHT_ON: u16 = 15;

/// Hours of the day, local time, during which the bed lights are on.
const BED_LIGHT_HOURS: std::ops::Range<u32> = 20..22;

fn light(value: u16) -> RegisterMap {
    let mut wanted = RegisterMap::new();
    wanted.insert(LIGHT_COMMAND, value);
    wanted
}

fn bed_rule(_: Readings<'_>) -> RegisterMap {
    if BED_LIGHT_HOURS.contains(&chrono::Local::now().hour()) {
        light(BED_LIGHT_ON)
    } else {
        light(BED_LIGHT_OFF)
    }
}

fn shed_rule(readings: Readings<'_>) -> RegisterMap {
    log::debug!("Shed charge controller: {:?}", readings.inputs);
    light(SHED_LIGHT_ON)
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args();
    args.next(); // Skip program name
    let port = args.next().unwrap_or_else(|| "/dev/ttySC0".to_string());

    let bus = RtuBus::open(&SerialConfig::modbus_rtu(&port))
        .with_context(|| format!("Failed to open {}", port))?;
    let transport = SharedTransport::new(bus);
    transport.connect().context("Failed to connect the bus")?;
    info!("Garden hub running on {}", port);

    let stop = AtomicBool::new(false);
    let (errors, failures) = mpsc::channel::<poller::Error>();

    thread::scope(|scope| {
        let mut bed = DevicePoller::new(
            &transport,
            PollerConfig::new(GARDEN_BED, registers(LIGHT_COMMAND, 1))
                .with_interval(Duration::from_secs(5)),
            bed_rule,
        )
        .with_error_channel(errors.clone());
        let mut shed = DevicePoller::new(
            &transport,
            PollerConfig::new(GARDEN_SHED, registers(LIGHT_COMMAND, 1))
                .with_inputs(registers(0, SHED_INPUT_REGISTERS))
                .with_interval(Duration::from_millis(500)),
            shed_rule,
        )
        .with_error_channel(errors);

        let stop = &stop;
        scope.spawn(move || executor::run(&mut bed, stop));
        scope.spawn(move || executor::run(&mut shed, stop));

        // Ends once both pollers, and with them all senders, are gone.
        for failure in failures {
            if failure.transport_error().is_config() {
                error!("Slave {} can't be reached: {}", failure.slave(), failure);
            }
        }
    });

    transport.disconnect();
    Ok(())
}
