//! Periodic read-decide-write cycle for one device on a shared bus.
//!
//! Each cycle reads the configured registers through the [`SharedTransport`], hands
//! them to a [`Rule`] and writes back whatever the rule asks for that differs from
//! what the device reported. A failed cycle leaves the poller's state untouched and
//! is reported rather than retried; the next attempt happens at the regular interval.

use core::time::Duration;
use std::collections::BTreeMap;
use std::sync::mpsc::Sender;

use log::{debug, info, warn};
use snafu::{ResultExt, Snafu};

use crate::executor::Executor;
use crate::transport::{self, ModbusBus, SharedTransport};
use crate::types::{RegisterAddress, RegisterRange, SlaveId};

/// Interval between cycles unless configured otherwise.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Register values by address.
pub type RegisterMap = BTreeMap<RegisterAddress, u16>;

/// Error type for a poll cycle
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Reading the device failed.
    #[snafu(display("Polling slave {} failed: {}", slave, source))]
    Request {
        slave: SlaveId,
        source: transport::Error,
    },
    /// Writing the rule's result to the device failed.
    #[snafu(display("Updating slave {} failed: {}", slave, source))]
    Reply {
        slave: SlaveId,
        source: transport::Error,
    },
}

impl Error {
    pub fn slave(&self) -> SlaveId {
        match self {
            Self::Request { slave, .. } | Self::Reply { slave, .. } => *slave,
        }
    }

    /// The underlying bus error.
    pub fn transport_error(&self) -> &transport::Error {
        match self {
            Self::Request { source, .. } | Self::Reply { source, .. } => source,
        }
    }
}

/// Outcome of a successful cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollResult {
    /// True if any register was written.
    pub changed: bool,
    /// Holding register values as left on the device.
    pub values: RegisterMap,
    /// Input register values, if any are configured.
    pub inputs: RegisterMap,
}

/// Registers a rule gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct Readings<'a> {
    pub holding: &'a RegisterMap,
    pub inputs: &'a RegisterMap,
}

/// Business logic of a device: decides which holding registers should have which
/// values.
pub trait Rule {
    /// Return the desired holding register values. Registers left out are not
    /// touched, registers already at the desired value are not written.
    fn apply(&mut self, readings: Readings<'_>) -> RegisterMap;
}

impl<F> Rule for F
where
    F: FnMut(Readings<'_>) -> RegisterMap,
{
    fn apply(&mut self, readings: Readings<'_>) -> RegisterMap {
        self(readings)
    }
}

/// What to poll and how often.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    pub slave: SlaveId,
    /// Holding registers read every cycle.
    pub registers: RegisterRange,
    /// Input registers read every cycle.
    pub inputs: Option<RegisterRange>,
    pub interval: Duration,
}

impl PollerConfig {
    pub fn new(slave: SlaveId, registers: RegisterRange) -> Self {
        Self {
            slave,
            registers,
            inputs: None,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_inputs(mut self, inputs: RegisterRange) -> Self {
        self.inputs = Some(inputs);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Polls one device through a shared transport.
pub struct DevicePoller<'t, B, R> {
    transport: &'t SharedTransport<B>,
    config: PollerConfig,
    rule: R,
    last: Option<PollResult>,
    errors: Option<Sender<Error>>,
    failures: u64,
}

impl<'t, B: ModbusBus, R: Rule> DevicePoller<'t, B, R> {
    pub fn new(transport: &'t SharedTransport<B>, config: PollerConfig, rule: R) -> Self {
        Self {
            transport,
            config,
            rule,
            last: None,
            errors: None,
            failures: 0,
        }
    }

    /// Report failed cycles on `errors` when running as an [`Executor`].
    pub fn with_error_channel(mut self, errors: Sender<Error>) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn slave(&self) -> SlaveId {
        self.config.slave
    }

    /// Result of the last successful cycle.
    pub fn last(&self) -> Option<&PollResult> {
        self.last.as_ref()
    }

    /// Number of failed cycles so far.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Run one cycle.
    ///
    /// # Errors
    /// [`Error::Request`] if the device couldn't be read, [`Error::Reply`] if the
    /// update couldn't be written. Either way the last result is kept.
    pub fn poll(&mut self) -> Result<PollResult, Error> {
        let slave = self.config.slave;
        let (mut values, inputs) = self.request().context(RequestSnafu { slave })?;

        let wanted = self.rule.apply(Readings {
            holding: &values,
            inputs: &inputs,
        });
        let writes: Vec<(RegisterAddress, u16)> = wanted
            .into_iter()
            .filter(|(address, value)| values.get(address) != Some(value))
            .collect();

        if !writes.is_empty() {
            self.transport
                .with_exclusive_access(slave, |bus| {
                    for &(address, value) in &writes {
                        bus.write_register(address, value)?;
                    }
                    Ok(())
                })
                .context(ReplySnafu { slave })?;
            for &(address, value) in &writes {
                info!("Slave {}: register {} set to {}", slave, address, value);
                values.insert(address, value);
            }
        }

        let result = PollResult {
            changed: !writes.is_empty(),
            values,
            inputs,
        };
        self.last = Some(result.clone());
        Ok(result)
    }

    fn request(&self) -> Result<(RegisterMap, RegisterMap), transport::Error> {
        let registers = self.config.registers;
        let holding = self
            .transport
            .with_exclusive_access(self.config.slave, |bus| {
                bus.read_holding_registers(registers)
            })?;
        let holding = registers.addresses().zip(holding).collect();

        let inputs = match self.config.inputs {
            Some(range) => {
                let inputs = self
                    .transport
                    .with_exclusive_access(self.config.slave, |bus| {
                        bus.read_input_registers(range)
                    })?;
                range.addresses().zip(inputs).collect()
            }
            None => RegisterMap::new(),
        };
        Ok((holding, inputs))
    }
}

impl<B: ModbusBus, R: Rule> Executor for DevicePoller<'_, B, R> {
    fn do_execute(&mut self) -> Duration {
        match self.poll() {
            Ok(result) => debug!("Slave {}: {:?}", self.config.slave, result.values),
            Err(err) => {
                self.failures += 1;
                warn!("{}", err);
                if let Some(errors) = &self.errors {
                    // the receiving side may have gone away, nothing to do then
                    let _ = errors.send(err);
                }
            }
        }
        self.config.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{registers, slave};
    use std::sync::mpsc;

    /// One device with eight holding and two input registers.
    #[derive(Default)]
    struct Device {
        holding: [u16; 8],
        writes: Vec<(RegisterAddress, u16)>,
        fail_reads: bool,
        fail_writes: bool,
    }

    fn io_error() -> transport::Error {
        std::io::Error::new(std::io::ErrorKind::Other, "line noise").into()
    }

    impl ModbusBus for Device {
        fn set_slave(&mut self, _: SlaveId) -> Result<(), transport::Error> {
            Ok(())
        }

        fn read_holding_registers(
            &mut self,
            range: RegisterRange,
        ) -> Result<Vec<u16>, transport::Error> {
            if self.fail_reads {
                return Err(io_error());
            }
            Ok(range
                .addresses()
                .map(|a| self.holding[usize::from(a)])
                .collect())
        }

        fn read_input_registers(
            &mut self,
            range: RegisterRange,
        ) -> Result<Vec<u16>, transport::Error> {
            Ok(range.addresses().map(|a| a + 100).collect())
        }

        fn write_register(
            &mut self,
            address: RegisterAddress,
            value: u16,
        ) -> Result<(), transport::Error> {
            if self.fail_writes {
                return Err(io_error());
            }
            self.holding[usize::from(address)] = value;
            self.writes.push((address, value));
            Ok(())
        }

        fn write_registers(
            &mut self,
            start: RegisterAddress,
            values: &[u16],
        ) -> Result<(), transport::Error> {
            for (address, value) in (start..).zip(values) {
                self.write_register(address, *value)?;
            }
            Ok(())
        }
    }

    fn connected(device: Device) -> SharedTransport<Device> {
        let transport = SharedTransport::with_settle_delay(device, Duration::from_millis(0));
        transport.connect().unwrap();
        transport
    }

    fn set(address: RegisterAddress, value: u16) -> impl FnMut(Readings<'_>) -> RegisterMap {
        move |_: Readings<'_>| {
            let mut map = RegisterMap::new();
            map.insert(address, value);
            map
        }
    }

    #[test]
    fn test_writes_only_differences() {
        let transport = connected(Device::default());
        let config = PollerConfig::new(slave(2), registers(0, 2));
        let mut poller = DevicePoller::new(&transport, config, set(0, 45));

        let first = poller.poll().unwrap();
        assert!(first.changed);
        assert_eq!(first.values.get(&0), Some(&45));
        assert_eq!(first.values.get(&1), Some(&0));

        let second = poller.poll().unwrap();
        assert!(!second.changed);
        assert_eq!(poller.last(), Some(&second));
        drop(poller);

        assert_eq!(transport.into_inner().writes, [(0, 45)]);
    }

    #[test]
    fn test_inputs_passed_to_rule() {
        let transport = connected(Device::default());
        let config = PollerConfig::new(slave(3), registers(0, 1)).with_inputs(registers(4, 2));
        let mut seen = Vec::new();
        let mut poller = DevicePoller::new(&transport, config, |readings: Readings<'_>| {
            seen.extend(readings.inputs.values().copied());
            RegisterMap::new()
        });
        let result = poller.poll().unwrap();
        assert!(!result.changed);
        assert_eq!(result.inputs.get(&5), Some(&105));
        drop(poller);
        assert_eq!(seen, [104, 105]);
    }

    #[test]
    fn test_request_failure_keeps_state() {
        let transport = connected(Device::default());
        let mut poller = DevicePoller::new(
            &transport,
            PollerConfig::new(slave(2), registers(0, 1)),
            set(0, 1),
        );
        poller.poll().unwrap();
        transport.disconnect();

        let err = poller.poll().unwrap_err();
        assert!(matches!(err, Error::Request { .. }));
        assert!(err.transport_error().is_config());
        assert_eq!(poller.last().unwrap().values.get(&0), Some(&1));
    }

    #[test]
    fn test_reply_failure() {
        let transport = connected(Device {
            fail_writes: true,
            ..Device::default()
        });
        let mut poller = DevicePoller::new(
            &transport,
            PollerConfig::new(slave(2), registers(0, 1)),
            set(0, 15),
        );
        let err = poller.poll().unwrap_err();
        assert!(matches!(err, Error::Reply { .. }));
        assert_eq!(err.slave(), slave(2));
        assert!(poller.last().is_none());
    }

    #[test]
    fn test_soft_failure_reported() {
        let transport = connected(Device {
            fail_reads: true,
            ..Device::default()
        });
        let (tx, rx) = mpsc::channel();
        let interval = Duration::from_millis(250);
        let mut poller = DevicePoller::new(
            &transport,
            PollerConfig::new(slave(3), registers(0, 1)).with_interval(interval),
            set(0, 15),
        )
        .with_error_channel(tx);

        assert_eq!(poller.do_execute(), interval);
        assert_eq!(poller.do_execute(), interval);
        assert_eq!(poller.failures(), 2);
        let errors: Vec<_> = rx.try_iter().collect();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.slave() == slave(3)));
    }
}
