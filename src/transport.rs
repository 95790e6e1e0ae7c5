//! Exclusive access to a half-duplex bus shared by several devices.
//!
//! The bus itself is a black box implementing [`ModbusBus`]; frame encoding is left to
//! the implementation (see [`crate::rtu`]). [`SharedTransport`] serializes the
//! transactions of all users, re-addresses the bus when the target device changes and
//! keeps the line idle for a settle delay after every transaction, giving the RS-485
//! transceivers time to turn around.

use core::time::Duration;

use log::{info, trace};
use parking_lot::{Mutex, MutexGuard};
use snafu::{ensure, Snafu};

use crate::types::{RegisterAddress, RegisterRange, SlaveId};

/// Idle time enforced after each transaction before the bus is handed over.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Error type for bus transactions
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// The transport hasn't been connected, or was disconnected.
    #[snafu(display("Bus not connected"))]
    NotConnected,
    /// The bus couldn't be configured to talk to the device.
    #[snafu(display("Can't address slave {}: {}", slave, reason))]
    Addressing { slave: SlaveId, reason: String },
    /// A request was made before any slave was selected.
    #[snafu(display("No slave selected"))]
    NoSlaveSelected,
    #[snafu(display("Bus I/O error: {}", source))]
    Io { source: std::io::Error },
    /// The device didn't answer in time.
    #[snafu(display("Slave {} didn't respond", slave))]
    Timeout { slave: SlaveId },
    /// The reply was malformed or the device answered with an exception.
    #[snafu(display("Bad reply from slave {}: {}", slave, source))]
    Protocol {
        slave: SlaveId,
        source: rmodbus::ErrorKind,
    },
}

impl Error {
    /// True for errors caused by bus configuration rather than by the transaction.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Addressing { .. } | Self::NoSlaveSelected
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::Io { source }
    }
}

/// Register level primitives of a Modbus bus connection.
///
/// Requests go to the slave selected by the last successful [`set_slave`](Self::set_slave).
pub trait ModbusBus {
    /// Prepare the line for use.
    fn connect(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Release the line.
    fn disconnect(&mut self) {}

    /// Direct the following requests to `slave`.
    fn set_slave(&mut self, slave: SlaveId) -> Result<(), Error>;

    fn read_holding_registers(&mut self, range: RegisterRange) -> Result<Vec<u16>, Error>;

    fn read_input_registers(&mut self, range: RegisterRange) -> Result<Vec<u16>, Error>;

    fn write_register(&mut self, address: RegisterAddress, value: u16) -> Result<(), Error>;

    fn write_registers(&mut self, start: RegisterAddress, values: &[u16]) -> Result<(), Error>;
}

impl<B: ModbusBus + ?Sized> ModbusBus for Box<B> {
    fn connect(&mut self) -> Result<(), Error> {
        (**self).connect()
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn set_slave(&mut self, slave: SlaveId) -> Result<(), Error> {
        (**self).set_slave(slave)
    }

    fn read_holding_registers(&mut self, range: RegisterRange) -> Result<Vec<u16>, Error> {
        (**self).read_holding_registers(range)
    }

    fn read_input_registers(&mut self, range: RegisterRange) -> Result<Vec<u16>, Error> {
        (**self).read_input_registers(range)
    }

    fn write_register(&mut self, address: RegisterAddress, value: u16) -> Result<(), Error> {
        (**self).write_register(address, value)
    }

    fn write_registers(&mut self, start: RegisterAddress, values: &[u16]) -> Result<(), Error> {
        (**self).write_registers(start, values)
    }
}

#[derive(Debug)]
struct Session<B> {
    bus: B,
    /// Slave the bus is currently addressed to.
    slave: Option<SlaveId>,
    connected: bool,
}

/// A bus connection shared between threads.
///
/// ## Example
/// ```no_run
/// use gardener::{slave, registers, ModbusBus, RtuBus, SerialConfig, SharedTransport};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = RtuBus::open(&SerialConfig::modbus_rtu("/dev/ttySC0"))?;
/// let transport = SharedTransport::new(bus);
/// transport.connect()?;
/// let values = transport.with_exclusive_access(slave(2), |bus| {
///     bus.read_holding_registers(registers(0, 1))
/// })?;
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct SharedTransport<B> {
    session: Mutex<Session<B>>,
    settle_delay: Duration,
}

/// Holds the session lock, and keeps holding it for the settle delay once the
/// transaction is over.
struct Hold<'a, B> {
    session: MutexGuard<'a, Session<B>>,
    settle_delay: Duration,
}

impl<B> Drop for Hold<'_, B> {
    fn drop(&mut self) {
        std::thread::sleep(self.settle_delay);
    }
}

impl<B: ModbusBus> SharedTransport<B> {
    /// Wrap a bus, using [`DEFAULT_SETTLE_DELAY`].
    pub fn new(bus: B) -> Self {
        Self::with_settle_delay(bus, DEFAULT_SETTLE_DELAY)
    }

    pub fn with_settle_delay(bus: B, settle_delay: Duration) -> Self {
        Self {
            session: Mutex::new(Session {
                bus,
                slave: None,
                connected: false,
            }),
            settle_delay,
        }
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Open the bus for transactions.
    pub fn connect(&self) -> Result<(), Error> {
        let mut session = self.session.lock();
        if !session.connected {
            session.bus.connect()?;
            session.connected = true;
            session.slave = None;
            info!("Bus connected");
        }
        Ok(())
    }

    pub fn disconnect(&self) {
        let mut session = self.session.lock();
        if session.connected {
            session.bus.disconnect();
            session.connected = false;
            session.slave = None;
            info!("Bus disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.lock().connected
    }

    /// Run `operation` on the bus addressed to `slave`, with no other user of the
    /// transport active until it has returned and the settle delay has passed.
    ///
    /// # Errors
    /// Returns [`Error::NotConnected`] or [`Error::Addressing`] without running
    /// `operation` if the bus can't be used, otherwise the result of `operation`.
    pub fn with_exclusive_access<T, F>(&self, slave: SlaveId, operation: F) -> Result<T, Error>
    where
        F: FnOnce(&mut B) -> Result<T, Error>,
    {
        let mut hold = Hold {
            session: self.session.lock(),
            settle_delay: self.settle_delay,
        };
        let session = &mut *hold.session;
        ensure!(session.connected, NotConnectedSnafu);

        if session.slave != Some(slave) {
            trace!("Addressing slave {}", slave);
            if let Err(err) = session.bus.set_slave(slave) {
                session.slave = None;
                return Err(match err {
                    err if err.is_config() => err,
                    err => Error::Addressing {
                        slave,
                        reason: err.to_string(),
                    },
                });
            }
            session.slave = Some(slave);
        }
        operation(&mut session.bus)
    }

    /// Take the bus back. The transport must not be in use.
    pub fn into_inner(self) -> B {
        self.session.into_inner().bus
    }
}
