//! Gardener: telemetry and control plumbing for a small solar powered garden.
//!
//! The crate has two halves.
//!
//! [`vedirect`] parses the VE.Direct text protocol of a Victron charge controller.
//! It is sans-io: bytes go in through [`VictronParser::parse`], validated frames of
//! typed [`Field`]s come out through a [`FrameHandler`]. [`VictronReader`] connects
//! it to a serial port.
//!
//! [`transport`] and [`poller`] drive Modbus RTU devices sharing a single RS-485
//! line. [`SharedTransport`] hands out exclusive, settle-delayed access to the bus,
//! and each [`DevicePoller`] polls one device and applies its rule.
//!
//! Both kinds of task implement [`Executor`] and are scheduled cooperatively, see
//! [`executor`].
//!
//! ## Example
//! ```
//! use gardener::{Telemetry, VictronParser};
//!
//! let mut parser = VictronParser::new(Telemetry::new());
//! parser.parse(b"\r\nV\t12800\r\nChecksum\t\x3c\r\n");
//! assert_eq!(parser.handler().voltage, Some(12800));
//! ```

pub mod executor;
pub mod field;
mod nom_parser;
pub mod poller;
pub mod rtu;
pub mod serial;
pub mod telemetry;
pub mod transport;
pub mod types;
pub mod vedirect;

pub use executor::{Executor, Schedule};
pub use field::{Field, FieldId, FieldKind, FieldValue};
pub use poller::{DevicePoller, PollResult, PollerConfig, Readings, RegisterMap, Rule};
pub use rtu::RtuBus;
pub use serial::SerialConfig;
pub use telemetry::Telemetry;
pub use transport::{ModbusBus, SharedTransport};
pub use types::{registers, slave, IntoSlaveId, RegisterAddress, RegisterRange, SlaveId};
pub use vedirect::{Frame, FrameHandler, ParserStats, VictronParser, VictronReader};
