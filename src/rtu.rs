//! [`ModbusBus`] over a serial stream speaking Modbus RTU.
//!
//! Frames are built and checked by `rmodbus`; this module only moves the bytes and
//! works out how long a reply is.

use std::io::{self, Read, Write};

use log::trace;
use rmodbus::client::ModbusRequest;
use rmodbus::{guess_response_frame_len, ErrorKind, ModbusProto};
use serialport::SerialPort;
use snafu::{OptionExt, ResultExt};

use crate::serial::{self, SerialConfig};
use crate::transport::{
    Error, ModbusBus, NoSlaveSelectedSnafu, ProtocolSnafu, TimeoutSnafu,
};
use crate::types::{RegisterAddress, RegisterRange, SlaveId};

/// Length of the shortest reply, an exception: unit, function, code and CRC.
const MIN_REPLY_LEN: usize = 5;

/// Modbus RTU client on a byte stream, usually a serial port.
#[derive(Debug)]
pub struct RtuBus<P> {
    port: P,
    unit: Option<SlaveId>,
}

impl RtuBus<Box<dyn SerialPort>> {
    /// Open the serial line described by `config`.
    pub fn open(config: &SerialConfig) -> Result<Self, serial::Error> {
        Ok(Self::new(config.open()?))
    }
}

impl<P: Read + Write> RtuBus<P> {
    pub fn new(port: P) -> Self {
        Self { port, unit: None }
    }

    pub fn into_inner(self) -> P {
        self.port
    }

    fn request(&self) -> Result<(SlaveId, ModbusRequest), Error> {
        let slave = self.unit.context(NoSlaveSelectedSnafu)?;
        Ok((slave, ModbusRequest::new(*slave, ModbusProto::Rtu)))
    }

    /// Send `frame` and return the checked reply.
    fn transact(
        &mut self,
        slave: SlaveId,
        request: &mut ModbusRequest,
        frame: &[u8],
    ) -> Result<Vec<u8>, Error> {
        trace!("-> {:02x?}", frame);
        self.port.write_all(frame)?;
        self.port.flush()?;

        let mut reply = vec![0; MIN_REPLY_LEN];
        self.receive(slave, &mut reply)?;
        let len = usize::from(
            guess_response_frame_len(&reply, ModbusProto::Rtu).context(ProtocolSnafu { slave })?,
        );
        if len > reply.len() {
            let received = reply.len();
            reply.resize(len, 0);
            self.receive(slave, &mut reply[received..])?;
        }
        reply.truncate(len);
        trace!("<- {:02x?}", reply);

        request.parse_ok(&reply).context(ProtocolSnafu { slave })?;
        Ok(reply)
    }

    fn receive(&mut self, slave: SlaveId, buf: &mut [u8]) -> Result<(), Error> {
        match self.port.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(err)
                if err.kind() == io::ErrorKind::TimedOut
                    || err.kind() == io::ErrorKind::UnexpectedEof =>
            {
                TimeoutSnafu { slave }.fail()
            }
            Err(err) => Err(err.into()),
        }
    }

    fn read_registers(
        &mut self,
        range: RegisterRange,
        generate: fn(&mut ModbusRequest, u16, u16, &mut Vec<u8>) -> Result<(), ErrorKind>,
    ) -> Result<Vec<u16>, Error> {
        let (slave, mut request) = self.request()?;
        let mut frame = Vec::new();
        generate(&mut request, range.start(), range.count(), &mut frame)
            .context(ProtocolSnafu { slave })?;
        let reply = self.transact(slave, &mut request, &frame)?;
        decode_registers(slave, &reply, range)
    }
}

/// Register values of a read reply: unit, function, byte count, data, CRC.
fn decode_registers(slave: SlaveId, reply: &[u8], range: RegisterRange) -> Result<Vec<u16>, Error> {
    let data = reply
        .get(3..reply.len().saturating_sub(2))
        .unwrap_or_default();
    if data.len() != 2 * usize::from(range.count()) {
        return Err(ErrorKind::FrameBroken).context(ProtocolSnafu { slave });
    }
    Ok(data
        .chunks_exact(2)
        .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
        .collect())
}

impl<P: Read + Write> ModbusBus for RtuBus<P> {
    fn set_slave(&mut self, slave: SlaveId) -> Result<(), Error> {
        self.unit = Some(slave);
        Ok(())
    }

    fn read_holding_registers(&mut self, range: RegisterRange) -> Result<Vec<u16>, Error> {
        self.read_registers(range, |request, start, count, frame| {
            request.generate_get_holdings(start, count, frame)
        })
    }

    fn read_input_registers(&mut self, range: RegisterRange) -> Result<Vec<u16>, Error> {
        self.read_registers(range, |request, start, count, frame| {
            request.generate_get_inputs(start, count, frame)
        })
    }

    fn write_register(&mut self, address: RegisterAddress, value: u16) -> Result<(), Error> {
        let (slave, mut request) = self.request()?;
        let mut frame = Vec::new();
        request
            .generate_set_holding(address, value, &mut frame)
            .context(ProtocolSnafu { slave })?;
        self.transact(slave, &mut request, &frame)?;
        Ok(())
    }

    fn write_registers(&mut self, start: RegisterAddress, values: &[u16]) -> Result<(), Error> {
        let (slave, mut request) = self.request()?;
        let mut frame = Vec::new();
        request
            .generate_set_holdings_bulk(start, values, &mut frame)
            .context(ProtocolSnafu { slave })?;
        self.transact(slave, &mut request, &frame)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{registers, slave};
    use std::io::Cursor;

    /// Replies from a canned byte string and records what was written.
    struct Wire {
        rx: Cursor<Vec<u8>>,
        tx: Vec<u8>,
    }

    impl Wire {
        fn replying(reply: &[u8]) -> Self {
            Self {
                rx: Cursor::new(reply.to_vec()),
                tx: Vec::new(),
            }
        }
    }

    impl Read for Wire {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.rx.read(buf)
        }
    }

    impl Write for Wire {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.tx.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn bus(reply: &[u8], id: u8) -> RtuBus<Wire> {
        let mut bus = RtuBus::new(Wire::replying(reply));
        bus.set_slave(slave(id)).unwrap();
        bus
    }

    #[test]
    fn test_read_holding() {
        let mut bus = bus(&[0x02, 0x03, 0x02, 0x00, 0x2d, 0x3c, 0x59], 2);
        assert_eq!(bus.read_holding_registers(registers(0, 1)).unwrap(), [45]);
        assert_eq!(
            bus.into_inner().tx,
            [0x02, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x39]
        );
    }

    #[test]
    fn test_read_input() {
        let mut bus = bus(&[0x03, 0x04, 0x04, 0x00, 0x01, 0x00, 0x02, 0x08, 0x45], 3);
        assert_eq!(bus.read_input_registers(registers(0, 2)).unwrap(), [1, 2]);
        assert_eq!(
            bus.into_inner().tx,
            [0x03, 0x04, 0x00, 0x00, 0x00, 0x02, 0x70, 0x29]
        );
    }

    #[test]
    fn test_write_register() {
        let echo = [0x02, 0x06, 0x00, 0x00, 0x00, 0x2d, 0x49, 0xe4];
        let mut bus = bus(&echo, 2);
        bus.write_register(0, 45).unwrap();
        assert_eq!(bus.into_inner().tx, echo);
    }

    #[test]
    fn test_exception_reply() {
        let mut bus = bus(&[0x02, 0x83, 0x02, 0x30, 0xf1], 2);
        let err = bus.read_holding_registers(registers(0, 1)).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert!(!err.is_config());
    }

    #[test]
    fn test_bad_crc() {
        let mut bus = bus(&[0x02, 0x03, 0x02, 0x00, 0x2d, 0x3c, 0x58], 2);
        assert!(matches!(
            bus.read_holding_registers(registers(0, 1)),
            Err(Error::Protocol { .. })
        ));
    }

    #[test]
    fn test_no_reply() {
        let mut bus = bus(&[], 2);
        let err = bus.write_register(0, 1).unwrap_err();
        assert!(matches!(err, Error::Timeout { slave: s } if s == slave(2)));
    }

    #[test]
    fn test_short_reply() {
        let mut bus = bus(&[0x02, 0x03, 0x02, 0x00, 0x2d], 2);
        assert!(matches!(
            bus.read_holding_registers(registers(0, 1)),
            Err(Error::Timeout { .. })
        ));
    }

    #[test]
    fn test_no_slave_selected() {
        let mut bus = RtuBus::new(Wire::replying(&[]));
        let err = bus.write_register(0, 1).unwrap_err();
        assert!(err.is_config());
        assert!(bus.into_inner().tx.is_empty());
    }
}
