#![allow(dead_code)]

use std::cell::RefCell;
use std::cmp::min;
use std::collections::{HashMap, VecDeque};
use std::io::{Error, ErrorKind, Read, Write};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rmodbus::server::context::ModbusContext;
use rmodbus::server::storage::ModbusStorageSmall;
use rmodbus::server::ModbusFrame;
use rmodbus::ModbusProto;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Output of a charge controller, one block.
pub const FIXTURE: &[u8] = b"\r\nPID\t0xA053\r\nFW\t159\r\nSER#\tHQ21094NFGX\r\nV\t22930\r\nI\t-50\r\nVPV\t41200\r\nPPV\t8\r\nCS\t3\r\nMPPT\t2\r\nOR\t0x00000000\r\nERR\t0\r\nLOAD\tON\r\nIL\t400\r\nH19\t2679\r\nH20\t1\r\nH21\t14\r\nH22\t18\r\nH23\t79\r\nHSDS\t297\r\nChecksum\t\t\r\n";

/// Build a block from `fields`, ending with a correct checksum byte.
/// The checksum byte completes the block, whatever its value.
pub fn block(fields: &[(&str, &str)]) -> Vec<u8> {
    let mut data = Vec::new();
    for (label, value) in fields {
        data.extend_from_slice(b"\r\n");
        data.extend_from_slice(label.as_bytes());
        data.push(b'\t');
        data.extend_from_slice(value.as_bytes());
    }
    data.extend_from_slice(b"\r\nChecksum\t");
    let sum = data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    data.push(0u8.wrapping_sub(sum));
    data
}

/// In-memory serial port. Reads hand out at most `chunk` bytes and time out
/// once everything has been read.
pub struct SerialInterface {
    rx: Vec<u8>,
    rx_pos: usize,
    chunk: usize,
    tx: Vec<u8>,
    do_read_error: bool,
}

pub struct SerialIOPlane(Rc<RefCell<SerialInterface>>);

impl SerialIOPlane {
    pub fn new(serial_if: &Rc<RefCell<SerialInterface>>) -> SerialIOPlane {
        SerialIOPlane(serial_if.clone())
    }
}

impl SerialInterface {
    pub fn new(rx: &[u8], chunk: usize) -> Rc<RefCell<SerialInterface>> {
        Rc::new(RefCell::new(SerialInterface {
            rx: rx.to_vec(),
            rx_pos: 0,
            chunk,
            tx: Vec::new(),
            do_read_error: false,
        }))
    }

    pub fn push_rx(&mut self, data: &[u8]) {
        self.rx.extend_from_slice(data);
    }

    pub fn trigger_read_error(&mut self) {
        self.do_read_error = true;
    }

    pub fn tx(&self) -> &[u8] {
        &self.tx
    }
}

impl Read for SerialIOPlane {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut inner = self.0.borrow_mut();
        if inner.do_read_error {
            inner.do_read_error = false;
            return Err(Error::new(ErrorKind::BrokenPipe, "simulated read error"));
        }
        if inner.rx_pos == inner.rx.len() {
            return Err(Error::new(ErrorKind::TimedOut, "no data"));
        }
        let old_pos = inner.rx_pos;
        inner.rx_pos = min(old_pos + min(buf.len(), inner.chunk), inner.rx.len());
        let len = inner.rx_pos - old_pos;
        buf[..len].copy_from_slice(&inner.rx[old_pos..inner.rx_pos]);
        Ok(len)
    }
}

impl Write for SerialIOPlane {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().tx.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// What happened on the simulated line.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Event {
    Request { unit: u8, at: Instant },
    Reply { unit: u8, at: Instant },
}

impl Event {
    pub fn unit(&self) -> u8 {
        match *self {
            Event::Request { unit, .. } | Event::Reply { unit, .. } => unit,
        }
    }

    pub fn at(&self) -> Instant {
        match *self {
            Event::Request { at, .. } | Event::Reply { at, .. } => at,
        }
    }
}

#[derive(Default)]
struct LineState {
    devices: HashMap<u8, ModbusStorageSmall>,
    rx: VecDeque<u8>,
    /// Unit whose reply is still on the line.
    replying: Option<u8>,
    events: Vec<Event>,
    /// Requests sent while a reply was still pending.
    collisions: usize,
}

/// RS-485 line with Modbus RTU devices attached.
///
/// Every written buffer is taken as one request frame. The addressed device answers
/// through the read side; a request to a unit that isn't attached goes unanswered
/// and the next read times out.
#[derive(Clone, Default)]
pub struct ModbusLine {
    state: Arc<Mutex<LineState>>,
    latency: Duration,
}

impl ModbusLine {
    pub fn new() -> Self {
        Default::default()
    }

    /// Time spent on the wire by every request.
    pub fn with_latency(latency: Duration) -> Self {
        ModbusLine {
            latency,
            ..Default::default()
        }
    }

    pub fn add_device(&self, unit: u8) {
        self.state
            .lock()
            .unwrap()
            .devices
            .insert(unit, ModbusStorageSmall::new());
    }

    pub fn set_holding(&self, unit: u8, reg: u16, value: u16) {
        let mut state = self.state.lock().unwrap();
        let device = state.devices.get_mut(&unit).expect("no such device");
        device.set_holding(reg, value).unwrap();
    }

    pub fn holding(&self, unit: u8, reg: u16) -> u16 {
        let state = self.state.lock().unwrap();
        state.devices[&unit].get_holding(reg).unwrap()
    }

    pub fn set_input(&self, unit: u8, reg: u16, value: u16) {
        let mut state = self.state.lock().unwrap();
        let device = state.devices.get_mut(&unit).expect("no such device");
        device.set_input(reg, value).unwrap();
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn requests_to(&self, unit: u8) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Request { unit: u, .. } if *u == unit))
            .count()
    }

    pub fn collisions(&self) -> usize {
        self.state.lock().unwrap().collisions
    }
}

impl Write for ModbusLine {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::thread::sleep(self.latency);
        let mut state = self.state.lock().unwrap();
        if state.replying.is_some() || !state.rx.is_empty() {
            state.collisions += 1;
            state.rx.clear();
            state.replying = None;
        }
        let unit = buf.first().copied().unwrap_or_default();
        state.events.push(Event::Request {
            unit,
            at: Instant::now(),
        });

        let mut response: Vec<u8> = Vec::new();
        if let Some(device) = state.devices.get_mut(&unit) {
            let mut frame = ModbusFrame::new(unit, buf, ModbusProto::Rtu, &mut response);
            if frame.parse().is_ok() {
                if frame.processing_required {
                    let _ = if frame.readonly {
                        frame.process_read(&*device)
                    } else {
                        frame.process_write(device)
                    };
                }
                if frame.response_required {
                    frame.finalize_response().unwrap();
                }
            }
        }
        if !response.is_empty() {
            state.rx.extend(response);
            state.replying = Some(unit);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Read for ModbusLine {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.rx.is_empty() {
            return Err(Error::new(ErrorKind::TimedOut, "no reply"));
        }
        let len = min(buf.len(), state.rx.len());
        for (dst, src) in buf.iter_mut().zip(state.rx.drain(..len)) {
            *dst = src;
        }
        if state.rx.is_empty() {
            if let Some(unit) = state.replying.take() {
                state.events.push(Event::Reply {
                    unit,
                    at: Instant::now(),
                });
            }
        }
        Ok(len)
    }
}
