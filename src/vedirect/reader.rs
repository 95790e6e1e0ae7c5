//! Feeds a [`VictronParser`] from a serial stream.

use core::time::Duration;
use std::io::{self, Read};

use log::{trace, warn};
use serialport::SerialPort;

use super::{FrameHandler, ParserStats, VictronParser};
use crate::executor::Executor;
use crate::serial::{self, SerialConfig};

/// How long the reader waits between reads. At 19200 baud this is well below the
/// time needed to fill the receive buffer.
pub const READ_INTERVAL: Duration = Duration::from_millis(250);

/// Bytes read per pass.
const READ_CHUNK: usize = 256;
/// Upper bound of reads per pass, so a chatty line can't monopolize the thread.
const MAX_READS: usize = 16;

/// Reads a VE.Direct line and parses everything received.
#[derive(Debug)]
pub struct VictronReader<R, H> {
    port: R,
    parser: VictronParser<H>,
    interval: Duration,
}

impl<H: FrameHandler> VictronReader<Box<dyn SerialPort>, H> {
    /// Open the charge controller port described by `config`.
    pub fn open(config: &SerialConfig, handler: H) -> Result<Self, serial::Error> {
        Ok(Self::new(config.open()?, handler))
    }
}

impl<R: Read, H: FrameHandler> VictronReader<R, H> {
    pub fn new(port: R, handler: H) -> Self {
        Self {
            port,
            parser: VictronParser::new(handler),
            interval: READ_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Read and parse what the port has buffered.
    ///
    /// Returns the number of bytes consumed. A read timeout only means there is
    /// nothing more to read.
    ///
    /// # Errors
    /// Any other I/O error from the port.
    pub fn read_available(&mut self) -> io::Result<usize> {
        let mut buf = [0u8; READ_CHUNK];
        let mut total = 0;
        for _ in 0..MAX_READS {
            match self.port.read(&mut buf) {
                Ok(0) => break,
                Ok(len) => {
                    trace!("Read {} bytes", len);
                    self.parser.parse(&buf[..len]);
                    total += len;
                    if len < buf.len() {
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err)
                    if err.kind() == io::ErrorKind::TimedOut
                        || err.kind() == io::ErrorKind::WouldBlock =>
                {
                    break
                }
                Err(err) => return Err(err),
            }
        }
        Ok(total)
    }

    pub fn stats(&self) -> ParserStats {
        self.parser.stats()
    }

    pub fn parser(&self) -> &VictronParser<H> {
        &self.parser
    }

    pub fn parser_mut(&mut self) -> &mut VictronParser<H> {
        &mut self.parser
    }

    pub fn into_parts(self) -> (R, VictronParser<H>) {
        (self.port, self.parser)
    }
}

impl<R: Read, H: FrameHandler> Executor for VictronReader<R, H> {
    fn do_execute(&mut self) -> Duration {
        if let Err(err) = self.read_available() {
            warn!("VE.Direct read failed: {}", err);
            // whatever was in flight is lost
            self.parser.reset();
        }
        self.interval
    }
}
