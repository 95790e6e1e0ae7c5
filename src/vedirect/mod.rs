//! VE.Direct text protocol parser.
//!
//! Victron charge controllers continuously send blocks of `label<TAB>value` lines,
//! each block terminated by a `Checksum` entry. The sum of all bytes in a block,
//! checksum byte included, is zero modulo 256. Async HEX messages starting with
//! `:` can be interleaved anywhere and are ignored.
//!
//! [`VictronParser`] accepts the stream in arbitrary chunks and hands every block
//! with a valid checksum to a [`FrameHandler`] as a [`Frame`] of typed fields.
//!
//! # Example
//!
//! ```
//! use gardener::vedirect::{Frame, VictronParser};
//!
//! let mut frames = Vec::new();
//! let mut parser = VictronParser::new(|frame: Frame| frames.push(frame));
//! parser.parse(b"\r\nV\t12800\r\nChecksum\t");
//! // the checksum byte completes the block
//! parser.parse(&[0x3c]);
//! assert_eq!(parser.stats().frames, 1);
//! drop(parser);
//! assert_eq!(frames[0][0].value().as_i32(), Some(12800));
//! ```

use log::{debug, warn};

mod decoder;
mod parser;
mod reader;

pub use decoder::{Frame, MAX_FIELDS_COUNT};
pub use parser::{MAX_FIELD_LENGTH, MAX_LABEL_LENGTH};
pub use reader::{VictronReader, READ_INTERVAL};

use decoder::{FieldDecoder, Flush};
use parser::{FrameParser, Step};

/// Consumer of validated frames.
pub trait FrameHandler {
    /// Called once per block with a valid checksum, fields in arrival order.
    fn handle_frame(&mut self, frame: Frame);
}

impl<F> FrameHandler for F
where
    F: FnMut(Frame),
{
    fn handle_frame(&mut self, frame: Frame) {
        self(frame)
    }
}

/// Counters kept by the parser, mostly useful for diagnosing a noisy line.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ParserStats {
    /// Blocks dispatched to the handler.
    pub frames: u64,
    /// Blocks dropped because the checksum didn't add up.
    pub checksum_errors: u64,
    /// Labels or values that exceeded their maximum length.
    pub framing_errors: u64,
    /// Blocks dropped because they held too many fields.
    pub overflows: u64,
    /// Numeric values that didn't parse and were decoded as zero.
    pub decode_errors: u64,
}

/// Streaming VE.Direct parser.
#[derive(Debug)]
pub struct VictronParser<H> {
    framer: FrameParser,
    decoder: FieldDecoder,
    handler: H,
    stats: ParserStats,
}

impl<H: FrameHandler> VictronParser<H> {
    /// Create a parser delivering frames to `handler`.
    pub fn new(handler: H) -> Self {
        Self {
            framer: FrameParser::new(),
            decoder: FieldDecoder::new(),
            handler,
            stats: ParserStats::default(),
        }
    }

    /// Feed received bytes to the parser.
    ///
    /// The data can be split anywhere, parser state is kept between calls.
    /// The handler is invoked synchronously for every completed frame.
    pub fn parse(&mut self, data: &[u8]) {
        for &byte in data {
            self.parse_byte(byte);
        }
    }

    fn parse_byte(&mut self, byte: u8) {
        let (flush, fold) = match self.framer.step(byte) {
            Step::Skip => return,
            Step::Fold => (None, true),
            Step::Overflow => {
                debug!("Label or value too long, waiting for the next line");
                self.stats.framing_errors += 1;
                (None, true)
            }
            Step::Entry(entry) => (
                Some(self.decoder.process_entry(&entry, &mut self.stats)),
                true,
            ),
            // the checksum byte closes its block, the next one starts from zero
            Step::Checksum(entry) => (
                Some(self.decoder.process_entry(&entry, &mut self.stats)),
                false,
            ),
        };

        match flush {
            Some(Flush::Dispatch(frame)) => {
                self.framer.reset_checksum();
                self.handler.handle_frame(frame);
            }
            Some(Flush::Discard) => {
                warn!("Dropped a VE.Direct block");
                self.framer.reset_checksum();
            }
            Some(Flush::Pending) | None => (),
        }
        if fold {
            self.framer.fold(byte);
        }
    }

    /// Discard any partial block and return to the initial state.
    /// The counters are kept.
    pub fn reset(&mut self) {
        self.framer.reset();
        self.decoder.clear();
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }
}
