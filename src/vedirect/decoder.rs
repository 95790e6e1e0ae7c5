//! Turns entries into typed fields and collects them into checksummed frames.

use arrayvec::ArrayVec;
use log::{debug, trace};

use super::parser::Entry;
use super::ParserStats;
use crate::field::{label, Field, FieldId, FieldKind, FieldValue};
use crate::nom_parser::{decimal_i16, decimal_i32, decimal_i8};

/// Maximum number of fields in a single checksummed block.
pub const MAX_FIELDS_COUNT: usize = 22;

/// The fields of one block, in arrival order.
pub type Frame = ArrayVec<Field, MAX_FIELDS_COUNT>;

/// What to do once an entry has been decoded.
#[derive(Debug)]
pub(crate) enum Flush {
    /// Keep collecting.
    Pending,
    /// The block checksum matched, hand the frame to the consumer.
    Dispatch(Frame),
    /// The block was rejected.
    Discard,
}

#[derive(Debug, Default)]
pub(crate) struct FieldDecoder {
    batch: Frame,
    /// Set when the batch overflowed; the rest of the block is ignored.
    desynced: bool,
}

impl FieldDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn process_entry(&mut self, entry: &Entry<'_>, stats: &mut ParserStats) -> Flush {
        if entry.label == label::CHECKSUM {
            return self.end_block(entry.checksum, stats);
        }

        let id = FieldId::from_label(entry.label);
        let value = match decode_value(id, entry.value, stats) {
            Some(value) => value,
            None => return Flush::Pending,
        };

        if self.desynced {
            trace!("Dropping {} while waiting for the end of an oversized block", id);
            return Flush::Pending;
        }
        if self.batch.is_full() {
            debug!("More than {} fields in one block, dropping it", MAX_FIELDS_COUNT);
            stats.overflows += 1;
            self.batch.clear();
            self.desynced = true;
            return Flush::Pending;
        }
        self.batch.push(Field::new(id, value));
        Flush::Pending
    }

    pub(crate) fn clear(&mut self) {
        self.batch.clear();
        self.desynced = false;
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.batch.len()
    }

    fn end_block(&mut self, checksum: u8, stats: &mut ParserStats) -> Flush {
        if self.desynced {
            self.clear();
            return Flush::Discard;
        }
        if checksum != 0 {
            debug!(
                "Checksum mismatch (sum {:#04x}), dropping {} fields",
                checksum,
                self.batch.len()
            );
            stats.checksum_errors += 1;
            self.clear();
            return Flush::Discard;
        }
        stats.frames += 1;
        Flush::Dispatch(core::mem::take(&mut self.batch))
    }
}

/// Decode the text of an entry according to its id.
///
/// Returns `None` for ids that aren't modelled. Numeric text that doesn't parse
/// decodes to zero and is counted in [`ParserStats::decode_errors`].
fn decode_value(id: FieldId, text: &[u8], stats: &mut ParserStats) -> Option<FieldValue> {
    let value = match id.kind() {
        FieldKind::Int32 => FieldValue::Int32(numeric(id, decimal_i32(text), stats)),
        FieldKind::Int16 => FieldValue::Int16(numeric(id, decimal_i16(text), stats)),
        FieldKind::Int8 => FieldValue::Int8(numeric(id, decimal_i8(text), stats)),
        FieldKind::Bool => FieldValue::Bool(text == b"ON"),
        FieldKind::Text => match core::str::from_utf8(text) {
            Ok(text) => FieldValue::Text(text.to_owned()),
            Err(_) => FieldValue::Bytes(text.to_vec()),
        },
        FieldKind::Ignored => return None,
    };
    Some(value)
}

fn numeric<T: Default>(id: FieldId, parsed: Option<T>, stats: &mut ParserStats) -> T {
    parsed.unwrap_or_else(|| {
        debug!("Unparseable value for {}, using 0", id);
        stats.decode_errors += 1;
        T::default()
    })
}
