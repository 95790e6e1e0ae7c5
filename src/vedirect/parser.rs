//! Byte level state machine splitting a VE.Direct stream into entries.

use arrayvec::ArrayVec;
use log::trace;

use crate::field::label;

/// Max length of a field label.
pub const MAX_LABEL_LENGTH: usize = 8;
/// Max length of a field value.
pub const MAX_FIELD_LENGTH: usize = 32;

/// Starts a new label.
pub(crate) const START: u8 = b'\n';
/// Ends a field value.
pub(crate) const END: u8 = b'\r';
/// Separates the label from the value.
pub(crate) const SPLIT: u8 = b'\t';
/// Starts an async (HEX protocol) message.
pub(crate) const ASYNC: u8 = b':';

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Mode {
    Idle,
    Label,
    Field,
    /// The next byte is the checksum value, whatever it is.
    Checksum,
    Async,
}

/// A complete `label<TAB>value<CR>` pair.
#[derive(Debug)]
pub(crate) struct Entry<'a> {
    pub label: &'a [u8],
    pub value: &'a [u8],
    /// Running checksum over everything before the terminating CR. For the
    /// checksum entry it includes the checksum byte itself.
    pub checksum: u8,
}

/// Result of feeding one byte to the [`FrameParser`].
#[derive(Debug)]
pub(crate) enum Step<'a> {
    /// The byte belongs to an async message and is left out of the checksum.
    Skip,
    /// The byte must be folded into the checksum.
    Fold,
    /// An entry is complete. Process it, then fold the byte.
    Entry(Entry<'a>),
    /// The checksum byte ended the block. It is already part of the entry's
    /// checksum and must not be folded again.
    Checksum(Entry<'a>),
    /// The label or value grew past its limit and the parser went back to idle.
    /// The byte must still be folded.
    Overflow,
}

#[derive(Debug)]
pub(crate) struct FrameParser {
    mode: Mode,
    label: ArrayVec<u8, MAX_LABEL_LENGTH>,
    field: ArrayVec<u8, MAX_FIELD_LENGTH>,
    checksum: u8,
}

impl FrameParser {
    pub(crate) fn new() -> Self {
        Self {
            mode: Mode::Idle,
            label: ArrayVec::new(),
            field: ArrayVec::new(),
            checksum: 0,
        }
    }

    pub(crate) fn step(&mut self, byte: u8) -> Step<'_> {
        match self.mode {
            Mode::Idle => {
                if byte == START {
                    self.start_label();
                }
                Step::Fold
            }
            Mode::Async => {
                if byte == START {
                    self.start_label();
                }
                Step::Skip
            }
            Mode::Label => match byte {
                SPLIT => {
                    self.field.clear();
                    self.mode = if self.label.as_slice() == label::CHECKSUM {
                        Mode::Checksum
                    } else {
                        Mode::Field
                    };
                    Step::Fold
                }
                ASYNC => {
                    self.label.clear();
                    self.mode = Mode::Async;
                    Step::Skip
                }
                _ => {
                    if self.label.try_push(byte).is_err() {
                        trace!("Label overflow, back to idle");
                        self.mode = Mode::Idle;
                        return Step::Overflow;
                    }
                    Step::Fold
                }
            },
            Mode::Checksum => {
                self.mode = Mode::Idle;
                self.field.clear();
                self.field.push(byte);
                Step::Checksum(Entry {
                    label: &self.label,
                    value: &self.field,
                    checksum: self.checksum.wrapping_add(byte),
                })
            }
            Mode::Field => {
                if byte == END {
                    self.mode = Mode::Idle;
                    return Step::Entry(Entry {
                        label: &self.label,
                        value: &self.field,
                        checksum: self.checksum,
                    });
                }
                if self.field.try_push(byte).is_err() {
                    trace!("Field overflow, back to idle");
                    self.mode = Mode::Idle;
                    return Step::Overflow;
                }
                Step::Fold
            }
        }
    }

    pub(crate) fn fold(&mut self, byte: u8) {
        self.checksum = self.checksum.wrapping_add(byte);
    }

    pub(crate) fn reset_checksum(&mut self) {
        self.checksum = 0;
    }

    pub(crate) fn reset(&mut self) {
        self.mode = Mode::Idle;
        self.label.clear();
        self.field.clear();
        self.checksum = 0;
    }

    #[cfg(test)]
    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    #[cfg(test)]
    pub(crate) fn checksum(&self) -> u8 {
        self.checksum
    }

    fn start_label(&mut self) {
        self.label.clear();
        self.mode = Mode::Label;
    }
}
