//! Typed VE.Direct field values.
//!
//! A [`Field`] is created by the decoder once a complete `label<TAB>value<CR>` entry
//! has been received, and is owned by the pending frame until the frame is handed
//! to the consumer.

use core::fmt;

/// Identifier of a VE.Direct field.
///
/// Up to four label characters packed little endian, so `"VPV"` becomes
/// `'V' | 'P' << 8 | 'V' << 16`. Shorter labels leave the high bytes zero, longer
/// labels only contribute their first four characters.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct FieldId(u32);

impl FieldId {
    /// Pack a label into an id.
    pub const fn from_label(label: &[u8]) -> Self {
        let mut id = 0u32;
        let mut i = 0;
        while i < label.len() && i < 4 {
            id |= (label[i] as u32) << (8 * i);
            i += 1;
        }
        Self(id)
    }

    /// Wrap an already packed id.
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// The packed 32-bit value.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// How the decoder interprets the text of fields with this id.
    pub fn kind(self) -> FieldKind {
        use label::*;
        match self {
            VOLTAGE | PANEL_VOLTAGE => FieldKind::Int32,
            CURRENT | PANEL_POWER | LOAD_CURRENT | YIELD_TOTAL | YIELD_TODAY | MAX_POWER_TODAY
            | YIELD_YESTERDAY | MAX_POWER_YESTERDAY | DAY_SEQUENCE => FieldKind::Int16,
            OPERATION_STATE | ERROR_STATE | TRACKER_OPERATION_MODE => FieldKind::Int8,
            PRODUCT_ID | FIRMWARE | SERIAL_NUMBER => FieldKind::Text,
            LOAD => FieldKind::Bool,
            _ => FieldKind::Ignored,
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.to_le_bytes().iter().take_while(|b| **b != 0) {
            write!(f, "{}", char::from(*byte))?;
        }
        Ok(())
    }
}

impl From<FieldId> for u32 {
    fn from(id: FieldId) -> Self {
        id.0
    }
}

/// Label ids of the fields emitted by the charge controller.
pub mod label {
    use super::FieldId;

    pub const VOLTAGE: FieldId = FieldId::from_label(b"V");
    pub const CURRENT: FieldId = FieldId::from_label(b"I");
    pub const PANEL_VOLTAGE: FieldId = FieldId::from_label(b"VPV");
    pub const PANEL_POWER: FieldId = FieldId::from_label(b"PPV");
    pub const LOAD_CURRENT: FieldId = FieldId::from_label(b"IL");
    pub const OPERATION_STATE: FieldId = FieldId::from_label(b"CS");
    pub const ERROR_STATE: FieldId = FieldId::from_label(b"ERR");
    pub const LOAD: FieldId = FieldId::from_label(b"LOAD");
    pub const YIELD_TOTAL: FieldId = FieldId::from_label(b"H19");
    pub const YIELD_TODAY: FieldId = FieldId::from_label(b"H20");
    pub const MAX_POWER_TODAY: FieldId = FieldId::from_label(b"H21");
    pub const YIELD_YESTERDAY: FieldId = FieldId::from_label(b"H22");
    pub const MAX_POWER_YESTERDAY: FieldId = FieldId::from_label(b"H23");
    pub const PRODUCT_ID: FieldId = FieldId::from_label(b"PID");
    pub const FIRMWARE: FieldId = FieldId::from_label(b"FW");
    pub const SERIAL_NUMBER: FieldId = FieldId::from_label(b"SER#");
    pub const TRACKER_OPERATION_MODE: FieldId = FieldId::from_label(b"MPPT");
    pub const OFF_REASON: FieldId = FieldId::from_label(b"OR");
    pub const DAY_SEQUENCE: FieldId = FieldId::from_label(b"HSDS");

    /// Label of the entry terminating a block.
    pub const CHECKSUM: &[u8] = b"Checksum";
}

/// Payload type selected by a [`FieldId`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Int32,
    Int16,
    Int8,
    Text,
    Bool,
    /// Fields we don't model. They are accepted and dropped.
    Ignored,
}

/// Decoded payload of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Text payload that wasn't valid UTF-8.
    Bytes(Vec<u8>),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Bool(bool),
    Text(String),
}

impl FieldValue {
    /// Numeric payloads widened to `i32`.
    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Self::Int8(v) => Some(v.into()),
            Self::Int16(v) => Some(v.into()),
            Self::Int32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// A single decoded field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    id: FieldId,
    value: FieldValue,
}

impl Field {
    pub fn new(id: FieldId, value: FieldValue) -> Self {
        Self { id, value }
    }

    pub const fn id(&self) -> FieldId {
        self.id
    }

    pub const fn value(&self) -> &FieldValue {
        &self.value
    }

    /// Take the payload out of the field.
    pub fn into_value(self) -> FieldValue {
        self.value
    }
}
