//! Latest known state of a charge controller.

use crate::field::{label, Field, FieldValue};
use crate::vedirect::{Frame, FrameHandler};

/// Snapshot of the values reported by a charge controller, in the units used on
/// the wire: mV, mA, W and 0.01 kWh. Fields the controller never sent are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Telemetry {
    pub voltage: Option<i32>,
    pub current: Option<i16>,
    pub panel_voltage: Option<i32>,
    pub panel_power: Option<i16>,
    pub load_current: Option<i16>,
    pub operation_state: Option<i8>,
    pub error_state: Option<i8>,
    pub tracker_operation_mode: Option<i8>,
    pub load: Option<bool>,
    pub yield_total: Option<i16>,
    pub yield_today: Option<i16>,
    pub max_power_today: Option<i16>,
    pub yield_yesterday: Option<i16>,
    pub max_power_yesterday: Option<i16>,
    pub day_sequence: Option<i16>,
    pub product_id: Option<String>,
    pub firmware: Option<String>,
    pub serial_number: Option<String>,
    /// Frames applied so far.
    pub frames: u64,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the snapshot from a single field. Fields of unexpected type are ignored.
    pub fn apply(&mut self, field: &Field) {
        use label::*;
        match (field.id(), field.value()) {
            (VOLTAGE, FieldValue::Int32(v)) => self.voltage = Some(*v),
            (PANEL_VOLTAGE, FieldValue::Int32(v)) => self.panel_voltage = Some(*v),
            (CURRENT, FieldValue::Int16(v)) => self.current = Some(*v),
            (PANEL_POWER, FieldValue::Int16(v)) => self.panel_power = Some(*v),
            (LOAD_CURRENT, FieldValue::Int16(v)) => self.load_current = Some(*v),
            (YIELD_TOTAL, FieldValue::Int16(v)) => self.yield_total = Some(*v),
            (YIELD_TODAY, FieldValue::Int16(v)) => self.yield_today = Some(*v),
            (MAX_POWER_TODAY, FieldValue::Int16(v)) => self.max_power_today = Some(*v),
            (YIELD_YESTERDAY, FieldValue::Int16(v)) => self.yield_yesterday = Some(*v),
            (MAX_POWER_YESTERDAY, FieldValue::Int16(v)) => self.max_power_yesterday = Some(*v),
            (DAY_SEQUENCE, FieldValue::Int16(v)) => self.day_sequence = Some(*v),
            (OPERATION_STATE, FieldValue::Int8(v)) => self.operation_state = Some(*v),
            (ERROR_STATE, FieldValue::Int8(v)) => self.error_state = Some(*v),
            (TRACKER_OPERATION_MODE, FieldValue::Int8(v)) => {
                self.tracker_operation_mode = Some(*v)
            }
            (LOAD, FieldValue::Bool(v)) => self.load = Some(*v),
            (PRODUCT_ID, value) => self.product_id = text(value),
            (FIRMWARE, value) => self.firmware = text(value),
            (SERIAL_NUMBER, value) => self.serial_number = text(value),
            _ => (),
        }
    }

    /// Apply every field of a frame.
    pub fn apply_frame(&mut self, frame: &Frame) {
        for field in frame {
            self.apply(field);
        }
        self.frames += 1;
    }
}

fn text(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Text(s) => Some(s.clone()),
        FieldValue::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
        _ => None,
    }
}

impl FrameHandler for Telemetry {
    fn handle_frame(&mut self, frame: Frame) {
        self.apply_frame(&frame);
    }
}
