//! Kernel input event records
//!
//! Each read from `/dev/input/eventN` yields `struct input_event`:
//!
//! | Field | Type |
//! |-------|------|
//! | seconds | `long` |
//! | microseconds | `long` |
//! | type | `u16` |
//! | code | `u16` |
//! | value | `u32` (signed in the kernel) |
//!
//! in native byte order, 24 bytes on 64-bit hosts.

use std::ffi::c_long;
use std::mem::size_of;

const LONG_SIZE: usize = size_of::<c_long>();

/// Size in bytes of one kernel input event record on this host
pub const RECORD_SIZE: usize = 2 * LONG_SIZE + 2 + 2 + 4;

// include/uapi/linux/input-event-codes.h
pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;
pub const EV_ABS: u16 = 0x03;
pub const EV_MSC: u16 = 0x04;

/// A buffer handed to the decoder had the wrong length
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid event record: expected {expected} bytes, got {actual}")]
pub struct RecordError {
    pub expected: usize,
    pub actual: usize,
}

/// Class of an input event (the `type` field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    Sync,
    Key,
    Relative,
    Absolute,
    Misc,
    Other(u16),
}

impl From<u16> for EventClass {
    fn from(raw: u16) -> Self {
        match raw {
            EV_SYN => EventClass::Sync,
            EV_KEY => EventClass::Key,
            EV_REL => EventClass::Relative,
            EV_ABS => EventClass::Absolute,
            EV_MSC => EventClass::Misc,
            other => EventClass::Other(other),
        }
    }
}

impl From<EventClass> for u16 {
    fn from(class: EventClass) -> Self {
        match class {
            EventClass::Sync => EV_SYN,
            EventClass::Key => EV_KEY,
            EventClass::Relative => EV_REL,
            EventClass::Absolute => EV_ABS,
            EventClass::Misc => EV_MSC,
            EventClass::Other(raw) => raw,
        }
    }
}

/// Undecoded fields of one event record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRecord {
    pub seconds: i64,
    pub microseconds: i64,
    pub event_class: u16,
    pub code: u16,
    pub value: u32,
}

impl RawRecord {
    /// Build a record whose timestamp is `timestamp` seconds, rounded to the
    /// nearest microsecond.
    pub fn at(timestamp: f64, class: EventClass, code: u16, value: i32) -> Self {
        let mut seconds = timestamp.floor() as i64;
        let mut microseconds = ((timestamp - seconds as f64) * 1e6).round() as i64;
        if microseconds >= 1_000_000 {
            seconds += 1;
            microseconds -= 1_000_000;
        }
        Self {
            seconds,
            microseconds,
            event_class: class.into(),
            code,
            value: value as u32,
        }
    }

    /// Decode one record. The buffer must be exactly [`RECORD_SIZE`] bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        if buf.len() != RECORD_SIZE {
            return Err(RecordError {
                expected: RECORD_SIZE,
                actual: buf.len(),
            });
        }

        let (sec, rest) = buf.split_at(LONG_SIZE);
        let (usec, rest) = rest.split_at(LONG_SIZE);

        Ok(Self {
            seconds: read_long(sec),
            microseconds: read_long(usec),
            event_class: u16::from_ne_bytes([rest[0], rest[1]]),
            code: u16::from_ne_bytes([rest[2], rest[3]]),
            value: u32::from_ne_bytes([rest[4], rest[5], rest[6], rest[7]]),
        })
    }

    /// Encode into the host's native record layout
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[..LONG_SIZE].copy_from_slice(&(self.seconds as c_long).to_ne_bytes());
        out[LONG_SIZE..2 * LONG_SIZE].copy_from_slice(&(self.microseconds as c_long).to_ne_bytes());
        let tail = &mut out[2 * LONG_SIZE..];
        tail[0..2].copy_from_slice(&self.event_class.to_ne_bytes());
        tail[2..4].copy_from_slice(&self.code.to_ne_bytes());
        tail[4..8].copy_from_slice(&self.value.to_ne_bytes());
        out
    }

    pub fn timestamp(&self) -> f64 {
        self.seconds as f64 + self.microseconds as f64 / 1_000_000.0
    }

    /// Attach a source name, producing a decoded event
    pub fn into_event(self, source: &str) -> InputEvent {
        InputEvent {
            source: source.to_string(),
            timestamp: self.timestamp(),
            class: EventClass::from(self.event_class),
            code: self.code,
            value: self.value as i32,
        }
    }
}

fn read_long(bytes: &[u8]) -> i64 {
    let mut raw = [0u8; LONG_SIZE];
    raw.copy_from_slice(bytes);
    c_long::from_ne_bytes(raw) as i64
}

/// A decoded input event with its kernel timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct InputEvent {
    /// Name of the device that produced the event
    pub source: String,
    /// Kernel timestamp in seconds
    pub timestamp: f64,
    pub class: EventClass,
    pub code: u16,
    /// 0 = release, 1 = press, 2 = autorepeat for key events
    pub value: i32,
}

impl InputEvent {
    /// Decode a record read from the named device
    pub fn decode(source: &str, buf: &[u8]) -> Result<Self, RecordError> {
        RawRecord::decode(buf).map(|raw| raw.into_event(source))
    }

    pub fn is_key_press(&self) -> bool {
        self.class == EventClass::Key && self.value != 0
    }
}
