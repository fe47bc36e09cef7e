//! Keyboard event streams: record decoding, non-blocking reads, device discovery

mod event;
mod source;
pub mod device;

pub use event::{
    EventClass, InputEvent, RawRecord, RecordError, EV_ABS, EV_KEY, EV_MSC, EV_REL, EV_SYN,
    RECORD_SIZE,
};
pub use source::{EventSource, DEFAULT_POLL_INTERVAL};
pub use device::{BusType, DeviceHandle, InputDevice};
