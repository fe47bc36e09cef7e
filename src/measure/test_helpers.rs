//! Test doubles for the trigger, clock and keyboard
//!
//! Everything here is single-threaded and shares state through `Rc`, so a
//! pin's assert hook can feed events into a keyboard the test also holds.

use crate::error::LagError;
use crate::keyboard::{EventClass, EventSource, InputDevice, RawRecord};
use crate::trigger::{Clock, TriggerPin};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::rc::Rc;
use std::time::Duration;

/// Clock that only moves when slept on or advanced
#[derive(Clone)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    pub fn advance(&self, secs: f64) {
        self.now.set(self.now.get() + secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration.as_secs_f64());
    }
}

#[derive(Default)]
struct PinCounts {
    asserted: bool,
    asserts: usize,
    deasserts: usize,
}

/// Observer for a [`RecordingPin`] that stays valid after the pin is moved
#[derive(Clone, Default)]
pub struct PinState {
    counts: Rc<RefCell<PinCounts>>,
}

impl PinState {
    pub fn is_asserted(&self) -> bool {
        self.counts.borrow().asserted
    }

    pub fn asserts(&self) -> usize {
        self.counts.borrow().asserts
    }

    pub fn deasserts(&self) -> usize {
        self.counts.borrow().deasserts
    }
}

type Hook = Box<dyn FnMut()>;

/// Pin that records every transition and can run hooks on them
pub struct RecordingPin {
    state: PinState,
    on_assert: Option<Hook>,
    on_deassert: Option<Hook>,
    assert_cost: Option<(ManualClock, f64)>,
    fail_assert: bool,
}

impl RecordingPin {
    pub fn new() -> Self {
        Self {
            state: PinState::default(),
            on_assert: None,
            on_deassert: None,
            assert_cost: None,
            fail_assert: false,
        }
    }

    pub fn state(&self) -> PinState {
        self.state.clone()
    }

    pub fn on_assert(mut self, hook: impl FnMut() + 'static) -> Self {
        self.on_assert = Some(Box::new(hook));
        self
    }

    pub fn on_deassert(mut self, hook: impl FnMut() + 'static) -> Self {
        self.on_deassert = Some(Box::new(hook));
        self
    }

    /// Make each assert call take `secs` on `clock`
    pub fn with_assert_cost(mut self, clock: ManualClock, secs: f64) -> Self {
        self.assert_cost = Some((clock, secs));
        self
    }

    pub fn failing_assert(mut self) -> Self {
        self.fail_assert = true;
        self
    }
}

impl TriggerPin for RecordingPin {
    fn assert(&mut self) -> io::Result<()> {
        if self.fail_assert {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "pin busy"));
        }
        {
            let mut counts = self.state.counts.borrow_mut();
            counts.asserted = true;
            counts.asserts += 1;
        }
        if let Some((clock, secs)) = &self.assert_cost {
            clock.advance(*secs);
        }
        if let Some(hook) = self.on_assert.as_mut() {
            hook();
        }
        Ok(())
    }

    fn deassert(&mut self) -> io::Result<()> {
        {
            let mut counts = self.state.counts.borrow_mut();
            counts.asserted = false;
            counts.deasserts += 1;
        }
        if let Some(hook) = self.on_deassert.as_mut() {
            hook();
        }
        Ok(())
    }

    fn label(&self) -> &str {
        "GPIO-TEST"
    }
}

/// Non-blocking stream over a shared byte queue
pub struct QueueStream {
    bytes: Rc<RefCell<VecDeque<u8>>>,
}

impl Read for QueueStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut bytes = self.bytes.borrow_mut();
        if bytes.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(bytes.len());
        for (dst, src) in buf.iter_mut().zip(bytes.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

/// Keyboard whose event stream is scripted by the test
#[derive(Clone)]
pub struct FakeKeyboard {
    name: String,
    bytes: Rc<RefCell<VecDeque<u8>>>,
    opens: Rc<Cell<usize>>,
    unplugged: bool,
}

impl FakeKeyboard {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            bytes: Rc::default(),
            opens: Rc::default(),
            unplugged: false,
        }
    }

    /// Opening fails as if the node had disappeared
    pub fn unplugged(mut self) -> Self {
        self.unplugged = true;
        self
    }

    pub fn push(&self, timestamp: f64, class: EventClass, code: u16, value: i32) {
        let record = RawRecord::at(timestamp, class, code, value);
        self.bytes.borrow_mut().extend(record.to_bytes());
    }

    pub fn open_count(&self) -> usize {
        self.opens.get()
    }
}

impl InputDevice for FakeKeyboard {
    type Stream = QueueStream;

    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<EventSource<QueueStream>, LagError> {
        if self.unplugged {
            return Err(LagError::resource(
                format!("/dev/input/{}", self.name),
                io::Error::new(io::ErrorKind::NotFound, "no such device"),
            ));
        }
        self.opens.set(self.opens.get() + 1);
        Ok(EventSource::new(
            self.name.clone(),
            QueueStream {
                bytes: self.bytes.clone(),
            },
        )
        .with_poll_interval(Duration::from_micros(50)))
    }
}
