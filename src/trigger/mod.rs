//! Scoped GPIO trigger with bracketed timestamps
//!
//! [`Trigger::fire`] reads the clock, asserts the pin and reads the clock
//! again. The midpoint of the two readings is taken as the instant the
//! signal went high and the spread between them as its uncertainty. The
//! returned [`TriggerGuard`] deasserts the pin when it goes out of scope.

pub mod sysfs;

use crate::error::LagError;
use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub use sysfs::SysfsPin;

/// Output pin driving the key switch
pub trait TriggerPin {
    fn assert(&mut self) -> io::Result<()>;

    fn deassert(&mut self) -> io::Result<()>;

    /// Identifying label, e.g. `GPIO21`
    fn label(&self) -> &str;
}

impl<P: TriggerPin + ?Sized> TriggerPin for Box<P> {
    fn assert(&mut self) -> io::Result<()> {
        (**self).assert()
    }

    fn deassert(&mut self) -> io::Result<()> {
        (**self).deassert()
    }

    fn label(&self) -> &str {
        (**self).label()
    }
}

/// Time source shared by the trigger and the trial scheduler
pub trait Clock {
    /// Current time in seconds, in the same domain as kernel event timestamps
    fn now(&self) -> f64;

    fn sleep(&self, duration: Duration);
}

/// Wall clock (`CLOCK_REALTIME`), the default evdev timestamp domain
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// When the trigger fired, in the trigger's clock domain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerAssertion {
    /// Midpoint of the readings taken before and after asserting the pin
    pub start: f64,
    /// Full spread between those readings, always >= 0
    pub uncertainty: f64,
}

impl TriggerAssertion {
    /// Build from the readings taken before (`t1`) and after (`t2`) the
    /// assertion call. Readings that went backwards are swapped.
    pub fn bracket(t1: f64, t2: f64) -> Self {
        let (lo, hi) = if t2 >= t1 { (t1, t2) } else { (t2, t1) };
        Self {
            start: (lo + hi) / 2.0,
            uncertainty: hi - lo,
        }
    }
}

/// A trigger pin paired with the clock used to timestamp it
pub struct Trigger<P: TriggerPin, C: Clock = SystemClock> {
    pin: P,
    clock: C,
}

impl<P: TriggerPin> Trigger<P> {
    pub fn new(pin: P) -> Self {
        Self::with_clock(pin, SystemClock)
    }
}

impl<P: TriggerPin, C: Clock> Trigger<P, C> {
    pub fn with_clock(pin: P, clock: C) -> Self {
        Self { pin, clock }
    }

    pub fn label(&self) -> &str {
        self.pin.label()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Force the pin low outside of any trial
    pub fn release(&mut self) -> Result<(), LagError> {
        self.pin
            .deassert()
            .map_err(|e| LagError::resource(self.pin.label().to_string(), e))
    }

    /// Assert the pin and return a guard that deasserts it on drop
    pub fn fire(&mut self) -> Result<TriggerGuard<'_, P>, LagError> {
        let t1 = self.clock.now();
        let asserted = self.pin.assert();
        let t2 = self.clock.now();

        if let Err(e) = asserted {
            if let Err(de) = self.pin.deassert() {
                log::warn!("Failed to deassert {}: {}", self.pin.label(), de);
            }
            return Err(LagError::resource(self.pin.label().to_string(), e));
        }

        let assertion = TriggerAssertion::bracket(t1, t2);
        log::trace!(
            "{} asserted at {:.6} (+/- {:.1} us)",
            self.pin.label(),
            assertion.start,
            assertion.uncertainty * 1e6
        );

        Ok(TriggerGuard {
            pin: &mut self.pin,
            assertion,
        })
    }
}

/// Holds the trigger asserted; dropping it deasserts the pin
#[must_use = "the trigger is released as soon as the guard is dropped"]
pub struct TriggerGuard<'a, P: TriggerPin> {
    pin: &'a mut P,
    assertion: TriggerAssertion,
}

impl<P: TriggerPin> TriggerGuard<'_, P> {
    pub fn assertion(&self) -> TriggerAssertion {
        self.assertion
    }

    pub fn start(&self) -> f64 {
        self.assertion.start
    }

    pub fn uncertainty(&self) -> f64 {
        self.assertion.uncertainty
    }
}

impl<P: TriggerPin> Drop for TriggerGuard<'_, P> {
    fn drop(&mut self) {
        if let Err(e) = self.pin.deassert() {
            log::error!("Failed to deassert {}: {}", self.pin.label(), e);
        }
    }
}
