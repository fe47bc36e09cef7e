//! Discover which key the trigger presses, and which keyboard it is wired to

use crate::error::LagError;
use crate::keyboard::InputDevice;
use crate::trigger::{Clock, Trigger, TriggerPin};
use std::time::Duration;

/// Fire the trigger once and return the code of the first key press seen.
///
/// Fails with [`LagError::Timeout`] if no key press arrives within
/// `timeout` of the previous event.
pub fn learn_trigger_key<D, P, C>(
    trigger: &mut Trigger<P, C>,
    device: &D,
    timeout: Duration,
) -> Result<u16, LagError>
where
    D: InputDevice,
    P: TriggerPin,
    C: Clock,
{
    let mut source = device.open()?;
    let _guard = trigger.fire()?;

    loop {
        let event = source.read_event(timeout)?;
        if event.is_key_press() {
            log::info!("{} responded with key code {}", device.name(), event.code);
            return Ok(event.code);
        }
        log::debug!("Ignoring {:?} code {} while learning", event.class, event.code);
    }
}

/// The keyboard that answered a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanHit {
    /// Position in the scanned device list
    pub index: usize,
    pub key_code: u16,
}

/// Find which of `devices` the trigger is wired to.
///
/// Each candidate gets the pin released, `settle` to go quiet and then one
/// learning attempt bounded by `timeout`. Timeouts move on to the next
/// device; any other failure aborts the scan.
pub fn scan_keyboards<D, P, C>(
    trigger: &mut Trigger<P, C>,
    devices: &[D],
    settle: Duration,
    timeout: Duration,
) -> Result<Option<ScanHit>, LagError>
where
    D: InputDevice,
    P: TriggerPin,
    C: Clock,
{
    for (index, device) in devices.iter().enumerate() {
        log::info!("Testing {}...", device.name());

        trigger.release()?;
        trigger.clock().sleep(settle);

        match learn_trigger_key(trigger, device, timeout) {
            Ok(key_code) => return Ok(Some(ScanHit { index, key_code })),
            Err(e) if e.is_recoverable() => {
                log::debug!("{} did not respond: {}", device.name(), e);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyboard::EventClass;
    use crate::measure::test_helpers::{FakeKeyboard, ManualClock, RecordingPin};

    const TIMEOUT: Duration = Duration::from_millis(50);

    #[test]
    fn returns_first_key_press_code() {
        let keyboard = FakeKeyboard::new("kbd");
        keyboard.push(1.0, EventClass::Misc, 4, 0x70004);
        keyboard.push(1.0, EventClass::Sync, 0, 0);
        keyboard.push(1.1, EventClass::Relative, 0, 5);
        keyboard.push(1.2, EventClass::Key, 42, 1);

        let pin = RecordingPin::new();
        let state = pin.state();
        let mut trigger = Trigger::with_clock(pin, ManualClock::new(1.0));

        assert_eq!(learn_trigger_key(&mut trigger, &keyboard, TIMEOUT).unwrap(), 42);
        assert!(!state.is_asserted());
        assert_eq!(state.deasserts(), 1);
        assert_eq!(keyboard.open_count(), 1);
    }

    #[test]
    fn key_release_is_skipped() {
        let keyboard = FakeKeyboard::new("kbd");
        keyboard.push(1.0, EventClass::Key, 30, 0);
        keyboard.push(1.1, EventClass::Key, 31, 1);

        let mut trigger = Trigger::with_clock(RecordingPin::new(), ManualClock::new(1.0));
        assert_eq!(learn_trigger_key(&mut trigger, &keyboard, TIMEOUT).unwrap(), 31);
    }

    #[test]
    fn times_out_and_releases_trigger() {
        let keyboard = FakeKeyboard::new("kbd");
        keyboard.push(1.0, EventClass::Sync, 0, 0);

        let pin = RecordingPin::new();
        let state = pin.state();
        let mut trigger = Trigger::with_clock(pin, ManualClock::new(1.0));

        let err = learn_trigger_key(&mut trigger, &keyboard, TIMEOUT).unwrap_err();
        assert!(err.is_timeout());
        assert!(!state.is_asserted());
        assert_eq!(state.asserts(), 1);
        assert_eq!(state.deasserts(), 1);
    }

    #[test]
    fn open_failure_does_not_fire() {
        let keyboard = FakeKeyboard::new("gone").unplugged();
        let pin = RecordingPin::new();
        let state = pin.state();
        let mut trigger = Trigger::with_clock(pin, ManualClock::new(1.0));

        let err = learn_trigger_key(&mut trigger, &keyboard, TIMEOUT).unwrap_err();
        assert!(matches!(err, LagError::Resource { .. }));
        assert_eq!(state.asserts(), 0);
    }

    #[test]
    fn scan_skips_silent_keyboards() {
        let silent = FakeKeyboard::new("silent");
        let wired = FakeKeyboard::new("wired");
        wired.push(2.0, EventClass::Key, 57, 1);
        let devices = vec![silent, wired];

        let clock = ManualClock::new(0.0);
        let mut trigger = Trigger::with_clock(RecordingPin::new(), clock.clone());

        let hit = scan_keyboards(&mut trigger, &devices, Duration::from_millis(500), TIMEOUT)
            .unwrap()
            .unwrap();
        assert_eq!(hit, ScanHit { index: 1, key_code: 57 });
        // Settled once per candidate tried
        assert!((clock.now() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn scan_without_response_finds_nothing() {
        let devices = vec![FakeKeyboard::new("a"), FakeKeyboard::new("b")];
        let mut trigger = Trigger::with_clock(RecordingPin::new(), ManualClock::new(0.0));
        let hit = scan_keyboards(&mut trigger, &devices, Duration::ZERO, TIMEOUT).unwrap();
        assert_eq!(hit, None);
    }

    #[test]
    fn scan_aborts_on_hard_errors() {
        let devices = vec![FakeKeyboard::new("a").unplugged(), FakeKeyboard::new("b")];
        let mut trigger = Trigger::with_clock(RecordingPin::new(), ManualClock::new(0.0));
        let err = scan_keyboards(&mut trigger, &devices, Duration::ZERO, TIMEOUT).unwrap_err();
        assert!(matches!(err, LagError::Resource { .. }));
    }
}
