//! The trial loop
//!
//! A [`Measurement`] is a lazy, single-use iterator: each call to `next()`
//! waits out one randomized delay, fires the trigger and blocks until the
//! matching key press arrives. Nothing runs until the first pull.

use super::{delays, learn_trigger_key, RunSettings, Sample};
use crate::error::LagError;
use crate::keyboard::{EventSource, InputDevice};
use crate::trigger::{Clock, Trigger, TriggerPin};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Where a measurement is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Created, nothing has run yet. Key learning happens inside the first
    /// pull, so a run goes straight from here to `Iterating` or `Failed`.
    Idle,
    /// Trials in progress
    Iterating,
    /// All trials completed
    Done,
    /// Stopped by an error; no further samples
    Failed,
}

enum State<S: std::io::Read> {
    Idle,
    Iterating {
        source: EventSource<S>,
        delays: std::vec::IntoIter<f64>,
    },
    Done,
    Failed,
}

/// Lazy sequence of latency samples for one device
pub struct Measurement<'a, D, P, C>
where
    D: InputDevice,
    P: TriggerPin,
    C: Clock,
{
    trigger: &'a mut Trigger<P, C>,
    device: &'a D,
    settings: RunSettings,
    state: State<D::Stream>,
    /// Supplied up front or learned on the first pull
    key_code: Option<u16>,
    completed: usize,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a, D, P, C> Measurement<'a, D, P, C>
where
    D: InputDevice,
    P: TriggerPin,
    C: Clock,
{
    pub fn new(trigger: &'a mut Trigger<P, C>, device: &'a D, settings: RunSettings) -> Self {
        Self {
            trigger,
            device,
            key_code: settings.key_code,
            settings,
            state: State::Idle,
            completed: 0,
            cancel: None,
        }
    }

    /// Stop before the next trial once `flag` is set
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            State::Idle => Phase::Idle,
            State::Iterating { .. } => Phase::Iterating,
            State::Done => Phase::Done,
            State::Failed => Phase::Failed,
        }
    }

    /// Key code being measured, once known. Stays available after the run ends.
    pub fn key_code(&self) -> Option<u16> {
        self.key_code
    }

    /// Number of samples produced so far
    pub fn completed(&self) -> usize {
        self.completed
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn start(&mut self) -> Result<State<D::Stream>, LagError> {
        let key_code = match self.key_code {
            Some(code) => code,
            None => {
                let code = learn_trigger_key(self.trigger, self.device, self.settings.timeout)?;
                self.key_code = Some(code);
                self.trigger.clock().sleep(self.settings.settle);
                code
            }
        };

        let schedule = delays(
            self.settings.min_delay,
            self.settings.max_delay,
            self.settings.iterations,
        );
        let source = self.device.open()?;

        log::info!(
            "Measuring {} trials of key {} on {} via {}",
            schedule.len(),
            key_code,
            source.name(),
            self.trigger.label()
        );

        Ok(State::Iterating {
            source,
            delays: schedule.into_iter(),
        })
    }
}

/// One trial: wait, fire, and time the first matching key press
fn run_trial<S, P, C>(
    trigger: &mut Trigger<P, C>,
    source: &mut EventSource<S>,
    key_code: u16,
    delay: f64,
    timeout: Duration,
) -> Result<Sample, LagError>
where
    S: std::io::Read,
    P: TriggerPin,
    C: Clock,
{
    trigger.clock().sleep(Duration::from_secs_f64(delay.max(0.0)));

    let guard = trigger.fire()?;
    let assertion = guard.assertion();

    let event = loop {
        let event = source.read_event(timeout)?;
        if event.is_key_press() && event.code == key_code {
            break event;
        }
    };

    let latency = event.timestamp - assertion.start;
    if latency < 0.0 {
        return Err(LagError::OrderingFault { latency });
    }

    log::debug!(
        "delay {:.3} s -> latency {:.3} ms (+/- {:.3} ms)",
        delay,
        latency * 1000.0,
        assertion.uncertainty / 2.0 * 1000.0
    );

    Ok(Sample {
        latency,
        uncertainty: assertion.uncertainty,
    })
}

impl<D, P, C> Iterator for Measurement<'_, D, P, C>
where
    D: InputDevice,
    P: TriggerPin,
    C: Clock,
{
    type Item = Result<Sample, LagError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let State::Idle = self.state {
            match self.start() {
                Ok(state) => self.state = state,
                Err(e) => {
                    self.state = State::Failed;
                    return Some(Err(e));
                }
            }
        }

        if let State::Iterating { .. } = self.state {
            if self.cancelled() {
                log::warn!("Measurement interrupted after {} samples", self.completed);
                self.state = State::Failed;
                return Some(Err(LagError::Interrupted));
            }
        }

        let timeout = self.settings.timeout;
        let key_code = self.key_code?;
        let result = match &mut self.state {
            State::Iterating { source, delays } => {
                let delay = delays.next()?;
                run_trial(self.trigger, source, key_code, delay, timeout)
            }
            State::Idle | State::Done | State::Failed => return None,
        };

        match result {
            Ok(sample) => {
                self.completed += 1;
                if let State::Iterating { delays, .. } = &self.state {
                    if delays.len() == 0 {
                        self.state = State::Done;
                    }
                }
                Some(Ok(sample))
            }
            Err(e) => {
                log::error!("Trial {} failed: {}", self.completed + 1, e);
                self.state = State::Failed;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.state {
            State::Idle => (0, Some(self.settings.iterations.max(1))),
            State::Iterating { delays, .. } => (0, Some(delays.len())),
            State::Done | State::Failed => (0, Some(0)),
        }
    }
}

impl<D, P, C> std::iter::FusedIterator for Measurement<'_, D, P, C>
where
    D: InputDevice,
    P: TriggerPin,
    C: Clock,
{
}
