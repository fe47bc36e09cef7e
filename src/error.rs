//! Error taxonomy for latency measurement

use std::io;
use std::time::Duration;

use crate::keyboard::RecordError;

/// Errors produced while triggering keys and reading their events
#[derive(Debug, thiserror::Error)]
pub enum LagError {
    /// No matching event arrived within the allotted time
    #[error("timed out after {} ms waiting for a key event", .0.as_millis())]
    Timeout(Duration),

    /// A record of the wrong size reached the decoder
    #[error(transparent)]
    Record(#[from] RecordError),

    /// The keyboard reported a key press timestamped before the trigger fired
    #[error(
        "keyboard sent a key before it was triggered (latency {latency:.6} s); is your trigger set up properly?"
    )]
    OrderingFault {
        /// The (negative) latency that was computed
        latency: f64,
    },

    /// A device node or GPIO pin could not be opened
    #[error("failed to open {what}: {source}")]
    Resource {
        what: String,
        #[source]
        source: io::Error,
    },

    /// Reading from an already open stream failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The run was cancelled before all trials completed
    #[error("measurement interrupted")]
    Interrupted,
}

impl LagError {
    /// Build a resource error for the named device or pin
    pub fn resource(what: impl Into<String>, source: io::Error) -> Self {
        LagError::Resource {
            what: what.into(),
            source,
        }
    }

    /// Whether a caller may reasonably carry on (e.g. try the next device)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LagError::Timeout(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, LagError::Timeout(_))
    }
}
