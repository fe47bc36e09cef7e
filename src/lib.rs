//! Keyboard Lag - GPIO-triggered keyboard latency tester
//!
//! A GPIO pin wired across a key switch presses the key at a known instant;
//! the kernel timestamp of the resulting input event gives the end-to-end
//! latency of the keyboard. Trials are repeated after randomized delays to
//! build a latency distribution.

pub mod config;
pub mod error;
pub mod keyboard;
pub mod measure;
pub mod report;
pub mod trigger;

pub use config::Config;
pub use error::LagError;
