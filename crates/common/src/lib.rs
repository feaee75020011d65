//! Common utilities for rust-hid-host
//!
//! This crate provides shared functionality for the HID host: error handling,
//! logging setup, and the async channel bridge between callers and the
//! dedicated device worker thread.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{HidBridge, HidCommand, HidEvent, HidWorker, Notifier, create_hid_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
