//! Protocol library for rust-hid-host
//!
//! This crate defines the data model shared between the HID host core and the
//! glue layer that exposes it to an application: device descriptors, endpoint
//! metadata, and the failure taxonomy returned by every operation.
//!
//! # Example
//!
//! ```
//! use protocol::{DeviceDescriptor, EnumerateResult};
//!
//! let result = EnumerateResult {
//!     devices: vec![DeviceDescriptor {
//!         path: "usb:1-1".to_string(),
//!         vendor_id: 0x1C40,
//!         product_id: 0x05B8,
//!         ..Default::default()
//!     }],
//! };
//! assert_eq!(result.devices[0].vid_pid(), "0x1c40:0x05b8");
//! ```

pub mod error;
pub mod types;

pub use error::{HidError, Result};
pub use types::{
    DeviceDescriptor, EndpointDirection, EndpointInfo, EndpointPair, EndpointTransferType,
    EnumerateResult, InterfaceDescriptor, ReadResult,
};
