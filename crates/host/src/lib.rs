//! rust-hid-host
//!
//! Host-side access to USB HID devices: enumeration, user-mediated
//! permission, open/close lifecycle, and input/output report transfers.
//!
//! # Example
//!
//! ```no_run
//! use host::{HidHost, HostConfig, RusbPlatform};
//!
//! # async fn demo() -> protocol::Result<()> {
//! let host = HidHost::start(&HostConfig::default(), RusbPlatform::new);
//! for device in host.list_devices().await? {
//!     println!("{} {}", device.path, device.vid_pid());
//! }
//! host.shutdown().await
//! # }
//! ```

pub mod api;
pub mod config;
pub mod platform;
pub mod usb;

pub use api::HidHost;
pub use config::HostConfig;
pub use platform::{
    MockDevice, MockPlatform, PermissionMode, PlatformError, RusbPlatform, UsbPlatform,
};
