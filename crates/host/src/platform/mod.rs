//! Platform device-access abstraction
//!
//! The host core never talks to libusb (or any OS API) directly. Everything it
//! needs from the platform goes through [`UsbPlatform`], which the worker
//! thread owns exclusively. Asynchronous platform notifications (permission
//! decisions, hotplug) are posted back through the [`Notifier`] handed to
//! [`UsbPlatform::start`].

pub mod mock;
pub mod libusb;

pub use self::mock::{MockDevice, MockPlatform, PermissionMode};
pub use self::libusb::RusbPlatform;

use common::Notifier;
use protocol::{DeviceDescriptor, EndpointInfo, InterfaceDescriptor};
use std::time::Duration;
use thiserror::Error;

/// Failure reported by the platform
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("Operation timed out")]
    Timeout,

    #[error("No such device (it may have been disconnected)")]
    NoDevice,

    #[error("Access denied (insufficient permissions)")]
    Access,

    #[error("Resource busy")]
    Busy,

    #[error("Entity not found")]
    NotFound,

    #[error("Input/output error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

/// Outbound contract to the platform's device-access collaborator
///
/// Implementations are constructed on, and only ever used from, the worker
/// thread, so they need not be `Send`.
pub trait UsbPlatform {
    /// Platform reference to a visible (not necessarily opened) device
    type Device: Clone;
    /// An opened device connection
    type Handle;

    /// Called once by the worker before any other method
    fn start(&mut self, notifier: Notifier) -> Result<(), PlatformError> {
        let _ = notifier;
        Ok(())
    }

    /// Current device table
    fn enumerate(&self) -> Result<Vec<(DeviceDescriptor, Self::Device)>, PlatformError>;

    /// Whether access to `device` has already been granted
    fn has_permission(&self, device: &Self::Device) -> bool;

    /// Issue the platform permission prompt
    ///
    /// `Some(granted)` is a decision made on the spot. `None` means the user
    /// is being asked and the decision will later arrive via
    /// [`Notifier::permission_decision`].
    fn request_permission(
        &self,
        path: &str,
        device: &Self::Device,
    ) -> Result<Option<bool>, PlatformError>;

    fn open_handle(&self, device: &Self::Device) -> Result<Self::Handle, PlatformError>;

    /// Interface metadata for `number`, without performing any transfer
    fn interface_descriptor(
        &self,
        device: &Self::Device,
        number: u8,
    ) -> Result<InterfaceDescriptor, PlatformError>;

    fn claim_interface(&self, handle: &mut Self::Handle, number: u8) -> Result<(), PlatformError>;

    fn release_interface(&self, handle: &mut Self::Handle, number: u8)
    -> Result<(), PlatformError>;

    fn close_handle(&self, handle: Self::Handle) -> Result<(), PlatformError>;

    /// Single bounded interrupt IN transfer, returning the number of bytes read
    fn read_interrupt(
        &self,
        handle: &mut Self::Handle,
        endpoint: &EndpointInfo,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, PlatformError>;

    /// Single interrupt OUT transfer, returning the number of bytes written
    fn write_interrupt(
        &self,
        handle: &mut Self::Handle,
        endpoint: &EndpointInfo,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, PlatformError>;
}
