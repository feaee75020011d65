//! Connection manager
//!
//! Owns the map from path to open connection. A connection only exists once
//! the handle is open, interface 0 is claimed and both interrupt endpoints are
//! known; any failure on the way tears down whatever was acquired.

use crate::platform::{PlatformError, UsbPlatform};
use crate::usb::endpoints;
use protocol::{EndpointPair, HidError};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Interface claimed for HID transfers
pub const HID_INTERFACE: u8 = 0;

/// One open device
pub struct Connection<H> {
    pub path: String,
    pub handle: H,
    pub interface: u8,
    pub endpoints: EndpointPair,
    opened_at: Instant,
}

impl<H> Connection<H> {
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

/// Registry of open connections, at most one per path
pub struct ConnectionManager<H> {
    connections: HashMap<String, Connection<H>>,
}

impl<H> Default for ConnectionManager<H> {
    fn default() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }
}

impl<H> ConnectionManager<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self, path: &str) -> bool {
        self.connections.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Paths of all open connections, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.connections.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn get_mut(&mut self, path: &str) -> Result<&mut Connection<H>, HidError> {
        self.connections
            .get_mut(path)
            .ok_or_else(|| HidError::DeviceNotOpen {
                path: path.to_string(),
            })
    }

    /// Open `device`, claim the HID interface and record the connection
    ///
    /// Succeeds without side effects when `path` is already open.
    pub fn establish<P>(
        &mut self,
        platform: &P,
        path: &str,
        device: &P::Device,
    ) -> Result<(), HidError>
    where
        P: UsbPlatform<Handle = H>,
    {
        if self.is_open(path) {
            return Ok(());
        }

        let mut handle = platform.open_handle(device).map_err(|e| {
            warn!("Failed to open connection to device {}: {}", path, e);
            HidError::OpenFailed(e.to_string())
        })?;

        if let Err(e) = platform.claim_interface(&mut handle, HID_INTERFACE) {
            warn!("Failed to claim interface {} on {}: {}", HID_INTERFACE, path, e);
            if let Err(e) = platform.close_handle(handle) {
                debug!("Failed to close handle for {}: {}", path, e);
            }
            return Err(HidError::ClaimFailed {
                interface: HID_INTERFACE,
                reason: e.to_string(),
            });
        }

        let discovered = platform
            .interface_descriptor(device, HID_INTERFACE)
            .map_err(|e| match e {
                PlatformError::NotFound => HidError::EndpointsNotFound {
                    interface: HID_INTERFACE,
                },
                other => HidError::Io(other.to_string()),
            })
            .and_then(|interface| endpoints::discover(&interface));

        let endpoints = match discovered {
            Ok(endpoints) => endpoints,
            Err(err) => {
                warn!("Device {} is unusable for HID transfers: {}", path, err);
                if let Err(e) = release_and_close(platform, handle, HID_INTERFACE) {
                    debug!("Cleanup after failed open of {}: {}", path, e);
                }
                return Err(err);
            }
        };

        self.connections.insert(
            path.to_string(),
            Connection {
                path: path.to_string(),
                handle,
                interface: HID_INTERFACE,
                endpoints,
                opened_at: Instant::now(),
            },
        );
        info!("Opened device {}", path);
        Ok(())
    }

    /// Close an open connection
    ///
    /// The entry is removed even when the platform fails to release or close,
    /// since a half-closed handle cannot usefully be retried.
    pub fn close<P>(&mut self, platform: &P, path: &str) -> Result<(), HidError>
    where
        P: UsbPlatform<Handle = H>,
    {
        let connection = self
            .connections
            .remove(path)
            .ok_or_else(|| HidError::DeviceNotOpen {
                path: path.to_string(),
            })?;

        let age = connection.age();
        release_and_close(platform, connection.handle, connection.interface).map_err(|e| {
            warn!("Error closing device {}: {}", path, e);
            HidError::Io(format!("Error closing device: {}", e))
        })?;

        info!("Device closed: {} (open for {:?})", path, age);
        Ok(())
    }

    /// Best-effort close used when there is no caller to report to
    ///
    /// Returns whether `path` was open.
    pub fn force_close<P>(&mut self, platform: &P, path: &str) -> bool
    where
        P: UsbPlatform<Handle = H>,
    {
        let Some(connection) = self.connections.remove(path) else {
            return false;
        };
        if let Err(e) = release_and_close(platform, connection.handle, connection.interface) {
            warn!("Failed to close detached device {}: {}", path, e);
        }
        info!("Force-closed device {}", path);
        true
    }

    /// Force-close every connection
    pub fn close_all<P>(&mut self, platform: &P)
    where
        P: UsbPlatform<Handle = H>,
    {
        for path in self.paths() {
            self.force_close(platform, &path);
        }
    }
}

/// Release the claimed interface, then close the handle
///
/// The handle is closed even if the release fails; the first error wins.
fn release_and_close<P: UsbPlatform>(
    platform: &P,
    mut handle: P::Handle,
    interface: u8,
) -> Result<(), PlatformError> {
    let released = platform.release_interface(&mut handle, interface);
    let closed = platform.close_handle(handle);
    released.and(closed)
}
