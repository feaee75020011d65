//! Device registry
//!
//! Read-only view over the platform's device table. Every call takes a fresh
//! snapshot; nothing is cached between enumerations.

use crate::platform::UsbPlatform;
use protocol::{DeviceDescriptor, HidError};
use tracing::{debug, warn};

/// Enumeration policy applied on top of the platform's device table
#[derive(Debug, Clone, Default)]
pub struct Registry {
    /// Device filters (VID:PID patterns); empty allows everything
    filters: Vec<String>,
    /// Leave devices that are already open out of `list_devices`
    hide_open_devices: bool,
}

impl Registry {
    pub fn new(filters: Vec<String>, hide_open_devices: bool) -> Self {
        Self {
            filters,
            hide_open_devices,
        }
    }

    /// Snapshot of currently visible devices
    ///
    /// `is_open` reports whether a path already has a live connection.
    pub fn list_devices<P: UsbPlatform>(
        &self,
        platform: &P,
        is_open: impl Fn(&str) -> bool,
    ) -> Result<Vec<DeviceDescriptor>, HidError> {
        let devices: Vec<DeviceDescriptor> = self
            .visible(platform)?
            .into_iter()
            .map(|(descriptor, _)| descriptor)
            .filter(|d| !(self.hide_open_devices && is_open(&d.path)))
            .collect();

        debug!("Enumerated {} devices", devices.len());
        Ok(devices)
    }

    /// Resolve a path to its descriptor and live platform device
    ///
    /// Open devices are always resolvable, even when hidden from listings.
    pub fn resolve<P: UsbPlatform>(
        &self,
        platform: &P,
        path: &str,
    ) -> Result<(DeviceDescriptor, P::Device), HidError> {
        self.visible(platform)?
            .into_iter()
            .find(|(descriptor, _)| descriptor.path == path)
            .ok_or_else(|| HidError::NotFound {
                path: path.to_string(),
            })
    }

    fn visible<P: UsbPlatform>(
        &self,
        platform: &P,
    ) -> Result<Vec<(DeviceDescriptor, P::Device)>, HidError> {
        let devices = platform.enumerate().map_err(|e| {
            warn!("Device enumeration failed: {}", e);
            HidError::Io(e.to_string())
        })?;

        Ok(devices
            .into_iter()
            .filter(|(descriptor, _)| {
                let allowed =
                    check_filter(descriptor.vendor_id, descriptor.product_id, &self.filters);
                if !allowed {
                    debug!(
                        "Device ignored by filter: path={}, vid={:#x}, pid={:#x}",
                        descriptor.path, descriptor.vendor_id, descriptor.product_id
                    );
                }
                allowed
            })
            .collect())
    }
}

/// Check if a VID/PID pair is allowed by the filters
pub fn check_filter(vid: u16, pid: u16, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }

    // Filter format: "0xVID:0xPID" or "0xVID:*", validated by the config loader
    filters.iter().any(|filter| {
        let Some((filter_vid, filter_pid)) = filter.split_once(':') else {
            return false;
        };
        matches_id(filter_vid, vid) && matches_id(filter_pid, pid)
    })
}

fn matches_id(pattern: &str, id: u16) -> bool {
    if pattern == "*" {
        return true;
    }
    let hex = pattern
        .strip_prefix("0x")
        .or_else(|| pattern.strip_prefix("0X"))
        .unwrap_or(pattern);
    u16::from_str_radix(hex, 16).is_ok_and(|v| v == id)
}
