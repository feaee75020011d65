//! HID operation error types

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Failure returned to the immediate caller of a HID operation
///
/// No variant is retried by the host; retry policy belongs to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HidError {
    /// Path is not present in the device registry
    #[error("Device not found: {path}")]
    NotFound { path: String },

    /// Interface lacks a usable IN or OUT interrupt endpoint
    #[error("No interrupt IN/OUT endpoint pair on interface {interface}")]
    EndpointsNotFound { interface: u8 },

    /// The user (or platform) declined access to the device
    #[error("Permission denied for USB device {path}")]
    PermissionDenied { path: String },

    /// Another path's permission request is still awaiting a decision
    #[error("Authorization already in progress for {pending}")]
    AuthorizationInProgress { pending: String },

    /// No permission decision arrived within the configured timeout
    #[error("Timed out waiting for permission decision for {path}")]
    PermissionTimeout { path: String },

    /// Operation attempted on a path with no live connection
    #[error("Device not open: {path}")]
    DeviceNotOpen { path: String },

    /// Platform refused to open the device handle
    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    /// Interface could not be claimed
    #[error("Failed to claim interface {interface}: {reason}")]
    ClaimFailed { interface: u8, reason: String },

    /// Non-timeout transfer failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Zero or fewer bytes were written
    #[error("Failed to write data")]
    WriteFailed,

    /// The device worker is not running
    #[error("HID host unavailable: {0}")]
    Unavailable(String),
}

impl Serialize for HidError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.to_string().as_ref())
    }
}

/// Type alias for HID operation results
pub type Result<T> = std::result::Result<T, HidError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HidError::AuthorizationInProgress {
            pending: "usb:1-1".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Authorization already in progress"));
        assert!(msg.contains("usb:1-1"));
    }

    #[test]
    fn test_error_serializes_as_message() {
        let err = HidError::DeviceNotOpen {
            path: "usb:1-2".to_string(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Device not open: usb:1-2\"");
    }
}
