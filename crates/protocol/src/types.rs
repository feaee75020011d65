//! HID device and endpoint type definitions
//!
//! This module defines the data model shared by the host core and whatever
//! glue layer marshals results to an application: device descriptors,
//! interface and endpoint metadata, and the result shapes returned to callers.

use serde::{Deserialize, Serialize};

/// Immutable snapshot of a visible HID device
///
/// Produced fresh on every enumeration and never mutated afterwards. The
/// `path` is the only identifier that crosses the host boundary; it is stable
/// for the lifetime of a single physical attachment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    /// Platform-stable opaque identifier (e.g. `usb:1-1`)
    pub path: String,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Serial number string (unavailable until access is authorized)
    pub serial_number: Option<String>,
    /// Device release number (bcdDevice)
    pub release_number: u16,
    /// Manufacturer string (if available)
    pub manufacturer_string: Option<String>,
    /// Product string (if available)
    pub product_string: Option<String>,
}

impl DeviceDescriptor {
    /// Format the VID:PID pair the way filters are written (`0x1c40:0x05b8`)
    pub fn vid_pid(&self) -> String {
        format!("{:#06x}:{:#06x}", self.vendor_id, self.product_id)
    }
}

/// Endpoint direction relative to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointDirection {
    /// Device to host
    In,
    /// Host to device
    Out,
}

/// USB endpoint transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointTransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Endpoint metadata as reported by the interface descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointInfo {
    /// Endpoint address including the direction bit (e.g. 0x81)
    pub address: u8,
    pub direction: EndpointDirection,
    pub transfer_type: EndpointTransferType,
    /// wMaxPacketSize
    pub max_packet_size: u16,
}

impl EndpointInfo {
    /// Whether this endpoint can carry HID input reports
    pub fn is_interrupt_in(&self) -> bool {
        self.direction == EndpointDirection::In
            && self.transfer_type == EndpointTransferType::Interrupt
    }

    /// Whether this endpoint can carry HID output reports
    pub fn is_interrupt_out(&self) -> bool {
        self.direction == EndpointDirection::Out
            && self.transfer_type == EndpointTransferType::Interrupt
    }
}

/// Interface metadata, already retrieved from the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    /// bInterfaceNumber
    pub number: u8,
    /// bInterfaceClass (3 = HID)
    pub class_code: u8,
    pub sub_class_code: u8,
    pub protocol_code: u8,
    /// Endpoints in descriptor order
    pub endpoints: Vec<EndpointInfo>,
}

/// IN/OUT interrupt endpoints used for HID transfers
///
/// Discovered once per claimed interface and owned by the connection that
/// claimed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPair {
    pub in_endpoint: EndpointInfo,
    pub out_endpoint: EndpointInfo,
}

/// Result shape of a device enumeration, as handed to the glue layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumerateResult {
    pub devices: Vec<DeviceDescriptor>,
}

/// Result shape of a read, as handed to the glue layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResult {
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}
