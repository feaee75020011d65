//! Test utilities for rust-hid-host
//!
//! Provides descriptor builders and async helpers shared by the test suites
//! of every crate.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_mock_descriptor;
//!
//! let device = create_mock_descriptor("usb:1-1", 0x1C40, 0x05B8);
//! assert_eq!(device.vendor_id, 0x1C40);
//! ```

use protocol::{
    DeviceDescriptor, EndpointDirection, EndpointInfo, EndpointTransferType, InterfaceDescriptor,
};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// USB interface class code for HID
pub const HID_CLASS: u8 = 0x03;

/// Create a mock DeviceDescriptor for testing
///
/// The serial number is left empty, as it is before access is authorized.
pub fn create_mock_descriptor(path: &str, vendor_id: u16, product_id: u16) -> DeviceDescriptor {
    DeviceDescriptor {
        path: path.to_string(),
        vendor_id,
        product_id,
        serial_number: None,
        release_number: 0x0100,
        manufacturer_string: Some(format!("Test Manufacturer {:04x}", vendor_id)),
        product_string: Some(format!("Test Product {:04x}", product_id)),
    }
}

/// Create `count` descriptors on distinct paths (`usb:1-1`, `usb:1-2`, ...)
pub fn create_mock_descriptor_list(count: u16) -> Vec<DeviceDescriptor> {
    (1..=count)
        .map(|i| create_mock_descriptor(&format!("usb:1-{}", i), 0x1234, 0x5600 + i))
        .collect()
}

/// Create an endpoint description
pub fn create_mock_endpoint(
    address: u8,
    transfer_type: EndpointTransferType,
    max_packet_size: u16,
) -> EndpointInfo {
    let direction = if address & 0x80 != 0 {
        EndpointDirection::In
    } else {
        EndpointDirection::Out
    };
    EndpointInfo {
        address,
        direction,
        transfer_type,
        max_packet_size,
    }
}

/// Create a HID interface 0 with one interrupt IN (0x81) and one interrupt OUT (0x02) endpoint
pub fn create_mock_hid_interface(max_packet_size: u16) -> InterfaceDescriptor {
    InterfaceDescriptor {
        number: 0,
        class_code: HID_CLASS,
        sub_class_code: 0,
        protocol_code: 0,
        endpoints: vec![
            create_mock_endpoint(0x81, EndpointTransferType::Interrupt, max_packet_size),
            create_mock_endpoint(0x02, EndpointTransferType::Interrupt, max_packet_size),
        ],
    }
}

/// Run a future with a timeout, returning an error if it expires
///
/// # Example
/// ```
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let value = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
/// assert_eq!(value, 42);
/// # }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
