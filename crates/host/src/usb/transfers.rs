//! HID report transfers
//!
//! Reads are a single bounded interrupt IN transfer of at most one packet.
//! Writes send one output report with a fixed timeout.

use crate::platform::{PlatformError, UsbPlatform};
use crate::usb::connection::Connection;
use protocol::HidError;
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout for output reports (not caller-configurable)
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Clamp a caller-supplied read timeout to `max_ms`
///
/// A timeout of 0 would mean "wait forever" to libusb and block the worker,
/// so it is treated as the maximum.
pub fn clamp_read_timeout(timeout_ms: u32, max_ms: u32) -> Duration {
    let ms = if timeout_ms == 0 {
        max_ms
    } else {
        timeout_ms.min(max_ms)
    };
    Duration::from_millis(ms as u64)
}

/// Read one input report
///
/// A timeout or a zero-length transfer yields an empty report, not an error.
pub fn read<P: UsbPlatform>(
    platform: &P,
    connection: &mut Connection<P::Handle>,
    timeout: Duration,
) -> Result<Vec<u8>, HidError> {
    let endpoint = connection.endpoints.in_endpoint;
    let mut buffer = vec![0u8; endpoint.max_packet_size as usize];

    match platform.read_interrupt(&mut connection.handle, &endpoint, &mut buffer, timeout) {
        Ok(len) => {
            buffer.truncate(len);
            debug!(
                "Read {} bytes from {} (endpoint {:#04x})",
                len, connection.path, endpoint.address
            );
            Ok(buffer)
        }
        Err(PlatformError::Timeout) => {
            debug!(
                "Interrupt IN timeout on {} after {:?} - no data available",
                connection.path, timeout
            );
            Ok(Vec::new())
        }
        Err(e) => {
            warn!("Failed to read from device {}: {}", connection.path, e);
            Err(HidError::Io(e.to_string()))
        }
    }
}

/// Write one output report
///
/// Partial writes are reported as success; zero bytes written (or any
/// transfer failure) is `WriteFailed`. Nothing is retried.
pub fn write<P: UsbPlatform>(
    platform: &P,
    connection: &mut Connection<P::Handle>,
    data: &[u8],
) -> Result<(), HidError> {
    if data.is_empty() {
        return Err(HidError::WriteFailed);
    }

    let endpoint = connection.endpoints.out_endpoint;
    match platform.write_interrupt(&mut connection.handle, &endpoint, data, WRITE_TIMEOUT) {
        Ok(written) if written > 0 => {
            if written < data.len() {
                debug!(
                    "Partial write to {}: {} of {} bytes",
                    connection.path,
                    written,
                    data.len()
                );
            }
            Ok(())
        }
        Ok(_) => {
            warn!("Failed to write data to {}: 0 bytes written", connection.path);
            Err(HidError::WriteFailed)
        }
        Err(e) => {
            warn!("Failed to write data to {}: {}", connection.path, e);
            Err(HidError::WriteFailed)
        }
    }
}
