//! libusb platform via rusb
//!
//! Desktop hosts have no user-mediated permission prompt: access is whatever
//! the OS (udev rules, group membership) already allows. A device is treated
//! as authorized when it can be opened, and a permission request is answered
//! immediately with a denial.

use super::{PlatformError, UsbPlatform};
use common::Notifier;
use protocol::{
    DeviceDescriptor, EndpointDirection, EndpointInfo, EndpointTransferType, InterfaceDescriptor,
};
use rusb::{Context, Device, DeviceHandle, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long the hotplug thread blocks in libusb before checking for shutdown
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// libusb-backed platform
pub struct RusbPlatform {
    context: Context,
    hotplug_registration: Option<Registration<Context>>,
    events_running: Arc<AtomicBool>,
    events_thread: Option<JoinHandle<()>>,
}

impl RusbPlatform {
    pub fn new() -> Result<Self, PlatformError> {
        let context = Context::new().map_err(map_rusb_error)?;
        Ok(Self {
            context,
            hotplug_registration: None,
            events_running: Arc::new(AtomicBool::new(false)),
            events_thread: None,
        })
    }

    fn register_hotplug(&mut self, notifier: Notifier) -> Result<(), PlatformError> {
        let registration = HotplugBuilder::new()
            .enumerate(false)
            .register(&self.context, Box::new(HotplugCallback { notifier }))
            .map_err(map_rusb_error)?;
        self.hotplug_registration = Some(registration);

        self.events_running.store(true, Ordering::SeqCst);
        let running = self.events_running.clone();
        let context = self.context.clone();
        let thread = std::thread::Builder::new()
            .name("usb-events".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    match context.handle_events(Some(EVENT_POLL_INTERVAL)) {
                        Ok(()) | Err(rusb::Error::Interrupted) => {}
                        Err(e) => {
                            warn!("Error handling USB events: {}", e);
                            std::thread::sleep(EVENT_POLL_INTERVAL);
                        }
                    }
                }
            })
            .map_err(|e| PlatformError::Other(format!("Failed to spawn event thread: {}", e)))?;
        self.events_thread = Some(thread);

        debug!("Hot-plug callbacks registered");
        Ok(())
    }

    fn read_strings(
        &self,
        device: &Device<Context>,
        descriptor: &rusb::DeviceDescriptor,
    ) -> (Option<String>, Option<String>, Option<String>) {
        let Ok(handle) = device.open() else {
            return (None, None, None);
        };
        let read = |index: Option<u8>| {
            index.and_then(|idx| handle.read_string_descriptor_ascii(idx).ok())
        };
        (
            read(descriptor.manufacturer_string_index()),
            read(descriptor.product_string_index()),
            read(descriptor.serial_number_string_index()),
        )
    }
}

impl Drop for RusbPlatform {
    fn drop(&mut self) {
        self.hotplug_registration.take();
        self.events_running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.events_thread.take()
            && thread.join().is_err()
        {
            warn!("USB event thread panicked");
        }
    }
}

impl UsbPlatform for RusbPlatform {
    type Device = Device<Context>;
    type Handle = DeviceHandle<Context>;

    fn start(&mut self, notifier: Notifier) -> Result<(), PlatformError> {
        if rusb::has_hotplug() {
            self.register_hotplug(notifier)?;
        } else {
            info!("libusb has no hot-plug support, attach/detach notifications disabled");
        }
        Ok(())
    }

    fn enumerate(&self) -> Result<Vec<(DeviceDescriptor, Device<Context>)>, PlatformError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;
        let mut result = Vec::new();

        for device in devices.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(e) => {
                    debug!("Skipping device without descriptor: {}", e);
                    continue;
                }
            };

            // Root hubs are VID 0x1d6b (Linux Foundation) with device class 9 (Hub)
            if desc.vendor_id() == 0x1d6b && desc.class_code() == 9 {
                continue;
            }

            let Some(path) = device_path(&device) else {
                continue;
            };

            let (manufacturer_string, product_string, serial_number) =
                self.read_strings(&device, &desc);

            result.push((
                DeviceDescriptor {
                    path,
                    vendor_id: desc.vendor_id(),
                    product_id: desc.product_id(),
                    serial_number,
                    release_number: release_number(desc.device_version()),
                    manufacturer_string,
                    product_string,
                },
                device,
            ));
        }

        Ok(result)
    }

    fn has_permission(&self, device: &Device<Context>) -> bool {
        device.open().is_ok()
    }

    fn request_permission(
        &self,
        path: &str,
        _device: &Device<Context>,
    ) -> Result<Option<bool>, PlatformError> {
        warn!(
            "Cannot prompt for access to {} on this platform; grant it with a udev rule",
            path
        );
        Ok(Some(false))
    }

    fn open_handle(&self, device: &Device<Context>) -> Result<DeviceHandle<Context>, PlatformError> {
        let handle = device.open().map_err(map_rusb_error)?;
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable: {}", e);
        }
        Ok(handle)
    }

    fn interface_descriptor(
        &self,
        device: &Device<Context>,
        number: u8,
    ) -> Result<InterfaceDescriptor, PlatformError> {
        let config = device.active_config_descriptor().map_err(map_rusb_error)?;
        let interface = config
            .interfaces()
            .find(|i| i.number() == number)
            .ok_or(PlatformError::NotFound)?;
        let alt = interface
            .descriptors()
            .next()
            .ok_or(PlatformError::NotFound)?;

        let endpoints = alt
            .endpoint_descriptors()
            .map(|ep| EndpointInfo {
                address: ep.address(),
                direction: match ep.direction() {
                    rusb::Direction::In => EndpointDirection::In,
                    rusb::Direction::Out => EndpointDirection::Out,
                },
                transfer_type: match ep.transfer_type() {
                    rusb::TransferType::Control => EndpointTransferType::Control,
                    rusb::TransferType::Isochronous => EndpointTransferType::Isochronous,
                    rusb::TransferType::Bulk => EndpointTransferType::Bulk,
                    rusb::TransferType::Interrupt => EndpointTransferType::Interrupt,
                },
                max_packet_size: ep.max_packet_size(),
            })
            .collect();

        Ok(InterfaceDescriptor {
            number,
            class_code: alt.class_code(),
            sub_class_code: alt.sub_class_code(),
            protocol_code: alt.protocol_code(),
            endpoints,
        })
    }

    fn claim_interface(
        &self,
        handle: &mut DeviceHandle<Context>,
        number: u8,
    ) -> Result<(), PlatformError> {
        handle.claim_interface(number).map_err(map_rusb_error)
    }

    fn release_interface(
        &self,
        handle: &mut DeviceHandle<Context>,
        number: u8,
    ) -> Result<(), PlatformError> {
        handle.release_interface(number).map_err(map_rusb_error)
    }

    fn close_handle(&self, handle: DeviceHandle<Context>) -> Result<(), PlatformError> {
        // libusb_close runs on drop
        drop(handle);
        Ok(())
    }

    fn read_interrupt(
        &self,
        handle: &mut DeviceHandle<Context>,
        endpoint: &EndpointInfo,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, PlatformError> {
        handle
            .read_interrupt(endpoint.address, buffer, timeout)
            .map_err(map_rusb_error)
    }

    fn write_interrupt(
        &self,
        handle: &mut DeviceHandle<Context>,
        endpoint: &EndpointInfo,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, PlatformError> {
        handle
            .write_interrupt(endpoint.address, data, timeout)
            .map_err(map_rusb_error)
    }
}

/// Forwards libusb hotplug callbacks to the worker as notifications
struct HotplugCallback {
    notifier: Notifier,
}

impl<T: UsbContext> Hotplug<T> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<T>) {
        if let Some(path) = device_path(&device) {
            debug!("Hot-plug callback: device arrived ({})", path);
            let _ = self.notifier.device_attached(&path);
        }
    }

    fn device_left(&mut self, device: Device<T>) {
        if let Some(path) = device_path(&device) {
            debug!("Hot-plug callback: device left ({})", path);
            let _ = self.notifier.device_detached(&path);
        }
    }
}

/// Stable path for a device: `usb:<bus>-<port chain>`
///
/// Root hubs have no port chain and yield `None`.
pub fn device_path<T: UsbContext>(device: &Device<T>) -> Option<String> {
    let ports = device.port_numbers().ok()?;
    format_path(device.bus_number(), &ports)
}

fn format_path(bus: u8, ports: &[u8]) -> Option<String> {
    if ports.is_empty() {
        return None;
    }
    let chain = ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(".");
    Some(format!("usb:{}-{}", bus, chain))
}

/// Encode a device version as bcdDevice (two BCD digits of major)
fn release_number(version: rusb::Version) -> u16 {
    let major = version.major() as u16;
    (((major / 10) & 0x0f) << 12)
        | ((major % 10) << 8)
        | (((version.minor() as u16) & 0x0f) << 4)
        | ((version.sub_minor() as u16) & 0x0f)
}

/// Map rusb::Error to PlatformError
pub fn map_rusb_error(err: rusb::Error) -> PlatformError {
    match err {
        rusb::Error::Timeout => PlatformError::Timeout,
        rusb::Error::NoDevice => PlatformError::NoDevice,
        rusb::Error::Access => PlatformError::Access,
        rusb::Error::Busy => PlatformError::Busy,
        rusb::Error::NotFound => PlatformError::NotFound,
        rusb::Error::Io | rusb::Error::Pipe | rusb::Error::Overflow => {
            PlatformError::Io(err.to_string())
        }
        _ => PlatformError::Other(err.to_string()),
    }
}
