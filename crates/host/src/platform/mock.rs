//! In-memory platform
//!
//! Simulates a device table with scripted interfaces, queued input reports and
//! a user-mediated permission prompt. Clones share state, so a test can keep
//! one clone to drive the simulation while the worker thread owns another.

use super::{PlatformError, UsbPlatform};
use common::Notifier;
use protocol::{
    DeviceDescriptor, EndpointDirection, EndpointInfo, EndpointTransferType, InterfaceDescriptor,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// How the simulated permission prompt answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionMode {
    /// Wait for [`MockPlatform::respond`]
    #[default]
    Prompt,
    /// Grant on the spot
    AutoGrant,
    /// Deny on the spot
    AutoDeny,
}

/// A simulated device
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub descriptor: DeviceDescriptor,
    /// Reported in the descriptor only once the device is authorized
    pub serial_number: Option<String>,
    pub interfaces: Vec<InterfaceDescriptor>,
    pub authorized: bool,
    /// Reports returned by successive interrupt IN transfers
    pub input_reports: VecDeque<Vec<u8>>,
    /// Reports received by interrupt OUT transfers
    pub output_reports: Vec<Vec<u8>>,
    pub fail_open: Option<PlatformError>,
    pub fail_claim: Option<PlatformError>,
    pub fail_release: Option<PlatformError>,
    pub fail_read: Option<PlatformError>,
    /// Overrides the byte count reported by writes; `Err` fails the transfer
    pub write_result: Option<Result<usize, PlatformError>>,
}

impl MockDevice {
    /// A HID device exposing `interface` as interface 0
    pub fn new(descriptor: DeviceDescriptor, interface: InterfaceDescriptor) -> Self {
        Self {
            descriptor,
            serial_number: None,
            interfaces: vec![interface],
            authorized: false,
            input_reports: VecDeque::new(),
            output_reports: Vec::new(),
            fail_open: None,
            fail_claim: None,
            fail_release: None,
            fail_read: None,
            write_result: None,
        }
    }

    /// A HID device whose interface 0 has interrupt IN 0x81 and OUT 0x02
    pub fn hid(descriptor: DeviceDescriptor, max_packet_size: u16) -> Self {
        let endpoint = |address, direction| EndpointInfo {
            address,
            direction,
            transfer_type: EndpointTransferType::Interrupt,
            max_packet_size,
        };
        Self::new(
            descriptor,
            InterfaceDescriptor {
                number: 0,
                class_code: 0x03,
                sub_class_code: 0,
                protocol_code: 0,
                endpoints: vec![
                    endpoint(0x81, EndpointDirection::In),
                    endpoint(0x02, EndpointDirection::Out),
                ],
            },
        )
    }

    pub fn with_serial(mut self, serial: &str) -> Self {
        self.serial_number = Some(serial.to_string());
        self
    }

    pub fn authorized(mut self) -> Self {
        self.authorized = true;
        self
    }
}

/// Open connection to a simulated device
#[derive(Debug)]
pub struct MockHandle {
    path: String,
    claimed: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    devices: Vec<MockDevice>,
    mode: PermissionMode,
    notifier: Option<Notifier>,
    permission_requests: HashMap<String, u32>,
    open_handles: HashMap<String, u32>,
    closed_handles: u32,
}

impl MockState {
    fn device(&self, path: &str) -> Option<&MockDevice> {
        self.devices.iter().find(|d| d.descriptor.path == path)
    }

    fn device_mut(&mut self, path: &str) -> Option<&mut MockDevice> {
        self.devices.iter_mut().find(|d| d.descriptor.path == path)
    }
}

/// Shared-state simulated platform
#[derive(Clone, Default)]
pub struct MockPlatform {
    inner: Arc<Mutex<MockState>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_permission_mode(&self, mode: PermissionMode) {
        self.state().mode = mode;
    }

    /// Add a device without emitting a hotplug notification
    pub fn add_device(&self, device: MockDevice) {
        self.state().devices.push(device);
    }

    /// Attach a device and notify the host
    pub fn plug(&self, device: MockDevice) {
        let path = device.descriptor.path.clone();
        let notifier = {
            let mut state = self.state();
            state.devices.push(device);
            state.notifier.clone()
        };
        if let Some(notifier) = notifier {
            let _ = notifier.device_attached(&path);
        }
    }

    /// Physically remove a device and notify the host
    pub fn unplug(&self, path: &str) {
        let notifier = {
            let mut state = self.state();
            state.devices.retain(|d| d.descriptor.path != path);
            state.notifier.clone()
        };
        if let Some(notifier) = notifier {
            let _ = notifier.device_detached(path);
        }
    }

    /// Answer the permission prompt for `path`, as the user would
    pub fn respond(&self, path: &str, granted: bool) {
        let notifier = {
            let mut state = self.state();
            if granted && let Some(device) = state.device_mut(path) {
                device.authorized = true;
            }
            state.notifier.clone()
        };
        if let Some(notifier) = notifier {
            let _ = notifier.permission_decision(path, granted);
        }
    }

    /// Queue an input report for the next read
    pub fn push_input_report(&self, path: &str, report: &[u8]) {
        if let Some(device) = self.state().device_mut(path) {
            device.input_reports.push_back(report.to_vec());
        }
    }

    /// Output reports written so far
    pub fn output_reports(&self, path: &str) -> Vec<Vec<u8>> {
        self.state()
            .device(path)
            .map(|d| d.output_reports.clone())
            .unwrap_or_default()
    }

    /// Apply a change to a device in place
    pub fn update_device(&self, path: &str, f: impl FnOnce(&mut MockDevice)) {
        if let Some(device) = self.state().device_mut(path) {
            f(device);
        }
    }

    /// Number of permission prompts issued for `path`
    pub fn permission_requests(&self, path: &str) -> u32 {
        self.state()
            .permission_requests
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    /// Number of currently open platform handles for `path`
    pub fn open_handles(&self, path: &str) -> u32 {
        self.state().open_handles.get(path).copied().unwrap_or(0)
    }

    /// Total number of handles closed through the platform
    pub fn closed_handles(&self) -> u32 {
        self.state().closed_handles
    }
}

impl UsbPlatform for MockPlatform {
    type Device = String;
    type Handle = MockHandle;

    fn start(&mut self, notifier: Notifier) -> Result<(), PlatformError> {
        self.state().notifier = Some(notifier);
        Ok(())
    }

    fn enumerate(&self) -> Result<Vec<(DeviceDescriptor, String)>, PlatformError> {
        Ok(self
            .state()
            .devices
            .iter()
            .map(|d| {
                let mut descriptor = d.descriptor.clone();
                descriptor.serial_number = if d.authorized {
                    d.serial_number.clone()
                } else {
                    None
                };
                (descriptor, d.descriptor.path.clone())
            })
            .collect())
    }

    fn has_permission(&self, device: &String) -> bool {
        self.state().device(device).is_some_and(|d| d.authorized)
    }

    fn request_permission(
        &self,
        path: &str,
        device: &String,
    ) -> Result<Option<bool>, PlatformError> {
        let mut state = self.state();
        let mode = state.mode;
        let dev = state.device_mut(device).ok_or(PlatformError::NoDevice)?;
        if mode == PermissionMode::AutoGrant {
            dev.authorized = true;
        }
        *state.permission_requests.entry(path.to_string()).or_insert(0) += 1;
        debug!("Mock permission prompt for {} ({:?})", path, mode);

        Ok(match mode {
            PermissionMode::Prompt => None,
            PermissionMode::AutoGrant => Some(true),
            PermissionMode::AutoDeny => Some(false),
        })
    }

    fn open_handle(&self, device: &String) -> Result<MockHandle, PlatformError> {
        let mut state = self.state();
        let dev = state.device(device).ok_or(PlatformError::NoDevice)?;
        if !dev.authorized {
            return Err(PlatformError::Access);
        }
        if let Some(err) = dev.fail_open.clone() {
            return Err(err);
        }
        *state.open_handles.entry(device.clone()).or_insert(0) += 1;
        Ok(MockHandle {
            path: device.clone(),
            claimed: Vec::new(),
        })
    }

    fn interface_descriptor(
        &self,
        device: &String,
        number: u8,
    ) -> Result<InterfaceDescriptor, PlatformError> {
        self.state()
            .device(device)
            .ok_or(PlatformError::NoDevice)?
            .interfaces
            .iter()
            .find(|i| i.number == number)
            .cloned()
            .ok_or(PlatformError::NotFound)
    }

    fn claim_interface(&self, handle: &mut MockHandle, number: u8) -> Result<(), PlatformError> {
        let state = self.state();
        let dev = state.device(&handle.path).ok_or(PlatformError::NoDevice)?;
        if let Some(err) = dev.fail_claim.clone() {
            return Err(err);
        }
        if handle.claimed.contains(&number) {
            return Err(PlatformError::Busy);
        }
        handle.claimed.push(number);
        Ok(())
    }

    fn release_interface(&self, handle: &mut MockHandle, number: u8) -> Result<(), PlatformError> {
        let state = self.state();
        let dev = state.device(&handle.path).ok_or(PlatformError::NoDevice)?;
        if let Some(err) = dev.fail_release.clone() {
            return Err(err);
        }
        handle.claimed.retain(|n| *n != number);
        Ok(())
    }

    fn close_handle(&self, handle: MockHandle) -> Result<(), PlatformError> {
        let mut state = self.state();
        if let Some(count) = state.open_handles.get_mut(&handle.path) {
            *count = count.saturating_sub(1);
        }
        state.closed_handles += 1;
        Ok(())
    }

    fn read_interrupt(
        &self,
        handle: &mut MockHandle,
        _endpoint: &EndpointInfo,
        buffer: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, PlatformError> {
        let mut state = self.state();
        let dev = state
            .device_mut(&handle.path)
            .ok_or(PlatformError::NoDevice)?;
        if let Some(err) = dev.fail_read.clone() {
            return Err(err);
        }
        match dev.input_reports.pop_front() {
            Some(report) => {
                let len = report.len().min(buffer.len());
                buffer[..len].copy_from_slice(&report[..len]);
                Ok(len)
            }
            None => Err(PlatformError::Timeout),
        }
    }

    fn write_interrupt(
        &self,
        handle: &mut MockHandle,
        _endpoint: &EndpointInfo,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, PlatformError> {
        let mut state = self.state();
        let dev = state
            .device_mut(&handle.path)
            .ok_or(PlatformError::NoDevice)?;
        match dev.write_result.clone() {
            Some(Err(err)) => Err(err),
            Some(Ok(written)) => Ok(written),
            None => {
                dev.output_reports.push(data.to_vec());
                Ok(data.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{create_mock_descriptor, create_mock_hid_interface};

    fn keyboard() -> MockDevice {
        MockDevice::new(
            create_mock_descriptor("usb:1-1", 0x1C40, 0x05B8),
            create_mock_hid_interface(64),
        )
        .with_serial("SN0001")
    }

    #[test]
    fn test_serial_hidden_until_authorized() {
        let platform = MockPlatform::new();
        platform.add_device(keyboard());

        let devices = platform.enumerate().unwrap();
        assert_eq!(devices[0].0.serial_number, None);

        platform.update_device("usb:1-1", |d| d.authorized = true);
        let devices = platform.enumerate().unwrap();
        assert_eq!(devices[0].0.serial_number.as_deref(), Some("SN0001"));
    }

    #[test]
    fn test_open_requires_authorization() {
        let platform = MockPlatform::new();
        platform.add_device(keyboard());

        let device = "usb:1-1".to_string();
        assert_eq!(
            platform.open_handle(&device).unwrap_err(),
            PlatformError::Access
        );

        platform.update_device("usb:1-1", |d| d.authorized = true);
        let handle = platform.open_handle(&device).unwrap();
        assert_eq!(platform.open_handles("usb:1-1"), 1);
        platform.close_handle(handle).unwrap();
        assert_eq!(platform.open_handles("usb:1-1"), 0);
    }

    #[test]
    fn test_read_drains_queue_then_times_out() {
        let platform = MockPlatform::new();
        platform.add_device(keyboard().authorized());
        platform.push_input_report("usb:1-1", &[0x01, 0x02, 0x03]);

        let device = "usb:1-1".to_string();
        let mut handle = platform.open_handle(&device).unwrap();
        let endpoint = create_mock_hid_interface(64).endpoints[0];
        let mut buffer = [0u8; 64];

        let n = platform
            .read_interrupt(&mut handle, &endpoint, &mut buffer, Duration::from_millis(10))
            .unwrap();
        assert_eq!(&buffer[..n], &[0x01, 0x02, 0x03]);

        let err = platform
            .read_interrupt(&mut handle, &endpoint, &mut buffer, Duration::from_millis(10))
            .unwrap_err();
        assert_eq!(err, PlatformError::Timeout);
    }

    #[test]
    fn test_hid_device_has_interrupt_pair() {
        let device = MockDevice::hid(create_mock_descriptor("usb:1-1", 0x1C40, 0x05B8), 8);
        assert_eq!(device.interfaces, vec![create_mock_hid_interface(8)]);
        assert!(!device.authorized);
    }

    #[test]
    fn test_permission_modes_answer_on_the_spot() {
        let platform = MockPlatform::new();
        platform.add_device(keyboard());
        let device = "usb:1-1".to_string();

        assert_eq!(platform.request_permission("usb:1-1", &device), Ok(None));
        assert!(!platform.has_permission(&device));

        platform.set_permission_mode(PermissionMode::AutoDeny);
        assert_eq!(platform.request_permission("usb:1-1", &device), Ok(Some(false)));
        assert!(!platform.has_permission(&device));

        platform.set_permission_mode(PermissionMode::AutoGrant);
        assert_eq!(platform.request_permission("usb:1-1", &device), Ok(Some(true)));
        assert!(platform.has_permission(&device));
        assert_eq!(platform.permission_requests("usb:1-1"), 3);

        assert_eq!(
            platform.request_permission("usb:9-9", &"usb:9-9".to_string()),
            Err(PlatformError::NoDevice)
        );
    }

    #[test]
    fn test_double_claim_is_busy() {
        let platform = MockPlatform::new();
        platform.add_device(keyboard().authorized());

        let mut handle = platform.open_handle(&"usb:1-1".to_string()).unwrap();
        platform.claim_interface(&mut handle, 0).unwrap();
        assert_eq!(
            platform.claim_interface(&mut handle, 0).unwrap_err(),
            PlatformError::Busy
        );
        platform.release_interface(&mut handle, 0).unwrap();
        platform.claim_interface(&mut handle, 0).unwrap();
    }
}
