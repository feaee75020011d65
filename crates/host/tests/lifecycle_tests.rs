//! Integration tests for the device lifecycle
//!
//! Every test drives a real worker thread through `HidHost`, with
//! `MockPlatform` standing in for the OS device-access layer.

use common::HidEvent;
use common::test_utils::{
    DEFAULT_TEST_TIMEOUT, create_mock_descriptor, create_mock_hid_interface, with_timeout,
};
use host::platform::PlatformError;
use host::usb::WorkerOptions;
use host::{HidHost, MockDevice, MockPlatform, PermissionMode};
use protocol::{HidError, InterfaceDescriptor};
use std::time::Duration;

const KEYBOARD: &str = "usb:1-1";
const GAMEPAD: &str = "usb:1-2";

fn keyboard() -> MockDevice {
    MockDevice::new(
        create_mock_descriptor(KEYBOARD, 0x1C40, 0x05B8),
        create_mock_hid_interface(64),
    )
    .with_serial("KB-0001")
}

fn gamepad() -> MockDevice {
    MockDevice::new(
        create_mock_descriptor(GAMEPAD, 0x045E, 0x028E),
        create_mock_hid_interface(32),
    )
}

fn start(platform: &MockPlatform) -> HidHost {
    start_with(platform, WorkerOptions::default(), None)
}

fn start_with(
    platform: &MockPlatform,
    options: WorkerOptions,
    permission_timeout: Option<Duration>,
) -> HidHost {
    let shared = platform.clone();
    HidHost::spawn(options, permission_timeout, move || Ok(shared))
}

/// Wait until the platform has issued `count` permission prompts for `path`
async fn wait_for_prompts(platform: &MockPlatform, path: &str, count: u32) {
    with_timeout(DEFAULT_TEST_TIMEOUT, async {
        while platform.permission_requests(path) < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("permission prompt was never issued");
}

/// Skip events until one matching `pred` arrives
async fn wait_for_event(host: &HidHost, pred: impl Fn(&HidEvent) -> bool) -> HidEvent {
    with_timeout(DEFAULT_TEST_TIMEOUT, async {
        loop {
            let event = host.next_event().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event never arrived")
}

#[tokio::test]
async fn test_open_write_read_close_scenario() {
    let platform = MockPlatform::new();
    platform.add_device(keyboard());
    let host = start(&platform);

    let devices = host.list_devices().await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].path, KEYBOARD);
    assert_eq!(devices[0].vendor_id, 0x1C40);
    assert_eq!(devices[0].product_id, 0x05B8);
    assert_eq!(devices[0].serial_number, None);

    let opener = host.clone();
    let open = tokio::spawn(async move { opener.open(KEYBOARD).await });
    wait_for_prompts(&platform, KEYBOARD, 1).await;
    assert!(!open.is_finished());

    platform.respond(KEYBOARD, true);
    with_timeout(DEFAULT_TEST_TIMEOUT, open)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    host.write(KEYBOARD, &[0x04, 0x02]).await.unwrap();
    assert_eq!(platform.output_reports(KEYBOARD), vec![vec![0x04, 0x02]]);

    platform.push_input_report(KEYBOARD, &[0x01, 0x00, 0x04]);
    assert_eq!(host.read(KEYBOARD, 100).await.unwrap(), vec![0x01, 0x00, 0x04]);

    host.close(KEYBOARD).await.unwrap();
    assert_eq!(
        host.read(KEYBOARD, 100).await,
        Err(HidError::DeviceNotOpen {
            path: KEYBOARD.to_string()
        })
    );
    assert_eq!(platform.open_handles(KEYBOARD), 0);

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_open_missing_path() {
    let platform = MockPlatform::new();
    platform.add_device(keyboard());
    let host = start(&platform);

    assert_eq!(
        host.open("missing").await,
        Err(HidError::NotFound {
            path: "missing".to_string()
        })
    );
    assert!(host.open_paths().await.unwrap().is_empty());
    assert_eq!(platform.permission_requests("missing"), 0);
    assert_eq!(platform.permission_requests(KEYBOARD), 0);

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_resolve_matches_enumeration() {
    let platform = MockPlatform::new();
    platform.add_device(keyboard());
    platform.add_device(gamepad());
    let host = start(&platform);

    for device in host.list_devices().await.unwrap() {
        assert_eq!(host.resolve(&device.path).await.unwrap(), device);
    }

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_open_is_idempotent() {
    let platform = MockPlatform::new();
    platform.set_permission_mode(PermissionMode::AutoGrant);
    platform.add_device(keyboard());
    let host = start(&platform);

    host.open(KEYBOARD).await.unwrap();
    host.open(KEYBOARD).await.unwrap();

    assert_eq!(platform.permission_requests(KEYBOARD), 1);
    assert_eq!(platform.open_handles(KEYBOARD), 1);
    assert_eq!(host.open_paths().await.unwrap(), vec![KEYBOARD.to_string()]);

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_authorized_device_opens_without_prompt() {
    let platform = MockPlatform::new();
    platform.add_device(keyboard().authorized());
    let host = start(&platform);

    // Serial number is visible once access has been granted
    let descriptor = host.resolve(KEYBOARD).await.unwrap();
    assert_eq!(descriptor.serial_number.as_deref(), Some("KB-0001"));

    host.open(KEYBOARD).await.unwrap();
    assert_eq!(platform.permission_requests(KEYBOARD), 0);

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_closed_device_rejects_transfers() {
    let platform = MockPlatform::new();
    platform.add_device(keyboard().authorized());
    let host = start(&platform);

    host.open(KEYBOARD).await.unwrap();
    host.close(KEYBOARD).await.unwrap();

    let not_open = HidError::DeviceNotOpen {
        path: KEYBOARD.to_string(),
    };
    assert_eq!(host.read(KEYBOARD, 10).await, Err(not_open.clone()));
    assert_eq!(host.write(KEYBOARD, &[0x01]).await, Err(not_open.clone()));
    assert_eq!(host.close(KEYBOARD).await, Err(not_open));

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_detach_closes_open_device() {
    let platform = MockPlatform::new();
    platform.add_device(keyboard().authorized());
    let host = start(&platform);

    host.open(KEYBOARD).await.unwrap();
    platform.unplug(KEYBOARD);

    let event = wait_for_event(&host, |e| matches!(e, HidEvent::DeviceDetached { .. })).await;
    assert_eq!(
        event,
        HidEvent::DeviceDetached {
            path: KEYBOARD.to_string(),
            was_open: true
        }
    );

    assert!(host.open_paths().await.unwrap().is_empty());
    let not_open = HidError::DeviceNotOpen {
        path: KEYBOARD.to_string(),
    };
    assert_eq!(host.read(KEYBOARD, 10).await, Err(not_open.clone()));
    assert_eq!(host.write(KEYBOARD, &[0x01]).await, Err(not_open));

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_detach_of_closed_device_is_noop() {
    let platform = MockPlatform::new();
    platform.add_device(keyboard().authorized());
    let host = start(&platform);

    host.notify_detach(KEYBOARD).await.unwrap();
    host.notify_detach(KEYBOARD).await.unwrap();

    let event = wait_for_event(&host, |e| matches!(e, HidEvent::DeviceDetached { .. })).await;
    assert_eq!(
        event,
        HidEvent::DeviceDetached {
            path: KEYBOARD.to_string(),
            was_open: false
        }
    );
    assert!(host.open_paths().await.unwrap().is_empty());

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_second_path_rejected_while_authorization_pending() {
    let platform = MockPlatform::new();
    platform.add_device(keyboard());
    platform.add_device(gamepad());
    let host = start(&platform);

    let opener = host.clone();
    let open_a = tokio::spawn(async move { opener.open(KEYBOARD).await });
    wait_for_prompts(&platform, KEYBOARD, 1).await;

    assert_eq!(
        host.open(GAMEPAD).await,
        Err(HidError::AuthorizationInProgress {
            pending: KEYBOARD.to_string()
        })
    );
    assert_eq!(platform.permission_requests(GAMEPAD), 0);

    platform.respond(KEYBOARD, false);
    assert_eq!(
        with_timeout(DEFAULT_TEST_TIMEOUT, open_a).await.unwrap().unwrap(),
        Err(HidError::PermissionDenied {
            path: KEYBOARD.to_string()
        })
    );

    // The slot is free again, so B gets its own prompt
    let opener = host.clone();
    let open_b = tokio::spawn(async move { opener.open(GAMEPAD).await });
    wait_for_prompts(&platform, GAMEPAD, 1).await;
    platform.respond(GAMEPAD, true);
    with_timeout(DEFAULT_TEST_TIMEOUT, open_b)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_same_path_open_is_coalesced() {
    let platform = MockPlatform::new();
    platform.add_device(keyboard());
    let host = start(&platform);

    let first = host.clone();
    let open_1 = tokio::spawn(async move { first.open(KEYBOARD).await });
    wait_for_prompts(&platform, KEYBOARD, 1).await;

    let second = host.clone();
    let open_2 = tokio::spawn(async move { second.open(KEYBOARD).await });
    // Give the second open time to reach the worker before deciding
    tokio::time::sleep(Duration::from_millis(50)).await;

    platform.respond(KEYBOARD, true);
    for open in [open_1, open_2] {
        with_timeout(DEFAULT_TEST_TIMEOUT, open)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
    assert_eq!(platform.permission_requests(KEYBOARD), 1);
    assert_eq!(platform.open_handles(KEYBOARD), 1);

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_mismatched_decision_is_ignored() {
    let platform = MockPlatform::new();
    platform.add_device(keyboard());
    platform.add_device(gamepad());
    let host = start(&platform);

    let opener = host.clone();
    let open = tokio::spawn(async move { opener.open(KEYBOARD).await });
    wait_for_prompts(&platform, KEYBOARD, 1).await;

    host.notify_permission(GAMEPAD, true).await.unwrap();
    // Round-trip through the worker so the stray decision has been processed
    host.open_paths().await.unwrap();
    assert!(!open.is_finished());

    platform.respond(KEYBOARD, true);
    with_timeout(DEFAULT_TEST_TIMEOUT, open)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_detach_resolves_pending_authorization() {
    let platform = MockPlatform::new();
    platform.add_device(keyboard());
    let host = start(&platform);

    let opener = host.clone();
    let open = tokio::spawn(async move { opener.open(KEYBOARD).await });
    wait_for_prompts(&platform, KEYBOARD, 1).await;

    platform.unplug(KEYBOARD);
    assert_eq!(
        with_timeout(DEFAULT_TEST_TIMEOUT, open).await.unwrap().unwrap(),
        Err(HidError::PermissionDenied {
            path: KEYBOARD.to_string()
        })
    );
    assert!(host.open_paths().await.unwrap().is_empty());

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_permission_timeout_frees_the_slot() {
    let platform = MockPlatform::new();
    platform.add_device(keyboard());
    platform.add_device(gamepad());
    let host = start_with(
        &platform,
        WorkerOptions::default(),
        Some(Duration::from_millis(500)),
    );

    assert_eq!(
        host.open(KEYBOARD).await,
        Err(HidError::PermissionTimeout {
            path: KEYBOARD.to_string()
        })
    );

    // A late decision for the abandoned request changes nothing
    platform.respond(KEYBOARD, false);

    let opener = host.clone();
    let open = tokio::spawn(async move { opener.open(GAMEPAD).await });
    wait_for_prompts(&platform, GAMEPAD, 1).await;
    platform.respond(GAMEPAD, true);
    with_timeout(DEFAULT_TEST_TIMEOUT, open)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_permission_timeout_ignores_busy_worker() {
    let platform = MockPlatform::new();
    platform.add_device(keyboard().authorized());
    let host = start_with(
        &platform,
        WorkerOptions::default(),
        Some(Duration::from_millis(200)),
    );

    // Hold the platform long enough to stall the worker past the timeout
    let stall = platform.clone();
    let blocker = std::thread::spawn(move || {
        stall.update_device(KEYBOARD, |_| std::thread::sleep(Duration::from_millis(600)));
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    host.open(KEYBOARD).await.unwrap();
    assert_eq!(host.open_paths().await.unwrap(), vec![KEYBOARD.to_string()]);
    assert_eq!(platform.permission_requests(KEYBOARD), 0);

    blocker.join().unwrap();
    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_denied_permission() {
    let platform = MockPlatform::new();
    platform.set_permission_mode(PermissionMode::AutoDeny);
    platform.add_device(keyboard());
    let host = start(&platform);

    assert_eq!(
        host.open(KEYBOARD).await,
        Err(HidError::PermissionDenied {
            path: KEYBOARD.to_string()
        })
    );
    assert!(host.open_paths().await.unwrap().is_empty());
    assert_eq!(platform.open_handles(KEYBOARD), 0);

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_endpoints_leave_no_connection() {
    let platform = MockPlatform::new();
    let mut device = keyboard().authorized();
    device.interfaces = vec![InterfaceDescriptor {
        endpoints: Vec::new(),
        ..create_mock_hid_interface(64)
    }];
    platform.add_device(device);
    let host = start(&platform);

    assert_eq!(
        host.open(KEYBOARD).await,
        Err(HidError::EndpointsNotFound { interface: 0 })
    );
    assert!(host.open_paths().await.unwrap().is_empty());
    assert_eq!(platform.open_handles(KEYBOARD), 0);

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_claim_failure_leaves_no_connection() {
    let platform = MockPlatform::new();
    let mut device = keyboard().authorized();
    device.fail_claim = Some(PlatformError::Busy);
    platform.add_device(device);
    let host = start(&platform);

    assert!(matches!(
        host.open(KEYBOARD).await,
        Err(HidError::ClaimFailed { interface: 0, .. })
    ));
    assert!(host.open_paths().await.unwrap().is_empty());
    assert_eq!(platform.open_handles(KEYBOARD), 0);
    assert_eq!(platform.closed_handles(), 1);

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_read_without_data_is_empty() {
    let platform = MockPlatform::new();
    platform.add_device(keyboard().authorized());
    let host = start(&platform);

    host.open(KEYBOARD).await.unwrap();
    assert!(host.read(KEYBOARD, 20).await.unwrap().is_empty());
    // A zero timeout is clamped rather than blocking forever
    assert!(host.read(KEYBOARD, 0).await.unwrap().is_empty());

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_transfer_failures() {
    let platform = MockPlatform::new();
    platform.add_device(keyboard().authorized());
    let host = start(&platform);
    host.open(KEYBOARD).await.unwrap();

    platform.update_device(KEYBOARD, |d| {
        d.fail_read = Some(PlatformError::Io("pipe".to_string()));
        d.write_result = Some(Ok(0));
    });

    assert!(matches!(
        host.read(KEYBOARD, 10).await,
        Err(HidError::Io(_))
    ));
    assert_eq!(
        host.write(KEYBOARD, &[0x01]).await,
        Err(HidError::WriteFailed)
    );
    assert_eq!(host.write(KEYBOARD, &[]).await, Err(HidError::WriteFailed));

    // Failures do not close the connection
    assert_eq!(host.open_paths().await.unwrap(), vec![KEYBOARD.to_string()]);

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_close_still_removes_connection() {
    let platform = MockPlatform::new();
    platform.add_device(keyboard().authorized());
    let host = start(&platform);
    host.open(KEYBOARD).await.unwrap();

    platform.update_device(KEYBOARD, |d| {
        d.fail_release = Some(PlatformError::NoDevice)
    });
    assert!(matches!(host.close(KEYBOARD).await, Err(HidError::Io(_))));
    assert!(host.open_paths().await.unwrap().is_empty());

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_open_devices_hidden_from_listing() {
    let platform = MockPlatform::new();
    platform.add_device(keyboard().authorized());
    platform.add_device(gamepad().authorized());
    let host = start(&platform);

    host.open(KEYBOARD).await.unwrap();
    let paths: Vec<String> = host
        .list_devices()
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.path)
        .collect();
    assert_eq!(paths, vec![GAMEPAD.to_string()]);

    // Still resolvable while hidden
    assert_eq!(host.resolve(KEYBOARD).await.unwrap().path, KEYBOARD);

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_open_devices_listed_when_not_hidden() {
    let platform = MockPlatform::new();
    platform.add_device(keyboard().authorized());
    let options = WorkerOptions {
        hide_open_devices: false,
        ..WorkerOptions::default()
    };
    let host = start_with(&platform, options, None);

    host.open(KEYBOARD).await.unwrap();
    assert_eq!(host.list_devices().await.unwrap().len(), 1);

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_filters_restrict_listing_and_resolve() {
    let platform = MockPlatform::new();
    platform.add_device(keyboard());
    platform.add_device(gamepad());
    let options = WorkerOptions {
        filters: vec!["0x1c40:*".to_string()],
        ..WorkerOptions::default()
    };
    let host = start_with(&platform, options, None);

    let devices = host.list_devices().await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].path, KEYBOARD);
    assert_eq!(
        host.resolve(GAMEPAD).await,
        Err(HidError::NotFound {
            path: GAMEPAD.to_string()
        })
    );

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_hotplug_events() {
    let platform = MockPlatform::new();
    let host = start(&platform);
    // Make sure the worker has started the platform before plugging
    host.open_paths().await.unwrap();

    platform.plug(keyboard());
    assert_eq!(
        wait_for_event(&host, |e| matches!(e, HidEvent::DeviceAttached { .. })).await,
        HidEvent::DeviceAttached {
            path: KEYBOARD.to_string()
        }
    );
    assert_eq!(host.list_devices().await.unwrap().len(), 1);

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_everything() {
    let platform = MockPlatform::new();
    platform.add_device(keyboard().authorized());
    platform.add_device(gamepad().authorized());
    let host = start(&platform);

    host.open(KEYBOARD).await.unwrap();
    host.open(GAMEPAD).await.unwrap();
    host.shutdown().await.unwrap();

    assert_eq!(platform.open_handles(KEYBOARD), 0);
    assert_eq!(platform.open_handles(GAMEPAD), 0);
    assert_eq!(platform.closed_handles(), 2);
    assert!(matches!(
        host.list_devices().await,
        Err(HidError::Unavailable(_))
    ));

    // Idempotent
    host.shutdown().await.unwrap();
}
