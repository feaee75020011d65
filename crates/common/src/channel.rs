//! Async channel bridge between callers and the HID worker thread
//!
//! Every mutation of host state (open connections, the pending permission
//! request) happens on the worker thread. Callers and platform notification
//! sources only ever post [`HidCommand`]s into the same queue, so the worker
//! observes them one at a time.

use async_channel::{Receiver, Sender, TrySendError, bounded};
use protocol::DeviceDescriptor;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Reply channel for a caller-facing operation
pub type Reply<T> = oneshot::Sender<protocol::Result<T>>;

/// Commands posted to the HID worker thread
#[derive(Debug)]
pub enum HidCommand {
    /// Snapshot of currently visible devices
    ListDevices {
        response: Reply<Vec<DeviceDescriptor>>,
    },

    /// Resolve a path against the platform's current device table
    Resolve {
        path: String,
        response: Reply<DeviceDescriptor>,
    },

    /// Open a device, waiting for a permission decision if needed
    ///
    /// `prompted` receives the pending request's ticket once the caller is
    /// suspended on a permission prompt; it is dropped unanswered otherwise.
    Open {
        path: String,
        response: Reply<()>,
        prompted: oneshot::Sender<u64>,
    },

    /// Close an open device
    Close { path: String, response: Reply<()> },

    /// Read one input report
    Read {
        path: String,
        timeout_ms: u32,
        response: Reply<Vec<u8>>,
    },

    /// Write one output report
    Write {
        path: String,
        data: Vec<u8>,
        response: Reply<()>,
    },

    /// Paths of currently open connections
    OpenPaths {
        response: oneshot::Sender<Vec<String>>,
    },

    /// Platform delivered a permission decision
    PermissionDecision { path: String, granted: bool },

    /// Platform reports a newly attached device
    DeviceAttached { path: String },

    /// Platform reports a device was physically removed
    DeviceDetached { path: String },

    /// A waiting caller gave up on the pending permission request
    ///
    /// Ignored unless `ticket` still identifies the pending request.
    AbandonAuthorization { path: String, ticket: u64 },

    /// Close everything and stop the worker thread
    Shutdown,
}

/// Lifecycle events emitted by the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HidEvent {
    DeviceAttached { path: String },
    DeviceDetached { path: String, was_open: bool },
    Opened { path: String },
    Closed { path: String },
    PermissionResolved { path: String, granted: bool },
}

/// Handle for async callers
#[derive(Clone)]
pub struct HidBridge {
    cmd_tx: Sender<HidCommand>,
    event_rx: Receiver<HidEvent>,
}

impl HidBridge {
    /// Send a command to the worker thread
    pub async fn send_command(&self, cmd: HidCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive the next lifecycle event
    pub async fn recv_event(&self) -> crate::Result<HidEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Notifier posting into this bridge's command queue
    pub fn notifier(&self) -> Notifier {
        Notifier {
            cmd_tx: self.cmd_tx.clone(),
        }
    }
}

/// Handle for the worker thread (blocking)
pub struct HidWorker {
    pub(crate) cmd_rx: Receiver<HidCommand>,
    pub(crate) cmd_tx: Sender<HidCommand>,
    pub(crate) event_tx: Sender<HidEvent>,
}

impl HidWorker {
    /// Receive a command (blocking)
    pub fn recv_command(&self) -> crate::Result<HidCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<HidCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Emit an event without blocking
    ///
    /// Events are best-effort: when nobody drains them the oldest consumer
    /// simply misses the overflow.
    pub fn send_event(&self, event: HidEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                debug!("Event queue full, dropping {:?}", event);
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Notifier for the platform to post decisions and hotplug events
    pub fn notifier(&self) -> Notifier {
        Notifier {
            cmd_tx: self.cmd_tx.clone(),
        }
    }
}

/// Platform-side entry point for asynchronous notifications
///
/// For platform callback threads and other threads outside the worker. A
/// notification is never dropped: when the command queue is full the calling
/// thread waits for room. Must not be called from the worker thread itself.
#[derive(Clone, Debug)]
pub struct Notifier {
    cmd_tx: Sender<HidCommand>,
}

impl Notifier {
    /// Deliver a permission decision for `path`
    pub fn permission_decision(&self, path: &str, granted: bool) -> crate::Result<()> {
        self.post(HidCommand::PermissionDecision {
            path: path.to_string(),
            granted,
        })
    }

    /// Report that `path` was physically detached
    pub fn device_detached(&self, path: &str) -> crate::Result<()> {
        self.post(HidCommand::DeviceDetached {
            path: path.to_string(),
        })
    }

    /// Report that `path` was attached
    pub fn device_attached(&self, path: &str) -> crate::Result<()> {
        self.post(HidCommand::DeviceAttached {
            path: path.to_string(),
        })
    }

    fn post(&self, cmd: HidCommand) -> crate::Result<()> {
        self.cmd_tx.send_blocking(cmd).map_err(|e| {
            warn!("Failed to post platform notification: {}", e);
            crate::Error::Channel(e.to_string())
        })
    }
}

/// Create the channel bridge between callers and the worker thread
///
/// Returns (HidBridge for callers, HidWorker for the worker thread)
pub fn create_hid_bridge() -> (HidBridge, HidWorker) {
    let (cmd_tx, cmd_rx) = bounded(256);
    let (event_tx, event_rx) = bounded(256);

    (
        HidBridge {
            cmd_tx: cmd_tx.clone(),
            event_rx,
        },
        HidWorker {
            cmd_rx,
            cmd_tx,
            event_tx,
        },
    )
}
