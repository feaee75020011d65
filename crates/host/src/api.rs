//! Async façade over the HID worker thread
//!
//! [`HidHost`] is what callers (the CLI, an embedding application's glue
//! layer) hold. Every method posts one command to the worker and awaits its
//! reply, so calls from any number of tasks are serialized by the worker.

use crate::config::HostConfig;
use crate::platform::{PlatformError, UsbPlatform};
use crate::usb::{WorkerOptions, spawn_hid_worker};
use common::{HidBridge, HidCommand, HidEvent, Notifier, create_hid_bridge};
use protocol::{DeviceDescriptor, HidError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

type WorkerHandle = JoinHandle<Result<(), PlatformError>>;

/// Handle to a running HID host
#[derive(Clone)]
pub struct HidHost {
    bridge: HidBridge,
    permission_timeout: Option<Duration>,
    worker: Arc<Mutex<Option<WorkerHandle>>>,
}

impl HidHost {
    /// Start the worker thread with settings from `config`
    ///
    /// `factory` runs on the worker thread and builds the platform.
    pub fn start<P, F>(config: &HostConfig, factory: F) -> Self
    where
        P: UsbPlatform + 'static,
        F: FnOnce() -> Result<P, PlatformError> + Send + 'static,
    {
        Self::spawn(config.worker_options(), config.permission.timeout(), factory)
    }

    /// Start the worker thread with explicit options
    pub fn spawn<P, F>(
        options: WorkerOptions,
        permission_timeout: Option<Duration>,
        factory: F,
    ) -> Self
    where
        P: UsbPlatform + 'static,
        F: FnOnce() -> Result<P, PlatformError> + Send + 'static,
    {
        let (bridge, worker) = create_hid_bridge();
        let handle = spawn_hid_worker(worker, options, factory);

        Self {
            bridge,
            permission_timeout,
            worker: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Snapshot of currently visible devices
    pub async fn list_devices(&self) -> protocol::Result<Vec<DeviceDescriptor>> {
        let (tx, rx) = oneshot::channel();
        self.send(HidCommand::ListDevices { response: tx }).await?;
        Self::reply(rx).await?
    }

    /// Resolve a path to its live descriptor
    pub async fn resolve(&self, path: &str) -> protocol::Result<DeviceDescriptor> {
        let (tx, rx) = oneshot::channel();
        self.send(HidCommand::Resolve {
            path: path.to_string(),
            response: tx,
        })
        .await?;
        Self::reply(rx).await?
    }

    /// Open a device
    ///
    /// Suspends until the user's permission decision when the device is not
    /// yet authorized. With a configured permission timeout, the time spent
    /// waiting on the user (not on the worker) is bounded: once it runs out
    /// the request is withdrawn and the worker's answer is returned, which is
    /// `PermissionTimeout` unless the decision got there first.
    pub async fn open(&self, path: &str) -> protocol::Result<()> {
        let (tx, mut rx) = oneshot::channel();
        let (prompted_tx, prompted_rx) = oneshot::channel();
        self.send(HidCommand::Open {
            path: path.to_string(),
            response: tx,
            prompted: prompted_tx,
        })
        .await?;

        let Some(limit) = self.permission_timeout else {
            return Self::reply(rx).await?;
        };

        // The deadline starts once the worker has parked us on a prompt
        let ticket = tokio::select! {
            result = &mut rx => return result.map_err(|_| Self::worker_gone())?,
            ticket = prompted_rx => match ticket {
                Ok(ticket) => ticket,
                Err(_) => return Self::reply(rx).await?,
            },
        };

        match tokio::time::timeout(limit, &mut rx).await {
            Ok(result) => result.map_err(|_| Self::worker_gone())?,
            Err(_) => {
                warn!("No permission decision for {} after {:?}", path, limit);
                self.send(HidCommand::AbandonAuthorization {
                    path: path.to_string(),
                    ticket,
                })
                .await?;
                Self::reply(rx).await?
            }
        }
    }

    /// Close an open device
    pub async fn close(&self, path: &str) -> protocol::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(HidCommand::Close {
            path: path.to_string(),
            response: tx,
        })
        .await?;
        Self::reply(rx).await?
    }

    /// Read one input report; an empty vector means no data arrived in time
    pub async fn read(&self, path: &str, timeout_ms: u32) -> protocol::Result<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.send(HidCommand::Read {
            path: path.to_string(),
            timeout_ms,
            response: tx,
        })
        .await?;
        Self::reply(rx).await?
    }

    /// Write one output report
    pub async fn write(&self, path: &str, data: &[u8]) -> protocol::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(HidCommand::Write {
            path: path.to_string(),
            data: data.to_vec(),
            response: tx,
        })
        .await?;
        Self::reply(rx).await?
    }

    /// Paths of currently open devices
    pub async fn open_paths(&self) -> protocol::Result<Vec<String>> {
        let (tx, rx) = oneshot::channel();
        self.send(HidCommand::OpenPaths { response: tx }).await?;
        Self::reply(rx).await
    }

    /// Deliver the user's permission decision for `path`
    pub async fn notify_permission(&self, path: &str, granted: bool) -> protocol::Result<()> {
        self.send(HidCommand::PermissionDecision {
            path: path.to_string(),
            granted,
        })
        .await
    }

    /// Report that `path` was physically removed
    pub async fn notify_detach(&self, path: &str) -> protocol::Result<()> {
        self.send(HidCommand::DeviceDetached {
            path: path.to_string(),
        })
        .await
    }

    /// Notifier for platform threads (blocks while the command queue is full)
    pub fn notifier(&self) -> Notifier {
        self.bridge.notifier()
    }

    /// Next lifecycle event
    pub async fn next_event(&self) -> protocol::Result<HidEvent> {
        Ok(self.bridge.recv_event().await?)
    }

    /// Close every device and stop the worker thread
    ///
    /// Idempotent; later calls (and calls on clones) return immediately.
    pub async fn shutdown(&self) -> protocol::Result<()> {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(handle) = handle else {
            return Ok(());
        };

        self.send(HidCommand::Shutdown).await?;

        let joined = tokio::task::spawn_blocking(move || handle.join())
            .await
            .map_err(|e| HidError::Unavailable(e.to_string()))?;
        match joined {
            Ok(Ok(())) => debug!("HID worker joined"),
            Ok(Err(e)) => debug!("HID worker exited after startup failure: {}", e),
            Err(_) => warn!("HID worker thread panicked"),
        }
        Ok(())
    }

    async fn send(&self, cmd: HidCommand) -> protocol::Result<()> {
        Ok(self.bridge.send_command(cmd).await?)
    }

    async fn reply<T>(rx: oneshot::Receiver<T>) -> protocol::Result<T> {
        rx.await.map_err(|_| Self::worker_gone())
    }

    fn worker_gone() -> HidError {
        HidError::Unavailable("HID worker stopped".to_string())
    }
}
