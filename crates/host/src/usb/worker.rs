//! HID worker thread
//!
//! Dedicated thread that owns the platform, the open-connection map and the
//! pending permission slot. Callers and platform notification sources reach it
//! only through the command channel, so every state transition is applied by
//! this one thread, one command at a time.

use crate::platform::{PlatformError, UsbPlatform};
use crate::usb::connection::ConnectionManager;
use crate::usb::permission::{PermissionBroker, RequestOutcome};
use crate::usb::registry::Registry;
use crate::usb::transfers;
use common::channel::Reply;
use common::{HidCommand, HidEvent, HidWorker};
use protocol::HidError;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Settings applied by the worker
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Device filters (VID:PID patterns)
    pub filters: Vec<String>,
    /// Leave open devices out of enumeration results
    pub hide_open_devices: bool,
    /// Upper bound for a single read, in milliseconds
    pub max_read_timeout_ms: u32,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            hide_open_devices: true,
            max_read_timeout_ms: 5000,
        }
    }
}

/// HID worker thread state
pub struct HidWorkerThread<P: UsbPlatform> {
    platform: P,
    registry: Registry,
    connections: ConnectionManager<P::Handle>,
    broker: PermissionBroker<P::Device>,
    max_read_timeout_ms: u32,
    worker: HidWorker,
}

impl<P: UsbPlatform> HidWorkerThread<P> {
    /// Create the worker state around an already started platform
    pub fn new(worker: HidWorker, platform: P, options: WorkerOptions) -> Self {
        Self {
            platform,
            registry: Registry::new(options.filters, options.hide_open_devices),
            connections: ConnectionManager::new(),
            broker: PermissionBroker::new(),
            max_read_timeout_ms: options.max_read_timeout_ms,
            worker,
        }
    }

    /// Process commands until Shutdown is received
    pub fn run(mut self) {
        info!("HID worker thread started");

        loop {
            match self.worker.recv_command() {
                Ok(HidCommand::Shutdown) => {
                    info!("HID worker shutting down");
                    self.shutdown();
                    break;
                }
                Ok(cmd) => self.handle_command(cmd),
                Err(e) => {
                    warn!("Command channel closed: {}", e);
                    self.shutdown();
                    break;
                }
            }
        }

        info!("HID worker thread stopped");
    }

    /// Handle a command, keeping the thread alive if the handler panics
    fn handle_command(&mut self, cmd: HidCommand) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("Panic in HID command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&mut self, cmd: HidCommand) {
        match cmd {
            HidCommand::ListDevices { response } => {
                let connections = &self.connections;
                let result = self
                    .registry
                    .list_devices(&self.platform, |path| connections.is_open(path));
                let _ = response.send(result);
            }

            HidCommand::Resolve { path, response } => {
                let result = self
                    .registry
                    .resolve(&self.platform, &path)
                    .map(|(descriptor, _)| descriptor);
                let _ = response.send(result);
            }

            HidCommand::Open {
                path,
                response,
                prompted,
            } => self.open(path, response, prompted),

            HidCommand::Close { path, response } => {
                let was_open = self.connections.is_open(&path);
                let result = self.connections.close(&self.platform, &path);
                if was_open {
                    self.worker.send_event(HidEvent::Closed { path });
                }
                let _ = response.send(result);
            }

            HidCommand::Read {
                path,
                timeout_ms,
                response,
            } => {
                let timeout =
                    transfers::clamp_read_timeout(timeout_ms, self.max_read_timeout_ms);
                let result = self
                    .connections
                    .get_mut(&path)
                    .and_then(|conn| transfers::read(&self.platform, conn, timeout));
                let _ = response.send(result);
            }

            HidCommand::Write {
                path,
                data,
                response,
            } => {
                let result = self
                    .connections
                    .get_mut(&path)
                    .and_then(|conn| transfers::write(&self.platform, conn, &data));
                let _ = response.send(result);
            }

            HidCommand::OpenPaths { response } => {
                let _ = response.send(self.connections.paths());
            }

            HidCommand::PermissionDecision { path, granted } => {
                self.on_permission_decision(&path, granted);
            }

            HidCommand::DeviceAttached { path } => {
                info!("Device attached: {}", path);
                self.worker.send_event(HidEvent::DeviceAttached { path });
            }

            HidCommand::DeviceDetached { path } => self.on_detach(path),

            HidCommand::AbandonAuthorization { path, ticket } => {
                let timeout = HidError::PermissionTimeout { path: path.clone() };
                if self.broker.abandon(&path, ticket, timeout) {
                    warn!("Authorization for {} abandoned by caller", path);
                }
            }

            HidCommand::Shutdown => {
                // Already handled in run loop
                unreachable!()
            }
        }
    }

    fn open(&mut self, path: String, response: Reply<()>, prompted: oneshot::Sender<u64>) {
        if self.connections.is_open(&path) {
            debug!("Device {} already open", path);
            let _ = response.send(Ok(()));
            return;
        }

        let device = match self.registry.resolve(&self.platform, &path) {
            Ok((_, device)) => device,
            Err(e) => {
                let _ = response.send(Err(e));
                return;
            }
        };

        if self.platform.has_permission(&device) {
            let result = self.establish(&path, &device);
            let _ = response.send(result);
            return;
        }

        let platform = &self.platform;
        let mut immediate = None;
        let outcome = self.broker.request(&path, device, response, |path, device| {
            immediate = platform.request_permission(path, device)?;
            Ok(())
        });
        debug!("Authorization request for {}: {:?}", path, outcome);

        match (outcome, immediate) {
            (RequestOutcome::Prompted, Some(granted)) => {
                self.on_permission_decision(&path, granted);
            }
            (RequestOutcome::Prompted | RequestOutcome::Coalesced, None) => {
                if let Some(pending) = self.broker.pending() {
                    let _ = prompted.send(pending.ticket());
                }
            }
            (RequestOutcome::Rejected, _) => {
                info!("Open of {} rejected: another authorization is pending", path);
            }
            _ => {}
        }
    }

    fn establish(&mut self, path: &str, device: &P::Device) -> protocol::Result<()> {
        self.connections.establish(&self.platform, path, device)?;
        self.worker.send_event(HidEvent::Opened {
            path: path.to_string(),
        });
        Ok(())
    }

    fn on_permission_decision(&mut self, path: &str, granted: bool) {
        let Some(decision) = self.broker.decide(path, granted) else {
            return;
        };

        self.worker.send_event(HidEvent::PermissionResolved {
            path: path.to_string(),
            granted,
        });

        let result = if decision.granted {
            self.establish(&decision.path, &decision.device)
        } else {
            Err(HidError::PermissionDenied {
                path: decision.path.clone(),
            })
        };
        decision.dispatch(result);
    }

    fn on_detach(&mut self, path: String) {
        info!("Device detached: {}", path);

        // Nobody can answer a prompt for a device that is gone
        let denied = HidError::PermissionDenied { path: path.clone() };
        if self.broker.cancel(&path, denied) {
            self.worker.send_event(HidEvent::PermissionResolved {
                path: path.clone(),
                granted: false,
            });
        }

        let was_open = self.connections.force_close(&self.platform, &path);
        self.worker.send_event(HidEvent::DeviceDetached { path, was_open });
    }

    fn shutdown(&mut self) {
        if let Some(path) = self.broker.pending().map(|p| p.path.clone()) {
            self.broker
                .cancel(&path, HidError::PermissionDenied { path: path.clone() });
        }
        let open = self.connections.len();
        self.connections.close_all(&self.platform);
        if open > 0 {
            info!("Closed {} open device(s)", open);
        }
    }
}

/// Answer every command with `Unavailable` until Shutdown
///
/// Used when the platform could not be started, so callers fail instead of
/// waiting on a reply that never comes.
fn serve_unavailable(worker: &HidWorker, reason: &str) {
    let err = || HidError::Unavailable(reason.to_string());
    loop {
        match worker.recv_command() {
            Ok(HidCommand::Shutdown) | Err(_) => break,
            Ok(HidCommand::ListDevices { response }) => {
                let _ = response.send(Err(err()));
            }
            Ok(HidCommand::Resolve { response, .. }) => {
                let _ = response.send(Err(err()));
            }
            Ok(HidCommand::Read { response, .. }) => {
                let _ = response.send(Err(err()));
            }
            Ok(
                HidCommand::Open { response, .. }
                | HidCommand::Close { response, .. }
                | HidCommand::Write { response, .. },
            ) => {
                let _ = response.send(Err(err()));
            }
            Ok(HidCommand::OpenPaths { response }) => {
                let _ = response.send(Vec::new());
            }
            Ok(_) => {}
        }
    }
}

/// Spawn the HID worker thread
///
/// The platform is constructed on the worker thread by `factory`, so it never
/// has to cross threads.
pub fn spawn_hid_worker<P, F>(
    worker: HidWorker,
    options: WorkerOptions,
    factory: F,
) -> std::thread::JoinHandle<Result<(), PlatformError>>
where
    P: UsbPlatform + 'static,
    F: FnOnce() -> Result<P, PlatformError> + Send + 'static,
{
    std::thread::Builder::new()
        .name("hid-worker".to_string())
        .spawn(move || {
            let started = factory().and_then(|mut platform| {
                platform.start(worker.notifier())?;
                Ok(platform)
            });
            match started {
                Ok(platform) => {
                    HidWorkerThread::new(worker, platform, options).run();
                    Ok(())
                }
                Err(e) => {
                    error!("Failed to start HID platform: {}", e);
                    serve_unavailable(&worker, &e.to_string());
                    Err(e)
                }
            }
        })
        .expect("Failed to spawn HID worker thread")
}
