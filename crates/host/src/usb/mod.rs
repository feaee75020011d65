//! HID device core
//!
//! - Registry: device enumeration and path resolution
//! - Endpoint resolution for the claimed HID interface
//! - Permission broker: the single pending authorization
//! - Connection manager: open/close lifecycle
//! - Transfers: input/output reports
//!
//! All of it runs on the dedicated worker thread, which owns the platform
//! exclusively and keeps blocking transfers off the Tokio runtime.

pub mod connection;
pub mod endpoints;
pub mod permission;
pub mod registry;
pub mod transfers;
pub mod worker;

pub use connection::{Connection, ConnectionManager};
pub use permission::{BrokerState, PermissionBroker, RequestOutcome};
pub use registry::Registry;
pub use worker::{HidWorkerThread, WorkerOptions, spawn_hid_worker};
