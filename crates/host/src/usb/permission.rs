//! Permission broker
//!
//! Holds at most one outstanding platform permission request. The caller's
//! reply channel is parked in the pending slot and answered only once the
//! platform's decision notification arrives (or the request is cancelled).
//!
//! State machine:
//!
//! ```text
//!   Idle --request--> AwaitingDecision --decide(path matches)--> Idle
//!                       |  request(same path)  -> joins the waiters
//!                       |  request(other path) -> AuthorizationInProgress
//!                       |  decide(other path)  -> ignored
//!                       |  abandon(stale ticket) -> ignored
//!                       +--cancel(path) / abandon(ticket)------> Idle
//! ```
//!
//! Every new request gets a ticket, so a caller that gives up can withdraw
//! exactly the request it joined and never a later one for the same path.

use crate::platform::PlatformError;
use common::channel::Reply;
use protocol::HidError;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Broker state, as observed from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState<'a> {
    Idle,
    AwaitingDecision { path: &'a str },
}

/// What happened to a permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A new prompt was issued; the caller stays suspended
    Prompted,
    /// Joined the pending request for the same path
    Coalesced,
    /// A different path is pending; the caller was answered with `AuthorizationInProgress`
    Rejected,
    /// The platform refused to issue the prompt; the caller was answered with the error
    Failed,
}

/// The single pending authorization
pub struct PendingAuthorization<D> {
    pub path: String,
    pub device: D,
    ticket: u64,
    waiters: Vec<Reply<()>>,
    requested_at: Instant,
}

impl<D> PendingAuthorization<D> {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn waiters(&self) -> usize {
        self.waiters.len()
    }

    pub fn elapsed(&self) -> Duration {
        self.requested_at.elapsed()
    }
}

/// A consumed pending authorization, ready to be dispatched
pub struct Decision<D> {
    pub path: String,
    pub device: D,
    pub granted: bool,
    waiters: Vec<Reply<()>>,
}

impl<D> Decision<D> {
    /// Resume every suspended caller with `result`
    pub fn dispatch(self, result: protocol::Result<()>) {
        resume_all(self.waiters, result);
    }
}

/// Serializes user-permission requests
pub struct PermissionBroker<D> {
    pending: Option<PendingAuthorization<D>>,
    next_ticket: u64,
}

impl<D> Default for PermissionBroker<D> {
    fn default() -> Self {
        Self {
            pending: None,
            next_ticket: 1,
        }
    }
}

impl<D> PermissionBroker<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> BrokerState<'_> {
        match &self.pending {
            Some(pending) => BrokerState::AwaitingDecision {
                path: &pending.path,
            },
            None => BrokerState::Idle,
        }
    }

    pub fn pending(&self) -> Option<&PendingAuthorization<D>> {
        self.pending.as_ref()
    }

    /// Request authorization for `path`, suspending `reply` until decided
    ///
    /// `prompt` is invoked exactly once per new request to issue the platform
    /// permission prompt.
    pub fn request(
        &mut self,
        path: &str,
        device: D,
        reply: Reply<()>,
        prompt: impl FnOnce(&str, &D) -> Result<(), PlatformError>,
    ) -> RequestOutcome {
        if let Some(pending) = &mut self.pending {
            if pending.path == path {
                debug!("Joining pending authorization for {}", path);
                pending.waiters.push(reply);
                return RequestOutcome::Coalesced;
            }

            debug!(
                "Rejecting authorization for {}: {} is pending",
                path, pending.path
            );
            let _ = reply.send(Err(HidError::AuthorizationInProgress {
                pending: pending.path.clone(),
            }));
            return RequestOutcome::Rejected;
        }

        if let Err(e) = prompt(path, &device) {
            warn!("Failed to request permission for {}: {}", path, e);
            let _ = reply.send(Err(HidError::OpenFailed(e.to_string())));
            return RequestOutcome::Failed;
        }

        info!("Permission requested for device: {}", path);
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.pending = Some(PendingAuthorization {
            path: path.to_string(),
            device,
            ticket,
            waiters: vec![reply],
            requested_at: Instant::now(),
        });
        RequestOutcome::Prompted
    }

    /// Consume the pending request if the decision is for its path
    ///
    /// Decisions for any other path (or while idle) are ignored.
    pub fn decide(&mut self, path: &str, granted: bool) -> Option<Decision<D>> {
        match &self.pending {
            Some(pending) if pending.path == path => {}
            Some(pending) => {
                debug!(
                    "Ignoring permission decision for {} (pending: {})",
                    path, pending.path
                );
                return None;
            }
            None => {
                debug!("Ignoring permission decision for {} (no request pending)", path);
                return None;
            }
        }

        let pending = self.pending.take()?;
        info!(
            "Permission {} for device {} after {:?}",
            if granted { "granted" } else { "denied" },
            path,
            pending.elapsed()
        );
        Some(Decision {
            path: pending.path,
            device: pending.device,
            granted,
            waiters: pending.waiters,
        })
    }

    /// Abandon the pending request for `path`, answering every waiter with `error`
    ///
    /// Returns `false` when nothing was pending for `path`.
    pub fn cancel(&mut self, path: &str, error: HidError) -> bool {
        if !self.pending.as_ref().is_some_and(|p| p.path == path) {
            return false;
        }
        if let Some(pending) = self.pending.take() {
            debug!("Cancelling authorization for {}: {}", path, error);
            resume_all(pending.waiters, Err(error));
        }
        true
    }

    /// Like [`cancel`](Self::cancel), but only while `ticket` is still pending
    pub fn abandon(&mut self, path: &str, ticket: u64, error: HidError) -> bool {
        if self.pending.as_ref().is_some_and(|p| p.ticket != ticket) {
            debug!("Ignoring abandon of {} for stale ticket {}", path, ticket);
            return false;
        }
        self.cancel(path, error)
    }
}

fn resume_all(waiters: Vec<Reply<()>>, result: protocol::Result<()>) {
    for waiter in waiters {
        // The caller may have stopped waiting; nothing to report to then.
        let _ = waiter.send(result.clone());
    }
}
