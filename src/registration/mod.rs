//! Well-known name registration.
//!
//! `NameRegistrar` claims a service identifier exclusively on the bus,
//! schedules its release after a fixed hold period, and gives the name back.

mod error;
mod identifier;

pub use error::{ConnectionError, RegistrationError};
pub use identifier::{EmptyIdentifier, ServiceIdentifier};

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::bus::{NameBus, ReleaseNameReply, RequestNameFlags, RequestNameReply};
use crate::process::Lifecycle;

/// Whether this registrar currently owns its identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registered,
}

/// Claims and releases a single well-known name.
///
/// The bus connection and lifecycle handle are shared with the host; the
/// registrar never closes the connection itself. `acquire` and `release`
/// take `&mut self`, so they cannot interleave.
pub struct NameRegistrar {
    identifier: ServiceIdentifier,
    bus: Arc<dyn NameBus>,
    lifecycle: Arc<dyn Lifecycle>,
    hold: Duration,
    state: RegistrationState,
    release_at: Option<Instant>,
}

impl NameRegistrar {
    /// Create a registrar for `identifier`.
    ///
    /// `hold` is how long a successful registration is kept before the
    /// scheduled release fires.
    pub fn new(
        identifier: ServiceIdentifier,
        bus: Arc<dyn NameBus>,
        lifecycle: Arc<dyn Lifecycle>,
        hold: Duration,
    ) -> Self {
        Self {
            identifier,
            bus,
            lifecycle,
            hold,
            state: RegistrationState::Unregistered,
            release_at: None,
        }
    }

    pub fn identifier(&self) -> &ServiceIdentifier {
        &self.identifier
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    pub fn is_registered(&self) -> bool {
        self.state == RegistrationState::Registered
    }

    pub fn hold(&self) -> Duration {
        self.hold
    }

    /// When the scheduled release is due, if one is scheduled.
    pub fn release_deadline(&self) -> Option<Instant> {
        self.release_at
    }

    /// Claim the identifier with a single, non-queueing request.
    ///
    /// Returns `Ok(true)` when this connection became the owner, `Ok(false)`
    /// when the name is held elsewhere or the namespace service answered
    /// with something unusable. Only a missing connection is an error.
    pub async fn acquire(&mut self) -> Result<bool, ConnectionError> {
        if self.is_registered() {
            debug!(name = %self.identifier, "Already registered, skipping request");
            return Ok(true);
        }

        match self.claim().await {
            Ok(()) => {
                self.state = RegistrationState::Registered;
                self.release_at = Some(Instant::now() + self.hold);
                info!(
                    name = %self.identifier,
                    hold_ms = self.hold.as_millis() as u64,
                    "Registered on bus, release scheduled"
                );
                Ok(true)
            }
            Err(RegistrationError::Connection(e)) => {
                error!(name = %self.identifier, error = %e, "Cannot register without a bus connection");
                Err(e)
            }
            Err(e @ RegistrationError::NameConflict { .. }) => {
                info!(error = %e, "Another instance is already running");
                Ok(false)
            }
            Err(e) => {
                warn!(name = %self.identifier, error = %e, "Name acquisition failed");
                Ok(false)
            }
        }
    }

    async fn claim(&self) -> Result<(), RegistrationError> {
        if !self.bus.is_connected().await {
            return Err(ConnectionError::NotConnected.into());
        }

        let name = self.identifier.as_str();
        let reply = self
            .bus
            .request_name(name, RequestNameFlags::exclusive())
            .await?;
        debug!(name = %name, reply = ?reply, "RequestName answered");

        match reply {
            RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner => Ok(()),
            RequestNameReply::Exists => {
                let owner = self.bus.name_owner(name).await.ok().flatten();
                Err(RegistrationError::NameConflict {
                    name: name.to_string(),
                    owner,
                })
            }
            RequestNameReply::InQueue => {
                // Leave the queue we never asked to join.
                match self.bus.release_name(name).await {
                    Ok(slot) => debug!(name = %name, reply = ?slot, "Left owner queue"),
                    Err(e) => warn!(name = %name, error = %e, "Failed to leave owner queue"),
                }
                Err(RegistrationError::Protocol(format!(
                    "unexpected reply {:?} to a non-queueing request",
                    reply
                )))
            }
        }
    }

    /// Give the identifier back and ask the host to shut down.
    ///
    /// Safe to call when nothing is registered. Failures to relinquish are
    /// logged and otherwise ignored; the state always ends `Unregistered`.
    pub async fn release(&mut self) {
        let was_registered = self.is_registered();

        match self.relinquish().await {
            Ok(ReleaseNameReply::Released) => {
                info!(name = %self.identifier, "Released bus name");
            }
            Ok(reply) if was_registered => {
                warn!(name = %self.identifier, reply = ?reply, "Registered name was not ours to release");
            }
            Ok(reply) => {
                debug!(name = %self.identifier, reply = ?reply, "Nothing to release");
            }
            Err(e) => {
                warn!(error = %e, "Release failed, continuing shutdown");
            }
        }

        self.state = RegistrationState::Unregistered;
        self.release_at = None;
        self.lifecycle.request_shutdown();
    }

    async fn relinquish(&self) -> Result<ReleaseNameReply, RegistrationError> {
        self.bus
            .release_name(self.identifier.as_str())
            .await
            .map_err(|e| RegistrationError::Release {
                name: self.identifier.to_string(),
                message: e.to_string(),
            })
    }

    /// Resolves when the scheduled release is due.
    ///
    /// Never resolves while nothing is scheduled.
    pub async fn scheduled_release(&self) {
        match self.release_at {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{InProcessConnection, InProcessNamespace, Queueing};
    use crate::process::ShutdownSignal;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const NAME: &str = "com.example.testservice1";

    fn registrar(conn: InProcessConnection, shutdown: &ShutdownSignal) -> NameRegistrar {
        NameRegistrar::new(
            ServiceIdentifier::new(NAME).unwrap(),
            Arc::new(conn),
            Arc::new(shutdown.clone()),
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn test_acquire_registers_and_schedules_release() {
        let ns = InProcessNamespace::new();
        let shutdown = ShutdownSignal::new();
        let mut reg = registrar(ns.connect(), &shutdown);

        assert_eq!(reg.acquire().await, Ok(true));

        assert_eq!(reg.state(), RegistrationState::Registered);
        assert!(reg.release_deadline().is_some());
        assert!(ns.owner_of(NAME).is_some());
        assert_eq!(shutdown.request_count(), 0);
    }

    #[tokio::test]
    async fn test_acquire_twice_does_not_rerequest() {
        let ns = InProcessNamespace::new();
        let shutdown = ShutdownSignal::new();
        let mut reg = registrar(ns.connect(), &shutdown);

        assert_eq!(reg.acquire().await, Ok(true));
        let deadline = reg.release_deadline();
        assert_eq!(reg.acquire().await, Ok(true));

        assert_eq!(reg.release_deadline(), deadline);
    }

    #[tokio::test]
    async fn test_conflict_leaves_unregistered() {
        let ns = InProcessNamespace::new();
        let shutdown = ShutdownSignal::new();
        let mut first = registrar(ns.connect(), &shutdown);
        let mut second = registrar(ns.connect(), &shutdown);

        assert_eq!(first.acquire().await, Ok(true));
        assert_eq!(second.acquire().await, Ok(false));

        assert_eq!(second.state(), RegistrationState::Unregistered);
        assert!(second.release_deadline().is_none());
    }

    #[tokio::test]
    async fn test_disconnected_bus_is_connection_error() {
        let ns = InProcessNamespace::new();
        let conn = ns.connect();
        conn.disconnect().await;
        let shutdown = ShutdownSignal::new();
        let mut reg = registrar(conn, &shutdown);

        assert_eq!(reg.acquire().await, Err(ConnectionError::NotConnected));
        assert_eq!(reg.state(), RegistrationState::Unregistered);
    }

    #[tokio::test]
    async fn test_invalid_response_never_schedules_release() {
        let ns = InProcessNamespace::new();
        let conn = ns.connect();
        conn.set_fail_requests(true);
        let shutdown = ShutdownSignal::new();
        let mut reg = registrar(conn, &shutdown);

        assert_eq!(reg.acquire().await, Ok(false));

        assert_eq!(reg.state(), RegistrationState::Unregistered);
        assert!(reg.release_deadline().is_none());
    }

    #[tokio::test]
    async fn test_release_on_unregistered_is_noop_but_requests_shutdown() {
        let ns = InProcessNamespace::new();
        let shutdown = ShutdownSignal::new();
        let mut reg = registrar(ns.connect(), &shutdown);

        reg.release().await;

        assert_eq!(reg.state(), RegistrationState::Unregistered);
        assert_eq!(shutdown.request_count(), 1);
    }

    #[tokio::test]
    async fn test_release_survives_bus_failure() {
        let ns = InProcessNamespace::new();
        let conn = Arc::new(ns.connect());
        let shutdown = ShutdownSignal::new();
        let mut reg = NameRegistrar::new(
            ServiceIdentifier::new(NAME).unwrap(),
            conn.clone(),
            Arc::new(shutdown.clone()),
            Duration::from_secs(10),
        );

        assert_eq!(reg.acquire().await, Ok(true));
        conn.set_fail_requests(true);
        reg.release().await;

        assert_eq!(reg.state(), RegistrationState::Unregistered);
        assert!(shutdown.is_requested());
    }

    #[tokio::test]
    async fn test_acquire_release_acquire() {
        let ns = InProcessNamespace::new();
        let shutdown = ShutdownSignal::new();
        let mut reg = registrar(ns.connect(), &shutdown);

        assert_eq!(reg.acquire().await, Ok(true));
        reg.release().await;
        assert_eq!(ns.owner_of(NAME), None);
        assert!(reg.release_deadline().is_none());

        assert_eq!(reg.acquire().await, Ok(true));
        assert!(reg.is_registered());
    }

    #[tokio::test]
    async fn test_release_hands_name_to_queued_claimant() {
        let ns = InProcessNamespace::new();
        let waiter = ns.connect();
        let shutdown = ShutdownSignal::new();
        let mut reg = registrar(ns.connect(), &shutdown);

        assert_eq!(reg.acquire().await, Ok(true));
        waiter
            .request_name(NAME, RequestNameFlags::exclusive().with_queueing(Queueing::Queue))
            .await
            .unwrap();

        reg.release().await;

        assert_eq!(ns.owner_of(NAME), Some(waiter.unique_name().await.unwrap()));
    }

    #[tokio::test]
    async fn test_scheduled_release_resolves_after_hold() {
        let ns = InProcessNamespace::new();
        let shutdown = ShutdownSignal::new();
        let mut reg = NameRegistrar::new(
            ServiceIdentifier::new(NAME).unwrap(),
            Arc::new(ns.connect()),
            Arc::new(shutdown.clone()),
            Duration::from_millis(20),
        );

        assert_eq!(reg.acquire().await, Ok(true));
        let started = std::time::Instant::now();
        reg.scheduled_release().await;

        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[tokio::test]
    async fn test_scheduled_release_pending_when_unregistered() {
        let ns = InProcessNamespace::new();
        let shutdown = ShutdownSignal::new();
        let reg = registrar(ns.connect(), &shutdown);

        let result =
            tokio::time::timeout(Duration::from_millis(20), reg.scheduled_release()).await;

        assert!(result.is_err());
    }

    /// Bus that queues every request, as a misbehaving daemon would.
    #[derive(Default)]
    struct QueueingBus {
        released: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NameBus for QueueingBus {
        async fn is_connected(&self) -> bool {
            true
        }

        async fn unique_name(&self) -> crate::bus::Result<String> {
            Ok(":1.1".to_string())
        }

        async fn request_name(
            &self,
            _name: &str,
            _flags: RequestNameFlags,
        ) -> crate::bus::Result<RequestNameReply> {
            Ok(RequestNameReply::InQueue)
        }

        async fn release_name(&self, name: &str) -> crate::bus::Result<ReleaseNameReply> {
            self.released.lock().unwrap().push(name.to_string());
            Ok(ReleaseNameReply::Released)
        }

        async fn name_owner(&self, _name: &str) -> crate::bus::Result<Option<String>> {
            Ok(None)
        }

        async fn disconnect(&self) {}
    }

    #[tokio::test]
    async fn test_unexpected_queue_reply_fails_and_leaves_queue() {
        let bus = Arc::new(QueueingBus::default());
        let shutdown = ShutdownSignal::new();
        let mut reg = NameRegistrar::new(
            ServiceIdentifier::new(NAME).unwrap(),
            bus.clone(),
            Arc::new(shutdown.clone()),
            Duration::from_secs(10),
        );

        assert_eq!(reg.acquire().await, Ok(false));

        assert_eq!(reg.state(), RegistrationState::Unregistered);
        assert!(reg.release_deadline().is_none());
        assert_eq!(*bus.released.lock().unwrap(), vec![NAME.to_string()]);
        assert_eq!(shutdown.request_count(), 0);
    }
}
