//! Process lifecycle for a name-holding service.
//!
//! `ServiceHost` runs the one control flow of the process: claim the name on
//! start, hold it until the scheduled release (or an external termination
//! signal), release it, and close the bus connection.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::bus::NameBus;
use crate::registration::{ConnectionError, NameRegistrar, RegistrationState, ServiceIdentifier};

/// Receiver of shutdown requests from the registrar.
pub trait Lifecycle: Send + Sync {
    /// Ask the host process to terminate.
    fn request_shutdown(&self);
}

/// Watch-channel shutdown flag.
///
/// Clones share the same flag; any clone can request shutdown and any clone
/// can wait for it.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
    requests: Arc<AtomicUsize>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }

    /// How many times shutdown has been requested.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Wait until shutdown has been requested.
    pub async fn requested(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so the channel cannot close here.
        let _ = rx.wait_for(|requested| *requested).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle for ShutdownSignal {
    fn request_shutdown(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.tx.send_replace(true);
        info!("Shutdown requested");
    }
}

/// How a host run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOutcome {
    /// The name was held and released.
    Completed,
    /// Another connection owns the name, or the namespace refused it.
    NameUnavailable,
    /// No usable bus connection.
    ConnectionFailed,
}

impl HostOutcome {
    /// Process exit code for this outcome.
    pub fn exit_code(self) -> u8 {
        match self {
            HostOutcome::Completed => 0,
            HostOutcome::ConnectionFailed => 1,
            HostOutcome::NameUnavailable => 2,
        }
    }
}

/// Drives a `NameRegistrar` through one start/hold/release cycle.
pub struct ServiceHost {
    registrar: NameRegistrar,
    bus: Arc<dyn NameBus>,
    shutdown: ShutdownSignal,
}

impl ServiceHost {
    pub fn new(identifier: ServiceIdentifier, bus: Arc<dyn NameBus>, hold: Duration) -> Self {
        let shutdown = ShutdownSignal::new();
        let registrar = NameRegistrar::new(
            identifier,
            Arc::clone(&bus),
            Arc::new(shutdown.clone()),
            hold,
        );
        Self {
            registrar,
            bus,
            shutdown,
        }
    }

    pub fn registrar(&self) -> &NameRegistrar {
        &self.registrar
    }

    /// Handle to the shutdown flag the registrar signals.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Startup hook: one registration attempt.
    pub async fn on_start(&mut self) -> Result<bool, ConnectionError> {
        info!(
            name = %self.registrar.identifier(),
            hold_ms = self.registrar.hold().as_millis() as u64,
            "Starting"
        );
        self.registrar.acquire().await
    }

    /// Run until the hold period elapses or `terminate` resolves.
    ///
    /// The name is released exactly once on either path. The bus
    /// connection is closed before returning.
    pub async fn run_until<F>(mut self, terminate: F) -> HostOutcome
    where
        F: Future<Output = ()>,
    {
        let outcome = match self.on_start().await {
            Err(e) => {
                error!(error = %e, "Startup aborted");
                HostOutcome::ConnectionFailed
            }
            Ok(false) => {
                info!(name = %self.registrar.identifier(), "Name unavailable, exiting");
                HostOutcome::NameUnavailable
            }
            Ok(true) => {
                tokio::select! {
                    _ = self.registrar.scheduled_release() => {
                        info!(name = %self.registrar.identifier(), "Hold period elapsed");
                    }
                    _ = terminate => {
                        warn!(name = %self.registrar.identifier(), "Terminated before hold period elapsed");
                    }
                }
                self.registrar.release().await;
                self.shutdown.requested().await;
                HostOutcome::Completed
            }
        };

        debug_assert_eq!(self.registrar.state(), RegistrationState::Unregistered);
        self.bus.disconnect().await;
        outcome
    }

    /// Run until the hold period elapses, with no external termination.
    pub async fn run(self) -> HostOutcome {
        self.run_until(std::future::pending()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessNamespace;

    const NAME: &str = "com.example.testservice1";

    fn host(ns: &InProcessNamespace, hold: Duration) -> ServiceHost {
        ServiceHost::new(
            ServiceIdentifier::new(NAME).unwrap(),
            Arc::new(ns.connect()),
            hold,
        )
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(HostOutcome::Completed.exit_code(), 0);
        assert_eq!(HostOutcome::ConnectionFailed.exit_code(), 1);
        assert_eq!(HostOutcome::NameUnavailable.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_signal_counts_requests() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_requested());

        let other = signal.clone();
        other.request_shutdown();

        signal.requested().await;
        assert!(signal.is_requested());
        assert_eq!(signal.request_count(), 1);
    }

    #[tokio::test]
    async fn test_run_releases_after_hold() {
        let ns = InProcessNamespace::new();
        let host = host(&ns, Duration::from_millis(20));
        let shutdown = host.shutdown_signal();

        let outcome = host.run().await;

        assert_eq!(outcome, HostOutcome::Completed);
        assert_eq!(shutdown.request_count(), 1);
        assert_eq!(ns.owner_of(NAME), None);
    }

    #[tokio::test]
    async fn test_terminate_releases_early() {
        let ns = InProcessNamespace::new();
        let host = host(&ns, Duration::from_secs(3600));
        let shutdown = host.shutdown_signal();

        let outcome = host
            .run_until(tokio::time::sleep(Duration::from_millis(10)))
            .await;

        assert_eq!(outcome, HostOutcome::Completed);
        assert_eq!(shutdown.request_count(), 1);
        assert_eq!(ns.name_count(), 0);
    }

    #[tokio::test]
    async fn test_name_taken_exits_without_release() {
        let ns = InProcessNamespace::new();
        let mut first = host(&ns, Duration::from_secs(3600));
        assert_eq!(first.on_start().await, Ok(true));

        let second = host(&ns, Duration::from_millis(10));
        let shutdown = second.shutdown_signal();
        let outcome = second.run().await;

        assert_eq!(outcome, HostOutcome::NameUnavailable);
        assert_eq!(shutdown.request_count(), 0);
        assert!(first.registrar().is_registered());
        assert!(ns.owner_of(NAME).is_some());
    }

    #[tokio::test]
    async fn test_disconnected_bus_fails_startup() {
        let ns = InProcessNamespace::new();
        let conn = ns.connect();
        conn.disconnect().await;
        let host = ServiceHost::new(
            ServiceIdentifier::new(NAME).unwrap(),
            Arc::new(conn),
            Duration::from_millis(10),
        );

        assert_eq!(host.run().await, HostOutcome::ConnectionFailed);
    }
}
